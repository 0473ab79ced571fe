//! # Kernel-Side Code Generator
//!
//! Renders the optimized IR as one restricted-C translation unit, `B.ebpf.c`,
//! for clang's BPF target and libbpf's `SEC` conventions.
//!
//! ## Layout
//! - Fingerprint, includes, builtin header includes per kind
//! - Shared section from the [`AbiContract`] (typedefs, config structs)
//! - Map definitions, config load helpers
//! - Prototypes, global functions, per-program helpers and entry points
//! - Chain dispatchers, license
//!
//! Function bodies become `static __always_inline` functions; each program's
//! entry body is `hs_run_<program>` so a `SEC` wrapper and any dispatcher can
//! both call it.

use super::abi::{declarator, type_name, AbiContract};
use super::analysis::AnalysisResult;
use super::ir::{
    loop_counter_type, ContextBuiltin, Dispatcher, IrExpr, IrFunction, IrProgram, IrStmt, IrType,
    OptimizedIr,
};
use super::resource_plan::ResourcePlan;
use super::strategy::{chain_dispatchers, Strategy};
use super::types::{default_action, AliasTables, CONTEXT_PARAM};
use crate::parser::{ConfigDecl, HookKind};
use crate::{Error, Result};
use std::fmt::Write;
use tracing::debug;

/// Kernel-side generator
pub struct EbpfCodegen<'a> {
    ir: &'a OptimizedIr,
    aliases: &'a AliasTables,
    contract: AbiContract,
    dispatchers: Vec<Dispatcher>,
    out: String,
    temp: usize,
}

/// Function being emitted
struct FnScope<'f> {
    program: Option<&'f str>,
    kind: Option<HookKind>,
    function: &'f str,
    is_entry: bool,
}

/// Generate `B.ebpf.c` from the optimized IR and the config declarations
pub fn generate(ir: &OptimizedIr, configs: &[ConfigDecl], aliases: &AliasTables) -> Result<String> {
    let contract = AbiContract::from_config_decls(ir, configs, aliases)?;
    EbpfCodegen::new(ir, aliases, contract, ir.dispatchers.clone()).emit()
}

/// Generate `B.ebpf.c` when the unit declares no config
///
/// Dispatchers are rebuilt from the strategy list and ownership comes from
/// the plan; both must agree with what the optimizer recorded.
pub fn generate_from_plan(
    ir: &OptimizedIr,
    analysis: &AnalysisResult,
    plan: &ResourcePlan,
    strategies: &[Strategy],
    aliases: &AliasTables,
) -> Result<String> {
    if plan != &ir.plan {
        return Err(Error::codegen("resource plan differs from the one the IR was built against"));
    }
    if let Some(p) = ir.programs.iter().find(|p| analysis.program(&p.name).is_none()) {
        return Err(Error::codegen(format!("program '{}' missing from analysis", p.name)));
    }
    let dispatchers: Vec<Dispatcher> = chain_dispatchers(strategies, &ir.programs)
        .into_iter()
        .map(|(_, d)| d)
        .collect();
    let contract = AbiContract::from_ir(ir, aliases)?;
    EbpfCodegen::new(ir, aliases, contract, dispatchers).emit()
}

/// Pointer type of the hook context
pub fn context_param(kind: HookKind) -> &'static str {
    match kind {
        HookKind::Xdp => "struct xdp_md *ctx",
        HookKind::Tc => "struct __sk_buff *ctx",
        HookKind::Kprobe => "struct pt_regs *ctx",
    }
}

/// libbpf section name of a program
pub fn section_name(kind: HookKind, attach: &str) -> String {
    match kind {
        HookKind::Xdp => "xdp".to_string(),
        HookKind::Tc => "tc".to_string(),
        HookKind::Kprobe => format!("kprobe/{}", attach),
    }
}

impl<'a> EbpfCodegen<'a> {
    fn new(
        ir: &'a OptimizedIr,
        aliases: &'a AliasTables,
        contract: AbiContract,
        dispatchers: Vec<Dispatcher>,
    ) -> Self {
        Self {
            ir,
            aliases,
            contract,
            dispatchers,
            out: String::new(),
            temp: 0,
        }
    }

    fn emit(mut self) -> Result<String> {
        let ir = self.ir;
        let kinds = ir.kinds();

        self.line(0, "/* Generated by hookc. Do not edit. */");
        let fingerprint = self.contract.fingerprint_line();
        self.line(0, &fingerprint);
        self.blank();

        self.line(0, "#include <linux/bpf.h>");
        self.line(0, "#include <linux/types.h>");
        if kinds.contains(&HookKind::Tc) {
            self.line(0, "#include <linux/pkt_cls.h>");
        }
        if kinds.contains(&HookKind::Kprobe) {
            self.line(0, "#include <linux/ptrace.h>");
        }
        self.line(0, "#include <bpf/bpf_helpers.h>");
        if kinds.contains(&HookKind::Kprobe) {
            self.line(0, "#include <bpf/bpf_tracing.h>");
        }
        self.blank();
        for kind in &kinds {
            let _ = writeln!(self.out, "#if __has_include(\"{}.h\")", kind);
            let _ = writeln!(self.out, "#include \"{}.h\"", kind);
            self.line(0, "#endif");
        }
        if !kinds.is_empty() {
            self.blank();
        }

        let shared = self.contract.render_shared();
        self.out.push_str(&shared);
        self.blank();
        let maps = self.contract.render_kernel_maps();
        self.out.push_str(&maps);

        self.emit_config_loaders();
        self.emit_prototypes()?;

        for f in &ir.functions {
            self.emit_function(f, None, None)?;
        }
        for program in &ir.programs {
            self.emit_program(program)?;
        }
        let dispatchers = self.dispatchers.clone();
        for d in &dispatchers {
            self.emit_dispatcher(d)?;
        }

        self.line(0, "char LICENSE[] SEC(\"license\") = \"GPL\";");

        debug!(
            bytes = self.out.len(),
            fingerprint = %self.contract.fingerprint(),
            "generated kernel source"
        );
        Ok(self.out)
    }

    fn line(&mut self, indent: usize, text: &str) {
        for _ in 0..indent {
            self.out.push_str("    ");
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn blank(&mut self) {
        self.out.push('\n');
    }

    fn next_temp(&mut self) -> usize {
        let n = self.temp;
        self.temp += 1;
        n
    }

    fn emit_config_loaders(&mut self) {
        let names: Vec<String> = self.contract.configs().map(|c| c.canonical.clone()).collect();
        for name in names {
            let _ = writeln!(
                self.out,
                "static __always_inline struct {} *hs_load_{}(void)\n{{",
                name, name
            );
            self.line(1, "__u32 hs_zero = 0;");
            self.blank();
            let _ = writeln!(self.out, "    return bpf_map_lookup_elem(&{}, &hs_zero);", name);
            self.line(0, "}");
            self.blank();
        }
    }

    fn emit_prototypes(&mut self) -> Result<()> {
        let mut protos = Vec::new();
        for f in &self.ir.functions {
            protos.push(self.signature(f, None, None)?);
        }
        for p in &self.ir.programs {
            for f in p.functions() {
                protos.push(self.signature(f, Some(p), Some(&p.entry.symbol))?);
            }
        }
        if protos.is_empty() {
            return Ok(());
        }
        for proto in protos {
            let _ = writeln!(self.out, "{};", proto);
        }
        self.blank();
        Ok(())
    }

    fn signature(&self, f: &IrFunction, program: Option<&IrProgram>, entry: Option<&str>) -> Result<String> {
        let is_entry = entry == Some(f.symbol.as_str());
        let ret = if is_entry {
            "int".to_string()
        } else {
            type_name(&f.ret)
        };

        let mut params = Vec::new();
        if let Some(p) = program {
            params.push(context_param(p.kind).to_string());
        }
        for (name, ty) in &f.params {
            let alias = self
                .aliases
                .vars
                .alias_of(program.map(|p| p.name.as_str()), &f.name, name);
            if alias.is_none() && !ty.is_scalar() {
                return Err(Error::codegen(format!(
                    "parameter '{}' of '{}' has no spellable type",
                    name, f.name
                )));
            }
            params.push(declarator(ty, alias, name));
        }
        let params = if params.is_empty() {
            "void".to_string()
        } else {
            params.join(", ")
        };
        Ok(format!("static __always_inline {} {}({})", ret, f.symbol, params))
    }

    fn emit_function(
        &mut self,
        f: &IrFunction,
        program: Option<&IrProgram>,
        entry: Option<&str>,
    ) -> Result<()> {
        let signature = self.signature(f, program, entry)?;
        self.line(0, &signature);
        self.line(0, "{");
        let scope = FnScope {
            program: program.map(|p| p.name.as_str()),
            kind: program.map(|p| p.kind),
            function: &f.name,
            is_entry: entry == Some(f.symbol.as_str()),
        };
        self.emit_block(&scope, &f.body, 1)?;
        if let (true, Some(kind)) = (scope.is_entry, scope.kind) {
            let fallback = format!("return {};", default_action(kind));
            self.line(1, &fallback);
        }
        self.line(0, "}");
        self.blank();
        Ok(())
    }

    fn emit_program(&mut self, program: &IrProgram) -> Result<()> {
        let _ = writeln!(
            self.out,
            "/* program {}: {} on {} */",
            program.name, program.kind, program.attach
        );
        self.blank();
        for helper in &program.helpers {
            self.emit_function(helper, Some(program), Some(&program.entry.symbol))?;
        }
        self.emit_function(&program.entry, Some(program), Some(&program.entry.symbol))?;

        if self.dispatchers.iter().any(|d| d.programs.contains(&program.name)) {
            return Ok(());
        }
        let _ = writeln!(self.out, "SEC(\"{}\")", section_name(program.kind, &program.attach));
        let _ = writeln!(self.out, "int {}({})\n{{", program.name, context_param(program.kind));
        let _ = writeln!(self.out, "    return {}(ctx);", program.body_symbol());
        self.line(0, "}");
        self.blank();
        Ok(())
    }

    fn emit_dispatcher(&mut self, d: &Dispatcher) -> Result<()> {
        let proceed = default_action(d.kind);
        let _ = writeln!(self.out, "/* chain on {}: {} */", d.attach, d.programs.join(" -> "));
        let _ = writeln!(self.out, "SEC(\"{}\")", section_name(d.kind, &d.attach));
        let _ = writeln!(self.out, "int {}({})\n{{", d.symbol, context_param(d.kind));
        self.line(1, "int hs_rc;");
        self.blank();
        let ir = self.ir;
        let count = d.programs.len();
        for (i, name) in d.programs.iter().enumerate() {
            let program = ir
                .program(name)
                .ok_or_else(|| Error::codegen(format!("dispatcher names unknown program '{}'", name)))?;
            if i + 1 == count {
                let _ = writeln!(self.out, "    return {}(ctx);", program.body_symbol());
            } else {
                let _ = writeln!(self.out, "    hs_rc = {}(ctx);", program.body_symbol());
                let _ = writeln!(self.out, "    if (hs_rc != {})", proceed);
                self.line(2, "return hs_rc;");
            }
        }
        self.line(0, "}");
        self.blank();
        Ok(())
    }

    fn emit_block(&mut self, scope: &FnScope, stmts: &[IrStmt], indent: usize) -> Result<()> {
        for stmt in stmts {
            self.emit_stmt(scope, stmt, indent)?;
        }
        Ok(())
    }

    fn emit_stmt(&mut self, scope: &FnScope, stmt: &IrStmt, indent: usize) -> Result<()> {
        match stmt {
            IrStmt::Declare { name, ty, init } => {
                let init = self.expr(scope, init)?;
                let alias = self.aliases.vars.alias_of(scope.program, scope.function, name);
                let decl = match (alias, ty) {
                    (Some(alias), _) => format!("{} {}", alias, name),
                    (None, IrType::Primitive(p)) => format!("{} {}", p.c_name(), name),
                    _ => format!("__auto_type {}", name),
                };
                self.line(indent, &format!("{} = {};", decl, init));
            }
            IrStmt::Assign { name, value } => {
                let value = self.expr(scope, value)?;
                self.line(indent, &format!("{} = {};", name, value));
            }
            IrStmt::If {
                cond,
                then_body,
                else_body,
            } => {
                let cond = self.expr(scope, cond)?;
                self.line(indent, &format!("if ({}) {{", cond));
                self.emit_block(scope, then_body, indent + 1)?;
                if else_body.is_empty() {
                    self.line(indent, "}");
                } else {
                    self.line(indent, "} else {");
                    self.emit_block(scope, else_body, indent + 1)?;
                    self.line(indent, "}");
                }
            }
            IrStmt::Loop {
                var,
                start,
                end,
                body,
            } => {
                let counter = loop_counter_type(*start).c_name();
                self.line(
                    indent,
                    &format!(
                        "for ({} {} = {}; {} < {}; {}++) {{",
                        counter,
                        var,
                        int_literal(*start),
                        var,
                        int_literal(*end),
                        var
                    ),
                );
                self.emit_block(scope, body, indent + 1)?;
                self.line(indent, "}");
            }
            IrStmt::Return(value) => {
                let text = match (value, scope.is_entry, scope.kind) {
                    (Some(v), _, _) => format!("return {};", self.expr(scope, v)?),
                    (None, true, Some(kind)) => format!("return {};", default_action(kind)),
                    (None, _, _) => "return;".to_string(),
                };
                self.line(indent, &text);
            }
            IrStmt::MapUpdate {
                map,
                key,
                value,
                key_ty,
                value_ty,
            } => {
                let abi = self
                    .contract
                    .map(map.name())
                    .ok_or_else(|| Error::codegen(format!("unknown map '{}'", map.name())))?;
                let key_decl = temp_decl(abi.key.as_ref().map(type_name), key_ty);
                let value_decl = temp_decl(Some(type_name(&abi.value)), value_ty);
                let n = self.next_temp();
                let key = self.expr(scope, key)?;
                let value = self.expr(scope, value)?;
                self.line(indent, "{");
                self.line(indent + 1, &format!("{} hs_k{} = {};", key_decl, n, key));
                self.line(indent + 1, &format!("{} hs_v{} = {};", value_decl, n, value));
                self.line(
                    indent + 1,
                    &format!(
                        "bpf_map_update_elem(&{}, &hs_k{}, &hs_v{}, BPF_ANY);",
                        map.name(),
                        n,
                        n
                    ),
                );
                self.line(indent, "}");
            }
            IrStmt::MapDelete { map, key, key_ty } => {
                let abi = self
                    .contract
                    .map(map.name())
                    .ok_or_else(|| Error::codegen(format!("unknown map '{}'", map.name())))?;
                let key_decl = temp_decl(abi.key.as_ref().map(type_name), key_ty);
                let n = self.next_temp();
                let key = self.expr(scope, key)?;
                self.line(indent, "{");
                self.line(indent + 1, &format!("{} hs_k{} = {};", key_decl, n, key));
                self.line(
                    indent + 1,
                    &format!("bpf_map_delete_elem(&{}, &hs_k{});", map.name(), n),
                );
                self.line(indent, "}");
            }
            IrStmt::Emit {
                map,
                value,
                value_ty,
            } => {
                let abi = self
                    .contract
                    .map(map.name())
                    .ok_or_else(|| Error::codegen(format!("unknown ring buffer '{}'", map.name())))?;
                let event_decl = temp_decl(Some(type_name(&abi.value)), value_ty);
                let n = self.next_temp();
                let value = self.expr(scope, value)?;
                self.line(indent, "{");
                self.line(indent + 1, &format!("{} hs_e{} = {};", event_decl, n, value));
                self.line(
                    indent + 1,
                    &format!(
                        "bpf_ringbuf_output(&{}, &hs_e{}, sizeof(hs_e{}), 0);",
                        map.name(),
                        n,
                        n
                    ),
                );
                self.line(indent, "}");
            }
            IrStmt::Eval(e) => {
                let e = self.expr(scope, e)?;
                self.line(indent, &format!("{};", e));
            }
        }
        Ok(())
    }

    fn expr(&mut self, scope: &FnScope, e: &IrExpr) -> Result<String> {
        Ok(match e {
            IrExpr::Int(n) => int_literal(*n),
            IrExpr::Bool(b) => if *b { "1" } else { "0" }.to_string(),
            IrExpr::Symbolic(name) | IrExpr::Local(name) => name.clone(),
            IrExpr::Binary { op, lhs, rhs } => {
                format!("({} {} {})", self.expr(scope, lhs)?, op.c_symbol(), self.expr(scope, rhs)?)
            }
            IrExpr::Unary { op, operand } => {
                format!("({}{})", op.c_symbol(), self.expr(scope, operand)?)
            }
            IrExpr::Field { base, field } => match base.as_ref() {
                IrExpr::Local(name) => format!("{}.{}", name, field),
                other => format!("({}).{}", self.expr(scope, other)?, field),
            },
            IrExpr::ConfigField { config, field } => {
                let cfg = self
                    .contract
                    .config(config.name())
                    .ok_or_else(|| Error::codegen(format!("unknown config '{}'", config.name())))?;
                if cfg.field(field).is_none() {
                    return Err(Error::codegen(format!(
                        "config '{}' has no field '{}'",
                        config.name(),
                        field
                    )));
                }
                let n = self.next_temp();
                format!(
                    "({{ struct {c} *hs_c{n} = hs_load_{c}(); hs_c{n} ? hs_c{n}->{f} : (__typeof__(hs_c{n}->{f})){{0}}; }})",
                    c = config.name(),
                    n = n,
                    f = field
                )
            }
            IrExpr::MapLookup {
                map, key, key_ty, ..
            } => {
                let abi = self
                    .contract
                    .map(map.name())
                    .ok_or_else(|| Error::codegen(format!("unknown map '{}'", map.name())))?;
                let key_decl = temp_decl(abi.key.as_ref().map(type_name), key_ty);
                let value_ty = type_name(&abi.value);
                let n = self.next_temp();
                let key = self.expr(scope, key)?;
                format!(
                    "({{ {kd} hs_k{n} = {key}; {vt} *hs_v{n} = bpf_map_lookup_elem(&{m}, &hs_k{n}); hs_v{n} ? *hs_v{n} : (__typeof__(*hs_v{n})){{0}}; }})",
                    kd = key_decl,
                    n = n,
                    key = key,
                    vt = value_ty,
                    m = map.name()
                )
            }
            IrExpr::Call {
                function,
                args,
                passes_context,
            } => {
                let mut rendered = Vec::with_capacity(args.len() + 1);
                if *passes_context {
                    rendered.push(CONTEXT_PARAM.to_string());
                }
                for a in args {
                    rendered.push(self.expr(scope, a)?);
                }
                format!("{}({})", function, rendered.join(", "))
            }
            IrExpr::Context(builtin) => {
                let kind = scope.kind.ok_or_else(|| {
                    Error::codegen(format!("context builtin outside a program in '{}'", scope.function))
                })?;
                context_expr(*builtin, kind)?
            }
            IrExpr::StructLit { type_name, fields } => {
                let mut parts = Vec::with_capacity(fields.len());
                for (name, value) in fields {
                    parts.push(format!(".{} = {}", name, self.expr(scope, value)?));
                }
                if parts.is_empty() {
                    format!("(({}){{0}})", type_name)
                } else {
                    format!("(({}){{ {} }})", type_name, parts.join(", "))
                }
            }
        })
    }
}

/// Scalars use the map's spelling; aggregates take the expression's own type
fn temp_decl(spelling: Option<String>, ty: &IrType) -> String {
    match (spelling, ty) {
        (Some(s), IrType::Primitive(_)) => s,
        _ => "__auto_type".to_string(),
    }
}

fn context_expr(builtin: ContextBuiltin, kind: HookKind) -> Result<String> {
    Ok(match (builtin, kind) {
        (ContextBuiltin::PacketLen, HookKind::Xdp) => "(__u32)(ctx->data_end - ctx->data)".to_string(),
        (ContextBuiltin::PacketLen, HookKind::Tc) => "ctx->len".to_string(),
        (ContextBuiltin::Ifindex, HookKind::Xdp) => "ctx->ingress_ifindex".to_string(),
        (ContextBuiltin::Ifindex, HookKind::Tc) => "ctx->ifindex".to_string(),
        (ContextBuiltin::Pid, _) => "(__u32)(bpf_get_current_pid_tgid() >> 32)".to_string(),
        (ContextBuiltin::Ktime, _) => "bpf_ktime_get_ns()".to_string(),
        (ContextBuiltin::Arg(n), HookKind::Kprobe) if (1..=5).contains(&n) => {
            format!("(__u64)PT_REGS_PARM{}(ctx)", n)
        }
        (builtin, kind) => {
            return Err(Error::codegen(format!(
                "{:?} is not available in {} programs",
                builtin, kind
            )))
        }
    })
}

/// C spelling of an integer constant
pub fn int_literal(n: i64) -> String {
    if n == i64::MIN {
        "(-9223372036854775807LL - 1)".to_string()
    } else if n > i64::from(i32::MAX) || n < i64::from(i32::MIN) {
        format!("{}LL", n)
    } else {
        n.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::analysis::MultiProgramAnalyzer;
    use crate::compiler::ir::IrGenerator;
    use crate::compiler::optimizer::Optimizer;
    use crate::compiler::resource_plan::ResourcePlanner;
    use crate::compiler::strategy::StrategyGenerator;
    use crate::compiler::types::{CheckedUnit, TypeChecker};
    use crate::{SExprParser, SExprScanner};

    struct Built {
        unit: CheckedUnit,
        analysis: AnalysisResult,
        strategies: Vec<Strategy>,
        ir: OptimizedIr,
    }

    fn build(source: &str) -> Built {
        let tokens = SExprScanner::new(source).scan_tokens().unwrap();
        let program = SExprParser::new(tokens).parse().unwrap();
        let unit = TypeChecker::new().check(program).unwrap();
        let analysis = MultiProgramAnalyzer::new(&unit).analyze();
        analysis.ensure_conflict_free().unwrap();
        let lowered = IrGenerator::new(&unit).lower().unwrap();
        let plan = ResourcePlanner::new().plan(&lowered, &analysis).unwrap();
        let strategies = StrategyGenerator::new().generate(&analysis);
        let ir = Optimizer::default()
            .optimize(lowered, &analysis, &plan, &strategies)
            .unwrap();
        Built {
            unit,
            analysis,
            strategies,
            ir,
        }
    }

    const COUNTER: &str = r#"
(deftype Counter u64)
(defprogram counter :kind xdp :attach "eth0"
  (defmap stats :type array :key u32 :value Counter :max-entries 1)
  (defn main []
    (let (pkt_count Counter) (map-lookup stats 0))
    (map-update stats 0 (+ pkt_count 1))
    (return XDP_PASS)))
"#;

    #[test]
    fn test_alias_spelling_is_preserved() {
        let b = build(COUNTER);
        let src = generate_from_plan(&b.ir, &b.analysis, &b.ir.plan, &b.strategies, &b.unit.aliases).unwrap();
        assert!(src.contains("typedef __u64 Counter;"));
        assert!(src.contains("Counter pkt_count = "));
        assert!(src.contains("__type(value, Counter);"));
        assert!(src.contains("} counter__stats SEC(\".maps\");"));
        assert!(src.contains("SEC(\"xdp\")\nint counter(struct xdp_md *ctx)"));
        assert!(src.contains("return hs_run_counter(ctx);"));
        assert!(src.ends_with("char LICENSE[] SEC(\"license\") = \"GPL\";\n"));
    }

    #[test]
    fn test_chained_programs_share_one_dispatcher() {
        let b = build(
            r#"
(defprogram first :kind xdp :attach "eth0" :priority 1
  (defn main [] (return XDP_PASS)))
(defprogram second :kind xdp :attach "eth0" :priority 2
  (defn main [] (return XDP_DROP)))
"#,
        );
        let src = generate(&b.ir, &[], &b.unit.aliases).unwrap();
        assert!(src.contains("int hs_dispatch_xdp_eth0(struct xdp_md *ctx)"));
        assert!(src.contains("hs_rc = hs_run_first(ctx);\n    if (hs_rc != XDP_PASS)"));
        assert!(src.contains("return hs_run_second(ctx);"));
        assert!(!src.contains("int first(struct xdp_md *ctx)"));
    }

    #[test]
    fn test_kprobe_arguments_and_includes() {
        let b = build(
            r#"
(defmap opens :type hash :key u32 :value u64 :max-entries 1024)
(defprogram trace_open :kind kprobe :attach "do_sys_openat2"
  (defn main []
    (map-update opens (pid) (arg 2))
    (return 0)))
"#,
        );
        let src = generate(&b.ir, &[], &b.unit.aliases).unwrap();
        assert!(src.contains("#include <bpf/bpf_tracing.h>"));
        assert!(src.contains("SEC(\"kprobe/do_sys_openat2\")"));
        assert!(src.contains("(__u64)PT_REGS_PARM2(ctx)"));
        assert!(src.contains("#if __has_include(\"kprobe.h\")"));
    }

    #[test]
    fn test_int_literals() {
        assert_eq!(int_literal(42), "42");
        assert_eq!(int_literal(-1), "-1");
        assert_eq!(int_literal(1 << 40), "1099511627776LL");
    }
}
