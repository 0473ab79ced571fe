//! IR Generator - lowers the checked declaration list to IR
//!
//! Every program becomes an [`IrProgram`] (entry plus helpers), global
//! functions are lowered once, and every config/map declaration, including
//! program-scoped ones, is hoisted into the resource section in declaration
//! order. Resource references keep their declared names here; canonical names
//! are applied by the optimizer once the resource plan exists.

use super::instruction::{ContextBuiltin, IrExpr, IrStmt, ResourceRef};
use super::program::{IrFunction, IrProgram, LoweredUnit, ResourceDecl, ResourceKind};
use super::types::{IrField, IrType};
use crate::compiler::types::{hook_constant, CheckedUnit, FunctionSig, SymbolTable};
use crate::parser::{Declaration, Expression, FunctionDecl, MapDecl, ProgramDecl, Statement};
use crate::{Error, Result};
use std::collections::HashSet;
use tracing::debug;

/// Function being lowered
struct LowerCtx<'a> {
    program: Option<&'a ProgramDecl>,
    locals: HashSet<String>,
}

/// IR Generator - transforms the checked tree to IR
pub struct IrGenerator<'a> {
    unit: &'a CheckedUnit,
}

impl<'a> IrGenerator<'a> {
    /// Create a generator over a checked unit
    pub fn new(unit: &'a CheckedUnit) -> Self {
        Self { unit }
    }

    fn symbols(&self) -> &SymbolTable {
        &self.unit.symbols
    }

    /// Lower the whole unit
    pub fn lower(&self) -> Result<LoweredUnit> {
        let mut programs = Vec::new();
        let mut functions = Vec::new();
        let mut resources = Vec::new();

        for decl in &self.unit.program.declarations {
            match decl {
                Declaration::Config(c) => {
                    let mut fields = Vec::with_capacity(c.fields.len());
                    for field in &c.fields {
                        let ty = self.unit.aliases.types.resolve_use(&field.ty, c.span)?;
                        fields.push(IrField {
                            name: field.name.clone(),
                            ty: ty.ty,
                            alias: ty.alias,
                        });
                    }
                    resources.push(ResourceDecl {
                        name: c.name.clone(),
                        declared_in: None,
                        kind: ResourceKind::Config {
                            fields,
                            defaults: c.fields.iter().map(|f| f.default).collect(),
                        },
                    });
                }
                Declaration::Map(m) => resources.push(self.lower_map(m, None)?),
                Declaration::GlobalFunction(f) => {
                    let sig = self.symbols().functions.get(&f.name).ok_or_else(|| {
                        Error::compiler(format!("No signature for function '{}'", f.name))
                    })?;
                    functions.push(self.lower_function(None, f, f.name.clone(), sig)?);
                }
                Declaration::Program(p) => {
                    for m in &p.maps {
                        resources.push(self.lower_map(m, Some(&p.name))?);
                    }
                    programs.push(self.lower_program(p)?);
                }
                Declaration::TypeAlias(_) | Declaration::Constant(_) => {}
            }
        }

        debug!(
            programs = programs.len(),
            functions = functions.len(),
            resources = resources.len(),
            "lowered unit"
        );

        Ok(LoweredUnit {
            programs,
            functions,
            resources,
        })
    }

    fn lower_map(&self, m: &MapDecl, program: Option<&str>) -> Result<ResourceDecl> {
        let types = &self.unit.aliases.types;
        let key = match &m.key {
            Some(k) => Some(types.resolve_use(k, m.span)?),
            None => None,
        };
        Ok(ResourceDecl {
            name: m.name.clone(),
            declared_in: program.map(str::to_string),
            kind: ResourceKind::Map {
                map_type: m.map_type,
                key,
                value: types.resolve_use(&m.value, m.span)?,
                max_entries: m.max_entries,
            },
        })
    }

    fn lower_program(&self, p: &ProgramDecl) -> Result<IrProgram> {
        let symbol = self
            .symbols()
            .programs
            .get(&p.name)
            .ok_or_else(|| Error::compiler(format!("No symbols for program '{}'", p.name)))?;

        let mut lowered = Vec::with_capacity(p.functions.len());
        for (i, f) in p.functions.iter().enumerate() {
            let sig = symbol.functions.get(&f.name).ok_or_else(|| {
                Error::compiler(format!("No signature for '{}::{}'", p.name, f.name))
            })?;
            let c_symbol = if i == 0 {
                format!("hs_run_{}", p.name)
            } else {
                helper_symbol(&p.name, &f.name)
            };
            lowered.push(self.lower_function(Some(p), f, c_symbol, sig)?);
        }

        let mut functions = lowered.into_iter();
        let entry = functions
            .next()
            .ok_or_else(|| Error::compiler(format!("Program '{}' has no entry", p.name)))?;

        Ok(IrProgram {
            name: p.name.clone(),
            kind: p.kind,
            attach: p.attach.clone(),
            priority: p.priority,
            direction: p.direction,
            entry,
            helpers: functions.collect(),
        })
    }

    fn lower_function(
        &self,
        program: Option<&ProgramDecl>,
        f: &FunctionDecl,
        symbol: String,
        sig: &FunctionSig,
    ) -> Result<IrFunction> {
        let mut cx = LowerCtx {
            program,
            locals: f.params.iter().map(|p| p.name.clone()).collect(),
        };
        let body = self.lower_block(&mut cx, &f.body)?;
        Ok(IrFunction {
            name: f.name.clone(),
            symbol,
            program: program.map(|p| p.name.clone()),
            params: f
                .params
                .iter()
                .map(|p| p.name.clone())
                .zip(sig.params.iter().cloned())
                .collect(),
            ret: sig.ret.clone(),
            body,
        })
    }

    fn lower_block(&self, cx: &mut LowerCtx, stmts: &[Statement]) -> Result<Vec<IrStmt>> {
        stmts.iter().map(|s| self.lower_statement(cx, s)).collect()
    }

    fn lower_statement(&self, cx: &mut LowerCtx, stmt: &Statement) -> Result<IrStmt> {
        Ok(match stmt {
            Statement::Let {
                name,
                value,
                resolved,
                span,
                ..
            } => {
                let ty = resolved.clone().ok_or_else(|| {
                    Error::compiler(format!(
                        "Variable '{}' at line {} was not annotated by the checker",
                        name, span.line
                    ))
                })?;
                let init = self.lower_expr(cx, value)?;
                cx.locals.insert(name.clone());
                IrStmt::Declare {
                    name: name.clone(),
                    ty,
                    init,
                }
            }
            Statement::Assign { name, value, .. } => IrStmt::Assign {
                name: name.clone(),
                value: self.lower_expr(cx, value)?,
            },
            Statement::If {
                condition,
                then_branch,
                else_branch,
                ..
            } => IrStmt::If {
                cond: self.lower_expr(cx, condition)?,
                then_body: self.lower_block(cx, then_branch)?,
                else_body: match else_branch {
                    Some(branch) => self.lower_block(cx, branch)?,
                    None => Vec::new(),
                },
            },
            Statement::For {
                variable,
                start,
                end,
                body,
                ..
            } => {
                cx.locals.insert(variable.clone());
                IrStmt::Loop {
                    var: variable.clone(),
                    start: *start,
                    end: *end,
                    body: self.lower_block(cx, body)?,
                }
            }
            Statement::Return { value, .. } => IrStmt::Return(match value {
                Some(v) => Some(self.lower_expr(cx, v)?),
                None => None,
            }),
            Statement::Expression(expr) => self.lower_effect(cx, expr)?,
        })
    }

    /// Map mutations and emits are statements; everything else is evaluated
    fn lower_effect(&self, cx: &LowerCtx, expr: &Expression) -> Result<IrStmt> {
        if let Expression::Call { name, args, .. } = expr {
            match (name.as_str(), args.as_slice()) {
                ("map-update", [map, key, value]) => {
                    let (map, key_ty, value_ty) = self.map_operand(map)?;
                    return Ok(IrStmt::MapUpdate {
                        map,
                        key: self.lower_expr(cx, key)?,
                        value: self.lower_expr(cx, value)?,
                        key_ty,
                        value_ty,
                    });
                }
                ("map-delete", [map, key]) => {
                    let (map, key_ty, _) = self.map_operand(map)?;
                    return Ok(IrStmt::MapDelete {
                        map,
                        key: self.lower_expr(cx, key)?,
                        key_ty,
                    });
                }
                ("emit", [map, value]) => {
                    let (map, _, value_ty) = self.map_operand(map)?;
                    return Ok(IrStmt::Emit {
                        map,
                        value: self.lower_expr(cx, value)?,
                        value_ty,
                    });
                }
                _ => {}
            }
        }
        Ok(IrStmt::Eval(self.lower_expr(cx, expr)?))
    }

    fn map_operand(&self, expr: &Expression) -> Result<(ResourceRef, IrType, IrType)> {
        let Expression::Variable(name, _) = expr else {
            return Err(Error::compiler("map builtin without a map name"));
        };
        let map = self
            .symbols()
            .maps
            .get(name)
            .ok_or_else(|| Error::compiler(format!("Unknown map '{}'", name)))?;
        let key_ty = map
            .key
            .as_ref()
            .map(|k| k.ty.clone())
            .unwrap_or(IrType::Void);
        Ok((ResourceRef::new(name.clone()), key_ty, map.value.ty.clone()))
    }

    fn lower_expr(&self, cx: &LowerCtx, expr: &Expression) -> Result<IrExpr> {
        Ok(match expr {
            Expression::IntLiteral(n, _) => IrExpr::Int(*n),
            Expression::BoolLiteral(b, _) => IrExpr::Bool(*b),
            Expression::Variable(name, _) => {
                if cx.locals.contains(name) {
                    IrExpr::Local(name.clone())
                } else if let Some(value) = self.symbols().constants.get(name) {
                    IrExpr::Int(*value)
                } else if hook_constant(name).is_some() {
                    IrExpr::Symbolic(name.clone())
                } else {
                    IrExpr::Local(name.clone())
                }
            }
            Expression::Binary {
                op, left, right, ..
            } => IrExpr::Binary {
                op: *op,
                lhs: Box::new(self.lower_expr(cx, left)?),
                rhs: Box::new(self.lower_expr(cx, right)?),
            },
            Expression::Unary { op, operand, .. } => IrExpr::Unary {
                op: *op,
                operand: Box::new(self.lower_expr(cx, operand)?),
            },
            Expression::Field { base, field, .. } => match base.as_ref() {
                Expression::Variable(name, _)
                    if !cx.locals.contains(name) && self.symbols().configs.contains_key(name) =>
                {
                    IrExpr::ConfigField {
                        config: ResourceRef::new(name.clone()),
                        field: field.clone(),
                    }
                }
                _ => IrExpr::Field {
                    base: Box::new(self.lower_expr(cx, base)?),
                    field: field.clone(),
                },
            },
            Expression::Make {
                type_name, fields, ..
            } => IrExpr::StructLit {
                type_name: type_name.clone(),
                fields: fields
                    .iter()
                    .map(|(name, value)| Ok((name.clone(), self.lower_expr(cx, value)?)))
                    .collect::<Result<Vec<_>>>()?,
            },
            Expression::Call { name, args, .. } => self.lower_call(cx, name, args)?,
        })
    }

    fn lower_call(&self, cx: &LowerCtx, name: &str, args: &[Expression]) -> Result<IrExpr> {
        let builtin = match (name, args) {
            ("map-lookup", [map, key]) => {
                let (map, key_ty, value_ty) = self.map_operand(map)?;
                return Ok(IrExpr::MapLookup {
                    map,
                    key: Box::new(self.lower_expr(cx, key)?),
                    key_ty,
                    value_ty,
                });
            }
            ("map-update" | "map-delete" | "emit", _) => {
                return Err(Error::compiler(format!(
                    "'{}' can only be used as a statement",
                    name
                )));
            }
            ("packet-len", []) => Some(ContextBuiltin::PacketLen),
            ("ifindex", []) => Some(ContextBuiltin::Ifindex),
            ("pid", []) => Some(ContextBuiltin::Pid),
            ("ktime", []) => Some(ContextBuiltin::Ktime),
            ("arg", [Expression::IntLiteral(n, _)]) => {
                let index = u8::try_from(*n)
                    .map_err(|_| Error::compiler(format!("Invalid argument index {}", n)))?;
                Some(ContextBuiltin::Arg(index))
            }
            _ => None,
        };
        if let Some(builtin) = builtin {
            return Ok(IrExpr::Context(builtin));
        }

        let local = cx.program.filter(|p| p.functions.iter().any(|f| f.name == name));
        let (function, passes_context) = match local {
            Some(p) => (helper_symbol(&p.name, name), true),
            None => (name.to_string(), false),
        };
        Ok(IrExpr::Call {
            function,
            args: args
                .iter()
                .map(|a| self.lower_expr(cx, a))
                .collect::<Result<Vec<_>>>()?,
            passes_context,
        })
    }
}

/// C symbol of a program-local helper
pub fn helper_symbol(program: &str, function: &str) -> String {
    format!("{}__{}", program, function)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::types::TypeChecker;
    use crate::{SExprParser, SExprScanner};

    fn lower(source: &str) -> LoweredUnit {
        let tokens = SExprScanner::new(source).scan_tokens().unwrap();
        let program = SExprParser::new(tokens).parse().unwrap();
        let unit = TypeChecker::new().check(program).unwrap();
        IrGenerator::new(&unit).lower().unwrap()
    }

    const SOURCE: &str = r#"
(defconst LIMIT 64)
(defconfig Settings (threshold u32 100))
(defn over [(n u32)] bool (return (> n (. Settings threshold))))
(defprogram filter :kind xdp :attach "eth0"
  (defmap drops :type array :key u32 :value u64 :max-entries 1)
  (defn main []
    (when (over (bump))
      (map-update drops 0 LIMIT)
      (return XDP_DROP))
    (return XDP_PASS))
  (defn bump [] u32 (return (packet-len))))
"#;

    #[test]
    fn test_resources_hoisted_in_declaration_order() {
        let unit = lower(SOURCE);
        let names: Vec<_> = unit.resources.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Settings", "drops"]);
        assert_eq!(unit.resources[1].declared_in.as_deref(), Some("filter"));
    }

    #[test]
    fn test_symbols_and_calls_are_mangled() {
        let unit = lower(SOURCE);
        let program = &unit.programs[0];
        assert_eq!(program.entry.symbol, "hs_run_filter");
        assert_eq!(program.helpers[0].symbol, "filter__bump");
        let calls = program.entry.direct_calls();
        assert!(calls.contains("over"));
        assert!(calls.contains("filter__bump"));
    }

    #[test]
    fn test_constants_and_config_reads() {
        let unit = lower(SOURCE);
        let IrStmt::If { then_body, .. } = &unit.programs[0].entry.body[0] else {
            panic!("expected if");
        };
        match &then_body[0] {
            IrStmt::MapUpdate { map, value, .. } => {
                assert_eq!(map.name(), "drops");
                assert_eq!(value, &IrExpr::Int(64));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(then_body[1], IrStmt::Return(Some(IrExpr::Symbolic("XDP_DROP".into()))));

        let refs = unit.functions[0].direct_resources();
        assert!(refs.contains(&ResourceRef::new("Settings")));
    }
}
