//! # IR Optimizer for Hookscript Compilation
//!
//! Turns the lowered unit into the optimized IR both generators consume:
//! - Constant folding and dead statement removal (level 1+)
//! - Strategy application (chained dispatch, resource elimination)
//! - Canonical resource naming from the resource plan
//! - Unreachable global function removal
//! - Permitted-reference validation

use super::analysis::AnalysisResult;
use super::ir::{
    IrExpr, IrFunction, IrStmt, LoweredUnit, OptimizedIr, PlannedResource, ResourceRef,
};
use super::resource_plan::{merge_declarations, ResourcePlan};
use super::strategy::{chain_dispatchers, Strategy};
use crate::parser::{BinaryOp, UnaryOp};
use crate::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Optimizer with configurable optimization level
pub struct Optimizer {
    level: u8,
}

impl Optimizer {
    /// Create a new optimizer with the specified optimization level (0-1)
    pub fn new(level: u8) -> Self {
        Self { level }
    }

    /// Run all passes and produce the optimized IR
    pub fn optimize(
        &mut self,
        lowered: LoweredUnit,
        analysis: &AnalysisResult,
        plan: &ResourcePlan,
        strategies: &[Strategy],
    ) -> Result<OptimizedIr> {
        let LoweredUnit {
            mut programs,
            mut functions,
            resources,
        } = lowered;

        if self.level >= 1 {
            for f in programs
                .iter_mut()
                .flat_map(|p| p.functions_mut())
                .chain(functions.iter_mut())
            {
                fold_function(f);
            }
        }

        // Strategy application
        let chains = chain_dispatchers(strategies, &programs);
        let mut eliminated = BTreeSet::new();
        let mut applied = Vec::new();
        for strategy in strategies {
            match strategy {
                Strategy::ChainDispatch { .. } => {
                    if chains.iter().any(|(s, _)| s == strategy) {
                        applied.push(strategy.clone());
                    }
                }
                Strategy::EliminateResource { resource } => match plan.entry(resource) {
                    Some(entry) if entry.permitted.is_empty() => {
                        eliminated.insert(resource.clone());
                        applied.push(strategy.clone());
                    }
                    Some(_) => debug!(%resource, "resource is referenced, elimination ignored"),
                    None => debug!(%resource, "no such resource, elimination ignored"),
                },
                Strategy::Unknown => debug!("unknown directive ignored"),
            }
        }
        let dispatchers = chains.into_iter().map(|(_, d)| d).collect();

        // Unreachable global functions
        let reachable = reachable_globals(&programs, &functions);
        let before = functions.len();
        functions.retain(|f| reachable.contains(&f.symbol));
        if functions.len() != before {
            debug!(removed = before - functions.len(), "removed unreachable global functions");
        }

        // Canonical names
        let rename = |name: &str| plan.canonical(name).map(str::to_string);
        for f in programs
            .iter_mut()
            .flat_map(|p| p.functions_mut())
            .chain(functions.iter_mut())
        {
            for stmt in f.body.iter_mut() {
                stmt.rename_resources(&rename);
            }
        }

        // Resource section
        let mut section = Vec::new();
        for decl in merge_declarations(&resources)? {
            if eliminated.contains(&decl.name) {
                debug!(resource = %decl.name, "eliminated unreferenced resource");
                continue;
            }
            let entry = plan.entry(&decl.name).ok_or_else(|| {
                Error::compiler(format!("Resource '{}' is missing from the plan", decl.name))
            })?;
            section.push(PlannedResource {
                declared: decl.name.clone(),
                canonical: entry.canonical.clone(),
                ownership: entry.ownership.clone(),
                permitted: entry.permitted.clone(),
                kind: decl.kind.clone(),
            });
        }

        let ir = OptimizedIr {
            programs,
            functions,
            resources: section,
            dispatchers,
            plan: plan.clone(),
            applied,
        };
        validate_references(&ir)?;

        debug!(
            programs = ir.programs.len(),
            resources = ir.resources.len(),
            dispatchers = ir.dispatchers.len(),
            analyzed = analysis.programs.len(),
            "optimized IR"
        );
        Ok(ir)
    }
}

impl Default for Optimizer {
    fn default() -> Self {
        Self::new(1)
    }
}

/// Global function symbols reached from any program
fn reachable_globals(
    programs: &[super::ir::IrProgram],
    functions: &[IrFunction],
) -> BTreeSet<String> {
    let by_symbol: BTreeMap<&str, &IrFunction> =
        functions.iter().map(|f| (f.symbol.as_str(), f)).collect();
    let mut stack: Vec<String> = programs
        .iter()
        .flat_map(|p| p.functions())
        .flat_map(|f| f.direct_calls())
        .collect();
    let mut reached = BTreeSet::new();
    while let Some(symbol) = stack.pop() {
        let Some(f) = by_symbol.get(symbol.as_str()) else {
            continue;
        };
        if reached.insert(symbol) {
            stack.extend(f.direct_calls());
        }
    }
    reached
}

/// Every program may only touch resources whose permitted set names it
fn validate_references(ir: &OptimizedIr) -> Result<()> {
    let globals: BTreeMap<&str, &IrFunction> =
        ir.functions.iter().map(|f| (f.symbol.as_str(), f)).collect();

    for program in &ir.programs {
        let mut refs: BTreeSet<ResourceRef> = BTreeSet::new();
        let mut seen = BTreeSet::new();
        let mut stack: Vec<&IrFunction> = program.functions().collect();
        while let Some(f) = stack.pop() {
            if !seen.insert(f.symbol.as_str()) {
                continue;
            }
            refs.extend(f.direct_resources());
            for callee in f.direct_calls() {
                if let Some(g) = globals.get(callee.as_str()) {
                    stack.push(g);
                }
            }
        }

        for r in refs {
            let present = ir.resource(r.name()).is_some();
            let permitted = ir
                .plan
                .by_canonical(r.name())
                .is_some_and(|e| e.permitted.contains(&program.name));
            if !present || !permitted {
                return Err(Error::ForbiddenReference {
                    program: program.name.clone(),
                    resource: r.name().to_string(),
                });
            }
        }
    }
    Ok(())
}

fn fold_function(f: &mut IrFunction) {
    let body = std::mem::take(&mut f.body);
    f.body = fold_block(body);
}

/// Fold expressions, flatten constant branches, drop statements after `return`
fn fold_block(stmts: Vec<IrStmt>) -> Vec<IrStmt> {
    let mut out = Vec::with_capacity(stmts.len());
    for stmt in stmts {
        let folded = match stmt {
            IrStmt::Declare { name, ty, init } => vec![IrStmt::Declare {
                name,
                ty,
                init: fold_expr(init),
            }],
            IrStmt::Assign { name, value } => vec![IrStmt::Assign {
                name,
                value: fold_expr(value),
            }],
            IrStmt::If {
                cond,
                then_body,
                else_body,
            } => match fold_expr(cond) {
                IrExpr::Bool(true) => fold_block(then_body),
                IrExpr::Bool(false) => fold_block(else_body),
                cond => vec![IrStmt::If {
                    cond,
                    then_body: fold_block(then_body),
                    else_body: fold_block(else_body),
                }],
            },
            IrStmt::Loop {
                var,
                start,
                end,
                body,
            } => vec![IrStmt::Loop {
                var,
                start,
                end,
                body: fold_block(body),
            }],
            IrStmt::Return(value) => vec![IrStmt::Return(value.map(fold_expr))],
            IrStmt::MapUpdate {
                map,
                key,
                value,
                key_ty,
                value_ty,
            } => vec![IrStmt::MapUpdate {
                map,
                key: fold_expr(key),
                value: fold_expr(value),
                key_ty,
                value_ty,
            }],
            IrStmt::MapDelete { map, key, key_ty } => vec![IrStmt::MapDelete {
                map,
                key: fold_expr(key),
                key_ty,
            }],
            IrStmt::Emit {
                map,
                value,
                value_ty,
            } => vec![IrStmt::Emit {
                map,
                value: fold_expr(value),
                value_ty,
            }],
            IrStmt::Eval(e) => vec![IrStmt::Eval(fold_expr(e))],
        };

        for stmt in folded {
            let ends = matches!(stmt, IrStmt::Return(_));
            out.push(stmt);
            if ends {
                return out;
            }
        }
    }
    out
}

fn fold_expr(expr: IrExpr) -> IrExpr {
    match expr {
        IrExpr::Binary { op, lhs, rhs } => {
            let lhs = fold_expr(*lhs);
            let rhs = fold_expr(*rhs);
            match fold_binary(op, &lhs, &rhs) {
                Some(folded) => folded,
                None => IrExpr::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
            }
        }
        IrExpr::Unary { op, operand } => match (op, fold_expr(*operand)) {
            (UnaryOp::Neg, IrExpr::Int(n)) => IrExpr::Int(n.wrapping_neg()),
            (UnaryOp::BitNot, IrExpr::Int(n)) => IrExpr::Int(!n),
            (UnaryOp::Not, IrExpr::Bool(b)) => IrExpr::Bool(!b),
            (op, operand) => IrExpr::Unary {
                op,
                operand: Box::new(operand),
            },
        },
        IrExpr::Field { base, field } => IrExpr::Field {
            base: Box::new(fold_expr(*base)),
            field,
        },
        IrExpr::MapLookup {
            map,
            key,
            key_ty,
            value_ty,
        } => IrExpr::MapLookup {
            map,
            key: Box::new(fold_expr(*key)),
            key_ty,
            value_ty,
        },
        IrExpr::Call {
            function,
            args,
            passes_context,
        } => IrExpr::Call {
            function,
            args: args.into_iter().map(fold_expr).collect(),
            passes_context,
        },
        IrExpr::StructLit { type_name, fields } => IrExpr::StructLit {
            type_name,
            fields: fields.into_iter().map(|(n, e)| (n, fold_expr(e))).collect(),
        },
        other => other,
    }
}

fn fold_binary(op: BinaryOp, lhs: &IrExpr, rhs: &IrExpr) -> Option<IrExpr> {
    match (lhs, rhs) {
        (IrExpr::Int(a), IrExpr::Int(b)) => {
            let (a, b) = (*a, *b);
            Some(match op {
                BinaryOp::Add => IrExpr::Int(a.wrapping_add(b)),
                BinaryOp::Sub => IrExpr::Int(a.wrapping_sub(b)),
                BinaryOp::Mul => IrExpr::Int(a.wrapping_mul(b)),
                BinaryOp::Div if b != 0 => IrExpr::Int(a.wrapping_div(b)),
                BinaryOp::Mod if b != 0 => IrExpr::Int(a.wrapping_rem(b)),
                BinaryOp::BitAnd => IrExpr::Int(a & b),
                BinaryOp::BitOr => IrExpr::Int(a | b),
                BinaryOp::BitXor => IrExpr::Int(a ^ b),
                BinaryOp::Shl if (0..63).contains(&b) && a >= 0 => IrExpr::Int(a.wrapping_shl(b as u32)),
                BinaryOp::Shr if (0..63).contains(&b) && a >= 0 => IrExpr::Int(a >> b),
                BinaryOp::Eq => IrExpr::Bool(a == b),
                BinaryOp::NotEq => IrExpr::Bool(a != b),
                BinaryOp::Lt => IrExpr::Bool(a < b),
                BinaryOp::Gt => IrExpr::Bool(a > b),
                BinaryOp::LtEq => IrExpr::Bool(a <= b),
                BinaryOp::GtEq => IrExpr::Bool(a >= b),
                _ => return None,
            })
        }
        (IrExpr::Bool(a), IrExpr::Bool(b)) => Some(match op {
            BinaryOp::And => IrExpr::Bool(*a && *b),
            BinaryOp::Or => IrExpr::Bool(*a || *b),
            BinaryOp::Eq => IrExpr::Bool(a == b),
            BinaryOp::NotEq => IrExpr::Bool(a != b),
            _ => return None,
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::analysis::MultiProgramAnalyzer;
    use crate::compiler::ir::IrGenerator;
    use crate::compiler::resource_plan::ResourcePlanner;
    use crate::compiler::strategy::StrategyGenerator;
    use crate::compiler::types::TypeChecker;
    use crate::{SExprParser, SExprScanner};

    struct Pipeline {
        lowered: LoweredUnit,
        analysis: AnalysisResult,
        plan: ResourcePlan,
        strategies: Vec<Strategy>,
    }

    fn pipeline(source: &str) -> Pipeline {
        let tokens = SExprScanner::new(source).scan_tokens().unwrap();
        let program = SExprParser::new(tokens).parse().unwrap();
        let unit = TypeChecker::new().check(program).unwrap();
        let analysis = MultiProgramAnalyzer::new(&unit).analyze();
        let lowered = IrGenerator::new(&unit).lower().unwrap();
        let plan = ResourcePlanner::new().plan(&lowered, &analysis).unwrap();
        let strategies = StrategyGenerator::new().generate(&analysis);
        Pipeline {
            lowered,
            analysis,
            plan,
            strategies,
        }
    }

    const SOURCE: &str = r#"
(defconfig Settings (threshold u32 100))
(defconfig Unused (x u8 1))
(defmap events :type ringbuf :value u32 :max-entries 4096)
(defn unused_helper [] u32 (return 1))
(defprogram a :kind xdp :attach "eth0"
  (defmap hits :type array :key u32 :value u64 :max-entries 4)
  (defn main []
    (map-update hits 0 (+ 1 2 3))
    (if (> (packet-len) (. Settings threshold)) (return XDP_DROP))
    (return XDP_PASS)
    (return XDP_DROP)))
"#;

    #[test]
    fn test_optimizer_creation() {
        let _opt = Optimizer::new(0);
        let _opt = Optimizer::default();
    }

    #[test]
    fn test_dead_resources_and_functions_removed() {
        let p = pipeline(SOURCE);
        let ir = Optimizer::default()
            .optimize(p.lowered, &p.analysis, &p.plan, &p.strategies)
            .unwrap();

        let names: Vec<_> = ir.resources.iter().map(|r| r.canonical.as_str()).collect();
        assert_eq!(names, vec!["a__Settings", "a__hits"]);
        assert!(ir.functions.is_empty());
        assert_eq!(ir.applied.len(), 2);
    }

    #[test]
    fn test_constant_folding_and_dead_statements() {
        let p = pipeline(SOURCE);
        let ir = Optimizer::new(1)
            .optimize(p.lowered, &p.analysis, &p.plan, &p.strategies)
            .unwrap();
        let body = &ir.programs[0].entry.body;
        assert_eq!(body.len(), 3);
        match &body[0] {
            IrStmt::MapUpdate { map, value, .. } => {
                assert_eq!(map.name(), "a__hits");
                assert_eq!(value, &IrExpr::Int(6));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_level_zero_keeps_expressions() {
        let p = pipeline(SOURCE);
        let ir = Optimizer::new(0)
            .optimize(p.lowered, &p.analysis, &p.plan, &p.strategies)
            .unwrap();
        assert_eq!(ir.programs[0].entry.body.len(), 4);
    }

    #[test]
    fn test_unknown_and_inapplicable_directives_are_noops() {
        let p = pipeline(SOURCE);
        let strategies = vec![
            Strategy::Unknown,
            Strategy::EliminateResource {
                resource: "Settings".to_string(),
            },
            Strategy::EliminateResource {
                resource: "missing".to_string(),
            },
            Strategy::ChainDispatch {
                kind: crate::parser::HookKind::Xdp,
                attach: "eth0".to_string(),
                direction: None,
                programs: vec!["a".to_string(), "ghost".to_string()],
            },
        ];
        let ir = Optimizer::default()
            .optimize(p.lowered, &p.analysis, &p.plan, &strategies)
            .unwrap();
        assert!(ir.applied.is_empty());
        assert!(ir.dispatchers.is_empty());
        assert_eq!(ir.resources.len(), 4);
    }

    #[test]
    fn test_reference_outside_permitted_set_is_rejected() {
        let mut p = pipeline(SOURCE);
        p.analysis.references.clear();
        for r in p.analysis.resources.iter_mut() {
            r.referenced_by.clear();
        }
        let plan = ResourcePlanner::new().plan(&p.lowered, &p.analysis).unwrap();
        let err = Optimizer::default()
            .optimize(p.lowered, &p.analysis, &plan, &[])
            .unwrap_err();
        assert!(matches!(err, Error::ForbiddenReference { ref program, .. } if program == "a"));
    }
}
