//! # Multi-Program Analyzer
//!
//! Classifies programs, builds the program ↔ resource reference graph
//! (following calls into global functions transitively) and detects
//! programs competing for an exclusive attach point.

use crate::compiler::types::{visit_statement_calls, CheckedUnit};
use crate::error::AttachConflict;
use crate::parser::{Declaration, Expression, FunctionDecl, HookKind, Statement, TcDirection};
use crate::{Error, Result};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::debug;

/// A kernel attachment point
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct AttachPoint {
    /// Hook kind
    pub kind: HookKind,
    /// Interface or kernel symbol
    pub attach: String,
    /// TC direction (always set for tc, ingress by default)
    pub direction: Option<TcDirection>,
}

impl AttachPoint {
    /// Attach point of a program
    pub fn new(kind: HookKind, attach: &str, direction: Option<TcDirection>) -> Self {
        let direction = match kind {
            HookKind::Tc => Some(direction.unwrap_or(TcDirection::Ingress)),
            _ => None,
        };
        Self {
            kind,
            attach: attach.to_string(),
            direction,
        }
    }
}

impl fmt::Display for AttachPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.kind, self.direction) {
            (HookKind::Kprobe, _) => write!(f, "kernel symbol {}", self.attach),
            (_, Some(direction)) => write!(f, "interface {} ({})", self.attach, direction.as_str()),
            _ => write!(f, "interface {}", self.attach),
        }
    }
}

/// Classification of one program
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgramInfo {
    /// Program name
    pub name: String,
    /// Hook kind
    pub kind: HookKind,
    /// Attach point
    pub point: AttachPoint,
    /// Explicit priority
    pub priority: Option<u32>,
}

/// A config or map and the programs referencing it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceInfo {
    /// Declared name
    pub name: String,
    /// Programs referencing it
    pub referenced_by: BTreeSet<String>,
}

impl ResourceInfo {
    /// Referenced by more than one program
    pub fn is_shared(&self) -> bool {
        self.referenced_by.len() > 1
    }
}

/// Programs sharing one exclusive attach point
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttachGroup {
    /// The shared point
    pub point: AttachPoint,
    /// Programs in declaration order
    pub programs: Vec<String>,
    /// Every program carries a distinct explicit priority
    pub chainable: bool,
}

/// Derived cross-program facts
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResult {
    /// Programs in declaration order
    pub programs: Vec<ProgramInfo>,
    /// Resources in first-declaration order
    pub resources: Vec<ResourceInfo>,
    /// Program → referenced resources
    pub references: BTreeMap<String, BTreeSet<String>>,
    /// Exclusive points claimed by more than one program
    pub groups: Vec<AttachGroup>,
    /// Groups that cannot be disambiguated
    pub conflicts: Vec<AttachConflict>,
}

impl AnalysisResult {
    /// Program classification by name
    pub fn program(&self, name: &str) -> Option<&ProgramInfo> {
        self.programs.iter().find(|p| p.name == name)
    }

    /// Resource info by declared name
    pub fn resource(&self, name: &str) -> Option<&ResourceInfo> {
        self.resources.iter().find(|r| r.name == name)
    }

    /// Whether more than one program references the resource
    pub fn is_shared(&self, resource: &str) -> bool {
        self.resource(resource).is_some_and(ResourceInfo::is_shared)
    }

    /// Groups whose programs can be chained, programs ordered by priority
    pub fn chain_groups(&self) -> Vec<(AttachPoint, Vec<String>)> {
        self.groups
            .iter()
            .filter(|g| g.chainable)
            .map(|g| {
                let mut programs = g.programs.clone();
                programs.sort_by_key(|p| self.program(p).and_then(|info| info.priority));
                (g.point.clone(), programs)
            })
            .collect()
    }

    /// Fail with every conflicting group
    pub fn ensure_conflict_free(&self) -> Result<()> {
        if self.conflicts.is_empty() {
            Ok(())
        } else {
            Err(Error::ProgramConflict(self.conflicts.clone()))
        }
    }
}

/// Multi-program analyzer; read-only over the checked unit
pub struct MultiProgramAnalyzer<'a> {
    unit: &'a CheckedUnit,
}

impl<'a> MultiProgramAnalyzer<'a> {
    /// Analyzer over a checked unit
    pub fn new(unit: &'a CheckedUnit) -> Self {
        Self { unit }
    }

    /// Run the analysis
    pub fn analyze(&self) -> AnalysisResult {
        let globals = self.global_reach();

        let mut programs = Vec::new();
        let mut references = BTreeMap::new();
        for p in self.unit.programs() {
            programs.push(ProgramInfo {
                name: p.name.clone(),
                kind: p.kind,
                point: AttachPoint::new(p.kind, &p.attach, p.direction),
                priority: p.priority,
            });

            let local: BTreeSet<&str> = p.functions.iter().map(|f| f.name.as_str()).collect();
            let mut refs = BTreeSet::new();
            for f in &p.functions {
                let (direct, calls) = self.scan_function(f);
                refs.extend(direct);
                for callee in calls {
                    if local.contains(callee.as_str()) {
                        continue;
                    }
                    if let Some(reached) = globals.get(&callee) {
                        refs.extend(reached.iter().cloned());
                    }
                }
            }
            references.insert(p.name.clone(), refs);
        }

        let mut resources: Vec<ResourceInfo> = Vec::new();
        for name in self.resource_order() {
            if resources.iter().any(|r| r.name == name) {
                continue;
            }
            let referenced_by = references
                .iter()
                .filter(|(_, refs)| refs.contains(&name))
                .map(|(program, _)| program.clone())
                .collect();
            resources.push(ResourceInfo {
                name,
                referenced_by,
            });
        }

        let (groups, conflicts) = attach_groups(&programs);

        debug!(
            programs = programs.len(),
            resources = resources.len(),
            shared = resources.iter().filter(|r| r.is_shared()).count(),
            conflicts = conflicts.len(),
            "multi-program analysis"
        );

        AnalysisResult {
            programs,
            resources,
            references,
            groups,
            conflicts,
        }
    }

    /// Declared resource names in declaration order, program bodies inline
    fn resource_order(&self) -> Vec<String> {
        let mut out = Vec::new();
        for decl in &self.unit.program.declarations {
            match decl {
                Declaration::Config(c) => out.push(c.name.clone()),
                Declaration::Map(m) => out.push(m.name.clone()),
                Declaration::Program(p) => out.extend(p.maps.iter().map(|m| m.name.clone())),
                _ => {}
            }
        }
        out
    }

    /// Resources named directly in a body, plus the names it calls
    fn scan_function(&self, f: &FunctionDecl) -> (BTreeSet<String>, BTreeSet<String>) {
        let mut resources = BTreeSet::new();
        for stmt in &f.body {
            visit_statement_names(stmt, &mut |name| {
                if self.unit.symbols.is_resource(name) {
                    resources.insert(name.to_string());
                }
            });
        }
        let mut calls = BTreeSet::new();
        for stmt in &f.body {
            visit_statement_calls(stmt, &mut |callee| {
                calls.insert(callee.to_string());
            });
        }
        (resources, calls)
    }

    /// Resources reachable from each global function through its callees
    fn global_reach(&self) -> BTreeMap<String, BTreeSet<String>> {
        let mut direct = BTreeMap::new();
        for f in self.unit.global_functions() {
            direct.insert(f.name.clone(), self.scan_function(f));
        }

        let mut reach = BTreeMap::new();
        for name in direct.keys() {
            let mut seen = BTreeSet::new();
            let mut stack = vec![name.clone()];
            let mut refs = BTreeSet::new();
            while let Some(current) = stack.pop() {
                if !seen.insert(current.clone()) {
                    continue;
                }
                if let Some((resources, calls)) = direct.get(&current) {
                    refs.extend(resources.iter().cloned());
                    stack.extend(calls.iter().filter(|c| direct.contains_key(*c)).cloned());
                }
            }
            reach.insert(name.clone(), refs);
        }
        reach
    }
}

fn attach_groups(programs: &[ProgramInfo]) -> (Vec<AttachGroup>, Vec<AttachConflict>) {
    let mut by_point: BTreeMap<&AttachPoint, Vec<&ProgramInfo>> = BTreeMap::new();
    let mut order: Vec<&AttachPoint> = Vec::new();
    for p in programs.iter().filter(|p| p.kind.is_exclusive()) {
        if !by_point.contains_key(&p.point) {
            order.push(&p.point);
        }
        by_point.entry(&p.point).or_default().push(p);
    }

    let mut groups = Vec::new();
    let mut conflicts = Vec::new();
    for point in order {
        let members = &by_point[point];
        if members.len() < 2 {
            continue;
        }
        let priorities: Vec<Option<u32>> = members.iter().map(|p| p.priority).collect();
        let distinct: BTreeSet<u32> = priorities.iter().flatten().copied().collect();
        let chainable = priorities.iter().all(Option::is_some) && distinct.len() == members.len();
        let names: Vec<String> = members.iter().map(|p| p.name.clone()).collect();
        if !chainable {
            conflicts.push(AttachConflict {
                kind: point.kind.to_string(),
                attach: point.to_string(),
                programs: names.clone(),
            });
        }
        groups.push(AttachGroup {
            point: point.clone(),
            programs: names,
            chainable,
        });
    }
    (groups, conflicts)
}

/// Visit every bare name in a statement tree
fn visit_statement_names(stmt: &Statement, f: &mut dyn FnMut(&str)) {
    match stmt {
        Statement::Let { value, .. } | Statement::Assign { value, .. } => visit_expression_names(value, f),
        Statement::If {
            condition,
            then_branch,
            else_branch,
            ..
        } => {
            visit_expression_names(condition, f);
            then_branch.iter().for_each(|s| visit_statement_names(s, f));
            if let Some(else_branch) = else_branch {
                else_branch.iter().for_each(|s| visit_statement_names(s, f));
            }
        }
        Statement::For { body, .. } => body.iter().for_each(|s| visit_statement_names(s, f)),
        Statement::Return { value, .. } => {
            if let Some(value) = value {
                visit_expression_names(value, f);
            }
        }
        Statement::Expression(e) => visit_expression_names(e, f),
    }
}

fn visit_expression_names(expr: &Expression, f: &mut dyn FnMut(&str)) {
    match expr {
        Expression::Variable(name, _) => f(name),
        Expression::Binary { left, right, .. } => {
            visit_expression_names(left, f);
            visit_expression_names(right, f);
        }
        Expression::Unary { operand, .. } => visit_expression_names(operand, f),
        Expression::Field { base, .. } => visit_expression_names(base, f),
        Expression::Call { args, .. } => args.iter().for_each(|a| visit_expression_names(a, f)),
        Expression::Make { fields, .. } => fields.iter().for_each(|(_, e)| visit_expression_names(e, f)),
        Expression::IntLiteral(..) | Expression::BoolLiteral(..) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::types::TypeChecker;
    use crate::{SExprParser, SExprScanner};

    fn analyze(source: &str) -> AnalysisResult {
        let tokens = SExprScanner::new(source).scan_tokens().unwrap();
        let program = SExprParser::new(tokens).parse().unwrap();
        let unit = TypeChecker::new().check(program).unwrap();
        MultiProgramAnalyzer::new(&unit).analyze()
    }

    #[test]
    fn test_references_follow_global_calls() {
        let result = analyze(
            r#"
(defconfig Settings (threshold u32 100))
(defmap seen :type hash :key u32 :value u64 :max-entries 64)
(defn limit [] u32 (return (. Settings threshold)))
(defn over [(n u32)] bool (return (> n (limit))))
(defprogram a :kind xdp :attach "eth0"
  (defn main [] (if (over (packet-len)) (return XDP_DROP)) (return XDP_PASS)))
(defprogram b :kind kprobe :attach "tcp_sendmsg"
  (defn main [] (map-update seen (pid) 1) (return 0)))
"#,
        );
        assert!(result.references["a"].contains("Settings"));
        assert!(!result.references["a"].contains("seen"));
        assert!(result.references["b"].contains("seen"));
        assert!(!result.is_shared("Settings"));
    }

    #[test]
    fn test_unrelated_programs_have_no_conflicts() {
        let result = analyze(
            r#"
(defprogram a :kind xdp :attach "eth0" (defn main [] (return XDP_PASS)))
(defprogram b :kind xdp :attach "eth1" (defn main [] (return XDP_PASS)))
(defprogram c :kind tc :attach "eth0" (defn main [] (return TC_ACT_OK)))
(defprogram d :kind tc :attach "eth0" :direction egress (defn main [] (return TC_ACT_OK)))
(defprogram e :kind kprobe :attach "tcp_sendmsg" (defn main [] (return 0)))
(defprogram f :kind kprobe :attach "tcp_sendmsg" (defn main [] (return 0)))
"#,
        );
        assert!(result.conflicts.is_empty());
        assert!(result.groups.is_empty());
        assert!(result.ensure_conflict_free().is_ok());
    }

    #[test]
    fn test_same_point_conflict_names_all_programs() {
        let result = analyze(
            r#"
(defprogram first :kind xdp :attach "eth0" (defn main [] (return XDP_PASS)))
(defprogram second :kind xdp :attach "eth0" (defn main [] (return XDP_PASS)))
(defprogram third :kind xdp :attach "eth0" :priority 1 (defn main [] (return XDP_PASS)))
"#,
        );
        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(result.conflicts[0].programs, vec!["first", "second", "third"]);
        let msg = result.ensure_conflict_free().unwrap_err().to_string();
        assert!(msg.contains("first") && msg.contains("second") && msg.contains("third"));
    }

    #[test]
    fn test_distinct_priorities_are_chainable() {
        let result = analyze(
            r#"
(defprogram late :kind tc :attach "eth0" :priority 20 (defn main [] (return TC_ACT_OK)))
(defprogram early :kind tc :attach "eth0" :priority 10 (defn main [] (return TC_ACT_OK)))
"#,
        );
        assert!(result.conflicts.is_empty());
        let chains = result.chain_groups();
        assert_eq!(chains.len(), 1);
        assert_eq!(chains[0].1, vec!["early", "late"]);
        assert_eq!(chains[0].0.direction, Some(TcDirection::Ingress));
    }
}
