//! # Resource Planner
//!
//! Assigns every config and map an owner and a canonical name. Names depend
//! only on declaration order and the reference graph, never on traversal
//! order, so the plan is byte-identical across runs.

use crate::compiler::analysis::AnalysisResult;
use crate::compiler::ir::{LoweredUnit, ResourceDecl};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use tracing::debug;

/// Who owns a resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "program", rename_all = "lowercase")]
pub enum Ownership {
    /// Referenced by two or more programs
    Shared,
    /// Referenced by exactly one program
    Program(String),
    /// Referenced by no program
    Unreferenced,
}

impl fmt::Display for Ownership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ownership::Shared => f.write_str("shared"),
            Ownership::Program(p) => write!(f, "local to {}", p),
            Ownership::Unreferenced => f.write_str("unreferenced"),
        }
    }
}

/// Plan for one resource
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanEntry {
    /// Declared name
    pub resource: String,
    /// `config` or `map`
    pub kind: String,
    /// Owner
    pub ownership: Ownership,
    /// Name used by both generated files
    pub canonical: String,
    /// Programs allowed to reference it
    pub permitted: BTreeSet<String>,
}

/// Resource identifier → owner, canonical name, permitted programs
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResourcePlan {
    entries: Vec<PlanEntry>,
}

impl ResourcePlan {
    /// Entries in declaration order
    pub fn entries(&self) -> &[PlanEntry] {
        &self.entries
    }

    /// Entry for a declared name
    pub fn entry(&self, resource: &str) -> Option<&PlanEntry> {
        self.entries.iter().find(|e| e.resource == resource)
    }

    /// Canonical name for a declared name
    pub fn canonical(&self, resource: &str) -> Option<&str> {
        self.entry(resource).map(|e| e.canonical.as_str())
    }

    /// Entry for a canonical name
    pub fn by_canonical(&self, canonical: &str) -> Option<&PlanEntry> {
        self.entries.iter().find(|e| e.canonical == canonical)
    }
}

/// Builds the resource plan
#[derive(Debug, Default)]
pub struct ResourcePlanner;

impl ResourcePlanner {
    /// Creates a planner
    pub fn new() -> Self {
        Self
    }

    /// Plan every resource of the lowered unit
    pub fn plan(&self, lowered: &LoweredUnit, analysis: &AnalysisResult) -> Result<ResourcePlan> {
        let firsts = merge_declarations(&lowered.resources)?;
        let programs: BTreeSet<&str> = lowered.programs.iter().map(|p| p.name.as_str()).collect();

        let mut entries = Vec::with_capacity(firsts.len());
        let mut taken: HashMap<String, String> = HashMap::new();
        for decl in firsts {
            let permitted: BTreeSet<String> = analysis
                .resource(&decl.name)
                .map(|info| {
                    info.referenced_by
                        .iter()
                        .filter(|p| programs.contains(p.as_str()))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();

            let mut consumers = permitted.iter();
            let (ownership, canonical) = match (consumers.next(), consumers.next()) {
                (Some(_), Some(_)) => (Ownership::Shared, decl.name.clone()),
                (Some(only), None) => (
                    Ownership::Program(only.clone()),
                    format!("{}__{}", only, decl.name),
                ),
                _ => (Ownership::Unreferenced, decl.name.clone()),
            };

            if let Some(first) = taken.insert(canonical.clone(), decl.name.clone()) {
                return Err(Error::NameCollision {
                    canonical,
                    first,
                    second: decl.name.clone(),
                });
            }

            debug!(resource = %decl.name, canonical = %canonical, ownership = %ownership, "planned resource");
            entries.push(PlanEntry {
                resource: decl.name.clone(),
                kind: decl.kind.tag().to_string(),
                ownership,
                canonical,
                permitted,
            });
        }

        Ok(ResourcePlan { entries })
    }
}

/// First declaration wins; compatible redeclarations merge into it
pub fn merge_declarations(resources: &[ResourceDecl]) -> Result<Vec<&ResourceDecl>> {
    let mut firsts: Vec<&ResourceDecl> = Vec::new();
    for decl in resources {
        match firsts.iter().find(|f| f.name == decl.name) {
            Some(first) => {
                if !first.kind.compatible_with(&decl.kind) {
                    return Err(Error::SchemaMismatch {
                        name: decl.name.clone(),
                        first: first.kind.describe(),
                        second: decl.kind.describe(),
                    });
                }
                debug!(resource = %decl.name, "merged compatible redeclaration");
            }
            None => firsts.push(decl),
        }
    }
    Ok(firsts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::analysis::MultiProgramAnalyzer;
    use crate::compiler::ir::IrGenerator;
    use crate::compiler::types::TypeChecker;
    use crate::{SExprParser, SExprScanner};

    fn plan(source: &str) -> Result<ResourcePlan> {
        let tokens = SExprScanner::new(source).scan_tokens()?;
        let program = SExprParser::new(tokens).parse()?;
        let unit = TypeChecker::new().check(program)?;
        let analysis = MultiProgramAnalyzer::new(&unit).analyze();
        let lowered = IrGenerator::new(&unit).lower()?;
        ResourcePlanner::new().plan(&lowered, &analysis)
    }

    const SOURCE: &str = r#"
(defconfig Settings (threshold u32 100))
(defconfig Unused (x u8))
(defprogram a :kind xdp :attach "eth0"
  (defmap hits :type array :key u32 :value u64 :max-entries 4)
  (defn main []
    (map-update hits 0 (. Settings threshold))
    (return XDP_PASS)))
(defprogram b :kind tc :attach "eth0"
  (defn main []
    (if (> (packet-len) (. Settings threshold)) (return TC_ACT_SHOT))
    (return TC_ACT_OK)))
"#;

    #[test]
    fn test_shared_local_and_unreferenced_names() {
        let plan = plan(SOURCE).unwrap();

        let settings = plan.entry("Settings").unwrap();
        assert_eq!(settings.ownership, Ownership::Shared);
        assert_eq!(settings.canonical, "Settings");
        assert_eq!(settings.permitted.len(), 2);

        let hits = plan.entry("hits").unwrap();
        assert_eq!(hits.ownership, Ownership::Program("a".to_string()));
        assert_eq!(hits.canonical, "a__hits");

        let unused = plan.entry("Unused").unwrap();
        assert_eq!(unused.ownership, Ownership::Unreferenced);
        assert_eq!(unused.canonical, "Unused");
        assert!(unused.permitted.is_empty());
    }

    #[test]
    fn test_plan_is_deterministic() {
        let first = serde_json::to_string(&plan(SOURCE).unwrap()).unwrap();
        for _ in 0..5 {
            assert_eq!(serde_json::to_string(&plan(SOURCE).unwrap()).unwrap(), first);
        }
    }

    #[test]
    fn test_incompatible_redeclaration_is_schema_mismatch() {
        let err = plan(
            r#"
(defprogram a :kind xdp :attach "eth0"
  (defmap hits :type array :key u32 :value u64 :max-entries 4)
  (defn main [] (map-update hits 0 1) (return XDP_PASS)))
(defprogram b :kind xdp :attach "eth1"
  (defmap hits :type array :key u32 :value u32 :max-entries 4)
  (defn main [] (map-update hits 0 1) (return XDP_PASS)))
"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch { ref name, .. } if name == "hits"));
    }

    #[test]
    fn test_compatible_redeclaration_is_merged_and_shared() {
        let plan = plan(
            r#"
(defprogram a :kind xdp :attach "eth0"
  (defmap hits :type array :key u32 :value u64 :max-entries 4)
  (defn main [] (map-update hits 0 1) (return XDP_PASS)))
(defprogram b :kind xdp :attach "eth1"
  (defmap hits :type array :key u32 :value u64 :max-entries 4)
  (defn main [] (map-update hits 1 1) (return XDP_PASS)))
"#,
        )
        .unwrap();
        assert_eq!(plan.entries().len(), 1);
        assert_eq!(plan.entry("hits").unwrap().ownership, Ownership::Shared);
    }

    #[test]
    fn test_canonical_collision_is_fatal() {
        let err = plan(
            r#"
(defmap a__hits :type hash :key u32 :value u32 :max-entries 8)
(defprogram a :kind xdp :attach "eth0"
  (defmap hits :type array :key u32 :value u64 :max-entries 4)
  (defn main [] (map-update hits 0 1) (return XDP_PASS)))
"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::NameCollision { ref canonical, .. } if canonical == "a__hits"));
    }
}
