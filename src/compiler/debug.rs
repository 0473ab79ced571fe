//! Debug dumps for `--verbose` runs
//!
//! Intermediate artifacts are logged as JSON so a run can be inspected
//! without a debugger.

use super::analysis::AnalysisResult;
use super::ir::OptimizedIr;
use super::resource_plan::ResourcePlan;
use super::strategy::Strategy;
use crate::{Error, Result};
use serde::Serialize;
use tracing::debug;

/// Pretty JSON for any serializable artifact
pub fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value)
        .map_err(|e| Error::compiler(format!("failed to serialize debug dump: {}", e)))
}

/// One line per plan entry: `name -> canonical (ownership; permitted)`
pub fn format_plan(plan: &ResourcePlan) -> String {
    plan.entries()
        .iter()
        .map(|e| {
            let permitted: Vec<&str> = e.permitted.iter().map(String::as_str).collect();
            format!(
                "{} {} -> {} ({}; permitted: [{}])",
                e.kind,
                e.resource,
                e.canonical,
                e.ownership,
                permitted.join(", ")
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Log the analysis, the plan, the strategies and the optimized IR at debug level
pub fn dump_pipeline(
    analysis: &AnalysisResult,
    plan: &ResourcePlan,
    strategies: &[Strategy],
    ir: &OptimizedIr,
) -> Result<()> {
    debug!(analysis = %to_json(analysis)?, "multi-program analysis");
    debug!("resource plan:\n{}", format_plan(plan));
    debug!(plan = %to_json(plan)?, "resource plan");
    debug!(strategies = %to_json(&strategies)?, "strategies");
    debug!(ir = %to_json(ir)?, "optimized IR");
    Ok(())
}
