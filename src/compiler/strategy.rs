//! # Optimization Strategy Generator
//!
//! Emits ordered, advisory cross-program directives. Directives serialize
//! with a `directive` tag; tags this version does not know deserialize as
//! [`Strategy::Unknown`], which every consumer ignores.

use crate::compiler::analysis::{AnalysisResult, AttachPoint};
use crate::compiler::ir::{Dispatcher, IrProgram};
use crate::parser::{HookKind, TcDirection};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

/// One advisory directive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "directive", rename_all = "snake_case")]
pub enum Strategy {
    /// Run several programs of one exclusive attach point through one dispatcher
    ChainDispatch {
        /// Hook kind
        kind: HookKind,
        /// Interface
        attach: String,
        /// TC direction
        #[serde(default)]
        direction: Option<TcDirection>,
        /// Programs in dispatch order
        programs: Vec<String>,
    },
    /// Drop a config or map no program references
    EliminateResource {
        /// Declared resource name
        resource: String,
    },
    /// Directive from a newer strategy set
    #[serde(other)]
    Unknown,
}

/// Derives directives from the analysis result
#[derive(Debug, Default)]
pub struct StrategyGenerator;

impl StrategyGenerator {
    /// Creates a generator
    pub fn new() -> Self {
        Self
    }

    /// Chains first (by attach point), then eliminations (by declaration order)
    pub fn generate(&self, analysis: &AnalysisResult) -> Vec<Strategy> {
        let mut chains = analysis.chain_groups();
        chains.sort_by(|a, b| a.0.cmp(&b.0));

        let mut out: Vec<Strategy> = chains
            .into_iter()
            .map(|(point, programs)| Strategy::ChainDispatch {
                kind: point.kind,
                attach: point.attach,
                direction: point.direction,
                programs,
            })
            .collect();

        out.extend(
            analysis
                .resources
                .iter()
                .filter(|r| r.referenced_by.is_empty())
                .map(|r| Strategy::EliminateResource {
                    resource: r.name.clone(),
                }),
        );

        debug!(directives = out.len(), "generated strategies");
        out
    }
}

/// Parse a serialized strategy list
pub fn parse_strategies(json: &str) -> Result<Vec<Strategy>> {
    serde_json::from_str(json).map_err(|e| Error::compiler(format!("Invalid strategy list: {}", e)))
}

/// Symbol of the dispatcher for an attach point
///
/// ASCII alphanumerics pass through, every other byte (`_` included) becomes
/// `_xx` in lowercase hex, so distinct attach names never share a symbol.
pub fn dispatcher_symbol(point: &AttachPoint) -> String {
    let mut attach = String::with_capacity(point.attach.len());
    for byte in point.attach.bytes() {
        if byte.is_ascii_alphanumeric() {
            attach.push(char::from(byte));
        } else {
            attach.push_str(&format!("_{:02x}", byte));
        }
    }
    match point.direction {
        Some(direction) => format!("hs_dispatch_{}_{}_{}", point.kind, attach, direction.as_str()),
        None => format!("hs_dispatch_{}_{}", point.kind, attach),
    }
}

/// Dispatchers described by the applicable chain directives, with the directive
///
/// Shared by the optimizer and the kernel generator so both read chains the
/// same way. A chain is skipped when it names fewer than two programs, an
/// unknown program, a program already chained, or programs that do not all
/// sit on the directive's exclusive attach point.
pub fn chain_dispatchers(strategies: &[Strategy], programs: &[IrProgram]) -> Vec<(Strategy, Dispatcher)> {
    let mut claimed: BTreeSet<&str> = BTreeSet::new();
    let mut out = Vec::new();

    for strategy in strategies {
        let Strategy::ChainDispatch {
            kind,
            attach,
            direction,
            programs: names,
        } = strategy
        else {
            continue;
        };

        let point = AttachPoint::new(*kind, attach, *direction);
        let distinct: BTreeSet<&str> = names.iter().map(String::as_str).collect();
        let applicable = kind.is_exclusive()
            && names.len() >= 2
            && distinct.len() == names.len()
            && names.iter().all(|name| {
                !claimed.contains(name.as_str())
                    && programs.iter().any(|p| {
                        &p.name == name && AttachPoint::new(p.kind, &p.attach, p.direction) == point
                    })
            });
        if !applicable {
            debug!(?strategy, "chain directive not applicable, ignoring");
            continue;
        }

        claimed.extend(names.iter().map(String::as_str));
        out.push((
            strategy.clone(),
            Dispatcher {
                symbol: dispatcher_symbol(&point),
                kind: *kind,
                attach: attach.clone(),
                direction: point.direction,
                programs: names.clone(),
            },
        ));
    }
    out
}
