//! IR program, resource section and lowered/optimized unit definitions

use super::instruction::{IrStmt, ResourceRef};
use super::types::{IrField, IrType, TypeUse};
use crate::compiler::resource_plan::{Ownership, ResourcePlan};
use crate::compiler::strategy::Strategy;
use crate::parser::{HookKind, MapType, TcDirection};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A lowered function (global helper, program helper or entry point)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrFunction {
    /// Source name
    pub name: String,
    /// C symbol the function is emitted under
    pub symbol: String,
    /// Owning program, `None` for global functions
    pub program: Option<String>,
    /// Parameters with their structural types
    pub params: Vec<(String, IrType)>,
    /// Return type
    pub ret: TypeUse,
    /// Body
    pub body: Vec<IrStmt>,
}

impl IrFunction {
    /// Every resource referenced directly by the body
    pub fn direct_resources(&self) -> BTreeSet<ResourceRef> {
        let mut out = BTreeSet::new();
        for stmt in &self.body {
            stmt.for_each_resource(&mut |r| {
                out.insert(r.clone());
            });
        }
        out
    }

    /// Every C symbol called directly by the body
    pub fn direct_calls(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        for stmt in &self.body {
            stmt.for_each_call(&mut |callee| {
                out.insert(callee.to_string());
            });
        }
        out
    }
}

/// One lowered kernel-hook program
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrProgram {
    /// Program name
    pub name: String,
    /// Hook kind
    pub kind: HookKind,
    /// Interface or kernel symbol
    pub attach: String,
    /// Explicit priority
    pub priority: Option<u32>,
    /// TC direction (tc programs only)
    pub direction: Option<TcDirection>,
    /// Entry function
    pub entry: IrFunction,
    /// Program-local helpers in declaration order
    pub helpers: Vec<IrFunction>,
}

impl IrProgram {
    /// Entry followed by helpers
    pub fn functions(&self) -> impl Iterator<Item = &IrFunction> {
        std::iter::once(&self.entry).chain(self.helpers.iter())
    }

    /// Mutable entry followed by helpers
    pub fn functions_mut(&mut self) -> impl Iterator<Item = &mut IrFunction> {
        std::iter::once(&mut self.entry).chain(self.helpers.iter_mut())
    }

    /// Symbol of the always-inline body shared by the SEC wrapper and dispatchers
    pub fn body_symbol(&self) -> String {
        format!("hs_run_{}", self.name)
    }
}

/// Kind-specific part of a resource declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "resource", rename_all = "lowercase")]
pub enum ResourceKind {
    /// Configuration struct held in a single-entry array map
    Config {
        /// Ordered fields
        fields: Vec<IrField>,
        /// Default per field, in field order
        defaults: Vec<Option<i64>>,
    },
    /// Kernel map
    Map {
        /// Map flavour
        map_type: MapType,
        /// Key type (absent for ring buffers)
        key: Option<TypeUse>,
        /// Value or event type
        value: TypeUse,
        /// Capacity
        max_entries: u32,
    },
}

impl ResourceKind {
    /// `config` or `map`
    pub fn tag(&self) -> &'static str {
        match self {
            ResourceKind::Config { .. } => "config",
            ResourceKind::Map { .. } => "map",
        }
    }

    /// Whether two declarations describe the same kernel object
    pub fn compatible_with(&self, other: &ResourceKind) -> bool {
        match (self, other) {
            (
                ResourceKind::Config { fields: a, .. },
                ResourceKind::Config { fields: b, .. },
            ) => {
                a.len() == b.len()
                    && a
                        .iter()
                        .zip(b)
                        .all(|(x, y)| x.name == y.name && x.ty.same_layout(&y.ty))
            }
            (
                ResourceKind::Map {
                    map_type: ta,
                    key: ka,
                    value: va,
                    max_entries: na,
                },
                ResourceKind::Map {
                    map_type: tb,
                    key: kb,
                    value: vb,
                    max_entries: nb,
                },
            ) => {
                let keys_match = match (ka, kb) {
                    (Some(a), Some(b)) => a.ty.same_layout(&b.ty),
                    (None, None) => true,
                    _ => false,
                };
                ta == tb && na == nb && keys_match && va.ty.same_layout(&vb.ty)
            }
            _ => false,
        }
    }

    /// Short human description used in schema mismatch errors
    pub fn describe(&self) -> String {
        match self {
            ResourceKind::Config { fields, .. } => {
                let fields: Vec<String> = fields
                    .iter()
                    .map(|f| format!("{}: {}", f.name, f.ty))
                    .collect();
                format!("config {{{}}}", fields.join(", "))
            }
            ResourceKind::Map {
                map_type,
                key,
                value,
                max_entries,
            } => match key {
                Some(key) => format!(
                    "{} map {} -> {} x{}",
                    map_type.as_str(),
                    key.ty,
                    value.ty,
                    max_entries
                ),
                None => format!("{} map of {} x{}", map_type.as_str(), value.ty, max_entries),
            },
        }
    }
}

/// A resource declaration hoisted into the resource section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDecl {
    /// Declared name
    pub name: String,
    /// Program whose body declared it, `None` for top-level declarations
    pub declared_in: Option<String>,
    /// Declaration payload
    pub kind: ResourceKind,
}

/// Output of lowering, before the plan is applied
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoweredUnit {
    /// Programs in declaration order
    pub programs: Vec<IrProgram>,
    /// Global functions in declaration order
    pub functions: Vec<IrFunction>,
    /// Every resource declaration in declaration order, duplicates included
    pub resources: Vec<ResourceDecl>,
}

/// A resource of the final resource section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedResource {
    /// Declared name
    pub declared: String,
    /// Canonical name used by both generated files
    pub canonical: String,
    /// Ownership according to the plan
    pub ownership: Ownership,
    /// Programs allowed to reference the resource
    pub permitted: BTreeSet<String>,
    /// Declaration payload
    pub kind: ResourceKind,
}

/// Chained dispatch over programs sharing an exclusive attach point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dispatcher {
    /// Symbol of the dispatcher entry point
    pub symbol: String,
    /// Hook kind
    pub kind: HookKind,
    /// Interface
    pub attach: String,
    /// TC direction
    pub direction: Option<TcDirection>,
    /// Programs in ascending priority
    pub programs: Vec<String>,
}

/// Final IR: single source of truth for both generators
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizedIr {
    /// Programs in declaration order
    pub programs: Vec<IrProgram>,
    /// Reachable global functions in declaration order
    pub functions: Vec<IrFunction>,
    /// Surviving resources in declaration order, canonical names applied
    pub resources: Vec<PlannedResource>,
    /// Chained dispatchers
    pub dispatchers: Vec<Dispatcher>,
    /// Plan the IR was built against
    pub plan: ResourcePlan,
    /// Directives that were applied
    pub applied: Vec<Strategy>,
}

impl OptimizedIr {
    /// Distinct hook kinds present, in kind order
    pub fn kinds(&self) -> Vec<HookKind> {
        let present: BTreeSet<HookKind> = self.programs.iter().map(|p| p.kind).collect();
        present.into_iter().collect()
    }

    /// Resource by canonical name
    pub fn resource(&self, canonical: &str) -> Option<&PlannedResource> {
        self.resources.iter().find(|r| r.canonical == canonical)
    }

    /// Program by name
    pub fn program(&self, name: &str) -> Option<&IrProgram> {
        self.programs.iter().find(|p| p.name == name)
    }

    /// Dispatcher that absorbs the given program, if any
    pub fn dispatcher_for(&self, program: &str) -> Option<&Dispatcher> {
        self.dispatchers
            .iter()
            .find(|d| d.programs.iter().any(|p| p == program))
    }

    /// Kernel entry points to attach, in program declaration order
    ///
    /// A chained program is represented by its dispatcher, listed once at the
    /// position of its first member.
    pub fn entry_points(&self) -> Vec<EntryPoint> {
        let mut out: Vec<EntryPoint> = Vec::new();
        for program in &self.programs {
            match self.dispatcher_for(&program.name) {
                Some(d) => {
                    if out.iter().all(|e| e.symbol != d.symbol) {
                        out.push(EntryPoint {
                            symbol: d.symbol.clone(),
                            kind: d.kind,
                            attach: d.attach.clone(),
                            direction: d.direction,
                            programs: d.programs.clone(),
                        });
                    }
                }
                None => out.push(EntryPoint {
                    symbol: program.name.clone(),
                    kind: program.kind,
                    attach: program.attach.clone(),
                    direction: program.direction,
                    programs: vec![program.name.clone()],
                }),
            }
        }
        out
    }
}

/// A `SEC` function userspace attaches
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryPoint {
    /// C symbol (program name or dispatcher symbol)
    pub symbol: String,
    /// Hook kind
    pub kind: HookKind,
    /// Interface or kernel symbol
    pub attach: String,
    /// TC direction
    pub direction: Option<TcDirection>,
    /// Programs run by this entry point
    pub programs: Vec<String>,
}
