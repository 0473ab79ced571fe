//! IR statement and expression definitions

use super::types::IrType;
use crate::parser::{BinaryOp, UnaryOp};
use serde::{Deserialize, Serialize};

/// Reference to a kernel-level resource (config or map)
///
/// Holds the declared name after lowering and the canonical name once the
/// resource plan has been applied.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceRef(pub String);

impl ResourceRef {
    /// Creates a reference to the named resource
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Referenced name
    pub fn name(&self) -> &str {
        &self.0
    }
}

/// Hook-context builtins, available inside program functions only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContextBuiltin {
    /// Packet length in bytes (xdp, tc)
    PacketLen,
    /// Ingress interface index (xdp, tc)
    Ifindex,
    /// Current thread group id
    Pid,
    /// Monotonic time in nanoseconds
    Ktime,
    /// Probed function argument, 1-based (kprobe)
    Arg(u8),
}

impl ContextBuiltin {
    /// Result type of the builtin
    pub fn result_type(&self) -> IrType {
        use super::types::PrimitiveType;
        match self {
            ContextBuiltin::PacketLen | ContextBuiltin::Ifindex | ContextBuiltin::Pid => {
                IrType::prim(PrimitiveType::U32)
            }
            ContextBuiltin::Ktime | ContextBuiltin::Arg(_) => IrType::prim(PrimitiveType::U64),
        }
    }
}

/// IR expression (typed, side-effect free except calls and map lookups)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IrExpr {
    /// Integer constant
    Int(i64),
    /// Boolean constant
    Bool(bool),
    /// Hook return-code constant provided by kernel headers (e.g. `XDP_PASS`)
    Symbolic(String),
    /// Local variable or parameter
    Local(String),
    /// Binary operation
    Binary {
        /// Operator
        op: BinaryOp,
        /// Left operand
        lhs: Box<IrExpr>,
        /// Right operand
        rhs: Box<IrExpr>,
    },
    /// Unary operation
    Unary {
        /// Operator
        op: UnaryOp,
        /// Operand
        operand: Box<IrExpr>,
    },
    /// Field of a struct-typed value
    Field {
        /// Struct value
        base: Box<IrExpr>,
        /// Field name
        field: String,
    },
    /// Read of one configuration field
    ConfigField {
        /// Configuration resource
        config: ResourceRef,
        /// Field name
        field: String,
    },
    /// Map lookup yielding the value or a zeroed default
    MapLookup {
        /// Map resource
        map: ResourceRef,
        /// Key expression
        key: Box<IrExpr>,
        /// Structural key type
        key_ty: IrType,
        /// Structural value type
        value_ty: IrType,
    },
    /// Call to a global or program-local function (C symbol)
    Call {
        /// Mangled C symbol
        function: String,
        /// Arguments
        args: Vec<IrExpr>,
        /// Whether the hook context is passed as first argument
        passes_context: bool,
    },
    /// Hook context builtin
    Context(ContextBuiltin),
    /// Struct literal of a named struct alias
    StructLit {
        /// Alias name spelled in source
        type_name: String,
        /// Field initializers
        fields: Vec<(String, IrExpr)>,
    },
}

/// IR statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IrStmt {
    /// Local variable declaration with initializer
    Declare {
        /// Variable name
        name: String,
        /// Structural type (aliases erased)
        ty: IrType,
        /// Initial value
        init: IrExpr,
    },
    /// Assignment to an existing local
    Assign {
        /// Variable name
        name: String,
        /// New value
        value: IrExpr,
    },
    /// Conditional
    If {
        /// Condition
        cond: IrExpr,
        /// True branch
        then_body: Vec<IrStmt>,
        /// False branch (possibly empty)
        else_body: Vec<IrStmt>,
    },
    /// Bounded counting loop `for (var = start; var < end; var++)`
    Loop {
        /// Loop variable
        var: String,
        /// Inclusive start
        start: i64,
        /// Exclusive end
        end: i64,
        /// Body
        body: Vec<IrStmt>,
    },
    /// Return with optional value
    Return(Option<IrExpr>),
    /// Insert or overwrite a map entry
    MapUpdate {
        /// Map resource
        map: ResourceRef,
        /// Key
        key: IrExpr,
        /// Value
        value: IrExpr,
        /// Structural key type
        key_ty: IrType,
        /// Structural value type
        value_ty: IrType,
    },
    /// Remove a map entry
    MapDelete {
        /// Map resource
        map: ResourceRef,
        /// Key
        key: IrExpr,
        /// Structural key type
        key_ty: IrType,
    },
    /// Publish an event on a ring buffer
    Emit {
        /// Ring buffer resource
        map: ResourceRef,
        /// Event value
        value: IrExpr,
        /// Structural event type
        value_ty: IrType,
    },
    /// Expression evaluated for effect
    Eval(IrExpr),
}

impl IrExpr {
    /// Visit every resource reference in this expression
    pub fn for_each_resource(&self, f: &mut dyn FnMut(&ResourceRef)) {
        match self {
            IrExpr::ConfigField { config, .. } => f(config),
            IrExpr::MapLookup { map, key, .. } => {
                f(map);
                key.for_each_resource(f);
            }
            IrExpr::Binary { lhs, rhs, .. } => {
                lhs.for_each_resource(f);
                rhs.for_each_resource(f);
            }
            IrExpr::Unary { operand, .. } => operand.for_each_resource(f),
            IrExpr::Field { base, .. } => base.for_each_resource(f),
            IrExpr::Call { args, .. } => args.iter().for_each(|a| a.for_each_resource(f)),
            IrExpr::StructLit { fields, .. } => {
                fields.iter().for_each(|(_, e)| e.for_each_resource(f))
            }
            IrExpr::Int(_)
            | IrExpr::Bool(_)
            | IrExpr::Symbolic(_)
            | IrExpr::Local(_)
            | IrExpr::Context(_) => {}
        }
    }

    /// Rewrite every resource reference in place
    pub fn rename_resources(&mut self, rename: &dyn Fn(&str) -> Option<String>) {
        match self {
            IrExpr::ConfigField { config, .. } => rename_ref(config, rename),
            IrExpr::MapLookup { map, key, .. } => {
                rename_ref(map, rename);
                key.rename_resources(rename);
            }
            IrExpr::Binary { lhs, rhs, .. } => {
                lhs.rename_resources(rename);
                rhs.rename_resources(rename);
            }
            IrExpr::Unary { operand, .. } => operand.rename_resources(rename),
            IrExpr::Field { base, .. } => base.rename_resources(rename),
            IrExpr::Call { args, .. } => args.iter_mut().for_each(|a| a.rename_resources(rename)),
            IrExpr::StructLit { fields, .. } => fields
                .iter_mut()
                .for_each(|(_, e)| e.rename_resources(rename)),
            IrExpr::Int(_)
            | IrExpr::Bool(_)
            | IrExpr::Symbolic(_)
            | IrExpr::Local(_)
            | IrExpr::Context(_) => {}
        }
    }

    /// Visit every called C symbol
    pub fn for_each_call(&self, f: &mut dyn FnMut(&str)) {
        match self {
            IrExpr::Call { function, args, .. } => {
                f(function);
                args.iter().for_each(|a| a.for_each_call(f));
            }
            IrExpr::MapLookup { key, .. } => key.for_each_call(f),
            IrExpr::Binary { lhs, rhs, .. } => {
                lhs.for_each_call(f);
                rhs.for_each_call(f);
            }
            IrExpr::Unary { operand, .. } => operand.for_each_call(f),
            IrExpr::Field { base, .. } => base.for_each_call(f),
            IrExpr::StructLit { fields, .. } => fields.iter().for_each(|(_, e)| e.for_each_call(f)),
            _ => {}
        }
    }
}

impl IrStmt {
    /// Visit every resource reference in this statement and its children
    pub fn for_each_resource(&self, f: &mut dyn FnMut(&ResourceRef)) {
        match self {
            IrStmt::Declare { init, .. } => init.for_each_resource(f),
            IrStmt::Assign { value, .. } | IrStmt::Eval(value) => value.for_each_resource(f),
            IrStmt::If {
                cond,
                then_body,
                else_body,
            } => {
                cond.for_each_resource(f);
                then_body.iter().for_each(|s| s.for_each_resource(f));
                else_body.iter().for_each(|s| s.for_each_resource(f));
            }
            IrStmt::Loop { body, .. } => body.iter().for_each(|s| s.for_each_resource(f)),
            IrStmt::Return(value) => {
                if let Some(value) = value {
                    value.for_each_resource(f);
                }
            }
            IrStmt::MapUpdate { map, key, value, .. } => {
                f(map);
                key.for_each_resource(f);
                value.for_each_resource(f);
            }
            IrStmt::MapDelete { map, key, .. } => {
                f(map);
                key.for_each_resource(f);
            }
            IrStmt::Emit { map, value, .. } => {
                f(map);
                value.for_each_resource(f);
            }
        }
    }

    /// Rewrite every resource reference in place
    pub fn rename_resources(&mut self, rename: &dyn Fn(&str) -> Option<String>) {
        match self {
            IrStmt::Declare { init, .. } => init.rename_resources(rename),
            IrStmt::Assign { value, .. } | IrStmt::Eval(value) => value.rename_resources(rename),
            IrStmt::If {
                cond,
                then_body,
                else_body,
            } => {
                cond.rename_resources(rename);
                then_body.iter_mut().for_each(|s| s.rename_resources(rename));
                else_body.iter_mut().for_each(|s| s.rename_resources(rename));
            }
            IrStmt::Loop { body, .. } => body.iter_mut().for_each(|s| s.rename_resources(rename)),
            IrStmt::Return(value) => {
                if let Some(value) = value {
                    value.rename_resources(rename);
                }
            }
            IrStmt::MapUpdate { map, key, value, .. } => {
                rename_ref(map, rename);
                key.rename_resources(rename);
                value.rename_resources(rename);
            }
            IrStmt::MapDelete { map, key, .. } => {
                rename_ref(map, rename);
                key.rename_resources(rename);
            }
            IrStmt::Emit { map, value, .. } => {
                rename_ref(map, rename);
                value.rename_resources(rename);
            }
        }
    }

    /// Visit every called C symbol
    pub fn for_each_call(&self, f: &mut dyn FnMut(&str)) {
        match self {
            IrStmt::Declare { init: e, .. }
            | IrStmt::Assign { value: e, .. }
            | IrStmt::Eval(e)
            | IrStmt::Emit { value: e, .. } => e.for_each_call(f),
            IrStmt::If {
                cond,
                then_body,
                else_body,
            } => {
                cond.for_each_call(f);
                then_body.iter().for_each(|s| s.for_each_call(f));
                else_body.iter().for_each(|s| s.for_each_call(f));
            }
            IrStmt::Loop { body, .. } => body.iter().for_each(|s| s.for_each_call(f)),
            IrStmt::Return(Some(e)) => e.for_each_call(f),
            IrStmt::Return(None) => {}
            IrStmt::MapUpdate { key, value, .. } => {
                key.for_each_call(f);
                value.for_each_call(f);
            }
            IrStmt::MapDelete { key, .. } => key.for_each_call(f),
        }
    }
}

fn rename_ref(r: &mut ResourceRef, rename: &dyn Fn(&str) -> Option<String>) {
    if let Some(new_name) = rename(&r.0) {
        r.0 = new_name;
    }
}
