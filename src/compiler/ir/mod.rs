//! # Intermediate Representation (IR) for Hookscript Compilation
//!
//! Structured, typed IR shared by both code generators. Lowering produces a
//! [`LoweredUnit`] that still uses declared resource names; the optimizer
//! turns it into an [`OptimizedIr`] with canonical names applied.
//!
//! ## Module Structure
//!
//! ```text
//! ir/
//! ├── mod.rs          # This file - module definition and re-exports
//! ├── types.rs        # PrimitiveType, IrType, IrField, TypeUse (layout rules)
//! ├── instruction.rs  # IrStmt, IrExpr, ResourceRef, ContextBuiltin
//! ├── program.rs      # IrFunction, IrProgram, ResourceDecl, LoweredUnit, OptimizedIr
//! └── generator.rs    # IrGenerator (checked tree to IR)
//! ```

mod generator;
mod instruction;
mod program;
mod types;

pub use generator::{helper_symbol, IrGenerator};
pub use instruction::{ContextBuiltin, IrExpr, IrStmt, ResourceRef};
pub use program::{
    Dispatcher, EntryPoint, IrFunction, IrProgram, LoweredUnit, OptimizedIr, PlannedResource, ResourceDecl,
    ResourceKind,
};
pub use types::{literal_type, loop_counter_type, IrField, IrType, PrimitiveType, TypeUse};
