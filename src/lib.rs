//! # Hookscript - cooperating eBPF programs from one S-expression source
//!
//! Hookscript describes several kernel-hook programs (XDP, TC, kprobe) that
//! share maps, configuration structs and ring buffers, and compiles them into
//! two C files that agree on every shared declaration:
//!
//! - `B.ebpf.c`: the kernel object source, one `SEC` entry per program, or one
//!   chained dispatcher per exclusive attach point
//! - `B.c`: a libbpf coordinator that loads the object, writes config
//!   defaults, attaches every entry point and prints ring buffer events
//!
//! ## Quick Start
//!
//! ```rust
//! use hookscript::compiler::Compiler;
//!
//! # fn main() -> hookscript::Result<()> {
//! let source = r#"
//!     (defconfig Settings (threshold u32 1500))
//!     (defmap drops :type array :key u32 :value u64 :max-entries 1)
//!     (defprogram guard :kind xdp :attach "eth0"
//!       (defn main []
//!         (when (> (packet-len) (. Settings threshold))
//!           (map-update drops 0 1)
//!           (return XDP_DROP))
//!         (return XDP_PASS)))
//! "#;
//!
//! let pipeline = Compiler::default().run(source)?;
//! let kernel = pipeline.kernel_source()?;
//! assert!(kernel.contains("SEC(\"xdp\")"));
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! Source → Scanner → Parser → TypeChecker → MultiProgramAnalyzer → IrGenerator
//!        → ResourcePlanner → StrategyGenerator → Optimizer → kernel + userspace C
//! ```
//!
//! Both generators derive the shared declarations from one
//! [`compiler::AbiContract`] and stamp its SHA-256 fingerprint into their
//! output, so a mismatched pair is visible at a glance.

#![allow(clippy::only_used_in_recursion)]
#![allow(clippy::collapsible_match)]

/// Version of the hookscript compiler
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod cli;
pub mod compiler;
pub mod error;
pub mod lexer;
pub mod logging;
pub mod parser;

pub use error::{Error, ErrorSeverity, Result};
pub use lexer::{SExprScanner, Token, TokenKind};
pub use parser::{BinaryOp, Declaration, Expression, Program, SExprParser, Statement, UnaryOp};

/// Type alias for the S-expression scanner (lexer).
pub type Scanner = SExprScanner;

/// Type alias for the S-expression parser.
pub type Parser = SExprParser;
