//! Hookscript Parser Module
//!
//! Parses LISP-style S-expressions into the declaration list consumed by the
//! checker and the multi-program core.

mod ast;
mod sexpr_parser;

pub use ast::{
    BinaryOp, ConfigDecl, ConfigField, ConstDecl, Declaration, Expression, FunctionDecl,
    HookKind, MapDecl, MapType, Param, Program, ProgramDecl, Span, Statement, StructFieldExpr,
    TcDirection, TypeAliasDecl, TypeExpr, UnaryOp,
};
pub use sexpr_parser::SExprParser;
