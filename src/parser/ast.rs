use serde::{Deserialize, Serialize};
use std::fmt;

use crate::compiler::ir::IrType;

/// Source position of a form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Span {
    /// Line number (1-indexed)
    pub line: usize,
    /// Column number (1-indexed)
    pub col: usize,
}

impl Span {
    /// Creates a span at the given position
    pub fn new(line: usize, col: usize) -> Self {
        Self { line, col }
    }
}

/// Complete Hookscript source unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    /// Top-level declarations in source order
    pub declarations: Vec<Declaration>,
}

/// Kernel attachment category a program targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookKind {
    /// eXpress Data Path packet filter
    Xdp,
    /// Traffic-control classifier
    Tc,
    /// Kernel function probe
    Kprobe,
}

impl HookKind {
    /// All kinds, in header emission order
    pub const ALL: [HookKind; 3] = [HookKind::Xdp, HookKind::Tc, HookKind::Kprobe];

    /// Parses a kind tag (`xdp`, `tc`, `kprobe`)
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "xdp" => Some(HookKind::Xdp),
            "tc" => Some(HookKind::Tc),
            "kprobe" => Some(HookKind::Kprobe),
            _ => None,
        }
    }

    /// Short tag, also the builtin header base name
    pub fn as_str(&self) -> &'static str {
        match self {
            HookKind::Xdp => "xdp",
            HookKind::Tc => "tc",
            HookKind::Kprobe => "kprobe",
        }
    }

    /// Whether the hook admits at most one unordered attachment per point
    pub fn is_exclusive(&self) -> bool {
        matches!(self, HookKind::Xdp | HookKind::Tc)
    }
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Traffic-control hook direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TcDirection {
    /// Incoming traffic
    Ingress,
    /// Outgoing traffic
    Egress,
}

impl TcDirection {
    /// Parses `ingress` / `egress`
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ingress" => Some(TcDirection::Ingress),
            "egress" => Some(TcDirection::Egress),
            _ => None,
        }
    }

    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            TcDirection::Ingress => "ingress",
            TcDirection::Egress => "egress",
        }
    }
}

/// Kernel map flavours
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MapType {
    /// BPF_MAP_TYPE_HASH
    Hash,
    /// BPF_MAP_TYPE_ARRAY
    Array,
    /// BPF_MAP_TYPE_LRU_HASH
    LruHash,
    /// BPF_MAP_TYPE_PERCPU_ARRAY
    PercpuArray,
    /// BPF_MAP_TYPE_RINGBUF (events polled by userspace)
    Ringbuf,
}

impl MapType {
    /// Parses a map type tag
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "hash" => Some(MapType::Hash),
            "array" => Some(MapType::Array),
            "lru-hash" => Some(MapType::LruHash),
            "percpu-array" => Some(MapType::PercpuArray),
            "ringbuf" => Some(MapType::Ringbuf),
            _ => None,
        }
    }

    /// Source-level tag
    pub fn as_str(&self) -> &'static str {
        match self {
            MapType::Hash => "hash",
            MapType::Array => "array",
            MapType::LruHash => "lru-hash",
            MapType::PercpuArray => "percpu-array",
            MapType::Ringbuf => "ringbuf",
        }
    }

    /// libbpf map type constant
    pub fn bpf_constant(&self) -> &'static str {
        match self {
            MapType::Hash => "BPF_MAP_TYPE_HASH",
            MapType::Array => "BPF_MAP_TYPE_ARRAY",
            MapType::LruHash => "BPF_MAP_TYPE_LRU_HASH",
            MapType::PercpuArray => "BPF_MAP_TYPE_PERCPU_ARRAY",
            MapType::Ringbuf => "BPF_MAP_TYPE_RINGBUF",
        }
    }
}

/// Source-level type expression (may name an alias)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeExpr {
    /// Primitive (`u32`, `bool`) or alias name (`Counter`)
    Named(String),
    /// Fixed-size array: `(array u8 16)`
    Array(Box<TypeExpr>, usize),
    /// Anonymous struct: `(struct (pid u32) (bytes u64))`
    Struct(Vec<StructFieldExpr>),
}

impl fmt::Display for TypeExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeExpr::Named(name) => f.write_str(name),
            TypeExpr::Array(elem, count) => write!(f, "(array {} {})", elem, count),
            TypeExpr::Struct(fields) => {
                f.write_str("(struct")?;
                for field in fields {
                    write!(f, " ({} {})", field.name, field.ty)?;
                }
                f.write_str(")")
            }
        }
    }
}

/// A field inside a struct type expression
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StructFieldExpr {
    /// Field name
    pub name: String,
    /// Field type
    pub ty: TypeExpr,
}

/// Top-level declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Declaration {
    /// `(defprogram ...)`
    Program(ProgramDecl),
    /// `(defn ...)` at top level: helper callable from any program
    GlobalFunction(FunctionDecl),
    /// `(defconfig ...)`
    Config(ConfigDecl),
    /// `(defmap ...)` at top level
    Map(MapDecl),
    /// `(deftype ...)`
    TypeAlias(TypeAliasDecl),
    /// `(defconst NAME value)`
    Constant(ConstDecl),
}

impl Declaration {
    /// Declared name
    pub fn name(&self) -> &str {
        match self {
            Declaration::Program(p) => &p.name,
            Declaration::GlobalFunction(f) => &f.name,
            Declaration::Config(c) => &c.name,
            Declaration::Map(m) => &m.name,
            Declaration::TypeAlias(a) => &a.name,
            Declaration::Constant(c) => &c.name,
        }
    }

    /// Source position of the declaration
    pub fn span(&self) -> Span {
        match self {
            Declaration::Program(p) => p.span,
            Declaration::GlobalFunction(f) => f.span,
            Declaration::Config(c) => c.span,
            Declaration::Map(m) => m.span,
            Declaration::TypeAlias(a) => a.span,
            Declaration::Constant(c) => c.span,
        }
    }
}

/// A kernel-hook program
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramDecl {
    /// Program name (also the entry symbol)
    pub name: String,
    /// Hook kind
    pub kind: HookKind,
    /// Interface name (xdp/tc) or kernel symbol (kprobe)
    pub attach: String,
    /// Explicit ordering among programs sharing an attach point
    pub priority: Option<u32>,
    /// TC direction; defaults to ingress
    pub direction: Option<TcDirection>,
    /// Functions; the first is the entry point
    pub functions: Vec<FunctionDecl>,
    /// Maps declared inside the program body
    pub maps: Vec<MapDecl>,
    /// Source position
    pub span: Span,
}

impl ProgramDecl {
    /// The entry function (first declared)
    pub fn entry(&self) -> Option<&FunctionDecl> {
        self.functions.first()
    }
}

/// Function parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    /// Parameter name
    pub name: String,
    /// Declared type
    pub ty: TypeExpr,
}

/// Function declaration (global or program-local)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDecl {
    /// Function name
    pub name: String,
    /// Parameters
    pub params: Vec<Param>,
    /// Return type, `None` for void
    pub ret: Option<TypeExpr>,
    /// Body statements
    pub body: Vec<Statement>,
    /// Source position
    pub span: Span,
}

/// Config field with optional default
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigField {
    /// Field name
    pub name: String,
    /// Declared type
    pub ty: TypeExpr,
    /// Initial value injected by userspace
    pub default: Option<i64>,
}

/// Configuration schema shared by kernel and userspace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigDecl {
    /// Config name
    pub name: String,
    /// Ordered fields
    pub fields: Vec<ConfigField>,
    /// Source position
    pub span: Span,
}

/// Map declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapDecl {
    /// Map name
    pub name: String,
    /// Map flavour
    pub map_type: MapType,
    /// Key type (absent for ring buffers)
    pub key: Option<TypeExpr>,
    /// Value type (event type for ring buffers)
    pub value: TypeExpr,
    /// Capacity (entries, or bytes for ring buffers)
    pub max_entries: u32,
    /// Source position
    pub span: Span,
}

/// `(deftype Name type)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeAliasDecl {
    /// Alias name
    pub name: String,
    /// Underlying type
    pub ty: TypeExpr,
    /// Source position
    pub span: Span,
}

/// `(defconst NAME value)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstDecl {
    /// Constant name
    pub name: String,
    /// Integer value
    pub value: i64,
    /// Source position
    pub span: Span,
}

/// Statements
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Statement {
    /// Variable declaration: `(let name expr)` or `(let (name Type) expr)`
    Let {
        /// Variable name
        name: String,
        /// Declared type, possibly an alias
        ty: Option<TypeExpr>,
        /// Initializer
        value: Expression,
        /// Structural type filled in by the checker
        resolved: Option<IrType>,
        /// Source position
        span: Span,
    },

    /// Assignment: `(set! name expr)`
    Assign {
        /// Target variable
        name: String,
        /// New value
        value: Expression,
        /// Source position
        span: Span,
    },

    /// Conditional
    If {
        /// Condition expression
        condition: Expression,
        /// Statements executed when true
        then_branch: Vec<Statement>,
        /// Statements executed when false
        else_branch: Option<Vec<Statement>>,
        /// Source position
        span: Span,
    },

    /// Bounded loop: `(for (i start end) body...)`
    For {
        /// Loop variable
        variable: String,
        /// Inclusive lower bound
        start: i64,
        /// Exclusive upper bound
        end: i64,
        /// Loop body
        body: Vec<Statement>,
        /// Source position
        span: Span,
    },

    /// Return with optional value
    Return {
        /// Returned value
        value: Option<Expression>,
        /// Source position
        span: Span,
    },

    /// Expression evaluated for effect
    Expression(Expression),
}

/// Expressions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expression {
    /// Integer literal
    IntLiteral(i64, Span),
    /// Boolean literal
    BoolLiteral(bool, Span),
    /// Variable, constant or resource name
    Variable(String, Span),
    /// Binary operation
    Binary {
        /// Operator
        op: BinaryOp,
        /// Left operand
        left: Box<Expression>,
        /// Right operand
        right: Box<Expression>,
        /// Source position
        span: Span,
    },
    /// Unary operation
    Unary {
        /// Operator
        op: UnaryOp,
        /// Operand
        operand: Box<Expression>,
        /// Source position
        span: Span,
    },
    /// Field access: `(. base field)`
    Field {
        /// Struct value or config name
        base: Box<Expression>,
        /// Field name
        field: String,
        /// Source position
        span: Span,
    },
    /// Function or builtin call
    Call {
        /// Callee name
        name: String,
        /// Arguments
        args: Vec<Expression>,
        /// Source position
        span: Span,
    },
    /// Struct construction: `(make Event :pid p :bytes n)`
    Make {
        /// Struct alias name
        type_name: String,
        /// Field initializers in source order
        fields: Vec<(String, Expression)>,
        /// Source position
        span: Span,
    },
}

impl Expression {
    /// Source position of the expression
    pub fn span(&self) -> Span {
        match self {
            Expression::IntLiteral(_, span)
            | Expression::BoolLiteral(_, span)
            | Expression::Variable(_, span) => *span,
            Expression::Binary { span, .. }
            | Expression::Unary { span, .. }
            | Expression::Field { span, .. }
            | Expression::Call { span, .. }
            | Expression::Make { span, .. } => *span,
        }
    }
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    /// Addition (+)
    Add,
    /// Subtraction (-)
    Sub,
    /// Multiplication (*)
    Mul,
    /// Division (/)
    Div,
    /// Modulo (%)
    Mod,
    /// Bitwise and (&)
    BitAnd,
    /// Bitwise or (|)
    BitOr,
    /// Bitwise xor (^)
    BitXor,
    /// Shift left (<<)
    Shl,
    /// Shift right (>>)
    Shr,
    /// Equality (==)
    Eq,
    /// Inequality (!=)
    NotEq,
    /// Less than (<)
    Lt,
    /// Greater than (>)
    Gt,
    /// Less than or equal (<=)
    LtEq,
    /// Greater than or equal (>=)
    GtEq,
    /// Logical and
    And,
    /// Logical or
    Or,
}

impl BinaryOp {
    /// Parses an operator symbol
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "+" => BinaryOp::Add,
            "-" => BinaryOp::Sub,
            "*" => BinaryOp::Mul,
            "/" => BinaryOp::Div,
            "%" => BinaryOp::Mod,
            "&" => BinaryOp::BitAnd,
            "|" => BinaryOp::BitOr,
            "^" => BinaryOp::BitXor,
            "<<" => BinaryOp::Shl,
            ">>" => BinaryOp::Shr,
            "==" | "=" => BinaryOp::Eq,
            "!=" => BinaryOp::NotEq,
            "<" => BinaryOp::Lt,
            ">" => BinaryOp::Gt,
            "<=" => BinaryOp::LtEq,
            ">=" => BinaryOp::GtEq,
            "and" => BinaryOp::And,
            "or" => BinaryOp::Or,
            _ => return None,
        })
    }

    /// C spelling of the operator
    pub fn c_symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Gt => ">",
            BinaryOp::LtEq => "<=",
            BinaryOp::GtEq => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }

    /// Whether the result is a boolean
    pub fn is_predicate(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::NotEq
                | BinaryOp::Lt
                | BinaryOp::Gt
                | BinaryOp::LtEq
                | BinaryOp::GtEq
                | BinaryOp::And
                | BinaryOp::Or
        )
    }

    /// Whether the operator folds over more than two operands
    pub fn is_variadic(&self) -> bool {
        matches!(
            self,
            BinaryOp::Add
                | BinaryOp::Mul
                | BinaryOp::BitAnd
                | BinaryOp::BitOr
                | BinaryOp::BitXor
                | BinaryOp::And
                | BinaryOp::Or
        )
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    /// Negation (-)
    Neg,
    /// Logical not
    Not,
    /// Bitwise complement (~)
    BitNot,
}

impl UnaryOp {
    /// C spelling of the operator
    pub fn c_symbol(&self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "!",
            UnaryOp::BitNot => "~",
        }
    }
}
