//! Error types for the Hookscript compiler

use crate::compiler::Phase;
use thiserror::Error;

/// Hookscript compiler errors
#[derive(Error, Debug, Clone)]
pub enum Error {
    // Parse errors
    /// Syntax error encountered during parsing
    ///
    /// **Triggered by:** Invalid Hookscript syntax (unmatched parentheses, malformed forms)
    /// **Example:** `(defprogram p :kind xdp` (missing closing parenthesis)
    #[error("Syntax error at line {line}, column {col}: {message}")]
    SyntaxError {
        /// Line number where error occurred
        line: usize,
        /// Column number where error occurred
        col: usize,
        /// Error description
        message: String,
    },

    /// Unexpected end of file during parsing
    #[error("Unexpected end of file")]
    UnexpectedEof,

    /// Unexpected token encountered during parsing
    #[error("Unexpected token at line {line}, column {col}: expected {expected}, got {got}")]
    UnexpectedToken {
        /// Expected token description
        expected: String,
        /// Actual token received
        got: String,
        /// Line of the offending token
        line: usize,
        /// Column of the offending token
        col: usize,
    },

    // Front end semantic errors
    /// Type error reported by the checker
    ///
    /// **Triggered by:** Ill-typed programs, unknown names, arity mismatches
    /// **Example:** `(set! undeclared 1)`
    #[error("Type error at line {line}, column {col}: {message}")]
    TypeError {
        /// Error description
        message: String,
        /// Line number where error occurred
        line: usize,
        /// Column number where error occurred
        col: usize,
    },

    // Multi-program errors
    /// Two or more programs claim the same exclusive attach point
    ///
    /// **Triggered by:** Two `xdp` programs on one interface without distinct `:priority`
    /// **Prevention:** Give every program on the point a distinct priority so they chain
    #[error("Attach point conflict: {}", format_conflicts(.0))]
    ProgramConflict(Vec<AttachConflict>),

    /// A resource name was reused with an incompatible shape
    #[error("Resource schema mismatch for '{name}': first declared as {first}, redeclared as {second}")]
    SchemaMismatch {
        /// Resource name
        name: String,
        /// Shape of the first declaration
        first: String,
        /// Shape of the conflicting declaration
        second: String,
    },

    /// Two resources were assigned the same canonical name
    #[error("Canonical name collision: '{canonical}' assigned to both '{first}' and '{second}'")]
    NameCollision {
        /// The colliding canonical name
        canonical: String,
        /// First resource receiving the name
        first: String,
        /// Second resource receiving the name
        second: String,
    },

    /// A program references a resource outside its permitted set
    #[error("Program '{program}' references resource '{resource}' it is not permitted to use")]
    ForbiddenReference {
        /// Program name
        program: String,
        /// Resource name
        resource: String,
    },

    /// Code generation failed
    #[error("Codegen error: {0}")]
    CodegenError(String),

    /// Builtin header compilation failed (recoverable)
    #[error("Builtin header for '{kind}' failed: {reason}")]
    BuiltinHeader {
        /// Hook kind whose header failed
        kind: String,
        /// Failure reason
        reason: String,
    },

    /// File system failure while reading or writing artifacts
    #[error("I/O error on {path}: {message}")]
    Io {
        /// Path being accessed
        path: String,
        /// Underlying error message
        message: String,
    },

    /// General compiler error
    #[error("Compiler error: {0}")]
    CompilerError(String),

    /// Error tagged with the pipeline phase that produced it
    #[error("{phase} failed: {source}")]
    InPhase {
        /// Phase in progress when the error occurred
        phase: Phase,
        /// Underlying error
        source: Box<Error>,
    },
}

/// One group of programs competing for the same exclusive attach point
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct AttachConflict {
    /// Hook kind of the attach point (e.g. `xdp`)
    pub kind: String,
    /// Attach target description (interface, direction)
    pub attach: String,
    /// Every program claiming the point, in declaration order
    pub programs: Vec<String>,
}

fn format_conflicts(conflicts: &[AttachConflict]) -> String {
    conflicts
        .iter()
        .map(|c| {
            format!(
                "{} programs [{}] all claim {}",
                c.kind,
                c.programs.join(", "),
                c.attach
            )
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Error severity classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Fatal error that aborts the run
    Fatal,
    /// Warning that doesn't prevent the run from succeeding
    Warning,
}

impl Error {
    /// Create a compiler error with a message
    pub fn compiler(msg: impl Into<String>) -> Self {
        Error::CompilerError(msg.into())
    }

    /// Create a codegen error with a message
    pub fn codegen(msg: impl Into<String>) -> Self {
        Error::CodegenError(msg.into())
    }

    /// Create a type error at a source position
    pub fn type_error(msg: impl Into<String>, line: usize, col: usize) -> Self {
        Error::TypeError {
            message: msg.into(),
            line,
            col,
        }
    }

    /// Wrap an I/O error with the path it concerns
    pub fn io(path: impl AsRef<std::path::Path>, err: std::io::Error) -> Self {
        Error::Io {
            path: path.as_ref().display().to_string(),
            message: err.to_string(),
        }
    }

    /// Tag this error with a pipeline phase (idempotent)
    pub fn in_phase(self, phase: Phase) -> Self {
        match self {
            Error::InPhase { .. } => self,
            other => Error::InPhase {
                phase,
                source: Box::new(other),
            },
        }
    }

    /// Phase this error was tagged with, if any
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Error::InPhase { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    /// The underlying error with any phase tag removed
    pub fn root(&self) -> &Error {
        match self {
            Error::InPhase { source, .. } => source.root(),
            other => other,
        }
    }

    /// Classify error severity
    pub fn classify(&self) -> ErrorSeverity {
        match self.root() {
            Error::BuiltinHeader { .. } => ErrorSeverity::Warning,
            _ => ErrorSeverity::Fatal,
        }
    }
}

/// Result type for Hookscript operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_message_names_every_program() {
        let err = Error::ProgramConflict(vec![AttachConflict {
            kind: "xdp".to_string(),
            attach: "interface eth0".to_string(),
            programs: vec!["first".to_string(), "second".to_string()],
        }]);
        let msg = err.to_string();
        assert!(msg.contains("first"));
        assert!(msg.contains("second"));
    }

    #[test]
    fn test_phase_tag_is_idempotent() {
        let err = Error::compiler("boom")
            .in_phase(Phase::Analysis)
            .in_phase(Phase::CodeGeneration);
        assert_eq!(err.phase(), Some(Phase::Analysis));
        assert!(err.to_string().starts_with("multi-program analysis failed"));
    }

    #[test]
    fn test_builtin_failure_is_warning() {
        let err = Error::BuiltinHeader {
            kind: "xdp".to_string(),
            reason: "missing".to_string(),
        };
        assert_eq!(err.classify(), ErrorSeverity::Warning);
        assert_eq!(Error::UnexpectedEof.classify(), ErrorSeverity::Fatal);
    }
}
