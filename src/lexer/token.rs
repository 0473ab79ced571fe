use serde::{Deserialize, Serialize};

/// A single token from the source code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    /// The type of token
    pub kind: TokenKind,
    /// Original text of the token
    pub lexeme: String,
    /// Line number where token appears (1-indexed)
    pub line: usize,
    /// Column number where token starts (1-indexed)
    pub column: usize,
}

impl Token {
    /// Creates a new token with the given properties
    pub fn new(kind: TokenKind, lexeme: String, line: usize, column: usize) -> Self {
        Token {
            kind,
            lexeme,
            line,
            column,
        }
    }
}

/// All possible token types in Hookscript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TokenKind {
    // Literals
    /// Integer literal (decimal or `0x` hexadecimal)
    Integer(i64),
    /// String literal
    String(String),
    /// Boolean true literal
    True,
    /// Boolean false literal
    False,

    // Names
    /// Identifier or operator symbol (`foo`, `set!`, `+`, `<=`, `.`)
    Identifier(String),
    /// Keyword argument (`:kind`), stored without the colon
    Keyword(String),

    // Delimiters
    /// Left parenthesis `(`
    LeftParen,
    /// Right parenthesis `)`
    RightParen,
    /// Left bracket `[`
    LeftBracket,
    /// Right bracket `]`
    RightBracket,

    // Special
    /// End of file marker
    Eof,
}

impl TokenKind {
    /// Human readable name used in diagnostics
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Integer(n) => format!("integer {}", n),
            TokenKind::String(s) => format!("string \"{}\"", s),
            TokenKind::True => "`true`".to_string(),
            TokenKind::False => "`false`".to_string(),
            TokenKind::Identifier(name) => format!("identifier `{}`", name),
            TokenKind::Keyword(name) => format!("keyword `:{}`", name),
            TokenKind::LeftParen => "`(`".to_string(),
            TokenKind::RightParen => "`)`".to_string(),
            TokenKind::LeftBracket => "`[`".to_string(),
            TokenKind::RightBracket => "`]`".to_string(),
            TokenKind::Eof => "end of file".to_string(),
        }
    }
}
