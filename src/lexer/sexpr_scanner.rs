use super::token::{Token, TokenKind};
use crate::error::{Error, Result};

/// Scanner for S-expression (LISP-style) Hookscript syntax
pub struct SExprScanner {
    /// Source code as character vector
    source: Vec<char>,
    /// Accumulated tokens
    tokens: Vec<Token>,
    /// Start position of current token
    start: usize,
    /// Column where the current token starts
    start_column: usize,
    /// Current position in source
    current: usize,
    /// Current line number (1-indexed)
    line: usize,
    /// Current column number (1-indexed)
    column: usize,
}

impl SExprScanner {
    /// Creates a new S-expression scanner from source code
    pub fn new(source: &str) -> Self {
        SExprScanner {
            source: source.chars().collect(),
            tokens: Vec::new(),
            start: 0,
            start_column: 1,
            current: 0,
            line: 1,
            column: 1,
        }
    }

    /// Scans all tokens from source code and returns them as a vector
    pub fn scan_tokens(&mut self) -> Result<Vec<Token>> {
        while !self.is_at_end() {
            self.start = self.current;
            self.start_column = self.column;
            self.scan_token()?;
        }

        self.tokens.push(Token::new(
            TokenKind::Eof,
            String::new(),
            self.line,
            self.column,
        ));

        Ok(std::mem::take(&mut self.tokens))
    }

    fn scan_token(&mut self) -> Result<()> {
        let c = self.advance();

        match c {
            ' ' | '\r' | '\t' => {}
            '\n' => {
                self.line += 1;
                self.column = 1;
            }

            // Comments run to end of line
            ';' => self.skip_line_comment(),

            '(' => self.add_token(TokenKind::LeftParen),
            ')' => self.add_token(TokenKind::RightParen),
            '[' => self.add_token(TokenKind::LeftBracket),
            ']' => self.add_token(TokenKind::RightBracket),

            '"' => self.scan_string()?,

            ':' => self.scan_keyword()?,

            '-' if self.peek().is_ascii_digit() => self.scan_number()?,
            c if c.is_ascii_digit() => self.scan_number()?,

            c if is_symbol_char(c) => self.scan_symbol(),

            _ => {
                return Err(Error::SyntaxError {
                    line: self.line,
                    col: self.start_column,
                    message: format!("Unexpected character '{}'", c),
                });
            }
        }

        Ok(())
    }

    fn skip_line_comment(&mut self) {
        while !self.is_at_end() && self.peek() != '\n' {
            self.advance();
        }
    }

    fn scan_string(&mut self) -> Result<()> {
        let mut value = String::new();

        while !self.is_at_end() && self.peek() != '"' {
            if self.peek() == '\\' {
                self.advance();
                let escaped = self.advance();
                match escaped {
                    'n' => value.push('\n'),
                    't' => value.push('\t'),
                    '\\' => value.push('\\'),
                    '"' => value.push('"'),
                    _ => {
                        return Err(Error::SyntaxError {
                            line: self.line,
                            col: self.column,
                            message: format!("Invalid escape sequence \\{}", escaped),
                        });
                    }
                }
            } else {
                if self.peek() == '\n' {
                    self.line += 1;
                    self.column = 0;
                }
                value.push(self.advance());
            }
        }

        if self.is_at_end() {
            return Err(Error::SyntaxError {
                line: self.line,
                col: self.start_column,
                message: "Unterminated string".to_string(),
            });
        }

        self.advance(); // Closing "

        self.add_token(TokenKind::String(value));
        Ok(())
    }

    fn scan_number(&mut self) -> Result<()> {
        let hex = self.source[self.start] == '0' && matches!(self.peek(), 'x' | 'X');
        if hex {
            self.advance();
            while self.peek().is_ascii_hexdigit() {
                self.advance();
            }
        } else {
            while self.peek().is_ascii_digit() {
                self.advance();
            }
        }

        let text: String = self.source[self.start..self.current].iter().collect();
        let parsed = if hex {
            i64::from_str_radix(&text[2..], 16)
        } else {
            text.parse()
        };
        let value = parsed.map_err(|_| Error::SyntaxError {
            line: self.line,
            col: self.start_column,
            message: format!("Invalid integer: {}", text),
        })?;

        self.add_token(TokenKind::Integer(value));
        Ok(())
    }

    fn scan_keyword(&mut self) -> Result<()> {
        while is_symbol_char(self.peek()) || self.peek().is_ascii_digit() {
            self.advance();
        }

        let text: String = self.source[self.start + 1..self.current].iter().collect();
        if text.is_empty() {
            return Err(Error::SyntaxError {
                line: self.line,
                col: self.start_column,
                message: "Expected keyword name after ':'".to_string(),
            });
        }
        self.add_token(TokenKind::Keyword(text));
        Ok(())
    }

    fn scan_symbol(&mut self) {
        while is_symbol_char(self.peek()) || self.peek().is_ascii_digit() {
            self.advance();
        }

        let text: String = self.source[self.start..self.current].iter().collect();
        let kind = match text.as_str() {
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            _ => TokenKind::Identifier(text),
        };
        self.add_token(kind);
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.source.len()
    }

    fn advance(&mut self) -> char {
        let c = self.source[self.current];
        self.current += 1;
        self.column += 1;
        c
    }

    fn peek(&self) -> char {
        if self.is_at_end() {
            '\0'
        } else {
            self.source[self.current]
        }
    }

    fn add_token(&mut self, kind: TokenKind) {
        let lexeme: String = self.source[self.start..self.current].iter().collect();
        self.tokens
            .push(Token::new(kind, lexeme, self.line, self.start_column));
    }
}

fn is_symbol_char(c: char) -> bool {
    c.is_ascii_alphabetic()
        || matches!(
            c,
            '_' | '-' | '+' | '*' | '/' | '%' | '<' | '>' | '=' | '!' | '&' | '|' | '^' | '~' | '.' | '?'
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_sexpr() {
        let mut scanner = SExprScanner::new("(+ 1 2)");
        let tokens = scanner.scan_tokens().unwrap();

        assert_eq!(tokens.len(), 6); // ( + 1 2 ) EOF
        assert_eq!(tokens[0].kind, TokenKind::LeftParen);
        assert_eq!(tokens[1].kind, TokenKind::Identifier("+".to_string()));
        assert_eq!(tokens[2].kind, TokenKind::Integer(1));
        assert_eq!(tokens[3].kind, TokenKind::Integer(2));
        assert_eq!(tokens[4].kind, TokenKind::RightParen);
        assert_eq!(tokens[5].kind, TokenKind::Eof);
    }

    #[test]
    fn test_keywords_and_positions() {
        let mut scanner = SExprScanner::new("(defprogram p\n  :kind xdp)");
        let tokens = scanner.scan_tokens().unwrap();

        assert_eq!(tokens[3].kind, TokenKind::Keyword("kind".to_string()));
        assert_eq!(tokens[3].line, 2);
        assert_eq!(tokens[3].column, 3);
    }

    #[test]
    fn test_hex_and_negative_numbers() {
        let mut scanner = SExprScanner::new("0xff -12 x-1");
        let tokens = scanner.scan_tokens().unwrap();

        assert_eq!(tokens[0].kind, TokenKind::Integer(255));
        assert_eq!(tokens[1].kind, TokenKind::Integer(-12));
        assert_eq!(tokens[2].kind, TokenKind::Identifier("x-1".to_string()));
    }

    #[test]
    fn test_comment() {
        let mut scanner = SExprScanner::new("; shared settings\n(defconfig S)");
        let tokens = scanner.scan_tokens().unwrap();

        assert_eq!(tokens[0].kind, TokenKind::LeftParen);
        assert_eq!(tokens[1].line, 2);
    }

    #[test]
    fn test_unterminated_string() {
        let mut scanner = SExprScanner::new("(:attach \"eth0)");
        assert!(matches!(
            scanner.scan_tokens(),
            Err(Error::SyntaxError { .. })
        ));
    }
}
