use super::ast::{
    BinaryOp, ConfigDecl, ConfigField, ConstDecl, Declaration, Expression, FunctionDecl, HookKind,
    MapDecl, MapType, Param, Program, ProgramDecl, Span, Statement, StructFieldExpr,
    TcDirection, TypeAliasDecl, TypeExpr, UnaryOp,
};
use crate::error::{Error, Result};
use crate::lexer::{Token, TokenKind};

/// S-expression parser for LISP-style Hookscript syntax
pub struct SExprParser {
    tokens: Vec<Token>,
    current: usize,
}

impl SExprParser {
    /// Creates a new S-expression parser
    pub fn new(tokens: Vec<Token>) -> Self {
        SExprParser { tokens, current: 0 }
    }

    /// Parses the tokens into a declaration list
    pub fn parse(&mut self) -> Result<Program> {
        let mut declarations = Vec::new();

        while !self.is_at_end() {
            declarations.push(self.parse_declaration()?);
        }

        Ok(Program { declarations })
    }

    /// Parse one top-level form
    fn parse_declaration(&mut self) -> Result<Declaration> {
        let span = self.span();
        self.consume(TokenKind::LeftParen, "`(` to start a declaration")?;
        let head = self.identifier("declaration keyword")?;

        let decl = match head.as_str() {
            "deftype" => Declaration::TypeAlias(self.parse_deftype(span)?),
            "defconst" => Declaration::Constant(self.parse_defconst(span)?),
            "defconfig" => Declaration::Config(self.parse_defconfig(span)?),
            "defmap" => Declaration::Map(self.parse_defmap(span)?),
            "defn" => Declaration::GlobalFunction(self.parse_defn(span)?),
            "defprogram" => Declaration::Program(self.parse_defprogram(span)?),
            other => {
                return Err(Error::SyntaxError {
                    line: span.line,
                    col: span.col,
                    message: format!(
                        "Unknown top-level form `{}`.\n\n\
                         Help: expected one of deftype, defconst, defconfig, defmap, defn, defprogram",
                        other
                    ),
                })
            }
        };

        self.consume(TokenKind::RightParen, "`)` to close the declaration")?;
        Ok(decl)
    }

    fn parse_deftype(&mut self, span: Span) -> Result<TypeAliasDecl> {
        let name = self.identifier("alias name")?;
        let ty = self.parse_type()?;
        Ok(TypeAliasDecl { name, ty, span })
    }

    fn parse_defconst(&mut self, span: Span) -> Result<ConstDecl> {
        let name = self.identifier("constant name")?;
        let value = self.integer("constant value")?;
        Ok(ConstDecl { name, value, span })
    }

    /// `(defconfig Name (field type [default]) ...)`
    fn parse_defconfig(&mut self, span: Span) -> Result<ConfigDecl> {
        let name = self.identifier("config name")?;
        let mut fields = Vec::new();

        while self.check(&TokenKind::LeftParen) {
            self.advance();
            let field_name = self.identifier("config field name")?;
            let ty = self.parse_type()?;
            let default = if let TokenKind::Integer(_) = self.peek().kind {
                Some(self.integer("default value")?)
            } else if matches!(self.peek().kind, TokenKind::True | TokenKind::False) {
                let value = self.peek().kind == TokenKind::True;
                self.advance();
                Some(value as i64)
            } else {
                None
            };
            self.consume(TokenKind::RightParen, "`)` after config field")?;
            fields.push(ConfigField {
                name: field_name,
                ty,
                default,
            });
        }

        Ok(ConfigDecl { name, fields, span })
    }

    /// `(defmap name :type hash :key u32 :value Counter :max-entries 1024)`
    fn parse_defmap(&mut self, span: Span) -> Result<MapDecl> {
        let name = self.identifier("map name")?;
        let mut map_type = None;
        let mut key = None;
        let mut value = None;
        let mut max_entries = None;

        while let TokenKind::Keyword(keyword) = self.peek().kind.clone() {
            let kw_span = self.span();
            self.advance();
            match keyword.as_str() {
                "type" => {
                    let tag = self.identifier("map type")?;
                    map_type = Some(MapType::parse(&tag).ok_or_else(|| Error::SyntaxError {
                        line: kw_span.line,
                        col: kw_span.col,
                        message: format!(
                            "Unknown map type `{}` (expected hash, array, lru-hash, percpu-array, ringbuf)",
                            tag
                        ),
                    })?);
                }
                "key" => key = Some(self.parse_type()?),
                "value" => value = Some(self.parse_type()?),
                "max-entries" => {
                    let n = self.integer("max entries")?;
                    max_entries = Some(u32::try_from(n).map_err(|_| Error::SyntaxError {
                        line: kw_span.line,
                        col: kw_span.col,
                        message: format!("Invalid map capacity {}", n),
                    })?);
                }
                other => {
                    return Err(Error::SyntaxError {
                        line: kw_span.line,
                        col: kw_span.col,
                        message: format!("Unknown map option `:{}`", other),
                    })
                }
            }
        }

        let missing = |what: &str| Error::SyntaxError {
            line: span.line,
            col: span.col,
            message: format!("Map `{}` is missing `:{}`", name, what),
        };
        let map_type = map_type.ok_or_else(|| missing("type"))?;
        let value = value.ok_or_else(|| missing("value"))?;
        if map_type != MapType::Ringbuf && key.is_none() {
            return Err(missing("key"));
        }
        let max_entries = max_entries.ok_or_else(|| missing("max-entries"))?;

        Ok(MapDecl {
            name,
            map_type,
            key,
            value,
            max_entries,
            span,
        })
    }

    /// `(defn name [(p T) ...] [RetType] body...)`
    fn parse_defn(&mut self, span: Span) -> Result<FunctionDecl> {
        let name = self.identifier("function name")?;
        self.consume(TokenKind::LeftBracket, "`[` to open the parameter list")?;
        let mut params = Vec::new();
        while self.check(&TokenKind::LeftParen) {
            self.advance();
            let param_name = self.identifier("parameter name")?;
            let ty = self.parse_type()?;
            self.consume(TokenKind::RightParen, "`)` after parameter")?;
            params.push(Param {
                name: param_name,
                ty,
            });
        }
        self.consume(TokenKind::RightBracket, "`]` to close the parameter list")?;

        let ret = if let TokenKind::Identifier(_) = self.peek().kind {
            Some(self.parse_type()?)
        } else if self.check(&TokenKind::LeftParen) && self.peek_head_is(&["array", "struct"]) {
            Some(self.parse_type()?)
        } else {
            None
        };

        let body = self.parse_body()?;
        Ok(FunctionDecl {
            name,
            params,
            ret,
            body,
            span,
        })
    }

    /// `(defprogram name :kind xdp :attach "eth0" [:priority n] [:direction ingress] forms...)`
    fn parse_defprogram(&mut self, span: Span) -> Result<ProgramDecl> {
        let name = self.identifier("program name")?;
        let mut kind = None;
        let mut attach = None;
        let mut priority = None;
        let mut direction = None;

        while let TokenKind::Keyword(keyword) = self.peek().kind.clone() {
            let kw_span = self.span();
            self.advance();
            match keyword.as_str() {
                "kind" => {
                    let tag = self.identifier("program kind")?;
                    kind = Some(HookKind::parse(&tag).ok_or_else(|| Error::SyntaxError {
                        line: kw_span.line,
                        col: kw_span.col,
                        message: format!("Unknown program kind `{}` (expected xdp, tc, kprobe)", tag),
                    })?);
                }
                "attach" => attach = Some(self.string("attach target")?),
                "priority" => {
                    let n = self.integer("priority")?;
                    priority = Some(u32::try_from(n).map_err(|_| Error::SyntaxError {
                        line: kw_span.line,
                        col: kw_span.col,
                        message: format!("Invalid priority {}", n),
                    })?);
                }
                "direction" => {
                    let tag = self.identifier("tc direction")?;
                    direction = Some(TcDirection::parse(&tag).ok_or_else(|| Error::SyntaxError {
                        line: kw_span.line,
                        col: kw_span.col,
                        message: format!("Unknown direction `{}` (expected ingress, egress)", tag),
                    })?);
                }
                other => {
                    return Err(Error::SyntaxError {
                        line: kw_span.line,
                        col: kw_span.col,
                        message: format!("Unknown program option `:{}`", other),
                    })
                }
            }
        }

        let kind = kind.ok_or_else(|| Error::SyntaxError {
            line: span.line,
            col: span.col,
            message: format!("Program `{}` is missing `:kind`", name),
        })?;
        let attach = attach.ok_or_else(|| Error::SyntaxError {
            line: span.line,
            col: span.col,
            message: format!("Program `{}` is missing `:attach`", name),
        })?;

        let mut functions = Vec::new();
        let mut maps = Vec::new();
        while self.check(&TokenKind::LeftParen) {
            let form_span = self.span();
            self.advance();
            let head = self.identifier("`defn` or `defmap`")?;
            match head.as_str() {
                "defn" => functions.push(self.parse_defn(form_span)?),
                "defmap" => maps.push(self.parse_defmap(form_span)?),
                other => {
                    return Err(Error::SyntaxError {
                        line: form_span.line,
                        col: form_span.col,
                        message: format!("Unexpected `{}` inside defprogram", other),
                    })
                }
            }
            self.consume(TokenKind::RightParen, "`)` to close the form")?;
        }

        if functions.is_empty() {
            return Err(Error::SyntaxError {
                line: span.line,
                col: span.col,
                message: format!("Program `{}` declares no entry function", name),
            });
        }

        Ok(ProgramDecl {
            name,
            kind,
            attach,
            priority,
            direction,
            functions,
            maps,
            span,
        })
    }

    /// Parse a type: `u32`, `Counter`, `(array u8 16)`, `(struct (a u32) ...)`
    fn parse_type(&mut self) -> Result<TypeExpr> {
        if let TokenKind::Identifier(name) = self.peek().kind.clone() {
            self.advance();
            return Ok(TypeExpr::Named(name));
        }

        self.consume(TokenKind::LeftParen, "a type")?;
        let head = self.identifier("`array` or `struct`")?;
        let ty = match head.as_str() {
            "array" => {
                let elem = self.parse_type()?;
                let count = self.integer("array length")?;
                if count <= 0 {
                    return Err(self.syntax_error(format!("Array length must be positive, got {}", count)));
                }
                TypeExpr::Array(Box::new(elem), count as usize)
            }
            "struct" => {
                let mut fields = Vec::new();
                while self.check(&TokenKind::LeftParen) {
                    self.advance();
                    let name = self.identifier("struct field name")?;
                    let ty = self.parse_type()?;
                    self.consume(TokenKind::RightParen, "`)` after struct field")?;
                    fields.push(StructFieldExpr { name, ty });
                }
                TypeExpr::Struct(fields)
            }
            other => return Err(self.syntax_error(format!("Unknown type constructor `{}`", other))),
        };
        self.consume(TokenKind::RightParen, "`)` to close the type")?;
        Ok(ty)
    }

    /// Statements until the enclosing `)`
    fn parse_body(&mut self) -> Result<Vec<Statement>> {
        let mut body = Vec::new();
        while !self.check(&TokenKind::RightParen) && !self.is_at_end() {
            body.push(self.parse_statement()?);
        }
        Ok(body)
    }

    fn parse_statement(&mut self) -> Result<Statement> {
        if !self.check(&TokenKind::LeftParen) {
            let expr = self.parse_expression()?;
            return Ok(Statement::Expression(expr));
        }

        let span = self.span();
        let head = match &self.peek_next().kind {
            TokenKind::Identifier(name) => name.clone(),
            _ => return Ok(Statement::Expression(self.parse_expression()?)),
        };

        match head.as_str() {
            "let" => {
                self.advance();
                self.advance();
                let (name, ty) = if self.check(&TokenKind::LeftParen) {
                    self.advance();
                    let name = self.identifier("variable name")?;
                    let ty = self.parse_type()?;
                    self.consume(TokenKind::RightParen, "`)` after typed binding")?;
                    (name, Some(ty))
                } else {
                    (self.identifier("variable name")?, None)
                };
                let value = self.parse_expression()?;
                self.consume(TokenKind::RightParen, "`)` to close let")?;
                Ok(Statement::Let {
                    name,
                    ty,
                    value,
                    resolved: None,
                    span,
                })
            }
            "set!" => {
                self.advance();
                self.advance();
                let name = self.identifier("assignment target")?;
                let value = self.parse_expression()?;
                self.consume(TokenKind::RightParen, "`)` to close set!")?;
                Ok(Statement::Assign { name, value, span })
            }
            "if" => {
                self.advance();
                self.advance();
                let condition = self.parse_expression()?;
                let then_branch = self.parse_branch()?;
                let else_branch = if self.check(&TokenKind::RightParen) {
                    None
                } else {
                    Some(self.parse_branch()?)
                };
                self.consume(TokenKind::RightParen, "`)` to close if")?;
                Ok(Statement::If {
                    condition,
                    then_branch,
                    else_branch,
                    span,
                })
            }
            "when" => {
                self.advance();
                self.advance();
                let condition = self.parse_expression()?;
                let then_branch = self.parse_body()?;
                self.consume(TokenKind::RightParen, "`)` to close when")?;
                Ok(Statement::If {
                    condition,
                    then_branch,
                    else_branch: None,
                    span,
                })
            }
            "for" => {
                self.advance();
                self.advance();
                self.consume(TokenKind::LeftParen, "`(` to open the loop range")?;
                let variable = self.identifier("loop variable")?;
                let start = self.integer("loop start")?;
                let end = self.integer("loop end")?;
                self.consume(TokenKind::RightParen, "`)` to close the loop range")?;
                let body = self.parse_body()?;
                self.consume(TokenKind::RightParen, "`)` to close for")?;
                Ok(Statement::For {
                    variable,
                    start,
                    end,
                    body,
                    span,
                })
            }
            "return" => {
                self.advance();
                self.advance();
                let value = if self.check(&TokenKind::RightParen) {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                self.consume(TokenKind::RightParen, "`)` to close return")?;
                Ok(Statement::Return { value, span })
            }
            _ => Ok(Statement::Expression(self.parse_expression()?)),
        }
    }

    /// A branch of `if`: `(do ...)` block or a single statement
    fn parse_branch(&mut self) -> Result<Vec<Statement>> {
        if self.check(&TokenKind::LeftParen) && self.peek_head_is(&["do"]) {
            self.advance();
            self.advance();
            let body = self.parse_body()?;
            self.consume(TokenKind::RightParen, "`)` to close do")?;
            Ok(body)
        } else {
            Ok(vec![self.parse_statement()?])
        }
    }

    fn parse_expression(&mut self) -> Result<Expression> {
        let span = self.span();
        match self.peek().kind.clone() {
            TokenKind::Integer(n) => {
                self.advance();
                Ok(Expression::IntLiteral(n, span))
            }
            TokenKind::True => {
                self.advance();
                Ok(Expression::BoolLiteral(true, span))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expression::BoolLiteral(false, span))
            }
            TokenKind::Identifier(name) => {
                self.advance();
                Ok(Expression::Variable(name, span))
            }
            TokenKind::LeftParen => self.parse_list(),
            other => Err(Error::UnexpectedToken {
                expected: "expression".to_string(),
                got: other.describe(),
                line: span.line,
                col: span.col,
            }),
        }
    }

    /// Parse a list form
    fn parse_list(&mut self) -> Result<Expression> {
        let span = self.span();
        self.consume(TokenKind::LeftParen, "`(`")?;
        let head = self.identifier("operator or function name")?;

        let expr = match head.as_str() {
            "." => {
                let base = self.parse_expression()?;
                let field = self.identifier("field name")?;
                Expression::Field {
                    base: Box::new(base),
                    field,
                    span,
                }
            }
            "make" => {
                let type_name = self.identifier("struct type name")?;
                let mut fields = Vec::new();
                while let TokenKind::Keyword(field) = self.peek().kind.clone() {
                    self.advance();
                    let value = self.parse_expression()?;
                    fields.push((field, value));
                }
                Expression::Make {
                    type_name,
                    fields,
                    span,
                }
            }
            "not" | "~" => {
                let operand = self.parse_expression()?;
                let op = if head == "not" {
                    UnaryOp::Not
                } else {
                    UnaryOp::BitNot
                };
                Expression::Unary {
                    op,
                    operand: Box::new(operand),
                    span,
                }
            }
            op if BinaryOp::parse(op).is_some() => {
                let op = BinaryOp::parse(op).ok_or_else(|| self.syntax_error("operator"))?;
                let mut operands = Vec::new();
                while !self.check(&TokenKind::RightParen) && !self.is_at_end() {
                    operands.push(self.parse_expression()?);
                }
                self.fold_operands(op, operands, span)?
            }
            _ => {
                let mut args = Vec::new();
                while !self.check(&TokenKind::RightParen) && !self.is_at_end() {
                    args.push(self.parse_expression()?);
                }
                Expression::Call {
                    name: head,
                    args,
                    span,
                }
            }
        };

        self.consume(TokenKind::RightParen, "`)` to close the expression")?;
        Ok(expr)
    }

    /// Left-fold operands of a variadic operator; `(- x)` is negation
    fn fold_operands(
        &self,
        op: BinaryOp,
        operands: Vec<Expression>,
        span: Span,
    ) -> Result<Expression> {
        let mut iter = operands.into_iter();
        let first = iter.next().ok_or_else(|| Error::SyntaxError {
            line: span.line,
            col: span.col,
            message: format!("Operator `{}` needs operands", op.c_symbol()),
        })?;
        let rest: Vec<Expression> = iter.collect();

        if rest.is_empty() {
            if op == BinaryOp::Sub {
                return Ok(Expression::Unary {
                    op: UnaryOp::Neg,
                    operand: Box::new(first),
                    span,
                });
            }
            return Err(Error::SyntaxError {
                line: span.line,
                col: span.col,
                message: format!("Operator `{}` needs two operands", op.c_symbol()),
            });
        }
        if rest.len() > 1 && !op.is_variadic() && op != BinaryOp::Sub {
            return Err(Error::SyntaxError {
                line: span.line,
                col: span.col,
                message: format!("Operator `{}` takes exactly two operands", op.c_symbol()),
            });
        }

        Ok(rest.into_iter().fold(first, |acc, right| Expression::Binary {
            op,
            left: Box::new(acc),
            right: Box::new(right),
            span,
        }))
    }

    // Helper methods

    fn peek(&self) -> &Token {
        &self.tokens[self.current.min(self.tokens.len() - 1)]
    }

    fn peek_next(&self) -> &Token {
        &self.tokens[(self.current + 1).min(self.tokens.len() - 1)]
    }

    fn peek_head_is(&self, names: &[&str]) -> bool {
        matches!(&self.peek_next().kind, TokenKind::Identifier(n) if names.contains(&n.as_str()))
    }

    fn span(&self) -> Span {
        let token = self.peek();
        Span::new(token.line, token.column)
    }

    fn advance(&mut self) -> &Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        &self.tokens[self.current - 1]
    }

    fn is_at_end(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Eof)
    }

    fn check(&self, kind: &TokenKind) -> bool {
        &self.peek().kind == kind
    }

    fn consume(&mut self, kind: TokenKind, expected: &str) -> Result<()> {
        if self.check(&kind) {
            self.advance();
            Ok(())
        } else if self.is_at_end() {
            Err(Error::UnexpectedEof)
        } else {
            Err(self.expected(expected))
        }
    }

    fn identifier(&mut self, what: &str) -> Result<String> {
        if let TokenKind::Identifier(name) = self.peek().kind.clone() {
            self.advance();
            Ok(name)
        } else if self.is_at_end() {
            Err(Error::UnexpectedEof)
        } else {
            Err(self.expected(what))
        }
    }

    fn integer(&mut self, what: &str) -> Result<i64> {
        if let TokenKind::Integer(n) = self.peek().kind {
            self.advance();
            Ok(n)
        } else {
            Err(self.expected(what))
        }
    }

    fn string(&mut self, what: &str) -> Result<String> {
        if let TokenKind::String(s) = self.peek().kind.clone() {
            self.advance();
            Ok(s)
        } else {
            Err(self.expected(what))
        }
    }

    fn expected(&self, what: &str) -> Error {
        let token = self.peek();
        Error::UnexpectedToken {
            expected: what.to_string(),
            got: token.kind.describe(),
            line: token.line,
            col: token.column,
        }
    }

    fn syntax_error(&self, message: impl Into<String>) -> Error {
        let token = self.peek();
        Error::SyntaxError {
            line: token.line,
            col: token.column,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::SExprScanner;

    fn parse(source: &str) -> Result<Program> {
        let tokens = SExprScanner::new(source).scan_tokens()?;
        SExprParser::new(tokens).parse()
    }

    #[test]
    fn test_parse_program_with_options() {
        let program = parse(
            r#"
(defprogram filter :kind xdp :attach "eth0" :priority 2
  (defmap hits :type array :key u32 :value u64 :max-entries 4)
  (defn main []
    (return XDP_PASS)))
"#,
        )
        .unwrap();

        let Declaration::Program(p) = &program.declarations[0] else {
            panic!("expected program");
        };
        assert_eq!(p.kind, HookKind::Xdp);
        assert_eq!(p.attach, "eth0");
        assert_eq!(p.priority, Some(2));
        assert_eq!(p.maps.len(), 1);
        assert_eq!(p.entry().map(|f| f.name.as_str()), Some("main"));
    }

    #[test]
    fn test_parse_config_with_defaults() {
        let program = parse("(defconfig Settings (threshold u32 100) (enabled bool true))").unwrap();
        let Declaration::Config(c) = &program.declarations[0] else {
            panic!("expected config");
        };
        assert_eq!(c.fields.len(), 2);
        assert_eq!(c.fields[0].default, Some(100));
        assert_eq!(c.fields[1].default, Some(1));
    }

    #[test]
    fn test_parse_typed_let_and_folded_ops() {
        let program = parse(
            r#"
(defn helper [(x u32)] u32
  (let (total Counter) (+ x 1 2))
  (return total))
"#,
        )
        .unwrap();
        let Declaration::GlobalFunction(f) = &program.declarations[0] else {
            panic!("expected function");
        };
        assert_eq!(f.ret, Some(TypeExpr::Named("u32".to_string())));
        match &f.body[0] {
            Statement::Let { ty, value, .. } => {
                assert_eq!(ty, &Some(TypeExpr::Named("Counter".to_string())));
                assert!(matches!(value, Expression::Binary { op: BinaryOp::Add, .. }));
            }
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[test]
    fn test_missing_kind_is_error() {
        let err = parse(r#"(defprogram p :attach "eth0" (defn main [] (return 0)))"#).unwrap_err();
        assert!(err.to_string().contains("missing `:kind`"));
    }

    #[test]
    fn test_unclosed_form_reports_eof() {
        let err = parse("(defconfig Settings (threshold u32)").unwrap_err();
        assert!(matches!(err, Error::UnexpectedEof));
    }
}
