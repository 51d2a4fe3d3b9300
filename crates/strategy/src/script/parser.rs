use super::ast::*;
use super::lexer::{Token, TokenKind};
use super::LoadError;

/// Deepest nesting of expressions and blocks the parser accepts.
pub const MAX_DEPTH: usize = 64;

/// Recursive-descent parser over the token stream produced by `tokenize`.
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

type PResult<T> = Result<T, LoadError>;

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    /// `program := NEWLINE* unit EOF`
    pub fn parse_program(mut self) -> PResult<Program> {
        self.skip_newlines();
        let program = self.parse_unit()?;
        self.skip_newlines();
        let tok = self.peek().clone();
        match tok.kind {
            TokenKind::Eof => Ok(program),
            TokenKind::Strategy => Err(LoadError::rejected(
                tok.line,
                tok.column,
                "only one strategy may be declared",
            )),
            other => Err(LoadError::syntax(
                tok.line,
                tok.column,
                format!("unexpected {} after strategy body", other.describe()),
            )),
        }
    }

    // ─── Token helpers ────────────────────────────────────────────────────────

    fn peek(&self) -> &Token {
        // The lexer always ends the stream with Eof.
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, context: &str) -> PResult<Token> {
        if self.check(&kind) {
            return Ok(self.advance());
        }
        let tok = self.peek();
        Err(LoadError::syntax(
            tok.line,
            tok.column,
            format!(
                "expected {} {context}, found {}",
                kind.describe(),
                tok.kind.describe()
            ),
        ))
    }

    fn expect_ident(&mut self, context: &str) -> PResult<(String, Token)> {
        let tok = self.peek().clone();
        match tok.kind {
            TokenKind::Ident(ref name) => {
                let name = name.clone();
                self.advance();
                Ok((name, tok))
            }
            ref other => Err(LoadError::syntax(
                tok.line,
                tok.column,
                format!("expected identifier {context}, found {}", other.describe()),
            )),
        }
    }

    fn skip_newlines(&mut self) {
        while self.eat(&TokenKind::Newline) {}
    }

    /// Enter one nesting level. Bounds recursion here and in every later
    /// pass over the tree.
    fn descend(&mut self, what: &str) -> PResult<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            let tok = self.peek();
            return Err(LoadError::syntax(
                tok.line,
                tok.column,
                format!("{what} nested too deeply"),
            ));
        }
        Ok(())
    }

    // ─── Unit ─────────────────────────────────────────────────────────────────

    /// `unit := "strategy" NAME ":" NEWLINE INDENT member+ DEDENT`
    fn parse_unit(&mut self) -> PResult<Program> {
        let head = self.peek().clone();
        if head.kind != TokenKind::Strategy {
            return Err(LoadError::syntax(
                head.line,
                head.column,
                format!("expected 'strategy' declaration, found {}", head.kind.describe()),
            ));
        }
        self.advance();
        let (name, _) = self.expect_ident("after 'strategy'")?;
        self.expect(TokenKind::Colon, "after strategy name")?;
        self.expect(TokenKind::Newline, "after ':'")?;
        self.expect(TokenKind::Indent, "to open strategy body")?;

        let mut state: Vec<StateDecl> = Vec::new();
        let mut on_bar: Option<Handler> = None;

        while !self.check(&TokenKind::Dedent) && !self.check(&TokenKind::Eof) {
            let tok = self.peek().clone();
            match &tok.kind {
                TokenKind::State => {
                    let decl = self.parse_state_decl()?;
                    if state.iter().any(|s| s.name == decl.name) {
                        return Err(LoadError::rejected(
                            decl.line,
                            decl.column,
                            format!("state '{}' declared twice", decl.name),
                        ));
                    }
                    state.push(decl);
                }
                TokenKind::Ident(name) if name == "on_bar" => {
                    if on_bar.is_some() {
                        return Err(LoadError::rejected(
                            tok.line,
                            tok.column,
                            "on_bar declared twice",
                        ));
                    }
                    on_bar = Some(self.parse_handler()?);
                }
                TokenKind::Newline => {
                    self.advance();
                }
                other => {
                    return Err(LoadError::syntax(
                        tok.line,
                        tok.column,
                        format!(
                            "expected 'state' or 'on_bar(bar):' in strategy body, found {}",
                            other.describe()
                        ),
                    ))
                }
            }
        }
        self.eat(&TokenKind::Dedent);

        let on_bar = on_bar.ok_or_else(|| {
            LoadError::rejected(
                head.line,
                head.column,
                format!("strategy '{name}' has no on_bar handler"),
            )
        })?;

        Ok(Program {
            name,
            line: head.line,
            state,
            on_bar,
        })
    }

    /// `state NAME = literal NEWLINE`
    fn parse_state_decl(&mut self) -> PResult<StateDecl> {
        let kw = self.advance();
        let (name, _) = self.expect_ident("after 'state'")?;
        self.expect(TokenKind::Assign, "after state name")?;
        let tok = self.peek().clone();
        let negative = self.eat(&TokenKind::Minus);
        let init = match self.advance().kind {
            TokenKind::Number(n) => Literal::Number(if negative { -n } else { n }),
            TokenKind::Str(s) if !negative => Literal::Str(s),
            TokenKind::True if !negative => Literal::Bool(true),
            TokenKind::False if !negative => Literal::Bool(false),
            TokenKind::None if !negative => Literal::None,
            _ => {
                return Err(LoadError::rejected(
                    tok.line,
                    tok.column,
                    format!("state '{name}' must be initialised with a literal"),
                ))
            }
        };
        self.expect(TokenKind::Newline, "after state declaration")?;
        Ok(StateDecl {
            name,
            init,
            line: kw.line,
            column: kw.column,
        })
    }

    /// `"on_bar" "(" NAME ")" ":" block`
    fn parse_handler(&mut self) -> PResult<Handler> {
        let head = self.advance();
        self.expect(TokenKind::LParen, "after 'on_bar'")?;
        let (param, _) = self.expect_ident("as on_bar parameter")?;
        self.expect(TokenKind::RParen, "after on_bar parameter")?;
        self.expect(TokenKind::Colon, "after on_bar signature")?;
        let body = self.parse_block()?;
        Ok(Handler {
            param,
            body,
            line: head.line,
        })
    }

    // ─── Statements ───────────────────────────────────────────────────────────

    /// `block := NEWLINE INDENT stmt+ DEDENT`
    fn parse_block(&mut self) -> PResult<Vec<Stmt>> {
        self.expect(TokenKind::Newline, "after ':'")?;
        self.expect(TokenKind::Indent, "to open block")?;
        self.descend("blocks")?;
        let mut body = Vec::new();
        while !self.check(&TokenKind::Dedent) && !self.check(&TokenKind::Eof) {
            body.push(self.parse_stmt()?);
        }
        self.eat(&TokenKind::Dedent);
        self.depth -= 1;
        Ok(body)
    }

    fn parse_stmt(&mut self) -> PResult<Stmt> {
        let tok = self.peek().clone();
        let (line, column) = (tok.line, tok.column);
        let kind = match tok.kind {
            TokenKind::Let => {
                self.advance();
                let (name, _) = self.expect_ident("after 'let'")?;
                self.expect(TokenKind::Assign, "after variable name")?;
                let value = self.parse_expr()?;
                self.expect(TokenKind::Newline, "after expression")?;
                StmtKind::Let { name, value }
            }
            TokenKind::State => {
                self.advance();
                self.expect(TokenKind::Dot, "after 'state'")?;
                let (key, _) = self.expect_ident("after 'state.'")?;
                self.expect(TokenKind::Assign, "in state assignment")?;
                let value = self.parse_expr()?;
                self.expect(TokenKind::Newline, "after expression")?;
                StmtKind::SetState { key, value }
            }
            TokenKind::If => return self.parse_if(),
            TokenKind::Return => {
                self.advance();
                let value = if self.check(&TokenKind::Newline) {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                self.expect(TokenKind::Newline, "after return value")?;
                StmtKind::Return(value)
            }
            TokenKind::Pass => {
                self.advance();
                self.expect(TokenKind::Newline, "after 'pass'")?;
                StmtKind::Pass
            }
            TokenKind::Elif | TokenKind::Else => {
                return Err(LoadError::syntax(
                    line,
                    column,
                    format!("{} without a matching 'if'", tok.kind.describe()),
                ))
            }
            _ => {
                let target = self.parse_expr()?;
                if !self.check(&TokenKind::Assign) {
                    return Err(LoadError::syntax(
                        line,
                        column,
                        "expression statement has no effect; expected an assignment, 'if' or 'return'",
                    ));
                }
                self.advance();
                let name = match target.kind {
                    ExprKind::Name(name) => name,
                    _ => {
                        return Err(LoadError::syntax(
                            line,
                            column,
                            "only local names and state.<key> can be assigned",
                        ))
                    }
                };
                let value = self.parse_expr()?;
                self.expect(TokenKind::Newline, "after expression")?;
                StmtKind::Assign { name, value }
            }
        };
        Ok(Stmt { kind, line, column })
    }

    /// `if expr: block (elif expr: block)* (else: block)?`
    fn parse_if(&mut self) -> PResult<Stmt> {
        let head = self.advance();
        let mut branches = Vec::new();

        let cond = self.parse_expr()?;
        self.expect(TokenKind::Colon, "after if condition")?;
        branches.push((cond, self.parse_block()?));

        let mut otherwise = None;
        loop {
            if self.eat(&TokenKind::Elif) {
                let cond = self.parse_expr()?;
                self.expect(TokenKind::Colon, "after elif condition")?;
                branches.push((cond, self.parse_block()?));
            } else if self.eat(&TokenKind::Else) {
                self.expect(TokenKind::Colon, "after 'else'")?;
                otherwise = Some(self.parse_block()?);
                break;
            } else {
                break;
            }
        }

        Ok(Stmt {
            kind: StmtKind::If {
                branches,
                otherwise,
            },
            line: head.line,
            column: head.column,
        })
    }

    // ─── Expressions ──────────────────────────────────────────────────────────

    pub fn parse_expr(&mut self) -> PResult<Expr> {
        self.descend("expression")?;
        let expr = self.parse_or()?;
        self.depth -= 1;
        Ok(expr)
    }

    fn binary(lhs: Expr, op: BinaryOp, rhs: Expr) -> Expr {
        let (line, column) = (lhs.line, lhs.column);
        Expr {
            kind: ExprKind::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            line,
            column,
        }
    }

    fn parse_or(&mut self) -> PResult<Expr> {
        let base = self.depth;
        let mut lhs = self.parse_and()?;
        while self.eat(&TokenKind::Or) {
            self.descend("expression")?;
            let rhs = self.parse_and()?;
            lhs = Self::binary(lhs, BinaryOp::Or, rhs);
        }
        self.depth = base;
        Ok(lhs)
    }

    fn parse_and(&mut self) -> PResult<Expr> {
        let base = self.depth;
        let mut lhs = self.parse_not()?;
        while self.eat(&TokenKind::And) {
            self.descend("expression")?;
            let rhs = self.parse_not()?;
            lhs = Self::binary(lhs, BinaryOp::And, rhs);
        }
        self.depth = base;
        Ok(lhs)
    }

    fn parse_not(&mut self) -> PResult<Expr> {
        if self.check(&TokenKind::Not) {
            let tok = self.advance();
            self.descend("expression")?;
            let operand = self.parse_not()?;
            self.depth -= 1;
            return Ok(Expr {
                kind: ExprKind::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                },
                line: tok.line,
                column: tok.column,
            });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> PResult<Expr> {
        let lhs = self.parse_additive()?;
        let op = match self.peek_kind() {
            TokenKind::Eq => BinaryOp::Eq,
            TokenKind::NotEq => BinaryOp::NotEq,
            TokenKind::Lt => BinaryOp::Lt,
            TokenKind::Le => BinaryOp::Le,
            TokenKind::Gt => BinaryOp::Gt,
            TokenKind::Ge => BinaryOp::Ge,
            _ => return Ok(lhs),
        };
        self.advance();
        let rhs = self.parse_additive()?;
        Ok(Self::binary(lhs, op, rhs))
    }

    fn parse_additive(&mut self) -> PResult<Expr> {
        let base = self.depth;
        let mut lhs = self.parse_term()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => {
                    self.depth = base;
                    return Ok(lhs);
                }
            };
            self.advance();
            self.descend("expression")?;
            let rhs = self.parse_term()?;
            lhs = Self::binary(lhs, op, rhs);
        }
    }

    fn parse_term(&mut self) -> PResult<Expr> {
        let base = self.depth;
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Rem,
                _ => {
                    self.depth = base;
                    return Ok(lhs);
                }
            };
            self.advance();
            self.descend("expression")?;
            let rhs = self.parse_unary()?;
            lhs = Self::binary(lhs, op, rhs);
        }
    }

    fn parse_unary(&mut self) -> PResult<Expr> {
        if self.check(&TokenKind::Minus) {
            let tok = self.advance();
            self.descend("expression")?;
            let operand = self.parse_unary()?;
            self.depth -= 1;
            return Ok(Expr {
                kind: ExprKind::Unary {
                    op: UnaryOp::Neg,
                    operand: Box::new(operand),
                },
                line: tok.line,
                column: tok.column,
            });
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> PResult<Expr> {
        let base = self.depth;
        let mut expr = self.parse_primary()?;
        loop {
            let (line, column) = (expr.line, expr.column);
            if matches!(self.peek_kind(), TokenKind::LBracket | TokenKind::Dot | TokenKind::LParen) {
                self.descend("expression")?;
            }
            if self.eat(&TokenKind::LBracket) {
                let index = self.parse_expr()?;
                self.expect(TokenKind::RBracket, "to close index")?;
                expr = Expr {
                    kind: ExprKind::Index {
                        target: Box::new(expr),
                        index: Box::new(index),
                    },
                    line,
                    column,
                };
            } else if self.eat(&TokenKind::Dot) {
                let (name, _) = self.expect_ident("after '.'")?;
                expr = Expr {
                    kind: ExprKind::Field {
                        target: Box::new(expr),
                        name,
                    },
                    line,
                    column,
                };
            } else if self.eat(&TokenKind::LParen) {
                let (args, kwargs) = self.parse_args()?;
                expr = Expr {
                    kind: ExprKind::Call {
                        func: Box::new(expr),
                        args,
                        kwargs,
                    },
                    line,
                    column,
                };
            } else {
                self.depth = base;
                return Ok(expr);
            }
        }
    }

    /// Arguments after an opening `(`. Keyword arguments follow positionals.
    fn parse_args(&mut self) -> PResult<(Vec<Expr>, Vec<(String, Expr)>)> {
        let mut args = Vec::new();
        let mut kwargs: Vec<(String, Expr)> = Vec::new();
        while !self.check(&TokenKind::RParen) {
            let tok = self.peek().clone();
            let is_kwarg = matches!(tok.kind, TokenKind::Ident(_))
                && self
                    .tokens
                    .get(self.pos + 1)
                    .is_some_and(|t| t.kind == TokenKind::Assign);
            if is_kwarg {
                let (name, _) = self.expect_ident("as keyword argument")?;
                self.advance(); // '='
                if kwargs.iter().any(|(k, _)| *k == name) {
                    return Err(LoadError::syntax(
                        tok.line,
                        tok.column,
                        format!("keyword argument '{name}' repeated"),
                    ));
                }
                kwargs.push((name, self.parse_expr()?));
            } else {
                if !kwargs.is_empty() {
                    return Err(LoadError::syntax(
                        tok.line,
                        tok.column,
                        "positional argument follows keyword argument",
                    ));
                }
                args.push(self.parse_expr()?);
            }
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen, "to close argument list")?;
        Ok((args, kwargs))
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        let tok = self.advance();
        let (line, column) = (tok.line, tok.column);
        let kind = match tok.kind {
            TokenKind::Number(n) => ExprKind::Literal(Literal::Number(n)),
            TokenKind::Str(s) => ExprKind::Literal(Literal::Str(s)),
            TokenKind::True => ExprKind::Literal(Literal::Bool(true)),
            TokenKind::False => ExprKind::Literal(Literal::Bool(false)),
            TokenKind::None => ExprKind::Literal(Literal::None),
            TokenKind::Ident(name) => ExprKind::Name(name),
            TokenKind::State => {
                self.expect(TokenKind::Dot, "after 'state'")?;
                let (key, _) = self.expect_ident("after 'state.'")?;
                ExprKind::State(key)
            }
            TokenKind::LParen => {
                let inner = self.parse_expr()?;
                self.expect(TokenKind::RParen, "to close '('")?;
                return Ok(inner);
            }
            other => {
                return Err(LoadError::syntax(
                    line,
                    column,
                    format!("expected expression, found {}", other.describe()),
                ))
            }
        };
        Ok(Expr { kind, line, column })
    }
}
