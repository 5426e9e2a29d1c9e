use super::ast::*;
use super::error::CompileError;
use super::lexer::{Kind, Token};

/// Parse a complete token list (as produced by `lex`) into a [`Program`].
/// The first syntax error aborts the unit.
pub fn parse(source: &str, tokens: Vec<Token>) -> Result<Program, CompileError> {
    let mut parser = Parser::new(source, tokens);
    parser.parse_program()
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    next_node: u32,
    decls: Vec<Declaration>,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str, tokens: Vec<Token>) -> Self {
        Self {
            source,
            tokens,
            pos: 0,
            next_node: 0,
            decls: Vec::new(),
        }
    }

    fn parse_program(&mut self) -> Result<Program, CompileError> {
        let first_token = self.current();
        let name = self.expect_ident()?;
        let mut params = Vec::new();
        if self.peek() != Kind::LBrace {
            params.push(self.parse_param_dec()?);
            while self.eat(Kind::Comma) {
                params.push(self.parse_param_dec()?);
            }
        }
        let block = self.parse_block()?;
        if self.peek() != Kind::Eof {
            return Err(self.unexpected("end of input"));
        }
        Ok(Program {
            name,
            first_token,
            params,
            block,
            decls: std::mem::take(&mut self.decls),
            node_count: self.next_node,
        })
    }

    // ── Helpers ────────────────────────────────────────────────────

    fn current(&self) -> Token {
        // `lex` guarantees a trailing Eof, so falling off the end means Eof.
        self.tokens.get(self.pos).copied().unwrap_or(Token {
            kind: Kind::Eof,
            span: Span::new(self.source.len(), self.source.len()),
            line: 0,
            column: 0,
        })
    }

    fn peek(&self) -> Kind {
        self.tokens.get(self.pos).map_or(Kind::Eof, |t| t.kind)
    }

    /// Kind of the token after the current one, without consuming anything.
    fn lookahead(&self) -> Kind {
        self.tokens.get(self.pos + 1).map_or(Kind::Eof, |t| t.kind)
    }

    fn advance(&mut self) -> Token {
        let tok = self.current();
        if self.pos < self.tokens.len().saturating_sub(1) {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, kind: Kind) -> bool {
        if self.peek() == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Kind) -> Result<Token, CompileError> {
        if self.peek() == expected {
            Ok(self.advance())
        } else {
            Err(self.unexpected(expected.describe()))
        }
    }

    fn expect_ident(&mut self) -> Result<String, CompileError> {
        let tok = self.expect(Kind::Ident)?;
        Ok(tok.text(self.source).to_string())
    }

    fn unexpected(&self, expected: &str) -> CompileError {
        let tok = self.current();
        let found = match tok.kind {
            Kind::Ident | Kind::IntLit => {
                format!("{} '{}'", tok.kind.describe(), tok.text(self.source))
            }
            other => other.describe().to_string(),
        };
        CompileError::syntax(format!("expected {expected}, found {found}"), tok.span)
    }

    fn node_id(&mut self) -> NodeId {
        let id = NodeId(self.next_node);
        self.next_node += 1;
        id
    }

    fn declare(&mut self, name: String, ty: TypeName, kind: DecKind, first_token: Token) -> DecId {
        let id = DecId(u32::try_from(self.decls.len()).unwrap_or(u32::MAX));
        self.decls.push(Declaration {
            id,
            name,
            ty,
            kind,
            first_token,
        });
        id
    }

    // ── Declarations ──────────────────────────────────────────────

    fn parse_param_dec(&mut self) -> Result<DecId, CompileError> {
        let first_token = self.current();
        let ty = match first_token.kind {
            Kind::KwUrl | Kind::KwFile | Kind::KwInteger | Kind::KwBoolean => {
                TypeName::from_kind(first_token.kind)
            }
            _ => None,
        }
        .ok_or_else(|| self.unexpected("parameter type (url, file, integer or boolean)"))?;
        self.advance();
        let name = self.expect_ident()?;
        Ok(self.declare(name, ty, DecKind::Param, first_token))
    }

    fn parse_dec(&mut self) -> Result<LocalDec, CompileError> {
        let first_token = self.advance();
        let ty = TypeName::from_kind(first_token.kind)
            .ok_or_else(|| CompileError::syntax("expected declaration type", first_token.span))?;
        let name = self.expect_ident()?;
        let dec = self.declare(name, ty, DecKind::Local, first_token);
        let init = if self.eat(Kind::Assign) {
            Some(self.parse_expr()?)
        } else {
            None
        };
        self.eat(Kind::Semi);
        Ok(LocalDec {
            dec,
            init,
            first_token,
        })
    }

    // ── Statements ────────────────────────────────────────────────

    fn parse_block(&mut self) -> Result<Block, CompileError> {
        let first_token = self.expect(Kind::LBrace)?;
        let mut items = Vec::new();
        loop {
            match self.peek() {
                Kind::KwInteger | Kind::KwBoolean | Kind::KwImage | Kind::KwFrame => {
                    items.push(BlockItem::Dec(self.parse_dec()?));
                }
                k if starts_statement(k) => items.push(BlockItem::Stmt(self.parse_statement()?)),
                _ => break,
            }
        }
        self.expect(Kind::RBrace)?;
        Ok(Block { first_token, items })
    }

    fn parse_statement(&mut self) -> Result<Statement, CompileError> {
        let first_token = self.current();
        let kind = match first_token.kind {
            Kind::OpSleep => {
                self.advance();
                let expr = self.parse_expr()?;
                self.expect(Kind::Semi)?;
                StatementKind::Sleep(expr)
            }
            Kind::KwWhile | Kind::KwIf => {
                self.advance();
                self.expect(Kind::LParen)?;
                let cond = self.parse_expr()?;
                self.expect(Kind::RParen)?;
                let body = self.parse_block()?;
                if first_token.kind == Kind::KwWhile {
                    StatementKind::While { cond, body }
                } else {
                    StatementKind::If { cond, body }
                }
            }
            Kind::Ident if self.lookahead() == Kind::Assign => {
                self.advance();
                let target = IdentLValue {
                    id: self.node_id(),
                    name: first_token.text(self.source).to_string(),
                    first_token,
                };
                self.advance();
                let value = self.parse_expr()?;
                self.expect(Kind::Semi)?;
                StatementKind::Assign { target, value }
            }
            _ => {
                let chain = self.parse_chain()?;
                self.expect(Kind::Semi)?;
                StatementKind::Chain(chain)
            }
        };
        Ok(Statement { first_token, kind })
    }

    // ── Chains ────────────────────────────────────────────────────

    fn parse_chain(&mut self) -> Result<Chain, CompileError> {
        let first_token = self.current();
        let mut left = self.parse_chain_elem()?;
        if !matches!(self.peek(), Kind::Arrow | Kind::BarArrow) {
            return Err(self.unexpected("'->' or '|->'"));
        }
        while matches!(self.peek(), Kind::Arrow | Kind::BarArrow) {
            let op_token = self.advance();
            let op = if op_token.kind == Kind::Arrow {
                FlowOp::Advance
            } else {
                FlowOp::Hold
            };
            let right = self.parse_chain_elem()?;
            left = Chain {
                id: self.node_id(),
                first_token,
                kind: ChainKind::Binary {
                    left: Box::new(left),
                    op,
                    op_token,
                    right: Box::new(right),
                },
            };
        }
        Ok(left)
    }

    fn parse_chain_elem(&mut self) -> Result<Chain, CompileError> {
        let first_token = self.current();
        let kind = match first_token.kind {
            Kind::Ident => {
                self.advance();
                ChainKind::Ident(first_token.text(self.source).to_string())
            }
            Kind::OpBlur | Kind::OpGray | Kind::OpConvolve => {
                self.advance();
                let op = match first_token.kind {
                    Kind::OpBlur => FilterOp::Blur,
                    Kind::OpGray => FilterOp::Gray,
                    _ => FilterOp::Convolve,
                };
                ChainKind::Filter {
                    op,
                    args: self.parse_arg()?,
                }
            }
            Kind::KwShow | Kind::KwHide | Kind::KwMove | Kind::KwXloc | Kind::KwYloc => {
                self.advance();
                let op = match first_token.kind {
                    Kind::KwShow => FrameOp::Show,
                    Kind::KwHide => FrameOp::Hide,
                    Kind::KwMove => FrameOp::Move,
                    Kind::KwXloc => FrameOp::Xloc,
                    _ => FrameOp::Yloc,
                };
                ChainKind::Frame {
                    op,
                    args: self.parse_arg()?,
                }
            }
            Kind::OpWidth | Kind::OpHeight | Kind::KwScale => {
                self.advance();
                let op = match first_token.kind {
                    Kind::OpWidth => ImageOp::Width,
                    Kind::OpHeight => ImageOp::Height,
                    _ => ImageOp::Scale,
                };
                ChainKind::Image {
                    op,
                    args: self.parse_arg()?,
                }
            }
            _ => return Err(self.unexpected("chain element")),
        };
        Ok(Chain {
            id: self.node_id(),
            first_token,
            kind,
        })
    }

    /// Optional parenthesized argument list of an operator element.
    fn parse_arg(&mut self) -> Result<Tuple, CompileError> {
        let first_token = self.current();
        let mut exprs = Vec::new();
        if self.eat(Kind::LParen) {
            exprs.push(self.parse_expr()?);
            while self.eat(Kind::Comma) {
                exprs.push(self.parse_expr()?);
            }
            self.expect(Kind::RParen)?;
        }
        Ok(Tuple { first_token, exprs })
    }

    // ── Expression parsing (precedence climbing) ──────────────────

    fn parse_expr(&mut self) -> Result<Expr, CompileError> {
        self.parse_level(0)
    }

    /// Level 0 is relational, 1 is `+ - |`, 2 is `* / & %`, 3 is a factor.
    /// Every level is left-associative.
    fn parse_level(&mut self, level: u8) -> Result<Expr, CompileError> {
        if level >= 3 {
            return self.parse_factor();
        }
        let first_token = self.current();
        let mut left = self.parse_level(level + 1)?;
        while let Some(op) = BinOp::from_kind(self.peek()).filter(|op| op_level(*op) == level) {
            self.advance();
            let right = self.parse_level(level + 1)?;
            left = Expr {
                id: self.node_id(),
                first_token,
                kind: ExprKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
            };
        }
        Ok(left)
    }

    fn parse_factor(&mut self) -> Result<Expr, CompileError> {
        let first_token = self.current();
        let kind = match first_token.kind {
            Kind::Ident => ExprKind::Ident(first_token.text(self.source).to_string()),
            Kind::IntLit => {
                let text = first_token.text(self.source);
                let value = text
                    .parse::<i32>()
                    .map_err(|_| CompileError::illegal_number(text, first_token.span))?;
                ExprKind::IntLit(value)
            }
            Kind::KwTrue => ExprKind::BoolLit(true),
            Kind::KwFalse => ExprKind::BoolLit(false),
            Kind::KwScreenWidth => ExprKind::Constant(ScreenConstant::Width),
            Kind::KwScreenHeight => ExprKind::Constant(ScreenConstant::Height),
            Kind::LParen => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(Kind::RParen)?;
                return Ok(inner);
            }
            _ => return Err(self.unexpected("expression")),
        };
        self.advance();
        Ok(Expr {
            id: self.node_id(),
            first_token,
            kind,
        })
    }
}

fn op_level(op: BinOp) -> u8 {
    match op {
        BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge | BinOp::Eq | BinOp::Ne => 0,
        BinOp::Add | BinOp::Sub | BinOp::Or => 1,
        BinOp::Mul | BinOp::Div | BinOp::And | BinOp::Mod => 2,
    }
}

fn starts_statement(kind: Kind) -> bool {
    matches!(
        kind,
        Kind::OpSleep
            | Kind::KwWhile
            | Kind::KwIf
            | Kind::Ident
            | Kind::OpBlur
            | Kind::OpGray
            | Kind::OpConvolve
            | Kind::KwShow
            | Kind::KwHide
            | Kind::KwMove
            | Kind::KwXloc
            | Kind::KwYloc
            | Kind::OpWidth
            | Kind::OpHeight
            | Kind::KwScale
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::dsl::error::ErrorKind;
    use crate::dsl::lexer::lex;

    fn parse_str(src: &str) -> Program {
        parse(src, lex(src).unwrap()).unwrap()
    }

    fn parse_err(src: &str) -> CompileError {
        parse(src, lex(src).unwrap()).unwrap_err()
    }

    fn only_stmt(program: &Program) -> &StatementKind {
        match program.block.items.as_slice() {
            [BlockItem::Stmt(s)] => &s.kind,
            other => panic!("expected one statement, got {other:?}"),
        }
    }

    /// Render an expression fully parenthesized.
    fn show(expr: &Expr) -> String {
        match &expr.kind {
            ExprKind::Binary { op, left, right } => {
                format!("({} {} {})", show(left), op.symbol(), show(right))
            }
            ExprKind::Ident(name) => name.clone(),
            ExprKind::IntLit(v) => v.to_string(),
            ExprKind::BoolLit(b) => b.to_string(),
            ExprKind::Constant(ScreenConstant::Width) => "screenwidth".into(),
            ExprKind::Constant(ScreenConstant::Height) => "screenheight".into(),
        }
    }

    fn assigned(src: &str) -> String {
        match only_stmt(&parse_str(src)) {
            StatementKind::Assign { value, .. } => show(value),
            other => panic!("expected assignment, got {other:?}"),
        }
    }

    #[test]
    fn empty_program() {
        let p = parse_str("prog {}");
        assert_eq!(p.name, "prog");
        assert!(p.params.is_empty());
        assert!(p.block.items.is_empty());
    }

    #[test]
    fn params_are_declared_in_order() {
        let p = parse_str("p url u, file f, integer n, boolean b {}");
        let names: Vec<(&str, TypeName, DecKind)> = p
            .params
            .iter()
            .map(|id| {
                let d = p.decl(*id).unwrap();
                (d.name.as_str(), d.ty, d.kind)
            })
            .collect();
        assert_eq!(
            names,
            vec![
                ("u", TypeName::Url, DecKind::Param),
                ("f", TypeName::File, DecKind::Param),
                ("n", TypeName::Integer, DecKind::Param),
                ("b", TypeName::Boolean, DecKind::Param),
            ]
        );
    }

    #[test]
    fn image_is_not_a_param_type() {
        let err = parse_err("p image i {}");
        assert_eq!(err.kind, ErrorKind::Syntax);
    }

    #[test]
    fn decs_with_and_without_initializer() {
        let p = parse_str("p { integer x integer y <- 1; image i; }");
        assert_eq!(p.block.items.len(), 3);
        assert_eq!(p.decls.len(), 3);
        match &p.block.items[1] {
            BlockItem::Dec(d) => assert!(d.init.is_some()),
            other => panic!("expected dec, got {other:?}"),
        }
        assert!(p.decls.iter().all(|d| d.kind == DecKind::Local));
    }

    #[test]
    fn precedence_and_left_association() {
        assert_eq!(assigned("p { x <- 1 + 2 * 3; }"), "(1 + (2 * 3))");
        assert_eq!(assigned("p { x <- 1 - 2 - 3; }"), "((1 - 2) - 3)");
        assert_eq!(assigned("p { x <- a < b == c; }"), "((a < b) == c)");
        assert_eq!(assigned("p { x <- (1 + 2) * 3; }"), "((1 + 2) * 3)");
        assert_eq!(assigned("p { x <- a | b & c; }"), "(a | (b & c))");
        assert_eq!(
            assigned("p { x <- screenwidth % 2 >= true; }"),
            "((screenwidth % 2) >= true)"
        );
    }

    #[test]
    fn ident_statement_disambiguation() {
        let p = parse_str("p { x <- 1; x -> y; }");
        assert!(matches!(
            &p.block.items[0],
            BlockItem::Stmt(Statement { kind: StatementKind::Assign { .. }, .. })
        ));
        assert!(matches!(
            &p.block.items[1],
            BlockItem::Stmt(Statement { kind: StatementKind::Chain(_), .. })
        ));
    }

    #[test]
    fn chains_associate_left() {
        let p = parse_str("p { a -> blur |-> move(1, 2) -> b; }");
        let StatementKind::Chain(chain) = only_stmt(&p) else {
            panic!("expected chain");
        };
        let ChainKind::Binary { left, op, right, .. } = &chain.kind else {
            panic!("expected binary chain");
        };
        assert_eq!(*op, FlowOp::Advance);
        assert!(matches!(&right.kind, ChainKind::Ident(n) if n == "b"));
        let ChainKind::Binary { left: inner, op, right, .. } = &left.kind else {
            panic!("expected nested binary chain");
        };
        assert_eq!(*op, FlowOp::Hold);
        assert!(matches!(&right.kind, ChainKind::Frame { op: FrameOp::Move, args } if args.exprs.len() == 2));
        assert!(matches!(&inner.kind, ChainKind::Binary { op: FlowOp::Advance, .. }));
    }

    #[test]
    fn operator_may_start_a_chain() {
        let p = parse_str("p { width -> x; }");
        assert!(matches!(only_stmt(&p), StatementKind::Chain(_)));
    }

    #[test]
    fn chain_needs_an_arrow() {
        let err = parse_err("p { blur; }");
        assert_eq!(err.kind, ErrorKind::Syntax);
        assert!(err.message.contains("'->'"), "{}", err.message);
    }

    #[test]
    fn control_statements() {
        let p = parse_str("p { while (x < 3) { sleep 5; } if (true) { } }");
        assert!(matches!(
            &p.block.items[0],
            BlockItem::Stmt(Statement { kind: StatementKind::While { .. }, .. })
        ));
        assert!(matches!(
            &p.block.items[1],
            BlockItem::Stmt(Statement { kind: StatementKind::If { .. }, .. })
        ));
    }

    #[test]
    fn missing_semicolon_is_reported_at_next_token() {
        let src = "p { x <- 1 }";
        let err = parse_err(src);
        assert_eq!(err.kind, ErrorKind::Syntax);
        assert_eq!(err.message, "expected ';', found '}'");
        assert_eq!(err.span.start, 11);
    }

    #[test]
    fn unmatched_brace() {
        let err = parse_err("p { if (true) { }");
        assert_eq!(err.message, "expected '}', found end of input");
    }

    #[test]
    fn trailing_tokens_are_rejected() {
        let err = parse_err("p { } x");
        assert_eq!(err.message, "expected end of input, found identifier 'x'");
    }

    #[test]
    fn node_ids_are_unique() {
        let p = parse_str("p { x <- 1 + 2; a -> b -> c; }");
        assert_eq!(p.node_count, 9);
    }
}
