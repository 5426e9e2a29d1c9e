use super::ast::*;
use super::error::CompileError;
use super::symtab::SymbolTable;

/// Resolve every identifier and type every expression and chain node.
///
/// Errors are collected per statement, so one bad statement does not hide
/// problems in the rest of the unit.
pub fn type_check(program: &Program) -> Result<Annotations, Vec<CompileError>> {
    let mut ctx = TypeContext::new(program);
    ctx.check_program();
    if ctx.errors.is_empty() {
        Ok(ctx.annotations)
    } else {
        Err(ctx.errors)
    }
}

struct TypeContext<'a> {
    program: &'a Program,
    symbols: SymbolTable,
    annotations: Annotations,
    errors: Vec<CompileError>,
}

impl<'a> TypeContext<'a> {
    fn new(program: &'a Program) -> Self {
        Self {
            program,
            symbols: SymbolTable::new(),
            annotations: Annotations::new(),
            errors: Vec::new(),
        }
    }

    fn check_program(&mut self) {
        let program = self.program;
        for &id in &program.params {
            if let Err(e) = self.declare(id) {
                self.errors.push(e);
            }
        }
        self.check_block(&program.block);
    }

    fn decl(&self, id: DecId, span: Span) -> Result<&'a Declaration, CompileError> {
        let program: &'a Program = self.program;
        program
            .decl(id)
            .ok_or_else(|| CompileError::internal(format!("unknown declaration #{}", id.0), span))
    }

    fn declare(&mut self, id: DecId) -> Result<(), CompileError> {
        let dec = self.decl(id, Span::default())?;
        if self.symbols.insert(&dec.name, id) {
            Ok(())
        } else {
            Err(CompileError::semantic(
                format!("'{}' is already declared in this scope", dec.name),
                dec.first_token.span,
            ))
        }
    }

    fn resolve(&mut self, node: NodeId, name: &str, span: Span) -> Result<&'a Declaration, CompileError> {
        let id = self
            .symbols
            .lookup(name)
            .ok_or_else(|| CompileError::semantic(format!("'{name}' is not declared"), span))?;
        self.annotations.bind(node, id);
        self.decl(id, span)
    }

    // ── Statements ────────────────────────────────────────────────

    fn check_block(&mut self, block: &Block) {
        self.symbols.enter_scope();
        for item in &block.items {
            let result = match item {
                BlockItem::Dec(dec) => self.check_dec(dec),
                BlockItem::Stmt(stmt) => self.check_stmt(stmt),
            };
            if let Err(e) = result {
                self.errors.push(e);
            }
        }
        self.symbols.leave_scope();
    }

    fn check_dec(&mut self, local: &LocalDec) -> Result<(), CompileError> {
        // The initializer is checked before the name comes into scope.
        if let Some(init) = &local.init {
            let dec = self.decl(local.dec, local.first_token.span)?;
            let ty = self.check_expr(init)?;
            expect_type(dec.ty, ty, "initializer", init.first_token.span)?;
        }
        self.declare(local.dec)
    }

    fn check_stmt(&mut self, stmt: &Statement) -> Result<(), CompileError> {
        match &stmt.kind {
            StatementKind::Assign { target, value } => {
                let dec = self.resolve(target.id, &target.name, target.first_token.span)?;
                let ty = self.check_expr(value)?;
                expect_type(dec.ty, ty, "assignment", value.first_token.span)
            }
            StatementKind::If { cond, body } | StatementKind::While { cond, body } => {
                let ty = self.check_expr(cond)?;
                expect_type(TypeName::Boolean, ty, "condition", cond.first_token.span)?;
                self.check_block(body);
                Ok(())
            }
            StatementKind::Sleep(expr) => {
                let ty = self.check_expr(expr)?;
                expect_type(TypeName::Integer, ty, "sleep duration", expr.first_token.span)
            }
            StatementKind::Chain(chain) => {
                self.check_chain(chain)?;
                Ok(())
            }
        }
    }

    // ── Chains ────────────────────────────────────────────────────

    fn check_chain(&mut self, chain: &Chain) -> Result<TypeName, CompileError> {
        let ty = match &chain.kind {
            ChainKind::Binary {
                left,
                op,
                op_token,
                right,
            } => {
                if !matches!(left.kind, ChainKind::Binary { .. } | ChainKind::Ident(_)) {
                    return Err(CompileError::semantic(
                        "a chain must start with a variable",
                        left.first_token.span,
                    ));
                }
                let left_ty = self.check_chain(left)?;
                let right_ty = self.check_chain(right)?;
                let right_dec = match &right.kind {
                    ChainKind::Ident(_) => self
                        .annotations
                        .binding(right.id)
                        .and_then(|id| self.program.decl(id)),
                    _ => None,
                };
                flow_result(left_ty, *op, &right.kind, right_ty, right_dec).ok_or_else(|| {
                    CompileError::semantic(
                        format!(
                            "cannot send {left_ty} through '{}' into {}",
                            if *op == FlowOp::Advance { "->" } else { "|->" },
                            describe_elem(&right.kind, right_ty),
                        ),
                        op_token.span,
                    )
                })?
            }
            ChainKind::Ident(name) => self.resolve(chain.id, name, chain.first_token.span)?.ty,
            ChainKind::Filter { args, .. } => {
                self.check_tuple(args, 0, chain)?;
                TypeName::Image
            }
            ChainKind::Frame { op, args } => match op {
                FrameOp::Show | FrameOp::Hide => {
                    self.check_tuple(args, 0, chain)?;
                    TypeName::None
                }
                FrameOp::Move => {
                    self.check_tuple(args, 2, chain)?;
                    TypeName::None
                }
                FrameOp::Xloc | FrameOp::Yloc => {
                    self.check_tuple(args, 0, chain)?;
                    TypeName::Integer
                }
            },
            ChainKind::Image { op, args } => match op {
                ImageOp::Width | ImageOp::Height => {
                    self.check_tuple(args, 0, chain)?;
                    TypeName::Integer
                }
                ImageOp::Scale => {
                    self.check_tuple(args, 1, chain)?;
                    TypeName::Image
                }
            },
        };
        self.annotations.set_type(chain.id, ty);
        Ok(ty)
    }

    fn check_tuple(&mut self, args: &Tuple, arity: usize, elem: &Chain) -> Result<(), CompileError> {
        if args.exprs.len() != arity {
            return Err(CompileError::semantic(
                format!(
                    "'{}' takes {arity} argument(s), got {}",
                    elem_name(&elem.kind),
                    args.exprs.len()
                ),
                elem.first_token.span,
            ));
        }
        for expr in &args.exprs {
            let ty = self.check_expr(expr)?;
            expect_type(TypeName::Integer, ty, "argument", expr.first_token.span)?;
        }
        Ok(())
    }

    // ── Expressions ───────────────────────────────────────────────

    fn check_expr(&mut self, expr: &Expr) -> Result<TypeName, CompileError> {
        let ty = match &expr.kind {
            ExprKind::IntLit(_) | ExprKind::Constant(_) => TypeName::Integer,
            ExprKind::BoolLit(_) => TypeName::Boolean,
            ExprKind::Ident(name) => self.resolve(expr.id, name, expr.first_token.span)?.ty,
            ExprKind::Binary { op, left, right } => {
                let l = self.check_expr(left)?;
                let r = self.check_expr(right)?;
                binary_result(l, *op, r).ok_or_else(|| {
                    CompileError::semantic(
                        format!("operator '{}' is not defined for {l} and {r}", op.symbol()),
                        expr.first_token.span,
                    )
                })?
            }
        };
        self.annotations.set_type(expr.id, ty);
        Ok(ty)
    }
}

fn expect_type(expected: TypeName, found: TypeName, what: &str, span: Span) -> Result<(), CompileError> {
    if expected == found {
        Ok(())
    } else {
        Err(CompileError::semantic(
            format!("{what} must be {expected}, found {found}"),
            span,
        ))
    }
}

/// Result type of `left op right`, or `None` if the pairing is not allowed.
fn binary_result(left: TypeName, op: BinOp, right: TypeName) -> Option<TypeName> {
    use TypeName::{Boolean, Image, Integer};
    match (left, op, right) {
        (Integer, BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod, Integer) => {
            Some(Integer)
        }
        (Image, BinOp::Add | BinOp::Sub, Image)
        | (Integer, BinOp::Mul, Image)
        | (Image, BinOp::Mul | BinOp::Div | BinOp::Mod, Integer) => Some(Image),
        (Integer, BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge, Integer)
        | (Boolean, BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge, Boolean)
        | (Boolean, BinOp::And | BinOp::Or, Boolean) => Some(Boolean),
        (l, BinOp::Eq | BinOp::Ne, r) if l == r && l != TypeName::None => Some(Boolean),
        _ => None,
    }
}

/// Result type of sending a `left`-typed value into `right`.
fn flow_result(
    left: TypeName,
    op: FlowOp,
    right: &ChainKind,
    right_ty: TypeName,
    right_dec: Option<&Declaration>,
) -> Option<TypeName> {
    use TypeName::{File, Frame, Image, Integer, Url};
    let advance = op == FlowOp::Advance;
    match (left, right) {
        (Url | File, _) if advance && right_ty == Image => Some(Image),
        (Frame, ChainKind::Frame { op, .. }) if advance => Some(match op {
            FrameOp::Xloc | FrameOp::Yloc => Integer,
            FrameOp::Show | FrameOp::Hide | FrameOp::Move => Frame,
        }),
        (Image, ChainKind::Image { op: ImageOp::Width | ImageOp::Height, .. }) if advance => {
            Some(Integer)
        }
        (Image, ChainKind::Image { op: ImageOp::Scale, .. }) if advance => Some(Image),
        (Image, ChainKind::Filter { .. }) => Some(Image),
        (Image, ChainKind::Ident(_)) if advance => match right_dec.map(|d| (d.ty, d.kind)) {
            Some((Frame, DecKind::Local)) => Some(Frame),
            Some((File, DecKind::Param)) => Some(TypeName::None),
            Some((Image, DecKind::Local)) => Some(Image),
            _ => None,
        },
        (Integer, ChainKind::Ident(_)) if advance && right_ty == Integer => Some(Integer),
        _ => None,
    }
}

fn elem_name(kind: &ChainKind) -> &'static str {
    match kind {
        ChainKind::Binary { .. } => "chain",
        ChainKind::Ident(_) => "variable",
        ChainKind::Filter { op, .. } => match op {
            FilterOp::Blur => "blur",
            FilterOp::Gray => "gray",
            FilterOp::Convolve => "convolve",
        },
        ChainKind::Frame { op, .. } => match op {
            FrameOp::Show => "show",
            FrameOp::Hide => "hide",
            FrameOp::Move => "move",
            FrameOp::Xloc => "xloc",
            FrameOp::Yloc => "yloc",
        },
        ChainKind::Image { op, .. } => match op {
            ImageOp::Width => "width",
            ImageOp::Height => "height",
            ImageOp::Scale => "scale",
        },
    }
}

fn describe_elem(kind: &ChainKind, ty: TypeName) -> String {
    match kind {
        ChainKind::Ident(name) => format!("{ty} variable '{name}'"),
        other => format!("'{}'", elem_name(other)),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::dsl::error::ErrorKind;
    use crate::dsl::lexer::lex;
    use crate::dsl::parser::parse;

    fn program(src: &str) -> Program {
        parse(src, lex(src).unwrap()).unwrap()
    }

    fn check(src: &str) -> (Program, Annotations) {
        let p = program(src);
        let ann = type_check(&p).unwrap();
        (p, ann)
    }

    fn check_err(src: &str) -> Vec<CompileError> {
        let errors = type_check(&program(src)).unwrap_err();
        assert!(errors.iter().all(|e| e.kind == ErrorKind::Semantic));
        errors
    }

    fn chain_type(src: &str) -> TypeName {
        let (p, ann) = check(src);
        let Some(BlockItem::Stmt(Statement {
            kind: StatementKind::Chain(chain),
            ..
        })) = p.block.items.last()
        else {
            panic!("last item is not a chain");
        };
        ann.type_of(chain.id).unwrap()
    }

    #[test]
    fn arithmetic_and_relational() {
        let (p, ann) = check("p { integer x <- 3 + 4 * 2; boolean b <- (x < 9) & true; }");
        let BlockItem::Dec(LocalDec { init: Some(init), .. }) = &p.block.items[1] else {
            panic!("expected initialized dec");
        };
        assert_eq!(ann.type_of(init.id), Some(TypeName::Boolean));
    }

    #[test]
    fn image_arithmetic() {
        check("p { image a image b a <- a + b; a <- a - b; a <- 2 * a; a <- a * 2; a <- a / 2; a <- a % 2; }");
        let errors = check_err("p { image a a <- 2 / a; }");
        assert!(errors[0].message.contains("'/'"), "{}", errors[0].message);
    }

    #[test]
    fn equality_needs_matching_types() {
        check("p { image a image b boolean c c <- a == b; c <- true != false; }");
        check_err("p { image a boolean c c <- a == 1; }");
    }

    #[test]
    fn identifiers_bind_to_nearest_declaration() {
        let (p, ann) = check("p integer x { integer x <- 1; if (true) { x <- 2; } }");
        let BlockItem::Stmt(Statement { kind: StatementKind::If { body, .. }, .. }) = &p.block.items[1] else {
            panic!("expected if");
        };
        let BlockItem::Stmt(Statement { kind: StatementKind::Assign { target, .. }, .. }) = &body.items[0] else {
            panic!("expected assignment");
        };
        let bound = ann.binding(target.id).unwrap();
        assert_eq!(p.decl(bound).unwrap().kind, DecKind::Local);
    }

    #[test]
    fn duplicate_and_unbound_names() {
        let errors = check_err("p { integer x integer x y <- 1; }");
        assert_eq!(errors.len(), 2);
        assert!(errors[0].message.contains("already declared"));
        assert!(errors[1].message.contains("not declared"));
    }

    #[test]
    fn names_leave_scope_with_their_block() {
        check_err("p { if (true) { integer y } y <- 1; }");
    }

    #[test]
    fn statement_operand_types() {
        check_err("p { if (1) { } }");
        check_err("p { while (3 + 4) { } }");
        check_err("p { sleep true; }");
        check_err("p { integer x x <- false; }");
        check_err("p { integer x <- true; }");
    }

    #[test]
    fn chain_rules() {
        assert_eq!(chain_type("p url u { image i u -> i; }"), TypeName::Image);
        assert_eq!(chain_type("p file f { f -> blur; }"), TypeName::Image);
        assert_eq!(chain_type("p { frame f f -> xloc; }"), TypeName::Integer);
        assert_eq!(chain_type("p { frame f f -> move(1, 2); }"), TypeName::Frame);
        assert_eq!(chain_type("p { image i i -> height; }"), TypeName::Integer);
        assert_eq!(chain_type("p { image i frame f i -> f; }"), TypeName::Frame);
        assert_eq!(chain_type("p file out { image i i -> out; }"), TypeName::None);
        assert_eq!(chain_type("p { image i i |-> gray; }"), TypeName::Image);
        assert_eq!(chain_type("p { image i i -> scale(2); }"), TypeName::Image);
        assert_eq!(chain_type("p { image i image j i -> j; }"), TypeName::Image);
        assert_eq!(chain_type("p integer n { integer m n -> m; }"), TypeName::Integer);
        assert_eq!(
            chain_type("p url u { image i frame f u -> i -> blur -> f -> show; }"),
            TypeName::Frame
        );
    }

    #[test]
    fn chain_rejections() {
        check_err("p { image i i -> show; }");
        check_err("p { image i i |-> width; }");
        check_err("p { image i frame f f -> blur; }");
        check_err("p url u { image i u -> width; }");
        check_err("p file out { image i i -> out -> blur; }");
        check_err("p { blur -> show; }");
    }

    #[test]
    fn operator_arity_and_argument_types() {
        check_err("p { image i i -> scale; }");
        check_err("p { frame f f -> move(1); }");
        check_err("p { image i i -> blur(1); }");
        check_err("p { frame f f -> move(1, true); }");
    }
}
