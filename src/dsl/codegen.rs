use std::collections::HashMap;

use tracing::trace;

use super::ast::*;
use super::bytecode::{
    ClassBuilder, ClassModule, Cond, Insn, Label, LocalVar, MemberRef, Method, MethodBuilder,
    ACC_PUBLIC, ACC_STATIC, ACC_SUPER,
};
use super::error::CompileError;
use super::lexer::Token;
use super::runtime::{self, Entry};

const ARGS_DESCRIPTOR: &str = "([Ljava/lang/String;)V";

/// Knobs for debug output in the generated class.
#[derive(Debug, Clone, Default)]
pub struct CodegenOptions {
    /// Emit a `SourceFile` attribute with this name.
    pub source_file: Option<String>,
    /// Emit a `LocalVariableTable` for `run`.
    pub local_variable_table: bool,
    /// Print `entering <method>` at the top of every generated method.
    pub trace_entry: bool,
}

/// Generate the class for a type-checked program.
///
/// `annotations` must type every expression and chain node and bind every
/// identifier use; a gap is reported as an internal error.
pub fn generate(
    program: &Program,
    annotations: &Annotations,
    options: &CodegenOptions,
) -> Result<ClassModule, CompileError> {
    let mut class = ClassBuilder::new(
        ACC_PUBLIC | ACC_SUPER,
        &program.name,
        runtime::OBJECT,
        &[runtime::RUNNABLE],
    );
    if let Some(src) = &options.source_file {
        class.set_source_file(src.clone());
    }

    for &id in &program.params {
        let dec = lookup_decl(program, id, program.first_token.span)?;
        class.add_field(0, &dec.name, dec.ty.descriptor())?;
    }

    let mut gen = Codegen {
        program,
        annotations,
        options,
        slots: HashMap::new(),
        next_slot: 1,
        method: MethodBuilder::new(ACC_PUBLIC, "<init>", ARGS_DESCRIPTOR)?,
    };
    gen.constructor()?;
    class.add_method(gen.take_method(ACC_PUBLIC | ACC_STATIC, "main", ARGS_DESCRIPTOR)?);
    gen.main()?;
    class.add_method(gen.take_method(ACC_PUBLIC, "run", "()V")?);
    gen.run()?;
    let locals = gen.next_slot - 1;
    class.add_method(gen.method.finish()?);

    trace!(class = class.name(), locals, "generated class");
    Ok(class.seal())
}

fn lookup_decl(program: &Program, id: DecId, span: Span) -> Result<&Declaration, CompileError> {
    program
        .decl(id)
        .ok_or_else(|| CompileError::internal(format!("unknown declaration #{}", id.0), span))
}

/// Where a chain element sits relative to its flow operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    /// Left of the arrow: produces a value.
    Producer,
    /// Right of the arrow: consumes the value on the stack.
    Consumer,
}

struct Codegen<'a> {
    program: &'a Program,
    annotations: &'a Annotations,
    options: &'a CodegenOptions,
    /// Local slot of every local declaration visited so far.
    slots: HashMap<DecId, u16>,
    next_slot: u16,
    method: MethodBuilder,
}

impl<'a> Codegen<'a> {
    /// Finish the current method and start a new one.
    fn take_method(&mut self, access: u16, name: &str, descriptor: &str) -> Result<Method, CompileError> {
        let next = MethodBuilder::new(access, name, descriptor)?;
        let done = std::mem::replace(&mut self.method, next);
        done.finish()
    }

    fn emit(&mut self, insn: Insn) {
        self.method.emit(insn);
    }

    fn call(&mut self, entry: Entry) -> Result<(), CompileError> {
        let f = runtime::lookup(entry).ok_or_else(|| {
            CompileError::internal(format!("no runtime entry for {entry:?}"), Span::default())
        })?;
        let member = f.member();
        self.emit(match f.dispatch {
            runtime::Dispatch::Static => Insn::InvokeStatic(member),
            runtime::Dispatch::Virtual => Insn::InvokeVirtual(member),
            runtime::Dispatch::Special => Insn::InvokeSpecial(member),
        });
        Ok(())
    }

    fn field(&self, dec: &Declaration) -> MemberRef {
        MemberRef::new(self.program.name.as_str(), dec.name.as_str(), dec.ty.descriptor())
    }

    fn trace_entry(&mut self, method: &str) -> Result<(), CompileError> {
        if self.options.trace_entry {
            let out = runtime::lookup(Entry::SystemOut)
                .map(runtime::RuntimeFn::member)
                .ok_or_else(|| CompileError::internal("no System.out entry", Span::default()))?;
            self.emit(Insn::GetStatic(out));
            self.emit(Insn::Ldc(format!("entering {method}")));
            self.call(Entry::Println)?;
        }
        Ok(())
    }

    fn type_of(&self, node: NodeId, token: &Token) -> Result<TypeName, CompileError> {
        self.annotations.type_of(node).ok_or_else(|| {
            CompileError::internal(format!("node #{} was never typed", node.0), token.span)
        })
    }

    fn binding(&self, node: NodeId, token: &Token) -> Result<&'a Declaration, CompileError> {
        let id = self.annotations.binding(node).ok_or_else(|| {
            CompileError::internal(format!("identifier #{} was never bound", node.0), token.span)
        })?;
        lookup_decl(self.program, id, token.span)
    }

    fn slot(&self, dec: &Declaration) -> Result<u16, CompileError> {
        self.slots.get(&dec.id).copied().ok_or_else(|| {
            CompileError::internal(
                format!("local '{}' used before its declaration was generated", dec.name),
                dec.first_token.span,
            )
        })
    }

    // ── Methods ───────────────────────────────────────────────────

    /// `<init>(String[] args)`: one field per parameter, from `args[i]`.
    fn constructor(&mut self) -> Result<(), CompileError> {
        self.trace_entry("<init>")?;
        self.emit(Insn::Aload(0));
        self.call(Entry::ObjectInit)?;
        let program = self.program;
        for (index, &id) in program.params.iter().enumerate() {
            let dec = lookup_decl(program, id, program.first_token.span)?;
            let index = i32::try_from(index).map_err(|_| {
                CompileError::internal("too many parameters", dec.first_token.span)
            })?;
            let conversion = runtime::param_conversion(dec.ty).ok_or_else(|| {
                CompileError::internal(
                    format!("'{}' cannot be a parameter of type {}", dec.name, dec.ty),
                    dec.first_token.span,
                )
            })?;
            self.emit(Insn::Aload(0));
            match conversion {
                Entry::FileInit => {
                    self.emit(Insn::New(runtime::FILE.to_string()));
                    self.emit(Insn::Dup);
                    self.push_arg(index);
                    self.call(Entry::FileInit)?;
                }
                Entry::GetUrl => {
                    self.emit(Insn::Aload(1));
                    self.emit(Insn::Iconst(index));
                    self.call(Entry::GetUrl)?;
                }
                other => {
                    self.push_arg(index);
                    self.call(other)?;
                }
            }
            let field = self.field(dec);
            self.emit(Insn::PutField(field));
        }
        self.emit(Insn::Return);
        Ok(())
    }

    fn push_arg(&mut self, index: i32) {
        self.emit(Insn::Aload(1));
        self.emit(Insn::Iconst(index));
        self.emit(Insn::Aaload);
    }

    /// `main(String[] args)`: `new P(args).run()`.
    fn main(&mut self) -> Result<(), CompileError> {
        self.trace_entry("main")?;
        let class = self.program.name.clone();
        self.emit(Insn::New(class.clone()));
        self.emit(Insn::Dup);
        self.emit(Insn::Aload(0));
        self.emit(Insn::InvokeSpecial(MemberRef::new(class.as_str(), "<init>", ARGS_DESCRIPTOR)));
        self.emit(Insn::InvokeVirtual(MemberRef::new(class, "run", "()V")));
        self.emit(Insn::Return);
        Ok(())
    }

    fn run(&mut self) -> Result<(), CompileError> {
        let start = self.method.create_label();
        self.method.bind_label(start);
        self.trace_entry("run")?;
        let program = self.program;
        let end = self.block(&program.block)?;
        self.emit(Insn::Return);
        if self.options.local_variable_table {
            self.method.add_local_var(LocalVar {
                name: "this".to_string(),
                descriptor: format!("L{};", self.program.name),
                slot: 0,
                start,
                end,
            });
        }
        Ok(())
    }

    // ── Statements ────────────────────────────────────────────────

    /// Returns the label bound just past the block.
    fn block(&mut self, block: &Block) -> Result<Label, CompileError> {
        let end = self.method.create_label();
        for item in &block.items {
            match item {
                BlockItem::Dec(dec) => self.dec(dec, end)?,
                BlockItem::Stmt(stmt) => self.statement(stmt)?,
            }
        }
        self.method.bind_label(end);
        Ok(end)
    }

    fn dec(&mut self, local: &LocalDec, scope_end: Label) -> Result<(), CompileError> {
        let dec = lookup_decl(self.program, local.dec, local.first_token.span)?;
        let slot = self.next_slot;
        self.next_slot = self.next_slot.checked_add(1).ok_or_else(|| {
            CompileError::internal("too many local variables", local.first_token.span)
        })?;
        self.slots.insert(dec.id, slot);
        self.method.use_local(slot);

        if dec.ty.is_reference() {
            self.emit(Insn::AconstNull);
            self.emit(Insn::Astore(slot));
        } else {
            self.emit(Insn::Iconst(0));
            self.emit(Insn::Istore(slot));
        }
        let start = self.method.create_label();
        self.method.bind_label(start);
        if self.options.local_variable_table {
            self.method.add_local_var(LocalVar {
                name: dec.name.clone(),
                descriptor: dec.ty.descriptor().to_string(),
                slot,
                start,
                end: scope_end,
            });
        }

        if let Some(init) = &local.init {
            self.expr(init)?;
            self.store(dec)?;
        }
        Ok(())
    }

    fn statement(&mut self, stmt: &Statement) -> Result<(), CompileError> {
        match &stmt.kind {
            StatementKind::Assign { target, value } => {
                self.expr(value)?;
                let dec = self.binding(target.id, &target.first_token)?;
                self.store(dec)
            }
            StatementKind::If { cond, body } => {
                let after = self.method.create_label();
                self.expr(cond)?;
                self.emit(Insn::If(Cond::Eq, after));
                self.block(body)?;
                self.method.bind_label(after);
                Ok(())
            }
            StatementKind::While { cond, body } => {
                let guard = self.method.create_label();
                let top = self.method.create_label();
                self.emit(Insn::Goto(guard));
                self.method.bind_label(top);
                self.block(body)?;
                self.method.bind_label(guard);
                self.expr(cond)?;
                self.emit(Insn::If(Cond::Ne, top));
                Ok(())
            }
            StatementKind::Sleep(duration) => {
                self.expr(duration)?;
                self.emit(Insn::I2l);
                self.call(Entry::Sleep)
            }
            StatementKind::Chain(chain) => {
                self.chain(chain, Side::Producer)?;
                self.emit(Insn::Pop);
                Ok(())
            }
        }
    }

    /// Store the value on top of the stack into a variable.
    fn store(&mut self, dec: &Declaration) -> Result<(), CompileError> {
        match dec.kind {
            DecKind::Param => {
                self.emit(Insn::Aload(0));
                self.emit(Insn::Swap);
                let field = self.field(dec);
                self.emit(Insn::PutField(field));
            }
            DecKind::Local => {
                let slot = self.slot(dec)?;
                match dec.ty {
                    TypeName::Image => {
                        // Images are copied so two variables never share pixels.
                        self.call(Entry::CopyImage)?;
                        self.emit(Insn::Astore(slot));
                    }
                    TypeName::Frame => self.emit(Insn::Astore(slot)),
                    TypeName::Integer | TypeName::Boolean => self.emit(Insn::Istore(slot)),
                    other => {
                        return Err(CompileError::internal(
                            format!("cannot store into local '{}' of type {other}", dec.name),
                            dec.first_token.span,
                        ))
                    }
                }
            }
        }
        Ok(())
    }

    /// Push the current value of a variable.
    fn load(&mut self, dec: &Declaration) -> Result<(), CompileError> {
        match dec.kind {
            DecKind::Param => {
                self.emit(Insn::Aload(0));
                let field = self.field(dec);
                self.emit(Insn::GetField(field));
            }
            DecKind::Local => {
                let slot = self.slot(dec)?;
                self.emit(if dec.ty.is_reference() {
                    Insn::Aload(slot)
                } else {
                    Insn::Iload(slot)
                });
            }
        }
        Ok(())
    }

    // ── Chains ────────────────────────────────────────────────────

    fn chain(&mut self, chain: &Chain, side: Side) -> Result<(), CompileError> {
        match &chain.kind {
            ChainKind::Binary { left, op, right, .. } => {
                self.chain(left, Side::Producer)?;
                match self.type_of(left.id, &left.first_token)? {
                    TypeName::Url => self.call(Entry::ReadFromUrl)?,
                    TypeName::File => self.call(Entry::ReadFromFile)?,
                    TypeName::None => self.emit(Insn::Pop),
                    _ => {}
                }
                if matches!(right.kind, ChainKind::Filter { .. }) {
                    match op {
                        // Fresh destination image.
                        FlowOp::Advance => self.emit(Insn::AconstNull),
                        // Filter writes back into the source image.
                        FlowOp::Hold => self.emit(Insn::Dup),
                    }
                }
                self.chain(right, Side::Consumer)
            }
            ChainKind::Ident(_) => {
                let dec = self.binding(chain.id, &chain.first_token)?;
                match side {
                    Side::Producer => self.load(dec),
                    Side::Consumer => self.consume_into(dec),
                }
            }
            ChainKind::Filter { op, args } => {
                self.tuple(args)?;
                self.call(match op {
                    FilterOp::Blur => Entry::Blur,
                    FilterOp::Gray => Entry::Gray,
                    FilterOp::Convolve => Entry::Convolve,
                })
            }
            ChainKind::Frame { op, args } => {
                self.tuple(args)?;
                self.call(match op {
                    FrameOp::Show => Entry::Show,
                    FrameOp::Hide => Entry::Hide,
                    FrameOp::Move => Entry::Move,
                    FrameOp::Xloc => Entry::GetX,
                    FrameOp::Yloc => Entry::GetY,
                })
            }
            ChainKind::Image { op, args } => {
                self.tuple(args)?;
                self.call(match op {
                    ImageOp::Width => Entry::GetWidth,
                    ImageOp::Height => Entry::GetHeight,
                    ImageOp::Scale => Entry::Scale,
                })
            }
        }
    }

    /// A variable on the right of an arrow takes the incoming value and
    /// leaves its own (new) value as the chain's result.
    fn consume_into(&mut self, dec: &Declaration) -> Result<(), CompileError> {
        match (dec.kind, dec.ty) {
            (DecKind::Param, TypeName::Integer | TypeName::Boolean) => {
                self.store(dec)?;
                self.load(dec)
            }
            (DecKind::Param, TypeName::File) => {
                self.load(dec)?;
                self.call(Entry::Write)?;
                self.emit(Insn::Pop);
                self.load(dec)
            }
            (DecKind::Local, TypeName::Frame) => {
                let slot = self.slot(dec)?;
                self.emit(Insn::Aload(slot));
                self.call(Entry::CreateOrSetFrame)?;
                self.emit(Insn::Astore(slot));
                self.emit(Insn::Aload(slot));
                Ok(())
            }
            (DecKind::Local, TypeName::Integer | TypeName::Boolean) => {
                let slot = self.slot(dec)?;
                self.emit(Insn::Istore(slot));
                self.emit(Insn::Iload(slot));
                Ok(())
            }
            (DecKind::Local, TypeName::Image) => {
                let slot = self.slot(dec)?;
                self.emit(Insn::Astore(slot));
                self.emit(Insn::Aload(slot));
                Ok(())
            }
            (_, ty) => Err(CompileError::internal(
                format!("'{}' of type {ty} cannot receive a chain value", dec.name),
                dec.first_token.span,
            )),
        }
    }

    fn tuple(&mut self, args: &Tuple) -> Result<(), CompileError> {
        for expr in &args.exprs {
            self.expr(expr)?;
        }
        Ok(())
    }

    // ── Expressions ───────────────────────────────────────────────

    fn expr(&mut self, expr: &Expr) -> Result<(), CompileError> {
        match &expr.kind {
            ExprKind::IntLit(v) => self.emit(Insn::Iconst(*v)),
            ExprKind::BoolLit(b) => self.emit(Insn::Iconst(i32::from(*b))),
            ExprKind::Constant(ScreenConstant::Width) => self.call(Entry::ScreenWidth)?,
            ExprKind::Constant(ScreenConstant::Height) => self.call(Entry::ScreenHeight)?,
            ExprKind::Ident(_) => {
                let dec = self.binding(expr.id, &expr.first_token)?;
                self.load(dec)?;
            }
            ExprKind::Binary { op, left, right } => {
                let lt = self.type_of(left.id, &left.first_token)?;
                let rt = self.type_of(right.id, &right.first_token)?;
                self.expr(left)?;
                self.expr(right)?;
                self.binary(*op, lt, rt, &expr.first_token)?;
            }
        }
        Ok(())
    }

    /// Operands are already on the stack, left below right.
    fn binary(&mut self, op: BinOp, lt: TypeName, rt: TypeName, token: &Token) -> Result<(), CompileError> {
        use TypeName::{Image, Integer};
        if op.is_relational() {
            let cond = match op {
                BinOp::Lt => Cond::Lt,
                BinOp::Gt => Cond::Gt,
                BinOp::Le => Cond::Le,
                BinOp::Ge => Cond::Ge,
                BinOp::Eq => Cond::Eq,
                _ => Cond::Ne,
            };
            let is_false = self.method.create_label();
            let end = self.method.create_label();
            self.emit(if lt.is_reference() && rt.is_reference() {
                Insn::IfAcmp(cond.negate(), is_false)
            } else {
                Insn::IfIcmp(cond.negate(), is_false)
            });
            self.emit(Insn::Iconst(1));
            self.emit(Insn::Goto(end));
            self.method.bind_label(is_false);
            self.emit(Insn::Iconst(0));
            self.method.bind_label(end);
            return Ok(());
        }
        match (lt, op, rt) {
            (Image, BinOp::Add, Image) => self.call(Entry::Add)?,
            (Image, BinOp::Sub, Image) => self.call(Entry::Sub)?,
            (Integer, BinOp::Mul, Image) => {
                // Runtime expects the image first.
                self.emit(Insn::Swap);
                self.call(Entry::Mul)?;
            }
            (Image, BinOp::Mul, Integer) => self.call(Entry::Mul)?,
            (Image, BinOp::Div, Integer) => self.call(Entry::Div)?,
            (Image, BinOp::Mod, Integer) => self.call(Entry::Mod)?,
            (Image, _, _) | (_, _, Image) => {
                return Err(CompileError::internal(
                    format!("no image operation for {lt} {} {rt}", op.symbol()),
                    token.span,
                ))
            }
            (_, BinOp::Add, _) => self.emit(Insn::Iadd),
            (_, BinOp::Sub, _) => self.emit(Insn::Isub),
            (_, BinOp::Mul, _) => self.emit(Insn::Imul),
            (_, BinOp::Div, _) => self.emit(Insn::Idiv),
            (_, BinOp::Mod, _) => self.emit(Insn::Irem),
            (_, BinOp::And, _) => self.emit(Insn::Iand),
            (_, BinOp::Or, _) => self.emit(Insn::Ior),
            (_, BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge | BinOp::Eq | BinOp::Ne, _) => {
                return Err(CompileError::internal("relational operator fell through", token.span))
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::dsl::lexer::lex;
    use crate::dsl::parser::parse;
    use crate::dsl::typeck::type_check;

    fn compile_src(src: &str) -> ClassModule {
        let program = parse(src, lex(src).unwrap()).unwrap();
        let annotations = type_check(&program).unwrap();
        generate(&program, &annotations, &CodegenOptions::default()).unwrap()
    }

    fn run_code(module: &ClassModule) -> &[Insn] {
        &module.method("run", "()V").unwrap().code
    }

    fn invoked(code: &[Insn]) -> Vec<&str> {
        code.iter()
            .filter_map(|i| match i {
                Insn::InvokeStatic(m) | Insn::InvokeVirtual(m) | Insn::InvokeSpecial(m) => {
                    Some(m.name.as_str())
                }
                _ => None,
            })
            .collect()
    }

    #[test]
    fn class_shape() {
        let module = compile_src("p integer n, file f {}");
        assert_eq!(module.name, "p");
        assert_eq!(module.interfaces, vec!["java/lang/Runnable".to_string()]);
        let fields: Vec<(&str, &str)> = module
            .fields
            .iter()
            .map(|f| (f.name.as_str(), f.descriptor.as_str()))
            .collect();
        assert_eq!(fields, vec![("n", "I"), ("f", "Ljava/io/File;")]);
        assert!(module.method("<init>", "([Ljava/lang/String;)V").is_some());
        let main = module.method("main", "([Ljava/lang/String;)V").unwrap();
        assert!(main.is_static());
        assert!(module.method("run", "()V").is_some());
    }

    #[test]
    fn constructor_converts_each_argument() {
        let module = compile_src("p integer n, boolean b, file f, url u {}");
        let init = module.method("<init>", ARGS_DESCRIPTOR).unwrap();
        assert_eq!(
            invoked(&init.code),
            vec!["<init>", "parseInt", "parseBoolean", "<init>", "getURL"]
        );
        assert!(init.code.contains(&Insn::New("java/io/File".into())));
        assert_eq!(
            init.code.iter().filter(|i| matches!(i, Insn::PutField(_))).count(),
            4
        );
    }

    #[test]
    fn declaration_with_initializer() {
        let module = compile_src("p { integer x <- 3 + 4; }");
        assert_eq!(
            run_code(&module),
            &[
                Insn::Iconst(0),
                Insn::Istore(1),
                Insn::Iconst(3),
                Insn::Iconst(4),
                Insn::Iadd,
                Insn::Istore(1),
                Insn::Return,
            ]
        );
    }

    #[test]
    fn slots_are_allocated_in_visiting_order() {
        let module = compile_src("p { integer a if (true) { image b } frame c }");
        let code = run_code(&module);
        assert!(code.contains(&Insn::Istore(1)));
        assert!(code.contains(&Insn::Astore(2)));
        assert!(code.contains(&Insn::Astore(3)));
        assert_eq!(module.method("run", "()V").unwrap().max_locals, 4);
    }

    #[test]
    fn image_assignment_copies() {
        let module = compile_src("p { image a image b b <- a; }");
        let code = run_code(&module);
        let copy = code
            .iter()
            .position(|i| matches!(i, Insn::InvokeStatic(m) if m.name == "copyImage"))
            .unwrap();
        assert_eq!(code[copy - 1], Insn::Aload(1));
        assert_eq!(code[copy + 1], Insn::Astore(2));
    }

    #[test]
    fn param_assignment_goes_through_field() {
        let module = compile_src("p integer n { n <- 5; }");
        let code = run_code(&module);
        assert_eq!(code[0], Insn::Iconst(5));
        assert_eq!(code[1], Insn::Aload(0));
        assert_eq!(code[2], Insn::Swap);
        assert!(matches!(&code[3], Insn::PutField(m) if m.name == "n" && m.descriptor == "I"));
    }

    #[test]
    fn relational_uses_inverted_branch() {
        let module = compile_src("p { boolean b <- 1 < 2; }");
        let code = run_code(&module);
        assert!(code.iter().any(|i| matches!(i, Insn::IfIcmp(Cond::Ge, _))));
        let refs = compile_src("p { image a image c boolean b <- a == c; }");
        assert!(run_code(&refs).iter().any(|i| matches!(i, Insn::IfAcmp(Cond::Ne, _))));
    }

    #[test]
    fn scalar_times_image_swaps() {
        let module = compile_src("p { image a a <- 3 * a; }");
        let code = run_code(&module);
        let mul = code
            .iter()
            .position(|i| matches!(i, Insn::InvokeStatic(m) if m.name == "mul"))
            .unwrap();
        assert_eq!(code[mul - 1], Insn::Swap);
    }

    #[test]
    fn while_jumps_to_guard_first() {
        let module = compile_src("p { integer i while (i < 3) { i <- i + 1; } }");
        let run = module.method("run", "()V").unwrap();
        let Insn::Goto(guard) = &run.code[2] else {
            panic!("expected goto, got {}", run.code[2]);
        };
        let Some(Insn::If(Cond::Ne, top)) = run.code.iter().rev().nth(1) else {
            panic!("expected ifne before return");
        };
        assert_eq!(run.label_index(*top), Some(3));
        assert!(run.label_index(*guard).unwrap() > 3);
    }

    #[test]
    fn sleep_widens_to_long() {
        let module = compile_src("p { sleep 250; }");
        let code = run_code(&module);
        assert_eq!(code[1], Insn::I2l);
        assert!(matches!(&code[2], Insn::InvokeStatic(m) if m.name == "sleep" && m.descriptor == "(J)V"));
    }

    #[test]
    fn flow_operators_pick_filter_destination() {
        let advance = compile_src("p { image i i -> gray; }");
        assert_eq!(run_code(&advance)[3], Insn::AconstNull);
        let hold = compile_src("p { image i i |-> gray; }");
        assert_eq!(run_code(&hold)[3], Insn::Dup);
    }

    #[test]
    fn url_source_is_read_and_file_sink_written() {
        let module = compile_src("p url u, file out { image i u -> i -> out; }");
        assert_eq!(
            invoked(run_code(&module)),
            vec!["readFromURL", "write"]
        );
        let code = run_code(&module);
        assert_eq!(code.last(), Some(&Insn::Return));
        assert_eq!(code[code.len() - 2], Insn::Pop);
    }

    #[test]
    fn frame_sink_creates_or_updates() {
        let module = compile_src("p { image i frame f i -> f -> move(1, 2) -> show; }");
        assert_eq!(
            invoked(run_code(&module)),
            vec!["createOrSetFrame", "moveFrame", "showImage"]
        );
    }

    /// Annotate `img -> blur -> show` by hand, the way an external checker
    /// that accepts it would.
    #[test]
    fn chain_with_hand_annotations() {
        let src = "p { image img img -> blur -> show; }";
        let program = parse(src, lex(src).unwrap()).unwrap();
        let mut ann = Annotations::new();
        let Some(BlockItem::Stmt(Statement { kind: StatementKind::Chain(outer), .. })) =
            program.block.items.last()
        else {
            panic!("expected chain");
        };
        let ChainKind::Binary { left: inner, right: show, .. } = &outer.kind else {
            panic!("expected binary chain");
        };
        let ChainKind::Binary { left: img, right: blur, .. } = &inner.kind else {
            panic!("expected nested chain");
        };
        ann.bind(img.id, DecId(0));
        ann.set_type(img.id, TypeName::Image);
        ann.set_type(blur.id, TypeName::Image);
        ann.set_type(inner.id, TypeName::Image);
        ann.set_type(show.id, TypeName::None);
        ann.set_type(outer.id, TypeName::Frame);

        let module = generate(&program, &ann, &CodegenOptions::default()).unwrap();
        let code = run_code(&module);
        assert_eq!(code[2], Insn::Aload(1));
        assert_eq!(code[3], Insn::AconstNull);
        assert!(matches!(&code[4], Insn::InvokeStatic(m) if m.name == "blurOp"));
        assert!(matches!(&code[5], Insn::InvokeVirtual(m) if m.name == "showImage"));
        assert_eq!(code[6], Insn::Pop);
        assert_eq!(code[7], Insn::Return);
    }

    #[test]
    fn missing_annotations_are_internal_errors() {
        let src = "p { integer x x <- 1 + 2; }";
        let program = parse(src, lex(src).unwrap()).unwrap();
        let err = generate(&program, &Annotations::new(), &CodegenOptions::default()).unwrap_err();
        assert_eq!(err.kind, crate::dsl::error::ErrorKind::Internal);
    }

    #[test]
    fn debug_options() {
        let src = "p { integer x }";
        let program = parse(src, lex(src).unwrap()).unwrap();
        let ann = type_check(&program).unwrap();
        let options = CodegenOptions {
            source_file: Some("p.pipe".into()),
            local_variable_table: true,
            trace_entry: true,
        };
        let module = generate(&program, &ann, &options).unwrap();
        assert_eq!(module.source_file.as_deref(), Some("p.pipe"));
        let run = module.method("run", "()V").unwrap();
        let names: Vec<&str> = run.locals.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["x", "this"]);
        for m in &module.methods {
            assert!(matches!(&m.code[0], Insn::GetStatic(f) if f.name == "out"));
        }
    }
}
