//! In-memory model of the generated class: instructions, labels, methods
//! and the builders code generation fills.
//!
//! Instructions stay symbolic here (labels, member references, plain
//! integers); `classfile` picks concrete encodings and resolves offsets.

use std::collections::HashMap;
use std::fmt;

use super::ast::Span;
use super::error::CompileError;

pub const ACC_PUBLIC: u16 = 0x0001;
pub const ACC_STATIC: u16 = 0x0008;
pub const ACC_SUPER: u16 = 0x0020;

/// A jump target inside one method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(u32);

/// `owner.name:descriptor`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberRef {
    pub owner: String,
    pub name: String,
    pub descriptor: String,
}

impl MemberRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            descriptor: descriptor.into(),
        }
    }
}

impl fmt::Display for MemberRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}:{}", self.owner, self.name, self.descriptor)
    }
}

/// Branch condition. For `If` the right operand is an implicit zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cond {
    Eq,
    Ne,
    Lt,
    Ge,
    Gt,
    Le,
}

impl Cond {
    pub fn negate(self) -> Self {
        match self {
            Cond::Eq => Cond::Ne,
            Cond::Ne => Cond::Eq,
            Cond::Lt => Cond::Ge,
            Cond::Ge => Cond::Lt,
            Cond::Gt => Cond::Le,
            Cond::Le => Cond::Gt,
        }
    }

    pub fn holds(self, left: i32, right: i32) -> bool {
        match self {
            Cond::Eq => left == right,
            Cond::Ne => left != right,
            Cond::Lt => left < right,
            Cond::Ge => left >= right,
            Cond::Gt => left > right,
            Cond::Le => left <= right,
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            Cond::Eq => "eq",
            Cond::Ne => "ne",
            Cond::Lt => "lt",
            Cond::Ge => "ge",
            Cond::Gt => "gt",
            Cond::Le => "le",
        }
    }
}

/// Instructions of the target VM that code generation emits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Insn {
    AconstNull,
    /// Push an int constant (encoded as `iconst_*`, `bipush`, `sipush` or `ldc`).
    Iconst(i32),
    /// Push a pooled string.
    Ldc(String),
    Iload(u16),
    Istore(u16),
    Aload(u16),
    Astore(u16),
    Pop,
    Dup,
    Swap,
    Aaload,
    Iadd,
    Isub,
    Imul,
    Idiv,
    Irem,
    Iand,
    Ior,
    I2l,
    /// Compare two ints and branch.
    IfIcmp(Cond, Label),
    /// Compare two references and branch. Only `Eq`/`Ne`.
    IfAcmp(Cond, Label),
    /// Compare an int with zero and branch.
    If(Cond, Label),
    Goto(Label),
    New(String),
    GetField(MemberRef),
    PutField(MemberRef),
    GetStatic(MemberRef),
    InvokeStatic(MemberRef),
    InvokeVirtual(MemberRef),
    InvokeSpecial(MemberRef),
    Return,
}

impl Insn {
    /// Branch target, if this instruction can jump.
    pub fn target(&self) -> Option<Label> {
        match self {
            Insn::IfIcmp(_, l) | Insn::IfAcmp(_, l) | Insn::If(_, l) | Insn::Goto(l) => Some(*l),
            _ => None,
        }
    }

    /// Whether execution can continue with the next instruction.
    pub fn falls_through(&self) -> bool {
        !matches!(self, Insn::Goto(_) | Insn::Return)
    }

    /// `(words popped, words pushed)`.
    pub fn stack_effect(&self) -> Result<(u16, u16), CompileError> {
        Ok(match self {
            Insn::AconstNull | Insn::Iconst(_) | Insn::Ldc(_) | Insn::Iload(_) | Insn::Aload(_) | Insn::New(_) => (0, 1),
            Insn::Istore(_) | Insn::Astore(_) | Insn::Pop | Insn::If(..) => (1, 0),
            Insn::Dup => (1, 2),
            Insn::Swap => (2, 2),
            Insn::Aaload
            | Insn::Iadd
            | Insn::Isub
            | Insn::Imul
            | Insn::Idiv
            | Insn::Irem
            | Insn::Iand
            | Insn::Ior => (2, 1),
            Insn::I2l => (1, 2),
            Insn::IfIcmp(..) | Insn::IfAcmp(..) => (2, 0),
            Insn::Goto(_) | Insn::Return => (0, 0),
            Insn::GetField(m) => (1, field_slots(&m.descriptor)?),
            Insn::PutField(m) => (1 + field_slots(&m.descriptor)?, 0),
            Insn::GetStatic(m) => (0, field_slots(&m.descriptor)?),
            Insn::InvokeStatic(m) => descriptor_slots(&m.descriptor)?,
            Insn::InvokeVirtual(m) | Insn::InvokeSpecial(m) => {
                let (args, ret) = descriptor_slots(&m.descriptor)?;
                (args + 1, ret)
            }
        })
    }
}

impl fmt::Display for Insn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Insn::AconstNull => f.write_str("aconst_null"),
            Insn::Iconst(v) => match v {
                -1 => f.write_str("iconst_m1"),
                0..=5 => write!(f, "iconst_{v}"),
                -128..=127 => write!(f, "bipush {v}"),
                -32768..=32767 => write!(f, "sipush {v}"),
                _ => write!(f, "ldc {v}"),
            },
            Insn::Ldc(s) => write!(f, "ldc {s:?}"),
            Insn::Iload(n) => local_op(f, "iload", *n),
            Insn::Istore(n) => local_op(f, "istore", *n),
            Insn::Aload(n) => local_op(f, "aload", *n),
            Insn::Astore(n) => local_op(f, "astore", *n),
            Insn::Pop => f.write_str("pop"),
            Insn::Dup => f.write_str("dup"),
            Insn::Swap => f.write_str("swap"),
            Insn::Aaload => f.write_str("aaload"),
            Insn::Iadd => f.write_str("iadd"),
            Insn::Isub => f.write_str("isub"),
            Insn::Imul => f.write_str("imul"),
            Insn::Idiv => f.write_str("idiv"),
            Insn::Irem => f.write_str("irem"),
            Insn::Iand => f.write_str("iand"),
            Insn::Ior => f.write_str("ior"),
            Insn::I2l => f.write_str("i2l"),
            Insn::IfIcmp(c, l) => write!(f, "if_icmp{} L{}", c.suffix(), l.0),
            Insn::IfAcmp(c, l) => write!(f, "if_acmp{} L{}", c.suffix(), l.0),
            Insn::If(c, l) => write!(f, "if{} L{}", c.suffix(), l.0),
            Insn::Goto(l) => write!(f, "goto L{}", l.0),
            Insn::New(class) => write!(f, "new {class}"),
            Insn::GetField(m) => write!(f, "getfield {m}"),
            Insn::PutField(m) => write!(f, "putfield {m}"),
            Insn::GetStatic(m) => write!(f, "getstatic {m}"),
            Insn::InvokeStatic(m) => write!(f, "invokestatic {m}"),
            Insn::InvokeVirtual(m) => write!(f, "invokevirtual {m}"),
            Insn::InvokeSpecial(m) => write!(f, "invokespecial {m}"),
            Insn::Return => f.write_str("return"),
        }
    }
}

fn local_op(f: &mut fmt::Formatter<'_>, name: &str, slot: u16) -> fmt::Result {
    if slot <= 3 {
        write!(f, "{name}_{slot}")
    } else {
        write!(f, "{name} {slot}")
    }
}

// ── Descriptors ─────────────────────────────────────────────────

fn bad_descriptor(descriptor: &str) -> CompileError {
    CompileError::internal(format!("malformed descriptor '{descriptor}'"), Span::default())
}

/// Parse one field type starting at `chars`; returns its size in words.
fn take_field_type(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Option<u16> {
    match chars.next()? {
        'B' | 'C' | 'F' | 'I' | 'S' | 'Z' => Some(1),
        'J' | 'D' => Some(2),
        'L' => {
            for c in chars.by_ref() {
                if c == ';' {
                    return Some(1);
                }
            }
            None
        }
        '[' => {
            while chars.peek() == Some(&'[') {
                chars.next();
            }
            take_field_type(chars).map(|_| 1)
        }
        _ => None,
    }
}

/// Words occupied by a value of a field descriptor.
pub fn field_slots(descriptor: &str) -> Result<u16, CompileError> {
    let mut chars = descriptor.chars().peekable();
    match take_field_type(&mut chars) {
        Some(n) if chars.next().is_none() => Ok(n),
        _ => Err(bad_descriptor(descriptor)),
    }
}

/// `(argument words, return words)` of a method descriptor.
pub fn descriptor_slots(descriptor: &str) -> Result<(u16, u16), CompileError> {
    let mut chars = descriptor.chars().peekable();
    if chars.next() != Some('(') {
        return Err(bad_descriptor(descriptor));
    }
    let mut args = 0;
    loop {
        if chars.peek() == Some(&')') {
            chars.next();
            break;
        }
        args += take_field_type(&mut chars).ok_or_else(|| bad_descriptor(descriptor))?;
    }
    let ret = if chars.peek() == Some(&'V') {
        chars.next();
        0
    } else {
        take_field_type(&mut chars).ok_or_else(|| bad_descriptor(descriptor))?
    };
    if chars.next().is_some() {
        return Err(bad_descriptor(descriptor));
    }
    Ok((args, ret))
}

// ── Methods ─────────────────────────────────────────────────────

/// A `LocalVariableTable` entry, live from `start` up to `end`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVar {
    pub name: String,
    pub descriptor: String,
    pub slot: u16,
    pub start: Label,
    pub end: Label,
}

/// A finished method body.
#[derive(Debug, Clone)]
pub struct Method {
    pub access: u16,
    pub name: String,
    pub descriptor: String,
    pub code: Vec<Insn>,
    /// Label → index of the instruction it precedes (may equal `code.len()`).
    pub labels: HashMap<Label, usize>,
    pub max_stack: u16,
    pub max_locals: u16,
    pub locals: Vec<LocalVar>,
}

impl Method {
    pub fn label_index(&self, label: Label) -> Option<usize> {
        self.labels.get(&label).copied()
    }

    pub fn is_static(&self) -> bool {
        self.access & ACC_STATIC != 0
    }
}

/// Builder for one method body.
#[derive(Debug)]
pub struct MethodBuilder {
    access: u16,
    name: String,
    descriptor: String,
    code: Vec<Insn>,
    labels: HashMap<Label, usize>,
    next_label: u32,
    max_locals: u16,
    locals: Vec<LocalVar>,
}

impl MethodBuilder {
    /// `max_locals` starts out covering the receiver (unless static) and
    /// the declared arguments.
    pub fn new(access: u16, name: &str, descriptor: &str) -> Result<Self, CompileError> {
        let (args, _) = descriptor_slots(descriptor)?;
        let receiver = u16::from(access & ACC_STATIC == 0);
        Ok(Self {
            access,
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            code: Vec::new(),
            labels: HashMap::new(),
            next_label: 0,
            max_locals: args + receiver,
            locals: Vec::new(),
        })
    }

    pub fn emit(&mut self, insn: Insn) {
        self.code.push(insn);
    }

    /// Create a new label for a jump target.
    pub fn create_label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }

    /// Mark the current position as the target for a label.
    pub fn bind_label(&mut self, label: Label) {
        self.labels.insert(label, self.code.len());
    }

    /// Note that `slot` is in use so `max_locals` covers it.
    pub fn use_local(&mut self, slot: u16) {
        self.max_locals = self.max_locals.max(slot.saturating_add(1));
    }

    pub fn add_local_var(&mut self, var: LocalVar) {
        self.locals.push(var);
    }

    pub fn code(&self) -> &[Insn] {
        &self.code
    }

    /// Check labels and compute `max_stack`.
    pub fn finish(self) -> Result<Method, CompileError> {
        let max_stack = max_stack(&self.name, &self.code, &self.labels)?;
        for var in &self.locals {
            for label in [var.start, var.end] {
                if !self.labels.contains_key(&label) {
                    return Err(CompileError::internal(
                        format!("{}: local '{}' uses unbound label L{}", self.name, var.name, label.0),
                        Span::default(),
                    ));
                }
            }
        }
        Ok(Method {
            access: self.access,
            name: self.name,
            descriptor: self.descriptor,
            code: self.code,
            labels: self.labels,
            max_stack,
            max_locals: self.max_locals,
            locals: self.locals,
        })
    }
}

/// Largest operand stack depth over every path through `code`.
///
/// Fails if a label is unbound, a path pops more than it has, two paths
/// reach an instruction with different depths, or control runs off the end.
fn max_stack(method: &str, code: &[Insn], labels: &HashMap<Label, usize>) -> Result<u16, CompileError> {
    let err = |msg: String| CompileError::internal(format!("{method}: {msg}"), Span::default());
    let mut depth_at: Vec<Option<u16>> = vec![None; code.len()];
    let mut work = vec![(0usize, 0u16)];
    let mut max = 0u16;

    while let Some((pc, depth)) = work.pop() {
        let Some(insn) = code.get(pc) else {
            return Err(err(format!("control falls off the end at {pc}")));
        };
        match depth_at.get(pc).copied().flatten() {
            Some(seen) if seen == depth => continue,
            Some(seen) => {
                return Err(err(format!(
                    "inconsistent stack depth at {pc}: {seen} vs {depth}"
                )))
            }
            None => {}
        }
        if let Some(slot) = depth_at.get_mut(pc) {
            *slot = Some(depth);
        }

        let (pop, push) = insn.stack_effect()?;
        let after = depth
            .checked_sub(pop)
            .ok_or_else(|| err(format!("stack underflow at {pc} ({insn})")))?
            + push;
        max = max.max(after).max(depth);

        if let Some(label) = insn.target() {
            let target = labels
                .get(&label)
                .copied()
                .ok_or_else(|| err(format!("unbound label L{}", label.0)))?;
            work.push((target, after));
        }
        if insn.falls_through() {
            work.push((pc + 1, after));
        }
    }
    Ok(max)
}

// ── Classes ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub access: u16,
    pub name: String,
    pub descriptor: String,
}

/// A sealed class, ready to be written or simulated.
#[derive(Debug, Clone)]
pub struct ClassModule {
    pub access: u16,
    pub name: String,
    pub super_name: String,
    pub interfaces: Vec<String>,
    pub fields: Vec<Field>,
    pub methods: Vec<Method>,
    pub source_file: Option<String>,
}

impl ClassModule {
    pub fn method(&self, name: &str, descriptor: &str) -> Option<&Method> {
        self.methods
            .iter()
            .find(|m| m.name == name && m.descriptor == descriptor)
    }
}

impl fmt::Display for ClassModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "class {} extends {}", self.name, self.super_name)?;
        if !self.interfaces.is_empty() {
            write!(f, " implements {}", self.interfaces.join(", "))?;
        }
        writeln!(f)?;
        if let Some(src) = &self.source_file {
            writeln!(f, "  source {src}")?;
        }
        for field in &self.fields {
            writeln!(f, "  field {} {}", field.name, field.descriptor)?;
        }
        for method in &self.methods {
            writeln!(f)?;
            writeln!(
                f,
                "  method {}{}  stack={} locals={}",
                method.name, method.descriptor, method.max_stack, method.max_locals
            )?;
            let mut by_index: Vec<(usize, Label)> =
                method.labels.iter().map(|(l, i)| (*i, *l)).collect();
            by_index.sort();
            let mut pending = by_index.iter().peekable();
            for (i, insn) in method.code.iter().enumerate() {
                while let Some((_, label)) = pending.next_if(|(at, _)| *at == i) {
                    writeln!(f, "   L{}:", label.0)?;
                }
                writeln!(f, "    {i:4}: {insn}")?;
            }
            for (_, label) in pending {
                writeln!(f, "   L{}:", label.0)?;
            }
            for var in &method.locals {
                writeln!(
                    f,
                    "    local {} {} slot {} L{}..L{}",
                    var.name, var.descriptor, var.slot, var.start.0, var.end.0
                )?;
            }
        }
        Ok(())
    }
}

/// Collects fields and methods for one class. Consumed by [`seal`](Self::seal),
/// so a module only exists once every method was built.
#[derive(Debug)]
pub struct ClassBuilder {
    module: ClassModule,
}

impl ClassBuilder {
    pub fn new(access: u16, name: &str, super_name: &str, interfaces: &[&str]) -> Self {
        Self {
            module: ClassModule {
                access,
                name: name.to_string(),
                super_name: super_name.to_string(),
                interfaces: interfaces.iter().map(|i| (*i).to_string()).collect(),
                fields: Vec::new(),
                methods: Vec::new(),
                source_file: None,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.module.name
    }

    pub fn add_field(&mut self, access: u16, name: &str, descriptor: &str) -> Result<(), CompileError> {
        if self.module.fields.iter().any(|f| f.name == name) {
            return Err(CompileError::internal(
                format!("duplicate field '{name}'"),
                Span::default(),
            ));
        }
        self.module.fields.push(Field {
            access,
            name: name.to_string(),
            descriptor: descriptor.to_string(),
        });
        Ok(())
    }

    pub fn add_method(&mut self, method: Method) {
        self.module.methods.push(method);
    }

    pub fn set_source_file(&mut self, name: impl Into<String>) {
        self.module.source_file = Some(name.into());
    }

    pub fn seal(self) -> ClassModule {
        self.module
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn builder() -> MethodBuilder {
        MethodBuilder::new(ACC_PUBLIC, "run", "()V").unwrap()
    }

    #[test]
    fn descriptor_sizes() {
        assert_eq!(descriptor_slots("()V").unwrap(), (0, 0));
        assert_eq!(descriptor_slots("(J)V").unwrap(), (2, 0));
        assert_eq!(descriptor_slots("([Ljava/lang/String;I)Ljava/net/URL;").unwrap(), (2, 1));
        assert_eq!(descriptor_slots("(II)J").unwrap(), (2, 2));
        assert_eq!(field_slots("[[I").unwrap(), 1);
        assert!(descriptor_slots("(Lfoo").is_err());
        assert!(descriptor_slots("I").is_err());
        assert!(field_slots("II").is_err());
    }

    #[test]
    fn straight_line_max_stack() {
        let mut m = builder();
        m.emit(Insn::Iconst(1));
        m.emit(Insn::Iconst(2));
        m.emit(Insn::Iconst(3));
        m.emit(Insn::Imul);
        m.emit(Insn::Iadd);
        m.emit(Insn::Pop);
        m.emit(Insn::Return);
        assert_eq!(m.finish().unwrap().max_stack, 3);
    }

    #[test]
    fn long_values_take_two_words() {
        let mut m = builder();
        m.emit(Insn::Iconst(5));
        m.emit(Insn::I2l);
        m.emit(Insn::InvokeStatic(MemberRef::new("java/lang/Thread", "sleep", "(J)V")));
        m.emit(Insn::Return);
        assert_eq!(m.finish().unwrap().max_stack, 2);
    }

    #[test]
    fn branches_merge_at_equal_depth() {
        let mut m = builder();
        let else_ = m.create_label();
        let end = m.create_label();
        m.emit(Insn::Iconst(1));
        m.emit(Insn::Iconst(2));
        m.emit(Insn::IfIcmp(Cond::Ge, else_));
        m.emit(Insn::Iconst(1));
        m.emit(Insn::Goto(end));
        m.bind_label(else_);
        m.emit(Insn::Iconst(0));
        m.bind_label(end);
        m.emit(Insn::Pop);
        m.emit(Insn::Return);
        assert_eq!(m.finish().unwrap().max_stack, 2);
    }

    #[test]
    fn inconsistent_depth_is_rejected() {
        let mut m = builder();
        let join = m.create_label();
        m.emit(Insn::Iconst(0));
        m.emit(Insn::If(Cond::Eq, join));
        m.emit(Insn::Iconst(7));
        m.bind_label(join);
        m.emit(Insn::Return);
        let err = m.finish().unwrap_err();
        assert!(err.message.contains("inconsistent"), "{}", err.message);
    }

    #[test]
    fn underflow_and_unbound_labels_are_rejected() {
        let mut m = builder();
        m.emit(Insn::Pop);
        m.emit(Insn::Return);
        assert!(m.finish().unwrap_err().message.contains("underflow"));

        let mut m = builder();
        let nowhere = m.create_label();
        m.emit(Insn::Goto(nowhere));
        assert!(m.finish().unwrap_err().message.contains("unbound"));
    }

    #[test]
    fn missing_return_is_rejected() {
        let mut m = builder();
        m.emit(Insn::Iconst(0));
        m.emit(Insn::Pop);
        assert!(m.finish().unwrap_err().message.contains("falls off"));
    }

    #[test]
    fn locals_start_after_receiver_and_args() {
        let mut m = MethodBuilder::new(ACC_PUBLIC, "<init>", "([Ljava/lang/String;)V").unwrap();
        m.emit(Insn::Return);
        let mut s = MethodBuilder::new(ACC_PUBLIC | ACC_STATIC, "main", "([Ljava/lang/String;)V").unwrap();
        s.use_local(4);
        s.emit(Insn::Return);
        assert_eq!(m.finish().unwrap().max_locals, 2);
        assert_eq!(s.finish().unwrap().max_locals, 5);
    }

    #[test]
    fn disassembly_shows_labels() {
        let mut m = builder();
        let top = m.create_label();
        m.bind_label(top);
        m.emit(Insn::Iconst(100));
        m.emit(Insn::Pop);
        m.emit(Insn::Return);
        let mut class = ClassBuilder::new(ACC_PUBLIC | ACC_SUPER, "p", "java/lang/Object", &[]);
        class.add_method(m.finish().unwrap());
        let text = class.seal().to_string();
        assert!(text.contains("L0:\n"), "{text}");
        assert!(text.contains("bipush 100"), "{text}");
    }
}
