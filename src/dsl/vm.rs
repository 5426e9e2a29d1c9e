//! Interpreter for generated class modules.
//!
//! Runs `main` of a [`ClassModule`] the way the JVM would, as far as the
//! generated code needs. Calls into the program's own class, `Object.<init>`,
//! `Integer.parseInt`, `Boolean.parseBoolean` and `System.out.println` are
//! handled here; every other call and every foreign `new` goes to a [`Host`].

use std::fmt;

use indexmap::IndexMap;
use serde::Serialize;
use tracing::{debug, trace};

use super::bytecode::{ClassModule, Cond, Insn, Label, MemberRef, Method};
use super::runtime::{self, Entry, OBJECT};

/// Instruction budget for [`run`].
pub const DEFAULT_STEP_LIMIT: u64 = 1_000_000;

/// Maximum nesting of calls into the program's own methods.
const MAX_CALL_DEPTH: usize = 64;

/// Runtime value. Booleans are `Int(0)` / `Int(1)` as on the JVM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value")]
pub enum Value {
    Int(i32),
    Long(i64),
    Null,
    Str(String),
    StrArray(Vec<String>),
    /// The program's single instance.
    Instance,
    /// An object owned by the host.
    Handle(u32),
    /// Result of `new`, waiting for its `<init>` call.
    Uninit(u32),
    /// `System.out`.
    PrintStream,
}

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Long(_) => "long",
            Value::Null => "null",
            Value::Str(_) => "string",
            Value::StrArray(_) => "string[]",
            Value::Instance => "instance",
            Value::Handle(_) => "handle",
            Value::Uninit(_) => "uninitialized object",
            Value::PrintStream => "print stream",
        }
    }

    /// Reference identity as `if_acmp` sees it.
    fn same_ref(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null)
            | (Value::Instance, Value::Instance)
            | (Value::PrintStream, Value::PrintStream) => true,
            (Value::Handle(a), Value::Handle(b)) | (Value::Uninit(a), Value::Uninit(b)) => a == b,
            _ => false,
        }
    }

    /// JVM default for a field of the given descriptor.
    fn default_for(descriptor: &str) -> Value {
        match descriptor {
            "I" | "Z" => Value::Int(0),
            "J" => Value::Long(0),
            _ => Value::Null,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Long(v) => write!(f, "{v}L"),
            Value::Null => f.write_str("null"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::StrArray(items) => write!(f, "{items:?}"),
            Value::Instance => f.write_str("this"),
            Value::Handle(h) => write!(f, "#{h}"),
            Value::Uninit(h) => write!(f, "<new {h}>"),
            Value::PrintStream => f.write_str("System.out"),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum VmError {
    #[error("{method}@{index}: operand stack underflow")]
    StackUnderflow { method: String, index: usize },
    #[error("{method}@{index}: expected {expected}, found {found}")]
    BadOperand {
        method: String,
        index: usize,
        expected: &'static str,
        found: &'static str,
    },
    #[error("{method}: local {slot} read before it was written")]
    UninitializedLocal { method: String, slot: u16 },
    #[error("{method}@{index}: division by zero")]
    DivideByZero { method: String, index: usize },
    #[error("{method}: control fell off the end of the code")]
    FellOffEnd { method: String },
    #[error("no such method: {0}")]
    MissingMethod(String),
    #[error("{0} returned no value")]
    MissingResult(String),
    #[error("array index {index} out of bounds for length {len}")]
    IndexOutOfBounds { index: i32, len: usize },
    #[error("cannot parse {0:?} as an integer")]
    NumberFormat(String),
    #[error("step limit of {0} instructions exceeded")]
    StepLimit(u64),
    #[error("call depth limit of {0} exceeded")]
    CallDepth(usize),
    #[error("host: {0}")]
    Host(String),
}

/// Stand-in for the runtime library.
pub trait Host {
    /// `new class` followed by `<init>` with the given descriptor.
    fn construct(&mut self, class: &str, descriptor: &str, args: &[Value]) -> Result<Value, VmError>;

    /// Call a runtime entry point. For virtual calls `args[0]` is the
    /// receiver. Returns `None` exactly when the descriptor returns `V`.
    fn invoke(&mut self, member: &MemberRef, args: &[Value]) -> Result<Option<Value>, VmError>;
}

/// State after `main` returned.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    /// Instance fields, in first-write order.
    pub fields: IndexMap<String, Value>,
    /// Locals of the last completed `run`, indexed by slot.
    pub run_locals: Vec<Option<Value>>,
    /// Lines written through `System.out.println`.
    pub printed: Vec<String>,
    pub steps: u64,
}

impl RunOutcome {
    pub fn local(&self, slot: u16) -> Option<&Value> {
        self.run_locals.get(usize::from(slot)).and_then(Option::as_ref)
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

/// Run `main` with the default step budget.
pub fn run(module: &ClassModule, args: &[String], host: &mut dyn Host) -> Result<RunOutcome, VmError> {
    run_with_limit(module, args, host, DEFAULT_STEP_LIMIT)
}

pub fn run_with_limit(
    module: &ClassModule,
    args: &[String],
    host: &mut dyn Host,
    step_limit: u64,
) -> Result<RunOutcome, VmError> {
    debug!(class = %module.name, args = args.len(), "simulating main");
    let mut vm = Vm {
        module,
        host,
        fields: IndexMap::new(),
        printed: Vec::new(),
        run_locals: Vec::new(),
        steps: 0,
        step_limit,
        next_uninit: 0,
        pending: IndexMap::new(),
        depth: 0,
    };
    let main = MemberRef::new(module.name.as_str(), "main", "([Ljava/lang/String;)V");
    vm.call_own(&main, vec![Value::StrArray(args.to_vec())])?;
    debug!(steps = vm.steps, printed = vm.printed.len(), "simulation finished");
    Ok(RunOutcome {
        fields: vm.fields,
        run_locals: vm.run_locals,
        printed: vm.printed,
        steps: vm.steps,
    })
}

struct Vm<'m, 'h> {
    module: &'m ClassModule,
    host: &'h mut dyn Host,
    fields: IndexMap<String, Value>,
    printed: Vec<String>,
    run_locals: Vec<Option<Value>>,
    steps: u64,
    step_limit: u64,
    next_uninit: u32,
    /// Class of every outstanding `Uninit` value.
    pending: IndexMap<u32, String>,
    depth: usize,
}

/// One activation of a method.
struct Frame<'m> {
    method: &'m Method,
    stack: Vec<Value>,
    locals: Vec<Option<Value>>,
    index: usize,
}

impl<'m> Frame<'m> {
    fn new(method: &'m Method, args: Vec<Value>) -> Self {
        let mut locals: Vec<Option<Value>> = vec![None; usize::from(method.max_locals)];
        for (slot, arg) in args.into_iter().enumerate() {
            if slot < locals.len() {
                locals[slot] = Some(arg);
            } else {
                locals.push(Some(arg));
            }
        }
        Self {
            method,
            stack: Vec::with_capacity(usize::from(method.max_stack)),
            locals,
            index: 0,
        }
    }

    fn pop(&mut self) -> Result<Value, VmError> {
        self.stack.pop().ok_or_else(|| VmError::StackUnderflow {
            method: self.method.name.clone(),
            index: self.index,
        })
    }

    fn pop_n(&mut self, n: usize) -> Result<Vec<Value>, VmError> {
        if self.stack.len() < n {
            return Err(VmError::StackUnderflow {
                method: self.method.name.clone(),
                index: self.index,
            });
        }
        Ok(self.stack.split_off(self.stack.len() - n))
    }

    fn pop_int(&mut self) -> Result<i32, VmError> {
        match self.pop()? {
            Value::Int(v) => Ok(v),
            other => Err(self.bad("int", &other)),
        }
    }

    fn bad(&self, expected: &'static str, found: &Value) -> VmError {
        VmError::BadOperand {
            method: self.method.name.clone(),
            index: self.index,
            expected,
            found: found.kind(),
        }
    }

    fn load(&self, slot: u16) -> Result<Value, VmError> {
        self.locals
            .get(usize::from(slot))
            .cloned()
            .flatten()
            .ok_or_else(|| VmError::UninitializedLocal {
                method: self.method.name.clone(),
                slot,
            })
    }

    fn store(&mut self, slot: u16, value: Value) {
        let slot = usize::from(slot);
        if slot >= self.locals.len() {
            self.locals.resize(slot + 1, None);
        }
        self.locals[slot] = Some(value);
    }

    fn int_binop(&mut self, op: impl FnOnce(i32, i32) -> i32) -> Result<(), VmError> {
        let right = self.pop_int()?;
        let left = self.pop_int()?;
        self.stack.push(Value::Int(op(left, right)));
        Ok(())
    }

    fn jump(&mut self, label: Label) -> Result<(), VmError> {
        self.index = self.method.label_index(label).ok_or_else(|| VmError::FellOffEnd {
            method: self.method.name.clone(),
        })?;
        Ok(())
    }

    /// Replace every copy of an uninitialized object once `<init>` ran.
    fn initialize(&mut self, id: u32, value: &Value) {
        let uninit = Value::Uninit(id);
        for v in self.stack.iter_mut().chain(self.locals.iter_mut().flatten()) {
            if *v == uninit {
                *v = value.clone();
            }
        }
    }
}

/// Number of argument values and whether the method returns one.
fn signature(member: &MemberRef) -> Result<(usize, bool), VmError> {
    let malformed = || VmError::MissingMethod(format!("{member} (malformed descriptor)"));
    let desc = member.descriptor.strip_prefix('(').ok_or_else(malformed)?;
    let (params, ret) = desc.split_once(')').ok_or_else(malformed)?;
    let mut count = 0;
    let mut chars = params.chars();
    while let Some(c) = chars.next() {
        match c {
            '[' => continue,
            'L' => {
                if !chars.by_ref().any(|c| c == ';') {
                    return Err(malformed());
                }
                count += 1;
            }
            _ => count += 1,
        }
    }
    Ok((count, ret != "V"))
}

impl<'m> Vm<'m, '_> {
    fn tick(&mut self) -> Result<(), VmError> {
        self.steps += 1;
        if self.steps > self.step_limit {
            return Err(VmError::StepLimit(self.step_limit));
        }
        Ok(())
    }

    /// Execute a method of the program's own class. `args` includes the
    /// receiver for instance methods.
    fn call_own(&mut self, member: &MemberRef, args: Vec<Value>) -> Result<Option<Value>, VmError> {
        let module = self.module;
        let method = module
            .method(&member.name, &member.descriptor)
            .ok_or_else(|| VmError::MissingMethod(member.to_string()))?;
        if self.depth >= MAX_CALL_DEPTH {
            return Err(VmError::CallDepth(MAX_CALL_DEPTH));
        }
        self.depth += 1;
        trace!(method = %member, "enter");
        let result = self.execute(Frame::new(method, args));
        self.depth -= 1;
        result
    }

    #[allow(clippy::too_many_lines)]
    fn execute(&mut self, mut frame: Frame<'m>) -> Result<Option<Value>, VmError> {
        let method = frame.method;
        let code = &method.code;
        loop {
            let Some(insn) = code.get(frame.index) else {
                return Err(VmError::FellOffEnd {
                    method: frame.method.name.clone(),
                });
            };
            self.tick()?;
            let mut next = frame.index + 1;

            match insn {
                Insn::AconstNull => frame.stack.push(Value::Null),
                Insn::Iconst(v) => frame.stack.push(Value::Int(*v)),
                Insn::Ldc(s) => frame.stack.push(Value::Str(s.clone())),
                Insn::Iload(n) | Insn::Aload(n) => {
                    let v = frame.load(*n)?;
                    frame.stack.push(v);
                }
                Insn::Istore(n) => {
                    let v = frame.pop_int()?;
                    frame.store(*n, Value::Int(v));
                }
                Insn::Astore(n) => {
                    let v = frame.pop()?;
                    frame.store(*n, v);
                }
                Insn::Pop => {
                    frame.pop()?;
                }
                Insn::Dup => {
                    let v = frame.pop()?;
                    frame.stack.push(v.clone());
                    frame.stack.push(v);
                }
                Insn::Swap => {
                    let top = frame.pop()?;
                    let below = frame.pop()?;
                    frame.stack.push(top);
                    frame.stack.push(below);
                }
                Insn::Aaload => {
                    let index = frame.pop_int()?;
                    let items = match frame.pop()? {
                        Value::StrArray(items) => items,
                        other => return Err(frame.bad("string[]", &other)),
                    };
                    let item = usize::try_from(index)
                        .ok()
                        .and_then(|i| items.get(i))
                        .ok_or(VmError::IndexOutOfBounds {
                            index,
                            len: items.len(),
                        })?;
                    frame.stack.push(Value::Str(item.clone()));
                }
                Insn::Iadd => frame.int_binop(i32::wrapping_add)?,
                Insn::Isub => frame.int_binop(i32::wrapping_sub)?,
                Insn::Imul => frame.int_binop(i32::wrapping_mul)?,
                Insn::Iand => frame.int_binop(|a, b| a & b)?,
                Insn::Ior => frame.int_binop(|a, b| a | b)?,
                Insn::Idiv | Insn::Irem => {
                    let right = frame.pop_int()?;
                    let left = frame.pop_int()?;
                    if right == 0 {
                        return Err(VmError::DivideByZero {
                            method: frame.method.name.clone(),
                            index: frame.index,
                        });
                    }
                    let v = if matches!(insn, Insn::Idiv) {
                        left.wrapping_div(right)
                    } else {
                        left.wrapping_rem(right)
                    };
                    frame.stack.push(Value::Int(v));
                }
                Insn::I2l => {
                    let v = frame.pop_int()?;
                    frame.stack.push(Value::Long(i64::from(v)));
                }
                Insn::If(cond, label) => {
                    let v = frame.pop_int()?;
                    if cond.holds(v, 0) {
                        frame.jump(*label)?;
                        next = frame.index;
                    }
                }
                Insn::IfIcmp(cond, label) => {
                    let right = frame.pop_int()?;
                    let left = frame.pop_int()?;
                    if cond.holds(left, right) {
                        frame.jump(*label)?;
                        next = frame.index;
                    }
                }
                Insn::IfAcmp(cond, label) => {
                    let right = frame.pop()?;
                    let left = frame.pop()?;
                    let same = left.same_ref(&right);
                    let taken = match cond {
                        Cond::Eq => same,
                        Cond::Ne => !same,
                        _ => return Err(frame.bad("reference equality", &left)),
                    };
                    if taken {
                        frame.jump(*label)?;
                        next = frame.index;
                    }
                }
                Insn::Goto(label) => {
                    frame.jump(*label)?;
                    next = frame.index;
                }
                Insn::Return => {
                    if frame.method.name == "run" {
                        self.run_locals = frame.locals;
                    }
                    return Ok(None);
                }
                Insn::New(class) => {
                    let id = self.next_uninit;
                    self.next_uninit += 1;
                    self.pending.insert(id, class.clone());
                    frame.stack.push(Value::Uninit(id));
                }
                Insn::GetStatic(member) => {
                    if runtime::identify(&member.owner, &member.name, &member.descriptor)
                        == Some(Entry::SystemOut)
                    {
                        frame.stack.push(Value::PrintStream);
                    } else {
                        return Err(VmError::MissingMethod(format!("static field {member}")));
                    }
                }
                Insn::GetField(member) => {
                    match frame.pop()? {
                        Value::Instance => {}
                        other => return Err(frame.bad("instance", &other)),
                    }
                    let v = self
                        .fields
                        .get(&member.name)
                        .cloned()
                        .unwrap_or_else(|| Value::default_for(&member.descriptor));
                    frame.stack.push(v);
                }
                Insn::PutField(member) => {
                    let v = frame.pop()?;
                    match frame.pop()? {
                        Value::Instance => {}
                        other => return Err(frame.bad("instance", &other)),
                    }
                    self.fields.insert(member.name.clone(), v);
                }
                Insn::InvokeStatic(member) => {
                    let (argc, _) = signature(member)?;
                    let args = frame.pop_n(argc)?;
                    if let Some(v) = self.invoke_static(member, args)? {
                        frame.stack.push(v);
                    }
                }
                Insn::InvokeVirtual(member) => {
                    let (argc, _) = signature(member)?;
                    let args = frame.pop_n(argc + 1)?;
                    if let Some(v) = self.invoke_virtual(member, args)? {
                        frame.stack.push(v);
                    }
                }
                Insn::InvokeSpecial(member) => {
                    let (argc, _) = signature(member)?;
                    let mut args = frame.pop_n(argc + 1)?;
                    let receiver = args.remove(0);
                    match receiver {
                        Value::Uninit(id) => {
                            let value = self.construct(id, member, args)?;
                            frame.initialize(id, &value);
                        }
                        Value::Instance if member.owner == OBJECT && member.name == "<init>" => {}
                        other => return Err(frame.bad("uninitialized object", &other)),
                    }
                }
            }
            frame.index = next;
        }
    }

    fn construct(&mut self, id: u32, member: &MemberRef, args: Vec<Value>) -> Result<Value, VmError> {
        let class = self
            .pending
            .shift_remove(&id)
            .ok_or_else(|| VmError::MissingMethod(format!("{member} on a dead object")))?;
        if class != member.owner || member.name != "<init>" {
            return Err(VmError::MissingMethod(format!("{member} for a new {class}")));
        }
        if class == self.module.name {
            let mut all = vec![Value::Instance];
            all.extend(args);
            self.call_own(member, all)?;
            Ok(Value::Instance)
        } else {
            trace!(%class, "host construct");
            self.host.construct(&class, &member.descriptor, &args)
        }
    }

    fn invoke_static(&mut self, member: &MemberRef, args: Vec<Value>) -> Result<Option<Value>, VmError> {
        if member.owner == self.module.name {
            return self.call_own(member, args);
        }
        match runtime::identify(&member.owner, &member.name, &member.descriptor) {
            Some(Entry::ParseInt) => match args.first() {
                Some(Value::Str(s)) => s
                    .trim()
                    .parse::<i32>()
                    .map(|v| Some(Value::Int(v)))
                    .map_err(|_| VmError::NumberFormat(s.clone())),
                _ => Err(VmError::NumberFormat(String::new())),
            },
            Some(Entry::ParseBoolean) => {
                let truthy = matches!(args.first(), Some(Value::Str(s)) if s.eq_ignore_ascii_case("true"));
                Ok(Some(Value::Int(i32::from(truthy))))
            }
            _ => self.call_host(member, &args),
        }
    }

    fn invoke_virtual(&mut self, member: &MemberRef, args: Vec<Value>) -> Result<Option<Value>, VmError> {
        if member.owner == self.module.name {
            return self.call_own(member, args);
        }
        if runtime::identify(&member.owner, &member.name, &member.descriptor) == Some(Entry::Println) {
            if let [Value::PrintStream, line] = args.as_slice() {
                let text = match line {
                    Value::Str(s) => s.clone(),
                    other => other.to_string(),
                };
                self.printed.push(text);
                return Ok(None);
            }
        }
        self.call_host(member, &args)
    }

    fn call_host(&mut self, member: &MemberRef, args: &[Value]) -> Result<Option<Value>, VmError> {
        let (_, returns) = signature(member)?;
        trace!(%member, "host call");
        let result = self.host.invoke(member, args)?;
        match (returns, result) {
            (true, None) => Err(VmError::MissingResult(member.to_string())),
            (true, Some(v)) => Ok(Some(v)),
            (false, _) => Ok(None),
        }
    }
}

/// One host call recorded by [`TraceHost`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostCall {
    /// `Owner.name` for calls, `new Owner` for constructions.
    pub target: String,
    pub args: Vec<Value>,
    pub result: Option<Value>,
}

impl fmt::Display for HostCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.target)?;
        for (i, a) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{a}")?;
        }
        f.write_str(")")?;
        if let Some(r) = &self.result {
            write!(f, " -> {r}")?;
        }
        Ok(())
    }
}

/// Host that records every call and returns fresh handles for references
/// and zero for primitives.
#[derive(Debug, Default)]
pub struct TraceHost {
    pub calls: Vec<HostCall>,
    next_handle: u32,
}

impl TraceHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn fresh(&mut self) -> Value {
        self.next_handle += 1;
        Value::Handle(self.next_handle)
    }
}

impl Host for TraceHost {
    fn construct(&mut self, class: &str, _descriptor: &str, args: &[Value]) -> Result<Value, VmError> {
        let handle = self.fresh();
        self.calls.push(HostCall {
            target: format!("new {}", short_name(class)),
            args: args.to_vec(),
            result: Some(handle.clone()),
        });
        Ok(handle)
    }

    fn invoke(&mut self, member: &MemberRef, args: &[Value]) -> Result<Option<Value>, VmError> {
        let ret = member.descriptor.rsplit(')').next().unwrap_or("V");
        let result = match ret {
            "V" => None,
            "I" | "Z" => Some(Value::Int(0)),
            "J" => Some(Value::Long(0)),
            _ => Some(self.fresh()),
        };
        self.calls.push(HostCall {
            target: format!("{}.{}", short_name(&member.owner), member.name),
            args: args.to_vec(),
            result: result.clone(),
        });
        Ok(result)
    }
}

fn short_name(class: &str) -> &str {
    class.rsplit('/').next().unwrap_or(class)
}
