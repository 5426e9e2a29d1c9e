//! Serialize a [`ClassModule`] to JVM class-file bytes.
//!
//! Version 49 (Java 5) is emitted so the verifier does not ask for
//! `StackMapTable` frames.

use indexmap::IndexSet;

use super::ast::Span;
use super::bytecode::{ClassModule, Cond, Insn, Label, Method};
use super::error::CompileError;

pub const MAGIC: u32 = 0xCAFE_BABE;
pub const MAJOR_VERSION: u16 = 49;
pub const MINOR_VERSION: u16 = 0;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum PoolEntry {
    Utf8(String),
    Integer(i32),
    Class(u16),
    String(u16),
    NameAndType(u16, u16),
    Fieldref(u16, u16),
    Methodref(u16, u16),
}

/// Deduplicating constant pool. Index 0 is unused, so entry `i` of the set
/// has pool index `i + 1`.
#[derive(Debug, Default)]
struct ConstantPool {
    entries: IndexSet<PoolEntry>,
}

impl ConstantPool {
    fn add(&mut self, entry: PoolEntry) -> Result<u16, CompileError> {
        let (index, _) = self.entries.insert_full(entry);
        u16::try_from(index + 1)
            .ok()
            .filter(|i| *i < u16::MAX)
            .ok_or_else(|| internal("constant pool overflow (max 65534 entries)"))
    }

    fn utf8(&mut self, s: &str) -> Result<u16, CompileError> {
        self.add(PoolEntry::Utf8(s.to_string()))
    }

    fn class(&mut self, name: &str) -> Result<u16, CompileError> {
        let name = self.utf8(name)?;
        self.add(PoolEntry::Class(name))
    }

    fn string(&mut self, s: &str) -> Result<u16, CompileError> {
        let s = self.utf8(s)?;
        self.add(PoolEntry::String(s))
    }

    fn name_and_type(&mut self, name: &str, descriptor: &str) -> Result<u16, CompileError> {
        let name = self.utf8(name)?;
        let descriptor = self.utf8(descriptor)?;
        self.add(PoolEntry::NameAndType(name, descriptor))
    }

    fn field(&mut self, owner: &str, name: &str, descriptor: &str) -> Result<u16, CompileError> {
        let class = self.class(owner)?;
        let nat = self.name_and_type(name, descriptor)?;
        self.add(PoolEntry::Fieldref(class, nat))
    }

    fn method(&mut self, owner: &str, name: &str, descriptor: &str) -> Result<u16, CompileError> {
        let class = self.class(owner)?;
        let nat = self.name_and_type(name, descriptor)?;
        self.add(PoolEntry::Methodref(class, nat))
    }

    fn write(&self, out: &mut Vec<u8>) -> Result<(), CompileError> {
        put_u16(out, u16::try_from(self.entries.len() + 1).map_err(|_| internal("constant pool overflow"))?);
        for entry in &self.entries {
            match entry {
                PoolEntry::Utf8(s) => {
                    let bytes = modified_utf8(s);
                    out.push(1);
                    put_u16(out, u16::try_from(bytes.len()).map_err(|_| internal("string constant too long"))?);
                    out.extend_from_slice(&bytes);
                }
                PoolEntry::Integer(v) => {
                    out.push(3);
                    out.extend_from_slice(&v.to_be_bytes());
                }
                PoolEntry::Class(name) => {
                    out.push(7);
                    put_u16(out, *name);
                }
                PoolEntry::String(s) => {
                    out.push(8);
                    put_u16(out, *s);
                }
                PoolEntry::Fieldref(class, nat) => {
                    out.push(9);
                    put_u16(out, *class);
                    put_u16(out, *nat);
                }
                PoolEntry::Methodref(class, nat) => {
                    out.push(10);
                    put_u16(out, *class);
                    put_u16(out, *nat);
                }
                PoolEntry::NameAndType(name, descriptor) => {
                    out.push(12);
                    put_u16(out, *name);
                    put_u16(out, *descriptor);
                }
            }
        }
        Ok(())
    }
}

fn internal(message: &str) -> CompileError {
    CompileError::internal(message, Span::default())
}

fn put_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_be_bytes());
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}

/// The JVM's string encoding: NUL as two bytes, supplementary characters
/// as surrogate pairs of three bytes each.
pub fn modified_utf8(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len());
    for unit in s.encode_utf16() {
        match unit {
            0x0001..=0x007F => out.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                out.push(0xC0 | (unit >> 6) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                out.push(0xE0 | (unit >> 12) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
    out
}

/// Encode a whole class.
pub fn write_class(module: &ClassModule) -> Result<Vec<u8>, CompileError> {
    let mut pool = ConstantPool::default();
    let mut body = Vec::new();

    put_u16(&mut body, module.access);
    let this_class = pool.class(&module.name)?;
    put_u16(&mut body, this_class);
    let super_class = pool.class(&module.super_name)?;
    put_u16(&mut body, super_class);

    put_u16(&mut body, count(module.interfaces.len(), "interfaces")?);
    for iface in &module.interfaces {
        let idx = pool.class(iface)?;
        put_u16(&mut body, idx);
    }

    put_u16(&mut body, count(module.fields.len(), "fields")?);
    for field in &module.fields {
        put_u16(&mut body, field.access);
        let name = pool.utf8(&field.name)?;
        put_u16(&mut body, name);
        let descriptor = pool.utf8(&field.descriptor)?;
        put_u16(&mut body, descriptor);
        put_u16(&mut body, 0);
    }

    put_u16(&mut body, count(module.methods.len(), "methods")?);
    for method in &module.methods {
        write_method(&mut pool, &mut body, method)?;
    }

    match &module.source_file {
        Some(src) => {
            put_u16(&mut body, 1);
            let attr = pool.utf8("SourceFile")?;
            put_u16(&mut body, attr);
            put_u32(&mut body, 2);
            let src = pool.utf8(src)?;
            put_u16(&mut body, src);
        }
        None => put_u16(&mut body, 0),
    }

    let mut out = Vec::with_capacity(body.len() + 512);
    put_u32(&mut out, MAGIC);
    put_u16(&mut out, MINOR_VERSION);
    put_u16(&mut out, MAJOR_VERSION);
    pool.write(&mut out)?;
    out.extend_from_slice(&body);
    Ok(out)
}

fn count(n: usize, what: &str) -> Result<u16, CompileError> {
    u16::try_from(n).map_err(|_| internal(&format!("too many {what}")))
}

fn write_method(pool: &mut ConstantPool, out: &mut Vec<u8>, method: &Method) -> Result<(), CompileError> {
    put_u16(out, method.access);
    let name = pool.utf8(&method.name)?;
    put_u16(out, name);
    let descriptor = pool.utf8(&method.descriptor)?;
    put_u16(out, descriptor);
    put_u16(out, 1);

    let (code, pcs) = encode_code(pool, method)?;
    let pc_of = |label: Label| -> Result<u16, CompileError> {
        let index = method
            .label_index(label)
            .ok_or_else(|| internal(&format!("{}: unbound label {label:?}", method.name)))?;
        pcs.get(index)
            .copied()
            .ok_or_else(|| internal("label outside method"))
    };

    let mut attrs = Vec::new();
    let mut attr_count = 0u16;
    if !method.locals.is_empty() {
        attr_count += 1;
        let lvt = pool.utf8("LocalVariableTable")?;
        put_u16(&mut attrs, lvt);
        put_u32(&mut attrs, 2 + 10 * u32::from(count(method.locals.len(), "locals")?));
        put_u16(&mut attrs, count(method.locals.len(), "locals")?);
        for var in &method.locals {
            let start = pc_of(var.start)?;
            let end = pc_of(var.end)?;
            put_u16(&mut attrs, start);
            put_u16(&mut attrs, end.saturating_sub(start));
            let name = pool.utf8(&var.name)?;
            put_u16(&mut attrs, name);
            let descriptor = pool.utf8(&var.descriptor)?;
            put_u16(&mut attrs, descriptor);
            put_u16(&mut attrs, var.slot);
        }
    }

    let code_attr = pool.utf8("Code")?;
    put_u16(out, code_attr);
    let length = 2 + 2 + 4 + code.len() + 2 + 2 + attrs.len();
    put_u32(out, u32::try_from(length).map_err(|_| internal("Code attribute too large"))?);
    put_u16(out, method.max_stack);
    put_u16(out, method.max_locals);
    put_u32(out, u32::try_from(code.len()).map_err(|_| internal("method too large"))?);
    out.extend_from_slice(&code);
    put_u16(out, 0); // exception table
    put_u16(out, attr_count);
    out.extend_from_slice(&attrs);
    Ok(())
}

/// Operands of one instruction once every pool index is known.
enum Encoded {
    Bytes(Vec<u8>),
    Branch(u8, Label),
}

impl Encoded {
    fn len(&self) -> usize {
        match self {
            Encoded::Bytes(b) => b.len(),
            Encoded::Branch(..) => 3,
        }
    }
}

/// Returns the bytecode and, for every instruction index (plus one past the
/// end), its byte offset.
fn encode_code(pool: &mut ConstantPool, method: &Method) -> Result<(Vec<u8>, Vec<u16>), CompileError> {
    let mut encoded = Vec::with_capacity(method.code.len());
    for insn in &method.code {
        encoded.push(encode(pool, insn)?);
    }

    let mut pcs = Vec::with_capacity(encoded.len() + 1);
    let mut pc = 0usize;
    for e in &encoded {
        pcs.push(u16::try_from(pc).map_err(|_| internal("method exceeds 65535 bytes"))?);
        pc += e.len();
    }
    if pc > usize::from(u16::MAX) {
        return Err(internal("method exceeds 65535 bytes"));
    }
    pcs.push(u16::try_from(pc).map_err(|_| internal("method exceeds 65535 bytes"))?);

    let mut code = Vec::with_capacity(pc);
    for (e, &at) in encoded.iter().zip(&pcs) {
        match e {
            Encoded::Bytes(bytes) => code.extend_from_slice(bytes),
            Encoded::Branch(opcode, label) => {
                let target = method
                    .label_index(*label)
                    .and_then(|i| pcs.get(i).copied())
                    .ok_or_else(|| internal(&format!("{}: unbound label", method.name)))?;
                let offset = i16::try_from(i32::from(target) - i32::from(at))
                    .map_err(|_| internal("branch offset out of range"))?;
                code.push(*opcode);
                code.extend_from_slice(&offset.to_be_bytes());
            }
        }
    }
    Ok((code, pcs))
}

fn with_u16(opcode: u8, index: u16) -> Encoded {
    let [hi, lo] = index.to_be_bytes();
    Encoded::Bytes(vec![opcode, hi, lo])
}

fn local(short_base: u8, long_op: u8, slot: u16) -> Encoded {
    match slot {
        0..=3 => Encoded::Bytes(vec![short_base + slot as u8]),
        4..=255 => Encoded::Bytes(vec![long_op, slot as u8]),
        _ => {
            let [hi, lo] = slot.to_be_bytes();
            Encoded::Bytes(vec![0xC4, long_op, hi, lo])
        }
    }
}

fn ldc(index: u16) -> Encoded {
    match u8::try_from(index) {
        Ok(i) => Encoded::Bytes(vec![0x12, i]),
        Err(_) => with_u16(0x13, index),
    }
}

fn cond_offset(cond: Cond) -> u8 {
    match cond {
        Cond::Eq => 0,
        Cond::Ne => 1,
        Cond::Lt => 2,
        Cond::Ge => 3,
        Cond::Gt => 4,
        Cond::Le => 5,
    }
}

fn encode(pool: &mut ConstantPool, insn: &Insn) -> Result<Encoded, CompileError> {
    let single = |op: u8| Encoded::Bytes(vec![op]);
    Ok(match insn {
        Insn::AconstNull => single(0x01),
        Insn::Iconst(v) => match *v {
            -1..=5 => single((0x03 + v) as u8),
            -128..=127 => Encoded::Bytes(vec![0x10, *v as i8 as u8]),
            -32768..=32767 => {
                let [hi, lo] = (*v as i16).to_be_bytes();
                Encoded::Bytes(vec![0x11, hi, lo])
            }
            _ => ldc(pool.add(PoolEntry::Integer(*v))?),
        },
        Insn::Ldc(s) => ldc(pool.string(s)?),
        Insn::Iload(n) => local(0x1A, 0x15, *n),
        Insn::Aload(n) => local(0x2A, 0x19, *n),
        Insn::Istore(n) => local(0x3B, 0x36, *n),
        Insn::Astore(n) => local(0x4B, 0x3A, *n),
        Insn::Aaload => single(0x32),
        Insn::Pop => single(0x57),
        Insn::Dup => single(0x59),
        Insn::Swap => single(0x5F),
        Insn::Iadd => single(0x60),
        Insn::Isub => single(0x64),
        Insn::Imul => single(0x68),
        Insn::Idiv => single(0x6C),
        Insn::Irem => single(0x70),
        Insn::Iand => single(0x7E),
        Insn::Ior => single(0x80),
        Insn::I2l => single(0x85),
        Insn::If(c, l) => Encoded::Branch(0x99 + cond_offset(*c), *l),
        Insn::IfIcmp(c, l) => Encoded::Branch(0x9F + cond_offset(*c), *l),
        Insn::IfAcmp(c, l) => match c {
            Cond::Eq => Encoded::Branch(0xA5, *l),
            Cond::Ne => Encoded::Branch(0xA6, *l),
            other => {
                return Err(internal(&format!("if_acmp has no {other:?} form")));
            }
        },
        Insn::Goto(l) => Encoded::Branch(0xA7, *l),
        Insn::Return => single(0xB1),
        Insn::GetStatic(m) => with_u16(0xB2, pool.field(&m.owner, &m.name, &m.descriptor)?),
        Insn::GetField(m) => with_u16(0xB4, pool.field(&m.owner, &m.name, &m.descriptor)?),
        Insn::PutField(m) => with_u16(0xB5, pool.field(&m.owner, &m.name, &m.descriptor)?),
        Insn::InvokeVirtual(m) => with_u16(0xB6, pool.method(&m.owner, &m.name, &m.descriptor)?),
        Insn::InvokeSpecial(m) => with_u16(0xB7, pool.method(&m.owner, &m.name, &m.descriptor)?),
        Insn::InvokeStatic(m) => with_u16(0xB8, pool.method(&m.owner, &m.name, &m.descriptor)?),
        Insn::New(class) => with_u16(0xBB, pool.class(class)?),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::dsl::bytecode::{ClassBuilder, MemberRef, MethodBuilder, ACC_PUBLIC, ACC_SUPER};

    fn class_with(build: impl FnOnce(&mut MethodBuilder)) -> ClassModule {
        let mut m = MethodBuilder::new(ACC_PUBLIC, "run", "()V").unwrap();
        build(&mut m);
        let mut class = ClassBuilder::new(ACC_PUBLIC | ACC_SUPER, "p", "java/lang/Object", &["java/lang/Runnable"]);
        class.add_method(m.finish().unwrap());
        class.seal()
    }

    #[test]
    fn header() {
        let bytes = write_class(&class_with(|m| m.emit(Insn::Return))).unwrap();
        assert_eq!(&bytes[0..4], &[0xCA, 0xFE, 0xBA, 0xBE]);
        assert_eq!(&bytes[4..8], &[0, 0, 0, 49]);
        assert!(bytes.windows(4).any(|w| w == b"Code"));
    }

    #[test]
    fn pool_entries_are_shared() {
        let mut pool = ConstantPool::default();
        let a = pool.method("pipeline/runtime/ImageOps", "add", "()V").unwrap();
        let b = pool.method("pipeline/runtime/ImageOps", "add", "()V").unwrap();
        let c = pool.class("pipeline/runtime/ImageOps").unwrap();
        assert_eq!(a, b);
        assert!(c < a);
        // utf8 owner, class, utf8 name, utf8 descriptor, name-and-type, methodref
        assert_eq!(pool.entries.len(), 6);
    }

    #[test]
    fn int_constants_pick_shortest_form() {
        let mut pool = ConstantPool::default();
        let len = |pool: &mut ConstantPool, v| encode(pool, &Insn::Iconst(v)).unwrap().len();
        assert_eq!(len(&mut pool, -1), 1);
        assert_eq!(len(&mut pool, 5), 1);
        assert_eq!(len(&mut pool, 6), 2);
        assert_eq!(len(&mut pool, -128), 2);
        assert_eq!(len(&mut pool, 1000), 3);
        assert_eq!(len(&mut pool, 100_000), 2);
        assert_eq!(pool.entries.len(), 1);
    }

    #[test]
    fn locals_use_short_forms() {
        let mut pool = ConstantPool::default();
        let bytes = |pool: &mut ConstantPool, insn| match encode(pool, &insn).unwrap() {
            Encoded::Bytes(b) => b,
            Encoded::Branch(..) => panic!("not a branch"),
        };
        assert_eq!(bytes(&mut pool, Insn::Aload(0)), vec![0x2A]);
        assert_eq!(bytes(&mut pool, Insn::Istore(3)), vec![0x3E]);
        assert_eq!(bytes(&mut pool, Insn::Iload(7)), vec![0x15, 7]);
        assert_eq!(bytes(&mut pool, Insn::Astore(300)), vec![0xC4, 0x3A, 0x01, 0x2C]);
    }

    #[test]
    fn branch_offsets_are_relative() {
        let module = class_with(|m| {
            let top = m.create_label();
            let out = m.create_label();
            m.bind_label(top);
            m.emit(Insn::Iconst(0));
            m.emit(Insn::If(Cond::Ne, out));
            m.emit(Insn::Goto(top));
            m.bind_label(out);
            m.emit(Insn::Return);
        });
        let mut pool = ConstantPool::default();
        let (code, pcs) = encode_code(&mut pool, &module.methods[0]).unwrap();
        assert_eq!(pcs, vec![0, 1, 4, 7, 8]);
        assert_eq!(code, vec![0x03, 0x9A, 0x00, 0x06, 0xA7, 0xFF, 0xFC, 0xB1]);
    }

    #[test]
    fn acmp_only_has_equality_forms() {
        let mut pool = ConstantPool::default();
        let mut m = MethodBuilder::new(ACC_PUBLIC, "run", "()V").unwrap();
        let l = m.create_label();
        assert!(encode(&mut pool, &Insn::IfAcmp(Cond::Lt, l)).is_err());
        assert!(encode(&mut pool, &Insn::IfAcmp(Cond::Ne, l)).is_ok());
    }

    #[test]
    fn modified_utf8_encoding() {
        assert_eq!(modified_utf8("ab"), b"ab".to_vec());
        assert_eq!(modified_utf8("\0"), vec![0xC0, 0x80]);
        assert_eq!(modified_utf8("é"), vec![0xC3, 0xA9]);
        assert_eq!(modified_utf8("😀").len(), 6);
    }

    #[test]
    fn source_file_and_fields_are_written() {
        let mut class = ClassBuilder::new(ACC_PUBLIC | ACC_SUPER, "p", "java/lang/Object", &[]);
        class.add_field(0, "n", "I").unwrap();
        class.set_source_file("p.pipe");
        let mut m = MethodBuilder::new(ACC_PUBLIC, "run", "()V").unwrap();
        m.emit(Insn::InvokeStatic(MemberRef::new("pipeline/runtime/Frame", "getScreenWidth", "()I")));
        m.emit(Insn::Pop);
        m.emit(Insn::Return);
        class.add_method(m.finish().unwrap());
        let bytes = write_class(&class.seal()).unwrap();
        let has = |needle: &[u8]| bytes.windows(needle.len()).any(|w| w == needle);
        assert!(has(b"SourceFile"));
        assert!(has(b"p.pipe"));
        assert!(has(b"getScreenWidth"));
        // The class ends with the SourceFile attribute: name, length 2, value.
        assert_eq!(&bytes[bytes.len() - 6..bytes.len() - 2], &[0, 0, 0, 2]);
    }
}
