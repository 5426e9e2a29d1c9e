//! AST node types for the pipeline language.
//!
//! Nodes are plain owned data. Anything learned after parsing (resolved
//! types, identifier bindings) lives in [`Annotations`], keyed by [`NodeId`],
//! and declarations live in the program's arena, keyed by [`DecId`].

use std::collections::HashMap;

use serde::Serialize;

use super::lexer::{Kind, Token};

/// Source span for error reporting (byte offsets).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

/// Identity of an expression, chain or identifier-use node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

/// Index into [`Program::decls`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DecId(pub u32);

/// Value types of the language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TypeName {
    Integer,
    Boolean,
    Image,
    Frame,
    Url,
    File,
    /// A chain that produced nothing usable (e.g. writing into a file sink).
    None,
}

impl TypeName {
    /// Type named by a declaration keyword.
    pub fn from_kind(kind: Kind) -> Option<Self> {
        match kind {
            Kind::KwInteger => Some(Self::Integer),
            Kind::KwBoolean => Some(Self::Boolean),
            Kind::KwImage => Some(Self::Image),
            Kind::KwFrame => Some(Self::Frame),
            Kind::KwUrl => Some(Self::Url),
            Kind::KwFile => Some(Self::File),
            _ => None,
        }
    }

    /// Field/local descriptor of a value of this type on the target VM.
    pub fn descriptor(self) -> &'static str {
        match self {
            Self::Integer => "I",
            Self::Boolean => "Z",
            Self::Image => "Ljava/awt/image/BufferedImage;",
            Self::Frame => "Lpipeline/runtime/Frame;",
            Self::Url => "Ljava/net/URL;",
            Self::File => "Ljava/io/File;",
            Self::None => "V",
        }
    }

    /// Whether values of this type are object references (vs. int-like).
    pub fn is_reference(self) -> bool {
        matches!(self, Self::Image | Self::Frame | Self::Url | Self::File)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Image => "image",
            Self::Frame => "frame",
            Self::Url => "url",
            Self::File => "file",
            Self::None => "none",
        }
    }
}

impl std::fmt::Display for TypeName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ── Program & declarations ──────────────────────────────────────

/// A complete compilation unit.
#[derive(Debug, Clone)]
pub struct Program {
    pub name: String,
    pub first_token: Token,
    /// Parameter declarations in source order.
    pub params: Vec<DecId>,
    pub block: Block,
    /// Every declaration in the unit, parameters and locals, in parse order.
    pub decls: Vec<Declaration>,
    /// Number of [`NodeId`]s handed out by the parser.
    pub node_count: u32,
}

impl Program {
    pub fn decl(&self, id: DecId) -> Option<&Declaration> {
        self.decls.get(id.0 as usize)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecKind {
    /// Backed by an instance field, initialized from `args`.
    Param,
    /// Backed by a local slot of `run`.
    Local,
}

#[derive(Debug, Clone)]
pub struct Declaration {
    pub id: DecId,
    pub name: String,
    pub ty: TypeName,
    pub kind: DecKind,
    pub first_token: Token,
}

// ── Blocks & statements ─────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Block {
    pub first_token: Token,
    pub items: Vec<BlockItem>,
}

#[derive(Debug, Clone)]
pub enum BlockItem {
    Dec(LocalDec),
    Stmt(Statement),
}

/// `image img;` or `integer x <- 3 + 4;`
#[derive(Debug, Clone)]
pub struct LocalDec {
    pub dec: DecId,
    pub init: Option<Expr>,
    pub first_token: Token,
}

#[derive(Debug, Clone)]
pub struct Statement {
    pub first_token: Token,
    pub kind: StatementKind,
}

#[derive(Debug, Clone)]
pub enum StatementKind {
    Assign { target: IdentLValue, value: Expr },
    If { cond: Expr, body: Block },
    While { cond: Expr, body: Block },
    Sleep(Expr),
    Chain(Chain),
}

/// Assignment target.
#[derive(Debug, Clone)]
pub struct IdentLValue {
    pub id: NodeId,
    pub name: String,
    pub first_token: Token,
}

// ── Expressions ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Expr {
    pub id: NodeId,
    pub first_token: Token,
    pub kind: ExprKind,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Ident(String),
    IntLit(i32),
    BoolLit(bool),
    Constant(ScreenConstant),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    // Relational
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    // Weak
    Add,
    Sub,
    Or,
    // Strong
    Mul,
    Div,
    And,
    Mod,
}

impl BinOp {
    pub fn from_kind(kind: Kind) -> Option<Self> {
        Some(match kind {
            Kind::Lt => Self::Lt,
            Kind::Gt => Self::Gt,
            Kind::Le => Self::Le,
            Kind::Ge => Self::Ge,
            Kind::Equal => Self::Eq,
            Kind::NotEqual => Self::Ne,
            Kind::Plus => Self::Add,
            Kind::Minus => Self::Sub,
            Kind::Or => Self::Or,
            Kind::Times => Self::Mul,
            Kind::Div => Self::Div,
            Kind::And => Self::And,
            Kind::Mod => Self::Mod,
            _ => return None,
        })
    }

    pub fn is_relational(self) -> bool {
        matches!(
            self,
            Self::Lt | Self::Gt | Self::Le | Self::Ge | Self::Eq | Self::Ne
        )
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Gt => ">",
            Self::Le => "<=",
            Self::Ge => ">=",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Add => "+",
            Self::Sub => "-",
            Self::Or => "|",
            Self::Mul => "*",
            Self::Div => "/",
            Self::And => "&",
            Self::Mod => "%",
        }
    }
}

/// `screenwidth` / `screenheight`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenConstant {
    Width,
    Height,
}

// ── Chains ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Chain {
    pub id: NodeId,
    pub first_token: Token,
    pub kind: ChainKind,
}

#[derive(Debug, Clone)]
pub enum ChainKind {
    /// `left -> right`. `right` is never itself a `Binary`.
    Binary {
        left: Box<Chain>,
        op: FlowOp,
        op_token: Token,
        right: Box<Chain>,
    },
    Ident(String),
    Filter { op: FilterOp, args: Tuple },
    Frame { op: FrameOp, args: Tuple },
    Image { op: ImageOp, args: Tuple },
}

/// The two pipeline connectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowOp {
    /// `->`
    Advance,
    /// `|->`
    Hold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Blur,
    Gray,
    Convolve,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOp {
    Show,
    Hide,
    Move,
    Xloc,
    Yloc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageOp {
    Width,
    Height,
    Scale,
}

/// Parenthesized argument list of an operator chain element. Empty when the
/// element was written without parentheses.
#[derive(Debug, Clone)]
pub struct Tuple {
    pub first_token: Token,
    pub exprs: Vec<Expr>,
}

// ── Annotations ─────────────────────────────────────────────────

/// Side table filled by the type checker and read by code generation.
#[derive(Debug, Clone, Default)]
pub struct Annotations {
    types: HashMap<NodeId, TypeName>,
    bindings: HashMap<NodeId, DecId>,
}

impl Annotations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_type(&mut self, node: NodeId, ty: TypeName) {
        self.types.insert(node, ty);
    }

    pub fn type_of(&self, node: NodeId) -> Option<TypeName> {
        self.types.get(&node).copied()
    }

    pub fn bind(&mut self, node: NodeId, dec: DecId) {
        self.bindings.insert(node, dec);
    }

    pub fn binding(&self, node: NodeId) -> Option<DecId> {
        self.bindings.get(&node).copied()
    }
}
