//! Entry points the generated code calls into.
//!
//! Single source of truth for owner class, method name, descriptor and
//! dispatch kind of every external call. Code generation, the simulator's
//! intrinsics and the reference listing all read from this table.

use super::ast::TypeName;
use super::bytecode::MemberRef;

pub const IMAGE_IO: &str = "pipeline/runtime/ImageIO";
pub const IMAGE_OPS: &str = "pipeline/runtime/ImageOps";
pub const FILTER_OPS: &str = "pipeline/runtime/FilterOps";
pub const FRAME: &str = "pipeline/runtime/Frame";
pub const BUFFERED_IMAGE: &str = "java/awt/image/BufferedImage";

pub const OBJECT: &str = "java/lang/Object";
pub const RUNNABLE: &str = "java/lang/Runnable";
pub const FILE: &str = "java/io/File";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Static,
    Virtual,
    /// Constructors.
    Special,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Entry {
    ReadFromUrl,
    ReadFromFile,
    Write,
    GetUrl,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    CopyImage,
    Scale,
    GetWidth,
    GetHeight,
    Blur,
    Gray,
    Convolve,
    Show,
    Hide,
    Move,
    GetX,
    GetY,
    CreateOrSetFrame,
    ScreenWidth,
    ScreenHeight,
    Sleep,
    // Platform
    ParseInt,
    ParseBoolean,
    FileInit,
    ObjectInit,
    SystemOut,
    Println,
}

/// One runtime entry point: its JVM coordinates plus a short description.
#[derive(Debug, Clone)]
pub struct RuntimeFn {
    pub entry: Entry,
    pub owner: &'static str,
    pub name: &'static str,
    pub descriptor: &'static str,
    pub dispatch: Dispatch,
    pub description: &'static str,
}

impl RuntimeFn {
    pub fn member(&self) -> MemberRef {
        MemberRef::new(self.owner, self.name, self.descriptor)
    }
}

/// All entry points, in [`Entry`] order.
pub static RUNTIME: &[RuntimeFn] = &[
    // ── Image I/O ───────────────────────────────────────────────
    RuntimeFn {
        entry: Entry::ReadFromUrl, owner: IMAGE_IO, name: "readFromURL",
        descriptor: "(Ljava/net/URL;)Ljava/awt/image/BufferedImage;",
        dispatch: Dispatch::Static, description: "Download and decode an image",
    },
    RuntimeFn {
        entry: Entry::ReadFromFile, owner: IMAGE_IO, name: "readFromFile",
        descriptor: "(Ljava/io/File;)Ljava/awt/image/BufferedImage;",
        dispatch: Dispatch::Static, description: "Decode an image file",
    },
    RuntimeFn {
        entry: Entry::Write, owner: IMAGE_IO, name: "write",
        descriptor: "(Ljava/awt/image/BufferedImage;Ljava/io/File;)Ljava/awt/image/BufferedImage;",
        dispatch: Dispatch::Static, description: "Encode an image into a file, returning the image",
    },
    RuntimeFn {
        entry: Entry::GetUrl, owner: IMAGE_IO, name: "getURL",
        descriptor: "([Ljava/lang/String;I)Ljava/net/URL;",
        dispatch: Dispatch::Static, description: "Parse args[i] as a URL",
    },
    // ── Image arithmetic ────────────────────────────────────────
    RuntimeFn {
        entry: Entry::Add, owner: IMAGE_OPS, name: "add",
        descriptor: "(Ljava/awt/image/BufferedImage;Ljava/awt/image/BufferedImage;)Ljava/awt/image/BufferedImage;",
        dispatch: Dispatch::Static, description: "Pixelwise sum of two images",
    },
    RuntimeFn {
        entry: Entry::Sub, owner: IMAGE_OPS, name: "sub",
        descriptor: "(Ljava/awt/image/BufferedImage;Ljava/awt/image/BufferedImage;)Ljava/awt/image/BufferedImage;",
        dispatch: Dispatch::Static, description: "Pixelwise difference of two images",
    },
    RuntimeFn {
        entry: Entry::Mul, owner: IMAGE_OPS, name: "mul",
        descriptor: "(Ljava/awt/image/BufferedImage;I)Ljava/awt/image/BufferedImage;",
        dispatch: Dispatch::Static, description: "Scale every pixel by an integer",
    },
    RuntimeFn {
        entry: Entry::Div, owner: IMAGE_OPS, name: "div",
        descriptor: "(Ljava/awt/image/BufferedImage;I)Ljava/awt/image/BufferedImage;",
        dispatch: Dispatch::Static, description: "Divide every pixel by an integer",
    },
    RuntimeFn {
        entry: Entry::Mod, owner: IMAGE_OPS, name: "mod",
        descriptor: "(Ljava/awt/image/BufferedImage;I)Ljava/awt/image/BufferedImage;",
        dispatch: Dispatch::Static, description: "Pixelwise remainder by an integer",
    },
    RuntimeFn {
        entry: Entry::CopyImage, owner: IMAGE_OPS, name: "copyImage",
        descriptor: "(Ljava/awt/image/BufferedImage;)Ljava/awt/image/BufferedImage;",
        dispatch: Dispatch::Static, description: "Independent copy of an image",
    },
    RuntimeFn {
        entry: Entry::Scale, owner: IMAGE_OPS, name: "scale",
        descriptor: "(Ljava/awt/image/BufferedImage;I)Ljava/awt/image/BufferedImage;",
        dispatch: Dispatch::Static, description: "Resize an image by an integer factor",
    },
    RuntimeFn {
        entry: Entry::GetWidth, owner: BUFFERED_IMAGE, name: "getWidth",
        descriptor: "()I", dispatch: Dispatch::Virtual, description: "Image width in pixels",
    },
    RuntimeFn {
        entry: Entry::GetHeight, owner: BUFFERED_IMAGE, name: "getHeight",
        descriptor: "()I", dispatch: Dispatch::Virtual, description: "Image height in pixels",
    },
    // ── Filters ─────────────────────────────────────────────────
    RuntimeFn {
        entry: Entry::Blur, owner: FILTER_OPS, name: "blurOp",
        descriptor: "(Ljava/awt/image/BufferedImage;Ljava/awt/image/BufferedImage;)Ljava/awt/image/BufferedImage;",
        dispatch: Dispatch::Static, description: "Blur src into dst (fresh image when dst is null)",
    },
    RuntimeFn {
        entry: Entry::Gray, owner: FILTER_OPS, name: "grayOp",
        descriptor: "(Ljava/awt/image/BufferedImage;Ljava/awt/image/BufferedImage;)Ljava/awt/image/BufferedImage;",
        dispatch: Dispatch::Static, description: "Grayscale src into dst (fresh image when dst is null)",
    },
    RuntimeFn {
        entry: Entry::Convolve, owner: FILTER_OPS, name: "convolveOp",
        descriptor: "(Ljava/awt/image/BufferedImage;Ljava/awt/image/BufferedImage;)Ljava/awt/image/BufferedImage;",
        dispatch: Dispatch::Static, description: "Convolve src into dst (fresh image when dst is null)",
    },
    // ── Frames ──────────────────────────────────────────────────
    RuntimeFn {
        entry: Entry::Show, owner: FRAME, name: "showImage",
        descriptor: "()Lpipeline/runtime/Frame;", dispatch: Dispatch::Virtual,
        description: "Make the frame visible",
    },
    RuntimeFn {
        entry: Entry::Hide, owner: FRAME, name: "hideImage",
        descriptor: "()Lpipeline/runtime/Frame;", dispatch: Dispatch::Virtual,
        description: "Hide the frame",
    },
    RuntimeFn {
        entry: Entry::Move, owner: FRAME, name: "moveFrame",
        descriptor: "(II)Lpipeline/runtime/Frame;", dispatch: Dispatch::Virtual,
        description: "Move the frame to (x, y)",
    },
    RuntimeFn {
        entry: Entry::GetX, owner: FRAME, name: "getXVal",
        descriptor: "()I", dispatch: Dispatch::Virtual, description: "Frame x position",
    },
    RuntimeFn {
        entry: Entry::GetY, owner: FRAME, name: "getYVal",
        descriptor: "()I", dispatch: Dispatch::Virtual, description: "Frame y position",
    },
    RuntimeFn {
        entry: Entry::CreateOrSetFrame, owner: FRAME, name: "createOrSetFrame",
        descriptor: "(Ljava/awt/image/BufferedImage;Lpipeline/runtime/Frame;)Lpipeline/runtime/Frame;",
        dispatch: Dispatch::Static,
        description: "Put an image into a frame, creating the frame when null",
    },
    RuntimeFn {
        entry: Entry::ScreenWidth, owner: FRAME, name: "getScreenWidth",
        descriptor: "()I", dispatch: Dispatch::Static, description: "Screen width in pixels",
    },
    RuntimeFn {
        entry: Entry::ScreenHeight, owner: FRAME, name: "getScreenHeight",
        descriptor: "()I", dispatch: Dispatch::Static, description: "Screen height in pixels",
    },
    // ── Platform ────────────────────────────────────────────────
    RuntimeFn {
        entry: Entry::Sleep, owner: "java/lang/Thread", name: "sleep",
        descriptor: "(J)V", dispatch: Dispatch::Static, description: "Pause for n milliseconds",
    },
    RuntimeFn {
        entry: Entry::ParseInt, owner: "java/lang/Integer", name: "parseInt",
        descriptor: "(Ljava/lang/String;)I", dispatch: Dispatch::Static,
        description: "Parse an integer argument",
    },
    RuntimeFn {
        entry: Entry::ParseBoolean, owner: "java/lang/Boolean", name: "parseBoolean",
        descriptor: "(Ljava/lang/String;)Z", dispatch: Dispatch::Static,
        description: "Parse a boolean argument",
    },
    RuntimeFn {
        entry: Entry::FileInit, owner: FILE, name: "<init>",
        descriptor: "(Ljava/lang/String;)V", dispatch: Dispatch::Special,
        description: "File handle for a path argument",
    },
    RuntimeFn {
        entry: Entry::ObjectInit, owner: OBJECT, name: "<init>",
        descriptor: "()V", dispatch: Dispatch::Special, description: "Superclass constructor",
    },
    RuntimeFn {
        entry: Entry::SystemOut, owner: "java/lang/System", name: "out",
        descriptor: "Ljava/io/PrintStream;", dispatch: Dispatch::Static,
        description: "Standard output stream (static field)",
    },
    RuntimeFn {
        entry: Entry::Println, owner: "java/io/PrintStream", name: "println",
        descriptor: "(Ljava/lang/String;)V", dispatch: Dispatch::Virtual,
        description: "Print a line",
    },
];

/// Look up an entry point.
pub fn lookup(entry: Entry) -> Option<&'static RuntimeFn> {
    RUNTIME.iter().find(|f| f.entry == entry)
}

/// Find the entry point a member reference names, if any.
pub fn identify(owner: &str, name: &str, descriptor: &str) -> Option<Entry> {
    RUNTIME
        .iter()
        .find(|f| f.owner == owner && f.name == name && f.descriptor == descriptor)
        .map(|f| f.entry)
}

/// Entry point that turns `args[i]` into a parameter of type `ty`, if `ty`
/// can be a parameter.
pub fn param_conversion(ty: TypeName) -> Option<Entry> {
    match ty {
        TypeName::Integer => Some(Entry::ParseInt),
        TypeName::Boolean => Some(Entry::ParseBoolean),
        TypeName::File => Some(Entry::FileInit),
        TypeName::Url => Some(Entry::GetUrl),
        TypeName::Image | TypeName::Frame | TypeName::None => None,
    }
}
