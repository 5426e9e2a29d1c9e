//! Path definitions for everything the driver reads or writes.
//!
//! Single source of truth for leaf filenames and extensions. No other module
//! should hard-code these strings.

use std::path::{Path, PathBuf};

// ── Leaf filenames ───────────────────────────────────────────────

pub const SETTINGS_FILE: &str = "pipec.json";
pub const CLASS_EXTENSION: &str = "class";
pub const SOURCE_EXTENSION: &str = "pipe";

// ── Path builders ────────────────────────────────────────────────

pub fn settings_path(dir: &Path) -> PathBuf {
    dir.join(SETTINGS_FILE)
}

/// `<out_dir>/<class>.class`. Generated classes live in the default package,
/// so the class name never contains a separator.
pub fn class_file_path(out_dir: &Path, class: &str) -> PathBuf {
    out_dir.join(format!("{class}.{CLASS_EXTENSION}"))
}

/// Value of the `SourceFile` attribute for a source path: its file name.
pub fn source_file_name(source: &Path) -> Option<String> {
    source.file_name().map(|n| n.to_string_lossy().into_owned())
}
