use std::path::{Path, PathBuf};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::dsl::codegen::CodegenOptions;
use crate::error::DriverError;
use crate::output::{read_json, write_json};

const SETTINGS_VERSION: u32 = 1;

/// Compiler settings read from `pipec.json`. Every field is optional in the
/// file; command-line flags override what is loaded here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct CompilerSettings {
    pub version: u32,
    /// Where `compile` writes class files.
    pub output_dir: PathBuf,
    /// Record the source file name in the class.
    pub source_file_attribute: bool,
    /// Emit a `LocalVariableTable` for `run`.
    pub local_variable_table: bool,
    /// Print `entering <method>` at the top of every generated method.
    pub trace_entry: bool,
    /// `tracing` filter directive used when `RUST_LOG` is unset.
    pub log_filter: Option<String>,
}

impl Default for CompilerSettings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            output_dir: PathBuf::from("."),
            source_file_attribute: false,
            local_variable_table: false,
            trace_entry: false,
            log_filter: None,
        }
    }
}

impl CompilerSettings {
    /// Code generation options for a source file at `source`.
    pub fn codegen_options(&self, source: &Path) -> CodegenOptions {
        CodegenOptions {
            source_file: if self.source_file_attribute {
                crate::paths::source_file_name(source)
            } else {
                None
            },
            local_variable_table: self.local_variable_table,
            trace_entry: self.trace_entry,
        }
    }
}

/// Load settings from `path`. A missing file means defaults.
pub fn load_settings(path: &Path) -> Result<CompilerSettings, DriverError> {
    if !path.exists() {
        return Ok(CompilerSettings::default());
    }
    read_json(path)
}

pub fn save_settings(path: &Path, settings: &CompilerSettings) -> Result<(), DriverError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    write_json(path, settings)
}

/// JSON schema of the settings file.
pub fn settings_schema() -> schemars::schema::RootSchema {
    schemars::schema_for!(CompilerSettings)
}
