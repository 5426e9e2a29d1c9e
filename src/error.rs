use crate::dsl::error::CompileError;
use crate::dsl::vm::VmError;

/// Failure of a driver operation: reading sources and settings, compiling,
/// writing class files or simulating.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// Compile errors, already rendered against their source.
    #[error("{}", .0.join("\n"))]
    Compile(Vec<String>),
    #[error("simulation failed: {0}")]
    Vm(#[from] VmError),
}

impl DriverError {
    /// Render compile errors with line and column positions.
    pub fn compile(source: &str, errors: &[CompileError]) -> Self {
        DriverError::Compile(errors.iter().map(|e| e.format_with_source(source)).collect())
    }
}
