#[allow(
    clippy::indexing_slicing,
    clippy::wildcard_imports,
    clippy::cast_possible_truncation,
    clippy::single_match_else,
    clippy::needless_pass_by_value,
    clippy::module_name_repetitions,
)]
pub mod ast;
pub mod error;
#[allow(
    clippy::indexing_slicing,
    clippy::cast_possible_truncation,
    clippy::single_match_else,
)]
pub mod lexer;
#[allow(
    clippy::indexing_slicing,
    clippy::wildcard_imports,
    clippy::single_match_else,
    clippy::needless_pass_by_value,
)]
pub mod parser;
pub mod symtab;
#[allow(
    clippy::wildcard_imports,
    clippy::single_match_else,
    clippy::needless_pass_by_value,
)]
pub mod typeck;
pub mod runtime;
#[allow(
    clippy::indexing_slicing,
    clippy::cast_possible_truncation,
    clippy::module_name_repetitions,
)]
pub mod bytecode;
#[allow(
    clippy::wildcard_imports,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::single_match_else,
    clippy::needless_pass_by_value,
)]
pub mod codegen;
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
)]
pub mod classfile;
#[allow(
    clippy::indexing_slicing,
    clippy::needless_pass_by_value,
)]
pub mod vm;

use tracing::debug;

use ast::{Annotations, Program};
use bytecode::ClassModule;
use codegen::CodegenOptions;
use error::CompileError;

/// Output of a successful compilation.
#[derive(Debug, Clone)]
pub struct CompiledProgram {
    pub class_name: String,
    pub module: ClassModule,
    /// Class-file bytes of `module`.
    pub bytes: Vec<u8>,
}

/// source → lex → parse
pub fn parse_source(source: &str) -> Result<Program, Vec<CompileError>> {
    let tokens = lexer::lex(source).map_err(|e| vec![e])?;
    debug!(tokens = tokens.len(), "lexed");
    let program = parser::parse(source, tokens).map_err(|e| vec![e])?;
    debug!(program = %program.name, nodes = program.node_count, decls = program.decls.len(), "parsed");
    Ok(program)
}

/// source → lex → parse → type check
pub fn check_source(source: &str) -> Result<(Program, Annotations), Vec<CompileError>> {
    let program = parse_source(source)?;
    let annotations = typeck::type_check(&program)?;
    debug!("type checked");
    Ok((program, annotations))
}

/// Compile a source string into a class.
///
/// This is the primary public entry point for the pipeline:
/// source → lex → parse → type check → generate → class-file bytes
pub fn compile_source(source: &str, options: &CodegenOptions) -> Result<CompiledProgram, Vec<CompileError>> {
    let (program, annotations) = check_source(source)?;
    let module = codegen::generate(&program, &annotations, options).map_err(|e| vec![e])?;
    debug!(methods = module.methods.len(), fields = module.fields.len(), "generated");
    let bytes = classfile::write_class(&module).map_err(|e| vec![e])?;
    debug!(bytes = bytes.len(), "encoded class file");
    Ok(CompiledProgram {
        class_name: program.name,
        module,
        bytes,
    })
}
