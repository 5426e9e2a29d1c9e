use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use pipec::dsl::{self, ast::DecKind, lexer, vm};
use pipec::error::DriverError;
use pipec::settings::{self, CompilerSettings};
use pipec::{output, paths};

// ── CLI argument parsing ─────────────────────────────────────────

#[derive(Parser)]
#[command(name = "pipec", about = "Image pipeline language compiler", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file (defaults to ./pipec.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output raw JSON instead of formatted text
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a source file to <ProgramName>.class
    Compile {
        file: PathBuf,
        /// Output directory (overrides settings)
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Record the source file name in the class
        #[arg(long)]
        source_file: bool,
        /// Emit a LocalVariableTable for run()
        #[arg(long)]
        local_vars: bool,
        /// Print "entering <method>" at the top of every method
        #[arg(long)]
        trace_entry: bool,
    },
    /// Print the token list
    Tokens { file: PathBuf },
    /// Print the parsed program
    Ast { file: PathBuf },
    /// Print the generated class as a disassembly
    Disasm { file: PathBuf },
    /// Compile and simulate, printing every runtime call
    Run {
        file: PathBuf,
        /// Program arguments, one per parameter
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Print the JSON schema of the settings file
    Schema,
}

// ── Setup ────────────────────────────────────────────────────────

fn init_logging(settings: &CompilerSettings) {
    let fallback = settings.log_filter.as_deref().unwrap_or("warn");
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(fallback))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn settings_file(config: Option<&Path>) -> PathBuf {
    config.map_or_else(|| paths::settings_path(Path::new(".")), Path::to_path_buf)
}

fn read_source(file: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(file).with_context(|| format!("cannot read {}", file.display()))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ── Commands ─────────────────────────────────────────────────────

fn compile(
    settings: &CompilerSettings,
    file: &Path,
) -> anyhow::Result<dsl::CompiledProgram> {
    let source = read_source(file)?;
    let options = settings.codegen_options(file);
    let compiled =
        dsl::compile_source(&source, &options).map_err(|errors| DriverError::compile(&source, &errors))?;
    Ok(compiled)
}

fn execute(cli: Cli, mut settings: CompilerSettings) -> anyhow::Result<()> {
    match cli.command {
        Commands::Compile {
            file,
            out,
            source_file,
            local_vars,
            trace_entry,
        } => {
            if let Some(out) = out {
                settings.output_dir = out;
            }
            settings.source_file_attribute |= source_file;
            settings.local_variable_table |= local_vars;
            settings.trace_entry |= trace_entry;

            let compiled = compile(&settings, &file)?;
            let path = output::write_class_file(&settings.output_dir, &compiled.class_name, &compiled.bytes)?;
            info!(class = %compiled.class_name, path = %path.display(), "compiled");
            if cli.json {
                print_json(&serde_json::json!({
                    "class": compiled.class_name,
                    "path": path,
                    "bytes": compiled.bytes.len(),
                }))?;
            } else {
                println!("{}", path.display());
            }
        }
        Commands::Tokens { file } => {
            let source = read_source(&file)?;
            let tokens = lexer::lex(&source).map_err(|e| DriverError::compile(&source, &[e]))?;
            if cli.json {
                print_json(&tokens)?;
            } else {
                for t in &tokens {
                    println!("{:>4}:{:<3} {:<14} {}", t.line, t.column, t.kind.describe(), t.text(&source));
                }
            }
        }
        Commands::Ast { file } => {
            let source = read_source(&file)?;
            let program = dsl::parse_source(&source).map_err(|errors| DriverError::compile(&source, &errors))?;
            if cli.json {
                let decls: Vec<_> = program
                    .decls
                    .iter()
                    .map(|d| {
                        serde_json::json!({
                            "name": d.name,
                            "type": d.ty.name(),
                            "param": d.kind == DecKind::Param,
                        })
                    })
                    .collect();
                print_json(&serde_json::json!({
                    "name": program.name,
                    "nodes": program.node_count,
                    "decls": decls,
                }))?;
            } else {
                println!("{program:#?}");
            }
        }
        Commands::Disasm { file } => {
            let compiled = compile(&settings, &file)?;
            print!("{}", compiled.module);
        }
        Commands::Run { file, args } => {
            let compiled = compile(&settings, &file)?;
            let mut host = vm::TraceHost::new();
            let outcome = vm::run(&compiled.module, &args, &mut host).map_err(DriverError::from)?;
            debug!(steps = outcome.steps, calls = host.calls.len(), "run finished");
            if cli.json {
                print_json(&serde_json::json!({
                    "calls": host.calls,
                    "printed": outcome.printed,
                    "fields": outcome.fields,
                    "steps": outcome.steps,
                }))?;
            } else {
                for line in &outcome.printed {
                    println!("{line}");
                }
                for call in &host.calls {
                    println!("{call}");
                }
            }
        }
        Commands::Schema => print_json(&settings::settings_schema())?,
    }
    Ok(())
}

// ── Main ─────────────────────────────────────────────────────────

fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings_path = settings_file(cli.config.as_deref());
    let settings = match settings::load_settings(&settings_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: cannot load {}: {e}", settings_path.display());
            return ExitCode::FAILURE;
        }
    };
    init_logging(&settings);
    debug!(path = %settings_path.display(), "settings loaded");

    match execute(cli, settings) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
