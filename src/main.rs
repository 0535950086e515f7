//! The `tellur` CLI: run a TPL source file, or start a REPL when invoked
//! with no arguments. Exit code is 0 on success and 1 on any error.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tellur::sql::Catalog;
use tellur::vm::{compile_source, VM};
use tellur::Config;

#[derive(Debug, Parser)]
#[command(
    name = "tellur",
    about = "A JIT-compiling, vectorized SQL execution engine",
    version
)]
struct Args {
    /// TPL source file to execute; starts a REPL when omitted.
    file: Option<String>,

    /// Print the compiled module's disassembly before executing.
    #[arg(long)]
    dump_bytecode: bool,
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_new(&config.logging.level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Compile `source` and invoke its `main` function.
fn compile_and_run(source: &str, catalog: &Arc<Catalog>, dump_bytecode: bool) -> Result<()> {
    let module = compile_source(source, "tpl")?;
    if dump_bytecode {
        println!("{}", module.disassemble());
    }
    let vm = VM::new(Arc::new(module), Arc::clone(catalog));

    // main may return int64 or nothing.
    let main = vm
        .module()
        .function_by_name("main")
        .context("no 'main' function in module")?;
    if main.num_params() == 1 {
        let mut result: i64 = 0;
        vm.invoke_by_name("main", &[std::ptr::from_mut(&mut result) as usize])?;
        println!("main() returned: {result}");
    } else {
        vm.invoke_by_name("main", &[])?;
    }
    Ok(())
}

fn run_file(path: &str, catalog: &Arc<Catalog>, dump_bytecode: bool) -> Result<()> {
    let source =
        std::fs::read_to_string(path).with_context(|| format!("cannot read '{path}'"))?;
    compile_and_run(&source, catalog, dump_bytecode)
}

/// The REPL: accumulate lines until a blank line, then compile and run the
/// buffer. `.exit` quits; Ctrl-C drains and exits.
fn run_repl(catalog: &Arc<Catalog>, dump_bytecode: bool) -> Result<()> {
    println!("Welcome to Tellur. End a program with a blank line; '.exit' quits.");
    let mut editor = DefaultEditor::new()?;
    let mut buffer = String::new();

    loop {
        let prompt = if buffer.is_empty() { ">>> " } else { "... " };
        match editor.readline(prompt) {
            Ok(line) => {
                if line.trim() == ".exit" {
                    return Ok(());
                }
                if line.trim().is_empty() {
                    if buffer.is_empty() {
                        continue;
                    }
                    let _ = editor.add_history_entry(buffer.as_str());
                    if let Err(err) = compile_and_run(&buffer, catalog, dump_bytecode) {
                        eprintln!("error: {err:#}");
                    }
                    buffer.clear();
                } else {
                    buffer.push_str(&line);
                    buffer.push('\n');
                }
            }
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => return Ok(()),
            Err(err) => return Err(err.into()),
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    let config = Config::load().unwrap_or_default();
    init_logging(&config);

    rayon::ThreadPoolBuilder::new()
        .num_threads(config.worker_threads())
        .build_global()
        .ok();

    info!("initializing engine");
    let catalog = Arc::new(Catalog::with_test_tables());

    let result = match &args.file {
        Some(path) => run_file(path, &catalog, args.dump_bytecode),
        None => run_repl(&catalog, args.dump_bytecode),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
