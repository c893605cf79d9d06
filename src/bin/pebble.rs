use std::{fs, process};

use anyhow::{Context, Result};
use clap::Parser;
use pebble::{compile, debug::disassemble_function, InterpretResult, VirtualMachine, VmConfig};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "pebble")]
#[command(about = "Run a pebble script on the bytecode virtual machine")]
struct Cli {
    file: String,

    /// Print the compiled bytecode instead of running it
    #[arg(long)]
    disassemble: bool,

    /// Abort with a runtime error after this many instructions
    #[arg(long)]
    max_instructions: Option<u64>,

    /// Maximum call depth
    #[arg(long, default_value_t = pebble::MAX_FRAMES)]
    max_frames: usize,

    /// Maximum operand stack depth
    #[arg(long, default_value_t = pebble::STACK_SIZE)]
    stack_size: usize,
}

/// Enable with `RUST_LOG=pebble=debug` or `RUST_LOG=pebble=trace`.
fn init_tracing() {
    if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true).with_level(true).with_writer(std::io::stderr))
            .with(EnvFilter::from_default_env())
            .init();
    }
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let source = fs::read_to_string(&cli.file)
        .with_context(|| format!("Failed to read file: {}", cli.file))?;

    if cli.disassemble {
        let function = compile(&source).context("Compiler error")?;
        println!("{}", disassemble_function(&function));
        return Ok(());
    }

    let config = VmConfig {
        stack_size: cli.stack_size,
        max_frames: cli.max_frames,
        instruction_limit: cli.max_instructions,
    };
    let mut vm = VirtualMachine::new(config);
    let interpretation = vm.interpret(&source);

    for value in interpretation.output.iter() {
        println!("{}", value);
    }

    if let Some(error) = &interpretation.error {
        eprintln!("{}", error);
    }

    match interpretation.result {
        InterpretResult::Ok => Ok(()),
        InterpretResult::CompileError => process::exit(65),
        InterpretResult::RuntimeError => process::exit(70),
    }
}
