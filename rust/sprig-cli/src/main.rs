//! Command-line entry point for the sprig interpreter.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use sprig::Interp;
use sprig_cli::repl;

#[derive(Parser)]
#[command(name = "sprig", version, about = "An embeddable Lisp with a bytecode stack VM")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run a script file
    Run { file: PathBuf },
    /// Start the interactive REPL
    Repl,
    /// Compile a file and print its bytecode
    Dis { file: PathBuf },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.command {
        None | Some(Command::Repl) => repl::run(),
        Some(Command::Run { file }) => run_file(&file),
        Some(Command::Dis { file }) => dis_file(&file),
    }
}

fn read_source(file: &Path) -> Result<String, ExitCode> {
    std::fs::read_to_string(file).map_err(|e| {
        eprintln!("{}: {}", file.display(), e);
        ExitCode::FAILURE
    })
}

fn run_file(file: &Path) -> ExitCode {
    let source = match read_source(file) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let mut interp = Interp::new();
    match interp.eval(&source) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", repl::red(&e.to_string()));
            ExitCode::FAILURE
        }
    }
}

fn dis_file(file: &Path) -> ExitCode {
    let source = match read_source(file) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let mut interp = Interp::new();
    if let Err(e) = interp.load(&source) {
        eprintln!("{}", repl::red(&e.to_string()));
        return ExitCode::FAILURE;
    }
    match interp.dump_program() {
        Some(listing) => {
            print!("{}", listing);
            ExitCode::SUCCESS
        }
        None => ExitCode::FAILURE,
    }
}
