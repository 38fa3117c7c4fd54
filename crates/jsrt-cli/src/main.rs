//! jsrt command-line entry point.
//!
//! Startup order matters: a packaged executable carries bytecode behind the
//! boundary footer and must run it regardless of argv, so the payload probe
//! happens before argument parsing.

use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{CommandFactory, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(
    name = "jsrt",
    version,
    about = "jsrt - a small JavaScript runtime",
    args_conflicts_with_subcommands = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Script file to run; '-' reads from standard input
    script: Option<String>,

    /// Arguments passed through to the script
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the interactive REPL
    Repl,
    /// Create a self-contained executable from a script
    Build {
        file: PathBuf,
        output: Option<PathBuf>,
    },
    /// Print the version
    Version,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let argv: Vec<String> = std::env::args().collect();

    // Packaged executables run their payload no matter what argv says.
    if let Ok(current_exe) = std::env::current_exe() {
        if let Some(payload) = jsrt_runtime::embedded_payload(&current_exe) {
            return ExitCode::from(commands::run::run_embedded(&payload, argv));
        }
    }

    // Piped input with no arguments behaves like `jsrt -`.
    if argv.len() == 1 {
        if !std::io::stdin().is_terminal() {
            return ExitCode::from(commands::run::run_stdin(argv));
        }
        let _ = Cli::command().print_help();
        return ExitCode::from(1);
    }

    let cli = Cli::parse();
    let code = match cli.command {
        Some(Command::Repl) => commands::repl::run(argv),
        Some(Command::Build { file, output }) => commands::build::run(&file, output),
        Some(Command::Version) => {
            println!("jsrt {}", env!("CARGO_PKG_VERSION"));
            0
        }
        None => match cli.script.as_deref() {
            Some("-") => commands::run::run_stdin(argv),
            Some(script) => commands::run::run_file(script, argv),
            None => {
                if !std::io::stdin().is_terminal() {
                    commands::run::run_stdin(argv)
                } else {
                    let _ = Cli::command().print_help();
                    1
                }
            }
        },
    };
    ExitCode::from(code)
}
