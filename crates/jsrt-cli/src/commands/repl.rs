//! Interactive REPL with a history file.
//!
//! Line editing stays minimal (plain stdin); history is loaded from and
//! appended to `$JSRT_REPL_HISTORY`, defaulting to `~/.jsrt_repl`.

use std::io::{BufRead, Write};
use std::path::PathBuf;

use jsrt_runtime::JsRuntime;

fn history_path() -> Option<PathBuf> {
    match std::env::var("JSRT_REPL_HISTORY") {
        Ok(path) if !path.is_empty() => Some(PathBuf::from(path)),
        _ => dirs::home_dir().map(|home| home.join(".jsrt_repl")),
    }
}

fn load_history(path: &Option<PathBuf>) -> Vec<String> {
    let Some(path) = path else {
        return Vec::new();
    };
    std::fs::read_to_string(path)
        .map(|text| text.lines().map(str::to_string).collect())
        .unwrap_or_default()
}

fn save_history(path: &Option<PathBuf>, history: &[String]) {
    let Some(path) = path else {
        return;
    };
    let mut text = history.join("\n");
    text.push('\n');
    if let Err(err) = std::fs::write(path, text) {
        eprintln!("warning: could not save REPL history: {err}");
    }
}

fn print_meta_help() {
    println!("REPL commands:");
    println!("  /help     Show this help message");
    println!("  /exit     Exit the REPL (also Ctrl+D)");
    println!("  /quit     Exit the REPL");
    println!("  /clear    Clear the screen");
    println!();
    println!("Environment:");
    println!("  JSRT_REPL_HISTORY  History file path (default: ~/.jsrt_repl)");
}

pub fn run(argv: Vec<String>) -> u8 {
    let mut runtime = match JsRuntime::new(argv) {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("{err}");
            return 1;
        }
    };

    println!("Welcome to jsrt v{}", env!("CARGO_PKG_VERSION"));
    println!("Type /help for help, /exit to exit");

    let history_path = history_path();
    let mut history = load_history(&history_path);

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    loop {
        print!("jsrt> ");
        let _ = stdout.flush();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => {
                println!();
                break;
            }
            Ok(_) => {}
            Err(err) => {
                eprintln!("error reading input: {err}");
                break;
            }
        }
        let line = line.trim_end().to_string();
        if line.is_empty() {
            continue;
        }
        history.push(line.clone());

        match line.as_str() {
            "/exit" | "/quit" => break,
            "/help" => {
                print_meta_help();
                continue;
            }
            "/clear" => {
                print!("\x1b[2J\x1b[H");
                let _ = stdout.flush();
                continue;
            }
            _ => {}
        }

        match runtime.eval_display(&line) {
            Ok(rendered) => println!("{rendered}"),
            Err(err) => eprintln!("\x1b[31mUncaught\x1b[0m {err}"),
        }
        runtime.flush_exceptions();
    }

    println!("Goodbye!");
    save_history(&history_path, &history);
    runtime.free();
    0
}
