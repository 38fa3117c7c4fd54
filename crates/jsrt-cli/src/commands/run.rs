//! Run command: script files, standard input, and embedded payloads.

use std::io::Read;

use jsrt_runtime::JsRuntime;

/// Run a script file to completion. Exit code 1 for any reported error.
pub fn run_file(path: &str, argv: Vec<String>) -> u8 {
    let source = match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("Error: cannot read '{path}': {err}");
            return 1;
        }
    };
    execute(path, &source, argv)
}

/// Run a script read from standard input.
pub fn run_stdin(argv: Vec<String>) -> u8 {
    let mut source = String::new();
    if let Err(err) = std::io::stdin().read_to_string(&mut source) {
        eprintln!("Error: failed to read stdin: {err}");
        return 1;
    }
    if source.is_empty() {
        eprintln!("Error: No input provided");
        return 1;
    }
    execute("<stdin>", &source, argv)
}

/// Execute bytecode found behind the packager footer, then drive the loop.
pub fn run_embedded(payload: &[u8], argv: Vec<String>) -> u8 {
    let mut runtime = match JsRuntime::new(argv) {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("{err}");
            return 1;
        }
    };
    if let Err(err) = runtime.eval_bytecode(payload) {
        eprintln!("{err}");
        runtime.free();
        return 1;
    }
    finish(runtime)
}

fn execute(filename: &str, source: &str, argv: Vec<String>) -> u8 {
    let mut runtime = match JsRuntime::new(argv) {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("{err}");
            return 1;
        }
    };
    let evaluated = match runtime.eval(filename, source) {
        Ok(value) => value,
        Err(err) => {
            eprintln!("{err}");
            runtime.free();
            return 1;
        }
    };
    if let Err(err) = runtime.await_value(evaluated) {
        eprintln!("{err}");
        runtime.free();
        return 1;
    }
    finish(runtime)
}

fn finish(mut runtime: JsRuntime) -> u8 {
    let code = match runtime.run() {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("{err}");
            1
        }
    };
    runtime.free();
    code
}
