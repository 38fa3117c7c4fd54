//! Build command: package a script and the host binary into a
//! self-contained executable.

use std::path::{Path, PathBuf};

use jsrt_runtime::{JsRuntime, bytecode, modules};

pub fn run(file: &Path, output: Option<PathBuf>) -> u8 {
    println!("Building self-contained executable from {}...", file.display());

    let source = match std::fs::read_to_string(file) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("Error: cannot read '{}': {err}", file.display());
            return 1;
        }
    };

    // Bytecode serialization needs classic-script form.
    if modules::detect_module(&source) {
        eprintln!("Error: ES modules (import/export) are not supported in self-contained executables.");
        eprintln!("       Use CommonJS require() instead, e.g. const process = require('std:process');");
        return 1;
    }

    let output = output.unwrap_or_else(|| file.with_extension(""));
    if output == file {
        eprintln!(
            "Error: output '{}' would overwrite the input script",
            output.display()
        );
        return 1;
    }
    println!("Output target: {}", output.display());

    println!("Compiling JavaScript to bytecode...");
    let bytecode_bytes = {
        let runtime = match JsRuntime::new(vec!["jsrt".to_string()]) {
            Ok(runtime) => runtime,
            Err(err) => {
                eprintln!("{err}");
                return 1;
            }
        };
        match runtime.compile_to_bytecode(&file.to_string_lossy(), &source) {
            Ok(bytes) => bytes,
            Err(err) => {
                eprintln!("Error: compilation failed: {err}");
                return 1;
            }
        }
    };

    let base_executable = match std::env::current_exe() {
        Ok(path) => path,
        Err(err) => {
            eprintln!("Error: cannot locate the running executable: {err}");
            return 1;
        }
    };

    println!("Creating self-contained executable...");
    if let Err(err) = bytecode::write_packaged_executable(&base_executable, &bytecode_bytes, &output)
    {
        eprintln!("Error: failed to write '{}': {err}", output.display());
        return 1;
    }

    println!("Build completed: {}", output.display());
    println!("  Embedded bytecode: {} bytes", bytecode_bytes.len());
    println!("  Usage: {} [args]", output.display());
    0
}
