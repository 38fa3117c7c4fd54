//! Module subsystem behaviour: CommonJS require, ES imports, builtins.

use std::path::Path;

use jsrt_runtime::JsRuntime;

fn new_runtime() -> JsRuntime {
    JsRuntime::new(vec!["jsrt".to_string()]).expect("runtime")
}

fn run_script(source: &str) {
    let mut runtime = new_runtime();
    let evaluated = runtime.eval("test.js", source).expect("eval");
    runtime.await_value(evaluated).expect("settle");
    runtime.run().expect("run");
    runtime.free();
}

fn run_entry_file(path: &Path) {
    let source = std::fs::read_to_string(path).expect("entry source");
    let mut runtime = new_runtime();
    let evaluated = runtime
        .eval(&path.to_string_lossy(), &source)
        .expect("eval");
    runtime.await_value(evaluated).expect("settle");
    runtime.run().expect("run");
    runtime.free();
}

#[test]
fn require_returns_module_exports() {
    let dir = tempfile::tempdir().unwrap();
    let lib = dir.path().join("lib.js");
    std::fs::write(&lib, "module.exports = { answer: 42 };").unwrap();
    run_script(&format!(
        r#"
        const lib = require({lib:?});
        if (lib.answer !== 42) throw new Error('bad exports: ' + lib.answer);
        "#,
        lib = lib.to_string_lossy()
    ));
}

#[test]
fn require_cache_returns_identical_values() {
    let dir = tempfile::tempdir().unwrap();
    let lib = dir.path().join("counter.js");
    std::fs::write(
        &lib,
        "globalThis.loads = (globalThis.loads || 0) + 1;\nmodule.exports = { id: {} };",
    )
    .unwrap();
    run_script(&format!(
        r#"
        const first = require({lib:?});
        const second = require({lib:?});
        if (first !== second) throw new Error('cache must return the same object');
        if (globalThis.loads !== 1) throw new Error('loaded ' + globalThis.loads + ' times');
        "#,
        lib = lib.to_string_lossy()
    ));
}

#[test]
fn require_probes_suffixes() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("dep.js"), "module.exports = 'via-js';").unwrap();
    let bare = dir.path().join("dep");
    run_script(&format!(
        r#"
        const value = require({bare:?});
        if (value !== 'via-js') throw new Error('got ' + value);
        "#,
        bare = bare.to_string_lossy()
    ));
}

#[test]
fn nested_requires_resolve_relative_to_the_requiring_module() {
    let dir = tempfile::tempdir().unwrap();
    let sub = dir.path().join("sub");
    std::fs::create_dir(&sub).unwrap();
    std::fs::write(sub.join("inner.js"), "module.exports = 'inner';").unwrap();
    std::fs::write(
        sub.join("outer.js"),
        "module.exports = require('./inner.js');",
    )
    .unwrap();
    let outer = sub.join("outer.js");
    run_script(&format!(
        r#"
        const value = require({outer:?});
        if (value !== 'inner') throw new Error('got ' + value);
        "#,
        outer = outer.to_string_lossy()
    ));
}

#[test]
fn circular_requires_see_partial_exports() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("a.js"),
        "exports.name = 'a';\nconst b = require('./b.js');\nexports.partner = b.name;",
    )
    .unwrap();
    std::fs::write(
        dir.path().join("b.js"),
        "exports.name = 'b';\nconst a = require('./a.js');\nexports.sawPartial = a.name;",
    )
    .unwrap();
    let entry = dir.path().join("a.js");
    run_script(&format!(
        r#"
        const a = require({entry:?});
        if (a.partner !== 'b') throw new Error('a.partner = ' + a.partner);
        "#,
        entry = entry.to_string_lossy()
    ));
}

#[test]
fn wrapper_provides_filename_and_dirname() {
    let dir = tempfile::tempdir().unwrap();
    let lib = dir.path().join("where.js");
    std::fs::write(
        &lib,
        "module.exports = { file: __filename, dir: __dirname };",
    )
    .unwrap();
    run_script(&format!(
        r#"
        const where = require({lib:?});
        if (!where.file.endsWith('where.js')) throw new Error(where.file);
        if (where.file.indexOf(where.dir) !== 0) throw new Error(where.dir);
        "#,
        lib = lib.to_string_lossy()
    ));
}

#[test]
fn missing_module_is_a_reference_error() {
    run_script(
        r#"
        let caught = null;
        try { require('/no/such/module-at-all'); } catch (e) { caught = e; }
        if (!(caught instanceof ReferenceError)) throw new Error('expected ReferenceError');
        if (caught.message.indexOf('/no/such/module-at-all') < 0) throw new Error(caught.message);
        "#,
    );
}

#[test]
fn unknown_std_module_is_a_reference_error() {
    run_script(
        r#"
        let caught = null;
        try { require('std:nonsense'); } catch (e) { caught = e; }
        if (!(caught instanceof ReferenceError)) throw new Error('expected ReferenceError');
        "#,
    );
}

#[test]
fn std_assert_via_require() {
    run_script(
        r#"
        const assert = require('std:assert');
        assert(true);
        assert.ok(1);
        assert.equal(1, '1');
        assert.notEqual(1, 2);
        assert.strictEqual('x', 'x');
        assert.notStrictEqual(1, '1');
        assert.deepEqual({ a: [1, 2], b: 'c' }, { a: [1, 2], b: 'c' });
        assert.notDeepEqual({ a: 1 }, { a: 2 });
        assert.throws(() => { throw new Error('expected'); });
        let failed = false;
        try { assert.strictEqual(1, 2); } catch (e) { failed = e.name === 'AssertionError'; }
        if (!failed) throw new Error('strictEqual(1, 2) must fail');
        "#,
    );
}

#[test]
fn std_process_shape() {
    run_script(
        r#"
        const process = require('std:process');
        if (!Array.isArray(process.argv)) throw new Error('argv');
        if (typeof process.platform !== 'string') throw new Error('platform');
        if (typeof process.pid !== 'number') throw new Error('pid');
        if (typeof process.cwd() !== 'string') throw new Error('cwd');
        // The global mirrors the builtin.
        if (typeof globalThis.process.platform !== 'string') throw new Error('global process');
        "#,
    );
}

#[test]
fn es_module_entry_with_relative_import() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("dep.mjs"),
        "export const value = 7;\nexport default 'dep-default';",
    )
    .unwrap();
    std::fs::write(
        dir.path().join("main.mjs"),
        r#"
        import fallback, { value } from './dep.mjs';
        if (value !== 7) throw new Error('value = ' + value);
        if (fallback !== 'dep-default') throw new Error(fallback);
        if (!import.meta.url.startsWith('file://')) throw new Error(import.meta.url);
        globalThis.moduleRan = true;
        "#,
    )
    .unwrap();
    run_entry_file(&dir.path().join("main.mjs"));
}

#[test]
fn es_module_can_import_builtins() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("main.mjs"),
        r#"
        import assert from 'std:assert';
        assert.strictEqual(typeof assert.ok, 'function');
        "#,
    )
    .unwrap();
    run_entry_file(&dir.path().join("main.mjs"));
}

#[test]
fn module_detection_picks_module_evaluation_for_plain_js() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("dep.js"), "export const ok = true;").unwrap();
    // A .js entry with top-level import still evaluates as a module.
    std::fs::write(
        dir.path().join("main.js"),
        "import { ok } from './dep.js';\nif (!ok) throw new Error('bad import');",
    )
    .unwrap();
    run_entry_file(&dir.path().join("main.js"));
}
