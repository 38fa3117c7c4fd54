//! Runtime drive loop: ordering guarantees, timer lifecycle, fetch end to
//! end against a local server, and the bytecode round trip.

use std::io::{Read, Write};
use std::net::TcpListener;

use jsrt_runtime::JsRuntime;

fn new_runtime() -> JsRuntime {
    JsRuntime::new(vec!["jsrt".to_string()]).expect("runtime")
}

/// Run `setup`, drive to quiescence, then evaluate `check_body` (which
/// throws on failure).
fn run_then_check(setup: &str, check_body: &str) {
    let mut runtime = new_runtime();
    let evaluated = runtime.eval("setup.js", setup).expect("setup eval");
    runtime.await_value(evaluated).expect("setup settle");
    runtime.run().expect("run");
    let checked = runtime.eval("check.js", check_body).expect("check eval");
    runtime.await_value(checked).expect("check settle");
    runtime.free();
}

#[test]
fn microtasks_run_before_timers() {
    run_then_check(
        r#"
        globalThis.order = [];
        setTimeout(() => order.push('timer'), 0);
        Promise.resolve().then(() => order.push('micro'));
        queueMicrotask(() => order.push('queued'));
        order.push('sync');
        "#,
        r#"
        const got = globalThis.order.join(',');
        if (got !== 'sync,micro,queued,timer') throw new Error(got);
        "#,
    );
}

#[test]
fn equal_deadline_timers_fire_in_registration_order() {
    run_then_check(
        r#"
        globalThis.order = [];
        setTimeout(() => order.push('a'), 2);
        setTimeout(() => order.push('b'), 2);
        setTimeout(() => order.push('c'), 1);
        "#,
        r#"
        const got = globalThis.order.join(',');
        if (got !== 'c,a,b') throw new Error(got);
        "#,
    );
}

#[test]
fn immediates_run_in_the_check_phase() {
    run_then_check(
        r#"
        globalThis.order = [];
        setImmediate(() => order.push('immediate'));
        setTimeout(() => order.push('timer'), 0);
        Promise.resolve().then(() => order.push('micro'));
        "#,
        r#"
        const got = globalThis.order.join(',');
        if (got !== 'micro,timer,immediate') throw new Error(got);
        "#,
    );
}

#[test]
fn cleared_timers_and_immediates_do_not_fire() {
    run_then_check(
        r#"
        globalThis.fired = [];
        const t = setTimeout(() => fired.push('t'), 1);
        clearTimeout(t);
        const i = setImmediate(() => fired.push('i'));
        clearImmediate(i);
        setTimeout(() => fired.push('kept'), 2);
        "#,
        r#"
        const got = globalThis.fired.join(',');
        if (got !== 'kept') throw new Error(got);
        "#,
    );
}

#[test]
fn intervals_repeat_until_cleared() {
    run_then_check(
        r#"
        globalThis.ticks = 0;
        const id = setInterval(() => {
            globalThis.ticks++;
            if (globalThis.ticks === 3) clearInterval(id);
        }, 1);
        "#,
        r#"
        if (globalThis.ticks !== 3) throw new Error('ticks = ' + globalThis.ticks);
        "#,
    );
}

#[test]
fn timer_arguments_are_forwarded() {
    run_then_check(
        r#"
        globalThis.got = null;
        setTimeout((a, b) => { globalThis.got = a + ':' + b; }, 0, 'x', 7);
        "#,
        r#"
        if (globalThis.got !== 'x:7') throw new Error(globalThis.got);
        "#,
    );
}

#[test]
fn a_throwing_microtask_does_not_halt_the_queue() {
    run_then_check(
        r#"
        globalThis.after = false;
        queueMicrotask(() => { throw new Error('deliberate'); });
        queueMicrotask(() => { globalThis.after = true; });
        setTimeout(() => { globalThis.timerRan = true; }, 1);
        "#,
        r#"
        if (globalThis.after !== true) throw new Error('queue halted');
        if (globalThis.timerRan !== true) throw new Error('loop halted');
        "#,
    );
}

#[test]
fn queue_microtask_requires_a_function() {
    let mut runtime = new_runtime();
    let result = runtime
        .eval("t.js", "queueMicrotask(42);")
        .and_then(|value| runtime.await_value(value));
    runtime.free();
    let message = result.expect_err("must throw").to_string();
    assert!(message.contains("TypeError"), "{message}");
}

#[test]
fn top_level_await_settles_through_the_loop() {
    let dir = tempfile::tempdir().unwrap();
    let entry = dir.path().join("main.mjs");
    std::fs::write(
        &entry,
        r#"
        const value = await new Promise((resolve) => setTimeout(() => resolve(21), 5));
        if (value !== 21) throw new Error('value = ' + value);
        globalThis.done = value * 2;
        "#,
    )
    .unwrap();
    let source = std::fs::read_to_string(&entry).unwrap();
    let mut runtime = new_runtime();
    let evaluated = runtime
        .eval(&entry.to_string_lossy(), &source)
        .expect("eval");
    runtime.await_value(evaluated).expect("top-level await");
    runtime.run().expect("run");
    runtime.free();
}

/// One-shot HTTP server on a loopback port, serving a canned response.
fn spawn_canned_server(response: &'static [u8]) -> (u16, std::thread::JoinHandle<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let handle = std::thread::spawn(move || {
        let (mut socket, _) = listener.accept().expect("accept");
        let mut request = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).expect("read");
            if n == 0 {
                break;
            }
            request.extend_from_slice(&chunk[..n]);
            if request_complete(&request) {
                break;
            }
        }
        socket.write_all(response).expect("write");
        drop(socket);
        request
    });
    (port, handle)
}

/// Headers finished and, when a content-length is announced, the body is
/// fully buffered too.
fn request_complete(request: &[u8]) -> bool {
    let Some(header_end) = request.windows(4).position(|w| w == b"\r\n\r\n") else {
        return false;
    };
    let head = String::from_utf8_lossy(&request[..header_end]).to_lowercase();
    let expected: usize = head
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(0);
    request.len() >= header_end + 4 + expected
}

#[test]
fn fetch_resolves_with_parsed_response() {
    let (port, server) = spawn_canned_server(
        b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nX-Tag: demo\r\n\r\n{\"ok\":true,\"n\":3}",
    );
    run_then_check(
        &format!(
            r#"
            fetch('http://127.0.0.1:{port}/data?q=1')
                .then((response) => {{
                    globalThis.status = response.status;
                    globalThis.ok = response.ok;
                    globalThis.tag = response.headers.get('x-tag');
                    globalThis.body = response.json();
                }})
                .catch((err) => {{ globalThis.failure = String(err); }});
            "#
        ),
        r#"
        if (globalThis.failure) throw new Error(globalThis.failure);
        if (globalThis.status !== 200) throw new Error('status ' + globalThis.status);
        if (globalThis.ok !== true) throw new Error('ok');
        if (globalThis.tag !== 'demo') throw new Error('tag ' + globalThis.tag);
        if (globalThis.body.n !== 3) throw new Error('body');
        "#,
    );
    let request = server.join().unwrap();
    let text = String::from_utf8_lossy(&request);
    assert!(text.starts_with("GET /data?q=1 HTTP/1.1\r\n"), "{text}");
    assert!(text.contains("Host: 127.0.0.1:"), "{text}");
    assert!(text.contains("connection: close"), "{text}");
    assert!(text.contains("user-agent: jsrt/"), "{text}");
}

#[test]
fn fetch_post_sends_body_and_headers() {
    let (port, server) =
        spawn_canned_server(b"HTTP/1.1 204\r\n\r\n");
    run_then_check(
        &format!(
            r#"
            const headers = new Headers();
            headers.set('X-Req', 'yes');
            fetch('http://127.0.0.1:{port}/submit', {{
                method: 'POST',
                headers,
                body: 'payload=1',
            }}).then((response) => {{
                globalThis.status = response.status;
                globalThis.statusText = response.statusText;
            }}).catch((err) => {{ globalThis.failure = String(err); }});
            "#
        ),
        r#"
        if (globalThis.failure) throw new Error(globalThis.failure);
        if (globalThis.status !== 204) throw new Error('status ' + globalThis.status);
        if (globalThis.statusText !== 'OK') throw new Error(globalThis.statusText);
        "#,
    );
    let request = server.join().unwrap();
    let text = String::from_utf8_lossy(&request);
    assert!(text.starts_with("POST /submit HTTP/1.1\r\n"), "{text}");
    assert!(text.contains("x-req: yes"), "{text}");
    assert!(text.contains("content-length: 9"), "{text}");
    assert!(text.ends_with("\r\n\r\npayload=1"), "{text}");
}

#[test]
fn fetch_rejects_on_connection_failure() {
    // Bind-then-drop yields a port with nothing listening.
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    run_then_check(
        &format!(
            r#"
            fetch('http://127.0.0.1:{port}/')
                .then(() => {{ globalThis.outcome = 'resolved'; }})
                .catch((err) => {{ globalThis.outcome = String(err.message); }});
            "#
        ),
        r#"
        if (typeof globalThis.outcome !== 'string') throw new Error('no outcome');
        if (globalThis.outcome.indexOf('Connection failed') !== 0) throw new Error(globalThis.outcome);
        "#,
    );
}

#[test]
fn fetch_rejects_invalid_and_https_urls() {
    run_then_check(
        r#"
        globalThis.outcomes = [];
        fetch('not a url').catch((err) => outcomes.push('invalid'));
        fetch('https://example.com/').catch((err) => outcomes.push('https'));
        fetch('ftp://example.com/x').catch((err) => outcomes.push('scheme'));
        "#,
        r#"
        const got = globalThis.outcomes.sort().join(',');
        if (got !== 'https,invalid,scheme') throw new Error(got);
        "#,
    );
}

#[test]
fn bytecode_round_trips_between_runtimes() {
    let bytecode = {
        let runtime = new_runtime();
        let bytes = runtime
            .compile_to_bytecode("packaged.js", "globalThis.packed = 40 + 2;")
            .expect("compile");
        assert!(!bytes.is_empty());
        bytes
    };

    let mut runtime = new_runtime();
    runtime.eval_bytecode(&bytecode).expect("execute bytecode");
    let checked = runtime
        .eval(
            "check.js",
            "if (globalThis.packed !== 42) throw new Error('packed = ' + globalThis.packed);",
        )
        .expect("check eval");
    runtime.await_value(checked).expect("check settle");
    runtime.run().expect("run");
    runtime.free();
}

#[test]
fn bytecode_compilation_reports_syntax_errors() {
    let runtime = new_runtime();
    let result = runtime.compile_to_bytecode("broken.js", "function ( {");
    assert!(result.is_err());
}

#[test]
fn runtime_free_is_idempotent() {
    let mut runtime = new_runtime();
    let evaluated = runtime.eval("t.js", "setTimeout(() => {}, 60000); 1 + 1").expect("eval");
    runtime.await_value(evaluated).expect("settle");
    // Free with a live timer still queued: handles close, values release.
    runtime.free();
    runtime.free();
}
