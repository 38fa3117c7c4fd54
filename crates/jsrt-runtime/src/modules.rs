//! ES module resolution and loading.
//!
//! Both module systems share one resolution scheme: `std:` names hit the
//! builtin table, absolute paths pass through, `./`/`../` join against the
//! importer's directory, and anything else is CWD-relative. Candidates are
//! probed with the suffix order `"", ".js", ".mjs"`.

use std::path::{Path, PathBuf};

use rquickjs::loader::{Loader, Resolver};
use rquickjs::{Ctx, Exception, Module, Object};

use crate::builtins;

pub const BUILTIN_PREFIX: &str = "std:";

/// Join a request against its importer's directory (or the CWD when the
/// request is not explicitly relative).
pub fn resolve_request(base_dir: Option<&Path>, request: &str) -> PathBuf {
    let path = Path::new(request);
    if path.is_absolute() {
        return path.to_path_buf();
    }
    if request.starts_with("./") || request.starts_with("../") {
        if let Some(base_dir) = base_dir {
            return base_dir.join(request);
        }
    }
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(request)
}

/// First existing candidate among `path`, `path.js`, `path.mjs`.
pub fn probe_suffixes(path: &Path) -> Option<PathBuf> {
    const SUFFIXES: &[&str] = &["", ".js", ".mjs"];
    for suffix in SUFFIXES {
        let candidate = if suffix.is_empty() {
            path.to_path_buf()
        } else {
            let mut text = path.as_os_str().to_os_string();
            text.push(suffix);
            PathBuf::from(text)
        };
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

/// `file://` URL for `import.meta.url`, built from the absolute form of
/// `path`.
pub fn file_url(path: &str) -> String {
    let absolute = {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .unwrap_or_else(|_| PathBuf::from("/"))
                .join(path)
        }
    };
    url::Url::from_file_path(&absolute)
        .map(|url| url.to_string())
        .unwrap_or_else(|_| format!("file://{}", absolute.display()))
}

pub struct JsrtResolver;

impl Resolver for JsrtResolver {
    fn resolve(&mut self, _ctx: &Ctx<'_>, base: &str, name: &str) -> rquickjs::Result<String> {
        if name.starts_with(BUILTIN_PREFIX) {
            return Ok(name.to_string());
        }
        let base_dir = Path::new(base).parent();
        let candidate = resolve_request(base_dir, name);
        let found = probe_suffixes(&candidate)
            .ok_or_else(|| rquickjs::Error::new_resolving(base, name))?;
        // Canonical absolute paths are the module keys; the same file
        // reached through different specifiers links once.
        let canonical = found.canonicalize().unwrap_or(found);
        Ok(canonical.to_string_lossy().into_owned())
    }
}

pub struct JsrtLoader;

impl Loader for JsrtLoader {
    fn load<'js>(&mut self, ctx: &Ctx<'js>, name: &str) -> rquickjs::Result<Module<'js>> {
        if let Some(builtin) = name.strip_prefix(BUILTIN_PREFIX) {
            if !builtins::is_builtin(builtin) {
                return Err(Exception::throw_reference(
                    ctx,
                    &format!("Unknown std module '{builtin}'"),
                ));
            }
            let source = format!(
                "const m = globalThis.__jsrt_builtin({builtin:?});\nexport default m;\n"
            );
            return Module::declare(ctx.clone(), name, source);
        }

        let source = std::fs::read_to_string(name).map_err(|err| {
            Exception::throw_reference(
                ctx,
                &format!("could not load module '{name}': {err}"),
            )
        })?;
        let module = Module::declare(ctx.clone(), name, source)?;
        set_import_meta(&module, name)?;
        Ok(module)
    }
}

/// Populate `import.meta.url` with the module's `file://` URL.
pub fn set_import_meta<'js>(module: &Module<'js>, path: &str) -> rquickjs::Result<()> {
    let meta: Object = module.meta()?;
    meta.set("url", file_url(path))?;
    Ok(())
}

/// Top-level `import`/`export` detection for choosing module vs classic
/// evaluation. String literals, template literals, and comments are skipped;
/// `import(...)` and `import.meta` inside scripts do not count.
pub fn detect_module(source: &str) -> bool {
    let bytes = source.as_bytes();
    let mut index = 0;
    let mut depth = 0usize;
    let mut prev_char = b'\0';

    while index < bytes.len() {
        let byte = bytes[index];
        match byte {
            b'/' if index + 1 < bytes.len() && bytes[index + 1] == b'/' => {
                while index < bytes.len() && bytes[index] != b'\n' {
                    index += 1;
                }
            }
            b'/' if index + 1 < bytes.len() && bytes[index + 1] == b'*' => {
                index += 2;
                while index + 1 < bytes.len() && !(bytes[index] == b'*' && bytes[index + 1] == b'/')
                {
                    index += 1;
                }
                index += 2;
            }
            b'"' | b'\'' | b'`' => {
                let quote = byte;
                index += 1;
                while index < bytes.len() {
                    if bytes[index] == b'\\' {
                        index += 2;
                        continue;
                    }
                    if bytes[index] == quote {
                        break;
                    }
                    index += 1;
                }
                index += 1;
                prev_char = quote;
            }
            b'{' | b'(' | b'[' => {
                depth += 1;
                index += 1;
                prev_char = byte;
            }
            b'}' | b')' | b']' => {
                depth = depth.saturating_sub(1);
                index += 1;
                prev_char = byte;
            }
            _ if byte.is_ascii_alphabetic() || byte == b'_' || byte == b'$' => {
                let start = index;
                while index < bytes.len()
                    && (bytes[index].is_ascii_alphanumeric()
                        || bytes[index] == b'_'
                        || bytes[index] == b'$')
                {
                    index += 1;
                }
                let word = &source[start..index];
                if depth == 0 && prev_char != b'.' {
                    if word == "export" {
                        return true;
                    }
                    if word == "import" {
                        let mut next = index;
                        while next < bytes.len() && bytes[next].is_ascii_whitespace() {
                            next += 1;
                        }
                        let follow = bytes.get(next).copied().unwrap_or(b'\0');
                        if follow != b'(' && follow != b'.' {
                            return true;
                        }
                    }
                }
                prev_char = bytes[index.saturating_sub(1)];
            }
            _ => {
                if !byte.is_ascii_whitespace() {
                    prev_char = byte;
                }
                index += 1;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_static_imports_and_exports() {
        assert!(detect_module("import x from './x.js';"));
        assert!(detect_module("import { a, b } from 'std:assert';"));
        assert!(detect_module("export const a = 1;"));
        assert!(detect_module("const a = 1;\nexport default a;"));
    }

    #[test]
    fn scripts_are_not_modules() {
        assert!(!detect_module("const a = 1; console.log(a);"));
        assert!(!detect_module("const s = 'import x from \"y\"';"));
        assert!(!detect_module("// import x from 'y'\nlet a = 1;"));
        assert!(!detect_module("/* export const */ let b = 2;"));
        assert!(!detect_module("obj.import('x');"));
    }

    #[test]
    fn dynamic_import_and_import_meta_do_not_count() {
        assert!(!detect_module("import('./lazy.js').then(() => {});"));
        assert!(!detect_module("const u = import.meta;"));
    }

    #[test]
    fn nested_keywords_do_not_count() {
        assert!(!detect_module("function f() { return { import: 1 }; }"));
        assert!(!detect_module("if (x) { exportThing(); }"));
    }

    #[test]
    fn resolve_prefers_exact_then_js_then_mjs() {
        let dir = tempfile::tempdir().unwrap();
        let js = dir.path().join("lib.js");
        std::fs::write(&js, "exports.x = 1;").unwrap();
        let found = probe_suffixes(&dir.path().join("lib")).unwrap();
        assert_eq!(found, js);

        let exact = dir.path().join("lib");
        std::fs::write(&exact, "exports.x = 2;").unwrap();
        let found = probe_suffixes(&dir.path().join("lib")).unwrap();
        assert_eq!(found, exact);
    }

    #[test]
    fn relative_requests_join_the_importer_directory() {
        let resolved = resolve_request(Some(Path::new("/srv/app")), "./util");
        assert_eq!(resolved, PathBuf::from("/srv/app/./util"));
        let parent = resolve_request(Some(Path::new("/srv/app")), "../shared/x");
        assert_eq!(parent, PathBuf::from("/srv/app/../shared/x"));
    }

    #[test]
    fn file_url_is_absolute() {
        assert_eq!(file_url("/tmp/a.js"), "file:///tmp/a.js");
        assert!(file_url("rel.js").starts_with("file:///"));
    }
}
