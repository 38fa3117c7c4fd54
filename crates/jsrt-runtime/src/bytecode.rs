//! Bytecode packaging: compile classic scripts to engine bytecode, embed
//! the result behind a boundary footer in a copy of the host executable,
//! and detect such payloads at startup.
//!
//! Compilation and loading go through the engine's raw serializer; the
//! safe binding does not expose compile-only evaluation for classic
//! scripts, so this module talks to `qjs` directly and immediately wraps
//! raw values back into owned handles.

use std::ffi::CString;
use std::io::Write;
use std::path::Path;

use rquickjs::{Ctx, Value, qjs};

use crate::error::{Result, RuntimeError};
use crate::value::catch_and_format;

/// Literal ASCII marker between the payload and its length, 22 bytes, no
/// terminator.
pub const BOUNDARY: &[u8] = b"JSRT_BYTECODE_BOUNDARY";

fn is_exception(value: &qjs::JSValue) -> bool {
    value.tag == qjs::JS_TAG_EXCEPTION as i64
}

/// Compile `source` as a classic script and return the engine's bytecode
/// serialization. The script is not executed.
pub fn compile(ctx: &Ctx<'_>, filename: &str, source: &str) -> Result<Vec<u8>> {
    let c_source = CString::new(source)
        .map_err(|_| RuntimeError::script("script source contains a NUL byte"))?;
    let c_name = CString::new(filename)
        .map_err(|_| RuntimeError::script("script name contains a NUL byte"))?;
    let raw_ctx = ctx.as_raw().as_ptr();

    unsafe {
        let compiled = qjs::JS_Eval(
            raw_ctx,
            c_source.as_ptr(),
            source.len() as u64,
            c_name.as_ptr(),
            (qjs::JS_EVAL_TYPE_GLOBAL | qjs::JS_EVAL_FLAG_COMPILE_ONLY) as i32,
        );
        if is_exception(&compiled) {
            return Err(RuntimeError::script(catch_and_format(ctx)));
        }
        // Owns `compiled` from here on; released on every path.
        let compiled = Value::from_raw(ctx.clone(), compiled);

        let mut size: usize = 0;
        let buffer = qjs::JS_WriteObject(
            raw_ctx,
            &mut size as *mut usize as *mut _,
            compiled.as_raw(),
            qjs::JS_WRITE_OBJ_BYTECODE as i32,
        );
        if buffer.is_null() {
            return Err(RuntimeError::script(catch_and_format(ctx)));
        }
        let buffer = scopeguard::guard(buffer, |buffer| {
            qjs::js_free(raw_ctx, buffer as *mut _);
        });
        Ok(std::slice::from_raw_parts(*buffer, size).to_vec())
    }
}

/// Load serialized bytecode and execute the resulting function.
pub fn execute(ctx: &Ctx<'_>, bytes: &[u8]) -> Result<()> {
    let raw_ctx = ctx.as_raw().as_ptr();
    unsafe {
        let object = qjs::JS_ReadObject(
            raw_ctx,
            bytes.as_ptr(),
            bytes.len() as u64,
            qjs::JS_READ_OBJ_BYTECODE as i32,
        );
        if is_exception(&object) {
            return Err(RuntimeError::script(format!(
                "invalid bytecode: {}",
                catch_and_format(ctx)
            )));
        }
        // JS_EvalFunction consumes the object.
        let result = qjs::JS_EvalFunction(raw_ctx, object);
        if is_exception(&result) {
            return Err(RuntimeError::script(catch_and_format(ctx)));
        }
        drop(Value::from_raw(ctx.clone(), result));
    }
    Ok(())
}

/// Copy `base_executable` to `output` and append
/// `bytecode || BOUNDARY || len(bytecode) as u64 big-endian`, then mark the
/// result executable.
pub fn write_packaged_executable(
    base_executable: &Path,
    bytecode: &[u8],
    output: &Path,
) -> Result<()> {
    std::fs::copy(base_executable, output)?;
    let mut file = std::fs::OpenOptions::new().append(true).open(output)?;
    file.write_all(bytecode)?;
    file.write_all(BOUNDARY)?;
    file.write_all(&(bytecode.len() as u64).to_be_bytes())?;
    file.flush()?;
    drop(file);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(output, std::fs::Permissions::from_mode(0o755))?;
    }
    Ok(())
}

/// Payload embedded in the executable at `path`, if any. Every mismatch
/// (too small, boundary absent, nonsense length) is `None` so startup can
/// fall through to normal argv dispatch.
pub fn embedded_payload(path: &Path) -> Option<Vec<u8>> {
    let data = std::fs::read(path).ok()?;
    payload_from_bytes(&data)
}

fn payload_from_bytes(data: &[u8]) -> Option<Vec<u8>> {
    if data.len() < BOUNDARY.len() + 8 {
        return None;
    }
    let size_offset = data.len() - 8;
    let boundary_offset = size_offset - BOUNDARY.len();
    if &data[boundary_offset..size_offset] != BOUNDARY {
        return None;
    }
    let size = u64::from_be_bytes(data[size_offset..].try_into().ok()?);
    let size = usize::try_from(size).ok()?;
    if size == 0 || size > boundary_offset {
        return None;
    }
    Some(data[boundary_offset - size..boundary_offset].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packaged(base: &[u8], payload: &[u8]) -> Vec<u8> {
        let mut data = base.to_vec();
        data.extend_from_slice(payload);
        data.extend_from_slice(BOUNDARY);
        data.extend_from_slice(&(payload.len() as u64).to_be_bytes());
        data
    }

    #[test]
    fn boundary_is_22_ascii_bytes() {
        assert_eq!(BOUNDARY.len(), 22);
        assert!(BOUNDARY.is_ascii());
    }

    #[test]
    fn footer_round_trips() {
        let data = packaged(b"\x7fELF fake base executable", b"\x01\x02\x03bytecode");
        assert_eq!(
            payload_from_bytes(&data).as_deref(),
            Some(&b"\x01\x02\x03bytecode"[..])
        );
    }

    #[test]
    fn short_files_fall_through() {
        assert!(payload_from_bytes(b"").is_none());
        assert!(payload_from_bytes(b"tiny").is_none());
        // One byte short of boundary + size.
        let data = vec![0u8; BOUNDARY.len() + 7];
        assert!(payload_from_bytes(&data).is_none());
    }

    #[test]
    fn missing_boundary_falls_through() {
        let mut data = b"plain executable".to_vec();
        data.extend_from_slice(&42u64.to_be_bytes());
        assert!(payload_from_bytes(&data).is_none());
    }

    #[test]
    fn oversized_length_falls_through() {
        let mut data = b"base".to_vec();
        data.extend_from_slice(BOUNDARY);
        data.extend_from_slice(&(u64::MAX).to_be_bytes());
        assert!(payload_from_bytes(&data).is_none());
    }

    #[test]
    fn packaged_file_on_disk_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("base");
        let out = dir.path().join("out");
        std::fs::write(&base, b"base executable bytes").unwrap();
        write_packaged_executable(&base, b"payload!", &out).unwrap();
        assert_eq!(embedded_payload(&out).as_deref(), Some(&b"payload!"[..]));
        // The base executable itself carries no payload.
        assert!(embedded_payload(&base).is_none());
    }
}
