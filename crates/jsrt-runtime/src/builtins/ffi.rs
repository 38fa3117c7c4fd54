//! `std:ffi`: open shared libraries and call C functions synchronously.
//!
//! The call surface is a fixed vocabulary rather than a generic trampoline:
//! `int` (i64-sized), `string` (NUL-terminated, borrowed for the call), and
//! `void` as a return type, up to four arguments. Signatures look like
//! `"int(int, string)"`.

use std::ffi::{CStr, CString, c_char};

use rquickjs::class::Trace;
use rquickjs::function::Rest;
use rquickjs::{Class, Ctx, Exception, JsLifetime, Object, Value};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum FfiType {
    Int,
    String,
    Void,
}

impl FfiType {
    fn parse(text: &str) -> Option<Self> {
        match text.trim() {
            "int" => Some(Self::Int),
            "string" => Some(Self::String),
            "void" => Some(Self::Void),
            _ => None,
        }
    }
}

struct Signature {
    ret: FfiType,
    args: Vec<FfiType>,
}

fn parse_signature(text: &str) -> Option<Signature> {
    let open = text.find('(')?;
    let close = text.rfind(')')?;
    if close < open {
        return None;
    }
    let ret = FfiType::parse(&text[..open])?;
    let inner = text[open + 1..close].trim();
    let mut args = Vec::new();
    if !inner.is_empty() {
        for part in inner.split(',') {
            let ty = FfiType::parse(part)?;
            if ty == FfiType::Void {
                return None;
            }
            args.push(ty);
        }
    }
    if args.len() > 4 {
        return None;
    }
    Some(Signature { ret, args })
}

#[derive(Trace, JsLifetime)]
#[rquickjs::class(rename = "FfiLibrary")]
pub struct FfiLibrary {
    #[qjs(skip_trace)]
    library: libloading::Library,
    #[qjs(skip_trace)]
    path: String,
}

#[rquickjs::methods]
impl FfiLibrary {
    #[qjs(get)]
    pub fn path(&self) -> String {
        self.path.clone()
    }

    /// Call `name` with the given signature, e.g.
    /// `lib.call("add", "int(int, int)", 2, 3)`.
    pub fn call<'js>(
        &self,
        ctx: Ctx<'js>,
        name: String,
        signature: String,
        args: Rest<Value<'js>>,
    ) -> rquickjs::Result<Value<'js>> {
        let Some(signature) = parse_signature(&signature) else {
            return Err(Exception::throw_type(
                &ctx,
                &format!("unsupported FFI signature '{signature}'"),
            ));
        };
        if args.0.len() != signature.args.len() {
            return Err(Exception::throw_type(
                &ctx,
                &format!(
                    "{name} expects {} arguments, got {}",
                    signature.args.len(),
                    args.0.len()
                ),
            ));
        }

        // Marshalled words; CStrings stay alive until the call returns.
        let mut keepalive: Vec<CString> = Vec::new();
        let mut words: Vec<u64> = Vec::new();
        for (value, ty) in args.0.iter().zip(&signature.args) {
            match ty {
                FfiType::Int => {
                    let Some(number) = value.as_number() else {
                        return Err(Exception::throw_type(&ctx, "expected a number argument"));
                    };
                    words.push(number as i64 as u64);
                }
                FfiType::String => {
                    let text = crate::value::coerce_string(&ctx, value.clone())?;
                    let cstring = CString::new(text).map_err(|_| {
                        Exception::throw_type(&ctx, "string arguments must not contain NUL")
                    })?;
                    words.push(cstring.as_ptr() as u64);
                    keepalive.push(cstring);
                }
                FfiType::Void => unreachable!("void arguments are rejected at parse"),
            }
        }

        let raw = unsafe { self.invoke(&ctx, &name, &words)? };
        drop(keepalive);

        match signature.ret {
            FfiType::Void => Ok(Value::new_undefined(ctx)),
            FfiType::Int => Ok(Value::new_float(ctx, raw as i64 as f64)),
            FfiType::String => {
                let pointer = raw as *const c_char;
                if pointer.is_null() {
                    return Ok(Value::new_null(ctx));
                }
                let text = unsafe { CStr::from_ptr(pointer) }
                    .to_string_lossy()
                    .into_owned();
                Ok(rquickjs::String::from_str(ctx, &text)?.into_value())
            }
        }
    }
}

impl FfiLibrary {
    /// # Safety
    /// The symbol must match the declared arity and use integer-register
    /// arguments; the signature vocabulary guarantees the latter.
    unsafe fn invoke(&self, ctx: &Ctx<'_>, name: &str, words: &[u64]) -> rquickjs::Result<u64> {
        macro_rules! sym {
            ($ty:ty) => {
                self.library.get::<$ty>(name.as_bytes()).map_err(|err| {
                    Exception::throw_reference(ctx, &format!("symbol '{name}' not found: {err}"))
                })?
            };
        }
        let result = unsafe {
            match words.len() {
                0 => (sym!(unsafe extern "C" fn() -> u64))(),
                1 => (sym!(unsafe extern "C" fn(u64) -> u64))(words[0]),
                2 => (sym!(unsafe extern "C" fn(u64, u64) -> u64))(words[0], words[1]),
                3 => (sym!(unsafe extern "C" fn(u64, u64, u64) -> u64))(
                    words[0], words[1], words[2],
                ),
                _ => (sym!(unsafe extern "C" fn(u64, u64, u64, u64) -> u64))(
                    words[0], words[1], words[2], words[3],
                ),
            }
        };
        Ok(result)
    }
}

fn open<'js>(ctx: Ctx<'js>, path: String) -> rquickjs::Result<Class<'js, FfiLibrary>> {
    let library = unsafe { libloading::Library::new(&path) }.map_err(|err| {
        Exception::throw_reference(&ctx, &format!("cannot open library '{path}': {err}"))
    })?;
    Class::instance(ctx, FfiLibrary { library, path })
}

pub fn create<'js>(ctx: &Ctx<'js>) -> rquickjs::Result<Value<'js>> {
    let ffi = Object::new(ctx.clone())?;
    ffi.set("open", rquickjs::function::Func::from(open))?;
    Ok(ffi.into_value())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signatures_parse() {
        let sig = parse_signature("int(int, string)").unwrap();
        assert_eq!(sig.ret, FfiType::Int);
        assert_eq!(sig.args, vec![FfiType::Int, FfiType::String]);

        let none = parse_signature("void()").unwrap();
        assert_eq!(none.ret, FfiType::Void);
        assert!(none.args.is_empty());
    }

    #[test]
    fn bad_signatures_are_rejected() {
        assert!(parse_signature("float(int)").is_none());
        assert!(parse_signature("int(void)").is_none());
        assert!(parse_signature("int").is_none());
        assert!(parse_signature("int(int, int, int, int, int)").is_none());
    }
}
