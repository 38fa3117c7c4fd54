//! `TextEncoder`/`TextDecoder` (UTF-8 only) and the base64 globals
//! `btoa`/`atob`.

use rquickjs::class::Trace;
use rquickjs::function::{Func, Opt};
use rquickjs::{ArrayBuffer, Class, Ctx, Exception, FromJs, JsLifetime, Object, TypedArray, Value};

const BASE64_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

fn base64_encode(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len().div_ceil(3) * 4);
    for chunk in data.chunks(3) {
        let mut word = 0u32;
        for (index, &byte) in chunk.iter().enumerate() {
            word |= (byte as u32) << (16 - index * 8);
        }
        let emitted = chunk.len() + 1;
        for index in 0..emitted {
            let sextet = ((word >> (18 - index * 6)) & 0x3f) as usize;
            out.push(BASE64_ALPHABET[sextet] as char);
        }
        for _ in emitted..4 {
            out.push('=');
        }
    }
    out
}

fn base64_decode(input: &str) -> Result<Vec<u8>, String> {
    let input = input.trim_end_matches('=');
    let mut out = Vec::with_capacity(input.len() * 3 / 4);
    let mut buffer = 0u32;
    let mut bits = 0u32;
    for c in input.chars() {
        let value = match c {
            'A'..='Z' => c as u32 - 'A' as u32,
            'a'..='z' => c as u32 - 'a' as u32 + 26,
            '0'..='9' => c as u32 - '0' as u32 + 52,
            '+' => 62,
            '/' => 63,
            ' ' | '\t' | '\n' | '\r' => continue,
            _ => return Err(format!("invalid base64 character: {c}")),
        };
        buffer = (buffer << 6) | value;
        bits += 6;
        if bits >= 8 {
            bits -= 8;
            out.push((buffer >> bits) as u8);
            buffer &= (1 << bits) - 1;
        }
    }
    Ok(out)
}

#[derive(Trace, JsLifetime)]
#[rquickjs::class(rename = "TextEncoder")]
pub struct TextEncoder {}

#[rquickjs::methods]
impl TextEncoder {
    #[qjs(constructor)]
    pub fn new() -> Self {
        Self {}
    }

    #[qjs(get)]
    pub fn encoding(&self) -> &'static str {
        "utf-8"
    }

    pub fn encode<'js>(
        &self,
        ctx: Ctx<'js>,
        text: Opt<String>,
    ) -> rquickjs::Result<TypedArray<'js, u8>> {
        let bytes = text.0.unwrap_or_default().into_bytes();
        TypedArray::new(ctx, bytes)
    }

    /// Encode as much of `text` as fits into `dest`. `read` counts UTF-16
    /// code units, `written` counts bytes; splitting a code point is never
    /// allowed.
    #[qjs(rename = "encodeInto")]
    pub fn encode_into<'js>(
        &self,
        ctx: Ctx<'js>,
        text: String,
        dest: TypedArray<'js, u8>,
    ) -> rquickjs::Result<Object<'js>> {
        use rquickjs::IntoJs;
        let capacity = dest.len();
        let target = dest
            .into_js(&ctx)?
            .into_object()
            .expect("typed arrays are objects");
        let mut read = 0usize;
        let mut written = 0usize;
        for ch in text.chars() {
            let mut utf8 = [0u8; 4];
            let encoded = ch.encode_utf8(&mut utf8).as_bytes();
            if written + encoded.len() > capacity {
                break;
            }
            for &byte in encoded {
                target.set(written as u32, byte)?;
                written += 1;
            }
            read += ch.len_utf16();
        }
        let result = Object::new(ctx)?;
        result.set("read", read)?;
        result.set("written", written)?;
        Ok(result)
    }
}

#[derive(Trace, JsLifetime)]
#[rquickjs::class(rename = "TextDecoder")]
pub struct TextDecoder {
    #[qjs(skip_trace)]
    fatal: bool,
    #[qjs(skip_trace)]
    ignore_bom: bool,
}

#[rquickjs::methods]
impl TextDecoder {
    #[qjs(constructor)]
    pub fn new(
        ctx: Ctx<'_>,
        label: Opt<String>,
        options: Opt<Object<'_>>,
    ) -> rquickjs::Result<Self> {
        if let Some(label) = label.0 {
            let normalized = label.trim().to_ascii_lowercase();
            if !matches!(normalized.as_str(), "utf-8" | "utf8" | "unicode-1-1-utf-8") {
                return Err(Exception::throw_type(
                    &ctx,
                    &format!("unsupported encoding label '{label}'"),
                ));
            }
        }
        let mut fatal = false;
        let mut ignore_bom = false;
        if let Some(options) = options.0 {
            fatal = options.get::<_, Option<bool>>("fatal")?.unwrap_or(false);
            ignore_bom = options
                .get::<_, Option<bool>>("ignoreBOM")?
                .unwrap_or(false);
        }
        Ok(Self { fatal, ignore_bom })
    }

    #[qjs(get)]
    pub fn encoding(&self) -> &'static str {
        "utf-8"
    }

    #[qjs(get)]
    pub fn fatal(&self) -> bool {
        self.fatal
    }

    #[qjs(get, rename = "ignoreBOM")]
    pub fn ignore_bom(&self) -> bool {
        self.ignore_bom
    }

    pub fn decode<'js>(
        &self,
        ctx: Ctx<'js>,
        input: Opt<Value<'js>>,
    ) -> rquickjs::Result<String> {
        let Some(value) = input.0 else {
            return Ok(String::new());
        };
        if value.is_undefined() {
            return Ok(String::new());
        }
        let bytes = extract_bytes(&ctx, &value)?;
        let bytes = if !self.ignore_bom && bytes.starts_with(&[0xEF, 0xBB, 0xBF]) {
            &bytes[3..]
        } else {
            &bytes[..]
        };
        if self.fatal {
            match std::str::from_utf8(bytes) {
                Ok(text) => Ok(text.to_string()),
                Err(_) => Err(Exception::throw_type(
                    &ctx,
                    "the encoded data is not valid UTF-8",
                )),
            }
        } else {
            Ok(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

fn extract_bytes<'js>(ctx: &Ctx<'js>, value: &Value<'js>) -> rquickjs::Result<Vec<u8>> {
    if let Ok(typed) = TypedArray::<u8>::from_js(ctx, value.clone()) {
        if let Some(bytes) = typed.as_bytes() {
            return Ok(bytes.to_vec());
        }
    }
    if let Ok(buffer) = ArrayBuffer::from_js(ctx, value.clone()) {
        if let Some(bytes) = buffer.as_bytes() {
            return Ok(bytes.to_vec());
        }
    }
    Err(Exception::throw_type(
        ctx,
        "expected an ArrayBuffer or Uint8Array",
    ))
}

fn btoa(ctx: Ctx<'_>, text: String) -> rquickjs::Result<String> {
    let mut bytes = Vec::with_capacity(text.len());
    for ch in text.chars() {
        let code = ch as u32;
        if code > 0xFF {
            return Err(Exception::throw_type(
                &ctx,
                "btoa: string contains characters outside the Latin1 range",
            ));
        }
        bytes.push(code as u8);
    }
    Ok(base64_encode(&bytes))
}

fn atob(ctx: Ctx<'_>, text: String) -> rquickjs::Result<String> {
    match base64_decode(&text) {
        Ok(bytes) => Ok(bytes.into_iter().map(|byte| byte as char).collect()),
        Err(message) => Err(Exception::throw_type(&ctx, &format!("atob: {message}"))),
    }
}

pub fn register(ctx: &Ctx<'_>) -> rquickjs::Result<()> {
    let globals = ctx.globals();
    Class::<TextEncoder>::define(&globals)?;
    Class::<TextDecoder>::define(&globals)?;
    globals.set("btoa", Func::from(btoa))?;
    globals.set("atob", Func::from(atob))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_basic_vectors() {
        assert_eq!(base64_encode(b""), "");
        assert_eq!(base64_encode(b"f"), "Zg==");
        assert_eq!(base64_encode(b"fo"), "Zm8=");
        assert_eq!(base64_encode(b"foo"), "Zm9v");
        assert_eq!(base64_encode(b"foobar"), "Zm9vYmFy");
    }

    #[test]
    fn base64_round_trip() {
        let data: Vec<u8> = (0u8..=255).collect();
        let encoded = base64_encode(&data);
        assert_eq!(base64_decode(&encoded).unwrap(), data);
    }

    #[test]
    fn base64_decode_skips_whitespace() {
        assert_eq!(base64_decode("Zm 9v\n").unwrap(), b"foo");
    }

    #[test]
    fn base64_decode_rejects_garbage() {
        assert!(base64_decode("Zm9v!").is_err());
    }
}
