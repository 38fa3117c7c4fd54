//! `Blob`: an immutable byte bag with a MIME type.

use rquickjs::class::Trace;
use rquickjs::function::Opt;
use rquickjs::{ArrayBuffer, Class, Ctx, Exception, FromJs, JsLifetime, Object, TypedArray, Value};

#[derive(Trace, JsLifetime)]
#[rquickjs::class(rename = "Blob")]
pub struct Blob {
    #[qjs(skip_trace)]
    pub(crate) bytes: Vec<u8>,
    #[qjs(skip_trace)]
    pub(crate) mime: String,
}

fn part_bytes<'js>(ctx: &Ctx<'js>, part: &Value<'js>) -> rquickjs::Result<Vec<u8>> {
    if let Some(text) = part.as_string() {
        return Ok(text.to_string()?.into_bytes());
    }
    if let Ok(blob) = Class::<Blob>::from_value(part) {
        return Ok(blob.borrow().bytes.clone());
    }
    if let Ok(typed) = TypedArray::<u8>::from_js(ctx, part.clone()) {
        if let Some(bytes) = typed.as_bytes() {
            return Ok(bytes.to_vec());
        }
    }
    if let Ok(buffer) = ArrayBuffer::from_js(ctx, part.clone()) {
        if let Some(bytes) = buffer.as_bytes() {
            return Ok(bytes.to_vec());
        }
    }
    Err(Exception::throw_type(
        ctx,
        "Blob parts must be strings, Blobs, or binary buffers",
    ))
}

#[rquickjs::methods]
impl Blob {
    #[qjs(constructor)]
    pub fn new<'js>(
        ctx: Ctx<'js>,
        parts: Opt<Value<'js>>,
        options: Opt<Object<'js>>,
    ) -> rquickjs::Result<Self> {
        let mut bytes = Vec::new();
        if let Some(parts) = parts.0 {
            if !parts.is_undefined() && !parts.is_null() {
                let Some(list) = parts.as_array() else {
                    return Err(Exception::throw_type(&ctx, "Blob parts must be a sequence"));
                };
                for part in list.iter::<Value>() {
                    bytes.extend_from_slice(&part_bytes(&ctx, &part?)?);
                }
            }
        }
        let mime = match options.0 {
            Some(options) => options
                .get::<_, Option<String>>("type")?
                .unwrap_or_default()
                .to_ascii_lowercase(),
            None => String::new(),
        };
        Ok(Self { bytes, mime })
    }

    #[qjs(get)]
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    #[qjs(get, rename = "type")]
    pub fn mime(&self) -> String {
        self.mime.clone()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }

    #[qjs(rename = "arrayBuffer")]
    pub fn array_buffer<'js>(&self, ctx: Ctx<'js>) -> rquickjs::Result<ArrayBuffer<'js>> {
        ArrayBuffer::new(ctx, self.bytes.clone())
    }

    pub fn slice(&self, start: Opt<f64>, end: Opt<f64>, content_type: Opt<String>) -> Blob {
        let len = self.bytes.len() as i64;
        let clamp = |index: f64| -> usize {
            let index = index as i64;
            let resolved = if index < 0 { len + index } else { index };
            resolved.clamp(0, len) as usize
        };
        let from = clamp(start.0.unwrap_or(0.0));
        let to = clamp(end.0.unwrap_or(len as f64));
        let bytes = if from < to {
            self.bytes[from..to].to_vec()
        } else {
            Vec::new()
        };
        Blob {
            bytes,
            mime: content_type.0.unwrap_or_default().to_ascii_lowercase(),
        }
    }
}

pub fn register(ctx: &Ctx<'_>) -> rquickjs::Result<()> {
    Class::<Blob>::define(&ctx.globals())?;
    Ok(())
}
