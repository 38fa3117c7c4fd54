//! `fetch` and its companion classes: `Headers`, `Request`, `Response`.
//!
//! `fetch` validates the request up front, registers the promise resolvers
//! with the runtime, and hands the wire work to an event-loop task. The
//! completion event comes back through the loop and settles the promise on
//! the JS thread.

use rquickjs::class::Trace;
use rquickjs::function::Opt;
use rquickjs::{Array, Class, Ctx, Exception, Function, JsLifetime, Object, Persistent, Value};

use crate::event_loop::IoEvent;
use crate::state::{self, FetchWaiter};
use crate::value::{format_call_error, new_error, promise_capability};
use crate::web::http_client::{self, HttpRequestPlan, HttpResponseData};
use crate::web::url::UrlRecord;

const USER_AGENT: &str = concat!("jsrt/", env!("CARGO_PKG_VERSION"));

/// Ordered header list. Names are lowercased when they enter the list;
/// lookups are linear, which is fine at typical header counts.
#[derive(Default, Trace, JsLifetime)]
#[rquickjs::class(rename = "Headers")]
pub struct Headers {
    #[qjs(skip_trace)]
    pub(crate) entries: Vec<(String, String)>,
}

impl Headers {
    pub(crate) fn from_pairs(pairs: Vec<(String, String)>) -> Self {
        let mut headers = Self::default();
        for (name, value) in pairs {
            headers.push_append(&name, &value);
        }
        headers
    }

    fn push_append(&mut self, name: &str, value: &str) {
        self.entries
            .push((name.to_ascii_lowercase(), value.to_string()));
    }

    fn push_set(&mut self, name: &str, value: &str) {
        let name = name.to_ascii_lowercase();
        let mut replaced = false;
        self.entries.retain_mut(|(entry_name, entry_value)| {
            if *entry_name != name {
                return true;
            }
            if replaced {
                return false;
            }
            *entry_value = value.to_string();
            replaced = true;
            true
        });
        if !replaced {
            self.entries.push((name, value.to_string()));
        }
    }

    fn lookup(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.entries
            .iter()
            .find(|(entry_name, _)| *entry_name == name)
            .map(|(_, value)| value.as_str())
    }

    fn fill_from_value<'js>(
        &mut self,
        ctx: &Ctx<'js>,
        init: &Value<'js>,
    ) -> rquickjs::Result<()> {
        if let Ok(other) = Class::<Headers>::from_value(init) {
            for (name, value) in &other.borrow().entries {
                self.push_append(name, value);
            }
            return Ok(());
        }
        if let Some(sequence) = init.as_array() {
            for item in sequence.iter::<Value>() {
                let item = item?;
                let Some(pair) = item.as_array() else {
                    return Err(Exception::throw_type(
                        ctx,
                        "Headers: sequence items must be [name, value] pairs",
                    ));
                };
                if pair.len() != 2 {
                    return Err(Exception::throw_type(
                        ctx,
                        "Headers: each pair must contain exactly two items",
                    ));
                }
                let name: String = crate::value::coerce_string(ctx, pair.get(0)?)?;
                let value: String = crate::value::coerce_string(ctx, pair.get(1)?)?;
                self.push_append(&name, &value);
            }
            return Ok(());
        }
        if let Some(record) = init.as_object() {
            for prop in record.props::<String, Value>() {
                let (name, value) = prop?;
                let value = crate::value::coerce_string(ctx, value)?;
                self.push_append(&name, &value);
            }
            return Ok(());
        }
        Err(Exception::throw_type(ctx, "Headers: unsupported initialiser"))
    }
}

#[rquickjs::methods]
impl Headers {
    #[qjs(constructor)]
    pub fn new<'js>(ctx: Ctx<'js>, init: Opt<Value<'js>>) -> rquickjs::Result<Self> {
        let mut headers = Self::default();
        if let Some(init) = init.0 {
            if !init.is_undefined() && !init.is_null() {
                headers.fill_from_value(&ctx, &init)?;
            }
        }
        Ok(headers)
    }

    pub fn get(&self, name: String) -> Option<String> {
        self.lookup(&name).map(|value| value.to_string())
    }

    pub fn set(&mut self, name: String, value: String) {
        self.push_set(&name, &value);
    }

    pub fn append(&mut self, name: String, value: String) {
        self.push_append(&name, &value);
    }

    pub fn has(&self, name: String) -> bool {
        self.lookup(&name).is_some()
    }

    pub fn delete(&mut self, name: String) {
        let name = name.to_ascii_lowercase();
        self.entries.retain(|(entry_name, _)| *entry_name != name);
    }

    pub fn entries<'js>(&self, ctx: Ctx<'js>) -> rquickjs::Result<Value<'js>> {
        let array = Array::new(ctx.clone())?;
        for (index, (name, value)) in self.entries.iter().enumerate() {
            let entry = Array::new(ctx.clone())?;
            entry.set(0, name.clone())?;
            entry.set(1, value.clone())?;
            array.set(index, entry)?;
        }
        let helper: Function = ctx.eval("(a) => a[Symbol.iterator]()")?;
        helper.call((array,))
    }

    pub fn keys<'js>(&self, ctx: Ctx<'js>) -> rquickjs::Result<Value<'js>> {
        let array = Array::new(ctx.clone())?;
        for (index, (name, _)) in self.entries.iter().enumerate() {
            array.set(index, name.clone())?;
        }
        let helper: Function = ctx.eval("(a) => a[Symbol.iterator]()")?;
        helper.call((array,))
    }

    pub fn values<'js>(&self, ctx: Ctx<'js>) -> rquickjs::Result<Value<'js>> {
        let array = Array::new(ctx.clone())?;
        for (index, (_, value)) in self.entries.iter().enumerate() {
            array.set(index, value.clone())?;
        }
        let helper: Function = ctx.eval("(a) => a[Symbol.iterator]()")?;
        helper.call((array,))
    }

    #[qjs(rename = "forEach")]
    pub fn for_each<'js>(&self, _ctx: Ctx<'js>, callback: Function<'js>) -> rquickjs::Result<()> {
        for (name, value) in self.entries.clone() {
            callback.call::<_, ()>((value, name))?;
        }
        Ok(())
    }
}

#[derive(Trace, JsLifetime)]
#[rquickjs::class(rename = "Request")]
pub struct Request<'js> {
    #[qjs(skip_trace)]
    pub(crate) method: String,
    #[qjs(skip_trace)]
    pub(crate) url: String,
    pub(crate) headers: Class<'js, Headers>,
}

#[rquickjs::methods]
impl<'js> Request<'js> {
    #[qjs(constructor)]
    pub fn new(
        ctx: Ctx<'js>,
        input: Value<'js>,
        init: Opt<Object<'js>>,
    ) -> rquickjs::Result<Self> {
        let url = if let Ok(other) = Class::<Request>::from_value(&input) {
            other.borrow().url.clone()
        } else {
            crate::value::coerce_string(&ctx, input)?
        };
        let mut method = "GET".to_string();
        let mut headers = Headers::default();
        if let Some(init) = init.0 {
            if let Some(value) = init.get::<_, Option<String>>("method")? {
                method = value;
            }
            if let Some(value) = init.get::<_, Option<Value>>("headers")? {
                if !value.is_undefined() && !value.is_null() {
                    headers.fill_from_value(&ctx, &value)?;
                }
            }
        }
        Ok(Self {
            method,
            url,
            headers: Class::instance(ctx, headers)?,
        })
    }

    #[qjs(get)]
    pub fn method(&self) -> String {
        self.method.clone()
    }

    #[qjs(get)]
    pub fn url(&self) -> String {
        self.url.clone()
    }

    #[qjs(get)]
    pub fn headers(&self) -> Class<'js, Headers> {
        self.headers.clone()
    }
}

#[derive(Trace, JsLifetime)]
#[rquickjs::class(rename = "Response")]
pub struct Response<'js> {
    #[qjs(skip_trace)]
    pub(crate) status: u16,
    #[qjs(skip_trace)]
    pub(crate) status_text: String,
    #[qjs(skip_trace)]
    pub(crate) url: String,
    #[qjs(skip_trace)]
    pub(crate) body_text: String,
    pub(crate) headers: Class<'js, Headers>,
}

#[rquickjs::methods]
impl<'js> Response<'js> {
    #[qjs(constructor)]
    pub fn new(
        ctx: Ctx<'js>,
        body: Opt<Value<'js>>,
        init: Opt<Object<'js>>,
    ) -> rquickjs::Result<Self> {
        let body_text = match body.0 {
            Some(value) if !value.is_undefined() && !value.is_null() => {
                crate::value::coerce_string(&ctx, value)?
            }
            _ => String::new(),
        };
        let mut status = 200u16;
        let mut status_text = String::from("OK");
        let mut headers = Headers::default();
        if let Some(init) = init.0 {
            if let Some(value) = init.get::<_, Option<f64>>("status")? {
                status = value as u16;
            }
            if let Some(value) = init.get::<_, Option<String>>("statusText")? {
                status_text = value;
            }
            if let Some(value) = init.get::<_, Option<Value>>("headers")? {
                if !value.is_undefined() && !value.is_null() {
                    headers.fill_from_value(&ctx, &value)?;
                }
            }
        }
        Ok(Self {
            status,
            status_text,
            url: String::new(),
            body_text,
            headers: Class::instance(ctx, headers)?,
        })
    }

    #[qjs(get)]
    pub fn status(&self) -> u16 {
        self.status
    }

    #[qjs(get, rename = "statusText")]
    pub fn status_text(&self) -> String {
        self.status_text.clone()
    }

    #[qjs(get)]
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    #[qjs(get)]
    pub fn url(&self) -> String {
        self.url.clone()
    }

    #[qjs(get)]
    pub fn headers(&self) -> Class<'js, Headers> {
        self.headers.clone()
    }

    pub fn text(&self) -> String {
        self.body_text.clone()
    }

    pub fn json(&self, ctx: Ctx<'js>) -> rquickjs::Result<Value<'js>> {
        ctx.json_parse(self.body_text.clone())
    }
}

/// Assemble the wire plan from `fetch`'s arguments. Errors are plain
/// strings; the caller rejects the promise with them.
fn build_plan<'js>(
    ctx: &Ctx<'js>,
    input: &Value<'js>,
    init: Option<&Object<'js>>,
) -> rquickjs::Result<Result<HttpRequestPlan, String>> {
    let (url_text, mut method, mut header_list) =
        if let Ok(request) = Class::<Request>::from_value(input) {
            let request = request.borrow();
            (
                request.url.clone(),
                request.method.clone(),
                request.headers.borrow().entries.clone(),
            )
        } else {
            (
                crate::value::coerce_string(ctx, input.clone())?,
                "GET".to_string(),
                Vec::new(),
            )
        };

    let record = match UrlRecord::parse(&url_text) {
        Ok(record) => record,
        Err(_) => return Ok(Err("Invalid URL".to_string())),
    };
    match record.scheme.as_str() {
        "http" => {}
        "https" => {
            return Ok(Err(
                "https: URLs are not supported: the runtime has no TLS stack".to_string(),
            ));
        }
        other => return Ok(Err(format!("unsupported URL scheme '{other}'"))),
    }

    let mut body: Option<Vec<u8>> = None;
    if let Some(init) = init {
        if let Some(value) = init.get::<_, Option<String>>("method")? {
            method = value;
        }
        if let Some(value) = init.get::<_, Option<Value>>("headers")? {
            if !value.is_undefined() && !value.is_null() {
                let mut headers = Headers::from_pairs(header_list);
                headers.fill_from_value(ctx, &value)?;
                header_list = headers.entries;
            }
        }
        if let Some(value) = init.get::<_, Option<String>>("body")? {
            body = Some(value.into_bytes());
        }
        // An AbortSignal in `init` is accepted but not observed by the
        // client.
    }

    let mut headers = Headers::from_pairs(header_list);
    if headers.lookup("user-agent").is_none() {
        headers.push_set("user-agent", USER_AGENT);
    }
    if headers.lookup("connection").is_none() {
        headers.push_set("connection", "close");
    }
    if let Some(body) = &body {
        if headers.lookup("content-length").is_none() {
            headers.push_set("content-length", &body.len().to_string());
        }
    }

    let host = record.host.clone().unwrap_or_default();
    let port = record.port.unwrap_or(80);
    let mut path = record.pathname.clone();
    if !record.search.is_empty() {
        path.push('?');
        path.push_str(&record.search);
    }

    Ok(Ok(HttpRequestPlan {
        method,
        host,
        port,
        port_is_default: record.port.is_none(),
        path,
        headers: headers.entries,
        body,
    }))
}

fn fetch<'js>(
    ctx: Ctx<'js>,
    input: Value<'js>,
    init: Opt<Object<'js>>,
) -> rquickjs::Result<Value<'js>> {
    let (promise, resolve, reject) = promise_capability(&ctx)?;

    let plan = match build_plan(&ctx, &input, init.0.as_ref())? {
        Ok(plan) => plan,
        Err(message) => {
            let error = new_error(&ctx, &message)?;
            reject.call::<_, ()>((error,))?;
            return Ok(promise);
        }
    };

    let request_url = format!(
        "http://{}{}{}",
        plan.host,
        if plan.port_is_default {
            String::new()
        } else {
            format!(":{}", plan.port)
        },
        plan.path
    );
    let host = state::host_state(&ctx);
    let id = host.next_fetch_id();
    host.pending_fetches.borrow_mut().insert(
        id,
        FetchWaiter {
            resolve: Persistent::save(&ctx, resolve),
            reject: Persistent::save(&ctx, reject),
            url: request_url,
        },
    );

    let shared = host.loop_shared.clone();
    let poster = host.loop_shared.clone();
    shared.spawn(async move {
        let result = http_client::execute(plan).await;
        poster.post_event(IoEvent::FetchDone { id, result });
    });

    Ok(promise)
}

/// Settle the promise for a completed request. Runs on the JS thread during
/// the loop's event-drain phase.
pub fn complete<'js>(
    ctx: &Ctx<'js>,
    id: u64,
    result: Result<HttpResponseData, String>,
) -> rquickjs::Result<()> {
    let host = state::host_state(ctx);
    let Some(waiter) = host.pending_fetches.borrow_mut().remove(&id) else {
        tracing::warn!(id, "fetch completion for unknown request");
        return Ok(());
    };

    let outcome = match result {
        Ok(data) => {
            let headers = Class::instance(ctx.clone(), Headers::from_pairs(data.headers))?;
            let response = Class::instance(
                ctx.clone(),
                Response {
                    status: data.status,
                    status_text: data.status_text,
                    url: waiter.url.clone(),
                    body_text: String::from_utf8_lossy(&data.body).into_owned(),
                    headers,
                },
            )?;
            let resolve = waiter.resolve.clone().restore(ctx)?;
            resolve.call::<_, ()>((response,))
        }
        Err(message) => {
            let error = new_error(ctx, &message)?;
            let reject = waiter.reject.clone().restore(ctx)?;
            reject.call::<_, ()>((error,))
        }
    };
    if let Err(err) = outcome {
        host.push_exception(format_call_error(ctx, err));
    }
    Ok(())
}

pub fn register(ctx: &Ctx<'_>) -> rquickjs::Result<()> {
    let globals = ctx.globals();
    Class::<Headers>::define(&globals)?;
    Class::<Request>::define(&globals)?;
    Class::<Response>::define(&globals)?;
    globals.set("fetch", rquickjs::function::Func::from(fetch))?;
    Ok(())
}
