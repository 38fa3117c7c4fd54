//! `FormData` over string entries, in insertion order.

use rquickjs::class::Trace;
use rquickjs::function::{Opt, This};
use rquickjs::{Array, Class, Ctx, Function, JsLifetime, Value};

#[derive(Default, Trace, JsLifetime)]
#[rquickjs::class(rename = "FormData")]
pub struct FormData {
    #[qjs(skip_trace)]
    pub(crate) entries: Vec<(String, String)>,
}

#[rquickjs::methods]
impl FormData {
    #[qjs(constructor)]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, name: String, value: String) {
        self.entries.push((name, value));
    }

    /// Replace the first entry for `name`, drop the rest, append if absent.
    pub fn set(&mut self, name: String, value: String) {
        let mut replaced = false;
        self.entries.retain_mut(|(entry_name, entry_value)| {
            if *entry_name != name {
                return true;
            }
            if replaced {
                return false;
            }
            *entry_value = value.clone();
            replaced = true;
            true
        });
        if !replaced {
            self.entries.push((name, value));
        }
    }

    pub fn get(&self, name: String) -> Option<String> {
        self.entries
            .iter()
            .find(|(entry_name, _)| *entry_name == name)
            .map(|(_, value)| value.clone())
    }

    #[qjs(rename = "getAll")]
    pub fn get_all(&self, name: String) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(entry_name, _)| *entry_name == name)
            .map(|(_, value)| value.clone())
            .collect()
    }

    pub fn has(&self, name: String) -> bool {
        self.entries.iter().any(|(entry_name, _)| *entry_name == name)
    }

    pub fn delete(&mut self, name: String) {
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

    #[qjs(rename = "forEach")]
    pub fn for_each<'js>(
        this: This<Class<'js, FormData>>,
        _ctx: Ctx<'js>,
        callback: Function<'js>,
        _this_arg: Opt<Value<'js>>,
    ) -> rquickjs::Result<()> {
        let snapshot = this.0.borrow().entries.clone();
        for (name, value) in snapshot {
            callback.call::<_, ()>((value, name, this.0.clone()))?;
        }
        Ok(())
    }
}

pub fn register(ctx: &Ctx<'_>) -> rquickjs::Result<()> {
    Class::<FormData>::define(&ctx.globals())?;
    Ok(())
}
