//! `structuredClone`: recursive deep copy over a restricted type
//! vocabulary, preserving object-graph cycles.

use rquickjs::function::{Constructor, Func};
use rquickjs::object::Filter;
use rquickjs::{Array, Ctx, Exception, Function, Object, Value};

use crate::value::values_identical;

/// Source/clone pairs seen so far. Seeded before descending into an
/// aggregate so self-references resolve to the clone under construction.
struct SeenMap<'js> {
    entries: Vec<(Value<'js>, Value<'js>)>,
}

impl<'js> SeenMap<'js> {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    fn lookup(&self, ctx: &Ctx<'js>, source: &Value<'js>) -> rquickjs::Result<Option<Value<'js>>> {
        for (original, clone) in &self.entries {
            if values_identical(ctx, original, source)? {
                return Ok(Some(clone.clone()));
            }
        }
        Ok(None)
    }

    fn insert(&mut self, source: Value<'js>, clone: Value<'js>) {
        self.entries.push((source, clone));
    }
}

fn constructor_name<'js>(object: &Object<'js>) -> String {
    object
        .get::<_, Option<Object>>("constructor")
        .ok()
        .flatten()
        .and_then(|ctor| ctor.get::<_, Option<String>>("name").ok().flatten())
        .unwrap_or_default()
}

fn clone_value<'js>(
    ctx: &Ctx<'js>,
    value: &Value<'js>,
    seen: &mut SeenMap<'js>,
) -> rquickjs::Result<Value<'js>> {
    if !value.is_object() {
        // Primitives are immutable; handing back the same value matches a
        // copy.
        return Ok(value.clone());
    }

    if let Some(clone) = seen.lookup(ctx, value)? {
        return Ok(clone);
    }

    if value.is_function() {
        return Err(Exception::throw_type(ctx, "function objects cannot be cloned"));
    }

    if let Some(array) = value.as_array() {
        let clone = Array::new(ctx.clone())?;
        seen.insert(value.clone(), clone.clone().into_value());
        for index in 0..array.len() {
            let item: Value = array.get(index)?;
            let cloned = clone_value(ctx, &item, seen)?;
            clone.set(index, cloned)?;
        }
        return Ok(clone.into_value());
    }

    let object = value
        .as_object()
        .expect("non-array object checked above");

    match constructor_name(object).as_str() {
        "Date" => {
            let get_time: Function = object.get("getTime")?;
            let millis: f64 = get_time.call((rquickjs::function::This(value.clone()),))?;
            let date_ctor: Constructor = ctx.globals().get("Date")?;
            let clone: Value = date_ctor.construct((millis,))?;
            seen.insert(value.clone(), clone.clone());
            Ok(clone)
        }
        "RegExp" => {
            let source: String = object.get("source")?;
            let flags: String = object.get("flags")?;
            let regexp_ctor: Constructor = ctx.globals().get("RegExp")?;
            let clone: Value = regexp_ctor.construct((source, flags))?;
            seen.insert(value.clone(), clone.clone());
            Ok(clone)
        }
        "Object" | "" => {
            let clone = Object::new(ctx.clone())?;
            seen.insert(value.clone(), clone.clone().into_value());
            // Own enumerable keys, string and symbol alike.
            let filter = Filter::new().string().symbol();
            for key in object.own_keys::<Value>(filter) {
                let key = key?;
                let item: Value = object.get::<_, Value>(key.clone())?;
                let cloned = clone_value(ctx, &item, seen)?;
                clone.set(key, cloned)?;
            }
            Ok(clone.into_value())
        }
        other => Err(Exception::throw_type(
            ctx,
            &format!("{other} objects cannot be cloned"),
        )),
    }
}

fn structured_clone<'js>(ctx: Ctx<'js>, value: Value<'js>) -> rquickjs::Result<Value<'js>> {
    let mut seen = SeenMap::new();
    clone_value(&ctx, &value, &mut seen)
}

pub fn register(ctx: &Ctx<'_>) -> rquickjs::Result<()> {
    ctx.globals()
        .set("structuredClone", Func::from(structured_clone))?;
    Ok(())
}
