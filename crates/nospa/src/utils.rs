//! Small helpers shared by the engine: attribute decoding, path lookup into a
//! data tree and the sync-or-async call normaliser.

use futures_util::future::{self, FutureExt, LocalBoxFuture};
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

use crate::dom::Dom;

static PATH_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[,\[\].]+").expect("path separator pattern is valid"));

/// Decode an attribute: parsed JSON when the raw text is JSON, the raw text
/// otherwise, `None` when the attribute is missing.
pub fn parse_attr_value<D: Dom>(dom: &D, node: &D::Node, name: &str) -> Option<Value> {
    let raw = dom.attribute(node, name)?;
    Some(decode_attr(&raw))
}

pub fn decode_attr(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::String(String::new());
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()))
}

/// JavaScript truthiness of a decoded value.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|number| number != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Look up a dotted / bracketed path (`user.tags[0]`, `items.2.name`) in
/// `data`. An empty path resolves to nothing rather than to `data` itself.
pub fn get_path<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    let mut keys = PATH_SEPARATOR.split(path).filter(|key| !key.is_empty()).peekable();
    keys.peek()?;
    keys.try_fold(data, |current, key| match current {
        Value::Object(map) => map.get(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|index| items.get(index)),
        _ => None,
    })
}

/// Result of a call that may complete synchronously or later.
pub enum MaybeAsync<T, E> {
    Ready(Result<T, E>),
    Pending(LocalBoxFuture<'static, Result<T, E>>),
}

impl<T, E> From<Result<T, E>> for MaybeAsync<T, E> {
    fn from(result: Result<T, E>) -> Self {
        Self::Ready(result)
    }
}

/// Run `call` and normalise its outcome into a single future, so callers
/// never care whether the work finished synchronously.
pub fn call_as_async<T, E>(call: impl FnOnce() -> MaybeAsync<T, E>) -> LocalBoxFuture<'static, Result<T, E>>
where
    T: 'static,
    E: 'static,
{
    match call() {
        MaybeAsync::Ready(result) => future::ready(result).boxed_local(),
        MaybeAsync::Pending(pending) => pending,
    }
}
