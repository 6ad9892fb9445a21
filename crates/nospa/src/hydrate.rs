//! Data hydration: replace `$$data.<path>` placeholders with values from the
//! app data store.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

use crate::utils::{get_path, is_truthy};

static DATA_REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\$\$data\.(.+)$").expect("data reference pattern is valid"));

/// Hydrate `value` in place against `data`.
///
/// Arrays and objects are walked recursively. A placeholder whose path does
/// not resolve to a truthy value is logged and left as it is.
pub fn hydrate(data: &Value, value: &mut Value) {
    match value {
        Value::Array(items) => items.iter_mut().for_each(|item| hydrate(data, item)),
        Value::Object(map) => map.values_mut().for_each(|item| hydrate(data, item)),
        Value::String(text) => {
            if let Some(resolved) = resolve_reference(data, text) {
                *value = resolved;
            }
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

fn resolve_reference(data: &Value, text: &str) -> Option<Value> {
    let path = DATA_REFERENCE.captures(text)?.get(1)?.as_str();
    match get_path(data, path) {
        Some(resolved) if is_truthy(resolved) => Some(resolved.clone()),
        _ => {
            log::error!(target: "nospa::hydrate", "App data reference is not defined or invalid: {text:?}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn hydrated(data: &Value, mut value: Value) -> Value {
        hydrate(data, &mut value);
        value
    }

    #[test]
    fn substitutes_references() {
        let data = json!({"x": 5, "user": {"tags": ["a", "b"]}});

        assert_eq!(hydrated(&data, json!({"a": "$$data.x"})), json!({"a": 5}));
        assert_eq!(hydrated(&data, json!("$$data.user.tags[1]")), json!("b"));
        assert_eq!(
            hydrated(&data, json!(["$$data.x", {"nested": ["$$data.user.tags"]}])),
            json!([5, {"nested": [["a", "b"]]}])
        );
    }

    #[test]
    fn unresolved_references_stay_untouched() {
        let data = json!({"zero": 0, "empty": ""});

        assert_eq!(hydrated(&data, json!("$$data.missing")), json!("$$data.missing"));
        assert_eq!(hydrated(&data, json!({"a": "$$data.zero"})), json!({"a": "$$data.zero"}));
        assert_eq!(hydrated(&data, json!(["$$data.empty"])), json!(["$$data.empty"]));
    }

    #[test]
    fn other_values_pass_through() {
        let data = json!({"x": 5});
        let value = json!({"n": 1, "b": true, "s": "plain", "inline": "see $$data.x", "bare": "$$data."});
        assert_eq!(hydrated(&data, value.clone()), value);
    }
}
