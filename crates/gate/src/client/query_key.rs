//! Stable cache keys derived from a function name and its arguments.

use serde::Serialize;
use serde_json::Value;

/// Builds `name_<positional>_<named>` with spaces replaced by `_`.
///
/// `args` is read as follows:
/// - a tuple, array or sequence: positional arguments joined by `_`, except
///   that any map or struct among them contributes named arguments;
/// - a map or struct: named arguments rendered `k=v`, sorted by key;
/// - `()` or `None`: no arguments;
/// - anything else: a single positional argument.
///
/// ```
/// use quotegate::client::derive_query_key;
///
/// let key = derive_query_key("get_dividend_history", &("KO", 5)).unwrap();
/// assert_eq!(key, "get_dividend_history_KO_5_");
/// ```
pub fn derive_query_key<A: Serialize + ?Sized>(
    name: &str,
    args: &A,
) -> Result<String, serde_json::Error> {
    let mut positional = Vec::new();
    let mut named = Vec::new();

    match serde_json::to_value(args)? {
        Value::Null => {}
        Value::Array(items) => {
            for item in items {
                match item {
                    Value::Object(map) => named.extend(map),
                    other => positional.push(render(&other)),
                }
            }
        }
        Value::Object(map) => named.extend(map),
        other => positional.push(render(&other)),
    }

    named.sort_by(|(a, _), (b, _)| a.cmp(b));
    let named: Vec<String> = named
        .iter()
        .map(|(k, v)| format!("{}={}", k, render(v)))
        .collect();

    Ok(format!("{}_{}_{}", name, positional.join("_"), named.join("_")).replace(' ', "_"))
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
