//! Canonical JSON rendering: object keys sorted bytewise, no insignificant
//! whitespace. Byte-identical output is what makes run idempotence and the
//! evidence hash chain testable.

use serde::Serialize;
use serde_json::Value;

/// Serialize a value to canonical JSON text.
pub fn to_canonical_string<T: Serialize>(value: &T) -> serde_json::Result<String> {
    let value = serde_json::to_value(value)?;
    let mut out = String::new();
    write_value(&value, &mut out);
    Ok(out)
}

/// Canonical JSON as bytes, for hashing.
pub fn to_canonical_bytes<T: Serialize>(value: &T) -> serde_json::Result<Vec<u8>> {
    Ok(to_canonical_string(value)?.into_bytes())
}

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => {
            // serde_json's own rendering of scalars is already canonical.
            out.push_str(&value.to_string());
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_value(&map[*key], out);
            }
            out.push('}');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::to_canonical_string;
    use serde_json::json;

    #[test]
    fn keys_are_sorted_recursively() {
        let value = json!({"b": 1, "a": {"z": [3, 1], "y": null}});
        assert_eq!(
            to_canonical_string(&value).unwrap(),
            r#"{"a":{"y":null,"z":[3,1]},"b":1}"#
        );
    }

    #[test]
    fn identical_values_serialize_identically() {
        let first = json!({"x": [1, 2], "k": "v"});
        let second = json!({"k": "v", "x": [1, 2]});
        assert_eq!(
            to_canonical_string(&first).unwrap(),
            to_canonical_string(&second).unwrap()
        );
    }
}
