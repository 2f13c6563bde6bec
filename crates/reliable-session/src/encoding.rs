//! Parameter serialization.
//!
//! Form encoding flattens nested parameters the way Rails-style backends
//! expect them:
//!
//! ```text
//! {"user": {"name": "a", "tags": ["x", "y"]}, "q": null}
//!   -> q&user[name]=a&user[tags][]=x&user[tags][]=y
//! ```
//!
//! Object keys are sorted so the same parameters always encode to the same
//! string.

use crate::{SessionError, SessionResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use url::form_urlencoded;

pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// How parameters are written into a request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterEncoding {
    #[default]
    Form,
    Json,
}

impl ParameterEncoding {
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Form => FORM_CONTENT_TYPE,
            Self::Json => JSON_CONTENT_TYPE,
        }
    }

    /// Encode parameters as a request body.
    pub fn encode_body(&self, parameters: &Value) -> SessionResult<Vec<u8>> {
        match self {
            Self::Form => Ok(form_encode(&query_pairs(parameters)?).into_bytes()),
            Self::Json => {
                serde_json::to_vec(parameters).map_err(|e| SessionError::Encoding(e.to_string()))
            }
        }
    }
}

impl FromStr for ParameterEncoding {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "form" | "urlencoded" => Ok(Self::Form),
            "json" => Ok(Self::Json),
            other => Err(SessionError::Config(format!(
                "unknown parameter encoding '{other}' (expected form or json)"
            ))),
        }
    }
}

impl fmt::Display for ParameterEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Form => f.write_str("form"),
            Self::Json => f.write_str("json"),
        }
    }
}

/// Convert any serializable value into request parameters.
pub fn to_parameters<T: Serialize>(value: &T) -> SessionResult<Value> {
    serde_json::to_value(value).map_err(|e| SessionError::Encoding(e.to_string()))
}

/// Flatten parameters into ordered key/value pairs.
///
/// A `None` value marks a key with no value (`null` parameters). The
/// top-level value must be an object (or null, which yields no pairs).
pub fn query_pairs(parameters: &Value) -> SessionResult<Vec<(String, Option<String>)>> {
    match parameters {
        Value::Null => Ok(Vec::new()),
        Value::Object(map) => {
            let mut pairs = Vec::new();
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                flatten(key, &map[key.as_str()], &mut pairs);
            }
            Ok(pairs)
        }
        other => Err(SessionError::Encoding(format!(
            "form parameters must be an object, got {}",
            kind(other)
        ))),
    }
}

fn flatten(key: &str, value: &Value, out: &mut Vec<(String, Option<String>)>) {
    match value {
        Value::Null => out.push((key.to_string(), None)),
        Value::Bool(b) => out.push((key.to_string(), Some(if *b { "1" } else { "0" }.to_string()))),
        Value::Number(n) => out.push((key.to_string(), Some(n.to_string()))),
        Value::String(s) => out.push((key.to_string(), Some(s.clone()))),
        Value::Array(items) => {
            let nested = format!("{key}[]");
            for item in items {
                flatten(&nested, item, out);
            }
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for sub in keys {
                flatten(&format!("{key}[{sub}]"), &map[sub.as_str()], out);
            }
        }
    }
}

/// Percent-encode pairs as `application/x-www-form-urlencoded`.
pub fn form_encode(pairs: &[(String, Option<String>)]) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    append_pairs(&mut serializer, pairs);
    serializer.finish()
}

pub(crate) fn append_pairs<T: form_urlencoded::Target>(
    serializer: &mut form_urlencoded::Serializer<'_, T>,
    pairs: &[(String, Option<String>)],
) {
    for (key, value) in pairs {
        match value {
            Some(value) => serializer.append_pair(key, value),
            None => serializer.append_key_only(key),
        };
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flat_parameters() {
        let body = form_encode(&query_pairs(&json!({"qty": 1, "name": "a b"})).unwrap());
        assert_eq!(body, "name=a+b&qty=1");
    }

    #[test]
    fn test_nested_parameters() {
        let params = json!({"user": {"name": "a", "tags": ["x", "y"]}, "q": null});
        let body = form_encode(&query_pairs(&params).unwrap());
        assert_eq!(
            body,
            "q&user%5Bname%5D=a&user%5Btags%5D%5B%5D=x&user%5Btags%5D%5B%5D=y"
        );
    }

    #[test]
    fn test_booleans_encode_as_digits() {
        let pairs = query_pairs(&json!({"on": true, "off": false})).unwrap();
        assert_eq!(
            pairs,
            vec![
                ("off".to_string(), Some("0".to_string())),
                ("on".to_string(), Some("1".to_string())),
            ]
        );
    }

    #[test]
    fn test_non_object_parameters_rejected() {
        let err = query_pairs(&json!([1, 2])).unwrap_err();
        assert!(matches!(err, SessionError::Encoding(_)));
        assert!(query_pairs(&Value::Null).unwrap().is_empty());
    }

    #[test]
    fn test_json_body() {
        let body = ParameterEncoding::Json.encode_body(&json!({"qty": 1})).unwrap();
        assert_eq!(body, br#"{"qty":1}"#.to_vec());
        assert_eq!(ParameterEncoding::Json.content_type(), "application/json");
    }

    #[test]
    fn test_encoding_from_str() {
        assert_eq!("JSON".parse::<ParameterEncoding>().unwrap(), ParameterEncoding::Json);
        assert_eq!("form".parse::<ParameterEncoding>().unwrap(), ParameterEncoding::Form);
        assert!("xml".parse::<ParameterEncoding>().is_err());
    }

    #[test]
    fn test_to_parameters_rejects_non_string_keys() {
        let mut map = std::collections::HashMap::new();
        map.insert((1, 2), "x");
        assert!(matches!(to_parameters(&map), Err(SessionError::Encoding(_))));
    }
}
