//! Kubernetes-specific template filters
//!
//! These filters extend MiniJinja with Helm-compatible functionality.

use base64::Engine as _;
use minijinja::{Error, ErrorKind, Value};

/// Convert a value to YAML format
///
/// Usage: {{ values.config | toyaml }}
pub fn toyaml(value: Value) -> Result<String, Error> {
    let json_value: serde_json::Value = serde_json::to_value(&value)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, e.to_string()))?;

    let yaml = serde_yaml::to_string(&json_value)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, e.to_string()))?;

    Ok(yaml.trim_start_matches("---\n").trim_end().to_string())
}

/// Usage: {{ values.config | tojson }}
pub fn tojson(value: Value) -> Result<String, Error> {
    let json_value: serde_json::Value = serde_json::to_value(&value)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, e.to_string()))?;

    serde_json::to_string(&json_value)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, e.to_string()))
}

/// Usage: {{ secret | b64encode }}
pub fn b64encode(value: String) -> String {
    base64::engine::general_purpose::STANDARD.encode(value.as_bytes())
}

/// Quote a string with double quotes
///
/// Usage: {{ name | quote }}
pub fn quote(value: Value) -> String {
    let s = match value.as_str() {
        Some(s) => s.to_string(),
        None => value.to_string(),
    };
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Indent text with a newline prefix (like Helm's nindent)
///
/// Usage: {{ content | nindent(4) }}
pub fn nindent(value: String, spaces: usize) -> String {
    format!("\n{}", indent(value, spaces))
}

/// Indent every non-empty line
///
/// Usage: {{ content | indent(4) }}
pub fn indent(value: String, spaces: usize) -> String {
    let prefix = " ".repeat(spaces);
    value
        .lines()
        .map(|line| {
            if line.is_empty() {
                String::new()
            } else {
                format!("{}{}", prefix, line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Require a value, fail if undefined or empty
///
/// Usage: {{ values.image.repository | required("image.repository is required") }}
pub fn required(value: Value, message: Option<String>) -> Result<Value, Error> {
    let missing = value.is_undefined() || value.is_none() || value.as_str() == Some("");
    if missing {
        let msg = message.unwrap_or_else(|| "required value is missing".to_string());
        Err(Error::new(ErrorKind::InvalidOperation, msg))
    } else {
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toyaml() {
        let value = Value::from_serialize(serde_json::json!({"a": 1, "b": ["x"]}));
        assert_eq!(toyaml(value).unwrap(), "a: 1\nb:\n- x");
    }

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote(Value::from("say \"hi\"")), "\"say \\\"hi\\\"\"");
        assert_eq!(quote(Value::from(3)), "\"3\"");
    }

    #[test]
    fn test_nindent() {
        assert_eq!(nindent("a: 1\n\nb: 2".to_string(), 2), "\n  a: 1\n\n  b: 2");
    }

    #[test]
    fn test_required() {
        assert!(required(Value::UNDEFINED, None).is_err());
        assert!(required(Value::from(""), Some("need it".into()))
            .unwrap_err()
            .to_string()
            .contains("need it"));
        assert_eq!(required(Value::from("x"), None).unwrap(), Value::from("x"));
    }

    #[test]
    fn test_b64encode() {
        assert_eq!(b64encode("admin".to_string()), "YWRtaW4=");
    }
}
