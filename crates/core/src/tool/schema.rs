use serde_json::{Map, Value};

/// Checks `arguments` against the subset of JSON schema the gateway
/// understands: the object type, `required` keys and the primitive `type`
/// of each declared property. Anything else is left to the tool server.
pub(crate) fn validate(
    schema: &Value,
    arguments: &Map<String, Value>,
) -> Result<(), String> {
    let Some(schema) = schema.as_object() else {
        return Ok(());
    };
    match schema.get("type") {
        Some(ty) if !type_matches(ty, "object") => {
            return Err(format!("schema expects type {ty}, got an object"));
        }
        _ => {}
    }

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            if !arguments.contains_key(key) {
                return Err(format!("missing required argument `{key}`"));
            }
        }
    }

    let Some(properties) = schema.get("properties").and_then(Value::as_object)
    else {
        return Ok(());
    };
    for (key, value) in arguments {
        let Some(ty) = properties.get(key).and_then(|prop| prop.get("type"))
        else {
            continue;
        };
        let actual = type_name(value);
        if !type_matches(ty, actual) {
            return Err(format!(
                "argument `{key}` should be of type {ty}, got {actual}"
            ));
        }
    }
    Ok(())
}

fn type_matches(expected: &Value, actual: &str) -> bool {
    match expected {
        Value::String(ty) => primitive_matches(ty, actual),
        Value::Array(types) => types
            .iter()
            .filter_map(Value::as_str)
            .any(|ty| primitive_matches(ty, actual)),
        _ => true,
    }
}

fn primitive_matches(expected: &str, actual: &str) -> bool {
    expected == actual || (expected == "number" && actual == "integer")
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_validate() {
        let schema = json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "limit": { "type": ["integer", "null"] },
                "ratio": { "type": "number" },
            },
            "required": ["path"],
        });

        assert!(validate(&schema, &args(json!({"path": "/tmp"}))).is_ok());
        assert!(
            validate(&schema, &args(json!({"path": "/", "limit": null, "ratio": 1})))
                .is_ok()
        );
        assert!(validate(&schema, &args(json!({"path": "/", "extra": 1}))).is_ok());

        let err = validate(&schema, &args(json!({}))).unwrap_err();
        assert!(err.contains("path"));
        assert!(validate(&schema, &args(json!({"path": 3}))).is_err());
        assert!(validate(&schema, &args(json!({"path": "/", "limit": 1.5}))).is_err());
    }

    #[test]
    fn test_non_object_schema() {
        assert!(validate(&Value::Null, &Map::new()).is_ok());
        assert!(validate(&json!({"type": "string"}), &Map::new()).is_err());
    }
}
