//! Check parsed tool arguments against the tool's parameter schema.

use serde_json::Value;

use super::types::ToolParameters;

/// Validate `args` against the top level of `parameters`.
///
/// Checks the object type, required fields and the declared type of each
/// known property. Returns a description of the first violation.
pub fn validate_arguments(args: &Value, parameters: &ToolParameters) -> Result<(), String> {
    let schema = &parameters.schema;

    if schema.get("type").and_then(Value::as_str) == Some("object") && !args.is_object() {
        return Err(format!(
            "arguments must be a JSON object, got {}",
            json_type_name(args)
        ));
    }
    let Some(fields) = args.as_object() else {
        return Ok(());
    };

    let missing = schema
        .get("required")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .find(|name| !fields.contains_key(*name));
    if let Some(missing) = missing {
        return Err(format!("missing required argument '{missing}'"));
    }

    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Ok(());
    };
    for (name, value) in fields {
        let expected = properties
            .get(name)
            .and_then(|property| property.get("type"))
            .and_then(Value::as_str);
        if let Some(expected) = expected {
            if !value_matches_type(value, expected) {
                return Err(format!(
                    "argument '{name}' must be {expected}, got {}",
                    json_type_name(value)
                ));
            }
        }
    }

    Ok(())
}

fn value_matches_type(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
