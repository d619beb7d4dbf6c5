//! JSON Schema validation for platform payloads.
//!
//! The reasoning service is asked to follow `schema/platform_payload.schema.json`
//! in strict mode, but its output is still re-validated here before use.

use std::sync::OnceLock;
use thiserror::Error;

/// Embedded payload schema (loaded at compile time).
pub const PAYLOAD_SCHEMA_JSON: &str = include_str!("../../schema/platform_payload.schema.json");

/// Compiled JSON Schema validator (initialized once, reused).
static COMPILED_SCHEMA: OnceLock<Result<jsonschema::Validator, String>> = OnceLock::new();

/// Errors from schema loading.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Failed to load schema: {0}")]
    LoadError(String),
}

fn get_validator() -> Result<&'static jsonschema::Validator, SchemaError> {
    let result = COMPILED_SCHEMA.get_or_init(|| {
        let schema_value: serde_json::Value = match serde_json::from_str(PAYLOAD_SCHEMA_JSON) {
            Ok(v) => v,
            Err(e) => return Err(format!("Invalid schema JSON: {}", e)),
        };

        jsonschema::options()
            .build(&schema_value)
            .map_err(|e| format!("Failed to compile schema: {}", e))
    });

    match result {
        Ok(v) => Ok(v),
        Err(e) => Err(SchemaError::LoadError(e.clone())),
    }
}

/// The payload schema as a JSON value, for sending to the reasoning service.
pub fn payload_schema() -> serde_json::Value {
    serde_json::from_str(PAYLOAD_SCHEMA_JSON).unwrap_or(serde_json::Value::Null)
}

/// The schema in the form sent to the reasoning service.
///
/// Strict structured output requires every property to be listed as required,
/// so the debug-only `sources` list is either dropped or made required.
pub fn service_schema(include_sources: bool) -> serde_json::Value {
    let mut schema = payload_schema();
    if include_sources {
        if let Some(required) = schema["required"].as_array_mut() {
            required.push(serde_json::Value::from("sources"));
        }
    } else if let Some(properties) = schema["properties"].as_object_mut() {
        properties.remove("sources");
    }
    if let Some(object) = schema.as_object_mut() {
        object.remove("$schema");
        object.remove("title");
    }
    schema
}

/// Validate a payload JSON value against the schema.
///
/// Returns every violation found, formatted as `<message> at <path>`.
pub fn validate_payload_schema(payload: &serde_json::Value) -> Result<(), Vec<String>> {
    let validator = get_validator().map_err(|e| vec![e.to_string()])?;

    let errors: Vec<String> = validator
        .iter_errors(payload)
        .map(|e| format!("{} at {}", e, e.instance_path))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
