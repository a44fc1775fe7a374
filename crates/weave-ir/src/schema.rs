use std::sync::OnceLock;

use jsonschema::{Draft, JSONSchema};
use serde_json::Value;

use crate::error::{IrError, Result};
use crate::graph::wire::XscpData;

static DOCUMENT_SCHEMA: OnceLock<std::result::Result<JSONSchema, String>> = OnceLock::new();

fn compile_schema(source: &'static str) -> std::result::Result<JSONSchema, String> {
    let schema_value: Value =
        serde_json::from_str(source).map_err(|err| format!("embedded schema is not JSON: {err}"))?;
    JSONSchema::options()
        .with_draft(Draft::Draft202012)
        .compile(&schema_value)
        .map_err(|err| format!("embedded schema does not compile: {err}"))
}

fn document_schema() -> Result<&'static JSONSchema> {
    DOCUMENT_SCHEMA
        .get_or_init(|| compile_schema(include_str!("../schema/xscp_document.schema.json")))
        .as_ref()
        .map_err(|err| IrError::Schema(err.clone()))
}

/// Validates a `serde_json::Value` against the clipboard document schema.
pub fn validate_document_value(value: &Value) -> Result<()> {
    let schema = document_schema()?;
    if let Err(errors) = schema.validate(value) {
        let messages: Vec<String> = errors.into_iter().map(|err| err.to_string()).collect();
        let joined = messages.join("\n");
        return Err(IrError::Schema(joined));
    }
    Ok(())
}

/// Validates a [`XscpData`] document against the schema.
pub fn validate_document(document: &XscpData) -> Result<()> {
    let value = document.to_value()?;
    validate_document_value(&value)
}
