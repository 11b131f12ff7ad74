// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Output schema validation for the model backend.

use jsonschema::JSONSchema;

/// How many validation errors to include in the failure summary.
const MAX_REPORTED_ERRORS: usize = 3;

/// Validate `output` against `schema_json`.
///
/// Any failure - schema parse, schema compile, output parse, or
/// validation - returns a human-readable summary that converts an
/// otherwise-done task to failed.
pub fn validate_output(schema_json: &str, output: &str) -> Result<(), String> {
    let schema: serde_json::Value = serde_json::from_str(schema_json)
        .map_err(|e| format!("output validation failed: schema is not valid JSON: {e}"))?;

    let compiled = JSONSchema::compile(&schema)
        .map_err(|e| format!("output validation failed: schema did not compile: {e}"))?;

    let instance: serde_json::Value = serde_json::from_str(output)
        .map_err(|e| format!("output validation failed: output is not valid JSON: {e}"))?;

    if let Err(errors) = compiled.validate(&instance) {
        let mut details: Vec<String> = errors
            .take(MAX_REPORTED_ERRORS)
            .map(|e| {
                let path = e.instance_path.to_string();
                if path.is_empty() {
                    e.to_string()
                } else {
                    format!("{path}: {e}")
                }
            })
            .collect();
        details.sort();
        return Err(format!("output validation failed: {}", details.join("; ")));
    }
    Ok(())
}
