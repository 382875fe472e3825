//! Loading unit descriptors from JSON.
//!
//! Accepts either a bare array of descriptors or an object with a `units`
//! array.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use tracing::{debug, info};

use crate::core::UnitDescriptor;
use crate::errors::{Result, SchemaError};

/// Parses descriptors from a JSON string.
///
/// # Errors
///
/// Returns a [`SchemaError`] for invalid JSON, an unexpected document
/// shape or a malformed descriptor.
pub fn load_from_str(json: &str) -> Result<Vec<UnitDescriptor>, SchemaError> {
    let document: serde_json::Value = serde_json::from_str(json)
        .map_err(|err| SchemaError::new(format!("Invalid descriptor JSON: {err}")))?;
    from_value(document)
}

/// Parses descriptors from a reader.
pub fn load_from_reader<R: Read>(reader: R) -> Result<Vec<UnitDescriptor>> {
    let document: serde_json::Value = serde_json::from_reader(reader)
        .map_err(|err| SchemaError::new(format!("Invalid descriptor JSON: {err}")))?;
    Ok(from_value(document)?)
}

/// Parses descriptors from a file.
pub fn load_from_file(path: impl AsRef<Path>) -> Result<Vec<UnitDescriptor>> {
    let path = path.as_ref();
    debug!(path = %path.display(), "Loading unit descriptors");
    let file = File::open(path)?;
    let units = load_from_reader(BufReader::new(file))?;
    info!(path = %path.display(), units = units.len(), "Loaded unit descriptors");
    Ok(units)
}

fn from_value(document: serde_json::Value) -> Result<Vec<UnitDescriptor>, SchemaError> {
    let entries = match document {
        serde_json::Value::Array(entries) => entries,
        serde_json::Value::Object(mut map) => match map.remove("units") {
            Some(serde_json::Value::Array(entries)) => entries,
            Some(other) => {
                return Err(SchemaError::new(format!(
                    "'units' must be an array, found {}",
                    value_kind(&other)
                )))
            }
            None => {
                return Err(SchemaError::new(
                    "Descriptor document must be an array or an object with 'units'",
                ))
            }
        },
        other => {
            return Err(SchemaError::new(format!(
                "Descriptor document must be an array or an object with 'units', found {}",
                value_kind(&other)
            )))
        }
    };

    entries
        .into_iter()
        .enumerate()
        .map(|(position, entry)| {
            let id = entry
                .get("id")
                .and_then(serde_json::Value::as_str)
                .map(str::to_string);
            serde_json::from_value::<UnitDescriptor>(entry).map_err(|err| {
                let subject = id.clone().unwrap_or_else(|| format!("#{position}"));
                SchemaError::new(format!("Invalid descriptor {subject}: {err}"))
                    .with_units(id.into_iter().collect())
            })
        })
        .collect()
}

fn value_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
