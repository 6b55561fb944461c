//! Function registry - loads the per-cycle set of function descriptors.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use verdant_core::{FunctionId, FunctionMetadata};
use verdant_store::{layout, BucketStore};

use crate::error::{PlannerError, Result};

/// Registry document stored as `function_metadata.json`.
///
/// Each descriptor is either a structured metadata object or a free-text
/// description that the normalizer turns into one.
#[derive(Debug, Deserialize)]
pub struct RegistryDocument {
    pub functions: BTreeMap<String, Value>,
}

/// A function descriptor as read from the registry.
#[derive(Debug, Clone)]
pub enum Descriptor {
    /// Structured metadata, already validated against the shape.
    Structured(Box<FunctionMetadata>),
    /// Natural-language description for the extraction oracle.
    FreeText(String),
}

/// Loads and pre-parses the registry document.
///
/// Only a missing, malformed, or empty document is an error for the
/// whole call. Per-entry parse failures (legacy fields, shape
/// mismatches) are returned alongside the function id so one bad
/// registration never takes down the rest of the cycle.
pub async fn load(store: &BucketStore) -> Result<Vec<(FunctionId, Result<Descriptor>)>> {
    let document: RegistryDocument = store
        .get_json(layout::FUNCTION_METADATA)
        .await
        .map_err(|e| PlannerError::Registry(format!("loading registry: {e}")))?;

    if document.functions.is_empty() {
        return Err(PlannerError::Registry(
            "registry document has no functions".into(),
        ));
    }

    let mut descriptors = Vec::with_capacity(document.functions.len());
    for (name, raw) in document.functions {
        let id = FunctionId::new(name);
        let parsed = parse_descriptor(&id, raw);
        descriptors.push((id, parsed));
    }
    Ok(descriptors)
}

/// Parses one raw registry entry.
///
/// Legacy descriptors carrying a single-integer `priority` field are
/// rejected outright; the weight triple replaced that scheme.
pub fn parse_descriptor(id: &FunctionId, raw: Value) -> Result<Descriptor> {
    match raw {
        Value::String(text) => Ok(Descriptor::FreeText(text)),
        Value::Object(mut map) => {
            if map.get("priority").is_some_and(Value::is_number) {
                return Err(PlannerError::Registry(format!(
                    "{id}: single-integer priority is no longer supported; use weights {{carbon, cost, latency}}"
                )));
            }
            // The registry key names the function; an embedded id must agree.
            match map.get("function_id").and_then(Value::as_str) {
                Some(embedded) if embedded != id.as_str() => {
                    return Err(PlannerError::Registry(format!(
                        "{id}: embedded function_id {embedded:?} disagrees with registry key"
                    )));
                }
                Some(_) => {}
                None => {
                    map.insert("function_id".into(), Value::String(id.to_string()));
                }
            }
            let metadata: FunctionMetadata = serde_json::from_value(Value::Object(map))
                .map_err(|e| PlannerError::Registry(format!("{id}: {e}")))?;
            Ok(Descriptor::Structured(Box::new(metadata)))
        }
        other => Err(PlannerError::Registry(format!(
            "{id}: descriptor must be an object or a string, got {other}"
        ))),
    }
}
