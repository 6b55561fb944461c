//! Canonical JSON and content hashing.
//!
//! Plan-cache keys and code change detection both depend on stable
//! digests: the same logical document must always hash to the same hex
//! string regardless of field order or formatting. Canonical form is
//! compact JSON with recursively sorted object keys.

use std::collections::BTreeMap;

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::metadata::FunctionMetadata;

/// Renders a JSON value in canonical form.
pub fn canonical_json(value: &Value) -> String {
    sorted(value).to_string()
}

fn sorted(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let ordered: BTreeMap<&String, Value> =
                map.iter().map(|(k, v)| (k, sorted(v))).collect();
            Value::Object(
                ordered
                    .into_iter()
                    .map(|(k, v)| (k.clone(), v))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}

/// Hex-encoded SHA-256 of raw bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Hash of the scheduling-relevant metadata fields.
///
/// The artifact body and the caching toggle are excluded: code changes
/// are tracked by [`code_hash`] and re-deployed without forcing a
/// replan, and flipping `allow_schedule_caching` must not invalidate an
/// otherwise-identical plan.
pub fn metadata_hash(metadata: &FunctionMetadata) -> Result<String> {
    let mut value = serde_json::to_value(metadata)?;
    if let Value::Object(map) = &mut value {
        map.remove("artifact");
        map.remove("allow_schedule_caching");
    }
    Ok(sha256_hex(canonical_json(&value).as_bytes()))
}

/// Content hash of a deployable artifact.
///
/// Covers the trimmed source text and the dependency list in order, so
/// either kind of change forces a redeploy.
pub fn code_hash(code: &str, requirements: &[String]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code.trim().as_bytes());
    for requirement in requirements {
        hasher.update(b"\n");
        hasher.update(requirement.trim().as_bytes());
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{FunctionId, Weights};
    use serde_json::json;

    #[test]
    fn canonical_json_sorts_keys_recursively() {
        let a = json!({"b": 1, "a": {"z": [1, 2], "y": 3}});
        let b = json!({"a": {"y": 3, "z": [1, 2]}, "b": 1});
        assert_eq!(canonical_json(&a), canonical_json(&b));
        assert_eq!(canonical_json(&a), r#"{"a":{"y":3,"z":[1,2]},"b":1}"#);
    }

    #[test]
    fn canonical_json_is_stable_under_reserialisation() {
        let doc = json!({"m": {"k2": "v", "k1": [true, null]}, "n": 1.5});
        let first = canonical_json(&doc);
        let reparsed: serde_json::Value = serde_json::from_str(&first).unwrap();
        assert_eq!(first, canonical_json(&reparsed));
    }

    fn metadata() -> FunctionMetadata {
        FunctionMetadata {
            function_id: FunctionId::new("f"),
            runtime_ms: 1000,
            memory_mb: 256,
            vcpus: None,
            gpu_required: false,
            gpu_type: None,
            data_input_gb: 0.0,
            data_output_gb: 0.0,
            source_region: "eu-west".to_string(),
            invocations_per_day: 10,
            allowed_regions: ["eu-west".to_string()].into_iter().collect(),
            weights: Weights::default(),
            deadline_hours: 24,
            cpu_utilization: None,
            artifact: None,
            allow_schedule_caching: true,
        }
    }

    #[test]
    fn metadata_hash_changes_with_any_field() {
        let base = metadata_hash(&metadata()).unwrap();

        let mut changed = metadata();
        changed.runtime_ms = 1001;
        assert_ne!(base, metadata_hash(&changed).unwrap());

        let mut changed = metadata();
        changed.allowed_regions.insert("eu-north".to_string());
        assert_ne!(base, metadata_hash(&changed).unwrap());
    }

    #[test]
    fn metadata_hash_ignores_caching_toggle() {
        let base = metadata_hash(&metadata()).unwrap();
        let mut toggled = metadata();
        toggled.allow_schedule_caching = false;
        assert_eq!(base, metadata_hash(&toggled).unwrap());
    }

    #[test]
    fn code_hash_tracks_code_and_requirements() {
        let a = code_hash("def main(): pass", &["numpy==2.0".to_string()]);
        let b = code_hash("def main(): pass", &["numpy==2.1".to_string()]);
        let c = code_hash("def main(): return 1", &["numpy==2.0".to_string()]);
        assert_ne!(a, b);
        assert_ne!(a, c);
        // Surrounding whitespace does not count as a change.
        let d = code_hash("  def main(): pass\n", &["numpy==2.0".to_string()]);
        assert_eq!(a, d);
    }

    #[test]
    fn sha256_hex_is_64_chars() {
        assert_eq!(sha256_hex(b"x").len(), 64);
    }
}
