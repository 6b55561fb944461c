//! Metadata normalizer.
//!
//! Turns a registry descriptor into canonical [`FunctionMetadata`].
//! Structured descriptors are validated and defaulted; free-text
//! descriptions go to the extraction oracle with a strict schema and
//! are accepted only above a confidence threshold.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use verdant_core::{Catalog, FunctionId, FunctionMetadata, Weights};

use crate::error::{PlannerError, Result};
use crate::oracle::{strip_code_fence, Oracle};
use crate::registry::Descriptor;
use crate::retry::{retry, RetryPolicy};

/// Output of normalization: canonical metadata plus the oracle's
/// caveats when extraction was involved.
#[derive(Debug, Clone)]
pub struct Normalized {
    pub metadata: FunctionMetadata,
    pub assumptions: Vec<String>,
    pub warnings: Vec<String>,
    /// Oracle retries spent, for telemetry attribution.
    pub retries: u32,
}

/// The structured record the extraction oracle must return.
#[derive(Debug, Deserialize)]
struct Extraction {
    runtime_ms: u64,
    memory_mb: u32,
    #[serde(default)]
    vcpus: Option<u32>,
    #[serde(default)]
    gpu_required: bool,
    #[serde(default)]
    gpu_type: Option<String>,
    #[serde(default)]
    data_input_gb: f64,
    #[serde(default)]
    data_output_gb: f64,
    source_region: String,
    #[serde(default)]
    invocations_per_day: u32,
    #[serde(default)]
    allowed_regions: Vec<String>,
    #[serde(default)]
    weights: Option<Weights>,
    #[serde(default)]
    deadline_hours: Option<u32>,
    confidence: f64,
    #[serde(default)]
    assumptions: Vec<String>,
    #[serde(default)]
    warnings: Vec<String>,
}

/// Descriptor normalizer.
pub struct Normalizer {
    oracle: Arc<dyn Oracle>,
    min_confidence: f64,
    retry_policy: RetryPolicy,
}

impl Normalizer {
    /// Creates a normalizer over the given oracle.
    pub fn new(oracle: Arc<dyn Oracle>, min_confidence: f64) -> Self {
        Self {
            oracle,
            min_confidence,
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Normalizes one descriptor into canonical metadata.
    pub async fn normalize(
        &self,
        id: &FunctionId,
        descriptor: &Descriptor,
        catalog: &Catalog,
    ) -> Result<Normalized> {
        match descriptor {
            Descriptor::Structured(metadata) => {
                metadata.validate(catalog)?;
                Ok(Normalized {
                    metadata: (**metadata).clone(),
                    assumptions: Vec::new(),
                    warnings: Vec::new(),
                    retries: 0,
                })
            }
            Descriptor::FreeText(text) => self.extract(id, text, catalog).await,
        }
    }

    async fn extract(
        &self,
        id: &FunctionId,
        text: &str,
        catalog: &Catalog,
    ) -> Result<Normalized> {
        let regions: Vec<&str> = catalog.region_keys().collect();
        let prompt = extraction_prompt(id, text, &regions);
        let schema = extraction_schema();

        let (raw, retries) = retry(self.retry_policy, "oracle.extract", || {
            self.oracle.complete(&prompt, &schema)
        })
        .await?;

        let extraction = parse_extraction(&raw)?;

        if extraction.confidence < self.min_confidence {
            return Err(PlannerError::LowConfidence {
                function: id.to_string(),
                confidence: extraction.confidence,
            });
        }

        for warning in &extraction.warnings {
            warn!(function = %id, warning, "extraction warning");
        }
        info!(
            function = %id,
            confidence = extraction.confidence,
            assumptions = extraction.assumptions.len(),
            "extracted metadata from free-text descriptor"
        );

        let allowed_regions = if extraction.allowed_regions.is_empty() {
            catalog.region_keys().map(String::from).collect()
        } else {
            extraction.allowed_regions.iter().cloned().collect()
        };

        let metadata = FunctionMetadata {
            function_id: id.clone(),
            runtime_ms: extraction.runtime_ms,
            memory_mb: extraction.memory_mb,
            vcpus: extraction.vcpus,
            gpu_required: extraction.gpu_required,
            gpu_type: extraction.gpu_type.clone(),
            data_input_gb: extraction.data_input_gb,
            data_output_gb: extraction.data_output_gb,
            source_region: extraction.source_region.clone(),
            invocations_per_day: extraction.invocations_per_day,
            allowed_regions,
            weights: extraction.weights.unwrap_or_default(),
            deadline_hours: extraction.deadline_hours.unwrap_or(24),
            cpu_utilization: None,
            artifact: None,
            allow_schedule_caching: true,
        };
        metadata.validate(catalog)?;

        Ok(Normalized {
            metadata,
            assumptions: extraction.assumptions,
            warnings: extraction.warnings,
            retries,
        })
    }
}

/// Accepts the oracle output either as a JSON object or as a string
/// containing (possibly fenced) JSON.
fn parse_extraction(raw: &Value) -> Result<Extraction> {
    let value = match raw {
        Value::String(text) => serde_json::from_str(strip_code_fence(text))
            .map_err(|e| PlannerError::OracleOutput(format!("unparseable extraction: {e}")))?,
        other => other.clone(),
    };
    serde_json::from_value(value)
        .map_err(|e| PlannerError::OracleOutput(format!("extraction schema violation: {e}")))
}

fn extraction_prompt(id: &FunctionId, text: &str, regions: &[&str]) -> String {
    format!(
        "Convert this serverless function description into structured metadata \
         for carbon-aware scheduling.\n\
         \n\
         Function id: {id}\n\
         Description:\n\"\"\"{text}\"\"\"\n\
         \n\
         Candidate regions: {}\n\
         \n\
         Estimate runtime_ms, memory_mb, data_input_gb, data_output_gb and \
         invocations_per_day conservatively. Extract source_region and \
         allowed_regions when mentioned; otherwise leave allowed_regions empty. \
         If the description mentions how long the work may wait, set \
         deadline_hours. Report confidence in [0,1] plus the assumptions and \
         warnings behind your estimates.\n\
         \n\
         Return ONLY JSON matching the response schema.",
        regions.join(", ")
    )
}

fn extraction_schema() -> Value {
    json!({
        "type": "object",
        "required": ["runtime_ms", "memory_mb", "source_region", "confidence"],
        "properties": {
            "runtime_ms": { "type": "integer", "minimum": 1 },
            "memory_mb": { "type": "integer", "enum": [128, 256, 512, 1024, 2048, 4096] },
            "vcpus": { "type": "integer", "minimum": 1 },
            "gpu_required": { "type": "boolean" },
            "gpu_type": { "type": "string" },
            "data_input_gb": { "type": "number", "minimum": 0 },
            "data_output_gb": { "type": "number", "minimum": 0 },
            "source_region": { "type": "string" },
            "invocations_per_day": { "type": "integer", "minimum": 0 },
            "allowed_regions": { "type": "array", "items": { "type": "string" } },
            "weights": {
                "type": "object",
                "properties": {
                    "carbon": { "type": "number", "minimum": 0 },
                    "cost": { "type": "number", "minimum": 0 },
                    "latency": { "type": "number", "minimum": 0 }
                }
            },
            "deadline_hours": { "type": "integer", "minimum": 0 },
            "confidence": { "type": "number", "minimum": 0, "maximum": 1 },
            "assumptions": { "type": "array", "items": { "type": "string" } },
            "warnings": { "type": "array", "items": { "type": "string" } }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use verdant_core::{CatalogDefaults, PowerProfile, RegionEntry};

    struct FixedOracle(Value);

    #[async_trait]
    impl Oracle for FixedOracle {
        async fn complete(&self, _prompt: &str, _schema: &Value) -> Result<Value> {
            Ok(self.0.clone())
        }
    }

    /// Fails the first N calls with a transient error, then answers.
    struct FlakyOracle {
        response: Value,
        fail_first: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Oracle for FlakyOracle {
        async fn complete(&self, _prompt: &str, _schema: &Value) -> Result<Value> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.fail_first {
                return Err(PlannerError::Store(verdant_store::StoreError::ObjectStore(
                    object_store::Error::Generic {
                        store: "test",
                        source: "503 service unavailable".into(),
                    },
                )));
            }
            Ok(self.response.clone())
        }
    }

    fn catalog() -> Catalog {
        let mut regions = BTreeMap::new();
        for (key, zone) in [("eu-north", "SE-SE3"), ("eu-west", "BE")] {
            regions.insert(
                key.to_string(),
                RegionEntry {
                    name: zone.to_string(),
                    zone: zone.to_string(),
                    egress_usd_per_gb: 0.05,
                    pricing_tier: "standard".to_string(),
                    has_gpu: false,
                    gpu_type: None,
                    power: PowerProfile {
                        cpu_min_w_per_vcpu: 1.0,
                        cpu_max_w_per_vcpu: 4.0,
                        mem_w_per_gib: 0.4,
                        gpu_min_w: None,
                        gpu_max_w: None,
                        pue: 1.1,
                    },
                },
            );
        }
        Catalog::new(regions, CatalogDefaults::default()).unwrap()
    }

    fn extraction(confidence: f64) -> Value {
        json!({
            "runtime_ms": 45000,
            "memory_mb": 2048,
            "data_input_gb": 0.5,
            "data_output_gb": 0.5,
            "source_region": "eu-west",
            "invocations_per_day": 50,
            "allowed_regions": [],
            "deadline_hours": 6,
            "confidence": confidence,
            "assumptions": ["video size averages 500 MB"],
            "warnings": []
        })
    }

    #[tokio::test]
    async fn confident_extraction_is_accepted() {
        let normalizer = Normalizer::new(Arc::new(FixedOracle(extraction(0.9))), 0.5);
        let id = FunctionId::new("video-rotate");
        let normalized = normalizer
            .normalize(
                &id,
                &Descriptor::FreeText("rotates 500 MB videos 50x/day, OK to wait 6h".into()),
                &catalog(),
            )
            .await
            .unwrap();

        assert_eq!(normalized.metadata.deadline_hours, 6);
        // Empty allowed_regions widens to the whole catalog.
        assert_eq!(normalized.metadata.allowed_regions.len(), 2);
        assert_eq!(normalized.assumptions.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_oracle_error_is_retried() {
        let oracle = FlakyOracle {
            response: extraction(0.9),
            fail_first: 1,
            calls: AtomicU32::new(0),
        };
        let normalizer = Normalizer::new(Arc::new(oracle), 0.5);
        let id = FunctionId::new("video-rotate");
        let normalized = normalizer
            .normalize(&id, &Descriptor::FreeText("rotate videos".into()), &catalog())
            .await
            .unwrap();

        assert_eq!(normalized.retries, 1);
        assert_eq!(normalized.metadata.memory_mb, 2048);
    }

    #[tokio::test]
    async fn low_confidence_is_rejected() {
        let normalizer = Normalizer::new(Arc::new(FixedOracle(extraction(0.3))), 0.5);
        let id = FunctionId::new("video-rotate");
        let result = normalizer
            .normalize(&id, &Descriptor::FreeText("???".into()), &catalog())
            .await;
        assert!(matches!(result, Err(PlannerError::LowConfidence { .. })));
    }

    #[tokio::test]
    async fn fenced_string_output_is_parsed() {
        let fenced = Value::String(format!("```json\n{}\n```", extraction(0.8)));
        let normalizer = Normalizer::new(Arc::new(FixedOracle(fenced)), 0.5);
        let id = FunctionId::new("video-rotate");
        let normalized = normalizer
            .normalize(&id, &Descriptor::FreeText("rotate videos".into()), &catalog())
            .await
            .unwrap();
        assert_eq!(normalized.metadata.memory_mb, 2048);
    }

    #[tokio::test]
    async fn schema_violation_is_permanent_error() {
        let normalizer = Normalizer::new(Arc::new(FixedOracle(json!({"nope": true}))), 0.5);
        let id = FunctionId::new("f");
        let result = normalizer
            .normalize(&id, &Descriptor::FreeText("x".into()), &catalog())
            .await;
        assert!(matches!(result, Err(PlannerError::OracleOutput(_))));
    }

    #[tokio::test]
    async fn structured_descriptor_passes_through() {
        let normalizer = Normalizer::new(Arc::new(FixedOracle(Value::Null)), 0.5);
        let metadata: FunctionMetadata = serde_json::from_value(json!({
            "function_id": "f",
            "runtime_ms": 100,
            "memory_mb": 128,
            "source_region": "eu-west",
            "allowed_regions": ["eu-west"],
        }))
        .unwrap();
        let id = FunctionId::new("f");
        let normalized = normalizer
            .normalize(
                &id,
                &Descriptor::Structured(Box::new(metadata)),
                &catalog(),
            )
            .await
            .unwrap();
        assert_eq!(normalized.retries, 0);
        assert!(normalized.metadata.allow_schedule_caching);
    }
}
