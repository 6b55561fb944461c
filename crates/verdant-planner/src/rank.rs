//! Ranking oracles.
//!
//! A ranking oracle turns a function's scored candidates into an
//! ordered recommendation list. Two implementations exist: the
//! deterministic ranker sorts by composite score, and the LLM-backed
//! ranker asks the oracle for a permutation and falls back to the
//! deterministic order whenever the response fails validation.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use verdant_core::{
    metadata_hash, ForecastMode, FunctionMetadata, Recommendation, Schedule,
};

use crate::error::{PlannerError, Result};
use crate::oracle::{strip_code_fence, Oracle};
use crate::score::Candidate;

/// One ranked slot: an index into the candidate list plus rationale.
#[derive(Debug, Clone)]
pub struct Ranked {
    pub candidate_index: usize,
    pub rationale: String,
}

/// Produces a ranking over scored candidates.
#[async_trait]
pub trait RankingOracle: Send + Sync {
    /// Ranks candidates best-first, at most `top_n` entries.
    async fn rank(
        &self,
        metadata: &FunctionMetadata,
        candidates: &[Candidate],
    ) -> Result<Vec<Ranked>>;

    /// Returns the oracle name, recorded in logs.
    fn name(&self) -> &'static str;
}

/// Deterministic ranker: candidates arrive sorted by composite score,
/// so ranking is a prefix.
#[derive(Debug, Clone, Copy)]
pub struct DeterministicRanker {
    top_n: usize,
}

impl DeterministicRanker {
    /// Creates a ranker keeping the best `top_n` slots.
    #[must_use]
    pub fn new(top_n: usize) -> Self {
        Self { top_n }
    }
}

#[async_trait]
impl RankingOracle for DeterministicRanker {
    async fn rank(
        &self,
        _metadata: &FunctionMetadata,
        candidates: &[Candidate],
    ) -> Result<Vec<Ranked>> {
        Ok((0..candidates.len().min(self.top_n))
            .map(|candidate_index| Ranked {
                candidate_index,
                rationale: String::new(),
            })
            .collect())
    }

    fn name(&self) -> &'static str {
        "deterministic"
    }
}

/// The permutation the LLM must return.
#[derive(Debug, Deserialize)]
struct RankResponse {
    order: Vec<usize>,
    #[serde(default)]
    rationales: Vec<String>,
}

/// LLM-backed ranker with deterministic fallback.
pub struct LlmRanker {
    oracle: Arc<dyn Oracle>,
    fallback: DeterministicRanker,
    top_n: usize,
}

impl LlmRanker {
    /// Creates an LLM ranker keeping the best `top_n` slots.
    pub fn new(oracle: Arc<dyn Oracle>, top_n: usize) -> Self {
        Self {
            oracle,
            fallback: DeterministicRanker::new(top_n),
            top_n,
        }
    }

    async fn rank_with_oracle(
        &self,
        metadata: &FunctionMetadata,
        candidates: &[Candidate],
    ) -> Result<Vec<Ranked>> {
        let prompt = ranking_prompt(metadata, candidates);
        let schema = ranking_schema(candidates.len());
        let raw = self.oracle.complete(&prompt, &schema).await?;
        let response = parse_rank_response(&raw)?;
        validate_ranking(&response, metadata, candidates)?;

        Ok(response
            .order
            .into_iter()
            .take(self.top_n)
            .enumerate()
            .map(|(i, candidate_index)| Ranked {
                candidate_index,
                rationale: response.rationales.get(i).cloned().unwrap_or_default(),
            })
            .collect())
    }
}

#[async_trait]
impl RankingOracle for LlmRanker {
    async fn rank(
        &self,
        metadata: &FunctionMetadata,
        candidates: &[Candidate],
    ) -> Result<Vec<Ranked>> {
        match self.rank_with_oracle(metadata, candidates).await {
            Ok(ranked) => Ok(ranked),
            Err(e) => {
                warn!(
                    function = %metadata.function_id,
                    error = %e,
                    "oracle ranking invalid, falling back to deterministic order"
                );
                self.fallback.rank(metadata, candidates).await
            }
        }
    }

    fn name(&self) -> &'static str {
        "llm"
    }
}

fn parse_rank_response(raw: &Value) -> Result<RankResponse> {
    let value = match raw {
        Value::String(text) => serde_json::from_str(strip_code_fence(text))
            .map_err(|e| PlannerError::OracleOutput(format!("unparseable ranking: {e}")))?,
        other => other.clone(),
    };
    serde_json::from_value(value)
        .map_err(|e| PlannerError::OracleOutput(format!("ranking schema violation: {e}")))
}

/// Checks that the response is a permutation of candidate indices and
/// that every referenced slot still satisfies the function's filters.
fn validate_ranking(
    response: &RankResponse,
    metadata: &FunctionMetadata,
    candidates: &[Candidate],
) -> Result<()> {
    if response.order.len() != candidates.len() {
        return Err(PlannerError::OracleOutput(format!(
            "order has {} entries for {} candidates",
            response.order.len(),
            candidates.len()
        )));
    }
    let mut seen = vec![false; candidates.len()];
    for &index in &response.order {
        let slot = seen
            .get_mut(index)
            .ok_or_else(|| PlannerError::OracleOutput(format!("index {index} out of range")))?;
        if *slot {
            return Err(PlannerError::OracleOutput(format!(
                "index {index} appears twice"
            )));
        }
        *slot = true;

        let candidate = &candidates[index];
        if !metadata.allowed_regions.contains(&candidate.region) {
            return Err(PlannerError::OracleOutput(format!(
                "region {} not allowed",
                candidate.region
            )));
        }
    }
    Ok(())
}

fn ranking_prompt(metadata: &FunctionMetadata, candidates: &[Candidate]) -> String {
    let weights = metadata.weights.normalise();
    let mut prompt = format!(
        "Rank every execution slot for function {} from best to worst.\n\
         Objective weights: carbon {:.2}, cost {:.2}, latency {:.2}.\n\
         Deadline: {} hours.\n\
         \n\
         Slots (index, region, hour start, gCO2/kWh, transfer USD, deferral fraction):\n",
        metadata.function_id, weights.carbon, weights.cost, weights.latency, metadata.deadline_hours
    );
    for (i, c) in candidates.iter().enumerate() {
        prompt.push_str(&format!(
            "{i}: {} {} {:.1} {:.4} {:.3}\n",
            c.region,
            c.hour_start_utc.to_rfc3339(),
            c.carbon_intensity,
            c.transfer_cost_usd,
            c.latency_penalty,
        ));
    }
    prompt.push_str(
        "\nReturn ONLY JSON matching the response schema: `order` must be a \
         permutation of every slot index, best first, and `rationales` gives \
         one short justification per leading slot.",
    );
    prompt
}

fn ranking_schema(candidate_count: usize) -> Value {
    json!({
        "type": "object",
        "required": ["order"],
        "properties": {
            "order": {
                "type": "array",
                "items": {
                    "type": "integer",
                    "minimum": 0,
                    "maximum": candidate_count.saturating_sub(1),
                },
                "minItems": candidate_count,
                "maxItems": candidate_count,
                "uniqueItems": true
            },
            "rationales": {
                "type": "array",
                "items": { "type": "string" }
            }
        }
    })
}

/// Builds a schedule document from a ranking.
///
/// The document is validated before being returned, so an oracle that
/// slipped through validation cannot produce an invariant-breaking
/// schedule.
pub fn build_schedule(
    metadata: &FunctionMetadata,
    candidates: &[Candidate],
    ranked: &[Ranked],
    horizon_start: DateTime<Utc>,
    mode: ForecastMode,
) -> Result<Schedule> {
    let recommendations = ranked
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let candidate = &candidates[r.candidate_index];
            Recommendation {
                priority: (i + 1) as u32,
                region: candidate.region.clone(),
                hour_start_utc: candidate.hour_start_utc,
                carbon_intensity_g_per_kwh: candidate.carbon_intensity,
                transfer_cost_usd: candidate.transfer_cost_usd,
                rationale: r.rationale.clone(),
            }
        })
        .collect();

    let schedule = Schedule {
        function_id: metadata.function_id.clone(),
        horizon_start_utc: horizon_start,
        generated_at_utc: Utc::now(),
        mode,
        recommendations,
        deployment: Default::default(),
        metadata_hash: metadata_hash(metadata)?,
    };
    schedule.validate()?;
    Ok(schedule)
}
