//! Deployment orchestrator.
//!
//! Keeps each function deployed in the regions its schedule may route
//! to. The external deployer is driven over JSON-RPC; change detection
//! is by content hash, and failures are per-region and never abort the
//! cycle.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use verdant_core::{code_hash, FunctionId, FunctionMetadata, RegionDeployment, Schedule};
use verdant_store::{layout, BucketStore};
use verdant_telemetry::{DeployOutcome, Event, Recorder};

use crate::config::DeployerConfig;
use crate::error::{PlannerError, Result};
use crate::retry::{retry, RetryPolicy};

/// Deployment status reported by the deployer.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeployStatus {
    pub exists: bool,
    #[serde(default)]
    pub code_hash: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// Result of a successful deploy call.
#[derive(Debug, Clone, Deserialize)]
pub struct DeployResult {
    pub url: String,
}

/// A deploy request for one (function, region).
#[derive(Debug, Clone)]
pub struct DeployRequest {
    pub function_id: FunctionId,
    pub region: String,
    pub code: String,
    pub requirements: Vec<String>,
    pub entry_point: Option<String>,
    pub code_hash: String,
    pub memory_mb: u32,
    pub runtime: String,
    pub timeout_secs: u64,
}

/// Remote function deployer.
#[async_trait]
pub trait DeployerClient: Send + Sync {
    /// Current deployment status of a function in a region.
    async fn status(&self, function_id: &FunctionId, region: &str) -> Result<DeployStatus>;

    /// Deploys (or updates) a function in a region.
    async fn deploy(&self, request: DeployRequest) -> Result<DeployResult>;

    /// Removes a function from a region.
    async fn delete(&self, function_id: &FunctionId, region: &str) -> Result<()>;

    /// Asks the deployer for a fresh unique function name.
    async fn generate_name(&self) -> Result<String>;
}

/// JSON-RPC client for the function deployer service.
pub struct JsonRpcDeployer {
    client: Client,
    endpoint: String,
    token: Option<String>,
    next_id: AtomicU64,
}

impl JsonRpcDeployer {
    /// Creates a deployer client from configuration.
    pub fn new(config: &DeployerConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.base_url.clone(),
            token: config.token.clone(),
            next_id: AtomicU64::new(1),
        })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut request = self.client.post(&self.endpoint).json(&json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        }));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let error = response.error_for_status().expect_err("status checked");
            return Err(PlannerError::Http(error));
        }

        let envelope: Value = response.json().await?;
        if let Some(error) = envelope.get("error") {
            return Err(PlannerError::Deployer(format!("{method}: {error}")));
        }
        envelope
            .get("result")
            .cloned()
            .ok_or_else(|| PlannerError::Deployer(format!("{method}: missing result")))
    }
}

#[async_trait]
impl DeployerClient for JsonRpcDeployer {
    async fn status(&self, function_id: &FunctionId, region: &str) -> Result<DeployStatus> {
        let result = self
            .call(
                "status",
                json!({ "function_name": function_id, "region": region }),
            )
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn deploy(&self, request: DeployRequest) -> Result<DeployResult> {
        let result = self
            .call(
                "deploy",
                json!({
                    "function_name": request.function_id,
                    "region": request.region,
                    "code": request.code,
                    "requirements": request.requirements,
                    "entry_point": request.entry_point,
                    "code_hash": request.code_hash,
                    "memory_mb": request.memory_mb,
                    "runtime": request.runtime,
                    "timeout_seconds": request.timeout_secs,
                }),
            )
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn delete(&self, function_id: &FunctionId, region: &str) -> Result<()> {
        self.call(
            "delete",
            json!({ "function_name": function_id, "region": region }),
        )
        .await?;
        Ok(())
    }

    async fn generate_name(&self) -> Result<String> {
        let result = self.call("generate_name", json!({})).await?;
        result
            .get("name")
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| PlannerError::Deployer("generate_name: missing name".into()))
    }
}

/// Deployment state carried across cycles in `deployment_state.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeploymentState {
    pub functions: BTreeMap<String, BTreeMap<String, RegionDeployment>>,
}

/// Realises schedules: makes sure top-priority regions are deployed.
pub struct DeploymentOrchestrator {
    deployer: Arc<dyn DeployerClient>,
    store: BucketStore,
    recorder: Arc<Recorder>,
    config: DeployerConfig,
    retry_policy: RetryPolicy,
}

impl DeploymentOrchestrator {
    /// Creates an orchestrator over the given deployer.
    pub fn new(
        deployer: Arc<dyn DeployerClient>,
        store: BucketStore,
        recorder: Arc<Recorder>,
        config: DeployerConfig,
    ) -> Self {
        Self {
            deployer,
            store,
            recorder,
            config,
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Ensures the schedule's top-priority regions are deployed and
    /// fills in the schedule's `deployment` block.
    ///
    /// Functions without an artifact have nothing to deploy. Per-region
    /// failures are logged and recorded; the prior URL (if any) is
    /// retained so the dispatcher can keep routing.
    pub async fn realise(
        &self,
        schedule: &mut Schedule,
        metadata: &FunctionMetadata,
    ) -> Result<()> {
        let Some(artifact) = &metadata.artifact else {
            debug!(function = %metadata.function_id, "no artifact, skipping deployment");
            return Ok(());
        };
        let desired_hash = code_hash(&artifact.code, &artifact.requirements);

        let mut state: DeploymentState = self
            .store
            .try_get_json(layout::DEPLOYMENT_STATE)
            .await?
            .unwrap_or_default();
        let prior = state
            .functions
            .entry(metadata.function_id.to_string())
            .or_default();

        // Keep the bucket copy of the source current; the deployer
        // reads it by hash.
        let source_name =
            layout::function_source(metadata.function_id.as_str(), &desired_hash, "py");
        if !self.store.exists(&source_name).await? {
            self.store
                .put_bytes(&source_name, artifact.code.clone().into_bytes().into())
                .await?;
        }

        for region in self.target_regions(schedule) {
            match self
                .realise_region(metadata, artifact, &region, &desired_hash)
                .await
            {
                Ok(deployment) => {
                    prior.insert(region.clone(), deployment.clone());
                    schedule.deployment.insert(region, deployment);
                }
                Err(e) => {
                    warn!(
                        function = %metadata.function_id,
                        region = %region,
                        error = %e,
                        "deployment failed, keeping prior URL"
                    );
                    self.emit(Event::Deploy {
                        function_id: metadata.function_id.clone(),
                        region: region.clone(),
                        outcome: DeployOutcome::DeployFailed,
                        code_hash: None,
                    })
                    .await;
                    if let Some(previous) = prior.get(&region) {
                        schedule.deployment.insert(region, previous.clone());
                    }
                }
            }
        }

        self.store
            .put_json_atomic(layout::DEPLOYMENT_STATE, &state)
            .await?;
        Ok(())
    }

    /// Regions referenced by the top-priority recommendations, in
    /// priority order without duplicates.
    fn target_regions(&self, schedule: &Schedule) -> Vec<String> {
        let mut regions = Vec::new();
        for recommendation in schedule.ranked() {
            if !regions.contains(&recommendation.region) {
                regions.push(recommendation.region.clone());
            }
            if regions.len() >= self.config.top_regions {
                break;
            }
        }
        regions
    }

    async fn realise_region(
        &self,
        metadata: &FunctionMetadata,
        artifact: &verdant_core::ArtifactSpec,
        region: &str,
        desired_hash: &str,
    ) -> Result<RegionDeployment> {
        let (status, _) = retry(self.retry_policy, "deployer.status", || {
            self.deployer.status(&metadata.function_id, region)
        })
        .await?;

        if status.exists && status.code_hash.as_deref() == Some(desired_hash) {
            debug!(
                function = %metadata.function_id,
                region,
                "already deployed with matching hash"
            );
            self.emit(Event::Deploy {
                function_id: metadata.function_id.clone(),
                region: region.to_string(),
                outcome: DeployOutcome::Skipped,
                code_hash: Some(desired_hash.to_string()),
            })
            .await;
            return Ok(RegionDeployment {
                url: status
                    .url
                    .ok_or_else(|| PlannerError::Deployer("status missing url".into()))?,
                code_hash: desired_hash.to_string(),
                deployed_at_utc: Utc::now(),
            });
        }

        let request = DeployRequest {
            function_id: metadata.function_id.clone(),
            region: region.to_string(),
            code: artifact.code.clone(),
            requirements: artifact.requirements.clone(),
            entry_point: artifact.entry_point.clone(),
            code_hash: desired_hash.to_string(),
            memory_mb: metadata.memory_mb,
            runtime: self.config.runtime.clone(),
            timeout_secs: self.config.function_timeout_secs,
        };
        let (result, _) = retry(self.retry_policy, "deployer.deploy", || {
            self.deployer.deploy(request.clone())
        })
        .await?;

        info!(
            function = %metadata.function_id,
            region,
            url = %result.url,
            "function deployed"
        );
        self.emit(Event::Deploy {
            function_id: metadata.function_id.clone(),
            region: region.to_string(),
            outcome: DeployOutcome::Deployed,
            code_hash: Some(desired_hash.to_string()),
        })
        .await;

        Ok(RegionDeployment {
            url: result.url,
            code_hash: desired_hash.to_string(),
            deployed_at_utc: Utc::now(),
        })
    }

    async fn emit(&self, event: Event) {
        if let Err(e) = self.recorder.record(event).await {
            warn!(error = %e, "failed to record deployment event");
        }
    }
}
