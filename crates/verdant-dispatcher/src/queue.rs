//! Delayed-task queue adapter.
//!
//! Thin contract over a persistent queue: hand it a target URL, a
//! payload, and a not-before time, and it best-effort delivers exactly
//! one HTTP POST after that time. Delivery retries and drops are the
//! queue's concern, not the dispatcher's.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::error::{DispatchError, Result};

/// A delayed task accepted by the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelayedTask {
    pub target_url: String,
    pub payload: Value,
    pub not_before_utc: DateTime<Utc>,
}

/// Persistent delayed-task queue.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Enqueues one delivery and returns the queue's task id.
    async fn enqueue(&self, task: DelayedTask) -> Result<String>;
}

/// HTTP client for the external queue service.
pub struct HttpTaskQueue {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpTaskQueue {
    /// Creates a queue client from configuration.
    pub fn new(config: &QueueConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| DispatchError::Queue(format!("building client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            token: config.token.clone(),
        })
    }
}

#[derive(Deserialize)]
struct EnqueueResponse {
    task_id: String,
}

#[async_trait]
impl TaskQueue for HttpTaskQueue {
    async fn enqueue(&self, task: DelayedTask) -> Result<String> {
        let url = format!("{}/tasks", self.base_url);
        let mut request = self.client.post(&url).json(&task);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| DispatchError::Queue(format!("enqueue failed: {e}")))?;
        if !response.status().is_success() {
            return Err(DispatchError::Queue(format!(
                "queue returned {}",
                response.status()
            )));
        }

        let body: EnqueueResponse = response
            .json()
            .await
            .map_err(|e| DispatchError::Queue(format!("bad enqueue response: {e}")))?;
        Ok(body.task_id)
    }
}

/// In-memory queue for tests: records tasks, never delivers.
#[derive(Debug, Default)]
pub struct InMemoryTaskQueue {
    tasks: std::sync::Mutex<Vec<(String, DelayedTask)>>,
}

impl InMemoryTaskQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tasks enqueued so far.
    pub fn tasks(&self) -> Vec<(String, DelayedTask)> {
        self.tasks.lock().expect("queue mutex poisoned").clone()
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn enqueue(&self, task: DelayedTask) -> Result<String> {
        if task.not_before_utc < Utc::now() - chrono::Duration::hours(1) {
            return Err(DispatchError::Queue(
                "not_before is in the past".to_string(),
            ));
        }
        let task_id = Uuid::new_v4().to_string();
        self.tasks
            .lock()
            .expect("queue mutex poisoned")
            .push((task_id.clone(), task));
        Ok(task_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn in_memory_queue_records_tasks() {
        let queue = InMemoryTaskQueue::new();
        let task_id = queue
            .enqueue(DelayedTask {
                target_url: "https://r2.functions.test/f".to_string(),
                payload: json!({"n": 1}),
                not_before_utc: Utc::now() + chrono::Duration::hours(1),
            })
            .await
            .unwrap();

        let tasks = queue.tasks();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].0, task_id);
        assert_eq!(tasks[0].1.payload, json!({"n": 1}));
    }

    #[test]
    fn queue_client_creation() {
        assert!(HttpTaskQueue::new(&QueueConfig::default()).is_ok());
    }
}
