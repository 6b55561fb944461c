//! Bucket store over `object_store`.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::{Result, StoreError};

/// Bucket backend configuration.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct BucketConfig {
    /// Backend type: "local", "memory", "s3", or "gcs".
    pub backend: String,
    /// Local base directory, or bucket name for remote backends.
    pub path: String,
    /// Region (S3 only).
    pub region: Option<String>,
    /// Endpoint override (S3-compatible stores).
    pub endpoint: Option<String>,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            backend: "local".to_owned(),
            path: "/var/lib/verdant/bucket".to_owned(),
            region: None,
            endpoint: None,
        }
    }
}

/// JSON document store backed by a configuration bucket.
#[derive(Clone)]
pub struct BucketStore {
    store: Arc<dyn ObjectStore>,
}

impl BucketStore {
    /// Creates a bucket store from configuration.
    pub fn new(config: &BucketConfig) -> Result<Self> {
        Ok(Self {
            store: create_object_store(config)?,
        })
    }

    /// Creates a bucket store over a pre-built object store.
    #[must_use]
    pub fn with_store(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// An in-memory store, for tests.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::with_store(Arc::new(object_store::memory::InMemory::new()))
    }

    /// Reads and parses a JSON object.
    pub async fn get_json<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let data = self.get_bytes(name).await?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Reads a JSON object, mapping a missing object to `None`.
    pub async fn try_get_json<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        match self.get_json(name).await {
            Ok(value) => Ok(Some(value)),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Reads raw object bytes.
    pub async fn get_bytes(&self, name: &str) -> Result<Bytes> {
        let path = ObjectPath::from(name);
        let result = self.store.get(&path).await.map_err(not_found(name))?;
        Ok(result.bytes().await.map_err(not_found(name))?)
    }

    /// Writes a JSON object directly.
    ///
    /// Use [`BucketStore::put_json_atomic`] for documents with
    /// concurrent readers.
    pub async fn put_json<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let data = serde_json::to_vec_pretty(value)?;
        self.put_bytes(name, data.into()).await
    }

    /// Writes a JSON object via a temp key and atomic rename.
    ///
    /// Readers observe either the previous complete document or the new
    /// one, never a torn write.
    pub async fn put_json_atomic<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let data = serde_json::to_vec_pretty(value)?;
        let temp = ObjectPath::from(format!("{name}.tmp"));
        let target = ObjectPath::from(name);

        self.store.put(&temp, Bytes::from(data).into()).await?;
        self.store.rename(&temp, &target).await?;
        debug!(object = name, "atomic write complete");
        Ok(())
    }

    /// Writes raw bytes.
    pub async fn put_bytes(&self, name: &str, data: Bytes) -> Result<()> {
        let path = ObjectPath::from(name);
        self.store.put(&path, data.into()).await?;
        debug!(object = name, "object written");
        Ok(())
    }

    /// Whether an object exists.
    pub async fn exists(&self, name: &str) -> Result<bool> {
        match self.store.head(&ObjectPath::from(name)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Last-modified timestamp of an object, if it exists.
    ///
    /// Drives the plan cache's age check.
    pub async fn modified_at(&self, name: &str) -> Result<Option<DateTime<Utc>>> {
        match self.store.head(&ObjectPath::from(name)).await {
            Ok(meta) => Ok(Some(meta.last_modified)),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Deletes an object; deleting a missing object is not an error.
    pub async fn delete(&self, name: &str) -> Result<()> {
        match self.store.delete(&ObjectPath::from(name)).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl std::fmt::Debug for BucketStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketStore").finish()
    }
}

fn not_found(name: &str) -> impl FnOnce(object_store::Error) -> StoreError + '_ {
    move |e| match e {
        object_store::Error::NotFound { .. } => StoreError::NotFound(name.to_owned()),
        other => other.into(),
    }
}

/// Builds the object store backend selected by configuration.
fn create_object_store(config: &BucketConfig) -> Result<Arc<dyn ObjectStore>> {
    match config.backend.as_str() {
        "local" => {
            let store = object_store::local::LocalFileSystem::new_with_prefix(&config.path)
                .map_err(|e| {
                    StoreError::Config(format!("failed to create local store: {e}"))
                })?;
            Ok(Arc::new(store))
        }
        "memory" => Ok(Arc::new(object_store::memory::InMemory::new())),
        #[cfg(feature = "aws")]
        "s3" => {
            use object_store::aws::AmazonS3Builder;
            let mut builder = AmazonS3Builder::from_env().with_bucket_name(&config.path);

            if let Some(region) = &config.region {
                builder = builder.with_region(region);
            }
            if let Some(endpoint) = &config.endpoint {
                builder = builder.with_endpoint(endpoint);
            }

            let store = builder
                .build()
                .map_err(|e| StoreError::Config(format!("failed to create S3 store: {e}")))?;
            Ok(Arc::new(store))
        }
        #[cfg(feature = "gcp")]
        "gcs" => {
            use object_store::gcp::GoogleCloudStorageBuilder;
            let store = GoogleCloudStorageBuilder::from_env()
                .with_bucket_name(&config.path)
                .build()
                .map_err(|e| StoreError::Config(format!("failed to create GCS store: {e}")))?;
            Ok(Arc::new(store))
        }
        other => Err(StoreError::Config(format!(
            "unsupported bucket backend: {other}"
        ))),
    }
}
