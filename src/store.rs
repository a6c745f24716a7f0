use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use url::Url;

use crate::client::ApiClient;
use crate::error::ApiError;

/// Object store the orchestrator writes image binaries into. Keys are chosen
/// by the caller, never by the store, so a failed pipeline can reference them
/// for compensation.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<(), ApiError>;

    async fn resolve_public_url(&self, key: &str) -> Result<String, ApiError>;

    /// Best-effort removal. Deleting an absent key is a no-op; callers log
    /// failures and never escalate them over the error that triggered the
    /// compensation.
    async fn delete(&self, key: &str) -> Result<(), ApiError>;
}

/// Object store backed by a Supabase storage bucket.
pub struct SupabaseStorage {
    client: ApiClient,
    base_url: String,
    service_key: String,
    bucket: String,
}

impl SupabaseStorage {
    pub fn new(
        client: ApiClient,
        base_url: impl Into<String>,
        service_key: impl Into<String>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            service_key: service_key.into(),
            bucket: bucket.into(),
        }
    }

    fn object_url(&self, key: &str) -> String {
        let key = key.trim_start_matches('/');
        format!("{}/storage/v1/object/{}/{}", self.base_url, self.bucket, key)
    }

    /// Public URLs are computed, not fetched; the bucket must be public for
    /// them to resolve.
    pub fn public_url(&self, key: &str) -> Result<String, ApiError> {
        let key = key.trim_start_matches('/');
        if key.is_empty() {
            return Err(ApiError::StoreResolve("empty object key".to_string()));
        }
        let url = format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url, self.bucket, key
        );
        Url::parse(&url)
            .map_err(|err| ApiError::StoreResolve(format!("malformed public URL {url}: {err}")))?;
        Ok(url)
    }
}

#[async_trait]
impl ObjectStore for SupabaseStorage {
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<(), ApiError> {
        let request = self
            .client
            .http()
            .post(self.object_url(key))
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
            .header("x-upsert", "true")
            .header(reqwest::header::CONTENT_TYPE, content_type.to_string())
            .body(bytes.to_vec());
        let response = self.client.send(request).await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ApiError::StoreWrite(format!("{status} {text}")));
        }
        Ok(())
    }

    async fn resolve_public_url(&self, key: &str) -> Result<String, ApiError> {
        self.public_url(key)
    }

    async fn delete(&self, key: &str) -> Result<(), ApiError> {
        let request = self
            .client
            .http()
            .delete(self.object_url(key))
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key);
        let response = self.client.send(request).await?;
        let status = response.status();
        // Absent keys are fine: compensation may delete a key that was never
        // written when the upload step itself failed.
        if !status.is_success() && status != reqwest::StatusCode::NOT_FOUND {
            let text = response.text().await.unwrap_or_default();
            return Err(ApiError::Upstream(format!(
                "object delete failed: {status} {text}"
            )));
        }
        Ok(())
    }
}

/// In-memory object store for local development and tests.
pub struct MemoryObjectStore {
    base_url: String,
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            objects: Mutex::new(HashMap::new()),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.lock().unwrap().is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, bytes: &[u8], _content_type: &str) -> Result<(), ApiError> {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn resolve_public_url(&self, key: &str) -> Result<String, ApiError> {
        if !self.contains(key) {
            return Err(ApiError::StoreResolve(format!("no object under key {key}")));
        }
        let base = self.base_url.trim_end_matches('/');
        Ok(format!("{base}/{}", key.trim_start_matches('/')))
    }

    async fn delete(&self, key: &str) -> Result<(), ApiError> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }
}
