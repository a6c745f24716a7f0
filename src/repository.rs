use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::client::ApiClient;
use crate::error::ApiError;

/// Metadata row describing one generated and stored image. Field names match
/// the backing table's columns.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct GeneratedImageRecord {
    pub id: String,
    pub image_url: String,
    pub user_id: String,
    pub gen_category: String,
    pub updated_at: DateTime<Utc>,
}

/// Repository of generated-image records. Lookups are always scoped by owner
/// and category; `delete` exists only for compensation and user-initiated
/// removal.
#[async_trait]
pub trait ImageRepository: Send + Sync {
    async fn insert(&self, record: &GeneratedImageRecord)
    -> Result<GeneratedImageRecord, ApiError>;

    async fn get(
        &self,
        id: &str,
        user_id: &str,
        category: &str,
    ) -> Result<Option<GeneratedImageRecord>, ApiError>;

    async fn list(
        &self,
        user_id: &str,
        category: &str,
    ) -> Result<Vec<GeneratedImageRecord>, ApiError>;

    /// Best-effort removal, same semantics as the object store's delete.
    async fn delete(&self, id: &str) -> Result<(), ApiError>;
}

/// Repository backed by a Supabase (PostgREST) table.
pub struct SupabaseTable {
    client: ApiClient,
    base_url: String,
    service_key: String,
    table: String,
}

impl SupabaseTable {
    pub fn new(
        client: ApiClient,
        base_url: impl Into<String>,
        service_key: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            service_key: service_key.into(),
            table: table.into(),
        }
    }

    fn table_url(&self) -> String {
        format!("{}/rest/v1/{}", self.base_url, self.table)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
    }
}

#[async_trait]
impl ImageRepository for SupabaseTable {
    async fn insert(
        &self,
        record: &GeneratedImageRecord,
    ) -> Result<GeneratedImageRecord, ApiError> {
        let request = self
            .authorized(self.client.http().post(self.table_url()))
            .header("Prefer", "return=representation")
            .json(&[record]);
        let response = self.client.send(request).await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ApiError::RepositoryWrite(format!("{status} {text}")));
        }
        response
            .json::<Vec<GeneratedImageRecord>>()
            .await
            .ok()
            .and_then(|rows| rows.into_iter().next())
            .ok_or_else(|| {
                ApiError::RepositoryWrite("insert returned no representation".to_string())
            })
    }

    async fn get(
        &self,
        id: &str,
        user_id: &str,
        category: &str,
    ) -> Result<Option<GeneratedImageRecord>, ApiError> {
        let request = self
            .authorized(self.client.http().get(self.table_url()))
            .query(&[
                ("select", "*".to_string()),
                ("id", format!("eq.{id}")),
                ("user_id", format!("eq.{user_id}")),
                ("gen_category", format!("eq.{category}")),
            ]);
        let response = self.client.send(request).await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ApiError::Upstream(format!("record lookup failed: {status} {text}")));
        }
        let rows = response
            .json::<Vec<GeneratedImageRecord>>()
            .await
            .map_err(|err| ApiError::Upstream(format!("malformed record response: {err}")))?;
        Ok(rows.into_iter().next())
    }

    async fn list(
        &self,
        user_id: &str,
        category: &str,
    ) -> Result<Vec<GeneratedImageRecord>, ApiError> {
        let request = self
            .authorized(self.client.http().get(self.table_url()))
            .query(&[
                ("select", "*".to_string()),
                ("user_id", format!("eq.{user_id}")),
                ("gen_category", format!("eq.{category}")),
            ]);
        let response = self.client.send(request).await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ApiError::Upstream(format!("record listing failed: {status} {text}")));
        }
        response
            .json::<Vec<GeneratedImageRecord>>()
            .await
            .map_err(|err| ApiError::Upstream(format!("malformed record response: {err}")))
    }

    async fn delete(&self, id: &str) -> Result<(), ApiError> {
        let request = self
            .authorized(self.client.http().delete(self.table_url()))
            .query(&[("id", format!("eq.{id}"))]);
        let response = self.client.send(request).await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ApiError::RepositoryWrite(format!(
                "delete failed: {status} {text}"
            )));
        }
        Ok(())
    }
}

/// In-memory repository for local development and tests.
#[derive(Default)]
pub struct MemoryRepository {
    rows: Mutex<HashMap<String, GeneratedImageRecord>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.lock().unwrap().is_empty()
    }
}

#[async_trait]
impl ImageRepository for MemoryRepository {
    async fn insert(
        &self,
        record: &GeneratedImageRecord,
    ) -> Result<GeneratedImageRecord, ApiError> {
        let mut rows = self.rows.lock().unwrap();
        if rows.contains_key(&record.id) {
            return Err(ApiError::RepositoryWrite(format!(
                "duplicate record id {}",
                record.id
            )));
        }
        rows.insert(record.id.clone(), record.clone());
        Ok(record.clone())
    }

    async fn get(
        &self,
        id: &str,
        user_id: &str,
        category: &str,
    ) -> Result<Option<GeneratedImageRecord>, ApiError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .get(id)
            .filter(|row| row.user_id == user_id && row.gen_category == category)
            .cloned())
    }

    async fn list(
        &self,
        user_id: &str,
        category: &str,
    ) -> Result<Vec<GeneratedImageRecord>, ApiError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|row| row.user_id == user_id && row.gen_category == category)
            .cloned()
            .collect())
    }

    async fn delete(&self, id: &str) -> Result<(), ApiError> {
        self.rows.lock().unwrap().remove(id);
        Ok(())
    }
}
