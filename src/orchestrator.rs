use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::repository::{GeneratedImageRecord, ImageRepository};
use crate::store::ObjectStore;
use crate::transcode::transcode_to_webp;

const KEY_PREFIX: &str = "gen";

/// Sequences transcode -> upload -> resolve -> persist as one logical unit of
/// work. On failure after the storage upload it issues compensating deletes in
/// reverse order (object first, then record), best-effort: a failed rollback
/// is logged and never replaces the error that triggered it.
pub struct UploadOrchestrator {
    store: Arc<dyn ObjectStore>,
    repository: Arc<dyn ImageRepository>,
    quality: u8,
}

impl UploadOrchestrator {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        repository: Arc<dyn ImageRepository>,
        quality: u8,
    ) -> Self {
        Self {
            store,
            repository,
            quality,
        }
    }

    pub async fn upload(
        &self,
        user: &AuthUser,
        category: &str,
        bytes: &[u8],
    ) -> Result<GeneratedImageRecord, ApiError> {
        if category.trim().is_empty() {
            return Err(ApiError::InvalidRequest(
                "category must not be empty".to_string(),
            ));
        }
        if bytes.is_empty() {
            return Err(ApiError::InvalidRequest(
                "image payload must not be empty".to_string(),
            ));
        }

        // The id and key exist before any I/O; they are the compensation
        // handles for every later step.
        let id = Uuid::new_v4().to_string();
        let key = storage_key(user, &id);

        let webp = transcode_to_webp(bytes, self.quality)?;

        self.store.put(&key, &webp, "image/webp").await?;

        let image_url = match self.store.resolve_public_url(&key).await {
            Ok(url) => url,
            Err(err) => {
                self.compensate_object(&key).await;
                return Err(err);
            }
        };

        let record = GeneratedImageRecord {
            id: id.clone(),
            image_url,
            user_id: user.id.clone(),
            gen_category: category.to_string(),
            updated_at: Utc::now(),
        };
        match self.repository.insert(&record).await {
            Ok(stored) => Ok(stored),
            Err(err) => {
                self.compensate_object(&key).await;
                self.compensate_record(&id).await;
                Err(err)
            }
        }
    }

    async fn compensate_object(&self, key: &str) {
        if let Err(err) = self.store.delete(key).await {
            tracing::error!(key, error = %err, "compensating object delete failed");
        }
    }

    async fn compensate_record(&self, id: &str) {
        if let Err(err) = self.repository.delete(id).await {
            tracing::error!(id, error = %err, "compensating record delete failed");
        }
    }
}

/// `gen/{unix_ms}-{owner}-{uuid}.webp`. The owner segment prefers the email
/// for readability and falls back to the user id.
fn storage_key(user: &AuthUser, id: &str) -> String {
    let owner = user.email.as_deref().unwrap_or(&user.id);
    let timestamp = Utc::now().timestamp_millis();
    format!(
        "{KEY_PREFIX}/{timestamp}-{}-{id}.webp",
        sanitize_segment(owner)
    )
}

fn sanitize_segment(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '@' | '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use image::{ImageFormat, RgbaImage};

    use crate::repository::MemoryRepository;
    use crate::store::MemoryObjectStore;

    fn user() -> AuthUser {
        AuthUser {
            id: "u1".to_string(),
            email: Some("u1@example.com".to_string()),
        }
    }

    fn sample_jpeg() -> Vec<u8> {
        let image = RgbaImage::from_pixel(16, 16, image::Rgba([90, 90, 90, 255]));
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgba8(image)
            .to_rgb8()
            .write_to(&mut std::io::Cursor::new(&mut bytes), ImageFormat::Jpeg)
            .unwrap();
        bytes
    }

    fn orchestrator(
        store: Arc<MemoryObjectStore>,
        repository: Arc<MemoryRepository>,
    ) -> UploadOrchestrator {
        UploadOrchestrator::new(store, repository, 100)
    }

    /// Store wrapper that fails chosen operations, delegating the rest.
    struct FailingStore {
        inner: MemoryObjectStore,
        fail_put: bool,
        fail_resolve: bool,
        fail_delete: bool,
    }

    #[async_trait]
    impl crate::store::ObjectStore for FailingStore {
        async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<(), ApiError> {
            if self.fail_put {
                return Err(ApiError::StoreWrite("injected put failure".to_string()));
            }
            self.inner.put(key, bytes, content_type).await
        }

        async fn resolve_public_url(&self, key: &str) -> Result<String, ApiError> {
            if self.fail_resolve {
                return Err(ApiError::StoreResolve("injected resolve failure".to_string()));
            }
            self.inner.resolve_public_url(key).await
        }

        async fn delete(&self, key: &str) -> Result<(), ApiError> {
            if self.fail_delete {
                return Err(ApiError::Upstream("injected delete failure".to_string()));
            }
            self.inner.delete(key).await
        }
    }

    struct FailingRepository {
        inner: MemoryRepository,
        fail_delete: bool,
    }

    #[async_trait]
    impl ImageRepository for FailingRepository {
        async fn insert(
            &self,
            _record: &GeneratedImageRecord,
        ) -> Result<GeneratedImageRecord, ApiError> {
            Err(ApiError::RepositoryWrite("injected insert failure".to_string()))
        }

        async fn get(
            &self,
            id: &str,
            user_id: &str,
            category: &str,
        ) -> Result<Option<GeneratedImageRecord>, ApiError> {
            self.inner.get(id, user_id, category).await
        }

        async fn list(
            &self,
            user_id: &str,
            category: &str,
        ) -> Result<Vec<GeneratedImageRecord>, ApiError> {
            self.inner.list(user_id, category).await
        }

        async fn delete(&self, id: &str) -> Result<(), ApiError> {
            if self.fail_delete {
                return Err(ApiError::RepositoryWrite(
                    "injected delete failure".to_string(),
                ));
            }
            self.inner.delete(id).await
        }
    }

    #[tokio::test]
    async fn success_leaves_a_record_and_a_matching_object() {
        let store = Arc::new(MemoryObjectStore::new("http://localhost/storage"));
        let repository = Arc::new(MemoryRepository::new());
        let orchestrator = orchestrator(store.clone(), repository.clone());

        let record = orchestrator
            .upload(&user(), "memorial", &sample_jpeg())
            .await
            .unwrap();

        assert_eq!(record.user_id, "u1");
        assert_eq!(record.gen_category, "memorial");
        assert!(record.image_url.ends_with(".webp"));

        let keys = store.keys();
        assert_eq!(keys.len(), 1);
        assert!(record.image_url.ends_with(&keys[0]));
        assert_eq!(repository.len(), 1);

        let fetched = repository
            .get(&record.id, "u1", "memorial")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.image_url, record.image_url);
    }

    #[tokio::test]
    async fn empty_category_and_payload_fail_without_side_effects() {
        let store = Arc::new(MemoryObjectStore::new("http://localhost/storage"));
        let repository = Arc::new(MemoryRepository::new());
        let orchestrator = orchestrator(store.clone(), repository.clone());

        let err = orchestrator.upload(&user(), "  ", &sample_jpeg()).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidRequest(_)));

        let err = orchestrator.upload(&user(), "memorial", &[]).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidRequest(_)));

        assert!(store.is_empty());
        assert!(repository.is_empty());
    }

    #[tokio::test]
    async fn undecodable_input_fails_before_any_write() {
        let store = Arc::new(MemoryObjectStore::new("http://localhost/storage"));
        let repository = Arc::new(MemoryRepository::new());
        let orchestrator = orchestrator(store.clone(), repository.clone());

        let err = orchestrator
            .upload(&user(), "memorial", b"not an image")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::UnsupportedInput(_)));
        assert!(store.is_empty());
        assert!(repository.is_empty());
    }

    #[tokio::test]
    async fn put_failure_needs_no_compensation() {
        let store = Arc::new(FailingStore {
            inner: MemoryObjectStore::new("http://localhost/storage"),
            fail_put: true,
            fail_resolve: false,
            fail_delete: false,
        });
        let repository = Arc::new(MemoryRepository::new());
        let orchestrator =
            UploadOrchestrator::new(store.clone(), repository.clone(), 100);

        let err = orchestrator
            .upload(&user(), "memorial", &sample_jpeg())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::StoreWrite(_)));
        assert!(store.inner.is_empty());
        assert!(repository.is_empty());
    }

    #[tokio::test]
    async fn resolve_failure_rolls_back_the_uploaded_object() {
        let store = Arc::new(FailingStore {
            inner: MemoryObjectStore::new("http://localhost/storage"),
            fail_put: false,
            fail_resolve: true,
            fail_delete: false,
        });
        let repository = Arc::new(MemoryRepository::new());
        let orchestrator =
            UploadOrchestrator::new(store.clone(), repository.clone(), 100);

        let err = orchestrator
            .upload(&user(), "memorial", &sample_jpeg())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::StoreResolve(_)));
        assert!(store.inner.is_empty());
        assert!(repository.is_empty());
    }

    #[tokio::test]
    async fn insert_failure_rolls_back_object_and_record() {
        let store = Arc::new(MemoryObjectStore::new("http://localhost/storage"));
        let repository = Arc::new(FailingRepository {
            inner: MemoryRepository::new(),
            fail_delete: false,
        });
        let orchestrator =
            UploadOrchestrator::new(store.clone(), repository.clone(), 100);

        let err = orchestrator
            .upload(&user(), "memorial", &sample_jpeg())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::RepositoryWrite(_)));
        // The uploaded object is gone by the time the error is reported.
        assert!(store.is_empty());
        assert!(repository.inner.is_empty());
    }

    #[tokio::test]
    async fn failed_object_rollback_never_masks_the_resolve_error() {
        let store = Arc::new(FailingStore {
            inner: MemoryObjectStore::new("http://localhost/storage"),
            fail_put: false,
            fail_resolve: true,
            fail_delete: true,
        });
        let repository = Arc::new(MemoryRepository::new());
        let orchestrator =
            UploadOrchestrator::new(store.clone(), repository.clone(), 100);

        let err = orchestrator
            .upload(&user(), "memorial", &sample_jpeg())
            .await
            .unwrap_err();
        // The caller sees the resolve failure, not the delete failure.
        assert!(matches!(err, ApiError::StoreResolve(_)));
        // The rollback failed, so the object is still there; the record
        // never existed.
        assert_eq!(store.inner.keys().len(), 1);
        assert!(repository.is_empty());
    }

    #[tokio::test]
    async fn failed_record_rollback_never_masks_the_insert_error() {
        let store = Arc::new(MemoryObjectStore::new("http://localhost/storage"));
        let repository = Arc::new(FailingRepository {
            inner: MemoryRepository::new(),
            fail_delete: true,
        });
        let orchestrator =
            UploadOrchestrator::new(store.clone(), repository.clone(), 100);

        let err = orchestrator
            .upload(&user(), "memorial", &sample_jpeg())
            .await
            .unwrap_err();
        // Both compensating deletes ran, the record delete failed; the
        // insert failure is still the one reported.
        assert!(matches!(err, ApiError::RepositoryWrite(ref msg) if msg.contains("insert")));
        assert!(store.is_empty());
    }

    #[test]
    fn storage_keys_carry_prefix_owner_and_extension() {
        let key = storage_key(&user(), "abc-123");
        assert!(key.starts_with("gen/"));
        assert!(key.contains("u1@example.com"));
        assert!(key.ends_with("-abc-123.webp"));
    }

    #[test]
    fn owner_segment_is_sanitized() {
        let user = AuthUser {
            id: "u2".to_string(),
            email: Some("weird name/with:stuff@example.com".to_string()),
        };
        let key = storage_key(&user, "id");
        assert!(key.contains("weird-name-with-stuff@example.com"));
    }
}
