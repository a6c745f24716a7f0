//! Memorial portrait generation service.
//!
//! An authenticated user uploads a portrait photo, has it stylized by a hosted
//! generative-image model, and persists the result: the binary goes to object
//! storage, a metadata row goes to a relational table. The two writes are kept
//! consistent by the upload orchestrator, which issues best-effort compensating
//! deletes in reverse order when a later pipeline step fails.

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod gemini;
pub mod orchestrator;
pub mod repository;
pub mod routes;
pub mod store;
pub mod transcode;

pub use auth::{AuthGate, AuthUser, SupabaseAuth};
pub use client::{ApiClient, RetryPolicy};
pub use config::Config;
pub use error::ApiError;
pub use gemini::{GeneratedPortrait, PortraitGenerator, PortraitService};
pub use orchestrator::UploadOrchestrator;
pub use repository::{GeneratedImageRecord, ImageRepository, MemoryRepository, SupabaseTable};
pub use routes::AppState;
pub use store::{MemoryObjectStore, ObjectStore, SupabaseStorage};
