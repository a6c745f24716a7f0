use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use memorial_gen::{
    ApiClient, AppState, Config, PortraitGenerator, RetryPolicy, SupabaseAuth, SupabaseStorage,
    SupabaseTable, UploadOrchestrator, routes,
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("memorial_gen=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env()?;
    let client = ApiClient::new(RetryPolicy::default());

    let auth = Arc::new(SupabaseAuth::new(
        client.clone(),
        config.supabase_url.clone(),
        config.supabase_anon_key.clone(),
    ));
    let store = Arc::new(SupabaseStorage::new(
        client.clone(),
        config.supabase_url.clone(),
        config.supabase_service_key.clone(),
        config.storage_bucket.clone(),
    ));
    let repository = Arc::new(SupabaseTable::new(
        client.clone(),
        config.supabase_url.clone(),
        config.supabase_service_key.clone(),
        config.table_name.clone(),
    ));
    let generator = Arc::new(PortraitGenerator::new(client, config.google_api_key.clone()));

    let state = Arc::new(AppState {
        auth,
        generator,
        repository: repository.clone(),
        orchestrator: UploadOrchestrator::new(store, repository, config.image_quality),
    });

    let bind_address = config.bind_address();
    let tcp_listener = tokio::net::TcpListener::bind(&bind_address).await?;
    tracing::info!(%bind_address, "memorial portrait server started");

    axum::serve(tcp_listener, routes::router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
