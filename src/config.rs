use std::env;

use anyhow::{Context, Result, bail};

/// Runtime configuration resolved once at startup from the environment
/// (after `dotenvy` has loaded `.env`).
#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub supabase_url: String,
    pub supabase_anon_key: String,
    /// Key used for storage and table writes. Falls back to the anon key when
    /// no service key is configured.
    pub supabase_service_key: String,
    pub storage_bucket: String,
    pub table_name: String,
    pub google_api_key: String,
    /// Target quality for the normalized encoding, 0-100.
    pub image_quality: u8,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let port = env::var("PORT")
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(3000);

        let supabase_url = require("SUPABASE_URL")?
            .trim_end_matches('/')
            .to_string();
        let supabase_anon_key = require("SUPABASE_ANON_KEY")?;
        let supabase_service_key = optional("SUPABASE_SERVICE_KEY")
            .unwrap_or_else(|| supabase_anon_key.clone());
        let google_api_key = require("GOOGLE_API_KEY")?;

        let storage_bucket =
            optional("STORAGE_BUCKET").unwrap_or_else(|| "portraits".to_string());
        let table_name =
            optional("TABLE_NAME").unwrap_or_else(|| "generated_images".to_string());

        let image_quality = match optional("IMAGE_QUALITY") {
            Some(raw) => {
                let quality = raw
                    .parse::<u8>()
                    .with_context(|| format!("IMAGE_QUALITY must be a number, got {raw:?}"))?;
                if quality > 100 {
                    bail!("IMAGE_QUALITY must be between 0 and 100, got {quality}");
                }
                quality
            }
            None => 100,
        };

        Ok(Self {
            port,
            supabase_url,
            supabase_anon_key,
            supabase_service_key,
            storage_bucket,
            table_name,
            google_api_key,
            image_quality,
        })
    }

    pub fn bind_address(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }
}

fn require(name: &str) -> Result<String> {
    optional(name).with_context(|| format!("{name} is not set"))
}

fn optional(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
