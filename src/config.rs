use crate::models::{AuthContext, Role};
use anyhow::{bail, Context, Result};
use std::env;
use std::time::Duration;

pub const DEFAULT_BUCKET: &str = "listing-images";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Connection settings for the remote relational and blob stores
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Base URL; `/rest/v1` and `/storage/v1` are appended
    pub base_url: String,
    pub api_key: String,
    pub bucket: String,
    pub timeout: Duration,
}

impl StoreConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            bucket: DEFAULT_BUCKET.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Load from the environment (and `.env`).
    ///
    /// Returns `None` when `LISTING_STORE_URL` is unset.
    pub fn from_env() -> Result<Option<Self>> {
        dotenvy::dotenv().ok();

        let Ok(base_url) = env::var("LISTING_STORE_URL") else {
            return Ok(None);
        };
        let api_key = env::var("LISTING_STORE_KEY")
            .context("LISTING_STORE_KEY must be set when LISTING_STORE_URL is")?;

        let mut config = Self::new(base_url, api_key);
        if let Ok(bucket) = env::var("LISTING_BUCKET") {
            config.bucket = bucket;
        }
        if let Ok(secs) = env::var("LISTING_HTTP_TIMEOUT_SECS") {
            let secs: u64 = secs
                .parse()
                .with_context(|| format!("Invalid LISTING_HTTP_TIMEOUT_SECS: {}", secs))?;
            config.timeout = Duration::from_secs(secs);
        }
        Ok(Some(config))
    }
}

/// Caller identity for the command line driver
pub fn auth_from_env() -> Result<AuthContext> {
    dotenvy::dotenv().ok();

    let user_id = env::var("LISTING_OWNER_ID").context("LISTING_OWNER_ID must be set")?;
    let role = match env::var("LISTING_ROLE").as_deref() {
        Ok("seller") | Err(_) => Role::Seller,
        Ok("buyer") => Role::Buyer,
        Ok(other) => bail!("Unknown LISTING_ROLE: {}", other),
    };
    Ok(AuthContext { user_id, role })
}
