use anyhow::{Context, Result};
use dotenvy::dotenv;
use regwatch::pipeline::{PipelineConfig, RetryPolicy};
use regwatch::security::{ModelCredentials, SecretString};
use std::env;
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::time::Duration;

/// Binary configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub openai_api_key: Option<SecretString>,
    pub openai_model: String,
    pub openai_base_url: Option<String>,
    pub blob_root: PathBuf,
    pub fetch_timeout: Duration,
    pub extraction_timeout: Duration,
    pub max_attempts: u32,
    pub fetch_rate_per_second: NonZeroU32,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            openai_api_key: env::var("OPENAI_API_KEY").ok().map(SecretString::from),
            openai_model: env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            openai_base_url: env::var("OPENAI_BASE_URL").ok(),
            blob_root: env::var("BLOB_ROOT")
                .unwrap_or_else(|_| "./captures".to_string())
                .into(),
            fetch_timeout: Duration::from_secs(
                env::var("FETCH_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .context("FETCH_TIMEOUT_SECS must be a valid number")?,
            ),
            extraction_timeout: Duration::from_secs(
                env::var("EXTRACTION_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "120".to_string())
                    .parse()
                    .context("EXTRACTION_TIMEOUT_SECS must be a valid number")?,
            ),
            max_attempts: env::var("MAX_ATTEMPTS")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .context("MAX_ATTEMPTS must be a valid number")?,
            fetch_rate_per_second: env::var("FETCH_RATE_PER_SECOND")
                .unwrap_or_else(|_| "2".to_string())
                .parse()
                .context("FETCH_RATE_PER_SECOND must be a positive number")?,
        })
    }

    /// Model credentials; only `run` needs them.
    pub fn credentials(&self) -> Result<ModelCredentials> {
        let key = self
            .openai_api_key
            .as_ref()
            .context("OPENAI_API_KEY must be set")?;
        let credentials = ModelCredentials::new(key.expose(), self.openai_model.clone());
        Ok(match &self.openai_base_url {
            Some(url) => credentials.with_base_url(url.clone()),
            None => credentials,
        })
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        let retry = RetryPolicy::default().with_max_attempts(self.max_attempts);
        PipelineConfig::new()
            .with_fetch_timeout(self.fetch_timeout)
            .with_extraction_timeout(self.extraction_timeout)
            .with_fetch_retry(retry)
            .with_extraction_retry(retry)
    }
}
