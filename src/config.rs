use anyhow::{Context, Result};
use clap::Parser;
use std::env;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Remote bucket; when absent the server runs against local disk only.
    pub s3_bucket: Option<String>,
    pub s3_region: String,
    pub s3_endpoint: Option<String>,
    pub s3_access_key: Option<String>,
    pub s3_secret_key: Option<String>,
    /// Root directory of the local mirror (development mode and fallback).
    pub local_root: String,
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Object storage and media-derivative service")]
pub struct Args {
    /// Host to bind to (overrides MEDIA_STORE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides MEDIA_STORE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Remote S3 bucket (overrides MEDIA_STORE_S3_BUCKET)
    #[arg(long)]
    pub s3_bucket: Option<String>,

    /// Remote S3 region (overrides MEDIA_STORE_S3_REGION)
    #[arg(long)]
    pub s3_region: Option<String>,

    /// Custom S3 endpoint for compatible stores (overrides MEDIA_STORE_S3_ENDPOINT)
    #[arg(long)]
    pub s3_endpoint: Option<String>,

    /// Local mirror root directory (overrides MEDIA_STORE_LOCAL_ROOT)
    #[arg(long)]
    pub local_root: Option<String>,

    /// Retry attempts per storage operation (overrides MEDIA_STORE_RETRY_ATTEMPTS)
    #[arg(long)]
    pub retry_attempts: Option<u32>,

    /// Base backoff delay in milliseconds (overrides MEDIA_STORE_RETRY_BASE_DELAY_MS)
    #[arg(long)]
    pub retry_base_delay_ms: Option<u64>,
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {name} value `{value}`")),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).context(format!("reading {name}")),
    }
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    ///
    /// Credentials are never accepted on the command line; they come from
    /// `MEDIA_STORE_S3_ACCESS_KEY`/`MEDIA_STORE_S3_SECRET_KEY` or the
    /// ambient AWS credential chain.
    pub fn from_env_and_args() -> Result<Self> {
        let args = Args::parse();

        let env_host = env::var("MEDIA_STORE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port: u16 = parse_env("MEDIA_STORE_PORT", 3000)?;
        let env_local_root =
            env::var("MEDIA_STORE_LOCAL_ROOT").unwrap_or_else(|_| "./data/objects".into());
        let env_region = env::var("MEDIA_STORE_S3_REGION").unwrap_or_else(|_| "us-east-1".into());
        let env_attempts: u32 = parse_env("MEDIA_STORE_RETRY_ATTEMPTS", 3)?;
        let env_base_delay: u64 = parse_env("MEDIA_STORE_RETRY_BASE_DELAY_MS", 200)?;

        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            s3_bucket: args.s3_bucket.or_else(|| env::var("MEDIA_STORE_S3_BUCKET").ok()),
            s3_region: args.s3_region.unwrap_or(env_region),
            s3_endpoint: args
                .s3_endpoint
                .or_else(|| env::var("MEDIA_STORE_S3_ENDPOINT").ok()),
            s3_access_key: env::var("MEDIA_STORE_S3_ACCESS_KEY").ok(),
            s3_secret_key: env::var("MEDIA_STORE_S3_SECRET_KEY").ok(),
            local_root: args.local_root.unwrap_or(env_local_root),
            retry_attempts: args.retry_attempts.unwrap_or(env_attempts).max(1),
            retry_base_delay_ms: args.retry_base_delay_ms.unwrap_or(env_base_delay),
        };

        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
