//! Command line and file configuration

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::warn;
use uplink_core::{KeyPair, UploadConfig, UploadError};

/// Multipart upload orchestration service
#[derive(Debug, Clone, Parser)]
#[command(name = "uplink-server", version, about)]
pub struct ServerArgs {
    /// JSON upload policy file; flags below override its fields
    #[arg(long, value_name = "PATH", env = "UPLINK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Bind address
    #[arg(long, value_name = "ADDR", default_value = "127.0.0.1:8080", env = "UPLINK_BIND")]
    pub bind: SocketAddr,

    /// Data directory path
    #[arg(long, value_name = "PATH", default_value = "./data", env = "UPLINK_DATA_DIR")]
    pub data_dir: PathBuf,

    /// Origin presigned part URLs point at; defaults to http://{bind}
    #[arg(long, value_name = "URL", env = "UPLINK_PUBLIC_URL")]
    pub public_url: Option<String>,

    /// Hex-encoded Ed25519 signing key; a fresh key is generated when absent
    #[arg(long, value_name = "HEX", env = "UPLINK_SIGNING_KEY", hide_env_values = true)]
    pub signing_key: Option<String>,

    /// Prefix for generated object keys
    #[arg(long, value_name = "PREFIX", default_value = "uploads")]
    pub key_prefix: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub log_json: bool,

    #[arg(long, value_name = "BYTES")]
    pub chunk_size: Option<u64>,

    #[arg(long, value_name = "N")]
    pub max_part_count: Option<u64>,

    #[arg(long, value_name = "N")]
    pub max_concurrent_parts: Option<usize>,

    #[arg(long, value_name = "SECS")]
    pub url_expiry: Option<u64>,

    #[arg(long, value_name = "BYTES")]
    pub min_part_size: Option<u64>,
}

impl ServerArgs {
    /// Upload policy from the config file (or defaults) with flag overrides applied
    pub fn upload_config(&self) -> Result<UploadConfig, UploadError> {
        let mut config = match &self.config {
            Some(path) => UploadConfig::from_json_file(path)?,
            None => UploadConfig::default(),
        };

        if let Some(v) = self.chunk_size {
            config.default_chunk_size_bytes = v;
        }
        if let Some(v) = self.max_part_count {
            config.max_part_count = v;
        }
        if let Some(v) = self.max_concurrent_parts {
            config.max_concurrent_parts = v;
        }
        if let Some(v) = self.url_expiry {
            config.presigned_url_expiry_seconds = v;
        }
        if let Some(v) = self.min_part_size {
            config.min_part_size_bytes = v;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn keypair(&self) -> Result<KeyPair, UploadError> {
        match &self.signing_key {
            Some(hex) => KeyPair::from_hex(hex),
            None => {
                warn!("no signing key configured; presigned URLs will not survive a restart");
                Ok(KeyPair::generate())
            }
        }
    }

    pub fn public_url(&self) -> String {
        self.public_url
            .clone()
            .unwrap_or_else(|| format!("http://{}", self.bind))
    }
}
