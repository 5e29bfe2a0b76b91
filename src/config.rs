use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr, time::Duration};

use crate::services::storage_service::ServiceSettings;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_TOKEN_TTL_SECS: u64 = 15 * 60;
const DEFAULT_MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub public_base_url: String,
    pub token_ttl_secs: u64,
    pub admin_token: Option<String>,
    pub max_upload_bytes: usize,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Object vault: signed-URL file storage API")]
pub struct Args {
    /// Host to bind to (overrides OBJECT_VAULT_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides OBJECT_VAULT_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where file contents are stored (overrides OBJECT_VAULT_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides OBJECT_VAULT_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Base URL used in signed URLs (overrides OBJECT_VAULT_PUBLIC_BASE_URL)
    #[arg(long)]
    pub public_base_url: Option<String>,

    /// Token lifetime in seconds (overrides OBJECT_VAULT_TOKEN_TTL_SECS)
    #[arg(long)]
    pub token_ttl_secs: Option<u64>,

    /// Largest accepted upload request in bytes (overrides OBJECT_VAULT_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    ///
    /// The admin token is only read from `OBJECT_VAULT_ADMIN_TOKEN` so it
    /// never shows up in a process listing.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("OBJECT_VAULT_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_or("OBJECT_VAULT_PORT", DEFAULT_PORT)?;
        let env_storage =
            env::var("OBJECT_VAULT_STORAGE_DIR").unwrap_or_else(|_| "./data/uploads".into());
        let env_db = env::var("OBJECT_VAULT_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/object_vault.db".into());
        let env_base_url = env::var("OBJECT_VAULT_PUBLIC_BASE_URL").ok();
        let env_ttl = env_or("OBJECT_VAULT_TOKEN_TTL_SECS", DEFAULT_TOKEN_TTL_SECS)?;
        let env_max_upload = env_or("OBJECT_VAULT_MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?;
        let admin_token = env::var("OBJECT_VAULT_ADMIN_TOKEN")
            .ok()
            .filter(|token| !token.trim().is_empty());

        // --- Merge ---
        let port = args.port.unwrap_or(env_port);
        let public_base_url = args
            .public_base_url
            .or(env_base_url)
            .unwrap_or_else(|| format!("http://localhost:{port}"));

        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port,
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            public_base_url,
            token_ttl_secs: args.token_ttl_secs.unwrap_or(env_ttl),
            admin_token,
            max_upload_bytes: args.max_upload_bytes.unwrap_or(env_max_upload),
        };

        if cfg.token_ttl_secs == 0 {
            anyhow::bail!("token TTL must be at least one second");
        }

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn service_settings(&self) -> ServiceSettings {
        ServiceSettings {
            token_ttl: Duration::from_secs(self.token_ttl_secs),
            public_base_url: self.public_base_url.clone(),
            admin_token: self.admin_token.clone(),
            max_upload_bytes: self.max_upload_bytes,
        }
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("storage_dir", &self.storage_dir)
            .field("database_url", &self.database_url)
            .field("public_base_url", &self.public_base_url)
            .field("token_ttl_secs", &self.token_ttl_secs)
            .field("admin_token", &self.admin_token.as_ref().map(|_| "<redacted>"))
            .field("max_upload_bytes", &self.max_upload_bytes)
            .finish()
    }
}

/// Read and parse `name`, falling back to `default` when it is unset.
fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {name} value `{value}`")),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {name}")),
    }
}
