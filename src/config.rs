//! Application configuration.
//!
//! Values are layered, later layers winning:
//!
//! 1. built-in defaults ([`AppConfig::default`]);
//! 2. the YAML file at `<config_dir>/config.yaml` (or `--config PATH`), if present;
//! 3. a `.env` file in the working directory, then the process environment.
//!
//! | Variable             | Field             | Default        |
//! |----------------------|-------------------|----------------|
//! | `API_TOKEN`          | `api_token`       | none           |
//! | `MILVUS_HOST`        | `milvus_host`     | `localhost`    |
//! | `MILVUS_PORT`        | `milvus_port`     | `19530`        |
//! | `COLLECTION_NAME`    | `collection_name` | `history_docs` |
//! | `MILVUS_TOKEN`       | `milvus_token`    | none           |
//! | `TAGVAULT_MODEL_DIR` | `model_dir`       | none (hub)     |
//!
//! Empty variables count as unset.
//!
//! # Examples
//!
//! ```no_run
//! use tagvault::config::AppConfig;
//!
//! let config = AppConfig::resolve(None).unwrap();
//! println!("{}", config.milvus().base_url());
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::embedding::{DEFAULT_MODEL_ID, ModelSource};
use crate::vector_store::MilvusSettings;
use crate::{Error, Result};

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(default)]
pub struct AppConfig {
    /// Telegram bot token; only the `bot` command requires it.
    pub api_token: Option<String>,

    pub milvus_host: String,

    pub milvus_port: u16,

    pub collection_name: String,

    pub milvus_token: Option<String>,

    /// Hugging Face repository of the sentence-embedding model.
    pub model_id: String,

    pub model_revision: String,

    /// Local model directory; when set the hub is not contacted.
    pub model_dir: Option<PathBuf>,

    // Matches shown per search
    pub search_limit: usize,

    pub telegram_api_base: String,

    // Long-poll timeout for getUpdates
    pub poll_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_token: None,
            milvus_host: "localhost".to_string(),
            milvus_port: 19530,
            collection_name: "history_docs".to_string(),
            milvus_token: None,
            model_id: DEFAULT_MODEL_ID.to_string(),
            model_revision: "main".to_string(),
            model_dir: None,
            search_limit: 5,
            telegram_api_base: "https://api.telegram.org".to_string(),
            poll_timeout_secs: 30,
        }
    }
}

impl AppConfig {
    /// Defaults, then `path` (or the default config file) if it exists, then
    /// `.env` and the environment.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => crate::config_dir()?.join("config.yaml"),
        };

        let mut config = if path.exists() {
            debug!("Loading config from: {}", path.display());
            load_config(&path)?
        } else {
            debug!("No config file at {}, using defaults", path.display());
            AppConfig::default()
        };

        if let Ok(dotenv) = dotenvy::dotenv() {
            debug!("Loaded environment from {}", dotenv.display());
        }
        config.apply_env_with(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Override fields from variables supplied by `lookup`.
    ///
    /// # Errors
    /// `MILVUS_PORT` that is not a valid port number.
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(token) = var("API_TOKEN") {
            self.api_token = Some(token);
        }
        if let Some(host) = var("MILVUS_HOST") {
            self.milvus_host = host;
        }
        if let Some(port) = var("MILVUS_PORT") {
            self.milvus_port = port
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("MILVUS_PORT is not a port number: {port:?}")))?;
        }
        if let Some(collection) = var("COLLECTION_NAME") {
            self.collection_name = collection;
        }
        if let Some(token) = var("MILVUS_TOKEN") {
            self.milvus_token = Some(token);
        }
        if let Some(dir) = var("TAGVAULT_MODEL_DIR") {
            self.model_dir = Some(PathBuf::from(dir));
        }
        Ok(())
    }

    /// The bot credential.
    ///
    /// # Errors
    /// [`Error::Config`] when no non-empty token is configured.
    pub fn require_api_token(&self) -> Result<&str> {
        self.api_token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| Error::Config("bot token not found; set API_TOKEN in the environment or .env".into()))
    }

    pub fn milvus(&self) -> MilvusSettings {
        MilvusSettings {
            host: self.milvus_host.clone(),
            port: self.milvus_port,
            collection: self.collection_name.clone(),
            token: self.milvus_token.clone(),
        }
    }

    pub fn model_source(&self) -> ModelSource {
        match &self.model_dir {
            Some(dir) => ModelSource::Local(dir.clone()),
            None => ModelSource::Hub {
                model_id: self.model_id.clone(),
                revision: self.model_revision.clone(),
            },
        }
    }
}

/// Loads the configuration from a YAML file. Missing keys take their defaults.
///
/// # Examples
///
/// ```no_run
/// use tagvault::config::load_config;
///
/// match load_config(std::path::Path::new("/path/to/config.yaml")) {
///     Ok(config) => println!("{:?}", config),
///     Err(err) => eprintln!("Error loading config: {}", err),
/// }
/// ```
pub fn load_config(file: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(file)?;
    let config: AppConfig = serde_yaml::from_str(&content)?;
    Ok(config)
}
