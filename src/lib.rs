//! # tagvault (library root)
//!
//! A conversational front-end that tags free-text messages by topic and keeps
//! them in a vector database for similarity search.
//!
//! ```text
//! text ─► normalize ─┬─► TopicClassifier ─► tag, alternatives
//!                    └─► Embedder ────────► 384-d vector
//!                                              │
//!                        MilvusStore ◄─────────┘ insert(text, vector, tag, user)
//! ```
//!
//! ## Modules
//! - [`normalize`]: text cleanup shared by every stage.
//! - [`topic`], [`classifier`]: label set and the TF-IDF + naive Bayes model.
//! - [`embedding`]: sentence embeddings with Candle.
//! - [`vector_store`]: Milvus collection setup, insert, search, count.
//! - [`conversation`]: command routing and reply rendering.
//! - [`telegram`]: long-polling Bot API transport.
//! - [`config`], [`commands`]: configuration and CLI.
//!
//! ## Startup
//! [`load_dependencies`] builds each component independently. A component that
//! fails to start is logged and left out, and the conversation handler reports
//! "services unavailable" for the features that need it.

use directories::ProjectDirs;
use std::sync::Arc;
use tracing::{error, info};

pub mod classifier;
pub mod commands;
pub mod config;
pub mod conversation;
pub mod embedding;
pub mod error;
pub mod normalize;
pub mod telegram;
pub mod topic;
pub mod vector_store;

pub use error::{Error, Result};

use classifier::TopicClassifier;
use config::AppConfig;
use conversation::Dependencies;
use embedding::{Embedder, SentenceEmbedder};
use vector_store::{MessageStore, MilvusStore};

/// Return the per-platform configuration directory.
///
/// Uses [`directories::ProjectDirs`] with `("com", "tagvault", "tagvault")`,
/// e.g. `~/.config/tagvault` on Linux. The directory is **not** created here.
///
/// # Errors
/// Fails only if no home directory can be determined.
pub fn config_dir() -> Result<std::path::PathBuf> {
    let proj_dirs = ProjectDirs::from("com", "tagvault", "tagvault")
        .ok_or_else(|| Error::Config("unable to determine config directory".into()))?;
    Ok(proj_dirs.config_dir().to_path_buf())
}

/// Load the embedding model on the blocking pool.
pub async fn load_embedder(config: &AppConfig) -> Result<SentenceEmbedder> {
    let source = config.model_source();
    tokio::task::spawn_blocking(move || SentenceEmbedder::load(&source))
        .await
        .map_err(|e| Error::Embedding(format!("model loading task failed: {e}")))?
}

/// Build classifier, embedder and store, keeping whichever start successfully.
pub async fn load_dependencies(config: &AppConfig) -> Dependencies {
    let classifier = match TopicClassifier::new() {
        Ok(c) => Some(Arc::new(c)),
        Err(e) => {
            error!("Classifier initialization failed: {e}");
            None
        }
    };

    let embedder: Option<Arc<dyn Embedder>> = match load_embedder(config).await {
        Ok(m) => Some(Arc::new(m)),
        Err(e) => {
            error!("Embedding model initialization failed: {e}");
            None
        }
    };

    let store: Option<Arc<dyn MessageStore>> = match MilvusStore::connect(&config.milvus()).await {
        Ok(s) => Some(Arc::new(s)),
        Err(e) => {
            error!("Vector store initialization failed: {e}");
            None
        }
    };

    let deps = Dependencies {
        classifier,
        embedder,
        store,
    };
    if deps.is_complete() {
        info!("Database and classifier initialized successfully");
    }
    deps
}
