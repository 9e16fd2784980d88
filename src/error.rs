//! Error type shared by the library.
//!
//! Setup paths (config loading, classifier fitting, model loading, store
//! setup) propagate these errors. Per-request paths catch them, log them and
//! degrade to a safe default instead.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("http transport: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// Milvus answered, but with a non-zero status code.
    #[error("vector store returned code {code}: {message}")]
    Store { code: i64, message: String },

    #[error("classifier: {0}")]
    Classifier(String),

    #[error("embedding: {0}")]
    Embedding(String),

    #[error("telegram: {0}")]
    Telegram(String),

    #[error("config: {0}")]
    Config(String),
}

impl From<candle_core::Error> for Error {
    fn from(err: candle_core::Error) -> Self {
        Error::Embedding(err.to_string())
    }
}

impl From<tokenizers::Error> for Error {
    fn from(err: tokenizers::Error) -> Self {
        Error::Embedding(err.to_string())
    }
}
