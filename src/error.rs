//! Error types shared by discovery, configuration, caching and export.
//!
//! Only fatal conditions are represented here. Reference misses during export
//! are counted and logged instead of being returned as errors.

use thiserror::Error;

/// Errors raised by the kiln library
#[derive(Debug, Error)]
pub enum Error {
    /// The document store could not be reached or refused the request
    #[error("document store unavailable while reading `{collection}`: {message}")]
    Connectivity { collection: String, message: String },

    /// A collection named by the run or the configuration does not exist
    #[error("collection `{0}` does not exist")]
    CollectionNotFound(String),

    /// The primary scan stopped part-way through
    #[error("lost primary collection `{collection}` after {documents} documents: {message}")]
    PrimaryScan {
        collection: String,
        documents: u64,
        message: String,
    },

    /// A stored document could not be decoded
    #[error("malformed document in `{collection}`: {message}")]
    MalformedDocument { collection: String, message: String },

    /// Persisted configuration is malformed or inconsistent
    #[error("invalid configuration at {location}: {message}")]
    Config { location: String, message: String },

    /// A required collection could not be materialized before export
    #[error("cannot cache required collection `{collection}`: {source}")]
    CacheBuild {
        collection: String,
        #[source]
        source: Box<Error>,
    },

    /// The worker thread pool could not be started
    #[error("failed to start worker pool: {0}")]
    WorkerPool(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl Error {
    /// Shorthand for a configuration error at `location`
    pub fn config(location: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            location: location.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a connectivity error on `collection`
    pub fn connectivity(collection: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Connectivity {
            collection: collection.into(),
            message: message.into(),
        }
    }
}

/// Result alias used across the library
pub type Result<T> = std::result::Result<T, Error>;
