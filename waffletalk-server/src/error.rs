//! Error types of the server layers.

use std::path::PathBuf;

use thiserror::Error;
use waffletalk_core::{ReplicaError, Snowflake};

use crate::domain::RecordKind;

/// Storage errors.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("deserialization error: {0}")]
    Deserialization(String),
    #[error("credential hashing failed")]
    Crypto,
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// Failures of domain operations. Rendered verbatim into the `err` field of
/// a response.
#[derive(Debug, Error)]
pub enum WorldError {
    #[error("{kind} {id} not found")]
    NotFound { kind: RecordKind, id: Snowflake },
    #[error("forbidden: {0}")]
    Forbidden(&'static str),
    #[error("username {0:?} is taken")]
    UsernameTaken(String),
    #[error("authentication failed")]
    Authentication,
    #[error("authorization failed")]
    Authorization,
    #[error(transparent)]
    Replica(#[from] ReplicaError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Malformed or disallowed requests.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed request: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("method not supported: {0}")]
    UnsupportedMethod(String),
    #[error("method {0} requires an authenticated connection")]
    Unauthenticated(&'static str),
}

/// Anything that turns a request into an error response.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    World(#[from] WorldError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}
