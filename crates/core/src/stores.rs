//! Ports to the two external data sources an agent consults.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::tool::{ColumnSpec, Passage, RowSet};
use crate::errors::ErrorKind;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CollectionId(pub String);

impl CollectionId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{}: {message}", .kind.code())]
pub struct StoreError {
    pub kind: ErrorKind,
    pub message: String,
}

impl StoreError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn syntax(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SqlSyntaxError, message)
    }

    pub fn connectivity(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConnectivityError, message)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RetrievalError {
    #[error("knowledge store unavailable: {0}")]
    Unavailable(String),
}

impl RetrievalError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::RetrievalUnavailable
    }
}

/// The relational system of record.
#[async_trait]
pub trait RelationalStore: Send + Sync {
    async fn list_tables(&self) -> Result<BTreeSet<String>, StoreError>;

    /// Columns in declaration order. Unknown tables yield an empty list.
    async fn describe_table(&self, table: &str) -> Result<Vec<ColumnSpec>, StoreError>;

    /// Runs one statement as its own unit of work.
    async fn execute(&self, statement: &str, timeout: Duration) -> Result<RowSet, StoreError>;
}

/// Read-only semantic search over a document collection.
#[async_trait]
pub trait KnowledgeRetriever: Send + Sync {
    async fn retrieve(
        &self,
        query: &str,
        collection: &CollectionId,
        limit: usize,
    ) -> Result<Vec<Passage>, RetrievalError>;
}
