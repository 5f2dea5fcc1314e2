//! Persistence interfaces consumed by the session runtime.
//!
//! The runtime only needs these narrow contracts; the Signal session
//! store and any SQL-backed implementation live outside this crate.

use async_trait::async_trait;
use thiserror::Error;

use crate::crypto::PreKey;
use crate::types::{GroupMetadata, JID};

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("database error: {0}")]
    Database(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// One-time prekey pool.
#[async_trait]
pub trait PreKeyStore: Send + Sync {
    /// Generates and stores `count` fresh prekeys, returning them for
    /// upload. IDs continue from the highest stored id.
    async fn generate_pre_keys(&self, count: usize) -> StoreResult<Vec<PreKey>>;

    /// Number of prekeys that have been both stored and uploaded.
    async fn uploaded_pre_key_count(&self) -> StoreResult<usize>;

    /// Marks every prekey up to and including `up_to_id` as uploaded.
    async fn mark_pre_keys_uploaded(&self, up_to_id: u32) -> StoreResult<()>;

    async fn wipe(&self) -> StoreResult<()>;
}

/// Contact metadata sink.
#[async_trait]
pub trait ContactStore: Send + Sync {
    /// Records a push name. Returns whether it changed and the previous
    /// name if there was one.
    async fn put_push_name(&self, jid: &JID, name: &str) -> StoreResult<(bool, Option<String>)>;

    async fn put_business_name(&self, jid: &JID, name: &str) -> StoreResult<()>;

    async fn wipe(&self) -> StoreResult<()>;
}

/// Group metadata sink.
#[async_trait]
pub trait GroupStore: Send + Sync {
    async fn put_group(&self, group: &GroupMetadata) -> StoreResult<()>;

    async fn wipe(&self) -> StoreResult<()>;
}
