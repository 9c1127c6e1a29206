//! The record store contract and its two implementations.
//!
//! Stores hold the canonical records; every other structure in the backend
//! (summary index, checkpoints, live membership) is derived from them and can be
//! rebuilt from them.

use crate::store::error::StoreError;
use crate::types::{Record, Uid};
use std::time::SystemTime;

mod db;
mod memory;

pub use db::DbStore;
pub use memory::MemoryStore;

pub mod error {
    use crate::types::RecordDecodeError;
    use thiserror::Error;

    #[derive(Debug, Error)]
    pub enum StoreError {
        #[error("Database error: {0}")]
        Redb(#[from] redb::DatabaseError),

        #[error("Table error: {0}")]
        TableError(#[from] redb::TableError),

        #[error("Storage error: {0}")]
        StorageError(#[from] redb::StorageError),

        #[error("Transaction error: {0}")]
        TransactionError(#[from] redb::TransactionError),

        #[error("Commit error: {0}")]
        CommitError(#[from] redb::CommitError),

        #[error("IO error: {0}")]
        Io(#[from] std::io::Error),

        #[error("Record encoding failed: {0}")]
        Encode(#[from] postcard::Error),

        #[error("Record {uid} is unreadable: {source}")]
        Corrupt {
            uid: String,
            source: RecordDecodeError,
        },
    }
}

/// Canonical record storage keyed by uid.
pub trait RecordStore: Send {
    fn get(&self, uid: &Uid) -> Result<Option<Record>, StoreError>;

    /// Inserts or replaces a record, returning the previous version.
    fn put(&mut self, record: Record) -> Result<Option<Record>, StoreError>;

    /// Removes a record, returning it if it existed.
    fn delete(&mut self, uid: &Uid) -> Result<Option<Record>, StoreError>;

    /// All uids in ascending order.
    fn uids(&self) -> Result<Vec<Uid>, StoreError>;

    /// All records in ascending uid order.
    fn records(&self) -> Result<Vec<Record>, StoreError>;

    /// Last time the store contents changed.
    fn modified_at(&self) -> Result<SystemTime, StoreError>;

    fn contains(&self, uid: &Uid) -> Result<bool, StoreError> {
        Ok(self.get(uid)?.is_some())
    }
}
