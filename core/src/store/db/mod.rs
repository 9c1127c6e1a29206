//! Persistent record store on top of redb.
//!
//! One table maps the uid string to the version-prefixed postcard encoding of
//! the record. A second table holds the time of the last mutation, written in
//! the same transaction as the mutation itself. Writes are single
//! transactions, so the file never holds a half-applied mutation.

use crate::store::RecordStore;
use crate::store::error::StoreError;
use crate::types::record::versioned_record;
use crate::types::{Record, Uid};
use redb::{ReadableDatabase, ReadableTable, TableDefinition};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::warn;

/// Main table: uid → versioned record bytes
const RECORDS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("records");

/// Store metadata: name → value
const META_TABLE: TableDefinition<&str, u64> = TableDefinition::new("meta");

/// Nanoseconds since the epoch of the last put or delete.
const MODIFIED_AT_KEY: &str = "modified_at";

pub struct DbStore {
    db: redb::Database,
    path: PathBuf,
}

impl DbStore {
    /// Creates or opens the store file, creating parent directories as needed.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = redb::Database::create(path)?;
        Self::ensure_tables(&db)?;

        Ok(Self {
            db,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Internal helpers.
impl DbStore {
    /// Creates missing tables. Opening an initialized file writes nothing.
    fn ensure_tables(db: &redb::Database) -> Result<(), StoreError> {
        let initialized = {
            let read_txn = db.begin_read()?;
            match read_txn.open_table(META_TABLE) {
                Ok(_) => true,
                Err(redb::TableError::TableDoesNotExist(_)) => false,
                Err(e) => return Err(e.into()),
            }
        };
        if initialized {
            return Ok(());
        }

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(RECORDS_TABLE)?;
            let _ = write_txn.open_table(META_TABLE)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn stamp(write_txn: &redb::WriteTransaction) -> Result<(), StoreError> {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
            .unwrap_or(0);
        let mut meta = write_txn.open_table(META_TABLE)?;
        meta.insert(MODIFIED_AT_KEY, nanos)?;
        Ok(())
    }

    fn decode(uid: &str, bytes: &[u8]) -> Result<Record, StoreError> {
        versioned_record::decode(bytes).map_err(|source| StoreError::Corrupt {
            uid: uid.to_string(),
            source,
        })
    }

    /// Decodes a replaced or removed payload; unreadable leftovers are dropped.
    fn decode_previous(uid: &Uid, bytes: Option<Vec<u8>>) -> Option<Record> {
        let bytes = bytes?;
        match Self::decode(uid.as_str(), &bytes) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(uid = %uid, error = %e, "discarding unreadable stored record");
                None
            }
        }
    }
}

impl RecordStore for DbStore {
    fn get(&self, uid: &Uid) -> Result<Option<Record>, StoreError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(RECORDS_TABLE)?;

        match table.get(uid.as_str())? {
            None => Ok(None),
            Some(guard) => Ok(Some(Self::decode(uid.as_str(), guard.value())?)),
        }
    }

    fn put(&mut self, record: Record) -> Result<Option<Record>, StoreError> {
        let bytes = versioned_record::encode(&record)?;
        let write_txn = self.db.begin_write()?;

        let previous;
        {
            let mut table = write_txn.open_table(RECORDS_TABLE)?;
            previous = table
                .insert(record.uid().as_str(), bytes.as_slice())?
                .map(|guard| guard.value().to_vec());
        }
        Self::stamp(&write_txn)?;

        write_txn.commit()?;
        Ok(Self::decode_previous(record.uid(), previous))
    }

    fn delete(&mut self, uid: &Uid) -> Result<Option<Record>, StoreError> {
        let write_txn = self.db.begin_write()?;

        let removed;
        {
            let mut table = write_txn.open_table(RECORDS_TABLE)?;
            removed = table
                .remove(uid.as_str())?
                .map(|guard| guard.value().to_vec());
        }
        if removed.is_some() {
            Self::stamp(&write_txn)?;
        }

        write_txn.commit()?;
        Ok(Self::decode_previous(uid, removed))
    }

    fn uids(&self) -> Result<Vec<Uid>, StoreError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(RECORDS_TABLE)?;
        let mut uids = Vec::new();

        for entry in table.iter()? {
            let (uid_guard, _) = entry?;
            let raw = uid_guard.value();
            match Uid::try_from(raw) {
                Ok(uid) => uids.push(uid),
                Err(e) => warn!(uid = raw, error = %e, "skipping invalid stored uid"),
            }
        }

        Ok(uids)
    }

    fn records(&self) -> Result<Vec<Record>, StoreError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(RECORDS_TABLE)?;
        let mut records = Vec::new();

        for entry in table.iter()? {
            let (uid_guard, value_guard) = entry?;
            records.push(Self::decode(uid_guard.value(), value_guard.value())?);
        }

        Ok(records)
    }

    /// The epoch for a store that was never written.
    fn modified_at(&self) -> Result<SystemTime, StoreError> {
        let read_txn = self.db.begin_read()?;
        let meta = read_txn.open_table(META_TABLE)?;
        let nanos = meta.get(MODIFIED_AT_KEY)?.map(|guard| guard.value());
        Ok(UNIX_EPOCH + Duration::from_nanos(nanos.unwrap_or(0)))
    }

    fn contains(&self, uid: &Uid) -> Result<bool, StoreError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(RECORDS_TABLE)?;
        Ok(table.get(uid.as_str())?.is_some())
    }
}
