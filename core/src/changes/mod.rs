//! Content-hash change tracking against named checkpoints.
//!
//! A checkpoint maps every record uid seen at the last sync to the hash of its
//! canonical encoding. Diffing the live records against it yields what was
//! added, modified and deleted since; the checkpoint is then rewritten in one
//! atomic step.

use crate::fs::replace_file;
use crate::types::{Record, Uid};
use error::ChangeError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub mod error {
    use thiserror::Error;

    #[derive(Debug, Error)]
    pub enum ChangeError {
        #[error("IO error: {0}")]
        Io(#[from] std::io::Error),

        #[error("Record encoding failed: {0}")]
        Encode(#[from] postcard::Error),

        #[error("Checkpoint encoding failed: {0}")]
        Checkpoint(#[from] serde_json::Error),
    }
}

const CHECKPOINT_VERSION: u32 = 1;

/// Result of one diff pass.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ChangeSet {
    /// Records without a checkpoint entry, in input order.
    pub added: Vec<Record>,
    /// Records whose hash differs from the checkpoint, in input order.
    pub modified: Vec<Record>,
    /// Checkpoint uids not among the live records, in uid order.
    pub deleted: Vec<Uid>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }
}

/// On-disk checkpoint body.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Checkpoint {
    version: u32,
    name: String,
    /// uid → blake3 hex
    hashes: BTreeMap<String, String>,
}

/// Owns the directory holding one checkpoint file per name.
#[derive(Debug, Clone)]
pub struct ChangeTracker {
    dir: PathBuf,
}

impl ChangeTracker {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Checkpoint names are arbitrary strings, so the file is named by their hash.
    pub fn checkpoint_path(&self, name: &str) -> PathBuf {
        let hash = blake3::hash(name.as_bytes());
        self.dir.join(format!("{}.json", hash.to_hex()))
    }

    /// Diffs `records` against the checkpoint `name` and persists the new state.
    ///
    /// If persisting fails the previous checkpoint file is left untouched, so
    /// a retry reports the same changes again.
    pub fn compute_changes<I>(&self, records: I, name: &str) -> Result<ChangeSet, ChangeError>
    where
        I: IntoIterator<Item = Record>,
    {
        let path = self.checkpoint_path(name);
        let mut checkpoint = Self::load(&path, name);

        let mut changes = ChangeSet::default();
        let mut seen = HashSet::new();

        for record in records {
            let uid = record.uid().as_str().to_string();
            let hash = record.content_hash()?.to_hex().to_string();

            match checkpoint.hashes.get(&uid) {
                None => {
                    checkpoint.hashes.insert(uid.clone(), hash);
                    changes.added.push(record);
                }
                Some(known) if *known != hash => {
                    checkpoint.hashes.insert(uid.clone(), hash);
                    changes.modified.push(record);
                }
                Some(_) => {}
            }
            seen.insert(uid);
        }

        let mut deleted = Vec::new();
        checkpoint.hashes.retain(|uid, _| {
            let keep = seen.contains(uid);
            if !keep {
                deleted.push(uid.clone());
            }
            keep
        });
        changes.deleted = deleted
            .into_iter()
            .filter_map(|uid| match Uid::try_from(uid.as_str()) {
                Ok(uid) => Some(uid),
                Err(e) => {
                    warn!(uid = %uid, error = %e, "dropping invalid uid from checkpoint");
                    None
                }
            })
            .collect();

        checkpoint.version = CHECKPOINT_VERSION;
        checkpoint.name = name.to_string();
        Self::persist(&path, &checkpoint)?;

        debug!(
            checkpoint = name,
            added = changes.added.len(),
            modified = changes.modified.len(),
            deleted = changes.deleted.len(),
            "computed changes"
        );
        Ok(changes)
    }

    /// Deletes a checkpoint. Returns whether one existed.
    pub fn forget(&self, name: &str) -> Result<bool, ChangeError> {
        let path = self.checkpoint_path(name);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Internal helpers.
impl ChangeTracker {
    /// Missing or unreadable checkpoints start empty.
    fn load(path: &Path, name: &str) -> Checkpoint {
        let content = match std::fs::read(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(checkpoint = name, "starting fresh checkpoint");
                return Checkpoint::default();
            }
            Err(e) => {
                warn!(checkpoint = name, error = %e, "checkpoint unreadable, starting fresh");
                return Checkpoint::default();
            }
        };

        match serde_json::from_slice::<Checkpoint>(&content) {
            Ok(checkpoint) if checkpoint.version == CHECKPOINT_VERSION => checkpoint,
            Ok(checkpoint) => {
                warn!(
                    checkpoint = name,
                    version = checkpoint.version,
                    "unsupported checkpoint version, starting fresh"
                );
                Checkpoint::default()
            }
            Err(e) => {
                warn!(checkpoint = name, error = %e, "checkpoint corrupt, starting fresh");
                Checkpoint::default()
            }
        }
    }

    fn persist(path: &Path, checkpoint: &Checkpoint) -> Result<(), ChangeError> {
        let json = serde_json::to_vec_pretty(checkpoint)?;
        replace_file(path, |w| w.write_all(&json))?;
        Ok(())
    }
}
