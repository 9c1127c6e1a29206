//! Companion file `<summary>.meta`.
//!
//! The summary format has no room for anything beyond the cached strings and
//! flags, so the facts needed to trust a loaded summary live next to it: the
//! hash of the exact summary bytes it describes, the save time at full
//! precision, and the uids whose entries hold less than their record.

use crate::summary::error::SummaryError;
use almanac_core::types::Uid;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const META_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct SummaryMeta {
    version: u32,
    /// blake3 hex of the summary file
    summary_hash: String,
    saved_at_nanos: u64,
    overflow: Vec<String>,
}

/// `<summary-path>.meta`
pub(crate) fn meta_path(summary_path: &Path) -> PathBuf {
    let mut path = OsString::from(summary_path);
    path.push(".meta");
    PathBuf::from(path)
}

impl SummaryMeta {
    pub(crate) fn new(
        summary_bytes: &[u8],
        saved_at: SystemTime,
        overflow: &HashSet<Uid>,
    ) -> Self {
        let mut overflow: Vec<String> = overflow.iter().map(|uid| uid.to_string()).collect();
        overflow.sort();
        Self {
            version: META_VERSION,
            summary_hash: blake3::hash(summary_bytes).to_hex().to_string(),
            saved_at_nanos: saved_at
                .duration_since(UNIX_EPOCH)
                .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
                .unwrap_or(0),
            overflow,
        }
    }

    /// Checks that this describes `summary_bytes`; returns the save time and
    /// overflow uids.
    pub(crate) fn verify(
        self,
        summary_bytes: &[u8],
    ) -> Result<(SystemTime, HashSet<Uid>), SummaryError> {
        if self.version != META_VERSION {
            return Err(SummaryError::MetaMismatch);
        }
        if self.summary_hash != blake3::hash(summary_bytes).to_hex().as_str() {
            return Err(SummaryError::MetaMismatch);
        }

        let overflow = self
            .overflow
            .into_iter()
            .map(|uid| Uid::try_new(uid).map_err(|_| SummaryError::MetaMismatch))
            .collect::<Result<HashSet<_>, _>>()?;
        let saved_at = UNIX_EPOCH + Duration::from_nanos(self.saved_at_nanos);
        Ok((saved_at, overflow))
    }
}
