use crate::types::record::Record;
use thiserror::Error;

pub mod v1;

pub use v1 as latest_record;

pub trait RecordVariant {
    const VERSION: u8;
}

#[derive(Debug, Error)]
pub enum RecordDecodeError {
    #[error("empty record payload")]
    Empty,

    #[error("unsupported record version: {0}")]
    UnsupportedVersion(u8),

    #[error("invalid record payload: {0}")]
    Payload(#[from] postcard::Error),
}

#[derive(Debug, Clone)]
pub enum VersionedRecord {
    V1(v1::Record),
}

impl VersionedRecord {
    fn into_latest(self) -> Record {
        match self {
            VersionedRecord::V1(v1) => v1.into(),
        }
    }
}

/// Version byte followed by the postcard payload.
pub(crate) fn encode(record: &Record) -> Result<Vec<u8>, postcard::Error> {
    let latest = latest_record::Record::from(record.clone());
    postcard::to_extend(&latest, vec![latest_record::Record::VERSION])
}

pub(crate) fn decode(data: &[u8]) -> Result<Record, RecordDecodeError> {
    let (version, data) = data.split_first().ok_or(RecordDecodeError::Empty)?;
    let versioned = match *version {
        v1::Record::VERSION => VersionedRecord::V1(postcard::from_bytes::<v1::Record>(data)?),
        version => return Err(RecordDecodeError::UnsupportedVersion(version)),
    };
    Ok(versioned.into_latest())
}
