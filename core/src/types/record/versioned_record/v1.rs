use super::RecordVariant;
use crate::types::Uid;
use crate::types::record::{FieldValue, RecordKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[cfg_attr(test, derive(PartialEq))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub uid: Uid,
    pub kind: RecordKind,
    pub fields: BTreeMap<String, FieldValue>,
}

impl RecordVariant for Record {
    const VERSION: u8 = 1;
}

impl From<crate::types::Record> for Record {
    fn from(record: crate::types::Record) -> Self {
        Self {
            uid: record.uid,
            kind: record.kind,
            fields: record.fields,
        }
    }
}

impl From<Record> for crate::types::Record {
    fn from(record: Record) -> Self {
        Self {
            uid: record.uid,
            kind: record.kind,
            fields: record.fields,
        }
    }
}
