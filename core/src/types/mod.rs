pub(crate) mod config;
pub use config::{Config, LiveSettings, Settings, SettingsError, SummarySettings};

pub(crate) mod uid;
pub use uid::{MAX_UID_LENGTH, Uid, UidError};

pub(crate) mod record;
pub use record::{FieldValue, FieldView, Record, RecordDecodeError, RecordKind, fields};
