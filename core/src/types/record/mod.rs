//! Records as the core sees them.
//!
//! A record is a uid, a kind and an ordered map of field identifiers to values.
//! The vCard / iCalendar grammar lives outside the core; callers hand over
//! records that are already parsed into fields.

use crate::types::Uid;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub(crate) mod versioned_record;

pub use versioned_record::RecordDecodeError;

/// Well-known field identifiers.
///
/// The engine treats field ids as opaque strings; these are the names used by
/// the bundled predicate tables and the summary index.
pub mod fields {
    /// Reserved: always resolves to the record uid.
    pub const ID: &str = "id";

    pub const FULL_NAME: &str = "full_name";
    pub const GIVEN_NAME: &str = "given_name";
    pub const FAMILY_NAME: &str = "family_name";
    pub const NICKNAME: &str = "nickname";
    pub const FILE_AS: &str = "file_as";
    pub const EMAIL: &str = "email";
    pub const PHONE: &str = "phone";
    pub const ORG: &str = "org";
    pub const TITLE: &str = "title";
    pub const URL: &str = "url";
    pub const NOTE: &str = "note";
    pub const IS_LIST: &str = "list";
    pub const LIST_SHOW_ADDRESSES: &str = "list_show_addresses";
    pub const WANTS_HTML: &str = "wants_html";

    pub const SUMMARY: &str = "summary";
    pub const DESCRIPTION: &str = "description";
    pub const COMMENT: &str = "comment";
    pub const LOCATION: &str = "location";
    pub const ORGANIZER: &str = "organizer";
    pub const ATTENDEE: &str = "attendee";
    pub const CATEGORIES: &str = "categories";
    pub const COMPLETED: &str = "completed";
    pub const HAS_ALARMS: &str = "has_alarms";
    pub const DTSTART: &str = "dtstart";
    pub const DTEND: &str = "dtend";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordKind {
    Contact,
    Calendar,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldValue {
    Text(String),
    /// Multi-valued field; predicates match if any element matches.
    List(Vec<String>),
    Flag(bool),
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(value: Vec<String>) -> Self {
        FieldValue::List(value)
    }
}

impl From<Vec<&str>> for FieldValue {
    fn from(value: Vec<&str>) -> Self {
        FieldValue::List(value.into_iter().map(str::to_string).collect())
    }
}

impl<const N: usize> From<[&str; N]> for FieldValue {
    fn from(value: [&str; N]) -> Self {
        FieldValue::List(value.iter().map(|s| s.to_string()).collect())
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Flag(value)
    }
}

/// Borrowed view of one field, with the uid folded in under [`fields::ID`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldView<'a> {
    Absent,
    Text(&'a str),
    List(&'a [String]),
    Flag(bool),
}

impl<'a> FieldView<'a> {
    pub fn is_absent(&self) -> bool {
        matches!(self, FieldView::Absent)
    }

    /// Iterates the textual values; absent and flag fields yield nothing.
    pub fn texts(self) -> impl Iterator<Item = &'a str> {
        let (single, many): (Option<&'a str>, &'a [String]) = match self {
            FieldView::Text(s) => (Some(s), &[]),
            FieldView::List(items) => (None, items),
            FieldView::Absent | FieldView::Flag(_) => (None, &[]),
        };
        single.into_iter().chain(many.iter().map(String::as_str))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    uid: Uid,
    kind: RecordKind,
    fields: BTreeMap<String, FieldValue>,
}

impl Record {
    pub fn new(uid: Uid, kind: RecordKind) -> Self {
        Self {
            uid,
            kind,
            fields: BTreeMap::new(),
        }
    }

    pub fn contact(uid: Uid) -> Self {
        Self::new(uid, RecordKind::Contact)
    }

    pub fn calendar(uid: Uid) -> Self {
        Self::new(uid, RecordKind::Calendar)
    }

    /// Builder-style [`Record::set`].
    pub fn with(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.set(field, value);
        self
    }

    pub fn uid(&self) -> &Uid {
        &self.uid
    }

    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    /// Sets a field. `id` is reserved for the uid and is ignored here.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<FieldValue>) {
        let field = field.into();
        if field == fields::ID {
            return;
        }
        self.fields.insert(field, value.into());
    }

    pub fn unset(&mut self, field: &str) -> Option<FieldValue> {
        self.fields.remove(field)
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn lookup(&self, field: &str) -> FieldView<'_> {
        if field == fields::ID {
            return FieldView::Text(self.uid.as_str());
        }
        match self.fields.get(field) {
            None => FieldView::Absent,
            Some(FieldValue::Text(s)) => FieldView::Text(s),
            Some(FieldValue::List(items)) => FieldView::List(items),
            Some(FieldValue::Flag(b)) => FieldView::Flag(*b),
        }
    }

    /// First textual value of a field, if any.
    pub fn text(&self, field: &str) -> Option<&str> {
        self.lookup(field).texts().next()
    }

    /// Canonical serialized form: the versioned encoding also used on disk.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, postcard::Error> {
        versioned_record::encode(self)
    }

    /// Content hash over [`Record::canonical_bytes`].
    pub fn content_hash(&self) -> Result<blake3::Hash, postcard::Error> {
        Ok(blake3::hash(&self.canonical_bytes()?))
    }
}
