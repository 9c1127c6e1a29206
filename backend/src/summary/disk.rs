//! `PAS-SUMMARY` file format, version 5.
//!
//! ```text
//! magic    "PAS-SUMMARY"                       11 bytes
//! version  u32 BE                              always 5
//! count    u32 BE
//! mtime    u32 BE                              seconds since the epoch
//! entries  count times:
//!   lengths  9 x u16 BE   id nickname full_name given_name surname
//!                         file_as email_1 email_2 email_3
//!   flags    4 x u8       list list_show_addresses wants_html wants_html_set
//!   strings  the nine strings' bytes, in length order
//! ```

use super::SummaryEntry;
use super::error::SummaryError;
use almanac_core::types::Uid;
use std::io::{self, Write};

pub(crate) const MAGIC: &[u8; 11] = b"PAS-SUMMARY";
pub(crate) const VERSION: u32 = 5;

/// Longest string an entry can store.
pub(crate) const MAX_STRING_LEN: usize = u16::MAX as usize;

const STRINGS_PER_ENTRY: usize = 9;
const FLAGS_PER_ENTRY: usize = 4;

#[derive(Debug)]
pub(crate) struct Snapshot {
    pub mtime: u32,
    pub entries: Vec<SummaryEntry>,
}

/// Longest prefix of `s` within `max` bytes that ends on a char boundary.
pub(crate) fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

pub(crate) fn encode<W: Write>(
    writer: &mut W,
    mtime: u32,
    entries: &[SummaryEntry],
) -> io::Result<()> {
    let count = u32::try_from(entries.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "too many summary entries"))?;

    writer.write_all(MAGIC)?;
    writer.write_all(&VERSION.to_be_bytes())?;
    writer.write_all(&count.to_be_bytes())?;
    writer.write_all(&mtime.to_be_bytes())?;

    for entry in entries {
        let strings = entry.strings().map(|s| truncate_utf8(s, MAX_STRING_LEN));
        for s in &strings {
            // Lossless: truncated above.
            writer.write_all(&(s.len() as u16).to_be_bytes())?;
        }
        writer.write_all(&[
            entry.is_list as u8,
            entry.list_show_addresses as u8,
            entry.wants_html as u8,
            entry.wants_html_set as u8,
        ])?;
        for s in &strings {
            writer.write_all(s.as_bytes())?;
        }
    }
    Ok(())
}

/// Decodes a whole file. Any defect rejects the file as a unit.
pub(crate) fn decode(data: &[u8]) -> Result<Snapshot, SummaryError> {
    let mut reader = Reader { data, entry: None };

    if reader.take(MAGIC.len())? != MAGIC {
        return Err(SummaryError::BadMagic);
    }
    let version = reader.u32()?;
    if version != VERSION {
        return Err(SummaryError::UnsupportedVersion(version));
    }
    let count = reader.u32()?;
    let mtime = reader.u32()?;

    // Each entry needs at least its fixed-size prefix, which bounds `count`.
    let min_entry = STRINGS_PER_ENTRY * 2 + FLAGS_PER_ENTRY;
    let mut entries = Vec::with_capacity((count as usize).min(reader.data.len() / min_entry));

    for index in 0..count as usize {
        reader.entry = Some(index);
        entries.push(reader.entry()?);
    }

    if !reader.data.is_empty() {
        return Err(SummaryError::TrailingData(reader.data.len()));
    }
    Ok(Snapshot { mtime, entries })
}

struct Reader<'a> {
    data: &'a [u8],
    entry: Option<usize>,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], SummaryError> {
        if self.data.len() < n {
            return Err(SummaryError::Truncated { entry: self.entry });
        }
        let (head, rest) = self.data.split_at(n);
        self.data = rest;
        Ok(head)
    }

    fn u32(&mut self) -> Result<u32, SummaryError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn u16(&mut self) -> Result<u16, SummaryError> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn string(&mut self, len: u16) -> Result<String, SummaryError> {
        let bytes = self.take(len as usize)?;
        let entry = self.entry.unwrap_or_default();
        std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|source| SummaryError::InvalidText { entry, source })
    }

    fn entry(&mut self) -> Result<SummaryEntry, SummaryError> {
        let mut lengths = [0u16; STRINGS_PER_ENTRY];
        for len in &mut lengths {
            *len = self.u16()?;
        }
        let flags = self.take(FLAGS_PER_ENTRY)?;
        let [is_list, list_show_addresses, wants_html, wants_html_set] =
            [flags[0], flags[1], flags[2], flags[3]].map(|b| b != 0);

        let mut strings = Vec::with_capacity(STRINGS_PER_ENTRY);
        for len in lengths {
            strings.push(self.string(len)?);
        }
        let mut strings = strings.into_iter();
        let mut next = || strings.next().unwrap_or_default();

        let entry = self.entry.unwrap_or_default();
        let uid = Uid::try_new(next()).map_err(|source| SummaryError::InvalidUid { entry, source })?;

        Ok(SummaryEntry {
            uid,
            nickname: next(),
            full_name: next(),
            given_name: next(),
            family_name: next(),
            file_as: next(),
            emails: [next(), next(), next()],
            is_list,
            list_show_addresses,
            wants_html,
            wants_html_set,
        })
    }
}
