//! Crash-safe whole-file replacement.
//!
//! Writers stage the new content in a `.new` sibling, fsync it, then rename it
//! over the primary path. Until the rename the previous file stays authoritative.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// `<path>.new`
pub fn staging_path(path: &Path) -> PathBuf {
    let mut staged = OsString::from(path);
    staged.push(".new");
    PathBuf::from(staged)
}

/// Replaces `path` with whatever `write` produces.
///
/// On any failure the staging file is removed and `path` is left untouched.
pub fn replace_file<F>(path: &Path, write: F) -> io::Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> io::Result<()>,
{
    let staged = staging_path(path);

    let result = write_staged(&staged, write).and_then(|()| fs::rename(&staged, path));
    if result.is_err() {
        let _ = fs::remove_file(&staged);
    }
    result
}

fn write_staged<F>(staged: &Path, write: F) -> io::Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> io::Result<()>,
{
    if let Some(parent) = staged.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }

    let mut writer = BufWriter::new(File::create(staged)?);
    write(&mut writer)?;
    writer.flush()?;

    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()
}
