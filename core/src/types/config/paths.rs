use std::ffi::OsString;
use std::path::PathBuf;

/// Locations of everything a backend keeps on disk.
#[derive(Clone, Debug)]
pub struct Config {
    pub base_path: PathBuf,
}

impl Config {
    pub fn store_path(&self) -> PathBuf {
        self.base_path.join("records.redb")
    }

    /// `<store-file>.summary`
    pub fn summary_path(&self) -> PathBuf {
        let mut path = OsString::from(self.store_path());
        path.push(".summary");
        PathBuf::from(path)
    }

    pub fn checkpoints_path(&self) -> PathBuf {
        self.base_path.join("changes")
    }

    pub fn settings_path(&self) -> PathBuf {
        self.base_path.join("settings.toml")
    }
}
