//! Durable key/value storage shared by the history and settings stores.
//!
//! Each key is an independent document; there is no cross-key transaction.

use anyhow::{Context, Result};
use fs_err as fs;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub const HISTORY_KEY: &str = "optimizer_history";
pub const SETTINGS_KEY: &str = "optimizer_settings";

pub trait Storage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// One `<key>.json` file per key under a directory. Writes go through a
/// temp file in the same directory and are renamed into place.
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let p = self.path_for(key);
        if !p.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read_to_string(&p)?))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let p = self.path_for(key);
        let mut tmp = NamedTempFile::new_in(&self.dir)
            .with_context(|| format!("creating temp file in {}", self.dir.display()))?;
        tmp.write_all(value.as_bytes())?;
        tmp.flush()?;
        tmp.persist(&p)
            .with_context(|| format!("replacing {}", p.display()))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let p = self.path_for(key);
        if p.exists() {
            fs::remove_file(&p)?;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_storage_roundtrip_and_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let st = FileStorage::open(dir.path().join("nested")).unwrap();
        assert_eq!(st.get(HISTORY_KEY).unwrap(), None);

        st.set(HISTORY_KEY, "[1]").unwrap();
        st.set(HISTORY_KEY, "[1,2]").unwrap();
        assert_eq!(st.get(HISTORY_KEY).unwrap().as_deref(), Some("[1,2]"));
        assert!(st.dir().join("optimizer_history.json").exists());

        st.remove(HISTORY_KEY).unwrap();
        assert_eq!(st.get(HISTORY_KEY).unwrap(), None);
        st.remove(HISTORY_KEY).unwrap();
    }

    #[test]
    fn keys_are_independent() {
        let st = MemoryStorage::new();
        st.set(HISTORY_KEY, "h").unwrap();
        st.set(SETTINGS_KEY, "s").unwrap();
        st.remove(HISTORY_KEY).unwrap();
        assert_eq!(st.get(SETTINGS_KEY).unwrap().as_deref(), Some("s"));
    }
}
