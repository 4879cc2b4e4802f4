// SPDX-License-Identifier: GPL-3.0-only

//! Durable storage for the repository document

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use nix::fcntl::{Flock, FlockArg};

use super::Document;
use crate::error::StoreError;

/// Advisory lock on the durable copy; released on drop.
pub type BackendLock = Flock<fs::File>;

pub trait StoreBackend: Send + Sync {
    /// Read the last saved document; a store that was never written yields the default.
    fn load(&self) -> Result<Document, StoreError>;

    fn save(&self, document: &Document) -> Result<(), StoreError>;

    /// Held across one load-modify-save cycle. Backends private to one
    /// process need no lock.
    fn lock_exclusive(&self) -> Result<Option<BackendLock>, StoreError> {
        Ok(None)
    }
}

/// Pretty-printed JSON file, replaced atomically on every save
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}

impl StoreBackend for JsonFileBackend {
    fn load(&self) -> Result<Document, StoreError> {
        match fs::read(&self.path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(Document::default()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Document::default()),
            Err(e) => Err(self.io_error(e)),
        }
    }

    fn save(&self, document: &Document) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }

        let json = serde_json::to_vec_pretty(document)?;
        let tmp_path = self.path.with_extension("json.tmp");

        let mut file = fs::File::create(&tmp_path).map_err(|e| self.io_error(e))?;
        file.write_all(&json).map_err(|e| self.io_error(e))?;
        file.sync_all().map_err(|e| self.io_error(e))?;
        drop(file);

        fs::rename(&tmp_path, &self.path).map_err(|e| self.io_error(e))
    }

    /// `flock(2)` on a sibling `.lock` file; the document itself is replaced
    /// by rename and cannot carry the lock.
    fn lock_exclusive(&self) -> Result<Option<BackendLock>, StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }
        let file = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.path.with_extension("json.lock"))
            .map_err(|e| self.io_error(e))?;
        let lock = Flock::lock(file, FlockArg::LockExclusive)
            .map_err(|(_, errno)| self.io_error(std::io::Error::from(errno)))?;
        Ok(Some(lock))
    }
}

/// Keeps the document in memory only
#[cfg(test)]
#[derive(Default)]
pub struct MemoryBackend {
    document: std::sync::Mutex<Document>,
}

#[cfg(test)]
impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
impl StoreBackend for MemoryBackend {
    fn load(&self) -> Result<Document, StoreError> {
        Ok(self
            .document
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone())
    }

    fn save(&self, document: &Document) -> Result<(), StoreError> {
        *self
            .document
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = document.clone();
        Ok(())
    }
}
