//! Device-local client identity.
//!
//! The identity is a single string stored in a file, created on first run
//! and reused afterwards. It is pseudonymous: nothing verifies it.

use gift_registry_core::item::ClientId;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Identity persistence errors.
#[derive(Error, Debug)]
pub enum IdentityError {
    /// The identity file could not be read
    #[error("Failed to read identity file {path}: {source}")]
    Read {
        /// File path
        path: PathBuf,
        /// Underlying error
        source: io::Error,
    },

    /// The identity file could not be written
    #[error("Failed to write identity file {path}: {source}")]
    Write {
        /// File path
        path: PathBuf,
        /// Underlying error
        source: io::Error,
    },
}

/// Identity stored at a fixed path.
#[derive(Debug, Clone)]
pub struct IdentityFile {
    path: PathBuf,
}

impl IdentityFile {
    /// Identity file at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Where the identity lives.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored identity, or generate and store a new one.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError`] if the file exists but cannot be read, or a
    /// new identity cannot be written.
    pub fn load_or_create(&self) -> Result<ClientId, IdentityError> {
        if let Some(existing) = self.load()? {
            tracing::debug!(path = %self.path.display(), "Loaded client identity");
            return Ok(existing);
        }

        let client = ClientId::generate();
        self.store(&client)?;
        tracing::info!(path = %self.path.display(), client = %client, "Created client identity");
        Ok(client)
    }

    /// The stored identity, `None` when the file is missing or blank.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Read`] for I/O failures other than a missing file.
    pub fn load(&self) -> Result<Option<ClientId>, IdentityError> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => Ok(raw.parse().ok()),
            Err(source) if source.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(IdentityError::Read {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn store(&self, client: &ClientId) -> Result<(), IdentityError> {
        let write_error = |source| IdentityError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(write_error)?;
        }
        std::fs::write(&self.path, client.as_str()).map_err(write_error)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn creates_identity_once_and_reuses_it() {
        let dir = tempfile::tempdir().unwrap();
        let file = IdentityFile::new(dir.path().join("nested/client-id"));

        let first = file.load_or_create().unwrap();
        let second = file.load_or_create().unwrap();

        assert_eq!(first, second);
        assert!(file.path().exists());
    }

    #[test]
    fn reads_and_trims_existing_identity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client-id");
        std::fs::write(&path, "  guest-ann\n").unwrap();

        let client = IdentityFile::new(&path).load_or_create().unwrap();
        assert_eq!(client, ClientId::new("guest-ann"));
    }

    #[test]
    fn blank_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client-id");
        std::fs::write(&path, "\n").unwrap();

        let client = IdentityFile::new(&path).load_or_create().unwrap();
        assert!(!client.as_str().is_empty());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), client.as_str());
    }

    #[test]
    fn unreadable_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be read as a file.
        let result = IdentityFile::new(dir.path()).load_or_create();
        assert!(matches!(result, Err(IdentityError::Read { .. })));
    }
}
