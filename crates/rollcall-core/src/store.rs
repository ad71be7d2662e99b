//! Durable identity → signature store.
//!
//! The whole store lives in memory and is mirrored to one file. Every save
//! rewrites the file through a temporary sibling and an atomic rename, so a
//! reader never observes a half-written store.

pub mod codec;

use crate::types::{DimensionMismatch, Enrollment, Signature};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("store file {path} is corrupt: {reason}")]
    Corrupt {
        path: PathBuf,
        #[source]
        reason: codec::DecodeError,
    },
    #[error(transparent)]
    Dimension(#[from] DimensionMismatch),
}

/// In-memory signature store bound to a file path.
///
/// Entries keep insertion order; overwriting an identity keeps its slot.
#[derive(Debug, Clone)]
pub struct SignatureStore {
    path: PathBuf,
    dimension: Option<usize>,
    entries: Vec<Enrollment>,
}

impl SignatureStore {
    /// Empty store that will persist to `path`. Nothing is read or written.
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            dimension: None,
            entries: Vec::new(),
        }
    }

    /// Read the store at `path`, or start empty if the file does not exist.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();

        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no store file; starting empty");
                return Ok(Self::empty(path));
            }
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        let (dimension, entries) = match codec::decode(&bytes) {
            Ok(decoded) => decoded,
            Err(reason) => return Err(StoreError::Corrupt { path, reason }),
        };

        tracing::debug!(
            path = %path.display(),
            entries = entries.len(),
            dimension,
            "loaded signature store"
        );

        Ok(Self {
            path,
            dimension: (!entries.is_empty()).then_some(dimension),
            entries,
        })
    }

    /// Persist the full store atomically.
    pub fn save(&self) -> Result<(), StoreError> {
        let io_err = |source: io::Error| StoreError::Io {
            path: self.path.clone(),
            source,
        };

        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent).map_err(io_err)?;

        let bytes = codec::encode(self.dimension.unwrap_or(0), &self.entries);

        let mut tmp = NamedTempFile::new_in(parent).map_err(io_err)?;
        tmp.write_all(&bytes).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;

        let file = tmp.persist(&self.path).map_err(|e| io_err(e.error))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(fs::Permissions::from_mode(0o600))
                .map_err(io_err)?;
        }
        #[cfg(not(unix))]
        drop(file);

        tracing::debug!(
            path = %self.path.display(),
            entries = self.entries.len(),
            bytes = bytes.len(),
            "saved signature store"
        );
        Ok(())
    }

    /// Insert or overwrite, returning the previous signature.
    ///
    /// The first signature fixes the store's dimension; later ones must match.
    pub fn put(
        &mut self,
        identity: &str,
        signature: Signature,
    ) -> Result<Option<Signature>, StoreError> {
        if let Some(expected) = self.dimension {
            if signature.len() != expected {
                return Err(DimensionMismatch {
                    expected,
                    actual: signature.len(),
                }
                .into());
            }
        }

        if let Some(existing) = self.entries.iter_mut().find(|e| e.identity == identity) {
            return Ok(Some(std::mem::replace(&mut existing.signature, signature)));
        }

        self.dimension = Some(signature.len());
        self.entries.push(Enrollment {
            identity: identity.to_string(),
            signature,
        });
        Ok(None)
    }

    /// Delete `identity`; returns whether it was present.
    pub fn remove(&mut self, identity: &str) -> bool {
        self.take(identity).is_some()
    }

    /// Remove `identity`, returning its slot and entry for [`restore`](Self::restore).
    pub fn take(&mut self, identity: &str) -> Option<(usize, Enrollment)> {
        let idx = self.entries.iter().position(|e| e.identity == identity)?;
        let entry = self.entries.remove(idx);
        if self.entries.is_empty() {
            self.dimension = None;
        }
        Some((idx, entry))
    }

    /// Put back an entry returned by [`take`](Self::take) at its old slot.
    pub fn restore(&mut self, index: usize, entry: Enrollment) {
        self.dimension = Some(entry.signature.len());
        let index = index.min(self.entries.len());
        self.entries.insert(index, entry);
    }

    /// Undo a [`put`](Self::put), given the signature it returned.
    pub fn revert_put(&mut self, identity: &str, previous: Option<Signature>) {
        match previous {
            Some(old) => {
                if let Some(entry) = self.entries.iter_mut().find(|e| e.identity == identity) {
                    entry.signature = old;
                }
            }
            None => {
                self.take(identity);
            }
        }
    }

    pub fn get(&self, identity: &str) -> Option<&Signature> {
        self.entries
            .iter()
            .find(|e| e.identity == identity)
            .map(|e| &e.signature)
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.get(identity).is_some()
    }

    /// Identities in insertion order.
    pub fn identities(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.identity.clone()).collect()
    }

    pub fn entries(&self) -> &[Enrollment] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &Enrollment> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Signature length shared by all entries, `None` while empty.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
