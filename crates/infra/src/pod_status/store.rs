//! Key/value document stores.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use tempfile::NamedTempFile;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum DocStoreError {
    #[error("invalid document key '{0}'")]
    InvalidKey(String),
    #[error("document store io error for '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: io::Error,
    },
}

/// String documents addressed by `/`-separated keys.
pub trait DocumentStore: Send + Sync {
    /// Create or overwrite the document at `key`.
    fn write(&self, key: &str, value: &str) -> Result<(), DocStoreError>;

    fn read(&self, key: &str) -> Result<Option<String>, DocStoreError>;

    /// Returns whether a document was removed.
    fn delete(&self, key: &str) -> Result<bool, DocStoreError>;
}

impl<T: DocumentStore + ?Sized> DocumentStore for Arc<T> {
    fn write(&self, key: &str, value: &str) -> Result<(), DocStoreError> {
        (**self).write(key, value)
    }

    fn read(&self, key: &str) -> Result<Option<String>, DocStoreError> {
        (**self).read(key)
    }

    fn delete(&self, key: &str) -> Result<bool, DocStoreError> {
        (**self).delete(key)
    }
}

/// In-memory document store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    docs: RwLock<HashMap<String, String>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn len(&self) -> usize {
        self.docs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DocumentStore for InMemoryDocumentStore {
    fn write(&self, key: &str, value: &str) -> Result<(), DocStoreError> {
        self.docs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn read(&self, key: &str) -> Result<Option<String>, DocStoreError> {
        Ok(self
            .docs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }

    fn delete(&self, key: &str) -> Result<bool, DocStoreError> {
        Ok(self
            .docs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .is_some())
    }
}

/// One file per key under a root directory.
///
/// Each write goes to a uniquely named temporary file in the target directory
/// and is renamed into place, so a reader never observes a half-written
/// document and concurrent writers never share a temporary file.
#[derive(Debug, Clone)]
pub struct LocalDocumentStore {
    root: PathBuf,
}

impl LocalDocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, DocStoreError> {
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(DocStoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

fn io_err(key: &str) -> impl FnOnce(io::Error) -> DocStoreError + '_ {
    move |source| DocStoreError::Io {
        key: key.to_string(),
        source,
    }
}

impl DocumentStore for LocalDocumentStore {
    fn write(&self, key: &str, value: &str) -> Result<(), DocStoreError> {
        let path = self.path_for(key)?;
        let parent = path.parent().unwrap_or(self.root.as_path());
        fs::create_dir_all(parent).map_err(io_err(key))?;

        let mut tmp = NamedTempFile::new_in(parent).map_err(io_err(key))?;
        tmp.write_all(value.as_bytes()).map_err(io_err(key))?;
        tmp.persist(&path).map_err(|e| io_err(key)(e.error))?;

        debug!(key, path = %path.display(), "document written");
        Ok(())
    }

    fn read(&self, key: &str) -> Result<Option<String>, DocStoreError> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(io_err(key)(err)),
        }
    }

    fn delete(&self, key: &str) -> Result<bool, DocStoreError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(io_err(key)(err)),
        }
    }
}
