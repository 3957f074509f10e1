//! Where transferred content comes from and where it goes.
//!
//! The protocol core only ever asks two questions of the outside world:
//! "what is the content of resource `id`?" on the server, and "store this
//! assembled content" on the client. [`ResourceProvider`] and
//! [`OutputSink`] are those seams; the file-backed implementations are what
//! the binary uses, the in-memory ones are for tests.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tokio::io::AsyncWriteExt;

#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("resource {0:?} does not exist")]
    NotFound(String),
    #[error("resource I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Providers
// ---------------------------------------------------------------------------

/// Looks up the full content of a resource by identifier.
#[allow(async_fn_in_trait)]
pub trait ResourceProvider {
    async fn open(&self, id: &str) -> Result<String, ResourceError>;
}

/// Resources are text files, optionally confined to a root directory.
#[derive(Debug, Clone, Default)]
pub struct FileResources {
    root: Option<PathBuf>,
}

impl FileResources {
    /// Identifiers are paths as given (relative to the working directory).
    pub fn new() -> Self {
        Self::default()
    }

    /// Identifiers are relative paths under `root`; absolute paths and `..`
    /// are treated as nonexistent.
    pub fn rooted(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn resolve(&self, id: &str) -> Option<PathBuf> {
        let path = Path::new(id);
        match &self.root {
            None => Some(path.to_path_buf()),
            Some(root) => {
                let confined = path
                    .components()
                    .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
                confined.then(|| root.join(path))
            }
        }
    }
}

impl ResourceProvider for FileResources {
    async fn open(&self, id: &str) -> Result<String, ResourceError> {
        let path = self
            .resolve(id)
            .ok_or_else(|| ResourceError::NotFound(id.to_owned()))?;
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ResourceError::NotFound(id.to_owned()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Fixed in-memory resources.
#[derive(Debug, Clone, Default)]
pub struct MemoryResources {
    entries: HashMap<String, String>,
}

impl MemoryResources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, id: &str, content: &str) -> Self {
        self.entries.insert(id.to_owned(), content.to_owned());
        self
    }
}

impl ResourceProvider for MemoryResources {
    async fn open(&self, id: &str) -> Result<String, ResourceError> {
        self.entries
            .get(id)
            .cloned()
            .ok_or_else(|| ResourceError::NotFound(id.to_owned()))
    }
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Receives the assembled content of a completed transfer.
#[allow(async_fn_in_trait)]
pub trait OutputSink {
    async fn persist(&mut self, content: &str) -> std::io::Result<()>;
}

/// Appends to a file, creating it if needed.
#[derive(Debug, Clone)]
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl OutputSink for FileSink {
    async fn persist(&mut self, content: &str) -> std::io::Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await
    }
}

/// Keeps every persisted transfer in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    pub outputs: Vec<String>,
}

impl OutputSink for MemorySink {
    async fn persist(&mut self, content: &str) -> std::io::Result<()> {
        self.outputs.push(content.to_owned());
        Ok(())
    }
}
