//! Point-in-time images of a database directory.
//!
//! A [`SnapshotProvider`] captures a database before a batch first mutates it and writes
//! the image back when the batch rolls back. Where images live is up to the provider:
//! [`MemorySnapshotProvider`](super::memory::MemorySnapshotProvider) keeps them in memory,
//! [`FileSnapshotProvider`] writes them as bincode files.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

use super::{DB_LIST, Storage, listing::read_listing, write_json};

/// Reference to a taken snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotHandle {
    pub id: u64,
    pub database: String,
}

pub trait SnapshotProvider: Send + Sync {
    /// Captures the current state of a database, which need not exist yet
    fn snapshot(&self, storage: &Storage, database: &str) -> Result<SnapshotHandle>;

    /// Puts the database back exactly as captured
    fn restore(&self, storage: &Storage, handle: &SnapshotHandle) -> Result<()>;

    /// Releases the snapshot
    fn discard(&self, handle: &SnapshotHandle) -> Result<()>;
}

/// Every directory and file under a database directory, paths relative to it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseImage {
    pub database: String,
    /// False when the database did not exist at capture time
    pub existed: bool,
    /// Database listing at capture time, in order
    pub listing: Vec<String>,
    pub directories: Vec<String>,
    pub files: Vec<FileImage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileImage {
    pub path: String,
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
}

impl DatabaseImage {
    pub fn capture(storage: &Storage, database: &str) -> Result<Self> {
        let root = storage.database_dir(database);
        let mut image = Self {
            database: database.to_string(),
            existed: root.is_dir(),
            listing: read_listing(&storage.root().join(DB_LIST), storage.root())?,
            directories: Vec::new(),
            files: Vec::new(),
        };
        if image.existed {
            image.walk(&root, &root)?;
        }
        Ok(image)
    }

    fn walk(&mut self, root: &Path, dir: &Path) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let relative = relative_path(root, &path)?;
            if path.is_dir() {
                self.directories.push(relative);
                self.walk(root, &path)?;
            } else {
                self.files.push(FileImage { path: relative, data: fs::read(&path)? });
            }
        }
        Ok(())
    }

    /// Replaces the database directory with the image and puts back the captured listing
    pub fn restore(&self, storage: &Storage) -> Result<()> {
        let root = storage.database_dir(&self.database);
        if root.exists() {
            fs::remove_dir_all(&root)?;
        }
        if self.existed {
            fs::create_dir_all(&root)?;
            for dir in &self.directories {
                fs::create_dir_all(root.join(dir))?;
            }
            for file in &self.files {
                fs::write(root.join(&file.path), &file.data)?;
            }
        }
        write_json(&storage.root().join(DB_LIST), &self.listing)
    }
}

fn relative_path(root: &Path, path: &Path) -> Result<String> {
    let relative = path
        .strip_prefix(root)
        .map_err(|e| Error::Internal(format!("{} is outside {}: {}", path.display(), root.display(), e)))?;
    let parts = relative
        .components()
        .map(|c| c.as_os_str().to_str().map(str::to_string))
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| Error::Internal(format!("non UTF-8 path {}", path.display())))?;
    Ok(parts.join("/"))
}

/// Stores images as bincode files in a directory
pub struct FileSnapshotProvider {
    dir: PathBuf,
    next_id: AtomicU64,
}

impl FileSnapshotProvider {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, next_id: AtomicU64::new(1) })
    }

    fn file(&self, handle: &SnapshotHandle) -> PathBuf {
        self.dir.join(format!("{}-{}-{}.snapshot", std::process::id(), handle.id, handle.database))
    }
}

impl SnapshotProvider for FileSnapshotProvider {
    fn snapshot(&self, storage: &Storage, database: &str) -> Result<SnapshotHandle> {
        let image = DatabaseImage::capture(storage, database)?;
        let handle = SnapshotHandle {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            database: database.to_string(),
        };
        let file = self.file(&handle);
        fs::write(&file, bincode::serialize(&image)?)?;
        debug!(file = %file.display(), "wrote snapshot");
        Ok(handle)
    }

    fn restore(&self, storage: &Storage, handle: &SnapshotHandle) -> Result<()> {
        let image: DatabaseImage = bincode::deserialize(&fs::read(self.file(handle))?)?;
        image.restore(storage)
    }

    fn discard(&self, handle: &SnapshotHandle) -> Result<()> {
        match fs::remove_file(self.file(handle)) {
            Err(err) if err.kind() != std::io::ErrorKind::NotFound => Err(err.into()),
            _ => Ok(()),
        }
    }
}
