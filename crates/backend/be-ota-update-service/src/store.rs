//! Read-only access to the on-disk source of truth.
//!
//! Every path handed to a [`BundleStore`] is a logical, forward-slash path
//! such as `updates/1.0.0/7/metadata.json`. Stores only read; provisioning
//! bundles is somebody else's job.

use std::{
    collections::{BTreeMap, BTreeSet},
    io,
    path::PathBuf,
    time::SystemTime,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// A direct child of a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEntry {
    pub name: String,
    pub kind: EntryKind,
}

impl StoreEntry {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }
}

#[async_trait]
pub trait BundleStore: Send + Sync {
    /// Whether `path` exists and is a directory.
    async fn is_dir(&self, path: &str) -> io::Result<bool>;

    /// Direct children of the directory at `path`.
    async fn entries(&self, path: &str) -> io::Result<Vec<StoreEntry>>;

    async fn read(&self, path: &str) -> io::Result<Vec<u8>>;

    /// Creation time of the file at `path`.
    async fn created_at(&self, path: &str) -> io::Result<DateTime<Utc>>;
}

/// Bundles stored on the local filesystem below `root`.
#[derive(Debug, Clone)]
pub struct LocalBundleStore {
    root: PathBuf,
}

impl LocalBundleStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        path.split('/')
            .filter(|segment| !segment.is_empty())
            .fold(self.root.clone(), |acc, segment| acc.join(segment))
    }
}

#[async_trait]
impl BundleStore for LocalBundleStore {
    async fn is_dir(&self, path: &str) -> io::Result<bool> {
        match tokio::fs::metadata(self.resolve(path)).await {
            Ok(metadata) => Ok(metadata.is_dir()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn entries(&self, path: &str) -> io::Result<Vec<StoreEntry>> {
        let mut dir = tokio::fs::read_dir(self.resolve(path)).await?;
        let mut entries = Vec::new();

        while let Some(entry) = dir.next_entry().await? {
            let Ok(name) = entry.file_name().into_string() else {
                debug!("Skipping non UTF-8 entry in {}", path);
                continue;
            };
            let file_type = entry.file_type().await?;
            let is_dir = if file_type.is_symlink() {
                match tokio::fs::metadata(entry.path()).await {
                    Ok(target) => target.is_dir(),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {
                        debug!("Skipping dangling symlink {}/{}", path, name);
                        continue;
                    }
                    Err(e) => return Err(e),
                }
            } else {
                file_type.is_dir()
            };
            let kind = if is_dir {
                EntryKind::Directory
            } else {
                EntryKind::File
            };
            entries.push(StoreEntry { name, kind });
        }

        Ok(entries)
    }

    async fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        tokio::fs::read(self.resolve(path)).await
    }

    async fn created_at(&self, path: &str) -> io::Result<DateTime<Utc>> {
        let metadata = tokio::fs::metadata(self.resolve(path)).await?;
        // Not every filesystem records birth time.
        let time: SystemTime = metadata.created().or_else(|_| metadata.modified())?;
        Ok(DateTime::<Utc>::from(time))
    }
}

#[derive(Debug, Clone)]
struct MemoryFile {
    contents: Vec<u8>,
    created_at: DateTime<Utc>,
}

/// In-memory store with explicit creation times.
#[derive(Debug, Default)]
pub struct MemoryBundleStore {
    files: RwLock<BTreeMap<String, MemoryFile>>,
    dirs: RwLock<BTreeSet<String>>,
}

impl MemoryBundleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_file(&self, path: &str, contents: impl Into<Vec<u8>>) {
        self.insert_file_created_at(path, contents, Utc::now());
    }

    pub fn insert_file_created_at(
        &self,
        path: &str,
        contents: impl Into<Vec<u8>>,
        created_at: DateTime<Utc>,
    ) {
        self.files.write().insert(
            normalize(path),
            MemoryFile {
                contents: contents.into(),
                created_at,
            },
        );
    }

    /// Create an empty directory; directories holding files exist implicitly.
    pub fn create_dir(&self, path: &str) {
        self.dirs.write().insert(normalize(path));
    }

    pub fn remove_file(&self, path: &str) -> bool {
        self.files.write().remove(&normalize(path)).is_some()
    }

    fn file(&self, path: &str) -> io::Result<MemoryFile> {
        let path = normalize(path);
        let file = self.files.read().get(&path).cloned();
        match file {
            Some(file) => Ok(file),
            None if self.dir_exists(&path) => {
                Err(io::Error::other(format!("{} is a directory", path)))
            }
            None => Err(not_found(&path)),
        }
    }

    fn dir_exists(&self, path: &str) -> bool {
        let prefix = format!("{}/", path);
        let declared = self
            .dirs
            .read()
            .iter()
            .any(|dir| dir == path || dir.starts_with(&prefix));
        declared || self.files.read().keys().any(|file| file.starts_with(&prefix))
    }
}

#[async_trait]
impl BundleStore for MemoryBundleStore {
    async fn is_dir(&self, path: &str) -> io::Result<bool> {
        Ok(self.dir_exists(&normalize(path)))
    }

    async fn entries(&self, path: &str) -> io::Result<Vec<StoreEntry>> {
        let path = normalize(path);
        if !self.dir_exists(&path) {
            return Err(not_found(&path));
        }

        let prefix = format!("{}/", path);
        let mut children: BTreeMap<String, EntryKind> = BTreeMap::new();

        let dirs = self.dirs.read();
        let files = self.files.read();
        let paths = dirs
            .iter()
            .map(|dir| (dir, true))
            .chain(files.keys().map(|file| (file, false)));

        for (candidate, is_dir) in paths {
            let Some(rest) = candidate.strip_prefix(&prefix) else {
                continue;
            };
            let kind = match rest.split_once('/') {
                Some(_) => EntryKind::Directory,
                None if is_dir => EntryKind::Directory,
                None => EntryKind::File,
            };
            let name = rest.split('/').next().unwrap_or(rest).to_string();
            if !name.is_empty() {
                children.entry(name).or_insert(kind);
            }
        }

        Ok(children
            .into_iter()
            .map(|(name, kind)| StoreEntry { name, kind })
            .collect())
    }

    async fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        Ok(self.file(path)?.contents)
    }

    async fn created_at(&self, path: &str) -> io::Result<DateTime<Utc>> {
        Ok(self.file(path)?.created_at)
    }
}

fn normalize(path: &str) -> String {
    path.split(['/', '\\'])
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

fn not_found(path: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("{} not found", path))
}
