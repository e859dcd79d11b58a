// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Filesystem access seam.
//!
//! The engine never touches the filesystem directly; it goes through
//! [`FileAccess`] so the dispatch logic can be tested against an in-memory
//! tree and so a daemon can interpose whatever path policy it needs.
//!
//! Paths in notifications are opaque identifiers relative to the synced tree
//! root; a leading separator is tolerated. `NotFound` is a distinct,
//! recognizable failure on every read-side operation because the engine
//! treats it as a benign race with an in-flight delete.
//!
//! Two implementations ship with the crate:
//!
//! - [`DiskFileAccess`] — the real one, rooted at a directory.
//! - [`InMemoryFileAccess`] — map-backed, for tests and dry-run wiring.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use filetime::FileTime;
use tokio::sync::Mutex;

use crate::error::{BoxFuture, Result, SyncError};

/// Filesystem operations the engine needs, and nothing more.
///
/// All methods are asynchronous and return the crate [`Result`];
/// read-side methods fail with [`SyncError::NotFound`] when the path is
/// absent. Modification times are epoch milliseconds and are read and
/// written without following symlinks, so a stamped link round-trips.
pub trait FileAccess: Send + Sync + 'static {
    /// Modification time of the entry itself (no-follow), epoch ms.
    fn modified_time(&self, path: &str) -> BoxFuture<'_, i64>;

    /// Full content of a regular file.
    fn read(&self, path: &str) -> BoxFuture<'_, Vec<u8>>;

    /// Write a regular file, creating parent directories as needed.
    fn write(&self, path: &str, data: Vec<u8>) -> BoxFuture<'_, ()>;

    /// Whether any entry (file, symlink, directory) exists at the path.
    fn exists(&self, path: &str) -> BoxFuture<'_, bool>;

    /// Remove the entry at the path (recursively for directories).
    fn delete(&self, path: &str) -> BoxFuture<'_, ()>;

    /// Target of a symlink.
    fn read_symlink(&self, path: &str) -> BoxFuture<'_, String>;

    /// Create a symlink, replacing any existing entry at the path.
    fn create_symlink(&self, path: &str, target: &str) -> BoxFuture<'_, ()>;

    /// Stamp the entry's modification time (no-follow), epoch ms.
    fn set_modified_time(&self, path: &str, mod_time_ms: i64) -> BoxFuture<'_, ()>;
}

fn system_time_to_ms(t: SystemTime) -> i64 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_millis() as i64,
        Err(e) => -(e.duration().as_millis() as i64),
    }
}

fn ms_to_file_time(mod_time_ms: i64) -> FileTime {
    let secs = mod_time_ms.div_euclid(1000);
    let nanos = (mod_time_ms.rem_euclid(1000) * 1_000_000) as u32;
    FileTime::from_unix_time(secs, nanos)
}

// =============================================================================
// Disk implementation
// =============================================================================

/// [`FileAccess`] over a real directory tree.
#[derive(Debug, Clone)]
pub struct DiskFileAccess {
    root: PathBuf,
}

impl DiskFileAccess {
    /// Create an accessor rooted at `root`; notification paths resolve
    /// relative to it.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The tree root.
    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }
}

impl FileAccess for DiskFileAccess {
    fn modified_time(&self, path: &str) -> BoxFuture<'_, i64> {
        let full = self.resolve(path);
        let path = path.to_string();
        Box::pin(async move {
            let meta = tokio::fs::symlink_metadata(&full)
                .await
                .map_err(|e| SyncError::io("stat", &path, e))?;
            let modified = meta
                .modified()
                .map_err(|e| SyncError::io("stat", &path, e))?;
            Ok(system_time_to_ms(modified))
        })
    }

    fn read(&self, path: &str) -> BoxFuture<'_, Vec<u8>> {
        let full = self.resolve(path);
        let path = path.to_string();
        Box::pin(async move {
            tokio::fs::read(&full)
                .await
                .map_err(|e| SyncError::io("read", &path, e))
        })
    }

    fn write(&self, path: &str, data: Vec<u8>) -> BoxFuture<'_, ()> {
        let full = self.resolve(path);
        let path = path.to_string();
        Box::pin(async move {
            if let Some(parent) = full.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| SyncError::io("mkdir", &path, e))?;
            }
            tokio::fs::write(&full, data)
                .await
                .map_err(|e| SyncError::io("write", &path, e))
        })
    }

    fn exists(&self, path: &str) -> BoxFuture<'_, bool> {
        let full = self.resolve(path);
        let path = path.to_string();
        Box::pin(async move {
            match tokio::fs::symlink_metadata(&full).await {
                Ok(_) => Ok(true),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
                Err(e) => Err(SyncError::io("stat", &path, e)),
            }
        })
    }

    fn delete(&self, path: &str) -> BoxFuture<'_, ()> {
        let full = self.resolve(path);
        let path = path.to_string();
        Box::pin(async move {
            let meta = tokio::fs::symlink_metadata(&full)
                .await
                .map_err(|e| SyncError::io("delete", &path, e))?;
            if meta.is_dir() {
                tokio::fs::remove_dir_all(&full)
                    .await
                    .map_err(|e| SyncError::io("delete", &path, e))
            } else {
                tokio::fs::remove_file(&full)
                    .await
                    .map_err(|e| SyncError::io("delete", &path, e))
            }
        })
    }

    fn read_symlink(&self, path: &str) -> BoxFuture<'_, String> {
        let full = self.resolve(path);
        let path = path.to_string();
        Box::pin(async move {
            let target = tokio::fs::read_link(&full)
                .await
                .map_err(|e| SyncError::io("readlink", &path, e))?;
            Ok(target.to_string_lossy().into_owned())
        })
    }

    fn create_symlink(&self, path: &str, target: &str) -> BoxFuture<'_, ()> {
        let full = self.resolve(path);
        let path = path.to_string();
        let target = PathBuf::from(target);
        Box::pin(async move {
            // Replace semantics: clear whatever currently occupies the path.
            match tokio::fs::symlink_metadata(&full).await {
                Ok(meta) if meta.is_dir() => {
                    tokio::fs::remove_dir_all(&full)
                        .await
                        .map_err(|e| SyncError::io("symlink", &path, e))?;
                }
                Ok(_) => {
                    tokio::fs::remove_file(&full)
                        .await
                        .map_err(|e| SyncError::io("symlink", &path, e))?;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(SyncError::io("symlink", &path, e)),
            }
            if let Some(parent) = full.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| SyncError::io("mkdir", &path, e))?;
            }
            #[cfg(unix)]
            {
                tokio::fs::symlink(&target, &full)
                    .await
                    .map_err(|e| SyncError::io("symlink", &path, e))
            }
            #[cfg(not(unix))]
            {
                let _ = target;
                Err(SyncError::Internal(format!(
                    "symlinks are not supported on this platform: {path}"
                )))
            }
        })
    }

    fn set_modified_time(&self, path: &str, mod_time_ms: i64) -> BoxFuture<'_, ()> {
        let full = self.resolve(path);
        let path = path.to_string();
        Box::pin(async move {
            let ft = ms_to_file_time(mod_time_ms);
            // filetime is synchronous; no-follow so a stamped link keeps it.
            let result = tokio::task::spawn_blocking(move || {
                filetime::set_symlink_file_times(&full, ft, ft)
            })
            .await
            .map_err(|e| SyncError::Internal(format!("set_modified_time task failed: {e}")))?;
            result.map_err(|e| SyncError::io("utimes", &path, e))
        })
    }
}

// =============================================================================
// In-memory implementation
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum MemEntry {
    File { data: Vec<u8>, mod_time_ms: i64 },
    Symlink { target: String, mod_time_ms: i64 },
}

impl MemEntry {
    fn mod_time_ms(&self) -> i64 {
        match self {
            MemEntry::File { mod_time_ms, .. } | MemEntry::Symlink { mod_time_ms, .. } => {
                *mod_time_ms
            }
        }
    }

    fn set_mod_time_ms(&mut self, t: i64) {
        match self {
            MemEntry::File { mod_time_ms, .. } | MemEntry::Symlink { mod_time_ms, .. } => {
                *mod_time_ms = t
            }
        }
    }
}

/// Map-backed [`FileAccess`] for tests and dry-run wiring.
///
/// Writes stamp a synthetic, monotonically increasing modification time;
/// follow up with [`set_modified_time`](FileAccess::set_modified_time) to
/// pin a specific stamp, exactly as the engine does when applying remote
/// writes.
#[derive(Debug, Default)]
pub struct InMemoryFileAccess {
    entries: Mutex<HashMap<String, MemEntry>>,
    clock: AtomicI64,
}

impl InMemoryFileAccess {
    /// Create an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    fn key(path: &str) -> String {
        format!("/{}", path.trim_start_matches('/'))
    }

    /// Seed a regular file at a specific modification time.
    pub async fn insert_file(&self, path: &str, data: impl Into<Vec<u8>>, mod_time_ms: i64) {
        self.entries.lock().await.insert(
            Self::key(path),
            MemEntry::File {
                data: data.into(),
                mod_time_ms,
            },
        );
    }

    /// Seed a symlink at a specific modification time.
    pub async fn insert_symlink(&self, path: &str, target: impl Into<String>, mod_time_ms: i64) {
        self.entries.lock().await.insert(
            Self::key(path),
            MemEntry::Symlink {
                target: target.into(),
                mod_time_ms,
            },
        );
    }

    /// Drop an entry (simulates an external delete).
    pub async fn remove(&self, path: &str) {
        self.entries.lock().await.remove(&Self::key(path));
    }

    /// Inspect a regular file: `(content, mod_time_ms)`.
    pub async fn file(&self, path: &str) -> Option<(Vec<u8>, i64)> {
        match self.entries.lock().await.get(&Self::key(path)) {
            Some(MemEntry::File { data, mod_time_ms }) => Some((data.clone(), *mod_time_ms)),
            _ => None,
        }
    }

    /// Inspect a symlink: `(target, mod_time_ms)`.
    pub async fn symlink(&self, path: &str) -> Option<(String, i64)> {
        match self.entries.lock().await.get(&Self::key(path)) {
            Some(MemEntry::Symlink {
                target,
                mod_time_ms,
            }) => Some((target.clone(), *mod_time_ms)),
            _ => None,
        }
    }

    /// Whether any entry exists at the path.
    pub async fn contains(&self, path: &str) -> bool {
        self.entries.lock().await.contains_key(&Self::key(path))
    }

    /// Number of entries in the tree.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether the tree is empty.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    fn next_time(&self) -> i64 {
        self.clock.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl FileAccess for InMemoryFileAccess {
    fn modified_time(&self, path: &str) -> BoxFuture<'_, i64> {
        let key = Self::key(path);
        let path = path.to_string();
        Box::pin(async move {
            self.entries
                .lock()
                .await
                .get(&key)
                .map(MemEntry::mod_time_ms)
                .ok_or_else(|| SyncError::not_found(path))
        })
    }

    fn read(&self, path: &str) -> BoxFuture<'_, Vec<u8>> {
        let key = Self::key(path);
        let path = path.to_string();
        Box::pin(async move {
            let entries = self.entries.lock().await;
            match entries.get(&key) {
                Some(MemEntry::File { data, .. }) => Ok(data.clone()),
                // Reads follow links, one hop is plenty for a flat test tree.
                Some(MemEntry::Symlink { target, .. }) => match entries.get(&Self::key(target)) {
                    Some(MemEntry::File { data, .. }) => Ok(data.clone()),
                    _ => Err(SyncError::not_found(path)),
                },
                None => Err(SyncError::not_found(path)),
            }
        })
    }

    fn write(&self, path: &str, data: Vec<u8>) -> BoxFuture<'_, ()> {
        let key = Self::key(path);
        Box::pin(async move {
            let mod_time_ms = self.next_time();
            self.entries
                .lock()
                .await
                .insert(key, MemEntry::File { data, mod_time_ms });
            Ok(())
        })
    }

    fn exists(&self, path: &str) -> BoxFuture<'_, bool> {
        let key = Self::key(path);
        Box::pin(async move { Ok(self.entries.lock().await.contains_key(&key)) })
    }

    fn delete(&self, path: &str) -> BoxFuture<'_, ()> {
        let key = Self::key(path);
        let path = path.to_string();
        Box::pin(async move {
            self.entries
                .lock()
                .await
                .remove(&key)
                .map(|_| ())
                .ok_or_else(|| SyncError::not_found(path))
        })
    }

    fn read_symlink(&self, path: &str) -> BoxFuture<'_, String> {
        let key = Self::key(path);
        let path = path.to_string();
        Box::pin(async move {
            match self.entries.lock().await.get(&key) {
                Some(MemEntry::Symlink { target, .. }) => Ok(target.clone()),
                Some(MemEntry::File { .. }) => Err(SyncError::Io {
                    operation: "readlink",
                    path,
                    source: std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        "not a symlink",
                    ),
                }),
                None => Err(SyncError::not_found(path)),
            }
        })
    }

    fn create_symlink(&self, path: &str, target: &str) -> BoxFuture<'_, ()> {
        let key = Self::key(path);
        let target = target.to_string();
        Box::pin(async move {
            let mod_time_ms = self.next_time();
            self.entries.lock().await.insert(
                key,
                MemEntry::Symlink {
                    target,
                    mod_time_ms,
                },
            );
            Ok(())
        })
    }

    fn set_modified_time(&self, path: &str, mod_time_ms: i64) -> BoxFuture<'_, ()> {
        let key = Self::key(path);
        let path = path.to_string();
        Box::pin(async move {
            match self.entries.lock().await.get_mut(&key) {
                Some(entry) => {
                    entry.set_mod_time_ms(mod_time_ms);
                    Ok(())
                }
                None => Err(SyncError::not_found(path)),
            }
        })
    }
}
