//! Storage backends for the persistent cache.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use super::hash::CacheHash;

/// Opaque, content-addressed blob storage.
///
/// Implementations only need whole-blob atomicity: a `get` returns either a
/// blob that was `put` in full, or nothing. Integrity beyond that is checked
/// by the caller.
pub trait BlobStore: Send + Sync {
    fn get(&self, hash: CacheHash) -> io::Result<Option<Vec<u8>>>;
    fn put(&self, hash: CacheHash, blob: &[u8]) -> io::Result<()>;
    fn remove(&self, hash: CacheHash) -> io::Result<()>;
}

// ─── Memory ──────────────────────────────────────────────────────────────────

/// In-process store, mostly useful for tests and for sharing compiled
/// variants between devices in one process.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<FxHashMap<CacheHash, Vec<u8>>>,
}

impl MemoryBlobStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.blobs.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blobs.lock().is_empty()
    }

    /// Overwrites a stored blob in place, bypassing framing.
    pub fn tamper(&self, hash: CacheHash, f: impl FnOnce(&mut Vec<u8>)) -> bool {
        match self.blobs.lock().get_mut(&hash) {
            Some(blob) => {
                f(blob);
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn hashes(&self) -> Vec<CacheHash> {
        self.blobs.lock().keys().copied().collect()
    }
}

impl BlobStore for MemoryBlobStore {
    fn get(&self, hash: CacheHash) -> io::Result<Option<Vec<u8>>> {
        Ok(self.blobs.lock().get(&hash).cloned())
    }

    fn put(&self, hash: CacheHash, blob: &[u8]) -> io::Result<()> {
        self.blobs.lock().insert(hash, blob.to_vec());
        Ok(())
    }

    fn remove(&self, hash: CacheHash) -> io::Result<()> {
        self.blobs.lock().remove(&hash);
        Ok(())
    }
}

// ─── Directory ───────────────────────────────────────────────────────────────

/// One file per entry under `root/<first byte>/<hash>`.
///
/// Writes go to a uniquely named temporary file in the same directory and
/// are renamed into place, so readers never observe a partial blob.
pub struct DirectoryBlobStore {
    root: PathBuf,
    temp_counter: AtomicU64,
}

impl DirectoryBlobStore {
    /// Opens (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            temp_counter: AtomicU64::new(0),
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn path_for(&self, hash: CacheHash) -> PathBuf {
        self.root.join(hash.shard()).join(hash.to_string())
    }
}

impl BlobStore for DirectoryBlobStore {
    fn get(&self, hash: CacheHash) -> io::Result<Option<Vec<u8>>> {
        match fs::read(self.path_for(hash)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn put(&self, hash: CacheHash, blob: &[u8]) -> io::Result<()> {
        let path = self.path_for(hash);
        let dir = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(dir)?;

        let n = self.temp_counter.fetch_add(1, Ordering::Relaxed);
        let temp = dir.join(format!(".{hash}.{}.{n}.tmp", std::process::id()));
        let written = fs::File::create(&temp).and_then(|mut file| {
            file.write_all(blob)?;
            file.sync_all()
        });
        if let Err(err) = written.and_then(|()| fs::rename(&temp, &path)) {
            let _ = fs::remove_file(&temp);
            return Err(err);
        }
        Ok(())
    }

    fn remove(&self, hash: CacheHash) -> io::Result<()> {
        match fs::remove_file(self.path_for(hash)) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
            _ => Ok(()),
        }
    }
}
