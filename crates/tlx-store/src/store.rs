//! Directory-backed overflow store with capacity accounting.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;
use tlx_common::Transmission;
use tracing::{debug, info, warn};

use crate::entry::{decode_entry, encode_entry, EntryId, ENTRY_EXTENSION, TEMP_EXTENSION};
use crate::{Result, StoreError};

/// Point-in-time store usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub entries: u64,
    pub bytes: u64,
    pub capacity: u64,
}

#[derive(Debug, Default)]
struct Usage {
    entries: u64,
    bytes: u64,
    sequence: u64,
}

/// One directory, one file per persisted transmission.
///
/// The byte counter is the only shared mutable state. Space is reserved
/// under the lock before the file is written and released if the write
/// fails, so concurrent writers can never overshoot the capacity.
#[derive(Debug)]
pub struct DiskStore {
    dir: PathBuf,
    capacity: u64,
    usage: Mutex<Usage>,
}

impl DiskStore {
    /// Open (creating if needed) a store directory.
    ///
    /// Leftover temp files from an interrupted write are removed and usage
    /// is rebuilt from the entries found.
    pub fn open(dir: impl Into<PathBuf>, capacity: u64) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let mut usage = Usage::default();
        let mut stale = 0usize;
        let mut foreign = 0usize;
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            match path.extension().and_then(|e| e.to_str()) {
                Some(TEMP_EXTENSION) => {
                    if let Err(e) = fs::remove_file(&path) {
                        warn!(path = %path.display(), error = %e, "failed to remove stale temp file");
                    } else {
                        stale += 1;
                    }
                }
                Some(ENTRY_EXTENSION) if entry.file_type()?.is_file() => {
                    let named = entry.file_name().to_str().and_then(EntryId::from_file_name);
                    if named.is_none() {
                        // not listed by `oldest`, so not counted
                        warn!(path = %path.display(), "ignoring foreign file in overflow store");
                        foreign += 1;
                        continue;
                    }
                    usage.entries += 1;
                    usage.bytes += entry.metadata()?.len();
                }
                _ => {}
            }
        }

        info!(
            dir = %dir.display(),
            entries = usage.entries,
            bytes = usage.bytes,
            capacity,
            stale_temp_files = stale,
            foreign_files = foreign,
            "overflow store opened"
        );
        if usage.bytes > capacity {
            warn!(
                bytes = usage.bytes,
                capacity, "overflow store already above capacity, new writes will be rejected"
            );
        }

        Ok(DiskStore {
            dir,
            capacity,
            usage: Mutex::new(usage),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Write a transmission. Fails with `CapacityExceeded` instead of
    /// evicting older entries.
    pub fn persist(&self, transmission: &Transmission) -> Result<EntryId> {
        let bytes = encode_entry(transmission)?;
        let needed = bytes.len() as u64;

        let id = {
            let mut usage = self.lock();
            let available = self.capacity.saturating_sub(usage.bytes);
            if needed > available {
                return Err(StoreError::CapacityExceeded { needed, available });
            }
            usage.bytes += needed;
            usage.entries += 1;
            usage.sequence += 1;
            EntryId::for_transmission(transmission, usage.sequence)
        };

        if let Err(e) = self.write_entry(&id, &bytes) {
            let mut usage = self.lock();
            usage.bytes = usage.bytes.saturating_sub(needed);
            usage.entries = usage.entries.saturating_sub(1);
            return Err(e.into());
        }

        debug!(
            entry = %id,
            transmission_id = %transmission.id().short(),
            bytes = needed,
            "transmission persisted"
        );
        Ok(id)
    }

    /// Up to `limit` entry ids, oldest first, skipping `exclude`.
    pub fn oldest(&self, limit: usize, exclude: &HashSet<EntryId>) -> Result<Vec<EntryId>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut ids: Vec<EntryId> = fs::read_dir(&self.dir)?
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().to_str().and_then(EntryId::from_file_name))
            .filter(|id| !exclude.contains(id))
            .collect();
        ids.sort();
        ids.truncate(limit);
        Ok(ids)
    }

    /// Read an entry back.
    ///
    /// A `Corrupt` error means the file can never be replayed; callers
    /// should remove it.
    pub fn load(&self, id: &EntryId) -> Result<Transmission> {
        let bytes = fs::read(self.dir.join(id.file_name()))?;
        decode_entry(id.as_str(), &bytes)
    }

    /// Delete an entry. Returns false if it was already gone.
    pub fn remove(&self, id: &EntryId) -> Result<bool> {
        let path = self.dir.join(id.file_name());
        let len = match fs::metadata(&path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        }

        let mut usage = self.lock();
        usage.bytes = usage.bytes.saturating_sub(len);
        usage.entries = usage.entries.saturating_sub(1);
        Ok(true)
    }

    pub fn stats(&self) -> StoreStats {
        let usage = self.lock();
        StoreStats {
            entries: usage.entries,
            bytes: usage.bytes,
            capacity: self.capacity,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries == 0
    }

    fn write_entry(&self, id: &EntryId, bytes: &[u8]) -> io::Result<()> {
        let temp_path = self.dir.join(id.temp_file_name());
        let final_path = self.dir.join(id.file_name());

        let written = File::create(&temp_path).and_then(|mut file| {
            file.write_all(bytes)?;
            file.sync_all()
        });
        if let Err(e) = written.and_then(|()| atomic_rename(&temp_path, &final_path)) {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Usage> {
        self.usage.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Move a fully written temp file into place.
pub fn atomic_rename(temp_path: &Path, final_path: &Path) -> io::Result<()> {
    fs::rename(temp_path, final_path)
}
