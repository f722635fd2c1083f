//! Growing file store.
//!
//! A single backing file that only ever grows. Appends are serialized through
//! the write side of a lock that is held for one write call; reads are
//! positional and share the read side, so readers at different offsets never
//! disturb each other and no shared file cursor exists.

use std::{
    fs::{File, OpenOptions},
    io,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use parking_lot::RwLock;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::types::StoreOrigin;

/// Prefix of temporary store files.
const EPHEMERAL_PREFIX: &str = "shared_content_";
const EPHEMERAL_SUFFIX: &str = ".txt";

/// Error types for store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to create temporary file: {0}")]
    CreateTemp(#[source] io::Error),

    #[error("Failed to append {len} bytes: {source}")]
    Write {
        len: usize,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read at offset {offset}: {source}")]
    Read {
        offset: u64,
        #[source]
        source: io::Error,
    },

    #[error("Failed to close store: {0}")]
    Close(#[source] io::Error),

    #[error("Store is closed")]
    Closed,

    #[error("Offset {offset} is beyond the end of the store ({size} bytes)")]
    OffsetOutOfRange { offset: u64, size: u64 },
}

enum Backing {
    Named(File),
    Ephemeral(NamedTempFile),
}

impl Backing {
    fn file(&self) -> &File {
        match self {
            Backing::Named(file) => file,
            Backing::Ephemeral(temp) => temp.as_file(),
        }
    }

    fn close(self) -> io::Result<()> {
        match self {
            Backing::Named(file) => file.sync_all(),
            // Removes the file from disk
            Backing::Ephemeral(temp) => temp.close(),
        }
    }
}

/// Append-only byte store shared by the ingestor and every reader.
pub struct GrowingStore {
    origin: StoreOrigin,
    /// `None` once the store is closed
    backing: RwLock<Option<Backing>>,
    /// Published only after the bytes it covers are written
    size: AtomicU64,
}

impl GrowingStore {
    /// Open a store.
    ///
    /// With a path, the file is opened for reading and writing (created when
    /// missing, never truncated) and its current length becomes the initial
    /// size. Without one, or with an empty path, a temporary file is created
    /// and removed again when the store is closed.
    pub fn open(path: Option<&Path>) -> Result<Arc<Self>, StoreError> {
        let (origin, backing, size) = match path.filter(|p| !p.as_os_str().is_empty()) {
            Some(path) => {
                let file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .truncate(false)
                    .open(path)
                    .map_err(|source| StoreError::Open {
                        path: path.to_path_buf(),
                        source,
                    })?;
                let size = file
                    .metadata()
                    .map_err(|source| StoreError::Open {
                        path: path.to_path_buf(),
                        source,
                    })?
                    .len();
                info!(path = %path.display(), size, "Opened file");
                (
                    StoreOrigin::Named {
                        path: path.to_path_buf(),
                    },
                    Backing::Named(file),
                    size,
                )
            }
            None => {
                let temp = tempfile::Builder::new()
                    .prefix(EPHEMERAL_PREFIX)
                    .suffix(EPHEMERAL_SUFFIX)
                    .tempfile()
                    .map_err(StoreError::CreateTemp)?;
                let path = temp.path().to_path_buf();
                info!(path = %path.display(), "Created temporary file");
                (StoreOrigin::Ephemeral { path }, Backing::Ephemeral(temp), 0)
            }
        };

        Ok(Arc::new(Self {
            origin,
            backing: RwLock::new(Some(backing)),
            size: AtomicU64::new(size),
        }))
    }

    /// Where the store's bytes live.
    pub fn origin(&self) -> &StoreOrigin {
        &self.origin
    }

    /// Current size in bytes.
    ///
    /// Every byte below the returned size can be read.
    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.backing.read().is_none()
    }

    /// Append `buf` at the current end of the store.
    ///
    /// Returns the new size. The write lock is held for this call only.
    pub fn append(&self, buf: &[u8]) -> Result<u64, StoreError> {
        let guard = self.backing.write();
        let backing = guard.as_ref().ok_or(StoreError::Closed)?;

        let offset = self.size.load(Ordering::Acquire);
        if buf.is_empty() {
            return Ok(offset);
        }

        write_all_at(backing.file(), buf, offset).map_err(|source| StoreError::Write {
            len: buf.len(),
            source,
        })?;

        let new_size = offset + buf.len() as u64;
        self.size.store(new_size, Ordering::Release);
        debug!(bytes = buf.len(), size = new_size, "Appended to store");

        Ok(new_size)
    }

    /// Copy up to `buf.len()` bytes starting at `offset`.
    ///
    /// Returns the number of bytes copied and whether the read ended exactly
    /// at the store's size at the time of the call. Each call is
    /// self-contained: no cursor is moved and no prior positioning is needed.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(usize, bool), StoreError> {
        let guard = self.backing.read();
        let backing = guard.as_ref().ok_or(StoreError::Closed)?;

        let size = self.size.load(Ordering::Acquire);
        if offset > size {
            return Err(StoreError::OffsetOutOfRange { offset, size });
        }

        let available = usize::try_from(size - offset).map_or(buf.len(), |n| n.min(buf.len()));
        let read = read_full_at(backing.file(), &mut buf[..available], offset)
            .map_err(|source| StoreError::Read { offset, source })?;

        Ok((read, offset + read as u64 == size))
    }

    /// Release the backing file.
    ///
    /// Temporary stores are deleted. Every later operation fails with
    /// [`StoreError::Closed`].
    pub fn close(&self) -> Result<(), StoreError> {
        let backing = self.backing.write().take().ok_or(StoreError::Closed)?;
        backing.close().map_err(StoreError::Close)?;
        info!(origin = %self.origin, size = self.size(), "Closed store");
        Ok(())
    }
}

#[cfg(test)]
impl GrowingStore {
    /// Hold the write lock until the returned guard is dropped.
    pub(crate) fn lock_writes(&self) -> impl Sized + '_ {
        self.backing.write()
    }
}

impl std::fmt::Debug for GrowingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrowingStore")
            .field("origin", &self.origin)
            .field("size", &self.size())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(unix)]
fn pread(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, offset)
}

#[cfg(unix)]
fn pwrite(file: &File, buf: &[u8], offset: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.write_at(buf, offset)
}

#[cfg(windows)]
fn pread(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buf, offset)
}

#[cfg(windows)]
fn pwrite(file: &File, buf: &[u8], offset: u64) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_write(buf, offset)
}

fn write_all_at(file: &File, mut buf: &[u8], mut offset: u64) -> io::Result<()> {
    while !buf.is_empty() {
        match pwrite(file, buf, offset) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => {
                buf = &buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Fill `buf` from `offset`, stopping early only if the file is shorter.
fn read_full_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match pread(file, &mut buf[filled..], offset + filled as u64) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    fn read_all(store: &GrowingStore, offset: u64) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = [0u8; 3];
        let mut offset = offset;
        loop {
            let (n, reached_end) = store.read_at(offset, &mut buf).unwrap();
            out.extend_from_slice(&buf[..n]);
            offset += n as u64;
            if reached_end {
                return out;
            }
        }
    }

    #[test]
    fn test_ephemeral_store_starts_empty() {
        let store = GrowingStore::open(None).unwrap();
        assert!(store.origin().is_ephemeral());
        assert!(store.origin().path().exists());
        assert_eq!(store.size(), 0);

        let mut buf = [0u8; 8];
        assert_eq!(store.read_at(0, &mut buf).unwrap(), (0, true));
    }

    #[test]
    fn test_empty_path_is_ephemeral() {
        let store = GrowingStore::open(Some(Path::new(""))).unwrap();
        assert!(store.origin().is_ephemeral());
    }

    #[test]
    fn test_append_and_read_at() {
        let store = GrowingStore::open(None).unwrap();

        assert_eq!(store.append(b"hello world").unwrap(), 11);
        assert_eq!(store.size(), 11);

        let mut buf = [0u8; 5];
        assert_eq!(store.read_at(0, &mut buf).unwrap(), (5, false));
        assert_eq!(&buf, b"hello");

        let mut buf = [0u8; 16];
        let (n, reached_end) = store.read_at(6, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"world");
        assert!(reached_end);

        assert_eq!(read_all(&store, 0), b"hello world");
    }

    #[test]
    fn test_read_at_end_and_beyond() {
        let store = GrowingStore::open(None).unwrap();
        store.append(b"abc").unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(store.read_at(3, &mut buf).unwrap(), (0, true));
        assert!(matches!(
            store.read_at(4, &mut buf),
            Err(StoreError::OffsetOutOfRange { offset: 4, size: 3 })
        ));
    }

    #[test]
    fn test_empty_append_is_noop() {
        let store = GrowingStore::open(None).unwrap();
        store.append(b"abc").unwrap();
        assert_eq!(store.append(b"").unwrap(), 3);
        assert_eq!(store.size(), 3);
    }

    #[test]
    fn test_named_store_keeps_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("existing.log");
        std::fs::write(&path, b"line one\n").unwrap();

        let store = GrowingStore::open(Some(&path)).unwrap();
        assert!(!store.origin().is_ephemeral());
        assert_eq!(store.size(), 9);

        store.append(b"line two\n").unwrap();
        assert_eq!(read_all(&store, 0), b"line one\nline two\n");

        store.close().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"line one\nline two\n");
    }

    #[test]
    fn test_named_store_created_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("new.log");

        let store = GrowingStore::open(Some(&path)).unwrap();
        assert_eq!(store.size(), 0);
        assert!(path.exists());
    }

    #[test]
    fn test_open_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("file.log");

        assert!(matches!(
            GrowingStore::open(Some(&path)),
            Err(StoreError::Open { .. })
        ));
    }

    #[test]
    fn test_close() {
        let store = GrowingStore::open(None).unwrap();
        let path = store.origin().path().clone();
        store.append(b"data").unwrap();

        store.close().unwrap();
        assert!(store.is_closed());
        assert!(!path.exists(), "temporary store should be removed");

        let mut buf = [0u8; 4];
        assert!(matches!(
            store.read_at(0, &mut buf),
            Err(StoreError::Closed)
        ));
        assert!(matches!(store.append(b"more"), Err(StoreError::Closed)));
        assert!(matches!(store.close(), Err(StoreError::Closed)));
        assert_eq!(store.size(), 4);
    }

    #[test]
    fn test_concurrent_readers_and_writer() {
        let store = GrowingStore::open(None).unwrap();
        let pattern: Vec<u8> = (0..64 * 1024u32).map(|i| (i % 251) as u8).collect();

        thread::scope(|scope| {
            scope.spawn(|| {
                for chunk in pattern.chunks(1000) {
                    store.append(chunk).unwrap();
                }
            });

            for start in [0u64, 0, 17, 4096] {
                let store = &store;
                let pattern = &pattern;
                scope.spawn(move || {
                    // Wait until the start offset exists
                    while store.size() < start {
                        thread::yield_now();
                    }
                    let mut offset = start;
                    let mut buf = [0u8; 333];
                    while offset < pattern.len() as u64 {
                        let (n, _) = store.read_at(offset, &mut buf).unwrap();
                        let expected = &pattern[offset as usize..offset as usize + n];
                        assert_eq!(&buf[..n], expected, "mismatch at offset {offset}");
                        offset += n as u64;
                    }
                });
            }
        });

        assert_eq!(store.size(), pattern.len() as u64);
    }
}
