//! Per-request read cursor over a [`GrowingStore`].

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::{
    store::{GrowingStore, StoreError},
    types::ReadProgress,
};

/// Error types for session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Offset {offset} is beyond the end of the store ({size} bytes)")]
    OffsetOutOfRange { offset: u64, size: u64 },

    #[error("Session cancelled")]
    Cancelled,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A reader positioned independently of every other reader.
///
/// The cursor only lives here; the store is shared and never positioned.
#[derive(Debug)]
pub struct SessionReader {
    store: Arc<GrowingStore>,
    start: u64,
    offset: u64,
    emitted: u64,
    cancel: CancellationToken,
}

impl SessionReader {
    /// Start a session at `start`.
    ///
    /// `start` may equal the store's current size, which tails from "now".
    pub fn new(
        store: Arc<GrowingStore>,
        start: u64,
        cancel: CancellationToken,
    ) -> Result<Self, SessionError> {
        if store.is_closed() {
            return Err(StoreError::Closed.into());
        }

        let size = store.size();
        if start > size {
            return Err(SessionError::OffsetOutOfRange {
                offset: start,
                size,
            });
        }

        Ok(Self {
            store,
            start,
            offset: start,
            emitted: 0,
            cancel,
        })
    }

    /// Read the next bytes into `buf`.
    ///
    /// `done` is set once a read returns nothing and the cursor sits at the
    /// store's current size.
    pub fn next(&mut self, buf: &mut [u8]) -> Result<ReadProgress, SessionError> {
        if self.cancel.is_cancelled() {
            return Err(SessionError::Cancelled);
        }

        let (read, _) = self.store.read_at(self.offset, buf)?;
        self.offset += read as u64;
        self.emitted += read as u64;

        Ok(ReadProgress {
            read,
            done: read == 0 && self.store.size() == self.offset,
        })
    }

    /// Offset the next read starts at.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    /// Bytes handed out so far.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(session: &mut SessionReader, chunk: usize) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = vec![0u8; chunk];
        loop {
            let progress = session.next(&mut buf).unwrap();
            out.extend_from_slice(&buf[..progress.read]);
            if progress.done {
                return out;
            }
        }
    }

    #[test]
    fn test_reads_from_start_offset() {
        let store = GrowingStore::open(None).unwrap();
        store.append(b"hello world").unwrap();

        let mut session = SessionReader::new(store.clone(), 6, CancellationToken::new()).unwrap();
        assert_eq!(drain(&mut session, 4), b"world");
        assert_eq!(session.offset(), 11);
        assert_eq!(session.emitted(), 5);
        assert_eq!(session.start(), 6);
    }

    #[test]
    fn test_start_at_size_is_done_immediately() {
        let store = GrowingStore::open(None).unwrap();
        store.append(b"abc").unwrap();

        let mut session = SessionReader::new(store, 3, CancellationToken::new()).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(
            session.next(&mut buf).unwrap(),
            ReadProgress {
                read: 0,
                done: true
            }
        );
    }

    #[test]
    fn test_rejects_offset_past_end() {
        let store = GrowingStore::open(None).unwrap();
        store.append(b"abc").unwrap();

        let result = SessionReader::new(store, 4, CancellationToken::new());
        assert!(matches!(
            result,
            Err(SessionError::OffsetOutOfRange { offset: 4, size: 3 })
        ));
    }

    #[test]
    fn test_rejects_closed_store() {
        let store = GrowingStore::open(None).unwrap();
        store.close().unwrap();

        let result = SessionReader::new(store, 0, CancellationToken::new());
        assert!(matches!(
            result,
            Err(SessionError::Store(StoreError::Closed))
        ));
    }

    #[test]
    fn test_sessions_do_not_share_cursor() {
        let store = GrowingStore::open(None).unwrap();
        store.append(b"0123456789").unwrap();

        let mut a = SessionReader::new(store.clone(), 0, CancellationToken::new()).unwrap();
        let mut b = SessionReader::new(store.clone(), 5, CancellationToken::new()).unwrap();

        let mut out_a = Vec::new();
        let mut out_b = Vec::new();
        let mut buf = [0u8; 2];
        // Interleave the two readers chunk by chunk
        for _ in 0..5 {
            let p = a.next(&mut buf).unwrap();
            out_a.extend_from_slice(&buf[..p.read]);
            let p = b.next(&mut buf).unwrap();
            out_b.extend_from_slice(&buf[..p.read]);
        }

        assert_eq!(out_a, b"0123456789");
        assert_eq!(out_b, b"56789");
    }

    #[test]
    fn test_sees_bytes_appended_mid_session() {
        let store = GrowingStore::open(None).unwrap();
        store.append(b"hello").unwrap();

        let mut session = SessionReader::new(store.clone(), 0, CancellationToken::new()).unwrap();
        let mut buf = [0u8; 3];
        let first = session.next(&mut buf).unwrap();
        assert_eq!(&buf[..first.read], b"hel");

        store.append(b" again").unwrap();
        assert_eq!(drain(&mut session, 3), b"lo again");
    }

    #[test]
    fn test_cancelled_session_stops() {
        let store = GrowingStore::open(None).unwrap();
        store.append(b"data").unwrap();
        let cancel = CancellationToken::new();

        let mut session = SessionReader::new(store, 0, cancel.clone()).unwrap();
        cancel.cancel();

        let mut buf = [0u8; 4];
        assert!(session.is_cancelled());
        assert!(matches!(
            session.next(&mut buf),
            Err(SessionError::Cancelled)
        ));
        assert_eq!(session.offset(), 0);
    }
}
