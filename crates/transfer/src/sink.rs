//! Shared append-only byte buffer with a one-way seal.

use std::sync::{Arc, Mutex, MutexGuard};

use bytes::{Bytes, BytesMut};

use crate::error::SinkSealed;

/// Ordered, append-only bytes shared between a producer task and the
/// coordinator.
///
/// Once [`seal`](Self::seal) returns, no append can succeed, so the returned
/// length is a safe resume point.
#[derive(Debug, Clone, Default)]
pub struct ByteSink {
    inner: Arc<Mutex<SinkState>>,
}

#[derive(Debug, Default)]
struct SinkState {
    buf: BytesMut,
    sealed: bool,
    expected_len: Option<u64>,
}

impl ByteSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SinkState> {
        // The state stays consistent across a panicking holder: every
        // mutation is a single append or flag write.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Appends `chunk` and returns the new length.
    pub fn append(&self, chunk: &[u8]) -> Result<u64, SinkSealed> {
        let mut state = self.lock();
        if state.sealed {
            return Err(SinkSealed {
                len: state.buf.len() as u64,
            });
        }
        state.buf.extend_from_slice(chunk);
        Ok(state.buf.len() as u64)
    }

    /// Closes the sink to further appends and returns its final length.
    ///
    /// Sealing twice returns the same length.
    pub fn seal(&self) -> u64 {
        let mut state = self.lock();
        state.sealed = true;
        state.buf.len() as u64
    }

    pub fn len(&self) -> u64 {
        self.lock().buf.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.lock().buf.is_empty()
    }

    pub fn is_sealed(&self) -> bool {
        self.lock().sealed
    }

    /// Records the resource size announced by the response.
    pub fn set_expected_len(&self, len: u64) {
        self.lock().expected_len = Some(len);
    }

    pub fn expected_len(&self) -> Option<u64> {
        self.lock().expected_len
    }

    /// Copies the current contents.
    pub fn bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.lock().buf)
    }
}
