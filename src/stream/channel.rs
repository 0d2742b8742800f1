//! Byte channels of a stream.
//!
//! Inbound data arrives as `Bytes` chunks on an unbounded channel fed by the
//! engine; the engine drops its sender at FIN. Outbound data goes straight to
//! the native stream.

use std::fmt;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::core::error::{QuicError, QuicResult};
use crate::core::traits::StreamHandle;

/// Native stream handle, shared by a stream and its writer. `None` once the
/// stream finalized.
pub(crate) type HandleSlot = Mutex<Option<Box<dyn StreamHandle>>>;

/// Readable side of a stream.
#[derive(Clone)]
pub struct StreamReader {
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Bytes>>>,
}

impl StreamReader {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<Bytes>) -> Self {
        Self {
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
        }
    }

    /// Next chunk. `None` at end of stream.
    pub async fn read(&self) -> Option<Bytes> {
        self.rx.lock().await.recv().await
    }

    /// Next chunk if one is buffered.
    pub fn try_read(&self) -> Option<Bytes> {
        self.rx.try_lock().ok()?.try_recv().ok()
    }

    /// Read until end of stream.
    pub async fn read_to_end(&self) -> Bytes {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.read().await {
            buf.extend_from_slice(&chunk);
        }
        buf.freeze()
    }
}

impl fmt::Debug for StreamReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamReader").finish_non_exhaustive()
    }
}

/// Writable side of a stream.
#[derive(Clone)]
pub struct StreamWriter {
    slot: Arc<HandleSlot>,
}

impl StreamWriter {
    pub(crate) fn new(slot: Arc<HandleSlot>) -> Self {
        Self { slot }
    }

    /// Queue `data` for sending.
    pub fn write(&self, data: impl Into<Bytes>) -> QuicResult<()> {
        let slot = self.slot.lock();
        let handle = slot
            .as_ref()
            .ok_or(QuicError::InvalidState("Stream is closed"))?;
        handle.write(data.into())
    }

    /// Send FIN. Further writes are rejected by the engine.
    pub fn finish(&self) -> QuicResult<()> {
        let slot = self.slot.lock();
        let handle = slot
            .as_ref()
            .ok_or(QuicError::InvalidState("Stream is closed"))?;
        handle.end_write();
        Ok(())
    }
}

impl fmt::Debug for StreamWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamWriter")
            .field("open", &self.slot.lock().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reader_collects_until_fin() {
        let (tx, rx) = mpsc::unbounded_channel();
        let reader = StreamReader::new(rx);
        tx.send(Bytes::from_static(b"hello ")).unwrap();
        tx.send(Bytes::from_static(b"world")).unwrap();
        drop(tx);

        assert_eq!(reader.read_to_end().await, Bytes::from_static(b"hello world"));
        assert!(reader.try_read().is_none());
    }

    #[test]
    fn test_writer_on_closed_stream() {
        let writer = StreamWriter::new(Arc::new(Mutex::new(None)));
        assert!(writer.write("data").unwrap_err().is_state_error());
        assert!(writer.finish().unwrap_err().is_state_error());
    }
}
