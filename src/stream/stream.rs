//! Stream entity.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::channel::{HandleSlot, StreamReader, StreamWriter};
use crate::core::traits::StreamHandle;
use crate::core::types::{Direction, StreamId};
use crate::session::{Session, WeakSession};
use crate::stats::{StreamState, StreamStats};

/// Stream flavour as seen from this side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// Readable and writable.
    Bidirectional,
    /// Opened here: writable only.
    UnidirectionalOutbound,
    /// Opened by the peer: readable only.
    UnidirectionalInbound,
}

impl StreamKind {
    /// Native direction.
    pub fn direction(self) -> Direction {
        match self {
            StreamKind::Bidirectional => Direction::Bidirectional,
            StreamKind::UnidirectionalOutbound | StreamKind::UnidirectionalInbound => {
                Direction::Unidirectional
            }
        }
    }

    /// Whether this side reads.
    pub fn is_readable(self) -> bool {
        self != StreamKind::UnidirectionalOutbound
    }

    /// Whether this side writes.
    pub fn is_writable(self) -> bool {
        self != StreamKind::UnidirectionalInbound
    }

    pub(crate) fn inbound(direction: Direction) -> Self {
        match direction {
            Direction::Bidirectional => StreamKind::Bidirectional,
            Direction::Unidirectional => StreamKind::UnidirectionalInbound,
        }
    }

    pub(crate) fn outbound(direction: Direction) -> Self {
        match direction {
            Direction::Bidirectional => StreamKind::Bidirectional,
            Direction::Unidirectional => StreamKind::UnidirectionalOutbound,
        }
    }
}

struct StreamShared {
    kind: StreamKind,
    slot: Arc<HandleSlot>,
    session: WeakSession,
    stats: StreamStats,
    state: StreamState,
    reader: Option<StreamReader>,
    writer: Option<StreamWriter>,
    reset_code: Mutex<Option<u64>>,
}

/// A QUIC stream.
///
/// Streams have no close protocol of their own: they end when both sides
/// finish, when reset, or when their session goes away. Stats and state stay
/// readable afterwards.
#[derive(Clone)]
pub struct Stream {
    shared: Arc<StreamShared>,
}

impl Stream {
    pub(crate) fn new(handle: Box<dyn StreamHandle>, kind: StreamKind, session: WeakSession) -> Self {
        let stats = StreamStats::new(handle.stats());
        let state = StreamState::new(handle.state());

        let reader = kind.is_readable().then(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            handle.attach_reader(tx);
            StreamReader::new(rx)
        });
        let slot = Arc::new(Mutex::new(Some(handle)));
        let writer = kind
            .is_writable()
            .then(|| StreamWriter::new(Arc::clone(&slot)));

        let stream = Self {
            shared: Arc::new(StreamShared {
                kind,
                slot,
                session,
                stats,
                state,
                reader,
                writer,
                reset_code: Mutex::new(None),
            }),
        };
        trace!(id = %stream.id(), ?kind, "stream created");
        stream
    }

    /// Stream id.
    pub fn id(&self) -> StreamId {
        self.shared.state.id()
    }

    /// Flavour.
    pub fn kind(&self) -> StreamKind {
        self.shared.kind
    }

    /// Native direction.
    pub fn direction(&self) -> Direction {
        self.shared.kind.direction()
    }

    /// Owning session, while it is alive.
    pub fn session(&self) -> Option<Session> {
        self.shared.session.upgrade()
    }

    /// Counters.
    pub fn stats(&self) -> &StreamStats {
        &self.shared.stats
    }

    /// Flags.
    pub fn state(&self) -> &StreamState {
        &self.shared.state
    }

    /// Readable side. `None` for outbound unidirectional streams.
    pub fn reader(&self) -> Option<StreamReader> {
        self.shared.reader.clone()
    }

    /// Writable side. `None` for inbound unidirectional streams.
    pub fn writer(&self) -> Option<StreamWriter> {
        self.shared.writer.clone()
    }

    /// Whether the native stream is gone.
    pub fn is_destroyed(&self) -> bool {
        self.shared.slot.lock().is_none()
    }

    /// Application error code of a peer reset.
    pub fn reset_code(&self) -> Option<u64> {
        *self.shared.reset_code.lock()
    }

    pub(crate) fn record_reset(&self, code: u64) {
        debug!(id = %self.id(), code, "stream reset by peer");
        *self.shared.reset_code.lock() = Some(code);
    }

    /// Abrupt teardown driven by the session.
    pub(crate) fn destroy(&self) {
        let handle = self.shared.slot.lock().take();
        if let Some(handle) = handle {
            handle.destroy();
            self.freeze();
            trace!(id = %self.id(), "stream destroyed");
        }
    }

    /// The engine reported the stream finished.
    pub(crate) fn finish_close(&self) {
        if self.shared.slot.lock().take().is_some() {
            self.freeze();
            trace!(id = %self.id(), "stream closed");
        }
    }

    fn freeze(&self) {
        self.shared.stats.snapshot();
        self.shared.state.snapshot();
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.id())
            .field("kind", &self.shared.kind)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_sides() {
        assert!(StreamKind::Bidirectional.is_readable());
        assert!(StreamKind::Bidirectional.is_writable());
        assert!(!StreamKind::UnidirectionalOutbound.is_readable());
        assert!(!StreamKind::UnidirectionalInbound.is_writable());
        assert_eq!(
            StreamKind::inbound(Direction::Unidirectional),
            StreamKind::UnidirectionalInbound
        );
        assert_eq!(
            StreamKind::outbound(Direction::Unidirectional).direction(),
            Direction::Unidirectional
        );
    }
}
