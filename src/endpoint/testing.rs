//! Recording engine for unit tests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::config::{EndpointOptions, SessionConfig};
use crate::core::constants::{
    endpoint_state, endpoint_stats, session_state, session_stats, stream_state, stream_stats,
};
use crate::core::error::{QuicError, QuicResult};
use crate::core::traits::{Engine, EndpointHandle, EventSink, SessionHandle, StreamHandle};
use crate::core::types::{Direction, SessionKey, StreamId};
use crate::event::NativeEvent;
use crate::stats::SharedBuffer;

/// Native calls seen so far.
#[derive(Debug, Default)]
pub(crate) struct Calls {
    pub(crate) created: AtomicUsize,
    pub(crate) listen: AtomicUsize,
    pub(crate) mark_busy: AtomicUsize,
    pub(crate) close_gracefully: AtomicUsize,
    pub(crate) open_stream: AtomicUsize,
    pub(crate) graceful_close: AtomicUsize,
    pub(crate) destroy: AtomicUsize,
    pub(crate) set_ref: AtomicUsize,
    pub(crate) attach_reader: AtomicUsize,
    pub(crate) stream_destroy: AtomicUsize,
    next_key: AtomicU64,
}

impl Calls {
    pub(crate) fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Clone, Default)]
pub(crate) struct FakeEngine {
    pub(crate) calls: Arc<Calls>,
    sink: Arc<Mutex<Option<EventSink>>>,
}

impl FakeEngine {
    /// Post a native event as the engine would.
    pub(crate) fn post(&self, event: NativeEvent) {
        if let Some(sink) = &*self.sink.lock() {
            sink.send(event).unwrap();
        }
    }

    /// Handle for an inbound session.
    pub(crate) fn session(&self) -> Box<dyn SessionHandle> {
        Box::new(FakeSession::new(Arc::clone(&self.calls)))
    }

    /// Handle for an inbound stream.
    pub(crate) fn stream(&self, id: StreamId) -> Box<dyn StreamHandle> {
        let state = SharedBuffer::new(stream_state::COUNT);
        state.set(stream_state::ID, id.0);
        Box::new(FakeStream {
            calls: Arc::clone(&self.calls),
            stats: SharedBuffer::new(stream_stats::COUNT),
            state,
        })
    }
}

impl Engine for FakeEngine {
    fn create_endpoint(
        &self,
        _options: &EndpointOptions,
        events: EventSink,
    ) -> QuicResult<Box<dyn EndpointHandle>> {
        Calls::bump(&self.calls.created);
        *self.sink.lock() = Some(events);
        Ok(Box::new(FakeEndpoint {
            calls: Arc::clone(&self.calls),
            stats: SharedBuffer::new(endpoint_stats::COUNT),
            state: SharedBuffer::new(endpoint_state::COUNT),
        }))
    }
}

#[derive(Debug)]
struct FakeEndpoint {
    calls: Arc<Calls>,
    stats: SharedBuffer,
    state: SharedBuffer,
}

impl EndpointHandle for FakeEndpoint {
    fn stats(&self) -> SharedBuffer {
        self.stats.clone()
    }

    fn state(&self) -> SharedBuffer {
        self.state.clone()
    }

    fn address(&self) -> Option<SocketAddr> {
        Some(SocketAddr::from(([127, 0, 0, 1], 4433)))
    }

    fn mark_busy(&self, busy: bool) {
        Calls::bump(&self.calls.mark_busy);
        self.state.set_flag(endpoint_state::BUSY, busy);
    }

    fn listen(&self, _config: &SessionConfig) -> QuicResult<()> {
        Calls::bump(&self.calls.listen);
        self.state.set_flag(endpoint_state::LISTENING, true);
        Ok(())
    }

    fn connect(
        &self,
        _address: SocketAddr,
        _config: &SessionConfig,
        _session_ticket: Option<&[u8]>,
    ) -> Option<Box<dyn SessionHandle>> {
        Some(Box::new(FakeSession::new(Arc::clone(&self.calls))))
    }

    fn close_gracefully(&self) {
        Calls::bump(&self.calls.close_gracefully);
    }

    fn set_ref(&self, _keep_alive: bool) {
        Calls::bump(&self.calls.set_ref);
    }
}

#[derive(Debug)]
struct FakeSession {
    key: SessionKey,
    calls: Arc<Calls>,
    stats: SharedBuffer,
    state: SharedBuffer,
}

impl FakeSession {
    fn new(calls: Arc<Calls>) -> Self {
        let key = SessionKey(calls.next_key.fetch_add(1, Ordering::SeqCst) + 1);
        Self {
            key,
            calls,
            stats: SharedBuffer::new(session_stats::COUNT),
            state: SharedBuffer::new(session_state::COUNT),
        }
    }
}

impl SessionHandle for FakeSession {
    fn key(&self) -> SessionKey {
        self.key
    }

    fn stats(&self) -> SharedBuffer {
        self.stats.clone()
    }

    fn state(&self) -> SharedBuffer {
        self.state.clone()
    }

    fn open_stream(&self, _direction: Direction) -> Option<Box<dyn StreamHandle>> {
        Calls::bump(&self.calls.open_stream);
        None
    }

    fn update_key(&self) {}

    fn graceful_close(&self) {
        Calls::bump(&self.calls.graceful_close);
    }

    fn destroy(&self) {
        Calls::bump(&self.calls.destroy);
    }

    fn send_datagram(&self, payload: Bytes) -> u64 {
        self.stats.add(session_stats::DATAGRAMS_SENT, 1);
        self.stats.add(session_stats::BYTES_SENT, payload.len() as u64);
        self.stats.get(session_stats::DATAGRAMS_SENT)
    }

    fn remote_address(&self) -> Option<SocketAddr> {
        Some(SocketAddr::from(([127, 0, 0, 1], 5544)))
    }
}

#[derive(Debug)]
struct FakeStream {
    calls: Arc<Calls>,
    stats: SharedBuffer,
    state: SharedBuffer,
}

impl StreamHandle for FakeStream {
    fn stats(&self) -> SharedBuffer {
        self.stats.clone()
    }

    fn state(&self) -> SharedBuffer {
        self.state.clone()
    }

    fn attach_reader(&self, _sink: mpsc::UnboundedSender<Bytes>) {
        Calls::bump(&self.calls.attach_reader);
    }

    fn write(&self, _data: Bytes) -> QuicResult<()> {
        Err(QuicError::InvalidState("Stream is not writable"))
    }

    fn end_write(&self) {}

    fn destroy(&self) {
        Calls::bump(&self.calls.stream_destroy);
    }
}
