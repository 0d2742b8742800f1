//! Session state machine.
//!
//! ```text
//! created ──► active ──close()──► closing ──SessionClose──► finalized
//!                │                                             ▲
//!                └──────────────destroy()──────────────────────┘
//! ```
//!
//! Finalization happens once. It snapshots the session's and its streams'
//! views, settles the pending-close future, ends every subscription and
//! removes the session from its endpoint.

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::datagram::DatagramPayload;
use crate::core::completion::{CloseOutcome, Closed, Completion};
use crate::core::error::{CloseError, QuicError, QuicResult};
use crate::core::traits::{SessionHandle, StreamHandle};
use crate::core::types::{Direction, Path, SessionCloseInfo, SessionKey, StreamId};
use crate::endpoint::{Endpoint, WeakEndpoint};
use crate::event::{
    DatagramEvent, DatagramStatusEvent, HandshakeEvent, Listeners, NativeEvent,
    PathValidationEvent, SessionEvent, SessionEventKind, SessionTicketEvent, StreamEvent,
    Subscription, VersionNegotiationEvent,
};
use crate::stats::{SessionState, SessionStats};
use crate::stream::{Stream, StreamKind};

struct SessionInner {
    handle: Option<Box<dyn SessionHandle>>,
    streams: Vec<Stream>,
    remote_address: Option<SocketAddr>,
    pending_close: bool,
}

impl SessionInner {
    fn is_closed_or_closing(&self) -> bool {
        self.handle.is_none() || self.pending_close
    }

    fn open_handle(&self) -> QuicResult<&dyn SessionHandle> {
        match &self.handle {
            Some(handle) if !self.pending_close => Ok(handle.as_ref()),
            _ => Err(QuicError::InvalidState("Session is closed")),
        }
    }
}

struct SessionShared {
    key: SessionKey,
    inner: Mutex<SessionInner>,
    endpoint: WeakEndpoint,
    stats: SessionStats,
    state: SessionState,
    completion: Completion,
    listeners: Listeners<SessionEventKind, SessionEvent>,
}

/// A QUIC session.
///
/// Cheap to clone; clones refer to the same session. The owning endpoint
/// keeps the session alive until it finalizes.
#[derive(Clone)]
pub struct Session {
    shared: Arc<SessionShared>,
}

/// Non-owning reference held by streams.
#[derive(Clone)]
pub(crate) struct WeakSession(Weak<SessionShared>);

impl WeakSession {
    pub(crate) fn upgrade(&self) -> Option<Session> {
        self.0.upgrade().map(|shared| Session { shared })
    }
}

impl Session {
    pub(crate) fn new(handle: Box<dyn SessionHandle>, endpoint: WeakEndpoint) -> Self {
        let key = handle.key();
        let stats = SessionStats::new(handle.stats());
        let state = SessionState::new(handle.state());

        let presence = state.clone();
        let listeners = Listeners::with_presence_hook(move |kind: SessionEventKind, present| {
            if let Some(slot) = kind.presence_slot() {
                presence.set_listener_flag(slot, present);
            }
        });

        Self {
            shared: Arc::new(SessionShared {
                key,
                inner: Mutex::new(SessionInner {
                    handle: Some(handle),
                    streams: Vec::new(),
                    remote_address: None,
                    pending_close: false,
                }),
                endpoint,
                stats,
                state,
                completion: Completion::new(),
                listeners,
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> WeakSession {
        WeakSession(Arc::downgrade(&self.shared))
    }

    /// Key of the session within its endpoint.
    pub fn key(&self) -> SessionKey {
        self.shared.key
    }

    /// Counters.
    pub fn stats(&self) -> &SessionStats {
        &self.shared.stats
    }

    /// Flags.
    pub fn state(&self) -> &SessionState {
        &self.shared.state
    }

    /// Owning endpoint, while it is alive.
    pub fn endpoint(&self) -> Option<Endpoint> {
        self.shared.endpoint.upgrade()
    }

    /// Whether the session finalized.
    pub fn is_destroyed(&self) -> bool {
        self.shared.inner.lock().handle.is_none()
    }

    /// Whether a graceful close is in progress.
    pub fn is_closing(&self) -> bool {
        self.shared.inner.lock().pending_close
    }

    /// Streams opened by either side, in creation order.
    pub fn streams(&self) -> Vec<Stream> {
        self.shared.inner.lock().streams.clone()
    }

    /// Local and remote address. `None` once closing.
    pub fn path(&self) -> Option<Path> {
        let remote = {
            let mut inner = self.shared.inner.lock();
            if inner.is_closed_or_closing() {
                return None;
            }
            if inner.remote_address.is_none() {
                inner.remote_address = inner
                    .handle
                    .as_ref()
                    .and_then(|handle| handle.remote_address());
            }
            inner.remote_address?
        };
        let local = self.endpoint()?.address()?;
        Some(Path { local, remote })
    }

    /// Open a bidirectional stream.
    pub fn open_bidirectional_stream(&self) -> QuicResult<Stream> {
        self.open_stream(Direction::Bidirectional)
    }

    /// Open a unidirectional (send-only) stream.
    pub fn open_unidirectional_stream(&self) -> QuicResult<Stream> {
        self.open_stream(Direction::Unidirectional)
    }

    fn open_stream(&self, direction: Direction) -> QuicResult<Stream> {
        let mut inner = self.shared.inner.lock();
        let handle = inner.open_handle()?;
        if !self.shared.state.is_stream_open_allowed() {
            return Err(QuicError::OpenStreamFailed);
        }
        let native = handle
            .open_stream(direction)
            .ok_or(QuicError::OpenStreamFailed)?;

        let stream = Stream::new(native, StreamKind::outbound(direction), self.downgrade());
        inner.streams.push(stream.clone());
        debug!(session = %self.key(), id = %stream.id(), ?direction, "stream opened");
        Ok(stream)
    }

    /// Send an unreliable datagram. Returns its id, which later appears in a
    /// [`SessionEvent::DatagramStatus`].
    pub fn send_datagram(&self, payload: impl Into<DatagramPayload>) -> QuicResult<u64> {
        let inner = self.shared.inner.lock();
        let handle = inner.open_handle()?;
        let id = handle.send_datagram(payload.into().into_bytes());
        trace!(session = %self.key(), id, "datagram queued");
        Ok(id)
    }

    /// Start a key update.
    pub fn update_key(&self) -> QuicResult<()> {
        let inner = self.shared.inner.lock();
        inner.open_handle()?.update_key();
        debug!(session = %self.key(), "key update started");
        Ok(())
    }

    /// Close gracefully once open streams end. Repeated calls return the
    /// same pending close.
    pub fn close(&self) -> Closed {
        let mut inner = self.shared.inner.lock();
        if !inner.is_closed_or_closing() {
            inner.pending_close = true;
            if let Some(handle) = &inner.handle {
                handle.graceful_close();
            }
            debug!(session = %self.key(), "session closing");
        }
        self.shared.completion.closed()
    }

    /// Pending close of this session.
    pub fn closed(&self) -> Closed {
        self.shared.completion.closed()
    }

    /// Tear down immediately.
    ///
    /// Every stream is destroyed and the session finalizes before this
    /// returns. The pending close rejects with `error` when one is given and
    /// resolves otherwise.
    pub fn destroy(&self, error: Option<CloseError>) {
        let (handle, streams) = {
            let mut inner = self.shared.inner.lock();
            let Some(handle) = inner.handle.take() else {
                return;
            };
            inner.pending_close = false;
            inner.remote_address = None;
            (handle, inner.streams.clone())
        };

        for stream in &streams {
            stream.destroy();
        }
        handle.destroy();
        drop(handle);

        self.freeze();
        self.finalize(error.map_or(Ok(()), Err));
    }

    /// Subscribe to events of `kind`.
    ///
    /// The first subscriber for datagrams, session tickets, path validation
    /// or version negotiation tells the engine to start producing them.
    pub fn subscribe(&self, kind: SessionEventKind) -> Subscription<SessionEvent> {
        self.shared.listeners.subscribe(kind)
    }

    /// Number of subscribers for `kind`.
    pub fn listener_count(&self, kind: SessionEventKind) -> usize {
        self.shared.listeners.count(kind)
    }

    // =========================================================================
    // NATIVE EVENTS
    // =========================================================================

    pub(crate) fn dispatch(&self, event: NativeEvent) {
        if self.is_destroyed() {
            trace!(session = %self.key(), kind = ?event.kind(), "event for destroyed session dropped");
            event.discard();
            return;
        }
        trace!(session = %self.key(), kind = ?event.kind(), "dispatch");

        match event {
            NativeEvent::SessionClose { info, .. } => self.finish_close(info),
            NativeEvent::SessionDatagram { payload, early, .. } => {
                self.emit(SessionEvent::Datagram(DatagramEvent::new(
                    self.clone(),
                    payload,
                    early,
                )));
            }
            NativeEvent::SessionDatagramStatus { id, status, .. } => {
                self.emit(SessionEvent::DatagramStatus(DatagramStatusEvent::new(
                    self.clone(),
                    id,
                    status,
                )));
            }
            NativeEvent::SessionHandshake { info, .. } => {
                debug!(session = %self.key(), alpn = %info.alpn, "handshake completed");
                self.emit(SessionEvent::Handshake(HandshakeEvent::new(self.clone(), info)));
            }
            NativeEvent::SessionPathValidation { info, .. } => {
                self.emit(SessionEvent::PathValidation(PathValidationEvent::new(
                    self.clone(),
                    info,
                )));
            }
            NativeEvent::SessionTicket { ticket, .. } => {
                self.emit(SessionEvent::SessionTicket(SessionTicketEvent::new(
                    self.clone(),
                    ticket,
                )));
            }
            NativeEvent::SessionVersionNegotiation { info, .. } => {
                debug!(session = %self.key(), version = info.version, "version negotiation");
                self.emit(SessionEvent::VersionNegotiation(VersionNegotiationEvent::new(
                    self.clone(),
                    info,
                )));
            }
            NativeEvent::StreamCreated {
                handle, direction, ..
            } => self.accept_stream(handle, direction),
            NativeEvent::StreamClose { stream, .. } => {
                if let Some(stream) = self.find_stream(stream) {
                    stream.finish_close();
                }
            }
            NativeEvent::StreamReset { stream, code, .. } => {
                if let Some(stream) = self.find_stream(stream) {
                    stream.record_reset(code);
                }
            }
            other @ (NativeEvent::EndpointClose { .. } | NativeEvent::SessionNew { .. }) => {
                trace!(session = %self.key(), kind = ?other.kind(), "not a session event");
                other.discard();
            }
        }
    }

    fn emit(&self, event: SessionEvent) {
        let kind = event.kind();
        let delivered = self.shared.listeners.emit(kind, event);
        trace!(session = %self.key(), %kind, delivered, "session event");
    }

    fn accept_stream(&self, handle: Box<dyn StreamHandle>, direction: Direction) {
        let stream = Stream::new(handle, StreamKind::inbound(direction), self.downgrade());
        self.shared.inner.lock().streams.push(stream.clone());
        debug!(session = %self.key(), id = %stream.id(), ?direction, "peer opened stream");
        self.emit(SessionEvent::Stream(StreamEvent::new(self.clone(), stream)));
    }

    fn find_stream(&self, id: StreamId) -> Option<Stream> {
        let inner = self.shared.inner.lock();
        inner
            .streams
            .iter()
            .find(|stream| !stream.is_destroyed() && stream.id() == id)
            .cloned()
    }

    fn finish_close(&self, info: SessionCloseInfo) {
        let streams = {
            let mut inner = self.shared.inner.lock();
            if inner.handle.take().is_none() {
                return;
            }
            inner.pending_close = false;
            inner.remote_address = None;
            inner.streams.clone()
        };

        for stream in &streams {
            stream.finish_close();
        }
        self.freeze();

        let outcome = if info.is_clean() {
            Ok(())
        } else {
            Err(CloseError::Session {
                kind: info.kind,
                code: info.code,
                reason: info.reason,
            })
        };
        self.finalize(outcome);
    }

    fn freeze(&self) {
        self.shared.stats.snapshot();
        self.shared.state.snapshot();
    }

    fn finalize(&self, outcome: CloseOutcome) {
        let clean = outcome.is_ok();
        self.shared.completion.settle(outcome);
        self.shared.listeners.close();
        if let Some(endpoint) = self.endpoint() {
            endpoint.remove_session(self.key());
        }
        debug!(session = %self.key(), clean, "session finalized");
    }
}

impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for Session {}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("key", &self.shared.key)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::config::{EndpointOptions, SessionOptions};
    use crate::core::constants::session_state;
    use crate::core::types::DatagramStatus;
    use crate::endpoint::testing::{Calls, FakeEngine};

    fn session() -> (FakeEngine, Endpoint, Session) {
        let engine = FakeEngine::default();
        let endpoint = Endpoint::new(&engine, EndpointOptions::default()).unwrap();
        let session = endpoint
            .connect("127.0.0.1:4433", SessionOptions::default())
            .unwrap();
        (engine, endpoint, session)
    }

    #[test]
    fn test_listener_presence_mirrored() {
        let (_engine, _endpoint, session) = session();
        assert!(!session.state().has_datagram_listener());

        let first = session.subscribe(SessionEventKind::Datagram);
        let second = session.subscribe(SessionEventKind::Datagram);
        let _tickets = session.subscribe(SessionEventKind::SessionTicket);
        assert!(session.state().has_datagram_listener());
        assert!(session.state().has_session_ticket_listener());
        assert_eq!(session.listener_count(SessionEventKind::Datagram), 2);

        drop(first);
        assert!(session.state().has_datagram_listener());
        drop(second);
        assert!(!session.state().has_datagram_listener());
        assert!(!session.state().has_path_validation_listener());
    }

    #[test]
    fn test_open_stream_gated_by_state() {
        let (engine, _endpoint, session) = session();
        let err = session.open_bidirectional_stream().unwrap_err();
        assert!(matches!(err, QuicError::OpenStreamFailed));
        assert_eq!(Calls::get(&engine.calls.open_stream), 0);

        // Allowed, but the engine declines.
        session.shared.state.set_listener_flag(session_state::STREAM_OPEN_ALLOWED, true);
        let err = session.open_unidirectional_stream().unwrap_err();
        assert!(err.is_operational());
        assert_eq!(Calls::get(&engine.calls.open_stream), 1);
    }

    #[test]
    fn test_text_and_binary_datagrams() {
        let (_engine, _endpoint, session) = session();
        let text = session.send_datagram("hello").unwrap();
        let binary = session.send_datagram(Bytes::from_static(b"hello")).unwrap();
        assert_eq!(binary, text + 1);
        assert_eq!(session.stats().bytes_sent(), 10);
    }

    #[test]
    fn test_closing_rejects_operations() {
        let (engine, _endpoint, session) = session();
        let closed = session.close();
        assert!(closed.same_as(&session.close()));
        assert_eq!(Calls::get(&engine.calls.graceful_close), 1);
        assert!(session.is_closing());
        assert!(session.update_key().unwrap_err().is_state_error());
        assert!(session.send_datagram("x").unwrap_err().is_state_error());
        assert!(session.open_bidirectional_stream().unwrap_err().is_state_error());
        assert!(session.path().is_none());
    }

    #[test]
    fn test_destroyed_session_drops_events() {
        let (engine, endpoint, session) = session();
        let mut statuses = session.subscribe(SessionEventKind::DatagramStatus);

        engine.post(NativeEvent::SessionDatagramStatus {
            session: session.key(),
            id: 1,
            status: DatagramStatus::Lost,
        });
        endpoint.process_events();
        assert!(matches!(
            statuses.try_recv(),
            Some(SessionEvent::DatagramStatus(event)) if event.status() == DatagramStatus::Lost
        ));

        session.destroy(None);
        assert_eq!(Calls::get(&engine.calls.destroy), 1);
        engine.post(NativeEvent::SessionDatagramStatus {
            session: session.key(),
            id: 2,
            status: DatagramStatus::Acknowledged,
        });
        engine.post(NativeEvent::SessionClose {
            session: session.key(),
            info: SessionCloseInfo::transport(1, "late"),
        });
        endpoint.process_events();
        assert!(statuses.try_recv().is_none());
        assert!(matches!(session.closed().outcome(), Some(Ok(()))));
    }

    #[test]
    fn test_path_uses_cached_remote() {
        let (_engine, _endpoint, session) = session();
        let path = session.path().unwrap();
        assert_eq!(path.local.port(), 4433);
        assert_eq!(path.remote.port(), 5544);
    }

    #[test]
    fn test_inbound_unidirectional_stream_is_read_only() {
        let (engine, endpoint, session) = session();
        let mut streams = session.subscribe(SessionEventKind::Stream);
        engine.post(NativeEvent::StreamCreated {
            session: session.key(),
            handle: engine.stream(StreamId(3)),
            direction: Direction::Unidirectional,
        });
        endpoint.process_events();

        let stream = match streams.try_recv() {
            Some(SessionEvent::Stream(event)) => event.stream().clone(),
            other => panic!("expected a stream event, got {other:?}"),
        };
        assert_eq!(stream.id(), StreamId(3));
        assert_eq!(stream.kind(), StreamKind::UnidirectionalInbound);
        assert!(stream.reader().is_some());
        assert!(stream.writer().is_none());
        assert_eq!(Calls::get(&engine.calls.attach_reader), 1);
        assert_eq!(session.streams().len(), 1);
    }

    #[test]
    fn test_stream_for_destroyed_session_is_destroyed() {
        let (engine, endpoint, session) = session();
        let mut streams = session.subscribe(SessionEventKind::Stream);
        session.destroy(None);

        // Straight to the session, and through the endpoint once the
        // session is gone from it.
        session.dispatch(NativeEvent::StreamCreated {
            session: session.key(),
            handle: engine.stream(StreamId(1)),
            direction: Direction::Bidirectional,
        });
        assert_eq!(Calls::get(&engine.calls.stream_destroy), 1);

        engine.post(NativeEvent::StreamCreated {
            session: session.key(),
            handle: engine.stream(StreamId(5)),
            direction: Direction::Bidirectional,
        });
        endpoint.process_events();
        assert_eq!(Calls::get(&engine.calls.stream_destroy), 2);

        assert_eq!(Calls::get(&engine.calls.attach_reader), 0);
        assert!(streams.try_recv().is_none());
        assert!(session.streams().is_empty());
    }
}
