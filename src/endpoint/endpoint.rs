//! Endpoint state machine and event dispatch.
//!
//! ```text
//! created ──listen()/connect()──► active ──close()/destroy()──► closing
//!                                                                  │
//!                                               EndpointClose ◄────┘
//!                                                     │
//!                                                 finalized
//! ```
//!
//! The engine posts [`NativeEvent`]s to a queue owned by the endpoint.
//! [`Endpoint::process_events`] drains it without blocking and
//! [`Endpoint::drive`] awaits it until the endpoint finalizes. Events are
//! routed here to the endpoint itself or to the session they name.

use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::config::{EndpointOptions, SessionOptions};
use crate::core::completion::{Closed, Completion};
use crate::core::error::{CloseError, QuicError, QuicResult};
use crate::core::traits::{Engine, EndpointHandle, SessionHandle};
use crate::core::types::{CloseContext, IntoSocketAddr, SessionKey};
use crate::event::{
    EndpointEvent, EndpointEventKind, Listeners, NativeEvent, NewSessionEvent, Subscription,
    Target,
};
use crate::session::Session;
use crate::stats::{EndpointState, EndpointStats};

struct EndpointInner {
    handle: Option<Box<dyn EndpointHandle>>,
    address: Option<SocketAddr>,
    busy: bool,
    listening: bool,
    pending_close: bool,
    pending_error: Option<CloseError>,
    sessions: BTreeMap<SessionKey, Session>,
}

impl EndpointInner {
    fn is_closed_or_closing(&self) -> bool {
        self.handle.is_none() || self.pending_close
    }

    fn open_handle(&self) -> QuicResult<&dyn EndpointHandle> {
        match &self.handle {
            Some(handle) if !self.pending_close => Ok(handle.as_ref()),
            _ => Err(QuicError::InvalidState("Endpoint is closed")),
        }
    }
}

struct EndpointShared {
    inner: Mutex<EndpointInner>,
    events: tokio::sync::Mutex<mpsc::UnboundedReceiver<NativeEvent>>,
    stats: EndpointStats,
    state: EndpointState,
    completion: Completion,
    listeners: Listeners<EndpointEventKind, EndpointEvent>,
}

impl Drop for EndpointShared {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if inner.pending_close {
            return;
        }
        if let Some(handle) = &inner.handle {
            handle.close_gracefully();
        }
    }
}

/// A QUIC endpoint.
///
/// Cheap to clone; clones refer to the same endpoint. Dropping the last
/// clone of an endpoint that was never closed starts a graceful close.
///
/// # Example
///
/// ```ignore
/// let network = LoopbackNetwork::new();
/// let server = Endpoint::new(&network, EndpointOptions::default())?;
/// server.listen(SessionOptions::default())?;
/// let mut incoming = server.subscribe();
/// ```
#[derive(Clone)]
pub struct Endpoint {
    shared: Arc<EndpointShared>,
}

/// Non-owning reference held by sessions.
#[derive(Clone)]
pub(crate) struct WeakEndpoint(Weak<EndpointShared>);

impl WeakEndpoint {
    pub(crate) fn upgrade(&self) -> Option<Endpoint> {
        self.0.upgrade().map(|shared| Endpoint { shared })
    }
}

impl Endpoint {
    /// Validate `options` and create the native endpoint.
    ///
    /// Invalid options fail before the engine is called.
    pub fn new<E: Engine + ?Sized>(engine: &E, options: EndpointOptions) -> QuicResult<Self> {
        options.validate()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let handle = engine.create_endpoint(&options, tx)?;
        let stats = EndpointStats::new(handle.stats());
        let state = EndpointState::new(handle.state());
        debug!(address = ?options.address, "endpoint created");

        Ok(Self {
            shared: Arc::new(EndpointShared {
                inner: Mutex::new(EndpointInner {
                    handle: Some(handle),
                    address: None,
                    busy: false,
                    listening: false,
                    pending_close: false,
                    pending_error: None,
                    sessions: BTreeMap::new(),
                }),
                events: tokio::sync::Mutex::new(rx),
                stats,
                state,
                completion: Completion::new(),
                listeners: Listeners::new(),
            }),
        })
    }

    pub(crate) fn downgrade(&self) -> WeakEndpoint {
        WeakEndpoint(Arc::downgrade(&self.shared))
    }

    /// Counters.
    pub fn stats(&self) -> &EndpointStats {
        &self.shared.stats
    }

    /// Flags.
    pub fn state(&self) -> &EndpointState {
        &self.shared.state
    }

    /// Bound local address. `None` before binding and once closing.
    pub fn address(&self) -> Option<SocketAddr> {
        let mut inner = self.shared.inner.lock();
        if inner.is_closed_or_closing() {
            return None;
        }
        if inner.address.is_none() {
            inner.address = inner.handle.as_ref().and_then(|handle| handle.address());
        }
        inner.address
    }

    /// Whether inbound sessions are refused.
    pub fn is_busy(&self) -> bool {
        self.shared.inner.lock().busy
    }

    /// Refuse (or accept again) inbound sessions. Setting the current
    /// value is a no-op.
    pub fn set_busy(&self, busy: bool) -> QuicResult<()> {
        let mut inner = self.shared.inner.lock();
        let handle = inner.open_handle()?;
        if inner.busy == busy {
            return Ok(());
        }
        handle.mark_busy(busy);
        inner.busy = busy;
        debug!(busy, "endpoint busy flag changed");
        Ok(())
    }

    /// Whether `listen()` succeeded.
    pub fn is_listening(&self) -> bool {
        self.shared.inner.lock().listening
    }

    /// Whether a close is in progress.
    pub fn is_closing(&self) -> bool {
        self.shared.inner.lock().pending_close
    }

    /// Whether the endpoint finalized.
    pub fn is_destroyed(&self) -> bool {
        self.shared.inner.lock().handle.is_none()
    }

    /// Live sessions in key order.
    pub fn sessions(&self) -> Vec<Session> {
        self.shared.inner.lock().sessions.values().cloned().collect()
    }

    /// Accept inbound sessions configured by `options`.
    pub fn listen(&self, options: SessionOptions) -> QuicResult<()> {
        let mut inner = self.shared.inner.lock();
        let handle = inner.open_handle()?;
        if inner.listening {
            return Err(QuicError::InvalidState("Endpoint is already listening"));
        }
        let config = options.to_config()?;
        handle.listen(&config)?;
        inner.listening = true;
        debug!(alpn = ?config.tls.alpn, "endpoint listening");
        Ok(())
    }

    /// Start a session to `address`.
    pub fn connect(
        &self,
        address: impl IntoSocketAddr,
        options: SessionOptions,
    ) -> QuicResult<Session> {
        let mut inner = self.shared.inner.lock();
        let handle = inner.open_handle()?;
        if inner.busy {
            return Err(QuicError::InvalidState("Endpoint is busy"));
        }
        let address = address.into_socket_addr()?;
        let config = options.to_config()?;

        let native = handle
            .connect(address, &config, options.session_ticket.as_deref())
            .ok_or(QuicError::ConnectionFailed)?;
        let session = Session::new(native, self.downgrade());
        inner.sessions.insert(session.key(), session.clone());
        debug!(%address, session = %session.key(), "session connecting");
        Ok(session)
    }

    /// Close gracefully once every session ended. Repeated calls return the
    /// same pending close.
    pub fn close(&self) -> Closed {
        let mut inner = self.shared.inner.lock();
        Self::begin_close(&mut inner);
        self.shared.completion.closed()
    }

    fn begin_close(inner: &mut EndpointInner) {
        if inner.is_closed_or_closing() {
            return;
        }
        inner.pending_close = true;
        inner.address = None;
        if let Some(handle) = &inner.handle {
            handle.close_gracefully();
        }
        debug!("endpoint closing");
    }

    /// Pending close of this endpoint.
    pub fn closed(&self) -> Closed {
        self.shared.completion.closed()
    }

    /// Close and destroy every session now.
    ///
    /// When `error` is given, the endpoint's and every session's pending
    /// close reject with it.
    pub fn destroy(&self, error: Option<CloseError>) {
        let sessions: Vec<Session> = {
            let mut inner = self.shared.inner.lock();
            if !inner.is_closed_or_closing() {
                inner.pending_error = error.clone();
            }
            Self::begin_close(&mut inner);
            inner.sessions.values().cloned().collect()
        };
        debug!(sessions = sessions.len(), "endpoint destroying sessions");
        for session in sessions {
            session.destroy(error.clone());
        }
    }

    /// Whether the endpoint keeps the hosting runtime alive.
    pub fn set_ref(&self, keep_alive: bool) {
        if let Some(handle) = &self.shared.inner.lock().handle {
            handle.set_ref(keep_alive);
        }
    }

    /// Subscribe to new inbound sessions.
    pub fn subscribe(&self) -> Subscription<EndpointEvent> {
        self.shared.listeners.subscribe(EndpointEventKind::Session)
    }

    // =========================================================================
    // EVENT LOOP
    // =========================================================================

    /// Dispatch queued engine events without waiting. Returns how many were
    /// dispatched.
    ///
    /// Stops right after an event that hands over a new session or stream,
    /// so the caller can subscribe to it before its own events are
    /// dispatched by the next call. Does nothing while
    /// [`drive`](Self::drive) runs elsewhere.
    pub fn process_events(&self) -> usize {
        let mut dispatched = 0;
        loop {
            let event = {
                let Ok(mut events) = self.shared.events.try_lock() else {
                    break;
                };
                match events.try_recv() {
                    Ok(event) => event,
                    Err(_) => break,
                }
            };
            let creates_entity = event.kind().creates_entity();
            self.dispatch(event);
            dispatched += 1;
            if creates_entity {
                break;
            }
        }
        dispatched
    }

    /// Dispatch engine events as they arrive until the endpoint finalizes.
    ///
    /// Yields to the runtime after handing over a new session or stream so
    /// the task receiving it can subscribe first.
    pub async fn drive(&self) {
        while !self.is_destroyed() {
            let event = self.shared.events.lock().await.recv().await;
            let Some(event) = event else {
                break;
            };
            let creates_entity = event.kind().creates_entity();
            self.dispatch(event);
            if creates_entity {
                tokio::task::yield_now().await;
            }
        }
    }

    fn dispatch(&self, event: NativeEvent) {
        match event.target() {
            Target::Endpoint => self.dispatch_own(event),
            Target::Session(key) | Target::Stream(key, _) => {
                let session = self.shared.inner.lock().sessions.get(&key).cloned();
                match session {
                    Some(session) => session.dispatch(event),
                    None => {
                        trace!(session = %key, kind = ?event.kind(), "event for unknown session dropped");
                        event.discard();
                    }
                }
            }
        }
    }

    fn dispatch_own(&self, event: NativeEvent) {
        trace!(kind = ?event.kind(), "dispatch");
        match event {
            NativeEvent::EndpointClose { context, status } => self.finish_close(context, status),
            NativeEvent::SessionNew { handle } => self.accept_session(handle),
            other => other.discard(),
        }
    }

    fn accept_session(&self, handle: Box<dyn SessionHandle>) {
        let session = {
            let mut inner = self.shared.inner.lock();
            if inner.handle.is_none() {
                drop(inner);
                trace!("session for finalized endpoint dropped");
                handle.destroy();
                return;
            }
            let session = Session::new(handle, self.downgrade());
            inner.sessions.insert(session.key(), session.clone());
            session
        };
        debug!(session = %session.key(), "session accepted");
        let delivered = self.shared.listeners.emit(
            EndpointEventKind::Session,
            EndpointEvent::Session(NewSessionEvent::new(session)),
        );
        trace!(delivered, "endpoint event");
    }

    pub(crate) fn remove_session(&self, key: SessionKey) {
        self.shared.inner.lock().sessions.remove(&key);
    }

    fn finish_close(&self, context: CloseContext, status: i32) {
        let (outcome, leftover) = {
            let mut inner = self.shared.inner.lock();
            let Some(handle) = inner.handle.take() else {
                return;
            };
            drop(handle);
            inner.pending_close = false;
            inner.address = None;
            inner.busy = false;
            inner.listening = false;
            let pending_error = inner.pending_error.take();
            let leftover = std::mem::take(&mut inner.sessions);

            self.shared.stats.snapshot();
            self.shared.state.snapshot();

            let outcome = match (context, pending_error) {
                (CloseContext::Close, None) => Ok(()),
                (CloseContext::Close, Some(error)) => Err(error),
                (context, _) => Err(CloseError::EndpointClosed { context, status }),
            };
            (outcome, leftover)
        };

        if context.is_failure() {
            warn!(%context, status, "endpoint closed on failure");
        }
        for session in leftover.into_values() {
            session.destroy(None);
        }

        let clean = outcome.is_ok();
        self.shared.completion.settle(outcome);
        self.shared.listeners.close();
        debug!(clean, "endpoint finalized");
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for Endpoint {}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.shared.inner.lock();
        f.debug_struct("Endpoint")
            .field("address", &inner.address)
            .field("listening", &inner.listening)
            .field("busy", &inner.busy)
            .field("sessions", &inner.sessions.len())
            .field("destroyed", &inner.handle.is_none())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{CloseErrorKind, SessionCloseInfo};
    use crate::endpoint::testing::{Calls, FakeEngine};

    fn endpoint() -> (FakeEngine, Endpoint) {
        let engine = FakeEngine::default();
        let endpoint = Endpoint::new(&engine, EndpointOptions::default()).unwrap();
        (engine, endpoint)
    }

    #[test]
    fn test_invalid_options_create_nothing() {
        let engine = FakeEngine::default();
        let options = EndpointOptions::from_json(r#"{"maxConnectionsPerHost": -1}"#);
        assert!(options.unwrap_err().is_argument_error());

        let options = EndpointOptions {
            rx_diagnostic_loss: Some(1.5),
            ..Default::default()
        };
        assert!(Endpoint::new(&engine, options).unwrap_err().is_range_error());
        assert_eq!(Calls::get(&engine.calls.created), 0);
    }

    #[test]
    fn test_close_is_idempotent() {
        let (engine, endpoint) = endpoint();
        let first = endpoint.close();
        let second = endpoint.close();
        assert!(first.same_as(&second));
        assert!(first.same_as(&endpoint.closed()));
        assert!(endpoint.is_closing());
        assert_eq!(Calls::get(&engine.calls.close_gracefully), 1);

        assert!(endpoint.listen(SessionOptions::default()).unwrap_err().is_state_error());
        assert!(endpoint.set_busy(true).unwrap_err().is_state_error());
        assert_eq!(Calls::get(&engine.calls.listen), 0);
    }

    #[test]
    fn test_finalization_settles_once() {
        let (engine, endpoint) = endpoint();
        let closed = endpoint.close();
        engine.post(NativeEvent::EndpointClose {
            context: CloseContext::Close,
            status: 0,
        });
        engine.post(NativeEvent::EndpointClose {
            context: CloseContext::ListenFailure,
            status: -1,
        });
        assert_eq!(endpoint.process_events(), 2);
        assert!(matches!(closed.outcome(), Some(Ok(()))));
        assert!(endpoint.is_destroyed());
        assert!(endpoint.stats().is_snapshot());
    }

    #[tokio::test]
    async fn test_failure_context_rejects() {
        let (engine, endpoint) = endpoint();
        engine.post(NativeEvent::EndpointClose {
            context: CloseContext::ReceiveFailure,
            status: -5,
        });
        endpoint.process_events();
        match endpoint.closed().await {
            Err(CloseError::EndpointClosed { context, status }) => {
                assert_eq!(context, CloseContext::ReceiveFailure);
                assert_eq!(status, -5);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_busy_toggle() {
        let (engine, endpoint) = endpoint();
        endpoint.set_busy(true).unwrap();
        endpoint.set_busy(true).unwrap();
        assert!(endpoint.is_busy());
        assert!(endpoint.state().is_busy());
        assert_eq!(Calls::get(&engine.calls.mark_busy), 1);

        let err = endpoint
            .connect("127.0.0.1:4433", SessionOptions::default())
            .unwrap_err();
        assert!(err.is_state_error());

        endpoint.set_busy(false).unwrap();
        assert!(endpoint.connect("127.0.0.1:4433", SessionOptions::default()).is_ok());
    }

    #[test]
    fn test_listen_once() {
        let (engine, endpoint) = endpoint();
        endpoint.listen(SessionOptions::default()).unwrap();
        assert!(endpoint.is_listening());
        assert!(endpoint.listen(SessionOptions::default()).is_err());
        assert_eq!(Calls::get(&engine.calls.listen), 1);
    }

    #[test]
    fn test_connect_rejects_bad_address() {
        let (_engine, endpoint) = endpoint();
        let err = endpoint
            .connect("not an address", SessionOptions::default())
            .unwrap_err();
        assert!(err.is_argument_error());
        assert!(endpoint.sessions().is_empty());
    }

    #[test]
    fn test_inbound_session_emitted() {
        let (engine, endpoint) = endpoint();
        endpoint.listen(SessionOptions::default()).unwrap();
        let mut incoming = endpoint.subscribe();

        engine.post(NativeEvent::SessionNew {
            handle: engine.session(),
        });
        endpoint.process_events();

        let Some(EndpointEvent::Session(event)) = incoming.try_recv() else {
            panic!("no session event");
        };
        assert_eq!(event.endpoint(), Some(endpoint.clone()));
        assert_eq!(endpoint.sessions(), vec![event.session().clone()]);
    }

    #[test]
    fn test_session_close_error_rejects() {
        let (engine, endpoint) = endpoint();
        let session = endpoint
            .connect("127.0.0.1:4433", SessionOptions::default())
            .unwrap();
        engine.post(NativeEvent::SessionClose {
            session: session.key(),
            info: SessionCloseInfo {
                kind: CloseErrorKind::Application,
                code: 7,
                reason: "bye".to_string(),
            },
        });
        endpoint.process_events();

        match session.closed().outcome() {
            Some(Err(CloseError::Session { kind, code, reason })) => {
                assert_eq!(kind, CloseErrorKind::Application);
                assert_eq!(code, 7);
                assert_eq!(reason, "bye");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(endpoint.sessions().is_empty());
    }

    #[test]
    fn test_destroy_cascades() {
        let (engine, endpoint) = endpoint();
        let a = endpoint.connect("127.0.0.1:4433", SessionOptions::default()).unwrap();
        let b = endpoint.connect("127.0.0.1:4433", SessionOptions::default()).unwrap();

        endpoint.destroy(None);
        assert_eq!(Calls::get(&engine.calls.destroy), 2);
        assert!(a.is_destroyed() && b.is_destroyed());
        assert!(matches!(a.closed().outcome(), Some(Ok(()))));
        assert!(endpoint.sessions().is_empty());
        assert!(!endpoint.closed().is_settled());

        engine.post(NativeEvent::EndpointClose {
            context: CloseContext::Close,
            status: 0,
        });
        endpoint.process_events();
        assert!(matches!(endpoint.closed().outcome(), Some(Ok(()))));
    }

    #[test]
    fn test_drop_closes_gracefully() {
        let engine = FakeEngine::default();
        drop(Endpoint::new(&engine, EndpointOptions::default()).unwrap());
        assert_eq!(Calls::get(&engine.calls.close_gracefully), 1);

        let endpoint = Endpoint::new(&engine, EndpointOptions::default()).unwrap();
        endpoint.close();
        drop(endpoint);
        assert_eq!(Calls::get(&engine.calls.close_gracefully), 2);
    }

    #[test]
    fn test_ref_forwarded_until_finalized() {
        let (engine, endpoint) = endpoint();
        endpoint.set_ref(false);
        endpoint.set_ref(true);
        assert_eq!(Calls::get(&engine.calls.set_ref), 2);

        engine.post(NativeEvent::EndpointClose {
            context: CloseContext::Close,
            status: 0,
        });
        endpoint.process_events();
        endpoint.set_ref(false);
        assert_eq!(Calls::get(&engine.calls.set_ref), 2);
    }
}
