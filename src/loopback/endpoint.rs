//! Loopback endpoints.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use super::clock::now_ns;
use super::network::LoopbackNetwork;
use super::session::{LoopbackSession, SessionCore};
use crate::config::{EndpointOptions, SessionConfig};
use crate::core::constants::{QUIC_VERSION_1, QUIC_VERSION_2, endpoint_state, endpoint_stats};
use crate::core::error::QuicResult;
use crate::core::traits::{EndpointHandle, EventSink, SessionHandle};
use crate::core::types::{CloseContext, SessionCloseInfo, SessionKey};
use crate::event::NativeEvent;
use crate::stats::SharedBuffer;

/// Versions a loopback server accepts.
pub(crate) const SUPPORTED_VERSIONS: [u32; 2] = [QUIC_VERSION_1, QUIC_VERSION_2];

/// CONNECTION_REFUSED transport error (RFC 9000 section 20.1).
const CONNECTION_REFUSED: u64 = 0x2;

/// Why a server turned a client away.
enum Refusal {
    NoListener,
    Busy,
    Version,
}

struct EndpointCoreInner {
    address: Option<SocketAddr>,
    listen_config: Option<SessionConfig>,
    busy: bool,
    closing: bool,
    closed: bool,
    keep_alive: bool,
    sessions: HashMap<SessionKey, Arc<SessionCore>>,
}

/// Engine-side state of one endpoint.
pub(crate) struct EndpointCore {
    network: LoopbackNetwork,
    requested: Option<SocketAddr>,
    events: EventSink,
    stats: SharedBuffer,
    state: SharedBuffer,
    inner: Mutex<EndpointCoreInner>,
}

impl EndpointCore {
    pub(crate) fn new(
        network: LoopbackNetwork,
        options: &EndpointOptions,
        events: EventSink,
    ) -> Arc<Self> {
        let stats = SharedBuffer::new(endpoint_stats::COUNT);
        stats.set(endpoint_stats::CREATED_AT, now_ns());
        Arc::new(Self {
            network,
            requested: options.address,
            events,
            stats,
            state: SharedBuffer::new(endpoint_state::COUNT),
            inner: Mutex::new(EndpointCoreInner {
                address: None,
                listen_config: None,
                busy: false,
                closing: false,
                closed: false,
                keep_alive: true,
                sessions: HashMap::new(),
            }),
        })
    }

    pub(crate) fn post(&self, event: NativeEvent) {
        if self.events.send(event).is_err() {
            trace!("endpoint event queue gone");
        }
    }

    pub(crate) fn sink(&self) -> EventSink {
        self.events.clone()
    }

    pub(crate) fn stats(&self) -> &SharedBuffer {
        &self.stats
    }

    pub(crate) fn network(&self) -> &LoopbackNetwork {
        &self.network
    }

    /// Bind on first use. A failed bind closes the endpoint.
    fn ensure_bound(self: &Arc<Self>) -> Option<SocketAddr> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return None;
        }
        if let Some(address) = inner.address {
            return Some(address);
        }
        match self.network.bind(self.requested, self) {
            Ok(address) => {
                inner.address = Some(address);
                self.state.set_flag(endpoint_state::BOUND, true);
                self.state.set_flag(endpoint_state::RECEIVING, true);
                Some(address)
            }
            Err(status) => {
                inner.closed = true;
                drop(inner);
                warn!(requested = ?self.requested, status, "loopback bind failed");
                self.stats.set(endpoint_stats::DESTROYED_AT, now_ns());
                self.post(NativeEvent::EndpointClose {
                    context: CloseContext::BindFailure,
                    status,
                });
                None
            }
        }
    }

    fn listen(self: &Arc<Self>, config: &SessionConfig) {
        if self.ensure_bound().is_none() {
            return;
        }
        let mut inner = self.inner.lock();
        if inner.closing || inner.closed {
            return;
        }
        inner.listen_config = Some(config.clone());
        self.state.set_flag(endpoint_state::LISTENING, true);
        debug!(address = ?inner.address, "loopback listening");
    }

    fn connect(
        self: &Arc<Self>,
        address: SocketAddr,
        config: &SessionConfig,
        session_ticket: Option<&[u8]>,
    ) -> Option<Arc<SessionCore>> {
        let local = self.ensure_bound()?;
        let client = {
            let mut inner = self.inner.lock();
            if inner.closing || inner.closed {
                return None;
            }
            let key = self.network.next_key();
            let client = SessionCore::new(self, key, true, local, address, config.clone());
            inner.sessions.insert(key, Arc::clone(&client));
            client
        };
        self.stats.add(endpoint_stats::CLIENT_SESSIONS, 1);

        let resumed = session_ticket.is_some_and(|ticket| !ticket.is_empty());
        match self.network.lookup(address) {
            None => client.refuse(SessionCloseInfo::transport(
                CONNECTION_REFUSED,
                "no endpoint at address",
            )),
            Some(server) => match server.accept(&client) {
                Ok(accepted) => SessionCore::pair(&client, &accepted, resumed),
                Err(Refusal::NoListener) => client.refuse(SessionCloseInfo::transport(
                    CONNECTION_REFUSED,
                    "endpoint is not listening",
                )),
                Err(Refusal::Busy) => client.refuse(SessionCloseInfo::transport(
                    CONNECTION_REFUSED,
                    "server busy",
                )),
                Err(Refusal::Version) => client.negotiate_version(&SUPPORTED_VERSIONS),
            },
        }
        Some(client)
    }

    /// Server side of a connection attempt.
    fn accept(self: &Arc<Self>, client: &Arc<SessionCore>) -> Result<Arc<SessionCore>, Refusal> {
        let mut inner = self.inner.lock();
        if inner.closing || inner.closed {
            return Err(Refusal::NoListener);
        }
        let (Some(config), Some(local)) = (inner.listen_config.clone(), inner.address) else {
            return Err(Refusal::NoListener);
        };
        if inner.busy {
            self.stats.add(endpoint_stats::SERVER_BUSY_COUNT, 1);
            return Err(Refusal::Busy);
        }
        if !SUPPORTED_VERSIONS.contains(&client.config().version) {
            self.stats.add(endpoint_stats::VERSION_NEGOTIATION_COUNT, 1);
            return Err(Refusal::Version);
        }

        let key = self.network.next_key();
        let server = SessionCore::new(self, key, false, local, client.local(), config);
        inner.sessions.insert(key, Arc::clone(&server));
        drop(inner);

        self.stats.add(endpoint_stats::SERVER_SESSIONS, 1);
        Ok(server)
    }

    fn mark_busy(&self, busy: bool) {
        self.inner.lock().busy = busy;
        self.state.set_flag(endpoint_state::BUSY, busy);
    }

    fn close_gracefully(&self) {
        {
            let mut inner = self.inner.lock();
            if inner.closing || inner.closed {
                return;
            }
            inner.closing = true;
            inner.listen_config = None;
        }
        self.state.set_flag(endpoint_state::CLOSING, true);
        self.state.set_flag(endpoint_state::LISTENING, false);
        self.maybe_finish_close();
    }

    #[cfg(test)]
    pub(crate) fn session(&self, key: SessionKey) -> Option<Arc<SessionCore>> {
        self.inner.lock().sessions.get(&key).cloned()
    }

    pub(crate) fn remove_session(&self, key: SessionKey) {
        self.inner.lock().sessions.remove(&key);
        self.maybe_finish_close();
    }

    fn maybe_finish_close(&self) {
        let address = {
            let mut inner = self.inner.lock();
            if !inner.closing || inner.closed || !inner.sessions.is_empty() {
                return;
            }
            inner.closed = true;
            inner.address.take()
        };
        if let Some(address) = address {
            self.network.unbind(address);
        }
        self.state.set_flag(endpoint_state::BOUND, false);
        self.state.set_flag(endpoint_state::RECEIVING, false);
        self.stats.set(endpoint_stats::DESTROYED_AT, now_ns());
        debug!(?address, "loopback endpoint closed");
        self.post(NativeEvent::EndpointClose {
            context: CloseContext::Close,
            status: 0,
        });
    }
}

impl fmt::Debug for EndpointCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("EndpointCore")
            .field("address", &inner.address)
            .field("sessions", &inner.sessions.len())
            .field("closing", &inner.closing)
            .field("closed", &inner.closed)
            .field("keep_alive", &inner.keep_alive)
            .finish()
    }
}

/// [`EndpointHandle`] of the loopback engine.
#[derive(Debug)]
pub(crate) struct LoopbackEndpoint {
    core: Arc<EndpointCore>,
}

impl LoopbackEndpoint {
    pub(crate) fn new(core: Arc<EndpointCore>) -> Self {
        Self { core }
    }
}

impl EndpointHandle for LoopbackEndpoint {
    fn stats(&self) -> SharedBuffer {
        self.core.stats.clone()
    }

    fn state(&self) -> SharedBuffer {
        self.core.state.clone()
    }

    fn address(&self) -> Option<SocketAddr> {
        self.core.inner.lock().address
    }

    fn mark_busy(&self, busy: bool) {
        self.core.mark_busy(busy);
    }

    fn listen(&self, config: &SessionConfig) -> QuicResult<()> {
        self.core.listen(config);
        Ok(())
    }

    fn connect(
        &self,
        address: SocketAddr,
        config: &SessionConfig,
        session_ticket: Option<&[u8]>,
    ) -> Option<Box<dyn SessionHandle>> {
        let session = self.core.connect(address, config, session_ticket)?;
        Some(Box::new(LoopbackSession::new(session)))
    }

    fn close_gracefully(&self) {
        self.core.close_gracefully();
    }

    fn set_ref(&self, keep_alive: bool) {
        self.core.inner.lock().keep_alive = keep_alive;
    }
}
