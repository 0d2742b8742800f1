//! Loopback sessions: handshake, stream bookkeeping, datagrams and close.

use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use rand::Rng;
use tracing::{debug, trace};

use super::clock::now_ns;
use super::endpoint::EndpointCore;
use super::recovery::Recovery;
use super::stream::{LoopbackStream, StreamCore};
use crate::config::SessionConfig;
use crate::core::constants::{
    MAX_PAYLOAD_SIZE, PREFERRED_ADDRESS_USE, endpoint_stats, session_state, session_stats,
};
use crate::core::traits::{EventSink, SessionHandle, StreamHandle};
use crate::core::types::{
    DatagramStatus, Direction, Path, PathValidationResult, SessionCloseInfo, SessionKey, StreamId,
};
use crate::event::{HandshakeInfo, NativeEvent, PathValidationInfo, VersionNegotiationInfo};
use crate::stats::SharedBuffer;

/// Stream limit assumed when the peer does not advertise one.
const DEFAULT_MAX_STREAMS: u64 = 100;

/// VERSION_NEGOTIATION_ERROR transport error (RFC 9368).
const VERSION_NEGOTIATION_ERROR: u64 = 0x11;

/// Length of issued resumption tickets.
const TICKET_LEN: usize = 32;

const CIPHER_VERSION: &str = "TLSv1.3";

struct SessionCoreInner {
    remote: SocketAddr,
    peer: Weak<SessionCore>,
    peer_max_streams_bidi: u64,
    peer_max_streams_uni: u64,
    peer_max_datagram: u64,
    opened_bidi: u64,
    opened_uni: u64,
    streams: BTreeMap<StreamId, Arc<StreamCore>>,
    next_datagram_id: u64,
    key_phase: u64,
    recovery: Recovery,
    closing: bool,
    closed: bool,
}

/// Engine-side state of one session.
pub(crate) struct SessionCore {
    key: SessionKey,
    is_client: bool,
    local: SocketAddr,
    config: SessionConfig,
    endpoint: Weak<EndpointCore>,
    endpoint_stats: SharedBuffer,
    events: EventSink,
    latency: Duration,
    stats: SharedBuffer,
    state: SharedBuffer,
    inner: Mutex<SessionCoreInner>,
}

impl SessionCore {
    pub(crate) fn new(
        endpoint: &Arc<EndpointCore>,
        key: SessionKey,
        is_client: bool,
        local: SocketAddr,
        remote: SocketAddr,
        config: SessionConfig,
    ) -> Arc<Self> {
        let stats = SharedBuffer::new(session_stats::COUNT);
        stats.set(session_stats::CREATED_AT, now_ns());
        Arc::new(Self {
            key,
            is_client,
            local,
            config,
            endpoint: Arc::downgrade(endpoint),
            endpoint_stats: endpoint.stats().clone(),
            events: endpoint.sink(),
            latency: endpoint.network().latency(),
            stats,
            state: SharedBuffer::new(session_state::COUNT),
            inner: Mutex::new(SessionCoreInner {
                remote,
                peer: Weak::new(),
                peer_max_streams_bidi: DEFAULT_MAX_STREAMS,
                peer_max_streams_uni: DEFAULT_MAX_STREAMS,
                peer_max_datagram: MAX_PAYLOAD_SIZE,
                opened_bidi: 0,
                opened_uni: 0,
                streams: BTreeMap::new(),
                next_datagram_id: 0,
                key_phase: 0,
                recovery: Recovery::new(),
                closing: false,
                closed: false,
            }),
        })
    }

    pub(crate) fn key(&self) -> SessionKey {
        self.key
    }

    pub(crate) fn local(&self) -> SocketAddr {
        self.local
    }

    pub(crate) fn config(&self) -> &SessionConfig {
        &self.config
    }

    #[cfg(test)]
    pub(crate) fn key_phase(&self) -> u64 {
        self.inner.lock().key_phase
    }

    pub(crate) fn post(&self, event: NativeEvent) {
        if self.events.send(event).is_err() {
            trace!(session = %self.key, "session event queue gone");
        }
    }

    fn rtt(&self) -> Duration {
        self.latency * 2
    }

    /// Connect `client` and `server` and complete the handshake on both.
    pub(crate) fn pair(client: &Arc<Self>, server: &Arc<Self>, resumed: bool) {
        client.link(server);
        server.link(client);

        server.post(NativeEvent::SessionNew {
            handle: Box::new(LoopbackSession::new(Arc::clone(server))),
        });

        let info = HandshakeInfo {
            sni: client
                .config
                .tls
                .sni
                .clone()
                .unwrap_or_else(|| "localhost".to_string()),
            alpn: client
                .config
                .tls
                .alpn
                .clone()
                .or_else(|| server.config.tls.alpn.clone())
                .unwrap_or_default(),
            cipher: client
                .config
                .tls
                .ciphers
                .split(':')
                .next()
                .unwrap_or_default()
                .to_string(),
            cipher_version: CIPHER_VERSION.to_string(),
            validation_error_reason: None,
            validation_error_code: None,
            early_data_accepted: resumed,
        };
        server.complete_handshake(info.clone());
        client.complete_handshake(info);

        let mut ticket = vec![0u8; TICKET_LEN];
        rand::thread_rng().fill(&mut ticket[..]);
        client.post(NativeEvent::SessionTicket {
            session: client.key,
            ticket: Bytes::from(ticket),
        });

        if client.config.preferred_address_policy == PREFERRED_ADDRESS_USE {
            let params = &server.config.transport_params;
            let preferred = params
                .preferred_address_ipv4
                .map(SocketAddr::V4)
                .or_else(|| params.preferred_address_ipv6.map(SocketAddr::V6));
            if let Some(preferred) = preferred {
                client.migrate(preferred);
            }
        }
        debug!(client = %client.key, server = %server.key, "loopback handshake complete");
    }

    /// Move to the next key phase. The peer follows with the first packet
    /// it receives in the new phase.
    fn update_key(&self) {
        let peer = {
            let mut inner = self.inner.lock();
            if inner.closing || inner.closed {
                return;
            }
            inner.key_phase += 1;
            inner.peer.upgrade()
        };
        if let Some(peer) = peer {
            peer.inner.lock().key_phase += 1;
        }
        debug!(session = %self.key, "key updated");
    }

    fn link(&self, peer: &Arc<Self>) {
        let params = &peer.config.transport_params;
        let mut inner = self.inner.lock();
        inner.peer = Arc::downgrade(peer);
        inner.peer_max_streams_bidi = params.initial_max_streams_bidi.unwrap_or(DEFAULT_MAX_STREAMS);
        inner.peer_max_streams_uni = params.initial_max_streams_uni.unwrap_or(DEFAULT_MAX_STREAMS);
        inner.peer_max_datagram = params.max_datagram_frame_size.unwrap_or(MAX_PAYLOAD_SIZE);
    }

    fn complete_handshake(&self, info: HandshakeInfo) {
        let now = now_ns();
        self.stats.set(session_stats::HANDSHAKE_COMPLETED_AT, now);
        self.stats.set(session_stats::HANDSHAKE_CONFIRMED_AT, now);
        self.state.set_flag(session_state::HANDSHAKE_COMPLETED, true);
        self.state.set_flag(session_state::HANDSHAKE_CONFIRMED, true);
        self.state.set_flag(session_state::STREAM_OPEN_ALLOWED, true);
        {
            let mut inner = self.inner.lock();
            inner.recovery.on_ack(0, self.rtt());
            inner.recovery.write_to(&self.stats);
        }
        self.post(NativeEvent::SessionHandshake {
            session: self.key,
            info,
        });
    }

    fn migrate(&self, preferred: SocketAddr) {
        let old = {
            let mut inner = self.inner.lock();
            std::mem::replace(&mut inner.remote, preferred)
        };
        self.post(NativeEvent::SessionPathValidation {
            session: self.key,
            info: PathValidationInfo {
                result: PathValidationResult::Success,
                new_path: Path {
                    local: self.local,
                    remote: preferred,
                },
                old_path: Some(Path {
                    local: self.local,
                    remote: old,
                }),
                is_preferred_address: true,
            },
        });
    }

    /// The server turned the connection away.
    pub(crate) fn refuse(&self, info: SessionCloseInfo) {
        debug!(session = %self.key, code = info.code, reason = %info.reason, "connection refused");
        self.close_connection(info, false, true);
    }

    /// The server does not speak our version.
    pub(crate) fn negotiate_version(&self, supported: &[u32]) {
        self.post(NativeEvent::SessionVersionNegotiation {
            session: self.key,
            info: VersionNegotiationInfo {
                version: self.config.version,
                requested: vec![self.config.version, self.config.min_version],
                supported: supported.to_vec(),
            },
        });
        self.close_connection(
            SessionCloseInfo::transport(VERSION_NEGOTIATION_ERROR, "no supported version"),
            false,
            true,
        );
    }

    fn open_stream(self: &Arc<Self>, direction: Direction) -> Option<Arc<StreamCore>> {
        let (id, peer) = {
            let mut inner = self.inner.lock();
            if inner.closing || inner.closed {
                return None;
            }
            let opened = match direction {
                Direction::Bidirectional => {
                    if inner.opened_bidi >= inner.peer_max_streams_bidi {
                        return None;
                    }
                    inner.opened_bidi += 1;
                    inner.opened_bidi - 1
                }
                Direction::Unidirectional => {
                    if inner.opened_uni >= inner.peer_max_streams_uni {
                        return None;
                    }
                    inner.opened_uni += 1;
                    inner.opened_uni - 1
                }
            };
            (
                StreamId::first(self.is_client, direction).nth(opened),
                inner.peer.upgrade(),
            )
        };

        let bidirectional = direction == Direction::Bidirectional;
        let stream = StreamCore::new(self, id, bidirectional, true, self.events.clone());
        self.inner.lock().streams.insert(id, Arc::clone(&stream));
        self.stats.add(
            if bidirectional {
                session_stats::BIDI_OUT_STREAM_COUNT
            } else {
                session_stats::UNI_OUT_STREAM_COUNT
            },
            1,
        );

        if let Some(remote) = peer.and_then(|peer| peer.accept_stream(id, direction)) {
            StreamCore::link(&stream, &remote);
        }
        trace!(session = %self.key, stream = %id, "stream opened");
        Some(stream)
    }

    fn accept_stream(self: &Arc<Self>, id: StreamId, direction: Direction) -> Option<Arc<StreamCore>> {
        let bidirectional = direction == Direction::Bidirectional;
        let stream = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return None;
            }
            let stream = StreamCore::new(self, id, true, bidirectional, self.events.clone());
            inner.streams.insert(id, Arc::clone(&stream));
            stream
        };
        self.stats.add(
            if bidirectional {
                session_stats::BIDI_IN_STREAM_COUNT
            } else {
                session_stats::UNI_IN_STREAM_COUNT
            },
            1,
        );
        self.post(NativeEvent::StreamCreated {
            session: self.key,
            handle: Box::new(LoopbackStream::new(Arc::clone(&stream))),
            direction,
        });
        Some(stream)
    }

    pub(crate) fn remove_stream(&self, id: StreamId) {
        self.inner.lock().streams.remove(&id);
        self.maybe_finish_close();
    }

    pub(crate) fn on_sent(&self, bytes: u64) {
        self.stats.add(session_stats::BYTES_SENT, bytes);
        self.endpoint_stats.add(endpoint_stats::BYTES_SENT, bytes);
        self.endpoint_stats.add(endpoint_stats::PACKETS_SENT, 1);
    }

    pub(crate) fn on_received(&self, bytes: u64) {
        self.stats.add(session_stats::BYTES_RECEIVED, bytes);
        self.endpoint_stats.add(endpoint_stats::BYTES_RECEIVED, bytes);
        self.endpoint_stats.add(endpoint_stats::PACKETS_RECEIVED, 1);
    }

    pub(crate) fn on_acked(&self, bytes: u64) {
        let mut inner = self.inner.lock();
        inner.recovery.on_ack(bytes, self.rtt());
        inner.recovery.write_to(&self.stats);
    }

    fn send_datagram(&self, payload: Bytes) -> u64 {
        let (id, peer, max) = {
            let mut inner = self.inner.lock();
            inner.next_datagram_id += 1;
            (
                inner.next_datagram_id,
                inner.peer.upgrade(),
                inner.peer_max_datagram,
            )
        };
        self.state.set(session_state::LAST_DATAGRAM_ID, id);
        self.stats.add(session_stats::DATAGRAMS_SENT, 1);

        let len = payload.len() as u64;
        self.on_sent(len);
        let delivered = match peer {
            Some(peer) if len <= max => peer.receive_datagram(payload),
            _ => false,
        };
        let status = if delivered {
            self.stats.add(session_stats::DATAGRAMS_ACKNOWLEDGED, 1);
            self.on_acked(len);
            DatagramStatus::Acknowledged
        } else {
            self.stats.add(session_stats::DATAGRAMS_LOST, 1);
            let mut inner = self.inner.lock();
            inner.recovery.on_loss();
            inner.recovery.write_to(&self.stats);
            DatagramStatus::Lost
        };
        self.post(NativeEvent::SessionDatagramStatus {
            session: self.key,
            id,
            status,
        });
        id
    }

    fn receive_datagram(&self, payload: Bytes) -> bool {
        if self.inner.lock().closed {
            return false;
        }
        self.stats.add(session_stats::DATAGRAMS_RECEIVED, 1);
        self.on_received(payload.len() as u64);
        // Only surface the payload when someone listens for it.
        if self.state.flag(session_state::DATAGRAM) {
            self.post(NativeEvent::SessionDatagram {
                session: self.key,
                payload,
                early: false,
            });
        }
        true
    }

    fn graceful_close(&self) {
        {
            let mut inner = self.inner.lock();
            if inner.closing || inner.closed {
                return;
            }
            inner.closing = true;
        }
        let now = now_ns();
        self.stats.set(session_stats::CLOSING_AT, now);
        self.stats.set(session_stats::GRACEFUL_CLOSING_AT, now);
        self.state.set_flag(session_state::CLOSING, true);
        self.state.set_flag(session_state::GRACEFUL_CLOSE, true);
        self.state.set_flag(session_state::STREAM_OPEN_ALLOWED, false);
        self.maybe_finish_close();
    }

    fn maybe_finish_close(&self) {
        let done = {
            let inner = self.inner.lock();
            inner.closing && !inner.closed && inner.streams.is_empty()
        };
        if done {
            self.close_connection(SessionCloseInfo::clean(), true, true);
        }
    }

    /// Tear the connection down. `announce` posts our own SessionClose;
    /// `notify_peer` closes the other side cleanly.
    fn close_connection(&self, info: SessionCloseInfo, notify_peer: bool, announce: bool) {
        let (streams, peer) = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return;
            }
            inner.closed = true;
            (std::mem::take(&mut inner.streams), inner.peer.upgrade())
        };
        for stream in streams.values() {
            stream.abandon();
        }

        let now = now_ns();
        if self.stats.get(session_stats::CLOSING_AT) == 0 {
            self.stats.set(session_stats::CLOSING_AT, now);
        }
        self.stats.set(session_stats::DESTROYED_AT, now);
        self.state.set_flag(session_state::CLOSING, true);
        self.state.set_flag(session_state::STREAM_OPEN_ALLOWED, false);
        self.state.set_flag(session_state::DESTROYED, true);

        if announce {
            self.post(NativeEvent::SessionClose {
                session: self.key,
                info,
            });
        }
        if let Some(endpoint) = self.endpoint.upgrade() {
            endpoint.remove_session(self.key);
        }
        if notify_peer {
            if let Some(peer) = peer {
                peer.close_connection(SessionCloseInfo::clean(), false, true);
            }
        }
    }
}

impl fmt::Debug for SessionCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("SessionCore")
            .field("key", &self.key)
            .field("is_client", &self.is_client)
            .field("remote", &inner.remote)
            .field("streams", &inner.streams.len())
            .field("closing", &inner.closing)
            .field("closed", &inner.closed)
            .finish()
    }
}

/// [`SessionHandle`] of the loopback engine.
#[derive(Debug)]
pub(crate) struct LoopbackSession {
    core: Arc<SessionCore>,
}

impl LoopbackSession {
    pub(crate) fn new(core: Arc<SessionCore>) -> Self {
        Self { core }
    }
}

impl SessionHandle for LoopbackSession {
    fn key(&self) -> SessionKey {
        self.core.key
    }

    fn stats(&self) -> SharedBuffer {
        self.core.stats.clone()
    }

    fn state(&self) -> SharedBuffer {
        self.core.state.clone()
    }

    fn open_stream(&self, direction: Direction) -> Option<Box<dyn StreamHandle>> {
        let stream = self.core.open_stream(direction)?;
        Some(Box::new(LoopbackStream::new(stream)))
    }

    fn update_key(&self) {
        self.core.update_key();
    }

    fn graceful_close(&self) {
        self.core.graceful_close();
    }

    fn destroy(&self) {
        self.core.close_connection(SessionCloseInfo::clean(), true, false);
    }

    fn send_datagram(&self, payload: Bytes) -> u64 {
        self.core.send_datagram(payload)
    }

    fn remote_address(&self) -> Option<SocketAddr> {
        Some(self.core.inner.lock().remote)
    }
}
