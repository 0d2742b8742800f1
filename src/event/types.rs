//! Typed events delivered to subscribers.
//!
//! Events are immutable snapshots of one notification. They carry the
//! entity they concern so a subscriber needs no other context.

use std::fmt;

use bytes::Bytes;

use super::native::{HandshakeInfo, PathValidationInfo, VersionNegotiationInfo};
use crate::core::constants::session_state;
use crate::core::types::{DatagramStatus, Path, PathValidationResult};
use crate::endpoint::Endpoint;
use crate::session::Session;
use crate::stream::Stream;

// =============================================================================
// ENDPOINT EVENTS
// =============================================================================

/// A peer opened a session.
#[derive(Debug, Clone)]
pub struct NewSessionEvent {
    session: Session,
}

impl NewSessionEvent {
    pub(crate) fn new(session: Session) -> Self {
        Self { session }
    }

    /// The new session.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The endpoint that accepted it.
    pub fn endpoint(&self) -> Option<Endpoint> {
        self.session.endpoint()
    }
}

/// Event delivered to endpoint subscribers.
#[derive(Debug, Clone)]
pub enum EndpointEvent {
    /// A peer opened a session.
    Session(NewSessionEvent),
}

impl EndpointEvent {
    /// Kind, for subscription filtering.
    pub fn kind(&self) -> EndpointEventKind {
        match self {
            EndpointEvent::Session(_) => EndpointEventKind::Session,
        }
    }
}

/// Kinds of [`EndpointEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointEventKind {
    /// [`EndpointEvent::Session`].
    Session,
}

// =============================================================================
// SESSION EVENTS
// =============================================================================

/// The peer opened a stream.
#[derive(Debug, Clone)]
pub struct StreamEvent {
    session: Session,
    stream: Stream,
}

impl StreamEvent {
    pub(crate) fn new(session: Session, stream: Stream) -> Self {
        Self { session, stream }
    }

    /// Owning session.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The new stream.
    pub fn stream(&self) -> &Stream {
        &self.stream
    }
}

/// A datagram arrived.
#[derive(Debug, Clone)]
pub struct DatagramEvent {
    session: Session,
    payload: Bytes,
    early: bool,
}

impl DatagramEvent {
    pub(crate) fn new(session: Session, payload: Bytes, early: bool) -> Self {
        Self {
            session,
            payload,
            early,
        }
    }

    /// Receiving session.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Payload.
    pub fn datagram(&self) -> &Bytes {
        &self.payload
    }

    /// Received as 0-RTT data.
    pub fn early(&self) -> bool {
        self.early
    }
}

/// A sent datagram was acknowledged or lost.
#[derive(Debug, Clone)]
pub struct DatagramStatusEvent {
    session: Session,
    id: u64,
    status: DatagramStatus,
}

impl DatagramStatusEvent {
    pub(crate) fn new(session: Session, id: u64, status: DatagramStatus) -> Self {
        Self {
            session,
            id,
            status,
        }
    }

    /// Sending session.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Id returned by `send_datagram`.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Outcome.
    pub fn status(&self) -> DatagramStatus {
        self.status
    }
}

/// The handshake completed.
#[derive(Debug, Clone)]
pub struct HandshakeEvent {
    session: Session,
    info: HandshakeInfo,
}

impl HandshakeEvent {
    pub(crate) fn new(session: Session, info: HandshakeInfo) -> Self {
        Self { session, info }
    }

    /// Session.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Server name.
    pub fn sni(&self) -> &str {
        &self.info.sni
    }

    /// Application protocol.
    pub fn alpn(&self) -> &str {
        &self.info.alpn
    }

    /// Cipher suite.
    pub fn cipher(&self) -> &str {
        &self.info.cipher
    }

    /// Cipher suite protocol version.
    pub fn cipher_version(&self) -> &str {
        &self.info.cipher_version
    }

    /// Certificate validation failure reason.
    pub fn validation_error_reason(&self) -> Option<&str> {
        self.info.validation_error_reason.as_deref()
    }

    /// Certificate validation failure code.
    pub fn validation_error_code(&self) -> Option<&str> {
        self.info.validation_error_code.as_deref()
    }

    /// 0-RTT data accepted.
    pub fn early_data_accepted(&self) -> bool {
        self.info.early_data_accepted
    }
}

/// A path validation finished.
#[derive(Debug, Clone)]
pub struct PathValidationEvent {
    session: Session,
    info: PathValidationInfo,
}

impl PathValidationEvent {
    pub(crate) fn new(session: Session, info: PathValidationInfo) -> Self {
        Self { session, info }
    }

    /// Session.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Outcome.
    pub fn result(&self) -> PathValidationResult {
        self.info.result
    }

    /// Validated path.
    pub fn new_path(&self) -> Path {
        self.info.new_path
    }

    /// Previous path.
    pub fn old_path(&self) -> Option<Path> {
        self.info.old_path
    }

    /// Whether the path is the server's preferred address.
    pub fn is_preferred_address(&self) -> bool {
        self.info.is_preferred_address
    }
}

/// The server issued a resumption ticket.
#[derive(Debug, Clone)]
pub struct SessionTicketEvent {
    session: Session,
    ticket: Bytes,
}

impl SessionTicketEvent {
    pub(crate) fn new(session: Session, ticket: Bytes) -> Self {
        Self { session, ticket }
    }

    /// Session.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Opaque ticket, usable as `SessionOptions::session_ticket`.
    pub fn ticket(&self) -> &Bytes {
        &self.ticket
    }
}

/// The server does not speak the requested version.
///
/// The session is destroyed by the engine right after this event.
#[derive(Debug, Clone)]
pub struct VersionNegotiationEvent {
    session: Session,
    info: VersionNegotiationInfo,
}

impl VersionNegotiationEvent {
    pub(crate) fn new(session: Session, info: VersionNegotiationInfo) -> Self {
        Self { session, info }
    }

    /// Session.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Version attempted.
    pub fn version(&self) -> u32 {
        self.info.version
    }

    /// Versions the client would accept.
    pub fn requested_versions(&self) -> &[u32] {
        &self.info.requested
    }

    /// Versions the server offered.
    pub fn supported_versions(&self) -> &[u32] {
        &self.info.supported
    }
}

/// Event delivered to session subscribers.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The peer opened a stream.
    Stream(StreamEvent),
    /// A datagram arrived.
    Datagram(DatagramEvent),
    /// A sent datagram was acknowledged or lost.
    DatagramStatus(DatagramStatusEvent),
    /// The handshake completed.
    Handshake(HandshakeEvent),
    /// A path validation finished.
    PathValidation(PathValidationEvent),
    /// A resumption ticket arrived.
    SessionTicket(SessionTicketEvent),
    /// Version negotiation happened; the session is gone.
    VersionNegotiation(VersionNegotiationEvent),
}

impl SessionEvent {
    /// Kind, for subscription filtering.
    pub fn kind(&self) -> SessionEventKind {
        match self {
            SessionEvent::Stream(_) => SessionEventKind::Stream,
            SessionEvent::Datagram(_) => SessionEventKind::Datagram,
            SessionEvent::DatagramStatus(_) => SessionEventKind::DatagramStatus,
            SessionEvent::Handshake(_) => SessionEventKind::Handshake,
            SessionEvent::PathValidation(_) => SessionEventKind::PathValidation,
            SessionEvent::SessionTicket(_) => SessionEventKind::SessionTicket,
            SessionEvent::VersionNegotiation(_) => SessionEventKind::VersionNegotiation,
        }
    }

    /// Session the event concerns.
    pub fn session(&self) -> &Session {
        match self {
            SessionEvent::Stream(e) => e.session(),
            SessionEvent::Datagram(e) => e.session(),
            SessionEvent::DatagramStatus(e) => e.session(),
            SessionEvent::Handshake(e) => e.session(),
            SessionEvent::PathValidation(e) => e.session(),
            SessionEvent::SessionTicket(e) => e.session(),
            SessionEvent::VersionNegotiation(e) => e.session(),
        }
    }
}

/// Kinds of [`SessionEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionEventKind {
    /// [`SessionEvent::Stream`].
    Stream,
    /// [`SessionEvent::Datagram`].
    Datagram,
    /// [`SessionEvent::DatagramStatus`].
    DatagramStatus,
    /// [`SessionEvent::Handshake`].
    Handshake,
    /// [`SessionEvent::PathValidation`].
    PathValidation,
    /// [`SessionEvent::SessionTicket`].
    SessionTicket,
    /// [`SessionEvent::VersionNegotiation`].
    VersionNegotiation,
}

impl SessionEventKind {
    /// Lowercase label.
    pub fn as_str(self) -> &'static str {
        match self {
            SessionEventKind::Stream => "stream",
            SessionEventKind::Datagram => "datagram",
            SessionEventKind::DatagramStatus => "datagram-status",
            SessionEventKind::Handshake => "handshake",
            SessionEventKind::PathValidation => "path-validation",
            SessionEventKind::SessionTicket => "session-ticket",
            SessionEventKind::VersionNegotiation => "version-negotiation",
        }
    }

    /// State slot mirroring listener presence for this kind, if any.
    pub(crate) fn presence_slot(self) -> Option<usize> {
        match self {
            SessionEventKind::PathValidation => Some(session_state::PATH_VALIDATION),
            SessionEventKind::VersionNegotiation => Some(session_state::VERSION_NEGOTIATION),
            SessionEventKind::Datagram => Some(session_state::DATAGRAM),
            SessionEventKind::SessionTicket => Some(session_state::SESSION_TICKET),
            _ => None,
        }
    }
}

impl fmt::Display for SessionEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
