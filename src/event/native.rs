//! Notifications posted by the engine.

use bytes::Bytes;

use crate::core::traits::{SessionHandle, StreamHandle};
use crate::core::types::{
    CloseContext, DatagramStatus, Direction, Path, PathValidationResult, SessionCloseInfo, SessionKey,
    StreamId,
};

/// Details of a completed handshake.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HandshakeInfo {
    /// Server name.
    pub sni: String,
    /// Negotiated application protocol.
    pub alpn: String,
    /// Cipher suite name.
    pub cipher: String,
    /// Cipher suite protocol version.
    pub cipher_version: String,
    /// Why peer certificate validation failed, if it did.
    pub validation_error_reason: Option<String>,
    /// Validation error code.
    pub validation_error_code: Option<String>,
    /// Whether 0-RTT data was accepted.
    pub early_data_accepted: bool,
}

/// Details of a finished path validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathValidationInfo {
    /// Outcome.
    pub result: PathValidationResult,
    /// Local and remote address of the validated path.
    pub new_path: Path,
    /// Path before migration, when there was one.
    pub old_path: Option<Path>,
    /// Whether the path is the server's preferred address.
    pub is_preferred_address: bool,
}

/// Details of a version negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionNegotiationInfo {
    /// Version the client attempted.
    pub version: u32,
    /// Versions the client would accept.
    pub requested: Vec<u32>,
    /// Versions the server offered.
    pub supported: Vec<u32>,
}

/// Notification from the engine.
#[derive(Debug)]
pub enum NativeEvent {
    /// The endpoint finished closing.
    EndpointClose {
        /// Why.
        context: CloseContext,
        /// Native status.
        status: i32,
    },
    /// A peer opened a session.
    SessionNew {
        /// The new session.
        handle: Box<dyn SessionHandle>,
    },
    /// A session finished closing.
    SessionClose {
        /// Target session.
        session: SessionKey,
        /// Close error information.
        info: SessionCloseInfo,
    },
    /// A datagram arrived.
    SessionDatagram {
        /// Target session.
        session: SessionKey,
        /// Payload.
        payload: Bytes,
        /// Received as 0-RTT.
        early: bool,
    },
    /// A sent datagram was acknowledged or lost.
    SessionDatagramStatus {
        /// Target session.
        session: SessionKey,
        /// Id returned by `send_datagram`.
        id: u64,
        /// Outcome.
        status: DatagramStatus,
    },
    /// The handshake completed.
    SessionHandshake {
        /// Target session.
        session: SessionKey,
        /// Handshake details.
        info: HandshakeInfo,
    },
    /// A path validation finished.
    SessionPathValidation {
        /// Target session.
        session: SessionKey,
        /// Validation details.
        info: PathValidationInfo,
    },
    /// The server issued a resumption ticket.
    SessionTicket {
        /// Target session.
        session: SessionKey,
        /// Opaque ticket.
        ticket: Bytes,
    },
    /// The server does not speak the requested version. The engine
    /// destroys the session right after.
    SessionVersionNegotiation {
        /// Target session.
        session: SessionKey,
        /// Negotiation details.
        info: VersionNegotiationInfo,
    },
    /// The peer opened a stream.
    StreamCreated {
        /// Target session.
        session: SessionKey,
        /// The new stream.
        handle: Box<dyn StreamHandle>,
        /// Its direction.
        direction: Direction,
    },
    /// A stream finished.
    StreamClose {
        /// Owning session.
        session: SessionKey,
        /// Target stream.
        stream: StreamId,
    },
    /// The peer reset a stream.
    StreamReset {
        /// Owning session.
        session: SessionKey,
        /// Target stream.
        stream: StreamId,
        /// Application error code.
        code: u64,
    },
}

/// Notification kind, for logging and routing tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// [`NativeEvent::EndpointClose`].
    EndpointClose,
    /// [`NativeEvent::SessionNew`].
    SessionNew,
    /// [`NativeEvent::SessionClose`].
    SessionClose,
    /// [`NativeEvent::SessionDatagram`].
    Datagram,
    /// [`NativeEvent::SessionDatagramStatus`].
    DatagramStatus,
    /// [`NativeEvent::SessionHandshake`].
    Handshake,
    /// [`NativeEvent::SessionPathValidation`].
    PathValidation,
    /// [`NativeEvent::SessionTicket`].
    SessionTicket,
    /// [`NativeEvent::SessionVersionNegotiation`].
    VersionNegotiation,
    /// [`NativeEvent::StreamCreated`].
    StreamCreated,
    /// [`NativeEvent::StreamClose`].
    StreamClose,
    /// [`NativeEvent::StreamReset`].
    StreamReset,
}

impl EventKind {
    /// Whether the notification hands a new entity to the application.
    ///
    /// The entity's own events may follow immediately, so dispatch pauses
    /// after one of these until its owner had a chance to subscribe.
    pub fn creates_entity(self) -> bool {
        matches!(self, EventKind::SessionNew | EventKind::StreamCreated)
    }
}

/// Entity a notification is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    /// The endpoint itself.
    Endpoint,
    /// A session of the endpoint.
    Session(SessionKey),
    /// A stream of a session.
    Stream(SessionKey, StreamId),
}

impl NativeEvent {
    /// Kind of notification.
    pub fn kind(&self) -> EventKind {
        match self {
            NativeEvent::EndpointClose { .. } => EventKind::EndpointClose,
            NativeEvent::SessionNew { .. } => EventKind::SessionNew,
            NativeEvent::SessionClose { .. } => EventKind::SessionClose,
            NativeEvent::SessionDatagram { .. } => EventKind::Datagram,
            NativeEvent::SessionDatagramStatus { .. } => EventKind::DatagramStatus,
            NativeEvent::SessionHandshake { .. } => EventKind::Handshake,
            NativeEvent::SessionPathValidation { .. } => EventKind::PathValidation,
            NativeEvent::SessionTicket { .. } => EventKind::SessionTicket,
            NativeEvent::SessionVersionNegotiation { .. } => EventKind::VersionNegotiation,
            NativeEvent::StreamCreated { .. } => EventKind::StreamCreated,
            NativeEvent::StreamClose { .. } => EventKind::StreamClose,
            NativeEvent::StreamReset { .. } => EventKind::StreamReset,
        }
    }

    /// Routing target.
    ///
    /// `SessionNew` targets the endpoint: the session does not exist on the
    /// application side yet. `StreamCreated` targets the session for the
    /// same reason.
    pub fn target(&self) -> Target {
        match self {
            NativeEvent::EndpointClose { .. } | NativeEvent::SessionNew { .. } => Target::Endpoint,
            NativeEvent::SessionClose { session, .. }
            | NativeEvent::SessionDatagram { session, .. }
            | NativeEvent::SessionDatagramStatus { session, .. }
            | NativeEvent::SessionHandshake { session, .. }
            | NativeEvent::SessionPathValidation { session, .. }
            | NativeEvent::SessionTicket { session, .. }
            | NativeEvent::SessionVersionNegotiation { session, .. }
            | NativeEvent::StreamCreated { session, .. } => Target::Session(*session),
            NativeEvent::StreamClose {
                session, stream, ..
            }
            | NativeEvent::StreamReset {
                session, stream, ..
            } => Target::Stream(*session, *stream),
        }
    }

    /// Release whatever the event owns when nobody will handle it.
    ///
    /// Incoming session and stream handles are destroyed so the engine
    /// does not keep them alive.
    pub(crate) fn discard(self) {
        match self {
            NativeEvent::SessionNew { handle } => handle.destroy(),
            NativeEvent::StreamCreated { handle, .. } => handle.destroy(),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routing() {
        let event = NativeEvent::EndpointClose {
            context: CloseContext::Close,
            status: 0,
        };
        assert_eq!(event.kind(), EventKind::EndpointClose);
        assert_eq!(event.target(), Target::Endpoint);

        let event = NativeEvent::SessionTicket {
            session: SessionKey(3),
            ticket: Bytes::from_static(b"t"),
        };
        assert_eq!(event.target(), Target::Session(SessionKey(3)));

        let event = NativeEvent::StreamReset {
            session: SessionKey(3),
            stream: StreamId(4),
            code: 9,
        };
        assert_eq!(event.kind(), EventKind::StreamReset);
        assert!(!event.kind().creates_entity());
        assert!(EventKind::SessionNew.creates_entity());
        assert!(EventKind::StreamCreated.creates_entity());
        assert_eq!(event.target(), Target::Stream(SessionKey(3), StreamId(4)));
    }
}
