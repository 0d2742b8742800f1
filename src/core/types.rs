//! Identifiers and small value types shared by every layer.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use super::constants::{STREAM_DIRECTION_BIDIRECTIONAL, STREAM_DIRECTION_UNIDIRECTIONAL};
use super::error::{QuicError, QuicResult};

/// Engine-assigned key of a session within its endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionKey(pub u64);

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

/// QUIC stream identifier (RFC 9000 section 2.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamId(pub u64);

impl StreamId {
    /// Low bit clear: opened by the client.
    pub fn is_client_initiated(self) -> bool {
        self.0 & 0x1 == 0
    }

    /// Second bit clear: both directions carry data.
    pub fn is_bidirectional(self) -> bool {
        self.0 & 0x2 == 0
    }

    /// First stream id of a given initiator and direction.
    pub fn first(client: bool, direction: Direction) -> Self {
        let mut id = if client { 0 } else { 1 };
        if direction == Direction::Unidirectional {
            id |= 0x2;
        }
        StreamId(id)
    }

    /// The `n`-th stream id of the same type as `self`'s type.
    pub fn nth(self, n: u64) -> Self {
        StreamId((self.0 & 0x3) + (n << 2))
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stream direction as understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Both sides may send.
    Bidirectional,
    /// Only the opener may send.
    Unidirectional,
}

impl Direction {
    /// Native direction code.
    pub fn code(self) -> u32 {
        match self {
            Direction::Bidirectional => STREAM_DIRECTION_BIDIRECTIONAL,
            Direction::Unidirectional => STREAM_DIRECTION_UNIDIRECTIONAL,
        }
    }
}

/// Why an endpoint's native side closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseContext {
    /// Normal shutdown.
    Close,
    /// The UDP socket could not be bound.
    BindFailure,
    /// The engine failed to start.
    StartFailure,
    /// Reading from the socket failed.
    ReceiveFailure,
    /// Writing to the socket failed.
    SendFailure,
    /// The endpoint could not start listening.
    ListenFailure,
}

impl CloseContext {
    /// Human-readable label used in error messages.
    pub fn as_str(self) -> &'static str {
        match self {
            CloseContext::Close => "Close",
            CloseContext::BindFailure => "Bind failure",
            CloseContext::StartFailure => "Start failure",
            CloseContext::ReceiveFailure => "Receive failure",
            CloseContext::SendFailure => "Send failure",
            CloseContext::ListenFailure => "Listen failure",
        }
    }

    /// Whether this context describes a failure rather than a normal close.
    pub fn is_failure(self) -> bool {
        self != CloseContext::Close
    }
}

impl fmt::Display for CloseContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error space of a session close code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseErrorKind {
    /// QUIC transport error code.
    Transport,
    /// Application protocol error code.
    Application,
}

impl fmt::Display for CloseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseErrorKind::Transport => f.write_str("transport"),
            CloseErrorKind::Application => f.write_str("application"),
        }
    }
}

/// Error information reported by the engine when a session closes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCloseInfo {
    /// Error space.
    pub kind: CloseErrorKind,
    /// Error code; zero means no error.
    pub code: u64,
    /// Reason phrase.
    pub reason: String,
}

impl SessionCloseInfo {
    /// Clean transport close with code 0.
    pub fn clean() -> Self {
        Self {
            kind: CloseErrorKind::Transport,
            code: 0,
            reason: String::new(),
        }
    }

    /// Transport close with the given code.
    pub fn transport(code: u64, reason: impl Into<String>) -> Self {
        Self {
            kind: CloseErrorKind::Transport,
            code,
            reason: reason.into(),
        }
    }

    /// Whether the close carries no error.
    pub fn is_clean(&self) -> bool {
        self.code == 0
    }
}

/// Delivery outcome of a sent datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatagramStatus {
    /// The peer acknowledged the packet carrying the datagram.
    Acknowledged,
    /// The packet carrying the datagram was declared lost.
    Lost,
}

impl DatagramStatus {
    /// Lowercase label.
    pub fn as_str(self) -> &'static str {
        match self {
            DatagramStatus::Acknowledged => "acknowledged",
            DatagramStatus::Lost => "lost",
        }
    }
}

/// Outcome of a path validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PathValidationResult {
    /// The peer answered the challenge.
    Success,
    /// Validation timed out or was rejected.
    Failure,
    /// Validation was abandoned.
    Aborted,
}

impl PathValidationResult {
    /// Lowercase label.
    pub fn as_str(self) -> &'static str {
        match self {
            PathValidationResult::Success => "success",
            PathValidationResult::Failure => "failure",
            PathValidationResult::Aborted => "aborted",
        }
    }
}

/// Local and remote address pair of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Path {
    /// Address of the owning endpoint.
    pub local: SocketAddr,
    /// Address of the peer.
    pub remote: SocketAddr,
}

/// Anything accepted as a connect target.
///
/// Strings must be a complete `ip:port` socket address.
pub trait IntoSocketAddr {
    /// Convert into a socket address.
    fn into_socket_addr(self) -> QuicResult<SocketAddr>;
}

impl IntoSocketAddr for SocketAddr {
    fn into_socket_addr(self) -> QuicResult<SocketAddr> {
        Ok(self)
    }
}

impl IntoSocketAddr for (IpAddr, u16) {
    fn into_socket_addr(self) -> QuicResult<SocketAddr> {
        Ok(SocketAddr::from(self))
    }
}

impl IntoSocketAddr for &str {
    fn into_socket_addr(self) -> QuicResult<SocketAddr> {
        self.parse().map_err(|_| QuicError::InvalidArgType {
            name: "address",
            expected: "SocketAddress",
        })
    }
}

impl IntoSocketAddr for String {
    fn into_socket_addr(self) -> QuicResult<SocketAddr> {
        self.as_str().into_socket_addr()
    }
}
