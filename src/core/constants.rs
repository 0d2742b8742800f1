//! Constants shared with the native engine.
//!
//! Buffer layouts and enum codes MUST match the engine's side of the
//! boundary. The option bounds are enforced before any native call.

// =============================================================================
// ENDPOINT STATS LAYOUT (13 x u64)
// =============================================================================

/// Index positions inside the endpoint stats buffer.
pub mod endpoint_stats {
    /// Creation timestamp (ns, monotonic).
    pub const CREATED_AT: usize = 0;
    /// Destruction timestamp (ns, monotonic).
    pub const DESTROYED_AT: usize = 1;
    /// Total bytes received.
    pub const BYTES_RECEIVED: usize = 2;
    /// Total bytes sent.
    pub const BYTES_SENT: usize = 3;
    /// Total packets received.
    pub const PACKETS_RECEIVED: usize = 4;
    /// Total packets sent.
    pub const PACKETS_SENT: usize = 5;
    /// Server sessions accepted.
    pub const SERVER_SESSIONS: usize = 6;
    /// Client sessions initiated.
    pub const CLIENT_SESSIONS: usize = 7;
    /// Sessions refused because the endpoint was busy.
    pub const SERVER_BUSY_COUNT: usize = 8;
    /// Retry packets sent.
    pub const RETRY_COUNT: usize = 9;
    /// Version negotiation packets sent.
    pub const VERSION_NEGOTIATION_COUNT: usize = 10;
    /// Stateless resets sent.
    pub const STATELESS_RESET_COUNT: usize = 11;
    /// Immediate close packets sent.
    pub const IMMEDIATE_CLOSE_COUNT: usize = 12;
    /// Number of fields.
    pub const COUNT: usize = 13;
}

// =============================================================================
// SESSION STATS LAYOUT (26 x u64)
// =============================================================================

/// Index positions inside the session stats buffer.
pub mod session_stats {
    /// Creation timestamp (ns).
    pub const CREATED_AT: usize = 0;
    /// Timestamp the session started closing (ns).
    pub const CLOSING_AT: usize = 1;
    /// Destruction timestamp (ns).
    pub const DESTROYED_AT: usize = 2;
    /// Handshake completion timestamp (ns).
    pub const HANDSHAKE_COMPLETED_AT: usize = 3;
    /// Handshake confirmation timestamp (ns).
    pub const HANDSHAKE_CONFIRMED_AT: usize = 4;
    /// Graceful close start timestamp (ns).
    pub const GRACEFUL_CLOSING_AT: usize = 5;
    /// Total bytes received.
    pub const BYTES_RECEIVED: usize = 6;
    /// Total bytes sent.
    pub const BYTES_SENT: usize = 7;
    /// Peer-initiated bidirectional streams.
    pub const BIDI_IN_STREAM_COUNT: usize = 8;
    /// Locally initiated bidirectional streams.
    pub const BIDI_OUT_STREAM_COUNT: usize = 9;
    /// Peer-initiated unidirectional streams.
    pub const UNI_IN_STREAM_COUNT: usize = 10;
    /// Locally initiated unidirectional streams.
    pub const UNI_OUT_STREAM_COUNT: usize = 11;
    /// Packets retransmitted after loss.
    pub const LOSS_RETRANSMIT_COUNT: usize = 12;
    /// High-water mark of bytes in flight.
    pub const MAX_BYTES_IN_FLIGHT: usize = 13;
    /// Current bytes in flight.
    pub const BYTES_IN_FLIGHT: usize = 14;
    /// Times the session was flow-control blocked.
    pub const BLOCK_COUNT: usize = 15;
    /// Congestion window (bytes).
    pub const CWND: usize = 16;
    /// Latest RTT sample (ns).
    pub const LATEST_RTT: usize = 17;
    /// Minimum RTT (ns).
    pub const MIN_RTT: usize = 18;
    /// RTT variance (ns).
    pub const RTTVAR: usize = 19;
    /// Smoothed RTT (ns).
    pub const SMOOTHED_RTT: usize = 20;
    /// Slow start threshold (bytes).
    pub const SSTHRESH: usize = 21;
    /// Datagrams received.
    pub const DATAGRAMS_RECEIVED: usize = 22;
    /// Datagrams sent.
    pub const DATAGRAMS_SENT: usize = 23;
    /// Datagrams acknowledged by the peer.
    pub const DATAGRAMS_ACKNOWLEDGED: usize = 24;
    /// Datagrams declared lost.
    pub const DATAGRAMS_LOST: usize = 25;
    /// Number of fields.
    pub const COUNT: usize = 26;
}

// =============================================================================
// STREAM STATS LAYOUT (11 x u64)
// =============================================================================

/// Index positions inside the stream stats buffer.
pub mod stream_stats {
    /// Creation timestamp (ns).
    pub const CREATED_AT: usize = 0;
    /// Timestamp of the last received data (ns).
    pub const RECEIVED_AT: usize = 1;
    /// Timestamp of the last acknowledgement (ns).
    pub const ACKED_AT: usize = 2;
    /// Timestamp the stream started closing (ns).
    pub const CLOSING_AT: usize = 3;
    /// Destruction timestamp (ns).
    pub const DESTROYED_AT: usize = 4;
    /// Bytes received.
    pub const BYTES_RECEIVED: usize = 5;
    /// Bytes sent.
    pub const BYTES_SENT: usize = 6;
    /// Highest offset sent.
    pub const MAX_OFFSET: usize = 7;
    /// Highest offset acknowledged.
    pub const MAX_OFFSET_ACK: usize = 8;
    /// Highest offset received.
    pub const MAX_OFFSET_RECV: usize = 9;
    /// Final size, once known.
    pub const FINAL_SIZE: usize = 10;
    /// Number of fields.
    pub const COUNT: usize = 11;
}

// =============================================================================
// STATE LAYOUTS (one u64 slot per field)
// =============================================================================

/// Index positions inside the endpoint state buffer.
pub mod endpoint_state {
    /// Socket is bound.
    pub const BOUND: usize = 0;
    /// Socket is receiving.
    pub const RECEIVING: usize = 1;
    /// Endpoint accepts inbound sessions.
    pub const LISTENING: usize = 2;
    /// Endpoint is closing.
    pub const CLOSING: usize = 3;
    /// Endpoint refuses new inbound sessions.
    pub const BUSY: usize = 4;
    /// Callbacks queued but not yet delivered.
    pub const PENDING_CALLBACKS: usize = 5;
    /// Number of fields.
    pub const COUNT: usize = 6;
}

/// Index positions inside the session state buffer.
pub mod session_state {
    /// A path-validation listener is registered.
    pub const PATH_VALIDATION: usize = 0;
    /// A version-negotiation listener is registered.
    pub const VERSION_NEGOTIATION: usize = 1;
    /// A datagram listener is registered.
    pub const DATAGRAM: usize = 2;
    /// A session-ticket listener is registered.
    pub const SESSION_TICKET: usize = 3;
    /// Session is closing.
    pub const CLOSING: usize = 4;
    /// Close is graceful.
    pub const GRACEFUL_CLOSE: usize = 5;
    /// Close is silent (idle timeout).
    pub const SILENT_CLOSE: usize = 6;
    /// Closed by a stateless reset.
    pub const STATELESS_RESET: usize = 7;
    /// Native session destroyed.
    pub const DESTROYED: usize = 8;
    /// Handshake completed.
    pub const HANDSHAKE_COMPLETED: usize = 9;
    /// Handshake confirmed.
    pub const HANDSHAKE_CONFIRMED: usize = 10;
    /// New streams may be opened.
    pub const STREAM_OPEN_ALLOWED: usize = 11;
    /// Stream priorities are supported by the application protocol.
    pub const PRIORITY_SUPPORTED: usize = 12;
    /// Stream data is wrapped by an application protocol.
    pub const WRAPPED: usize = 13;
    /// Identifier of the last datagram sent.
    pub const LAST_DATAGRAM_ID: usize = 14;
    /// Number of fields.
    pub const COUNT: usize = 15;
}

/// Index positions inside the stream state buffer.
pub mod stream_state {
    /// Stream identifier.
    pub const ID: usize = 0;
    /// FIN sent.
    pub const FIN_SENT: usize = 1;
    /// FIN received.
    pub const FIN_RECEIVED: usize = 2;
    /// Readable side ended.
    pub const READ_ENDED: usize = 3;
    /// Writable side ended.
    pub const WRITE_ENDED: usize = 4;
    /// Native stream destroyed.
    pub const DESTROYED: usize = 5;
    /// Reading is paused.
    pub const PAUSED: usize = 6;
    /// Stream was reset.
    pub const RESET: usize = 7;
    /// A reader is attached.
    pub const HAS_READER: usize = 8;
    /// Application wants blocked notifications.
    pub const WANTS_BLOCK: usize = 9;
    /// Application wants header notifications.
    pub const WANTS_HEADERS: usize = 10;
    /// Application wants reset notifications.
    pub const WANTS_RESET: usize = 11;
    /// Application wants trailer notifications.
    pub const WANTS_TRAILERS: usize = 12;
    /// Number of fields.
    pub const COUNT: usize = 13;
}

// =============================================================================
// NATIVE ENUM CODES
// =============================================================================

/// Congestion control: Reno.
pub const CC_ALGO_RENO: u8 = 0;
/// Congestion control: CUBIC.
pub const CC_ALGO_CUBIC: u8 = 1;
/// Congestion control: BBR.
pub const CC_ALGO_BBR: u8 = 2;
/// Canonical string form of [`CC_ALGO_RENO`].
pub const CC_ALGO_RENO_STR: &str = "reno";
/// Canonical string form of [`CC_ALGO_CUBIC`].
pub const CC_ALGO_CUBIC_STR: &str = "cubic";
/// Canonical string form of [`CC_ALGO_BBR`].
pub const CC_ALGO_BBR_STR: &str = "bbr";

/// Preferred address policy: ignore the server's preferred address.
pub const PREFERRED_ADDRESS_IGNORE: u32 = 0;
/// Preferred address policy: migrate to the server's preferred address.
pub const PREFERRED_ADDRESS_USE: u32 = 1;
/// Policy used when none is given.
pub const DEFAULT_PREFERRED_ADDRESS_POLICY: u32 = PREFERRED_ADDRESS_USE;

/// Native code for a bidirectional stream.
pub const STREAM_DIRECTION_BIDIRECTIONAL: u32 = 0;
/// Native code for a unidirectional stream.
pub const STREAM_DIRECTION_UNIDIRECTIONAL: u32 = 1;

// =============================================================================
// PROTOCOL
// =============================================================================

/// QUIC version 1 (RFC 9000).
pub const QUIC_VERSION_1: u32 = 0x0000_0001;

/// QUIC version 2 (RFC 9369).
pub const QUIC_VERSION_2: u32 = 0x6b33_43cf;

/// Default TLS 1.3 cipher suites.
pub const DEFAULT_CIPHERS: &str = "TLS_AES_128_GCM_SHA256:TLS_AES_256_GCM_SHA384:\
TLS_CHACHA20_POLY1305_SHA256:TLS_AES_128_CCM_SHA256";

/// Default key exchange groups.
pub const DEFAULT_GROUPS: &str = "X25519:P-256:P-384:P-521";

/// libuv status for "address already in use".
pub const UV_EADDRINUSE: i32 = -98;

// =============================================================================
// OPTION BOUNDS
// =============================================================================

/// Required length of `resetTokenSecret` and `tokenSecret`.
pub const SECRET_LEN: usize = 16;

/// Maximum IP TTL.
pub const MAX_UDP_TTL: u32 = 255;

/// Maximum UDP socket buffer size (the engine stores it as a C `int`).
pub const MAX_UDP_BUFFER_SIZE: u32 = i32::MAX as u32;

/// Maximum UDP payload size (RFC 9000 `max_udp_payload_size`).
pub const MAX_PAYLOAD_SIZE: u64 = 65527;

/// Largest permitted `ack_delay_exponent`.
pub const MAX_ACK_DELAY_EXPONENT: u64 = 20;

/// `max_ack_delay` must stay strictly below this many milliseconds.
pub const MAX_ACK_DELAY_LIMIT_MS: u64 = 1 << 14;

/// Smallest permitted `active_connection_id_limit`.
pub const MIN_ACTIVE_CONNECTION_ID_LIMIT: u64 = 2;

/// Largest permitted `initial_max_streams_*`.
pub const MAX_STREAMS: u64 = 1 << 60;
