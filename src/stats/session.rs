//! Session stats and state.

use std::sync::Arc;

use serde::ser::{Serialize, SerializeStruct, Serializer};

use super::{BufferView, SharedBuffer, stats_view};
use crate::core::constants::session_state;

stats_view! {
    /// Session counters. RTT values are nanoseconds.
    pub struct SessionStats: session_stats {
        /// Creation timestamp (ns).
        created_at = CREATED_AT => "createdAt",
        /// Closing timestamp (ns).
        closing_at = CLOSING_AT => "closingAt",
        /// Destruction timestamp (ns).
        destroyed_at = DESTROYED_AT => "destroyedAt",
        /// Handshake completion timestamp (ns).
        handshake_completed_at = HANDSHAKE_COMPLETED_AT => "handshakeCompletedAt",
        /// Handshake confirmation timestamp (ns).
        handshake_confirmed_at = HANDSHAKE_CONFIRMED_AT => "handshakeConfirmedAt",
        /// Graceful close timestamp (ns).
        graceful_closing_at = GRACEFUL_CLOSING_AT => "gracefulClosingAt",
        /// Bytes received.
        bytes_received = BYTES_RECEIVED => "bytesReceived",
        /// Bytes sent.
        bytes_sent = BYTES_SENT => "bytesSent",
        /// Peer-opened bidirectional streams.
        bidi_in_stream_count = BIDI_IN_STREAM_COUNT => "bidiInStreamCount",
        /// Locally opened bidirectional streams.
        bidi_out_stream_count = BIDI_OUT_STREAM_COUNT => "bidiOutStreamCount",
        /// Peer-opened unidirectional streams.
        uni_in_stream_count = UNI_IN_STREAM_COUNT => "uniInStreamCount",
        /// Locally opened unidirectional streams.
        uni_out_stream_count = UNI_OUT_STREAM_COUNT => "uniOutStreamCount",
        /// Loss retransmissions.
        loss_retransmit_count = LOSS_RETRANSMIT_COUNT => "lossRetransmitCount",
        /// Peak bytes in flight.
        max_bytes_in_flight = MAX_BYTES_IN_FLIGHT => "maxBytesInFlights",
        /// Bytes in flight.
        bytes_in_flight = BYTES_IN_FLIGHT => "bytesInFlight",
        /// Flow-control blocks.
        block_count = BLOCK_COUNT => "blockCount",
        /// Congestion window.
        cwnd = CWND => "cwnd",
        /// Latest RTT sample.
        latest_rtt = LATEST_RTT => "latestRtt",
        /// Minimum RTT.
        min_rtt = MIN_RTT => "minRtt",
        /// RTT variance.
        rttvar = RTTVAR => "rttVar",
        /// Smoothed RTT.
        smoothed_rtt = SMOOTHED_RTT => "smoothedRtt",
        /// Slow start threshold.
        ssthresh = SSTHRESH => "ssthresh",
        /// Datagrams received.
        datagrams_received = DATAGRAMS_RECEIVED => "datagramsReceived",
        /// Datagrams sent.
        datagrams_sent = DATAGRAMS_SENT => "datagramsSent",
        /// Datagrams acknowledged.
        datagrams_acknowledged = DATAGRAMS_ACKNOWLEDGED => "datagramsAcknowledged",
        /// Datagrams lost.
        datagrams_lost = DATAGRAMS_LOST => "datagramsLost",
    }
}

/// Session state flags.
///
/// The four listener-presence flags are written by this crate when
/// listeners come and go. The engine consults them to skip work nobody
/// listens for.
#[derive(Debug, Clone)]
pub struct SessionState {
    view: Arc<BufferView>,
}

impl SessionState {
    pub(crate) fn new(buffer: SharedBuffer) -> Self {
        Self {
            view: Arc::new(BufferView::live(buffer)),
        }
    }

    /// A path-validation listener is registered.
    pub fn has_path_validation_listener(&self) -> bool {
        self.view.flag(session_state::PATH_VALIDATION)
    }

    /// A version-negotiation listener is registered.
    pub fn has_version_negotiation_listener(&self) -> bool {
        self.view.flag(session_state::VERSION_NEGOTIATION)
    }

    /// A datagram listener is registered.
    pub fn has_datagram_listener(&self) -> bool {
        self.view.flag(session_state::DATAGRAM)
    }

    /// A session-ticket listener is registered.
    pub fn has_session_ticket_listener(&self) -> bool {
        self.view.flag(session_state::SESSION_TICKET)
    }

    /// Closing.
    pub fn is_closing(&self) -> bool {
        self.view.flag(session_state::CLOSING)
    }

    /// Closing gracefully.
    pub fn is_graceful_close(&self) -> bool {
        self.view.flag(session_state::GRACEFUL_CLOSE)
    }

    /// Closed silently.
    pub fn is_silent_close(&self) -> bool {
        self.view.flag(session_state::SILENT_CLOSE)
    }

    /// Closed by a stateless reset.
    pub fn is_stateless_reset(&self) -> bool {
        self.view.flag(session_state::STATELESS_RESET)
    }

    /// Native session destroyed.
    pub fn is_destroyed(&self) -> bool {
        self.view.flag(session_state::DESTROYED)
    }

    /// Handshake completed.
    pub fn is_handshake_completed(&self) -> bool {
        self.view.flag(session_state::HANDSHAKE_COMPLETED)
    }

    /// Handshake confirmed.
    pub fn is_handshake_confirmed(&self) -> bool {
        self.view.flag(session_state::HANDSHAKE_CONFIRMED)
    }

    /// New streams may be opened.
    pub fn is_stream_open_allowed(&self) -> bool {
        self.view.flag(session_state::STREAM_OPEN_ALLOWED)
    }

    /// Stream priorities supported.
    pub fn is_priority_supported(&self) -> bool {
        self.view.flag(session_state::PRIORITY_SUPPORTED)
    }

    /// Stream data wrapped by an application protocol.
    pub fn is_wrapped(&self) -> bool {
        self.view.flag(session_state::WRAPPED)
    }

    /// Id of the last datagram sent.
    pub fn last_datagram_id(&self) -> u64 {
        self.view.get(session_state::LAST_DATAGRAM_ID)
    }

    /// Whether the values are frozen.
    pub fn is_snapshot(&self) -> bool {
        self.view.is_snapshot()
    }

    /// Raw little-endian bytes of the whole buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.view.to_bytes()
    }

    pub(crate) fn set_listener_flag(&self, slot: usize, present: bool) {
        self.view.set_flag(slot, present);
    }

    pub(crate) fn snapshot(&self) {
        self.view.snapshot();
    }
}

impl Serialize for SessionState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("SessionState", 15)?;
        state.serialize_field("hasPathValidationListener", &self.has_path_validation_listener())?;
        state.serialize_field(
            "hasVersionNegotiationListener",
            &self.has_version_negotiation_listener(),
        )?;
        state.serialize_field("hasDatagramListener", &self.has_datagram_listener())?;
        state.serialize_field("hasSessionTicketListener", &self.has_session_ticket_listener())?;
        state.serialize_field("isClosing", &self.is_closing())?;
        state.serialize_field("isGracefulClose", &self.is_graceful_close())?;
        state.serialize_field("isSilentClose", &self.is_silent_close())?;
        state.serialize_field("isStatelessReset", &self.is_stateless_reset())?;
        state.serialize_field("isDestroyed", &self.is_destroyed())?;
        state.serialize_field("isHandshakeCompleted", &self.is_handshake_completed())?;
        state.serialize_field("isHandshakeConfirmed", &self.is_handshake_confirmed())?;
        state.serialize_field("isStreamOpenAllowed", &self.is_stream_open_allowed())?;
        state.serialize_field("isPrioritySupported", &self.is_priority_supported())?;
        state.serialize_field("isWrapped", &self.is_wrapped())?;
        state.serialize_field("lastDatagramId", &self.last_datagram_id().to_string())?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::constants::{session_state, session_stats};

    #[test]
    fn test_listener_flags_are_app_writable_until_snapshot() {
        let buffer = SharedBuffer::new(session_state::COUNT);
        let state = SessionState::new(buffer.clone());

        state.set_listener_flag(session_state::DATAGRAM, true);
        assert!(buffer.flag(session_state::DATAGRAM));
        assert!(state.has_datagram_listener());

        state.snapshot();
        state.set_listener_flag(session_state::DATAGRAM, false);
        assert!(buffer.flag(session_state::DATAGRAM));
        assert!(state.has_datagram_listener());
    }

    #[test]
    fn test_stats_bytes_stable_across_snapshot() {
        let buffer = SharedBuffer::new(session_stats::COUNT);
        buffer.set(session_stats::SMOOTHED_RTT, 25_000_000);
        buffer.set(session_stats::DATAGRAMS_SENT, 3);
        let stats = SessionStats::new(buffer.clone());

        let before = stats.to_bytes();
        stats.snapshot();
        buffer.set(session_stats::DATAGRAMS_SENT, 4);
        assert_eq!(stats.to_bytes(), before);
        assert_eq!(stats.datagrams_sent(), 3);
        assert_eq!(before.len(), session_stats::COUNT * 8);
    }
}
