//! Endpoint stats and state.

use std::sync::Arc;

use serde::ser::{Serialize, SerializeStruct, Serializer};

use super::{BufferView, SharedBuffer, stats_view};
use crate::core::constants::endpoint_state;

stats_view! {
    /// Endpoint counters.
    pub struct EndpointStats: endpoint_stats {
        /// Creation timestamp (ns).
        created_at = CREATED_AT => "createdAt",
        /// Destruction timestamp (ns), zero while alive.
        destroyed_at = DESTROYED_AT => "destroyedAt",
        /// Bytes received.
        bytes_received = BYTES_RECEIVED => "bytesReceived",
        /// Bytes sent.
        bytes_sent = BYTES_SENT => "bytesSent",
        /// Packets received.
        packets_received = PACKETS_RECEIVED => "packetsReceived",
        /// Packets sent.
        packets_sent = PACKETS_SENT => "packetsSent",
        /// Inbound sessions accepted.
        server_sessions = SERVER_SESSIONS => "serverSessions",
        /// Outbound sessions started.
        client_sessions = CLIENT_SESSIONS => "clientSessions",
        /// Inbound sessions refused while busy.
        server_busy_count = SERVER_BUSY_COUNT => "serverBusyCount",
        /// Retries sent.
        retry_count = RETRY_COUNT => "retryCount",
        /// Version negotiations sent.
        version_negotiation_count = VERSION_NEGOTIATION_COUNT => "versionNegotiationCount",
        /// Stateless resets sent.
        stateless_reset_count = STATELESS_RESET_COUNT => "statelessResetCount",
        /// Immediate closes sent.
        immediate_close_count = IMMEDIATE_CLOSE_COUNT => "immediateCloseCount",
    }
}

/// Endpoint state flags.
#[derive(Debug, Clone)]
pub struct EndpointState {
    view: Arc<BufferView>,
}

impl EndpointState {
    pub(crate) fn new(buffer: SharedBuffer) -> Self {
        Self {
            view: Arc::new(BufferView::live(buffer)),
        }
    }

    /// Socket is bound.
    pub fn is_bound(&self) -> bool {
        self.view.flag(endpoint_state::BOUND)
    }

    /// Socket is receiving.
    pub fn is_receiving(&self) -> bool {
        self.view.flag(endpoint_state::RECEIVING)
    }

    /// Accepting inbound sessions.
    pub fn is_listening(&self) -> bool {
        self.view.flag(endpoint_state::LISTENING)
    }

    /// Closing.
    pub fn is_closing(&self) -> bool {
        self.view.flag(endpoint_state::CLOSING)
    }

    /// Refusing inbound sessions.
    pub fn is_busy(&self) -> bool {
        self.view.flag(endpoint_state::BUSY)
    }

    /// Callbacks queued by the engine but not yet delivered.
    pub fn pending_callbacks(&self) -> u64 {
        self.view.get(endpoint_state::PENDING_CALLBACKS)
    }

    /// Whether the values are frozen.
    pub fn is_snapshot(&self) -> bool {
        self.view.is_snapshot()
    }

    /// Raw little-endian bytes of the whole buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.view.to_bytes()
    }

    pub(crate) fn snapshot(&self) {
        self.view.snapshot();
    }
}

impl Serialize for EndpointState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("EndpointState", 6)?;
        state.serialize_field("isBound", &self.is_bound())?;
        state.serialize_field("isReceiving", &self.is_receiving())?;
        state.serialize_field("isListening", &self.is_listening())?;
        state.serialize_field("isClosing", &self.is_closing())?;
        state.serialize_field("isBusy", &self.is_busy())?;
        state.serialize_field("pendingCallbacks", &self.pending_callbacks().to_string())?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::constants::{endpoint_state, endpoint_stats};

    #[test]
    fn test_stats_json_uses_decimal_strings() {
        let buffer = SharedBuffer::new(endpoint_stats::COUNT);
        buffer.set(endpoint_stats::BYTES_SENT, u64::MAX);
        let stats = EndpointStats::new(buffer);

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["bytesSent"], "18446744073709551615");
        assert_eq!(json["serverBusyCount"], "0");
        assert_eq!(json.as_object().unwrap().len(), endpoint_stats::COUNT);
    }

    #[test]
    fn test_state_snapshot() {
        let buffer = SharedBuffer::new(endpoint_state::COUNT);
        let state = EndpointState::new(buffer.clone());
        buffer.set_flag(endpoint_state::LISTENING, true);
        assert!(state.is_listening());

        state.snapshot();
        buffer.set_flag(endpoint_state::LISTENING, false);
        assert!(state.is_listening());
        assert!(state.is_snapshot());
    }
}
