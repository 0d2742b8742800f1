//! Stream stats and state.

use std::sync::Arc;

use serde::ser::{Serialize, SerializeStruct, Serializer};

use super::{BufferView, SharedBuffer, stats_view};
use crate::core::constants::stream_state;
use crate::core::types::StreamId;

stats_view! {
    /// Stream counters.
    pub struct StreamStats: stream_stats {
        /// Creation timestamp (ns).
        created_at = CREATED_AT => "createdAt",
        /// Last data received (ns).
        received_at = RECEIVED_AT => "receivedAt",
        /// Last acknowledgement (ns).
        acked_at = ACKED_AT => "ackedAt",
        /// Closing timestamp (ns).
        closing_at = CLOSING_AT => "closingAt",
        /// Destruction timestamp (ns).
        destroyed_at = DESTROYED_AT => "destroyedAt",
        /// Bytes received.
        bytes_received = BYTES_RECEIVED => "bytesReceived",
        /// Bytes sent.
        bytes_sent = BYTES_SENT => "bytesSent",
        /// Highest offset sent.
        max_offset = MAX_OFFSET => "maxOffset",
        /// Highest offset acknowledged.
        max_offset_ack = MAX_OFFSET_ACK => "maxOffsetAcknowledged",
        /// Highest offset received.
        max_offset_recv = MAX_OFFSET_RECV => "maxOffsetReceived",
        /// Final size.
        final_size = FINAL_SIZE => "finalSize",
    }
}

/// Stream state flags.
///
/// The `wants_*` flags are owned by the application and tell the engine
/// which notifications to produce.
#[derive(Debug, Clone)]
pub struct StreamState {
    view: Arc<BufferView>,
}

impl StreamState {
    pub(crate) fn new(buffer: SharedBuffer) -> Self {
        Self {
            view: Arc::new(BufferView::live(buffer)),
        }
    }

    /// Stream id.
    pub fn id(&self) -> StreamId {
        StreamId(self.view.get(stream_state::ID))
    }

    /// FIN sent.
    pub fn fin_sent(&self) -> bool {
        self.view.flag(stream_state::FIN_SENT)
    }

    /// FIN received.
    pub fn fin_received(&self) -> bool {
        self.view.flag(stream_state::FIN_RECEIVED)
    }

    /// Readable side ended.
    pub fn read_ended(&self) -> bool {
        self.view.flag(stream_state::READ_ENDED)
    }

    /// Writable side ended.
    pub fn write_ended(&self) -> bool {
        self.view.flag(stream_state::WRITE_ENDED)
    }

    /// Native stream destroyed.
    pub fn is_destroyed(&self) -> bool {
        self.view.flag(stream_state::DESTROYED)
    }

    /// Reading paused.
    pub fn is_paused(&self) -> bool {
        self.view.flag(stream_state::PAUSED)
    }

    /// Reset received.
    pub fn is_reset(&self) -> bool {
        self.view.flag(stream_state::RESET)
    }

    /// A reader is attached.
    pub fn has_reader(&self) -> bool {
        self.view.flag(stream_state::HAS_READER)
    }

    /// Blocked notifications wanted.
    pub fn wants_block(&self) -> bool {
        self.view.flag(stream_state::WANTS_BLOCK)
    }

    /// Header notifications wanted.
    pub fn wants_headers(&self) -> bool {
        self.view.flag(stream_state::WANTS_HEADERS)
    }

    /// Reset notifications wanted.
    pub fn wants_reset(&self) -> bool {
        self.view.flag(stream_state::WANTS_RESET)
    }

    /// Trailer notifications wanted.
    pub fn wants_trailers(&self) -> bool {
        self.view.flag(stream_state::WANTS_TRAILERS)
    }

    /// Ask for blocked notifications.
    pub fn set_wants_block(&self, on: bool) {
        self.view.set_flag(stream_state::WANTS_BLOCK, on);
    }

    /// Ask for header notifications.
    pub fn set_wants_headers(&self, on: bool) {
        self.view.set_flag(stream_state::WANTS_HEADERS, on);
    }

    /// Ask for reset notifications.
    pub fn set_wants_reset(&self, on: bool) {
        self.view.set_flag(stream_state::WANTS_RESET, on);
    }

    /// Ask for trailer notifications.
    pub fn set_wants_trailers(&self, on: bool) {
        self.view.set_flag(stream_state::WANTS_TRAILERS, on);
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

impl Serialize for StreamState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("StreamState", 13)?;
        state.serialize_field("id", &self.id().0.to_string())?;
        state.serialize_field("finSent", &self.fin_sent())?;
        state.serialize_field("finReceived", &self.fin_received())?;
        state.serialize_field("readEnded", &self.read_ended())?;
        state.serialize_field("writeEnded", &self.write_ended())?;
        state.serialize_field("destroyed", &self.is_destroyed())?;
        state.serialize_field("paused", &self.is_paused())?;
        state.serialize_field("reset", &self.is_reset())?;
        state.serialize_field("hasReader", &self.has_reader())?;
        state.serialize_field("wantsBlock", &self.wants_block())?;
        state.serialize_field("wantsHeaders", &self.wants_headers())?;
        state.serialize_field("wantsReset", &self.wants_reset())?;
        state.serialize_field("wantsTrailers", &self.wants_trailers())?;
        state.end()
    }
}
