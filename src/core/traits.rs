//! The native engine boundary.
//!
//! An engine owns sockets, the QUIC state machines and the shared stats and
//! state buffers. This crate owns everything above: lifecycles, listeners,
//! completion handles and snapshots.
//!
//! # Requirements
//!
//! - Engines MUST NOT call back synchronously from any method below. Every
//!   notification is posted to the [`EventSink`] and dispatched later by
//!   [`Endpoint::process_events`](crate::Endpoint::process_events) or
//!   [`Endpoint::drive`](crate::Endpoint::drive).
//! - After posting a finalizing event (`EndpointClose`, `SessionClose`,
//!   `StreamClose`) or after `destroy()` returns, the engine MUST NOT write
//!   that entity's buffers again.
//! - Buffer layouts follow [`crate::core::constants`].

use std::fmt;
use std::net::SocketAddr;

use bytes::Bytes;
use tokio::sync::mpsc;

use super::error::QuicResult;
use super::types::{Direction, SessionKey};
use crate::config::{EndpointOptions, SessionConfig};
use crate::event::NativeEvent;
use crate::stats::SharedBuffer;

/// Queue the engine posts its notifications to.
pub type EventSink = mpsc::UnboundedSender<NativeEvent>;

/// Factory for native endpoints.
pub trait Engine {
    /// Create and configure a native endpoint.
    ///
    /// `options` has already been validated. Binding may be deferred until
    /// the first `listen` or `connect`; a bind failure is then reported as an
    /// `EndpointClose` event.
    fn create_endpoint(
        &self,
        options: &EndpointOptions,
        events: EventSink,
    ) -> QuicResult<Box<dyn EndpointHandle>>;
}

/// Native endpoint.
pub trait EndpointHandle: Send + Sync + fmt::Debug {
    /// Stats buffer, laid out per [`endpoint_stats`](crate::core::constants::endpoint_stats).
    fn stats(&self) -> SharedBuffer;

    /// State buffer, laid out per [`endpoint_state`](crate::core::constants::endpoint_state).
    fn state(&self) -> SharedBuffer;

    /// Bound local address, if bound.
    fn address(&self) -> Option<SocketAddr>;

    /// Refuse (or accept again) new inbound sessions.
    fn mark_busy(&self, busy: bool);

    /// Start accepting inbound sessions.
    fn listen(&self, config: &SessionConfig) -> QuicResult<()>;

    /// Start a client session. `None` when the engine declines.
    fn connect(
        &self,
        address: SocketAddr,
        config: &SessionConfig,
        session_ticket: Option<&[u8]>,
    ) -> Option<Box<dyn SessionHandle>>;

    /// Stop accepting sessions and close once the remaining sessions end.
    fn close_gracefully(&self);

    /// Whether the endpoint keeps the hosting runtime alive.
    fn set_ref(&self, keep_alive: bool);
}

/// Native session.
pub trait SessionHandle: Send + Sync + fmt::Debug {
    /// Key used to route events to this session.
    fn key(&self) -> SessionKey;

    /// Stats buffer, laid out per [`session_stats`](crate::core::constants::session_stats).
    fn stats(&self) -> SharedBuffer;

    /// State buffer, laid out per [`session_state`](crate::core::constants::session_state).
    fn state(&self) -> SharedBuffer;

    /// Open a locally initiated stream. `None` when the engine declines.
    fn open_stream(&self, direction: Direction) -> Option<Box<dyn StreamHandle>>;

    /// Initiate a key update.
    fn update_key(&self);

    /// Close once open streams have ended.
    fn graceful_close(&self);

    /// Tear down immediately. No `SessionClose` event follows.
    fn destroy(&self);

    /// Queue an unreliable datagram and return its id.
    fn send_datagram(&self, payload: Bytes) -> u64;

    /// Peer address.
    fn remote_address(&self) -> Option<SocketAddr>;
}

/// Native stream.
pub trait StreamHandle: Send + Sync + fmt::Debug {
    /// Stats buffer, laid out per [`stream_stats`](crate::core::constants::stream_stats).
    fn stats(&self) -> SharedBuffer;

    /// State buffer, laid out per [`stream_state`](crate::core::constants::stream_state).
    /// Slot `ID` carries the stream id.
    fn state(&self) -> SharedBuffer;

    /// Route inbound data to `sink`. Dropping the sender signals FIN.
    fn attach_reader(&self, sink: mpsc::UnboundedSender<Bytes>);

    /// Queue outbound data.
    fn write(&self, data: Bytes) -> QuicResult<()>;

    /// Send FIN.
    fn end_write(&self);

    /// Tear down immediately. No `StreamClose` event follows.
    fn destroy(&self);
}
