//! # quic-endpoint
//!
//! Object model over a native QUIC engine: endpoints, sessions and streams
//! with their lifecycle state machines, event dispatch and stats views.
//!
//! - **Endpoints** bind a local address, listen for inbound sessions and
//!   initiate outbound ones.
//! - **Sessions** carry streams and unreliable datagrams and report
//!   handshake, path validation, tickets and version negotiation.
//! - **Streams** expose a byte reader and writer.
//!
//! Every entity shares its counters and flags with the engine through
//! fixed-layout `u64` buffers. The views read them live until the entity
//! finalizes, then keep a frozen copy.
//!
//! ## Feature Flags
//!
//! - `loopback` (default): [`loopback::LoopbackNetwork`], an in-process
//!   engine for tests and examples
//!
//! ## Modules
//!
//! - [`core`]: errors, constants, ids and the engine boundary traits
//! - [`config`]: endpoint and session options
//! - [`endpoint`], [`session`], [`stream`]: the entities
//! - [`event`]: typed events and subscriptions
//! - [`stats`]: stats and state views
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use quic_endpoint::prelude::*;
//!
//! # fn main() -> QuicResult<()> {
//! let network = LoopbackNetwork::new();
//!
//! let server = Endpoint::new(&network, EndpointOptions::default())?;
//! server.listen(SessionOptions::default().with_alpn("h3"))?;
//! let address = server.address().expect("bound after listen");
//!
//! let client = Endpoint::new(&network, EndpointOptions::default())?;
//! let session = client.connect(address, SessionOptions::default().with_alpn("h3"))?;
//!
//! client.process_events();
//! server.process_events();
//!
//! let stream = session.open_bidirectional_stream()?;
//! stream.writer().expect("bidirectional").write("hello")?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod config;
pub mod core;
pub mod endpoint;
pub mod event;
pub mod session;
pub mod stats;
pub mod stream;

// In-process engine (feature-gated)
#[cfg(feature = "loopback")]
#[cfg_attr(docsrs, doc(cfg(feature = "loopback")))]
pub mod loopback;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::{EndpointOptions, SessionOptions};
    pub use crate::core::{
        CloseContext, CloseError, Closed, Direction, Engine, QuicError, QuicResult, SessionKey,
        StreamId,
    };
    pub use crate::endpoint::Endpoint;
    pub use crate::event::{EndpointEvent, SessionEvent, SessionEventKind, Subscription};
    pub use crate::session::{DatagramPayload, Session};
    pub use crate::stream::{Stream, StreamKind};

    #[cfg(feature = "loopback")]
    pub use crate::loopback::LoopbackNetwork;
}

// Re-export commonly used items at crate root
pub use core::{CloseError, Closed, QuicError, QuicResult};
pub use endpoint::Endpoint;
pub use session::Session;
pub use stream::Stream;

#[cfg(feature = "loopback")]
pub use loopback::LoopbackNetwork;
