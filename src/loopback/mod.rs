//! In-process reference engine.
//!
//! [`LoopbackNetwork`] implements [`Engine`](crate::core::traits::Engine)
//! without sockets: endpoints created from the same network reach each other
//! by address, every operation completes synchronously, and results arrive
//! as [`NativeEvent`](crate::event::NativeEvent)s on the owning endpoint's
//! queue. Stats buffers are maintained the way a real engine fills them.
//!
//! Supported versions are QUIC v1 and v2. Datagram payloads are only
//! surfaced while the receiving session has a datagram listener.

mod clock;
mod endpoint;
mod network;
pub mod recovery;
mod session;
mod stream;

pub use network::LoopbackNetwork;
