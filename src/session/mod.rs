//! Sessions: one QUIC connection each.

mod datagram;
#[allow(clippy::module_inception)]
mod session;

pub use datagram::DatagramPayload;
pub use session::Session;
pub(crate) use session::WeakSession;
