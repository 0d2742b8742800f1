//! Streams and their byte channels.

mod channel;
#[allow(clippy::module_inception)]
mod stream;

pub use channel::{StreamReader, StreamWriter};
pub use stream::{Stream, StreamKind};
