//! Endpoints: a local binding that accepts and initiates sessions.

#[allow(clippy::module_inception)]
mod endpoint;
#[cfg(test)]
pub(crate) mod testing;

pub use endpoint::Endpoint;
pub(crate) use endpoint::WeakEndpoint;
