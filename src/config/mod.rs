//! Endpoint and session configuration.
//!
//! Options deserialize from the camelCase JSON shape used by the scripting
//! surface (unknown keys are ignored) or are built programmatically. Every
//! option set is validated before the engine sees it.

mod de;
mod endpoint;
mod session;
mod tls;

pub use endpoint::{CongestionControl, EndpointOptions, EndpointOptionsBuilder, TokenSecret};
pub use session::{
    ApplicationOptions, PreferredAddressPolicy, SessionConfig, SessionOptions, TransportParams,
};
pub use tls::{KeyKind, KeyObject, TlsOptions};
