//! Native notifications, typed application events and listener registries.

mod listeners;
mod native;
mod types;

pub use listeners::Subscription;
pub(crate) use listeners::Listeners;
pub use native::{
    EventKind, HandshakeInfo, NativeEvent, PathValidationInfo, Target, VersionNegotiationInfo,
};
pub use types::{
    DatagramEvent, DatagramStatusEvent, EndpointEvent, EndpointEventKind, HandshakeEvent,
    NewSessionEvent, PathValidationEvent, SessionEvent, SessionEventKind, SessionTicketEvent,
    StreamEvent, VersionNegotiationEvent,
};
