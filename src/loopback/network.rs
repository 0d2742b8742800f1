//! The simulated network: address registry and engine entry point.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::trace;

use super::endpoint::{EndpointCore, LoopbackEndpoint};
use crate::config::EndpointOptions;
use crate::core::constants::UV_EADDRINUSE;
use crate::core::error::QuicResult;
use crate::core::traits::{Engine, EndpointHandle, EventSink};
use crate::core::types::SessionKey;

/// First port handed out for ephemeral binds.
const EPHEMERAL_PORT_START: u16 = 49152;

/// Default one-way latency of a simulated path.
const DEFAULT_LATENCY: Duration = Duration::from_millis(10);

struct NetworkShared {
    bindings: Mutex<HashMap<SocketAddr, Weak<EndpointCore>>>,
    next_port: Mutex<u16>,
    next_key: AtomicU64,
    latency: Duration,
}

/// In-process engine connecting endpoints created from the same network.
///
/// Everything happens synchronously inside the calling thread; results are
/// posted to each endpoint's event queue as a real engine would.
#[derive(Clone)]
pub struct LoopbackNetwork {
    shared: Arc<NetworkShared>,
}

impl LoopbackNetwork {
    /// Network with the default simulated latency.
    pub fn new() -> Self {
        Self::with_latency(DEFAULT_LATENCY)
    }

    /// Network whose paths report `latency` one way. Nothing actually waits;
    /// the value only feeds RTT stats.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            shared: Arc::new(NetworkShared {
                bindings: Mutex::new(HashMap::new()),
                next_port: Mutex::new(EPHEMERAL_PORT_START),
                next_key: AtomicU64::new(1),
                latency,
            }),
        }
    }

    /// Round-trip time of every simulated path.
    pub fn rtt(&self) -> Duration {
        self.shared.latency * 2
    }

    /// Bind `requested` (or an ephemeral port) to `core`. Fails with the
    /// native status when the address is taken.
    pub(crate) fn bind(
        &self,
        requested: Option<SocketAddr>,
        core: &Arc<EndpointCore>,
    ) -> Result<SocketAddr, i32> {
        let mut bindings = self.shared.bindings.lock();
        bindings.retain(|_, bound| bound.strong_count() > 0);

        let address = match requested {
            Some(address) if address.port() != 0 => {
                if bindings.contains_key(&address) {
                    return Err(UV_EADDRINUSE);
                }
                address
            }
            requested => {
                let ip = requested.map_or(IpAddr::V4(Ipv4Addr::LOCALHOST), |a| a.ip());
                let mut next_port = self.shared.next_port.lock();
                loop {
                    let candidate = SocketAddr::new(ip, *next_port);
                    *next_port = next_port.checked_add(1).unwrap_or(EPHEMERAL_PORT_START);
                    if !bindings.contains_key(&candidate) {
                        break candidate;
                    }
                }
            }
        };
        bindings.insert(address, Arc::downgrade(core));
        trace!(%address, "loopback bound");
        Ok(address)
    }

    pub(crate) fn unbind(&self, address: SocketAddr) {
        self.shared.bindings.lock().remove(&address);
        trace!(%address, "loopback unbound");
    }

    pub(crate) fn lookup(&self, address: SocketAddr) -> Option<Arc<EndpointCore>> {
        self.shared
            .bindings
            .lock()
            .get(&address)
            .and_then(Weak::upgrade)
    }

    pub(crate) fn next_key(&self) -> SessionKey {
        SessionKey(self.shared.next_key.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn latency(&self) -> Duration {
        self.shared.latency
    }
}

impl Default for LoopbackNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LoopbackNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackNetwork")
            .field("bindings", &self.shared.bindings.lock().len())
            .field("latency", &self.shared.latency)
            .finish()
    }
}

impl Engine for LoopbackNetwork {
    fn create_endpoint(
        &self,
        options: &EndpointOptions,
        events: EventSink,
    ) -> QuicResult<Box<dyn EndpointHandle>> {
        let core = EndpointCore::new(self.clone(), options, events);
        Ok(Box::new(LoopbackEndpoint::new(core)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_unique() {
        let network = LoopbackNetwork::new();
        assert_ne!(network.next_key(), network.next_key());
        assert_eq!(network.rtt(), DEFAULT_LATENCY * 2);
    }
}
