use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use gram_core::DEFAULT_SERVER_PORT;

use crate::directory::DEFAULT_MAX_KEEPALIVE_MISSES;

/// How long clients get to echo a keep-alive probe.
pub const DEFAULT_KEEPALIVE_GRACE: Duration = Duration::from_secs(2);

/// Relay runtime configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// UDP listen address
    pub listen: SocketAddr,
    /// Wait between broadcasting a probe and evaluating responses
    pub keepalive_grace: Duration,
    /// Consecutive misses before eviction
    pub max_keepalive_misses: u32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self::with_port(DEFAULT_SERVER_PORT)
    }
}

impl RelayConfig {
    /// Listen on all interfaces at `port`.
    pub fn with_port(port: u16) -> Self {
        Self {
            listen: SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
            keepalive_grace: DEFAULT_KEEPALIVE_GRACE,
            max_keepalive_misses: DEFAULT_MAX_KEEPALIVE_MISSES,
        }
    }
}

/// Parse the optional port argument. `None` means the caller should fall
/// back to the default port.
pub fn parse_port(raw: Option<&str>) -> Option<u16> {
    raw?.trim().parse().ok()
}
