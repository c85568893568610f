//! Common helper functions for CryptoGram.

use std::net::{SocketAddr, ToSocketAddrs};

use crate::{Error, Result};

/// Resolve `host` or `host:port` to a socket address.
///
/// A bare host gets `default_port`. The first resolved address wins.
pub fn resolve_server_addr(input: &str, default_port: u16) -> Result<SocketAddr> {
    let input = input.trim();
    if input.is_empty() {
        return Err(Error::config("server address is empty"));
    }

    if let Ok(addr) = input.parse::<SocketAddr>() {
        return Ok(addr);
    }

    let target = if input.contains(':') {
        input.to_string()
    } else {
        format!("{input}:{default_port}")
    };

    target
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| Error::config(format!("no address found for {input}")))
}
