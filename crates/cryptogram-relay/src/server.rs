//! UDP front end for the [`Directory`].
//!
//! One loop receives datagrams and applies them to the directory; a second
//! loop, polled in the same future, drives the keep-alive cycle. Both take the directory lock only long
//! enough to compute what must be sent, then release it before any socket
//! I/O.

use std::net::SocketAddr;
use std::sync::Arc;

use cryptogram_common::Result;
use gram_core::MAX_DATAGRAM_SIZE;
use tokio::net::UdpSocket;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::directory::{ClientState, Directory, Outbound};

/// Relay server state
pub struct RelayServer {
    socket: UdpSocket,
    directory: RwLock<Directory>,
    config: RelayConfig,
}

impl RelayServer {
    pub async fn bind(config: RelayConfig) -> Result<Self> {
        let socket = UdpSocket::bind(config.listen).await?;
        info!("Relay listening on {}", socket.local_addr()?);

        Ok(Self {
            socket,
            directory: RwLock::new(Directory::new(config.max_keepalive_misses)),
            config,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub async fn client_count(&self) -> usize {
        self.directory.read().await.len()
    }

    pub async fn client_state(&self, username: &str) -> Option<ClientState> {
        self.directory.read().await.state_of(username)
    }

    /// Serve until the future is dropped.
    ///
    /// Both loops live inside this future, so cancelling it stops the
    /// keep-alive probes too and releases this handle on the server.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        tokio::select! {
            result = self.receive_loop() => result,
            () = self.keepalive_loop() => Ok(()),
        }
    }

    async fn receive_loop(&self) -> Result<()> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            let (len, src) = match self.socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    warn!("Receive failed: {}", e);
                    continue;
                }
            };

            let outbound = {
                let mut directory = self.directory.write().await;
                directory.handle_datagram(&buf[..len], src)
            };

            match outbound {
                Ok(outbound) => self.dispatch(outbound).await,
                Err(e) => debug!("Datagram from {} dropped: {}", src, e),
            }
        }
    }

    async fn keepalive_loop(&self) {
        loop {
            let probes = self.directory.write().await.begin_probe();
            self.dispatch(probes).await;

            tokio::time::sleep(self.config.keepalive_grace).await;

            let outcome = self.directory.write().await.evaluate_probe();
            if !outcome.evicted.is_empty() {
                info!("Evicted {} unresponsive clients", outcome.evicted.len());
            }
            self.dispatch(outcome.outbound).await;
        }
    }

    async fn dispatch(&self, outbound: Vec<Outbound>) {
        for out in outbound {
            if let Err(e) = self.socket.send_to(&out.datagram, out.dest).await {
                warn!("Failed to send to {}: {}", out.dest, e);
            }
        }
    }
}
