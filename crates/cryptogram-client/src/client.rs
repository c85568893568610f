use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use anyhow::Result;
use gram_core::{Message, MAX_DATAGRAM_SIZE};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::session::{Action, PeerSession};
use crate::types::{ClientCommand, ClientConfig, ClientEvent, ConnectionState};

/// Run one peer session until logout or until `commands` closes.
///
/// Events are delivered on `events`; a dropped receiver is tolerated.
pub async fn run_client(
    config: ClientConfig,
    mut commands: mpsc::Receiver<ClientCommand>,
    events: mpsc::Sender<ClientEvent>,
) -> Result<()> {
    let bind_addr: SocketAddr = if config.server_addr.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = UdpSocket::bind(bind_addr).await?;
    info!(
        "Client bound to {}, relay at {}",
        socket.local_addr()?,
        config.server_addr
    );

    let runtime = Runtime {
        socket: &socket,
        server: config.server_addr,
        events: &events,
    };
    let mut session = PeerSession::new(config.username);
    runtime.perform(session.login()).await;

    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    while session.state() != ConnectionState::Closed {
        tokio::select! {
            result = socket.recv_from(&mut buf) => {
                let (len, src) = match result {
                    Ok(received) => received,
                    Err(e) => {
                        warn!("Receive failed: {}", e);
                        continue;
                    }
                };
                if src != config.server_addr {
                    debug!("Ignoring datagram from {}", src);
                    continue;
                }
                match Message::decode(&buf[..len]) {
                    Ok(message) => runtime.perform(session.handle_message(message)).await,
                    Err(e) => debug!("Undecodable frame from {}: {}", src, e),
                }
            }
            command = commands.recv() => {
                let command = command.unwrap_or_else(|| {
                    debug!("Command channel closed, logging out");
                    ClientCommand::Logout
                });
                runtime.perform(session.handle_command(command)).await;
            }
        }
    }

    info!("Session for {} closed", session.username());
    Ok(())
}

struct Runtime<'a> {
    socket: &'a UdpSocket,
    server: SocketAddr,
    events: &'a mpsc::Sender<ClientEvent>,
}

impl Runtime<'_> {
    async fn perform(&self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Send(message) => {
                    if let Err(e) = self.socket.send_to(&message.encode(), self.server).await {
                        warn!("Failed to send {:?}: {}", message.message_type(), e);
                    }
                }
                Action::Emit(event) => {
                    if self.events.send(event).await.is_err() {
                        debug!("Event receiver dropped");
                    }
                }
            }
        }
    }
}
