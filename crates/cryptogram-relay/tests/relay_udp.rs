//! Relay behaviour over real loopback sockets.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use cryptogram_relay::{ClientState, RelayConfig, RelayServer};
use gram_core::{Message, MAX_DATAGRAM_SIZE};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

async fn start_relay(grace: Duration) -> (Arc<RelayServer>, SocketAddr, JoinHandle<()>) {
    let config = RelayConfig {
        listen: "127.0.0.1:0".parse().unwrap(),
        keepalive_grace: grace,
        ..RelayConfig::default()
    };
    let server = Arc::new(RelayServer::bind(config).await.unwrap());
    let addr = server.local_addr().unwrap();
    let handle = tokio::spawn({
        let server = Arc::clone(&server);
        async move {
            let _ = server.run().await;
        }
    });
    (server, addr, handle)
}

/// A client that answers keep-alive probes in the background and queues
/// everything else.
struct TestPeer {
    socket: Arc<UdpSocket>,
    relay: SocketAddr,
    inbox: mpsc::UnboundedReceiver<Message>,
    reader: JoinHandle<()>,
}

impl TestPeer {
    async fn connect(relay: SocketAddr) -> Self {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let (tx, inbox) = mpsc::unbounded_channel();

        let reader = tokio::spawn({
            let socket = Arc::clone(&socket);
            async move {
                let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
                loop {
                    let Ok((len, src)) = socket.recv_from(&mut buf).await else {
                        return;
                    };
                    match Message::decode(&buf[..len]) {
                        Ok(Message::KeepAlive) => {
                            let _ = socket.send_to(&Message::KeepAlive.encode(), src).await;
                        }
                        Ok(message) => {
                            if tx.send(message).is_err() {
                                return;
                            }
                        }
                        Err(e) => panic!("relay sent an undecodable frame: {}", e),
                    }
                }
            }
        });

        Self {
            socket,
            relay,
            inbox,
            reader,
        }
    }

    async fn send(&self, message: &Message) {
        self.socket
            .send_to(&message.encode(), self.relay)
            .await
            .unwrap();
    }

    async fn command(&self, username: &str, text: &str) {
        self.send(&Message::ChatCommand {
            username: username.into(),
            text: text.into(),
        })
        .await;
    }

    async fn recv(&mut self) -> Message {
        timeout(Duration::from_secs(5), self.inbox.recv())
            .await
            .expect("timed out waiting for the relay")
            .expect("reader stopped")
    }

    async fn login(&mut self, name: &str) -> String {
        self.send(&Message::Login {
            username: name.into(),
        })
        .await;
        match self.recv().await {
            Message::Login { username } => username,
            other => panic!("expected login ack, got {:?}", other),
        }
    }
}

impl Drop for TestPeer {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[tokio::test]
async fn test_duplicate_login_over_udp() {
    let (_server, relay, handle) = start_relay(Duration::from_secs(2)).await;

    let mut first = TestPeer::connect(relay).await;
    let mut second = TestPeer::connect(relay).await;

    assert_eq!(first.login("dana").await, "dana");
    assert_eq!(second.login("dana").await, "dana0");

    first.command("dana", "list").await;
    assert_eq!(
        first.recv().await,
        Message::server_notice("Available users:\n - dana (you)\n - dana0\n")
    );

    handle.abort();
}

#[tokio::test]
async fn test_conversation_is_relayed_verbatim() {
    let (server, relay, handle) = start_relay(Duration::from_secs(2)).await;

    let mut alice = TestPeer::connect(relay).await;
    let mut bob = TestPeer::connect(relay).await;
    alice.login("alice").await;
    bob.login("bob").await;

    alice.command("alice", "join bob").await;
    assert_eq!(alice.recv().await, Message::PeerAvailable);
    assert_eq!(
        bob.recv().await,
        Message::NewPeer {
            username: "alice".into(),
            text: "Entering a conversation with alice.".into(),
        }
    );
    assert_eq!(server.client_state("alice").await, Some(ClientState::Paired));

    let request = Message::KeyExchangeRequest {
        public_key: Bytes::from(vec![0x2f; 32]),
    };
    alice.send(&request).await;
    assert_eq!(bob.recv().await, request);

    let chat = Message::Chat {
        ciphertext: Bytes::from_static(b"\x01/\x02/\x03"),
    };
    let params = Message::Params {
        params: Bytes::from(vec![7u8; 12]),
    };
    bob.send(&chat).await;
    bob.send(&params).await;
    assert_eq!(alice.recv().await, chat);
    assert_eq!(alice.recv().await, params);

    bob.send(&Message::PeerLeft { text: String::new() }).await;
    assert_eq!(
        alice.recv().await,
        Message::PeerLeft {
            text: "bob has left. You have been returned to the lobby.".into()
        }
    );
    assert_eq!(
        bob.recv().await,
        Message::server_notice("You have left the conversation with alice.")
    );

    bob.send(&chat).await;
    assert_eq!(
        bob.recv().await,
        Message::server_notice("You are not in a conversation.")
    );

    handle.abort();
}

#[tokio::test]
async fn test_busy_and_unknown_targets() {
    let (_server, relay, handle) = start_relay(Duration::from_secs(2)).await;

    let mut alice = TestPeer::connect(relay).await;
    let mut bob = TestPeer::connect(relay).await;
    let mut carol = TestPeer::connect(relay).await;
    alice.login("alice").await;
    bob.login("bob").await;
    carol.login("carol").await;

    alice.command("alice", "join bob").await;
    assert_eq!(alice.recv().await, Message::PeerAvailable);
    let _ = bob.recv().await;

    carol.command("carol", "join alice").await;
    assert_eq!(carol.recv().await, Message::PeerBusy);

    carol.command("carol", "join dave").await;
    assert_eq!(carol.recv().await, Message::server_notice("User not found."));

    handle.abort();
}

#[tokio::test]
async fn test_logout_returns_partner_to_lobby() {
    let (server, relay, handle) = start_relay(Duration::from_secs(2)).await;

    let mut alice = TestPeer::connect(relay).await;
    let mut bob = TestPeer::connect(relay).await;
    alice.login("alice").await;
    bob.login("bob").await;

    bob.command("bob", "join alice").await;
    assert_eq!(bob.recv().await, Message::PeerAvailable);

    alice
        .send(&Message::Logout {
            username: "alice".into(),
        })
        .await;

    // NEW_PEER arrived before the logout.
    assert!(matches!(alice.recv().await, Message::NewPeer { .. }));
    assert_eq!(
        bob.recv().await,
        Message::PeerLeft {
            text: "alice has left. You have been returned to the lobby.".into()
        }
    );
    assert_eq!(server.client_state("alice").await, None);
    assert_eq!(server.client_state("bob").await, Some(ClientState::Registered));

    handle.abort();
}

#[tokio::test]
async fn test_silent_client_is_evicted() {
    let (server, relay, handle) = start_relay(Duration::from_millis(50)).await;

    let mut alice = TestPeer::connect(relay).await;
    alice.login("alice").await;

    // Logs in, then never answers a probe.
    let ghost = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    ghost
        .send_to(&Message::Login { username: "ghost".into() }.encode(), relay)
        .await
        .unwrap();
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    loop {
        let (len, _) = timeout(Duration::from_secs(5), ghost.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        if matches!(Message::decode(&buf[..len]), Ok(Message::Login { .. })) {
            break;
        }
    }

    alice.command("alice", "join ghost").await;
    assert_eq!(alice.recv().await, Message::PeerAvailable);

    assert_eq!(
        alice.recv().await,
        Message::PeerLeft {
            text: "ghost has left. You have been returned to the lobby.".into()
        }
    );
    assert_eq!(server.client_state("ghost").await, None);
    assert_eq!(server.client_state("alice").await, Some(ClientState::Registered));
    assert_eq!(server.client_count().await, 1);

    handle.abort();
}

#[tokio::test]
async fn test_garbage_is_ignored() {
    let (server, relay, handle) = start_relay(Duration::from_secs(2)).await;

    let mut alice = TestPeer::connect(relay).await;
    alice.socket.send_to(b"x", relay).await.unwrap();
    alice.socket.send_to(b"99/what", relay).await.unwrap();
    alice.socket.send_to(b"10/not registered", relay).await.unwrap();

    assert_eq!(alice.login("alice").await, "alice");
    assert_eq!(server.client_count().await, 1);

    handle.abort();
}

#[tokio::test]
async fn test_cancelled_relay_stops_probing() {
    let (server, relay, handle) = start_relay(Duration::from_millis(20)).await;

    let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    peer.send_to(&Message::Login { username: "alice".into() }.encode(), relay)
        .await
        .unwrap();

    // Wait for the first probe so the keep-alive loop is known to be live.
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    loop {
        let (len, _) = timeout(Duration::from_secs(5), peer.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        if Message::decode(&buf[..len]) == Ok(Message::KeepAlive) {
            break;
        }
    }

    handle.abort();
    assert!(handle.await.unwrap_err().is_cancelled());
    assert_eq!(Arc::strong_count(&server), 1);

    // Drain anything already in flight, then expect silence.
    for _ in 0..4 {
        if timeout(Duration::from_millis(50), peer.recv_from(&mut buf)).await.is_err() {
            break;
        }
    }
    let quiet = timeout(Duration::from_millis(200), peer.recv_from(&mut buf)).await;
    assert!(quiet.is_err(), "relay kept probing after cancellation");
}
