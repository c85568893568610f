//! Peer-side protocol state machine.
//!
//! ```text
//! requester                         relay                         target
//!    |-- CHAT_CMD join <target> ------>|                              |
//!    |<-------------- PEER_AVAILABLE --|-- NEW_PEER ----------------->|
//!    |-- DHKX_REQ [public] ----------->|----------------------------->|
//!    |<--------------------------------|<----------- DHKX_RES [public]|
//!    |-- MSG_CHAT, MSG_PARAMS -------->|----------------------------->|
//! ```
//!
//! [`PeerSession`] performs no I/O. Each input returns the [`Action`]s the
//! runtime has to carry out.

use bytes::Bytes;
use gram_core::{wire::FRAME_HEADER_SIZE, Message, MAX_DATAGRAM_SIZE, SERVER_NAME};
use gram_crypto::{respond, KeyExchange, PublicValue, SessionCipher};
use tracing::{debug, info, warn};

use crate::types::{ClientCommand, ClientEvent, ConnectionState, CryptoState, SessionError};

/// AES-GCM authentication tag appended to every ciphertext.
const AUTH_TAG_SIZE: usize = 16;

/// Longest plaintext whose MSG_CHAT still fits in one datagram.
pub const MAX_PLAINTEXT_SIZE: usize = MAX_DATAGRAM_SIZE - FRAME_HEADER_SIZE - AUTH_TAG_SIZE;

/// Placeholder when PEER_AVAILABLE arrives without a join we remember.
const UNKNOWN_PEER: &str = "peer";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Send to the relay
    Send(Message),
    /// Notify the presentation layer
    Emit(ClientEvent),
}

fn log(line: impl Into<String>) -> Action {
    Action::Emit(ClientEvent::Log(line.into()))
}

#[derive(Debug)]
pub struct PeerSession {
    username: String,
    state: ConnectionState,
    crypto: CryptoState,
    peer: Option<String>,
    /// Target of the last join we sent
    requested_peer: Option<String>,
    /// MSG_CHAT waiting for its MSG_PARAMS
    pending_ciphertext: Option<Bytes>,
    /// DHKX_REQ that overtook its NEW_PEER
    early_request: Option<Bytes>,
}

impl PeerSession {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            state: ConnectionState::Disconnected,
            crypto: CryptoState::Idle,
            peer: None,
            requested_peer: None,
            pending_ciphertext: None,
            early_request: None,
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn crypto(&self) -> &CryptoState {
        &self.crypto
    }

    pub fn peer(&self) -> Option<&str> {
        self.peer.as_deref()
    }

    /// Fingerprint of the current session key, once keyed.
    pub fn fingerprint(&self) -> Option<&str> {
        match &self.crypto {
            CryptoState::Established(cipher) => Some(cipher.fingerprint()),
            _ => None,
        }
    }

    pub fn login(&mut self) -> Vec<Action> {
        let mut actions = vec![Action::Send(Message::Login {
            username: self.username.clone(),
        })];
        self.set_state(ConnectionState::LoggingIn, &mut actions);
        actions
    }

    pub fn handle_command(&mut self, command: ClientCommand) -> Vec<Action> {
        if self.state == ConnectionState::Closed {
            return Vec::new();
        }

        let logged_in = matches!(
            self.state,
            ConnectionState::LoggedIn | ConnectionState::Conversing
        );
        if !logged_in && command != ClientCommand::Logout {
            return vec![log(SessionError::NotLoggedIn.to_string())];
        }

        match command {
            ClientCommand::Chat(text) => match self.seal(&text) {
                Ok(messages) => messages.into_iter().map(Action::Send).collect(),
                Err(e) => {
                    debug!("Chat not sent: {}", e);
                    vec![log(format!("Message not sent: {e}."))]
                }
            },
            ClientCommand::List => vec![self.server_command("list")],
            ClientCommand::Join(target) => {
                let action = self.server_command(&format!("join {target}"));
                self.requested_peer = Some(target);
                vec![action]
            }
            ClientCommand::Leave => {
                let mut actions = vec![Action::Send(Message::PeerLeft {
                    text: String::new(),
                })];
                if self.state == ConnectionState::Conversing {
                    self.end_conversation(&mut actions);
                }
                actions
            }
            ClientCommand::Logout => {
                let mut actions = vec![Action::Send(Message::Logout {
                    username: self.username.clone(),
                })];
                self.reset_conversation();
                self.set_state(ConnectionState::Closed, &mut actions);
                info!("{} logged out", self.username);
                actions
            }
        }
    }

    pub fn handle_message(&mut self, message: Message) -> Vec<Action> {
        let mut actions = Vec::new();

        // A held ciphertext is only valid if its params come next.
        if !matches!(message, Message::Params { .. } | Message::KeepAlive)
            && self.pending_ciphertext.take().is_some()
        {
            self.decrypt_failed(SessionError::MissingParams, &mut actions);
        }

        match message {
            Message::Login { username } => self.on_login_ack(username, &mut actions),
            Message::KeepAlive => actions.push(Action::Send(Message::KeepAlive)),
            Message::ChatCommand { username, text } => {
                actions.push(Action::Emit(ClientEvent::Notice {
                    from: username.trim().to_string(),
                    text: text.trim().to_string(),
                }));
            }
            Message::PeerAvailable => self.on_peer_available(&mut actions),
            Message::PeerBusy => {
                let target = self
                    .requested_peer
                    .take()
                    .unwrap_or_else(|| "That user".to_string());
                actions.push(Action::Emit(ClientEvent::Notice {
                    from: SERVER_NAME.to_string(),
                    text: format!("{target} is already in a conversation."),
                }));
            }
            Message::NewPeer { username, text } => {
                self.on_new_peer(username, text, &mut actions)
            }
            Message::PeerLeft { text } => {
                if self.state == ConnectionState::Conversing {
                    self.end_conversation(&mut actions);
                }
                actions.push(Action::Emit(ClientEvent::ConversationEnded {
                    text: text.trim().to_string(),
                }));
            }
            Message::KeyExchangeRequest { public_key } => {
                self.on_exchange_request(&public_key, &mut actions)
            }
            Message::KeyExchangeResponse { public_key } => {
                self.on_exchange_response(&public_key, &mut actions)
            }
            Message::Chat { ciphertext } => self.pending_ciphertext = Some(ciphertext),
            Message::Params { params } => match self.pending_ciphertext.take() {
                Some(ciphertext) => match self.open(&ciphertext, &params) {
                    Ok(text) => actions.push(Action::Emit(ClientEvent::ChatReceived {
                        from: self.peer.clone().unwrap_or_else(|| UNKNOWN_PEER.to_string()),
                        text,
                    })),
                    Err(e) => self.decrypt_failed(e, &mut actions),
                },
                None => self.decrypt_failed(SessionError::UnexpectedParams, &mut actions),
            },
            Message::Logout { .. } => debug!("Ignoring LOGOUT from the relay"),
        }

        actions
    }

    fn on_login_ack(&mut self, username: String, actions: &mut Vec<Action>) {
        let username = username.trim().to_string();
        if username != self.username {
            info!("Relay assigned username {} (asked for {})", username, self.username);
            self.username = username;
        }

        if self.state == ConnectionState::LoggingIn {
            self.set_state(ConnectionState::LoggedIn, actions);
            actions.push(Action::Emit(ClientEvent::LoggedIn {
                username: self.username.clone(),
            }));
        }
    }

    fn on_peer_available(&mut self, actions: &mut Vec<Action>) {
        let peer = self
            .requested_peer
            .take()
            .unwrap_or_else(|| UNKNOWN_PEER.to_string());

        let exchange = KeyExchange::initiate();
        actions.push(Action::Send(Message::KeyExchangeRequest {
            public_key: exchange.public_value().to_bytes(),
        }));
        self.crypto = CryptoState::Initiating(exchange);
        self.pending_ciphertext = None;
        self.early_request = None;
        self.peer = Some(peer.clone());

        info!("Starting key exchange with {}", peer);
        self.set_state(ConnectionState::Conversing, actions);
        actions.push(Action::Emit(ClientEvent::ConversationStarted { peer }));
    }

    fn on_new_peer(&mut self, username: String, text: String, actions: &mut Vec<Action>) {
        let username = username.trim().to_string();
        self.crypto = CryptoState::Idle;
        self.pending_ciphertext = None;
        self.requested_peer = None;
        self.peer = Some(username.clone());

        self.set_state(ConnectionState::Conversing, actions);
        actions.push(Action::Emit(ClientEvent::Notice {
            from: SERVER_NAME.to_string(),
            text: text.trim().to_string(),
        }));
        actions.push(Action::Emit(ClientEvent::ConversationStarted { peer: username }));

        if let Some(public_key) = self.early_request.take() {
            debug!("Answering key-exchange request that arrived before NEW_PEER");
            self.on_exchange_request(&public_key, actions);
        }
    }

    fn on_exchange_request(&mut self, public_key: &Bytes, actions: &mut Vec<Action>) {
        match self.state {
            ConnectionState::Conversing => {}
            // Datagrams may be reordered, so NEW_PEER can still be on its way.
            ConnectionState::LoggedIn => {
                debug!("DHKX_REQ before NEW_PEER, holding it");
                self.early_request = Some(public_key.clone());
                return;
            }
            _ => {
                warn!("DHKX_REQ outside a conversation, ignoring");
                return;
            }
        }

        let theirs = match PublicValue::from_bytes(public_key) {
            Ok(value) => value,
            Err(e) => {
                warn!("Bad key-exchange request: {}", e);
                actions.push(log(format!("Key exchange failed: {e}.")));
                return;
            }
        };

        // Both sides initiated: the higher public value keeps its exchange
        // and waits for the response, the lower one answers.
        if let CryptoState::Initiating(exchange) = &self.crypto {
            if exchange.public_value().as_bytes() > theirs.as_bytes() {
                debug!("Simultaneous key exchange, keeping ours");
                return;
            }
        }

        match respond(&theirs) {
            Ok((ours, key)) => {
                actions.push(Action::Send(Message::KeyExchangeResponse {
                    public_key: ours.to_bytes(),
                }));
                self.establish(SessionCipher::new(&key), actions);
            }
            Err(e) => {
                warn!("Key agreement failed: {}", e);
                self.crypto = CryptoState::Idle;
                actions.push(log(format!("Key exchange failed: {e}.")));
            }
        }
    }

    fn on_exchange_response(&mut self, public_key: &[u8], actions: &mut Vec<Action>) {
        let exchange = match std::mem::replace(&mut self.crypto, CryptoState::Idle) {
            CryptoState::Initiating(exchange) => exchange,
            other => {
                warn!("DHKX_RES without a pending exchange, ignoring");
                self.crypto = other;
                return;
            }
        };

        let completed = PublicValue::from_bytes(public_key)
            .and_then(|theirs| exchange.complete(&theirs));

        match completed {
            Ok(key) => self.establish(SessionCipher::new(&key), actions),
            Err(e) => {
                warn!("Key agreement failed: {}", e);
                actions.push(log(format!("Key exchange failed: {e}.")));
            }
        }
    }

    fn establish(&mut self, cipher: SessionCipher, actions: &mut Vec<Action>) {
        let peer = self
            .peer
            .clone()
            .unwrap_or_else(|| UNKNOWN_PEER.to_string());
        let fingerprint = cipher.fingerprint().to_string();

        info!("Secure channel with {} established ({})", peer, fingerprint);
        self.crypto = CryptoState::Established(cipher);
        actions.push(Action::Emit(ClientEvent::SecureChannel { peer, fingerprint }));
    }

    fn seal(&self, text: &str) -> Result<[Message; 2], SessionError> {
        let CryptoState::Established(cipher) = &self.crypto else {
            return Err(SessionError::NoSecureChannel);
        };
        if text.len() > MAX_PLAINTEXT_SIZE {
            return Err(SessionError::MessageTooLong(text.len(), MAX_PLAINTEXT_SIZE));
        }

        Ok(cipher.encrypt(text.as_bytes())?.into_messages())
    }

    fn open(&self, ciphertext: &[u8], params: &[u8]) -> Result<String, SessionError> {
        let CryptoState::Established(cipher) = &self.crypto else {
            return Err(SessionError::NoSecureChannel);
        };

        let plaintext = cipher.decrypt(ciphertext, params)?;
        String::from_utf8(plaintext).map_err(|_| SessionError::InvalidUtf8)
    }

    fn decrypt_failed(&self, error: SessionError, actions: &mut Vec<Action>) {
        warn!("Could not decrypt message: {}", error);
        actions.push(Action::Emit(ClientEvent::DecryptFailed {
            reason: error.to_string(),
        }));
    }

    fn server_command(&self, text: &str) -> Action {
        Action::Send(Message::ChatCommand {
            username: self.username.clone(),
            text: text.to_string(),
        })
    }

    fn end_conversation(&mut self, actions: &mut Vec<Action>) {
        if let Some(peer) = &self.peer {
            info!("Conversation with {} ended", peer);
        }
        self.reset_conversation();
        self.set_state(ConnectionState::LoggedIn, actions);
    }

    /// Drop the partner and every piece of key material.
    fn reset_conversation(&mut self) {
        self.crypto = CryptoState::Idle;
        self.peer = None;
        self.pending_ciphertext = None;
        self.early_request = None;
    }

    fn set_state(&mut self, state: ConnectionState, actions: &mut Vec<Action>) {
        if self.state != state {
            debug!("{:?} -> {:?}", self.state, state);
            self.state = state;
            actions.push(Action::Emit(ClientEvent::StateChanged(state)));
        }
    }
}
