//! Client registry and pairing state machine.
//!
//! Lifecycle of a client identity:
//! - UNREGISTERED: no record
//! - REGISTERED: logged in, in the lobby, available for pairing
//! - PAIRED: in exactly one conversation; relayed payloads flow to the partner
//! - back to UNREGISTERED on logout or keep-alive eviction (record removed)
//!
//! The directory performs no I/O. Every operation returns the datagrams the
//! server has to send, so the whole state machine is testable without
//! sockets.

use std::net::SocketAddr;

use bytes::Bytes;
use gram_core::{wire::FIELD_SEPARATOR, Message, MessageType, WireError, SERVER_NAME};
use tracing::{debug, info, warn};

/// Consecutive missed probes after which a client is evicted.
pub const DEFAULT_MAX_KEEPALIVE_MISSES: u32 = 5;

/// Name given to a login whose requested name is empty.
const ANONYMOUS_NAME: &str = "anonymous";

/// Externally visible state of a registered client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// In the lobby, available for pairing
    Registered,
    /// In a conversation
    Paired,
}

/// One connected peer.
#[derive(Debug, Clone)]
pub struct ClientRecord {
    /// Unique within the directory
    pub username: String,
    /// Routing destination
    pub endpoint: SocketAddr,
    /// Consecutive keep-alive cycles without a response
    pub liveness_misses: u32,
    /// Whether a keep-alive echo arrived during the current probe
    responded: bool,
}

impl ClientRecord {
    fn new(username: String, endpoint: SocketAddr) -> Self {
        Self {
            username,
            endpoint,
            liveness_misses: 0,
            responded: true,
        }
    }
}

/// Two clients currently in a conversation. Unordered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationPair {
    first: String,
    second: String,
}

impl ConversationPair {
    fn new(first: &str, second: &str) -> Self {
        Self {
            first: first.to_string(),
            second: second.to_string(),
        }
    }

    pub fn contains(&self, username: &str) -> bool {
        self.first == username || self.second == username
    }

    pub fn partner_of(&self, username: &str) -> Option<&str> {
        if self.first == username {
            Some(&self.second)
        } else if self.second == username {
            Some(&self.first)
        } else {
            None
        }
    }

    pub fn members(&self) -> (&str, &str) {
        (&self.first, &self.second)
    }
}

/// A datagram the server must send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub dest: SocketAddr,
    pub datagram: Bytes,
}

impl Outbound {
    fn message(dest: SocketAddr, message: &Message) -> Self {
        Self {
            dest,
            datagram: message.encode(),
        }
    }

    fn forward(dest: SocketAddr, datagram: Bytes) -> Self {
        Self { dest, datagram }
    }
}

/// Result of evaluating one keep-alive cycle.
#[derive(Debug, Default)]
pub struct ProbeOutcome {
    pub outbound: Vec<Outbound>,
    pub evicted: Vec<String>,
}

/// Reasons an inbound datagram produced no directory change.
#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] WireError),
    #[error("datagram from unregistered endpoint {0}")]
    UnknownSender(SocketAddr),
    #[error("{username} is not registered at {src}")]
    EndpointMismatch { username: String, src: SocketAddr },
    #[error("unexpected {0:?} from a client")]
    UnexpectedType(MessageType),
}

/// Registry of clients, conversation pairs and liveness counters.
#[derive(Debug)]
pub struct Directory {
    clients: Vec<ClientRecord>,
    pairs: Vec<ConversationPair>,
    max_keepalive_misses: u32,
}

impl Default for Directory {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_KEEPALIVE_MISSES)
    }
}

impl Directory {
    pub fn new(max_keepalive_misses: u32) -> Self {
        Self {
            clients: Vec::new(),
            pairs: Vec::new(),
            max_keepalive_misses: max_keepalive_misses.max(1),
        }
    }

    /// Decode one datagram and apply it.
    pub fn handle_datagram(
        &mut self,
        datagram: &[u8],
        src: SocketAddr,
    ) -> Result<Vec<Outbound>, PacketError> {
        let message = Message::decode(datagram)?;

        match message {
            Message::Login { username } => Ok(self.login(&username, src)),
            Message::KeepAlive => {
                self.record_keep_alive(src)?;
                Ok(Vec::new())
            }
            Message::Logout { username } => {
                let username = username.trim();
                self.authenticate(username, src)?;
                Ok(self.logout(username))
            }
            Message::PeerLeft { .. } => {
                let username = self.sender(src)?.username.clone();
                Ok(self.leave(&username))
            }
            Message::ChatCommand { username, text } => {
                let username = username.trim();
                self.authenticate(username, src)?;
                Ok(self.command(username, text.trim()))
            }
            Message::Chat { .. }
            | Message::Params { .. }
            | Message::KeyExchangeRequest { .. }
            | Message::KeyExchangeResponse { .. } => self.relay(
                Bytes::copy_from_slice(datagram),
                message.message_type(),
                src,
            ),
            Message::PeerAvailable | Message::PeerBusy | Message::NewPeer { .. } => {
                Err(PacketError::UnexpectedType(message.message_type()))
            }
        }
    }

    /// Register a client, renaming it if the requested name is taken.
    ///
    /// The acknowledgment carries the name actually assigned.
    pub fn login(&mut self, requested: &str, endpoint: SocketAddr) -> Vec<Outbound> {
        if let Some(existing) = self.find_by_endpoint(endpoint) {
            debug!(
                "Duplicate login from {}, re-acknowledging {}",
                endpoint, existing.username
            );
            let ack = Message::Login {
                username: existing.username.clone(),
            };
            return vec![Outbound::message(endpoint, &ack)];
        }

        let requested = sanitize_username(requested);
        let username = if self.is_taken(&requested) {
            info!("User with a duplicate name tried to join the lobby.");
            self.free_variant(&requested)
        } else {
            requested
        };

        info!("{} joined the lobby from {}.", username, endpoint);
        self.clients
            .push(ClientRecord::new(username.clone(), endpoint));

        vec![Outbound::message(endpoint, &Message::Login { username })]
    }

    /// Remove a client. A paired partner is told and returned to the lobby.
    pub fn logout(&mut self, username: &str) -> Vec<Outbound> {
        let Some(index) = self.clients.iter().position(|c| c.username == username) else {
            return Vec::new();
        };

        let record = self.clients.remove(index);
        info!("{} left the lobby.", record.username);

        match self.unpair(username) {
            Some(partner) => self.peer_left_notice(username, &partner).into_iter().collect(),
            None => Vec::new(),
        }
    }

    /// Resolve a join request.
    ///
    /// Only the accepting path changes the registry.
    pub fn join(&mut self, requester: &str, target: &str) -> Vec<Outbound> {
        let Some(requester_addr) = self.find(requester).map(|c| c.endpoint) else {
            return Vec::new();
        };

        let Some(target_addr) = self.find(target).map(|c| c.endpoint) else {
            return vec![Outbound::message(
                requester_addr,
                &Message::server_notice("User not found."),
            )];
        };

        if requester == target {
            return vec![Outbound::message(
                requester_addr,
                &Message::server_notice("You can't start a conversation with yourself."),
            )];
        }

        if let Some(current) = self.partner_of(requester) {
            return vec![Outbound::message(
                requester_addr,
                &Message::server_notice(format!(
                    "You are already in a conversation with {current}."
                )),
            )];
        }

        if self.partner_of(target).is_some() {
            debug!("{} asked for {}, who is busy", requester, target);
            return vec![Outbound::message(requester_addr, &Message::PeerBusy)];
        }

        self.pairs.push(ConversationPair::new(requester, target));
        info!("{} and {} started a conversation.", requester, target);

        vec![
            Outbound::message(requester_addr, &Message::PeerAvailable),
            Outbound::message(
                target_addr,
                &Message::NewPeer {
                    username: requester.to_string(),
                    text: format!("Entering a conversation with {requester}."),
                },
            ),
        ]
    }

    /// Leave the current conversation, if any.
    pub fn leave(&mut self, username: &str) -> Vec<Outbound> {
        let Some(addr) = self.find(username).map(|c| c.endpoint) else {
            return Vec::new();
        };

        let Some(partner) = self.unpair(username) else {
            return vec![Outbound::message(
                addr,
                &Message::server_notice("You are not in a conversation."),
            )];
        };

        info!("{} left the conversation with {}.", username, partner);

        let mut outbound: Vec<Outbound> = self.peer_left_notice(username, &partner).into_iter().collect();
        outbound.push(Outbound::message(
            addr,
            &Message::server_notice(format!(
                "You have left the conversation with {partner}."
            )),
        ));
        outbound
    }

    /// Human-readable listing of unpaired clients.
    pub fn list_available(&self, requester: &str) -> String {
        let mut list = String::from("Available users:\n");
        for client in self.available() {
            list.push_str(" - ");
            list.push_str(&client.username);
            if client.username == requester {
                list.push_str(" (you)");
            }
            list.push('\n');
        }
        list
    }

    /// Forward an opaque datagram to the sender's partner.
    pub fn relay(
        &self,
        datagram: Bytes,
        message_type: MessageType,
        src: SocketAddr,
    ) -> Result<Vec<Outbound>, PacketError> {
        if !message_type.is_relayed() {
            return Err(PacketError::UnexpectedType(message_type));
        }
        let sender = self.sender(src)?;

        if let Some(partner) = self
            .partner_of(&sender.username)
            .and_then(|name| self.find(name))
        {
            debug!(
                "Forwarded {:?} from {} to {}",
                message_type, sender.username, partner.username
            );
            return Ok(vec![Outbound::forward(partner.endpoint, datagram)]);
        }

        match message_type {
            MessageType::Chat | MessageType::Params => {
                debug!(
                    "Failed to forward chat message/params from {} (not paired).",
                    sender.username
                );
                Ok(vec![Outbound::message(
                    sender.endpoint,
                    &Message::server_notice("You are not in a conversation."),
                )])
            }
            _ => {
                debug!(
                    "Failed to forward secret parameters from {} (not paired).",
                    sender.username
                );
                Ok(Vec::new())
            }
        }
    }

    /// Start a keep-alive cycle: clear responses and probe every client.
    pub fn begin_probe(&mut self) -> Vec<Outbound> {
        self.clients
            .iter_mut()
            .map(|client| {
                client.responded = false;
                Outbound::message(client.endpoint, &Message::KeepAlive)
            })
            .collect()
    }

    /// Note a keep-alive echo.
    pub fn record_keep_alive(&mut self, src: SocketAddr) -> Result<(), PacketError> {
        let client = self
            .clients
            .iter_mut()
            .find(|c| c.endpoint == src)
            .ok_or(PacketError::UnknownSender(src))?;
        client.responded = true;
        Ok(())
    }

    /// Close a keep-alive cycle and evict clients that missed too many.
    pub fn evaluate_probe(&mut self) -> ProbeOutcome {
        let mut evicted = Vec::new();

        for client in &mut self.clients {
            if client.responded {
                client.liveness_misses = 0;
                continue;
            }

            client.liveness_misses += 1;
            if client.liveness_misses >= self.max_keepalive_misses {
                evicted.push(client.username.clone());
            }
        }

        let mut outbound = Vec::new();
        for username in &evicted {
            outbound.extend(self.logout(username));
            warn!("{} timed out.", username);
        }

        ProbeOutcome { outbound, evicted }
    }

    pub fn find(&self, username: &str) -> Option<&ClientRecord> {
        self.clients.iter().find(|c| c.username == username)
    }

    pub fn find_by_endpoint(&self, endpoint: SocketAddr) -> Option<&ClientRecord> {
        self.clients.iter().find(|c| c.endpoint == endpoint)
    }

    pub fn partner_of(&self, username: &str) -> Option<&str> {
        self.pairs.iter().find_map(|pair| pair.partner_of(username))
    }

    pub fn state_of(&self, username: &str) -> Option<ClientState> {
        self.find(username).map(|_| {
            if self.partner_of(username).is_some() {
                ClientState::Paired
            } else {
                ClientState::Registered
            }
        })
    }

    /// Registered clients with no active conversation.
    pub fn available(&self) -> impl Iterator<Item = &ClientRecord> {
        self.clients
            .iter()
            .filter(|client| !self.pairs.iter().any(|pair| pair.contains(&client.username)))
    }

    pub fn pairs(&self) -> &[ConversationPair] {
        &self.pairs
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    fn command(&mut self, username: &str, text: &str) -> Vec<Outbound> {
        let Some(addr) = self.find(username).map(|c| c.endpoint) else {
            return Vec::new();
        };

        if text == "list" {
            info!("{} requested a list of the available clients.", username);
            let list = self.list_available(username);
            return vec![Outbound::message(addr, &Message::server_notice(list))];
        }

        if text.starts_with("join") {
            let params: Vec<&str> = text.split(' ').collect();
            return match params.as_slice() {
                [_, target] => self.join(username, target),
                _ => vec![Outbound::message(
                    addr,
                    &Message::server_notice("Join command usage:\n/join <username>"),
                )],
            };
        }

        vec![Outbound::message(
            addr,
            &Message::server_notice("Unknown command."),
        )]
    }

    fn sender(&self, src: SocketAddr) -> Result<&ClientRecord, PacketError> {
        self.find_by_endpoint(src)
            .ok_or(PacketError::UnknownSender(src))
    }

    fn authenticate(&self, username: &str, src: SocketAddr) -> Result<(), PacketError> {
        match self.find(username) {
            Some(client) if client.endpoint == src => Ok(()),
            _ => Err(PacketError::EndpointMismatch {
                username: username.to_string(),
                src,
            }),
        }
    }

    /// Destroy the pair containing `username`, returning the partner.
    fn unpair(&mut self, username: &str) -> Option<String> {
        let index = self.pairs.iter().position(|pair| pair.contains(username))?;
        let pair = self.pairs.remove(index);
        pair.partner_of(username).map(str::to_string)
    }

    fn peer_left_notice(&self, departed: &str, partner: &str) -> Option<Outbound> {
        let partner = self.find(partner)?;
        Some(Outbound::message(
            partner.endpoint,
            &Message::PeerLeft {
                text: format!("{departed} has left. You have been returned to the lobby."),
            },
        ))
    }

    fn is_taken(&self, username: &str) -> bool {
        username == SERVER_NAME || self.find(username).is_some()
    }

    /// First free `name0`, `name1`, ... in ascending order.
    fn free_variant(&self, base: &str) -> String {
        (0u64..)
            .map(|suffix| format!("{base}{suffix}"))
            .find(|candidate| !self.is_taken(candidate))
            .unwrap_or_else(|| base.to_string())
    }
}

/// Usernames are trimmed and may not contain the field separator.
fn sanitize_username(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| if c == FIELD_SEPARATOR { '_' } else { c })
        .collect();

    if cleaned.is_empty() {
        ANONYMOUS_NAME.to_string()
    } else {
        cleaned
    }
}
