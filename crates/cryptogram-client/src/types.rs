use std::fmt;
use std::net::SocketAddr;

use gram_crypto::{CryptoError, KeyExchange, SessionCipher};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_addr: SocketAddr,
    pub username: String,
}

/// Connection lifecycle of a peer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    /// LOGIN sent, waiting for the acknowledgment
    LoggingIn,
    /// In the lobby
    LoggedIn,
    /// Paired with a partner
    Conversing,
    Closed,
}

/// Requests from the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    Chat(String),
    List,
    Join(String),
    Leave,
    Logout,
}

/// Notifications for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Log(String),
    StateChanged(ConnectionState),
    LoggedIn { username: String },
    Notice { from: String, text: String },
    ConversationStarted { peer: String },
    SecureChannel { peer: String, fingerprint: String },
    ChatReceived { from: String, text: String },
    ConversationEnded { text: String },
    DecryptFailed { reason: String },
}

/// Crypto state for the current conversation
pub enum CryptoState {
    /// No key material
    Idle,
    /// DHKX_REQ sent, waiting for the partner's public value
    Initiating(KeyExchange),
    /// Session key derived
    Established(SessionCipher),
}

impl CryptoState {
    pub fn is_established(&self) -> bool {
        matches!(self, CryptoState::Established(_))
    }
}

impl fmt::Debug for CryptoState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Initiating(_) => write!(f, "Initiating"),
            Self::Established(cipher) => write!(f, "Established({})", cipher.fingerprint()),
        }
    }
}

/// Failures inside a peer session. None of them end the session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("not logged in yet")]
    NotLoggedIn,
    #[error("no secure channel with a conversation partner")]
    NoSecureChannel,
    #[error("ciphertext was not followed by its cipher parameters")]
    MissingParams,
    #[error("cipher parameters arrived without a ciphertext")]
    UnexpectedParams,
    #[error("message is {0} bytes, the limit is {1}")]
    MessageTooLong(usize, usize),
    #[error("decrypted text is not valid UTF-8")]
    InvalidUtf8,
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
}
