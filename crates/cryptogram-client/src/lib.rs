#![forbid(unsafe_code)]

//! CryptoGram peer: logs in to a relay, joins a partner, agrees on a
//! per-conversation key and exchanges encrypted chat lines.

pub mod client;
pub mod input;
pub mod session;
pub mod types;

pub use client::run_client;
pub use input::{parse_input, Input, HELP_TEXT};
pub use session::{Action, PeerSession, MAX_PLAINTEXT_SIZE};
pub use types::{
    ClientCommand, ClientConfig, ClientEvent, ConnectionState, CryptoState, SessionError,
};
