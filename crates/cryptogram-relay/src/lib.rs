#![forbid(unsafe_code)]

//! CryptoGram relay - lobby and blind forwarder for encrypted peer chat.
//!
//! The relay:
//! 1. Registers clients under unique usernames
//! 2. Pairs two available clients into a conversation
//! 3. Forwards chat and key-exchange traffic to the partner verbatim
//! 4. Evicts clients that stop answering keep-alive probes
//!
//! It never holds key material and never decrypts chat traffic.

pub mod config;
pub mod directory;
pub mod server;

pub use config::{parse_port, RelayConfig};
pub use directory::{ClientState, Directory, Outbound, PacketError};
pub use server::RelayServer;
