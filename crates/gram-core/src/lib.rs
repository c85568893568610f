//! Core CryptoGram protocol types, framing, and constants.
//!
//! This crate provides:
//! - The closed set of message types and their stable wire values
//! - Frame encoding/decoding (`<tag>/<payload>`)
//! - Typed messages with derived username/text fields

#![forbid(unsafe_code)]

pub mod wire;

pub use wire::{Frame, Message, MessageType, WireError};

/// Port the relay listens on when no valid port is given.
pub const DEFAULT_SERVER_PORT: u16 = 1984;

/// Receive buffer size used by relay and peers.
pub const MAX_DATAGRAM_SIZE: usize = 1024;

/// Username carried on chat commands that originate from the relay itself.
pub const SERVER_NAME: &str = "server";
