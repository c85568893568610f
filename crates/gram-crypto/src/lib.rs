//! Cryptographic primitives for CryptoGram.
//!
//! This crate provides:
//! - Ephemeral X25519 key exchange, one per conversation
//! - Session key derivation and fingerprinting
//! - AES-256-GCM payload encryption with a fresh nonce per message
//!
//! # Design
//!
//! The exchange is two messages, relayed blindly by the server:
//!
//! ```text
//! Initiator                     Relay                    Responder
//!     |  DHKX_REQ(pub_i)          |                           |
//!     |-------------------------->|-------------------------->|
//!     |                           |          DHKX_RES(pub_r)  |
//!     |<--------------------------|<--------------------------|
//!     [        both sides hold the same 32-byte key           ]
//! ```
//!
//! Each chat payload travels as a ciphertext message followed by its nonce
//! in a separate parameters message.

#![forbid(unsafe_code)]

pub mod cipher;
pub mod exchange;

pub use cipher::{SealedMessage, SessionCipher, PARAMS_SIZE};
pub use exchange::{respond, KeyExchange, PublicValue, SessionKey, PUBLIC_KEY_SIZE};

use thiserror::Error;

/// Key exchange and cipher errors.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid public key: expected {PUBLIC_KEY_SIZE} bytes, got {0}")]
    InvalidPublicKey(usize),

    #[error("key agreement produced a non-contributory secret")]
    KeyAgreement,

    #[error("invalid cipher parameters: expected {PARAMS_SIZE} bytes, got {0}")]
    InvalidParams(usize),

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("decryption failed")]
    Decryption,
}
