//! Ephemeral X25519 key exchange.
//!
//! A [`KeyExchange`] is created for every new conversation and consumed by
//! [`KeyExchange::complete`], so private material is never reused across
//! conversations.

use bytes::Bytes;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use std::fmt;
use x25519_dalek::{EphemeralSecret, PublicKey, SharedSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::CryptoError;

/// Size of an X25519 public value.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Size of the derived symmetric key (AES-256).
pub const SESSION_KEY_SIZE: usize = 32;

/// Fingerprint length in bytes before hex encoding.
const FINGERPRINT_SIZE: usize = 8;

/// Public key-exchange value as carried in DHKX_REQ / DHKX_RES payloads.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicValue([u8; PUBLIC_KEY_SIZE]);

impl PublicValue {
    /// Parse a public value received from the wire.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; PUBLIC_KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidPublicKey(bytes.len()))?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.0
    }

    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.0)
    }
}

impl fmt::Debug for PublicValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicValue({})", hex::encode(&self.0[..FINGERPRINT_SIZE]))
    }
}

/// Symmetric key shared by both conversation partners.
///
/// Zeroized on drop. Only the fingerprint is ever printed.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; SESSION_KEY_SIZE]);

impl SessionKey {
    fn from_shared_secret(shared: &SharedSecret) -> Result<Self, CryptoError> {
        if !shared.was_contributory() {
            return Err(CryptoError::KeyAgreement);
        }

        let mut key = [0u8; SESSION_KEY_SIZE];
        key.copy_from_slice(&shared.as_bytes()[..SESSION_KEY_SIZE]);
        Ok(Self(key))
    }

    pub(crate) fn as_bytes(&self) -> &[u8; SESSION_KEY_SIZE] {
        &self.0
    }

    /// Short hex digest both users can compare out of band.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0);
        hex::encode(&digest[..FINGERPRINT_SIZE])
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionKey({})", self.fingerprint())
    }
}

/// Initiator side of the exchange, holding the ephemeral secret until the
/// responder's public value arrives.
pub struct KeyExchange {
    secret: EphemeralSecret,
    public: PublicKey,
}

impl KeyExchange {
    /// Generate a fresh ephemeral key pair.
    pub fn initiate() -> Self {
        let secret = EphemeralSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Our public value, to be sent to the peer.
    pub fn public_value(&self) -> PublicValue {
        PublicValue(*self.public.as_bytes())
    }

    /// Finish the agreement with the peer's public value.
    pub fn complete(self, peer: &PublicValue) -> Result<SessionKey, CryptoError> {
        let shared = self.secret.diffie_hellman(&PublicKey::from(peer.0));
        SessionKey::from_shared_secret(&shared)
    }
}

impl fmt::Debug for KeyExchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyExchange")
            .field("public", &self.public_value())
            .finish_non_exhaustive()
    }
}

/// Responder step: generate our own key pair under the same group, complete
/// the agreement, and return the public value to send back.
pub fn respond(peer: &PublicValue) -> Result<(PublicValue, SessionKey), CryptoError> {
    let exchange = KeyExchange::initiate();
    let public = exchange.public_value();
    let key = exchange.complete(peer)?;
    Ok((public, key))
}
