//! AES-256-GCM payload encryption.
//!
//! # Wire Format
//!
//! One chat line becomes two messages:
//! ```text
//! MSG_CHAT   [ciphertext + 16 byte auth tag]
//! MSG_PARAMS [12 byte nonce]
//! ```
//!
//! The nonce is random per call and never reused. Decryption authenticates
//! the ciphertext against exactly the nonce it was sealed with, so a
//! mismatched pair fails instead of yielding garbage.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use bytes::Bytes;
use gram_core::Message;
use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;

use crate::exchange::SessionKey;
use crate::CryptoError;

/// Nonce size carried in MSG_PARAMS.
pub const PARAMS_SIZE: usize = 12;

/// Output of one encryption: ciphertext and the parameters used for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedMessage {
    pub ciphertext: Vec<u8>,
    pub params: [u8; PARAMS_SIZE],
}

impl SealedMessage {
    /// The MSG_CHAT / MSG_PARAMS pair, in send order.
    pub fn into_messages(self) -> [Message; 2] {
        [
            Message::Chat {
                ciphertext: Bytes::from(self.ciphertext),
            },
            Message::Params {
                params: Bytes::copy_from_slice(&self.params),
            },
        ]
    }
}

/// Per-conversation cipher built from a completed key exchange.
pub struct SessionCipher {
    cipher: Aes256Gcm,
    fingerprint: String,
}

impl SessionCipher {
    pub fn new(key: &SessionKey) -> Self {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
        Self {
            cipher,
            fingerprint: key.fingerprint(),
        }
    }

    /// Fingerprint of the key this cipher was built from.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<SealedMessage, CryptoError> {
        let mut params = [0u8; PARAMS_SIZE];
        OsRng.fill_bytes(&mut params);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&params), plaintext)
            .map_err(|e| CryptoError::Encryption(e.to_string()))?;

        Ok(SealedMessage { ciphertext, params })
    }

    /// Decrypt a ciphertext with the exact parameters it was sealed with.
    ///
    /// # Errors
    /// Returns `CryptoError::InvalidParams` for a wrong-length nonce and
    /// `CryptoError::Decryption` if authentication fails.
    pub fn decrypt(&self, ciphertext: &[u8], params: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if params.len() != PARAMS_SIZE {
            return Err(CryptoError::InvalidParams(params.len()));
        }

        self.cipher
            .decrypt(Nonce::from_slice(params), ciphertext)
            .map_err(|_| CryptoError::Decryption)
    }
}

impl fmt::Debug for SessionCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCipher")
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}
