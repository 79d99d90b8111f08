// SPDX-License-Identifier: MIT OR Apache-2.0

//! Plaintext layout of the encrypted Axolotl header.
//!
//! ```plain
//! header (64) = {
//!   our_public_ephemeral (32),
//!   message_number (4, big endian),
//!   previous_message_number (4, big endian),
//!   message_nonce (24)
//! }
//! ```
use thiserror::Error;

use crate::crypto::x25519::{PublicKey, PUBLIC_KEY_SIZE};
use crate::crypto::xchacha20::XAeadNonce;

pub const HEADER_SIZE: usize = PUBLIC_KEY_SIZE + 4 + 4 + 24;

/// Ratchet metadata carried encrypted inside every packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header {
    pub our_public_ephemeral: PublicKey,
    pub message_number: u32,
    pub previous_message_number: u32,
    pub message_nonce: XAeadNonce,
}

impl Header {
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[..32].copy_from_slice(self.our_public_ephemeral.as_bytes());
        bytes[32..36].copy_from_slice(&self.message_number.to_be_bytes());
        bytes[36..40].copy_from_slice(&self.previous_message_number.to_be_bytes());
        bytes[40..].copy_from_slice(&self.message_nonce);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, HeaderError> {
        if bytes.len() != HEADER_SIZE {
            return Err(HeaderError::InvalidLength(bytes.len()));
        }

        let mut public_key = [0u8; PUBLIC_KEY_SIZE];
        public_key.copy_from_slice(&bytes[..32]);

        let message_number = u32::from_be_bytes(bytes[32..36].try_into().expect("4 byte slice"));
        let previous_message_number =
            u32::from_be_bytes(bytes[36..40].try_into().expect("4 byte slice"));

        let mut message_nonce = [0u8; 24];
        message_nonce.copy_from_slice(&bytes[40..]);

        Ok(Self {
            our_public_ephemeral: PublicKey::from_bytes(public_key),
            message_number,
            previous_message_number,
            message_nonce,
        })
    }
}

#[derive(Debug, Error)]
pub enum HeaderError {
    #[error("axolotl header has invalid length {0}")]
    InvalidLength(usize),
}

#[cfg(test)]
mod tests {
    use crate::crypto::x25519::PublicKey;

    use super::{Header, HEADER_SIZE};

    #[test]
    fn roundtrip() {
        let header = Header {
            our_public_ephemeral: PublicKey::from_bytes([0x55; 32]),
            message_number: 3,
            previous_message_number: 7,
            message_nonce: [0xaa; 24],
        };

        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), HEADER_SIZE);
        assert_eq!(Header::from_bytes(&bytes).unwrap(), header);
    }

    #[test]
    fn counters_are_big_endian() {
        let header = Header {
            our_public_ephemeral: PublicKey::from_bytes([0; 32]),
            message_number: 1,
            previous_message_number: 0x0102_0304,
            message_nonce: [0; 24],
        };

        let bytes = header.to_bytes();
        assert_eq!(&bytes[32..36], &[0, 0, 0, 1]);
        assert_eq!(&bytes[36..40], &[1, 2, 3, 4]);
    }

    #[test]
    fn wrong_length_is_rejected() {
        assert!(Header::from_bytes(&[0u8; HEADER_SIZE - 1]).is_err());
        assert!(Header::from_bytes(&[0u8; HEADER_SIZE + 1]).is_err());
    }
}
