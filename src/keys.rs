// SPDX-License-Identifier: MIT OR Apache-2.0

//! Length- and purpose-tagged key types.
//!
//! Every symmetric key in the protocol gets its own type so a header key can never end up
//! where a message key is expected. The raw bytes stay crate-private; what a key type offers
//! to the outside is its purpose: subkey derivation for all of them, message key extraction
//! and chain stepping for [`ChainKey`].
//!
//! All key types share the same hygiene: memory is zeroised on drop, equality is evaluated
//! in constant time to prevent timing attacks and debug formatting never reveals the bytes.
//! This is a "best-effort" line of defence, side-channels are ultimately a property of the
//! deployed system including the hardware it runs on, not just of software.
use std::fmt;

use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use thiserror::Error;
use zeroize::ZeroizeOnDrop;

use crate::crypto::blake2b::{self, Blake2bError};

pub const ROOT_KEY_SIZE: usize = 32;
pub const CHAIN_KEY_SIZE: usize = 32;
pub const HEADER_KEY_SIZE: usize = 32;
pub const MESSAGE_KEY_SIZE: usize = 32;
pub const BACKUP_KEY_SIZE: usize = 32;
pub const CONVERSATION_ID_SIZE: usize = 32;

macro_rules! secret_key_type {
    ($(#[$attr:meta])* $name:ident, $size:expr) => {
        $(#[$attr])*
        #[derive(Clone, Eq, Serialize, Deserialize, ZeroizeOnDrop)]
        pub struct $name(#[serde(with = "serde_bytes")] [u8; $size]);

        impl $name {
            pub const SIZE: usize = $size;

            pub fn from_bytes(bytes: [u8; $size]) -> Self {
                Self(bytes)
            }

            pub(crate) fn as_bytes(&self) -> &[u8; $size] {
                &self.0
            }

            /// Derives the 32 bytes of the subkey with the given index.
            ///
            /// Same inputs always yield the same subkey, distinct indices yield independent
            /// ones.
            pub fn derive_subkey(&self, index: u32) -> Result<[u8; 32], KeyDerivationError> {
                Ok(blake2b::derive_subkey(&self.0, index)?)
            }
        }

        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                // Constant-time comparison.
                bool::from(self.0.ct_eq(&other.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                // Key material never shows up in debug output.
                write!(f, concat!(stringify!($name), "(***)"))
            }
        }
    };
}

secret_key_type!(
    /// Root key of the DH ratchet, advanced on every ratchet step.
    RootKey,
    ROOT_KEY_SIZE
);

secret_key_type!(
    /// Chain key from which the sequence of message keys is derived.
    ChainKey,
    CHAIN_KEY_SIZE
);

secret_key_type!(
    /// AEAD key protecting the encrypted Axolotl header of a packet.
    HeaderKey,
    HEADER_KEY_SIZE
);

secret_key_type!(
    /// One-time key sealing a single message payload.
    MessageKey,
    MESSAGE_KEY_SIZE
);

secret_key_type!(
    /// Symmetric key under which serialised library state is sealed at rest.
    BackupKey,
    BACKUP_KEY_SIZE
);

secret_key_type!(
    /// Intermediate key material produced by DH agreements, only used to derive from.
    DerivationKey,
    32
);

impl ChainKey {
    /// Derives the message key for the current chain position.
    pub fn derive_message_key(&self) -> Result<MessageKey, KeyDerivationError> {
        Ok(MessageKey::from_bytes(self.derive_subkey(0)?))
    }

    /// Advances the chain by one step.
    pub fn next(&self) -> Result<ChainKey, KeyDerivationError> {
        Ok(ChainKey::from_bytes(self.derive_subkey(1)?))
    }
}

/// Random identifier assigned to a conversation at creation, never mutated afterwards.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(#[serde(with = "serde_bytes")] [u8; CONVERSATION_ID_SIZE]);

impl ConversationId {
    pub fn from_bytes(bytes: [u8; CONVERSATION_ID_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; CONVERSATION_ID_SIZE] {
        &self.0
    }

    pub fn to_bytes(self) -> [u8; CONVERSATION_ID_SIZE] {
        self.0
    }

    pub fn to_hex(self) -> String {
        hex::encode(self.as_bytes())
    }
}

impl fmt::Debug for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConversationId({})", self.to_hex())
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[derive(Debug, Error)]
pub enum KeyDerivationError {
    #[error(transparent)]
    Blake2b(#[from] Blake2bError),
}

#[cfg(test)]
mod tests {
    use super::{ChainKey, HeaderKey, MessageKey};

    #[test]
    fn chain_steps_are_deterministic_and_distinct() {
        let chain = ChainKey::from_bytes([9u8; 32]);

        let message_key_1 = chain.derive_message_key().unwrap();
        let message_key_2 = chain.derive_message_key().unwrap();
        assert_eq!(message_key_1, message_key_2);

        let next = chain.next().unwrap();
        assert_ne!(chain, next);
        assert_ne!(next.derive_message_key().unwrap(), message_key_1);
    }

    #[test]
    fn key_types_compare_by_content() {
        assert_eq!(
            HeaderKey::from_bytes([1u8; 32]),
            HeaderKey::from_bytes([1u8; 32])
        );
        assert_ne!(
            HeaderKey::from_bytes([1u8; 32]),
            HeaderKey::from_bytes([2u8; 32])
        );
    }

    #[test]
    fn debug_output_hides_key_bytes() {
        let debug = format!("{:?}", MessageKey::from_bytes([5u8; 32]));
        assert_eq!(debug, "MessageKey(***)");
        assert!(!debug.contains('5'));
    }

    #[test]
    fn serde_roundtrip() {
        let message_key = MessageKey::from_bytes([5u8; 32]);

        let mut bytes = Vec::new();
        ciborium::ser::into_writer(&message_key, &mut bytes).unwrap();
        let restored: MessageKey = ciborium::de::from_reader(&bytes[..]).unwrap();

        assert_eq!(message_key, restored);
    }
}
