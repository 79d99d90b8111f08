// SPDX-License-Identifier: MIT OR Apache-2.0

//! Blake2b hashing, keyed hashing and the subkey derivation scheme used throughout the
//! protocol.
//!
//! Subkey derivation is keyed Blake2b over an empty input where the derivation index is
//! carried big-endian in the tail of the salt and the personalisation string pins the
//! derivation domain to this library.
use blake2::digest::consts::U32;
use blake2::digest::{Digest, KeyInit, Mac};
use blake2::{Blake2b, Blake2bMac};
use thiserror::Error;

/// All keys and hashes in this protocol are 256 bits wide.
pub const DIGEST_SIZE: usize = 32;

/// Personalisation string pinning derived keys to this library, padded to the 16 bytes
/// Blake2b personals are required to have.
const PERSONAL: &[u8; 16] = b"molch_cryptolib\0";

const SALT_SIZE: usize = 16;

type Blake2b256 = Blake2b<U32>;
type Blake2bMac256 = Blake2bMac<U32>;

/// Unkeyed Blake2b-256 over the concatenation of all message parts.
pub fn hash(messages: &[&[u8]]) -> [u8; DIGEST_SIZE] {
    let mut hasher = Blake2b256::new();
    for message in messages {
        hasher.update(message);
    }
    hasher.finalize().into()
}

/// Keyed Blake2b-256 (MAC mode, no salt or personalisation).
pub fn keyed_hash(key: &[u8], input: &[u8]) -> Result<[u8; DIGEST_SIZE], Blake2bError> {
    let mut mac: Blake2bMac256 =
        KeyInit::new_from_slice(key).map_err(|_| Blake2bError::InvalidKeyLength)?;
    Mac::update(&mut mac, input);
    Ok(mac.finalize().into_bytes().into())
}

/// Derives the subkey with the given index from a parent key.
///
/// The index is encoded big-endian into the last four bytes of an otherwise zeroed salt, so
/// distinct indices yield independent subkeys from the same parent.
pub fn derive_subkey(key: &[u8], index: u32) -> Result<[u8; DIGEST_SIZE], Blake2bError> {
    let mut salt = [0u8; SALT_SIZE];
    salt[SALT_SIZE - 4..].copy_from_slice(&index.to_be_bytes());

    let mut mac = Blake2bMac256::new_with_salt_and_personal(key, &salt, PERSONAL)
        .map_err(|_| Blake2bError::InvalidKeyLength)?;
    Mac::update(&mut mac, &[]);
    Ok(mac.finalize().into_bytes().into())
}

#[derive(Debug, Error)]
pub enum Blake2bError {
    #[error("invalid key length for keyed blake2b")]
    InvalidKeyLength,
}

#[cfg(test)]
mod tests {
    use super::{derive_subkey, hash, keyed_hash};

    #[test]
    fn derivation_is_deterministic() {
        let parent = [7u8; 32];

        let subkey_1 = derive_subkey(&parent, 3).unwrap();
        let subkey_2 = derive_subkey(&parent, 3).unwrap();
        assert_eq!(subkey_1, subkey_2);
    }

    #[test]
    fn indices_yield_independent_subkeys() {
        let parent = [7u8; 32];

        let subkey_0 = derive_subkey(&parent, 0).unwrap();
        let subkey_1 = derive_subkey(&parent, 1).unwrap();
        let subkey_max = derive_subkey(&parent, u32::MAX).unwrap();

        assert_ne!(subkey_0, subkey_1);
        assert_ne!(subkey_0, subkey_max);
        assert_ne!(subkey_1, subkey_max);
    }

    #[test]
    fn parents_yield_independent_subkeys() {
        let subkey_1 = derive_subkey(&[1u8; 32], 0).unwrap();
        let subkey_2 = derive_subkey(&[2u8; 32], 0).unwrap();
        assert_ne!(subkey_1, subkey_2);
    }

    #[test]
    fn keyed_hash_differs_from_plain_hash() {
        let keyed = keyed_hash(&[3u8; 32], b"input").unwrap();
        let plain = hash(&[b"input"]);
        assert_ne!(keyed, plain);
    }

    #[test]
    fn hash_concatenates_parts() {
        assert_eq!(hash(&[b"ab", b"cd"]), hash(&[b"abcd"]));
        assert_ne!(hash(&[b"ab", b"cd"]), hash(&[b"ab"]));
    }

    #[test]
    fn empty_key_is_rejected() {
        assert!(keyed_hash(&[], b"input").is_err());
        assert!(derive_subkey(&[], 0).is_err());
    }
}
