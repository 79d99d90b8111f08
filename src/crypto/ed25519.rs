// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ed25519 signatures for long-term user identities and signed pre-key lists.
use std::fmt;

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::ZeroizeOnDrop;

/// 512-bit signature.
pub const SIGNATURE_SIZE: usize = 64;

pub const PUBLIC_SIGNING_KEY_SIZE: usize = 32;

/// Secret signing keys are kept in the libsodium keypair format: 32 bytes of seed followed by
/// the 32 public key bytes.
pub const SECRET_SIGNING_KEY_SIZE: usize = 64;

/// Ed25519 secret signing key.
#[derive(Clone, Serialize, Deserialize, ZeroizeOnDrop)]
pub struct SecretSigningKey(#[serde(with = "serde_bytes")] [u8; SECRET_SIGNING_KEY_SIZE]);

impl SecretSigningKey {
    /// Derives a signing keypair from a 32-byte seed.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(&seed);
        Self(signing_key.to_keypair_bytes())
    }

    pub fn from_bytes(bytes: [u8; SECRET_SIGNING_KEY_SIZE]) -> Result<Self, SignatureError> {
        // Reject keypairs whose public half doesn't match the seed.
        SigningKey::from_keypair_bytes(&bytes).map_err(|_| SignatureError::InvalidKey)?;
        Ok(Self(bytes))
    }

    pub(crate) fn as_bytes(&self) -> &[u8; SECRET_SIGNING_KEY_SIZE] {
        &self.0
    }

    pub fn public_key(&self) -> PublicSigningKey {
        let mut bytes = [0u8; PUBLIC_SIGNING_KEY_SIZE];
        bytes.copy_from_slice(&self.0[32..]);
        PublicSigningKey(bytes)
    }

    /// Produces a detached 64-byte signature over the given bytes.
    pub fn sign(&self, bytes: &[u8]) -> Signature {
        let mut seed = [0u8; 32];
        seed.copy_from_slice(&self.0[..32]);
        let signing_key = SigningKey::from_bytes(&seed);
        Signature(signing_key.sign(bytes).to_bytes())
    }
}

impl fmt::Debug for SecretSigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretSigningKey")
            .field("value", &"***")
            .finish()
    }
}

/// Ed25519 public signing key, also serving as the public "master key" identifying a user.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PublicSigningKey(#[serde(with = "serde_bytes")] [u8; PUBLIC_SIGNING_KEY_SIZE]);

impl PublicSigningKey {
    pub fn from_bytes(bytes: [u8; PUBLIC_SIGNING_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_SIGNING_KEY_SIZE] {
        &self.0
    }

    pub fn to_bytes(self) -> [u8; PUBLIC_SIGNING_KEY_SIZE] {
        self.0
    }

    pub fn to_hex(self) -> String {
        hex::encode(self.as_bytes())
    }

    /// Verifies a detached signature over the given bytes.
    pub fn verify(&self, bytes: &[u8], signature: &Signature) -> Result<(), SignatureError> {
        let verifying_key =
            VerifyingKey::from_bytes(&self.0).map_err(|_| SignatureError::InvalidKey)?;
        let signature = ed25519_dalek::Signature::from_bytes(&signature.0);
        verifying_key
            .verify(bytes, &signature)
            .map_err(|_| SignatureError::VerificationFailed)
    }
}

impl fmt::Debug for PublicSigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicSigningKey({})", self.to_hex())
    }
}

impl fmt::Display for PublicSigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Detached Ed25519 signature.
#[derive(Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(#[serde(with = "serde_bytes")] [u8; SIGNATURE_SIZE]);

impl Signature {
    pub fn from_bytes(bytes: [u8; SIGNATURE_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SIGNATURE_SIZE] {
        &self.0
    }

    pub fn to_bytes(self) -> [u8; SIGNATURE_SIZE] {
        self.0
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", hex::encode(self.as_bytes()))
    }
}

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("invalid ed25519 key")]
    InvalidKey,

    #[error("signature does not match public key and bytes")]
    VerificationFailed,
}
