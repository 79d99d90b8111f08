// SPDX-License-Identifier: MIT OR Apache-2.0

//! Long-term master keys of a user: an Ed25519 signing pair (the user's public identity
//! towards the outside) and an X25519 identity pair feeding the initial key agreement of
//! every conversation.
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroize;

use crate::crypto::ed25519::{PublicSigningKey, SecretSigningKey, Signature};
use crate::crypto::x25519::{PublicKey, SecretKey};
use crate::crypto::{Rng, RngError};
use crate::spiced_random::{spiced_random, SpicedRandomError};

const SIGNING_SEED_SIZE: usize = 32;
const IDENTITY_SEED_SIZE: usize = 32;

/// Long-term key material of one user.
///
/// The secret halves are zeroised on drop and only reachable through the signing and key
/// agreement operations of this type and the conversation bootstrap.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MasterKeys {
    public_signing_key: PublicSigningKey,
    secret_signing_key: SecretSigningKey,
    public_identity_key: PublicKey,
    secret_identity_key: SecretKey,
}

impl MasterKeys {
    /// Creates a new set of master keys.
    ///
    /// With a low-entropy seed given, key material is drawn from OS randomness spiced with
    /// that seed, otherwise from OS randomness alone. The seed can be of any length and
    /// doesn't require high entropy.
    ///
    /// WARNING: Don't use entropy from the OS random number generator as seed!
    pub fn new(rng: &Rng, low_entropy_seed: Option<&[u8]>) -> Result<Self, MasterKeysError> {
        let (signing_seed, identity_seed) = match low_entropy_seed {
            Some(seed) => {
                let mut seeds = spiced_random(rng, seed, SIGNING_SEED_SIZE + IDENTITY_SEED_SIZE)?;

                let mut signing_seed = [0u8; SIGNING_SEED_SIZE];
                signing_seed.copy_from_slice(&seeds[..SIGNING_SEED_SIZE]);
                let mut identity_seed = [0u8; IDENTITY_SEED_SIZE];
                identity_seed.copy_from_slice(&seeds[SIGNING_SEED_SIZE..]);
                seeds.zeroize();

                (signing_seed, identity_seed)
            }
            None => (rng.random_array()?, rng.random_array()?),
        };

        let secret_signing_key = SecretSigningKey::from_seed(signing_seed);
        let secret_identity_key = SecretKey::from_bytes(identity_seed);

        Ok(Self {
            public_signing_key: secret_signing_key.public_key(),
            public_identity_key: secret_identity_key.public_key(),
            secret_signing_key,
            secret_identity_key,
        })
    }

    pub fn public_signing_key(&self) -> PublicSigningKey {
        self.public_signing_key
    }

    pub fn public_identity_key(&self) -> PublicKey {
        self.public_identity_key
    }

    pub(crate) fn secret_identity_key(&self) -> &SecretKey {
        &self.secret_identity_key
    }

    /// Signs the given bytes with the long-term signing key.
    pub fn sign(&self, bytes: &[u8]) -> Signature {
        self.secret_signing_key.sign(bytes)
    }
}

#[derive(Debug, Error)]
pub enum MasterKeysError {
    #[error(transparent)]
    Rng(#[from] RngError),

    #[error(transparent)]
    SpicedRandom(#[from] SpicedRandomError),
}
