// SPDX-License-Identifier: MIT OR Apache-2.0

//! Pool of short-lived X25519 key pairs published so others can open conversations with us.
//!
//! A fixed number of pre-keys is active at any time. Using or expiring a pre-key moves it
//! into a deprecated pool where it remains available for lookup a little longer, covering
//! pre-key packets that were produced against an older published list. Deprecated keys are
//! destroyed once they outlive that grace period.
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::crypto::x25519::{PublicKey, SecretKey};
use crate::crypto::{Rng, RngError};
use crate::lifetime::{Expiration, MONTH};

/// Number of active pre-keys published in a signed pre-key list.
pub const PREKEY_AMOUNT: usize = 100;

/// Lifetime of an active pre-key.
const PREKEY_EXPIRATION_TIME: u64 = MONTH;

/// Grace period during which a deprecated pre-key can still be looked up.
const DEPRECATED_PREKEY_EXPIRATION_TIME: u64 = 60 * 60;

/// One pre-key pair with its expiration date.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct Prekey {
    public_key: PublicKey,
    secret_key: SecretKey,
    expiration: Expiration,
}

impl Prekey {
    fn generate(rng: &Rng) -> Result<Self, PrekeyStoreError> {
        let secret_key = SecretKey::from_bytes(rng.random_array()?);
        Ok(Self {
            public_key: secret_key.public_key(),
            secret_key,
            expiration: Expiration::in_seconds(PREKEY_EXPIRATION_TIME),
        })
    }
}

/// Store of active and deprecated pre-key pairs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrekeyStore {
    prekeys: Vec<Prekey>,
    deprecated: Vec<Prekey>,
    oldest_expiration: Expiration,
    oldest_deprecated_expiration: Option<Expiration>,
}

impl PrekeyStore {
    /// Generates a full set of fresh pre-keys.
    pub fn new(rng: &Rng) -> Result<Self, PrekeyStoreError> {
        let prekeys = (0..PREKEY_AMOUNT)
            .map(|_| Prekey::generate(rng))
            .collect::<Result<Vec<_>, _>>()?;

        let mut store = Self {
            prekeys,
            deprecated: Vec::new(),
            oldest_expiration: Expiration::from_unix_seconds(0),
            oldest_deprecated_expiration: None,
        };
        store.update_expiration_trackers();

        Ok(store)
    }

    /// Concatenated public keys of all active pre-keys, in slot order.
    pub fn list(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(PREKEY_AMOUNT * 32);
        for prekey in &self.prekeys {
            bytes.extend_from_slice(prekey.public_key.as_bytes());
        }
        bytes
    }

    /// Looks up the secret key matching a public pre-key.
    ///
    /// A hit in the active pool deprecates the pre-key: it moves into the deprecated pool and
    /// a freshly generated pair takes its slot. Lookups of already deprecated keys return the
    /// secret without modifying the store.
    pub fn get(&mut self, public_key: &PublicKey, rng: &Rng) -> Result<SecretKey, PrekeyStoreError> {
        if let Some(index) = self
            .prekeys
            .iter()
            .position(|prekey| &prekey.public_key == public_key)
        {
            let secret_key = self.prekeys[index].secret_key.clone();
            self.deprecate(index, rng)?;
            return Ok(secret_key);
        }

        self.deprecated
            .iter()
            .find(|prekey| &prekey.public_key == public_key)
            .map(|prekey| prekey.secret_key.clone())
            .ok_or(PrekeyStoreError::NotFound)
    }

    /// Replaces expired active pre-keys and destroys deprecated ones past their grace period.
    ///
    /// The two oldest-expiration trackers make the common "nothing to do" case a pair of
    /// comparisons.
    pub fn rotate(&mut self, rng: &Rng) -> Result<(), PrekeyStoreError> {
        if self.oldest_expiration.is_expired() {
            let expired: Vec<usize> = self
                .prekeys
                .iter()
                .enumerate()
                .filter(|(_, prekey)| prekey.expiration.is_expired())
                .map(|(index, _)| index)
                .collect();
            debug!(count = expired.len(), "rotating expired pre-keys");
            for index in expired {
                self.deprecate(index, rng)?;
            }
        }

        if let Some(oldest) = self.oldest_deprecated_expiration {
            if oldest.is_expired() {
                self.deprecated.retain(|prekey| !prekey.expiration.is_expired());
                self.update_expiration_trackers();
            }
        }

        Ok(())
    }

    /// Moves the active pre-key at `index` into the deprecated pool and generates a
    /// replacement for its slot.
    fn deprecate(&mut self, index: usize, rng: &Rng) -> Result<(), PrekeyStoreError> {
        let mut deprecated = std::mem::replace(&mut self.prekeys[index], Prekey::generate(rng)?);
        deprecated.expiration = Expiration::in_seconds(DEPRECATED_PREKEY_EXPIRATION_TIME);
        self.deprecated.push(deprecated);
        self.update_expiration_trackers();
        Ok(())
    }

    fn update_expiration_trackers(&mut self) {
        self.oldest_expiration = self
            .prekeys
            .iter()
            .map(|prekey| prekey.expiration)
            .min()
            .expect("store always holds a full set of active pre-keys");
        self.oldest_deprecated_expiration =
            self.deprecated.iter().map(|prekey| prekey.expiration).min();
    }
}

#[cfg(any(test, feature = "test_utils"))]
impl PrekeyStore {
    /// Forcibly sets the expiration of the active pre-key in the given slot.
    pub fn force_expiration(&mut self, index: usize, expiration: Expiration) {
        self.prekeys[index].expiration = expiration;
        self.update_expiration_trackers();
    }

    /// Forcibly sets the expiration of all deprecated pre-keys.
    pub fn force_deprecated_expiration(&mut self, expiration: Expiration) {
        for prekey in &mut self.deprecated {
            prekey.expiration = expiration;
        }
        self.update_expiration_trackers();
    }

    pub fn active_publics(&self) -> Vec<PublicKey> {
        self.prekeys.iter().map(|prekey| prekey.public_key).collect()
    }

    pub fn deprecated_publics(&self) -> Vec<PublicKey> {
        self.deprecated
            .iter()
            .map(|prekey| prekey.public_key)
            .collect()
    }
}

#[derive(Debug, Error)]
pub enum PrekeyStoreError {
    #[error(transparent)]
    Rng(#[from] RngError),

    #[error("no pre-key matching the given public key")]
    NotFound,
}
