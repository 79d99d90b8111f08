// SPDX-License-Identifier: MIT OR Apache-2.0

//! The signed pre-key list a user publishes so others can open conversations.
//!
//! Wire layout, covered by the trailing Ed25519 signature except for the signature itself:
//!
//! ```plain
//! prekey_list = {
//!   public_identity_key (32),
//!   prekey_public[0..100] (100 * 32),
//!   expiration_unix_seconds (8, big endian),
//!   signature (64)
//! }
//! ```
use thiserror::Error;

use crate::crypto::ed25519::{PublicSigningKey, Signature, SignatureError, SIGNATURE_SIZE};
use crate::crypto::x25519::{PublicKey, PUBLIC_KEY_SIZE};
use crate::lifetime::{Expiration, THREE_MONTHS};
use crate::master_keys::MasterKeys;
use crate::prekey_store::{PrekeyStore, PREKEY_AMOUNT};

/// Total size of a signed pre-key list in bytes.
pub const PREKEY_LIST_SIZE: usize =
    PUBLIC_KEY_SIZE + PREKEY_AMOUNT * PUBLIC_KEY_SIZE + 8 + SIGNATURE_SIZE;

const SIGNED_SIZE: usize = PREKEY_LIST_SIZE - SIGNATURE_SIZE;

/// A signed pre-key list as published on the network.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedPrekeyList(Vec<u8>);

/// Contents of a pre-key list whose signature and expiration have been checked.
#[derive(Clone, Debug)]
pub struct VerifiedPrekeyList {
    pub public_identity_key: PublicKey,
    pub prekeys: Vec<PublicKey>,
    pub expiration: Expiration,
}

impl SignedPrekeyList {
    /// Assembles and signs a pre-key list over the user's current active pre-keys.
    ///
    /// The list expires three months from now.
    pub fn create(master_keys: &MasterKeys, prekey_store: &PrekeyStore) -> Self {
        Self::create_with_expiration(
            master_keys,
            prekey_store,
            Expiration::in_seconds(THREE_MONTHS),
        )
    }

    pub(crate) fn create_with_expiration(
        master_keys: &MasterKeys,
        prekey_store: &PrekeyStore,
        expiration: Expiration,
    ) -> Self {
        let mut bytes = Vec::with_capacity(PREKEY_LIST_SIZE);
        bytes.extend_from_slice(master_keys.public_identity_key().as_bytes());
        bytes.extend_from_slice(&prekey_store.list());
        bytes.extend_from_slice(&expiration.unix_seconds().to_be_bytes());

        let signature = master_keys.sign(&bytes);
        bytes.extend_from_slice(signature.as_bytes());

        Self(bytes)
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, PrekeyListError> {
        if bytes.len() != PREKEY_LIST_SIZE {
            return Err(PrekeyListError::InvalidLength(bytes.len()));
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.clone()
    }

    /// Verifies the signature under the publisher's public master key, checks the embedded
    /// expiration date and extracts the contents.
    pub fn verify(
        &self,
        public_signing_key: &PublicSigningKey,
    ) -> Result<VerifiedPrekeyList, PrekeyListError> {
        let mut signature = [0u8; SIGNATURE_SIZE];
        signature.copy_from_slice(&self.0[SIGNED_SIZE..]);
        public_signing_key.verify(&self.0[..SIGNED_SIZE], &Signature::from_bytes(signature))?;

        let expiration = Expiration::from_unix_seconds(u64::from_be_bytes(
            self.0[SIGNED_SIZE - 8..SIGNED_SIZE]
                .try_into()
                .expect("8 byte slice"),
        ));
        if expiration.is_expired() {
            return Err(PrekeyListError::Outdated);
        }

        let public_identity_key = PublicKey::from_bytes(
            self.0[..PUBLIC_KEY_SIZE].try_into().expect("32 byte slice"),
        );

        let prekeys = (0..PREKEY_AMOUNT)
            .map(|index| {
                let offset = PUBLIC_KEY_SIZE + index * PUBLIC_KEY_SIZE;
                PublicKey::from_bytes(
                    self.0[offset..offset + PUBLIC_KEY_SIZE]
                        .try_into()
                        .expect("32 byte slice"),
                )
            })
            .collect();

        Ok(VerifiedPrekeyList {
            public_identity_key,
            prekeys,
            expiration,
        })
    }
}

#[derive(Debug, Error)]
pub enum PrekeyListError {
    #[error("pre-key list has invalid length {0}")]
    InvalidLength(usize),

    #[error(transparent)]
    Signature(#[from] SignatureError),

    #[error("pre-key list has expired")]
    Outdated,
}

#[cfg(test)]
mod tests {
    use crate::crypto::Rng;
    use crate::lifetime::{now, Expiration};
    use crate::master_keys::MasterKeys;
    use crate::prekey_store::{PrekeyStore, PREKEY_AMOUNT};

    use super::{PrekeyListError, SignedPrekeyList, PREKEY_LIST_SIZE};

    #[test]
    fn create_and_verify() {
        let rng = Rng::from_seed([1; 32]);
        let master_keys = MasterKeys::new(&rng, None).unwrap();
        let prekey_store = PrekeyStore::new(&rng).unwrap();

        let list = SignedPrekeyList::create(&master_keys, &prekey_store);
        assert_eq!(list.as_bytes().len(), PREKEY_LIST_SIZE);

        let verified = list.verify(&master_keys.public_signing_key()).unwrap();
        assert_eq!(verified.public_identity_key, master_keys.public_identity_key());
        assert_eq!(verified.prekeys.len(), PREKEY_AMOUNT);
        assert_eq!(verified.prekeys, prekey_store.active_publics());
    }

    #[test]
    fn wrong_signer_is_rejected() {
        let rng = Rng::from_seed([2; 32]);
        let master_keys = MasterKeys::new(&rng, None).unwrap();
        let other_keys = MasterKeys::new(&rng, None).unwrap();
        let prekey_store = PrekeyStore::new(&rng).unwrap();

        let list = SignedPrekeyList::create(&master_keys, &prekey_store);
        assert!(matches!(
            list.verify(&other_keys.public_signing_key()),
            Err(PrekeyListError::Signature(_))
        ));
    }

    #[test]
    fn tampered_list_is_rejected() {
        let rng = Rng::from_seed([3; 32]);
        let master_keys = MasterKeys::new(&rng, None).unwrap();
        let prekey_store = PrekeyStore::new(&rng).unwrap();

        let mut bytes = SignedPrekeyList::create(&master_keys, &prekey_store).to_vec();
        bytes[40] ^= 0xff;
        let list = SignedPrekeyList::from_bytes(bytes).unwrap();

        assert!(matches!(
            list.verify(&master_keys.public_signing_key()),
            Err(PrekeyListError::Signature(_))
        ));
    }

    #[test]
    fn expired_list_is_rejected() {
        let rng = Rng::from_seed([4; 32]);
        let master_keys = MasterKeys::new(&rng, None).unwrap();
        let prekey_store = PrekeyStore::new(&rng).unwrap();

        let list = SignedPrekeyList::create_with_expiration(
            &master_keys,
            &prekey_store,
            Expiration::from_unix_seconds(now() - 60),
        );

        assert!(matches!(
            list.verify(&master_keys.public_signing_key()),
            Err(PrekeyListError::Outdated)
        ));
    }

    #[test]
    fn wrong_length_is_rejected() {
        assert!(SignedPrekeyList::from_bytes(vec![0u8; PREKEY_LIST_SIZE - 1]).is_err());
    }
}
