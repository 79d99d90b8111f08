// SPDX-License-Identifier: MIT OR Apache-2.0

//! Key derivation for ratchet initialisation and DH ratchet steps.
use crate::crypto::blake2b;
use crate::crypto::x25519::{PublicKey, SecretKey};
use crate::dh::{diffie_hellman, triple_diffie_hellman, Role};
use crate::keys::{ChainKey, DerivationKey, HeaderKey, KeyDerivationError, RootKey};

/// Keys both parties hold right after the initial triple DH agreement.
///
/// Alice (the initiator) starts out with receive keys only, Bob with send keys only: Alice's
/// first `send()` performs a DH ratchet step which creates her sending chain, while Bob can
/// reply on his initial chain immediately.
#[derive(Debug)]
pub struct InitialKeys {
    pub root_key: RootKey,
    pub send_header_key: Option<HeaderKey>,
    pub receive_header_key: Option<HeaderKey>,
    pub next_send_header_key: HeaderKey,
    pub next_receive_header_key: HeaderKey,
    pub send_chain_key: Option<ChainKey>,
    pub receive_chain_key: Option<ChainKey>,
}

/// Derives initial root, chain and header keys.
///
/// `RK, CKs/r, HKs/r, NHKs/r = KDF(HASH(DH(A, B0) || DH(A0, B) || DH(A0, B0)))`
pub fn derive_initial_root_chain_and_header_keys(
    role: Role,
    our_secret_identity: &SecretKey,
    our_secret_ephemeral: &SecretKey,
    their_public_identity: &PublicKey,
    their_public_ephemeral: &PublicKey,
) -> Result<InitialKeys, KeyDerivationError> {
    let master_key = triple_diffie_hellman(
        role,
        our_secret_identity,
        our_secret_ephemeral,
        their_public_identity,
        their_public_ephemeral,
    );

    // RK = KDF(master_key, 0)
    let root_key = RootKey::from_bytes(master_key.derive_subkey(0)?);

    let keys = match role {
        Role::Alice => InitialKeys {
            root_key,
            // HKs = <none>, HKr = KDF(master_key, 1)
            send_header_key: None,
            receive_header_key: Some(HeaderKey::from_bytes(master_key.derive_subkey(1)?)),
            // NHKs = KDF(master_key, 2), NHKr = KDF(master_key, 3)
            next_send_header_key: HeaderKey::from_bytes(master_key.derive_subkey(2)?),
            next_receive_header_key: HeaderKey::from_bytes(master_key.derive_subkey(3)?),
            // CKs = <none>, CKr = KDF(master_key, 4)
            send_chain_key: None,
            receive_chain_key: Some(ChainKey::from_bytes(master_key.derive_subkey(4)?)),
        },
        Role::Bob => InitialKeys {
            root_key,
            // HKs = KDF(master_key, 1), HKr = <none>
            send_header_key: Some(HeaderKey::from_bytes(master_key.derive_subkey(1)?)),
            receive_header_key: None,
            // NHKr = KDF(master_key, 2), NHKs = KDF(master_key, 3)
            next_receive_header_key: HeaderKey::from_bytes(master_key.derive_subkey(2)?),
            next_send_header_key: HeaderKey::from_bytes(master_key.derive_subkey(3)?),
            // CKs = KDF(master_key, 4), CKr = <none>
            send_chain_key: Some(ChainKey::from_bytes(master_key.derive_subkey(4)?)),
            receive_chain_key: None,
        },
    };

    Ok(keys)
}

/// Output of a DH ratchet step.
#[derive(Debug)]
pub struct SteppedKeys {
    pub root_key: RootKey,
    pub next_header_key: HeaderKey,
    pub chain_key: ChainKey,
}

/// Derives a root, next header and initial chain key for a new ratchet chain.
///
/// `RK, NHK, CK = KDF(BLAKE2B(key = DH(DHRs, DHRr), input = RK))`
pub fn derive_root_next_header_and_chain_keys(
    role: Role,
    previous_root_key: &RootKey,
    our_secret_ephemeral: &SecretKey,
    our_public_ephemeral: &PublicKey,
    their_public_ephemeral: &PublicKey,
) -> Result<SteppedKeys, KeyDerivationError> {
    let shared = diffie_hellman(
        role,
        our_secret_ephemeral,
        our_public_ephemeral,
        their_public_ephemeral,
    );

    let derivation_key = DerivationKey::from_bytes(blake2b::keyed_hash(
        shared.as_bytes(),
        previous_root_key.as_bytes(),
    )?);

    Ok(SteppedKeys {
        root_key: RootKey::from_bytes(derivation_key.derive_subkey(0)?),
        next_header_key: HeaderKey::from_bytes(derivation_key.derive_subkey(1)?),
        chain_key: ChainKey::from_bytes(derivation_key.derive_subkey(2)?),
    })
}
