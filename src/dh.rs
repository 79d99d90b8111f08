// SPDX-License-Identifier: MIT OR Apache-2.0

//! Diffie-Hellman key agreement helpers.
//!
//! Both parties must hash the involved public keys in the same order, so every agreement is
//! parameterised by the caller's [`Role`]. Alice is the party that opened the conversation by
//! sending the initial pre-key packet, Bob the party that received it.
use serde::{Deserialize, Serialize};

use crate::crypto::blake2b;
use crate::crypto::x25519::{PublicKey, SecretKey};
use crate::keys::DerivationKey;

/// Which side of the conversation this party is on.
///
/// The role decides the public key hashing order of the DH agreements and which chain and
/// header keys are present right after the initial key derivation.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Initiated the conversation by sending the first pre-key packet.
    Alice,
    /// Entered the conversation by receiving a pre-key packet.
    Bob,
}

/// Hashed DH agreement between two ephemeral keys.
///
/// Alice: `H(ECDH(our_secret, their_public) || our_public || their_public)`
/// Bob:   `H(ECDH(our_secret, their_public) || their_public || our_public)`
pub fn diffie_hellman(
    role: Role,
    our_secret: &SecretKey,
    our_public: &PublicKey,
    their_public: &PublicKey,
) -> DerivationKey {
    let shared = our_secret.calculate_agreement(their_public);

    let digest = match role {
        Role::Alice => blake2b::hash(&[&shared, our_public.as_bytes(), their_public.as_bytes()]),
        Role::Bob => blake2b::hash(&[&shared, their_public.as_bytes(), our_public.as_bytes()]),
    };

    DerivationKey::from_bytes(digest)
}

/// Triple Diffie-Hellman producing the master secret of the initial key agreement.
///
/// With A and B the identity keys of Alice and Bob and A0 and B0 their handshake ephemerals
/// (Alice's fresh keypair, Bob's pre-key), both sides compute:
///
/// `H(DH(A, B0) || DH(A0, B) || DH(A0, B0))`
pub fn triple_diffie_hellman(
    role: Role,
    our_secret_identity: &SecretKey,
    our_secret_ephemeral: &SecretKey,
    their_public_identity: &PublicKey,
    their_public_ephemeral: &PublicKey,
) -> DerivationKey {
    let identity_ephemeral = our_secret_identity.calculate_agreement(their_public_ephemeral);
    let ephemeral_identity = our_secret_ephemeral.calculate_agreement(their_public_identity);
    let ephemeral_ephemeral = our_secret_ephemeral.calculate_agreement(their_public_ephemeral);

    let digest = match role {
        Role::Alice => blake2b::hash(&[
            &identity_ephemeral,
            &ephemeral_identity,
            &ephemeral_ephemeral,
        ]),
        Role::Bob => blake2b::hash(&[
            &ephemeral_identity,
            &identity_ephemeral,
            &ephemeral_ephemeral,
        ]),
    };

    DerivationKey::from_bytes(digest)
}
