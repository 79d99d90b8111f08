// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core cryptographic algorithms and random number generator.
//!
//! Algorithms:
//! - X25519 ECDH key agreement
//! - Ed25519 DSA
//! - XChaCha20Poly1305 AEAD (large IVs)
//! - Blake2b keyed hashing with salt and personalisation (subkey derivation)
//! - Argon2id password hashing (spiced randomness)
//!
//! Random Number Generator:
//! - ChaCha20 stream cipher, seeded via `getrandom`
pub mod blake2b;
pub mod ed25519;
mod rng;
pub mod x25519;
pub mod xchacha20;

pub use rng::{Rng, RngError};
