// SPDX-License-Identifier: MIT OR Apache-2.0

//! Randomness spiced with caller-supplied low-entropy input.
//!
//! Long-term keys can be derived from OS randomness XORed with an Argon2id digest of some
//! external entropy source (a passphrase, hardware token output and the like). Even a fully
//! broken OS generator then still leaves the attacker with the spice to guess, while a weak
//! spice costs nothing because of the XOR.
use argon2::{Algorithm, Argon2, Params, Version};
use thiserror::Error;
use zeroize::Zeroize;

use crate::crypto::{Rng, RngError};

const SALT_SIZE: usize = 16;

/// Interactive Argon2id limits, matching libsodium's `OPSLIMIT_INTERACTIVE` and
/// `MEMLIMIT_INTERACTIVE` (64 MiB, two passes, one lane).
const MEMORY_COST_KIB: u32 = 64 * 1024;
const TIME_COST: u32 = 2;
const PARALLELISM: u32 = 1;

/// Combines OS randomness with a low-entropy spice into `output_length` random bytes.
///
/// WARNING: Never feed this with output of the OS random number generator as spice, it might
/// annihilate the randomness.
pub fn spiced_random(
    rng: &Rng,
    low_entropy_spice: &[u8],
    output_length: usize,
) -> Result<Vec<u8>, SpicedRandomError> {
    let mut os_random = rng.random_vec(output_length)?;
    let salt: [u8; SALT_SIZE] = rng.random_array()?;

    let params = Params::new(MEMORY_COST_KIB, TIME_COST, PARALLELISM, Some(output_length))
        .map_err(|_| SpicedRandomError::SpiceDerivation)?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut spice = vec![0u8; output_length];
    argon2
        .hash_password_into(low_entropy_spice, &salt, &mut spice)
        .map_err(|_| SpicedRandomError::SpiceDerivation)?;

    for (byte, spice_byte) in os_random.iter_mut().zip(spice.iter()) {
        *byte ^= spice_byte;
    }
    spice.zeroize();

    Ok(os_random)
}

#[derive(Debug, Error)]
pub enum SpicedRandomError {
    #[error(transparent)]
    Rng(#[from] RngError),

    #[error("failed to derive random data from the spice")]
    SpiceDerivation,
}

#[cfg(test)]
mod tests {
    use crate::crypto::Rng;

    use super::spiced_random;

    #[test]
    fn output_has_requested_length() {
        let rng = Rng::from_seed([1; 32]);
        let random = spiced_random(&rng, b"mn ujkhuzn7b7bzh6ujg7j8hn", 64).unwrap();
        assert_eq!(random.len(), 64);
    }

    #[test]
    fn same_spice_still_yields_fresh_randomness() {
        let rng = Rng::from_seed([1; 32]);

        let random_1 = spiced_random(&rng, b"spice", 32).unwrap();
        let random_2 = spiced_random(&rng, b"spice", 32).unwrap();

        // The OS randomness and salt differ between calls.
        assert_ne!(random_1, random_2);
    }

    #[test]
    fn empty_spice_is_allowed() {
        let rng = Rng::from_seed([2; 32]);
        assert!(spiced_random(&rng, b"", 32).is_ok());
    }
}
