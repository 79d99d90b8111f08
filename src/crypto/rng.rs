// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cryptographically-secure random number generator.
//!
//! A ChaCha20 stream cipher seeded from the operating system, behind a mutex so one generator
//! can serve a whole library handle. Everything the crate draws (keys, nonces, conversation
//! ids, pre-key slots) goes through this type.
use std::sync::Mutex;

use rand_chacha::rand_core::{SeedableRng, TryRngCore};
use rand_chacha::ChaCha20Rng;
use thiserror::Error;

#[derive(Debug)]
pub struct Rng {
    inner: Mutex<ChaCha20Rng>,
}

impl Default for Rng {
    fn default() -> Self {
        Self {
            inner: Mutex::new(ChaCha20Rng::from_os_rng()),
        }
    }
}

impl Rng {
    /// Returns a generator with a fixed seed, yielding a reproducible byte stream.
    ///
    /// Never use this outside of tests, the whole security of the protocol collapses with
    /// predictable randomness.
    #[cfg(any(test, feature = "test_utils"))]
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            inner: Mutex::new(ChaCha20Rng::from_seed(seed)),
        }
    }

    fn fill(&self, out: &mut [u8]) -> Result<(), RngError> {
        let mut inner = self.inner.lock().map_err(|_| RngError::LockPoisoned)?;
        inner.try_fill_bytes(out).map_err(|_| RngError::FillFailed)
    }

    pub fn random_array<const N: usize>(&self) -> Result<[u8; N], RngError> {
        let mut out = [0u8; N];
        self.fill(&mut out)?;
        Ok(out)
    }

    pub fn random_vec(&self, len: usize) -> Result<Vec<u8>, RngError> {
        let mut out = vec![0u8; len];
        self.fill(&mut out)?;
        Ok(out)
    }

    /// Returns a uniformly distributed index in `0..upper`.
    ///
    /// Uses rejection sampling to avoid the modulo bias of reducing a raw 32-bit sample.
    pub fn random_index(&self, upper: u32) -> Result<u32, RngError> {
        if upper == 0 {
            return Err(RngError::EmptyRange);
        }

        let zone = u32::MAX - (u32::MAX % upper);
        loop {
            let sample = u32::from_be_bytes(self.random_array()?);
            if sample < zone {
                return Ok(sample % upper);
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum RngError {
    #[error("random number generator lock is poisoned")]
    LockPoisoned,

    #[error("could not gather randomness from the generator")]
    FillFailed,

    #[error("can not sample an index from an empty range")]
    EmptyRange,
}
