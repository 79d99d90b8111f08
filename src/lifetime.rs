// SPDX-License-Identifier: MIT OR Apache-2.0

//! Expiration timestamps for short-lived key material.
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// One month in seconds, the default lifetime of skipped message keys and active pre-keys.
pub const MONTH: u64 = 60 * 60 * 24 * 31;

/// Three months in seconds, the lifetime of a published pre-key list.
pub const THREE_MONTHS: u64 = 3 * MONTH;

/// Returns the current unix timestamp in seconds.
pub fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("SystemTime before UNIX EPOCH!")
        .as_secs()
}

/// Point in time (unix seconds) after which a piece of key material must no longer be used.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Expiration(u64);

impl Expiration {
    /// Expiration the given number of seconds from now.
    pub fn in_seconds(seconds: u64) -> Self {
        Self(now() + seconds)
    }

    pub fn from_unix_seconds(seconds: u64) -> Self {
        Self(seconds)
    }

    pub fn unix_seconds(&self) -> u64 {
        self.0
    }

    pub fn is_expired(&self) -> bool {
        self.0 < now()
    }

    /// Returns true if this expired more than `age` seconds ago.
    pub fn is_older_than(&self, age: u64) -> bool {
        now().saturating_sub(self.0) > age
    }
}
