// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bounded store of header and message keys for messages that were skipped over.
//!
//! When the ratchet advances past messages that haven't arrived yet, their keys are parked
//! here so late arrivals can still be decrypted. The store is ordered by expiration date,
//! bounded in size and entries age out after a month.
use serde::{Deserialize, Serialize};

use crate::keys::{HeaderKey, MessageKey};
use crate::lifetime::{Expiration, MONTH};

/// Upper bound on stored keys; the oldest entry is evicted when a new one doesn't fit.
pub const MAX_KEYS: usize = 1000;

/// Entries whose expiration lies more than this many seconds in the past are purged.
pub const MAX_AGE: u64 = MONTH;

const EXPIRATION_TIME: u64 = MONTH;

/// A header key and message key kept around for one skipped message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderAndMessageKey {
    header_key: HeaderKey,
    message_key: MessageKey,
    expiration: Expiration,
}

impl HeaderAndMessageKey {
    pub fn new(header_key: HeaderKey, message_key: MessageKey) -> Self {
        Self {
            header_key,
            message_key,
            expiration: Expiration::in_seconds(EXPIRATION_TIME),
        }
    }

    pub fn header_key(&self) -> &HeaderKey {
        &self.header_key
    }

    pub fn message_key(&self) -> &MessageKey {
        &self.message_key
    }

    pub fn expiration(&self) -> Expiration {
        self.expiration
    }
}

/// Ordered collection of header and message keys, ascending by expiration date.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderAndMessageKeyStore {
    keys: Vec<HeaderAndMessageKey>,
}

impl HeaderAndMessageKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a key pair with the default expiration time.
    pub fn add(&mut self, header_key: HeaderKey, message_key: MessageKey) {
        self.insert(HeaderAndMessageKey::new(header_key, message_key));
    }

    /// Inserts an entry keeping the expiration ordering intact.
    pub fn insert(&mut self, entry: HeaderAndMessageKey) {
        self.remove_outdated();

        if self.keys.len() >= MAX_KEYS {
            // Evict the entry closest to expiry.
            self.keys.remove(0);
        }

        // Expirations are monotonic in practice, so appending is the common case.
        match self.keys.last() {
            Some(last) if last.expiration > entry.expiration => {
                let position = self
                    .keys
                    .partition_point(|existing| existing.expiration <= entry.expiration);
                self.keys.insert(position, entry);
            }
            _ => self.keys.push(entry),
        }
    }

    /// Merges another store into this one, preserving the expiration ordering and bounds.
    pub fn merge(&mut self, other: HeaderAndMessageKeyStore) {
        for entry in other.keys {
            self.insert(entry);
        }
        self.remove_outdated();
    }

    /// Drops all entries that expired more than [`MAX_AGE`] seconds ago.
    pub fn remove_outdated(&mut self) {
        self.keys.retain(|entry| !entry.expiration.is_older_than(MAX_AGE));
    }

    pub fn get(&self, index: usize) -> Option<&HeaderAndMessageKey> {
        self.keys.get(index)
    }

    pub fn remove(&mut self, index: usize) -> HeaderAndMessageKey {
        self.keys.remove(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &HeaderAndMessageKey> {
        self.keys.iter()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Clears the store, dropping (and thereby zeroising) all keys.
    pub fn clear(&mut self) {
        self.keys.clear();
    }

    #[cfg(test)]
    pub(crate) fn insert_with_expiration(
        &mut self,
        header_key: HeaderKey,
        message_key: MessageKey,
        expiration: Expiration,
    ) {
        self.insert(HeaderAndMessageKey {
            header_key,
            message_key,
            expiration,
        });
    }
}
