// SPDX-License-Identifier: MIT OR Apache-2.0

//! `molch` is an end-to-end encrypted messaging state engine implementing the Axolotl
//! construction (an early variant of Signal's [Double Ratchet
//! algorithm](https://en.wikipedia.org/wiki/Double_Ratchet_Algorithm)), providing forward
//! secrecy and post-compromise security for ordered but potentially lossy message streams
//! between pairs of users.
//!
//! ## Protocol
//!
//! Conversations are bootstrapped with a triple Diffie-Hellman key agreement against a
//! published, signed list of short-lived pre-keys. From the resulting master secret both
//! parties derive root, chain and header keys and from then on advance two interleaved
//! ratchets: a per-message KDF chain (forward secrecy) and a DH ratchet stepped whenever the
//! direction of communication turns around (post-compromise security).
//!
//! Message headers are themselves encrypted. The receive path therefore runs in three phases:
//! probing which header key decrypts the header, deriving purported keys into a staging area,
//! and committing that staging area only once the payload authenticated. Messages arriving out
//! of order are served from a bounded store of skipped header and message keys.
//!
//! ## State and backups
//!
//! All long-lived state (users with their master keys, pre-key stores and conversations) is
//! owned by a [`Library`] handle. The full state or a single conversation can be exported as
//! an encrypted backup, sealed under a rotatable symmetric backup key.
//!
//! ## Scope
//!
//! Transport, identity discovery, group messaging and multi-device synchronisation are out of
//! scope; `molch` is the cryptographic core a messaging application drives.
mod backup;
mod conversation;
mod crypto;
mod dh;
mod header;
mod kdf;
mod key_store;
mod keys;
mod library;
mod lifetime;
mod master_keys;
mod packet;
mod prekey_list;
mod prekey_store;
mod ratchet;
mod spiced_random;
mod user;

pub use backup::{BackupError, BackupType};
pub use conversation::{Conversation, ConversationError, ReceivedMessage};
pub use crypto::ed25519::{PublicSigningKey, SignatureError, SIGNATURE_SIZE};
pub use crypto::x25519::{PublicKey, SecretKey, PUBLIC_KEY_SIZE};
pub use crypto::{Rng, RngError};
pub use dh::Role;
pub use header::HeaderError;
pub use key_store::{HeaderAndMessageKey, HeaderAndMessageKeyStore, MAX_AGE, MAX_KEYS};
pub use keys::{
    BackupKey, ChainKey, ConversationId, HeaderKey, KeyDerivationError, MessageKey, RootKey,
    BACKUP_KEY_SIZE, CONVERSATION_ID_SIZE,
};
pub use library::{CreatedUser, Library, LibraryError, MessageType};
pub use lifetime::Expiration;
pub use master_keys::{MasterKeys, MasterKeysError};
pub use packet::{PacketError, PacketType};
pub use prekey_list::{PrekeyListError, SignedPrekeyList, VerifiedPrekeyList};
pub use prekey_store::{PrekeyStore, PrekeyStoreError, PREKEY_AMOUNT};
pub use ratchet::{HeaderDecryptability, Ratchet, RatchetError, SendOutput};
pub use spiced_random::SpicedRandomError;
pub use user::UserError;
