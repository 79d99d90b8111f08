// SPDX-License-Identifier: MIT OR Apache-2.0

//! Encrypted at-rest snapshots of library state.
//!
//! A backup is a CBOR envelope `{version, type, nonce, ciphertext}` whose ciphertext is the
//! secret-boxed CBOR serialisation of either the whole user store or a single conversation.
//! The seal is the current backup key; importing a backup requires the key that was in effect
//! at export time.
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::conversation::Conversation;
use crate::crypto::ed25519::PublicSigningKey;
use crate::crypto::xchacha20::{x_aead_decrypt, x_aead_encrypt, XAeadNonce};
use crate::crypto::{Rng, RngError};
use crate::keys::BackupKey;
use crate::user::UserStore;

/// Version of the backup envelope format.
pub const BACKUP_VERSION: u32 = 0;

pub const BACKUP_NONCE_SIZE: usize = 24;

/// Shape of a backup's payload.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackupType {
    /// Serialised user store with every user's full state.
    Full,
    /// One serialised conversation.
    Conversation,
}

#[derive(Serialize, Deserialize)]
struct BackupEnvelope {
    backup_version: u32,
    backup_type: BackupType,
    #[serde(with = "serde_bytes")]
    nonce: XAeadNonce,
    #[serde(with = "serde_bytes")]
    ciphertext: Vec<u8>,
}

/// Payload of a conversation backup. The owner's public master key rides along so an import
/// can find the user the conversation belongs to.
#[derive(Serialize, Deserialize)]
struct ConversationPayload {
    owner: PublicSigningKey,
    conversation: Conversation,
}

fn seal(
    backup_type: BackupType,
    payload: Vec<u8>,
    backup_key: &BackupKey,
    rng: &Rng,
) -> Result<Vec<u8>, BackupError> {
    let nonce: XAeadNonce = rng.random_array()?;
    let ciphertext = x_aead_encrypt(backup_key.as_bytes(), &payload, nonce, None)
        .map_err(|_| BackupError::EncryptionFailed)?;

    let envelope = BackupEnvelope {
        backup_version: BACKUP_VERSION,
        backup_type,
        nonce,
        ciphertext,
    };

    let mut bytes = Vec::new();
    ciborium::ser::into_writer(&envelope, &mut bytes)?;
    Ok(bytes)
}

fn open(
    backup: &[u8],
    expected_type: BackupType,
    backup_key: &BackupKey,
) -> Result<Vec<u8>, BackupError> {
    let envelope: BackupEnvelope = ciborium::de::from_reader(backup)?;

    if envelope.backup_version != BACKUP_VERSION {
        return Err(BackupError::IncompatibleVersion(envelope.backup_version));
    }
    if envelope.backup_type != expected_type {
        return Err(BackupError::WrongType(envelope.backup_type));
    }

    x_aead_decrypt(
        backup_key.as_bytes(),
        &envelope.ciphertext,
        envelope.nonce,
        None,
    )
    .map_err(|_| BackupError::DecryptionFailed)
}

/// Exports the full user store sealed under the backup key.
pub fn export_full(
    user_store: &UserStore,
    backup_key: &BackupKey,
    rng: &Rng,
) -> Result<Vec<u8>, BackupError> {
    let mut payload = Vec::new();
    ciborium::ser::into_writer(user_store, &mut payload)?;
    seal(BackupType::Full, payload, backup_key, rng)
}

/// Decrypts and deserialises a full backup.
pub fn import_full(backup: &[u8], backup_key: &BackupKey) -> Result<UserStore, BackupError> {
    let payload = open(backup, BackupType::Full, backup_key)?;
    Ok(ciborium::de::from_reader(&payload[..])?)
}

/// Exports a single conversation sealed under the backup key.
pub fn export_conversation(
    owner: PublicSigningKey,
    conversation: &Conversation,
    backup_key: &BackupKey,
    rng: &Rng,
) -> Result<Vec<u8>, BackupError> {
    let mut payload = Vec::new();
    ciborium::ser::into_writer(
        &ConversationPayload {
            owner,
            conversation: conversation.clone(),
        },
        &mut payload,
    )?;
    seal(BackupType::Conversation, payload, backup_key, rng)
}

/// Decrypts and deserialises a conversation backup, returning the owner's public master key
/// alongside the conversation.
pub fn import_conversation(
    backup: &[u8],
    backup_key: &BackupKey,
) -> Result<(PublicSigningKey, Conversation), BackupError> {
    let payload = open(backup, BackupType::Conversation, backup_key)?;
    let payload: ConversationPayload = ciborium::de::from_reader(&payload[..])?;
    Ok((payload.owner, payload.conversation))
}

#[derive(Debug, Error)]
pub enum BackupError {
    #[error(transparent)]
    Rng(#[from] RngError),

    #[error("could not encode backup payload: {0}")]
    Encode(#[from] ciborium::ser::Error<std::io::Error>),

    #[error("could not decode backup: {0}")]
    Decode(#[from] ciborium::de::Error<std::io::Error>),

    #[error("could not encrypt backup")]
    EncryptionFailed,

    #[error("could not decrypt backup, wrong backup key?")]
    DecryptionFailed,

    #[error("incompatible backup version {0}")]
    IncompatibleVersion(u32),

    #[error("backup has unexpected type {0:?}")]
    WrongType(BackupType),
}
