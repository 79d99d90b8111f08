// SPDX-License-Identifier: MIT OR Apache-2.0

//! The public operation surface of the library.
//!
//! A [`Library`] owns the user registry and the backup key; hosts construct one and drive all
//! user, conversation and backup operations through it. All mutating operations take
//! exclusive access, there is no interior locking.
use thiserror::Error;
use tracing::debug;

use crate::backup::{self, BackupError};
use crate::conversation::{Conversation, ConversationError, ReceivedMessage};
use crate::crypto::ed25519::PublicSigningKey;
use crate::crypto::{Rng, RngError};
use crate::keys::{BackupKey, ConversationId};
use crate::packet::{self, PacketType};
use crate::prekey_list::SignedPrekeyList;
use crate::user::{User, UserError, UserStore};

/// Message type of a packet as seen by routing code, before any verification.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MessageType {
    Normal,
    Prekey,
    /// The packet doesn't parse; nothing about it can be trusted.
    Invalid,
}

/// Everything a host needs after creating a user.
#[derive(Debug)]
pub struct CreatedUser {
    pub public_master_key: PublicSigningKey,
    pub prekey_list: SignedPrekeyList,
    pub backup_key: BackupKey,
}

/// Handle owning all library state.
#[derive(Debug, Default)]
pub struct Library {
    users: UserStore,
    backup_key: Option<BackupKey>,
    rng: Rng,
}

impl Library {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a library handle with a caller-provided generator, for reproducible tests.
    #[cfg(any(test, feature = "test_utils"))]
    pub fn with_rng(rng: Rng) -> Self {
        Self {
            users: UserStore::new(),
            backup_key: None,
            rng,
        }
    }

    /// Read access to a conversation's state, for tests.
    #[cfg(any(test, feature = "test_utils"))]
    pub fn conversation(&self, conversation_id: &ConversationId) -> Option<&Conversation> {
        self.users
            .find_conversation(conversation_id)
            .map(|(_, conversation)| conversation)
    }

    /// Creates a new user and returns their public master key, a signed pre-key list ready
    /// for publication and the freshly rotated backup key.
    ///
    /// The optional low-entropy seed is mixed into the OS randomness used for the long-term
    /// keys, see [`crate::MasterKeys::new`].
    pub fn create_user(
        &mut self,
        low_entropy_seed: Option<&[u8]>,
    ) -> Result<CreatedUser, LibraryError> {
        let mut user = User::new(&self.rng, low_entropy_seed)?;
        let prekey_list = user.signed_prekey_list(&self.rng)?;
        let public_master_key = user.public_signing_key();

        self.users.add(user);
        let backup_key = self.update_backup_key()?;
        debug!(user = %public_master_key, "created user");

        Ok(CreatedUser {
            public_master_key,
            prekey_list,
            backup_key,
        })
    }

    /// Removes a user and all their conversations.
    pub fn destroy_user(&mut self, public_master_key: &PublicSigningKey) -> Result<(), LibraryError> {
        self.users
            .remove(public_master_key)
            .ok_or(LibraryError::NotFound)?;
        debug!(user = %public_master_key, "destroyed user");
        Ok(())
    }

    /// Removes every user.
    pub fn destroy_all_users(&mut self) {
        self.users.clear();
        debug!("destroyed all users");
    }

    /// Public master keys of all users, in registration order.
    pub fn list_users(&self) -> Vec<PublicSigningKey> {
        self.users.list()
    }

    /// Returns a fresh signed pre-key list for the user, rotating expired pre-keys first.
    pub fn get_prekey_list(
        &mut self,
        public_master_key: &PublicSigningKey,
    ) -> Result<SignedPrekeyList, LibraryError> {
        let user = self
            .users
            .find_mut(public_master_key)
            .ok_or(LibraryError::NotFound)?;
        Ok(user.signed_prekey_list(&self.rng)?)
    }

    /// Starts a conversation towards a receiver and encrypts the first message into a
    /// pre-key packet.
    pub fn start_send_conversation(
        &mut self,
        sender_public_master_key: &PublicSigningKey,
        receiver_public_master_key: &PublicSigningKey,
        receiver_prekey_list: &SignedPrekeyList,
        message: &[u8],
    ) -> Result<(ConversationId, Vec<u8>), LibraryError> {
        let sender = self
            .users
            .find_mut(sender_public_master_key)
            .ok_or(LibraryError::NotFound)?;

        let (conversation, packet) = Conversation::start_send(
            &self.rng,
            message,
            sender.master_keys(),
            receiver_public_master_key,
            receiver_prekey_list,
        )?;

        let conversation_id = conversation.id();
        sender.add_conversation(conversation);
        debug!(id = %conversation_id, "started conversation as sender");

        Ok((conversation_id, packet))
    }

    /// Handles a received pre-key packet: enters the conversation, decrypts the first
    /// message and returns a new pre-key list for publication (the used pre-key has been
    /// deprecated).
    pub fn start_receive_conversation(
        &mut self,
        receiver_public_master_key: &PublicSigningKey,
        packet: &[u8],
    ) -> Result<(ConversationId, SignedPrekeyList, Vec<u8>), LibraryError> {
        let rng = &self.rng;
        let receiver = self
            .users
            .find_mut(receiver_public_master_key)
            .ok_or(LibraryError::NotFound)?;

        let (master_keys, prekeys) = receiver.master_keys_and_prekeys_mut();
        let (conversation, received) = Conversation::start_receive(rng, packet, master_keys, prekeys)?;

        let conversation_id = conversation.id();
        receiver.add_conversation(conversation);
        let prekey_list = receiver.signed_prekey_list(rng)?;
        debug!(id = %conversation_id, "started conversation as receiver");

        Ok((conversation_id, prekey_list, received.plaintext))
    }

    /// Encrypts a message in an existing conversation.
    pub fn encrypt_message(
        &mut self,
        conversation_id: &ConversationId,
        message: &[u8],
    ) -> Result<Vec<u8>, LibraryError> {
        let (_, conversation) = self
            .users
            .find_conversation_mut(conversation_id)
            .ok_or(LibraryError::NotFound)?;
        Ok(conversation.send(&self.rng, message)?)
    }

    /// Decrypts a packet in an existing conversation, returning the plaintext and the
    /// message numbers from its header.
    pub fn decrypt_message(
        &mut self,
        conversation_id: &ConversationId,
        packet: &[u8],
    ) -> Result<ReceivedMessage, LibraryError> {
        let (_, conversation) = self
            .users
            .find_conversation_mut(conversation_id)
            .ok_or(LibraryError::NotFound)?;
        Ok(conversation.receive(packet)?)
    }

    /// Ends and removes a conversation.
    pub fn end_conversation(&mut self, conversation_id: &ConversationId) -> Result<(), LibraryError> {
        let (owner, _) = self
            .users
            .find_conversation(conversation_id)
            .ok_or(LibraryError::NotFound)?;
        let user = self
            .users
            .find_mut(&owner)
            .expect("conversation owner exists in the store");
        user.remove_conversation(conversation_id);
        debug!(id = %conversation_id, "ended conversation");
        Ok(())
    }

    /// Conversation ids of one user, in creation order.
    pub fn list_conversations(
        &self,
        public_master_key: &PublicSigningKey,
    ) -> Result<Vec<ConversationId>, LibraryError> {
        let user = self
            .users
            .find(public_master_key)
            .ok_or(LibraryError::NotFound)?;
        Ok(user.conversation_ids())
    }

    /// Classifies a packet without verifying anything about it.
    pub fn get_message_type(packet: &[u8]) -> MessageType {
        match packet::get_metadata_without_verification(packet) {
            Ok(metadata) => match metadata.packet_type {
                PacketType::Normal => MessageType::Normal,
                PacketType::Prekey => MessageType::Prekey,
            },
            Err(_) => MessageType::Invalid,
        }
    }

    /// Exports the entire library state, sealed under the current backup key.
    pub fn export_full(&self) -> Result<Vec<u8>, LibraryError> {
        let backup_key = self.backup_key.as_ref().ok_or(LibraryError::NoBackupKey)?;
        let backup = backup::export_full(&self.users, backup_key, &self.rng)?;
        debug!("exported full backup");
        Ok(backup)
    }

    /// Imports a full backup, replacing the current user store.
    ///
    /// Requires the backup key that was in effect at export time and rotates the backup key
    /// on success; a failed import leaves all state untouched.
    pub fn import_full(
        &mut self,
        backup: &[u8],
        backup_key: &BackupKey,
    ) -> Result<BackupKey, LibraryError> {
        let users = backup::import_full(backup, backup_key)?;
        self.users = users;
        debug!(users = self.users.len(), "imported full backup");
        self.update_backup_key()
    }

    /// Exports a single conversation, sealed under the current backup key.
    pub fn export_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<u8>, LibraryError> {
        let backup_key = self.backup_key.as_ref().ok_or(LibraryError::NoBackupKey)?;
        let (owner, conversation) = self
            .users
            .find_conversation(conversation_id)
            .ok_or(LibraryError::NotFound)?;
        let backup = backup::export_conversation(owner, conversation, backup_key, &self.rng)?;
        debug!(id = %conversation_id, "exported conversation backup");
        Ok(backup)
    }

    /// Imports a conversation backup into the user it belongs to, overwriting any existing
    /// conversation with the same id. Rotates the backup key on success.
    pub fn import_conversation(
        &mut self,
        backup: &[u8],
        backup_key: &BackupKey,
    ) -> Result<BackupKey, LibraryError> {
        let (owner, conversation) = backup::import_conversation(backup, backup_key)?;
        let user = self.users.find_mut(&owner).ok_or(LibraryError::NotFound)?;
        debug!(id = %conversation.id(), "imported conversation backup");
        user.add_conversation(conversation);
        self.update_backup_key()
    }

    /// Generates and installs a new backup key, returning a copy for the host.
    pub fn update_backup_key(&mut self) -> Result<BackupKey, LibraryError> {
        let backup_key = BackupKey::from_bytes(self.rng.random_array()?);
        self.backup_key = Some(backup_key.clone());
        debug!("rotated backup key");
        Ok(backup_key)
    }
}

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("user or conversation not found")]
    NotFound,

    #[error("no backup key installed yet")]
    NoBackupKey,

    #[error(transparent)]
    Rng(#[from] RngError),

    #[error(transparent)]
    User(#[from] UserError),

    #[error(transparent)]
    Conversation(#[from] ConversationError),

    #[error(transparent)]
    Backup(#[from] BackupError),
}

#[cfg(test)]
mod tests {
    use crate::crypto::Rng;

    use super::{Library, LibraryError, MessageType};

    #[test]
    fn user_lifecycle() {
        let mut library = Library::with_rng(Rng::from_seed([1; 32]));

        let alice = library.create_user(None).unwrap();
        let bob = library.create_user(None).unwrap();

        assert_eq!(
            library.list_users(),
            vec![alice.public_master_key, bob.public_master_key]
        );

        library.destroy_user(&alice.public_master_key).unwrap();
        assert_eq!(library.list_users(), vec![bob.public_master_key]);
        assert!(matches!(
            library.destroy_user(&alice.public_master_key),
            Err(LibraryError::NotFound)
        ));

        library.destroy_all_users();
        assert!(library.list_users().is_empty());
    }

    #[test]
    fn backup_key_rotates_per_user_creation() {
        let mut library = Library::with_rng(Rng::from_seed([2; 32]));

        let alice = library.create_user(None).unwrap();
        let bob = library.create_user(None).unwrap();
        assert_ne!(alice.backup_key, bob.backup_key);
    }

    #[test]
    fn export_requires_backup_key() {
        let library = Library::with_rng(Rng::from_seed([3; 32]));
        assert!(matches!(
            library.export_full(),
            Err(LibraryError::NoBackupKey)
        ));
    }

    #[test]
    fn message_type_classification() {
        // Too short to even carry metadata.
        assert_eq!(Library::get_message_type(b""), MessageType::Invalid);
        // Claims a protocol version from the future.
        assert_eq!(Library::get_message_type(&[0xff; 200]), MessageType::Invalid);
    }
}
