// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-user state container and the registry of all users.
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::conversation::Conversation;
use crate::crypto::ed25519::PublicSigningKey;
use crate::crypto::{Rng, RngError};
use crate::keys::ConversationId;
use crate::master_keys::{MasterKeys, MasterKeysError};
use crate::prekey_list::SignedPrekeyList;
use crate::prekey_store::{PrekeyStore, PrekeyStoreError};

/// One user: long-term master keys, the published pre-key pool and all conversations.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct User {
    master_keys: MasterKeys,
    prekeys: PrekeyStore,
    conversations: Vec<Conversation>,
}

impl User {
    /// Creates a new user with fresh master keys and a full pre-key pool.
    pub fn new(rng: &Rng, low_entropy_seed: Option<&[u8]>) -> Result<Self, UserError> {
        Ok(Self {
            master_keys: MasterKeys::new(rng, low_entropy_seed)?,
            prekeys: PrekeyStore::new(rng)?,
            conversations: Vec::new(),
        })
    }

    /// The public master key identifying this user.
    pub fn public_signing_key(&self) -> PublicSigningKey {
        self.master_keys.public_signing_key()
    }

    pub fn master_keys(&self) -> &MasterKeys {
        &self.master_keys
    }

    pub fn prekeys_mut(&mut self) -> &mut PrekeyStore {
        &mut self.prekeys
    }

    /// Master keys and pre-key store as disjoint borrows, for the conversation bootstrap.
    pub fn master_keys_and_prekeys_mut(&mut self) -> (&MasterKeys, &mut PrekeyStore) {
        (&self.master_keys, &mut self.prekeys)
    }

    /// Rotates expired pre-keys and signs a fresh pre-key list for publication.
    pub fn signed_prekey_list(&mut self, rng: &Rng) -> Result<SignedPrekeyList, UserError> {
        self.prekeys.rotate(rng)?;
        Ok(SignedPrekeyList::create(&self.master_keys, &self.prekeys))
    }

    pub fn add_conversation(&mut self, conversation: Conversation) {
        // A conversation import overwrites the existing state under the same id.
        self.remove_conversation(&conversation.id());
        self.conversations.push(conversation);
    }

    pub fn conversation_mut(&mut self, id: &ConversationId) -> Option<&mut Conversation> {
        self.conversations
            .iter_mut()
            .find(|conversation| conversation.id() == *id)
    }

    pub fn conversation(&self, id: &ConversationId) -> Option<&Conversation> {
        self.conversations
            .iter()
            .find(|conversation| conversation.id() == *id)
    }

    pub fn remove_conversation(&mut self, id: &ConversationId) -> Option<Conversation> {
        let index = self
            .conversations
            .iter()
            .position(|conversation| conversation.id() == *id)?;
        Some(self.conversations.remove(index))
    }

    /// Conversation ids in creation order.
    pub fn conversation_ids(&self) -> Vec<ConversationId> {
        self.conversations
            .iter()
            .map(|conversation| conversation.id())
            .collect()
    }
}

/// Registry of all users of this library instance, keyed by public master key.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UserStore {
    users: Vec<User>,
}

impl UserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a user, replacing any previous user with the same public master key.
    pub fn add(&mut self, user: User) {
        let public_signing_key = user.public_signing_key();
        self.users
            .retain(|existing| existing.public_signing_key() != public_signing_key);
        self.users.push(user);
        debug!(user = %public_signing_key, "added user to store");
    }

    pub fn find(&self, public_signing_key: &PublicSigningKey) -> Option<&User> {
        self.users
            .iter()
            .find(|user| user.public_signing_key() == *public_signing_key)
    }

    pub fn find_mut(&mut self, public_signing_key: &PublicSigningKey) -> Option<&mut User> {
        self.users
            .iter_mut()
            .find(|user| user.public_signing_key() == *public_signing_key)
    }

    pub fn remove(&mut self, public_signing_key: &PublicSigningKey) -> Option<User> {
        let index = self
            .users
            .iter()
            .position(|user| user.public_signing_key() == *public_signing_key)?;
        Some(self.users.remove(index))
    }

    /// Public master keys of all users, in registration order.
    pub fn list(&self) -> Vec<PublicSigningKey> {
        self.users.iter().map(User::public_signing_key).collect()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn clear(&mut self) {
        self.users.clear();
    }

    /// Finds a conversation across all users, returning its owner's key as well.
    pub fn find_conversation_mut(
        &mut self,
        id: &ConversationId,
    ) -> Option<(PublicSigningKey, &mut Conversation)> {
        for user in &mut self.users {
            let public_signing_key = user.public_signing_key();
            if let Some(conversation) = user.conversation_mut(id) {
                return Some((public_signing_key, conversation));
            }
        }
        None
    }

    pub fn find_conversation(
        &self,
        id: &ConversationId,
    ) -> Option<(PublicSigningKey, &Conversation)> {
        for user in &self.users {
            if let Some(conversation) = user.conversation(id) {
                return Some((user.public_signing_key(), conversation));
            }
        }
        None
    }
}

#[derive(Debug, Error)]
pub enum UserError {
    #[error(transparent)]
    Rng(#[from] RngError),

    #[error(transparent)]
    MasterKeys(#[from] MasterKeysError),

    #[error(transparent)]
    PrekeyStore(#[from] PrekeyStoreError),
}

#[cfg(test)]
mod tests {
    use crate::crypto::Rng;

    use super::{User, UserStore};

    #[test]
    fn store_registration_and_lookup() {
        let rng = Rng::from_seed([1; 32]);
        let mut store = UserStore::new();

        let user_1 = User::new(&rng, None).unwrap();
        let user_2 = User::new(&rng, None).unwrap();
        let key_1 = user_1.public_signing_key();
        let key_2 = user_2.public_signing_key();

        store.add(user_1);
        store.add(user_2);

        assert_eq!(store.len(), 2);
        assert_eq!(store.list(), vec![key_1, key_2]);
        assert!(store.find(&key_1).is_some());

        store.remove(&key_1).unwrap();
        assert_eq!(store.list(), vec![key_2]);
        assert!(store.find(&key_1).is_none());
    }

    #[test]
    fn prekey_list_rotates_expired_keys() {
        let rng = Rng::from_seed([2; 32]);
        let mut user = User::new(&rng, None).unwrap();

        let old_public = user.prekeys_mut().active_publics()[0];
        user.prekeys_mut().force_expiration(
            0,
            crate::lifetime::Expiration::from_unix_seconds(crate::lifetime::now() - 60),
        );

        let list = user.signed_prekey_list(&rng).unwrap();
        let verified = list.verify(&user.public_signing_key()).unwrap();

        // The expired key is no longer part of the published list.
        assert!(!verified.prekeys.contains(&old_public));
    }
}
