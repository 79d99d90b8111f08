// SPDX-License-Identifier: MIT OR Apache-2.0

//! A conversation between two users: a random identifier plus one double ratchet session,
//! glued to the packet codec.
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::crypto::ed25519::PublicSigningKey;
use crate::crypto::x25519::SecretKey;
use crate::crypto::{Rng, RngError};
use crate::dh::Role;
use crate::keys::ConversationId;
use crate::master_keys::MasterKeys;
use crate::packet::{self, PacketError, PacketType, PrekeyMetadata};
use crate::prekey_list::{PrekeyListError, SignedPrekeyList};
use crate::prekey_store::{PrekeyStore, PrekeyStoreError, PREKEY_AMOUNT};
use crate::ratchet::{HeaderDecryptability, Ratchet, RatchetError};

/// A decrypted message together with the ratchet positions it was sent at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub plaintext: Vec<u8>,
    pub message_number: u32,
    pub previous_message_number: u32,
}

/// One end of an end-to-end encrypted conversation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Conversation {
    id: ConversationId,
    ratchet: Ratchet,
}

impl Conversation {
    /// Opens a conversation towards a receiver and encrypts the first message.
    ///
    /// Verifies the receiver's signed pre-key list, picks one of its pre-keys at random and
    /// runs the initial key agreement with a fresh handshake ephemeral. The returned packet
    /// is a pre-key packet carrying everything the receiver needs to do the same.
    pub fn start_send(
        rng: &Rng,
        message: &[u8],
        our_master_keys: &MasterKeys,
        receiver_public_signing_key: &PublicSigningKey,
        receiver_prekey_list: &SignedPrekeyList,
    ) -> Result<(Self, Vec<u8>), ConversationError> {
        let verified = receiver_prekey_list.verify(receiver_public_signing_key)?;
        let our_public_identity = our_master_keys.public_identity_key();

        let prekey_index = rng.random_index(PREKEY_AMOUNT as u32)? as usize;
        let receiver_public_prekey = verified.prekeys[prekey_index];

        let our_secret_ephemeral = SecretKey::from_bytes(rng.random_array()?);
        let our_public_ephemeral = our_secret_ephemeral.public_key();

        let ratchet = Ratchet::new(
            Role::Alice,
            our_master_keys.secret_identity_key(),
            our_public_identity,
            verified.public_identity_key,
            our_secret_ephemeral,
            our_public_ephemeral,
            receiver_public_prekey,
        )?;

        let mut conversation = Self {
            id: ConversationId::from_bytes(rng.random_array()?),
            ratchet,
        };
        debug!(id = %conversation.id, "starting conversation as sender");

        let packet = conversation.send_with_metadata(
            rng,
            message,
            Some(PrekeyMetadata {
                sender_public_identity: our_public_identity,
                sender_public_ephemeral: our_public_ephemeral,
                receiver_public_prekey,
            }),
        )?;

        Ok((conversation, packet))
    }

    /// Enters a conversation from a received pre-key packet and decrypts its message.
    ///
    /// Looks up (and thereby deprecates) the private pre-key the sender chose. On any
    /// decryption failure the half-built conversation is discarded.
    pub fn start_receive(
        rng: &Rng,
        packet: &[u8],
        our_master_keys: &MasterKeys,
        prekey_store: &mut PrekeyStore,
    ) -> Result<(Self, ReceivedMessage), ConversationError> {
        let metadata = packet::get_metadata_without_verification(packet)?;
        if metadata.packet_type != PacketType::Prekey {
            return Err(ConversationError::NotAPrekeyPacket);
        }
        let prekey_metadata = metadata
            .prekey_metadata
            .expect("pre-key packets carry pre-key metadata");

        let our_secret_prekey = prekey_store.get(&prekey_metadata.receiver_public_prekey, rng)?;

        let ratchet = Ratchet::new(
            Role::Bob,
            our_master_keys.secret_identity_key(),
            our_master_keys.public_identity_key(),
            prekey_metadata.sender_public_identity,
            our_secret_prekey,
            prekey_metadata.receiver_public_prekey,
            prekey_metadata.sender_public_ephemeral,
        )?;

        let mut conversation = Self {
            id: ConversationId::from_bytes(rng.random_array()?),
            ratchet,
        };

        let received = conversation.receive(packet)?;
        debug!(id = %conversation.id, "started conversation as receiver");

        Ok((conversation, received))
    }

    pub fn id(&self) -> ConversationId {
        self.id
    }

    /// Read access to the underlying ratchet state, for tests.
    #[cfg(any(test, feature = "test_utils"))]
    pub fn ratchet(&self) -> &Ratchet {
        &self.ratchet
    }

    /// Encrypts a message to the peer.
    pub fn send(&mut self, rng: &Rng, message: &[u8]) -> Result<Vec<u8>, ConversationError> {
        self.send_with_metadata(rng, message, None)
    }

    fn send_with_metadata(
        &mut self,
        rng: &Rng,
        message: &[u8],
        prekey_metadata: Option<PrekeyMetadata>,
    ) -> Result<Vec<u8>, ConversationError> {
        let output = self.ratchet.send(rng)?;

        let packet = packet::encrypt(
            rng,
            &output.our_public_ephemeral,
            output.message_number,
            output.previous_message_number,
            &output.header_key,
            message,
            &output.message_key,
            prekey_metadata.as_ref(),
        )?;

        Ok(packet)
    }

    /// Decrypts a received packet.
    ///
    /// First probes the skipped header and message keys, handling messages whose chain
    /// position was already ratcheted over. Everything else runs through the three phase
    /// ratchet receive transaction; on failure the ratchet is left exactly as it was.
    pub fn receive(&mut self, packet: &[u8]) -> Result<ReceivedMessage, ConversationError> {
        if let Some(received) = self.try_skipped_header_and_message_keys(packet) {
            return Ok(received);
        }

        let result = self.receive_with_ratchet(packet);
        if result.is_err() {
            // Unconditionally roll back whatever the failed transaction staged.
            self.ratchet
                .set_last_message_authenticity(false)
                .expect("reporting a failed receive never errors");
        }
        result
    }

    /// Corresponds to `try_skipped_header_and_message_keys` from the Axolotl protocol
    /// description: attempt decryption with every stored key pair, consuming the entry on
    /// success.
    fn try_skipped_header_and_message_keys(&mut self, packet: &[u8]) -> Option<ReceivedMessage> {
        let store = self.ratchet.skipped_header_and_message_keys_mut();

        for index in 0..store.len() {
            let entry = store.get(index).expect("index is within bounds");
            if let Ok((header, plaintext)) =
                packet::decrypt(packet, entry.header_key(), entry.message_key())
            {
                store.remove(index);
                debug!(
                    message_number = header.message_number,
                    "decrypted packet from skipped key store"
                );
                return Some(ReceivedMessage {
                    plaintext,
                    message_number: header.message_number,
                    previous_message_number: header.previous_message_number,
                });
            }
        }

        None
    }

    fn receive_with_ratchet(&mut self, packet: &[u8]) -> Result<ReceivedMessage, ConversationError> {
        let (current_header_key, next_header_key) = self.ratchet.receive_header_keys();

        // Probe which receive header key opens this packet.
        let header = match current_header_key
            .and_then(|key| packet::decrypt_header(packet, &key).ok())
        {
            Some(header) => {
                self.ratchet
                    .set_header_decryptability(HeaderDecryptability::CurrentDecryptable)?;
                header
            }
            None => match packet::decrypt_header(packet, &next_header_key) {
                Ok(header) => {
                    self.ratchet
                        .set_header_decryptability(HeaderDecryptability::NextDecryptable)?;
                    header
                }
                Err(_) => {
                    self.ratchet
                        .set_header_decryptability(HeaderDecryptability::Undecryptable)?;
                    return Err(ConversationError::DecryptionFailed);
                }
            },
        };

        let message_key = self.ratchet.receive(
            &header.our_public_ephemeral,
            header.message_number,
            header.previous_message_number,
        )?;

        let plaintext = packet::decrypt_message(packet, &message_key)
            .map_err(|_| ConversationError::DecryptionFailed)?;

        self.ratchet.set_last_message_authenticity(true)?;

        Ok(ReceivedMessage {
            plaintext,
            message_number: header.message_number,
            previous_message_number: header.previous_message_number,
        })
    }
}

#[derive(Debug, Error)]
pub enum ConversationError {
    #[error(transparent)]
    Rng(#[from] RngError),

    #[error(transparent)]
    Ratchet(#[from] RatchetError),

    #[error(transparent)]
    Packet(#[from] PacketError),

    #[error(transparent)]
    PrekeyList(#[from] PrekeyListError),

    #[error(transparent)]
    PrekeyStore(#[from] PrekeyStoreError),

    #[error("packet is not a pre-key packet")]
    NotAPrekeyPacket,

    #[error("failed to decrypt the message")]
    DecryptionFailed,
}

#[cfg(test)]
mod tests {
    use crate::crypto::Rng;
    use crate::master_keys::MasterKeys;
    use crate::packet::{self, PacketType};
    use crate::prekey_list::SignedPrekeyList;
    use crate::prekey_store::PrekeyStore;

    use super::{Conversation, ConversationError};

    struct TestUser {
        master_keys: MasterKeys,
        prekeys: PrekeyStore,
    }

    impl TestUser {
        fn new(rng: &Rng) -> Self {
            Self {
                master_keys: MasterKeys::new(rng, None).unwrap(),
                prekeys: PrekeyStore::new(rng).unwrap(),
            }
        }

        fn prekey_list(&self) -> SignedPrekeyList {
            SignedPrekeyList::create(&self.master_keys, &self.prekeys)
        }
    }

    fn conversation_pair(rng: &Rng) -> (Conversation, Conversation) {
        let alice = TestUser::new(rng);
        let mut bob = TestUser::new(rng);

        let (alice_conversation, packet) = Conversation::start_send(
            rng,
            b"Hi Bob. Alice here!",
            &alice.master_keys,
            &bob.master_keys.public_signing_key(),
            &bob.prekey_list(),
        )
        .unwrap();

        let (bob_conversation, received) = Conversation::start_receive(
            rng,
            &packet,
            &bob.master_keys,
            &mut bob.prekeys,
        )
        .unwrap();
        assert_eq!(received.plaintext, b"Hi Bob. Alice here!");

        (alice_conversation, bob_conversation)
    }

    #[test]
    fn conversation_start_roundtrip() {
        let rng = Rng::from_seed([1; 32]);
        let (mut alice_conversation, mut bob_conversation) = conversation_pair(&rng);

        // The opening packet was a pre-key packet; replies are normal packets.
        let reply = bob_conversation.send(&rng, b"Welcome Alice!").unwrap();
        let metadata = packet::get_metadata_without_verification(&reply).unwrap();
        assert_eq!(metadata.packet_type, PacketType::Normal);

        let received = alice_conversation.receive(&reply).unwrap();
        assert_eq!(received.plaintext, b"Welcome Alice!");
        assert_eq!(received.message_number, 0);
        assert_eq!(received.previous_message_number, 0);
    }

    #[test]
    fn out_of_order_within_a_chain() {
        let rng = Rng::from_seed([2; 32]);
        let (mut alice_conversation, mut bob_conversation) = conversation_pair(&rng);

        let m0 = alice_conversation.send(&rng, b"message 0").unwrap();
        let m1 = alice_conversation.send(&rng, b"message 1").unwrap();
        let m2 = alice_conversation.send(&rng, b"message 2").unwrap();

        assert_eq!(bob_conversation.receive(&m0).unwrap().plaintext, b"message 0");
        assert_eq!(bob_conversation.receive(&m2).unwrap().plaintext, b"message 2");

        // Skipping m1 left exactly its key behind.
        assert_eq!(
            bob_conversation
                .ratchet()
                .skipped_header_and_message_keys()
                .len(),
            1
        );

        // m1 is served from the skipped key store.
        assert_eq!(bob_conversation.receive(&m1).unwrap().plaintext, b"message 1");
        assert!(bob_conversation
            .ratchet()
            .skipped_header_and_message_keys()
            .is_empty());
    }

    #[test]
    fn replayed_packet_is_rejected() {
        let rng = Rng::from_seed([3; 32]);
        let (mut alice_conversation, mut bob_conversation) = conversation_pair(&rng);

        let m0 = alice_conversation.send(&rng, b"only once").unwrap();
        assert!(bob_conversation.receive(&m0).is_ok());
        assert!(bob_conversation.receive(&m0).is_err());
    }

    #[test]
    fn tampered_packet_is_rejected_without_state_change() {
        let rng = Rng::from_seed([4; 32]);
        let (mut alice_conversation, mut bob_conversation) = conversation_pair(&rng);

        let m0 = alice_conversation.send(&rng, b"untampered").unwrap();

        let mut tampered = m0.clone();
        *tampered.last_mut().unwrap() ^= 0x01;
        assert!(matches!(
            bob_conversation.receive(&tampered),
            Err(ConversationError::DecryptionFailed)
        ));

        // The honest packet still decrypts afterwards.
        assert_eq!(bob_conversation.receive(&m0).unwrap().plaintext, b"untampered");
    }

    #[test]
    fn non_prekey_packet_cannot_start_a_conversation() {
        let rng = Rng::from_seed([5; 32]);
        let (mut alice_conversation, _) = conversation_pair(&rng);
        let mut receiver = TestUser::new(&rng);

        let normal_packet = alice_conversation.send(&rng, b"hello").unwrap();
        assert!(matches!(
            Conversation::start_receive(&rng, &normal_packet, &receiver.master_keys, &mut receiver.prekeys),
            Err(ConversationError::NotAPrekeyPacket)
        ));
    }

    #[test]
    fn unknown_prekey_aborts_start_receive() {
        let rng = Rng::from_seed([6; 32]);
        let alice = TestUser::new(&rng);
        let bob = TestUser::new(&rng);
        let mut mallory = TestUser::new(&rng);

        let (_, packet) = Conversation::start_send(
            &rng,
            b"for bob",
            &alice.master_keys,
            &bob.master_keys.public_signing_key(),
            &bob.prekey_list(),
        )
        .unwrap();

        // Mallory's store doesn't hold the chosen pre-key.
        assert!(matches!(
            Conversation::start_receive(&rng, &packet, &mallory.master_keys, &mut mallory.prekeys),
            Err(ConversationError::PrekeyStore(_))
        ));
    }
}
