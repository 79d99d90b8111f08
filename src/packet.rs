// SPDX-License-Identifier: MIT OR Apache-2.0

//! Packet framing: plaintext metadata, the encrypted Axolotl header and the encrypted
//! message payload.
//!
//! ```plain
//! packet = {
//!   protocol_version_current (4, big endian),
//!   protocol_version_highest_supported (4, big endian),
//!   packet_type (1),
//!   // pre-key packets only:
//!   sender_public_identity (32),
//!   sender_public_ephemeral (32),
//!   receiver_public_prekey (32),
//!   // all packets:
//!   header_nonce (24),
//!   header_ciphertext (80),
//!   message_nonce (24),
//!   message_ciphertext (rest)
//! }
//! ```
//!
//! Everything up to and including the pre-key public keys is bound into the header AEAD as
//! additional data, so no metadata byte can be flipped without breaking header decryption.
//! The message nonce is carried both in the clear (so a message can be decrypted from a
//! stored key alone) and inside the encrypted header; both copies have to match.
use thiserror::Error;

use crate::crypto::x25519::{PublicKey, PUBLIC_KEY_SIZE};
use crate::crypto::xchacha20::{x_aead_decrypt, x_aead_encrypt, XAeadError, TAG_SIZE};
use crate::crypto::{Rng, RngError};
use crate::header::{Header, HeaderError, HEADER_SIZE};
use crate::keys::{HeaderKey, MessageKey};

/// Protocol version this implementation speaks.
pub const PROTOCOL_VERSION: u32 = 0;

const PACKET_TYPE_NORMAL: u8 = 0;
const PACKET_TYPE_PREKEY: u8 = 1;

const NONCE_SIZE: usize = 24;
const HEADER_CIPHERTEXT_SIZE: usize = HEADER_SIZE + TAG_SIZE;

/// Metadata prefix of a normal packet: two protocol versions and the type byte.
const NORMAL_METADATA_SIZE: usize = 4 + 4 + 1;

/// Pre-key packets additionally carry three public keys in the clear.
const PREKEY_METADATA_SIZE: usize = NORMAL_METADATA_SIZE + 3 * PUBLIC_KEY_SIZE;

/// Type of a packet.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PacketType {
    /// Regular message within an established conversation.
    Normal,
    /// First message of a conversation, carrying the public keys the receiver needs to run
    /// the initial key agreement.
    Prekey,
}

/// The three public keys a pre-key packet carries in the clear.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PrekeyMetadata {
    pub sender_public_identity: PublicKey,
    pub sender_public_ephemeral: PublicKey,
    pub receiver_public_prekey: PublicKey,
}

/// Unauthenticated packet metadata.
///
/// Nothing in here is verified until the header decrypts; treat it as a routing hint only.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PacketMetadata {
    pub current_protocol_version: u32,
    pub highest_supported_protocol_version: u32,
    pub packet_type: PacketType,
    pub prekey_metadata: Option<PrekeyMetadata>,
}

/// Borrowed views into the regions of a packet.
struct Parts<'a> {
    metadata: PacketMetadata,
    /// The raw metadata prefix, used as AEAD additional data for the header.
    metadata_bytes: &'a [u8],
    header_nonce: [u8; NONCE_SIZE],
    header_ciphertext: &'a [u8],
    message_nonce: [u8; NONCE_SIZE],
    message_ciphertext: &'a [u8],
}

fn parse(packet: &[u8]) -> Result<Parts<'_>, PacketError> {
    if packet.len() < NORMAL_METADATA_SIZE {
        return Err(PacketError::Truncated);
    }

    let current_protocol_version =
        u32::from_be_bytes(packet[0..4].try_into().expect("4 byte slice"));
    let highest_supported_protocol_version =
        u32::from_be_bytes(packet[4..8].try_into().expect("4 byte slice"));

    if current_protocol_version > PROTOCOL_VERSION {
        return Err(PacketError::UnsupportedProtocolVersion(
            current_protocol_version,
        ));
    }

    let (packet_type, metadata_size) = match packet[8] {
        PACKET_TYPE_NORMAL => (PacketType::Normal, NORMAL_METADATA_SIZE),
        PACKET_TYPE_PREKEY => (PacketType::Prekey, PREKEY_METADATA_SIZE),
        invalid => return Err(PacketError::InvalidPacketType(invalid)),
    };

    if packet.len() < metadata_size + 2 * NONCE_SIZE + HEADER_CIPHERTEXT_SIZE + TAG_SIZE {
        return Err(PacketError::Truncated);
    }

    let prekey_metadata = match packet_type {
        PacketType::Normal => None,
        PacketType::Prekey => {
            let keys = &packet[NORMAL_METADATA_SIZE..];
            Some(PrekeyMetadata {
                sender_public_identity: PublicKey::from_bytes(
                    keys[..32].try_into().expect("32 byte slice"),
                ),
                sender_public_ephemeral: PublicKey::from_bytes(
                    keys[32..64].try_into().expect("32 byte slice"),
                ),
                receiver_public_prekey: PublicKey::from_bytes(
                    keys[64..96].try_into().expect("32 byte slice"),
                ),
            })
        }
    };

    let mut offset = metadata_size;
    let mut header_nonce = [0u8; NONCE_SIZE];
    header_nonce.copy_from_slice(&packet[offset..offset + NONCE_SIZE]);
    offset += NONCE_SIZE;

    let header_ciphertext = &packet[offset..offset + HEADER_CIPHERTEXT_SIZE];
    offset += HEADER_CIPHERTEXT_SIZE;

    let mut message_nonce = [0u8; NONCE_SIZE];
    message_nonce.copy_from_slice(&packet[offset..offset + NONCE_SIZE]);
    offset += NONCE_SIZE;

    Ok(Parts {
        metadata: PacketMetadata {
            current_protocol_version,
            highest_supported_protocol_version,
            packet_type,
            prekey_metadata,
        },
        metadata_bytes: &packet[..metadata_size],
        header_nonce,
        header_ciphertext,
        message_nonce,
        message_ciphertext: &packet[offset..],
    })
}

/// Constructs and encrypts a packet from keys, ratchet metadata and the message.
///
/// Passing pre-key metadata turns this into a pre-key packet.
pub fn encrypt(
    rng: &Rng,
    our_public_ephemeral: &PublicKey,
    message_number: u32,
    previous_message_number: u32,
    header_key: &HeaderKey,
    message: &[u8],
    message_key: &MessageKey,
    prekey_metadata: Option<&PrekeyMetadata>,
) -> Result<Vec<u8>, PacketError> {
    let message_nonce: [u8; NONCE_SIZE] = rng.random_array()?;
    let message_ciphertext = x_aead_encrypt(message_key.as_bytes(), message, message_nonce, None)
        .map_err(PacketError::Encrypt)?;

    let header = Header {
        our_public_ephemeral: *our_public_ephemeral,
        message_number,
        previous_message_number,
        message_nonce,
    };

    let metadata_size = match prekey_metadata {
        None => NORMAL_METADATA_SIZE,
        Some(_) => PREKEY_METADATA_SIZE,
    };

    let mut packet = Vec::with_capacity(
        metadata_size
            + 2 * NONCE_SIZE
            + HEADER_CIPHERTEXT_SIZE
            + message_ciphertext.len(),
    );
    packet.extend_from_slice(&PROTOCOL_VERSION.to_be_bytes());
    packet.extend_from_slice(&PROTOCOL_VERSION.to_be_bytes());
    match prekey_metadata {
        None => packet.push(PACKET_TYPE_NORMAL),
        Some(prekey_metadata) => {
            packet.push(PACKET_TYPE_PREKEY);
            packet.extend_from_slice(prekey_metadata.sender_public_identity.as_bytes());
            packet.extend_from_slice(prekey_metadata.sender_public_ephemeral.as_bytes());
            packet.extend_from_slice(prekey_metadata.receiver_public_prekey.as_bytes());
        }
    }

    let header_nonce: [u8; NONCE_SIZE] = rng.random_array()?;
    let header_ciphertext = x_aead_encrypt(
        header_key.as_bytes(),
        &header.to_bytes(),
        header_nonce,
        Some(&packet[..metadata_size]),
    )
    .map_err(PacketError::Encrypt)?;

    packet.extend_from_slice(&header_nonce);
    packet.extend_from_slice(&header_ciphertext);
    packet.extend_from_slice(&message_nonce);
    packet.extend_from_slice(&message_ciphertext);

    Ok(packet)
}

/// Extracts the metadata from a packet without decrypting or verifying anything.
pub fn get_metadata_without_verification(packet: &[u8]) -> Result<PacketMetadata, PacketError> {
    Ok(parse(packet)?.metadata)
}

/// Decrypts the Axolotl header of a packet, thereby authenticating the plaintext metadata.
pub fn decrypt_header(packet: &[u8], header_key: &HeaderKey) -> Result<Header, PacketError> {
    let parts = parse(packet)?;

    let header_bytes = x_aead_decrypt(
        header_key.as_bytes(),
        parts.header_ciphertext,
        parts.header_nonce,
        Some(parts.metadata_bytes),
    )
    .map_err(PacketError::DecryptHeader)?;

    let header = Header::from_bytes(&header_bytes)?;

    // The clear copy of the message nonce has to match the authenticated one.
    if header.message_nonce != parts.message_nonce {
        return Err(PacketError::NonceMismatch);
    }

    Ok(header)
}

/// Decrypts the message payload of a packet.
pub fn decrypt_message(packet: &[u8], message_key: &MessageKey) -> Result<Vec<u8>, PacketError> {
    let parts = parse(packet)?;

    x_aead_decrypt(
        message_key.as_bytes(),
        parts.message_ciphertext,
        parts.message_nonce,
        None,
    )
    .map_err(PacketError::DecryptMessage)
}

/// Decrypts header and message of a packet in one go. Both have to decrypt.
pub fn decrypt(
    packet: &[u8],
    header_key: &HeaderKey,
    message_key: &MessageKey,
) -> Result<(Header, Vec<u8>), PacketError> {
    let header = decrypt_header(packet, header_key)?;
    let message = decrypt_message(packet, message_key)?;
    Ok((header, message))
}

#[derive(Debug, Error)]
pub enum PacketError {
    #[error(transparent)]
    Rng(#[from] RngError),

    #[error(transparent)]
    Header(#[from] HeaderError),

    #[error("packet is too short")]
    Truncated,

    #[error("packet uses unsupported protocol version {0}")]
    UnsupportedProtocolVersion(u32),

    #[error("invalid packet type {0}")]
    InvalidPacketType(u8),

    #[error("message nonce in header does not match the packet")]
    NonceMismatch,

    #[error("could not encrypt packet")]
    Encrypt(#[source] XAeadError),

    #[error("could not decrypt packet header")]
    DecryptHeader(#[source] XAeadError),

    #[error("could not decrypt packet message")]
    DecryptMessage(#[source] XAeadError),
}

#[cfg(test)]
mod tests {
    use crate::crypto::x25519::PublicKey;
    use crate::crypto::Rng;
    use crate::keys::{HeaderKey, MessageKey};

    use super::{
        decrypt, decrypt_header, decrypt_message, encrypt, get_metadata_without_verification,
        PacketError, PacketType, PrekeyMetadata,
    };

    fn test_keys(rng: &Rng) -> (HeaderKey, MessageKey) {
        (
            HeaderKey::from_bytes(rng.random_array().unwrap()),
            MessageKey::from_bytes(rng.random_array().unwrap()),
        )
    }

    fn test_packet(rng: &Rng, prekey_metadata: Option<&PrekeyMetadata>) -> Vec<u8> {
        let (header_key, message_key) = test_keys(rng);
        encrypt(
            rng,
            &PublicKey::from_bytes([0x42; 32]),
            3,
            1,
            &header_key,
            b"Hi Bob. Alice here!",
            &message_key,
            prekey_metadata,
        )
        .unwrap()
    }

    #[test]
    fn normal_packet_roundtrip() {
        let rng = Rng::from_seed([1; 32]);
        let (header_key, message_key) = test_keys(&rng);

        let packet = encrypt(
            &rng,
            &PublicKey::from_bytes([0x42; 32]),
            3,
            1,
            &header_key,
            b"Hi Bob. Alice here!",
            &message_key,
            None,
        )
        .unwrap();

        let metadata = get_metadata_without_verification(&packet).unwrap();
        assert_eq!(metadata.packet_type, PacketType::Normal);
        assert_eq!(metadata.current_protocol_version, 0);
        assert_eq!(metadata.highest_supported_protocol_version, 0);
        assert!(metadata.prekey_metadata.is_none());

        let (header, message) = decrypt(&packet, &header_key, &message_key).unwrap();
        assert_eq!(header.our_public_ephemeral, PublicKey::from_bytes([0x42; 32]));
        assert_eq!(header.message_number, 3);
        assert_eq!(header.previous_message_number, 1);
        assert_eq!(message, b"Hi Bob. Alice here!");
    }

    #[test]
    fn prekey_packet_roundtrip() {
        let rng = Rng::from_seed([2; 32]);
        let prekey_metadata = PrekeyMetadata {
            sender_public_identity: PublicKey::from_bytes([1; 32]),
            sender_public_ephemeral: PublicKey::from_bytes([2; 32]),
            receiver_public_prekey: PublicKey::from_bytes([3; 32]),
        };

        let packet = test_packet(&rng, Some(&prekey_metadata));

        let metadata = get_metadata_without_verification(&packet).unwrap();
        assert_eq!(metadata.packet_type, PacketType::Prekey);
        assert_eq!(metadata.prekey_metadata, Some(prekey_metadata));
    }

    #[test]
    fn wrong_keys_fail() {
        let rng = Rng::from_seed([3; 32]);
        let (header_key, message_key) = test_keys(&rng);

        let packet = encrypt(
            &rng,
            &PublicKey::from_bytes([0x42; 32]),
            0,
            0,
            &header_key,
            b"payload",
            &message_key,
            None,
        )
        .unwrap();

        let (wrong_header_key, wrong_message_key) = test_keys(&rng);
        assert!(matches!(
            decrypt_header(&packet, &wrong_header_key),
            Err(PacketError::DecryptHeader(_))
        ));
        assert!(matches!(
            decrypt_message(&packet, &wrong_message_key),
            Err(PacketError::DecryptMessage(_))
        ));
    }

    #[test]
    fn tampered_metadata_breaks_header_decryption() {
        let rng = Rng::from_seed([4; 32]);
        let (header_key, message_key) = test_keys(&rng);

        let mut packet = encrypt(
            &rng,
            &PublicKey::from_bytes([0x42; 32]),
            0,
            0,
            &header_key,
            b"payload",
            &message_key,
            Some(&PrekeyMetadata {
                sender_public_identity: PublicKey::from_bytes([1; 32]),
                sender_public_ephemeral: PublicKey::from_bytes([2; 32]),
                receiver_public_prekey: PublicKey::from_bytes([3; 32]),
            }),
        )
        .unwrap();

        // Flip one byte inside the pre-key public keys.
        packet[20] ^= 0xff;

        assert!(matches!(
            decrypt_header(&packet, &header_key),
            Err(PacketError::DecryptHeader(_))
        ));
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let rng = Rng::from_seed([5; 32]);
        let (header_key, message_key) = test_keys(&rng);

        let packet = encrypt(
            &rng,
            &PublicKey::from_bytes([0x42; 32]),
            0,
            0,
            &header_key,
            b"payload",
            &message_key,
            None,
        )
        .unwrap();

        // Flip the last byte of the message ciphertext.
        let mut tampered = packet.clone();
        *tampered.last_mut().unwrap() ^= 0x01;
        assert!(decrypt_message(&tampered, &message_key).is_err());

        // Header still decrypts, the payload is what's broken.
        assert!(decrypt_header(&tampered, &header_key).is_ok());
    }

    #[test]
    fn malformed_packets_are_rejected() {
        let rng = Rng::from_seed([6; 32]);

        // Too short.
        assert!(matches!(
            get_metadata_without_verification(&[0u8; 4]),
            Err(PacketError::Truncated)
        ));

        let packet = test_packet(&rng, None);

        // Unknown packet type.
        let mut bad_type = packet.clone();
        bad_type[8] = 99;
        assert!(matches!(
            get_metadata_without_verification(&bad_type),
            Err(PacketError::InvalidPacketType(99))
        ));

        // Future protocol version.
        let mut bad_version = packet.clone();
        bad_version[3] = 1;
        assert!(matches!(
            get_metadata_without_verification(&bad_version),
            Err(PacketError::UnsupportedProtocolVersion(1))
        ));
    }
}
