// SPDX-License-Identifier: MIT OR Apache-2.0

//! XChaCha20Poly1305 is a ChaCha20 AEAD variant with an extended 192-bit (24-byte) nonce.
//!
//! Used both as the header AEAD (binding packet metadata as additional data) and, without
//! additional data, as the secret-box sealing message payloads and backups.
use chacha20poly1305::aead::{Aead, Payload};
use chacha20poly1305::{KeyInit, XChaCha20Poly1305};
use thiserror::Error;

/// "Extended" 192-bit nonce.
pub type XAeadNonce = [u8; 24];

/// 256-bit key.
pub type XAeadKey = [u8; 32];

/// Poly1305 authentication tag appended to every ciphertext.
pub const TAG_SIZE: usize = 16;

/// XChaCha20-Poly1305 AEAD encryption function.
///
/// Returns the ciphertext with the authentication tag attached at the end.
pub fn x_aead_encrypt(
    key: &XAeadKey,
    plaintext: &[u8],
    nonce: XAeadNonce,
    aad: Option<&[u8]>,
) -> Result<Vec<u8>, XAeadError> {
    let cipher = XChaCha20Poly1305::new(&(*key).into());
    let payload = Payload {
        msg: plaintext,
        aad: aad.unwrap_or_default(),
    };
    cipher
        .encrypt(&nonce.into(), payload)
        .map_err(XAeadError::Encrypt)
}

/// XChaCha20-Poly1305 AEAD decryption function.
///
/// Expects the authentication tag at the end of the ciphertext; decryption fails if either
/// the ciphertext or the additional data was touched.
pub fn x_aead_decrypt(
    key: &XAeadKey,
    ciphertext_with_tag: &[u8],
    nonce: XAeadNonce,
    aad: Option<&[u8]>,
) -> Result<Vec<u8>, XAeadError> {
    let cipher = XChaCha20Poly1305::new(&(*key).into());
    let payload = Payload {
        msg: ciphertext_with_tag,
        aad: aad.unwrap_or_default(),
    };
    cipher
        .decrypt(&nonce.into(), payload)
        .map_err(XAeadError::Decrypt)
}

#[derive(Debug, Error)]
pub enum XAeadError {
    #[error("plaintext could not be encrypted with xchacha20 aead")]
    Encrypt(chacha20poly1305::Error),

    #[error("ciphertext could not be decrypted with xchacha20 aead")]
    Decrypt(chacha20poly1305::Error),
}
