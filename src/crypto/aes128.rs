//! Full-segment AES-128-CBC encryption — spec §4.5.1.
//!
//! Grounded in the pack's HLS downloader, which decrypts with
//! `cbc::Decryptor<Aes128>` + `Pkcs7`; packaging runs the same primitives
//! in the encrypt direction.

use aes::Aes128;
use cbc::{Decryptor, Encryptor};
use cipher::block_padding::Pkcs7;
use cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};

use crate::error::{PackagerError, Result};

/// Encrypt `plaintext` with AES-128-CBC and PKCS#7 padding.
pub fn encrypt(plaintext: &[u8], key: &[u8; 16], iv: &[u8; 16]) -> Vec<u8> {
    let cipher = Encryptor::<Aes128>::new(key.into(), iv.into());
    cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext)
}

/// Decrypt `ciphertext` produced by [`encrypt`], stripping PKCS#7 padding.
pub fn decrypt(ciphertext: &[u8], key: &[u8; 16], iv: &[u8; 16]) -> Result<Vec<u8>> {
    let cipher = Decryptor::<Aes128>::new(key.into(), iv.into());
    let mut buf = ciphertext.to_vec();
    let plain = cipher
        .decrypt_padded_mut::<Pkcs7>(&mut buf)
        .map_err(|_| PackagerError::InvalidConfig("AES-128 padding invalid".into()))?;
    Ok(plain.to_vec())
}

/// Derive the implicit IV for a segment that omits `EXT-X-KEY:IV`: the
/// media sequence number as a big-endian 128-bit integer (RFC 8216 §5.2).
pub fn iv_from_media_sequence(media_sequence: u64) -> [u8; 16] {
    let mut iv = [0u8; 16];
    iv[8..16].copy_from_slice(&media_sequence.to_be_bytes());
    iv
}

pub fn key_from_bytes(bytes: &[u8]) -> Result<[u8; 16]> {
    bytes
        .try_into()
        .map_err(|_| PackagerError::InvalidKeySize(bytes.len()))
}

pub fn iv_from_bytes(bytes: &[u8]) -> Result<[u8; 16]> {
    bytes
        .try_into()
        .map_err(|_| PackagerError::InvalidIVSize(bytes.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_encrypt_decrypt() {
        let key = [0x42u8; 16];
        let iv = [0x24u8; 16];
        let plaintext = b"a segment of mpeg-ts bytes, not block-aligned!!".to_vec();
        let ciphertext = encrypt(&plaintext, &key, &iv);
        assert_eq!(ciphertext.len() % 16, 0);
        let recovered = decrypt(&ciphertext, &key, &iv).unwrap();
        assert_eq!(recovered, plaintext);
    }

    #[test]
    fn implicit_iv_is_big_endian_sequence_in_low_bytes() {
        let iv = iv_from_media_sequence(42);
        assert_eq!(&iv[0..8], &[0u8; 8]);
        assert_eq!(&iv[8..16], &42u64.to_be_bytes());
    }

    #[test]
    fn rejects_wrong_key_size() {
        assert!(key_from_bytes(&[0u8; 15]).is_err());
        assert!(key_from_bytes(&[0u8; 16]).is_ok());
    }
}
