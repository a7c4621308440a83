//! Frame payload encryption for authenticated-mode binary protocols.
//!
//! AES-CFB with PKCS#7 padding and a random 16-byte IV prepended to every
//! ciphertext. A textual secret is SHA-256-hashed into a 256-bit key;
//! binary keys of 16, 24 or 32 bytes select the AES variant directly.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{AsyncStreamCipher, KeyIvInit};
use aes::{Aes128, Aes192, Aes256};
use cfb_mode::{Decryptor, Encryptor};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

const BLOCK: usize = 16;
const IV_LEN: usize = 16;

/// A per-connection symmetric cipher.
///
/// Holds only the key schedule source; the IV is drawn fresh for every
/// frame, so clones are safe to hand to concurrent connections.
#[derive(Clone, PartialEq, Eq)]
pub enum FrameCipher {
    /// AES-128-CFB.
    Aes128([u8; 16]),
    /// AES-192-CFB.
    Aes192([u8; 24]),
    /// AES-256-CFB.
    Aes256([u8; 32]),
}

impl std::fmt::Debug for FrameCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material.
        match self {
            FrameCipher::Aes128(_) => write!(f, "FrameCipher::Aes128(..)"),
            FrameCipher::Aes192(_) => write!(f, "FrameCipher::Aes192(..)"),
            FrameCipher::Aes256(_) => write!(f, "FrameCipher::Aes256(..)"),
        }
    }
}

impl FrameCipher {
    /// Build a cipher from a binary key of 16, 24 or 32 bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cipher`] for any other key length.
    pub fn from_key(key: &[u8]) -> Result<Self> {
        match key.len() {
            16 => {
                let mut k = [0u8; 16];
                k.copy_from_slice(key);
                Ok(FrameCipher::Aes128(k))
            }
            24 => {
                let mut k = [0u8; 24];
                k.copy_from_slice(key);
                Ok(FrameCipher::Aes192(k))
            }
            32 => {
                let mut k = [0u8; 32];
                k.copy_from_slice(key);
                Ok(FrameCipher::Aes256(k))
            }
            other => Err(Error::Cipher(format!(
                "Key must be 16, 24 or 32 bytes, got {}",
                other
            ))),
        }
    }

    /// Derive a 256-bit cipher from a textual secret.
    #[must_use]
    pub fn from_text(secret: &str) -> Self {
        let digest = Sha256::digest(secret.as_bytes());
        let mut key = [0u8; 32];
        key.copy_from_slice(&digest);
        FrameCipher::Aes256(key)
    }

    /// Encrypt `plain`: PKCS#7 pad, then CFB under a fresh random IV which
    /// is prepended to the result.
    #[must_use]
    pub fn encrypt(&self, mut plain: Vec<u8>) -> Vec<u8> {
        pad(&mut plain);
        let iv: [u8; IV_LEN] = rand::random();
        let iv_ga = GenericArray::from_slice(&iv);

        match self {
            FrameCipher::Aes128(key) => {
                Encryptor::<Aes128>::new(GenericArray::from_slice(key), iv_ga)
                    .encrypt(&mut plain);
            }
            FrameCipher::Aes192(key) => {
                Encryptor::<Aes192>::new(GenericArray::from_slice(key), iv_ga)
                    .encrypt(&mut plain);
            }
            FrameCipher::Aes256(key) => {
                Encryptor::<Aes256>::new(GenericArray::from_slice(key), iv_ga)
                    .encrypt(&mut plain);
            }
        }

        let mut out = Vec::with_capacity(IV_LEN + plain.len());
        out.extend_from_slice(&iv);
        out.append(&mut plain);
        out
    }

    /// Decrypt an `IV || ciphertext` buffer and strip the padding.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cipher`] on a truncated buffer, a ciphertext that is
    /// not block-aligned, or invalid PKCS#7 padding.
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < IV_LEN + BLOCK {
            return Err(Error::Cipher(format!(
                "Ciphertext too short: {} bytes",
                data.len()
            )));
        }
        let (iv, ciphertext) = data.split_at(IV_LEN);
        if ciphertext.len() % BLOCK != 0 {
            return Err(Error::Cipher(format!(
                "Ciphertext not block-aligned: {} bytes",
                ciphertext.len()
            )));
        }

        let mut plain = ciphertext.to_vec();
        let iv_ga = GenericArray::from_slice(iv);

        match self {
            FrameCipher::Aes128(key) => {
                Decryptor::<Aes128>::new(GenericArray::from_slice(key), iv_ga)
                    .decrypt(&mut plain);
            }
            FrameCipher::Aes192(key) => {
                Decryptor::<Aes192>::new(GenericArray::from_slice(key), iv_ga)
                    .decrypt(&mut plain);
            }
            FrameCipher::Aes256(key) => {
                Decryptor::<Aes256>::new(GenericArray::from_slice(key), iv_ga)
                    .decrypt(&mut plain);
            }
        }

        unpad(&mut plain)?;
        Ok(plain)
    }
}

/// Append PKCS#7 padding: 1 to 16 bytes, each holding the pad length.
fn pad(buf: &mut Vec<u8>) {
    let pad_len = BLOCK - buf.len() % BLOCK;
    buf.resize(buf.len() + pad_len, pad_len as u8);
}

/// Validate and strip PKCS#7 padding.
fn unpad(buf: &mut Vec<u8>) -> Result<()> {
    let pad_len = *buf
        .last()
        .ok_or_else(|| Error::Cipher("Empty plaintext".into()))? as usize;
    if pad_len == 0 || pad_len > BLOCK || pad_len > buf.len() {
        return Err(Error::Cipher("Invalid padding".into()));
    }
    let body = buf.len() - pad_len;
    if buf[body..].iter().any(|&b| b as usize != pad_len) {
        return Err(Error::Cipher("Invalid padding".into()));
    }
    buf.truncate(body);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pad_unpad_roundtrip() {
        for len in 0..64 {
            let original: Vec<u8> = (0..len).map(|i| i as u8).collect();
            let mut buf = original.clone();
            pad(&mut buf);
            assert_eq!(buf.len() % BLOCK, 0);
            assert!(buf.len() > original.len());
            unpad(&mut buf).unwrap();
            assert_eq!(buf, original);
        }
    }

    #[test]
    fn test_unpad_rejects_bad_padding() {
        let mut buf = vec![1u8, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 0];
        assert!(unpad(&mut buf).is_err());

        let mut buf = vec![5u8; 16];
        buf[15] = 17; // longer than a block
        assert!(unpad(&mut buf).is_err());

        let mut buf = vec![2u8, 3]; // mismatched fill bytes
        assert!(unpad(&mut buf).is_err());
    }

    #[test]
    fn test_from_key_lengths() {
        assert!(matches!(
            FrameCipher::from_key(&[0u8; 16]),
            Ok(FrameCipher::Aes128(_))
        ));
        assert!(matches!(
            FrameCipher::from_key(&[0u8; 24]),
            Ok(FrameCipher::Aes192(_))
        ));
        assert!(matches!(
            FrameCipher::from_key(&[0u8; 32]),
            Ok(FrameCipher::Aes256(_))
        ));
        assert!(FrameCipher::from_key(&[0u8; 20]).is_err());
    }

    #[test]
    fn test_from_text_is_aes256_and_deterministic() {
        let a = FrameCipher::from_text("secret");
        let b = FrameCipher::from_text("secret");
        assert!(matches!(a, FrameCipher::Aes256(_)));
        assert_eq!(a, b);
        assert_ne!(a, FrameCipher::from_text("other"));
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip_all_variants() {
        let payload = b"the payload under test, somewhat longer than a block".to_vec();
        for cipher in [
            FrameCipher::from_key(&[7u8; 16]).unwrap(),
            FrameCipher::from_key(&[7u8; 24]).unwrap(),
            FrameCipher::from_key(&[7u8; 32]).unwrap(),
        ] {
            let encrypted = cipher.encrypt(payload.clone());
            assert_ne!(&encrypted[IV_LEN..], &payload[..]);
            assert_eq!(cipher.decrypt(&encrypted).unwrap(), payload);
        }
    }

    #[test]
    fn test_empty_payload_roundtrip() {
        let cipher = FrameCipher::from_text("k");
        let encrypted = cipher.encrypt(Vec::new());
        assert_eq!(encrypted.len(), IV_LEN + BLOCK); // full pad block
        assert_eq!(cipher.decrypt(&encrypted).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_ivs_differ_between_frames() {
        let cipher = FrameCipher::from_text("k");
        let a = cipher.encrypt(b"same".to_vec());
        let b = cipher.encrypt(b"same".to_vec());
        assert_ne!(a[..IV_LEN], b[..IV_LEN]);
        assert_ne!(a[IV_LEN..], b[IV_LEN..]);
    }

    #[test]
    fn test_wrong_key_fails_or_garbles() {
        let cipher = FrameCipher::from_text("right");
        let other = FrameCipher::from_text("wrong");
        let encrypted = cipher.encrypt(b"payload bytes".to_vec());
        match other.decrypt(&encrypted) {
            // Usually the padding check catches it.
            Err(Error::Cipher(_)) => {}
            // One-in-256ish the garbled pad byte validates; the payload
            // still must not survive.
            Ok(garbled) => assert_ne!(garbled, b"payload bytes"),
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    #[test]
    fn test_decrypt_rejects_short_input() {
        let cipher = FrameCipher::from_text("k");
        assert!(cipher.decrypt(&[0u8; 8]).is_err());
    }

    #[test]
    fn test_decrypt_rejects_unaligned_input() {
        let cipher = FrameCipher::from_text("k");
        assert!(cipher.decrypt(&[0u8; IV_LEN + 17]).is_err());
    }

    #[test]
    fn test_debug_redacts_key() {
        let cipher = FrameCipher::from_key(&[0xAA; 32]).unwrap();
        let printed = format!("{:?}", cipher);
        assert!(!printed.contains("170")); // 0xAA
        assert!(printed.contains("Aes256"));
    }
}
