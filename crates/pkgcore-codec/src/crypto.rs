//! AES-CTR encrypt/decrypt with an externally-supplied key and nonce (spec
//! §4.1). CTR mode is its own inverse, so `encrypt` and `decrypt` are the
//! same keystream XOR; they are kept as distinct functions so call sites
//! read intent rather than mechanism.

use crate::error::{CodecError, CodecResult};
use aes::Aes256;
use ctr::Ctr128BE;
use ctr::cipher::{KeyIvInit, StreamCipher};

type Aes256Ctr = Ctr128BE<Aes256>;

const KEY_LEN: usize = 32;
const BLOCK_LEN: usize = 16;

/// Expand a 12-16 byte nonce to the 16-byte IV AES-CTR needs by zero-padding
/// on the right, following the convention of treating a short nonce as the
/// counter's high-order bytes (the low bytes default to zero, i.e. the
/// stream starts at block 0).
fn expand_nonce(nonce: &[u8]) -> CodecResult<[u8; BLOCK_LEN]> {
    if !(12..=16).contains(&nonce.len()) {
        return Err(CodecError::InvalidNonceSize(nonce.len()));
    }
    let mut iv = [0u8; BLOCK_LEN];
    iv[..nonce.len()].copy_from_slice(nonce);
    Ok(iv)
}

fn build_cipher(key: &[u8], nonce: &[u8]) -> CodecResult<Aes256Ctr> {
    if key.len() != KEY_LEN {
        return Err(CodecError::InvalidKeySize(key.len()));
    }
    let iv = expand_nonce(nonce)?;
    Ok(Aes256Ctr::new(key.into(), (&iv).into()))
}

/// Encrypt `data` in place with AES-256-CTR.
pub fn aes_ctr_encrypt(key: &[u8; 32], nonce: &[u8], data: &mut [u8]) -> CodecResult<()> {
    let mut cipher = build_cipher(key, nonce)?;
    cipher.apply_keystream(data);
    Ok(())
}

/// Decrypt `data` in place with AES-256-CTR (identical operation to
/// encryption; kept separate for call-site clarity).
pub fn aes_ctr_decrypt(key: &[u8; 32], nonce: &[u8], data: &mut [u8]) -> CodecResult<()> {
    let mut cipher = build_cipher(key, nonce)?;
    cipher.apply_keystream(data);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_then_decrypt_round_trips() {
        let key = [7u8; 32];
        let nonce = [1u8; 12];
        let plaintext = b"the pending delta and the checkpoint".to_vec();

        let mut buf = plaintext.clone();
        aes_ctr_encrypt(&key, &nonce, &mut buf).unwrap();
        assert_ne!(buf, plaintext);

        aes_ctr_decrypt(&key, &nonce, &mut buf).unwrap();
        assert_eq!(buf, plaintext);
    }

    #[test]
    fn wrong_key_size_rejected() {
        let key_bytes = vec![0u8; 16];
        let err = build_cipher(&key_bytes, &[0u8; 12]).unwrap_err();
        assert!(matches!(err, CodecError::InvalidKeySize(16)));
    }

    #[test]
    fn nonce_outside_12_16_bytes_rejected() {
        let key = [0u8; 32];
        assert!(build_cipher(&key, &[0u8; 8]).is_err());
        assert!(build_cipher(&key, &[0u8; 20]).is_err());
        assert!(build_cipher(&key, &[0u8; 16]).is_ok());
    }
}
