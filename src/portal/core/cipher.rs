//! Password cipher replicating the portal's `login.js`.
//!
//! The login form carries an `encrypt_pwd` field next to the plaintext
//! password. The server recomputes it from the `login_key` it issued with the
//! page and rejects the login silently when the two disagree, so every byte
//! here has to match the browser-side routine:
//!
//! 1. hex MD5 of the password,
//! 2. DES key = first 4 hex chars + first 4 chars of `login_key`,
//! 3. DES-ECB over the padded password,
//! 4. standard base64 of the ciphertext.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use des::Des;
use des::cipher::{BlockEncrypt, KeyInit, generic_array::GenericArray};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const BLOCK_SIZE: usize = 8;
const KEY_LEN: usize = 8;
const KEY_PART_LEN: usize = 4;

/// Byte used to fill the DES key when `login_key` is shorter than four characters.
pub const KEY_FILLER: u8 = b'0';

/// Plaintext padding applied before the DES pass.
///
/// Both variants have been served by the portal over time. A mismatch is
/// indistinguishable from a wrong password on the server side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaddingPolicy {
    /// NUL bytes up to the next block boundary; aligned input is left untouched.
    #[default]
    Zero,
    /// PKCS#7: always appends 1..=8 bytes holding the pad length.
    Pkcs7,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CipherError {
    #[error("derived DES key is {0} bytes, expected 8")]
    InvalidKeyMaterial(usize),
}

/// Compute the `encrypt_pwd` value for `password` under `login_key`.
pub fn encrypt_password(
    password: &str,
    login_key: &str,
    padding: PaddingPolicy,
) -> Result<String, CipherError> {
    let key = derive_key(password, login_key)?;
    let cipher = Des::new_from_slice(&key)
        .map_err(|_| CipherError::InvalidKeyMaterial(key.len()))?;

    let mut buffer = pad_plaintext(password.as_bytes(), padding);
    for block in buffer.chunks_exact_mut(BLOCK_SIZE) {
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }

    Ok(STANDARD.encode(buffer))
}

/// Build the 8-byte DES key from the password digest and the server nonce.
///
/// The `login_key` prefix is taken as four characters, not four bytes, so a
/// multi-byte prefix is cut back to eight key bytes.
pub fn derive_key(password: &str, login_key: &str) -> Result<[u8; KEY_LEN], CipherError> {
    let digest = format!("{:x}", Md5::digest(password.as_bytes()));
    let key_part: String = login_key.chars().take(KEY_PART_LEN).collect();

    let mut material = Vec::with_capacity(KEY_LEN + key_part.len());
    material.extend_from_slice(&digest.as_bytes()[..KEY_PART_LEN]);
    material.extend_from_slice(key_part.as_bytes());
    material.resize(KEY_LEN.max(material.len()), KEY_FILLER);
    material.truncate(KEY_LEN);

    <[u8; KEY_LEN]>::try_from(material.as_slice())
        .map_err(|_| CipherError::InvalidKeyMaterial(material.len()))
}

/// Pad `plaintext` to a multiple of the DES block size.
pub fn pad_plaintext(plaintext: &[u8], padding: PaddingPolicy) -> Vec<u8> {
    let mut buffer = plaintext.to_vec();
    match padding {
        PaddingPolicy::Zero => {
            let target = plaintext.len().div_ceil(BLOCK_SIZE) * BLOCK_SIZE;
            buffer.resize(target, 0);
        }
        PaddingPolicy::Pkcs7 => {
            let pad = BLOCK_SIZE - plaintext.len() % BLOCK_SIZE;
            buffer.extend(std::iter::repeat_n(pad as u8, pad));
        }
    }
    buffer
}
