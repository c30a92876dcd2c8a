//! Encryption of stored message content
//!
//! Uses AES-256 in CBC mode with PKCS#7 padding.
//! Key size: 32 bytes.  IV: 16 bytes.
//!
//! A single key and IV are configured at startup and shared by every stored
//! message. Reusing the IV means identical plaintexts (and identical
//! plaintext prefixes) produce identical ciphertext blocks. This only
//! protects content at rest inside the process; the session itself is
//! plain text.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use thiserror::Error;
use zeroize::Zeroizing;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

pub const KEY_LEN: usize = 32;
pub const IV_LEN: usize = 16;
pub const BLOCK_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("message is {len} bytes, the limit is {max}")]
    PlaintextTooLong { len: usize, max: usize },

    #[error("stored message could not be decrypted")]
    Decryption,

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid IV: {0}")]
    InvalidIv(String),
}

/// Symmetric transform applied to every stored message.
pub struct MessageCipher {
    key: Zeroizing<[u8; KEY_LEN]>,
    iv: [u8; IV_LEN],
    max_plaintext_len: usize,
}

impl MessageCipher {
    pub fn new(key: [u8; KEY_LEN], iv: [u8; IV_LEN], max_plaintext_len: usize) -> Self {
        Self {
            key: Zeroizing::new(key),
            iv,
            max_plaintext_len,
        }
    }

    /// Build a cipher from hex-encoded key and IV, as given on the command line.
    pub fn from_hex(key_hex: &str, iv_hex: &str, max_plaintext_len: usize) -> Result<Self, CryptoError> {
        let key_bytes = Zeroizing::new(
            hex::decode(key_hex.trim()).map_err(|e| CryptoError::InvalidKey(e.to_string()))?,
        );
        let key: [u8; KEY_LEN] = key_bytes.as_slice().try_into().map_err(|_| {
            CryptoError::InvalidKey(format!(
                "expected {} bytes ({} hex chars), got {} bytes",
                KEY_LEN,
                KEY_LEN * 2,
                key_bytes.len()
            ))
        })?;

        let iv_bytes = hex::decode(iv_hex.trim()).map_err(|e| CryptoError::InvalidIv(e.to_string()))?;
        let iv: [u8; IV_LEN] = iv_bytes.as_slice().try_into().map_err(|_| {
            CryptoError::InvalidIv(format!(
                "expected {} bytes ({} hex chars), got {} bytes",
                IV_LEN,
                IV_LEN * 2,
                iv_bytes.len()
            ))
        })?;

        Ok(Self::new(key, iv, max_plaintext_len))
    }

    /// Largest ciphertext this cipher can produce.
    pub fn max_ciphertext_len(&self) -> usize {
        (self.max_plaintext_len / BLOCK_LEN)
            .saturating_add(1)
            .saturating_mul(BLOCK_LEN)
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if plaintext.len() > self.max_plaintext_len {
            return Err(CryptoError::PlaintextTooLong {
                len: plaintext.len(),
                max: self.max_plaintext_len,
            });
        }

        let ciphertext = Aes256CbcEnc::new_from_slices(&self.key[..], &self.iv)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

        Ok(ciphertext)
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        if ciphertext.is_empty() || ciphertext.len() % BLOCK_LEN != 0 {
            return Err(CryptoError::Decryption);
        }
        if ciphertext.len() > self.max_ciphertext_len() {
            return Err(CryptoError::Decryption);
        }

        let plaintext = Aes256CbcDec::new_from_slices(&self.key[..], &self.iv)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| CryptoError::Decryption)?;

        Ok(Zeroizing::new(plaintext))
    }
}

impl std::fmt::Debug for MessageCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageCipher")
            .field("max_plaintext_len", &self.max_plaintext_len)
            .finish_non_exhaustive()
    }
}

/// Generate a random key and IV, hex encoded.
pub fn generate_key_material() -> (String, String) {
    use rand::RngCore;

    let mut rng = rand::thread_rng();
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    let mut iv = [0u8; IV_LEN];
    rng.fill_bytes(&mut key[..]);
    rng.fill_bytes(&mut iv);

    (hex::encode(&key[..]), hex::encode(iv))
}
