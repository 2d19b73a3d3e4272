//! Mini program encrypted data
//!
//! Sensitive data handed to a mini program (`wx.getUserInfo`,
//! `getPhoneNumber`, ...) is AES-128-CBC encrypted with the user's
//! `session_key` and a per-call IV, all three base64 encoded. The decrypted
//! JSON carries a `watermark.appid` that must match our own AppID: a payload
//! that decrypts cleanly but was issued to another application is rejected.

use aes::cipher::block_padding::NoPadding;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use serde::de::DeserializeOwned;
use tracing::warn;

use super::{AES_BLOCK_SIZE, decode_base64, encode_base64, pkcs7_pad, pkcs7_unpad};
use crate::error::{CryptoError, PayloadError};
use crate::types::{PhoneInfo, UserInfo, Watermarked};

type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;

/// AES-128 key size in bytes
pub const SESSION_KEY_LEN: usize = 16;

/// Decrypt a base64 ciphertext with a base64 key and IV
///
/// All input validation happens before the cipher runs; a wrong key
/// typically surfaces as [`CryptoError::InvalidPadding`].
pub fn decrypt(key_b64: &str, ciphertext_b64: &str, iv_b64: &str) -> Result<Vec<u8>, CryptoError> {
    let key = decode_base64("session_key", key_b64)?;
    let mut buf = decode_base64("encrypted_data", ciphertext_b64)?;
    let iv = decode_base64("iv", iv_b64)?;

    check_key_and_iv(&key, &iv)?;

    if buf.is_empty() || buf.len() % AES_BLOCK_SIZE != 0 {
        return Err(CryptoError::InvalidCiphertextLength(buf.len()));
    }

    let len = buf.len();
    let cipher = Aes128CbcDec::new_from_slices(&key, &iv).map_err(|_| {
        CryptoError::InvalidKeyLength {
            expected: SESSION_KEY_LEN,
            actual: key.len(),
        }
    })?;
    let decrypted = cipher
        .decrypt_padded_mut::<NoPadding>(&mut buf)
        .map_err(|_| CryptoError::InvalidCiphertextLength(len))?;

    Ok(pkcs7_unpad(decrypted, AES_BLOCK_SIZE)?.to_vec())
}

/// PKCS#7 pad, AES-128-CBC encrypt and base64 encode
pub fn encrypt(key_b64: &str, plaintext: &[u8], iv_b64: &str) -> Result<String, CryptoError> {
    let key = decode_base64("session_key", key_b64)?;
    let iv = decode_base64("iv", iv_b64)?;

    check_key_and_iv(&key, &iv)?;

    let mut buf = pkcs7_pad(plaintext, AES_BLOCK_SIZE);
    let len = buf.len();
    let cipher = Aes128CbcEnc::new_from_slices(&key, &iv).map_err(|_| {
        CryptoError::InvalidKeyLength {
            expected: SESSION_KEY_LEN,
            actual: key.len(),
        }
    })?;
    let encrypted = cipher
        .encrypt_padded_mut::<NoPadding>(&mut buf, len)
        .map_err(|_| CryptoError::InvalidCiphertextLength(len))?;

    Ok(encode_base64(encrypted))
}

fn check_key_and_iv(key: &[u8], iv: &[u8]) -> Result<(), CryptoError> {
    if key.len() != SESSION_KEY_LEN {
        return Err(CryptoError::InvalidKeyLength {
            expected: SESSION_KEY_LEN,
            actual: key.len(),
        });
    }
    if iv.len() != AES_BLOCK_SIZE {
        return Err(CryptoError::InvalidIvLength {
            expected: AES_BLOCK_SIZE,
            actual: iv.len(),
        });
    }
    Ok(())
}

/// Encrypted data service bound to one mini program
#[derive(Debug, Clone)]
pub struct DataCrypto {
    app_id: String,
}

impl DataCrypto {
    pub fn new(app_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
        }
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// Decrypt, parse and watermark-check any payload type
    pub fn decrypt_payload<T>(
        &self,
        session_key: &str,
        encrypted_data: &str,
        iv: &str,
    ) -> Result<T, PayloadError>
    where
        T: DeserializeOwned + Watermarked,
    {
        let plaintext = decrypt(session_key, encrypted_data, iv)?;
        let payload: T = serde_json::from_slice(&plaintext)?;

        let watermark = payload.watermark();
        if watermark.appid != self.app_id {
            warn!(
                "Rejecting decrypted payload for appid '{}' (expected '{}')",
                watermark.appid, self.app_id
            );
            return Err(PayloadError::WatermarkMismatch {
                expected: self.app_id.clone(),
                actual: watermark.appid.clone(),
            });
        }

        Ok(payload)
    }

    pub fn decrypt_user_info(
        &self,
        session_key: &str,
        encrypted_data: &str,
        iv: &str,
    ) -> Result<UserInfo, PayloadError> {
        self.decrypt_payload(session_key, encrypted_data, iv)
    }

    pub fn decrypt_phone_info(
        &self,
        session_key: &str,
        encrypted_data: &str,
        iv: &str,
    ) -> Result<PhoneInfo, PayloadError> {
        self.decrypt_payload(session_key, encrypted_data, iv)
    }

    /// Encrypt arbitrary text with a session key
    pub fn encrypt_data(
        &self,
        session_key: &str,
        plaintext: &str,
        iv: &str,
    ) -> Result<String, CryptoError> {
        encrypt(session_key, plaintext.as_bytes(), iv)
    }
}

// =============================================================================
// Tests
// =============================================================================
