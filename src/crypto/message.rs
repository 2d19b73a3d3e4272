//! Official account callback message encryption
//!
//! In safe mode the platform encrypts callback XML with the account's
//! EncodingAESKey: 43 base64 characters (a 32 byte key with the trailing `=`
//! dropped). AES-256-CBC with IV = first 16 key bytes, PKCS#7 padded to
//! 32-byte blocks.
//!
//! Plaintext layout: `random(16) | msg_len(4, big endian) | msg | app_id`

use aes::cipher::block_padding::NoPadding;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::Engine;
use base64::alphabet;
use base64::engine::{GeneralPurpose, GeneralPurposeConfig};
use rand::RngCore;

use super::{AES_BLOCK_SIZE, decode_base64, encode_base64, pkcs7_pad, pkcs7_unpad};
use crate::error::CryptoError;

type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;

pub const ENCODING_AES_KEY_LEN: usize = 43;

/// PKCS#7 block size used by the message format (not the AES block size)
pub const MESSAGE_BLOCK_SIZE: usize = 32;

const RANDOM_LEN: usize = 16;

// The 43rd key character carries 2 unused bits which the platform does not
// zero, so the canonical decoder would reject most real keys.
const ENCODING_AES_KEY_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_allow_trailing_bits(true),
);
const HEADER_LEN: usize = RANDOM_LEN + 4;

/// Encrypts and decrypts callback messages for one official account
#[derive(Clone)]
pub struct MessageCipher {
    aes_key: [u8; 32],
    app_id: String,
}

impl std::fmt::Debug for MessageCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageCipher")
            .field("app_id", &self.app_id)
            .finish_non_exhaustive()
    }
}

impl MessageCipher {
    pub fn new(encoding_aes_key: &str, app_id: impl Into<String>) -> Result<Self, CryptoError> {
        let encoding_aes_key = encoding_aes_key.trim();
        if encoding_aes_key.len() != ENCODING_AES_KEY_LEN {
            return Err(CryptoError::InvalidKeyLength {
                expected: ENCODING_AES_KEY_LEN,
                actual: encoding_aes_key.len(),
            });
        }

        let decoded = ENCODING_AES_KEY_ENGINE
            .decode(format!("{encoding_aes_key}="))
            .map_err(|source| CryptoError::Base64 {
                field: "encoding_aes_key",
                source,
            })?;
        let aes_key: [u8; 32] =
            decoded
                .as_slice()
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: 32,
                    actual: decoded.len(),
                })?;

        Ok(Self {
            aes_key,
            app_id: app_id.into(),
        })
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    fn iv(&self) -> &[u8] {
        &self.aes_key[..AES_BLOCK_SIZE]
    }

    /// Decrypt a base64 `Encrypt` field and check the trailing AppID
    pub fn decrypt(&self, encrypted: &str) -> Result<String, CryptoError> {
        let mut buf = decode_base64("encrypted_message", encrypted)?;

        if buf.is_empty() || buf.len() % AES_BLOCK_SIZE != 0 {
            return Err(CryptoError::InvalidCiphertextLength(buf.len()));
        }

        let len = buf.len();
        let cipher = Aes256CbcDec::new_from_slices(&self.aes_key, self.iv()).map_err(|_| {
            CryptoError::InvalidKeyLength {
                expected: 32,
                actual: self.aes_key.len(),
            }
        })?;
        let decrypted = cipher
            .decrypt_padded_mut::<NoPadding>(&mut buf)
            .map_err(|_| CryptoError::InvalidCiphertextLength(len))?;
        let plaintext = pkcs7_unpad(decrypted, MESSAGE_BLOCK_SIZE)?;

        if plaintext.len() < HEADER_LEN {
            return Err(CryptoError::MessageTooShort(plaintext.len()));
        }

        let (len_bytes, rest) = plaintext[RANDOM_LEN..].split_at(4);
        let msg_len = u32::from_be_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]])
            as usize;
        if rest.len() < msg_len {
            return Err(CryptoError::MessageTooShort(plaintext.len()));
        }

        let (msg, app_id) = rest.split_at(msg_len);
        if app_id != self.app_id.as_bytes() {
            return Err(CryptoError::AppIdMismatch {
                expected: self.app_id.clone(),
                actual: String::from_utf8_lossy(app_id).into_owned(),
            });
        }

        String::from_utf8(msg.to_vec()).map_err(|_| CryptoError::InvalidUtf8)
    }

    /// Encrypt a reply with a fresh random prefix
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let mut random = [0u8; RANDOM_LEN];
        rand::rng().fill_bytes(&mut random);
        self.encrypt_with_random(plaintext, &random)
    }

    fn encrypt_with_random(
        &self,
        plaintext: &str,
        random: &[u8; RANDOM_LEN],
    ) -> Result<String, CryptoError> {
        let msg = plaintext.as_bytes();
        let msg_len = frame_len(msg.len())?;

        let mut framed = Vec::with_capacity(HEADER_LEN + msg.len() + self.app_id.len());
        framed.extend_from_slice(random);
        framed.extend_from_slice(&msg_len.to_be_bytes());
        framed.extend_from_slice(msg);
        framed.extend_from_slice(self.app_id.as_bytes());

        let mut buf = pkcs7_pad(&framed, MESSAGE_BLOCK_SIZE);
        let len = buf.len();
        let cipher = Aes256CbcEnc::new_from_slices(&self.aes_key, self.iv()).map_err(|_| {
            CryptoError::InvalidKeyLength {
                expected: 32,
                actual: self.aes_key.len(),
            }
        })?;
        let encrypted = cipher
            .encrypt_padded_mut::<NoPadding>(&mut buf, len)
            .map_err(|_| CryptoError::InvalidCiphertextLength(len))?;

        Ok(encode_base64(encrypted))
    }
}

/// Length prefix for a message of `len` bytes
fn frame_len(len: usize) -> Result<u32, CryptoError> {
    u32::try_from(len).map_err(|_| CryptoError::MessageTooLong(len))
}
