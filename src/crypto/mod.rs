//! WeChat cryptographic utilities
//!
//! - [`data`]: AES-128-CBC payloads keyed by a mini program session key
//!   (`wx.getUserInfo`, `getPhoneNumber`), with watermark validation
//! - [`message`]: AES-256-CBC callback messages keyed by an official
//!   account's EncodingAESKey
//! - [`signature`]: SHA1 signatures on platform callbacks

pub mod data;
pub mod message;
pub mod signature;

use base64::Engine;
use base64::engine::general_purpose;

use crate::error::CryptoError;

pub use data::{DataCrypto, decrypt, encrypt};
pub use message::MessageCipher;
pub use signature::{signature, verify_signature};

/// AES block size in bytes
pub const AES_BLOCK_SIZE: usize = 16;

/// Append PKCS#7 padding up to a multiple of `block_size`
///
/// Aligned input still gains a full block, so unpadding is unambiguous.
pub fn pkcs7_pad(data: &[u8], block_size: usize) -> Vec<u8> {
    debug_assert!((1..=255).contains(&block_size));
    let pad = block_size - data.len() % block_size;
    let mut padded = Vec::with_capacity(data.len() + pad);
    padded.extend_from_slice(data);
    padded.resize(data.len() + pad, pad as u8);
    padded
}

/// Strip PKCS#7 padding, rejecting a pad byte of 0, one above `block_size`
/// or the data length, and pad runs whose bytes disagree
pub fn pkcs7_unpad(data: &[u8], block_size: usize) -> Result<&[u8], CryptoError> {
    let Some(&last) = data.last() else {
        return Err(CryptoError::InvalidPadding);
    };

    let pad = last as usize;
    if pad == 0 || pad > block_size || pad > data.len() {
        return Err(CryptoError::InvalidPadding);
    }

    let (body, padding) = data.split_at(data.len() - pad);
    if padding.iter().any(|&b| b != last) {
        return Err(CryptoError::InvalidPadding);
    }

    Ok(body)
}

pub(crate) fn decode_base64(field: &'static str, value: &str) -> Result<Vec<u8>, CryptoError> {
    general_purpose::STANDARD
        .decode(value)
        .map_err(|source| CryptoError::Base64 { field, source })
}

pub(crate) fn encode_base64(data: &[u8]) -> String {
    general_purpose::STANDARD.encode(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pad_adds_full_block_when_aligned() {
        let padded = pkcs7_pad(&[0xAA; 16], 16);
        assert_eq!(padded.len(), 32);
        assert!(padded[16..].iter().all(|&b| b == 16));
    }

    #[test]
    fn test_pad_partial_block() {
        let padded = pkcs7_pad(b"hello", 16);
        assert_eq!(padded.len(), 16);
        assert_eq!(&padded[..5], b"hello");
        assert!(padded[5..].iter().all(|&b| b == 11));

        let padded = pkcs7_pad(b"hello", 32);
        assert_eq!(padded.len(), 32);
        assert_eq!(padded[31], 27);
    }

    #[test]
    fn test_unpad_valid() {
        let padded = pkcs7_pad(b"payload", 16);
        assert_eq!(pkcs7_unpad(&padded, 16).unwrap(), b"payload");

        let padded = pkcs7_pad(b"", 16);
        assert_eq!(pkcs7_unpad(&padded, 16).unwrap(), b"");
    }

    #[test]
    fn test_unpad_rejects_bad_bytes() {
        assert_eq!(pkcs7_unpad(&[], 16), Err(CryptoError::InvalidPadding));

        let mut zero = vec![7u8; 16];
        zero[15] = 0;
        assert_eq!(pkcs7_unpad(&zero, 16), Err(CryptoError::InvalidPadding));

        // Larger than the block size
        let mut big = vec![0u8; 32];
        big[31] = 17;
        assert_eq!(pkcs7_unpad(&big, 16), Err(CryptoError::InvalidPadding));

        // Larger than the data
        assert_eq!(pkcs7_unpad(&[1, 2, 9], 16), Err(CryptoError::InvalidPadding));

        // Inconsistent run
        let mut mixed = vec![0u8; 16];
        mixed[13] = 1;
        mixed[14] = 3;
        mixed[15] = 3;
        assert_eq!(pkcs7_unpad(&mixed, 16), Err(CryptoError::InvalidPadding));
    }

    #[test]
    fn test_decode_base64_names_field() {
        let err = decode_base64("iv", "not base64!").unwrap_err();
        assert!(matches!(err, CryptoError::Base64 { field: "iv", .. }));
        assert!(err.to_string().contains("iv"));
    }
}
