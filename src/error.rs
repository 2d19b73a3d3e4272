//! Error types
//!
//! Library errors are typed with `thiserror` so callers can tell transport
//! failures, platform rejections, bad input and failed authenticity checks
//! apart. Application code (config loading, the CLI) wraps them in `anyhow`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

// =============================================================================
// Platform error envelope
// =============================================================================

/// Error returned by the WeChat API in the body of a 200 response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("WeChat error: errcode={errcode}, errmsg={errmsg}")]
pub struct WechatError {
    pub errcode: i64,
    pub errmsg: String,
}

impl WechatError {
    pub fn new(errcode: i64, errmsg: impl Into<String>) -> Self {
        Self {
            errcode,
            errmsg: errmsg.into(),
        }
    }

    /// True when the platform rejected the access token itself, meaning a
    /// forced refresh may help.
    pub fn is_token_invalid(&self) -> bool {
        matches!(
            self.errcode,
            codes::INVALID_CREDENTIAL | codes::ACCESS_TOKEN_EXPIRED
        )
    }
}

/// Well-known `errcode` values
pub mod codes {
    pub const OK: i64 = 0;
    pub const SYSTEM_BUSY: i64 = -1;
    pub const INVALID_CREDENTIAL: i64 = 40001;
    pub const INVALID_GRANT_TYPE: i64 = 40002;
    pub const INVALID_OPENID: i64 = 40003;
    pub const INVALID_MEDIA_TYPE: i64 = 40004;
    pub const INVALID_MEDIA_ID: i64 = 40007;
    pub const INVALID_MESSAGE_TYPE: i64 = 40008;
    pub const INVALID_APPID: i64 = 40013;
    pub const INVALID_CODE: i64 = 40029;
    pub const ACCESS_TOKEN_EXPIRED: i64 = 42001;
    pub const USER_UNSUBSCRIBED: i64 = 43004;
    pub const API_LIMIT_REACHED: i64 = 45009;
    pub const USER_BLOCKED: i64 = 48001;
    pub const API_UNAUTHORIZED: i64 = 48004;
    pub const USER_UNAUTHORIZED: i64 = 50001;
}

// =============================================================================
// Transport / API errors
// =============================================================================

/// Failure of the HTTP collaborator
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP request failed with status {status}")]
    Status { status: u16, body: String },
}

/// Failure of an API call (including fetching the access token)
///
/// Cloneable so one failed token refresh can be handed to every caller that
/// was waiting on it; the non-cloneable sources sit behind an `Arc`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Transport(Arc<TransportError>),

    #[error("Failed to parse API response: {0}")]
    Decode(#[source] Arc<serde_json::Error>),

    #[error(transparent)]
    Remote(#[from] WechatError),

    /// The configured API base does not form a valid URL
    #[error("Invalid API URL: {0}")]
    InvalidUrl(String),

    /// Returned by custom [`AccessTokenHandle`](crate::token::AccessTokenHandle)
    /// implementations whose backend (a shared cache, a token service) could
    /// not produce a token
    #[error("Failed to obtain access token: {0}")]
    Token(String),
}

impl From<TransportError> for ApiError {
    fn from(e: TransportError) -> Self {
        Self::Transport(Arc::new(e))
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(Arc::new(e))
    }
}

impl ApiError {
    /// The platform error, if the remote side rejected the call
    pub fn remote(&self) -> Option<&WechatError> {
        match self {
            Self::Remote(e) => Some(e),
            _ => None,
        }
    }

    /// The HTTP failure, if the request itself failed
    pub fn transport(&self) -> Option<&TransportError> {
        match self {
            Self::Transport(e) => Some(e),
            _ => None,
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

// =============================================================================
// Crypto errors
// =============================================================================

/// Failure of a symmetric crypto operation
///
/// Input errors (`Base64`, lengths) are raised before any cipher work;
/// `InvalidPadding` means the ciphertext or key is wrong.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    #[error("Failed to base64 decode {field}: {source}")]
    Base64 {
        field: &'static str,
        source: base64::DecodeError,
    },

    #[error("Invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Invalid IV length: expected {expected} bytes, got {actual}")]
    InvalidIvLength { expected: usize, actual: usize },

    #[error("Ciphertext length {0} is not a positive multiple of the block size")]
    InvalidCiphertextLength(usize),

    #[error("Invalid PKCS#7 padding")]
    InvalidPadding,

    #[error("Decrypted message too short: {0} bytes")]
    MessageTooShort(usize),

    #[error("Message of {0} bytes is too long to frame")]
    MessageTooLong(usize),

    #[error("AppID mismatch in decrypted message: expected '{expected}', got '{actual}'")]
    AppIdMismatch { expected: String, actual: String },

    #[error("Decrypted message is not valid UTF-8")]
    InvalidUtf8,
}

/// Failure of a decrypt-parse-validate helper
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("Failed to parse decrypted payload: {0}")]
    Json(#[from] serde_json::Error),

    /// Decryption worked but the payload was issued for another application
    #[error("Watermark appid mismatch: expected '{expected}', got '{actual}'")]
    WatermarkMismatch { expected: String, actual: String },
}
