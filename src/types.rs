//! Shared API types: endpoints, the response envelope and decrypted payloads

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult, WechatError, codes};

// =============================================================================
// API Endpoints
// =============================================================================

pub const DEFAULT_API_BASE: &str = "https://api.weixin.qq.com";

pub const TOKEN_PATH: &str = "/cgi-bin/token";
pub const CODE2SESSION_PATH: &str = "/sns/jscode2session";
pub const PAID_UNIONID_PATH: &str = "/wxa/getpaidunionid";
pub const UNLIMITED_QRCODE_PATH: &str = "/wxa/getwxacodeunlimit";
pub const USER_INFO_PATH: &str = "/cgi-bin/user/info";

/// Join `api_base` and `path`, appending percent-encoded query parameters
pub(crate) fn api_url(api_base: &str, path: &str, params: &[(&str, &str)]) -> ApiResult<String> {
    let base = format!("{api_base}{path}");
    reqwest::Url::parse_with_params(&base, params)
        .map(String::from)
        .map_err(|e| ApiError::InvalidUrl(format!("{base}: {e}")))
}

// =============================================================================
// Response Envelope
// =============================================================================

/// `errcode` / `errmsg` pair present on most responses
///
/// Successful responses usually omit both fields, so they default to zero.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiStatus {
    #[serde(default)]
    pub errcode: i64,
    #[serde(default)]
    pub errmsg: String,
}

impl ApiStatus {
    pub fn into_result(self) -> Result<(), WechatError> {
        if self.errcode == codes::OK {
            Ok(())
        } else {
            Err(WechatError::new(self.errcode, self.errmsg))
        }
    }
}

/// Any response body: the status envelope plus the endpoint's own fields
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    #[serde(flatten)]
    pub status: ApiStatus,
    #[serde(flatten)]
    pub data: T,
}

/// Parse a JSON body, turning a non-zero `errcode` into [`WechatError`]
///
/// The status is checked first so that an error body missing the success
/// fields is reported as the platform error rather than a decode failure.
pub fn parse_response<T: DeserializeOwned>(body: &[u8]) -> ApiResult<T> {
    let status: ApiStatus = serde_json::from_slice(body)?;
    status.into_result()?;
    let response: ApiResponse<T> = serde_json::from_slice(body)?;
    Ok(response.data)
}

// =============================================================================
// Decrypted Payloads
// =============================================================================

/// Provenance stamp embedded in every encrypted user payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    #[serde(default)]
    pub appid: String,
    #[serde(default)]
    pub timestamp: i64,
}

/// Payloads carrying a [`Watermark`]
pub trait Watermarked {
    fn watermark(&self) -> &Watermark;
}

/// Decrypted `wx.getUserInfo` payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    #[serde(default)]
    pub open_id: String,
    #[serde(default)]
    pub nick_name: String,
    /// 0 unknown, 1 male, 2 female
    #[serde(default)]
    pub gender: i32,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub province: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub avatar_url: String,
    #[serde(default)]
    pub union_id: String,
    pub watermark: Watermark,
}

impl Watermarked for UserInfo {
    fn watermark(&self) -> &Watermark {
        &self.watermark
    }
}

/// Decrypted `getPhoneNumber` payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhoneInfo {
    #[serde(default)]
    pub phone_number: String,
    #[serde(default)]
    pub pure_phone_number: String,
    #[serde(default)]
    pub country_code: String,
    pub watermark: Watermark,
}

impl Watermarked for PhoneInfo {
    fn watermark(&self) -> &Watermark {
        &self.watermark
    }
}

// =============================================================================
// Tests
// =============================================================================
