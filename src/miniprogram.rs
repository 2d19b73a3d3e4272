//! Mini program (小程序) API client
//!
//! Covers login (`code2session`), paid UnionID lookup, unlimited mini
//! program codes and the encrypted data helpers.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::MiniProgramConfig;
use crate::crypto::DataCrypto;
use crate::error::{ApiResult, PayloadError};
use crate::token::{AccessTokenHandle, DefaultAccessToken};
use crate::transport::HttpTransport;
use crate::types::{
    ApiStatus, CODE2SESSION_PATH, PAID_UNIONID_PATH, PhoneInfo, UNLIMITED_QRCODE_PATH, UserInfo,
    api_url, parse_response,
};

// =============================================================================
// Client
// =============================================================================

/// Mini program API client
#[derive(Clone)]
pub struct MiniProgram {
    config: MiniProgramConfig,
    transport: Arc<dyn HttpTransport>,
    token_handle: Arc<dyn AccessTokenHandle>,
    crypto: DataCrypto,
}

impl MiniProgram {
    /// Create a client with an in-memory token cache
    pub fn new(config: MiniProgramConfig, transport: Arc<dyn HttpTransport>) -> Self {
        let token_handle: Arc<dyn AccessTokenHandle> = Arc::new(
            DefaultAccessToken::new(&config.app_id, &config.app_secret, transport.clone())
                .with_api_base(&config.api_base),
        );
        let crypto = DataCrypto::new(&config.app_id);

        Self {
            config,
            transport,
            token_handle,
            crypto,
        }
    }

    /// Replace the token cache, e.g. with one shared between processes
    pub fn with_access_token_handle(mut self, handle: Arc<dyn AccessTokenHandle>) -> Self {
        self.token_handle = handle;
        self
    }

    pub fn config(&self) -> &MiniProgramConfig {
        &self.config
    }

    pub async fn access_token(&self) -> ApiResult<String> {
        self.token_handle.access_token().await
    }

    /// Encrypted data helpers bound to this AppID
    pub fn crypto(&self) -> &DataCrypto {
        &self.crypto
    }

    pub fn decrypt_user_info(
        &self,
        session_key: &str,
        encrypted_data: &str,
        iv: &str,
    ) -> Result<UserInfo, PayloadError> {
        self.crypto.decrypt_user_info(session_key, encrypted_data, iv)
    }

    pub fn decrypt_phone_info(
        &self,
        session_key: &str,
        encrypted_data: &str,
        iv: &str,
    ) -> Result<PhoneInfo, PayloadError> {
        self.crypto.decrypt_phone_info(session_key, encrypted_data, iv)
    }

    /// Exchange a `wx.login` code for the user's OpenID and session key
    pub async fn code_to_session(&self, js_code: &str) -> ApiResult<Code2SessionResult> {
        let url = api_url(
            &self.config.api_base,
            CODE2SESSION_PATH,
            &[
                ("appid", self.config.app_id.as_str()),
                ("secret", self.config.app_secret.as_str()),
                ("js_code", js_code),
                ("grant_type", "authorization_code"),
            ],
        )?;

        let body = self.transport.get(&url).await?;
        let result: Code2SessionResult = parse_response(&body)?;

        debug!("code2session succeeded for openid {}", result.openid);
        Ok(result)
    }

    /// UnionID of a user who just paid, without requiring authorization
    pub async fn get_paid_union_id(&self, openid: &str, transaction_id: &str) -> ApiResult<String> {
        let access_token = self.access_token().await?;
        let url = api_url(
            &self.config.api_base,
            PAID_UNIONID_PATH,
            &[
                ("access_token", access_token.as_str()),
                ("openid", openid),
                ("transaction_id", transaction_id),
            ],
        )?;

        let body = self.transport.get(&url).await?;
        let result: PaidUnionIdResult = parse_response(&body)?;
        Ok(result.unionid)
    }

    /// Generate an unlimited mini program code; returns image bytes
    pub async fn get_unlimited_qrcode(&self, params: &QrCodeParams) -> ApiResult<Vec<u8>> {
        let access_token = self.access_token().await?;
        let url = api_url(
            &self.config.api_base,
            UNLIMITED_QRCODE_PATH,
            &[("access_token", access_token.as_str())],
        )?;

        let body = self
            .transport
            .post_json(&url, &serde_json::to_value(params)?)
            .await?;

        // Images come back raw; failures come back as a JSON envelope
        if let Ok(status) = serde_json::from_slice::<ApiStatus>(&body)
            && let Err(e) = status.into_result()
        {
            warn!("Mini program code generation failed: {}", e);
            return Err(e.into());
        }

        info!(
            "Generated mini program code for scene '{}' ({} bytes)",
            params.scene,
            body.len()
        );
        Ok(body)
    }
}

// =============================================================================
// Response Types
// =============================================================================

/// `code2session` result
#[derive(Debug, Clone, Deserialize)]
pub struct Code2SessionResult {
    pub openid: String,
    pub session_key: String,
    /// Present once the mini program is bound to an open platform account
    #[serde(default)]
    pub unionid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PaidUnionIdResult {
    unionid: String,
}

// =============================================================================
// Mini Program Code Parameters
// =============================================================================

/// RGB line color of a mini program code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

/// Parameters for `getwxacodeunlimit`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QrCodeParams {
    /// Up to 32 visible characters passed to the landing page
    pub scene: String,

    /// Published page to open, without a leading `/`; home page if unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<String>,

    /// Code width in px, 280 to 1280
    pub width: u32,

    /// Pick the line color automatically
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub auto_color: bool,

    /// Only used when `auto_color` is off
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_color: Option<LineColor>,

    /// Transparent background
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub is_hyaline: bool,
}

impl QrCodeParams {
    pub const DEFAULT_WIDTH: u32 = 430;

    pub fn new(scene: impl Into<String>) -> Self {
        Self {
            scene: scene.into(),
            page: None,
            width: Self::DEFAULT_WIDTH,
            auto_color: false,
            line_color: None,
            is_hyaline: false,
        }
    }

    pub fn page(mut self, page: impl Into<String>) -> Self {
        self.page = Some(page.into());
        self
    }

    pub fn width(mut self, width: u32) -> Self {
        self.width = width;
        self
    }

    pub fn auto_color(mut self) -> Self {
        self.auto_color = true;
        self
    }

    pub fn line_color(mut self, r: u8, g: u8, b: u8) -> Self {
        self.line_color = Some(LineColor { r, g, b });
        self
    }

    pub fn hyaline(mut self) -> Self {
        self.is_hyaline = true;
        self
    }
}

// =============================================================================
// Tests
// =============================================================================
