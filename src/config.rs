//! Configuration management

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::types::DEFAULT_API_BASE;

/// Mini program (小程序) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiniProgramConfig {
    /// Mini program AppID
    pub app_id: String,

    /// Mini program AppSecret
    pub app_secret: String,

    /// API host, overridable for proxies and tests
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

/// Official account (公众号/服务号) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfficialAccountConfig {
    /// Official account AppID
    pub app_id: String,

    /// Official account AppSecret
    pub app_secret: String,

    /// Token for callback signature verification
    #[serde(default)]
    pub token: Option<String>,

    /// EncodingAESKey (43 characters, only needed in safe mode)
    #[serde(default)]
    pub encoding_aes_key: Option<String>,

    #[serde(default = "default_api_base")]
    pub api_base: String,
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn api_base_from_env() -> String {
    std::env::var("WECHAT_API_BASE").unwrap_or_else(|_| default_api_base())
}

impl MiniProgramConfig {
    pub fn new(app_id: impl Into<String>, app_secret: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            app_secret: app_secret.into(),
            api_base: default_api_base(),
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env file if present

        Ok(Self {
            app_id: std::env::var("WECHAT_APP_ID").context("WECHAT_APP_ID is required")?,
            app_secret: std::env::var("WECHAT_APP_SECRET")
                .context("WECHAT_APP_SECRET is required")?,
            api_base: api_base_from_env(),
        })
    }
}

impl OfficialAccountConfig {
    pub fn new(app_id: impl Into<String>, app_secret: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            app_secret: app_secret.into(),
            token: None,
            encoding_aes_key: None,
            api_base: default_api_base(),
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            app_id: std::env::var("WECHAT_APP_ID").context("WECHAT_APP_ID is required")?,
            app_secret: std::env::var("WECHAT_APP_SECRET")
                .context("WECHAT_APP_SECRET is required")?,
            token: std::env::var("WECHAT_TOKEN").ok(),
            encoding_aes_key: std::env::var("WECHAT_ENCODING_AES_KEY").ok(),
            api_base: api_base_from_env(),
        })
    }

    /// Safe mode is on when an EncodingAESKey is configured
    pub fn is_safe_mode(&self) -> bool {
        self.encoding_aes_key
            .as_deref()
            .is_some_and(|key| !key.trim().is_empty())
    }
}
