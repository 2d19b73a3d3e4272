//! WeChat SDK
//!
//! Typed client for the WeChat official account and mini program APIs.
//!
//! # Architecture
//!
//! ```text
//! Wechat ──┬── OfficialAccount ──┐
//!          └── MiniProgram ──────┼── AccessTokenHandle (cached, single-flight refresh)
//!                                └── HttpTransport (reqwest)
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use wechat_sdk::prelude::*;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let wechat = Wechat::new()?;
//! let mp = wechat.mini_program(MiniProgramConfig::new("wx1234567890abcdef", "app_secret"));
//!
//! let session = mp.code_to_session("code_from_wx_login").await?;
//! let user = mp.decrypt_user_info(&session.session_key, "encryptedData", "iv")?;
//! println!("{}", user.nick_name);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

pub mod config;
pub mod crypto;
pub mod error;
pub mod miniprogram;
pub mod official_account;
pub mod token;
pub mod transport;
pub mod types;

pub use config::{MiniProgramConfig, OfficialAccountConfig};
pub use crypto::{DataCrypto, MessageCipher};
pub use error::{ApiError, ApiResult, CryptoError, PayloadError, TransportError, WechatError};
pub use miniprogram::{MiniProgram, QrCodeParams};
pub use official_account::OfficialAccount;
pub use token::{AccessToken, AccessTokenHandle, DefaultAccessToken};
pub use transport::{HttpTransport, ReqwestTransport};
pub use types::{PhoneInfo, UserInfo, Watermark};

/// Entry point handing out API clients that share one HTTP transport
#[derive(Clone)]
pub struct Wechat {
    transport: Arc<dyn HttpTransport>,
}

impl Wechat {
    /// Use a reqwest transport with the default timeout
    pub fn new() -> Result<Self, TransportError> {
        Ok(Self::with_transport(Arc::new(ReqwestTransport::new()?)))
    }

    pub fn with_transport(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }

    pub fn official_account(&self, config: OfficialAccountConfig) -> OfficialAccount {
        OfficialAccount::new(config, self.transport.clone())
    }

    pub fn mini_program(&self, config: MiniProgramConfig) -> MiniProgram {
        MiniProgram::new(config, self.transport.clone())
    }
}

/// Prelude for common imports
pub mod prelude {
    pub use crate::config::{MiniProgramConfig, OfficialAccountConfig};
    pub use crate::error::{ApiError, CryptoError, PayloadError};
    pub use crate::miniprogram::{MiniProgram, QrCodeParams};
    pub use crate::official_account::OfficialAccount;
    pub use crate::token::AccessTokenHandle;
    pub use crate::types::*;
    pub use crate::Wechat;
}
