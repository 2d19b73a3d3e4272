//! Official account (公众号/服务号) API client

use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use crate::config::OfficialAccountConfig;
use crate::crypto::{MessageCipher, verify_signature};
use crate::error::{ApiResult, CryptoError};
use crate::token::{AccessTokenHandle, DefaultAccessToken};
use crate::transport::HttpTransport;
use crate::types::{USER_INFO_PATH, api_url, parse_response};

const DEFAULT_LANG: &str = "zh_CN";

/// Official account API client
#[derive(Clone)]
pub struct OfficialAccount {
    config: OfficialAccountConfig,
    transport: Arc<dyn HttpTransport>,
    token_handle: Arc<dyn AccessTokenHandle>,
}

impl OfficialAccount {
    /// Create a client with an in-memory token cache
    pub fn new(config: OfficialAccountConfig, transport: Arc<dyn HttpTransport>) -> Self {
        let token_handle: Arc<dyn AccessTokenHandle> = Arc::new(
            DefaultAccessToken::new(&config.app_id, &config.app_secret, transport.clone())
                .with_api_base(&config.api_base),
        );

        Self {
            config,
            transport,
            token_handle,
        }
    }

    pub fn with_access_token_handle(mut self, handle: Arc<dyn AccessTokenHandle>) -> Self {
        self.token_handle = handle;
        self
    }

    pub fn config(&self) -> &OfficialAccountConfig {
        &self.config
    }

    pub async fn access_token(&self) -> ApiResult<String> {
        self.token_handle.access_token().await
    }

    /// Check the `signature` query parameter of a callback
    ///
    /// Always false when no token is configured.
    pub fn verify_callback(&self, timestamp: &str, nonce: &str, signature: &str) -> bool {
        match self.config.token.as_deref() {
            Some(token) => verify_signature(&[token, timestamp, nonce], signature),
            None => false,
        }
    }

    /// Check the `msg_signature` of a safe-mode callback
    pub fn verify_message(
        &self,
        timestamp: &str,
        nonce: &str,
        encrypted: &str,
        msg_signature: &str,
    ) -> bool {
        match self.config.token.as_deref() {
            Some(token) => verify_signature(&[token, timestamp, nonce, encrypted], msg_signature),
            None => false,
        }
    }

    /// Cipher for safe-mode callbacks; `None` in plain mode
    pub fn message_cipher(&self) -> Option<Result<MessageCipher, CryptoError>> {
        if !self.config.is_safe_mode() {
            return None;
        }
        self.config
            .encoding_aes_key
            .as_deref()
            .map(|key| MessageCipher::new(key, &self.config.app_id))
    }

    /// Basic profile of a follower
    pub async fn get_user_info(&self, openid: &str, lang: Option<&str>) -> ApiResult<UserProfile> {
        let access_token = self.access_token().await?;
        let url = api_url(
            &self.config.api_base,
            USER_INFO_PATH,
            &[
                ("access_token", access_token.as_str()),
                ("openid", openid),
                ("lang", lang.unwrap_or(DEFAULT_LANG)),
            ],
        )?;

        let body = self.transport.get(&url).await?;
        let profile: UserProfile = parse_response(&body)?;

        debug!("Fetched user info for {}", openid);
        Ok(profile)
    }
}

/// Follower profile returned by `user/info`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserProfile {
    /// 0 when the user no longer follows the account; other fields are then absent
    #[serde(default)]
    pub subscribe: i32,
    pub openid: String,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub sex: i32,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub province: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub headimgurl: String,
    #[serde(default)]
    pub subscribe_time: i64,
    #[serde(default)]
    pub unionid: Option<String>,
    #[serde(default)]
    pub remark: String,
    #[serde(default)]
    pub groupid: i64,
    #[serde(default)]
    pub tagid_list: Vec<i64>,
    #[serde(default)]
    pub subscribe_scene: String,
    #[serde(default)]
    pub qr_scene: i64,
    #[serde(default)]
    pub qr_scene_str: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::signature;
    use crate::transport::mock::MockTransport;

    const KEY: &str = "AAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8";

    fn account(mock: &MockTransport) -> OfficialAccount {
        let mut config = OfficialAccountConfig::new("wxOA", "oa-secret");
        config.api_base = "https://mock.weixin".to_string();
        config.token = Some("callback-token".to_string());
        OfficialAccount::new(config, Arc::new(mock.clone()))
    }

    #[tokio::test]
    async fn test_get_user_info() {
        let mock = MockTransport::new();
        mock.push_body(r#"{"access_token":"TOKEN","expires_in":7200}"#)
            .push_body(
                r#"{"subscribe":1,"openid":"oUser","nickname":"Band","sex":1,
                    "language":"zh_CN","subscribe_time":1382694957,"tagid_list":[128,2]}"#,
            );

        let profile = account(&mock).get_user_info("oUser", None).await.unwrap();
        assert_eq!(profile.subscribe, 1);
        assert_eq!(profile.nickname, "Band");
        assert_eq!(profile.tagid_list, vec![128, 2]);
        assert!(profile.unionid.is_none());
        assert_eq!(
            mock.requests()[1].0,
            "https://mock.weixin/cgi-bin/user/info?access_token=TOKEN&openid=oUser&lang=zh_CN"
        );
    }

    #[tokio::test]
    async fn test_get_user_info_token_failure() {
        let mock = MockTransport::new();
        mock.push_body(r#"{"errcode":40164,"errmsg":"invalid ip, not in whitelist"}"#);

        let err = account(&mock).get_user_info("oUser", Some("en")).await.unwrap_err();
        assert_eq!(err.remote().map(|e| e.errcode), Some(40164));
        assert_eq!(mock.calls(), 1);
    }

    #[test]
    fn test_verify_callback() {
        let mock = MockTransport::new();
        let oa = account(&mock);
        let sig = signature(&["callback-token", "1700000000", "nonce"]);

        assert!(oa.verify_callback("1700000000", "nonce", &sig));
        assert!(!oa.verify_callback("1700000001", "nonce", &sig));

        let msg_sig = signature(&["callback-token", "1700000000", "nonce", "ENC"]);
        assert!(oa.verify_message("1700000000", "nonce", "ENC", &msg_sig));
    }

    #[test]
    fn test_verify_callback_without_token() {
        let mock = MockTransport::new();
        let oa = OfficialAccount::new(OfficialAccountConfig::new("wx", "s"), Arc::new(mock));
        let sig = signature(&["", "1", "n"]);
        assert!(!oa.verify_callback("1", "n", &sig));
    }

    #[test]
    fn test_message_cipher_only_in_safe_mode() {
        let mock = MockTransport::new();
        assert!(account(&mock).message_cipher().is_none());

        let mut config = OfficialAccountConfig::new("wxOA", "s");
        config.encoding_aes_key = Some(KEY.to_string());
        let oa = OfficialAccount::new(config, Arc::new(mock));

        let cipher = oa.message_cipher().unwrap().unwrap();
        let encrypted = cipher.encrypt("<xml/>").unwrap();
        assert_eq!(cipher.decrypt(&encrypted).unwrap(), "<xml/>");
        assert_eq!(cipher.app_id(), "wxOA");
    }

    #[test]
    fn test_message_cipher_accepts_platform_key() {
        let mut config = OfficialAccountConfig::new("wxOA", "s");
        config.encoding_aes_key = Some("abcdefghijklmnopqrstuvwxyz0123456789ABCDEFZ".to_string());
        let oa = OfficialAccount::new(config, Arc::new(MockTransport::new()));

        assert!(oa.message_cipher().unwrap().is_ok());
    }
}
