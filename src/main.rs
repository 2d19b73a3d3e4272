//! WeChat SDK command line tool
//!
//! Operator helpers around the library: fetch an access token with the
//! configured credentials, decrypt mini program payloads, encrypt test data.
//!
//! Credentials come from the environment (or a `.env` file):
//! `WECHAT_APP_ID`, `WECHAT_APP_SECRET`, optionally `WECHAT_API_BASE`.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wechat_sdk::config::MiniProgramConfig;
use wechat_sdk::crypto::{self, DataCrypto};
use wechat_sdk::token::DefaultAccessToken;
use wechat_sdk::transport::ReqwestTransport;

#[derive(Parser, Debug)]
#[command(name = "wechat-sdk")]
#[command(author, version, about = "WeChat API helper", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch an access token for WECHAT_APP_ID
    Token,
    /// Decrypt a wx.getUserInfo payload
    DecryptUser(DecryptArgs),
    /// Decrypt a getPhoneNumber payload
    DecryptPhone(DecryptArgs),
    /// Encrypt plaintext with a session key
    Encrypt {
        #[arg(long)]
        session_key: String,
        #[arg(long)]
        iv: String,
        plaintext: String,
    },
}

#[derive(clap::Args, Debug)]
struct DecryptArgs {
    /// AppID expected in the watermark
    #[arg(long, env = "WECHAT_APP_ID")]
    app_id: String,
    #[arg(long)]
    session_key: String,
    /// Base64 encryptedData
    #[arg(long)]
    data: String,
    #[arg(long)]
    iv: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,wechat_sdk=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Token => {
            let config = MiniProgramConfig::from_env()?;
            let transport = Arc::new(ReqwestTransport::new()?);
            let cache = DefaultAccessToken::new(&config.app_id, &config.app_secret, transport)
                .with_api_base(&config.api_base);

            let token = cache
                .get_access_token()
                .await
                .context("Failed to fetch access token")?;
            if let Some(cached) = cache.cached().await {
                info!("Token valid until unix time {}", cached.refresh_at());
            }
            println!("{token}");
        }
        Commands::DecryptUser(args) => {
            let info = DataCrypto::new(&args.app_id)
                .decrypt_user_info(&args.session_key, &args.data, &args.iv)
                .context("Failed to decrypt user info")?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Commands::DecryptPhone(args) => {
            let info = DataCrypto::new(&args.app_id)
                .decrypt_phone_info(&args.session_key, &args.data, &args.iv)
                .context("Failed to decrypt phone info")?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Commands::Encrypt {
            session_key,
            iv,
            plaintext,
        } => {
            let encrypted = crypto::encrypt(&session_key, plaintext.as_bytes(), &iv)
                .context("Failed to encrypt")?;
            println!("{encrypted}");
        }
    }

    Ok(())
}
