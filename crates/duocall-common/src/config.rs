//! Application configuration loaded from environment variables and config files.
//!
//! Supports `.env` files for development and environment variables for
//! production. Config precedence: env vars > .env file > config.toml > defaults

use serde::Deserialize;
use std::sync::OnceLock;

static CONFIG: OnceLock<AppConfig> = OnceLock::new();

/// Get the global application configuration.
///
/// # Panics
/// Panics if config has not been initialized via [`init`].
pub fn get() -> &'static AppConfig {
    CONFIG
        .get()
        .expect("Config not initialized. Call duocall_common::config::init() first.")
}

/// Initialize the global configuration from environment.
///
/// Should be called once at application startup, before any other code
/// accesses config.
pub fn init() -> Result<&'static AppConfig, config::ConfigError> {
    // Load .env file if present (development)
    let _ = dotenvy::dotenv();

    let cfg = config::Config::builder()
        // Defaults
        .set_default("media.audio", true)?
        .set_default("media.video", true)?
        .set_default("relay.room_capacity", 2)?
        .set_default(
            "ice.stun_urls",
            vec![
                "stun:stun.l.google.com:19302".to_string(),
                "stun:stun1.l.google.com:19302".to_string(),
            ],
        )?
        // Optional config file
        .add_source(config::File::with_name("config").required(false))
        // Environment variables (DUOCALL__MEDIA__VIDEO, DUOCALL__ICE__STUN_URLS, etc.)
        .add_source(
            config::Environment::with_prefix("DUOCALL")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let app_config: AppConfig = cfg.try_deserialize()?;
    Ok(CONFIG.get_or_init(|| app_config))
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub media: MediaConfig,
    pub relay: RelayConfig,
    pub ice: IceConfig,
}

/// Which capture kinds a call requests from the local media capability.
#[derive(Debug, Deserialize, Clone)]
pub struct MediaConfig {
    pub audio: bool,
    pub video: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RelayConfig {
    /// Maximum participants per room. The negotiation core only supports
    /// two; raising this requires a different topology.
    pub room_capacity: u32,
}

/// STUN/TURN servers handed to the peer-connection primitive.
#[derive(Debug, Deserialize, Clone)]
pub struct IceConfig {
    pub stun_urls: Vec<String>,
    /// TURN relay, if any ("turn:host:port").
    pub turn_url: Option<String>,
    pub turn_username: Option<String>,
    pub turn_credential: Option<String>,
}
