//! Configuration loader — recognized options from spec §6.
//!
//! Loaded with [`figment`] the same way the teacher loads its
//! `ServerConfig`: a `config.toml` merged with environment overrides. The
//! core doesn't *use* every field it recognizes (`JwtSecret`, `RedisUrl`,
//! `DatabaseUrl` belong to external collaborators per spec §1), but a
//! config loader that rejected them would break deployments that set them
//! for those collaborators.

use std::sync::OnceLock;

use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::Deserialize;

mod log_config;
pub use log_config::LogConfig;

pub static CONFIG: OnceLock<MatchmakerConfig> = OnceLock::new();

pub fn init() {
    let raw_config = Figment::new()
        .merge(Toml::file(
            Env::var("APP_CONFIG").as_deref().unwrap_or("config.toml"),
        ))
        .merge(Env::prefixed("APP_").global());

    let config = match raw_config.extract::<MatchmakerConfig>() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("It looks like your config is invalid. The following error occurred: {e}");
            std::process::exit(1);
        }
    };

    CONFIG.set(config).expect("config should be set");
}

pub fn get() -> &'static MatchmakerConfig {
    CONFIG.get().expect("config should be set")
}

#[derive(Deserialize, Clone, Debug)]
pub struct MatchmakerConfig {
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default)]
    pub use_https: bool,
    #[serde(default = "default_matchmaker_port")]
    pub matchmaker_port: u16,
    #[serde(default = "default_admin_dashboard_port")]
    pub admin_dashboard_port: u16,

    #[serde(default = "default_true")]
    pub log_to_file: bool,
    #[serde(default = "default_true")]
    pub enable_webserver: bool,

    /// Required in production by external collaborators (JWT verification);
    /// the matchmaker core never reads this itself.
    pub jwt_secret: Option<String>,
    #[serde(default = "default_rate_limit_window_ms")]
    pub rate_limit_window_ms: u64,
    #[serde(default = "default_rate_limit_max_requests")]
    pub rate_limit_max_requests: u32,

    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,

    /// ETA estimate used by `queuePosition`; static per spec §9's open
    /// question (dynamic estimation is explicitly out of scope).
    #[serde(default = "default_average_hold_ms")]
    pub average_hold_ms: u64,

    /// Unused by the core; recognized only so deployments that set these
    /// for other collaborators don't fail config validation.
    pub redis_url: Option<String>,
    pub database_url: Option<String>,

    pub log: LogConfig,
    pub tls: Option<TlsConfig>,
}

impl Default for MatchmakerConfig {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            use_https: false,
            matchmaker_port: default_matchmaker_port(),
            admin_dashboard_port: default_admin_dashboard_port(),
            log_to_file: true,
            enable_webserver: true,
            jwt_secret: None,
            rate_limit_window_ms: default_rate_limit_window_ms(),
            rate_limit_max_requests: default_rate_limit_max_requests(),
            session_timeout_ms: default_session_timeout_ms(),
            health_check_interval_ms: default_health_check_interval_ms(),
            average_hold_ms: default_average_hold_ms(),
            redis_url: None,
            database_url: None,
            log: LogConfig::default(),
            tls: None,
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct TlsConfig {
    pub cert: String,
    pub key: String,
}

fn default_true() -> bool {
    true
}

fn default_http_port() -> u16 {
    80
}

fn default_matchmaker_port() -> u16 {
    9999
}

fn default_admin_dashboard_port() -> u16 {
    3001
}

fn default_rate_limit_window_ms() -> u64 {
    900_000
}

fn default_rate_limit_max_requests() -> u32 {
    100
}

fn default_session_timeout_ms() -> u64 {
    1_800_000
}

fn default_health_check_interval_ms() -> u64 {
    30_000
}

fn default_average_hold_ms() -> u64 {
    300_000
}
