//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::util::time::SIMULATION_TPS;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Shared secret used to verify bearer tokens
    pub jwt_secret: String,
    /// Allowed client origins for CORS ("*" allows any)
    pub client_origin: String,
    /// Match timing and start rules
    pub match_settings: MatchSettings,
}

/// How a room with full rosters gets into `Playing`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPolicy {
    /// The join that completes the rosters starts the match
    Auto,
    /// Full rosters wait for the owner's `startGame`
    Owner,
}

impl FromStr for StartPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "owner" => Ok(Self::Owner),
            _ => Err(ConfigError::Invalid("START_POLICY")),
        }
    }
}

/// Tunables for every room's match loop
#[derive(Debug, Clone)]
pub struct MatchSettings {
    /// Simulation and broadcast rate
    pub tick_rate_hz: u32,
    /// Freeze window after a goal during which scoring is suppressed
    pub goal_reset: Duration,
    /// Delay between `FinishedGame` and returning to `WaitingPlayers`
    pub finish_cooldown: Duration,
    /// How long a claimed power-up pad stays unavailable
    pub pad_cooldown: Duration,
    pub start_policy: StartPolicy,
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self {
            tick_rate_hz: SIMULATION_TPS,
            goal_reset: Duration::from_millis(1000),
            finish_cooldown: Duration::from_millis(5000),
            pad_cooldown: Duration::from_millis(5000),
            start_policy: StartPolicy::Auto,
        }
    }
}

impl MatchSettings {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            tick_rate_hz: parse_var("TICK_RATE_HZ")?
                .filter(|hz| *hz > 0)
                .unwrap_or(defaults.tick_rate_hz),
            goal_reset: parse_var("GOAL_RESET_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.goal_reset),
            finish_cooldown: parse_var("FINISH_COOLDOWN_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.finish_cooldown),
            pad_cooldown: parse_var("PAD_COOLDOWN_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.pad_cooldown),
            start_policy: parse_var("START_POLICY")?.unwrap_or(defaults.start_policy),
        })
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:9000".to_string())
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            jwt_secret: env::var("JWT_SECRET").map_err(|_| ConfigError::Missing("JWT_SECRET"))?,

            client_origin: env::var("CLIENT_ORIGIN").unwrap_or_else(|_| "*".to_string()),

            match_settings: MatchSettings::from_env()?,
        })
    }
}

#[cfg(test)]
impl Config {
    /// Config for in-process tests; nothing is read from the environment
    pub(crate) fn for_tests(jwt_secret: &str, match_settings: MatchSettings) -> Self {
        Self {
            server_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            log_level: "debug".to_string(),
            jwt_secret: jwt_secret.to_string(),
            client_origin: "*".to_string(),
            match_settings,
        }
    }
}

/// Read an optional variable; present-but-unparsable is an error
fn parse_var<T: FromStr>(key: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map(Some).map_err(|_| ConfigError::Invalid(key)),
        Err(_) => Ok(None),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}
