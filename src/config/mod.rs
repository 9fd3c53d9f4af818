//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Public base URL used to build controller join links
    pub public_base_url: String,
    /// Allowed client origins for CORS (comma-separated, empty = any)
    pub client_origin: String,

    /// How long a disconnected slot may be rebound before removal (ms)
    pub reconnect_grace_ms: u64,
    /// How long a room survives with zero bound sessions (ms)
    pub empty_room_grace_ms: u64,
    /// Consecutive simulation faults before a room is terminated
    pub max_consecutive_faults: u32,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            public_base_url: env::var("PUBLIC_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8080".to_string()),
            client_origin: env::var("CLIENT_ORIGIN").unwrap_or_default(),

            reconnect_grace_ms: parse_var("RECONNECT_GRACE_MS", 15_000)?,
            empty_room_grace_ms: parse_var("EMPTY_ROOM_GRACE_MS", 60_000)?,
            max_consecutive_faults: parse_var("MAX_CONSECUTIVE_FAULTS", 3)?,
        })
    }

    /// Controller join link for a room (QR rendering happens client-side)
    pub fn join_url(&self, room_id: &str) -> String {
        format!("{}/play/{}", self.public_base_url.trim_end_matches('/'), room_id)
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_url_strips_trailing_slash() {
        let config = Config {
            server_addr: "0.0.0.0:8080".parse().unwrap(),
            log_level: "info".into(),
            public_base_url: "https://play.example.com/".into(),
            client_origin: String::new(),
            reconnect_grace_ms: 15_000,
            empty_room_grace_ms: 60_000,
            max_consecutive_faults: 3,
        };

        assert_eq!(config.join_url("ROOM42"), "https://play.example.com/play/ROOM42");
    }
}
