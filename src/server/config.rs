use chrono::{Duration as ChronoDuration, FixedOffset};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::notifications::senders::vk::{DEFAULT_API_BASE, DEFAULT_API_VERSION};

#[derive(Deserialize, Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    /// `None` only for ephemeral runs.
    pub database_url: Option<String>,
    pub db_max_connections: u32,

    pub target_url: String,
    pub probe_max_requests: u32,
    pub probe_max_seconds: u64,
    pub check_interval_seconds: u64,
    pub fast_threshold_seconds: f64,
    pub recent_window: usize,

    pub delivery_window_hours: i64,
    pub delivery_min_wait_seconds: i64,
    pub display_utc_offset_minutes: i32,
    pub notification_text: String,

    pub vk_secure_key: String,
    pub vk_bot_token: String,
    pub vk_api_base: String,
    pub vk_api_version: String,

    pub log_dir: String,
}

// Partial config for layering
#[derive(Deserialize, Default, Debug)]
struct PartialServerConfig {
    listen_addr: Option<SocketAddr>,
    database_url: Option<String>,
    db_max_connections: Option<u32>,
    target_url: Option<String>,
    probe_max_requests: Option<u32>,
    probe_max_seconds: Option<u64>,
    check_interval_seconds: Option<u64>,
    fast_threshold_seconds: Option<f64>,
    recent_window: Option<usize>,
    delivery_window_hours: Option<i64>,
    delivery_min_wait_seconds: Option<i64>,
    display_utc_offset_minutes: Option<i32>,
    notification_text: Option<String>,
    vk_secure_key: Option<String>,
    vk_bot_token: Option<String>,
    vk_api_base: Option<String>,
    vk_api_version: Option<String>,
    log_dir: Option<String>,
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_target_url() -> String {
    "https://edu.stankin.ru".to_string()
}

fn default_notification_text() -> String {
    "Сайт доступен!\nhttps://edu.stankin.ru".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

impl ServerConfig {
    /// Loads the config file (if any), then the environment on top of it.
    pub fn load(config_path: Option<&str>, ephemeral: bool) -> Result<Self, String> {
        dotenv::dotenv().ok();

        // 1. Load from file (optional)
        let file_config: PartialServerConfig = if let Some(path_str) = config_path {
            let path = Path::new(path_str);
            if path.exists() {
                let contents = fs::read_to_string(path)
                    .map_err(|e| format!("Failed to read config file at {path:?}: {e}"))?;
                toml::from_str(&contents)
                    .map_err(|e| format!("Failed to parse TOML from config file at {path:?}: {e}"))?
            } else {
                return Err(format!("Config file {path:?} does not exist"));
            }
        } else {
            PartialServerConfig::default()
        };

        // 2. Load from environment variables
        let env_config: PartialServerConfig = envy::from_env::<PartialServerConfig>()
            .map_err(|e| format!("Failed to load config from environment: {e}"))?;

        Self::merge(env_config, file_config, ephemeral)
    }

    /// Environment overrides file, file overrides defaults.
    fn merge(
        env_config: PartialServerConfig,
        file_config: PartialServerConfig,
        ephemeral: bool,
    ) -> Result<Self, String> {
        let database_url = env_config.database_url.or(file_config.database_url);
        if database_url.is_none() && !ephemeral {
            return Err("DATABASE_URL is required".to_string());
        }

        let final_config = ServerConfig {
            listen_addr: env_config.listen_addr.or(file_config.listen_addr)
                .unwrap_or_else(default_listen_addr),
            database_url,
            db_max_connections: env_config.db_max_connections.or(file_config.db_max_connections)
                .unwrap_or(10),
            target_url: env_config.target_url.or(file_config.target_url)
                .unwrap_or_else(default_target_url),
            probe_max_requests: env_config.probe_max_requests.or(file_config.probe_max_requests)
                .unwrap_or(2),
            probe_max_seconds: env_config.probe_max_seconds.or(file_config.probe_max_seconds)
                .unwrap_or(10),
            check_interval_seconds: env_config.check_interval_seconds.or(file_config.check_interval_seconds)
                .unwrap_or(300),
            fast_threshold_seconds: env_config.fast_threshold_seconds.or(file_config.fast_threshold_seconds)
                .unwrap_or(10.0),
            recent_window: env_config.recent_window.or(file_config.recent_window)
                .unwrap_or(6),
            delivery_window_hours: env_config.delivery_window_hours.or(file_config.delivery_window_hours)
                .unwrap_or(5),
            delivery_min_wait_seconds: env_config.delivery_min_wait_seconds.or(file_config.delivery_min_wait_seconds)
                .unwrap_or(0),
            display_utc_offset_minutes: env_config.display_utc_offset_minutes.or(file_config.display_utc_offset_minutes)
                .unwrap_or(180),
            notification_text: env_config.notification_text.or(file_config.notification_text)
                .unwrap_or_else(default_notification_text),
            vk_secure_key: env_config.vk_secure_key.or(file_config.vk_secure_key)
                .ok_or("VK_SECURE_KEY is required")?,
            vk_bot_token: env_config.vk_bot_token.or(file_config.vk_bot_token)
                .ok_or("VK_BOT_TOKEN is required")?,
            vk_api_base: env_config.vk_api_base.or(file_config.vk_api_base)
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            vk_api_version: env_config.vk_api_version.or(file_config.vk_api_version)
                .unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
            log_dir: env_config.log_dir.or(file_config.log_dir)
                .unwrap_or_else(default_log_dir),
        };

        final_config.validate()?;
        Ok(final_config)
    }

    fn validate(&self) -> Result<(), String> {
        if self.check_interval_seconds == 0 {
            return Err("CHECK_INTERVAL_SECONDS must be greater than zero".to_string());
        }
        if self.probe_max_requests == 0 || self.probe_max_seconds == 0 {
            return Err("PROBE_MAX_REQUESTS and PROBE_MAX_SECONDS must be greater than zero".to_string());
        }
        if self.recent_window == 0 {
            return Err("RECENT_WINDOW must be greater than zero".to_string());
        }
        if self.delivery_window_hours < 0 || self.delivery_min_wait_seconds < 0 {
            return Err("Delivery window and minimum wait must not be negative".to_string());
        }
        self.display_offset()?;
        Ok(())
    }

    pub fn display_offset(&self) -> Result<FixedOffset, String> {
        FixedOffset::east_opt(self.display_utc_offset_minutes * 60).ok_or_else(|| {
            format!(
                "DISPLAY_UTC_OFFSET_MINUTES out of range: {}",
                self.display_utc_offset_minutes
            )
        })
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_seconds)
    }

    pub fn delivery_window(&self) -> ChronoDuration {
        ChronoDuration::hours(self.delivery_window_hours)
    }

    pub fn delivery_min_wait(&self) -> ChronoDuration {
        ChronoDuration::seconds(self.delivery_min_wait_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn required() -> PartialServerConfig {
        PartialServerConfig {
            database_url: Some("postgres://localhost/sitewatch".to_string()),
            vk_secure_key: Some("secure".to_string()),
            vk_bot_token: Some("token".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::merge(required(), PartialServerConfig::default(), false).unwrap();
        assert_eq!(config.listen_addr, default_listen_addr());
        assert_eq!(config.target_url, "https://edu.stankin.ru");
        assert_eq!(config.probe_max_requests, 2);
        assert_eq!(config.probe_max_seconds, 10);
        assert_eq!(config.check_interval(), Duration::from_secs(300));
        assert_eq!(config.fast_threshold_seconds, 10.0);
        assert_eq!(config.recent_window, 6);
        assert_eq!(config.delivery_window(), ChronoDuration::hours(5));
        assert_eq!(config.delivery_min_wait(), ChronoDuration::zero());
        assert_eq!(config.display_offset().unwrap(), FixedOffset::east_opt(3 * 3600).unwrap());
        assert_eq!(config.vk_api_version, "5.131");
    }

    #[test]
    fn test_env_overrides_file() {
        let file: PartialServerConfig = toml::from_str(
            r#"
            target_url = "https://file.example"
            probe_max_seconds = 20
            check_interval_seconds = 60
            "#,
        )
        .unwrap();
        let env = PartialServerConfig {
            target_url: Some("https://env.example".to_string()),
            ..required()
        };

        let config = ServerConfig::merge(env, file, false).unwrap();
        assert_eq!(config.target_url, "https://env.example");
        assert_eq!(config.probe_max_seconds, 20);
        assert_eq!(config.check_interval_seconds, 60);
    }

    #[test]
    fn test_missing_database_url() {
        let env = PartialServerConfig {
            database_url: None,
            ..required()
        };
        let err = ServerConfig::merge(env, PartialServerConfig::default(), false).unwrap_err();
        assert_eq!(err, "DATABASE_URL is required");
    }

    #[test]
    fn test_ephemeral_does_not_need_database_url() {
        let env = PartialServerConfig {
            database_url: None,
            ..required()
        };
        let config = ServerConfig::merge(env, PartialServerConfig::default(), true).unwrap();
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_missing_secrets() {
        let env = PartialServerConfig {
            vk_bot_token: None,
            ..required()
        };
        let err = ServerConfig::merge(env, PartialServerConfig::default(), false).unwrap_err();
        assert_eq!(err, "VK_BOT_TOKEN is required");
    }

    #[test]
    fn test_rejects_invalid_values() {
        let zero_interval = PartialServerConfig {
            check_interval_seconds: Some(0),
            ..required()
        };
        assert!(ServerConfig::merge(zero_interval, PartialServerConfig::default(), false).is_err());

        let bad_offset = PartialServerConfig {
            display_utc_offset_minutes: Some(24 * 60),
            ..required()
        };
        assert!(ServerConfig::merge(bad_offset, PartialServerConfig::default(), false).is_err());
    }
}
