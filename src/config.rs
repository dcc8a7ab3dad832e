//! Configuration loading and management

use std::time::Duration;

use crate::error::DetectorError;

/// Detector configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectorConfig {
    /// Upper bound on a single source poll; also bounds `stop()` latency
    pub poll_timeout: Duration,

    /// How often to sample system volume; `None` disables the monitor
    pub volume_poll_interval: Option<Duration>,

    /// Capture keyboard events
    pub keyboard: bool,

    /// Capture mouse clicks and scrolling
    pub mouse: bool,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(100),
            volume_poll_interval: Some(Duration::from_secs(1)),
            keyboard: true,
            mouse: true,
        }
    }
}

impl DetectorConfig {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self, DetectorError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, DetectorError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup("KEYNET_POLL_TIMEOUT_MS") {
            match parse_millis("KEYNET_POLL_TIMEOUT_MS", &value)? {
                0 => return Err(invalid("KEYNET_POLL_TIMEOUT_MS", &value)),
                ms => config.poll_timeout = Duration::from_millis(ms),
            }
        }

        if let Some(value) = lookup("KEYNET_VOLUME_POLL_MS") {
            config.volume_poll_interval = match parse_millis("KEYNET_VOLUME_POLL_MS", &value)? {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            };
        }

        if let Some(value) = lookup("KEYNET_KEYBOARD") {
            config.keyboard = parse_flag("KEYNET_KEYBOARD", &value)?;
        }

        if let Some(value) = lookup("KEYNET_MOUSE") {
            config.mouse = parse_flag("KEYNET_MOUSE", &value)?;
        }

        Ok(config)
    }
}

fn invalid(key: &'static str, value: &str) -> DetectorError {
    DetectorError::InvalidConfig {
        key,
        value: value.to_string(),
    }
}

fn parse_millis(key: &'static str, value: &str) -> Result<u64, DetectorError> {
    value.trim().parse().map_err(|_| invalid(key, value))
}

fn parse_flag(key: &'static str, value: &str) -> Result<bool, DetectorError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, value)),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load_from(pairs: &[(&str, &str)]) -> Result<DetectorConfig, DetectorError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        DetectorConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_config_defaults() {
        let config = load_from(&[]).unwrap();
        assert_eq!(config, DetectorConfig::default());
        assert_eq!(config.poll_timeout, Duration::from_millis(100));
    }

    #[test]
    fn test_config_overrides() {
        let config = load_from(&[
            ("KEYNET_POLL_TIMEOUT_MS", "250"),
            ("KEYNET_VOLUME_POLL_MS", "0"),
            ("KEYNET_MOUSE", "off"),
        ])
        .unwrap();
        assert_eq!(config.poll_timeout, Duration::from_millis(250));
        assert_eq!(config.volume_poll_interval, None);
        assert!(config.keyboard);
        assert!(!config.mouse);
    }

    #[test]
    fn test_config_invalid_values() {
        assert!(matches!(
            load_from(&[("KEYNET_KEYBOARD", "maybe")]),
            Err(DetectorError::InvalidConfig { key: "KEYNET_KEYBOARD", .. })
        ));
        assert!(load_from(&[("KEYNET_POLL_TIMEOUT_MS", "0")]).is_err());
        assert!(load_from(&[("KEYNET_VOLUME_POLL_MS", "-5")]).is_err());
    }
}
