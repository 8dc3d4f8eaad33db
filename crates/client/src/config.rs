use std::time::Duration;

use jobpulse_core::backoff::BackoffPolicy;
use jobpulse_core::estimator::OperationClass;

use crate::api::DEFAULT_STATUS_ROUTES;
use crate::retry::DEFAULT_MAX_ATTEMPTS;
use crate::transport::TransportConfig;

/// Accepted range for the poll retry ceiling.
pub const POLL_MAX_ATTEMPTS_RANGE: std::ops::RangeInclusive<u32> = 5..=10;

/// Tracker configuration.
///
/// All fields have defaults suitable for a local server; override via
/// environment variables with [`TrackerConfig::from_env`].
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// REST base URL (default: `http://localhost:5000`).
    pub base_url: String,
    /// WebSocket endpoint. Push is only possible when this is set.
    pub ws_url: Option<String>,
    /// Status route aliases in priority order; `{id}` is replaced.
    pub status_routes: Vec<String>,
    pub transport: TransportConfig,
    /// Synthetic progress schedule.
    pub operation_class: OperationClass,
    /// How often the estimator advances between server updates. Must be
    /// non-zero.
    pub tick_interval: Duration,
    /// How long a completed session stays open before closing.
    pub completion_dwell: Duration,
    /// Backoff for user-triggered retries.
    pub generic_backoff: BackoffPolicy,
    /// Attempt ceiling for the job-creation request.
    pub create_max_attempts: u32,
    /// Request-authentication token sent on POST requests.
    pub csrf_token: Option<String>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".into(),
            ws_url: None,
            status_routes: DEFAULT_STATUS_ROUTES.iter().map(|r| r.to_string()).collect(),
            transport: TransportConfig::default(),
            operation_class: OperationClass::default(),
            tick_interval: Duration::from_millis(500),
            completion_dwell: Duration::from_millis(1500),
            generic_backoff: BackoffPolicy::generic(),
            create_max_attempts: DEFAULT_MAX_ATTEMPTS,
            csrf_token: None,
        }
    }
}

impl TrackerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                      | Default                                     |
    /// |------------------------------|---------------------------------------------|
    /// | `JOBPULSE_BASE_URL`          | `http://localhost:5000`                     |
    /// | `JOBPULSE_WS_URL`            | unset (push disabled)                       |
    /// | `JOBPULSE_POLL_INTERVAL_MS`  | `2000`                                      |
    /// | `JOBPULSE_POLL_MAX_ATTEMPTS` | `5` (5 to 10)                               |
    /// | `JOBPULSE_PUSH_ENABLED`      | `true` when `JOBPULSE_WS_URL` is set        |
    /// | `JOBPULSE_POLLING_ENABLED`   | `true`                                      |
    /// | `JOBPULSE_STATUS_ROUTES`     | `/progress/{id},/api/progress/{id},/status/{id}` |
    /// | `JOBPULSE_OPERATION_CLASS`   | `document`                                  |
    /// | `JOBPULSE_CSRF_TOKEN`        | unset                                       |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable
    /// source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        if let Some(base_url) = var("JOBPULSE_BASE_URL") {
            config.base_url = base_url.trim_end_matches('/').to_string();
        }
        config.ws_url = var("JOBPULSE_WS_URL");

        if let Some(raw) = var("JOBPULSE_POLL_INTERVAL_MS") {
            let ms: u64 = parse_number("JOBPULSE_POLL_INTERVAL_MS", &raw)?;
            if ms == 0 {
                return Err(ConfigError::Invalid {
                    key: "JOBPULSE_POLL_INTERVAL_MS",
                    value: raw,
                    reason: "must be greater than zero".into(),
                });
            }
            config.transport.poll_interval = Duration::from_millis(ms);
        }

        if let Some(raw) = var("JOBPULSE_POLL_MAX_ATTEMPTS") {
            let attempts: u32 = parse_number("JOBPULSE_POLL_MAX_ATTEMPTS", &raw)?;
            if !POLL_MAX_ATTEMPTS_RANGE.contains(&attempts) {
                return Err(ConfigError::Invalid {
                    key: "JOBPULSE_POLL_MAX_ATTEMPTS",
                    value: raw,
                    reason: format!(
                        "must be between {} and {}",
                        POLL_MAX_ATTEMPTS_RANGE.start(),
                        POLL_MAX_ATTEMPTS_RANGE.end()
                    ),
                });
            }
            config.transport.poll_max_attempts = attempts;
        }

        config.transport.push_enabled = match var("JOBPULSE_PUSH_ENABLED") {
            Some(raw) => parse_bool("JOBPULSE_PUSH_ENABLED", &raw)?,
            None => config.ws_url.is_some(),
        };
        if let Some(raw) = var("JOBPULSE_POLLING_ENABLED") {
            config.transport.polling_enabled = parse_bool("JOBPULSE_POLLING_ENABLED", &raw)?;
        }

        if let Some(raw) = var("JOBPULSE_STATUS_ROUTES") {
            let routes: Vec<String> = raw
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if !routes.is_empty() {
                config.status_routes = routes;
            }
        }

        if let Some(raw) = var("JOBPULSE_OPERATION_CLASS") {
            config.operation_class =
                OperationClass::from_name(&raw).ok_or_else(|| ConfigError::Invalid {
                    key: "JOBPULSE_OPERATION_CLASS",
                    value: raw.clone(),
                    reason: "expected `document` or `training`".into(),
                })?;
        }

        config.csrf_token = var("JOBPULSE_CSRF_TOKEN");

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.transport.push_enabled && self.ws_url.is_none() {
            return Err(ConfigError::Inconsistent(
                "push is enabled but no WebSocket URL is configured".into(),
            ));
        }
        if !self.transport.push_enabled && !self.transport.polling_enabled {
            return Err(ConfigError::Inconsistent(
                "at least one of push and polling must be enabled".into(),
            ));
        }
        if self.tick_interval.is_zero() {
            return Err(ConfigError::Inconsistent("tick interval must be non-zero".into()));
        }
        if self.status_routes.is_empty() {
            return Err(ConfigError::Inconsistent("no status routes configured".into()));
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

fn parse_bool(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value: raw.to_string(),
            reason: "expected a boolean".into(),
        }),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{key}={value:?} is invalid: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("Inconsistent configuration: {0}")]
    Inconsistent(String),
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<TrackerConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        TrackerConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_poll_only() {
        let config = load(&[]).unwrap();
        assert_eq!(config.base_url, "http://localhost:5000");
        assert!(!config.transport.push_enabled);
        assert!(config.transport.polling_enabled);
        assert_eq!(config.transport.poll_max_attempts, 5);
        assert_eq!(config.tick_interval, Duration::from_millis(500));
        assert_eq!(config.status_routes.len(), 3);
    }

    #[test]
    fn ws_url_enables_push() {
        let config = load(&[
            ("JOBPULSE_WS_URL", "ws://localhost:5000/ws"),
            ("JOBPULSE_POLL_INTERVAL_MS", "750"),
            ("JOBPULSE_OPERATION_CLASS", "training"),
            ("JOBPULSE_STATUS_ROUTES", "/api/v2/jobs/{id}, /progress/{id}"),
        ])
        .unwrap();
        assert!(config.transport.push_enabled);
        assert_eq!(config.transport.poll_interval, Duration::from_millis(750));
        assert_eq!(config.operation_class, OperationClass::Training);
        assert_eq!(config.status_routes, vec!["/api/v2/jobs/{id}", "/progress/{id}"]);
    }

    #[test]
    fn poll_ceiling_outside_range_is_rejected() {
        assert_matches!(
            load(&[("JOBPULSE_POLL_MAX_ATTEMPTS", "3")]),
            Err(ConfigError::Invalid { key: "JOBPULSE_POLL_MAX_ATTEMPTS", .. })
        );
        assert_eq!(
            load(&[("JOBPULSE_POLL_MAX_ATTEMPTS", "10")])
                .unwrap()
                .transport
                .poll_max_attempts,
            10
        );
    }

    #[test]
    fn push_without_url_is_inconsistent() {
        assert_matches!(
            load(&[("JOBPULSE_PUSH_ENABLED", "yes")]),
            Err(ConfigError::Inconsistent(_))
        );
    }

    #[test]
    fn both_transports_disabled_is_inconsistent() {
        assert_matches!(
            load(&[("JOBPULSE_POLLING_ENABLED", "false")]),
            Err(ConfigError::Inconsistent(_))
        );
    }

    #[test]
    fn zero_tick_interval_is_rejected() {
        let config = TrackerConfig {
            tick_interval: Duration::ZERO,
            ..TrackerConfig::default()
        };
        assert_matches!(config.validate(), Err(ConfigError::Inconsistent(_)));
        assert!(TrackerConfig::default().validate().is_ok());
    }

    #[test]
    fn garbage_values_are_reported() {
        assert_matches!(
            load(&[("JOBPULSE_POLL_INTERVAL_MS", "soon")]),
            Err(ConfigError::Invalid { .. })
        );
        assert_matches!(
            load(&[("JOBPULSE_OPERATION_CLASS", "video")]),
            Err(ConfigError::Invalid { .. })
        );
    }
}
