// Configuration constants for the server

use std::{str::FromStr, time::Duration};

use crate::validation::DEFAULT_MAX_FRAME_BYTES;

/// What the server tells a client whose frame was not admitted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectPolicy {
    /// Say nothing; the client paces itself with its own timeout.
    Drop,
    /// Answer with a `status` event of `busy` or `throttled`.
    Signal,
}

impl FromStr for RejectPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drop" | "silent" => Ok(RejectPolicy::Drop),
            "signal" | "status" => Ok(RejectPolicy::Signal),
            other => Err(format!("unknown reject policy: {other}")),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub port: u16,
    pub rate_limit_per_minute: u32,
    pub request_timeout_secs: u64,
    pub cors_allowed_origins: Option<Vec<String>>,
    pub min_frame_interval_ms: u64,
    pub detection_timeout_secs: u64,
    pub synthesis_timeout_secs: u64,
    pub reject_policy: RejectPolicy,
    pub max_frame_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 5000,
            rate_limit_per_minute: 120,
            request_timeout_secs: 30,
            cors_allowed_origins: None,
            min_frame_interval_ms: 1000,
            detection_timeout_secs: 15,
            synthesis_timeout_secs: 15,
            reject_policy: RejectPolicy::Drop,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let cors_allowed_origins = std::env::var("CORS_ALLOWED_ORIGINS")
            .ok()
            .map(|origins| {
                origins
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            });

        Self {
            port: env_or("PORT", defaults.port),
            rate_limit_per_minute: env_or("RATE_LIMIT_PER_MINUTE", defaults.rate_limit_per_minute),
            request_timeout_secs: env_or("REQUEST_TIMEOUT_SECS", defaults.request_timeout_secs),
            cors_allowed_origins,
            min_frame_interval_ms: env_or("MIN_FRAME_INTERVAL_MS", defaults.min_frame_interval_ms),
            detection_timeout_secs: env_or("DETECTION_TIMEOUT_SECS", defaults.detection_timeout_secs),
            synthesis_timeout_secs: env_or("SYNTHESIS_TIMEOUT_SECS", defaults.synthesis_timeout_secs),
            reject_policy: env_or("FRAME_REJECT_POLICY", defaults.reject_policy),
            max_frame_bytes: env_or("MAX_FRAME_BYTES", defaults.max_frame_bytes),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn min_frame_interval(&self) -> Duration {
        Duration::from_millis(self.min_frame_interval_ms)
    }

    pub fn detection_timeout(&self) -> Duration {
        Duration::from_secs(self.detection_timeout_secs)
    }

    pub fn synthesis_timeout(&self) -> Duration {
        Duration::from_secs(self.synthesis_timeout_secs)
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!("Ignoring invalid value for {}: {:?}", key, raw);
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_pacing() {
        let config = ServerConfig::default();
        assert_eq!(config.min_frame_interval(), Duration::from_secs(1));
        assert_eq!(config.detection_timeout(), Duration::from_secs(15));
        assert_eq!(config.reject_policy, RejectPolicy::Drop);
    }

    #[test]
    fn test_reject_policy_parsing() {
        assert_eq!("drop".parse::<RejectPolicy>(), Ok(RejectPolicy::Drop));
        assert_eq!(" Signal ".parse::<RejectPolicy>(), Ok(RejectPolicy::Signal));
        assert!("queue".parse::<RejectPolicy>().is_err());
    }
}
