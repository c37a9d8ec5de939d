use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as integer: {source}")]
    ParseInt {
        name: String,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("failed to parse {name} as boolean: {value}")]
    ParseBool { name: String, value: String },
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Local storage
    pub data_dir: PathBuf,

    // Internet Archive
    pub ia_access_key: Option<String>,
    pub ia_secret_key: Option<String>,
    pub ia_s3_url: String,
    pub ia_base_url: String,
    pub upload_retries: u32,
    pub upload_retry_sleep: Duration,
    pub upload_workers: usize,

    // HTTP
    pub request_timeout: Duration,
    /// Overrides each site's own politeness delay when set.
    pub sleep_between_requests: Option<Duration>,

    // Run behaviour
    pub force_refetch: bool,
    pub dry_run: bool,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if an environment variable is present but invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            // Local storage
            data_dir: PathBuf::from(env_or_default("DATA_DIR", "./data")),

            // Internet Archive
            ia_access_key: optional_env("IA_ACCESS_KEY"),
            ia_secret_key: optional_env("IA_SECRET_KEY"),
            ia_s3_url: env_or_default("IA_S3_URL", "https://s3.us.archive.org"),
            ia_base_url: env_or_default("IA_BASE_URL", "https://archive.org"),
            upload_retries: parse_env_u32("UPLOAD_RETRIES", 3)?,
            upload_retry_sleep: Duration::from_secs(parse_env_u64("UPLOAD_RETRY_SLEEP_SECS", 10)?),
            upload_workers: parse_env_usize("UPLOAD_WORKERS", 10)?,

            // HTTP
            request_timeout: Duration::from_secs(parse_env_u64("REQUEST_TIMEOUT_SECS", 30)?),
            sleep_between_requests: optional_env("SLEEP_BETWEEN_REQUESTS_MS")
                .map(|v| {
                    v.parse::<u64>()
                        .map(Duration::from_millis)
                        .map_err(|e| ConfigError::ParseInt {
                            name: "SLEEP_BETWEEN_REQUESTS_MS".to_string(),
                            source: e,
                        })
                })
                .transpose()?,

            // Run behaviour
            force_refetch: parse_env_bool("FORCE_REFETCH", false)?,
            dry_run: parse_env_bool("DRY_RUN", false)?,
        })
    }

    /// Validate that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.upload_workers == 0 {
            return Err(ConfigError::InvalidValue {
                name: "UPLOAD_WORKERS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.upload_retries == 0 {
            return Err(ConfigError::InvalidValue {
                name: "UPLOAD_RETRIES".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                name: "REQUEST_TIMEOUT_SECS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if !self.dry_run {
            if self.ia_access_key.is_none() {
                return Err(ConfigError::MissingEnvVar("IA_ACCESS_KEY".to_string()));
            }
            if self.ia_secret_key.is_none() {
                return Err(ConfigError::MissingEnvVar("IA_SECRET_KEY".to_string()));
            }
        }
        Ok(())
    }

    /// Directory holding one site's raw files and state.
    #[must_use]
    pub fn site_dir(&self, site_id: &str) -> PathBuf {
        self.data_dir.join(site_id)
    }

    /// Configuration suitable for tests: no sleeps, a single retry, dummy credentials.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            data_dir: PathBuf::from("./data-test"),
            ia_access_key: Some("test-access".to_string()),
            ia_secret_key: Some("test-secret".to_string()),
            ia_s3_url: "http://127.0.0.1:9".to_string(),
            ia_base_url: "http://127.0.0.1:9".to_string(),
            upload_retries: 1,
            upload_retry_sleep: Duration::ZERO,
            upload_workers: 2,
            request_timeout: Duration::from_secs(5),
            sleep_between_requests: Some(Duration::ZERO),
            force_refetch: false,
            dry_run: false,
        }
    }
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_or_default(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_u32(name: &str, default: u32) -> Result<u32, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_usize(name: &str, default: usize) -> Result<usize, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

/// Parse a boolean toggle such as `true`, `1`, `yes` or `off`.
pub fn parse_bool_str(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_env_bool(name: &str, default: bool) -> Result<bool, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => parse_bool_str(&val).ok_or(ConfigError::ParseBool {
            name: name.to_string(),
            value: val,
        }),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_parse_bool() {
        assert!(parse_env_bool("NONEXISTENT_VAR", true).unwrap());
        assert!(!parse_env_bool("NONEXISTENT_VAR", false).unwrap());
        assert_eq!(parse_bool_str("YES"), Some(true));
        assert_eq!(parse_bool_str("0"), Some(false));
        assert_eq!(parse_bool_str("maybe"), None);
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        for var in [
            "DATA_DIR",
            "IA_ACCESS_KEY",
            "IA_SECRET_KEY",
            "UPLOAD_RETRIES",
            "UPLOAD_WORKERS",
            "SLEEP_BETWEEN_REQUESTS_MS",
            "FORCE_REFETCH",
            "DRY_RUN",
        ] {
            std::env::remove_var(var);
        }

        let config = Config::from_env().unwrap();
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert_eq!(config.upload_retries, 3);
        assert_eq!(config.upload_retry_sleep, Duration::from_secs(10));
        assert_eq!(config.upload_workers, 10);
        assert!(config.sleep_between_requests.is_none());
        assert!(!config.force_refetch);

        // No credentials and not a dry run
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingEnvVar(ref name)) if name == "IA_ACCESS_KEY"
        ));
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        std::env::set_var("FORCE_REFETCH", "yes");
        std::env::set_var("SLEEP_BETWEEN_REQUESTS_MS", "250");
        std::env::set_var("DRY_RUN", "1");

        let config = Config::from_env().unwrap();
        assert!(config.force_refetch);
        assert!(config.dry_run);
        assert_eq!(
            config.sleep_between_requests,
            Some(Duration::from_millis(250))
        );
        assert!(config.validate().is_ok());

        std::env::set_var("FORCE_REFETCH", "perhaps");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::ParseBool { .. })
        ));

        for var in ["FORCE_REFETCH", "SLEEP_BETWEEN_REQUESTS_MS", "DRY_RUN"] {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let config = Config {
            upload_workers: 0,
            ..Config::for_testing()
        };
        assert!(config.validate().is_err());
        assert!(Config::for_testing().validate().is_ok());
    }

    #[test]
    fn test_site_dir() {
        let config = Config {
            data_dir: PathBuf::from("/srv/mirror"),
            ..Config::for_testing()
        };
        assert_eq!(config.site_dir("assam"), PathBuf::from("/srv/mirror/assam"));
    }
}
