//! Runtime configuration.
//!
//! Values come from, in increasing precedence: built-in defaults from
//! [`crate::constants`], the optional `~/.config/veil/config.json` file, and
//! command-line flags.

use crate::constants;
use color_eyre::eyre::{bail, WrapErr};
use color_eyre::Result;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Resolved settings for one run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Interval between telemetry samples, in milliseconds.
    pub sample_interval_ms: u64,
    /// Tunnel establishment timeout, in milliseconds.
    pub connect_timeout_ms: u64,
    /// IP-echo endpoint used for public address lookups.
    pub ip_lookup_url: String,
    /// Catalog file replacing the built-in server list.
    pub catalog: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sample_interval_ms: duration_ms(constants::DEFAULT_SAMPLE_INTERVAL),
            connect_timeout_ms: duration_ms(constants::DEFAULT_CONNECT_TIMEOUT),
            ip_lookup_url: constants::IP_LOOKUP_API.to_string(),
            catalog: None,
        }
    }
}

impl Config {
    /// Loads the user config file if it exists, defaults otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        match crate::utils::get_app_config_dir() {
            Some(dir) => {
                let path = dir.join(constants::CONFIG_FILE_NAME);
                if path.exists() {
                    Self::from_path(&path)
                } else {
                    Ok(Self::default())
                }
            }
            None => Ok(Self::default()),
        }
    }

    /// Loads and validates a config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("reading config {}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .wrap_err_with(|| format!("parsing config {}", path.display()))?;
        config.validate()?;
        tracing::debug!(path = %path.display(), "config loaded");
        Ok(config)
    }

    /// Checks value ranges and the endpoint URL.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if self.sample_interval_ms == 0 {
            bail!("sample_interval_ms must be greater than zero");
        }
        if self.connect_timeout_ms == 0 {
            bail!("connect_timeout_ms must be greater than zero");
        }
        let url = self.ip_lookup_endpoint()?;
        if !matches!(url.scheme(), "http" | "https") {
            bail!("ip_lookup_url must be http or https, got {}", url.scheme());
        }
        Ok(())
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Parsed IP lookup endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if `ip_lookup_url` is not a valid URL.
    pub fn ip_lookup_endpoint(&self) -> Result<Url> {
        Url::parse(&self.ip_lookup_url)
            .wrap_err_with(|| format!("invalid ip_lookup_url {:?}", self.ip_lookup_url))
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.sample_interval(), Duration::from_secs(1));
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert_eq!(
            config.ip_lookup_endpoint().unwrap().host_str(),
            Some("api.ipify.org")
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: Config = serde_json::from_str(r#"{"sample_interval_ms": 250}"#).unwrap();
        assert_eq!(config.sample_interval(), Duration::from_millis(250));
        assert_eq!(config.ip_lookup_url, constants::IP_LOOKUP_API);
        assert!(config.catalog.is_none());
    }

    #[test]
    fn test_unknown_keys_rejected() {
        assert!(serde_json::from_str::<Config>(r#"{"sample_interval": 250}"#).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let zero = Config {
            sample_interval_ms: 0,
            ..Config::default()
        };
        assert!(zero.validate().is_err());

        let ftp = Config {
            ip_lookup_url: "ftp://example.com/ip".to_string(),
            ..Config::default()
        };
        assert!(ftp.validate().is_err());

        let garbage = Config {
            ip_lookup_url: "not a url".to_string(),
            ..Config::default()
        };
        assert!(garbage.validate().is_err());
    }

    #[test]
    fn test_from_path() {
        let path = std::env::temp_dir().join(format!("veil-config-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"connect_timeout_ms": 1500, "catalog": "/tmp/servers.json"}"#)
            .unwrap();
        let config = Config::from_path(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(config.connect_timeout(), Duration::from_millis(1500));
        assert_eq!(config.catalog, Some(PathBuf::from("/tmp/servers.json")));
    }

    #[test]
    fn test_from_path_missing_file() {
        assert!(Config::from_path(Path::new("/nonexistent/veil/config.json")).is_err());
    }
}
