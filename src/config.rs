//! Configuration loading and validation.
//!
//! The daemon takes a single configuration file; its keys cover the
//! authoritative job database, the failure-limit policy, and the path
//! schemes for the per-user result log stores.

use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;

fn default_request_timeout() -> u64 {
    30
}

/// Daemon configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Job database host.
    pub mysql_host: String,
    /// Job database user.
    pub mysql_user: String,
    /// Job database password.
    pub mysql_pass: String,
    /// Job database schema name.
    pub mysql_db: String,
    /// Optional Unix socket path; used instead of TCP when non-empty.
    #[serde(default)]
    pub mysql_sock: String,
    /// Consecutive-failure limit before a job is auto-disabled.
    pub max_failures: i32,
    /// Per-user store directory scheme; `%u` is replaced with the
    /// hex-bucketed user id.
    pub user_db_file_path_scheme: String,
    /// Per-user store file name scheme; `%m` and `%d` are replaced with
    /// the planned month and day.
    pub user_db_file_name_scheme: String,
    /// Per-request HTTP timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl AppConfig {
    /// Load and validate the configuration file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, a required
    /// key is missing, or a value fails validation.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config: Self = config::Config::builder()
            .add_source(config::File::from(path))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Validate loaded values.
    ///
    /// The path scheme must contain `%u`; without it every user would
    /// share one store directory. A name scheme without `%m`/`%d` is
    /// legal (one file per user forever) but almost always a mistake,
    /// so it is only warned about.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.user_db_file_path_scheme.contains("%u") {
            return Err(ConfigError::invalid(
                "user_db_file_path_scheme does not contain %u",
                "Use a scheme like /var/lib/chronod/%u so each user gets its own directory",
            ));
        }

        if !self.user_db_file_name_scheme.contains("%m")
            || !self.user_db_file_name_scheme.contains("%d")
        {
            tracing::warn!(
                scheme = %self.user_db_file_name_scheme,
                "user_db_file_name_scheme has no %m/%d placeholder, all days share one file"
            );
        }

        if self.max_failures < 0 {
            return Err(ConfigError::invalid(
                "max_failures is negative",
                "Set max_failures to 0 or a positive failure limit",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    const VALID: &str = r#"
mysql_host = "localhost"
mysql_user = "chronod"
mysql_pass = "secret"
mysql_db = "cron"
mysql_sock = ""
max_failures = 5
user_db_file_path_scheme = "/var/lib/chronod/%u"
user_db_file_name_scheme = "joblog-%m-%d.db"
"#;

    #[test]
    fn test_load_valid_config() {
        let file = write_config(VALID);
        let config = AppConfig::load(file.path()).unwrap();

        assert_eq!(config.mysql_host, "localhost");
        assert_eq!(config.max_failures, 5);
        assert_eq!(config.request_timeout_secs, 30);
        assert!(config.mysql_sock.is_empty());
    }

    #[test]
    fn test_missing_key_is_an_error() {
        let file = write_config("mysql_host = \"localhost\"\n");
        assert!(AppConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_path_scheme_requires_user_placeholder() {
        let broken = VALID.replace("/var/lib/chronod/%u", "/var/lib/chronod");
        let file = write_config(&broken);
        let error = AppConfig::load(file.path()).unwrap_err();
        assert!(error.to_string().contains("%u"));
    }

    #[test]
    fn test_negative_max_failures_rejected() {
        let broken = VALID.replace("max_failures = 5", "max_failures = -1");
        let file = write_config(&broken);
        assert!(AppConfig::load(file.path()).is_err());
    }
}
