use std::fmt::{Display, Formatter};
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;

use serde::Deserialize;

use crate::constants::*;
use crate::descriptor::ConfigError;

#[derive(Debug, Deserialize)]
struct ConfigInt {
    sock_path: Option<String>,
    broker_dir: Option<String>,
    conn_timeout: Option<u64>,
    authorize_timeout: Option<u64>,
    max_pre_auth_users: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct AuthgatedConfig {
    pub sock_path: String,
    pub broker_dir: String,
    pub conn_timeout: u64,
    pub authorize_timeout: u64,
    pub max_pre_auth_users: usize,
}

impl Default for AuthgatedConfig {
    fn default() -> Self {
        AuthgatedConfig::new()
    }
}

impl Display for AuthgatedConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "sock_path: {}", self.sock_path)?;
        writeln!(f, "broker_dir: {}", self.broker_dir)?;
        writeln!(f, "conn_timeout: {}", self.conn_timeout)?;
        writeln!(f, "authorize_timeout: {}", self.authorize_timeout)?;
        writeln!(f, "max_pre_auth_users: {}", self.max_pre_auth_users)
    }
}

impl AuthgatedConfig {
    pub fn new() -> Self {
        AuthgatedConfig {
            sock_path: DEFAULT_SOCK_PATH.to_string(),
            broker_dir: DEFAULT_BROKER_DIR.to_string(),
            conn_timeout: DEFAULT_CONN_TIMEOUT,
            authorize_timeout: DEFAULT_AUTHORIZE_TIMEOUT,
            max_pre_auth_users: MAX_PREAUTH_USERS,
        }
    }

    /// Layer values from `config_path` over the current configuration. A
    /// missing or unreadable file leaves the configuration untouched.
    pub fn read_options_from_optional_config<P: AsRef<Path> + std::fmt::Debug>(
        self,
        config_path: P,
    ) -> Result<Self, ConfigError> {
        debug!("Attempting to load configuration from {:#?}", &config_path);
        let mut f = match File::open(&config_path) {
            Ok(f) => {
                debug!("Successfully opened configuration file {:#?}", &config_path);
                f
            }
            Err(e) => {
                match e.kind() {
                    ErrorKind::NotFound => {
                        debug!(
                            "Configuration file {:#?} not found, skipping.",
                            &config_path
                        );
                    }
                    ErrorKind::PermissionDenied => {
                        warn!(
                            "Permission denied loading configuration file {:#?}, skipping.",
                            &config_path
                        );
                    }
                    _ => {
                        debug!(
                            "Unable to open config file {:#?} [{:?}], skipping ...",
                            &config_path, e
                        );
                    }
                };
                return Ok(self);
            }
        };

        let mut contents = String::new();
        f.read_to_string(&mut contents)?;

        let config: ConfigInt = toml::from_str(contents.as_str())?;
        Ok(self.apply(config))
    }

    fn apply(self, config: ConfigInt) -> Self {
        AuthgatedConfig {
            sock_path: config.sock_path.unwrap_or(self.sock_path),
            broker_dir: config.broker_dir.unwrap_or(self.broker_dir),
            conn_timeout: config.conn_timeout.unwrap_or(self.conn_timeout),
            authorize_timeout: config.authorize_timeout.unwrap_or(self.authorize_timeout),
            max_pre_auth_users: config
                .max_pre_auth_users
                .unwrap_or(self.max_pre_auth_users),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use super::*;

    #[test]
    fn test_missing_file_keeps_defaults() {
        let cfg = AuthgatedConfig::new()
            .read_options_from_optional_config("/this/path/does/not/exist.toml")
            .expect("missing config must not be an error");
        assert_eq!(cfg.sock_path, DEFAULT_SOCK_PATH);
        assert_eq!(cfg.max_pre_auth_users, MAX_PREAUTH_USERS);
    }

    #[test]
    fn test_partial_config_overlays_defaults() {
        let config: ConfigInt = toml::from_str(
            "sock_path = \"/tmp/authgated.sock\"\nauthorize_timeout = 30\n",
        )
        .expect("failed to parse config");
        let cfg = AuthgatedConfig::new().apply(config);
        assert_eq!(cfg.sock_path, "/tmp/authgated.sock");
        assert_eq!(cfg.authorize_timeout, 30);
        // Untouched keys keep their defaults.
        assert_eq!(cfg.broker_dir, DEFAULT_BROKER_DIR);
        assert_eq!(cfg.conn_timeout, DEFAULT_CONN_TIMEOUT);
    }
}
