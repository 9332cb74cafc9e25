//! YAML configuration of the daemon.
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::AuthParameters;
use crate::database::DatabaseParameters;
use crate::server::ServerParameters;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read the configuration from \'{path}\': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Cannot deserialize the configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Token lifetime of {0} minutes is not a valid positive duration")]
    InvalidTokenLifetime(i64),
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Configuration {
    pub server_parameters: ServerParameters,
    pub auth_parameters: AuthParameters,
    /// Observations are kept in memory when no database is configured.
    #[serde(default)]
    pub database_connection_parameters: Option<DatabaseParameters>,
}

impl Configuration {
    pub fn from_yaml(yaml: &str) -> Result<Configuration, ConfigError> {
        let configuration = serde_yaml::from_str::<Configuration>(yaml)?;
        if configuration.auth_parameters.token_lifetime().is_none() {
            return Err(ConfigError::InvalidTokenLifetime(configuration.auth_parameters.token_lifetime_minutes));
        }
        Ok(configuration)
    }

    pub fn load(path: &Path) -> Result<Configuration, ConfigError> {
        let io_error = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };

        let mut configuration_file = File::open(path).map_err(io_error)?;
        let mut configuration_string = String::new();
        configuration_file
            .read_to_string(&mut configuration_string)
            .map_err(io_error)?;

        Configuration::from_yaml(&configuration_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_configuration_uses_defaults() {
        let configuration = Configuration::from_yaml(
            r#"
server_parameters:
  address: 127.0.0.1
  port: 5000
auth_parameters:
  username: operator
  password: password
  secret: secret
"#,
        )
        .unwrap();

        assert_eq!(configuration.server_parameters.port, 5000);
        assert_eq!(configuration.auth_parameters.token_lifetime_minutes, 30);
        assert!(configuration.auth_parameters.protect_all_writes);
        assert!(!configuration.auth_parameters.legacy_token_rejection);
        assert!(configuration.database_connection_parameters.is_none());
    }

    #[test]
    fn database_section_is_parsed() {
        let configuration = Configuration::from_yaml(
            r#"
server_parameters:
  address: 0.0.0.0
  port: 8080
auth_parameters:
  username: operator
  password: password
  secret: secret
  legacy_token_rejection: true
database_connection_parameters:
  hostname: localhost
  port: 5432
  username: observd
  password: observd
  database: observations
  tls_enable: false
"#,
        )
        .unwrap();

        let database = configuration.database_connection_parameters.unwrap();
        assert_eq!(database.database, "observations");
        assert!(database.tls_params.is_none());
        assert!(configuration.auth_parameters.legacy_token_rejection);
    }

    #[test]
    fn out_of_range_token_lifetime_is_rejected() {
        for minutes in ["0", "-5", "9223372036854775807"].iter() {
            let yaml = format!(
                r#"
server_parameters:
  address: 127.0.0.1
  port: 5000
auth_parameters:
  username: operator
  password: password
  secret: secret
  token_lifetime_minutes: {}
"#,
                minutes
            );
            let err = Configuration::from_yaml(&yaml).unwrap_err();
            assert!(matches!(err, ConfigError::InvalidTokenLifetime(_)));
        }
    }

    #[test]
    fn missing_file_is_reported() {
        let err = Configuration::load(Path::new("/nonexistent/observd.yml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
