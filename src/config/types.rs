//! Core configuration types and loading.

use perch_proto::Address;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

use super::roster::RosterConfig;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server identity and listeners.
    pub server: ServerConfig,
    /// Usernames registered on the local domain.
    #[serde(default)]
    pub accounts: Vec<String>,
    /// Roster and presence behavior.
    #[serde(default)]
    pub roster: RosterConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

/// Server identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Domain this node serves (e.g., "perch.example.org"). Parsed and
    /// validated at load time; the rest of the daemon treats it as the
    /// server's own address.
    #[serde(deserialize_with = "domain_address")]
    pub domain: Address,
    /// Client listener address.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    /// Prometheus metrics listener. Disabled when absent.
    pub metrics_listen: Option<SocketAddr>,
}

fn default_listen() -> SocketAddr {
    "127.0.0.1:5333".parse().unwrap()
}

/// A server domain must be a plain domain: no account part, no resource.
fn domain_address<'de, D>(de: D) -> Result<Address, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(de)?;
    let address: Address = raw.parse().map_err(serde::de::Error::custom)?;
    if address.local().is_some() || address.resource().is_some() {
        return Err(serde::de::Error::custom(format!(
            "server domain must be a plain domain, got {raw:?}"
        )));
    }
    Ok(address)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_minimal_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[server]
domain = "perch.example.org"

[roster]
versioning = false
"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.server.domain.to_string(), "perch.example.org");
        assert_eq!(config.server.listen, default_listen());
        assert!(config.server.metrics_listen.is_none());
        assert!(!config.roster.versioning);
        assert!(config.roster.offline_flood);
        assert!(config.accounts.is_empty());
    }

    #[test]
    fn rejects_account_shaped_domain() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[server]
domain = "alice@example.org"
"#
        )
        .unwrap();
        assert!(matches!(
            Config::load(file.path()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn rejects_malformed_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[server").unwrap();
        assert!(matches!(
            Config::load(file.path()),
            Err(ConfigError::Parse(_))
        ));
    }
}
