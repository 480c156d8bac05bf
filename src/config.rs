use std::fs;
use std::net::{AddrParseError, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use url::Url;

const DEFAULT_TYPE_PREFIX: &str = "Platform";
const DEFAULT_THEME: &str = "light";
const DEFAULT_IDLE_WAIT_MS: u64 = 50;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read bridge config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid bind address {value:?}: {source}")]
    InvalidAddress {
        value: String,
        source: AddrParseError,
    },
    #[error("failed to build renderer URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Address the renderer connects to.
    pub bind: SocketAddr,
    /// Implementation prefix stripped from type tags.
    pub type_prefix: String,
    pub wait_for_client_ready: bool,
    pub theme: String,
    pub idle_wait_ms: u64,
    /// Sent to the renderer once it reports ready.
    pub properties: Map<String, Value>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 0)),
            type_prefix: DEFAULT_TYPE_PREFIX.into(),
            wait_for_client_ready: true,
            theme: DEFAULT_THEME.into(),
            idle_wait_ms: DEFAULT_IDLE_WAIT_MS,
            properties: Map::new(),
        }
    }
}

impl BridgeConfig {
    /// Reads `config_path` if it exists, falling back to defaults.
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        match config_path {
            Some(path) if path.exists() => {
                let contents = fs::read_to_string(path)?;
                Ok(serde_yaml::from_str(&contents)?)
            }
            _ => Ok(Self::default()),
        }
    }

    /// Loads the file named by `BRIDGE_CONFIG`, then applies `BRIDGE_*`
    /// overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::load(lookup("BRIDGE_CONFIG").map(PathBuf::from))?;

        if let Some(value) = lookup("BRIDGE_BIND") {
            config.bind = value
                .parse()
                .map_err(|source| ConfigError::InvalidAddress { value, source })?;
        }
        if let Some(prefix) = lookup("BRIDGE_TYPE_PREFIX") {
            config.type_prefix = prefix;
        }
        if let Some(theme) = lookup("BRIDGE_THEME") {
            config.theme = theme;
        }
        Ok(config)
    }

    pub fn idle_wait(&self) -> Duration {
        Duration::from_millis(self.idle_wait_ms)
    }

    /// Properties sent to the renderer, with the theme folded in.
    pub fn renderer_properties(&self) -> Map<String, Value> {
        let mut properties = self.properties.clone();
        properties
            .entry("theme")
            .or_insert_with(|| Value::String(self.theme.clone()));
        properties
    }

    pub fn endpoint(&self) -> Result<Url, ConfigError> {
        Self::endpoint_for(self.bind)
    }

    /// Renderer URL for an actually bound address.
    pub fn endpoint_for(addr: SocketAddr) -> Result<Url, ConfigError> {
        Ok(Url::parse(&format!("ws://{addr}"))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn loads_default() {
        let config = BridgeConfig::load(None).unwrap();
        assert_eq!(config.bind.to_string(), "127.0.0.1:0");
        assert_eq!(config.type_prefix, "Platform");
        assert!(config.wait_for_client_ready);
        assert_eq!(config.idle_wait(), Duration::from_millis(50));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = BridgeConfig::load(Some(PathBuf::from("/nonexistent/bridge.yaml"))).unwrap();
        assert_eq!(config, BridgeConfig::default());
    }

    #[test]
    fn loads_partial_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "bind: 127.0.0.1:9100\ntheme: dark\nproperties:\n  locale: en\n  scale: 2"
        )
        .unwrap();

        let config = BridgeConfig::load(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(config.bind.port(), 9100);
        assert_eq!(config.theme, "dark");
        assert_eq!(config.type_prefix, "Platform");

        let properties = config.renderer_properties();
        assert_eq!(properties["locale"], "en");
        assert_eq!(properties["scale"], 2);
        assert_eq!(properties["theme"], "dark");
    }

    #[test]
    fn rejects_malformed_yaml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "bind: [unterminated").unwrap();
        assert!(matches!(
            BridgeConfig::load(Some(file.path().to_path_buf())),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn environment_overrides_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "theme: dark").unwrap();
        let vars: HashMap<&str, String> = HashMap::from([
            ("BRIDGE_CONFIG", file.path().display().to_string()),
            ("BRIDGE_BIND", "0.0.0.0:7000".to_string()),
            ("BRIDGE_THEME", "contrast".to_string()),
        ]);

        let config = BridgeConfig::from_lookup(|key| vars.get(key).cloned()).unwrap();
        assert_eq!(config.bind.port(), 7000);
        assert_eq!(config.theme, "contrast");
        assert_eq!(
            config.endpoint().unwrap().as_str(),
            "ws://0.0.0.0:7000/"
        );
    }

    #[test]
    fn rejects_bad_bind_address() {
        let err = BridgeConfig::from_lookup(|key| {
            (key == "BRIDGE_BIND").then(|| "not-an-addr".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidAddress { ref value, .. } if value == "not-an-addr"));
    }
}
