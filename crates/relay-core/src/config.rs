//! Configuration management for relay.toml

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE: &str = "relay.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub peer: PeerConfig,
    pub model: ModelConfig,
    pub agent: AgentSettings,
    pub server: ServerConfig,
    pub transcripts: TranscriptConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// Path to the peer script; `.py` runs under `python`, `.js` under `node`
    pub script: Option<PathBuf>,
    pub python: String,
    pub node: String,
    pub handshake_timeout_secs: u64,
    pub call_timeout_secs: u64,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            script: None,
            python: "python".to_string(),
            node: "node".to_string(),
            handshake_timeout_secs: 30,
            call_timeout_secs: 60,
        }
    }
}

impl PeerConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub name: String,
    pub max_tokens: u32,
    pub base_url: String,
    pub timeout_secs: u64,
    /// Name of the environment variable holding the API key
    pub api_key_env: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "claude-3-5-sonnet-20241022".to_string(),
            max_tokens: 1000,
            base_url: "https://api.anthropic.com".to_string(),
            timeout_secs: 120,
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
        }
    }
}

impl ModelConfig {
    /// Read the API key from the configured environment variable.
    pub fn api_key(&self) -> Result<String> {
        match std::env::var(&self.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => anyhow::bail!(
                "{} is not set; the model API key must come from the environment",
                self.api_key_env
            ),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    pub max_turns: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self { max_turns: 16 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TranscriptConfig {
    pub dir: PathBuf,
}

impl Default for TranscriptConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("conversations"),
        }
    }
}

impl Config {
    /// Load relay.toml if one can be found, otherwise fall back to defaults
    pub fn load() -> Result<Self> {
        match Self::find_config_path() {
            Some(path) => Self::load_from(path),
            None => Ok(Self::default()),
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read {}", path.as_ref().display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.as_ref().display()))
    }

    /// Find relay.toml in the current directory, its parents, then the user config dir
    pub fn find_config_path() -> Option<PathBuf> {
        if let Ok(mut current) = std::env::current_dir() {
            for _ in 0..10 {
                let candidate = current.join(CONFIG_FILE);
                if candidate.exists() {
                    return Some(candidate);
                }
                if !current.pop() {
                    break;
                }
            }
        }

        dirs::config_dir()
            .map(|dir| dir.join("mcp-relay").join(CONFIG_FILE))
            .filter(|path| path.exists())
    }

    /// Address the HTTP front door binds to
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let toml = r#"
[peer]
script = "servers/weather.py"
call_timeout_secs = 5

[model]
name = "claude-3-5-haiku-20241022"
max_tokens = 2048

[agent]
max_turns = 4

[server]
port = 9000

[transcripts]
dir = "/tmp/transcripts"
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(
            config.peer.script.as_deref(),
            Some(Path::new("servers/weather.py"))
        );
        assert_eq!(config.peer.call_timeout(), Duration::from_secs(5));
        assert_eq!(config.peer.handshake_timeout_secs, 30);
        assert_eq!(config.model.name, "claude-3-5-haiku-20241022");
        assert_eq!(config.model.max_tokens, 2048);
        assert_eq!(config.model.api_key_env, "ANTHROPIC_API_KEY");
        assert_eq!(config.agent.max_turns, 4);
        assert_eq!(config.bind_addr(), "0.0.0.0:9000");
        assert_eq!(config.transcripts.dir, PathBuf::from("/tmp/transcripts"));
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.peer.script.is_none());
        assert_eq!(config.peer.python, "python");
        assert_eq!(config.model.max_tokens, 1000);
        assert_eq!(config.agent.max_turns, 16);
        assert_eq!(config.bind_addr(), "0.0.0.0:8000");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "[agent]\nmax_turns = 3\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.agent.max_turns, 3);
    }

    #[test]
    fn test_missing_api_key_is_an_error() {
        let model = ModelConfig {
            api_key_env: "MCP_RELAY_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
            ..ModelConfig::default()
        };
        let err = model.api_key().unwrap_err();
        assert!(err.to_string().contains("MCP_RELAY_TEST_KEY_THAT_IS_NEVER_SET"));
    }
}
