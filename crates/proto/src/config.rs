use std::path::Path;

use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

use crate::protocol::{DEFAULT_PORT, MAX_SCOREBOARD};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

fn load_toml<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, ConfigError> {
    let text = std::fs::read_to_string(path.as_ref())?;
    Ok(toml::from_str(&text)?)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetConfig {
    pub hostport: u16,
    pub hostname: String,
    /// Seconds of silence before a connection is dropped.
    pub message_timeout: f64,
    /// Upper bound for `maxplayers`; the pool holds one more for the local client.
    pub max_clients_limit: usize,
    pub listen: bool,
    pub connect_attempts: u32,
    pub connect_attempt_secs: f64,
    pub enable_datagram: bool,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            hostport: DEFAULT_PORT,
            hostname: "UNNAMED".to_string(),
            message_timeout: 300.0,
            max_clients_limit: MAX_SCOREBOARD,
            listen: false,
            connect_attempts: 3,
            connect_attempt_secs: 2.5,
            enable_datagram: true,
        }
    }
}

impl NetConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        load_toml(path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub name: String,
    pub top_color: u8,
    pub bottom_color: u8,
    pub spawn_parms: String,
    pub nolerp: bool,
    pub shownet: bool,
    pub keepalive_interval: f64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: "player".to_string(),
            top_color: 0,
            bottom_color: 0,
            spawn_parms: String::new(),
            nolerp: false,
            shownet: false,
            keepalive_interval: 5.0,
        }
    }
}

impl ClientConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        load_toml(path)
    }

    pub fn color_byte(&self) -> u8 {
        ((self.top_color & 15) << 4) | (self.bottom_color & 15)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub max_clients: usize,
    pub tick_rate: u32,
    pub map: String,
    pub level_name: String,
    pub deathmatch: bool,
    pub models: Vec<String>,
    pub sounds: Vec<String>,
    /// Seconds to keep trying to deliver the final disconnect to every client.
    pub shutdown_deadline: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_clients: 8,
            tick_rate: 20,
            map: "start".to_string(),
            level_name: "Introduction".to_string(),
            deathmatch: true,
            models: vec![
                "maps/start.bsp".to_string(),
                "progs/player.mdl".to_string(),
                "progs/armor.mdl".to_string(),
            ],
            sounds: vec![
                "weapons/ric1.wav".to_string(),
                "items/itembk2.wav".to_string(),
            ],
            shutdown_deadline: 5.0,
        }
    }
}

impl ServerConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        load_toml(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "hostport = 27500").unwrap();
        writeln!(file, "message_timeout = 60.0").unwrap();

        let config = NetConfig::load(file.path()).unwrap();
        assert_eq!(config.hostport, 27500);
        assert_eq!(config.message_timeout, 60.0);
        assert_eq!(config.max_clients_limit, MAX_SCOREBOARD);
    }

    #[test]
    fn test_bad_file_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "hostport = \"nope\"").unwrap();
        assert!(matches!(
            NetConfig::load(file.path()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_color_byte() {
        let config = ClientConfig {
            top_color: 4,
            bottom_color: 13,
            ..Default::default()
        };
        assert_eq!(config.color_byte(), 0x4d);
    }
}
