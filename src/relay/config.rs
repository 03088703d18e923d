// Relay Configuration
//
// String-keyed settings come from the process environment, a flat TOML file,
// or both layered together. Values are read at the point of use so a missing
// operation command only fails that operation.

use crate::relay::error::{RelayError, RelayResult};
use crate::relay::types::CommandKind;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const ALLOWED_USER_ID: &str = "ALLOWED_USER_ID";
pub const ALLOWED_ROLE_ID: &str = "ALLOWED_ROLE_ID";
pub const SSH_HOST: &str = "SSH_HOST";
pub const SSH_PORT: &str = "SSH_PORT";
pub const SSH_USERNAME: &str = "SSH_USERNAME";
pub const SSH_PRIVATE_KEY_BASE64: &str = "SSH_PRIVATE_KEY_BASE64";
pub const SSH_PRIVATE_KEY: &str = "SSH_PRIVATE_KEY";
pub const SSH_PASSPHRASE: &str = "SSH_PASSPHRASE";
pub const SSH_PASSWORD: &str = "SSH_PASSWORD";
pub const SSH_HOST_FINGERPRINT: &str = "SSH_HOST_FINGERPRINT";
pub const RESTART_COMMAND: &str = "RESTART_COMMAND";
pub const STATUS_COMMAND: &str = "STATUS_COMMAND";
pub const BROADCAST_COMMAND: &str = "BROADCAST_COMMAND";
pub const ADMIN_COMMAND: &str = "ADMIN_COMMAND";

/// Token replaced by the caller-supplied text in broadcast and admin templates
pub const MESSAGE_PLACEHOLDER: &str = "{message}";

const CONFIG_DIR_NAME: &str = "remote-admin-relay";
const CONFIG_FILE_NAME: &str = "relay.toml";

/// Source of string-keyed settings
pub trait ConfigProvider: Send + Sync {
    /// Raw lookup; implementations return whatever is stored under `key`
    fn lookup(&self, key: &str) -> Option<String>;

    /// Value for `key`, treating empty and whitespace-only values as absent
    fn get(&self, key: &str) -> Option<String> {
        self.lookup(key).filter(|value| !value.trim().is_empty())
    }

    /// Value for `key` or a configuration error naming it
    fn require(&self, key: &str) -> RelayResult<String> {
        self.get(key).ok_or_else(|| RelayError::missing_field(key))
    }
}

/// Settings read from the process environment
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvConfig;

impl ConfigProvider for EnvConfig {
    fn lookup(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// In-memory settings, also the parsed form of a configuration file
#[derive(Debug, Clone, Default)]
pub struct MapConfig {
    values: HashMap<String, String>,
}

impl MapConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Parse a flat TOML table. Keys are upper-cased so `ssh_host` and
    /// `SSH_HOST` name the same setting; nested tables are rejected.
    pub fn parse_toml(content: &str) -> RelayResult<Self> {
        let table: toml::Table = toml::from_str(content)?;
        let mut config = Self::new();

        for (key, value) in table {
            let value = match value {
                toml::Value::String(s) => s,
                toml::Value::Integer(i) => i.to_string(),
                toml::Value::Boolean(b) => b.to_string(),
                other => {
                    return Err(RelayError::config(format!(
                        "unsupported value type for {}: {}",
                        key,
                        other.type_str()
                    )));
                }
            };
            config.set(key.to_ascii_uppercase(), value);
        }

        Ok(config)
    }

    /// Load settings from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> RelayResult<Self> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }
}

impl ConfigProvider for MapConfig {
    fn lookup(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

/// Two providers stacked: `primary` wins wherever it has a non-empty value
pub struct LayeredConfig<P, F> {
    primary: P,
    fallback: F,
}

impl<P: ConfigProvider, F: ConfigProvider> LayeredConfig<P, F> {
    pub fn new(primary: P, fallback: F) -> Self {
        Self { primary, fallback }
    }
}

impl<P: ConfigProvider, F: ConfigProvider> ConfigProvider for LayeredConfig<P, F> {
    fn lookup(&self, key: &str) -> Option<String> {
        self.primary.get(key).or_else(|| self.fallback.lookup(key))
    }
}

/// Default location of the configuration file
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

/// Environment over an optional file. A missing default file is not an error;
/// an explicitly requested file must exist.
pub fn load_layered(
    path: Option<&Path>,
) -> RelayResult<LayeredConfig<EnvConfig, MapConfig>> {
    let file = match path {
        Some(path) => {
            log::info!("Loading configuration from {}", path.display());
            MapConfig::load_from_file(path)?
        }
        None => match default_config_path() {
            Some(path) if path.exists() => {
                log::info!("Loading configuration from {}", path.display());
                MapConfig::load_from_file(&path)?
            }
            _ => {
                log::debug!("No configuration file found, using environment only");
                MapConfig::new()
            }
        },
    };

    Ok(LayeredConfig::new(EnvConfig, file))
}

/// Configured remote command for an operation
pub fn command_for(config: &dyn ConfigProvider, kind: CommandKind) -> RelayResult<String> {
    match kind {
        CommandKind::Restart | CommandKind::RestartForce => config.require(RESTART_COMMAND),
        CommandKind::Status => config.require(STATUS_COMMAND),
        CommandKind::AdminMessage => config.require(ADMIN_COMMAND),
    }
}

/// Configured broadcast command with `message` substituted in
pub fn broadcast_command(config: &dyn ConfigProvider, message: &str) -> RelayResult<String> {
    let template = config.require(BROADCAST_COMMAND)?;
    Ok(substitute(&template, message))
}

/// Replace every placeholder token in `template` with `value`, verbatim.
/// A template without the token is returned unchanged.
pub fn substitute(template: &str, value: &str) -> String {
    template.replace(MESSAGE_PLACEHOLDER, value)
}

/// Keys that must be present for the relay to reach the remote host at all
pub fn validate_startup(config: &dyn ConfigProvider) -> Vec<String> {
    let mut missing = Vec::new();

    for key in [SSH_HOST, SSH_USERNAME] {
        if config.get(key).is_none() {
            missing.push(key.to_string());
        }
    }

    let has_credentials = [SSH_PRIVATE_KEY_BASE64, SSH_PRIVATE_KEY, SSH_PASSWORD]
        .iter()
        .any(|key| config.get(key).is_some());
    if !has_credentials {
        missing.push(format!("{} | {} | {}", SSH_PRIVATE_KEY_BASE64, SSH_PRIVATE_KEY, SSH_PASSWORD));
    }

    missing
}

/// Operation commands that are not configured; those operations will fail at first use
pub fn unconfigured_commands(config: &dyn ConfigProvider) -> Vec<&'static str> {
    [RESTART_COMMAND, STATUS_COMMAND, BROADCAST_COMMAND, ADMIN_COMMAND]
        .into_iter()
        .filter(|key| config.get(key).is_none())
        .collect()
}
