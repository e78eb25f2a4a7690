// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration loading and processing for uapub.
//!
//! # Loading Pipeline
//!
//! 1. Read the file and substitute `${VAR}` / `${VAR:default}` placeholders
//! 2. Parse YAML (via the `config` crate), TOML or JSON by extension
//! 3. Apply `UAPUB_*` environment overrides
//! 4. Resolve relative paths against the configuration file's directory
//! 5. Validate
//!
//! # Environment Variable Override
//!
//! ```text
//! UAPUB_LOG_LEVEL=debug
//! UAPUB_NODE_CONFIG_PATH=/data/publishednodes.json
//! UAPUB_MQTT_HOST=broker.plant.local
//! UAPUB_SEND_INTERVAL_MS=0
//! ```

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use regex::{Captures, Regex};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::error::{ConfigError, ConfigResult};
use crate::schema::{LogFormat, LogLevel, PublisherConfig};

// =============================================================================
// ConfigFormat
// =============================================================================

/// Configuration file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// YAML format.
    Yaml,
    /// TOML format.
    Toml,
    /// JSON format.
    Json,
}

impl ConfigFormat {
    /// Determines the format from a file path.
    pub fn from_path(path: &Path) -> ConfigResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());

        match ext.as_deref() {
            Some("yaml") | Some("yml") => Ok(ConfigFormat::Yaml),
            Some("toml") => Ok(ConfigFormat::Toml),
            Some("json") => Ok(ConfigFormat::Json),
            Some(other) => Err(ConfigError::unsupported_format(other)),
            None => Err(ConfigError::unsupported_format("(no extension)")),
        }
    }
}

// =============================================================================
// ConfigLoader
// =============================================================================

/// Configuration loader.
///
/// ```no_run
/// use uapub_config::ConfigLoader;
///
/// let config = ConfigLoader::new().load("uapub.yaml").unwrap();
/// println!("Node file: {}", config.publisher.node_config_path.display());
/// ```
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    env_prefix: String,
    resolve_env_vars: bool,
    resolve_paths: bool,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Creates a loader with the `UAPUB` prefix.
    pub fn new() -> Self {
        Self {
            env_prefix: "UAPUB".to_string(),
            resolve_env_vars: true,
            resolve_paths: true,
        }
    }

    /// Sets the environment variable prefix.
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Enables or disables placeholder substitution and overrides.
    pub fn with_env_vars(mut self, enabled: bool) -> Self {
        self.resolve_env_vars = enabled;
        self
    }

    /// Enables or disables relative path resolution.
    pub fn with_path_resolution(mut self, enabled: bool) -> Self {
        self.resolve_paths = enabled;
        self
    }

    /// Loads and validates a configuration file.
    pub fn load(&self, path: impl AsRef<Path>) -> ConfigResult<PublisherConfig> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }
        let content = fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))?;
        let format = ConfigFormat::from_path(path)?;

        let mut config = self
            .process(&content, format, &|name: &str| env::var(name).ok())
            .map_err(|e| match e {
                ConfigError::Serialization { message } => ConfigError::parse(path, message),
                other => other,
            })?;

        if self.resolve_paths {
            let base = path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
            resolve_relative_paths(&mut config, &base);
        }

        config.validate()?;
        debug!(
            node_config = %config.publisher.node_config_path.display(),
            broker = %config.delivery.mqtt.target(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Loads and validates configuration from a string.
    pub fn load_from_str(&self, content: &str, format: ConfigFormat) -> ConfigResult<PublisherConfig> {
        let config = self.process(content, format, &|name: &str| env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parses content with an explicit variable lookup. Does not validate.
    pub fn process(
        &self,
        content: &str,
        format: ConfigFormat,
        lookup: &dyn Fn(&str) -> Option<String>,
    ) -> ConfigResult<PublisherConfig> {
        let mut config: PublisherConfig = if self.resolve_env_vars {
            parse_str(&resolve_placeholders(content, lookup), format)?
        } else {
            parse_str(content, format)?
        };
        if self.resolve_env_vars {
            self.apply_env_overrides(&mut config, lookup)?;
        }
        Ok(config)
    }

    fn apply_env_overrides(
        &self,
        config: &mut PublisherConfig,
        lookup: &dyn Fn(&str) -> Option<String>,
    ) -> ConfigResult<()> {
        let var = |suffix: &str| {
            let name = format!("{}_{}", self.env_prefix, suffix);
            lookup(&name).map(|value| (name, value))
        };

        if let Some((name, value)) = var("LOG_LEVEL") {
            config.logging.level = LogLevel::parse(&value)
                .ok_or_else(|| ConfigError::invalid_env_var(name, "expected trace, debug, info, warn or error"))?;
        }
        if let Some((name, value)) = var("LOG_FORMAT") {
            config.logging.format = match value.to_ascii_lowercase().as_str() {
                "text" => LogFormat::Text,
                "json" => LogFormat::Json,
                "compact" => LogFormat::Compact,
                _ => return Err(ConfigError::invalid_env_var(name, "expected text, json or compact")),
            };
        }
        if let Some((_, value)) = var("NODE_CONFIG_PATH") {
            config.publisher.node_config_path = PathBuf::from(value);
        }
        if let Some((_, value)) = var("MQTT_HOST") {
            config.delivery.mqtt.host = value;
        }
        if let Some((name, value)) = var("MQTT_PORT") {
            config.delivery.mqtt.port = parse_number(&name, &value)?;
        }
        if let Some((_, value)) = var("MQTT_TOPIC") {
            config.delivery.mqtt.topic = value;
        }
        if let Some((_, value)) = var("MQTT_CLIENT_ID") {
            config.delivery.mqtt.client_id = value;
        }
        if let Some((_, value)) = var("MQTT_USERNAME") {
            config.delivery.mqtt.username = Some(value);
        }
        if let Some((_, value)) = var("MQTT_PASSWORD") {
            config.delivery.mqtt.password = Some(value);
        }
        if let Some((name, value)) = var("QUEUE_CAPACITY") {
            config.delivery.queue_capacity = parse_number(&name, &value)?;
        }
        if let Some((name, value)) = var("SEND_INTERVAL_MS") {
            config.delivery.send_interval_ms = parse_number(&name, &value)?;
        }
        if let Some((name, value)) = var("MAX_FRAME_SIZE") {
            config.delivery.max_frame_size = parse_number(&name, &value)?;
        }
        if let Some((name, value)) = var("DIAGNOSTICS_INTERVAL_SECS") {
            config.diagnostics.interval_secs = parse_number(&name, &value)?;
        }
        Ok(())
    }
}

fn parse_number<T: FromStr>(name: &str, value: &str) -> ConfigResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::invalid_env_var(name, "expected a non-negative number"))
}

fn parse_str<T: DeserializeOwned>(content: &str, format: ConfigFormat) -> ConfigResult<T> {
    match format {
        ConfigFormat::Yaml => serde_yaml_parse(content),
        ConfigFormat::Toml => {
            toml::from_str(content).map_err(|e| ConfigError::serialization(e.to_string()))
        }
        ConfigFormat::Json => {
            serde_json::from_str(content).map_err(|e| ConfigError::serialization(e.to_string()))
        }
    }
}

fn serde_yaml_parse<T: DeserializeOwned>(content: &str) -> ConfigResult<T> {
    let config = config::Config::builder()
        .add_source(config::File::from_str(content, config::FileFormat::Yaml))
        .build()
        .map_err(|e| ConfigError::serialization(e.to_string()))?;

    config
        .try_deserialize()
        .map_err(|e| ConfigError::serialization(e.to_string()))
}

/// Substitutes `${VAR}` and `${VAR:default}` placeholders.
///
/// Unknown variables without a default are kept verbatim.
pub fn resolve_placeholders(content: &str, lookup: &dyn Fn(&str) -> Option<String>) -> String {
    static PATTERN: &str = r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::([^}]*))?\}";
    let Ok(regex) = Regex::new(PATTERN) else {
        return content.to_string();
    };

    regex
        .replace_all(content, |caps: &Captures<'_>| {
            let name = &caps[1];
            match (lookup(name), caps.get(2)) {
                (Some(value), _) => value,
                (None, Some(default)) => default.as_str().to_string(),
                (None, None) => {
                    warn!(variable = name, "Environment variable not set");
                    caps[0].to_string()
                }
            }
        })
        .into_owned()
}

fn resolve_relative_paths(config: &mut PublisherConfig, base: &Path) {
    if config.publisher.node_config_path.is_relative() {
        config.publisher.node_config_path = base.join(&config.publisher.node_config_path);
    }
    if let Some(pki_dir) = config.publisher.pki_dir.as_mut() {
        if pki_dir.is_relative() {
            *pki_dir = base.join(&*pki_dir);
        }
    }
}

/// Loads configuration from a file with default settings.
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<PublisherConfig> {
    ConfigLoader::new().load(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name| vars.get(name).cloned()
    }

    const YAML: &str = r#"
publisher:
  application_uri: "urn:plant:edge"
  node_config_path: "nodes/publishednodes.json"
sessions:
  reconcile_interval_secs: 5
  keep_alive_threshold: 3
delivery:
  queue_capacity: 1024
  send_interval_ms: 0
  max_frame_size: 0
  mqtt:
    host: "${BROKER_HOST:localhost}"
    topic: "plant/telemetry"
telemetry:
  defaults:
    flatten: true
"#;

    #[test]
    fn test_format_from_path() {
        assert_eq!(ConfigFormat::from_path(Path::new("a.yml")).unwrap(), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::from_path(Path::new("a.TOML")).unwrap(), ConfigFormat::Toml);
        assert!(ConfigFormat::from_path(Path::new("a.ini")).is_err());
    }

    #[test]
    fn test_placeholders() {
        let lookup = lookup_from(&[("HOST", "plc-01")]);
        assert_eq!(
            resolve_placeholders("opc.tcp://${HOST}:${PORT:4840}/${MISSING}", &lookup),
            "opc.tcp://plc-01:4840/${MISSING}"
        );
    }

    #[test]
    fn test_yaml_with_placeholder_default() {
        let config = ConfigLoader::new()
            .process(YAML, ConfigFormat::Yaml, &lookup_from(&[]))
            .unwrap();
        assert_eq!(config.delivery.mqtt.host, "localhost");
        assert_eq!(config.sessions.reconcile_interval_secs, 5);
        assert_eq!(config.sessions.keep_alive_threshold, 3);
        assert_eq!(config.delivery.queue_capacity, 1024);
        assert!(config.telemetry.defaults.flatten);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let lookup = lookup_from(&[
            ("BROKER_HOST", "broker-a"),
            ("UAPUB_MQTT_HOST", "broker-b"),
            ("UAPUB_LOG_LEVEL", "debug"),
            ("UAPUB_QUEUE_CAPACITY", "42"),
        ]);
        let config = ConfigLoader::new().process(YAML, ConfigFormat::Yaml, &lookup).unwrap();
        assert_eq!(config.delivery.mqtt.host, "broker-b");
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.delivery.queue_capacity, 42);
    }

    #[test]
    fn test_invalid_env_override() {
        let lookup = lookup_from(&[("UAPUB_MQTT_PORT", "not-a-port")]);
        let result = ConfigLoader::new().process(YAML, ConfigFormat::Yaml, &lookup);
        assert!(matches!(result, Err(ConfigError::InvalidEnvVar { .. })));
    }

    #[test]
    fn test_toml_and_json() {
        let toml = "[delivery]\nqueue_capacity = 16\n";
        let config = ConfigLoader::new()
            .process(toml, ConfigFormat::Toml, &lookup_from(&[]))
            .unwrap();
        assert_eq!(config.delivery.queue_capacity, 16);

        let json = r#"{"admin": {"page_size": 25}}"#;
        let config = ConfigLoader::new()
            .process(json, ConfigFormat::Json, &lookup_from(&[]))
            .unwrap();
        assert_eq!(config.admin.page_size, 25);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let json = r#"{"sessions": {"reconcile_every": 5}}"#;
        assert!(ConfigLoader::new()
            .process(json, ConfigFormat::Json, &lookup_from(&[]))
            .is_err());
    }

    #[test]
    fn test_load_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("uapub.yaml");
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(YAML.as_bytes()).unwrap();

        let config = ConfigLoader::new().with_env_vars(false).load(&path);
        // Placeholders are left untouched when substitution is off.
        let config = config.unwrap();
        assert_eq!(config.delivery.mqtt.host, "${BROKER_HOST:localhost}");
        assert_eq!(
            config.publisher.node_config_path,
            dir.path().join("nodes/publishednodes.json")
        );
    }

    #[test]
    fn test_missing_file() {
        let result = ConfigLoader::new().load("/nonexistent/uapub.yaml");
        assert!(matches!(result, Err(ConfigError::FileNotFound { .. })));
    }
}
