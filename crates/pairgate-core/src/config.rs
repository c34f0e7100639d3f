//! Configuration: platform profiles, TOML file, environment overrides.
//!
//! Resolution order is profile defaults, then the TOML file, then the
//! environment. Profile-dependent fields are `Option`s in the file and are
//! resolved through the accessor methods on [`Config`].

use crate::error::PairgateError;
use crate::traits::{ClientIdentity, ProtocolVersion};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "pairgate.toml";

/// Expand `~` to the home directory.
pub fn shellexpand(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return format!("{home}/{rest}");
        }
    } else if path == "~" {
        if let Ok(home) = std::env::var("HOME") {
            return home;
        }
    }
    path.to_string()
}

/// Hosting platform profile. Selects timeout, storage path, and log level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[serde(alias = "fly.io", alias = "flyio")]
    Fly,
    Railway,
    Cyclic,
    #[default]
    Generic,
    #[serde(alias = "test")]
    Stub,
}

impl Platform {
    pub const ALL: [Platform; 5] = [
        Platform::Fly,
        Platform::Railway,
        Platform::Cyclic,
        Platform::Generic,
        Platform::Stub,
    ];

    /// Human-readable label reported by `/health` and the frontend.
    pub fn label(self) -> &'static str {
        match self {
            Self::Fly => "Fly.io",
            Self::Railway => "Railway",
            Self::Cyclic => "Cyclic",
            Self::Generic => "Generic",
            Self::Stub => "Test",
        }
    }

    pub fn qr_timeout_secs(self) -> u64 {
        match self {
            Self::Cyclic | Self::Stub => 30,
            Self::Fly | Self::Railway | Self::Generic => 45,
        }
    }

    /// Cyclic only allows writes under `/tmp`.
    pub fn sessions_dir(self) -> &'static str {
        match self {
            Self::Cyclic => "/tmp/sessions",
            _ => "./sessions",
        }
    }

    pub fn log_level(self) -> &'static str {
        match self {
            Self::Stub => "debug",
            _ => "info",
        }
    }

    pub fn default_connector(self) -> ConnectorKind {
        match self {
            Self::Stub => ConnectorKind::Stub,
            _ => ConnectorKind::Bridge,
        }
    }

    pub fn serves_frontend(self) -> bool {
        !matches!(self, Self::Stub)
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Fly => "fly",
            Self::Railway => "railway",
            Self::Cyclic => "cyclic",
            Self::Generic => "generic",
            Self::Stub => "stub",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = PairgateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fly" | "fly.io" | "flyio" => Ok(Self::Fly),
            "railway" => Ok(Self::Railway),
            "cyclic" => Ok(Self::Cyclic),
            "generic" | "" => Ok(Self::Generic),
            "stub" | "test" => Ok(Self::Stub),
            other => Err(PairgateError::Config(format!(
                "unknown platform '{other}' (expected fly, railway, cyclic, generic, or stub)"
            ))),
        }
    }
}

/// Which upstream connector implementation to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectorKind {
    Stub,
    Bridge,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub session: SessionConfig,
    pub upstream: UpstreamConfig,
    pub log: LogConfig,
}

/// `[server]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub platform: Platform,
    /// Bearer token for `POST /api/start`. Empty disables auth.
    pub api_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serve_frontend: Option<bool>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            platform: Platform::default(),
            api_key: String::new(),
            serve_frontend: None,
        }
    }
}

/// `[session]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sessions_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr_timeout_secs: Option<u64>,
    /// Upper bound on the detached logout of a superseded session.
    pub logout_timeout_secs: u64,
    /// Also render each QR code into the log output.
    pub print_qr_in_terminal: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sessions_dir: None,
            qr_timeout_secs: None,
            logout_timeout_secs: 5,
            print_qr_in_terminal: true,
        }
    }
}

/// `[upstream]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connector: Option<ConnectorKind>,
    pub connect_timeout_ms: u64,
    pub keep_alive_interval_ms: u64,
    /// JSON document of the form `{"version": [a, b, c]}`.
    pub version_url: String,
    pub fallback_version: ProtocolVersion,
    pub client: ClientIdentity,
    pub bridge: BridgeConfig,
    pub stub: StubConfig,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            connector: None,
            connect_timeout_ms: 60_000,
            keep_alive_interval_ms: 15_000,
            version_url: "https://raw.githubusercontent.com/WhiskeySockets/Baileys/master/src/Defaults/baileys-version.json".to_string(),
            fallback_version: ProtocolVersion([2, 3000, 1_015_901_307]),
            client: ClientIdentity::default(),
            bridge: BridgeConfig::default(),
            stub: StubConfig::default(),
        }
    }
}

/// `[upstream.bridge]`: external process speaking JSON lines.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub program: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            program: "node".to_string(),
            args: vec!["bridge/index.mjs".to_string()],
            env: HashMap::new(),
        }
    }
}

/// `[upstream.stub]`: knobs for the in-process stub connector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StubConfig {
    pub qr_delay_ms: u64,
    /// Emit a fresh QR every N ms after the first. 0 disables rotation.
    pub qr_rotate_ms: u64,
    pub emit_qr: bool,
    /// Report `open` instead of a QR when credentials already exist.
    pub open_with_credentials: bool,
    /// Send a second credentials update (`pre-key-1.json`) after the first QR.
    pub creds_after_qr: bool,
    pub fail_connect: bool,
    pub fail_logout: bool,
    pub version: ProtocolVersion,
}

impl Default for StubConfig {
    fn default() -> Self {
        Self {
            qr_delay_ms: 500,
            qr_rotate_ms: 0,
            emit_qr: true,
            open_with_credentials: false,
            creds_after_qr: false,
            fail_connect: false,
            fail_logout: false,
            version: ProtocolVersion([2, 3000, 0]),
        }
    }
}

/// `[log]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    /// Directory for a daily-rolling log file. Empty means stdout only.
    pub file: String,
}

impl Config {
    /// Built-in defaults for a platform profile.
    pub fn for_platform(platform: Platform) -> Self {
        let mut config = Self::default();
        config.server.platform = platform;
        config
    }

    /// Load from a TOML file, falling back to defaults if it does not exist,
    /// then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, PairgateError> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path).map_err(|e| {
                PairgateError::Config(format!("failed to read {}: {e}", path.display()))
            })?;
            Self::parse(&raw)?
        } else {
            info!("no config at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Parse a TOML document.
    pub fn parse(raw: &str) -> Result<Self, PairgateError> {
        toml::from_str(raw).map_err(|e| PairgateError::Config(format!("invalid config: {e}")))
    }

    /// Serialize back to TOML (used by `pairgate init`).
    pub fn to_toml(&self) -> Result<String, PairgateError> {
        toml::to_string_pretty(self)
            .map_err(|e| PairgateError::Config(format!("serialize config: {e}")))
    }

    /// Apply `PORT`, `PAIRGATE_PLATFORM`, `PAIRGATE_SESSIONS_DIR` and
    /// `PAIRGATE_API_KEY` from the given lookup.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), PairgateError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PORT").filter(|p| !p.trim().is_empty()) {
            self.server.port = port
                .trim()
                .parse()
                .map_err(|_| PairgateError::Config(format!("invalid PORT '{port}'")))?;
        }
        if let Some(platform) = lookup("PAIRGATE_PLATFORM") {
            self.server.platform = platform.parse()?;
        }
        if let Some(dir) = lookup("PAIRGATE_SESSIONS_DIR").filter(|d| !d.is_empty()) {
            self.session.sessions_dir = Some(dir);
        }
        if let Some(key) = lookup("PAIRGATE_API_KEY") {
            self.server.api_key = key;
        }
        Ok(())
    }

    pub fn platform(&self) -> Platform {
        self.server.platform
    }

    pub fn qr_timeout(&self) -> Duration {
        Duration::from_secs(
            self.session
                .qr_timeout_secs
                .unwrap_or_else(|| self.platform().qr_timeout_secs()),
        )
    }

    pub fn logout_timeout(&self) -> Duration {
        Duration::from_secs(self.session.logout_timeout_secs)
    }

    pub fn sessions_dir(&self) -> PathBuf {
        let dir = self
            .session
            .sessions_dir
            .as_deref()
            .unwrap_or_else(|| self.platform().sessions_dir());
        PathBuf::from(shellexpand(dir))
    }

    pub fn log_level(&self) -> &str {
        self.log
            .level
            .as_deref()
            .unwrap_or_else(|| self.platform().log_level())
    }

    pub fn connector_kind(&self) -> ConnectorKind {
        self.upstream
            .connector
            .unwrap_or_else(|| self.platform().default_connector())
    }

    pub fn serve_frontend(&self) -> bool {
        self.server
            .serve_frontend
            .unwrap_or_else(|| self.platform().serves_frontend())
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_platform_profiles() {
        let fly = Config::for_platform(Platform::Fly);
        assert_eq!(fly.qr_timeout(), Duration::from_secs(45));
        assert_eq!(fly.sessions_dir(), PathBuf::from("./sessions"));
        assert_eq!(fly.log_level(), "info");
        assert_eq!(fly.connector_kind(), ConnectorKind::Bridge);

        let cyclic = Config::for_platform(Platform::Cyclic);
        assert_eq!(cyclic.qr_timeout(), Duration::from_secs(30));
        assert_eq!(cyclic.sessions_dir(), PathBuf::from("/tmp/sessions"));

        let stub = Config::for_platform(Platform::Stub);
        assert_eq!(stub.log_level(), "debug");
        assert_eq!(stub.connector_kind(), ConnectorKind::Stub);
        assert!(!stub.serve_frontend());
    }

    #[test]
    fn test_every_profile_timeout_in_range() {
        for p in Platform::ALL {
            let secs = p.qr_timeout_secs();
            assert!((30..=45).contains(&secs), "{p} timeout {secs}s out of range");
        }
    }

    #[test]
    fn test_platform_from_str_aliases() {
        assert_eq!("Fly.io".parse::<Platform>().unwrap(), Platform::Fly);
        assert_eq!("test".parse::<Platform>().unwrap(), Platform::Stub);
        assert!("heroku".parse::<Platform>().is_err());
    }

    #[test]
    fn test_defaults_without_file() {
        let config = Config::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.platform(), Platform::Generic);
        assert_eq!(config.listen_addr(), "0.0.0.0:3000");
        assert_eq!(config.upstream.client.browser, "Chrome");
    }

    #[test]
    fn test_file_overrides_profile() {
        let config = Config::parse(
            r#"
[server]
platform = "cyclic"

[session]
qr_timeout_secs = 10
sessions_dir = "/var/lib/pairgate"

[upstream]
connector = "stub"
"#,
        )
        .unwrap();
        assert_eq!(config.platform(), Platform::Cyclic);
        assert_eq!(config.qr_timeout(), Duration::from_secs(10));
        assert_eq!(config.sessions_dir(), PathBuf::from("/var/lib/pairgate"));
        assert_eq!(config.connector_kind(), ConnectorKind::Stub);
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = Config::parse("[server]\nport = 8080\n").unwrap();
        config
            .apply_env(env(&[("PORT", "9000"), ("PAIRGATE_PLATFORM", "railway")]))
            .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.platform(), Platform::Railway);
    }

    #[test]
    fn test_env_invalid_port() {
        let mut config = Config::default();
        let err = config.apply_env(env(&[("PORT", "abc")])).unwrap_err();
        assert!(err.to_string().contains("invalid PORT"));
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let mut config = Config::parse("").unwrap();
        config.apply_env(env(&[])).unwrap();
        assert_eq!(config.session.logout_timeout_secs, 5);
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.platform(), Platform::Generic);
    }

    #[test]
    fn test_file_accepts_platform_aliases() {
        let fly = Config::parse("[server]\nplatform = \"fly.io\"\n").unwrap();
        assert_eq!(fly.platform(), Platform::Fly);
        let stub = Config::parse("[server]\nplatform = \"test\"\n").unwrap();
        assert_eq!(stub.platform(), Platform::Stub);
        assert!(Config::parse("[server]\nplatform = \"heroku\"\n").is_err());
    }

    #[test]
    fn test_toml_roundtrip_keeps_platform() {
        let config = Config::for_platform(Platform::Railway);
        let raw = config.to_toml().unwrap();
        assert!(raw.contains("platform = \"railway\""));
        let back = Config::parse(&raw).unwrap();
        assert_eq!(back.platform(), Platform::Railway);
    }

    #[test]
    fn test_shellexpand_passthrough() {
        assert_eq!(shellexpand("./sessions"), "./sessions");
        assert_eq!(shellexpand("/tmp/sessions"), "/tmp/sessions");
    }
}
