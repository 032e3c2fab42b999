//! Configuration loading for the bridge.
//! Reads cryoatom.toml from `--config`, the CRYOATOM_CONFIG env var, or the
//! current directory, then applies `CS_*` environment overrides.

use cryoatom_builder::BuilderCommand;
use cryoatom_common::{CryoAtomError, Result};
use cryoatom_platform::{ConnectionSettings, DEFAULT_PRIORITIES};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};

pub const CONFIG_ENV: &str = "CRYOATOM_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "cryoatom.toml";

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub platform: PlatformConfig,
    #[serde(default)]
    pub builder: BuilderConfig,
    #[serde(default)]
    pub accelerator: AcceleratorConfig,
    #[serde(default)]
    pub locator: LocatorConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
}

#[derive(Debug, Deserialize)]
pub struct PlatformConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_base_port")]
    pub base_port: u16,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub license_id: String,
    /// Prefer `CS_PASSWORD` over writing this into the file.
    #[serde(default, deserialize_with = "deserialize_secret")]
    pub password: Option<SecretString>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn deserialize_secret<'de, D>(deserializer: D) -> std::result::Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.map(SecretString::from))
}

fn default_host()         -> String { "localhost".to_string() }
fn default_base_port()    -> u16    { 39000 }
fn default_timeout_secs() -> u64    { 300 }

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            base_port: default_base_port(),
            email: String::new(),
            license_id: String::new(),
            password: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BuilderConfig {
    #[serde(default = "default_executable")]
    pub executable: PathBuf,
    #[serde(default = "default_leading_args")]
    pub leading_args: Vec<String>,
    #[serde(default = "default_device_prefix")]
    pub device_prefix: String,
    /// Appended to every build, before any extra args from the command line.
    #[serde(default)]
    pub extra_args: Vec<String>,
}

fn default_executable()    -> PathBuf     { PathBuf::from("cryoatom") }
fn default_leading_args()  -> Vec<String> { vec!["build".to_string()] }
fn default_device_prefix() -> String      { "cuda:".to_string() }

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            executable: default_executable(),
            leading_args: default_leading_args(),
            device_prefix: default_device_prefix(),
            extra_args: Vec::new(),
        }
    }
}

impl BuilderConfig {
    pub fn command(&self) -> BuilderCommand {
        BuilderCommand {
            executable: self.executable.clone(),
            leading_args: self.leading_args.clone(),
            device_prefix: self.device_prefix.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AcceleratorConfig {
    #[serde(default = "default_telemetry_command")]
    pub telemetry_command: PathBuf,
    /// Restrict automatic selection to `CUDA_VISIBLE_DEVICES`.
    #[serde(default = "bool_true")]
    pub respect_visible_devices: bool,
}

fn default_telemetry_command() -> PathBuf { PathBuf::from(cryoatom_accel::source::DEFAULT_TELEMETRY_COMMAND) }
fn bool_true()                 -> bool    { true }

impl Default for AcceleratorConfig {
    fn default() -> Self {
        Self {
            telemetry_command: default_telemetry_command(),
            respect_visible_devices: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocatorConfig {
    /// Case-insensitive substrings, most preferred first.
    #[serde(default = "default_priorities")]
    pub priorities: Vec<String>,
    #[serde(default = "default_volume_output")]
    pub volume_output: String,
}

fn default_priorities()    -> Vec<String> { DEFAULT_PRIORITIES.iter().map(|s| s.to_string()).collect() }
fn default_volume_output() -> String      { "volume".to_string() }

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            priorities: default_priorities(),
            volume_output: default_volume_output(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkspaceConfig {
    /// Parent for work directories; the project directory when unset.
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(default = "bool_true")]
    pub copy_map: bool,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self { root: None, copy_map: true }
    }
}


impl Config {
    /// Load configuration. An explicit path must exist; the implicit
    /// locations fall back to defaults when absent.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let (path, required) = match explicit {
            Some(p) => (p.to_path_buf(), true),
            None => match std::env::var(CONFIG_ENV) {
                Ok(p) if !p.is_empty() => (PathBuf::from(p), true),
                _ => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
            },
        };

        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else if required {
            return Err(CryoAtomError::Config(format!(
                "config file not found: {}",
                path.display()
            )));
        } else {
            tracing::debug!("No {} found, using defaults", path.display());
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| CryoAtomError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| CryoAtomError::Config(e.to_string()))
    }

    /// Apply `CS_HOST`, `CS_BASE_PORT`, `CS_EMAIL`, `CS_LICENSE_ID` and
    /// `CS_PASSWORD`. Empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(host) = get("CS_HOST") {
            self.platform.host = host;
        }
        if let Some(port) = get("CS_BASE_PORT") {
            match port.trim().parse() {
                Ok(p) => self.platform.base_port = p,
                Err(_) => tracing::warn!("Ignoring CS_BASE_PORT={port}: not a port number"),
            }
        }
        if let Some(email) = get("CS_EMAIL") {
            self.platform.email = email;
        }
        if let Some(license) = get("CS_LICENSE_ID") {
            self.platform.license_id = license;
        }
        if let Some(password) = get("CS_PASSWORD") {
            self.platform.password = Some(SecretString::from(password));
        }
    }

    /// Credentials are only checked here, so commands that never connect
    /// work without them.
    pub fn connection_settings(&self) -> Result<ConnectionSettings> {
        let p = &self.platform;
        let mut missing = Vec::new();
        if p.email.trim().is_empty() {
            missing.push("email (CS_EMAIL)");
        }
        if p.license_id.trim().is_empty() {
            missing.push("license_id (CS_LICENSE_ID)");
        }
        let password = p
            .password
            .as_ref()
            .map(|pw| pw.expose_secret().to_string())
            .filter(|pw| !pw.is_empty());
        if password.is_none() {
            missing.push("password (CS_PASSWORD)");
        }
        if !missing.is_empty() {
            return Err(CryoAtomError::Config(format!(
                "missing platform credentials: {}",
                missing.join(", ")
            )));
        }

        Ok(ConnectionSettings {
            host: p.host.clone(),
            base_port: p.base_port,
            email: p.email.trim().to_string(),
            password: SecretString::from(password.unwrap_or_default()),
            license_id: p.license_id.trim().to_string(),
            timeout_secs: p.timeout_secs,
        })
    }
}
