//! Layered configuration: defaults, then the TOML file, then `WARREN__*`
//! environment variables.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::api::StateOptions;
use crate::container::{LxcConfig, Readiness, TemplateKind};
use crate::files::FileManagerConfig;
use crate::session::SessionRegistryConfig;
use crate::terminal::TerminalSize;
use crate::user::TenantConfig;

pub const APP_NAME: &str = "warren";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub container: ContainerConfig,
    pub terminal: TerminalConfig,
    pub proxy: ProxyConfig,
    pub files: FilesConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Path prefixes never treated as tenant paths, in addition to
    /// `/api/`, `/ws/` and `/health`.
    pub reserved_prefixes: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            reserved_prefixes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file; `<data dir>/warren.db` when unset.
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    pub binary: String,
    /// Container or image new tenant containers are built from.
    pub template: String,
    pub template_kind: TemplateKind,
    pub name_prefix: String,
    pub primary_interface: String,
    pub readiness_timeout_secs: u64,
    pub readiness_interval_ms: u64,
    pub command_timeout_secs: u64,
    pub max_concurrent_commands: usize,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        let lxc = LxcConfig::default();
        let tenants = TenantConfig::default();
        Self {
            binary: lxc.binary,
            template: tenants.template,
            template_kind: lxc.template_kind,
            name_prefix: tenants.name_prefix,
            primary_interface: lxc.primary_interface,
            readiness_timeout_secs: lxc.readiness.timeout.as_secs(),
            readiness_interval_ms: lxc.readiness.interval.as_millis() as u64,
            command_timeout_secs: lxc.command_timeout.as_secs(),
            max_concurrent_commands: lxc.max_concurrent_commands,
        }
    }
}

impl ContainerConfig {
    pub fn lxc(&self) -> LxcConfig {
        LxcConfig {
            binary: self.binary.clone(),
            primary_interface: self.primary_interface.clone(),
            template_kind: self.template_kind,
            readiness: Readiness {
                timeout: Duration::from_secs(self.readiness_timeout_secs),
                interval: Duration::from_millis(self.readiness_interval_ms.max(1)),
            },
            command_timeout: Duration::from_secs(self.command_timeout_secs),
            max_concurrent_commands: self.max_concurrent_commands.max(1),
        }
    }

    pub fn tenants(&self) -> TenantConfig {
        TenantConfig {
            template: self.template.clone(),
            name_prefix: self.name_prefix.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    pub cols: u16,
    pub rows: u16,
    /// `TERM` exported to attached sessions.
    pub term: String,
    /// Program started in new sessions instead of the login shell.
    pub startup_command: Option<String>,
    pub kill_timeout_secs: u64,
    pub command_timeout_secs: u64,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        let size = TerminalSize::default();
        let registry = SessionRegistryConfig::default();
        Self {
            cols: size.cols,
            rows: size.rows,
            term: "xterm-256color".to_string(),
            startup_command: registry.startup_command,
            kill_timeout_secs: registry.kill_timeout.as_secs(),
            command_timeout_secs: registry.command_timeout.as_secs(),
        }
    }
}

impl TerminalConfig {
    pub fn size(&self) -> TerminalSize {
        TerminalSize {
            cols: self.cols.max(1),
            rows: self.rows.max(1),
        }
    }

    pub fn registry(&self) -> SessionRegistryConfig {
        SessionRegistryConfig {
            startup_command: self
                .startup_command
                .clone()
                .filter(|cmd| !cmd.trim().is_empty()),
            kill_timeout: Duration::from_secs(self.kill_timeout_secs),
            command_timeout: Duration::from_secs(self.command_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub ip_cache_ttl_secs: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            ip_cache_ttl_secs: crate::container::ip_cache::DEFAULT_TTL.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesConfig {
    /// LXD storage pool directory holding `<container>/rootfs`.
    pub storage_path: String,
    pub max_read_bytes: u64,
    pub max_upload_bytes: u64,
}

impl Default for FilesConfig {
    fn default() -> Self {
        let files = FileManagerConfig::default();
        Self {
            storage_path: files.storage_root.to_string_lossy().into_owned(),
            max_read_bytes: files.max_read_bytes,
            max_upload_bytes: files.max_upload_bytes,
        }
    }
}

impl FilesConfig {
    pub fn files(&self) -> FileManagerConfig {
        FileManagerConfig {
            storage_root: PathBuf::from(shellexpand::tilde(&self.storage_path).into_owned()),
            max_read_bytes: self.max_read_bytes,
            max_upload_bytes: self.max_upload_bytes,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Service options derived from this configuration.
    pub fn state_options(&self) -> StateOptions {
        StateOptions {
            registry: self.terminal.registry(),
            tenants: self.container.tenants(),
            ip_cache_ttl: Duration::from_secs(self.proxy.ip_cache_ttl_secs),
            extra_reserved_prefixes: self.server.reserved_prefixes.clone(),
            terminal_size: self.terminal.size(),
            files: self.files.files(),
        }
    }

    /// Resolved database file.
    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.database.path {
            Some(path) => expand_str_path(path),
            None => Ok(default_data_dir()?.join(format!("{APP_NAME}.db"))),
        }
    }
}

/// Load configuration from `path`, writing the defaults there first if missing.
pub fn load_or_init_config(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        write_default_config(path)?;
    }
    load_config(path)
}

pub fn load_config(path: &Path) -> Result<AppConfig> {
    let built = Config::builder()
        .set_default("logging.level", "info")?
        .add_source(
            File::from(path)
                .format(FileFormat::Toml)
                .required(false),
        )
        .add_source(Environment::with_prefix(&env_prefix()).separator("__"))
        .build()
        .with_context(|| format!("loading config from {}", path.display()))?;

    built
        .try_deserialize()
        .context("deserializing configuration")
}

pub fn write_default_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating config directory {parent:?}"))?;
    }

    let config = AppConfig::default();
    let toml = toml::to_string_pretty(&config).context("serializing default config to TOML")?;
    let mut body = format!("# Configuration for {}\n# File: {}\n\n", APP_NAME, path.display());
    body.push_str(&toml);
    fs::write(path, body).with_context(|| format!("writing config file to {}", path.display()))
}

/// Config file to use: `override_path` (a file, or a directory holding
/// `config.toml`) or the default location.
pub fn config_file_path(override_path: Option<PathBuf>) -> Result<PathBuf> {
    match override_path {
        Some(path) => {
            let expanded = expand_path(path)?;
            if expanded.is_dir() {
                Ok(expanded.join("config.toml"))
            } else {
                Ok(expanded)
            }
        }
        None => Ok(default_config_dir()?.join("config.toml")),
    }
}

fn expand_path(path: PathBuf) -> Result<PathBuf> {
    if let Some(text) = path.to_str() {
        expand_str_path(text)
    } else {
        Ok(path)
    }
}

pub fn expand_str_path(text: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(text).context("expanding path")?;
    Ok(PathBuf::from(expanded.to_string()))
}

fn default_config_dir() -> Result<PathBuf> {
    if let Some(dir) = env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir).join(APP_NAME));
    }

    if let Some(dir) = dirs::config_dir() {
        return Ok(dir.join(APP_NAME));
    }

    dirs::home_dir()
        .map(|home| home.join(".config").join(APP_NAME))
        .ok_or_else(|| anyhow!("unable to determine configuration directory"))
}

fn default_data_dir() -> Result<PathBuf> {
    if let Some(dir) = env::var_os("XDG_DATA_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir).join(APP_NAME));
    }

    if let Some(dir) = dirs::data_dir() {
        return Ok(dir.join(APP_NAME));
    }

    dirs::home_dir()
        .map(|home| home.join(".local").join("share").join(APP_NAME))
        .ok_or_else(|| anyhow!("unable to determine data directory"))
}

fn env_prefix() -> String {
    APP_NAME.to_ascii_uppercase()
}
