//! Application configuration.
//!
//! Two YAML files, searched in `./configs` then the working directory:
//!
//! - `config.yaml`: api, logging, etcd, sync, and git sections; every field
//!   has a default so the file may be absent entirely.
//! - `servers.yaml`: the managed server groups; required, and validated
//!   before use. The same loader is re-run standalone on hot reload so a bad
//!   edit never replaces a running fleet.
//!
//! **Core API** (`_at` variants): accept an explicit base directory, used in
//! tests with `TempDir` so that no test ever reads the real working
//! directory. The bare variants search `./configs` then `.`.

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{io_err, ConfigError};

pub const DEFAULT_REMOTE_KEY_PREFIX: &str = "/gitops-nginx-remote";
pub const DEFAULT_GIT_KEY_PREFIX: &str = "/gitops-nginx";
pub const DEFAULT_PREVIEW_KEY_PREFIX: &str = "/gitops-nginx-preview";

/// Reconciler ticks never run more often than this.
pub const MIN_POLL_INTERVAL_SECS: u64 = 15;

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_allow_origins() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_etcd_endpoints() -> Vec<String> {
    vec!["localhost:2379".to_string()]
}

// ---------------------------------------------------------------------------
// Config model
// ---------------------------------------------------------------------------

/// Root application configuration (`config.yaml` plus `servers.yaml`).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LogConfig,
    #[serde(default)]
    pub etcd: StoreConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub git: GitConfig,
    /// Populated from `servers.yaml`, never from `config.yaml`.
    #[serde(skip)]
    pub server_groups: Vec<ServerGroup>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_allow_origins")]
    pub allow_origins: Vec<String>,
    /// Idle SSH connections kept per host by the push surface. 0 selects the
    /// transport default of 5.
    #[serde(default)]
    pub ssh_pool_capacity: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            allow_origins: default_allow_origins(),
            ssh_pool_capacity: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Coordination-store (etcd) endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_etcd_endpoints")]
    pub endpoints: Vec<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            endpoints: default_etcd_endpoints(),
        }
    }
}

/// Per-reconciler sync settings, one block per namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "SyncerConfig::remote_default")]
    pub remote_syncer: SyncerConfig,
    #[serde(default = "SyncerConfig::git_default")]
    pub git_syncer: SyncerConfig,
    #[serde(default = "SyncerConfig::preview_default")]
    pub preview_syncer: SyncerConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            remote_syncer: SyncerConfig::remote_default(),
            git_syncer: SyncerConfig::git_default(),
            preview_syncer: SyncerConfig::preview_default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncerConfig {
    pub key_prefix: String,
    #[serde(default)]
    pub interval_seconds: u64,
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
}

impl SyncerConfig {
    fn with_prefix(prefix: &str) -> Self {
        Self {
            key_prefix: prefix.to_string(),
            interval_seconds: 0,
            ignore_patterns: Vec::new(),
        }
    }

    pub fn remote_default() -> Self {
        Self::with_prefix(DEFAULT_REMOTE_KEY_PREFIX)
    }

    pub fn git_default() -> Self {
        Self::with_prefix(DEFAULT_GIT_KEY_PREFIX)
    }

    pub fn preview_default() -> Self {
        Self::with_prefix(DEFAULT_PREVIEW_KEY_PREFIX)
    }

    /// Poll interval with the 15-second floor applied.
    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.interval_seconds.max(MIN_POLL_INTERVAL_SECS))
    }
}

/// Git repository settings shared by the GitIn and PreviewIn reconcilers.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GitConfig {
    #[serde(default)]
    pub repo_url: String,
    #[serde(default)]
    pub repo_path: PathBuf,
    /// Defaults to `master` when empty.
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub auth: GitAuthConfig,
}

impl GitConfig {
    pub fn branch_or_default(&self) -> &str {
        if self.branch.is_empty() {
            "master"
        } else {
            &self.branch
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GitAuthConfig {
    #[serde(default, rename = "type")]
    pub kind: GitAuthKind,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub private_key_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GitAuthKind {
    Basic,
    Ssh,
    #[default]
    None,
}

// ---------------------------------------------------------------------------
// Server groups (servers.yaml)
// ---------------------------------------------------------------------------

/// A named group of managed hosts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerGroup {
    pub group: String,
    #[serde(default)]
    pub servers: Vec<ServerTarget>,
}

/// One managed host: identity, transport endpoint, and filesystem locations.
///
/// Immutable for the lifetime of a reconciler generation: reconcilers hold
/// their target by value, never a reference back into the config tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerTarget {
    #[serde(default)]
    pub name: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub auth: AuthConfig,
    #[serde(default)]
    pub nginx_binary_path: Option<String>,
    pub nginx_config_dir: String,
    #[serde(default)]
    pub check_dir: Option<String>,
}

impl ServerTarget {
    /// Last path component of `nginx_config_dir`, used as the store key
    /// segment for this host's namespace subtree.
    pub fn config_dir_suffix(&self) -> &str {
        self.nginx_config_dir
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or("")
    }

    /// Directory that check-mode pushes target.
    pub fn check_dir(&self) -> String {
        match &self.check_dir {
            Some(dir) if !dir.is_empty() => dir.clone(),
            _ => format!("{}/check", self.nginx_config_dir.trim_end_matches('/')),
        }
    }

    /// Nginx binary to invoke, `nginx` from `PATH` when unset.
    pub fn nginx_binary(&self) -> &str {
        self.nginx_binary_path.as_deref().unwrap_or("nginx")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub method: AuthMethod,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub key_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    Password,
    Key,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load `config.yaml` and `servers.yaml` from `<base>/configs` or `<base>`.
pub fn load_at(base: &Path) -> Result<Config, ConfigError> {
    let mut config = match find_file(base, "config.yaml") {
        Some(path) => parse_yaml_file::<Config>(&path)?,
        None => Config::default(),
    };
    config.server_groups = load_server_groups_at(base)?;
    Ok(config)
}

/// Load configuration relative to the working directory.
pub fn load() -> Result<Config, ConfigError> {
    load_at(Path::new("."))
}

/// Load and validate `servers.yaml` from `<base>/configs` or `<base>`.
///
/// Run standalone before a hot reload so an invalid edit is rejected without
/// touching the running reconcilers.
pub fn load_server_groups_at(base: &Path) -> Result<Vec<ServerGroup>, ConfigError> {
    let path = find_file(base, "servers.yaml").ok_or_else(|| ConfigError::NotFound {
        path: base.join("configs").join("servers.yaml"),
    })?;

    #[derive(Deserialize)]
    struct ServersFile {
        #[serde(default)]
        nginx_servers: Vec<ServerGroup>,
    }

    let parsed = parse_yaml_file::<ServersFile>(&path)?;
    validate_server_groups(&parsed.nginx_servers)?;
    Ok(parsed.nginx_servers)
}

/// Load and validate `servers.yaml` relative to the working directory.
pub fn load_server_groups() -> Result<Vec<ServerGroup>, ConfigError> {
    load_server_groups_at(Path::new("."))
}

/// Semantic validation of the server group list. Collects every problem
/// instead of stopping at the first so one edit round fixes the file.
pub fn validate_server_groups(groups: &[ServerGroup]) -> Result<(), ConfigError> {
    let mut errs = Vec::new();

    if groups.is_empty() {
        errs.push("no nginx server groups defined in configuration".to_string());
    }

    for group in groups {
        if group.group.is_empty() {
            errs.push("found group with empty name".to_string());
        }
        if group.servers.is_empty() {
            errs.push(format!("group '{}' has no servers defined", group.group));
            continue;
        }

        for server in &group.servers {
            let prefix = format!("group '{}' server '{}'", group.group, server.name);
            if server.host.is_empty() {
                errs.push(format!("{prefix}: host is empty"));
            } else if server.host.parse::<IpAddr>().is_err() {
                errs.push(format!(
                    "{prefix}: host '{}' is not a valid IP address",
                    server.host
                ));
            }
            if server.port == 0 {
                errs.push(format!("{prefix}: port 0 is invalid (must be 1-65535)"));
            }
            if server.user.is_empty() {
                errs.push(format!("{prefix}: user is empty"));
            }
            match server.auth.method {
                AuthMethod::Password if server.auth.password.is_empty() => {
                    errs.push(format!("{prefix}: password auth requires a password"));
                }
                AuthMethod::Key if server.auth.key_path.is_none() => {
                    errs.push(format!("{prefix}: key auth requires a key_path"));
                }
                _ => {}
            }
            if server.nginx_config_dir.is_empty() {
                errs.push(format!("{prefix}: nginx_config_dir is empty"));
            }
        }
    }

    if errs.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Invalid(errs))
    }
}

fn find_file(base: &Path, name: &str) -> Option<PathBuf> {
    let in_configs = base.join("configs").join(name);
    if in_configs.exists() {
        return Some(in_configs);
    }
    let in_base = base.join(name);
    in_base.exists().then_some(in_base)
}

fn parse_yaml_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
