//! Loading and validating the site configuration.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::Deserialize;
use thiserror::Error;

use crate::types::{ParseError, RemoteUrl};

/// Listen address used when `webAddrPort` is not configured.
pub const DEFAULT_LISTEN_ADDR: &str = "localhost:8888";

/// Environment variables that override file values.
pub const ENV_GIT_URL: &str = "GITSITE_GIT_URL";
pub const ENV_SSH_PRIVATE_KEY: &str = "GITSITE_SSH_PRIVATE_KEY";
pub const ENV_SSH_PRIVATE_KEY_FILE: &str = "GITSITE_SSH_PRIVATE_KEY_FILE";
pub const ENV_WEB_ADDR_PORT: &str = "GITSITE_WEB_ADDR_PORT";

/// Errors returned while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file does not exist.
    #[error("configuration file not found: {0}")]
    Missing(PathBuf),
    /// The configuration file exists but could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The configuration file is not valid YAML for this schema.
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    /// One or more required fields are absent or empty.
    #[error("missing required configuration: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),
    /// `gitUrl` is not an SSH or file remote.
    #[error("invalid gitUrl: {0}")]
    InvalidUrl(#[from] ParseError),
    /// `sshPrivateKeyFile` could not be read.
    #[error("failed to read ssh key file {path}: {source}")]
    KeyFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// `webAddrPort` is not a `host:port` pair.
    #[error("invalid webAddrPort '{0}': expected host:port")]
    InvalidListenAddr(String),
}

/// On-disk schema. Field names follow the original camelCase keys.
#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ConfigFile {
    git_url: Option<String>,
    ssh_private_key: Option<String>,
    ssh_private_key_file: Option<PathBuf>,
    web_addr_port: Option<String>,
}

/// Validated, immutable configuration for one site.
///
/// Debug output redacts the key via [`SecretString`].
#[derive(Clone, Debug)]
pub struct SyncConfig {
    remote: RemoteUrl,
    ssh_key: SecretString,
    listen_addr: String,
}

impl SyncConfig {
    /// Builds a configuration directly, validating the listen address.
    pub fn new(
        remote: RemoteUrl,
        ssh_key: impl Into<String>,
        listen_addr: &str,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            remote,
            ssh_key: SecretString::from(ssh_key.into()),
            listen_addr: normalize_listen_addr(listen_addr)?,
        })
    }

    /// The remote repository to mirror.
    pub fn remote(&self) -> &RemoteUrl {
        &self.remote
    }

    /// PEM-encoded private key material.
    pub fn ssh_key(&self) -> &SecretString {
        &self.ssh_key
    }

    /// `host:port` the content server binds to.
    pub fn listen_addr(&self) -> &str {
        &self.listen_addr
    }
}

/// Load configuration from `path`, letting process environment variables
/// override file values.
pub fn load(path: &Path) -> Result<SyncConfig, ConfigError> {
    load_with_env(path, |name| std::env::var(name).ok())
}

/// Load configuration from `path` with an explicit environment lookup.
pub fn load_with_env<F>(path: &Path, env: F) -> Result<SyncConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(ConfigError::Missing(path.to_path_buf()));
        }
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let mut file = if contents.trim().is_empty() {
        ConfigFile::default()
    } else {
        serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?
    };

    apply_env_overrides(&mut file, &env);
    file.validate(path.parent())
}

fn apply_env_overrides<F>(file: &mut ConfigFile, env: &F)
where
    F: Fn(&str) -> Option<String>,
{
    let env_trimmed = |name: &str| {
        env(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    if let Some(v) = env_trimmed(ENV_GIT_URL) {
        file.git_url = Some(v);
    }
    // An inline key from the environment replaces any key file from the config.
    if let Some(v) = env_trimmed(ENV_SSH_PRIVATE_KEY) {
        file.ssh_private_key = Some(v);
        file.ssh_private_key_file = None;
    }
    if let Some(v) = env_trimmed(ENV_SSH_PRIVATE_KEY_FILE) {
        file.ssh_private_key = None;
        file.ssh_private_key_file = Some(PathBuf::from(v));
    }
    if let Some(v) = env_trimmed(ENV_WEB_ADDR_PORT) {
        file.web_addr_port = Some(v);
    }
}

enum KeySource {
    Inline(String),
    File(PathBuf),
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl ConfigFile {
    fn validate(self, base_dir: Option<&Path>) -> Result<SyncConfig, ConfigError> {
        let git_url = non_empty(self.git_url);
        let inline_key = non_empty(self.ssh_private_key);
        let key_file = self.ssh_private_key_file.filter(|p| !p.as_os_str().is_empty());

        let key_source = match (inline_key, key_file) {
            (Some(key), _) => Some(KeySource::Inline(key)),
            (None, Some(file)) => Some(KeySource::File(file)),
            (None, None) => None,
        };

        let mut missing = Vec::new();
        if git_url.is_none() {
            missing.push("gitUrl");
        }
        if key_source.is_none() {
            missing.push("sshPrivateKey");
        }
        let (Some(git_url), Some(key_source)) = (git_url, key_source) else {
            return Err(ConfigError::MissingFields(missing));
        };

        let remote: RemoteUrl = git_url.trim().parse()?;

        let ssh_key = match key_source {
            KeySource::Inline(key) => key,
            KeySource::File(file) => read_key_file(&file, base_dir)?,
        };

        let listen_addr = non_empty(self.web_addr_port);
        SyncConfig::new(
            remote,
            ssh_key,
            listen_addr.as_deref().unwrap_or(DEFAULT_LISTEN_ADDR),
        )
    }
}

fn read_key_file(file: &Path, base_dir: Option<&Path>) -> Result<String, ConfigError> {
    let path = resolve_key_path(file, base_dir, dirs::home_dir().as_deref());
    fs::read_to_string(&path).map_err(|source| ConfigError::KeyFile { path, source })
}

/// `~/` is the home directory; other relative paths are resolved against the
/// config file's directory.
fn resolve_key_path(file: &Path, base_dir: Option<&Path>, home: Option<&Path>) -> PathBuf {
    if let (Ok(rest), Some(home)) = (file.strip_prefix("~"), home) {
        return home.join(rest);
    }
    match base_dir {
        Some(base) if file.is_relative() => base.join(file),
        _ => file.to_path_buf(),
    }
}

/// Validate a `host:port` pair. An empty host listens on every interface.
fn normalize_listen_addr(addr: &str) -> Result<String, ConfigError> {
    let addr = addr.trim();
    let invalid = || ConfigError::InvalidListenAddr(addr.to_string());

    let (host, port) = addr.rsplit_once(':').ok_or_else(invalid)?;
    port.parse::<u16>().map_err(|_| invalid())?;
    if host.chars().any(|c| c.is_whitespace() || c == '/') {
        return Err(invalid());
    }

    if host.is_empty() {
        Ok(format!("0.0.0.0:{}", port))
    } else {
        Ok(addr.to_string())
    }
}
