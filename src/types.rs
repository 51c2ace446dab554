//! Shared types for gitsite

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error type for remote URL parsing failures
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("value cannot be empty")]
    Empty,
    #[error("invalid character in value: {0:?}")]
    InvalidCharacter(char),
    #[error("value cannot start with '{0}'")]
    InvalidStart(char),
    #[error("unsupported scheme '{0}' (use ssh://, user@host:path or file://)")]
    UnsupportedScheme(String),
    #[error("missing host in remote url")]
    MissingHost,
    #[error("missing repository path in remote url")]
    MissingPath,
    #[error("invalid port: {0}")]
    InvalidPort(String),
}

/// How a remote is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteKind {
    /// `ssh://[user@]host[:port]/path`
    Ssh,
    /// scp-like `[user@]host:path`
    Scp,
    /// `file:///path`, a repository on the local filesystem
    File,
}

/// A validated git remote address.
///
/// Only forms that authenticate with an SSH key are accepted, plus `file://`
/// for local mirrors. Validation rules:
/// - Non-empty
/// - No whitespace or control characters
/// - Cannot start with `-`
/// - Must name a host (except `file://`) and a repository path
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteUrl {
    raw: String,
    kind: RemoteKind,
    host: Option<String>,
}

impl RemoteUrl {
    /// Returns the URL exactly as configured
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns how the remote is reached
    pub fn kind(&self) -> RemoteKind {
        self.kind
    }

    /// Returns the host name, if the remote is not local
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// True for remotes that are reached over SSH
    pub fn is_ssh(&self) -> bool {
        matches!(self.kind, RemoteKind::Ssh | RemoteKind::Scp)
    }
}

fn strip_user(authority: &str) -> &str {
    match authority.rsplit_once('@') {
        Some((_, host)) => host,
        None => authority,
    }
}

fn parse_ssh(rest: &str) -> Result<(String, RemoteKind), ParseError> {
    let (authority, path) = rest.split_once('/').ok_or(ParseError::MissingPath)?;
    if path.is_empty() {
        return Err(ParseError::MissingPath);
    }

    let host_port = strip_user(authority);
    let host = match host_port.rsplit_once(':') {
        // Bracketed IPv6 literals keep their inner colons.
        Some((host, port)) if !port.contains(']') => {
            if port.is_empty() || port.parse::<u16>().is_err() {
                return Err(ParseError::InvalidPort(port.to_string()));
            }
            host
        }
        _ => host_port,
    };

    if host.is_empty() {
        return Err(ParseError::MissingHost);
    }
    Ok((host.to_string(), RemoteKind::Ssh))
}

fn parse_scp(s: &str) -> Result<(String, RemoteKind), ParseError> {
    let (authority, path) = s.split_once(':').ok_or(ParseError::MissingHost)?;
    if authority.contains('/') {
        return Err(ParseError::MissingHost);
    }
    let host = strip_user(authority);
    if host.is_empty() {
        return Err(ParseError::MissingHost);
    }
    if path.is_empty() {
        return Err(ParseError::MissingPath);
    }
    Ok((host.to_string(), RemoteKind::Scp))
}

impl FromStr for RemoteUrl {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ParseError::Empty);
        }

        if s.starts_with('-') {
            return Err(ParseError::InvalidStart('-'));
        }

        if let Some(c) = s.chars().find(|c| c.is_whitespace() || c.is_control()) {
            return Err(ParseError::InvalidCharacter(c));
        }

        let (host, kind) = if let Some((scheme, rest)) = s.split_once("://") {
            match scheme.to_ascii_lowercase().as_str() {
                "ssh" | "git+ssh" | "ssh+git" => {
                    let (host, kind) = parse_ssh(rest)?;
                    (Some(host), kind)
                }
                "file" => {
                    if rest.is_empty() || rest == "/" {
                        return Err(ParseError::MissingPath);
                    }
                    (None, RemoteKind::File)
                }
                other => return Err(ParseError::UnsupportedScheme(other.to_string())),
            }
        } else {
            let (host, kind) = parse_scp(s)?;
            (Some(host), kind)
        };

        Ok(RemoteUrl {
            raw: s.to_string(),
            kind,
            host,
        })
    }
}

impl fmt::Display for RemoteUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}
