//! SSH private key derivation.
//!
//! Key material is checked up front so a malformed or passphrase-protected key
//! fails before any filesystem or network work. libssh2 only sees keys that
//! passed these checks.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

const OPENSSH_MAGIC: &[u8] = b"openssh-key-v1\0";

/// Errors returned while deriving a key from PEM material.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum KeyError {
    /// No key material was supplied.
    #[error("ssh key is empty")]
    Empty,
    /// Key material is not text.
    #[error("ssh key is not valid UTF-8")]
    NotUtf8,
    /// No `-----BEGIN ...-----` / `-----END ...-----` lines.
    #[error("ssh key is missing PEM armor lines")]
    MissingArmor,
    /// BEGIN and END labels differ.
    #[error("ssh key armor mismatch: BEGIN {begin} / END {end}")]
    MismatchedArmor { begin: String, end: String },
    /// The armor does not describe a private key we can use.
    #[error("unsupported key type: {0}")]
    UnsupportedLabel(String),
    /// The body is not valid base64.
    #[error("ssh key body is not valid base64")]
    InvalidBase64,
    /// An OpenSSH-armored key without the `openssh-key-v1` header.
    #[error("ssh key is not in openssh-key-v1 format")]
    NotOpenSsh,
    /// The OpenSSH key body ended early.
    #[error("ssh key is truncated")]
    Truncated,
    /// The key is protected by a passphrase, which is not supported.
    #[error("ssh key is passphrase-protected; passphrases are not supported")]
    Encrypted,
}

/// Private key container formats accepted by libssh2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFormat {
    /// `OPENSSH PRIVATE KEY` (ssh-keygen's default since 7.8)
    OpenSsh,
    /// `RSA PRIVATE KEY` (PKCS#1)
    Rsa,
    /// `EC PRIVATE KEY` (SEC1)
    Ec,
    /// `DSA PRIVATE KEY`
    Dsa,
    /// `PRIVATE KEY` (unencrypted PKCS#8)
    Pkcs8,
}

impl KeyFormat {
    fn from_label(label: &str) -> Result<Self, KeyError> {
        match label {
            "OPENSSH PRIVATE KEY" => Ok(Self::OpenSsh),
            "RSA PRIVATE KEY" => Ok(Self::Rsa),
            "EC PRIVATE KEY" => Ok(Self::Ec),
            "DSA PRIVATE KEY" => Ok(Self::Dsa),
            "PRIVATE KEY" => Ok(Self::Pkcs8),
            "ENCRYPTED PRIVATE KEY" => Err(KeyError::Encrypted),
            other => Err(KeyError::UnsupportedLabel(other.to_string())),
        }
    }

    /// Short name for log lines.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenSsh => "openssh",
            Self::Rsa => "rsa-pkcs1",
            Self::Ec => "ec-sec1",
            Self::Dsa => "dsa",
            Self::Pkcs8 => "pkcs8",
        }
    }
}

/// A private key that passed derivation checks.
///
/// Debug output redacts the key via [`SecretString`].
#[derive(Debug, Clone)]
pub struct SshKey {
    pem: SecretString,
    format: KeyFormat,
}

impl SshKey {
    /// Derive a key from PEM-encoded private key bytes.
    pub fn parse(material: &[u8]) -> Result<Self, KeyError> {
        if material.iter().all(u8::is_ascii_whitespace) {
            return Err(KeyError::Empty);
        }
        let text = std::str::from_utf8(material).map_err(|_| KeyError::NotUtf8)?;

        let lines: Vec<&str> = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        let (Some(first), Some(last)) = (lines.first(), lines.last()) else {
            return Err(KeyError::Empty);
        };
        if lines.len() < 2 {
            return Err(KeyError::MissingArmor);
        }

        let begin = armor_label(first, "-----BEGIN ").ok_or(KeyError::MissingArmor)?;
        let end = armor_label(last, "-----END ").ok_or(KeyError::MissingArmor)?;
        if begin != end {
            return Err(KeyError::MismatchedArmor {
                begin: begin.to_string(),
                end: end.to_string(),
            });
        }
        let format = KeyFormat::from_label(begin)?;

        let inner = &lines[1..lines.len() - 1];
        // RFC 1421 headers (legacy OpenSSL PEM) carry the encryption marker.
        let (headers, body): (Vec<&str>, Vec<&str>) =
            inner.iter().copied().partition(|line| line.contains(':'));
        if headers
            .iter()
            .any(|h| h.starts_with("Proc-Type:") && h.contains("ENCRYPTED"))
        {
            return Err(KeyError::Encrypted);
        }

        let body = body.concat();
        if body.is_empty() {
            return Err(KeyError::InvalidBase64);
        }
        let decoded = STANDARD
            .decode(body.as_bytes())
            .map_err(|_| KeyError::InvalidBase64)?;

        if format == KeyFormat::OpenSsh {
            check_openssh_body(&decoded)?;
        }

        let mut pem = lines.join("\n");
        pem.push('\n');

        Ok(Self {
            pem: SecretString::from(pem),
            format,
        })
    }

    /// The container format the key was supplied in.
    pub fn format(&self) -> KeyFormat {
        self.format
    }

    /// Normalized PEM text, for handing to libssh2.
    pub(crate) fn pem(&self) -> &str {
        self.pem.expose_secret()
    }
}

fn armor_label<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    line.strip_prefix(prefix)?.strip_suffix("-----")
}

/// Checks the magic and cipher name of an `openssh-key-v1` body.
fn check_openssh_body(decoded: &[u8]) -> Result<(), KeyError> {
    let rest = decoded
        .strip_prefix(OPENSSH_MAGIC)
        .ok_or(KeyError::NotOpenSsh)?;

    let len_bytes: [u8; 4] = rest
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .ok_or(KeyError::Truncated)?;
    let len = u32::from_be_bytes(len_bytes) as usize;
    let cipher = rest.get(4..4 + len).ok_or(KeyError::Truncated)?;

    if cipher != b"none" {
        return Err(KeyError::Encrypted);
    }
    Ok(())
}
