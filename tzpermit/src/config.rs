//! Gas station configuration.
//!
//! Loaded from a TOML file. String values may reference environment
//! variables as `$VAR` or `${VAR}`. `relayer` and `estimator_public_key` are
//! required; the estimator key must belong to a revealed account.
//!
//! ```toml
//! rpc_url = "https://rpc.tzbeta.net"
//! relayer = "$RELAYER_ADDRESS"
//! estimator_public_key = "edpk..."
//! request_timeout_secs = 30
//! ```
//!
//! # Environment Variables
//!
//! - `CONFIG`: path of the configuration file (default: `gas-station.toml`)
//! - `RPC_URL`: overrides `rpc_url`

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::types::{Address, PublicKey};

/// Default configuration file name.
pub const DEFAULT_CONFIG_PATH: &str = "gas-station.toml";

/// Errors from loading a configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("cannot read {path}: {source}")]
    Read {
        /// Path of the file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The TOML is malformed or has invalid values.
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Settings shared by the permit builder, the estimator and the node client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasStationConfig {
    /// Base URL of the Tezos node RPC.
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,

    /// Account credited with the relayer fee leg.
    pub relayer: Address,

    /// Public key of the revealed account fee simulations run under.
    pub estimator_public_key: PublicKey,

    /// Per-request timeout of the node client, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
}

fn default_rpc_url() -> String {
    "http://localhost:8732".to_owned()
}

impl GasStationConfig {
    /// Loads the file named by `CONFIG`, or `gas-station.toml`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_owned());
        Self::load_from(path)
    }

    /// Loads a specific file. A missing file is read as empty, which fails on
    /// the required settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = if path.exists() {
            std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_owned(),
                source,
            })?
        } else {
            String::new()
        };
        Self::from_toml(&content, |name| std::env::var(name).ok())
    }

    /// Parses TOML, resolving variables and overrides through `env`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the expanded TOML is invalid.
    pub fn from_toml(content: &str, env: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(&expand_vars(content, &env))?;
        if let Some(url) = env("RPC_URL") {
            config.rpc_url = url;
        }
        Ok(config)
    }
}

/// Replaces `$VAR` and `${VAR}` with values from `env`. Unknown variables
/// stay as written.
fn expand_vars(input: &str, env: &impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        let (name, consumed, braced) = if let Some(inner) = after.strip_prefix('{') {
            match inner.find('}') {
                Some(end) => (&inner[..end], end + 2, true),
                None => ("", 0, true),
            }
        } else {
            let end = after
                .find(|c: char| !c.is_ascii_alphanumeric() && c != '_')
                .unwrap_or(after.len());
            (&after[..end], end, false)
        };

        match (!name.is_empty()).then(|| env(name)).flatten() {
            Some(value) => out.push_str(&value),
            None if name.is_empty() => {
                out.push('$');
                rest = after;
                continue;
            }
            None if braced => {
                out.push_str("${");
                out.push_str(name);
                out.push('}');
            }
            None => {
                out.push('$');
                out.push_str(name);
            }
        }
        rest = &after[consumed..];
    }
    out.push_str(rest);
    out
}
