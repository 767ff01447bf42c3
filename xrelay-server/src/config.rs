//! Relay server configuration.
//!
//! Loads configuration from a TOML file with support for environment variable
//! expansion in string values. Variables use `$VAR` or `${VAR}` syntax.
//!
//! # Example Configuration
//!
//! ```toml
//! host = "0.0.0.0"
//! port = 8080
//! read_timeout_ms = 5000
//! relay_private_key = "$RELAY_PRIVATE_KEY"
//! signature_mode = "strict"
//!
//! [chains."11155111"]
//! rpc_url = "https://ethereum-sepolia-rpc.publicnode.com"
//! userop_hash = "unpacked"
//!
//! [chains."200810"]
//! rpc_url = "$BITLAYER_RPC_URL"
//! escrow_proxy_code = "0x6080..."
//! ```
//!
//! # Environment Variables
//!
//! - `CONFIG` - Path to configuration file (default: `config.toml`)
//! - `HOST` - Override server bind address
//! - `PORT` - Override server port
//! - Secrets referenced by `$VAR` in the config file

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::time::Duration;

use alloy_primitives::{B256, Bytes};
use serde::{Deserialize, Serialize};
use xrelay::ChainId;
use xrelay_evm::UserOpHashScheme;
use xrelay_evm::escrow::{DEFAULT_ESCROW_SALT, DEFAULT_EXTEND_SECONDS};
use xrelay_tvm::SignatureMode;
use xrelay_tvm::view::DEFAULT_TON_API_URL;

/// Errors raised while loading the configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// Config path.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The file is not valid TOML for [`RelayConfig`].
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    /// A `chains` key is not a chain id.
    #[error("invalid chain key {0:?}")]
    ChainKey(String),
}

/// Top-level relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Server bind address (default: `0.0.0.0`).
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Server port (default: `8080`).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Upper bound for every ledger read, in milliseconds (default: `5000`).
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Upper bound for waiting on a relay transaction receipt, in milliseconds
    /// (default: `60000`).
    #[serde(default = "default_receipt_timeout_ms")]
    pub receipt_timeout_ms: u64,

    /// Relay signing key (hex, with or without `0x`). When absent the relay
    /// validates signed artifacts but never pays out.
    #[serde(default)]
    pub relay_private_key: Option<String>,

    /// Base URL of the TON API accounts endpoint.
    #[serde(default = "default_tvm_api_url")]
    pub tvm_api_url: String,

    /// Per-chain overrides keyed by decimal or hex chain id.
    #[serde(default)]
    pub chains: HashMap<String, ChainConfig>,

    /// CREATE2 salt for escrow deployment.
    #[serde(default = "default_escrow_salt")]
    pub escrow_salt: B256,

    /// Salt passed to the simple-account factory.
    #[serde(default)]
    pub account_salt: u64,

    /// Lock extension offered to users, in seconds (default: `3600`).
    #[serde(default = "default_extend_lock_seconds")]
    pub extend_lock_seconds: u64,

    /// Recovery-id handling for cross-VM signatures.
    #[serde(default)]
    pub signature_mode: SignatureMode,
}

/// Per-chain configuration for an EVM network.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChainConfig {
    /// HTTP RPC endpoint URL. Falls back to the built-in public endpoint.
    #[serde(default)]
    pub rpc_url: Option<String>,

    /// Escrow proxy creation code. When set, escrow addresses are derived
    /// locally instead of asking the factory.
    #[serde(default)]
    pub escrow_proxy_code: Option<Bytes>,

    /// User-operation hashing scheme expected by the chain's entrypoint.
    #[serde(default)]
    pub userop_hash: UserOpHashScheme,
}

const fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

const fn default_port() -> u16 {
    8080
}

const fn default_read_timeout_ms() -> u64 {
    5000
}

const fn default_receipt_timeout_ms() -> u64 {
    60_000
}

fn default_tvm_api_url() -> String {
    DEFAULT_TON_API_URL.to_owned()
}

const fn default_escrow_salt() -> B256 {
    DEFAULT_ESCROW_SALT
}

const fn default_extend_lock_seconds() -> u64 {
    DEFAULT_EXTEND_SECONDS
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            read_timeout_ms: default_read_timeout_ms(),
            receipt_timeout_ms: default_receipt_timeout_ms(),
            relay_private_key: None,
            tvm_api_url: default_tvm_api_url(),
            chains: HashMap::new(),
            escrow_salt: default_escrow_salt(),
            account_salt: 0,
            extend_lock_seconds: default_extend_lock_seconds(),
            signature_mode: SignatureMode::default(),
        }
    }
}

impl RelayConfig {
    /// Loads configuration from the path given by the `CONFIG` environment
    /// variable, falling back to `config.toml` in the current directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("CONFIG").unwrap_or_else(|_| "config.toml".to_owned());
        Self::load_from(&path)
    }

    /// Loads configuration from a specific file path.
    ///
    /// A missing file yields the defaults. String values are expanded from the
    /// process environment before parsing, then `HOST` and `PORT` override
    /// the file values.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = if path.exists() {
            std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.display().to_string(),
                source,
            })?
        } else {
            String::new()
        };

        let mut config = Self::from_toml(&content)?;

        if let Ok(host) = std::env::var("HOST")
            && let Ok(addr) = host.parse()
        {
            config.host = addr;
        }
        if let Ok(port) = std::env::var("PORT")
            && let Ok(p) = port.parse()
        {
            config.port = p;
        }

        Ok(config)
    }

    /// Parses a TOML document after environment expansion.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] on invalid TOML or field values.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(&expand_env_vars(content))?)
    }

    /// Per-read timeout.
    #[must_use]
    pub const fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Receipt wait timeout.
    #[must_use]
    pub const fn receipt_timeout(&self) -> Duration {
        Duration::from_millis(self.receipt_timeout_ms)
    }

    /// Returns the relay key, unless it is empty or still an unresolved
    /// `$VAR` reference.
    #[must_use]
    pub fn relay_key(&self) -> Option<&str> {
        self.relay_private_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty() && !k.starts_with('$'))
    }

    /// Chain overrides keyed by parsed chain id.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ChainKey`] for a key that is not a chain id.
    pub fn chain_overrides(&self) -> Result<HashMap<ChainId, &ChainConfig>, ConfigError> {
        self.chains
            .iter()
            .map(|(key, chain)| {
                key.parse::<ChainId>()
                    .map(|id| (id, chain))
                    .map_err(|_| ConfigError::ChainKey(key.clone()))
            })
            .collect()
    }
}

/// Expands `$VAR` and `${VAR}` patterns in a string from environment variables.
///
/// Unresolved variables are left as-is.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' {
            result.push(ch);
            continue;
        }
        let braced = chars.peek() == Some(&'{');
        if braced {
            chars.next();
        }

        let mut var_name = String::new();
        while let Some(&c) = chars.peek() {
            if braced {
                if c == '}' {
                    chars.next();
                    break;
                }
            } else if !c.is_ascii_alphanumeric() && c != '_' {
                break;
            }
            var_name.push(c);
            chars.next();
        }

        if var_name.is_empty() {
            result.push('$');
            if braced {
                result.push('{');
            }
        } else if let Ok(val) = std::env::var(&var_name) {
            result.push_str(&val);
        } else {
            result.push('$');
            if braced {
                result.push('{');
            }
            result.push_str(&var_name);
            if braced {
                result.push('}');
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_document() {
        let config = RelayConfig::from_toml("").unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.read_timeout(), Duration::from_secs(5));
        assert_eq!(config.extend_lock_seconds, 3600);
        assert_eq!(config.escrow_salt, DEFAULT_ESCROW_SALT);
        assert_eq!(config.signature_mode, SignatureMode::Strict);
        assert_eq!(config.tvm_api_url, DEFAULT_TON_API_URL);
        assert!(config.relay_key().is_none());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = RelayConfig::load_from("/definitely/not/here/xrelay.toml").unwrap();
        assert!(config.chains.is_empty());
    }

    #[test]
    fn test_chain_section() {
        let config = RelayConfig::from_toml(
            r#"
            signature_mode = "ignore-recovery-id"

            [chains."0xAA36A7"]
            rpc_url = "http://localhost:8545"
            escrow_proxy_code = "0x6080"
            userop_hash = "packed"
            "#,
        )
        .unwrap();
        assert_eq!(config.signature_mode, SignatureMode::IgnoreRecoveryId);
        let chains = config.chain_overrides().unwrap();
        let sepolia = chains[&ChainId::new(11_155_111)];
        assert_eq!(sepolia.rpc_url.as_deref(), Some("http://localhost:8545"));
        assert_eq!(
            sepolia.escrow_proxy_code.as_ref().map(|code| code.to_vec()),
            Some(vec![0x60, 0x80])
        );
        assert_eq!(sepolia.userop_hash, UserOpHashScheme::Packed);
    }

    #[test]
    fn test_bad_chain_key() {
        let config = RelayConfig::from_toml("[chains.sepolia]\n").unwrap();
        assert!(matches!(
            config.chain_overrides(),
            Err(ConfigError::ChainKey(k)) if k == "sepolia"
        ));
    }

    #[test]
    fn test_expand_env_vars() {
        // PATH is set in every test environment
        let path = std::env::var("PATH").unwrap();
        assert_eq!(expand_env_vars("a=$PATH"), format!("a={path}"));
        assert_eq!(expand_env_vars("a=${PATH}!"), format!("a={path}!"));
        assert_eq!(
            expand_env_vars("k=$XRELAY_SURELY_UNSET_VAR"),
            "k=$XRELAY_SURELY_UNSET_VAR"
        );
        assert_eq!(expand_env_vars("${XRELAY_UNSET}"), "${XRELAY_UNSET}");
        assert_eq!(expand_env_vars("cost $ 5"), "cost $ 5");
    }

    #[test]
    fn test_unresolved_relay_key_is_ignored() {
        let config =
            RelayConfig::from_toml("relay_private_key = \"$XRELAY_UNSET_RELAY_KEY\"").unwrap();
        assert!(config.relay_key().is_none());
        let config = RelayConfig::from_toml("relay_private_key = \" 0xabc \"").unwrap();
        assert_eq!(config.relay_key(), Some("0xabc"));
    }
}
