//! Network and identity-provider configuration.
//!
//! `NetworkConfig` is built once at process start and shared read-only
//! behind an `Arc`. Credentials it carries are validated lazily, when the
//! component that needs them first runs.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::Address;

/// Placeholder substituted with the chain id in bundler URL templates.
pub const CHAIN_ID_PLACEHOLDER: &str = "{chain_id}";

/// Biconomy v2 smart account factory.
const DEFAULT_FACTORY: Address = Address::from_bytes([
    0x00, 0x00, 0x00, 0xa5, 0x6a, 0xac, 0xa3, 0xe9, 0xa4, 0xc4, 0x79, 0xea, 0x6b, 0x6c, 0xd0, 0xdb,
    0xcb, 0x66, 0x34, 0xf5,
]);

/// ECDSA ownership module that validates user operations for the owner key.
const DEFAULT_OWNERSHIP_MODULE: Address = Address::from_bytes([
    0x00, 0x00, 0x00, 0x1c, 0x5b, 0x32, 0xf3, 0x7f, 0x5b, 0xea, 0x87, 0xbd, 0xd5, 0x37, 0x4e, 0xb2,
    0xac, 0x54, 0xea, 0x8e,
]);

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Missing configuration value: {0}")]
    Missing(&'static str),
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: &'static str, message: String },
    #[error("Failed to parse configuration: {0}")]
    Parse(String),
}

impl ConfigError {
    fn invalid(key: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            key,
            message: message.into(),
        }
    }
}

/// Native token of a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeCurrency {
    /// Ticker, e.g. `MATIC`.
    pub symbol: String,
    /// Long name, e.g. `Matic`.
    pub name: String,
    /// Decimal exponent between the smallest unit and the display unit.
    pub decimals: u8,
}

/// Human-facing chain metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayMetadata {
    /// Chain display name.
    pub name: String,
    /// Block explorer base URL.
    pub explorer_url: String,
    /// Native token.
    pub currency: NativeCurrency,
}

/// Smart account deployment parameters the factory derives addresses from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountDeployment {
    /// Factory that deploys account proxies and answers address queries.
    pub factory: Address,
    /// Module installed at deployment that binds the account to its owner.
    pub ownership_module: Address,
    /// Account index for owners holding several accounts.
    #[serde(default)]
    pub index: u64,
    /// RPC endpoint the factory is queried through. Falls back to
    /// `NetworkConfig::rpc_url` when unset.
    #[serde(default)]
    pub rpc_url: Option<String>,
}

impl Default for AccountDeployment {
    fn default() -> Self {
        Self {
            factory: DEFAULT_FACTORY,
            ownership_module: DEFAULT_OWNERSHIP_MODULE,
            index: 0,
            rpc_url: None,
        }
    }
}

/// Immutable description of the target chain and account infrastructure.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// EIP-155 chain id.
    pub chain_id: u64,
    /// JSON-RPC endpoint of the chain.
    pub rpc_url: String,
    /// Bundler endpoint; may contain `{chain_id}`.
    pub bundler_url: String,
    /// Paymaster API credential.
    #[serde(default)]
    pub paymaster_api_key: Option<String>,
    /// Identity provider client id.
    #[serde(default)]
    pub client_id: String,
    /// Display metadata.
    pub display: DisplayMetadata,
    /// Account deployment parameters.
    #[serde(default)]
    pub account: AccountDeployment,
}

impl fmt::Debug for NetworkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkConfig")
            .field("chain_id", &self.chain_id)
            .field("rpc_url", &self.rpc_url)
            .field("bundler_url", &self.bundler_url)
            .field(
                "paymaster_api_key",
                &self.paymaster_api_key.as_ref().map(|_| "<redacted>"),
            )
            .field("client_id", &self.client_id)
            .field("display", &self.display)
            .field("account", &self.account)
            .finish()
    }
}

impl NetworkConfig {
    /// Polygon Mumbai testnet with Biconomy's hosted bundler.
    #[must_use]
    pub fn polygon_mumbai() -> Self {
        Self {
            chain_id: 80001,
            rpc_url: "https://rpc.ankr.com/polygon_mumbai".to_string(),
            bundler_url: format!(
                "https://bundler.biconomy.io/api/v2/{CHAIN_ID_PLACEHOLDER}/nJPK7B3ru.dd7f7861-190d-41bd-af80-6877f74b8f44"
            ),
            paymaster_api_key: None,
            client_id: String::new(),
            display: DisplayMetadata {
                name: "Polygon Mumbai Testnet".to_string(),
                explorer_url: "https://mumbai.polygonscan.com/".to_string(),
                currency: NativeCurrency {
                    symbol: "MATIC".to_string(),
                    name: "Matic".to_string(),
                    decimals: 18,
                },
            },
            account: AccountDeployment::default(),
        }
    }

    /// Load from the process environment on top of the Mumbai preset.
    ///
    /// # Errors
    /// Returns error if a variable is present but malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup on top of the Mumbai preset.
    ///
    /// Recognised keys: `AUTHWEB3_CLIENT_ID`, `BICONOMY_PAYMASTER`,
    /// `AA_BUNDLER_URL`, `AA_RPC_URL`, `AA_CHAIN_ID`.
    ///
    /// # Errors
    /// Returns error if `AA_CHAIN_ID` is not an integer.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::polygon_mumbai();
        if let Some(client_id) = lookup("AUTHWEB3_CLIENT_ID") {
            config.client_id = client_id;
        }
        if let Some(key) = lookup("BICONOMY_PAYMASTER") {
            config.paymaster_api_key = Some(key);
        }
        if let Some(url) = lookup("AA_BUNDLER_URL") {
            config.bundler_url = url;
        }
        if let Some(url) = lookup("AA_RPC_URL") {
            config.rpc_url = url;
        }
        if let Some(chain_id) = lookup("AA_CHAIN_ID") {
            config.chain_id = chain_id
                .trim()
                .parse()
                .map_err(|e| ConfigError::invalid("AA_CHAIN_ID", format!("{e}")))?;
        }
        Ok(config)
    }

    /// Parse a TOML document.
    ///
    /// # Errors
    /// Returns error if the document does not describe a network.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Chain id as a `0x`-prefixed hex string.
    #[must_use]
    pub fn chain_id_hex(&self) -> String {
        format!("{:#x}", self.chain_id)
    }

    /// Native token decimal exponent.
    #[must_use]
    pub const fn decimals(&self) -> u8 {
        self.display.currency.decimals
    }

    /// Bundler endpoint with the chain id substituted.
    ///
    /// # Errors
    /// Returns error if the URL is malformed or not HTTP(S).
    pub fn bundler_endpoint(&self) -> Result<Url, ConfigError> {
        let rendered = self
            .bundler_url
            .replace(CHAIN_ID_PLACEHOLDER, &self.chain_id.to_string());
        parse_http_url("bundler_url", &rendered)
    }

    /// Paymaster credential, required to be non-empty.
    ///
    /// # Errors
    /// Returns error if the credential is missing or blank.
    pub fn paymaster_key(&self) -> Result<&str, ConfigError> {
        match self.paymaster_api_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => Ok(key),
            _ => Err(ConfigError::Missing("paymaster_api_key")),
        }
    }

    /// RPC endpoint used for account resolution.
    ///
    /// # Errors
    /// Returns error if the URL is malformed or not HTTP(S).
    pub fn account_rpc_endpoint(&self) -> Result<Url, ConfigError> {
        let raw = self
            .account
            .rpc_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .unwrap_or(&self.rpc_url);
        parse_http_url("account.rpc_url", raw)
    }

    /// Chain RPC endpoint.
    ///
    /// # Errors
    /// Returns error if the URL is malformed or not HTTP(S).
    pub fn rpc_endpoint(&self) -> Result<Url, ConfigError> {
        parse_http_url("rpc_url", &self.rpc_url)
    }
}

fn parse_http_url(key: &'static str, raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw.trim()).map_err(|e| ConfigError::invalid(key, e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ConfigError::invalid(key, format!("unsupported scheme {other}"))),
    }
}

/// Chain namespace understood by the identity provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainNamespace {
    Eip155,
    Solana,
    Other,
}

/// Chain description handed to the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainConfig {
    pub chain_namespace: ChainNamespace,
    /// Hex chain id, e.g. `0x13881`.
    pub chain_id: String,
    pub rpc_target: String,
    pub display_name: String,
    pub block_explorer: String,
    pub ticker: String,
    pub ticker_name: String,
}

/// Theme of the login modal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThemeMode {
    Light,
    #[default]
    Dark,
    Auto,
}

/// Which login group the modal highlights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PrimaryButton {
    #[default]
    SocialLogin,
    EmailLogin,
    ExternalLogin,
}

/// Login modal presentation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiConfig {
    pub app_name: String,
    pub mode: ThemeMode,
    pub login_methods_order: Vec<String>,
    pub logo_light: String,
    pub logo_dark: String,
    pub default_language: String,
    pub login_grid_col: u8,
    pub primary_button: PrimaryButton,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            app_name: "Smart Account Login".to_string(),
            mode: ThemeMode::Dark,
            login_methods_order: vec!["google".to_string()],
            logo_light: "https://web3auth.io/images/web3auth-logo.svg".to_string(),
            logo_dark: "https://web3auth.io/images/web3auth-logo---Dark.svg".to_string(),
            default_language: "en".to_string(),
            login_grid_col: 3,
            primary_button: PrimaryButton::SocialLogin,
        }
    }
}

/// Identity provider configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityConfig {
    pub client_id: String,
    /// Provider deployment, e.g. `sapphire_devnet`.
    pub network: String,
    pub chain: ChainConfig,
    pub ui: UiConfig,
}

impl IdentityConfig {
    /// Derive the provider configuration from a network.
    #[must_use]
    pub fn for_network(network: &NetworkConfig) -> Self {
        Self {
            client_id: network.client_id.clone(),
            network: "sapphire_devnet".to_string(),
            chain: ChainConfig {
                chain_namespace: ChainNamespace::Eip155,
                chain_id: network.chain_id_hex(),
                rpc_target: network.rpc_url.clone(),
                display_name: network.display.name.clone(),
                block_explorer: network.display.explorer_url.clone(),
                ticker: network.display.currency.symbol.clone(),
                ticker_name: network.display.currency.name.clone(),
            },
            ui: UiConfig::default(),
        }
    }

    /// Check that the provider could be constructed from this configuration.
    ///
    /// # Errors
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client_id.trim().is_empty() {
            return Err(ConfigError::Missing("client_id"));
        }
        let hex_id = self
            .chain
            .chain_id
            .strip_prefix("0x")
            .ok_or_else(|| ConfigError::invalid("chain.chain_id", "missing 0x prefix"))?;
        u64::from_str_radix(hex_id, 16)
            .map_err(|e| ConfigError::invalid("chain.chain_id", e.to_string()))?;
        parse_http_url("chain.rpc_target", &self.chain.rpc_target)?;
        if self.ui.login_grid_col == 0 {
            return Err(ConfigError::invalid("ui.login_grid_col", "must be positive"));
        }
        Ok(())
    }
}
