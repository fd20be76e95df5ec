//! Chain state reads through a provider handle.

use aa_session_core::{
    Address, Balance, NetworkConfig,
    traits::{Eip1193Provider, ReadError},
};
use serde_json::{Value, json};

/// Parse an `eth_accounts` result.
fn parse_accounts(value: &Value) -> Result<Vec<Address>, String> {
    let entries = value
        .as_array()
        .ok_or_else(|| format!("expected an array of accounts, got {value}"))?;
    entries
        .iter()
        .map(|entry| {
            entry
                .as_str()
                .ok_or_else(|| format!("account is not a string: {entry}"))?
                .parse::<Address>()
                .map_err(|e| e.to_string())
        })
        .collect()
}

/// Reads balances and accounts for the UI.
#[derive(Debug, Clone, Copy)]
pub struct ChainStateReader {
    decimals: u8,
}

impl ChainStateReader {
    /// Reader converting with a fixed decimal exponent.
    #[must_use]
    pub const fn new(decimals: u8) -> Self {
        Self { decimals }
    }

    /// Reader for the native token of `network`.
    #[must_use]
    pub const fn for_network(network: &NetworkConfig) -> Self {
        Self::new(network.decimals())
    }

    /// Native-token balance of `address` in display units.
    ///
    /// # Errors
    /// Returns `ProviderUnavailable` when the handle is stale or disconnected,
    /// `InvalidResponse` when the node returns something that is not a quantity.
    pub async fn read_balance(
        &self,
        provider: &dyn Eip1193Provider,
        address: Address,
    ) -> Result<Balance, ReadError> {
        let raw = provider
            .request("eth_getBalance", json!([address.to_string(), "latest"]))
            .await?;
        let quantity = match &raw {
            Value::String(s) => s.clone(),
            Value::Number(n) if n.is_u64() => n.to_string(),
            other => {
                return Err(ReadError::InvalidResponse(format!(
                    "balance is not a quantity: {other}"
                )));
            }
        };
        Balance::from_quantity(&quantity, self.decimals)
            .map_err(|e| ReadError::InvalidResponse(e.to_string()))
    }

    /// Accounts exposed by the provider. Independent of the decimal exponent.
    ///
    /// # Errors
    /// Returns `ProviderUnavailable` when the handle is stale or disconnected,
    /// `InvalidResponse` when the result is not a list of addresses.
    pub async fn read_accounts(provider: &dyn Eip1193Provider) -> Result<Vec<Address>, ReadError> {
        let raw = provider.request("eth_accounts", json!([])).await?;
        parse_accounts(&raw).map_err(ReadError::InvalidResponse)
    }
}
