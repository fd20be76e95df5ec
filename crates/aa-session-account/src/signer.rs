//! Signer binding over a provider handle.

use aa_session_core::{
    Address,
    traits::{BindError, ProviderHandle, Signer, SignerError},
};
use async_trait::async_trait;
use serde_json::{Value, json};

use crate::chain::ChainStateReader;

/// Signer that delegates to the provider's signing methods.
pub struct ProviderSigner {
    provider: ProviderHandle,
    address: Address,
}

impl ProviderSigner {
    /// Underlying provider handle.
    #[must_use]
    pub const fn provider(&self) -> &ProviderHandle {
        &self.provider
    }

    /// Address of the bound account.
    #[must_use]
    pub const fn owner(&self) -> Address {
        self.address
    }
}

#[async_trait]
impl Signer for ProviderSigner {
    async fn address(&self) -> Result<Address, SignerError> {
        Ok(self.address)
    }

    async fn sign_message(&self, message: &[u8]) -> Result<String, SignerError> {
        let payload = format!("0x{}", hex::encode(message));
        let signature = self
            .provider
            .request("personal_sign", json!([payload, self.address.to_string()]))
            .await?;
        signature
            .as_str()
            .map(ToString::to_string)
            .ok_or_else(|| SignerError::Rejected(format!("unexpected signature: {signature}")))
    }

    async fn sign_transaction(&self, tx: &Value) -> Result<String, SignerError> {
        let mut tx = tx.clone();
        let object = tx
            .as_object_mut()
            .ok_or_else(|| SignerError::Rejected("transaction must be an object".to_string()))?;
        object
            .entry("from")
            .or_insert_with(|| json!(self.address.to_string()));
        let signed = self
            .provider
            .request("eth_signTransaction", json!([tx]))
            .await?;
        signed
            .as_str()
            .map(ToString::to_string)
            .ok_or_else(|| SignerError::Rejected(format!("unexpected signed transaction: {signed}")))
    }
}

/// Converts connected provider handles into signers.
#[derive(Debug, Default, Clone, Copy)]
pub struct SignerBinder;

impl SignerBinder {
    /// Wrap `provider` into a signer for its first account.
    ///
    /// # Errors
    /// Returns `IncompatibleProvider` if the handle cannot list accounts or
    /// exposes none.
    pub async fn bind(&self, provider: ProviderHandle) -> Result<ProviderSigner, BindError> {
        let accounts = ChainStateReader::read_accounts(provider.as_ref())
            .await
            .map_err(|e| BindError::IncompatibleProvider(format!("eth_accounts: {e}")))?;
        let address = accounts.first().copied().ok_or_else(|| {
            BindError::IncompatibleProvider("provider exposes no accounts".to_string())
        })?;
        tracing::debug!("Bound signer for {address}");
        Ok(ProviderSigner { provider, address })
    }
}
