//! Counterfactual smart account resolution.
//!
//! The account factory owns the address derivation. The resolver asks it,
//! with a read-only `eth_call` of `getAddressForCounterfactualAccount`
//! over the account RPC endpoint, where the owner's account will live.
//! Nothing is deployed here; the account infrastructure deploys on the
//! first user operation.

use std::sync::Arc;

use aa_session_core::{
    Address, NetworkConfig,
    address::keccak256,
    config::{AccountDeployment, ConfigError},
    traits::{AccountResolver, ProviderHandle, ResolveError, RpcError, Signer},
};
use aa_session_identity::HttpRpcClient;
use async_trait::async_trait;
use serde_json::{Value, json};
use url::Url;

const COUNTERFACTUAL_ADDRESS_FN: &str =
    "getAddressForCounterfactualAccount(address,bytes,uint256)";
const MODULE_SETUP_FN: &str = "initForSmartAccount(address)";

/// Function selector: the first four bytes of `keccak256(signature)`.
#[must_use]
pub fn selector(signature: &str) -> [u8; 4] {
    let digest = keccak256(signature.as_bytes());
    [digest[0], digest[1], digest[2], digest[3]]
}

fn uint_word(value: u64) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[24..].copy_from_slice(&value.to_be_bytes());
    word
}

/// Setup call the ownership module runs at deployment: `initForSmartAccount(owner)`.
#[must_use]
pub fn module_setup_data(owner: Address) -> Vec<u8> {
    let mut data = Vec::with_capacity(36);
    data.extend_from_slice(&selector(MODULE_SETUP_FN));
    data.extend_from_slice(&owner.to_word());
    data
}

/// ABI-encoded factory call asking for the account of `owner`.
///
/// Layout: selector, module word, offset of the setup bytes, index word,
/// then the setup bytes as length word plus zero-padded payload.
#[must_use]
pub fn counterfactual_calldata(owner: Address, deployment: &AccountDeployment) -> Vec<u8> {
    let setup = module_setup_data(owner);
    let padded = setup.len().div_ceil(32) * 32;
    let mut data = Vec::with_capacity(4 + 32 * 4 + padded);
    data.extend_from_slice(&selector(COUNTERFACTUAL_ADDRESS_FN));
    data.extend_from_slice(&deployment.ownership_module.to_word());
    data.extend_from_slice(&uint_word(3 * 32));
    data.extend_from_slice(&uint_word(deployment.index));
    data.extend_from_slice(&uint_word(setup.len() as u64));
    data.extend_from_slice(&setup);
    data.resize(4 + 32 * 4 + padded, 0);
    data
}

/// Decode the single `address` word an `eth_call` returned.
///
/// # Errors
/// Returns error unless the result is one 32-byte word holding a non-zero address.
pub fn decode_address_word(result: &Value) -> Result<Address, ResolveError> {
    let raw = result
        .as_str()
        .and_then(|s| s.strip_prefix("0x"))
        .ok_or_else(|| ResolveError::InvalidConfig(format!("factory returned {result}")))?;
    if raw.is_empty() {
        return Err(ResolveError::InvalidConfig(
            "no account factory deployed at the configured address".to_string(),
        ));
    }
    let mut word = [0u8; 32];
    hex::decode_to_slice(raw, &mut word)
        .map_err(|e| ResolveError::InvalidConfig(format!("factory returned bad word: {e}")))?;
    if word[..12].iter().any(|b| *b != 0) {
        return Err(ResolveError::InvalidConfig(format!(
            "factory returned a non-address word {result}"
        )));
    }
    let address = Address::from_digest(&word);
    if address == Address::ZERO {
        return Err(ResolveError::InvalidConfig(
            "factory returned the zero address".to_string(),
        ));
    }
    Ok(address)
}

fn invalid_config(err: &ConfigError) -> ResolveError {
    ResolveError::InvalidConfig(err.to_string())
}

/// Map a failed request to `who`: transport trouble is transient, anything
/// the endpoint answered is a configuration problem.
fn classify(who: &str, err: RpcError) -> ResolveError {
    match err {
        RpcError::Transport(e) => ResolveError::NetworkUnreachable(format!("{who}: {e}")),
        RpcError::Disconnected => ResolveError::NetworkUnreachable(format!("{who} disconnected")),
        other => ResolveError::InvalidConfig(format!("{who} rejected request: {other}")),
    }
}

/// Resolver that validates the account client configuration, checks that
/// the bundler serves the configured chain and asks the factory for the
/// owner's account address.
#[derive(Default)]
pub struct BundlerAccountResolver {
    bundler: Option<ProviderHandle>,
    node: Option<ProviderHandle>,
}

impl BundlerAccountResolver {
    /// Resolver talking to the configured bundler and account RPC URLs.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolver using `bundler` and `node` instead of the configured URLs.
    #[must_use]
    pub fn with_endpoints(bundler: ProviderHandle, node: ProviderHandle) -> Self {
        Self {
            bundler: Some(bundler),
            node: Some(node),
        }
    }

    fn endpoint(
        configured: Option<&ProviderHandle>,
        url: Url,
    ) -> Result<ProviderHandle, ResolveError> {
        if let Some(handle) = configured {
            return Ok(Arc::clone(handle));
        }
        let client =
            HttpRpcClient::new(url).map_err(|e| ResolveError::NetworkUnreachable(e.to_string()))?;
        Ok(Arc::new(client) as ProviderHandle)
    }

    async fn check_bundler(
        bundler: &ProviderHandle,
        network: &NetworkConfig,
    ) -> Result<(), ResolveError> {
        let reported = bundler
            .request("eth_chainId", json!([]))
            .await
            .map_err(|e| classify("bundler", e))?;
        let chain_id = reported
            .as_str()
            .and_then(|s| s.strip_prefix("0x"))
            .and_then(|digits| u64::from_str_radix(digits, 16).ok())
            .ok_or_else(|| {
                ResolveError::InvalidConfig(format!("bundler returned bad chain id {reported}"))
            })?;
        if chain_id != network.chain_id {
            return Err(ResolveError::InvalidConfig(format!(
                "bundler serves chain {chain_id}, expected {}",
                network.chain_id
            )));
        }
        Ok(())
    }

    async fn query_factory(
        node: &ProviderHandle,
        owner: Address,
        deployment: &AccountDeployment,
    ) -> Result<Address, ResolveError> {
        let call = json!({
            "to": deployment.factory.to_string(),
            "data": format!("0x{}", hex::encode(counterfactual_calldata(owner, deployment))),
        });
        let result = node
            .request("eth_call", json!([call, "latest"]))
            .await
            .map_err(|e| classify("account factory", e))?;
        decode_address_word(&result)
    }
}

#[async_trait]
impl AccountResolver for BundlerAccountResolver {
    async fn resolve(
        &self,
        signer: &dyn Signer,
        network: &NetworkConfig,
    ) -> Result<Address, ResolveError> {
        network.paymaster_key().map_err(|e| invalid_config(&e))?;
        let bundler_url = network.bundler_endpoint().map_err(|e| invalid_config(&e))?;
        let node_url = network
            .account_rpc_endpoint()
            .map_err(|e| invalid_config(&e))?;

        let owner = signer
            .address()
            .await
            .map_err(|e| ResolveError::SignerRejected(e.to_string()))?;

        let bundler = Self::endpoint(self.bundler.as_ref(), bundler_url)?;
        Self::check_bundler(&bundler, network).await?;

        let node = Self::endpoint(self.node.as_ref(), node_url)?;
        let address = Self::query_factory(&node, owner, &network.account).await?;
        tracing::debug!(
            "Resolved smart account {address} for owner {owner} (index {})",
            network.account.index
        );
        Ok(address)
    }
}
