//! Private-key provider for development and tests.
//!
//! `LocalKeyProvider` answers account and signing requests from an in-memory
//! secp256k1 key and forwards everything else to an upstream JSON-RPC node.
//! Transactions are signed as EIP-1559 envelopes.

use std::{
    fmt,
    sync::{
        Arc, PoisonError, RwLock,
        atomic::{AtomicBool, Ordering},
    },
};

use aa_session_core::{
    Address, IdentityConfig, IdentityProfile,
    address::keccak256,
    traits::{AuthError, Eip1193Provider, InitError, ProviderHandle, RpcError},
};
use async_trait::async_trait;
use k256::ecdsa::{SigningKey, VerifyingKey};
use serde_json::{Value, json};
use thiserror::Error;
use url::Url;

use crate::{HttpRpcClient, LoginBackend, tx::Eip1559Transaction};

/// Key parsing error.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("Private key must be 32 bytes of hex")]
    InvalidHex,
    #[error("Private key is not a valid secp256k1 scalar")]
    InvalidScalar,
}

/// Parse a `0x`-prefixed or bare hex secp256k1 private key.
///
/// # Errors
/// Returns error if the key is malformed.
pub fn parse_private_key(raw: &str) -> Result<SigningKey, KeyError> {
    let trimmed = raw.trim();
    let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    let mut bytes = [0u8; 32];
    hex::decode_to_slice(digits, &mut bytes).map_err(|_| KeyError::InvalidHex)?;
    SigningKey::from_slice(&bytes).map_err(|_| KeyError::InvalidScalar)
}

/// Address controlled by a verifying key.
#[must_use]
pub fn address_of(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    Address::from_digest(&keccak256(&point.as_bytes()[1..]))
}

/// EIP-191 personal message digest.
#[must_use]
pub fn personal_message_hash(message: &[u8]) -> [u8; 32] {
    let mut preimage = format!("\x19Ethereum Signed Message:\n{}", message.len()).into_bytes();
    preimage.extend_from_slice(message);
    keccak256(&preimage)
}

/// EIP-1193 provider backed by a local private key.
pub struct LocalKeyProvider {
    signing_key: SigningKey,
    address: Address,
    chain_id: u64,
    upstream: Option<ProviderHandle>,
    connected: AtomicBool,
}

impl fmt::Debug for LocalKeyProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalKeyProvider")
            .field("address", &self.address)
            .field("chain_id", &self.chain_id)
            .field("connected", &self.connected.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl LocalKeyProvider {
    /// Create a provider for `signing_key` on `chain_id`.
    #[must_use]
    pub fn new(signing_key: SigningKey, chain_id: u64, upstream: Option<ProviderHandle>) -> Self {
        let address = address_of(signing_key.verifying_key());
        Self {
            signing_key,
            address,
            chain_id,
            upstream,
            connected: AtomicBool::new(true),
        }
    }

    /// Address of the key.
    #[must_use]
    pub const fn address(&self) -> Address {
        self.address
    }

    /// Invalidate this handle; later requests fail with `Disconnected`.
    pub fn revoke(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Sign `message` per EIP-191, returning `r || s || v` with `v` in {27, 28}.
    ///
    /// # Errors
    /// Returns error if signing fails.
    pub fn sign_personal(&self, message: &[u8]) -> Result<String, RpcError> {
        let digest = personal_message_hash(message);
        let (signature, recovery_id) = self
            .signing_key
            .sign_prehash_recoverable(&digest)
            .map_err(|e| RpcError::Rpc {
                code: -32603,
                message: e.to_string(),
            })?;
        let mut bytes = signature.to_bytes().to_vec();
        bytes.push(recovery_id.to_byte() + 27);
        Ok(format!("0x{}", hex::encode(bytes)))
    }

    /// Sign an EIP-1559 transaction request, returning the raw envelope.
    ///
    /// # Errors
    /// Returns error if the request is incomplete or signing fails.
    pub fn sign_transaction(&self, request: &Value) -> Result<String, RpcError> {
        let tx = Eip1559Transaction::from_request(request, self.chain_id)
            .map_err(|e| invalid_params(e.to_string()))?;
        let (signature, recovery_id) = self
            .signing_key
            .sign_prehash_recoverable(&tx.signing_hash())
            .map_err(|e| RpcError::Rpc {
                code: -32603,
                message: e.to_string(),
            })?;
        let rs = signature.to_bytes();
        let raw = tx.encode_signed(recovery_id.is_y_odd(), &rs[..32], &rs[32..]);
        Ok(format!("0x{}", hex::encode(raw)))
    }

    /// Fill in the pending nonce from upstream when the request has none.
    async fn with_nonce(&self, request: &Value) -> Result<Value, RpcError> {
        let mut request = request.clone();
        let object = request
            .as_object_mut()
            .ok_or_else(|| invalid_params("transaction must be an object"))?;
        if object.get("nonce").is_some_and(|n| !n.is_null()) {
            return Ok(request);
        }
        let upstream = self
            .upstream
            .as_ref()
            .ok_or_else(|| invalid_params("missing nonce and no node to look it up"))?;
        let nonce = upstream
            .request(
                "eth_getTransactionCount",
                json!([self.address.to_string(), "pending"]),
            )
            .await?;
        object.insert("nonce".to_string(), nonce);
        Ok(request)
    }

    fn check_signer(&self, raw: Option<&Value>) -> Result<(), RpcError> {
        let requested: Address = raw
            .and_then(Value::as_str)
            .ok_or_else(|| invalid_params("missing signer address"))?
            .parse()
            .map_err(|e| invalid_params(format!("{e}")))?;
        if requested == self.address {
            Ok(())
        } else {
            Err(RpcError::Rpc {
                code: 4100,
                message: format!("{requested} is not an account of this provider"),
            })
        }
    }
}

fn invalid_params(message: impl Into<String>) -> RpcError {
    RpcError::Rpc {
        code: -32602,
        message: message.into(),
    }
}

/// Decode a `personal_sign` payload: hex data when `0x`-prefixed, UTF-8 otherwise.
fn message_bytes(raw: Option<&Value>) -> Result<Vec<u8>, RpcError> {
    let text = raw
        .and_then(Value::as_str)
        .ok_or_else(|| invalid_params("missing message"))?;
    match text.strip_prefix("0x") {
        Some(digits) => hex::decode(digits).map_err(|e| invalid_params(e.to_string())),
        None => Ok(text.as_bytes().to_vec()),
    }
}

#[async_trait]
impl Eip1193Provider for LocalKeyProvider {
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(RpcError::Disconnected);
        }
        match method {
            "eth_accounts" | "eth_requestAccounts" => Ok(json!([self.address.to_checksum()])),
            "eth_chainId" => Ok(json!(format!("{:#x}", self.chain_id))),
            "personal_sign" => {
                self.check_signer(params.get(1))?;
                let message = message_bytes(params.get(0))?;
                Ok(json!(self.sign_personal(&message)?))
            }
            "eth_sign" => {
                self.check_signer(params.get(0))?;
                let message = message_bytes(params.get(1))?;
                Ok(json!(self.sign_personal(&message)?))
            }
            "eth_signTransaction" => {
                let request = params
                    .get(0)
                    .ok_or_else(|| invalid_params("missing transaction"))?;
                if let Some(from) = request.get("from") {
                    self.check_signer(Some(from))?;
                }
                let request = self.with_nonce(request).await?;
                Ok(json!(self.sign_transaction(&request)?))
            }
            _ => match &self.upstream {
                Some(upstream) => upstream.request(method, params).await,
                None => Err(RpcError::UnsupportedMethod(method.to_string())),
            },
        }
    }
}

struct BackendState {
    chain_id: Option<u64>,
    upstream: Option<ProviderHandle>,
    active: Option<Arc<LocalKeyProvider>>,
}

/// Login backend that "logs in" by handing out a `LocalKeyProvider`.
pub struct LocalKeyBackend {
    signing_key: SigningKey,
    profile: IdentityProfile,
    upstream_override: Option<ProviderHandle>,
    state: RwLock<BackendState>,
}

impl LocalKeyBackend {
    /// Backend for `signing_key`, reporting `profile` as the user.
    #[must_use]
    pub fn new(signing_key: SigningKey, profile: IdentityProfile) -> Self {
        Self {
            signing_key,
            profile,
            upstream_override: None,
            state: RwLock::new(BackendState {
                chain_id: None,
                upstream: None,
                active: None,
            }),
        }
    }

    /// Forward non-key requests to `upstream` instead of the configured RPC target.
    #[must_use]
    pub fn with_upstream(mut self, upstream: ProviderHandle) -> Self {
        self.upstream_override = Some(upstream);
        self
    }

    /// Address of the backing key.
    #[must_use]
    pub fn address(&self) -> Address {
        address_of(self.signing_key.verifying_key())
    }

    fn active(&self) -> Option<Arc<LocalKeyProvider>> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .active
            .clone()
    }
}

#[async_trait]
impl LoginBackend for LocalKeyBackend {
    async fn init(&self, config: &IdentityConfig) -> Result<(), InitError> {
        let hex_id = config.chain.chain_id.trim_start_matches("0x");
        let chain_id = u64::from_str_radix(hex_id, 16)
            .map_err(|e| InitError::InvalidConfig(format!("chain id: {e}")))?;

        let upstream = match &self.upstream_override {
            Some(upstream) => upstream.clone(),
            None => {
                let url = Url::parse(&config.chain.rpc_target)
                    .map_err(|e| InitError::InvalidConfig(format!("rpc target: {e}")))?;
                let client =
                    HttpRpcClient::new(url).map_err(|e| InitError::Backend(e.to_string()))?;
                Arc::new(client) as ProviderHandle
            }
        };

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.chain_id = Some(chain_id);
        state.upstream = Some(upstream);
        Ok(())
    }

    async fn login(&self) -> Result<ProviderHandle, AuthError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let chain_id = state.chain_id.ok_or(AuthError::NotInitialized)?;
        if let Some(previous) = state.active.take() {
            previous.revoke();
        }
        let provider = Arc::new(LocalKeyProvider::new(
            self.signing_key.clone(),
            chain_id,
            state.upstream.clone(),
        ));
        state.active = Some(Arc::clone(&provider));
        tracing::debug!("Local key login for {}", provider.address());
        Ok(provider)
    }

    async fn logout(&self) -> Result<(), AuthError> {
        let previous = self
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .active
            .take();
        if let Some(previous) = previous {
            previous.revoke();
        }
        Ok(())
    }

    async fn user_info(&self) -> Result<IdentityProfile, AuthError> {
        self.active()
            .map(|_| self.profile.clone())
            .ok_or(AuthError::NotConnected)
    }
}

#[cfg(test)]
mod tests {
    use aa_session_core::{NetworkConfig, testing::FakeProvider};
    use k256::ecdsa::{RecoveryId, Signature};

    use super::*;

    const HARDHAT_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const HARDHAT_ADDRESS: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";

    fn provider() -> LocalKeyProvider {
        LocalKeyProvider::new(parse_private_key(HARDHAT_KEY).unwrap(), 80001, None)
    }

    #[test]
    fn test_address_from_key() {
        assert_eq!(provider().address().to_checksum(), HARDHAT_ADDRESS);
    }

    #[test]
    fn test_rejects_bad_keys() {
        assert!(matches!(parse_private_key("0x1234"), Err(KeyError::InvalidHex)));
        assert!(matches!(
            parse_private_key(&format!("0x{}", "00".repeat(32))),
            Err(KeyError::InvalidScalar)
        ));
    }

    #[tokio::test]
    async fn test_accounts_and_chain_id() {
        let provider = provider();
        let accounts = provider.request("eth_accounts", json!([])).await.unwrap();
        assert_eq!(accounts, json!([HARDHAT_ADDRESS]));
        let chain = provider.request("eth_chainId", json!([])).await.unwrap();
        assert_eq!(chain, "0x13881");
    }

    #[tokio::test]
    async fn test_personal_sign_recovers_to_address() {
        let provider = provider();
        let sig = provider
            .request("personal_sign", json!(["0x68656c6c6f", HARDHAT_ADDRESS]))
            .await
            .unwrap();
        let bytes = hex::decode(sig.as_str().unwrap().trim_start_matches("0x")).unwrap();
        assert_eq!(bytes.len(), 65);

        let signature = Signature::from_slice(&bytes[..64]).unwrap();
        let recovery_id = RecoveryId::from_byte(bytes[64] - 27).unwrap();
        let recovered = VerifyingKey::recover_from_prehash(
            &personal_message_hash(b"hello"),
            &signature,
            recovery_id,
        )
        .unwrap();
        assert_eq!(address_of(&recovered), provider.address());
    }

    /// Split one RLP item off `input`: (payload, whole encoding).
    fn rlp_item(input: &[u8]) -> (&[u8], &[u8]) {
        let be = |bytes: &[u8]| bytes.iter().fold(0usize, |acc, b| (acc << 8) | usize::from(*b));
        let (start, len) = match input[0] {
            0x00..=0x7f => (0, 1),
            b @ 0x80..=0xb7 => (1, usize::from(b - 0x80)),
            b @ 0xb8..=0xbf => {
                let n = usize::from(b - 0xb7);
                (1 + n, be(&input[1..=n]))
            }
            b @ 0xc0..=0xf7 => (1, usize::from(b - 0xc0)),
            b => {
                let n = usize::from(b - 0xf7);
                (1 + n, be(&input[1..=n]))
            }
        };
        (&input[start..start + len], &input[..start + len])
    }

    fn rlp_fields(mut payload: &[u8]) -> Vec<(&[u8], &[u8])> {
        let mut fields = Vec::new();
        while !payload.is_empty() {
            let (item, encoded) = rlp_item(payload);
            payload = &payload[encoded.len()..];
            fields.push((item, encoded));
        }
        fields
    }

    fn recover_sender(raw: &str) -> (Address, Vec<Vec<u8>>) {
        let bytes = hex::decode(raw.trim_start_matches("0x")).unwrap();
        assert_eq!(bytes[0], crate::tx::EIP1559_TX_TYPE);
        let (payload, _) = rlp_item(&bytes[1..]);
        let fields = rlp_fields(payload);
        assert_eq!(fields.len(), 12);

        let unsigned: Vec<Vec<u8>> = fields[..9].iter().map(|(_, enc)| enc.to_vec()).collect();
        let mut preimage = vec![crate::tx::EIP1559_TX_TYPE];
        preimage.extend(crate::tx::rlp_list(&unsigned));

        let mut rs = [0u8; 64];
        let (r, s) = (fields[10].0, fields[11].0);
        rs[32 - r.len()..32].copy_from_slice(r);
        rs[64 - s.len()..].copy_from_slice(s);
        let signature = Signature::from_slice(&rs).unwrap();
        let recovery_id = RecoveryId::new(fields[9].0 == [1u8].as_slice(), false);
        let key =
            VerifyingKey::recover_from_prehash(&keccak256(&preimage), &signature, recovery_id)
                .unwrap();
        let items = fields[..9].iter().map(|(item, _)| item.to_vec()).collect();
        (address_of(&key), items)
    }

    #[tokio::test]
    async fn test_sign_transaction_recovers_to_address() {
        let provider = provider();
        let request = json!({
            "from": HARDHAT_ADDRESS,
            "to": "0x0000000000000000000000000000000000000001",
            "value": "0xde0b6b3a7640000",
            "gas": "0x5208",
            "maxFeePerGas": "0x77359400",
            "maxPriorityFeePerGas": "0x3b9aca00",
            "nonce": "0x0",
        });
        let raw = provider
            .request("eth_signTransaction", json!([request]))
            .await
            .unwrap();
        let (sender, items) = recover_sender(raw.as_str().unwrap());
        assert_eq!(sender, provider.address());
        assert_eq!(items[0], [0x01, 0x38, 0x81]);
        assert!(items[1].is_empty());
        let to: Address = "0x0000000000000000000000000000000000000001".parse().unwrap();
        assert_eq!(items[5], to.as_bytes());
        assert_eq!(provider.sign_transaction(&request).unwrap(), raw.as_str().unwrap());
    }

    #[tokio::test]
    async fn test_sign_transaction_fetches_pending_nonce() {
        let upstream = Arc::new(FakeProvider::new(80001, vec![]));
        upstream.respond("eth_getTransactionCount", json!("0x5"));
        let provider = LocalKeyProvider::new(
            parse_private_key(HARDHAT_KEY).unwrap(),
            80001,
            Some(Arc::clone(&upstream) as ProviderHandle),
        );
        let raw = provider
            .request(
                "eth_signTransaction",
                json!([{ "gas": "0x5208", "gasPrice": "0x1", "data": "0x" }]),
            )
            .await
            .unwrap();
        let (sender, items) = recover_sender(raw.as_str().unwrap());
        assert_eq!(sender, provider.address());
        assert_eq!(items[1], [5]);
        assert!(items[5].is_empty());
        assert_eq!(
            upstream.last_params("eth_getTransactionCount").unwrap()[1],
            "pending"
        );
    }

    #[tokio::test]
    async fn test_sign_transaction_rejects_incomplete_requests() {
        let provider = provider();
        let err = provider
            .request("eth_signTransaction", json!([{ "gas": "0x1", "nonce": "0x0" }]))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Rpc { code: -32602, .. }));

        let err = provider
            .request(
                "eth_signTransaction",
                json!([{ "from": "0x0000000000000000000000000000000000000001" }]),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Rpc { code: 4100, .. }));
    }

    #[tokio::test]
    async fn test_sign_for_foreign_account_is_rejected() {
        let err = provider()
            .request(
                "personal_sign",
                json!(["0x00", "0x0000000000000000000000000000000000000001"]),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Rpc { code: 4100, .. }));
    }

    #[tokio::test]
    async fn test_revoked_handle_is_disconnected() {
        let provider = provider();
        provider.revoke();
        assert_eq!(
            provider.request("eth_accounts", json!([])).await,
            Err(RpcError::Disconnected)
        );
    }

    #[tokio::test]
    async fn test_backend_forwards_to_upstream_and_revokes_on_logout() {
        let upstream = Arc::new(FakeProvider::new(80001, vec![]));
        let key = parse_private_key(HARDHAT_KEY).unwrap();
        let backend = LocalKeyBackend::new(key, IdentityProfile::default())
            .with_upstream(Arc::clone(&upstream) as ProviderHandle);
        let address = backend.address();
        upstream.set_balance(address, "0x1");

        let mut network = NetworkConfig::polygon_mumbai();
        network.client_id = "client".to_string();
        backend.init(&IdentityConfig::for_network(&network)).await.unwrap();

        let handle = backend.login().await.unwrap();
        let balance = handle
            .request("eth_getBalance", json!([address.to_string(), "latest"]))
            .await
            .unwrap();
        assert_eq!(balance, "0x1");
        assert!(backend.user_info().await.is_ok());

        backend.logout().await.unwrap();
        assert_eq!(
            handle.request("eth_accounts", json!([])).await,
            Err(RpcError::Disconnected)
        );
        assert!(matches!(backend.user_info().await, Err(AuthError::NotConnected)));
    }

    #[tokio::test]
    async fn test_login_before_init() {
        let backend =
            LocalKeyBackend::new(parse_private_key(HARDHAT_KEY).unwrap(), IdentityProfile::default());
        assert!(matches!(backend.login().await, Err(AuthError::NotInitialized)));
    }
}
