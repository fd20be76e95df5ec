//! Scriptable fakes for tests (feature `testing`).

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::Notify;

use crate::{
    Address, IdentityConfig, IdentityProfile, NetworkConfig,
    address::keccak256,
    traits::{
        AccountResolver, AuthError, Eip1193Provider, IdentityProvider, InitError, ProviderHandle,
        ResolveError, RpcError, Signer,
    },
};

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory EIP-1193 provider.
pub struct FakeProvider {
    chain_id: u64,
    accounts: Mutex<Vec<Address>>,
    balances: Mutex<HashMap<Address, String>>,
    failing: Mutex<HashSet<String>>,
    responses: Mutex<HashMap<String, Value>>,
    params: Mutex<HashMap<String, Value>>,
    disconnected: AtomicBool,
    calls: Mutex<Vec<String>>,
}

impl FakeProvider {
    /// Provider exposing `accounts` on `chain_id`.
    #[must_use]
    pub fn new(chain_id: u64, accounts: Vec<Address>) -> Self {
        Self {
            chain_id,
            accounts: Mutex::new(accounts),
            balances: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            responses: Mutex::new(HashMap::new()),
            params: Mutex::new(HashMap::new()),
            disconnected: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Set the raw `eth_getBalance` result for `address`.
    pub fn set_balance(&self, address: Address, raw: impl Into<String>) {
        lock(&self.balances).insert(address, raw.into());
    }

    /// Make `method` fail with a transport error.
    pub fn fail_method(&self, method: &str) {
        lock(&self.failing).insert(method.to_string());
    }

    /// Stop failing `method`.
    pub fn heal_method(&self, method: &str) {
        lock(&self.failing).remove(method);
    }

    /// Answer `method` with `result`, whatever the params.
    pub fn respond(&self, method: &str, result: Value) {
        lock(&self.responses).insert(method.to_string(), result);
    }

    /// Params of the most recent `method` request.
    #[must_use]
    pub fn last_params(&self, method: &str) -> Option<Value> {
        lock(&self.params).get(method).cloned()
    }

    /// Mark the handle as stale; every request then fails.
    pub fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }

    /// Revive a stale handle.
    pub fn reconnect(&self) {
        self.disconnected.store(false, Ordering::SeqCst);
    }

    /// Methods requested so far.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl Eip1193Provider for FakeProvider {
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        lock(&self.calls).push(method.to_string());
        lock(&self.params).insert(method.to_string(), params.clone());
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(RpcError::Disconnected);
        }
        if lock(&self.failing).contains(method) {
            return Err(RpcError::Transport(format!("{method} failed")));
        }
        if let Some(result) = lock(&self.responses).get(method) {
            return Ok(result.clone());
        }
        match method {
            "eth_chainId" => Ok(json!(format!("{:#x}", self.chain_id))),
            "eth_accounts" | "eth_requestAccounts" => {
                let accounts: Vec<String> =
                    lock(&self.accounts).iter().map(ToString::to_string).collect();
                Ok(json!(accounts))
            }
            "eth_getBalance" => {
                let address: Address = params
                    .get(0)
                    .and_then(Value::as_str)
                    .ok_or_else(|| RpcError::Rpc {
                        code: -32602,
                        message: "missing address".to_string(),
                    })?
                    .parse()
                    .map_err(|e: crate::address::AddressError| RpcError::Rpc {
                        code: -32602,
                        message: e.to_string(),
                    })?;
                let raw = lock(&self.balances)
                    .get(&address)
                    .cloned()
                    .unwrap_or_else(|| "0x0".to_string());
                Ok(json!(raw))
            }
            "personal_sign" | "eth_signTransaction" => {
                let digest = keccak256(params.to_string().as_bytes());
                Ok(json!(format!("0x{}", hex::encode(digest))))
            }
            other => Err(RpcError::UnsupportedMethod(other.to_string())),
        }
    }
}

/// Scriptable identity provider.
pub struct FakeIdentity {
    provider: Arc<FakeProvider>,
    profile: IdentityProfile,
    ready: AtomicBool,
    connected: AtomicBool,
    restore_on_init: AtomicBool,
    init_error: Mutex<Option<InitError>>,
    connect_script: Mutex<VecDeque<AuthError>>,
    disconnect_fails: AtomicBool,
    profile_fails: AtomicBool,
    connect_gate: Mutex<Option<Arc<Notify>>>,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
}

impl FakeIdentity {
    /// Identity provider whose logins yield `provider`.
    #[must_use]
    pub fn new(provider: Arc<FakeProvider>) -> Self {
        Self {
            provider,
            profile: IdentityProfile {
                display_name: Some("Ada Lovelace".to_string()),
                email: Some("ada@example.com".to_string()),
            },
            ready: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            restore_on_init: AtomicBool::new(false),
            init_error: Mutex::new(None),
            connect_script: Mutex::new(VecDeque::new()),
            disconnect_fails: AtomicBool::new(false),
            profile_fails: AtomicBool::new(false),
            connect_gate: Mutex::new(None),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
        }
    }

    /// Make `initialize` fail.
    pub fn fail_init(&self, err: InitError) {
        *lock(&self.init_error) = Some(err);
    }

    /// Report an existing provider session once initialized.
    pub fn restore_on_init(&self) {
        self.restore_on_init.store(true, Ordering::SeqCst);
    }

    /// Fail the next `connect` with `err`.
    pub fn fail_next_connect(&self, err: AuthError) {
        lock(&self.connect_script).push_back(err);
    }

    /// Make `disconnect` report an unreachable provider.
    pub fn fail_disconnect(&self, fail: bool) {
        self.disconnect_fails.store(fail, Ordering::SeqCst);
    }

    /// Make `fetch_profile` fail.
    pub fn fail_profile(&self, fail: bool) {
        self.profile_fails.store(fail, Ordering::SeqCst);
    }

    /// Suspend `connect` until the returned notifier fires.
    #[must_use]
    pub fn gate_connect(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *lock(&self.connect_gate) = Some(Arc::clone(&gate));
        gate
    }

    /// Number of `connect` calls.
    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Number of `disconnect` calls.
    #[must_use]
    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentity {
    async fn initialize(&self, _config: &IdentityConfig) -> Result<(), InitError> {
        if let Some(err) = lock(&self.init_error).clone() {
            return Err(err);
        }
        self.ready.store(true, Ordering::SeqCst);
        if self.restore_on_init.load(Ordering::SeqCst) {
            self.connected.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> Result<ProviderHandle, AuthError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let gate = lock(&self.connect_gate).take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if let Some(err) = lock(&self.connect_script).pop_front() {
            return Err(err);
        }
        self.provider.reconnect();
        self.connected.store(true, Ordering::SeqCst);
        Ok(Arc::clone(&self.provider) as ProviderHandle)
    }

    async fn disconnect(&self) -> Result<(), AuthError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        if self.disconnect_fails.load(Ordering::SeqCst) {
            return Err(AuthError::ProviderUnavailable("logout endpoint down".to_string()));
        }
        self.connected.store(false, Ordering::SeqCst);
        self.provider.disconnect();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn provider(&self) -> Option<ProviderHandle> {
        self.is_connected()
            .then(|| Arc::clone(&self.provider) as ProviderHandle)
    }

    async fn fetch_profile(&self) -> Result<IdentityProfile, AuthError> {
        if !self.is_connected() {
            return Err(AuthError::NotConnected);
        }
        if self.profile_fails.load(Ordering::SeqCst) {
            return Err(AuthError::ProviderUnavailable("userinfo failed".to_string()));
        }
        Ok(self.profile.clone())
    }
}

/// Resolver deriving the account address from the owner address.
#[derive(Default)]
pub struct FakeResolver {
    script: Mutex<VecDeque<ResolveError>>,
    gate: Mutex<Option<Arc<Notify>>>,
    calls: AtomicUsize,
}

impl FakeResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next resolution with `err`.
    pub fn fail_next(&self, err: ResolveError) {
        lock(&self.script).push_back(err);
    }

    /// Suspend the next resolution until the returned notifier fires.
    #[must_use]
    pub fn gate_resolve(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *lock(&self.gate) = Some(Arc::clone(&gate));
        gate
    }

    /// Number of resolutions attempted.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Address this resolver returns for `owner` on `network`.
    #[must_use]
    pub fn derive(owner: Address, network: &NetworkConfig) -> Address {
        let mut preimage = owner.to_word().to_vec();
        preimage.extend_from_slice(&network.chain_id.to_be_bytes());
        Address::from_digest(&keccak256(&preimage))
    }
}

#[async_trait]
impl AccountResolver for FakeResolver {
    async fn resolve(
        &self,
        signer: &dyn Signer,
        network: &NetworkConfig,
    ) -> Result<Address, ResolveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let gate = lock(&self.gate).take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if let Some(err) = lock(&self.script).pop_front() {
            return Err(err);
        }
        let owner = signer
            .address()
            .await
            .map_err(|e| ResolveError::SignerRejected(e.to_string()))?;
        Ok(Self::derive(owner, network))
    }
}
