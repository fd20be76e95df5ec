//! Session status, structured errors and the snapshot exposed to the UI.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    Address,
    traits::{AuthError, BindError, InitError, ReadError, ResolveError},
};

/// What an authenticated-but-not-ready session is still waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pending {
    /// Identity connected; signer and smart account are being resolved,
    /// profile not fetched yet.
    Profile,
    /// Smart account resolved; profile and on-chain state are being read.
    Account,
}

/// Session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// No session.
    Unauthenticated,
    /// Interactive login in progress.
    Authenticating,
    /// Identity established, account setup still running.
    Authenticated(Pending),
    /// Profile, account address and balance are all available.
    Ready,
    /// The last operation failed; see `last_error`.
    Error,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unauthenticated => f.write_str("unauthenticated"),
            Self::Authenticating => f.write_str("authenticating"),
            Self::Authenticated(Pending::Profile) => f.write_str("authenticated(profile_pending)"),
            Self::Authenticated(Pending::Account) => f.write_str("authenticated(account_pending)"),
            Self::Ready => f.write_str("ready"),
            Self::Error => f.write_str("error"),
        }
    }
}

/// User profile, verbatim from the identity provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityProfile {
    pub display_name: Option<String>,
    pub email: Option<String>,
}

/// Orchestration step an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Initialize,
    Connect,
    Bind,
    Resolve,
    Profile,
    Balance,
}

impl Step {
    /// Wire name of the step.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::Connect => "connect",
            Self::Bind => "bind",
            Self::Resolve => "resolve",
            Self::Profile => "profile",
            Self::Balance => "balance",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error category, used by the UI to decide whether to offer a retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InitFailed,
    UserCancelled,
    ProviderUnavailable,
    NotConnected,
    NotInitialized,
    IncompatibleProvider,
    NetworkUnreachable,
    InvalidConfig,
    SignerRejected,
    InvalidResponse,
}

impl ErrorKind {
    /// Whether re-invoking the failed operation may succeed.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::UserCancelled
                | Self::ProviderUnavailable
                | Self::NotConnected
                | Self::NetworkUnreachable
        )
    }
}

/// Structured error stored in the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{step} failed: {message}")]
pub struct SessionError {
    pub step: Step,
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
}

impl SessionError {
    /// Create an error for `step`.
    #[must_use]
    pub fn new(step: Step, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            step,
            kind,
            message: message.into(),
            retryable: kind.is_retryable(),
        }
    }

    #[must_use]
    pub fn init(err: &InitError) -> Self {
        Self::new(Step::Initialize, ErrorKind::InitFailed, err.to_string())
    }

    #[must_use]
    pub fn auth(step: Step, err: &AuthError) -> Self {
        let kind = match err {
            AuthError::UserCancelled => ErrorKind::UserCancelled,
            AuthError::ProviderUnavailable(_) => ErrorKind::ProviderUnavailable,
            AuthError::NotConnected => ErrorKind::NotConnected,
            AuthError::NotInitialized => ErrorKind::NotInitialized,
        };
        Self::new(step, kind, err.to_string())
    }

    #[must_use]
    pub fn bind(err: &BindError) -> Self {
        Self::new(Step::Bind, ErrorKind::IncompatibleProvider, err.to_string())
    }

    #[must_use]
    pub fn resolve(err: &ResolveError) -> Self {
        let kind = match err {
            ResolveError::NetworkUnreachable(_) => ErrorKind::NetworkUnreachable,
            ResolveError::InvalidConfig(_) => ErrorKind::InvalidConfig,
            ResolveError::SignerRejected(_) => ErrorKind::SignerRejected,
        };
        Self::new(Step::Resolve, kind, err.to_string())
    }

    #[must_use]
    pub fn read(step: Step, err: &ReadError) -> Self {
        let kind = match err {
            ReadError::ProviderUnavailable(_) => ErrorKind::ProviderUnavailable,
            ReadError::InvalidResponse(_) => ErrorKind::InvalidResponse,
        };
        Self::new(step, kind, err.to_string())
    }
}

/// Read-only view of a session.
///
/// Identity and account fields are only populated while `status` is `Ready`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub profile: Option<IdentityProfile>,
    /// Smart account (counterfactual) address.
    pub address: Option<Address>,
    /// Externally owned address of the signer.
    pub owner: Option<Address>,
    /// Native-token balance in display units.
    pub balance: Option<String>,
    pub last_error: Option<SessionError>,
}

impl SessionSnapshot {
    /// Snapshot of an empty session.
    #[must_use]
    pub const fn unauthenticated() -> Self {
        Self {
            status: SessionStatus::Unauthenticated,
            profile: None,
            address: None,
            owner: None,
            balance: None,
            last_error: None,
        }
    }

    /// Whether identity, address and balance are all present.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.profile.is_some() && self.address.is_some() && self.balance.is_some()
    }
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self::unauthenticated()
    }
}
