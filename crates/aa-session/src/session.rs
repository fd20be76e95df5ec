//! Mutable session record owned by the orchestrator.

use std::sync::Arc;

use aa_session_core::{
    Address, Balance, IdentityProfile, ProviderHandle, SessionError, SessionSnapshot,
    SessionStatus, Signer, Step,
};
use uuid::Uuid;

/// Everything a successful login produces, committed in one step.
pub(crate) struct Established {
    pub provider: ProviderHandle,
    pub signer: Arc<dyn Signer>,
    pub owner: Address,
    pub address: Address,
    pub profile: IdentityProfile,
    pub balance: Balance,
}

/// Session state.
///
/// Identity and account fields are either all set (status `Ready`) or all
/// empty; there is no partially populated `Ready` session.
pub(crate) struct Session {
    pub status: SessionStatus,
    pub last_error: Option<SessionError>,
    /// Login or restore attempt currently allowed to write.
    pub attempt: Option<Uuid>,
    established: Option<Established>,
}

impl Session {
    pub(crate) const fn new() -> Self {
        Self {
            status: SessionStatus::Unauthenticated,
            last_error: None,
            attempt: None,
            established: None,
        }
    }

    /// Start a fresh attempt, discarding any previous session.
    pub(crate) fn begin(&mut self, attempt: Uuid) {
        self.clear();
        self.attempt = Some(attempt);
        self.status = SessionStatus::Authenticating;
    }

    pub(crate) fn establish(&mut self, established: Established) {
        self.established = Some(established);
        self.status = SessionStatus::Ready;
        self.last_error = None;
        self.attempt = None;
    }

    pub(crate) fn fail(&mut self, err: SessionError) {
        self.established = None;
        self.status = SessionStatus::Error;
        self.last_error = Some(err);
        self.attempt = None;
    }

    pub(crate) fn clear(&mut self) {
        *self = Self::new();
    }

    /// Whether a session restored by the identity provider may be resumed:
    /// nothing was attempted yet, or only initialization failed.
    pub(crate) fn can_resume(&self) -> bool {
        match self.status {
            SessionStatus::Unauthenticated => true,
            SessionStatus::Error => self
                .last_error
                .as_ref()
                .is_some_and(|e| e.step == Step::Initialize),
            _ => false,
        }
    }

    pub(crate) const fn established(&self) -> Option<&Established> {
        match self.status {
            SessionStatus::Ready => self.established.as_ref(),
            _ => None,
        }
    }

    pub(crate) fn set_balance(&mut self, balance: Balance) {
        if let Some(established) = self.established.as_mut() {
            established.balance = balance;
        }
    }

    pub(crate) fn snapshot(&self) -> SessionSnapshot {
        let established = self.established();
        SessionSnapshot {
            status: self.status,
            profile: established.map(|e| e.profile.clone()),
            address: established.map(|e| e.address),
            owner: established.map(|e| e.owner),
            balance: established.map(|e| e.balance.to_string()),
            last_error: self.last_error.clone(),
        }
    }
}
