//! Object-safe session surface for transports.

use aa_session_core::{AccountResolver, IdentityProvider, SessionEvent, SessionSnapshot};
use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::orchestrator::{OrchestratorError, SessionOrchestrator};

/// Operations a UI transport may invoke.
#[async_trait]
pub trait SessionControl: Send + Sync {
    async fn login(&self) -> Result<SessionSnapshot, OrchestratorError>;

    async fn logout(&self) -> Result<SessionSnapshot, OrchestratorError>;

    async fn refresh(&self) -> Result<SessionSnapshot, OrchestratorError>;

    fn snapshot(&self) -> SessionSnapshot;

    /// Current snapshot followed by every later one, ending on dispose.
    fn subscribe(&self) -> BoxStream<'static, SessionSnapshot>;

    /// Retained event history followed by live events, ending after `Disposed`.
    fn event_stream(&self) -> BoxStream<'static, SessionEvent>;
}

#[async_trait]
impl<I, R> SessionControl for SessionOrchestrator<I, R>
where
    I: IdentityProvider + 'static,
    R: AccountResolver,
{
    async fn login(&self) -> Result<SessionSnapshot, OrchestratorError> {
        Self::login(self).await
    }

    async fn logout(&self) -> Result<SessionSnapshot, OrchestratorError> {
        Self::logout(self).await
    }

    async fn refresh(&self) -> Result<SessionSnapshot, OrchestratorError> {
        Self::refresh(self).await
    }

    fn snapshot(&self) -> SessionSnapshot {
        Self::snapshot(self)
    }

    fn subscribe(&self) -> BoxStream<'static, SessionSnapshot> {
        self.events().snapshot_stream()
    }

    fn event_stream(&self) -> BoxStream<'static, SessionEvent> {
        self.events().history_plus_stream()
    }
}
