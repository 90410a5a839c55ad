//! Timer port used to wake `scheduled` processables.

use crate::core::ProcessableId;
use crate::errors::CollaboratorError;
use crate::utils::Timestamp;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Handle to a scheduled timer callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CancelToken(Uuid);

impl CancelToken {
    /// Creates a new random token.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Schedules wake-ups for delayed processables.
///
/// When the timer fires, the owner calls
/// `ProcessingEngine::enqueue_scheduled` with the processable id.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Timer: Send + Sync {
    /// Requests a callback for `id` at `at`.
    async fn schedule_callback(
        &self,
        id: ProcessableId,
        at: Timestamp,
    ) -> Result<CancelToken, CollaboratorError>;

    /// Cancels a previously scheduled callback.
    async fn cancel(&self, token: CancelToken) -> Result<(), CollaboratorError>;
}

/// A timer that accepts every request and never fires.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpTimer;

#[async_trait]
impl Timer for NoOpTimer {
    async fn schedule_callback(
        &self,
        _id: ProcessableId,
        _at: Timestamp,
    ) -> Result<CancelToken, CollaboratorError> {
        Ok(CancelToken::new())
    }

    async fn cancel(&self, _token: CancelToken) -> Result<(), CollaboratorError> {
        Ok(())
    }
}

/// One recorded timer request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledCallback {
    /// The processable to wake.
    pub id: ProcessableId,
    /// Due time.
    pub at: Timestamp,
    /// Token handed back to the engine.
    pub token: CancelToken,
    /// Whether the callback was canceled.
    pub canceled: bool,
}

/// A timer that records requests. Tests fire callbacks by hand.
#[derive(Debug, Default)]
pub struct InMemoryTimer {
    callbacks: RwLock<Vec<ScheduledCallback>>,
}

impl InMemoryTimer {
    /// Creates an empty timer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every recorded request, canceled ones included.
    #[must_use]
    pub fn callbacks(&self) -> Vec<ScheduledCallback> {
        self.callbacks.read().clone()
    }

    /// Requests that are still outstanding.
    #[must_use]
    pub fn pending(&self) -> Vec<ScheduledCallback> {
        self.callbacks
            .read()
            .iter()
            .filter(|c| !c.canceled)
            .copied()
            .collect()
    }

    /// Outstanding requests due at or before `now`.
    #[must_use]
    pub fn due(&self, now: Timestamp) -> Vec<ScheduledCallback> {
        self.pending().into_iter().filter(|c| c.at <= now).collect()
    }
}

#[async_trait]
impl Timer for InMemoryTimer {
    async fn schedule_callback(
        &self,
        id: ProcessableId,
        at: Timestamp,
    ) -> Result<CancelToken, CollaboratorError> {
        let token = CancelToken::new();
        self.callbacks.write().push(ScheduledCallback {
            id,
            at,
            token,
            canceled: false,
        });
        Ok(token)
    }

    async fn cancel(&self, token: CancelToken) -> Result<(), CollaboratorError> {
        let mut callbacks = self.callbacks.write();
        let callback = callbacks
            .iter_mut()
            .find(|c| c.token == token)
            .ok_or_else(|| CollaboratorError::new("timer", format!("unknown token {token}")))?;
        callback.canceled = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::{add_duration, now};
    use std::time::Duration;

    #[tokio::test]
    async fn test_in_memory_timer_records_and_cancels() {
        let timer = InMemoryTimer::new();
        let id = ProcessableId::new();
        let at = add_duration(now(), Duration::from_secs(60));

        let token = timer.schedule_callback(id, at).await.unwrap();
        assert_eq!(timer.pending().len(), 1);
        assert!(timer.due(now()).is_empty());
        assert_eq!(timer.due(at)[0].id, id);

        timer.cancel(token).await.unwrap();
        assert!(timer.pending().is_empty());
        assert_eq!(timer.callbacks().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_token_is_an_error() {
        let timer = InMemoryTimer::new();
        assert!(timer.cancel(CancelToken::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_noop_timer() {
        let timer = NoOpTimer;
        let token = timer
            .schedule_callback(ProcessableId::new(), now())
            .await
            .unwrap();
        assert!(timer.cancel(token).await.is_ok());
    }
}
