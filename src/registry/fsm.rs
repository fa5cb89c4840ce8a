//! Instance connection-state FSM (§4.K). Transitions are strictly
//! serialised by owning the state behind a single-producer mutex — no
//! transition is ever partially applied (§5 Ordering guarantees).

use tokio::sync::Mutex;
use tracing::info;

use crate::error::{LivermoreError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Starting,
    Warming,
    Active,
    Stopping,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Start,
    AdapterConnected,
    WarmupComplete,
    Stop,
    Drained,
    Reset,
    /// Recovery escape hatch — valid from any state, never notified.
    ResetToIdle,
}

impl ConnectionState {
    /// The table from §4.K. Returns `None` for anything not explicitly
    /// listed, which the caller rejects as `invalid_transition`.
    fn next(self, trigger: Trigger) -> Option<ConnectionState> {
        use ConnectionState::*;
        use Trigger::*;
        match (self, trigger) {
            (_, ResetToIdle) => Some(Idle),
            (Idle, Start) => Some(Starting),
            (Starting, AdapterConnected) => Some(Warming),
            (Warming, WarmupComplete) => Some(Active),
            (Active, Stop) => Some(Stopping),
            (Stopping, Drained) => Some(Stopped),
            (Stopped, Reset) => Some(Idle),
            _ => None,
        }
    }
}

/// What a trigger would move to if it were valid from the current state
/// — used only to render a meaningful `invalid_transition` error.
fn intended_target(trigger: Trigger) -> ConnectionState {
    use ConnectionState::*;
    use Trigger::*;
    match trigger {
        Start => Starting,
        AdapterConnected => Warming,
        WarmupComplete => Active,
        Stop => Stopping,
        Drained => Stopped,
        Reset | ResetToIdle => Idle,
    }
}

pub struct ConnectionFsm {
    state: Mutex<ConnectionState>,
}

impl ConnectionFsm {
    pub fn new() -> Self {
        Self { state: Mutex::new(ConnectionState::Idle) }
    }

    pub async fn current(&self) -> ConnectionState {
        *self.state.lock().await
    }

    /// Applies `trigger`, returning the new state and whether a
    /// notification should fire (false only for `ResetToIdle`, §4.K).
    pub async fn apply(&self, trigger: Trigger) -> Result<(ConnectionState, ConnectionState, bool)> {
        let mut guard = self.state.lock().await;
        let from = *guard;
        match from.next(trigger) {
            Some(to) => {
                *guard = to;
                let notify = trigger != Trigger::ResetToIdle;
                info!(?from, ?to, ?trigger, "fsm transition");
                Ok((from, to, notify))
            }
            None => Err(LivermoreError::InvalidTransition { from, to: intended_target(trigger) }),
        }
    }
}

impl Default for ConnectionFsm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn happy_path_reaches_active() {
        let fsm = ConnectionFsm::new();
        fsm.apply(Trigger::Start).await.unwrap();
        fsm.apply(Trigger::AdapterConnected).await.unwrap();
        fsm.apply(Trigger::WarmupComplete).await.unwrap();
        assert_eq!(fsm.current().await, ConnectionState::Active);
    }

    #[tokio::test]
    async fn skipping_a_step_is_rejected() {
        let fsm = ConnectionFsm::new();
        let err = fsm.apply(Trigger::WarmupComplete).await.unwrap_err();
        assert!(matches!(err, LivermoreError::InvalidTransition { .. }));
        assert_eq!(fsm.current().await, ConnectionState::Idle);
    }

    #[tokio::test]
    async fn reset_to_idle_works_from_any_state_without_notification() {
        let fsm = ConnectionFsm::new();
        fsm.apply(Trigger::Start).await.unwrap();
        let (_, to, notify) = fsm.apply(Trigger::ResetToIdle).await.unwrap();
        assert_eq!(to, ConnectionState::Idle);
        assert!(!notify);
    }
}
