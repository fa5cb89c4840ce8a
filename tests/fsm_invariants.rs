//! §8 property 3: the set of persisted transitions across a run is a
//! prefix of a valid path through the state graph — an invalid trigger
//! never changes state and never appears in that path.

use livermore_core::registry::fsm::{ConnectionFsm, ConnectionState, Trigger};

#[tokio::test]
async fn happy_path_is_a_valid_prefix() {
    let fsm = ConnectionFsm::new();
    let path = [Trigger::Start, Trigger::AdapterConnected, Trigger::WarmupComplete, Trigger::Stop, Trigger::Drained];

    let mut visited = vec![fsm.current().await];
    for trigger in path {
        let (_, to, _) = fsm.apply(trigger).await.expect("every step in this path is valid");
        visited.push(to);
    }

    assert_eq!(
        visited,
        vec![
            ConnectionState::Idle,
            ConnectionState::Starting,
            ConnectionState::Warming,
            ConnectionState::Active,
            ConnectionState::Stopping,
            ConnectionState::Stopped,
        ]
    );
}

#[tokio::test]
async fn rejected_trigger_leaves_state_unchanged() {
    let fsm = ConnectionFsm::new();
    fsm.apply(Trigger::Start).await.unwrap();

    let before = fsm.current().await;
    let err = fsm.apply(Trigger::WarmupComplete).await.unwrap_err();
    let after = fsm.current().await;

    assert!(matches!(err, livermore_core::error::LivermoreError::InvalidTransition { .. }));
    assert_eq!(before, after, "an invalid trigger must not move the FSM, keeping the persisted path a strict prefix");
}

#[tokio::test]
async fn reset_to_idle_is_valid_from_every_reachable_state() {
    for path in [
        vec![],
        vec![Trigger::Start],
        vec![Trigger::Start, Trigger::AdapterConnected],
        vec![Trigger::Start, Trigger::AdapterConnected, Trigger::WarmupComplete],
        vec![Trigger::Start, Trigger::AdapterConnected, Trigger::WarmupComplete, Trigger::Stop],
        vec![Trigger::Start, Trigger::AdapterConnected, Trigger::WarmupComplete, Trigger::Stop, Trigger::Drained],
    ] {
        let fsm = ConnectionFsm::new();
        for trigger in path {
            fsm.apply(trigger).await.unwrap();
        }
        let (_, to, notify) = fsm.apply(Trigger::ResetToIdle).await.unwrap();
        assert_eq!(to, ConnectionState::Idle);
        assert!(!notify, "ResetToIdle never notifies (§4.K)");
    }
}
