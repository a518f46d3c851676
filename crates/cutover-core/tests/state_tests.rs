use cutover_core::{allowed_transitions, validate_transition, CutoverError, CutoverState};
use proptest::prelude::*;

fn any_state() -> impl Strategy<Value = CutoverState> {
    prop_oneof![
        Just(CutoverState::Idle),
        Just(CutoverState::Capturing),
        Just(CutoverState::Stopping),
        Just(CutoverState::Building),
        Just(CutoverState::Launching),
        Just(CutoverState::AwaitingReady),
        Just(CutoverState::Ready),
        Just(CutoverState::Failed),
    ]
}

#[test]
fn test_capture_precedes_stop() {
    assert!(validate_transition(CutoverState::Idle, CutoverState::Capturing).is_ok());
    assert!(validate_transition(CutoverState::Capturing, CutoverState::Stopping).is_ok());

    // The old service must never be stopped before its objects are captured
    assert!(validate_transition(CutoverState::Idle, CutoverState::Stopping).is_err());
    assert!(validate_transition(CutoverState::Idle, CutoverState::Building).is_err());
}

#[test]
fn test_ready_only_after_awaiting() {
    assert!(validate_transition(CutoverState::AwaitingReady, CutoverState::Ready).is_ok());
    assert!(validate_transition(CutoverState::Launching, CutoverState::Ready).is_err());
}

proptest! {
    #[test]
    fn prop_validation_agrees_with_allowed(from in any_state(), to in any_state()) {
        let allowed = allowed_transitions(from).contains(&to);
        match validate_transition(from, to) {
            Ok(()) => prop_assert!(allowed),
            Err(CutoverError::IllegalTransition { from: f, to: t }) => {
                prop_assert!(!allowed);
                prop_assert_eq!((f, t), (from, to));
            }
            Err(other) => prop_assert!(false, "unexpected error {}", other),
        }
    }

    #[test]
    fn prop_no_self_loops(state in any_state()) {
        prop_assert!(validate_transition(state, state).is_err());
    }

    #[test]
    fn prop_failed_reachable_until_terminal(state in any_state()) {
        prop_assert_eq!(
            validate_transition(state, CutoverState::Failed).is_ok(),
            !state.is_terminal()
        );
    }
}
