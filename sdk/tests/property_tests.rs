use proptest::prelude::*;
use sdk::errors::{EngineError, StepwiseErrorExt};
use sdk::types::{Capability, TaskStatus};

// Every error variant yields a non-empty static hint that never echoes its payload
proptest! {
    #[test]
    fn test_error_user_hint_completeness(error_str in "[a-z]{12,40}") {
        let errs = vec![
            EngineError::Config(error_str.clone()),
            EngineError::Planning(error_str.clone()),
            EngineError::Handler { capability: "act".to_string(), message: error_str.clone() },
            EngineError::KeyringError(error_str.clone()),
        ];

        for err in errs {
            let hint = err.user_hint();
            prop_assert!(!hint.is_empty());
            prop_assert!(!hint.contains(&error_str));
        }
    }
}

// Any name resolves to some capability, and known names resolve to themselves
proptest! {
    #[test]
    fn test_capability_resolution_is_total(name in "\\PC*") {
        let resolved = Capability::resolve(&name);
        match Capability::from_name(&name) {
            Some(known) => prop_assert_eq!(resolved, known),
            None => prop_assert_eq!(resolved, Capability::Act),
        }
    }
}

fn any_status() -> impl Strategy<Value = TaskStatus> {
    prop_oneof![
        Just(TaskStatus::Pending),
        Just(TaskStatus::Planning),
        Just(TaskStatus::Executing),
        Just(TaskStatus::Completed),
        Just(TaskStatus::Partial),
        Just(TaskStatus::Failed),
    ]
}

// Terminal statuses never transition, and no transition goes backwards
proptest! {
    #[test]
    fn test_transitions_never_regress(from in any_status(), to in any_status()) {
        if from.is_terminal() {
            prop_assert!(!from.can_transition_to(to));
        }
        if from.can_transition_to(to) && to != from {
            prop_assert!(!to.can_transition_to(from) || to == from);
        }
    }
}
