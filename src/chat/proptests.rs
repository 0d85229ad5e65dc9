//! Property-based tests for the chat state machine
//!
//! Random trigger sequences are run through the pure transition function
//! while a tiny model tracks whether the history is empty.

use super::effect::Effect;
use super::state::{ChatState, Trigger, TriggerKind};
use super::transition::{transition, TransitionContext, TransitionError};
use crate::agent::ResponseStream;
use crate::history::{ContentItem, Message};
use crate::mode::ChatMode;
use proptest::prelude::*;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_messages() -> impl Strategy<Value = Vec<String>> {
    proptest::collection::vec("[a-z ]{1,12}", 0..3)
}

fn arb_trigger() -> impl Strategy<Value = Trigger> {
    prop_oneof![
        Just(()).prop_map(|()| Trigger::UserReset),
        "[a-z]{3,8}".prop_map(|name| Trigger::UserSetMode(ChatMode::new(name, "Bot", "prompt"))),
        arb_messages().prop_map(|texts| Trigger::UserAddMessages(
            texts.into_iter().map(|t| Message::user("ann", t)).collect()
        )),
        Just(()).prop_map(|()| Trigger::UserRequestResponse(CancellationToken::new())),
        Just(()).prop_map(|()| Trigger::UserContinue(CancellationToken::new())),
        Just(()).prop_map(|()| Trigger::UserRegenerate(CancellationToken::new())),
        Just(()).prop_map(|()| Trigger::UserCancel),
        Just(()).prop_map(|()| Trigger::UserStop),
        Just(()).prop_map(|()| Trigger::AiProducedContent(
            ResponseStream::from_chunks(vec![]),
            CancellationToken::new()
        )),
        arb_messages().prop_map(|texts| Trigger::AiResponseFinished(
            texts
                .into_iter()
                .map(|t| Message::assistant("Bot", vec![ContentItem::text(t)]))
                .collect()
        )),
        "[a-z ]{1,20}".prop_map(Trigger::AiResponseError),
    ]
}

fn arb_state() -> impl Strategy<Value = ChatState> {
    prop::sample::select(ChatState::ALL.to_vec())
}

/// Tracks history emptiness from the effects alone
fn apply_history_effects(history_empty: &mut bool, effects: &[Effect]) {
    for effect in effects {
        match effect {
            Effect::ResetHistory => *history_empty = true,
            Effect::AppendMessages(m) | Effect::CommitResponse(m) if !m.is_empty() => {
                *history_empty = false;
            }
            _ => {}
        }
    }
}

fn has(effects: &[Effect], pred: impl Fn(&Effect) -> bool) -> bool {
    effects.iter().any(pred)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    // Error notice is shown on entry to Error and cleared on exit
    #[test]
    fn prop_error_entry_and_exit_actions(triggers in proptest::collection::vec(arb_trigger(), 0..30)) {
        let mut state = ChatState::WaitingForFirstMessage;
        let mut history_empty = true;

        for trigger in triggers {
            let context = TransitionContext { history_empty };
            let Ok(result) = transition(state, context, trigger) else {
                continue;
            };
            let entering = state != ChatState::Error && result.new_state == ChatState::Error;
            let leaving = state == ChatState::Error && result.new_state != ChatState::Error;

            prop_assert_eq!(
                entering,
                has(&result.effects, |e| matches!(e, Effect::ShowErrorNotice(_)))
            );
            prop_assert_eq!(
                leaving,
                has(&result.effects, |e| matches!(e, Effect::ClearErrorNotice))
            );

            apply_history_effects(&mut history_empty, &result.effects);
            state = result.new_state;
        }
    }

    // Leaving a busy state always settles the response in flight
    #[test]
    fn prop_busy_exit_settles_response(triggers in proptest::collection::vec(arb_trigger(), 0..30)) {
        let mut state = ChatState::WaitingForFirstMessage;
        let mut history_empty = true;

        for trigger in triggers {
            let context = TransitionContext { history_empty };
            let Ok(result) = transition(state, context, trigger) else {
                continue;
            };
            if state.is_busy() && !result.new_state.is_busy() {
                let settles = has(&result.effects, |e| {
                    matches!(
                        e,
                        Effect::AbandonResponse | Effect::StopResponse | Effect::CommitResponse(_)
                    )
                });
                prop_assert!(settles, "{:?} -> {:?}: {:?}", state, result.new_state, result.effects);
            }
            if result.new_state == ChatState::Streaming {
                let consumes = has(&result.effects, |e| matches!(e, Effect::ConsumeStream { .. }));
                prop_assert!(consumes, "entered streaming without a stream: {:?}", result.effects);
            }

            apply_history_effects(&mut history_empty, &result.effects);
            state = result.new_state;
        }
    }

    // No response is ever started on an empty history
    #[test]
    fn prop_no_response_on_empty_history(triggers in proptest::collection::vec(arb_trigger(), 0..30)) {
        let mut state = ChatState::WaitingForFirstMessage;
        let mut history_empty = true;

        for trigger in triggers {
            let context = TransitionContext { history_empty };
            let Ok(result) = transition(state, context, trigger) else {
                continue;
            };
            if history_empty {
                let starts = has(&result.effects, |e| matches!(e, Effect::StartResponse { .. }));
                prop_assert!(!starts, "{:?} started a response on an empty history", state);
            }
            apply_history_effects(&mut history_empty, &result.effects);
            state = result.new_state;
        }
    }

    // Reset is accepted everywhere and always lands in the initial state
    #[test]
    fn prop_reset_always_succeeds(state in arb_state(), history_empty in any::<bool>()) {
        let result = transition(state, TransitionContext { history_empty }, Trigger::UserReset);
        prop_assert!(result.is_ok());
        let result = result.unwrap();
        prop_assert_eq!(result.new_state, ChatState::WaitingForFirstMessage);
        let resets = has(&result.effects, |e| matches!(e, Effect::ResetHistory));
        let hook_last = matches!(result.effects.last(), Some(Effect::RunResetHook));
        prop_assert!(resets, "no history reset from {:?}", state);
        prop_assert!(hook_last, "reset hook not last from {:?}", state);
    }

    // Rejections name the state and trigger they refused
    #[test]
    fn prop_rejection_names_its_trigger(state in arb_state(), trigger in arb_trigger()) {
        let kind = trigger.kind();
        let context = TransitionContext { history_empty: false };
        if let Err(TransitionError::NotPermitted { state: s, trigger: t }) = transition(state, context, trigger) {
            prop_assert_eq!(s, state);
            prop_assert_eq!(t, kind);
            prop_assert!(kind != TriggerKind::UserReset);
        }
    }
}
