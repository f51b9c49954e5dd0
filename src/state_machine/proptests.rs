//! Property-based tests for the state machine
//!
//! These tests verify key invariants hold across all possible inputs.

#![allow(clippy::single_match_else)]

use super::*;
use crate::bot::fixtures::airline_bot;
use crate::bot::BotDefinition;
use crate::config::EmulatorConfig;
use crate::fulfillment::{FulfillmentError, HookResponse};
use crate::protocol::{DialogAction, IntentState, SlotValue};
use crate::session::Session;
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;

// ============================================================================
// Test Helpers
// ============================================================================

fn test_bot() -> Arc<BotDefinition> {
    airline_bot()
}

const INTENTS: &[&str] = &[
    "BookFlight",
    "CheckFlightStatus",
    "CancelFlight",
    "AnythingElse",
    "Goodbye",
    "UpdateName",
    "FallbackIntent",
];

const SLOT_NAMES: &[&str] = &[
    "Origin",
    "Destination",
    "DepartureDate",
    "FlightNumber",
    "ConfirmationNumber",
    "Choice",
    "PassengerName",
    "Seat",
];

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_intent_name() -> impl Strategy<Value = String> {
    proptest::sample::select(INTENTS).prop_map(String::from)
}

fn arb_slot_name() -> impl Strategy<Value = String> {
    proptest::sample::select(SLOT_NAMES).prop_map(String::from)
}

fn arb_slots() -> impl Strategy<Value = BTreeMap<String, SlotValue>> {
    proptest::collection::btree_map(
        arb_slot_name(),
        "[A-Za-z]{2,8}".prop_map(SlotValue::literal),
        0..3,
    )
}

fn arb_hook_response() -> impl Strategy<Value = HookResponse> {
    prop_oneof![
        Just(HookResponse::close()),
        Just(HookResponse::delegate()),
        Just(HookResponse::new(DialogAction::ConfirmIntent)),
        Just(HookResponse::new(DialogAction::ElicitIntent)),
        arb_slot_name().prop_map(|slot| HookResponse::new(DialogAction::elicit_slot(slot))),
        arb_intent_name().prop_map(|name| HookResponse::close().with_intent(name, IntentState::Fulfilled)),
        Just(HookResponse::close().with_intent("BookFlight", IntentState::Failed)),
    ]
}

fn arb_error() -> impl Strategy<Value = FulfillmentError> {
    prop_oneof![
        Just(FulfillmentError::timeout("slow")),
        Just(FulfillmentError::handler("boom")),
        Just(FulfillmentError::transport("refused")),
        Just(FulfillmentError::invalid_response("not json")),
    ]
}

fn arb_event() -> impl Strategy<Value = Event> {
    prop_oneof![
        (arb_intent_name(), arb_slots()).prop_map(|(intent, slots)| Event::IntentRecognized {
            intent,
            slots,
            confidence: 1.0,
        }),
        Just(Event::IntentNotRecognized),
        arb_slots().prop_map(|slots| Event::SlotsCaptured { slots }),
        arb_slot_name().prop_map(|slot| Event::SlotRejected {
            slot,
            reason: "no match".into(),
        }),
        Just(Event::Affirmed),
        Just(Event::Denied),
        Just(Event::ConfirmationUnclear),
        arb_hook_response().prop_map(|response| Event::DialogHookResponded { response }),
        arb_error().prop_map(|error| Event::DialogHookFailed { error }),
        arb_hook_response().prop_map(|response| Event::FulfillmentSucceeded { response }),
        arb_error().prop_map(|error| Event::FulfillmentFailed { error }),
    ]
}

/// Reset a closed session the way the engine does between turns
fn reopen(mut session: Session) -> Session {
    if session.state.is_terminal() {
        session.state = DialogState::Idle;
        session.clear_intent();
    }
    session
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Every state a transition enters is reached over a graph edge
    #[test]
    fn prop_paths_follow_graph(events in proptest::collection::vec(arb_event(), 0..25)) {
        let bot = test_bot();
        let config = EmulatorConfig::default();
        let ctx = DialogContext::new(&bot, &config);
        let mut session = Session::new("prop");

        for event in events {
            session = reopen(session);
            match transition(&session, &ctx, event) {
                Ok(result) => {
                    prop_assert!(!result.path.is_empty(), "Ok transition entered no state");
                    let mut from = session.state.clone();
                    for next in &result.path {
                        prop_assert!(from.can_transition_to(next), "{} -> {}", from, next);
                        from = next.clone();
                    }
                    prop_assert_eq!(&result.session.state, &from);
                    session = result.session;
                }
                Err(_) => {}
            }
        }
    }

    /// A transition ends in exactly one respond or hook call
    #[test]
    fn prop_one_outcome_per_transition(events in proptest::collection::vec(arb_event(), 0..25)) {
        let bot = test_bot();
        let config = EmulatorConfig::default();
        let ctx = DialogContext::new(&bot, &config);
        let mut session = Session::new("prop");

        for event in events {
            session = reopen(session);
            if let Ok(result) = transition(&session, &ctx, event) {
                let outcomes = result
                    .effects
                    .iter()
                    .filter(|e| !matches!(e, Effect::QueueMessages(_)))
                    .count();
                prop_assert_eq!(outcomes, 1, "effects: {:?}", result.effects);
                prop_assert!(!matches!(result.effects.last(), Some(Effect::QueueMessages(_))));
                session = result.session;
            }
        }
    }

    /// Only slots the active intent declares are ever held
    #[test]
    fn prop_slots_are_declared(events in proptest::collection::vec(arb_event(), 0..25)) {
        let bot = test_bot();
        let config = EmulatorConfig::default();
        let ctx = DialogContext::new(&bot, &config);
        let mut session = Session::new("prop");

        for event in events {
            session = reopen(session);
            if let Ok(result) = transition(&session, &ctx, event) {
                session = result.session;
                match session.intent.as_deref() {
                    Some(name) => {
                        let intent = bot.intent(name).unwrap();
                        for slot in session.slots.keys() {
                            prop_assert!(intent.slot(slot).is_some(), "{} not declared on {}", slot, name);
                        }
                    }
                    None => prop_assert!(session.slots.is_empty()),
                }
            }
        }
    }

    /// Rejections re-prompt until the ceiling, then fall back
    #[test]
    fn prop_reprompt_ceiling(max in 0u32..6, rejections in 0u32..10) {
        let bot = test_bot();
        let config = EmulatorConfig::default().with_max_reprompts(max);
        let ctx = DialogContext::new(&bot, &config);
        let mut session = Session::new("prop");
        session.intent = Some("BookFlight".into());
        session.state = DialogState::eliciting("Origin");

        for _ in 0..rejections {
            if session.state != DialogState::eliciting("Origin") {
                break;
            }
            let event = Event::SlotRejected { slot: "Origin".into(), reason: "no match".into() };
            session = transition(&session, &ctx, event).unwrap().session;
        }

        if rejections <= max {
            prop_assert_eq!(session.state, DialogState::eliciting("Origin"));
            prop_assert_eq!(session.attempts, rejections);
        } else {
            prop_assert_eq!(session.state, DialogState::ElicitingIntent);
            prop_assert!(session.intent.is_none());
        }
    }

    /// Nothing but a reset leaves Closed
    #[test]
    fn prop_closed_rejects_events(event in arb_event(), intent in arb_intent_name()) {
        let bot = test_bot();
        let config = EmulatorConfig::default();
        let ctx = DialogContext::new(&bot, &config);
        let mut session = Session::new("prop");
        session.intent = Some(intent);
        session.state = DialogState::Closed;

        let result = transition(&session, &ctx, event);
        prop_assert!(matches!(result, Err(TransitionError::InvalidTransition(_))), "{:?}", result.map(|r| r.path));
    }

    /// An unrecognized utterance never fills slots
    #[test]
    fn prop_not_recognized_clears_intent(events in proptest::collection::vec(arb_event(), 0..10)) {
        let bot = test_bot();
        let config = EmulatorConfig::default();
        let ctx = DialogContext::new(&bot, &config);
        let mut session = Session::new("prop");
        for event in events {
            session = reopen(session);
            if let Ok(result) = transition(&session, &ctx, event) {
                session = result.session;
            }
        }
        session = reopen(session);

        if session.state.awaits_input() {
            let result = transition(&session, &ctx, Event::IntentNotRecognized).unwrap();
            prop_assert_eq!(result.path, vec![DialogState::ElicitingIntent]);
            prop_assert!(result.session.intent.is_none());
            prop_assert!(result.session.slots.is_empty());
        }
    }
}
