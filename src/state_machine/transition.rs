//! Pure state transition function
//!
//! Given the session as it stands and one event, decide the next session and
//! the effects the engine has to run. Nothing here performs I/O.

use std::collections::BTreeMap;
use thiserror::Error;

use super::{DialogContext, DialogState, Effect, Event};
use crate::bot::{DeclineBehavior, FulfillmentMode, Intent, SlotSpec};
use crate::fulfillment::HookResponse;
use crate::protocol::{
    ConfirmationState, DialogAction, IntentSnapshot, IntentState, Message, SlotValue,
};
use crate::session::Session;

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub session: Session,
    pub effects: Vec<Effect>,
    /// States entered by this transition, in order
    pub path: Vec<DialogState>,
}

impl TransitionResult {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            effects: vec![],
            path: vec![],
        }
    }

    fn push(&mut self, effect: Effect) {
        self.effects.push(effect);
    }

    /// Move to `next`, rejecting edges outside the dialog graph
    fn enter(&mut self, next: DialogState) -> Result<(), TransitionError> {
        if !self.session.state.can_transition_to(&next) {
            return Err(TransitionError::InvalidTransition(format!(
                "{} -> {next}",
                self.session.state
            )));
        }
        self.path.push(next.clone());
        self.session.state = next;
        Ok(())
    }
}

/// Errors that can occur during transition
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("unknown intent: {0}")]
    UnknownIntent(String),
    #[error("invalid transition: {0}")]
    InvalidTransition(String),
}

/// Pure transition function
#[allow(clippy::too_many_lines)]
pub fn transition(
    session: &Session,
    ctx: &DialogContext<'_>,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    let mut result = TransitionResult::new(session.clone());

    match (&session.state, event) {
        // ============================================================
        // Intent recognition
        // ============================================================
        (state, Event::IntentRecognized { intent, slots, .. }) if state.awaits_input() => {
            let intent = lookup(ctx, &intent)?;
            if intent.is_fallback {
                fall_back(&mut result, ctx)?;
            } else {
                begin_intent(&mut result, intent, slots);
                result.session.follow_up_depth = 0;
                advance(&mut result, intent, true)?;
            }
        }

        (state, Event::IntentNotRecognized) if state.awaits_input() => {
            fall_back(&mut result, ctx)?;
        }

        // ============================================================
        // Slot elicitation
        // ============================================================
        (DialogState::ElicitingSlot { slot: eliciting }, Event::SlotsCaptured { slots }) => {
            let intent = current_intent(ctx, &result.session)?;
            let answered = slots.contains_key(eliciting);
            for (name, value) in slots {
                if intent.slot(&name).is_some() {
                    result.session.slots.insert(name, value);
                }
            }
            if answered {
                result.session.attempts = 0;
                advance(&mut result, intent, true)?;
            } else {
                // Other slots changed but the prompted one is still unanswered
                reject_slot(&mut result, ctx, intent, eliciting)?;
            }
        }

        (DialogState::ElicitingSlot { slot: eliciting }, Event::SlotRejected { slot, .. })
            if *eliciting == slot =>
        {
            let intent = current_intent(ctx, &result.session)?;
            reject_slot(&mut result, ctx, intent, &slot)?;
        }

        // ============================================================
        // Confirmation
        // ============================================================
        (DialogState::ConfirmingIntent, Event::Affirmed) => {
            let intent = current_intent(ctx, &result.session)?;
            result.session.confirmation = ConfirmationState::Confirmed;
            result.session.attempts = 0;
            advance(&mut result, intent, true)?;
        }

        (DialogState::ConfirmingIntent, Event::Denied) => {
            let intent = current_intent(ctx, &result.session)?;
            let (declination, behavior) = intent.confirmation.as_ref().map_or(
                (Vec::new(), DeclineBehavior::End),
                |c| (render(&c.declination, &result.session.slots), c.on_decline.clone()),
            );
            match behavior {
                DeclineBehavior::Reelicit(slot) => {
                    match slot {
                        Some(name) => {
                            result.session.slots.remove(&name);
                        }
                        None => result.session.slots.clear(),
                    }
                    result.session.confirmation = ConfirmationState::None;
                    result.session.attempts = 0;
                    if !declination.is_empty() {
                        result.push(Effect::QueueMessages(declination));
                    }
                    advance(&mut result, intent, true)?;
                }
                DeclineBehavior::End => {
                    result.session.confirmation = ConfirmationState::Denied;
                    let intent_snapshot = snapshot(intent, &result.session, IntentState::Failed);
                    result.enter(DialogState::Idle)?;
                    result.push(Effect::respond(
                        DialogAction::Close,
                        declination,
                        Some(intent_snapshot),
                    ));
                    result.session.clear_intent();
                }
            }
        }

        (DialogState::ConfirmingIntent, Event::ConfirmationUnclear) => {
            let intent = current_intent(ctx, &result.session)?;
            result.session.attempts += 1;
            let ceiling = intent
                .confirmation
                .as_ref()
                .and_then(|c| c.max_retries)
                .unwrap_or(ctx.config.max_reprompts);
            if result.session.attempts > ceiling {
                fall_back(&mut result, ctx)?;
            } else {
                confirm(&mut result, intent, true)?;
            }
        }

        // ============================================================
        // Dialog code hook
        // ============================================================
        (
            DialogState::ElicitingSlot { .. } | DialogState::ConfirmingIntent,
            Event::DialogHookResponded { response },
        ) => {
            on_dialog_hook(&mut result, ctx, &response)?;
        }

        (
            DialogState::ElicitingSlot { .. } | DialogState::ConfirmingIntent,
            Event::DialogHookFailed { .. },
        ) => {
            fail(&mut result, ctx)?;
        }

        // ============================================================
        // Fulfillment
        // ============================================================
        (DialogState::Fulfilling, Event::FulfillmentSucceeded { response }) => {
            on_fulfilled(&mut result, ctx, &response)?;
        }

        (DialogState::Fulfilling, Event::FulfillmentFailed { .. }) => {
            fail(&mut result, ctx)?;
        }

        (state, event) => {
            return Err(TransitionError::InvalidTransition(format!(
                "{} in state {state}",
                event.name()
            )));
        }
    }

    Ok(result)
}

// ============================================================================
// Steps
// ============================================================================

/// Count a failed answer for `slot`, re-prompting until the ceiling
fn reject_slot(
    result: &mut TransitionResult,
    ctx: &DialogContext<'_>,
    intent: &Intent,
    slot: &str,
) -> Result<(), TransitionError> {
    let spec = intent.slot(slot).ok_or_else(|| {
        TransitionError::InvalidTransition(format!("{} has no slot {slot}", intent.name))
    })?;
    result.session.attempts += 1;
    let ceiling = spec.max_retries.unwrap_or(ctx.config.max_reprompts);
    if result.session.attempts > ceiling {
        fall_back(result, ctx)
    } else {
        elicit_slot(result, intent, spec, true)
    }
}

/// Decide the next step for a recognized intent
fn advance(
    result: &mut TransitionResult,
    intent: &Intent,
    use_hook: bool,
) -> Result<(), TransitionError> {
    if let Some(spec) = intent.next_unfilled(&result.session.slots) {
        return elicit_slot(result, intent, spec, use_hook);
    }
    if intent.confirmation.is_some() && result.session.confirmation != ConfirmationState::Confirmed
    {
        return confirm(result, intent, use_hook);
    }

    result.enter(DialogState::Fulfilling)?;
    match intent.fulfillment {
        FulfillmentMode::CodeHook => result.push(Effect::InvokeFulfillment),
        FulfillmentMode::ReturnIntent => {
            let outcome = intent
                .closing
                .resolve(&result.session.slots, &result.session.attributes);
            let intent_snapshot =
                snapshot(intent, &result.session, IntentState::ReadyForFulfillment);
            result.enter(DialogState::Closed)?;
            result.push(Effect::respond(
                DialogAction::Delegate,
                outcome.messages,
                Some(intent_snapshot),
            ));
        }
    }
    Ok(())
}

fn elicit_slot(
    result: &mut TransitionResult,
    intent: &Intent,
    spec: &SlotSpec,
    use_hook: bool,
) -> Result<(), TransitionError> {
    result.enter(DialogState::eliciting(&spec.name))?;
    let action = DialogAction::elicit_slot(&spec.name);
    if use_hook && intent.dialog_code_hook {
        result.push(Effect::InvokeDialogHook { proposed: action });
    } else {
        let messages = slot_prompt(spec, &result.session.slots);
        let intent_snapshot = snapshot(intent, &result.session, IntentState::InProgress);
        result.push(Effect::respond(action, messages, Some(intent_snapshot)));
    }
    Ok(())
}

fn confirm(
    result: &mut TransitionResult,
    intent: &Intent,
    use_hook: bool,
) -> Result<(), TransitionError> {
    result.enter(DialogState::ConfirmingIntent)?;
    if use_hook && intent.dialog_code_hook {
        result.push(Effect::InvokeDialogHook {
            proposed: DialogAction::ConfirmIntent,
        });
    } else {
        let messages = confirmation_prompt(intent, &result.session.slots);
        let intent_snapshot = snapshot(intent, &result.session, IntentState::InProgress);
        result.push(Effect::respond(
            DialogAction::ConfirmIntent,
            messages,
            Some(intent_snapshot),
        ));
    }
    Ok(())
}

/// Drop the active intent and ask the user what they want
fn fall_back(result: &mut TransitionResult, ctx: &DialogContext<'_>) -> Result<(), TransitionError> {
    let fallback = ctx.bot.fallback();
    result.session.clear_intent();
    result.enter(DialogState::ElicitingIntent)?;

    let mut messages = fallback
        .closing
        .resolve(&BTreeMap::new(), &result.session.attributes)
        .messages;
    if messages.is_empty() {
        messages.push(Message::plain(&ctx.config.fallback_message));
    }
    let intent_snapshot = IntentSnapshot {
        name: fallback.name.clone(),
        slots: BTreeMap::new(),
        state: IntentState::InProgress,
        confirmation_state: ConfirmationState::None,
    };
    result.push(Effect::respond(
        DialogAction::ElicitIntent,
        messages,
        Some(intent_snapshot),
    ));
    Ok(())
}

/// Close the cycle with the generic failure message
fn fail(result: &mut TransitionResult, ctx: &DialogContext<'_>) -> Result<(), TransitionError> {
    let intent_snapshot = current_intent(ctx, &result.session)
        .ok()
        .map(|intent| snapshot(intent, &result.session, IntentState::Failed));
    result.enter(DialogState::Closed)?;
    result.push(Effect::respond(
        DialogAction::Close,
        vec![Message::plain(&ctx.config.failure_message)],
        intent_snapshot,
    ));
    Ok(())
}

fn on_dialog_hook(
    result: &mut TransitionResult,
    ctx: &DialogContext<'_>,
    response: &HookResponse,
) -> Result<(), TransitionError> {
    apply_attributes(&mut result.session, response);

    let mut intent = current_intent(ctx, &result.session)?;
    if let Some(name) = response.intent_name().filter(|n| *n != intent.name) {
        intent = lookup(ctx, name)?;
        begin_intent(result, intent, BTreeMap::new());
    }
    if let Some(slots) = response.slots() {
        result.session.slots = declared(intent, slots);
    }
    if let Some(confirmation) = response.confirmation_state() {
        result.session.confirmation = confirmation;
    }

    let messages = response.messages.clone();
    match response.directive() {
        DialogAction::Delegate => {
            if !messages.is_empty() {
                result.push(Effect::QueueMessages(messages));
            }
            advance(result, intent, false)
        }
        DialogAction::ElicitSlot { slot_to_elicit } => {
            directed_elicit(result, intent, slot_to_elicit, messages)
        }
        DialogAction::ConfirmIntent => directed_confirm(result, intent, messages),
        DialogAction::ElicitIntent => directed_elicit_intent(result, ctx, messages),
        DialogAction::Close => {
            let state = response.intent_state().unwrap_or(IntentState::Fulfilled);
            let intent_snapshot = snapshot(intent, &result.session, state);
            result.enter(DialogState::Closed)?;
            result.push(Effect::respond(
                DialogAction::Close,
                messages,
                Some(intent_snapshot),
            ));
            Ok(())
        }
    }
}

fn on_fulfilled(
    result: &mut TransitionResult,
    ctx: &DialogContext<'_>,
    response: &HookResponse,
) -> Result<(), TransitionError> {
    apply_attributes(&mut result.session, response);

    let intent = current_intent(ctx, &result.session)?;
    let handler_target = response
        .intent_name()
        .filter(|n| *n != intent.name)
        .map(str::to_string);
    let messages = response.messages.clone();

    match response.directive() {
        DialogAction::Close | DialogAction::Delegate => {
            if response.intent_state() == Some(IntentState::Failed) {
                let messages = if messages.is_empty() {
                    vec![Message::plain(&ctx.config.failure_message)]
                } else {
                    messages
                };
                let intent_snapshot = snapshot(intent, &result.session, IntentState::Failed);
                result.enter(DialogState::Closed)?;
                result.push(Effect::respond(
                    DialogAction::Close,
                    messages,
                    Some(intent_snapshot),
                ));
                return Ok(());
            }

            // Slots are frozen here; only the handler's attributes carry over
            let outcome = intent
                .closing
                .resolve(&result.session.slots, &result.session.attributes);
            let mut messages = messages;
            messages.extend(outcome.messages);

            match handler_target.or(outcome.next_intent) {
                Some(next) if result.session.follow_up_depth < ctx.config.max_follow_ups => {
                    let target = lookup(ctx, &next)?;
                    let seed = if response.intent_name() == Some(next.as_str()) {
                        response.slots().unwrap_or_default()
                    } else {
                        BTreeMap::new()
                    };
                    if !messages.is_empty() {
                        result.push(Effect::QueueMessages(messages));
                    }
                    result.session.follow_up_depth += 1;
                    if target.is_fallback {
                        return fall_back(result, ctx);
                    }
                    begin_intent(result, target, seed);
                    advance(result, target, true)
                }
                _ => {
                    let state = response.intent_state().unwrap_or(IntentState::Fulfilled);
                    let intent_snapshot = snapshot(intent, &result.session, state);
                    result.enter(DialogState::Closed)?;
                    result.push(Effect::respond(
                        DialogAction::Close,
                        messages,
                        Some(intent_snapshot),
                    ));
                    Ok(())
                }
            }
        }
        DialogAction::ElicitSlot { slot_to_elicit } => {
            let target = match handler_target {
                Some(name) => {
                    let target = lookup(ctx, &name)?;
                    begin_intent(result, target, BTreeMap::new());
                    target
                }
                None => intent,
            };
            if let Some(slots) = response.slots() {
                result.session.slots = declared(target, slots);
            }
            directed_elicit(result, target, slot_to_elicit, messages)
        }
        DialogAction::ConfirmIntent => {
            result.session.confirmation = ConfirmationState::None;
            directed_confirm(result, intent, messages)
        }
        DialogAction::ElicitIntent => directed_elicit_intent(result, ctx, messages),
    }
}

fn directed_elicit(
    result: &mut TransitionResult,
    intent: &Intent,
    slot: &str,
    messages: Vec<Message>,
) -> Result<(), TransitionError> {
    let spec = intent.slot(slot).ok_or_else(|| {
        TransitionError::InvalidTransition(format!(
            "hook elicited undeclared slot {slot} of {}",
            intent.name
        ))
    })?;
    result.enter(DialogState::eliciting(slot))?;
    let messages = if messages.is_empty() {
        slot_prompt(spec, &result.session.slots)
    } else {
        messages
    };
    let intent_snapshot = snapshot(intent, &result.session, IntentState::InProgress);
    result.push(Effect::respond(
        DialogAction::elicit_slot(slot),
        messages,
        Some(intent_snapshot),
    ));
    Ok(())
}

fn directed_confirm(
    result: &mut TransitionResult,
    intent: &Intent,
    messages: Vec<Message>,
) -> Result<(), TransitionError> {
    result.enter(DialogState::ConfirmingIntent)?;
    let messages = if messages.is_empty() {
        confirmation_prompt(intent, &result.session.slots)
    } else {
        messages
    };
    let intent_snapshot = snapshot(intent, &result.session, IntentState::InProgress);
    result.push(Effect::respond(
        DialogAction::ConfirmIntent,
        messages,
        Some(intent_snapshot),
    ));
    Ok(())
}

fn directed_elicit_intent(
    result: &mut TransitionResult,
    ctx: &DialogContext<'_>,
    messages: Vec<Message>,
) -> Result<(), TransitionError> {
    result.session.clear_intent();
    result.enter(DialogState::ElicitingIntent)?;
    let messages = if messages.is_empty() {
        vec![Message::plain(&ctx.config.fallback_message)]
    } else {
        messages
    };
    result.push(Effect::respond(DialogAction::ElicitIntent, messages, None));
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

fn lookup<'a>(ctx: &DialogContext<'a>, name: &str) -> Result<&'a Intent, TransitionError> {
    ctx.bot
        .intent(name)
        .map_err(|_| TransitionError::UnknownIntent(name.to_string()))
}

fn current_intent<'a>(
    ctx: &DialogContext<'a>,
    session: &Session,
) -> Result<&'a Intent, TransitionError> {
    let name = session
        .intent
        .as_deref()
        .ok_or_else(|| TransitionError::InvalidTransition("no active intent".to_string()))?;
    lookup(ctx, name)
}

/// Make `intent` the active one, keeping only slots it declares
fn begin_intent(result: &mut TransitionResult, intent: &Intent, slots: BTreeMap<String, SlotValue>) {
    result.session.clear_intent();
    result.session.intent = Some(intent.name.clone());
    result.session.slots = declared(intent, slots);
}

fn declared(intent: &Intent, slots: BTreeMap<String, SlotValue>) -> BTreeMap<String, SlotValue> {
    slots
        .into_iter()
        .filter(|(name, _)| intent.slot(name).is_some())
        .collect()
}

fn apply_attributes(session: &mut Session, response: &HookResponse) {
    if let Some(attributes) = response.session_attributes() {
        session.attributes = attributes.clone();
    }
}

fn render(messages: &[Message], slots: &BTreeMap<String, SlotValue>) -> Vec<Message> {
    messages.iter().map(|m| m.render(slots)).collect()
}

fn slot_prompt(spec: &SlotSpec, slots: &BTreeMap<String, SlotValue>) -> Vec<Message> {
    if spec.prompt.is_empty() {
        vec![Message::plain(format!("What is the value for {}?", spec.name))]
    } else {
        render(&spec.prompt, slots)
    }
}

fn confirmation_prompt(intent: &Intent, slots: &BTreeMap<String, SlotValue>) -> Vec<Message> {
    intent
        .confirmation
        .as_ref()
        .map(|c| render(&c.prompt, slots))
        .unwrap_or_default()
}

/// Intent snapshot listing every declared slot, filled or not
pub fn snapshot(intent: &Intent, session: &Session, state: IntentState) -> IntentSnapshot {
    let mut slots: BTreeMap<String, Option<SlotValue>> = intent
        .slots
        .iter()
        .map(|s| (s.name.clone(), session.slots.get(&s.name).cloned()))
        .collect();
    for (name, value) in &session.slots {
        slots
            .entry(name.clone())
            .or_insert_with(|| Some(value.clone()));
    }
    IntentSnapshot {
        name: intent.name.clone(),
        slots,
        state,
        confirmation_state: session.confirmation,
    }
}
