//! Dialog engine
//!
//! Drives one turn: interprets the utterance for the session's current
//! state, feeds events through the pure state machine and executes the
//! effects it returns until a response is ready.

#[cfg(test)]
pub(crate) mod testing;

use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use crate::bot::{BotDefinition, Intent};
use crate::config::EmulatorConfig;
use crate::fulfillment::{
    BotDescriptor, FulfillmentError, FulfillmentHook, FulfillmentInvoker, HookRequest,
    HookResponse,
};
use crate::matcher::{IntentMatch, SampleUtteranceMatcher, UtteranceMatcher};
use crate::protocol::{
    DialogAction, DialogResponse, IntentState, InvocationSource, Message,
    SlotValue,
};
use crate::session::{Interpretation, Session, SessionError, SessionStore};
use crate::slots::{classify_answer, Answer, RawSlotValue, SlotTypeValidator};
use crate::state_machine::{
    snapshot, transition, DialogContext, DialogState, Effect, Event, TransitionError,
};

/// Transitions one turn may take before it is abandoned
const MAX_STEPS: usize = 16;

/// Per-turn inputs that flow into hook requests
struct Turn<'a> {
    text: &'a str,
    request_attributes: &'a BTreeMap<String, String>,
    confidence: f64,
}

/// Runs turns for any number of sessions against one bot
pub struct DialogEngine {
    bot: Arc<BotDefinition>,
    config: EmulatorConfig,
    sessions: SessionStore,
    matcher: Arc<dyn UtteranceMatcher>,
    invoker: Option<FulfillmentInvoker>,
}

impl DialogEngine {
    pub fn new(bot: Arc<BotDefinition>, config: EmulatorConfig) -> Self {
        let matcher = Arc::new(SampleUtteranceMatcher::new(bot.clone(), config.clone()));
        Self {
            sessions: SessionStore::new(config.history_limit),
            bot,
            config,
            matcher,
            invoker: None,
        }
    }

    /// Replace the default sample-utterance matcher
    pub fn with_matcher(mut self, matcher: Arc<dyn UtteranceMatcher>) -> Self {
        self.matcher = matcher;
        self
    }

    /// Route dialog and fulfillment code hook calls to `hook`
    pub fn with_hook(mut self, hook: Arc<dyn FulfillmentHook>) -> Self {
        self.invoker = Some(FulfillmentInvoker::new(
            hook,
            self.config.fulfillment_timeout,
        ));
        self
    }

    pub fn bot(&self) -> &BotDefinition {
        &self.bot
    }

    pub fn config(&self) -> &EmulatorConfig {
        &self.config
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Process one user utterance and produce exactly one response.
    ///
    /// Only usage errors (a concurrent turn on the same session) are
    /// returned as errors; everything else degrades to a `Close` carrying
    /// the failure message.
    pub async fn process_turn(
        &self,
        session_id: &str,
        text: &str,
        request_attributes: &BTreeMap<String, String>,
    ) -> Result<DialogResponse, SessionError> {
        let _lease = self.sessions.begin_turn(session_id)?;
        let start = Instant::now();
        let mut session = self.sessions.get(session_id);
        let mut visited = Vec::new();

        if session.state.is_terminal() {
            session.state = DialogState::Idle;
            session.clear_intent();
            visited.push(DialogState::Idle);
        }

        let (event, confidence) = self.interpret(&session, text).await;
        tracing::debug!(
            session_id = %session_id,
            state = %session.state,
            event = event.name(),
            "Interpreted utterance"
        );

        let turn = Turn {
            text,
            request_attributes,
            confidence,
        };
        let mut response = match self.run(&mut session, event, &mut visited, &turn).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(
                    session_id = %session_id,
                    state = %session.state,
                    error = %e,
                    "Turn failed, closing"
                );
                self.degrade(&mut session)
            }
        };
        visited.dedup();
        response.visited_states = visited;

        session.record(
            Interpretation {
                at: Utc::now(),
                utterance: text.to_string(),
                intent: response.intent_name().map(str::to_string),
                confidence,
                state: session.state.clone(),
            },
            self.sessions.history_limit(),
        );
        self.sessions.save(session_id, session)?;

        tracing::info!(
            session_id = %session_id,
            action = %response.dialog_action,
            intent = response.intent_name().unwrap_or("-"),
            duration_ms = %start.elapsed().as_millis(),
            "Turn completed"
        );
        Ok(response)
    }

    /// Feed events through the state machine until it responds
    async fn run(
        &self,
        session: &mut Session,
        mut event: Event,
        visited: &mut Vec<DialogState>,
        turn: &Turn<'_>,
    ) -> Result<DialogResponse, TransitionError> {
        let ctx = DialogContext::new(&self.bot, &self.config);
        let mut queued: Vec<Message> = Vec::new();

        for _ in 0..MAX_STEPS {
            let result = transition(session, &ctx, event)?;
            *session = result.session;
            visited.extend(result.path);

            let mut next = None;
            for effect in result.effects {
                match effect {
                    Effect::QueueMessages(messages) => queued.extend(messages),
                    Effect::Respond {
                        action,
                        messages,
                        intent,
                    } => {
                        queued.extend(messages);
                        return Ok(DialogResponse {
                            dialog_action: action,
                            messages: queued,
                            intent,
                            session_attributes: session.attributes.clone(),
                            visited_states: Vec::new(),
                        });
                    }
                    Effect::InvokeDialogHook { proposed } => {
                        next = Some(self.call_dialog_hook(session, proposed, turn).await);
                    }
                    Effect::InvokeFulfillment => {
                        next = Some(self.call_fulfillment(session, turn).await);
                    }
                }
            }
            event = next.ok_or_else(|| {
                TransitionError::InvalidTransition(format!(
                    "no outcome from state {}",
                    session.state
                ))
            })?;
        }

        Err(TransitionError::InvalidTransition(format!(
            "turn did not settle within {MAX_STEPS} steps"
        )))
    }

    /// Close the cycle after an internal failure and reset the session
    fn degrade(&self, session: &mut Session) -> DialogResponse {
        let intent = session
            .intent
            .as_deref()
            .and_then(|name| self.bot.intent(name).ok())
            .map(|intent| snapshot(intent, session, IntentState::Failed));
        session.clear_intent();
        session.state = DialogState::Idle;
        DialogResponse {
            dialog_action: DialogAction::Close,
            messages: vec![Message::plain(&self.config.failure_message)],
            intent,
            session_attributes: session.attributes.clone(),
            visited_states: Vec::new(),
        }
    }

    // ========================================================================
    // Interpretation
    // ========================================================================

    /// Turn the utterance into the event the current state expects
    async fn interpret(&self, session: &Session, text: &str) -> (Event, f64) {
        let current = session
            .intent
            .as_deref()
            .and_then(|name| self.bot.intent(name).ok());

        match (&session.state, current) {
            (DialogState::ElicitingSlot { slot }, Some(intent)) => {
                self.interpret_slot(session, intent, slot, text).await
            }
            (DialogState::ConfirmingIntent, Some(intent)) => {
                match classify_answer(text) {
                    Some(Answer::Yes) => (Event::Affirmed, 1.0),
                    Some(Answer::No) => (Event::Denied, 1.0),
                    None => self
                        .switch_intent(session, intent, text)
                        .await
                        .unwrap_or((Event::ConfirmationUnclear, 0.0)),
                }
            }
            _ => {
                let candidates: Vec<&Intent> = self.bot.intents().iter().collect();
                let top = self.top_match(text, &candidates, session).await;
                self.recognition(top)
            }
        }
    }

    async fn interpret_slot(
        &self,
        session: &Session,
        intent: &Intent,
        slot: &str,
        text: &str,
    ) -> (Event, f64) {
        let validator = SlotTypeValidator::new(&self.bot, &self.config);
        let rejection = match intent.slot(slot) {
            Some(spec) => match validator.validate_slot(&RawSlotValue::Text(text.to_string()), spec) {
                Ok(value) => {
                    let slots = BTreeMap::from([(slot.to_string(), value)]);
                    return (Event::SlotsCaptured { slots }, 1.0);
                }
                Err(e) => e.to_string(),
            },
            None => format!("{} has no slot {slot}", intent.name),
        };

        // Several slots in one utterance, or a re-phrased value
        let top = self.top_match(text, &[intent], session).await;
        if top.intent == intent.name {
            let slots = self.validate_captures(intent, &top.slots);
            if !slots.is_empty() {
                return (Event::SlotsCaptured { slots }, top.confidence);
            }
        }

        if let Some(switched) = self.switch_intent(session, intent, text).await {
            return switched;
        }

        tracing::debug!(slot = %slot, reason = %rejection, "Slot value rejected");
        (
            Event::SlotRejected {
                slot: slot.to_string(),
                reason: rejection,
            },
            0.0,
        )
    }

    /// Match against every intent other than `current`
    async fn switch_intent(
        &self,
        session: &Session,
        current: &Intent,
        text: &str,
    ) -> Option<(Event, f64)> {
        let others: Vec<&Intent> = self
            .bot
            .intents()
            .iter()
            .filter(|i| i.name != current.name)
            .collect();
        let top = self.top_match(text, &others, session).await;
        if top.intent == self.bot.fallback().name {
            return None;
        }
        tracing::info!(
            session_id = %session.id,
            from = %current.name,
            to = %top.intent,
            "Switching intent"
        );
        Some(self.recognition(top))
    }

    async fn top_match(&self, text: &str, candidates: &[&Intent], session: &Session) -> IntentMatch {
        let fallback = || IntentMatch::fallback(&self.bot.fallback().name);
        match self.matcher.rank(text, candidates, session).await {
            Ok(ranked) => ranked.into_iter().next().unwrap_or_else(fallback),
            Err(e) => {
                tracing::warn!(error = %e, utterance = %text, "Matcher failed, using fallback");
                fallback()
            }
        }
    }

    fn recognition(&self, top: IntentMatch) -> (Event, f64) {
        match self.bot.intent(&top.intent) {
            Ok(intent) if !intent.is_fallback => {
                let slots = self.validate_captures(intent, &top.slots);
                (
                    Event::IntentRecognized {
                        intent: top.intent,
                        slots,
                        confidence: top.confidence,
                    },
                    top.confidence,
                )
            }
            _ => (Event::IntentNotRecognized, 0.0),
        }
    }

    /// Keep only captured values that validate against their slot type
    fn validate_captures(
        &self,
        intent: &Intent,
        raw: &BTreeMap<String, String>,
    ) -> BTreeMap<String, SlotValue> {
        let validator = SlotTypeValidator::new(&self.bot, &self.config);
        raw.iter()
            .filter_map(|(name, text)| {
                let spec = intent.slot(name)?;
                match validator.validate_slot(&RawSlotValue::Text(text.clone()), spec) {
                    Ok(value) => Some((name.clone(), value)),
                    Err(e) => {
                        tracing::debug!(slot = %name, error = %e, "Dropped captured value");
                        None
                    }
                }
            })
            .collect()
    }

    // ========================================================================
    // Hooks
    // ========================================================================

    async fn call_dialog_hook(
        &self,
        session: &Session,
        proposed: DialogAction,
        turn: &Turn<'_>,
    ) -> Event {
        let Some(invoker) = &self.invoker else {
            // Without a collaborator the proposed step stands
            return Event::DialogHookResponded {
                response: HookResponse::delegate(),
            };
        };
        let request = match self.hook_request(session, InvocationSource::DialogCodeHook, turn) {
            Ok(request) => request,
            Err(error) => return Event::DialogHookFailed { error },
        };
        let label = proposed
            .slot_to_elicit()
            .and_then(|slot| self.slot_label(session, slot));
        let mut request = request.with_proposed(proposed, session.attempts);
        if label.is_some() {
            request.invocation_label = label;
        }

        match invoker.invoke(&request).await {
            Ok(response) => Event::DialogHookResponded { response },
            Err(error) => Event::DialogHookFailed { error },
        }
    }

    async fn call_fulfillment(&self, session: &Session, turn: &Turn<'_>) -> Event {
        let Some(invoker) = &self.invoker else {
            return Event::FulfillmentFailed {
                error: FulfillmentError::transport("no fulfillment hook configured"),
            };
        };
        let request =
            match self.hook_request(session, InvocationSource::FulfillmentCodeHook, turn) {
                Ok(request) => request,
                Err(error) => return Event::FulfillmentFailed { error },
            };

        match invoker.invoke(&request).await {
            Ok(response) => Event::FulfillmentSucceeded { response },
            Err(error) => Event::FulfillmentFailed { error },
        }
    }

    fn hook_request(
        &self,
        session: &Session,
        source: InvocationSource,
        turn: &Turn<'_>,
    ) -> Result<HookRequest, FulfillmentError> {
        let intent = session
            .intent
            .as_deref()
            .and_then(|name| self.bot.intent(name).ok())
            .ok_or_else(|| FulfillmentError::handler("no active intent to send to the hook"))?;
        let state = match source {
            InvocationSource::DialogCodeHook => IntentState::InProgress,
            InvocationSource::FulfillmentCodeHook => IntentState::ReadyForFulfillment,
        };
        let intent_snapshot = snapshot(intent, session, state);

        let mut request = HookRequest::new(
            source,
            &session.id,
            turn.text,
            BotDescriptor::new(self.bot.name(), self.bot.locale()),
            intent_snapshot,
            session.attributes.clone(),
        )
        .with_confidence(turn.confidence)
        .with_request_attributes(turn.request_attributes.clone());
        request.invocation_label = intent.invocation_label.clone();
        Ok(request)
    }

    fn slot_label(&self, session: &Session, slot: &str) -> Option<String> {
        let intent = self.bot.intent(session.intent.as_deref()?).ok()?;
        intent.slot(slot)?.invocation_label.clone()
    }
}

impl std::fmt::Debug for DialogEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DialogEngine")
            .field("bot", &self.bot.name())
            .field("invoker", &self.invoker)
            .finish_non_exhaustive()
    }
}
