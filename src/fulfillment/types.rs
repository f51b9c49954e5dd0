//! Hook request and response envelopes
//!
//! Field names follow the managed service's Lambda event so existing
//! handlers can be pointed at the emulator unchanged.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

use crate::protocol::{
    ConfirmationState, DialogAction, IntentSnapshot, IntentState, InvocationSource, Message,
    SlotValue,
};

pub const MESSAGE_VERSION: &str = "1.0";
const INPUT_MODE: &str = "Text";
const RESPONSE_CONTENT_TYPE: &str = "text/plain; charset=utf-8";
const BOT_VERSION: &str = "DRAFT";
const BOT_ID: &str = "EMULATOR";
const ALIAS_ID: &str = "TSTALIASID";
const ALIAS_NAME: &str = "TestBotAlias";

// ============================================================================
// Request
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotDescriptor {
    pub id: String,
    pub name: String,
    pub alias_id: String,
    pub alias_name: String,
    pub locale_id: String,
    pub version: String,
}

impl BotDescriptor {
    pub fn new(name: impl Into<String>, locale: impl Into<String>) -> Self {
        Self {
            id: BOT_ID.to_string(),
            name: name.into(),
            alias_id: ALIAS_ID.to_string(),
            alias_name: ALIAS_NAME.to_string(),
            locale_id: locale.into(),
            version: BOT_VERSION.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookInterpretation {
    pub intent: IntentSnapshot,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nlu_confidence: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedContext {
    pub intent: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transcription {
    pub transcription: String,
    pub transcription_confidence: f64,
    pub resolved_context: ResolvedContext,
    #[serde(default)]
    pub resolved_slots: BTreeMap<String, SlotValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptAttempt {
    pub attempt: String,
}

/// What the emulator would do next if the hook delegates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposedNextState {
    pub dialog_action: DialogAction,
    pub intent: IntentSnapshot,
    pub prompt: PromptAttempt,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSessionState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dialog_action: Option<DialogAction>,
    pub intent: IntentSnapshot,
    #[serde(default)]
    pub session_attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub active_contexts: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub originating_request_id: Option<String>,
}

/// Event sent to a dialog or fulfillment hook
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookRequest {
    pub message_version: String,
    pub invocation_source: InvocationSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invocation_label: Option<String>,
    pub input_mode: String,
    pub response_content_type: String,
    pub session_id: String,
    pub input_transcript: String,
    pub bot: BotDescriptor,
    pub interpretations: Vec<HookInterpretation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposed_next_state: Option<ProposedNextState>,
    #[serde(default)]
    pub request_attributes: BTreeMap<String, String>,
    pub session_state: RequestSessionState,
    #[serde(default)]
    pub transcriptions: Vec<Transcription>,
}

impl HookRequest {
    /// Build a request for `intent` as it stands at this point of the turn
    pub fn new(
        source: InvocationSource,
        session_id: impl Into<String>,
        transcript: impl Into<String>,
        bot: BotDescriptor,
        intent: IntentSnapshot,
        session_attributes: BTreeMap<String, String>,
    ) -> Self {
        let transcript = transcript.into();
        let resolved_slots = intent
            .slots
            .iter()
            .filter_map(|(name, value)| value.clone().map(|v| (name.clone(), v)))
            .collect();
        Self {
            message_version: MESSAGE_VERSION.to_string(),
            invocation_source: source,
            invocation_label: None,
            input_mode: INPUT_MODE.to_string(),
            response_content_type: RESPONSE_CONTENT_TYPE.to_string(),
            session_id: session_id.into(),
            transcriptions: vec![Transcription {
                transcription: transcript.clone(),
                transcription_confidence: 1.0,
                resolved_context: ResolvedContext {
                    intent: intent.name.clone(),
                },
                resolved_slots,
            }],
            input_transcript: transcript,
            bot,
            interpretations: vec![HookInterpretation {
                intent: intent.clone(),
                nlu_confidence: None,
            }],
            proposed_next_state: None,
            request_attributes: BTreeMap::new(),
            session_state: RequestSessionState {
                dialog_action: None,
                intent,
                session_attributes,
                active_contexts: Vec::new(),
                originating_request_id: None,
            },
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        if let Some(first) = self.interpretations.first_mut() {
            first.nlu_confidence = Some(confidence);
        }
        self
    }

    pub fn with_request_attributes(mut self, attributes: BTreeMap<String, String>) -> Self {
        self.request_attributes = attributes;
        self
    }

    pub fn with_proposed(mut self, action: DialogAction, attempt: u32) -> Self {
        self.session_state.dialog_action = Some(action.clone());
        self.proposed_next_state = Some(ProposedNextState {
            dialog_action: action,
            intent: self.session_state.intent.clone(),
            prompt: PromptAttempt {
                attempt: prompt_attempt(attempt),
            },
        });
        self
    }

    pub fn intent_name(&self) -> &str {
        &self.session_state.intent.name
    }

    pub fn session_attributes(&self) -> &BTreeMap<String, String> {
        &self.session_state.session_attributes
    }
}

fn prompt_attempt(attempt: u32) -> String {
    match attempt {
        0 => "Initial".to_string(),
        n => format!("Retry{n}"),
    }
}

// ============================================================================
// Response
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseIntent {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slots: Option<BTreeMap<String, Option<SlotValue>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<IntentState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmation_state: Option<ConfirmationState>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseSessionState {
    pub dialog_action: DialogAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<ResponseIntent>,
    #[serde(
        default,
        deserialize_with = "string_map",
        skip_serializing_if = "Option::is_none"
    )]
    pub session_attributes: Option<BTreeMap<String, String>>,
}

/// Answer from a dialog or fulfillment hook
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookResponse {
    pub session_state: ResponseSessionState,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub messages: Vec<Message>,
}

impl HookResponse {
    pub fn new(action: DialogAction) -> Self {
        Self {
            session_state: ResponseSessionState {
                dialog_action: action,
                intent: None,
                session_attributes: None,
            },
            messages: Vec::new(),
        }
    }

    pub fn close() -> Self {
        Self::new(DialogAction::Close)
    }

    pub fn delegate() -> Self {
        Self::new(DialogAction::Delegate)
    }

    pub fn with_message(mut self, text: impl Into<String>) -> Self {
        self.messages.push(Message::plain(text));
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.session_state
            .session_attributes
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn with_intent(mut self, name: impl Into<String>, state: IntentState) -> Self {
        self.session_state.intent = Some(ResponseIntent {
            name: name.into(),
            slots: None,
            state: Some(state),
            confirmation_state: None,
        });
        self
    }

    pub fn with_slot(mut self, name: impl Into<String>, value: SlotValue) -> Self {
        if let Some(intent) = self.session_state.intent.as_mut() {
            intent
                .slots
                .get_or_insert_with(BTreeMap::new)
                .insert(name.into(), Some(value));
        }
        self
    }

    pub fn directive(&self) -> &DialogAction {
        &self.session_state.dialog_action
    }

    pub fn intent_name(&self) -> Option<&str> {
        self.session_state.intent.as_ref().map(|i| i.name.as_str())
    }

    pub fn intent_state(&self) -> Option<IntentState> {
        self.session_state.intent.as_ref().and_then(|i| i.state)
    }

    pub fn confirmation_state(&self) -> Option<ConfirmationState> {
        self.session_state
            .intent
            .as_ref()
            .and_then(|i| i.confirmation_state)
    }

    /// Filled slots the handler sent back, if it sent a slot map at all
    pub fn slots(&self) -> Option<BTreeMap<String, SlotValue>> {
        let slots = self.session_state.intent.as_ref()?.slots.as_ref()?;
        Some(
            slots
                .iter()
                .filter_map(|(name, value)| value.clone().map(|v| (name.clone(), v)))
                .collect(),
        )
    }

    pub fn session_attributes(&self) -> Option<&BTreeMap<String, String>> {
        self.session_state.session_attributes.as_ref()
    }
}

/// Handlers commonly put booleans and numbers in session attributes; the
/// service stringifies them, so do the same.
fn string_map<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<BTreeMap<String, String>>, D::Error> {
    let raw: Option<BTreeMap<String, serde_json::Value>> = Option::deserialize(deserializer)?;
    Ok(raw.map(|map| {
        map.into_iter()
            .filter_map(|(k, v)| match v {
                serde_json::Value::Null => None,
                serde_json::Value::String(s) => Some((k, s)),
                other => Some((k, other.to_string())),
            })
            .collect()
    }))
}

fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Message>, D::Error> {
    Ok(Option::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot() -> IntentSnapshot {
        let mut slots = BTreeMap::new();
        slots.insert("Origin".to_string(), Some(SlotValue::new("LA", "Los Angeles")));
        slots.insert("Destination".to_string(), None);
        IntentSnapshot {
            name: "BookFlight".into(),
            slots,
            state: IntentState::InProgress,
            confirmation_state: ConfirmationState::None,
        }
    }

    #[test]
    fn test_request_uses_lambda_field_names() {
        let request = HookRequest::new(
            InvocationSource::FulfillmentCodeHook,
            "s1",
            "from LA",
            BotDescriptor::new("AirlineBot", "en_US"),
            snapshot(),
            BTreeMap::from([("channel".to_string(), "lex".to_string())]),
        )
        .with_confidence(0.9);

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["messageVersion"], "1.0");
        assert_eq!(value["invocationSource"], "FulfillmentCodeHook");
        assert_eq!(value["inputMode"], "Text");
        assert_eq!(value["inputTranscript"], "from LA");
        assert_eq!(value["bot"]["localeId"], "en_US");
        assert_eq!(value["bot"]["name"], "AirlineBot");
        assert_eq!(value["interpretations"][0]["nluConfidence"], 0.9);
        assert_eq!(value["sessionState"]["intent"]["name"], "BookFlight");
        assert_eq!(
            value["sessionState"]["intent"]["slots"]["Origin"]["value"]["interpretedValue"],
            "Los Angeles"
        );
        assert!(value["sessionState"]["intent"]["slots"]["Destination"].is_null());
        assert_eq!(value["sessionState"]["sessionAttributes"]["channel"], "lex");
        assert_eq!(value["transcriptions"][0]["resolvedContext"]["intent"], "BookFlight");
        assert!(value.get("proposedNextState").is_none());
    }

    #[test]
    fn test_proposed_next_state() {
        let request = HookRequest::new(
            InvocationSource::DialogCodeHook,
            "s1",
            "book a flight",
            BotDescriptor::new("AirlineBot", "en_US"),
            snapshot(),
            BTreeMap::new(),
        )
        .with_proposed(DialogAction::elicit_slot("Destination"), 2);

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["proposedNextState"]["dialogAction"]["type"], "ElicitSlot");
        assert_eq!(
            value["proposedNextState"]["dialogAction"]["slotToElicit"],
            "Destination"
        );
        assert_eq!(value["proposedNextState"]["prompt"]["attempt"], "Retry2");
        assert_eq!(value["sessionState"]["dialogAction"]["type"], "ElicitSlot");
    }

    #[test]
    fn test_response_parses_handler_output() {
        let response: HookResponse = serde_json::from_value(json!({
            "sessionState": {
                "dialogAction": {"type": "Close"},
                "intent": {
                    "name": "BookFlight",
                    "state": "Fulfilled",
                    "slots": {
                        "Origin": {"value": {"originalValue": "LA", "interpretedValue": "Los Angeles"}},
                        "Destination": null
                    }
                },
                "sessionAttributes": {
                    "callback_event": "BookFlight",
                    "error_count": 0,
                    "auth_denied": false,
                    "current_form": null
                }
            },
            "messages": [{"contentType": "PlainText", "content": "Booked."}],
            "requestAttributes": {}
        }))
        .unwrap();

        assert_eq!(response.directive(), &DialogAction::Close);
        assert_eq!(response.intent_name(), Some("BookFlight"));
        assert_eq!(response.intent_state(), Some(IntentState::Fulfilled));
        let slots = response.slots().unwrap();
        assert_eq!(slots.len(), 1);
        assert_eq!(slots["Origin"].interpreted_value, "Los Angeles");

        let attrs = response.session_attributes().unwrap();
        assert_eq!(attrs["error_count"], "0");
        assert_eq!(attrs["auth_denied"], "false");
        assert!(!attrs.contains_key("current_form"));
        assert_eq!(response.messages, vec![Message::plain("Booked.")]);
    }

    #[test]
    fn test_response_minimal_and_null_messages() {
        let response: HookResponse = serde_json::from_value(json!({
            "sessionState": {"dialogAction": {"type": "Delegate"}},
            "messages": null
        }))
        .unwrap();
        assert_eq!(response, HookResponse::delegate());
        assert!(response.slots().is_none());
        assert!(response.session_attributes().is_none());
    }

    #[test]
    fn test_response_without_dialog_action_is_rejected() {
        let result: Result<HookResponse, _> =
            serde_json::from_value(json!({"sessionState": {}, "messages": []}));
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_helpers() {
        let response = HookResponse::close()
            .with_message("Done")
            .with_attribute("callback_event", "AnythingElse")
            .with_intent("BookFlight", IntentState::Fulfilled)
            .with_slot("Origin", SlotValue::literal("Boston"));
        assert_eq!(response.messages.len(), 1);
        assert_eq!(
            response.session_attributes().unwrap()["callback_event"],
            "AnythingElse"
        );
        assert_eq!(response.slots().unwrap()["Origin"].interpreted_value, "Boston");
    }
}
