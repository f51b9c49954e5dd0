//! Protocol envelope types
//!
//! These mirror the shapes the managed service exchanges with clients and
//! code hooks, with the loosely-typed dialog action collapsed into a closed
//! tagged enum.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::state_machine::DialogState;

// ============================================================================
// Messages
// ============================================================================

/// A button on an image response card
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    pub text: String,
    pub value: String,
}

/// Image response card payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageResponseCard {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default)]
    pub buttons: Vec<Button>,
}

/// A message shown or spoken to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "contentType")]
pub enum Message {
    PlainText {
        content: String,
    },
    CustomPayload {
        content: String,
    },
    #[serde(rename_all = "camelCase")]
    ImageResponseCard {
        image_response_card: ImageResponseCard,
    },
}

impl Message {
    pub fn plain(content: impl Into<String>) -> Self {
        Message::PlainText {
            content: content.into(),
        }
    }

    /// User-visible text: plain content, or the card title
    pub fn text(&self) -> Option<&str> {
        match self {
            Message::PlainText { content } => Some(content),
            Message::ImageResponseCard {
                image_response_card,
            } => Some(&image_response_card.title),
            Message::CustomPayload { .. } => None,
        }
    }

    /// Substitute `{slot}` references with interpreted slot values
    pub fn render(&self, slots: &BTreeMap<String, SlotValue>) -> Self {
        match self {
            Message::PlainText { content } => Message::PlainText {
                content: render_template(content, slots),
            },
            Message::ImageResponseCard {
                image_response_card,
            } => Message::ImageResponseCard {
                image_response_card: ImageResponseCard {
                    title: render_template(&image_response_card.title, slots),
                    subtitle: image_response_card
                        .subtitle
                        .as_deref()
                        .map(|s| render_template(s, slots)),
                    ..image_response_card.clone()
                },
            },
            Message::CustomPayload { .. } => self.clone(),
        }
    }
}

/// Replace `{name}` with the interpreted value of slot `name`.
///
/// Unknown or unfilled references are left as-is.
pub fn render_template(template: &str, slots: &BTreeMap<String, SlotValue>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some((before, after)) = rest.split_once('{') {
        out.push_str(before);
        let Some((name, tail)) = after.split_once('}') else {
            out.push('{');
            rest = after;
            break;
        };
        match slots.get(name) {
            Some(value) => out.push_str(&value.interpreted_value),
            None => {
                out.push('{');
                out.push_str(name);
                out.push('}');
            }
        }
        rest = tail;
    }
    out.push_str(rest);
    out
}

// ============================================================================
// Slot values
// ============================================================================

/// Whether a slot holds one value or a list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SlotShape {
    #[default]
    Scalar,
    List,
}

/// A validated slot value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotValue {
    /// Text as the user said it
    pub original_value: String,
    /// Canonical value after resolution
    pub interpreted_value: String,
    pub resolved_values: Vec<String>,
    pub shape: SlotShape,
    /// Element values of a list-shaped slot
    pub values: Vec<SlotValue>,
    /// Sub-slot values of a composite slot
    pub sub_slots: BTreeMap<String, SlotValue>,
}

impl SlotValue {
    pub fn new(original: impl Into<String>, interpreted: impl Into<String>) -> Self {
        let interpreted = interpreted.into();
        Self {
            original_value: original.into(),
            resolved_values: vec![interpreted.clone()],
            interpreted_value: interpreted,
            shape: SlotShape::Scalar,
            values: Vec::new(),
            sub_slots: BTreeMap::new(),
        }
    }

    /// Value whose original and interpreted text are the same
    pub fn literal(value: impl Into<String>) -> Self {
        let value = value.into();
        Self::new(value.clone(), value)
    }

    pub fn list(original: impl Into<String>, values: Vec<SlotValue>) -> Self {
        let interpreted = values
            .iter()
            .map(|v| v.interpreted_value.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        Self {
            original_value: original.into(),
            resolved_values: values.iter().map(|v| v.interpreted_value.clone()).collect(),
            interpreted_value: interpreted,
            shape: SlotShape::List,
            values,
            sub_slots: BTreeMap::new(),
        }
    }

    pub fn with_sub_slots(mut self, sub_slots: BTreeMap<String, SlotValue>) -> Self {
        self.sub_slots = sub_slots;
        self
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireValue {
    original_value: String,
    #[serde(default)]
    interpreted_value: Option<String>,
    #[serde(default)]
    resolved_values: Vec<String>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSlot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<WireValue>,
    #[serde(default)]
    shape: SlotShape,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    values: Vec<SlotValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sub_slots: Option<BTreeMap<String, Option<SlotValue>>>,
}

impl Serialize for SlotValue {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        WireSlot {
            value: Some(WireValue {
                original_value: self.original_value.clone(),
                interpreted_value: Some(self.interpreted_value.clone()),
                resolved_values: self.resolved_values.clone(),
            }),
            shape: self.shape,
            values: self.values.clone(),
            sub_slots: if self.sub_slots.is_empty() {
                None
            } else {
                Some(
                    self.sub_slots
                        .iter()
                        .map(|(k, v)| (k.clone(), Some(v.clone())))
                        .collect(),
                )
            },
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SlotValue {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = WireSlot::deserialize(deserializer)?;
        let value = wire
            .value
            .ok_or_else(|| serde::de::Error::missing_field("value"))?;
        let interpreted = value
            .interpreted_value
            .unwrap_or_else(|| value.original_value.clone());
        Ok(SlotValue {
            resolved_values: if value.resolved_values.is_empty() {
                vec![interpreted.clone()]
            } else {
                value.resolved_values
            },
            original_value: value.original_value,
            interpreted_value: interpreted,
            shape: wire.shape,
            values: wire.values,
            sub_slots: wire
                .sub_slots
                .unwrap_or_default()
                .into_iter()
                .filter_map(|(k, v)| v.map(|v| (k, v)))
                .collect(),
        })
    }
}

// ============================================================================
// Dialog actions and responses
// ============================================================================

/// Next action the client should take
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DialogAction {
    ElicitSlot {
        #[serde(rename = "slotToElicit")]
        slot_to_elicit: String,
    },
    ConfirmIntent,
    Delegate,
    Close,
    ElicitIntent,
}

impl DialogAction {
    pub fn elicit_slot(slot: impl Into<String>) -> Self {
        DialogAction::ElicitSlot {
            slot_to_elicit: slot.into(),
        }
    }

    /// Tag name as the managed service spells it
    pub fn tag(&self) -> &'static str {
        match self {
            DialogAction::ElicitSlot { .. } => "ElicitSlot",
            DialogAction::ConfirmIntent => "ConfirmIntent",
            DialogAction::Delegate => "Delegate",
            DialogAction::Close => "Close",
            DialogAction::ElicitIntent => "ElicitIntent",
        }
    }

    pub fn slot_to_elicit(&self) -> Option<&str> {
        match self {
            DialogAction::ElicitSlot { slot_to_elicit } => Some(slot_to_elicit),
            _ => None,
        }
    }
}

impl fmt::Display for DialogAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DialogAction::ElicitSlot { slot_to_elicit } => write!(f, "ElicitSlot({slot_to_elicit})"),
            other => f.write_str(other.tag()),
        }
    }
}

/// Lifecycle of the intent carried in a response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IntentState {
    #[default]
    InProgress,
    ReadyForFulfillment,
    Fulfilled,
    Failed,
}

/// Confirmation status reported to hooks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfirmationState {
    #[default]
    None,
    Confirmed,
    Denied,
}

/// Which hook is being invoked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvocationSource {
    DialogCodeHook,
    FulfillmentCodeHook,
}

/// Intent as of response time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentSnapshot {
    pub name: String,
    #[serde(default)]
    pub slots: BTreeMap<String, Option<SlotValue>>,
    #[serde(default)]
    pub state: IntentState,
    #[serde(default)]
    pub confirmation_state: ConfirmationState,
}

impl IntentSnapshot {
    /// Interpreted value of a filled slot
    pub fn slot_value(&self, name: &str) -> Option<&str> {
        self.slots
            .get(name)
            .and_then(Option::as_ref)
            .map(|v| v.interpreted_value.as_str())
    }
}

/// The single response produced for every turn
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DialogResponse {
    pub dialog_action: DialogAction,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<IntentSnapshot>,
    pub session_attributes: BTreeMap<String, String>,
    /// Dialog states entered while processing the turn, in order
    #[serde(skip)]
    pub visited_states: Vec<DialogState>,
}

impl DialogResponse {
    pub fn intent_name(&self) -> Option<&str> {
        self.intent.as_ref().map(|i| i.name.as_str())
    }

    /// Text of every message that has user-visible text
    pub fn message_texts(&self) -> Vec<&str> {
        self.messages.iter().filter_map(Message::text).collect()
    }
}
