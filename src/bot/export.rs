//! Serde mirrors of the bot export JSON files
//!
//! Only the fields the emulator acts on are declared; everything else in the
//! export is ignored.

use serde::Deserialize;

use crate::protocol::{Button, ImageResponseCard, Message};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotFile {
    pub name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentFile {
    pub name: Option<String>,
    pub parent_intent_signature: Option<String>,
    #[serde(default)]
    pub sample_utterances: Option<Vec<SampleUtterance>>,
    #[serde(default)]
    pub slot_priorities: Option<Vec<SlotPriority>>,
    pub intent_confirmation_setting: Option<ConfirmationSetting>,
    pub dialog_code_hook: Option<HookSwitch>,
    pub fulfillment_code_hook: Option<HookSwitch>,
    pub intent_closing_setting: Option<ClosingSetting>,
    pub initial_response_setting: Option<InitialResponseSetting>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialResponseSetting {
    pub code_hook: Option<LabelledHook>,
}

/// Code hook settings that may carry an invocation label
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelledHook {
    pub invocation_label: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SampleUtterance {
    pub utterance: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotPriority {
    pub priority: i64,
    pub slot_name: Option<String>,
    pub slot_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookSwitch {
    #[serde(default)]
    pub enabled: bool,
    pub is_active: Option<bool>,
}

impl HookSwitch {
    pub fn on(&self) -> bool {
        self.enabled && self.is_active.unwrap_or(true)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationSetting {
    pub prompt_specification: Option<PromptSpecification>,
    pub declination_response: Option<ResponseSpecification>,
    pub declination_next_step: Option<NextStep>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptSpecification {
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub message_groups_list: Vec<MessageGroup>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseSpecification {
    #[serde(default)]
    pub message_groups_list: Vec<MessageGroup>,
}

#[derive(Debug, Deserialize)]
pub struct MessageGroup {
    pub message: ExportMessage,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportMessage {
    pub plain_text_message: Option<ValueHolder>,
    pub custom_payload: Option<ValueHolder>,
    pub image_response_card: Option<ExportCard>,
}

#[derive(Debug, Deserialize)]
pub struct ValueHolder {
    pub value: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportCard {
    pub title: String,
    pub subtitle: Option<String>,
    pub image_url: Option<String>,
    #[serde(default)]
    pub buttons: Vec<Button>,
}

impl ExportMessage {
    pub fn into_message(self) -> Option<Message> {
        if let Some(value) = self.plain_text_message.and_then(|m| m.value) {
            return Some(Message::PlainText { content: value });
        }
        if let Some(value) = self.custom_payload.and_then(|m| m.value) {
            return Some(Message::CustomPayload { content: value });
        }
        self.image_response_card.map(|card| Message::ImageResponseCard {
            image_response_card: ImageResponseCard {
                title: card.title,
                subtitle: card.subtitle,
                image_url: card.image_url,
                buttons: card.buttons,
            },
        })
    }
}

/// Convert a message group list into emulator messages
pub fn messages(groups: Vec<MessageGroup>) -> Vec<Message> {
    groups
        .into_iter()
        .filter_map(|g| g.message.into_message())
        .collect()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosingSetting {
    pub closing_response: Option<ResponseSpecification>,
    pub next_step: Option<NextStep>,
    pub conditional: Option<Conditional>,
    pub active: Option<bool>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextStep {
    pub dialog_action: Option<StepAction>,
    pub intent: Option<IntentRef>,
}

impl NextStep {
    pub fn action_type(&self) -> Option<&str> {
        self.dialog_action.as_ref().map(|a| a.kind.as_str())
    }

    pub fn intent_name(&self) -> Option<String> {
        self.intent.as_ref().and_then(|i| i.name.clone())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepAction {
    #[serde(rename = "type")]
    pub kind: String,
    pub slot_to_elicit: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct IntentRef {
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conditional {
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub conditional_branches: Vec<ConditionalBranch>,
    pub default_branch: Option<DefaultBranch>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionalBranch {
    pub name: Option<String>,
    pub condition: ConditionExpression,
    pub next_step: Option<NextStep>,
    pub response: Option<ResponseSpecification>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionExpression {
    pub expression_string: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefaultBranch {
    pub next_step: Option<NextStep>,
    pub response: Option<ResponseSpecification>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotFile {
    pub name: Option<String>,
    pub identifier: Option<String>,
    pub slot_type_name: Option<String>,
    pub slot_type_id: Option<String>,
    pub value_elicitation_setting: Option<ValueElicitationSetting>,
    pub multiple_values_setting: Option<MultipleValuesSetting>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueElicitationSetting {
    pub slot_constraint: Option<String>,
    pub prompt_specification: Option<PromptSpecification>,
    pub slot_capture_setting: Option<SlotCaptureSetting>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotCaptureSetting {
    pub code_hook: Option<LabelledHook>,
    pub elicitation_code_hook: Option<LabelledHook>,
}

impl SlotCaptureSetting {
    /// Label of the capture hook, else of the elicitation hook
    pub fn invocation_label(&self) -> Option<String> {
        self.code_hook
            .as_ref()
            .and_then(|h| h.invocation_label.clone())
            .or_else(|| {
                self.elicitation_code_hook
                    .as_ref()
                    .and_then(|h| h.invocation_label.clone())
            })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultipleValuesSetting {
    #[serde(default)]
    pub allow_multiple_values: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotTypeFile {
    pub name: Option<String>,
    pub identifier: Option<String>,
    pub parent_slot_type_signature: Option<String>,
    #[serde(default)]
    pub slot_type_values: Option<Vec<SlotTypeValue>>,
    pub value_selection_setting: Option<ValueSelectionSetting>,
    pub composite_slot_type_setting: Option<CompositeSetting>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotTypeValue {
    pub sample_value: ValueHolder,
    #[serde(default)]
    pub synonyms: Option<Vec<ValueHolder>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueSelectionSetting {
    pub resolution_strategy: Option<String>,
    pub regex_filter: Option<RegexFilter>,
    pub regex_filter_pattern: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RegexFilter {
    pub pattern: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeSetting {
    #[serde(default)]
    pub sub_slots: Vec<SubSlotRef>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubSlotRef {
    pub name: String,
    pub slot_type_id: String,
}
