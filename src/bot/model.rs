//! Resolved bot model
//!
//! Built once by the loader from the export files and never mutated.

use regex::Regex;
use std::collections::{BTreeMap, HashMap};

use crate::condition::Condition;
use crate::protocol::{Message, SlotValue};
use crate::text;

/// Name given to the fallback intent when the export has none
pub const FALLBACK_INTENT: &str = "FallbackIntent";
/// Parent signature marking an exported intent as the fallback intent
pub const FALLBACK_SIGNATURE: &str = "AMAZON.FallbackIntent";

// ============================================================================
// Utterance templates
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplatePart {
    Word(String),
    Slot(String),
}

/// A sample utterance split into literal words and `{slot}` placeholders
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UtteranceTemplate {
    pub text: String,
    pub parts: Vec<TemplatePart>,
}

impl UtteranceTemplate {
    pub fn parse(text: &str) -> Self {
        let normalized = text::normalize(text);
        let mut parts = Vec::new();
        let mut word = String::new();
        let mut slot: Option<String> = None;

        let flush = |word: &mut String, parts: &mut Vec<TemplatePart>| {
            if !word.is_empty() {
                parts.push(TemplatePart::Word(std::mem::take(word)));
            }
        };

        for c in normalized.chars() {
            if let Some(name) = slot.as_mut() {
                if c == '}' {
                    let name = name.trim().to_string();
                    if !name.is_empty() {
                        parts.push(TemplatePart::Slot(name));
                    }
                    slot = None;
                } else {
                    name.push(c);
                }
            } else if c == '{' {
                flush(&mut word, &mut parts);
                slot = Some(String::new());
            } else if c == ' ' {
                flush(&mut word, &mut parts);
            } else {
                word.push(c);
            }
        }
        flush(&mut word, &mut parts);

        Self {
            text: text.to_string(),
            parts,
        }
    }

    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().filter_map(|p| match p {
            TemplatePart::Slot(name) => Some(name.as_str()),
            TemplatePart::Word(_) => None,
        })
    }

    pub fn words(&self) -> Vec<&str> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                TemplatePart::Word(w) => Some(w.as_str()),
                TemplatePart::Slot(_) => None,
            })
            .collect()
    }

    /// True when the template has no literal words at all
    pub fn is_placeholder_only(&self) -> bool {
        self.parts.iter().all(|p| matches!(p, TemplatePart::Slot(_)))
    }
}

// ============================================================================
// Intents
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct SlotSpec {
    pub name: String,
    /// Resolved slot type name
    pub slot_type: String,
    pub required: bool,
    /// Position in the fill order (lower fills first)
    pub priority: i64,
    pub prompt: Vec<Message>,
    pub max_retries: Option<u32>,
    pub allow_multiple: bool,
    /// Sent to hooks while this slot is being elicited
    pub invocation_label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeclineBehavior {
    /// Clear the named slot (all slots when `None`) and elicit again
    Reelicit(Option<String>),
    /// Abandon the intent
    End,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmationSpec {
    pub prompt: Vec<Message>,
    pub declination: Vec<Message>,
    pub on_decline: DeclineBehavior,
    pub max_retries: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FulfillmentMode {
    /// Invoke the fulfillment collaborator
    CodeHook,
    /// Hand the filled intent back to the client
    ReturnIntent,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClosingBranch {
    pub name: String,
    pub condition: Condition,
    pub next_intent: Option<String>,
    pub response: Vec<Message>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum NextIntentRule {
    #[default]
    None,
    Fixed(String),
    Conditional {
        branches: Vec<ClosingBranch>,
        default_intent: Option<String>,
        default_response: Vec<Message>,
    },
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ClosingSpec {
    pub response: Vec<Message>,
    pub next: NextIntentRule,
}

/// What the closing setting decided for a fulfilled intent
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ClosingOutcome {
    pub messages: Vec<Message>,
    pub next_intent: Option<String>,
}

impl ClosingSpec {
    pub fn resolve(
        &self,
        slots: &BTreeMap<String, SlotValue>,
        attributes: &BTreeMap<String, String>,
    ) -> ClosingOutcome {
        let mut messages = self.response.clone();
        let next_intent = match &self.next {
            NextIntentRule::None => None,
            NextIntentRule::Fixed(name) => Some(name.clone()),
            NextIntentRule::Conditional {
                branches,
                default_intent,
                default_response,
            } => match branches.iter().find(|b| b.condition.evaluate(slots, attributes)) {
                Some(branch) => {
                    messages.extend(branch.response.iter().cloned());
                    branch.next_intent.clone()
                }
                None => {
                    messages.extend(default_response.iter().cloned());
                    default_intent.clone()
                }
            },
        };
        ClosingOutcome {
            messages: messages.iter().map(|m| m.render(slots)).collect(),
            next_intent,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub name: String,
    pub templates: Vec<UtteranceTemplate>,
    /// Slots in fill order
    pub slots: Vec<SlotSpec>,
    pub confirmation: Option<ConfirmationSpec>,
    pub fulfillment: FulfillmentMode,
    pub dialog_code_hook: bool,
    /// Sent to hooks when no slot-specific label applies
    pub invocation_label: Option<String>,
    pub closing: ClosingSpec,
    pub is_fallback: bool,
}

impl Intent {
    /// Intent used when the export declares no fallback intent
    pub fn default_fallback() -> Self {
        Self {
            name: FALLBACK_INTENT.to_string(),
            templates: Vec::new(),
            slots: Vec::new(),
            confirmation: None,
            fulfillment: FulfillmentMode::ReturnIntent,
            dialog_code_hook: false,
            invocation_label: None,
            closing: ClosingSpec::default(),
            is_fallback: true,
        }
    }

    pub fn slot(&self, name: &str) -> Option<&SlotSpec> {
        self.slots.iter().find(|s| s.name == name)
    }

    /// First required slot in fill order that is not yet filled
    pub fn next_unfilled<V>(&self, filled: &BTreeMap<String, V>) -> Option<&SlotSpec> {
        self.slots
            .iter()
            .find(|s| s.required && !filled.contains_key(&s.name))
    }

    pub fn first_required(&self) -> Option<&SlotSpec> {
        self.slots.iter().find(|s| s.required)
    }

    pub fn unresolved_required<V>(&self, filled: &BTreeMap<String, V>) -> usize {
        self.slots
            .iter()
            .filter(|s| s.required && !filled.contains_key(&s.name))
            .count()
    }
}

// ============================================================================
// Slot types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionStrategy {
    /// Unknown values are accepted as typed
    OriginalValue,
    /// Only listed values and synonyms are accepted
    TopResolution,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumValue {
    pub canonical: String,
    pub synonyms: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumeratedValues {
    pub values: Vec<EnumValue>,
    /// Normalised canonical values and synonyms to position in `values`
    pub index: HashMap<String, usize>,
    pub strategy: ResolutionStrategy,
}

impl EnumeratedValues {
    pub fn lookup(&self, raw: &str) -> Option<&EnumValue> {
        self.index
            .get(&text::normalize(raw))
            .and_then(|i| self.values.get(*i))
    }

    /// Every normalised surface form with its canonical value
    pub fn surface_forms(&self) -> impl Iterator<Item = (&str, &str)> {
        self.index.iter().filter_map(|(form, i)| {
            self.values
                .get(*i)
                .map(|v| (form.as_str(), v.canonical.as_str()))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinType {
    FreeFormInput,
    AlphaNumeric,
    Number,
    FirstName,
    LastName,
    Date,
    Confirmation,
    EmailAddress,
    /// Any other `AMAZON.*` type, accepted as typed
    Other,
}

impl BuiltinType {
    pub fn from_name(name: &str) -> Option<Self> {
        let rest = name.strip_prefix("AMAZON.")?;
        Some(match rest {
            "FreeFormInput" => BuiltinType::FreeFormInput,
            "AlphaNumeric" => BuiltinType::AlphaNumeric,
            "Number" => BuiltinType::Number,
            "FirstName" => BuiltinType::FirstName,
            "LastName" => BuiltinType::LastName,
            "Date" => BuiltinType::Date,
            "Confirmation" => BuiltinType::Confirmation,
            "EmailAddress" => BuiltinType::EmailAddress,
            _ => BuiltinType::Other,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubSlot {
    pub name: String,
    /// Resolved slot type name
    pub slot_type: String,
}

#[derive(Debug, Clone)]
pub enum SlotTypeKind {
    Enumerated(EnumeratedValues),
    Pattern(Regex),
    Builtin(BuiltinType),
    Composite(Vec<SubSlot>),
}

impl PartialEq for SlotTypeKind {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (SlotTypeKind::Enumerated(a), SlotTypeKind::Enumerated(b)) => a == b,
            (SlotTypeKind::Pattern(a), SlotTypeKind::Pattern(b)) => a.as_str() == b.as_str(),
            (SlotTypeKind::Builtin(a), SlotTypeKind::Builtin(b)) => a == b,
            (SlotTypeKind::Composite(a), SlotTypeKind::Composite(b)) => a == b,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SlotType {
    pub name: String,
    pub identifier: Option<String>,
    pub kind: SlotTypeKind,
}

impl SlotType {
    pub fn builtin(name: &str) -> Option<Self> {
        BuiltinType::from_name(name).map(|kind| Self {
            name: name.to_string(),
            identifier: Some(name.to_string()),
            kind: SlotTypeKind::Builtin(kind),
        })
    }
}
