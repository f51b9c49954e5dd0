//! Slot type validation
//!
//! Turns raw user text into canonical [`SlotValue`]s according to the slot's
//! declared type. Rejections become re-prompts in the dialog layer.

use chrono::{Duration, Local, NaiveDate};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;
use thiserror::Error;

use crate::bot::{
    BotDefinition, BuiltinType, EnumeratedValues, ResolutionStrategy, SlotSpec, SlotType,
    SlotTypeKind, SubSlot,
};
use crate::config::EmulatorConfig;
use crate::protocol::SlotValue;
use crate::text;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}$").expect("email regex is valid")
});

static LIST_SEPARATOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s*,\s*(?:and\s+|or\s+)?|\s+(?:and|or)\s+").expect("list separator regex is valid")
});

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%B %d %Y", "%B %d, %Y", "%d %B %Y"];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid value {raw:?} for slot type {slot_type}: {reason}")]
pub struct InvalidSlotValue {
    pub slot_type: String,
    pub raw: String,
    pub reason: String,
}

impl InvalidSlotValue {
    fn new(slot_type: &str, raw: &str, reason: impl Into<String>) -> Self {
        Self {
            slot_type: slot_type.to_string(),
            raw: raw.to_string(),
            reason: reason.into(),
        }
    }
}

/// Raw value offered for a slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawSlotValue {
    Text(String),
    /// Sub-slot name to raw text, for composite slot types
    Composite(BTreeMap<String, String>),
}

impl RawSlotValue {
    fn display(&self) -> String {
        match self {
            RawSlotValue::Text(text) => text.clone(),
            RawSlotValue::Composite(parts) => {
                parts.values().cloned().collect::<Vec<_>>().join(" ")
            }
        }
    }
}

impl From<&str> for RawSlotValue {
    fn from(text: &str) -> Self {
        RawSlotValue::Text(text.to_string())
    }
}

/// Answer to a yes/no question
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Answer {
    Yes,
    No,
}

const AFFIRMATIONS: &[&str] = &[
    "yes", "yeah", "yep", "yup", "ya", "sure", "correct", "right", "ok", "okay", "affirmative",
    "absolutely", "definitely", "certainly", "y",
];
const AFFIRMATION_PHRASES: &[&str] = &[
    "of course",
    "sounds good",
    "thats right",
    "that is right",
    "that is correct",
    "please do",
    "go ahead",
    "do it",
];
const DENIALS: &[&str] = &["no", "nope", "nah", "negative", "n", "never", "incorrect", "wrong"];
const DENIAL_PHRASES: &[&str] = &[
    "not really",
    "i dont think so",
    "dont",
    "do not",
    "thats wrong",
    "that is wrong",
    "never mind",
];

/// Classify an utterance against the fixed affirmation/denial vocabulary
pub fn classify_answer(utterance: &str) -> Option<Answer> {
    let normalized = text::normalize(utterance);
    if normalized.is_empty() {
        return None;
    }
    let first = normalized.split(' ').next().unwrap_or_default();

    let is_phrase = |phrases: &[&str]| {
        phrases
            .iter()
            .any(|p| normalized == *p || normalized.starts_with(&format!("{p} ")))
    };

    if DENIALS.contains(&first) || is_phrase(DENIAL_PHRASES) {
        Some(Answer::No)
    } else if AFFIRMATIONS.contains(&first) || is_phrase(AFFIRMATION_PHRASES) {
        Some(Answer::Yes)
    } else {
        None
    }
}

/// Validates raw values against the bot's slot types
#[derive(Debug, Clone, Copy)]
pub struct SlotTypeValidator<'a> {
    bot: &'a BotDefinition,
    fuzzy_threshold: Option<f64>,
}

impl<'a> SlotTypeValidator<'a> {
    pub fn new(bot: &'a BotDefinition, config: &EmulatorConfig) -> Self {
        Self {
            bot,
            fuzzy_threshold: config.fuzzy_threshold,
        }
    }

    /// Validate a value offered for `spec`, splitting lists for multi-value slots
    pub fn validate_slot(
        &self,
        raw: &RawSlotValue,
        spec: &SlotSpec,
    ) -> Result<SlotValue, InvalidSlotValue> {
        let slot_type = self
            .bot
            .slot_type(&spec.slot_type)
            .map_err(|e| InvalidSlotValue::new(&spec.slot_type, &raw.display(), e.to_string()))?;

        if let (true, RawSlotValue::Text(text)) = (spec.allow_multiple, raw) {
            let parts: Vec<&str> = LIST_SEPARATOR_RE
                .split(text.trim())
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .collect();
            if parts.len() > 1 {
                let values = parts
                    .into_iter()
                    .map(|p| self.validate(&RawSlotValue::Text(p.to_string()), slot_type))
                    .collect::<Result<Vec<_>, _>>()?;
                return Ok(SlotValue::list(text.trim(), values));
            }
        }
        self.validate(raw, slot_type)
    }

    /// Validate a raw value against one slot type
    pub fn validate(
        &self,
        raw: &RawSlotValue,
        slot_type: &SlotType,
    ) -> Result<SlotValue, InvalidSlotValue> {
        match (&slot_type.kind, raw) {
            (SlotTypeKind::Composite(subs), _) => {
                let parts = match raw {
                    RawSlotValue::Composite(parts) => parts.clone(),
                    RawSlotValue::Text(text) => self.decompose(text, subs),
                };
                let mut sub_values = BTreeMap::new();
                for sub in subs {
                    let sub_raw = parts.get(&sub.name).filter(|v| !v.trim().is_empty()).ok_or_else(|| {
                        InvalidSlotValue::new(
                            &slot_type.name,
                            &raw.display(),
                            format!("missing sub-slot {}", sub.name),
                        )
                    })?;
                    let sub_type = self.bot.slot_type(&sub.slot_type).map_err(|e| {
                        InvalidSlotValue::new(&sub.slot_type, sub_raw, e.to_string())
                    })?;
                    let value = self.validate(&RawSlotValue::Text(sub_raw.clone()), sub_type)?;
                    sub_values.insert(sub.name.clone(), value);
                }
                let join = |f: fn(&SlotValue) -> &str| -> String {
                    subs.iter()
                        .filter_map(|s| sub_values.get(&s.name).map(f))
                        .collect::<Vec<_>>()
                        .join(" ")
                };
                let original = match raw {
                    RawSlotValue::Text(text) => text.trim().to_string(),
                    RawSlotValue::Composite(_) => join(|v| v.original_value.as_str()),
                };
                let interpreted = join(|v| v.interpreted_value.as_str());
                Ok(SlotValue::new(original, interpreted).with_sub_slots(sub_values))
            }
            (_, RawSlotValue::Composite(_)) => Err(InvalidSlotValue::new(
                &slot_type.name,
                &raw.display(),
                "structured value offered for a scalar slot type",
            )),
            (kind, RawSlotValue::Text(text)) => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    return Err(InvalidSlotValue::new(&slot_type.name, text, "empty value"));
                }
                match kind {
                    SlotTypeKind::Enumerated(values) => {
                        self.validate_enumerated(&slot_type.name, trimmed, values)
                    }
                    SlotTypeKind::Pattern(regex) => {
                        if regex.is_match(trimmed) {
                            Ok(SlotValue::literal(trimmed))
                        } else {
                            Err(InvalidSlotValue::new(
                                &slot_type.name,
                                trimmed,
                                format!("does not match {}", regex.as_str()),
                            ))
                        }
                    }
                    SlotTypeKind::Builtin(builtin) => {
                        validate_builtin(&slot_type.name, *builtin, trimmed)
                    }
                    SlotTypeKind::Composite(_) => Err(InvalidSlotValue::new(
                        &slot_type.name,
                        trimmed,
                        "composite slot type",
                    )),
                }
            }
        }
    }

    fn validate_enumerated(
        &self,
        type_name: &str,
        raw: &str,
        values: &EnumeratedValues,
    ) -> Result<SlotValue, InvalidSlotValue> {
        if let Some(value) = values.lookup(raw) {
            return Ok(SlotValue::new(raw, value.canonical.clone()));
        }

        if let Some(threshold) = self.fuzzy_threshold {
            let needle = text::normalize(raw);
            let mut best: Option<(f64, &str)> = None;
            for value in &values.values {
                for form in std::iter::once(&value.canonical).chain(value.synonyms.iter()) {
                    let ratio = text::edit_ratio(&needle, &text::normalize(form));
                    if best.map_or(true, |(b, _)| ratio > b) {
                        best = Some((ratio, value.canonical.as_str()));
                    }
                }
            }
            if let Some((ratio, canonical)) = best.filter(|(r, _)| *r >= threshold) {
                tracing::debug!(slot_type = %type_name, raw, canonical, ratio, "Fuzzy slot value match");
                return Ok(SlotValue::new(raw, canonical));
            }
        }

        match values.strategy {
            ResolutionStrategy::OriginalValue => Ok(SlotValue::literal(raw)),
            ResolutionStrategy::TopResolution => Err(InvalidSlotValue::new(
                type_name,
                raw,
                "not a listed value or synonym",
            )),
        }
    }

    /// Split free text into sub-slot candidates
    fn decompose(&self, text: &str, subs: &[SubSlot]) -> BTreeMap<String, String> {
        let words: Vec<&str> = text.split_whitespace().collect();
        let (last, rest) = match words.split_last() {
            Some((last, rest)) if !rest.is_empty() => (Some((*last).to_string()), Some(rest.join(" "))),
            _ => (None, None),
        };

        subs.iter()
            .filter_map(|sub| {
                let kind = self.bot.slot_type(&sub.slot_type).ok().map(|t| &t.kind);
                let value = match kind {
                    Some(SlotTypeKind::Builtin(BuiltinType::FirstName)) => rest.clone(),
                    Some(SlotTypeKind::Builtin(BuiltinType::LastName)) => last.clone(),
                    _ => Some(text.trim().to_string()),
                };
                value.map(|v| (sub.name.clone(), v))
            })
            .collect()
    }
}

fn validate_builtin(
    type_name: &str,
    builtin: BuiltinType,
    raw: &str,
) -> Result<SlotValue, InvalidSlotValue> {
    let reject = |reason: &str| Err(InvalidSlotValue::new(type_name, raw, reason));

    match builtin {
        BuiltinType::FreeFormInput => Ok(SlotValue::literal(raw)),
        BuiltinType::AlphaNumeric => {
            let compact: String = raw.chars().filter(|c| !c.is_whitespace() && *c != '-').collect();
            if !compact.is_empty() && compact.chars().all(char::is_alphanumeric) {
                Ok(SlotValue::new(raw, compact))
            } else {
                reject("not alphanumeric")
            }
        }
        BuiltinType::Number => match parse_number(raw) {
            Some(number) => Ok(SlotValue::new(raw, number)),
            None => reject("not a number"),
        },
        BuiltinType::FirstName | BuiltinType::LastName => {
            let valid = raw
                .split_whitespace()
                .all(|w| w.chars().all(|c| c.is_alphabetic() || c == '-' || c == '\'' || c == '.'));
            if valid {
                Ok(SlotValue::literal(raw))
            } else {
                reject("not a name")
            }
        }
        BuiltinType::Date => match parse_date(raw) {
            Some(date) => Ok(SlotValue::new(raw, date.format("%Y-%m-%d").to_string())),
            None => reject("not a date"),
        },
        BuiltinType::Confirmation => match classify_answer(raw) {
            Some(Answer::Yes) => Ok(SlotValue::new(raw, "Yes")),
            Some(Answer::No) => Ok(SlotValue::new(raw, "No")),
            None if text::normalize(raw) == "maybe" => Ok(SlotValue::new(raw, "Maybe")),
            None => reject("not a yes or no answer"),
        },
        BuiltinType::EmailAddress => {
            let spoken = format!(" {} ", raw.to_lowercase())
                .replace(" at ", "@")
                .replace(" dot ", ".");
            let candidate: String = spoken.chars().filter(|c| !c.is_whitespace()).collect();
            if EMAIL_RE.is_match(&candidate) {
                Ok(SlotValue::new(raw, candidate))
            } else {
                reject("not an email address")
            }
        }
        BuiltinType::Other => {
            tracing::warn!(slot_type = %type_name, "Unsupported built-in slot type, accepting value as typed");
            Ok(SlotValue::literal(raw))
        }
    }
}

const UNITS: &[&str] = &[
    "zero", "one", "two", "three", "four", "five", "six", "seven", "eight", "nine", "ten",
    "eleven", "twelve", "thirteen", "fourteen", "fifteen", "sixteen", "seventeen", "eighteen",
    "nineteen",
];
const TENS: &[&str] = &[
    "twenty", "thirty", "forty", "fifty", "sixty", "seventy", "eighty", "ninety",
];

/// Digits (with optional thousands separators) or number words below 100
fn parse_number(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| *c != ',').collect();
    if digits.parse::<f64>().is_ok_and(f64::is_finite) {
        return Some(digits);
    }

    let words = text::tokens(raw);
    let position = |list: &[&str], word: &str| list.iter().position(|w| *w == word);
    let value = match words.as_slice() {
        [one] => position(UNITS, one).or_else(|| position(TENS, one).map(|t| (t + 2) * 10))?,
        [tens, unit] => {
            let t = position(TENS, tens)?;
            let u = position(UNITS, unit).filter(|u| (1..10).contains(u))?;
            (t + 2) * 10 + u
        }
        _ => return None,
    };
    Some(value.to_string())
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    let today = Local::now().date_naive();
    match text::normalize(raw).as_str() {
        "today" => return Some(today),
        "tomorrow" => return Some(today + Duration::days(1)),
        "yesterday" => return Some(today - Duration::days(1)),
        _ => {}
    }
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(raw.trim(), format).ok())
}
