//! Bot definition store
//!
//! Loads an exported bot locale once and serves read-only lookups for the
//! rest of the emulator.

mod export;
mod loader;
pub mod model;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::EmulatorConfig;

pub use model::{
    BuiltinType, ClosingOutcome, ClosingSpec, ConfirmationSpec, DeclineBehavior, EnumValue,
    EnumeratedValues, FulfillmentMode, Intent, NextIntentRule, ResolutionStrategy, SlotSpec,
    SlotType, SlotTypeKind, SubSlot, TemplatePart, UtteranceTemplate, FALLBACK_INTENT,
};

/// Errors raised while loading or querying a bot definition
#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("malformed bot definition at {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },

    #[error("unknown intent: {0}")]
    UnknownIntent(String),

    #[error("unknown slot type: {0}")]
    UnknownSlotType(String),
}

impl DefinitionError {
    pub(crate) fn malformed(path: &Path, reason: impl Into<String>) -> Self {
        DefinitionError::Malformed {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }
}

/// A loaded bot locale
#[derive(Debug, Clone)]
pub struct BotDefinition {
    name: String,
    locale: String,
    intents: Vec<Intent>,
    intent_index: HashMap<String, usize>,
    fallback: Intent,
    slot_types: HashMap<String, SlotType>,
}

impl BotDefinition {
    /// Load a bot from an export directory.
    ///
    /// `path` may be the bot root (the configured locale is used) or a
    /// locale directory containing `Intents/`.
    pub fn load(path: impl AsRef<Path>, config: &EmulatorConfig) -> Result<Self, DefinitionError> {
        loader::load(path.as_ref(), &config.locale)
    }

    pub(crate) fn from_parts(
        name: String,
        locale: String,
        intents: Vec<Intent>,
        fallback: Intent,
        slot_types: HashMap<String, SlotType>,
    ) -> Self {
        let intent_index = intents
            .iter()
            .enumerate()
            .map(|(i, intent)| (intent.name.clone(), i))
            .collect();
        Self {
            name,
            locale,
            intents,
            intent_index,
            fallback,
            slot_types,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn locale(&self) -> &str {
        &self.locale
    }

    /// Recognizable intents in declaration order (fallback excluded)
    pub fn intents(&self) -> &[Intent] {
        &self.intents
    }

    pub fn fallback(&self) -> &Intent {
        &self.fallback
    }

    /// Look up an intent by name, including the fallback intent
    pub fn intent(&self, name: &str) -> Result<&Intent, DefinitionError> {
        if name == self.fallback.name {
            return Ok(&self.fallback);
        }
        self.intent_index
            .get(name)
            .and_then(|i| self.intents.get(*i))
            .ok_or_else(|| DefinitionError::UnknownIntent(name.to_string()))
    }

    /// Declaration position of an intent, used as the final ranking tie-break
    pub fn declaration_order(&self, name: &str) -> usize {
        self.intent_index.get(name).copied().unwrap_or(usize::MAX)
    }

    pub fn slot_type(&self, name: &str) -> Result<&SlotType, DefinitionError> {
        self.slot_types
            .get(name)
            .ok_or_else(|| DefinitionError::UnknownSlotType(name.to_string()))
    }
}
