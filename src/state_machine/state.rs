//! Dialog state types

use serde::Serialize;
use std::fmt;

use crate::bot::BotDefinition;
use crate::config::EmulatorConfig;

// ============================================================================
// Dialog State
// ============================================================================

/// Where a session is in its dialog cycle
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Default)]
#[serde(tag = "type")]
pub enum DialogState {
    /// No active intent
    #[default]
    Idle,

    /// Waiting for the user to say what they want
    ElicitingIntent,

    /// Waiting for a value for `slot`
    ElicitingSlot { slot: String },

    /// Waiting for a yes/no on the filled intent
    ConfirmingIntent,

    /// Fulfillment hook in flight (or return-intent hand-off)
    Fulfilling,

    /// Cycle finished; reset to `Idle` before the next turn
    Closed,
}

impl DialogState {
    pub fn eliciting(slot: impl Into<String>) -> Self {
        DialogState::ElicitingSlot { slot: slot.into() }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DialogState::Idle => "Idle",
            DialogState::ElicitingIntent => "ElicitingIntent",
            DialogState::ElicitingSlot { .. } => "ElicitingSlot",
            DialogState::ConfirmingIntent => "ConfirmingIntent",
            DialogState::Fulfilling => "Fulfilling",
            DialogState::Closed => "Closed",
        }
    }

    pub fn slot(&self) -> Option<&str> {
        match self {
            DialogState::ElicitingSlot { slot } => Some(slot),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DialogState::Closed)
    }

    /// States in which the next user utterance is interpreted
    pub fn awaits_input(&self) -> bool {
        !matches!(self, DialogState::Fulfilling | DialogState::Closed)
    }

    /// Whether `next` is an edge of the dialog graph
    pub fn can_transition_to(&self, next: &DialogState) -> bool {
        use DialogState::{
            Closed, ConfirmingIntent, ElicitingIntent, ElicitingSlot, Fulfilling, Idle,
        };
        match self {
            Idle | ElicitingIntent => matches!(
                next,
                ElicitingIntent | ElicitingSlot { .. } | ConfirmingIntent | Fulfilling
            ),
            ElicitingSlot { .. } | Fulfilling => matches!(
                next,
                ElicitingSlot { .. } | ElicitingIntent | ConfirmingIntent | Fulfilling | Closed
            ),
            ConfirmingIntent => true,
            Closed => matches!(next, Idle),
        }
    }
}

impl fmt::Display for DialogState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DialogState::ElicitingSlot { slot } => write!(f, "ElicitingSlot({slot})"),
            other => f.write_str(other.name()),
        }
    }
}

// ============================================================================
// Dialog Context
// ============================================================================

/// Read-only inputs to a transition
#[derive(Debug, Clone, Copy)]
pub struct DialogContext<'a> {
    pub bot: &'a BotDefinition,
    pub config: &'a EmulatorConfig,
}

impl<'a> DialogContext<'a> {
    pub fn new(bot: &'a BotDefinition, config: &'a EmulatorConfig) -> Self {
        Self { bot, config }
    }
}
