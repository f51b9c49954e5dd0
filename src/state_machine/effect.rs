//! Effects produced by state transitions

use crate::protocol::{DialogAction, IntentSnapshot, Message};

/// Effects to be executed after a state transition
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Finish the turn with this response
    Respond {
        action: DialogAction,
        messages: Vec<Message>,
        intent: Option<IntentSnapshot>,
    },

    /// Ask the dialog code hook about the proposed next step
    InvokeDialogHook { proposed: DialogAction },

    /// Call the fulfillment code hook
    InvokeFulfillment,

    /// Messages that lead the eventual response (follow-up chains)
    QueueMessages(Vec<Message>),
}

impl Effect {
    pub fn respond(
        action: DialogAction,
        messages: Vec<Message>,
        intent: Option<IntentSnapshot>,
    ) -> Self {
        Effect::Respond {
            action,
            messages,
            intent,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Effect::Respond { .. })
    }
}
