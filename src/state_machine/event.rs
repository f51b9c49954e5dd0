//! Events that drive a dialog turn

use std::collections::BTreeMap;

use crate::fulfillment::{FulfillmentError, HookResponse};
use crate::protocol::SlotValue;

/// Events that trigger state transitions
#[derive(Debug, Clone)]
pub enum Event {
    // Interpretation events
    IntentRecognized {
        intent: String,
        /// Validated slot values captured from the utterance
        slots: BTreeMap<String, SlotValue>,
        confidence: f64,
    },
    IntentNotRecognized,
    SlotsCaptured {
        slots: BTreeMap<String, SlotValue>,
    },
    SlotRejected {
        slot: String,
        reason: String,
    },

    // Confirmation events
    Affirmed,
    Denied,
    ConfirmationUnclear,

    // Hook events
    DialogHookResponded {
        response: HookResponse,
    },
    DialogHookFailed {
        error: FulfillmentError,
    },
    FulfillmentSucceeded {
        response: HookResponse,
    },
    FulfillmentFailed {
        error: FulfillmentError,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::IntentRecognized { .. } => "IntentRecognized",
            Event::IntentNotRecognized => "IntentNotRecognized",
            Event::SlotsCaptured { .. } => "SlotsCaptured",
            Event::SlotRejected { .. } => "SlotRejected",
            Event::Affirmed => "Affirmed",
            Event::Denied => "Denied",
            Event::ConfirmationUnclear => "ConfirmationUnclear",
            Event::DialogHookResponded { .. } => "DialogHookResponded",
            Event::DialogHookFailed { .. } => "DialogHookFailed",
            Event::FulfillmentSucceeded { .. } => "FulfillmentSucceeded",
            Event::FulfillmentFailed { .. } => "FulfillmentFailed",
        }
    }
}
