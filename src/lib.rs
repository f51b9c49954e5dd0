//! Lex Emulator - local stand-in for a managed conversational-bot service
//!
//! Loads an exported bot definition and answers utterances with the same
//! dialog protocol the managed service speaks: intent recognition, slot
//! elicitation, confirmation and code hook invocation.

#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::return_self_not_must_use)]

pub mod bot;
pub mod condition;
pub mod config;
pub mod driver;
pub mod engine;
pub mod fulfillment;
pub mod matcher;
pub mod protocol;
pub mod session;
pub mod slots;
pub mod state_machine;
pub mod text;

pub use bot::{BotDefinition, DefinitionError};
pub use config::EmulatorConfig;
pub use driver::{Scenario, ScenarioError, ScenarioFailure, TestDriver};
pub use engine::DialogEngine;
pub use protocol::{DialogAction, DialogResponse};
