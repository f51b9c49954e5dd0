//! Dialog state machine
//!
//! Elm-style: [`transition`] is pure and returns effects that the engine
//! executes.

mod effect;
pub mod event;
pub mod state;
pub(crate) mod transition;

#[cfg(test)]
mod proptests;

pub use effect::Effect;
pub use event::Event;
pub use state::{DialogContext, DialogState};
pub use transition::{snapshot, transition, TransitionError, TransitionResult};
