//! Scripted conversation runner
//!
//! A scenario is an ordered list of utterances, each with the response it
//! must produce. The first mismatch stops the run and is reported with its
//! turn index and field.

use serde::Deserialize;
use similar::TextDiff;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

use crate::engine::DialogEngine;
use crate::protocol::DialogResponse;
use crate::session::SessionError;

/// Shown in failure reports for a value the response does not carry
const UNSET: &str = "<unset>";

// ============================================================================
// Scenario format
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    pub name: String,
    /// Session attributes in place before the first turn
    #[serde(default)]
    pub initial_attributes: BTreeMap<String, String>,
    pub turns: Vec<ScenarioTurn>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioTurn {
    pub utterance: String,
    #[serde(default)]
    pub request_attributes: BTreeMap<String, String>,
    pub expect: Expectation,
}

/// What a turn's response must look like. Absent fields are not checked.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Expectation {
    /// Dialog action tag, e.g. `ElicitSlot`
    pub action: String,
    pub slot: Option<String>,
    pub intent: Option<String>,
    /// Interpreted slot values
    #[serde(default)]
    pub slots: BTreeMap<String, String>,
    /// Each entry must appear inside some response message
    #[serde(default)]
    pub messages: Vec<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl Scenario {
    /// Load a `.json` file, or YAML for any other extension
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ScenarioError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ScenarioError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let parsed = if path.extension().is_some_and(|e| e == "json") {
            serde_json::from_str(&raw).map_err(|e| e.to_string())
        } else {
            serde_yaml::from_str(&raw).map_err(|e| e.to_string())
        };
        parsed.map_err(|reason| ScenarioError::Parse {
            path: path.to_path_buf(),
            reason,
        })
    }

    pub fn from_yaml(raw: &str) -> Result<Self, ScenarioError> {
        serde_yaml::from_str(raw).map_err(|e| ScenarioError::Parse {
            path: PathBuf::from("<inline>"),
            reason: e.to_string(),
        })
    }
}

// ============================================================================
// Errors
// ============================================================================

/// First mismatch between a scenario and the engine's responses
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error(
    "scenario {scenario:?} turn {turn_index}: {field} mismatch\n{}",
    render_diff(.expected, .actual)
)]
pub struct ScenarioFailure {
    pub scenario: String,
    /// Zero-based index into the scenario's turns
    pub turn_index: usize,
    pub field: String,
    pub expected: String,
    pub actual: String,
}

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Failed(#[from] ScenarioFailure),
}

fn render_diff(expected: &str, actual: &str) -> String {
    let diff = TextDiff::from_lines(expected, actual);
    diff.unified_diff()
        .context_radius(2)
        .header("expected", "actual")
        .to_string()
}

// ============================================================================
// Runner
// ============================================================================

/// Outcome of a passing scenario
#[derive(Debug, Clone)]
pub struct ScenarioReport {
    pub name: String,
    pub responses: Vec<DialogResponse>,
}

pub struct TestDriver<'a> {
    engine: &'a DialogEngine,
}

impl<'a> TestDriver<'a> {
    pub fn new(engine: &'a DialogEngine) -> Self {
        Self { engine }
    }

    /// Run every turn of `scenario` in a fresh session.
    ///
    /// The session is cleared afterwards whether the scenario passed or not.
    pub async fn run(&self, scenario: &Scenario) -> Result<ScenarioReport, ScenarioError> {
        let session_id = format!("scenario-{}", Uuid::new_v4());
        tracing::info!(scenario = %scenario.name, session_id = %session_id, "Running scenario");

        let result = self.run_turns(scenario, &session_id).await;
        self.engine.sessions().clear(&session_id);

        match &result {
            Ok(report) => tracing::info!(
                scenario = %scenario.name,
                turns = report.responses.len(),
                "Scenario passed"
            ),
            Err(e) => tracing::error!(scenario = %scenario.name, error = %e, "Scenario failed"),
        }
        result
    }

    async fn run_turns(
        &self,
        scenario: &Scenario,
        session_id: &str,
    ) -> Result<ScenarioReport, ScenarioError> {
        if !scenario.initial_attributes.is_empty() {
            self.engine
                .sessions()
                .put_attributes(session_id, &scenario.initial_attributes);
        }

        let mut responses = Vec::with_capacity(scenario.turns.len());
        for (index, turn) in scenario.turns.iter().enumerate() {
            let response = self
                .engine
                .process_turn(session_id, &turn.utterance, &turn.request_attributes)
                .await?;
            check(&turn.expect, &response).map_err(|(field, expected, actual)| {
                ScenarioFailure {
                    scenario: scenario.name.clone(),
                    turn_index: index,
                    field,
                    expected,
                    actual,
                }
            })?;
            responses.push(response);
        }

        Ok(ScenarioReport {
            name: scenario.name.clone(),
            responses,
        })
    }
}

/// Compare one response against its expectation: `(field, expected, actual)` on mismatch
fn check(expect: &Expectation, response: &DialogResponse) -> Result<(), (String, String, String)> {
    let mismatch = |field: &str, expected: &str, actual: &str| {
        Err((field.to_string(), expected.to_string(), actual.to_string()))
    };

    let action = response.dialog_action.tag();
    if expect.action != action {
        return mismatch("action", &expect.action, action);
    }

    if let Some(slot) = &expect.slot {
        let actual = response.dialog_action.slot_to_elicit().unwrap_or(UNSET);
        if slot != actual {
            return mismatch("slot", slot, actual);
        }
    }

    if let Some(intent) = &expect.intent {
        let actual = response.intent_name().unwrap_or(UNSET);
        if intent != actual {
            return mismatch("intent", intent, actual);
        }
    }

    for (name, expected) in &expect.slots {
        let actual = response
            .intent
            .as_ref()
            .and_then(|i| i.slot_value(name))
            .unwrap_or(UNSET);
        if expected != actual {
            return mismatch(&format!("slots.{name}"), expected, actual);
        }
    }

    let texts = response.message_texts();
    for expected in &expect.messages {
        if !texts.iter().any(|t| t.contains(expected.as_str())) {
            return mismatch("messages", expected, &texts.join("\n"));
        }
    }

    for (key, expected) in &expect.attributes {
        let actual = response
            .session_attributes
            .get(key)
            .map_or(UNSET, String::as_str);
        if expected != actual {
            return mismatch(&format!("attributes.{key}"), expected, actual);
        }
    }

    Ok(())
}
