//! Per-session dialog state
//!
//! Sessions live only in memory. A turn takes a [`TurnLease`] so two turns
//! for the same session id can never interleave.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

use crate::protocol::{ConfirmationState, SlotValue};
use crate::state_machine::DialogState;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("a turn is already in progress for session {0}")]
    TurnInProgress(String),

    #[error("session {0} was saved before it was initialised with get")]
    NotInitialized(String),
}

/// One entry of the interpretation history
#[derive(Debug, Clone, PartialEq)]
pub struct Interpretation {
    pub at: DateTime<Utc>,
    pub utterance: String,
    pub intent: Option<String>,
    pub confidence: f64,
    /// State the turn ended in
    pub state: DialogState,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: String,
    pub intent: Option<String>,
    pub slots: BTreeMap<String, SlotValue>,
    pub state: DialogState,
    pub attributes: BTreeMap<String, String>,
    /// Consecutive failed attempts at the current elicitation or confirmation
    pub attempts: u32,
    /// Follow-up intents chained since the last user-initiated intent
    pub follow_up_depth: u32,
    pub confirmation: ConfirmationState,
    pub history: VecDeque<Interpretation>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            intent: None,
            slots: BTreeMap::new(),
            state: DialogState::Idle,
            attributes: BTreeMap::new(),
            attempts: 0,
            follow_up_depth: 0,
            confirmation: ConfirmationState::None,
            history: VecDeque::new(),
        }
    }

    /// Drop the active intent and everything collected for it
    pub fn clear_intent(&mut self) {
        self.intent = None;
        self.slots.clear();
        self.attempts = 0;
        self.confirmation = ConfirmationState::None;
    }

    /// Append to the history, keeping at most `limit` entries
    pub fn record(&mut self, entry: Interpretation, limit: usize) {
        self.history.push_back(entry);
        while self.history.len() > limit {
            self.history.pop_front();
        }
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    sessions: HashMap<String, Session>,
    in_flight: HashSet<String>,
}

/// In-memory session store
#[derive(Debug)]
pub struct SessionStore {
    inner: Mutex<StoreInner>,
    history_limit: usize,
}

impl SessionStore {
    pub fn new(history_limit: usize) -> Self {
        Self {
            inner: Mutex::new(StoreInner::default()),
            history_limit,
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get the session, creating an empty one on first access
    pub fn get(&self, id: &str) -> Session {
        self.lock()
            .sessions
            .entry(id.to_string())
            .or_insert_with(|| Session::new(id))
            .clone()
    }

    /// Replace the stored session
    pub fn save(&self, id: &str, mut session: Session) -> Result<(), SessionError> {
        let mut inner = self.lock();
        let slot = inner
            .sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::NotInitialized(id.to_string()))?;
        while session.history.len() > self.history_limit {
            session.history.pop_front();
        }
        *slot = session;
        Ok(())
    }

    /// Remove all state for the session
    pub fn clear(&self, id: &str) {
        self.lock().sessions.remove(id);
        tracing::debug!(session_id = %id, "Cleared session");
    }

    /// Merge caller-supplied attributes into the session
    pub fn put_attributes(&self, id: &str, attributes: &BTreeMap<String, String>) {
        let mut inner = self.lock();
        let session = inner
            .sessions
            .entry(id.to_string())
            .or_insert_with(|| Session::new(id));
        session
            .attributes
            .extend(attributes.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    /// Start a turn; fails if another turn for `id` has not finished
    pub fn begin_turn(&self, id: &str) -> Result<TurnLease<'_>, SessionError> {
        if !self.lock().in_flight.insert(id.to_string()) {
            return Err(SessionError::TurnInProgress(id.to_string()));
        }
        Ok(TurnLease {
            store: self,
            id: id.to_string(),
        })
    }

    pub fn history_limit(&self) -> usize {
        self.history_limit
    }
}

/// Exclusive right to run one turn for a session, released on drop
#[derive(Debug)]
pub struct TurnLease<'a> {
    store: &'a SessionStore,
    id: String,
}

impl TurnLease<'_> {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for TurnLease<'_> {
    fn drop(&mut self) {
        self.store.lock().in_flight.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_creates_and_is_stable() {
        let store = SessionStore::new(20);
        let first = store.get("s1");
        assert_eq!(first.state, DialogState::Idle);
        assert!(first.intent.is_none());
        assert_eq!(store.get("s1"), first);
    }

    #[test]
    fn test_save_requires_get() {
        let store = SessionStore::new(20);
        let err = store.save("ghost", Session::new("ghost")).unwrap_err();
        assert_eq!(err, SessionError::NotInitialized("ghost".into()));

        let mut session = store.get("s1");
        session.intent = Some("BookFlight".into());
        store.save("s1", session.clone()).unwrap();
        assert_eq!(store.get("s1"), session);
    }

    #[test]
    fn test_clear_resets() {
        let store = SessionStore::new(20);
        let mut session = store.get("s1");
        session.attributes.insert("k".into(), "v".into());
        store.save("s1", session).unwrap();
        store.clear("s1");
        assert!(store.get("s1").attributes.is_empty());
        // Cleared sessions must be re-initialised before save
        store.clear("s1");
        assert!(store.save("s1", Session::new("s1")).is_err());
    }

    #[test]
    fn test_turn_lease_is_exclusive() {
        let store = SessionStore::new(20);
        let lease = store.begin_turn("s1").unwrap();
        assert_eq!(lease.id(), "s1");
        assert_eq!(
            store.begin_turn("s1").unwrap_err(),
            SessionError::TurnInProgress("s1".into())
        );
        // Other sessions are independent
        let other = store.begin_turn("s2").unwrap();
        drop(other);
        drop(lease);
        assert!(store.begin_turn("s1").is_ok());
    }

    #[test]
    fn test_history_is_bounded() {
        let store = SessionStore::new(3);
        let mut session = store.get("s1");
        for i in 0..5 {
            session.record(
                Interpretation {
                    at: Utc::now(),
                    utterance: format!("utterance {i}"),
                    intent: None,
                    confidence: 0.0,
                    state: DialogState::Idle,
                },
                10,
            );
        }
        store.save("s1", session).unwrap();
        let history = store.get("s1").history;
        assert_eq!(history.len(), 3);
        assert_eq!(history.front().unwrap().utterance, "utterance 2");
    }

    #[test]
    fn test_put_attributes_merges() {
        let store = SessionStore::new(20);
        let mut attrs = BTreeMap::new();
        attrs.insert("callback_event".to_string(), "BookFlight".to_string());
        store.put_attributes("s1", &attrs);
        attrs.clear();
        attrs.insert("locale".to_string(), "en_US".to_string());
        store.put_attributes("s1", &attrs);

        let session = store.get("s1");
        assert_eq!(session.attributes.len(), 2);
        assert_eq!(session.attributes["callback_event"], "BookFlight");
    }

    #[test]
    fn test_store_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SessionStore>();
    }
}
