//! Mock collaborators for engine tests

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use crate::bot::Intent;
use crate::fulfillment::{FulfillmentError, FulfillmentHook, HookRequest, HookResponse};
use crate::matcher::{IntentMatch, MatchError, UtteranceMatcher};
use crate::session::Session;

// ============================================================================
// Mock Hook
// ============================================================================

/// Hook that returns queued responses and records every request
pub struct MockHook {
    responses: Mutex<VecDeque<Result<HookResponse, FulfillmentError>>>,
    delay: Option<Duration>,
    /// Record of all requests made
    pub requests: Mutex<Vec<HookRequest>>,
}

#[allow(dead_code)]
impl MockHook {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Sleep before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue a successful response
    pub fn queue_response(&self, response: HookResponse) {
        self.responses.lock().unwrap().push_back(Ok(response));
    }

    /// Queue an error response
    pub fn queue_error(&self, error: FulfillmentError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    /// Get recorded requests
    pub fn recorded_requests(&self) -> Vec<HookRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl FulfillmentHook for MockHook {
    async fn handle(&self, request: &HookRequest) -> Result<HookResponse, FulfillmentError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(FulfillmentError::handler("No mock response queued")))
    }
}

// ============================================================================
// Mock Matchers
// ============================================================================

/// Matcher whose scorer always fails
pub struct FailingMatcher;

#[async_trait]
impl UtteranceMatcher for FailingMatcher {
    async fn rank(
        &self,
        _text: &str,
        _candidates: &[&Intent],
        _session: &Session,
    ) -> Result<Vec<IntentMatch>, MatchError> {
        Err(MatchError::Scorer("model unavailable".to_string()))
    }
}
