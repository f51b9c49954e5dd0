//! Fulfillment error types

use thiserror::Error;

/// Hook failure with classification
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct FulfillmentError {
    pub kind: FulfillmentErrorKind,
    pub message: String,
}

impl FulfillmentError {
    pub fn new(kind: FulfillmentErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FulfillmentErrorKind::Timeout, message)
    }

    pub fn handler(message: impl Into<String>) -> Self {
        Self::new(FulfillmentErrorKind::Handler, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(FulfillmentErrorKind::Transport, message)
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(FulfillmentErrorKind::InvalidResponse, message)
    }
}

/// Where a hook call went wrong
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FulfillmentErrorKind {
    /// Deadline exceeded
    Timeout,
    /// The handler ran and reported an error (non-zero exit, HTTP 5xx, raised error)
    Handler,
    /// The handler could not be reached
    Transport,
    /// The handler answered with something that is not a hook response
    InvalidResponse,
}

impl FulfillmentErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Handler => "handler",
            Self::Transport => "transport",
            Self::InvalidResponse => "invalid_response",
        }
    }

    /// Whether the fault lies with the handler code rather than the plumbing
    pub fn is_handler_fault(self) -> bool {
        matches!(self, Self::Handler | Self::InvalidResponse)
    }
}
