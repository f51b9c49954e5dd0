//! Fulfillment collaborator boundary
//!
//! Every dialog and fulfillment hook call goes through [`FulfillmentInvoker`],
//! which imposes the deadline and logs the outcome. The handler itself is
//! any [`FulfillmentHook`]: an in-process closure, a subprocess, or an HTTP
//! endpoint.

mod command;
mod error;
mod http;
mod types;

pub use command::CommandHook;
pub use error::{FulfillmentError, FulfillmentErrorKind};
pub use http::HttpHook;
pub use types::{
    BotDescriptor, HookInterpretation, HookRequest, HookResponse, ProposedNextState,
    RequestSessionState, ResponseIntent, ResponseSessionState, MESSAGE_VERSION,
};

use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A dialog/fulfillment handler
#[async_trait]
pub trait FulfillmentHook: Send + Sync {
    async fn handle(&self, request: &HookRequest) -> Result<HookResponse, FulfillmentError>;
}

#[async_trait]
impl<T: FulfillmentHook + ?Sized> FulfillmentHook for Arc<T> {
    async fn handle(&self, request: &HookRequest) -> Result<HookResponse, FulfillmentError> {
        (**self).handle(request).await
    }
}

/// In-process hook backed by a closure
pub struct FnHook<F> {
    handler: F,
}

impl<F> FnHook<F>
where
    F: Fn(&HookRequest) -> Result<HookResponse, FulfillmentError> + Send + Sync,
{
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl<F> FulfillmentHook for FnHook<F>
where
    F: Fn(&HookRequest) -> Result<HookResponse, FulfillmentError> + Send + Sync,
{
    async fn handle(&self, request: &HookRequest) -> Result<HookResponse, FulfillmentError> {
        (self.handler)(request)
    }
}

/// Deadline and logging wrapper around a hook
#[derive(Clone)]
pub struct FulfillmentInvoker {
    hook: Arc<dyn FulfillmentHook>,
    timeout: Duration,
}

impl FulfillmentInvoker {
    pub fn new(hook: Arc<dyn FulfillmentHook>, timeout: Duration) -> Self {
        Self { hook, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Call the hook once. No retries. A panicking handler is a handler error.
    pub async fn invoke(&self, request: &HookRequest) -> Result<HookResponse, FulfillmentError> {
        let start = Instant::now();
        let call = AssertUnwindSafe(self.hook.handle(request)).catch_unwind();
        let result = match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(FulfillmentError::handler(format!(
                "Hook panicked: {}",
                panic_message(panic.as_ref())
            ))),
            Err(_) => Err(FulfillmentError::timeout(format!(
                "Hook did not answer within {}ms",
                self.timeout.as_millis()
            ))),
        };
        let duration = start.elapsed();

        match &result {
            Ok(response) => {
                tracing::info!(
                    session_id = %request.session_id,
                    intent = %request.intent_name(),
                    source = ?request.invocation_source,
                    duration_ms = %duration.as_millis(),
                    directive = %response.directive(),
                    "Hook invocation completed"
                );
            }
            Err(e) => {
                let payload = serde_json::to_string(request).unwrap_or_default();
                tracing::error!(
                    session_id = %request.session_id,
                    intent = %request.intent_name(),
                    source = ?request.invocation_source,
                    duration_ms = %duration.as_millis(),
                    kind = e.kind.as_str(),
                    error = %e.message,
                    request = %payload,
                    "Hook invocation failed"
                );
            }
        }

        result
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

impl std::fmt::Debug for FulfillmentInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FulfillmentInvoker")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{DialogAction, IntentSnapshot, InvocationSource};
    use std::collections::BTreeMap;

    struct SlowHook(Duration);

    #[async_trait]
    impl FulfillmentHook for SlowHook {
        async fn handle(&self, _request: &HookRequest) -> Result<HookResponse, FulfillmentError> {
            tokio::time::sleep(self.0).await;
            Ok(HookResponse::close())
        }
    }

    fn request() -> HookRequest {
        HookRequest::new(
            InvocationSource::FulfillmentCodeHook,
            "s1",
            "goodbye",
            BotDescriptor::new("AirlineBot", "en_US"),
            IntentSnapshot {
                name: "Goodbye".into(),
                slots: BTreeMap::new(),
                state: Default::default(),
                confirmation_state: Default::default(),
            },
            BTreeMap::new(),
        )
    }

    #[tokio::test]
    async fn test_fn_hook_sees_request() {
        let hook = FnHook::new(|request: &HookRequest| {
            Ok(HookResponse::close().with_message(format!("Bye from {}", request.intent_name())))
        });
        let invoker = FulfillmentInvoker::new(Arc::new(hook), Duration::from_secs(1));
        let response = invoker.invoke(&request()).await.unwrap();
        assert_eq!(response.directive(), &DialogAction::Close);
        assert_eq!(response.messages[0].text(), Some("Bye from Goodbye"));
    }

    #[tokio::test]
    async fn test_errors_pass_through() {
        let hook = FnHook::new(|_: &HookRequest| Err(FulfillmentError::handler("KeyError")));
        let invoker = FulfillmentInvoker::new(Arc::new(hook), Duration::from_secs(1));
        let err = invoker.invoke(&request()).await.unwrap_err();
        assert_eq!(err.kind, FulfillmentErrorKind::Handler);
        assert_eq!(err.message, "KeyError");
    }

    #[tokio::test]
    async fn test_panicking_handler_becomes_handler_error() {
        let hook = FnHook::new(|_: &HookRequest| -> Result<HookResponse, FulfillmentError> {
            panic!("handler bug")
        });
        let invoker = FulfillmentInvoker::new(Arc::new(hook), Duration::from_secs(1));
        let err = invoker.invoke(&request()).await.unwrap_err();
        assert_eq!(err.kind, FulfillmentErrorKind::Handler);
        assert!(err.message.contains("handler bug"), "{}", err.message);
    }

    #[tokio::test]
    async fn test_timeout_is_enforced() {
        let invoker = FulfillmentInvoker::new(
            Arc::new(SlowHook(Duration::from_secs(10))),
            Duration::from_millis(50),
        );
        let err = invoker.invoke(&request()).await.unwrap_err();
        assert_eq!(err.kind, FulfillmentErrorKind::Timeout);
        assert!(err.message.contains("50ms"));
    }

    #[tokio::test]
    async fn test_fast_hook_within_deadline() {
        let invoker = FulfillmentInvoker::new(
            Arc::new(SlowHook(Duration::from_millis(5))),
            Duration::from_secs(5),
        );
        assert!(invoker.invoke(&request()).await.is_ok());
        assert_eq!(invoker.timeout(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_arc_hook_delegates() {
        let hook: Arc<dyn FulfillmentHook> =
            Arc::new(FnHook::new(|_: &HookRequest| Ok(HookResponse::delegate())));
        let shared = Arc::new(hook);
        let response = shared.handle(&request()).await.unwrap();
        assert_eq!(response.directive(), &DialogAction::Delegate);
    }
}
