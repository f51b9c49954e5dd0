//! Subprocess hook: request JSON on stdin, response JSON on stdout

use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{FulfillmentError, FulfillmentHook, HookRequest, HookResponse};

/// Longest stderr excerpt carried in an error message
const MAX_STDERR_CHARS: usize = 2000;

/// Runs a handler program once per invocation
#[derive(Debug, Clone)]
pub struct CommandHook {
    program: String,
    args: Vec<String>,
}

impl CommandHook {
    pub fn new(program: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Build from a command line such as `["python", "handler.py"]`
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self::new(program.clone(), args.iter().cloned()))
    }
}

#[async_trait]
impl FulfillmentHook for CommandHook {
    async fn handle(&self, request: &HookRequest) -> Result<HookResponse, FulfillmentError> {
        let payload = serde_json::to_vec(request)
            .map_err(|e| FulfillmentError::transport(format!("Failed to encode request: {e}")))?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                FulfillmentError::transport(format!("Failed to spawn {}: {e}", self.program))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&payload)
                .await
                .map_err(|e| FulfillmentError::transport(format!("Failed to write request: {e}")))?;
            // Closing stdin signals end of request
            drop(stdin);
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| FulfillmentError::transport(format!("Failed to wait for handler: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let excerpt: String = stderr.trim().chars().take(MAX_STDERR_CHARS).collect();
            return Err(FulfillmentError::handler(format!(
                "Handler exited with {}: {excerpt}",
                output.status
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        serde_json::from_str(stdout.trim()).map_err(|e| {
            FulfillmentError::invalid_response(format!(
                "Failed to parse handler output: {e} - output: {}",
                stdout.trim()
            ))
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::fulfillment::{BotDescriptor, FulfillmentErrorKind};
    use crate::protocol::{DialogAction, IntentSnapshot, InvocationSource};
    use std::collections::BTreeMap;

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

    fn sh(script: &str) -> CommandHook {
        CommandHook::new("sh", ["-c", script])
    }

    #[tokio::test]
    async fn test_reads_response_from_stdout() {
        let hook = sh(
            r#"cat > /dev/null; echo '{"sessionState":{"dialogAction":{"type":"Close"}},"messages":[{"contentType":"PlainText","content":"Bye"}]}'"#,
        );
        let response = hook.handle(&request()).await.unwrap();
        assert_eq!(response.directive(), &DialogAction::Close);
        assert_eq!(response.messages.len(), 1);
    }

    #[tokio::test]
    async fn test_request_arrives_on_stdin() {
        // Echo the intent name back through a message
        let hook = sh(
            r#"name=$(sed -n 's/.*"resolvedContext":{"intent":"\([A-Za-z]*\)".*/\1/p'); printf '{"sessionState":{"dialogAction":{"type":"Close"}},"messages":[{"contentType":"PlainText","content":"%s"}]}' "$name""#,
        );
        let response = hook.handle(&request()).await.unwrap();
        assert_eq!(response.messages[0].text(), Some("Goodbye"));
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_handler_error() {
        let hook = sh("cat > /dev/null; echo 'boom' >&2; exit 3");
        let err = hook.handle(&request()).await.unwrap_err();
        assert_eq!(err.kind, FulfillmentErrorKind::Handler);
        assert!(err.message.contains("boom"));
    }

    #[tokio::test]
    async fn test_garbage_output_is_invalid_response() {
        let hook = sh("cat > /dev/null; echo 'not json'");
        let err = hook.handle(&request()).await.unwrap_err();
        assert_eq!(err.kind, FulfillmentErrorKind::InvalidResponse);
    }

    #[tokio::test]
    async fn test_missing_program_is_transport_error() {
        let hook = CommandHook::new("/nonexistent/handler", Vec::<String>::new());
        let err = hook.handle(&request()).await.unwrap_err();
        assert_eq!(err.kind, FulfillmentErrorKind::Transport);
    }

    #[test]
    fn test_from_argv() {
        assert!(CommandHook::from_argv(&[]).is_none());
        let hook = CommandHook::from_argv(&["python".into(), "handler.py".into()]).unwrap();
        assert_eq!(hook.program, "python");
        assert_eq!(hook.args, vec!["handler.py".to_string()]);
    }
}
