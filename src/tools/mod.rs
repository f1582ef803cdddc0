//! External tool server connection with bounded retry.
//!
//! [`ToolConnectionManager::connect`] runs an explicit attempt loop: attempt 1
//! is immediate, attempt *k* waits `base_delay * (k - 1)`. Exhaustion is a
//! [`ConnectError`] value so the caller can carry on without tools. Retries
//! are driven by the attempt count only; the server's diagnostic output is
//! collected for the caller and never inspected.

pub mod params;
pub mod stdio;

pub use params::normalize_arguments;
pub use stdio::StdioToolConnector;

use crate::config::ToolsConfig;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// A tool advertised by the tool server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Tool name used in calls.
    pub name: String,
    /// Human-readable description, forwarded to the assistant.
    #[serde(default)]
    pub description: String,
    /// JSON schema of the arguments object.
    #[serde(rename = "inputSchema", default)]
    pub input_schema: serde_json::Value,
}

impl ToolDescriptor {
    /// Whether the schema declares a top-level property called `key`.
    pub fn has_property(&self, key: &str) -> bool {
        self.input_schema
            .get("properties")
            .and_then(|p| p.get(key))
            .is_some()
    }
}

/// An established tool session.
#[async_trait]
pub trait ToolConnection: Send + Sync {
    /// List the tools the server offers.
    ///
    /// # Errors
    ///
    /// Returns [`crate::HarkError::Tool`] when the server rejects or drops the request.
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>>;

    /// Invoke `name` with `arguments`, returning its text output.
    ///
    /// # Errors
    ///
    /// Returns [`crate::HarkError::Tool`] when the call fails or the tool reports an error.
    async fn call_tool(&self, name: &str, arguments: serde_json::Value) -> Result<String>;
}

/// Failure of a single connection attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct AttemptError {
    /// What went wrong.
    pub message: String,
    /// Diagnostic output captured from the tool server, if any.
    pub diagnostics: Option<String>,
}

impl AttemptError {
    /// An attempt error without diagnostics.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            diagnostics: None,
        }
    }
}

/// Opens one connection to the tool server.
#[async_trait]
pub trait ToolConnector: Send + Sync {
    /// Make a single connection attempt.
    async fn connect(&self) -> std::result::Result<Arc<dyn ToolConnection>, AttemptError>;

    /// Diagnostic output of the most recent attempt, for failures noticed
    /// outside [`ToolConnector::connect`]: a timed-out attempt or a failed
    /// tool listing. Drains what it returns.
    async fn take_diagnostics(&self) -> Option<String> {
        None
    }
}

/// A connected tool session and its tools.
#[derive(Clone)]
pub struct ConnectedTools {
    /// The live session.
    pub connection: Arc<dyn ToolConnection>,
    /// Tools discovered right after connecting.
    pub tools: Vec<ToolDescriptor>,
    /// Attempts it took, the successful one included.
    pub attempts: u32,
}

impl std::fmt::Debug for ConnectedTools {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectedTools")
            .field("tools", &self.tools)
            .field("attempts", &self.attempts)
            .finish_non_exhaustive()
    }
}

/// Connection retries were exhausted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("tool connection failed after {attempts} attempt(s): {last_error}")]
pub struct ConnectError {
    /// Attempts actually made.
    pub attempts: u32,
    /// Message of the last failure.
    pub last_error: String,
    /// Diagnostic output from every failed attempt, oldest first.
    pub diagnostics: Vec<String>,
    /// Whether the backoff ceiling stopped the loop before `max_attempts`.
    pub ceiling_hit: bool,
}

/// Delay before `attempt` (1-based): zero for the first, then `base * (attempt - 1)`.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(attempt.saturating_sub(1))
}

/// Connects to the tool server with linear backoff under a hard ceiling.
pub struct ToolConnectionManager {
    connector: Arc<dyn ToolConnector>,
    ceiling: Duration,
    attempt_timeout: Duration,
    cancel: CancellationToken,
}

impl ToolConnectionManager {
    /// Create a manager with the ceiling and per-attempt timeout from `config`.
    pub fn new(connector: Arc<dyn ToolConnector>, config: &ToolsConfig) -> Self {
        Self {
            connector,
            ceiling: Duration::from_millis(config.ceiling_ms),
            attempt_timeout: Duration::from_millis(config.attempt_timeout_ms),
            cancel: CancellationToken::new(),
        }
    }

    /// Stop waiting between attempts once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Connect and list tools, making at most `max_attempts` attempts.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError`] when every attempt failed, the cumulative
    /// backoff would pass the ceiling, or the manager was cancelled.
    pub async fn connect(
        &self,
        max_attempts: u32,
        base_delay: Duration,
    ) -> std::result::Result<ConnectedTools, ConnectError> {
        let mut waited = Duration::ZERO;
        let mut diagnostics = Vec::new();
        let mut last_error = String::from("no connection attempt made");

        for attempt in 1..=max_attempts {
            let delay = backoff_delay(base_delay, attempt);
            if !delay.is_zero() {
                if waited + delay > self.ceiling {
                    warn!(
                        "tool connection: next wait of {}ms would pass the {}ms ceiling, giving up",
                        delay.as_millis(),
                        self.ceiling.as_millis()
                    );
                    return Err(ConnectError {
                        attempts: attempt - 1,
                        last_error,
                        diagnostics,
                        ceiling_hit: true,
                    });
                }
                tokio::select! {
                    () = self.cancel.cancelled() => {
                        return Err(ConnectError {
                            attempts: attempt - 1,
                            last_error: "connection cancelled".into(),
                            diagnostics,
                            ceiling_hit: false,
                        });
                    }
                    () = tokio::time::sleep(delay) => {}
                }
                waited += delay;
            }

            match tokio::time::timeout(self.attempt_timeout, self.attempt()).await {
                Ok(Ok((connection, tools))) => {
                    info!(
                        "tool server connected after {attempt} attempt(s), {} tool(s)",
                        tools.len()
                    );
                    return Ok(ConnectedTools {
                        connection,
                        tools,
                        attempts: attempt,
                    });
                }
                Ok(Err(e)) => {
                    warn!("tool connection attempt {attempt}/{max_attempts} failed: {e}");
                    match e.diagnostics {
                        Some(text) => diagnostics.push(text),
                        None => diagnostics.extend(self.connector.take_diagnostics().await),
                    }
                    last_error = e.message;
                }
                Err(_) => {
                    warn!("tool connection attempt {attempt}/{max_attempts} timed out");
                    diagnostics.extend(self.connector.take_diagnostics().await);
                    last_error = format!(
                        "attempt timed out after {}ms",
                        self.attempt_timeout.as_millis()
                    );
                }
            }
        }

        Err(ConnectError {
            attempts: max_attempts,
            last_error,
            diagnostics,
            ceiling_hit: false,
        })
    }

    async fn attempt(
        &self,
    ) -> std::result::Result<(Arc<dyn ToolConnection>, Vec<ToolDescriptor>), AttemptError> {
        let connection = self.connector.connect().await?;
        let tools = connection
            .list_tools()
            .await
            .map_err(|e| AttemptError::new(format!("tools/list failed: {e}")))?;
        Ok((connection, tools))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct NoTools;

    #[async_trait]
    impl ToolConnection for NoTools {
        async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
            Ok(Vec::new())
        }

        async fn call_tool(&self, name: &str, _arguments: serde_json::Value) -> Result<String> {
            Err(crate::error::HarkError::Tool(format!("unknown tool {name}")))
        }
    }

    struct Hangs(AtomicU32);

    #[async_trait]
    impl ToolConnector for Hangs {
        async fn connect(&self) -> std::result::Result<Arc<dyn ToolConnection>, AttemptError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            std::future::pending().await
        }
    }

    struct Noisy;

    #[async_trait]
    impl ToolConnector for Noisy {
        async fn connect(&self) -> std::result::Result<Arc<dyn ToolConnection>, AttemptError> {
            // Diagnostics that look retryable or fatal must not change the loop.
            Err(AttemptError {
                message: "exited with status 1".into(),
                diagnostics: Some("FATAL: do not retry".into()),
            })
        }
    }

    /// Connects, then fails the listing; stderr is only reachable afterwards.
    struct ListFails;

    struct BrokenListing;

    #[async_trait]
    impl ToolConnection for BrokenListing {
        async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
            Err(crate::error::HarkError::Tool("tools/list: tool server closed stdout".into()))
        }

        async fn call_tool(&self, name: &str, _arguments: serde_json::Value) -> Result<String> {
            Err(crate::error::HarkError::Tool(format!("unknown tool {name}")))
        }
    }

    #[async_trait]
    impl ToolConnector for ListFails {
        async fn connect(&self) -> std::result::Result<Arc<dyn ToolConnection>, AttemptError> {
            Ok(Arc::new(BrokenListing))
        }

        async fn take_diagnostics(&self) -> Option<String> {
            Some("Error: broker auth failed".into())
        }
    }

    /// Hangs, but has said something on stderr first.
    struct HangsAfterComplaining;

    #[async_trait]
    impl ToolConnector for HangsAfterComplaining {
        async fn connect(&self) -> std::result::Result<Arc<dyn ToolConnection>, AttemptError> {
            std::future::pending().await
        }

        async fn take_diagnostics(&self) -> Option<String> {
            Some("Error: MQTT broker unreachable".into())
        }
    }

    struct Immediate;

    #[async_trait]
    impl ToolConnector for Immediate {
        async fn connect(&self) -> std::result::Result<Arc<dyn ToolConnection>, AttemptError> {
            Ok(Arc::new(NoTools))
        }
    }

    fn config() -> ToolsConfig {
        ToolsConfig {
            ceiling_ms: 6_000,
            attempt_timeout_ms: 1_000,
            ..ToolsConfig::default()
        }
    }

    #[test]
    fn backoff_is_linear_in_attempt() {
        let base = Duration::from_millis(2_000);
        assert_eq!(backoff_delay(base, 1), Duration::ZERO);
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(2_000));
        assert_eq!(backoff_delay(base, 3), Duration::from_millis(4_000));
    }

    #[tokio::test(start_paused = true)]
    async fn first_attempt_is_immediate() {
        let mgr = ToolConnectionManager::new(Arc::new(Immediate), &config());
        let start = tokio::time::Instant::now();
        let connected = mgr.connect(3, Duration::from_millis(2_000)).await.unwrap();
        assert_eq!(connected.attempts, 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_attempts_are_bounded_by_timeout() {
        let connector = Arc::new(Hangs(AtomicU32::new(0)));
        let mgr = ToolConnectionManager::new(connector.clone(), &config());
        let err = mgr.connect(2, Duration::from_millis(500)).await.unwrap_err();
        assert_eq!(err.attempts, 2);
        assert_eq!(connector.0.load(Ordering::SeqCst), 2);
        assert!(err.last_error.contains("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn diagnostics_are_surfaced_not_acted_on() {
        let mgr = ToolConnectionManager::new(Arc::new(Noisy), &config());
        let err = mgr.connect(3, Duration::from_millis(1_000)).await.unwrap_err();
        assert_eq!(err.attempts, 3);
        assert_eq!(err.diagnostics.len(), 3);
        assert!(!err.ceiling_hit);
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_attempt_keeps_diagnostics() {
        let mgr = ToolConnectionManager::new(Arc::new(HangsAfterComplaining), &config());
        let err = mgr.connect(2, Duration::from_millis(500)).await.unwrap_err();
        assert!(err.last_error.contains("timed out"));
        assert_eq!(err.diagnostics.len(), 2);
        assert!(err.diagnostics[0].contains("MQTT broker unreachable"));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_listing_keeps_diagnostics() {
        let mgr = ToolConnectionManager::new(Arc::new(ListFails), &config());
        let err = mgr.connect(1, Duration::from_millis(500)).await.unwrap_err();
        assert!(err.last_error.starts_with("tools/list failed"));
        assert_eq!(err.diagnostics, vec!["Error: broker auth failed".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn ceiling_stops_loop_early() {
        let mgr = ToolConnectionManager::new(Arc::new(Noisy), &config());
        // Waits would be 4s then 8s: the second wait passes the 6s ceiling.
        let err = mgr.connect(5, Duration::from_millis(4_000)).await.unwrap_err();
        assert!(err.ceiling_hit);
        assert_eq!(err.attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_ends_backoff() {
        let cancel = CancellationToken::new();
        let mgr = ToolConnectionManager::new(Arc::new(Noisy), &config())
            .with_cancellation(cancel.clone());
        cancel.cancel();
        let err = mgr.connect(3, Duration::from_millis(1_000)).await.unwrap_err();
        assert_eq!(err.attempts, 1);
        assert_eq!(err.last_error, "connection cancelled");
    }

    #[test]
    fn descriptor_parses_mcp_shape() {
        let tool: ToolDescriptor = serde_json::from_value(serde_json::json!({
            "name": "mqtt_publish",
            "inputSchema": {"type": "object", "properties": {"topic": {"type": "string"}}}
        }))
        .unwrap();
        assert!(tool.has_property("topic"));
        assert!(!tool.has_property("payload"));
        assert!(tool.description.is_empty());
    }
}
