//! Tool executor: dispatches tool calls to the built-in handlers

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};

use super::handlers::{self, HandlerContext};
use crate::broker::SatelliteAction;
use crate::home::DeviceGateway;
use crate::semantic::SemanticRouter;

/// Default upper bound for a single tool call
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of running one tool
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutcome {
    /// Spoken reply, may be empty
    pub reply: String,
    /// Whether the tool did what was asked
    pub success: bool,
    /// Satellite side effects
    pub actions: Vec<SatelliteAction>,
}

impl ToolOutcome {
    /// Successful outcome
    #[must_use]
    pub fn ok(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            success: true,
            actions: Vec::new(),
        }
    }

    /// Failed outcome with an apology
    #[must_use]
    pub fn failed(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            success: false,
            actions: Vec::new(),
        }
    }

    /// Successful when `success`, else the failure reply
    #[must_use]
    pub fn from_bool(success: bool, ok: impl Into<String>, failed: impl Into<String>) -> Self {
        if success { Self::ok(ok) } else { Self::failed(failed) }
    }

    /// Attach a satellite action, kept only for successful outcomes
    #[must_use]
    pub fn with_action(mut self, action: SatelliteAction) -> Self {
        if self.success {
            self.actions.push(action);
        }
        self
    }
}

/// Runs tool calls against the device gateway
pub struct ToolExecutor {
    gateway: Arc<dyn DeviceGateway>,
    router: Option<Arc<SemanticRouter>>,
    timeout: Duration,
}

impl ToolExecutor {
    /// Create an executor with the default per-call timeout
    #[must_use]
    pub fn new(gateway: Arc<dyn DeviceGateway>) -> Self {
        Self {
            gateway,
            router: None,
            timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    /// Enable `teach_route` against this router
    #[must_use]
    pub fn with_router(mut self, router: Arc<SemanticRouter>) -> Self {
        self.router = Some(router);
        self
    }

    /// Override the per-call timeout
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Execute a tool call
    ///
    /// Never fails: unknown tools, invalid arguments and timeouts all come
    /// back as an unsuccessful outcome with a spoken explanation.
    pub async fn execute(&self, name: &str, arguments: &Map<String, Value>) -> ToolOutcome {
        let ctx = HandlerContext {
            gateway: self.gateway.as_ref(),
            router: self.router.as_deref(),
        };

        let result =
            tokio::time::timeout(self.timeout, handlers::dispatch(&ctx, name, arguments)).await;

        match result {
            Ok(Ok(outcome)) => {
                tracing::info!(tool = name, success = outcome.success, "tool executed");
                outcome
            }
            Ok(Err(e)) => {
                tracing::error!(tool = name, error = %e, "tool execution failed");
                ToolOutcome::failed(handlers::error_reply(&e))
            }
            Err(_) => {
                tracing::error!(tool = name, timeout = ?self.timeout, "tool execution timed out");
                ToolOutcome::failed("Das hat leider zu lange gedauert.")
            }
        }
    }
}
