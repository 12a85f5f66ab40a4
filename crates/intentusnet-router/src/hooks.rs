//! Per-intent middleware hooks.
//!
//! Hooks observe the routing pipeline; they never steer it. A hook returning
//! an error is logged and routing continues unchanged.

use anyhow::Result;
use async_trait::async_trait;
use tracing::warn;

use intentusnet_types::{AgentResponse, ErrorInfo, IntentEnvelope};

/// Middleware attached to the router.
#[async_trait]
pub trait RouterHook: Send + Sync {
    /// Hook name, used in logs.
    fn name(&self) -> &str;

    /// Called before candidate resolution. May augment envelope metadata.
    async fn before_route(&self, envelope: &mut IntentEnvelope) -> Result<()> {
        let _ = envelope;
        Ok(())
    }

    /// Called after the router produced its final response.
    async fn after_route(&self, envelope: &IntentEnvelope, response: &AgentResponse) -> Result<()> {
        let _ = (envelope, response);
        Ok(())
    }

    /// Called for every structured error the router produces or observes.
    async fn on_error(&self, envelope: &IntentEnvelope, error: &ErrorInfo) -> Result<()> {
        let _ = (envelope, error);
        Ok(())
    }
}

pub(crate) async fn run_before(hooks: &[std::sync::Arc<dyn RouterHook>], envelope: &mut IntentEnvelope) {
    for hook in hooks {
        if let Err(error) = hook.before_route(envelope).await {
            warn!(hook = hook.name(), %error, "before_route hook failed");
        }
    }
}

pub(crate) async fn run_after(
    hooks: &[std::sync::Arc<dyn RouterHook>],
    envelope: &IntentEnvelope,
    response: &AgentResponse,
) {
    for hook in hooks {
        if let Err(error) = hook.after_route(envelope, response).await {
            warn!(hook = hook.name(), %error, "after_route hook failed");
        }
    }
}

pub(crate) async fn run_on_error(
    hooks: &[std::sync::Arc<dyn RouterHook>],
    envelope: &IntentEnvelope,
    error_info: &ErrorInfo,
) {
    for hook in hooks {
        if let Err(error) = hook.on_error(envelope, error_info).await {
            warn!(hook = hook.name(), %error, "on_error hook failed");
        }
    }
}
