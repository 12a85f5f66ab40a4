#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **intentusnet-registry** – Agent trait and capability registry.
//!
//! The registry maps an intent reference to the agents whose capability list
//! includes it, in **insertion order**; the router owns the deterministic
//! re-sort. Registration is exclusive and rejects name collisions. The
//! registry is constructed at startup and passed by reference through the
//! runtime handle; there is no global instance.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use intentusnet_types::{
    AgentDefinition, AgentResponse, ErrorCode, ErrorInfo, IntentEnvelope, IntentRef,
    SideEffectClass, ValidationError,
};

//─────────────────────────────
//  Agent trait
//─────────────────────────────

/// A named handler implementing one or more capabilities.
///
/// Agent failures are expressed two ways: a structured error inside a
/// returned [`AgentResponse`], or an `Err` from `handle`, which the router
/// normalizes to `INTERNAL_AGENT_ERROR`.
#[async_trait]
pub trait IntentAgent: Send + Sync {
    /// Registration-time definition (name, node, capabilities).
    fn definition(&self) -> &AgentDefinition;

    /// Handle one routed envelope.
    async fn handle(&self, envelope: &IntentEnvelope) -> Result<AgentResponse>;

    /// Side-effect classification for a step serving `intent`.
    ///
    /// `None` means unclassified; recovery treats that conservatively.
    fn side_effect(&self, intent: &IntentRef) -> Option<SideEffectClass> {
        let _ = intent;
        None
    }

    /// Whether the agent declares a compensation hook for reversible steps.
    fn has_compensation(&self) -> bool {
        false
    }

    /// Undo the effects of a previously started reversible step.
    ///
    /// Only called during recovery, and only when `has_compensation` is true.
    async fn compensate(&self, step_id: &str) -> Result<()> {
        anyhow::bail!("agent '{}' declares no compensation hook (step {step_id})", self.name())
    }

    /// The agent's unique name.
    fn name(&self) -> &str {
        &self.definition().name
    }
}

//─────────────────────────────
//  Registry errors
//─────────────────────────────

/// Registration failures.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// An agent with the same name is already registered.
    #[error("agent '{0}' is already registered")]
    DuplicateAgent(String),
    /// The definition failed structural validation.
    #[error("invalid agent definition: {0}")]
    InvalidDefinition(#[from] ValidationError),
}

impl RegistryError {
    /// Convert into the wire-level structured error.
    pub fn to_error_info(&self) -> ErrorInfo {
        match self {
            Self::DuplicateAgent(name) => {
                ErrorInfo::new(ErrorCode::DuplicateAgent, format!("agent '{name}' is already registered"))
            }
            Self::InvalidDefinition(err) => {
                ErrorInfo::new(ErrorCode::RoutingError, err.to_string()).with_subtype("invalid_definition")
            }
        }
    }
}

//─────────────────────────────
//  Registry
//─────────────────────────────

/// Capability registry: read-mostly, exclusive registration.
#[derive(Default)]
pub struct AgentRegistry {
    agents: RwLock<Vec<Arc<dyn IntentAgent>>>,
}

impl AgentRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent. Fails with [`RegistryError::DuplicateAgent`] on a
    /// name clash and validates the definition first.
    pub async fn register(&self, agent: Arc<dyn IntentAgent>) -> Result<(), RegistryError> {
        agent.definition().validate()?;

        let mut agents = self.agents.write().await;
        if agents.iter().any(|existing| existing.name() == agent.name()) {
            return Err(RegistryError::DuplicateAgent(agent.name().to_string()));
        }
        debug!(agent = agent.name(), "registered agent");
        agents.push(agent);
        Ok(())
    }

    /// Agents whose capability list includes `intent`, in insertion order.
    /// Matching is exact on both intent name and version.
    pub async fn find_agents_for_intent(&self, intent: &IntentRef) -> Vec<Arc<dyn IntentAgent>> {
        self.agents
            .read()
            .await
            .iter()
            .filter(|agent| agent.definition().serves(intent))
            .cloned()
            .collect()
    }

    /// Look up a single agent by name.
    pub async fn find_agent(&self, name: &str) -> Option<Arc<dyn IntentAgent>> {
        self.agents.read().await.iter().find(|a| a.name() == name).cloned()
    }

    /// Number of registered agents.
    pub async fn len(&self) -> usize {
        self.agents.read().await.len()
    }

    /// Whether the registry is empty.
    pub async fn is_empty(&self) -> bool {
        self.agents.read().await.is_empty()
    }
}
