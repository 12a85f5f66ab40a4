#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **intentusnet-types** – Shared primitive data structures for IntentusNet.
//!
//! The crate is dependency-light and sits at the very bottom of the crate
//! graph so that *every* other crate can depend on it without causing cycles.
//! It intentionally makes no assumptions about I/O, cryptography, or storage:
//! envelopes, agent definitions, contracts and the error taxonomy live here,
//! hashing and persistence live above.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

//─────────────────────────────
//  Validation limits
//─────────────────────────────

/// Maximum allowed length for intent names to prevent memory exhaustion.
pub const MAX_INTENT_NAME_LEN: usize = 256;

/// Maximum allowed length for agent names to prevent memory exhaustion.
pub const MAX_AGENT_NAME_LEN: usize = 256;

/// Maximum allowed serialized payload size for a single envelope.
pub const MAX_PAYLOAD_BYTES: usize = 1_048_576; // 1MB

/// Maximum number of entries the routing decision path may accumulate.
pub const MAX_DECISION_PATH_LEN: usize = 1024;

/// Protocol version stamped on every envelope.
pub const PROTOCOL_VERSION: &str = "1.0";

//─────────────────────────────
//  Submodules
//─────────────────────────────

/// Execution contracts, side-effect classes and compliance modes.
pub mod contract;
/// Stable error taxonomy shared across the runtime.
pub mod error;

pub use contract::{ComplianceMode, ExecutionContract, SideEffectClass};
pub use error::{ErrorCode, ErrorInfo, RecoveryStrategy};

//─────────────────────────────
//  Core identifiers
//─────────────────────────────

/// Unique identifier for a single routed execution.
pub type ExecutionId = Uuid;

/// Reference to a versioned intent. Equality is exact on both fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IntentRef {
    /// Intent name, e.g. `sum`.
    pub name: String,
    /// Intent version, e.g. `1.0`. Compared verbatim, not semver-aware.
    pub version: String,
}

impl IntentRef {
    /// Create a new intent reference with validation.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Result<Self, ValidationError> {
        let reference = Self { name: name.into(), version: version.into() };
        reference.validate()?;
        Ok(reference)
    }

    /// Validate an existing intent reference.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyField("intent.name"));
        }
        if self.name.len() > MAX_INTENT_NAME_LEN {
            return Err(ValidationError::FieldTooLong {
                field: "intent.name",
                actual: self.name.len(),
                max: MAX_INTENT_NAME_LEN,
            });
        }
        if self.version.trim().is_empty() {
            return Err(ValidationError::EmptyField("intent.version"));
        }
        Ok(())
    }
}

impl std::fmt::Display for IntentRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.name, self.version)
    }
}

//─────────────────────────────
//  Routing options
//─────────────────────────────

/// Strategy applied by the router once candidates are resolved and ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoutingStrategy {
    /// Invoke a single agent (the target, or the first ordered candidate).
    Direct,
    /// Try ordered candidates sequentially until one succeeds.
    Fallback,
    /// Invoke every candidate sequentially; the last success wins.
    Broadcast,
    /// Launch all candidates concurrently; the first success wins.
    Parallel,
}

impl std::fmt::Display for RoutingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Direct => "DIRECT",
            Self::Fallback => "FALLBACK",
            Self::Broadcast => "BROADCAST",
            Self::Parallel => "PARALLEL",
        };
        f.write_str(name)
    }
}

/// Caller-supplied routing options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingOptions {
    /// Requested routing strategy.
    pub strategy: RoutingStrategy,
    /// Explicit target agent, only meaningful for DIRECT.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_agent: Option<String>,
}

impl RoutingOptions {
    /// Options for a plain strategy without an explicit target.
    pub fn strategy(strategy: RoutingStrategy) -> Self {
        Self { strategy, target_agent: None }
    }

    /// DIRECT routing aimed at a named agent.
    pub fn direct_to(agent: impl Into<String>) -> Self {
        Self { strategy: RoutingStrategy::Direct, target_agent: Some(agent.into()) }
    }
}

/// Router-owned metadata accumulated while an envelope is in flight.
///
/// The decision path is append-only: every agent the router attempts is
/// pushed in attempt order, which makes two runs comparable entry by entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingMetadata {
    /// Ordered names of every agent the router attempted.
    #[serde(default)]
    pub decision_path: Vec<String>,
}

//─────────────────────────────
//  Envelope
//─────────────────────────────

/// Trace and request correlation data carried alongside the intent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeMetadata {
    /// Caller trace identifier, excluded from idempotency-key derivation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    /// Caller request identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// RFC 3339 submission timestamp, stamped by the caller or the runtime.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<String>,
    /// Open extension bag, augmentable in flight.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

/// The routable container wrapping an intent with payload, context, routing
/// options and metadata. Owned by the caller until handed to the router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentEnvelope {
    /// Envelope protocol version, fixed at [`PROTOCOL_VERSION`].
    pub version: String,
    /// The intent being requested.
    pub intent: IntentRef,
    /// Opaque intent arguments.
    #[serde(default)]
    pub payload: Map<String, Value>,
    /// Opaque execution context.
    #[serde(default)]
    pub context: Map<String, Value>,
    /// Trace and correlation metadata.
    #[serde(default)]
    pub metadata: EnvelopeMetadata,
    /// Routing options.
    pub routing: RoutingOptions,
    /// Router-owned, append-only routing trail.
    #[serde(default)]
    pub routing_metadata: RoutingMetadata,
    /// Caller-supplied deduplication token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl IntentEnvelope {
    /// Build an envelope for `intent` with the given routing options.
    pub fn new(intent: IntentRef, routing: RoutingOptions) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            intent,
            payload: Map::new(),
            context: Map::new(),
            metadata: EnvelopeMetadata::default(),
            routing,
            routing_metadata: RoutingMetadata::default(),
            idempotency_key: None,
        }
    }

    /// Attach a payload entry, builder style.
    pub fn with_payload_entry(mut self, key: impl Into<String>, value: Value) -> Self {
        self.payload.insert(key.into(), value);
        self
    }

    /// Attach an idempotency key, builder style.
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Validate the envelope before routing.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.intent.validate()?;
        if let Some(target) = &self.routing.target_agent {
            if target.len() > MAX_AGENT_NAME_LEN {
                return Err(ValidationError::FieldTooLong {
                    field: "routing.targetAgent",
                    actual: target.len(),
                    max: MAX_AGENT_NAME_LEN,
                });
            }
        }
        if self.routing_metadata.decision_path.len() > MAX_DECISION_PATH_LEN {
            return Err(ValidationError::FieldTooLong {
                field: "routingMetadata.decisionPath",
                actual: self.routing_metadata.decision_path.len(),
                max: MAX_DECISION_PATH_LEN,
            });
        }
        let payload_bytes = serde_json::to_vec(&self.payload)
            .map(|b| b.len())
            .unwrap_or(usize::MAX);
        if payload_bytes > MAX_PAYLOAD_BYTES {
            return Err(ValidationError::FieldTooLong {
                field: "payload",
                actual: payload_bytes,
                max: MAX_PAYLOAD_BYTES,
            });
        }
        Ok(())
    }
}

//─────────────────────────────
//  Agent definitions
//─────────────────────────────

/// A declared ability of an agent to handle one intent reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capability {
    /// The intent this capability serves.
    pub intent: IntentRef,
    /// Optional JSON schema for the intent payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
    /// Optional JSON schema for the response payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
    /// Preferred fallback agents, advisory only.
    #[serde(default)]
    pub fallback_agents: Vec<String>,
}

impl Capability {
    /// Capability for `intent` with no schemas and no fallback hints.
    pub fn for_intent(intent: IntentRef) -> Self {
        Self { intent, input_schema: None, output_schema: None, fallback_agents: Vec::new() }
    }

    /// Attach an input schema, builder style.
    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = Some(schema);
        self
    }

    /// Validate a payload against the capability's input schema, when one is
    /// declared. Validation is shallow and opt-in: a `required` list of keys
    /// and per-property `type` names (`string`, `number`, `integer`,
    /// `boolean`, `object`, `array`, `null`) are enforced, anything else in
    /// the schema is ignored.
    pub fn validate_payload(&self, payload: &Map<String, Value>) -> Result<(), error::ErrorInfo> {
        use crate::error::{ErrorCode, ErrorInfo, RecoveryStrategy};

        let Some(schema) = &self.input_schema else { return Ok(()) };

        if let Some(required) = schema.get("required").and_then(Value::as_array) {
            for key in required.iter().filter_map(Value::as_str) {
                if !payload.contains_key(key) {
                    return Err(ErrorInfo::new(
                        ErrorCode::ContractViolation,
                        format!("payload is missing required field '{key}' for {}", self.intent),
                    )
                    .with_subtype("input_schema")
                    .with_recovery(RecoveryStrategy::Fallback));
                }
            }
        }

        if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
            for (key, property) in properties {
                let Some(expected) = property.get("type").and_then(Value::as_str) else {
                    continue;
                };
                let Some(value) = payload.get(key) else { continue };
                if !json_type_matches(expected, value) {
                    return Err(ErrorInfo::new(
                        ErrorCode::ContractViolation,
                        format!(
                            "payload field '{key}' is not of type '{expected}' for {}",
                            self.intent
                        ),
                    )
                    .with_subtype("input_schema")
                    .with_recovery(RecoveryStrategy::Fallback));
                }
            }
        }
        Ok(())
    }
}

fn json_type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        // Unknown type names are not enforced.
        _ => true,
    }
}

/// Registration-time description of an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDefinition {
    /// Unique agent name.
    pub name: String,
    /// Hosting node, if the agent is remote.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    /// Ordering weight within a node; lower wins.
    #[serde(default)]
    pub node_priority: i64,
    /// Capabilities the agent implements.
    pub capabilities: Vec<Capability>,
}

impl AgentDefinition {
    /// Create a local agent definition with validation.
    pub fn new(name: impl Into<String>, capabilities: Vec<Capability>) -> Result<Self, ValidationError> {
        let definition = Self {
            name: name.into(),
            node_id: None,
            node_priority: 0,
            capabilities,
        };
        definition.validate()?;
        Ok(definition)
    }

    /// Validate an existing agent definition.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyField("agent.name"));
        }
        if self.name.len() > MAX_AGENT_NAME_LEN {
            return Err(ValidationError::FieldTooLong {
                field: "agent.name",
                actual: self.name.len(),
                max: MAX_AGENT_NAME_LEN,
            });
        }
        for capability in &self.capabilities {
            capability.intent.validate()?;
        }
        Ok(())
    }

    /// Whether the agent declares a capability for `intent`.
    pub fn serves(&self, intent: &IntentRef) -> bool {
        self.capabilities.iter().any(|c| &c.intent == intent)
    }
}

//─────────────────────────────
//  Agent responses
//─────────────────────────────

/// Terminal status of an agent invocation or routed execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    /// The agent produced a usable payload.
    Success,
    /// The agent (or the router on its behalf) produced a structured error.
    Error,
}

/// Response returned by an agent or synthesized by the router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResponse {
    /// Terminal status.
    pub status: ResponseStatus,
    /// Response payload; meaningful on success, usually null on error.
    #[serde(default)]
    pub payload: Value,
    /// Structured error, present exactly when `status == Error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    /// Response metadata (serving agent, attempt counts, ...).
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl AgentResponse {
    /// Successful response with `payload`.
    pub fn success(payload: Value) -> Self {
        Self {
            status: ResponseStatus::Success,
            payload,
            error: None,
            metadata: Map::new(),
        }
    }

    /// Error response carrying `error`.
    pub fn failure(error: ErrorInfo) -> Self {
        Self {
            status: ResponseStatus::Error,
            payload: Value::Null,
            error: Some(error),
            metadata: Map::new(),
        }
    }

    /// Attach a metadata entry, builder style.
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Whether the response is a success.
    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }
}

//─────────────────────────────
//  Validation errors
//─────────────────────────────

/// Structural validation failure for envelopes and definitions.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    /// A required field was empty or whitespace.
    #[error("field '{0}' must not be empty")]
    EmptyField(&'static str),
    /// A field exceeded its size limit.
    #[error("field '{field}' too large: {actual} > {max}")]
    FieldTooLong {
        /// Offending field path.
        field: &'static str,
        /// Observed size.
        actual: usize,
        /// Permitted maximum.
        max: usize,
    },
}
