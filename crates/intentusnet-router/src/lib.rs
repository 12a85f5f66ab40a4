#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **intentusnet-router** – Deterministic intent routing.
//!
//! Given the same envelope and the same registry state, the router selects
//! agents, attempts fallbacks and journals outcomes in a bit-identical order.
//! All agent-level failures come back as structured error responses; the
//! router only returns `Err` for runtime faults of its own (WAL I/O, record
//! persistence), which propagate to the operator surface.
//!
//! Strategy semantics:
//! * **DIRECT** – one agent (the target or the first ordered candidate).
//! * **FALLBACK** – ordered candidates tried sequentially, first success wins.
//! * **BROADCAST** – every candidate runs sequentially, last success wins.
//! * **PARALLEL** – all candidates launched concurrently in deterministic
//!   order, first success wins, losers are discarded. Rejected outright when
//!   the compliance mode requires determinism.

mod hooks;
mod order;
mod router;

pub use hooks::RouterHook;
pub use order::order_candidates;
pub use router::{IntentRouter, RouteOutcome, RouterConfig};

use serde_json::Value;

//─────────────────────────────
//  Redaction policy
//─────────────────────────────

/// PII redaction applied to persisted responses under REGULATED mode.
///
/// Values under the named keys are replaced, at any nesting depth, before the
/// response is hashed and persisted, so the stored hash covers the redacted
/// form.
#[derive(Debug, Clone, Default)]
pub struct RedactionPolicy {
    /// Keys whose values are replaced wherever they appear.
    pub redact_keys: Vec<String>,
}

/// Replacement marker for redacted values.
pub const REDACTED: &str = "[REDACTED]";

impl RedactionPolicy {
    /// Policy redacting the given keys.
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { redact_keys: keys.into_iter().map(Into::into).collect() }
    }

    /// Redact `value` in place.
    pub fn apply(&self, value: &mut Value) {
        match value {
            Value::Object(map) => {
                for (key, entry) in map.iter_mut() {
                    if self.redact_keys.iter().any(|k| k == key) {
                        *entry = Value::String(REDACTED.to_string());
                    } else {
                        self.apply(entry);
                    }
                }
            }
            Value::Array(items) => {
                for item in items {
                    self.apply(item);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn redaction_replaces_nested_keys() {
        let policy = RedactionPolicy::new(["ssn", "email"]);
        let mut value = json!({
            "name": "ok",
            "ssn": "123-45-6789",
            "nested": {"email": "a@b.c", "list": [{"ssn": "x"}]}
        });
        policy.apply(&mut value);

        assert_eq!(value["ssn"], json!(REDACTED));
        assert_eq!(value["nested"]["email"], json!(REDACTED));
        assert_eq!(value["nested"]["list"][0]["ssn"], json!(REDACTED));
        assert_eq!(value["name"], json!("ok"));
    }
}
