//! Deterministic candidate ordering.
//!
//! Before any strategy runs, candidates are sorted by a total order that
//! depends only on registry state: agents without a `nodeId` first, then
//! ascending `nodePriority`, then lexicographic name. The sort is stable and
//! identical across platforms, which is what makes decision paths and WAL
//! traces reproducible.

use std::sync::Arc;

use intentusnet_registry::IntentAgent;

/// Sort candidates into the router's total order.
pub fn order_candidates(candidates: &mut [Arc<dyn IntentAgent>]) {
    candidates.sort_by(|a, b| {
        let da = a.definition();
        let db = b.definition();
        da.node_id
            .is_some()
            .cmp(&db.node_id.is_some())
            .then_with(|| da.node_priority.cmp(&db.node_priority))
            .then_with(|| da.name.cmp(&db.name))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use intentusnet_types::{
        AgentDefinition, AgentResponse, Capability, IntentEnvelope, IntentRef,
    };

    struct Stub {
        definition: AgentDefinition,
    }

    #[async_trait]
    impl IntentAgent for Stub {
        fn definition(&self) -> &AgentDefinition {
            &self.definition
        }

        async fn handle(&self, _envelope: &IntentEnvelope) -> Result<AgentResponse> {
            Ok(AgentResponse::success(serde_json::Value::Null))
        }
    }

    fn agent(name: &str, node_id: Option<&str>, priority: i64) -> Arc<dyn IntentAgent> {
        let intent = IntentRef::new("t", "1.0").unwrap();
        Arc::new(Stub {
            definition: AgentDefinition {
                name: name.to_string(),
                node_id: node_id.map(String::from),
                node_priority: priority,
                capabilities: vec![Capability::for_intent(intent)],
            },
        })
    }

    fn names(candidates: &[Arc<dyn IntentAgent>]) -> Vec<&str> {
        candidates.iter().map(|a| a.name()).collect()
    }

    #[test]
    fn local_agents_come_before_node_bound_agents() {
        let mut candidates = vec![agent("remote", Some("node-1"), 0), agent("local", None, 9)];
        order_candidates(&mut candidates);
        assert_eq!(names(&candidates), vec!["local", "remote"]);
    }

    #[test]
    fn lower_priority_wins_then_name_breaks_ties() {
        let mut candidates = vec![
            agent("c", None, 2),
            agent("b", None, 1),
            agent("a", None, 2),
        ];
        order_candidates(&mut candidates);
        assert_eq!(names(&candidates), vec!["b", "a", "c"]);
    }

    #[test]
    fn order_is_independent_of_input_permutation() {
        let build = || {
            vec![
                agent("b", None, 1),
                agent("a", Some("n2"), 1),
                agent("z", None, 0),
                agent("a", None, 1),
            ]
        };
        let mut first = build();
        order_candidates(&mut first);

        let mut second = build();
        second.reverse();
        order_candidates(&mut second);

        assert_eq!(names(&first), names(&second));
        assert_eq!(names(&first), vec!["z", "a", "b", "a"]);
    }
}
