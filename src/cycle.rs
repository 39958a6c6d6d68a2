use crate::model::NodeId;
use crate::store::NodeStore;
use std::collections::HashSet;

/// Would adding the edge `proposed_parent → child` close a directed cycle?
///
/// Walks every parent edge upward from `proposed_parent`; reaching `child` means
/// `child` is already an ancestor of the proposed parent.
pub fn would_create_cycle(store: &NodeStore, proposed_parent: &str, child: &str) -> bool {
    if proposed_parent == child {
        return true;
    }
    let mut visited: HashSet<&str> = HashSet::new();
    let mut stack: Vec<&str> = vec![proposed_parent];
    while let Some(current) = stack.pop() {
        if current == child {
            return true;
        }
        if !visited.insert(current) {
            continue;
        }
        if let Some(node) = store.get(current) {
            for parent in &node.parent_ids {
                if !visited.contains(parent.as_str()) {
                    stack.push(parent.as_str());
                }
            }
        }
    }
    false
}

/// Parents from `candidates` that can be attached to `child` in order without
/// creating a cycle or a duplicate edge.
pub(crate) fn acyclic_parents(
    store: &NodeStore,
    child: &str,
    candidates: &[NodeId],
) -> Vec<NodeId> {
    let mut accepted: Vec<NodeId> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if accepted.contains(candidate) || !store.contains(candidate.as_str()) {
            continue;
        }
        if would_create_cycle(store, candidate.as_str(), child) {
            continue;
        }
        accepted.push(candidate.clone());
    }
    accepted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewNode;

    fn store(edges: &[(&str, &[&str])]) -> NodeStore {
        let mut store = NodeStore::new();
        for (id, parents) in edges {
            let mut node = NewNode::new("user", *id).with_id(*id);
            for parent in *parents {
                node = node.with_parent(*parent);
            }
            store.push_unindexed(node.into_node());
        }
        store.rebuild_indexes();
        store
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let store = store(&[("a", &[])]);
        assert!(would_create_cycle(&store, "a", "a"));
        assert!(would_create_cycle(&store, "unknown", "unknown"));
    }

    #[test]
    fn ancestor_as_child_is_a_cycle() {
        let store = store(&[("a", &[]), ("b", &["a"]), ("c", &["b"])]);
        assert!(would_create_cycle(&store, "c", "a"));
        assert!(!would_create_cycle(&store, "a", "c"));
    }

    #[test]
    fn follows_secondary_parents() {
        let store = store(&[("a", &[]), ("x", &[]), ("b", &["x", "a"]), ("c", &["b"])]);
        assert!(would_create_cycle(&store, "c", "a"));
        assert!(!would_create_cycle(&store, "x", "a"));
    }

    #[test]
    fn diamond_terminates() {
        let store = store(&[
            ("a", &[]),
            ("b", &["a"]),
            ("c", &["a"]),
            ("d", &["b", "c"]),
        ]);
        assert!(!would_create_cycle(&store, "d", "z"));
        assert!(would_create_cycle(&store, "d", "a"));
    }

    #[test]
    fn acyclic_parents_filters_bad_edges() {
        let store = store(&[("a", &[]), ("b", &["a"])]);
        let accepted = acyclic_parents(
            &store,
            "a",
            &[NodeId::from("b"), NodeId::from("missing"), NodeId::from("a")],
        );
        assert!(accepted.is_empty());
        let accepted = acyclic_parents(&store, "b", &[NodeId::from("a"), NodeId::from("a")]);
        assert_eq!(accepted, vec![NodeId::from("a")]);
    }
}
