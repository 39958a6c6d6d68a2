use crate::model::NodeId;
use crate::store::NodeStore;
use std::collections::{HashMap, HashSet, VecDeque};

/// Per-node collapse flags and the primary-parent walks built on them.
///
/// Every walk keeps a visited set so a malformed graph degrades to "stop here"
/// instead of looping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollapseSet {
    collapsed: HashSet<NodeId>,
}

impl CollapseSet {
    pub fn is_collapsed(&self, id: &str) -> bool {
        self.collapsed.contains(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &NodeId> {
        self.collapsed.iter()
    }

    pub fn len(&self) -> usize {
        self.collapsed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collapsed.is_empty()
    }

    /// Returns the new state.
    pub fn toggle(&mut self, id: &NodeId) -> bool {
        if self.collapsed.remove(id.as_str()) {
            false
        } else {
            self.collapsed.insert(id.clone());
            true
        }
    }

    /// Returns true when the flag changed.
    pub fn set(&mut self, id: &NodeId, collapsed: bool) -> bool {
        if collapsed {
            self.collapsed.insert(id.clone())
        } else {
            self.collapsed.remove(id.as_str())
        }
    }

    pub fn clear(&mut self) {
        self.collapsed.clear();
    }

    /// Drops flags on nodes that no longer exist.
    pub fn retain_existing(&mut self, store: &NodeStore) {
        self.collapsed.retain(|id| store.contains(id.as_str()));
    }

    /// True when a strict primary ancestor of `id` is collapsed.
    pub fn is_in_collapsed_subtree(&self, store: &NodeStore, id: &str) -> bool {
        let mut visited: HashSet<&str> = HashSet::new();
        visited.insert(id);
        let mut current = store.get(id).and_then(|node| node.primary_parent());
        while let Some(parent) = current {
            if !visited.insert(parent.as_str()) {
                return false;
            }
            if self.collapsed.contains(parent.as_str()) {
                return true;
            }
            current = store
                .get(parent.as_str())
                .and_then(|node| node.primary_parent());
        }
        false
    }

    /// Expands every collapsed strict ancestor of `id`. Returns the ids expanded.
    pub fn expand_ancestors(&mut self, store: &NodeStore, id: &str) -> Vec<NodeId> {
        let mut expanded = Vec::new();
        for ancestor in primary_ancestors(store, id) {
            if self.collapsed.remove(ancestor.as_str()) {
                expanded.push(ancestor);
            }
        }
        expanded
    }

    /// Descendants hidden because `id` itself is collapsed; zero otherwise.
    pub fn hidden_descendant_count(&self, store: &NodeStore, id: &str) -> usize {
        if !self.is_collapsed(id) {
            return 0;
        }
        descendant_count(store, id)
    }

    /// Per-call memo of "hidden by a collapsed ancestor", shared by siblings.
    pub fn hidden_memo<'a>(&'a self, store: &'a NodeStore) -> HiddenMemo<'a> {
        HiddenMemo {
            collapse: self,
            store,
            cache: HashMap::new(),
        }
    }
}

/// Strict primary ancestors of `id`, nearest first.
pub fn primary_ancestors(store: &NodeStore, id: &str) -> Vec<NodeId> {
    let mut ancestors = Vec::new();
    let mut visited: HashSet<&str> = HashSet::new();
    visited.insert(id);
    let mut current = store.get(id).and_then(|node| node.primary_parent());
    while let Some(parent) = current {
        if !visited.insert(parent.as_str()) {
            break;
        }
        let Some(node) = store.get(parent.as_str()) else {
            break;
        };
        ancestors.push(node.id.clone());
        current = node.primary_parent();
    }
    ancestors
}

/// Non-thought primary descendants of `id` in breadth-first order.
pub fn descendants(store: &NodeStore, id: &str) -> Vec<NodeId> {
    let mut found = Vec::new();
    let mut visited: HashSet<&str> = HashSet::new();
    visited.insert(id);
    let mut queue: VecDeque<&str> = VecDeque::from([id]);
    while let Some(current) = queue.pop_front() {
        for child in store.children_of(Some(current)) {
            if child.is_thought() || !visited.insert(child.id.as_str()) {
                continue;
            }
            found.push(child.id.clone());
            queue.push_back(child.id.as_str());
        }
    }
    found
}

/// Every primary descendant of `id`, thought nodes included.
pub(crate) fn primary_subtree(store: &NodeStore, id: &str) -> Vec<NodeId> {
    let mut found = Vec::new();
    let mut visited: HashSet<&str> = HashSet::from([id]);
    let mut stack: Vec<&str> = vec![id];
    while let Some(current) = stack.pop() {
        for child in store.child_ids(Some(current)) {
            if visited.insert(child.as_str()) {
                found.push(child.clone());
                stack.push(child.as_str());
            }
        }
    }
    found
}

pub fn descendant_count(store: &NodeStore, id: &str) -> usize {
    descendants(store, id).len()
}

pub struct HiddenMemo<'a> {
    collapse: &'a CollapseSet,
    store: &'a NodeStore,
    cache: HashMap<&'a str, bool>,
}

impl<'a> HiddenMemo<'a> {
    pub fn is_hidden(&mut self, id: &'a str) -> bool {
        if let Some(&hidden) = self.cache.get(id) {
            return hidden;
        }
        let store = self.store;
        let collapse = self.collapse;
        // Walk up until a collapsed ancestor or a memoized answer settles the chain.
        let mut chain: Vec<&'a str> = vec![id];
        let mut visited: HashSet<&'a str> = HashSet::from([id]);
        let mut current = store.get(id).and_then(|node| node.primary_parent());
        let mut hidden = false;
        while let Some(parent) = current {
            let parent = parent.as_str();
            if collapse.is_collapsed(parent) {
                hidden = true;
                break;
            }
            if let Some(&known) = self.cache.get(parent) {
                hidden = known;
                break;
            }
            if !visited.insert(parent) {
                break;
            }
            chain.push(parent);
            current = store.get(parent).and_then(|node| node.primary_parent());
        }
        for node in chain {
            self.cache.insert(node, hidden);
        }
        hidden
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NewNode, THOUGHT_TYPE};

    fn store() -> NodeStore {
        let mut store = NodeStore::new();
        for (id, parent) in [
            ("r", None),
            ("a", Some("r")),
            ("b", Some("a")),
            ("c", Some("b")),
            ("d", Some("r")),
        ] {
            let mut node = NewNode::new("user", id).with_id(id);
            if let Some(parent) = parent {
                node = node.with_parent(parent);
            }
            store.add(node.into_node());
        }
        store
    }

    #[test]
    fn collapsed_ancestor_hides_but_not_self() {
        let store = store();
        let mut collapse = CollapseSet::default();
        collapse.toggle(&NodeId::from("a"));
        assert!(!collapse.is_in_collapsed_subtree(&store, "a"));
        assert!(collapse.is_in_collapsed_subtree(&store, "b"));
        assert!(collapse.is_in_collapsed_subtree(&store, "c"));
        assert!(!collapse.is_in_collapsed_subtree(&store, "d"));
        assert!(!collapse.toggle(&NodeId::from("a")));
        assert!(!collapse.is_in_collapsed_subtree(&store, "c"));
    }

    #[test]
    fn counts_skip_thoughts() {
        let mut store = store();
        store.add(
            NewNode::new("assistant", "...")
                .with_id("t")
                .with_parent("a")
                .with_type(THOUGHT_TYPE)
                .into_node(),
        );
        assert_eq!(descendant_count(&store, "r"), 4);
        assert_eq!(descendant_count(&store, "a"), 2);
        let mut collapse = CollapseSet::default();
        assert_eq!(collapse.hidden_descendant_count(&store, "a"), 0);
        collapse.set(&NodeId::from("a"), true);
        assert_eq!(collapse.hidden_descendant_count(&store, "a"), 2);
    }

    #[test]
    fn walks_survive_primary_cycles() {
        let mut store = store();
        store.set_parents("r", vec![NodeId::from("c")]);
        let collapse = CollapseSet::default();
        assert!(!collapse.is_in_collapsed_subtree(&store, "c"));
        assert_eq!(primary_ancestors(&store, "c").len(), 3);
        assert_eq!(descendant_count(&store, "r"), 4);
        let mut memo = collapse.hidden_memo(&store);
        assert!(!memo.is_hidden("b"));
    }

    #[test]
    fn expand_ancestors_only_touches_the_chain() {
        let store = store();
        let mut collapse = CollapseSet::default();
        collapse.set(&NodeId::from("a"), true);
        collapse.set(&NodeId::from("d"), true);
        collapse.set(&NodeId::from("c"), true);
        let expanded = collapse.expand_ancestors(&store, "c");
        assert_eq!(expanded, vec![NodeId::from("a")]);
        assert!(collapse.is_collapsed("c"));
        assert!(collapse.is_collapsed("d"));
    }

    #[test]
    fn memo_agrees_with_walk() {
        let store = store();
        let mut collapse = CollapseSet::default();
        collapse.set(&NodeId::from("b"), true);
        let mut memo = collapse.hidden_memo(&store);
        for node in store.nodes() {
            assert_eq!(
                memo.is_hidden(node.id.as_str()),
                collapse.is_in_collapsed_subtree(&store, node.id.as_str()),
                "{}",
                node.id
            );
        }
    }
}
