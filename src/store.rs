use crate::model::{Node, NodeId};
use std::collections::HashMap;

/// Owns the node list plus the id→position and primary-parent→children indexes.
///
/// The store never triggers layout. Single-node paths keep the indexes up to date
/// incrementally; anything that replaces the node list wholesale must call
/// [`NodeStore::rebuild_indexes`].
#[derive(Debug, Clone, Default)]
pub struct NodeStore {
    nodes: Vec<Node>,
    index: HashMap<NodeId, usize>,
    children: HashMap<NodeId, Vec<NodeId>>,
    roots: Vec<NodeId>,
}

impl NodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Node> {
        self.index.get(id).map(|&idx| &self.nodes[idx])
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Node> {
        let idx = *self.index.get(id)?;
        self.nodes.get_mut(idx)
    }

    pub fn position_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Ids registered under `parent` (or the root bucket for `None`), in insertion order.
    pub fn child_ids(&self, parent: Option<&str>) -> &[NodeId] {
        let bucket = match parent {
            Some(parent) => self.children.get(parent),
            None => Some(&self.roots),
        };
        bucket.map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn children_of(&self, parent: Option<&str>) -> Vec<&Node> {
        self.child_ids(parent)
            .iter()
            .filter_map(|id| self.get(id.as_str()))
            .collect()
    }

    /// Layout roots: nodes without parents plus nodes whose primary parent is gone.
    pub fn layout_roots(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|node| match node.primary_parent() {
                None => true,
                Some(parent) => !self.contains(parent.as_str()),
            })
            .map(|node| node.id.clone())
            .collect()
    }

    /// Appends a node and indexes it. No-op when the id exists or the primary parent
    /// is unknown.
    pub fn add(&mut self, node: Node) -> bool {
        if self.contains(node.id.as_str()) {
            return false;
        }
        if let Some(parent) = node.primary_parent()
            && !self.contains(parent.as_str())
        {
            return false;
        }
        self.nodes.push(node);
        let idx = self.nodes.len() - 1;
        self.apply_incremental(idx);
        true
    }

    /// Appends without any checks or indexing. Callers must rebuild afterwards.
    pub(crate) fn push_unindexed(&mut self, node: Node) {
        self.nodes.push(node);
    }

    /// Removes a node from the list and both indexes. Nodes still naming it as a
    /// parent are left untouched.
    pub fn remove(&mut self, id: &str) -> Option<Node> {
        let idx = self.index.remove(id)?;
        let node = self.nodes.remove(idx);
        for (offset, later) in self.nodes[idx..].iter().enumerate() {
            self.index.insert(later.id.clone(), idx + offset);
        }
        self.unregister_child(&node);
        Some(node)
    }

    /// Replaces the parent list of a node and moves it between children buckets when
    /// the primary parent changed.
    pub fn set_parents(&mut self, id: &str, parent_ids: Vec<NodeId>) -> bool {
        let Some(idx) = self.position_of(id) else {
            return false;
        };
        let before = self.nodes[idx].primary_parent().cloned();
        self.nodes[idx].parent_ids = parent_ids;
        let after = self.nodes[idx].primary_parent().cloned();
        if before != after {
            let node_id = self.nodes[idx].id.clone();
            self.detach_from_bucket(before.as_ref(), &node_id);
            self.attach_to_bucket(after, node_id);
        }
        true
    }

    /// Drops every node for which `keep` returns false and rebuilds the indexes.
    pub fn retain(&mut self, mut keep: impl FnMut(&Node) -> bool) -> Vec<Node> {
        let mut removed = Vec::new();
        let mut kept = Vec::with_capacity(self.nodes.len());
        for node in self.nodes.drain(..) {
            if keep(&node) {
                kept.push(node);
            } else {
                removed.push(node);
            }
        }
        self.nodes = kept;
        self.rebuild_indexes();
        removed
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.index.clear();
        self.children.clear();
        self.roots.clear();
    }

    pub fn rebuild_indexes(&mut self) {
        self.index.clear();
        self.children.clear();
        self.roots.clear();
        for idx in 0..self.nodes.len() {
            self.apply_incremental(idx);
        }
    }

    fn apply_incremental(&mut self, idx: usize) {
        let node = &self.nodes[idx];
        let id = node.id.clone();
        let parent = node.primary_parent().cloned();
        self.index.insert(id.clone(), idx);
        self.attach_to_bucket(parent, id);
    }

    fn attach_to_bucket(&mut self, parent: Option<NodeId>, id: NodeId) {
        match parent {
            Some(parent) => self.children.entry(parent).or_default().push(id),
            None => self.roots.push(id),
        }
    }

    fn detach_from_bucket(&mut self, parent: Option<&NodeId>, id: &NodeId) {
        let bucket = match parent {
            Some(parent) => self.children.get_mut(parent.as_str()),
            None => Some(&mut self.roots),
        };
        if let Some(bucket) = bucket {
            bucket.retain(|child| child != id);
        }
        if let Some(parent) = parent
            && self
                .children
                .get(parent.as_str())
                .is_some_and(|bucket| bucket.is_empty())
        {
            self.children.remove(parent.as_str());
        }
    }

    fn unregister_child(&mut self, node: &Node) {
        self.detach_from_bucket(node.primary_parent(), &node.id);
    }

    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        assert_eq!(self.index.len(), self.nodes.len());
        for (idx, node) in self.nodes.iter().enumerate() {
            assert_eq!(self.index.get(node.id.as_str()), Some(&idx));
            let bucket = self.child_ids(node.primary_parent().map(NodeId::as_str));
            assert!(bucket.contains(&node.id), "{} missing from bucket", node.id);
        }
        let bucketed: usize = self.children.values().map(Vec::len).sum::<usize>() + self.roots.len();
        assert_eq!(bucketed, self.nodes.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewNode;

    fn node(id: &str, parents: &[&str]) -> Node {
        let mut new = NewNode::new("user", id).with_id(id);
        for parent in parents {
            new = new.with_parent(*parent);
        }
        new.into_node()
    }

    #[test]
    fn add_indexes_under_primary_parent() {
        let mut store = NodeStore::new();
        assert!(store.add(node("root", &[])));
        assert!(store.add(node("a", &["root"])));
        assert!(store.add(node("b", &["root"])));
        let ids: Vec<&str> = store.child_ids(Some("root")).iter().map(NodeId::as_str).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(store.child_ids(None).len(), 1);
        store.assert_consistent();
    }

    #[test]
    fn add_rejects_unknown_parent_and_duplicate_id() {
        let mut store = NodeStore::new();
        assert!(!store.add(node("orphan", &["missing"])));
        assert!(store.add(node("root", &[])));
        assert!(!store.add(node("root", &[])));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn remove_shifts_indexes() {
        let mut store = NodeStore::new();
        store.add(node("root", &[]));
        store.add(node("a", &["root"]));
        store.add(node("b", &["root"]));
        store.add(node("c", &["b"]));
        let removed = store.remove("a").unwrap();
        assert_eq!(removed.id.as_str(), "a");
        assert_eq!(store.position_of("c"), Some(2));
        assert_eq!(store.get("c").unwrap().id.as_str(), "c");
        store.assert_consistent();
    }

    #[test]
    fn remove_leaves_dangling_children_alone() {
        let mut store = NodeStore::new();
        store.add(node("root", &[]));
        store.add(node("a", &["root"]));
        store.remove("root");
        assert!(store.get("a").unwrap().has_parent("root"));
        assert_eq!(store.layout_roots(), vec![NodeId::from("a")]);
    }

    #[test]
    fn set_parents_moves_bucket() {
        let mut store = NodeStore::new();
        store.add(node("r1", &[]));
        store.add(node("r2", &[]));
        store.add(node("a", &["r1"]));
        store.set_parents("a", vec![NodeId::from("r2"), NodeId::from("r1")]);
        assert!(store.child_ids(Some("r1")).is_empty());
        assert_eq!(store.child_ids(Some("r2")), &[NodeId::from("a")]);
        store.assert_consistent();
    }

    #[test]
    fn rebuild_after_unindexed_push() {
        let mut store = NodeStore::new();
        store.push_unindexed(node("child", &["parent"]));
        store.push_unindexed(node("parent", &[]));
        store.rebuild_indexes();
        assert_eq!(store.child_ids(Some("parent")), &[NodeId::from("child")]);
        store.assert_consistent();
    }
}
