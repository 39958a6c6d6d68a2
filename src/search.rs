use crate::model::NodeId;
use crate::store::NodeStore;

/// Ids of nodes whose content contains `query`, ignoring case, in node-list order.
pub fn find_matches(store: &NodeStore, query: &str) -> Vec<NodeId> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return Vec::new();
    }
    store
        .nodes()
        .iter()
        .filter(|node| {
            node.content
                .as_deref()
                .is_some_and(|content| content.to_lowercase().contains(&needle))
        })
        .map(|node| node.id.clone())
        .collect()
}

/// Match list plus a wrapping cursor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchState {
    query: String,
    matches: Vec<NodeId>,
    current: Option<usize>,
}

impl SearchState {
    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn matches(&self) -> &[NodeId] {
        &self.matches
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    pub fn current(&self) -> Option<&NodeId> {
        self.current.and_then(|idx| self.matches.get(idx))
    }

    pub fn is_active(&self) -> bool {
        !self.query.is_empty()
    }

    pub fn set_results(&mut self, query: &str, matches: Vec<NodeId>) {
        self.query = query.trim().to_string();
        self.current = if matches.is_empty() { None } else { Some(0) };
        self.matches = matches;
    }

    pub fn clear(&mut self) {
        self.query.clear();
        self.matches.clear();
        self.current = None;
    }

    pub fn next(&mut self) -> Option<&NodeId> {
        if self.matches.is_empty() {
            return None;
        }
        let next = match self.current {
            Some(idx) => (idx + 1) % self.matches.len(),
            None => 0,
        };
        self.current = Some(next);
        self.matches.get(next)
    }

    pub fn previous(&mut self) -> Option<&NodeId> {
        if self.matches.is_empty() {
            return None;
        }
        let len = self.matches.len();
        let previous = match self.current {
            Some(idx) => (idx + len - 1) % len,
            None => len - 1,
        };
        self.current = Some(previous);
        self.matches.get(previous)
    }

    /// Moves the cursor onto `id` if it is one of the matches.
    pub fn select(&mut self, id: &str) -> bool {
        match self.matches.iter().position(|m| m.as_str() == id) {
            Some(idx) => {
                self.current = Some(idx);
                true
            }
            None => false,
        }
    }

    /// Drops matches that no longer exist, keeping the cursor on the same match when
    /// possible.
    pub fn retain_existing(&mut self, store: &NodeStore) {
        let current = self.current().cloned();
        self.matches.retain(|id| store.contains(id.as_str()));
        self.current = if self.matches.is_empty() {
            None
        } else {
            let position = current.and_then(|id| self.matches.iter().position(|m| *m == id));
            Some(position.unwrap_or(0))
        };
    }
}
