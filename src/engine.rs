use crate::config::{EngineConfig, LayoutMetrics};
use crate::cycle::{acyclic_parents, would_create_cycle};
use crate::error::Result;
use crate::layout;
use crate::model::{NewNode, Node, NodeId, NodeUpdate};
use crate::search::{SearchState, find_matches};
use crate::snapshot::{SNAPSHOT_VERSION, Snapshot, SnapshotNode, parse_snapshot};
use crate::store::NodeStore;
use crate::undo::{Clock, Relink, SystemClock, UndoBuffer};
use crate::viewport::{self, Camera, ViewportSize};
use crate::visibility::{self, CollapseSet};
use chrono::{DateTime, Utc};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::fmt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddOptions {
    /// Skip layout; the caller flushes a global layout later.
    pub defer_layout: bool,
    pub activate: bool,
}

impl AddOptions {
    pub fn deferred() -> Self {
        Self {
            defer_layout: true,
            ..Default::default()
        }
    }

    pub fn activated() -> Self {
        Self {
            activate: true,
            ..Default::default()
        }
    }
}

/// Notification sent to subscribers after a mutating call has finished.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphChange {
    NodesAdded(Vec<NodeId>),
    NodesUpdated(Vec<NodeId>),
    NodesRemoved(Vec<NodeId>),
    NodesRestored(Vec<NodeId>),
    ConnectionChanged {
        parent: NodeId,
        child: NodeId,
        added: bool,
    },
    LayoutChanged,
    ActiveChanged(Option<NodeId>),
    CollapseChanged(Vec<NodeId>),
    SearchChanged,
    Reset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Box<dyn FnMut(&GraphChange)>;

/// A branching conversation: the node DAG, its layout, collapse and search state, and
/// a one-slot undo for deletions. Single writer, fully synchronous.
pub struct ConversationGraph {
    store: NodeStore,
    config: EngineConfig,
    metrics: LayoutMetrics,
    collapse: CollapseSet,
    search: SearchState,
    undo: UndoBuffer,
    clock: Box<dyn Clock>,
    active: Option<NodeId>,
    layout_pending: bool,
    title: Option<String>,
    created_at: DateTime<Utc>,
    listeners: Vec<(ListenerId, Listener)>,
    next_listener: u64,
}

impl fmt::Debug for ConversationGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversationGraph")
            .field("nodes", &self.store.len())
            .field("active", &self.active)
            .field("collapsed", &self.collapse.len())
            .field("search", &self.search)
            .field("layout_pending", &self.layout_pending)
            .field("title", &self.title)
            .finish()
    }
}

impl Default for ConversationGraph {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl ConversationGraph {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }

    pub fn with_clock(config: EngineConfig, clock: impl Clock + 'static) -> Self {
        Self {
            store: NodeStore::new(),
            metrics: config.layout_metrics(),
            undo: UndoBuffer::new(config.undo_window()),
            config,
            collapse: CollapseSet::default(),
            search: SearchState::default(),
            clock: Box::new(clock),
            active: None,
            layout_pending: false,
            title: None,
            created_at: Utc::now(),
            listeners: Vec::new(),
            next_listener: 0,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn metrics(&self) -> &LayoutMetrics {
        &self.metrics
    }

    pub fn store(&self) -> &NodeStore {
        &self.store
    }

    pub fn nodes(&self) -> &[Node] {
        self.store.nodes()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Node> {
        self.store.get(id)
    }

    pub fn active_node_id(&self) -> Option<&NodeId> {
        self.active.as_ref()
    }

    pub fn collapsed_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.collapse.ids()
    }

    pub fn search_matches(&self) -> &[NodeId] {
        self.search.matches()
    }

    pub fn search_state(&self) -> &SearchState {
        &self.search
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn set_title(&mut self, title: Option<String>) {
        self.title = title;
    }

    pub fn is_layout_pending(&self) -> bool {
        self.layout_pending
    }

    pub fn subscribe(&mut self, listener: impl FnMut(&GraphChange) + 'static) -> ListenerId {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(listener, _)| *listener != id);
        self.listeners.len() != before
    }

    fn emit(&mut self, change: GraphChange) {
        for (_, listener) in self.listeners.iter_mut() {
            listener(&change);
        }
    }

    // Mutation

    pub fn add_node(&mut self, new: NewNode, options: AddOptions) -> Option<NodeId> {
        let auto_position = new.position.is_none();
        let mut node = new.into_node();
        if self.store.contains(node.id.as_str()) {
            tracing::debug!(node = %node.id, "add ignored: id already present");
            return None;
        }
        let primary = node.primary_parent().cloned();
        if let Some(primary) = &primary
            && !self.store.contains(primary.as_str())
        {
            tracing::debug!(node = %node.id, parent = %primary, "add ignored: unknown parent");
            return None;
        }
        let accepted = acyclic_parents(&self.store, node.id.as_str(), &node.parent_ids);
        if primary.is_some() && accepted.first() != primary.as_ref() {
            tracing::debug!(node = %node.id, "add ignored: parent edge would close a cycle");
            return None;
        }
        node.parent_ids = accepted;
        let id = node.id.clone();
        self.store.add(node);
        tracing::debug!(node = %id, parent = ?primary, "node added");

        if options.defer_layout {
            self.layout_pending = true;
        } else {
            match &primary {
                Some(parent) => {
                    layout::layout_children(&mut self.store, parent.as_str(), &self.metrics);
                }
                None => {
                    if auto_position {
                        self.place_new_root(&id);
                    }
                    layout::layout_children(&mut self.store, id.as_str(), &self.metrics);
                }
            }
        }
        self.refresh_search();
        self.emit(GraphChange::NodesAdded(vec![id.clone()]));
        if !options.defer_layout {
            self.emit(GraphChange::LayoutChanged);
        }
        if options.activate {
            self.set_active(Some(id.clone()));
        }
        Some(id)
    }

    /// Adds a batch whose entries may reference each other as parents in any order.
    pub fn add_nodes(&mut self, batch: Vec<NewNode>, options: AddOptions) -> Vec<NodeId> {
        let ordered = topological_order(batch.into_iter().map(NewNode::into_node).collect());
        let mut added = Vec::with_capacity(ordered.len());
        for mut node in ordered {
            if self.store.contains(node.id.as_str()) {
                tracing::warn!(node = %node.id, "bulk add skipped duplicate id");
                continue;
            }
            if let Some(primary) = node.primary_parent()
                && !self.store.contains(primary.as_str())
            {
                tracing::warn!(node = %node.id, parent = %primary, "bulk add skipped node with unknown parent");
                continue;
            }
            let primary = node.primary_parent().cloned();
            let accepted = acyclic_parents(&self.store, node.id.as_str(), &node.parent_ids);
            if primary.is_some() && accepted.first() != primary.as_ref() {
                tracing::warn!(node = %node.id, "bulk add skipped node whose parent edge closes a cycle");
                continue;
            }
            node.parent_ids = accepted;
            added.push(node.id.clone());
            self.store.add(node);
        }
        self.store.rebuild_indexes();
        tracing::debug!(added = added.len(), "bulk add");

        if options.defer_layout {
            self.layout_pending = true;
        } else {
            self.flush_layout();
        }
        self.refresh_search();
        if !added.is_empty() {
            self.emit(GraphChange::NodesAdded(added.clone()));
        }
        if options.activate
            && let Some(last) = added.last()
        {
            self.set_active(Some(last.clone()));
        }
        added
    }

    pub fn update_node(&mut self, id: &str, update: NodeUpdate) -> bool {
        if update.is_empty() {
            return false;
        }
        let retyped = update.node_type.is_some();
        let Some(node) = self.store.get_mut(id) else {
            return false;
        };
        update.apply(node);
        let node_id = node.id.clone();
        let parent = node.primary_parent().cloned();
        if retyped && let Some(parent) = parent {
            layout::layout_children(&mut self.store, parent.as_str(), &self.metrics);
        }
        self.refresh_search();
        self.emit(GraphChange::NodesUpdated(vec![node_id]));
        true
    }

    /// Records a measured height. Re-layout is coalesced until
    /// [`ConversationGraph::flush_pending_layout`].
    pub fn update_node_height(&mut self, id: &str, height_px: f64) -> bool {
        if !height_px.is_finite() || height_px < 0.0 {
            return false;
        }
        let Some(node) = self.store.get_mut(id) else {
            return false;
        };
        if node
            .position
            .height
            .is_some_and(|current| (current - height_px).abs() < 0.5)
        {
            return false;
        }
        node.position.height = Some(height_px);
        let node_id = node.id.clone();
        self.layout_pending = true;
        self.emit(GraphChange::NodesUpdated(vec![node_id]));
        true
    }

    /// Runs the coalesced layout if one is pending. Call once per frame.
    pub fn flush_pending_layout(&mut self) -> bool {
        if !self.layout_pending {
            return false;
        }
        self.flush_layout();
        true
    }

    pub fn flush_layout(&mut self) {
        layout::flush_layout_from_roots(&mut self.store, &self.metrics);
        self.layout_pending = false;
        self.emit(GraphChange::LayoutChanged);
    }

    pub fn layout_children(&mut self, parent_id: &str) -> bool {
        if !self.store.contains(parent_id) {
            return false;
        }
        layout::layout_children(&mut self.store, parent_id, &self.metrics);
        self.emit(GraphChange::LayoutChanged);
        true
    }

    pub fn delete_node(&mut self, id: &str) -> bool {
        let Some(node) = self.store.get(id) else {
            return false;
        };
        let doomed = HashSet::from([node.id.clone()]);
        self.remove_nodes(doomed) > 0
    }

    /// Deletes exactly the listed nodes as one undoable step.
    pub fn delete_nodes(&mut self, ids: &[NodeId]) -> usize {
        let doomed: HashSet<NodeId> = ids
            .iter()
            .filter(|id| self.store.contains(id.as_str()))
            .cloned()
            .collect();
        self.remove_nodes(doomed)
    }

    /// Deletes `id` and every node linked below it through any parent edge, primary
    /// or not.
    pub fn delete_node_and_descendants(&mut self, id: &str) -> usize {
        let Some(root) = self.store.get(id) else {
            return 0;
        };
        let mut linked_children: HashMap<&str, Vec<&NodeId>> = HashMap::new();
        for node in self.store.nodes() {
            for parent in &node.parent_ids {
                linked_children.entry(parent.as_str()).or_default().push(&node.id);
            }
        }
        let mut doomed: HashSet<NodeId> = HashSet::from([root.id.clone()]);
        let mut queue: VecDeque<&str> = VecDeque::from([root.id.as_str()]);
        while let Some(current) = queue.pop_front() {
            for child in linked_children.get(current).into_iter().flatten() {
                if doomed.insert((*child).clone()) {
                    queue.push_back(child.as_str());
                }
            }
        }
        self.remove_nodes(doomed)
    }

    fn remove_nodes(&mut self, doomed: HashSet<NodeId>) -> usize {
        if doomed.is_empty() {
            return 0;
        }
        let previous_active = self.active.clone();

        // Survivors pointing at doomed nodes lose those edges; one left without any
        // parent is re-attached to the nearest surviving primary ancestor.
        let mut relinked: Vec<Relink> = Vec::new();
        for node in self.store.nodes() {
            if doomed.contains(&node.id) || !node.parent_ids.iter().any(|p| doomed.contains(p)) {
                continue;
            }
            let mut kept: Vec<NodeId> = node
                .parent_ids
                .iter()
                .filter(|p| !doomed.contains(*p))
                .cloned()
                .collect();
            if kept.is_empty()
                && let Some(anchor) = self.surviving_ancestor(node.primary_parent(), &doomed)
            {
                kept.push(anchor);
            }
            relinked.push(Relink {
                id: node.id.clone(),
                original: node.parent_ids.clone(),
                rewritten: kept,
            });
        }
        let next_active = match &self.active {
            Some(active) if doomed.contains(active) => {
                let start = self.store.get(active.as_str()).and_then(|n| n.primary_parent());
                Some(self.surviving_ancestor(start, &doomed))
            }
            _ => None,
        };

        for relink in &relinked {
            if let Some(node) = self.store.get_mut(relink.id.as_str()) {
                node.parent_ids = relink.rewritten.clone();
            }
        }
        let removed = self.store.retain(|node| !doomed.contains(&node.id));
        let removed_ids: Vec<NodeId> = removed.iter().map(|node| node.id.clone()).collect();
        tracing::debug!(
            removed = removed.len(),
            relinked = relinked.len(),
            "nodes deleted"
        );

        self.collapse.retain_existing(&self.store);
        self.search.retain_existing(&self.store);
        let now = self.clock.now();
        self.undo.record(removed, previous_active, relinked, now);

        self.flush_layout();
        self.emit(GraphChange::NodesRemoved(removed_ids.clone()));
        if let Some(next) = next_active {
            self.set_active(next);
        }
        removed_ids.len()
    }

    fn surviving_ancestor(&self, start: Option<&NodeId>, doomed: &HashSet<NodeId>) -> Option<NodeId> {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut current = start;
        while let Some(id) = current {
            if !visited.insert(id.as_str()) {
                return None;
            }
            let node = self.store.get(id.as_str())?;
            if !doomed.contains(&node.id) {
                return Some(node.id.clone());
            }
            current = node.primary_parent();
        }
        None
    }

    /// Re-inserts the most recent deletion if it is still inside the undo window.
    /// The buffer is consumed either way.
    pub fn restore(&mut self) -> bool {
        let now = self.clock.now();
        let Some(batch) = self.undo.take(now) else {
            tracing::debug!("nothing to restore");
            return false;
        };

        let mut restored: Vec<NodeId> = Vec::with_capacity(batch.nodes.len());
        let mut wanted: Vec<(NodeId, Vec<NodeId>)> = Vec::with_capacity(batch.nodes.len());
        for mut node in batch.nodes {
            if self.store.contains(node.id.as_str()) {
                continue;
            }
            wanted.push((node.id.clone(), std::mem::take(&mut node.parent_ids)));
            restored.push(node.id.clone());
            self.store.push_unindexed(node);
        }
        self.store.rebuild_indexes();
        // Edges are re-added one node at a time so each is cycle-checked.
        for (id, parents) in wanted {
            let accepted = acyclic_parents(&self.store, id.as_str(), &parents);
            if let Some(node) = self.store.get_mut(id.as_str()) {
                node.parent_ids = accepted;
            }
        }
        // Survivors keep edits made since the delete.
        for relink in batch.relinked {
            let Some(current) = self.store.get(relink.id.as_str()) else {
                continue;
            };
            if current.parent_ids != relink.rewritten {
                tracing::debug!(node = %relink.id, "survivor edited since delete; merging parents");
            }
            let candidates = relink.restored_parents(&current.parent_ids);
            let accepted = acyclic_parents(&self.store, relink.id.as_str(), &candidates);
            if accepted.is_empty() {
                continue;
            }
            if let Some(node) = self.store.get_mut(relink.id.as_str()) {
                node.parent_ids = accepted;
            }
        }
        self.store.rebuild_indexes();
        tracing::debug!(restored = restored.len(), "deletion restored");

        self.flush_layout();
        self.refresh_search();
        self.emit(GraphChange::NodesRestored(restored));
        if let Some(previous) = batch.previous_active
            && self.store.contains(previous.as_str())
        {
            self.set_active(Some(previous));
        }
        true
    }

    /// Whether [`ConversationGraph::restore`] would currently succeed.
    pub fn can_restore(&self) -> bool {
        self.undo.is_pending(self.clock.now())
    }

    /// Timer hook: drops the buffered deletion once its window has passed.
    pub fn expire_undo(&mut self) -> bool {
        let now = self.clock.now();
        self.undo.expire(now)
    }

    pub fn duplicate_node(&mut self, id: &str) -> Option<NodeId> {
        let source = self.store.get(id)?;
        let mut copy = source.clone();
        copy.id = NodeId::generate();
        copy.created_at = Utc::now();
        copy.position.x = 0.0;
        copy.position.y = 0.0;
        copy.position.manual = false;
        let copy_id = copy.id.clone();
        let parent = copy.primary_parent().cloned();
        if !self.store.add(copy) {
            return None;
        }
        match &parent {
            Some(parent) => {
                layout::layout_children(&mut self.store, parent.as_str(), &self.metrics);
            }
            None => self.place_new_root(&copy_id),
        }
        tracing::debug!(source = id, copy = %copy_id, "node duplicated");
        self.refresh_search();
        self.emit(GraphChange::NodesAdded(vec![copy_id.clone()]));
        self.emit(GraphChange::LayoutChanged);
        Some(copy_id)
    }

    /// Shifts a node and its whole primary subtree by a pixel delta and pins the node.
    pub fn move_node_and_descendants(&mut self, id: &str, dx_px: f64, dy_px: f64) -> bool {
        if !dx_px.is_finite() || !dy_px.is_finite() {
            return false;
        }
        let Some(node) = self.store.get(id) else {
            return false;
        };
        let mut moved = vec![node.id.clone()];
        moved.extend(visibility::primary_subtree(&self.store, id));
        let dx = self.metrics.px_to_grid(dx_px);
        let dy = self.metrics.px_to_grid(dy_px);
        for moved_id in &moved {
            if let Some(node) = self.store.get_mut(moved_id.as_str()) {
                node.position.x += dx;
                node.position.y += dy;
            }
        }
        if let Some(node) = self.store.get_mut(id) {
            node.position.manual = true;
        }
        self.emit(GraphChange::NodesUpdated(moved));
        true
    }

    /// Pins a node at a grid position and re-lays out its children beneath it.
    pub fn set_node_position(&mut self, id: &str, x: f64, y: f64) -> bool {
        if !x.is_finite() || !y.is_finite() {
            return false;
        }
        let Some(node) = self.store.get_mut(id) else {
            return false;
        };
        node.position.x = x;
        node.position.y = y;
        node.position.manual = true;
        let node_id = node.id.clone();
        layout::layout_children(&mut self.store, id, &self.metrics);
        self.emit(GraphChange::NodesUpdated(vec![node_id]));
        self.emit(GraphChange::LayoutChanged);
        true
    }

    pub fn snap_node_to_grid(&mut self, id: &str) -> bool {
        let Some(node) = self.store.get_mut(id) else {
            return false;
        };
        node.position.x = node.position.x.round();
        node.position.y = node.position.y.round();
        let node_id = node.id.clone();
        self.emit(GraphChange::NodesUpdated(vec![node_id]));
        true
    }

    /// Hands a pinned node back to automatic layout.
    pub fn clear_manual_position(&mut self, id: &str) -> bool {
        let Some(node) = self.store.get_mut(id) else {
            return false;
        };
        if !node.position.manual {
            return false;
        }
        node.position.manual = false;
        let node_id = node.id.clone();
        let anchor = node.primary_parent().cloned().unwrap_or_else(|| node_id.clone());
        layout::layout_children(&mut self.store, anchor.as_str(), &self.metrics);
        self.emit(GraphChange::NodesUpdated(vec![node_id]));
        self.emit(GraphChange::LayoutChanged);
        true
    }

    /// Adds a secondary (or, for a parentless node, primary) parent edge.
    pub fn add_connection(&mut self, parent_id: &str, child_id: &str) -> bool {
        if !self.store.contains(parent_id) {
            return false;
        }
        let Some(child) = self.store.get(child_id) else {
            return false;
        };
        if child.has_parent(parent_id) || would_create_cycle(&self.store, parent_id, child_id) {
            return false;
        }
        let primary_changed = child.parent_ids.is_empty();
        let mut parents = child.parent_ids.clone();
        let parent = NodeId::from(parent_id);
        let child = child.id.clone();
        parents.push(parent.clone());
        self.store.set_parents(child_id, parents);
        tracing::debug!(parent = parent_id, child = child_id, primary_changed, "connection added");
        if primary_changed {
            self.flush_layout();
        }
        self.emit(GraphChange::ConnectionChanged {
            parent,
            child,
            added: true,
        });
        true
    }

    pub fn remove_connection(&mut self, parent_id: &str, child_id: &str) -> bool {
        let Some(child) = self.store.get(child_id) else {
            return false;
        };
        if !child.has_parent(parent_id) {
            return false;
        }
        let primary_changed = child.primary_parent().is_some_and(|p| p.as_str() == parent_id);
        let parents: Vec<NodeId> = child
            .parent_ids
            .iter()
            .filter(|p| p.as_str() != parent_id)
            .cloned()
            .collect();
        let child = child.id.clone();
        self.store.set_parents(child_id, parents);
        tracing::debug!(parent = parent_id, child = child_id, primary_changed, "connection removed");
        if primary_changed {
            self.flush_layout();
        }
        self.emit(GraphChange::ConnectionChanged {
            parent: NodeId::from(parent_id),
            child,
            added: false,
        });
        true
    }

    pub fn set_active_node(&mut self, id: Option<&str>) -> bool {
        let next = match id {
            Some(id) => match self.store.get(id) {
                Some(node) => Some(node.id.clone()),
                None => return false,
            },
            None => None,
        };
        self.set_active(next);
        true
    }

    fn set_active(&mut self, next: Option<NodeId>) {
        if self.active == next {
            return;
        }
        self.active = next.clone();
        self.emit(GraphChange::ActiveChanged(next));
    }

    pub fn clear(&mut self) {
        self.store.clear();
        self.collapse.clear();
        self.search.clear();
        self.undo.clear();
        self.active = None;
        self.layout_pending = false;
        self.emit(GraphChange::Reset);
    }

    /// New roots without an explicit position go to the right of everything else.
    /// Thoughts are never positioned.
    fn place_new_root(&mut self, id: &NodeId) {
        if self.store.get(id.as_str()).is_none_or(|node| node.is_thought()) {
            return;
        }
        let others = self
            .store
            .nodes()
            .iter()
            .filter(|node| node.id != *id && !node.is_thought())
            .map(|node| layout::node_rect(node, &self.metrics))
            .reduce(|acc, rect| acc.union(&rect));
        let Some(bounds) = others else {
            return;
        };
        let x = (bounds.max_x / self.metrics.grid_step).ceil() + self.metrics.gap_x;
        let y = (bounds.min_y / self.metrics.grid_step).round();
        if let Some(node) = self.store.get_mut(id.as_str()) {
            node.position.x = x;
            node.position.y = y;
        }
    }

    // Collapse

    /// Returns the new collapsed state, or `None` for an unknown id.
    pub fn toggle_collapse(&mut self, id: &str) -> Option<bool> {
        let node_id = self.store.get(id)?.id.clone();
        let collapsed = self.collapse.toggle(&node_id);
        self.emit(GraphChange::CollapseChanged(vec![node_id]));
        Some(collapsed)
    }

    pub fn set_collapsed(&mut self, id: &str, collapsed: bool) -> bool {
        let Some(node) = self.store.get(id) else {
            return false;
        };
        let node_id = node.id.clone();
        let changed = self.collapse.set(&node_id, collapsed);
        if changed {
            self.emit(GraphChange::CollapseChanged(vec![node_id]));
        }
        changed
    }

    pub fn expand_all(&mut self) {
        let expanded: Vec<NodeId> = self.collapse.ids().cloned().collect();
        if expanded.is_empty() {
            return;
        }
        self.collapse.clear();
        self.emit(GraphChange::CollapseChanged(expanded));
    }

    pub fn is_collapsed(&self, id: &str) -> bool {
        self.collapse.is_collapsed(id)
    }

    pub fn is_in_collapsed_subtree(&self, id: &str) -> bool {
        self.collapse.is_in_collapsed_subtree(&self.store, id)
    }

    pub fn hidden_descendant_count(&self, id: &str) -> usize {
        self.collapse.hidden_descendant_count(&self.store, id)
    }

    pub fn descendant_count(&self, id: &str) -> usize {
        visibility::descendant_count(&self.store, id)
    }

    // Search

    /// Runs a search, expands collapsed ancestors of every match and points the
    /// cursor at the first one.
    pub fn search(&mut self, query: &str) -> &[NodeId] {
        if query.trim().is_empty() {
            self.clear_search();
            return self.search.matches();
        }
        let matches = find_matches(&self.store, query);
        let mut expanded = Vec::new();
        for id in &matches {
            expanded.extend(self.collapse.expand_ancestors(&self.store, id.as_str()));
        }
        tracing::debug!(query, matches = matches.len(), expanded = expanded.len(), "search");
        self.search.set_results(query, matches);
        if !expanded.is_empty() {
            self.emit(GraphChange::CollapseChanged(expanded));
        }
        self.emit(GraphChange::SearchChanged);
        self.search.matches()
    }

    pub fn next_search_match(&mut self) -> Option<NodeId> {
        let next = self.search.next().cloned();
        if next.is_some() {
            self.emit(GraphChange::SearchChanged);
        }
        next
    }

    pub fn previous_search_match(&mut self) -> Option<NodeId> {
        let previous = self.search.previous().cloned();
        if previous.is_some() {
            self.emit(GraphChange::SearchChanged);
        }
        previous
    }

    pub fn current_search_match(&self) -> Option<&NodeId> {
        self.search.current()
    }

    pub fn clear_search(&mut self) {
        let had_query = self.search.is_active() || !self.search.matches().is_empty();
        self.search.clear();
        if had_query {
            self.emit(GraphChange::SearchChanged);
        }
    }

    /// Recomputes matches for the active query after content changed, keeping the
    /// cursor on the same node when it still matches.
    fn refresh_search(&mut self) {
        if !self.search.is_active() {
            return;
        }
        let current = self.search.current().cloned();
        let query = self.search.query().to_string();
        let matches = find_matches(&self.store, &query);
        if matches.as_slice() == self.search.matches() {
            return;
        }
        self.search.set_results(&query, matches);
        if let Some(current) = current {
            self.search.select(current.as_str());
        }
        self.emit(GraphChange::SearchChanged);
    }

    // Navigation over the primary-parent forest; thought nodes are skipped.

    pub fn children(&self, id: &str) -> Vec<&Node> {
        self.store
            .children_of(Some(id))
            .into_iter()
            .filter(|node| !node.is_thought())
            .collect()
    }

    pub fn roots(&self) -> Vec<&Node> {
        self.store
            .layout_roots()
            .iter()
            .filter_map(|id| self.store.get(id.as_str()))
            .filter(|node| !node.is_thought())
            .collect()
    }

    /// The node's row, itself included, in insertion order.
    pub fn siblings(&self, id: &str) -> Vec<&Node> {
        let Some(node) = self.store.get(id) else {
            return Vec::new();
        };
        match node.primary_parent() {
            Some(parent) if self.store.contains(parent.as_str()) => self.children(parent.as_str()),
            _ => self.roots(),
        }
    }

    pub fn depth(&self, id: &str) -> Option<usize> {
        self.store.get(id)?;
        Some(visibility::primary_ancestors(&self.store, id).len())
    }

    /// Deepest level of the primary forest, roots at 0.
    pub fn max_depth(&self) -> usize {
        let mut deepest = 0;
        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<(&Node, usize)> = self.roots().into_iter().map(|n| (n, 0)).collect();
        while let Some((node, depth)) = queue.pop_front() {
            if !visited.insert(node.id.as_str()) {
                continue;
            }
            deepest = deepest.max(depth);
            for child in self.children(node.id.as_str()) {
                queue.push_back((child, depth + 1));
            }
        }
        deepest
    }

    /// Primary chain from the root down to `id`, inclusive.
    pub fn ancestor_path(&self, id: &str) -> Vec<NodeId> {
        let Some(node) = self.store.get(id) else {
            return Vec::new();
        };
        let mut path = visibility::primary_ancestors(&self.store, id);
        path.reverse();
        path.push(node.id.clone());
        path
    }

    /// Follows the newest non-thought child until reaching a leaf.
    pub fn follow_to_leaf(&self, id: &str) -> Option<NodeId> {
        let mut current = self.store.get(id)?;
        let mut visited: HashSet<&str> = HashSet::from([current.id.as_str()]);
        while let Some(next) = self.children(current.id.as_str()).pop() {
            if !visited.insert(next.id.as_str()) {
                break;
            }
            current = next;
        }
        Some(current.id.clone())
    }

    // Viewport

    pub fn visible_node_ids(&self, camera: Camera, viewport: ViewportSize) -> Vec<NodeId> {
        viewport::visible_node_ids(
            &self.store,
            &self.collapse,
            &self.metrics,
            camera,
            viewport,
            self.config.viewport_buffer,
        )
    }

    // Persistence

    pub fn to_snapshot(&self) -> Snapshot {
        Snapshot {
            version: SNAPSHOT_VERSION,
            created_at: self.created_at,
            title: self.title.clone(),
            active_node_id: self.active.clone(),
            nodes: self.store.nodes().iter().map(SnapshotNode::from).collect(),
        }
    }

    /// Builds a graph from a validated snapshot. Unknown parent references and edges
    /// that would close a cycle are dropped.
    pub fn from_snapshot(snapshot: Snapshot, config: EngineConfig) -> Self {
        let mut graph = Self::new(config);
        graph.load_snapshot(snapshot);
        graph
    }

    pub fn from_snapshot_json(text: &str, config: EngineConfig) -> Result<Self> {
        let snapshot = parse_snapshot(text)?;
        Ok(Self::from_snapshot(snapshot, config))
    }

    /// Replaces the whole graph with the snapshot contents.
    pub fn load_snapshot(&mut self, snapshot: Snapshot) {
        self.store.clear();
        self.collapse.clear();
        self.search.clear();
        self.undo.clear();
        self.layout_pending = false;

        let mut wanted: Vec<(NodeId, Vec<NodeId>)> = Vec::with_capacity(snapshot.nodes.len());
        let mut seen: HashSet<NodeId> = HashSet::new();
        for entry in snapshot.nodes {
            let mut node = entry.into_node();
            if !seen.insert(node.id.clone()) {
                continue;
            }
            wanted.push((node.id.clone(), std::mem::take(&mut node.parent_ids)));
            self.store.push_unindexed(node);
        }
        self.store.rebuild_indexes();
        let mut dropped = 0usize;
        for (id, parents) in wanted {
            let accepted = acyclic_parents(&self.store, id.as_str(), &parents);
            dropped += parents.len() - accepted.len();
            if let Some(node) = self.store.get_mut(id.as_str()) {
                node.parent_ids = accepted;
            }
        }
        if dropped > 0 {
            tracing::warn!(dropped, "snapshot edges dropped (unknown parent or cycle)");
        }
        self.store.rebuild_indexes();

        self.title = snapshot.title;
        self.created_at = snapshot.created_at;
        self.active = snapshot
            .active_node_id
            .filter(|id| self.store.contains(id.as_str()));
        tracing::debug!(nodes = self.store.len(), "snapshot loaded");
        self.emit(GraphChange::Reset);
    }
}

/// Orders a batch so in-batch parents precede their children. Ready nodes keep their
/// input order; nodes on an in-batch cycle are dropped.
fn topological_order(nodes: Vec<Node>) -> Vec<Node> {
    let mut position: HashMap<NodeId, usize> = HashMap::with_capacity(nodes.len());
    for (idx, node) in nodes.iter().enumerate() {
        position.entry(node.id.clone()).or_insert(idx);
    }
    let mut pending = vec![0usize; nodes.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    for (idx, node) in nodes.iter().enumerate() {
        for parent in &node.parent_ids {
            if let Some(&parent_idx) = position.get(parent.as_str())
                && parent_idx != idx
            {
                pending[idx] += 1;
                dependents[parent_idx].push(idx);
            }
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = pending
        .iter()
        .enumerate()
        .filter(|(_, count)| **count == 0)
        .map(|(idx, _)| Reverse(idx))
        .collect();
    let mut order = Vec::with_capacity(nodes.len());
    while let Some(Reverse(idx)) = ready.pop() {
        order.push(idx);
        for &dependent in &dependents[idx] {
            pending[dependent] -= 1;
            if pending[dependent] == 0 {
                ready.push(Reverse(dependent));
            }
        }
    }
    if order.len() < nodes.len() {
        tracing::warn!(
            dropped = nodes.len() - order.len(),
            "bulk add dropped nodes on a parent cycle"
        );
    }

    let mut slots: Vec<Option<Node>> = nodes.into_iter().map(Some).collect();
    order
        .into_iter()
        .filter_map(|idx| slots[idx].take())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::undo::ManualClock;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;

    fn reply(id: &str, parent: &str) -> NewNode {
        NewNode::new("user", id).with_id(id).with_parent(parent)
    }

    fn root(id: &str) -> NewNode {
        NewNode::new("user", id).with_id(id)
    }

    fn graph() -> ConversationGraph {
        let mut graph = ConversationGraph::default();
        graph.add_node(root("r"), AddOptions::default());
        graph.add_node(reply("a", "r"), AddOptions::default());
        graph.add_node(reply("b", "a"), AddOptions::default());
        graph.add_node(reply("c", "a"), AddOptions::default());
        graph
    }

    #[test]
    fn topological_order_puts_parents_first() {
        let nodes = vec![
            reply("c", "b").into_node(),
            reply("b", "a").into_node(),
            root("a").into_node(),
            root("z").into_node(),
        ];
        let ids: Vec<String> = topological_order(nodes)
            .into_iter()
            .map(|n| n.id.to_string())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c", "z"]);
    }

    #[test]
    fn topological_order_drops_batch_cycles() {
        let nodes = vec![reply("x", "y").into_node(), reply("y", "x").into_node(), root("ok").into_node()];
        let ids: Vec<String> = topological_order(nodes)
            .into_iter()
            .map(|n| n.id.to_string())
            .collect();
        assert_eq!(ids, vec!["ok"]);
    }

    #[test]
    fn single_delete_reattaches_orphans_to_grandparent() {
        let mut graph = graph();
        assert!(graph.delete_node("a"));
        assert_eq!(graph.get("b").unwrap().parent_ids, vec![NodeId::from("r")]);
        assert_eq!(graph.get("c").unwrap().parent_ids, vec![NodeId::from("r")]);
        assert!(graph.restore());
        assert_eq!(graph.get("b").unwrap().parent_ids, vec![NodeId::from("a")]);
        assert_eq!(graph.children("a").len(), 2);
        graph.store().assert_consistent();
    }

    #[test]
    fn active_follows_nearest_surviving_ancestor() {
        let mut graph = graph();
        graph.set_active_node(Some("b"));
        graph.delete_node_and_descendants("a");
        assert_eq!(graph.active_node_id(), Some(&NodeId::from("r")));
        assert!(graph.restore());
        assert_eq!(graph.active_node_id(), Some(&NodeId::from("b")));
    }

    #[test]
    fn listeners_see_changes_in_order() {
        let seen: Rc<RefCell<Vec<GraphChange>>> = Rc::default();
        let mut graph = ConversationGraph::default();
        let sink = Rc::clone(&seen);
        let listener = graph.subscribe(move |change| sink.borrow_mut().push(change.clone()));
        graph.add_node(root("r"), AddOptions::activated());
        assert_eq!(
            seen.borrow().as_slice(),
            &[
                GraphChange::NodesAdded(vec![NodeId::from("r")]),
                GraphChange::LayoutChanged,
                GraphChange::ActiveChanged(Some(NodeId::from("r"))),
            ]
        );
        assert!(graph.unsubscribe(listener));
        graph.add_node(reply("a", "r"), AddOptions::default());
        assert_eq!(seen.borrow().len(), 3);
    }

    #[test]
    fn height_updates_coalesce_into_one_layout() {
        let mut graph = graph();
        let layouts = Rc::new(RefCell::new(0));
        let counter = Rc::clone(&layouts);
        graph.subscribe(move |change| {
            if *change == GraphChange::LayoutChanged {
                *counter.borrow_mut() += 1;
            }
        });
        assert!(graph.update_node_height("a", 300.0));
        assert!(graph.update_node_height("b", 200.0));
        assert!(!graph.update_node_height("b", 200.2));
        assert_eq!(*layouts.borrow(), 0);
        assert!(graph.flush_pending_layout());
        assert!(!graph.flush_pending_layout());
        assert_eq!(*layouts.borrow(), 1);
        // a is 15 grid units tall now, so its children sit below that.
        assert_eq!(graph.get("b").unwrap().position.y, graph.get("a").unwrap().position.y + 15.0 + 3.0);
    }

    #[test]
    fn new_roots_are_placed_beside_existing_trees() {
        let mut graph = graph();
        graph.add_node(root("r2"), AddOptions::default());
        let r2 = graph.get("r2").unwrap().position;
        let widest = graph
            .nodes()
            .iter()
            .filter(|n| n.id.as_str() != "r2")
            .map(|n| n.position.x + graph.metrics().node_width)
            .fold(f64::MIN, f64::max);
        assert!(r2.x >= widest);
        assert!(!r2.manual);
    }

    #[test]
    fn restore_respects_injected_clock() {
        let clock = ManualClock::new();
        let mut graph = ConversationGraph::with_clock(EngineConfig::default(), clock.clone());
        graph.add_node(root("r"), AddOptions::default());
        graph.delete_node("r");
        assert!(graph.can_restore());
        clock.advance(Duration::from_secs(31));
        assert!(!graph.can_restore());
        assert!(graph.expire_undo());
        assert!(!graph.restore());
        assert!(graph.is_empty());
    }

    #[test]
    fn retyping_to_thought_frees_layout_space() {
        let mut graph = graph();
        let before = graph.get("b").unwrap().position.x;
        assert!(graph.update_node(
            "c",
            NodeUpdate {
                node_type: Some(crate::model::THOUGHT_TYPE.to_string()),
                ..Default::default()
            }
        ));
        let after = graph.get("b").unwrap().position.x;
        assert!(before < after);
        assert_eq!(after, graph.get("a").unwrap().position.x);
    }

    #[test]
    fn search_refreshes_after_edits() {
        let mut graph = graph();
        graph.search("zebra");
        assert!(graph.search_matches().is_empty());
        graph.update_node("c", NodeUpdate::content("a zebra appears"));
        assert_eq!(graph.search_matches(), &[NodeId::from("c")]);
        assert_eq!(graph.current_search_match(), Some(&NodeId::from("c")));
    }
}
