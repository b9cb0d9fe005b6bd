use std::collections::HashSet;
use std::sync::{Arc, Mutex, RwLock, Weak};

use futures::future::BoxFuture;
use tracing::{debug, warn};

use carepath_core::event::EventBus;
use carepath_core::types::{
    ContextInfo, EngineEvent, NodeState, RunOutcome, Signal, StateInfo, TaskInfo,
};

use crate::enrich::EnrichmentCache;
use crate::signal::SignalSlots;

const VIRTUAL_ROOT_NAME: &str = "__root__";

/// A single task in the execution tree.
///
/// Owns its children in resolved order, keeps a weak back-reference to its
/// parent, and runs the navigation loop: announce itself on the event bus,
/// park until a signal arrives, then descend, advance, or unwind.
pub struct ExecNode {
    info: TaskInfo,
    context: ContextInfo,
    is_virtual_root: bool,
    self_ref: Weak<ExecNode>,
    parent: RwLock<Weak<ExecNode>>,
    children: RwLock<Vec<Arc<ExecNode>>>,
    /// Sibling names this node must precede; kept for path search.
    follower_names: RwLock<Vec<String>>,
    /// Index of the child currently running a drill-down, if any.
    active_child: RwLock<Option<usize>>,
    state: Mutex<NodeState>,
    signals: SignalSlots,
    events: Arc<EventBus>,
    enrichment: Arc<EnrichmentCache>,
}

impl ExecNode {
    pub fn new(
        info: TaskInfo,
        context: ContextInfo,
        events: Arc<EventBus>,
        enrichment: Arc<EnrichmentCache>,
    ) -> Arc<Self> {
        Self::build(info, context, false, events, enrichment)
    }

    /// Synthetic container giving multiple top-level trees one entry
    /// point. Never shown and never run.
    pub fn virtual_root(events: Arc<EventBus>, enrichment: Arc<EnrichmentCache>) -> Arc<Self> {
        Self::build(
            TaskInfo::new(VIRTUAL_ROOT_NAME, "virtual root"),
            ContextInfo::default(),
            true,
            events,
            enrichment,
        )
    }

    fn build(
        info: TaskInfo,
        context: ContextInfo,
        is_virtual_root: bool,
        events: Arc<EventBus>,
        enrichment: Arc<EnrichmentCache>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            info,
            context,
            is_virtual_root,
            self_ref: self_ref.clone(),
            parent: RwLock::new(Weak::new()),
            children: RwLock::new(Vec::new()),
            follower_names: RwLock::new(Vec::new()),
            active_child: RwLock::new(None),
            state: Mutex::new(NodeState::Init),
            signals: SignalSlots::new(),
            events,
            enrichment,
        })
    }

    fn arc(&self) -> Arc<ExecNode> {
        // `self` is alive, so the self-reference always upgrades
        self.self_ref.upgrade().expect("node self-reference")
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn description(&self) -> &str {
        &self.info.description
    }

    pub fn info(&self) -> &TaskInfo {
        &self.info
    }

    pub fn context(&self) -> &ContextInfo {
        &self.context
    }

    pub fn is_virtual_root(&self) -> bool {
        self.is_virtual_root
    }

    pub fn state(&self) -> NodeState {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, state: NodeState) {
        *self.state.lock().unwrap() = state;
    }

    pub fn children(&self) -> Vec<Arc<ExecNode>> {
        self.children.read().unwrap().clone()
    }

    pub fn has_children(&self) -> bool {
        !self.children.read().unwrap().is_empty()
    }

    pub fn parent(&self) -> Option<Arc<ExecNode>> {
        self.parent.read().unwrap().upgrade()
    }

    pub fn follower_names(&self) -> Vec<String> {
        self.follower_names.read().unwrap().clone()
    }

    pub fn set_follower_names(&self, names: Vec<String>) {
        *self.follower_names.write().unwrap() = names;
    }

    /// Attach `children` in final order, wiring parent back-references.
    /// A child that already has an owner keeps it: a memo-reused node
    /// stays anchored to the parent that first built it.
    pub fn attach_children(&self, children: Vec<Arc<ExecNode>>) {
        for child in &children {
            let mut parent = child.parent.write().unwrap();
            if parent.upgrade().is_none() {
                *parent = self.self_ref.clone();
            }
        }
        *self.children.write().unwrap() = children;
    }

    /// Mark a signal pending on this node.
    pub fn raise(&self, signal: Signal) {
        self.signals.raise(signal);
    }

    /// Route a signal to whichever node in this subtree is currently
    /// awaiting one. While a drill-down is running a child, the child's
    /// subtree holds the waiter; otherwise this node does.
    pub fn deliver(&self, signal: Signal) {
        let active = *self.active_child.read().unwrap();
        if let Some(idx) = active {
            let child = self.children.read().unwrap().get(idx).cloned();
            if let Some(child) = child {
                child.deliver(signal);
                return;
            }
        }
        self.signals.raise(signal);
    }

    /// Whether a successor exists: false exactly for the last child of the
    /// virtual root, where advancing ends the whole flow. Nested last
    /// children still report true because control returns to their
    /// parent's sibling sequence.
    fn has_next(&self) -> bool {
        let Some(parent) = self.parent() else {
            return true;
        };
        if !parent.is_virtual_root() {
            return true;
        }
        match parent.children().last() {
            Some(last) => !std::ptr::eq(Arc::as_ptr(last), self),
            None => true,
        }
    }

    /// Current display payload, preferring enriched text when it is ready.
    pub fn state_info(&self) -> StateInfo {
        // idempotent; covers a node whose dispatch was lost to a failure
        self.enrichment.dispatch(self.name(), self.description());

        let (title, call_to_action, detail_instruction) = match self.enrichment.get(self.name()) {
            Some(enriched) => (enriched.title, enriched.call_to_action, enriched.instruction),
            None => (
                self.info.display_title().to_string(),
                String::new(),
                String::new(),
            ),
        };

        StateInfo {
            name: self.name().to_string(),
            title,
            description: self.info.description.clone(),
            call_to_action,
            detail_instruction,
            has_detail: self.has_children(),
            has_next: self.has_next(),
        }
    }

    /// Entry point for a top-level node: pre-raise the signals that walk
    /// to `target` when a path exists, then hand over to the interactive
    /// loop.
    pub async fn run(self: Arc<Self>, target: Option<&str>) -> RunOutcome {
        if let Some(target) = target {
            match self.find_path(target) {
                Some(path) => replay_path(&path),
                None => {
                    debug!(node = %self.name(), target, "No path to target, running from the start")
                }
            }
        }
        self.run_loop().await
    }

    /// One turn of the interactive loop: announce, wait, act.
    pub fn run_loop(self: Arc<Self>) -> BoxFuture<'static, RunOutcome> {
        Box::pin(async move {
            self.set_state(NodeState::Explained);
            self.events
                .publish(EngineEvent::StateChanged(self.state_info()));

            let signal = self.signals.wait(self.has_children()).await;
            debug!(node = %self.name(), ?signal, "Signal received");

            match signal {
                Signal::ResetToStart => RunOutcome::Reset,
                Signal::BackPrevious => RunOutcome::Previous,
                Signal::GoDetail => match self.run_children().await {
                    RunOutcome::Reset => RunOutcome::Reset,
                    RunOutcome::Previous => RunOutcome::Previous,
                    RunOutcome::Next => {
                        self.events.publish(EngineEvent::DetailFinished);
                        self.set_state(NodeState::Done);
                        RunOutcome::Next
                    }
                },
                Signal::GoNext => {
                    if !self.has_next() {
                        self.events.publish(EngineEvent::FlowFinished);
                    }
                    self.set_state(NodeState::Done);
                    RunOutcome::Next
                }
            }
        })
    }

    /// Run every child in order. A `Previous` from a child steps the index
    /// back by two (clamped at zero) and resumes there; at index zero it
    /// propagates to this node's own caller. A `Reset` abandons the
    /// remaining siblings immediately.
    async fn run_children(&self) -> RunOutcome {
        let children = self.children();
        let mut idx = 0usize;
        while idx < children.len() {
            *self.active_child.write().unwrap() = Some(idx);
            let outcome = children[idx].clone().run_loop().await;
            *self.active_child.write().unwrap() = None;

            match outcome {
                RunOutcome::Reset => return RunOutcome::Reset,
                RunOutcome::Previous => {
                    if idx == 0 {
                        return RunOutcome::Previous;
                    }
                    idx = idx.saturating_sub(2);
                }
                RunOutcome::Next => idx += 1,
            }
        }
        RunOutcome::Next
    }

    /// Depth-first path from this node to `target`: children first, then
    /// siblings reached through follows edges, then the parent back-edge
    /// to escape a wrong branch.
    pub fn find_path(&self, target: &str) -> Option<Vec<Arc<ExecNode>>> {
        let mut visited = HashSet::new();
        let mut path = Vec::new();
        if search(&self.arc(), target, &mut visited, &mut path) {
            Some(path)
        } else {
            None
        }
    }
}

fn search(
    node: &Arc<ExecNode>,
    target: &str,
    visited: &mut HashSet<String>,
    path: &mut Vec<Arc<ExecNode>>,
) -> bool {
    if !visited.insert(node.name().to_string()) {
        return false;
    }
    path.push(Arc::clone(node));
    if node.name() == target {
        return true;
    }

    for child in node.children() {
        if search(&child, target, visited, path) {
            return true;
        }
    }

    if let Some(parent) = node.parent() {
        // followers are siblings; resolve their nodes through the parent
        let siblings = parent.children();
        for follower in node.follower_names() {
            if let Some(sibling) = siblings.iter().find(|s| s.name() == follower) {
                if search(sibling, target, visited, path) {
                    return true;
                }
            }
        }
        if search(&parent, target, visited, path) {
            return true;
        }
    }

    path.pop();
    false
}

/// Pre-raise the signals that walk `path`. Raising works ahead of time
/// because a slot holds its signal until the owning node polls it.
fn replay_path(path: &[Arc<ExecNode>]) {
    for pair in path.windows(2) {
        let (cur, next) = (&pair[0], &pair[1]);

        // descend: detail on the parent, advance past earlier siblings so
        // the walk lands on the path child
        let children = cur.children();
        if let Some(pos) = children.iter().position(|c| Arc::ptr_eq(c, next)) {
            cur.raise(Signal::GoDetail);
            for earlier in &children[..pos] {
                earlier.raise(Signal::GoNext);
            }
            continue;
        }

        // sibling hop along a follows edge
        if let (Some(cur_parent), Some(next_parent)) = (cur.parent(), next.parent()) {
            if Arc::ptr_eq(&cur_parent, &next_parent) {
                let siblings = cur_parent.children();
                let cur_pos = siblings.iter().position(|s| Arc::ptr_eq(s, cur));
                let next_pos = siblings.iter().position(|s| Arc::ptr_eq(s, next));
                if let (Some(cur_pos), Some(next_pos)) = (cur_pos, next_pos) {
                    if cur_pos < next_pos {
                        for sibling in &siblings[cur_pos..next_pos] {
                            sibling.raise(Signal::GoNext);
                        }
                        continue;
                    }
                }
            }
        }

        // parent back-edges cannot be replayed as signals; interactive
        // control resumes from wherever the walk reaches
        warn!(from = %cur.name(), to = %next.name(), "Cannot replay path step, stopping auto-navigation");
        break;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare(name: &str) -> Arc<ExecNode> {
        ExecNode::new(
            TaskInfo::new(name, format!("{name} description")),
            ContextInfo::default(),
            Arc::new(EventBus::default()),
            Arc::new(EnrichmentCache::new(None)),
        )
    }

    #[tokio::test]
    async fn attach_children_wires_first_parent_only() {
        let first = bare("first");
        let second = bare("second");
        let shared = bare("shared");

        first.attach_children(vec![shared.clone()]);
        second.attach_children(vec![shared.clone()]);

        let parent = shared.parent().unwrap();
        assert!(Arc::ptr_eq(&parent, &first));
        assert_eq!(second.children().len(), 1);
    }

    #[tokio::test]
    async fn has_next_false_only_for_last_top_node() {
        let events = Arc::new(EventBus::default());
        let enrichment = Arc::new(EnrichmentCache::new(None));
        let root = ExecNode::virtual_root(events, enrichment);
        let a = bare("a");
        let b = bare("b");
        let inner = bare("inner");
        b.attach_children(vec![inner.clone()]);
        root.attach_children(vec![a.clone(), b.clone()]);

        assert!(a.state_info().has_next);
        assert!(!b.state_info().has_next);
        // nested last child: control returns to the parent level
        assert!(inner.state_info().has_next);
    }

    #[tokio::test]
    async fn deliver_routes_into_active_subtree() {
        let parent = bare("parent");
        let child = bare("child");
        parent.attach_children(vec![child.clone()]);

        *parent.active_child.write().unwrap() = Some(0);
        parent.deliver(Signal::GoNext);

        // the child holds the pending signal, not the parent
        assert_eq!(child.signals.wait(false).await, Signal::GoNext);
        *parent.active_child.write().unwrap() = None;
        parent.deliver(Signal::GoNext);
        assert_eq!(parent.signals.wait(false).await, Signal::GoNext);
    }

    #[tokio::test]
    async fn find_path_descends_children() {
        let top = bare("top");
        let mid = bare("mid");
        let leaf = bare("leaf");
        mid.attach_children(vec![leaf.clone()]);
        top.attach_children(vec![mid.clone()]);

        let path = top.find_path("leaf").unwrap();
        let names: Vec<&str> = path.iter().map(|n| n.name()).collect();
        assert_eq!(names, vec!["top", "mid", "leaf"]);

        assert!(top.find_path("elsewhere").is_none());
    }

    #[tokio::test]
    async fn find_path_crosses_to_a_following_sibling() {
        let top = bare("top");
        let first = bare("first");
        let second = bare("second");
        let deep = bare("deep");
        second.attach_children(vec![deep.clone()]);
        top.attach_children(vec![first.clone(), second.clone()]);
        first.set_follower_names(vec!["second".into()]);

        // entering at the first sibling still reaches the deeper target
        let path = first.find_path("deep").unwrap();
        let names: Vec<&str> = path.iter().map(|n| n.name()).collect();
        assert_eq!(names, vec!["first", "second", "deep"]);
    }
}
