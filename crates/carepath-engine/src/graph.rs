use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use carepath_core::types::RunOutcome;

use crate::builder::{MemoCache, NodeBuilder};
use crate::node::ExecNode;

/// The assembled execution forest for one session: a virtual root over
/// the ordered top-level task trees, plus targeted auto-navigation.
pub struct InstructionGraph {
    virtual_root: Arc<ExecNode>,
    top_nodes: Vec<Arc<ExecNode>>,
    target: Option<String>,
}

impl InstructionGraph {
    /// Select, order, and build the top-level trees for `target`.
    ///
    /// With no target every top-level task participates. With one, the
    /// top-level tree containing it is chosen: the target itself if it
    /// is top-level, otherwise its top-level ancestor. When the ancestor
    /// lookup finds nothing the graph falls back to all top-level tasks.
    pub async fn construct(
        builder: &NodeBuilder,
        target: Option<&str>,
        cache: &mut MemoCache,
    ) -> Self {
        let repo = builder.repo();
        let all_tops = match repo.top_level_names().await {
            Ok(names) => names,
            Err(e) => {
                warn!(error = %e, "Top-level lookup failed");
                Vec::new()
            }
        };

        let selected: Vec<String> = match target {
            Some(t) if all_tops.iter().any(|n| n == t) => vec![t.to_string()],
            Some(t) => match repo.top_level_ancestor(t).await {
                Ok(Some(ancestor)) => vec![ancestor],
                Ok(None) => {
                    warn!(target = %t, "Target not found in any top-level tree, running all");
                    all_tops.clone()
                }
                Err(e) => {
                    warn!(target = %t, error = %e, "Ancestor lookup failed, running all");
                    all_tops.clone()
                }
            },
            None => all_tops.clone(),
        };

        // top-level order resolves like any sibling batch
        let mut follows: HashMap<String, Vec<String>> = HashMap::new();
        let mut descriptions: HashMap<String, String> = HashMap::new();
        for name in &selected {
            match repo.followers(name).await {
                Ok(list) => {
                    let kept: Vec<String> = list
                        .into_iter()
                        .filter(|f| selected.contains(f) && f != name)
                        .collect();
                    if !kept.is_empty() {
                        follows.insert(name.clone(), kept);
                    }
                }
                Err(e) => {
                    warn!(node = %name, error = %e, "Followers lookup failed, assuming none")
                }
            }
            if let Ok(Some(task)) = repo.node_info(name).await {
                descriptions.insert(name.clone(), task.description);
            }
        }
        let order = builder
            .resolver()
            .resolve(&selected, &follows, &descriptions)
            .await;

        let mut top_nodes = Vec::with_capacity(order.len());
        for name in &order {
            match builder.build(name, None, cache).await {
                Some(node) => {
                    node.set_follower_names(follows.get(name).cloned().unwrap_or_default());
                    top_nodes.push(node);
                }
                None => warn!(node = %name, "Skipping top-level task with no record"),
            }
        }

        let virtual_root = ExecNode::virtual_root(builder.events(), builder.enrichment());
        virtual_root.attach_children(top_nodes.clone());
        info!(
            top_nodes = top_nodes.len(),
            nodes = cache.len(),
            target = ?target,
            "Instruction graph constructed"
        );

        Self {
            virtual_root,
            top_nodes,
            target: target.map(str::to_string),
        }
    }

    pub fn virtual_root(&self) -> &Arc<ExecNode> {
        &self.virtual_root
    }

    pub fn top_nodes(&self) -> &[Arc<ExecNode>] {
        &self.top_nodes
    }

    pub fn is_empty(&self) -> bool {
        self.top_nodes.is_empty()
    }

    /// Locate a node anywhere in the forest by name.
    pub fn find_node(&self, name: &str) -> Option<Arc<ExecNode>> {
        fn descend(node: &Arc<ExecNode>, name: &str) -> Option<Arc<ExecNode>> {
            if node.name() == name {
                return Some(Arc::clone(node));
            }
            node.children().iter().find_map(|c| descend(c, name))
        }
        self.top_nodes.iter().find_map(|n| descend(n, name))
    }

    /// Run every top-level tree in order. The tree containing the target
    /// auto-navigates to it first. A `Reset` propagates to the caller for
    /// a full rebuild; a `Previous` from a top-level node steps back like
    /// any sibling walk, pinned at the first tree.
    pub async fn run(&self) -> RunOutcome {
        if self.top_nodes.is_empty() {
            warn!("Nothing to run, graph has no top-level nodes");
            return RunOutcome::Next;
        }

        let mut idx = 0usize;
        while idx < self.top_nodes.len() {
            let node = Arc::clone(&self.top_nodes[idx]);
            let target = self
                .target
                .as_deref()
                .filter(|t| subtree_contains(&node, t));
            let outcome = node.run(target).await;
            match outcome {
                RunOutcome::Reset => {
                    debug!("Reset requested, propagating up");
                    return RunOutcome::Reset;
                }
                RunOutcome::Previous => {
                    if idx == 0 {
                        debug!("Already at the first top-level task");
                    } else {
                        idx = idx.saturating_sub(2);
                    }
                }
                RunOutcome::Next => idx += 1,
            }
        }
        RunOutcome::Next
    }
}

fn subtree_contains(node: &Arc<ExecNode>, target: &str) -> bool {
    if node.name() == target {
        return true;
    }
    node.children().iter().any(|c| subtree_contains(c, target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use carepath_core::event::EventBus;
    use carepath_store::MemoryGraph;
    use carepath_core::types::TaskInfo;
    use carepath_test_utils::morning_routine;

    use crate::enrich::EnrichmentCache;
    use crate::order::OrderResolver;

    fn builder_for(repo: MemoryGraph) -> NodeBuilder {
        NodeBuilder::new(
            Arc::new(repo),
            OrderResolver::deterministic(),
            Arc::new(EnrichmentCache::new(None)),
            Arc::new(EventBus::default()),
        )
    }

    #[tokio::test]
    async fn construct_orders_top_level_by_follows() {
        let repo = MemoryGraph::new()
            .task(TaskInfo::new("second", "the later routine"))
            .task(TaskInfo::new("first", "the earlier routine"))
            .follows("first", "second");

        let builder = builder_for(repo);
        let mut cache = MemoCache::new();
        let graph = InstructionGraph::construct(&builder, None, &mut cache).await;

        let names: Vec<&str> = graph.top_nodes().iter().map(|n| n.name()).collect();
        assert_eq!(names, vec!["first", "second"]);
        assert!(graph.virtual_root().is_virtual_root());
        assert_eq!(graph.virtual_root().children().len(), 2);
    }

    #[tokio::test]
    async fn target_selects_its_top_level_tree() {
        let builder = builder_for(morning_routine());
        let mut cache = MemoCache::new();
        let graph =
            InstructionGraph::construct(&builder, Some("put_on_shoes"), &mut cache).await;

        let names: Vec<&str> = graph.top_nodes().iter().map(|n| n.name()).collect();
        assert_eq!(names, vec!["get_ready"]);
        assert!(graph.find_node("put_on_shoes").is_some());
    }

    #[tokio::test]
    async fn unknown_target_falls_back_to_all_tops() {
        let builder = builder_for(morning_routine());
        let mut cache = MemoCache::new();
        let graph =
            InstructionGraph::construct(&builder, Some("no_such_task"), &mut cache).await;
        assert!(!graph.is_empty());
    }

    #[tokio::test]
    async fn empty_repository_builds_empty_graph() {
        let builder = builder_for(MemoryGraph::new());
        let mut cache = MemoCache::new();
        let graph = InstructionGraph::construct(&builder, None, &mut cache).await;
        assert!(graph.is_empty());
        assert_eq!(graph.run().await, RunOutcome::Next);
    }
}
