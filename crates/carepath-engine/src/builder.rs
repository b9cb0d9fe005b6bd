use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::{join_all, BoxFuture};
use tracing::{debug, warn};

use carepath_core::event::EventBus;
use carepath_core::traits::GraphRepository;
use carepath_core::types::TaskInfo;

use crate::enrich::EnrichmentCache;
use crate::node::ExecNode;
use crate::order::OrderResolver;

/// Session-scoped memo of constructed nodes, keyed by name.
///
/// Owned by the caller and passed into every build, so nothing leaks
/// between sessions; a reset discards it together with the tree.
#[derive(Default)]
pub struct MemoCache {
    nodes: HashMap<String, Arc<ExecNode>>,
}

impl MemoCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Arc<ExecNode>> {
        self.nodes.get(name).cloned()
    }

    fn insert(&mut self, name: String, node: Arc<ExecNode>) {
        self.nodes.insert(name, node);
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Builds execution subtrees from the graph repository.
///
/// Construction never fails outright: a task the repository cannot
/// answer for is skipped, a cycle truncates its branch, and the rest of
/// the tree still assembles.
pub struct NodeBuilder {
    repo: Arc<dyn GraphRepository>,
    resolver: OrderResolver,
    enrichment: Arc<EnrichmentCache>,
    events: Arc<EventBus>,
}

impl NodeBuilder {
    pub fn new(
        repo: Arc<dyn GraphRepository>,
        resolver: OrderResolver,
        enrichment: Arc<EnrichmentCache>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            repo,
            resolver,
            enrichment,
            events,
        }
    }

    pub fn repo(&self) -> &Arc<dyn GraphRepository> {
        &self.repo
    }

    pub fn resolver(&self) -> &OrderResolver {
        &self.resolver
    }

    pub fn enrichment(&self) -> Arc<EnrichmentCache> {
        Arc::clone(&self.enrichment)
    }

    pub fn events(&self) -> Arc<EventBus> {
        Arc::clone(&self.events)
    }

    /// Build the tree rooted at `name`, reusing memoized nodes. Returns
    /// `None` when the repository has no record of the task.
    pub async fn build(
        &self,
        name: &str,
        parent: Option<&Arc<ExecNode>>,
        cache: &mut MemoCache,
    ) -> Option<Arc<ExecNode>> {
        if let Some(existing) = cache.get(name) {
            debug!(node = %name, "Reusing memoized node");
            return Some(existing);
        }

        let info = match self.repo.node_info(name).await {
            Ok(Some(info)) => info,
            Ok(None) => {
                warn!(node = %name, "No repository record, skipping");
                return None;
            }
            Err(e) => {
                warn!(node = %name, error = %e, "Repository read failed, skipping");
                return None;
            }
        };

        let node = self.new_node(info, parent, cache);
        let mut visited = HashSet::new();
        visited.insert(node.name().to_string());
        self.populate_children(&node, cache, &mut visited).await;
        Some(node)
    }

    /// Create a node, inherit the parent context, memoize it, and kick off
    /// its enrichment task.
    fn new_node(
        &self,
        info: TaskInfo,
        parent: Option<&Arc<ExecNode>>,
        cache: &mut MemoCache,
    ) -> Arc<ExecNode> {
        let context = parent
            .map(|p| p.context().inherit())
            .unwrap_or_default();
        self.enrichment.dispatch(&info.name, &info.description);
        let node = ExecNode::new(
            info,
            context,
            Arc::clone(&self.events),
            Arc::clone(&self.enrichment),
        );
        cache.insert(node.name().to_string(), Arc::clone(&node));
        node
    }

    /// Fetch, order, and recursively build the children of `node`.
    fn populate_children<'a>(
        &'a self,
        node: &'a Arc<ExecNode>,
        cache: &'a mut MemoCache,
        visited: &'a mut HashSet<String>,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let child_names = match self.repo.children(node.name()).await {
                Ok(names) => names,
                Err(e) => {
                    warn!(node = %node.name(), error = %e, "Children lookup failed, treating as leaf");
                    return;
                }
            };
            if child_names.is_empty() {
                return;
            }

            // independent reads fan out; assembly below stays sequential
            let fetched = join_all(child_names.iter().map(|child| async move {
                let info = self.repo.node_info(child).await;
                let followers = self.repo.followers(child).await;
                (child.clone(), info, followers)
            }))
            .await;

            let mut infos: HashMap<String, TaskInfo> = HashMap::new();
            let mut follower_map: HashMap<String, Vec<String>> = HashMap::new();
            let mut siblings: Vec<String> = Vec::new();
            for (child, info, followers) in fetched {
                match info {
                    Ok(Some(info)) => {
                        siblings.push(child.clone());
                        infos.insert(child.clone(), info);
                    }
                    Ok(None) => {
                        warn!(node = %child, "No repository record, skipping");
                        continue;
                    }
                    Err(e) => {
                        warn!(node = %child, error = %e, "Repository read failed, skipping");
                        continue;
                    }
                }
                match followers {
                    Ok(list) => {
                        follower_map.insert(child, list);
                    }
                    Err(e) => {
                        warn!(node = %child, error = %e, "Followers lookup failed, assuming none");
                    }
                }
            }

            // constraints stay within this sibling batch; self-references drop
            let sibling_set: HashSet<&str> = siblings.iter().map(String::as_str).collect();
            let mut follows: HashMap<String, Vec<String>> = HashMap::new();
            for (src, targets) in &follower_map {
                let kept: Vec<String> = targets
                    .iter()
                    .filter(|t| sibling_set.contains(t.as_str()) && *t != src)
                    .cloned()
                    .collect();
                if !kept.is_empty() {
                    follows.insert(src.clone(), kept);
                }
            }

            let descriptions: HashMap<String, String> = siblings
                .iter()
                .map(|n| (n.clone(), infos[n].description.clone()))
                .collect();

            let order = self.resolver.resolve(&siblings, &follows, &descriptions).await;
            debug!(node = %node.name(), ?order, "Resolved sibling order");

            let mut children = Vec::with_capacity(order.len());
            for child_name in &order {
                if visited.contains(child_name) {
                    warn!(node = %child_name, "Cycle detected during construction, skipping branch");
                    continue;
                }
                if let Some(existing) = cache.get(child_name) {
                    debug!(node = %child_name, "Reusing memoized node");
                    children.push(existing);
                    continue;
                }

                visited.insert(child_name.clone());
                let child = self.new_node(infos[child_name].clone(), Some(node), cache);
                child.set_follower_names(follows.get(child_name).cloned().unwrap_or_default());
                self.populate_children(&child, cache, visited).await;
                children.push(child);
            }
            node.attach_children(children);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use carepath_store::MemoryGraph;
    use carepath_test_utils::{morning_routine, ScriptedEnrichmentOracle};

    fn builder_for(repo: MemoryGraph, enrichment: Arc<EnrichmentCache>) -> NodeBuilder {
        NodeBuilder::new(
            Arc::new(repo),
            OrderResolver::deterministic(),
            enrichment,
            Arc::new(EventBus::default()),
        )
    }

    #[tokio::test]
    async fn builds_ordered_tree() {
        let builder = builder_for(morning_routine(), Arc::new(EnrichmentCache::new(None)));
        let mut cache = MemoCache::new();

        let root = builder.build("get_ready", None, &mut cache).await.unwrap();
        let names: Vec<String> = root
            .children()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        // the follows chain pins the order
        assert_eq!(names, vec!["wash_face", "get_dressed", "pack_bag"]);

        let dressed = root.children()[1].clone();
        let inner: Vec<String> = dressed
            .children()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        assert_eq!(inner, vec!["pick_clothes", "put_on_shoes"]);
        assert!(dressed.children()[0].children().is_empty());
    }

    #[tokio::test]
    async fn unknown_root_is_skipped() {
        let builder = builder_for(morning_routine(), Arc::new(EnrichmentCache::new(None)));
        let mut cache = MemoCache::new();
        assert!(builder.build("no_such_task", None, &mut cache).await.is_none());
    }

    #[tokio::test]
    async fn children_inherit_context() {
        let builder = builder_for(morning_routine(), Arc::new(EnrichmentCache::new(None)));
        let mut cache = MemoCache::new();
        let root = builder.build("get_ready", None, &mut cache).await.unwrap();
        for child in root.children() {
            assert_eq!(child.context(), root.context());
        }
    }

    #[tokio::test]
    async fn memoized_rebuild_reuses_nodes_and_enrichment() {
        let oracle = Arc::new(ScriptedEnrichmentOracle::failing());
        let builder = builder_for(
            morning_routine(),
            Arc::new(EnrichmentCache::new(Some(oracle.clone()))),
        );
        let mut cache = MemoCache::new();

        let first = builder.build("get_ready", None, &mut cache).await.unwrap();
        let node_count = cache.len();
        let second = builder.build("get_ready", None, &mut cache).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), node_count);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        // one enrichment dispatch per unique node, none for the rebuild
        assert_eq!(oracle.call_count(), node_count);
    }

    #[tokio::test]
    async fn include_cycle_truncates_branch() {
        let repo = MemoryGraph::new()
            .task(carepath_core::types::TaskInfo::new("a", "task a"))
            .task(carepath_core::types::TaskInfo::new("b", "task b"))
            .includes("a", &["b"])
            .includes("b", &["a"]);

        let builder = builder_for(repo, Arc::new(EnrichmentCache::new(None)));
        let mut cache = MemoCache::new();
        let root = builder.build("a", None, &mut cache).await.unwrap();

        assert_eq!(root.children().len(), 1);
        let b = root.children()[0].clone();
        assert_eq!(b.name(), "b");
        // the back-edge to `a` was dropped, not followed forever
        assert!(b.children().is_empty());
    }

    #[tokio::test]
    async fn missing_sibling_record_skips_only_that_node() {
        let repo = MemoryGraph::new()
            .task(carepath_core::types::TaskInfo::new("root", "root task"))
            .task(carepath_core::types::TaskInfo::new("known", "known task"))
            .includes("root", &["known", "ghost"]);

        let builder = builder_for(repo, Arc::new(EnrichmentCache::new(None)));
        let mut cache = MemoCache::new();
        let root = builder.build("root", None, &mut cache).await.unwrap();
        let names: Vec<String> = root
            .children()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        assert_eq!(names, vec!["known"]);
    }
}
