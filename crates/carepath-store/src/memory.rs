use std::collections::{HashMap, HashSet};

use futures::future::BoxFuture;
use serde::Deserialize;

use carepath_core::error::{CarepathError, Result};
use carepath_core::traits::GraphRepository;
use carepath_core::types::TaskInfo;

/// In-memory graph backend for tests and fixture-driven demo sessions.
///
/// Task insertion order is preserved so that top-level listing and child
/// sequences are deterministic.
#[derive(Debug, Default, Clone)]
pub struct MemoryGraph {
    tasks: HashMap<String, TaskInfo>,
    task_order: Vec<String>,
    includes: HashMap<String, Vec<String>>,
    follows: HashMap<String, Vec<String>>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task(mut self, info: TaskInfo) -> Self {
        if !self.tasks.contains_key(&info.name) {
            self.task_order.push(info.name.clone());
        }
        self.tasks.insert(info.name.clone(), info);
        self
    }

    pub fn includes(mut self, parent: &str, children: &[&str]) -> Self {
        self.includes
            .entry(parent.to_string())
            .or_default()
            .extend(children.iter().map(|c| c.to_string()));
        self
    }

    pub fn follows(mut self, first: &str, then: &str) -> Self {
        self.follows
            .entry(first.to_string())
            .or_default()
            .push(then.to_string());
        self
    }

    pub fn from_fixture(fixture: GraphFixture) -> Self {
        let mut graph = Self::new();
        for task in fixture.tasks {
            graph = graph.task(task);
        }
        for edge in fixture.includes {
            let children: Vec<&str> = edge.children.iter().map(String::as_str).collect();
            graph = graph.includes(&edge.parent, &children);
        }
        for edge in fixture.follows {
            graph = graph.follows(&edge.first, &edge.then);
        }
        graph
    }

    /// Parse a TOML fixture document into a graph.
    pub fn load_toml(text: &str) -> Result<Self> {
        let fixture: GraphFixture =
            toml::from_str(text).map_err(|e| CarepathError::Config(e.to_string()))?;
        Ok(Self::from_fixture(fixture))
    }

    fn included_names(&self) -> HashSet<&str> {
        self.includes
            .values()
            .flatten()
            .map(String::as_str)
            .collect()
    }

    fn parent_of(&self, name: &str) -> Option<&str> {
        self.includes
            .iter()
            .find(|(_, children)| children.iter().any(|c| c == name))
            .map(|(parent, _)| parent.as_str())
    }
}

/// TOML-deserializable graph description.
#[derive(Debug, Clone, Deserialize)]
pub struct GraphFixture {
    #[serde(default)]
    pub tasks: Vec<TaskInfo>,
    #[serde(default)]
    pub includes: Vec<IncludeEdge>,
    #[serde(default)]
    pub follows: Vec<FollowEdge>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IncludeEdge {
    pub parent: String,
    pub children: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FollowEdge {
    pub first: String,
    pub then: String,
}

impl GraphRepository for MemoryGraph {
    fn children(&self, name: &str) -> BoxFuture<'_, Result<Vec<String>>> {
        let result = self.includes.get(name).cloned().unwrap_or_default();
        Box::pin(async move { Ok(result) })
    }

    fn followers(&self, name: &str) -> BoxFuture<'_, Result<Vec<String>>> {
        let result = self.follows.get(name).cloned().unwrap_or_default();
        Box::pin(async move { Ok(result) })
    }

    fn node_info(&self, name: &str) -> BoxFuture<'_, Result<Option<TaskInfo>>> {
        let result = self.tasks.get(name).cloned();
        Box::pin(async move { Ok(result) })
    }

    fn top_level_names(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        let included = self.included_names();
        let result: Vec<String> = self
            .task_order
            .iter()
            .filter(|n| !included.contains(n.as_str()))
            .cloned()
            .collect();
        Box::pin(async move { Ok(result) })
    }

    fn top_level_ancestor(&self, name: &str) -> BoxFuture<'_, Result<Option<String>>> {
        let result = if self.tasks.contains_key(name) {
            let mut seen = HashSet::new();
            let mut current = name;
            while let Some(parent) = self.parent_of(current) {
                if !seen.insert(parent) {
                    // include cycle; no answer is better than a wrong one
                    return Box::pin(async move { Ok(None) });
                }
                current = parent;
            }
            Some(current.to_string())
        } else {
            None
        };
        Box::pin(async move { Ok(result) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MemoryGraph {
        MemoryGraph::new()
            .task(TaskInfo::new("get_ready", "Get ready to leave"))
            .task(TaskInfo::new("wash_face", "Wash your face"))
            .task(TaskInfo::new("get_dressed", "Put on day clothes"))
            .task(TaskInfo::new("relax", "Take a quiet break"))
            .includes("get_ready", &["wash_face", "get_dressed"])
            .follows("wash_face", "get_dressed")
    }

    #[tokio::test]
    async fn children_in_insertion_order() {
        let graph = sample();
        let children = graph.children("get_ready").await.unwrap();
        assert_eq!(children, vec!["wash_face", "get_dressed"]);
        assert!(graph.children("wash_face").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn followers_and_missing_names() {
        let graph = sample();
        assert_eq!(
            graph.followers("wash_face").await.unwrap(),
            vec!["get_dressed"]
        );
        assert!(graph.followers("ghost").await.unwrap().is_empty());
        assert!(graph.node_info("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn top_level_excludes_included_tasks() {
        let graph = sample();
        assert_eq!(
            graph.top_level_names().await.unwrap(),
            vec!["get_ready", "relax"]
        );
    }

    #[tokio::test]
    async fn ancestor_walks_to_the_top() {
        let graph = sample();
        assert_eq!(
            graph.top_level_ancestor("get_dressed").await.unwrap(),
            Some("get_ready".to_string())
        );
        assert_eq!(
            graph.top_level_ancestor("get_ready").await.unwrap(),
            Some("get_ready".to_string())
        );
        assert_eq!(graph.top_level_ancestor("ghost").await.unwrap(), None);
    }

    #[tokio::test]
    async fn fixture_round_trip() {
        let text = r#"
[[tasks]]
name = "get_ready"
description = "Get ready to leave"

[[tasks]]
name = "wash_face"
description = "Wash your face"
duration_mins = 5.0
localized_title = "Washing up"

[[includes]]
parent = "get_ready"
children = ["wash_face"]

[[follows]]
first = "wash_face"
then = "get_ready"
"#;
        let graph = MemoryGraph::load_toml(text).unwrap();
        assert_eq!(graph.children("get_ready").await.unwrap(), vec!["wash_face"]);
        let info = graph.node_info("wash_face").await.unwrap().unwrap();
        assert_eq!(info.duration_mins, Some(5.0));
        assert_eq!(info.display_title(), "Washing up");
    }

    #[test]
    fn malformed_fixture_is_a_config_error() {
        assert!(MemoryGraph::load_toml("tasks = 3").is_err());
    }
}
