use std::collections::HashMap;

use futures::future::BoxFuture;

use crate::error::Result;
use crate::types::{Enrichment, TaskInfo};

/// Read-only view of the care-task knowledge graph.
///
/// Every operation may fail (store or network); callers treat a failure
/// like "no data found" and keep going. A broken read is never fatal to
/// tree construction.
pub trait GraphRepository: Send + Sync + 'static {
    /// Direct Includes targets of `name`, in storage order.
    fn children(&self, name: &str) -> BoxFuture<'_, Result<Vec<String>>>;

    /// Direct Follows targets of `name`: siblings that `name` must be
    /// visited before.
    fn followers(&self, name: &str) -> BoxFuture<'_, Result<Vec<String>>>;

    /// Metadata for one task. `None` means the task is unknown and the
    /// node is skipped.
    fn node_info(&self, name: &str) -> BoxFuture<'_, Result<Option<TaskInfo>>>;

    /// Tasks that are not the Includes target of any other task.
    fn top_level_names(&self) -> BoxFuture<'_, Result<Vec<String>>>;

    /// The top-level task whose tree contains `name`, if any.
    fn top_level_ancestor(&self, name: &str) -> BoxFuture<'_, Result<Option<String>>>;
}

/// Everything the ordering oracle needs to propose a human-natural order.
#[derive(Debug, Clone)]
pub struct ReorderRequest {
    /// Sibling names, already in a valid topological order.
    pub names: Vec<String>,
    /// Precedence constraints: the source must precede every target.
    pub follows: HashMap<String, Vec<String>>,
    /// Raw description per name.
    pub descriptions: HashMap<String, String>,
}

/// Semantic-order oracle: proposes a natural ordering for siblings the
/// constraints leave ambiguous. Callers validate the reply and always have
/// a deterministic fallback.
pub trait OrderOracle: Send + Sync + 'static {
    fn reorder(&self, request: ReorderRequest) -> BoxFuture<'_, Result<Vec<String>>>;
}

/// Text-enrichment oracle: rewrites a raw task description into display
/// text. Callers cache the result per node and fall back to the raw
/// description on failure.
pub trait EnrichmentOracle: Send + Sync + 'static {
    fn enrich(&self, name: &str, description: &str) -> BoxFuture<'_, Result<Enrichment>>;
}
