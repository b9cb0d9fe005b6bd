use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use futures::future::BoxFuture;

use carepath_core::error::{CarepathError, Result};
use carepath_core::traits::{EnrichmentOracle, OrderOracle, ReorderRequest};
use carepath_core::types::{Enrichment, TaskInfo};
use carepath_store::MemoryGraph;

/// Ordering oracle double that replays scripted responses in order and
/// counts how often it was consulted.
pub struct ScriptedOrderOracle {
    responses: Mutex<VecDeque<Result<Vec<String>>>>,
    calls: AtomicUsize,
}

impl ScriptedOrderOracle {
    pub fn new(responses: Vec<Result<Vec<String>>>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Always answer with `order`.
    pub fn ok(order: Vec<String>) -> Self {
        Self::new(vec![Ok(order)])
    }

    /// Always fail.
    pub fn failing() -> Self {
        Self::new(Vec::new())
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl OrderOracle for ScriptedOrderOracle {
    fn reorder(&self, _request: ReorderRequest) -> BoxFuture<'_, Result<Vec<String>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let response = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(CarepathError::OracleRequest("script exhausted".into())));
        Box::pin(async move { response })
    }
}

/// Ordering oracle that never answers; for timeout paths.
pub struct StalledOrderOracle;

impl OrderOracle for StalledOrderOracle {
    fn reorder(&self, _request: ReorderRequest) -> BoxFuture<'_, Result<Vec<String>>> {
        Box::pin(futures::future::pending())
    }
}

enum EnrichmentScript {
    Ok(Enrichment),
    Fail,
}

/// Enrichment oracle double with a call counter.
pub struct ScriptedEnrichmentOracle {
    script: EnrichmentScript,
    calls: AtomicUsize,
}

impl ScriptedEnrichmentOracle {
    pub fn ok(enrichment: Enrichment) -> Self {
        Self {
            script: EnrichmentScript::Ok(enrichment),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            script: EnrichmentScript::Fail,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl EnrichmentOracle for ScriptedEnrichmentOracle {
    fn enrich(&self, name: &str, _description: &str) -> BoxFuture<'_, Result<Enrichment>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let response = match &self.script {
            EnrichmentScript::Ok(enrichment) => Ok(enrichment.clone()),
            EnrichmentScript::Fail => Err(CarepathError::OracleRequest(format!(
                "scripted failure for {name}"
            ))),
        };
        Box::pin(async move { response })
    }
}

/// The morning-routine fixture used across the engine tests.
///
/// ```text
/// get_ready ─┬─ wash_face
///            ├─ get_dressed ─┬─ pick_clothes
///            │               └─ put_on_shoes
///            └─ pack_bag
/// relax
/// ```
///
/// Follows edges pin `wash_face → get_dressed → pack_bag` and
/// `pick_clothes → put_on_shoes`, so the deterministic resolver yields a
/// unique order everywhere.
pub fn morning_routine() -> MemoryGraph {
    MemoryGraph::new()
        .task(TaskInfo::new("get_ready", "Get ready for the day service"))
        .task(TaskInfo::new("wash_face", "Wash your face at the sink"))
        .task(
            TaskInfo::new("get_dressed", "Put on the day clothes")
                .with_localized_title("Getting dressed"),
        )
        .task(TaskInfo::new("pick_clothes", "Choose clothes from the wardrobe"))
        .task(
            TaskInfo::new("put_on_shoes", "Put on the shoes by the door").with_duration(5.0),
        )
        .task(TaskInfo::new("pack_bag", "Pack the bag for the day"))
        .task(TaskInfo::new("relax", "Take a quiet break"))
        .includes("get_ready", &["wash_face", "get_dressed", "pack_bag"])
        .includes("get_dressed", &["pick_clothes", "put_on_shoes"])
        .follows("wash_face", "get_dressed")
        .follows("get_dressed", "pack_bag")
        .follows("pick_clothes", "put_on_shoes")
}
