use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use carepath_core::config::EngineConfig;
use carepath_core::event::EventBus;
use carepath_core::traits::{EnrichmentOracle, GraphRepository, OrderOracle};
use carepath_core::types::{RunOutcome, SessionId, Signal};

use crate::builder::{MemoCache, NodeBuilder};
use crate::enrich::EnrichmentCache;
use crate::graph::InstructionGraph;
use crate::order::OrderResolver;

/// Session-scoped façade over one instruction graph.
///
/// Owns the worker task driving the traversal, forwards transport
/// commands as signals into the tree, and rebuilds the graph with fresh
/// state when a reset bubbles up. Stopping is cooperative: the worker is
/// cancelled at its next await point and in-flight enrichment tasks are
/// simply abandoned.
pub struct InstructionController {
    session_id: SessionId,
    builder: Arc<NodeBuilder>,
    graph: Arc<RwLock<Option<Arc<InstructionGraph>>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    running: Arc<AtomicBool>,
    started_at: Mutex<Option<DateTime<Utc>>>,
}

impl InstructionController {
    pub fn new(
        repo: Arc<dyn GraphRepository>,
        order_oracle: Option<Arc<dyn OrderOracle>>,
        enrichment_oracle: Option<Arc<dyn EnrichmentOracle>>,
        events: Arc<EventBus>,
        config: &EngineConfig,
    ) -> Self {
        let resolver = OrderResolver::new(
            order_oracle,
            Duration::from_secs(config.order_timeout_secs),
        );
        let enrichment = Arc::new(EnrichmentCache::new(enrichment_oracle));
        let builder = Arc::new(NodeBuilder::new(repo, resolver, enrichment, events));
        Self {
            session_id: SessionId::new(),
            builder,
            graph: Arc::new(RwLock::new(None)),
            worker: Mutex::new(None),
            running: Arc::new(AtomicBool::new(false)),
            started_at: Mutex::new(None),
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn events(&self) -> Arc<EventBus> {
        self.builder.events()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        *self.started_at.lock().unwrap()
    }

    /// Whether the session worker is alive. A worker that crashed counts
    /// as stopped so the session can be restarted fresh.
    pub fn is_running(&self) -> bool {
        if !self.running.load(Ordering::SeqCst) {
            return false;
        }
        match self.worker.lock().unwrap().as_ref() {
            Some(handle) => !handle.is_finished(),
            None => false,
        }
    }

    /// Start (or restart) the session worker, optionally auto-navigating
    /// to `target`.
    pub fn start(&self, target: Option<String>) {
        if self.is_running() {
            self.stop();
        }
        self.running.store(true, Ordering::SeqCst);
        *self.started_at.lock().unwrap() = Some(Utc::now());

        let builder = Arc::clone(&self.builder);
        let graph_slot = Arc::clone(&self.graph);
        let running = Arc::clone(&self.running);
        let session = self.session_id.clone();

        let handle = tokio::spawn(async move {
            info!(session = %session, target = ?target, "Session worker started");
            while running.load(Ordering::SeqCst) {
                // a reset discards the memo cache along with the tree
                let mut cache = MemoCache::new();
                let graph = Arc::new(
                    InstructionGraph::construct(&builder, target.as_deref(), &mut cache).await,
                );
                if graph.is_empty() {
                    warn!(session = %session, "Graph is empty, stopping session");
                    break;
                }
                *graph_slot.write().unwrap() = Some(Arc::clone(&graph));

                match graph.run().await {
                    RunOutcome::Reset => {
                        info!(session = %session, "Reset received, rebuilding graph");
                        continue;
                    }
                    outcome => {
                        debug!(session = %session, ?outcome, "Traversal finished");
                        break;
                    }
                }
            }
            *graph_slot.write().unwrap() = None;
            running.store(false, Ordering::SeqCst);
            info!(session = %session, "Session worker finished");
        });
        *self.worker.lock().unwrap() = Some(handle);
    }

    /// Stop accepting commands and cancel the worker at its next await
    /// point.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.worker.lock().unwrap().take() {
            handle.abort();
        }
        *self.graph.write().unwrap() = None;
        info!(session = %self.session_id, "Session stopped");
    }

    /// Translate a transport command into a signal and broadcast it to the
    /// top-level nodes under the virtual root. Unknown commands are
    /// ignored with a warning.
    pub fn forward(&self, command: &str) {
        if !self.running.load(Ordering::SeqCst) {
            debug!(session = %self.session_id, command, "Session not running, ignoring command");
            return;
        }
        let Some(signal) = Signal::from_command(command) else {
            warn!(command, "Unknown command, no signal raised");
            return;
        };

        let graph = self.graph.read().unwrap().clone();
        match graph {
            Some(graph) => {
                debug!(session = %self.session_id, ?signal, "Forwarding signal");
                for node in graph.top_nodes() {
                    node.deliver(signal);
                }
            }
            None => warn!(session = %self.session_id, "No active graph yet, dropping signal"),
        }
    }
}

impl Drop for InstructionController {
    fn drop(&mut self) {
        if let Some(handle) = self.worker.lock().unwrap().take() {
            handle.abort();
        }
    }
}
