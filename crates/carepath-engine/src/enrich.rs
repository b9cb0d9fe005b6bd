use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use carepath_core::traits::EnrichmentOracle;
use carepath_core::types::Enrichment;

#[derive(Debug, Clone)]
enum EnrichEntry {
    Pending,
    Ready(Enrichment),
    Unavailable,
}

/// Fire-and-forget per-node text enrichment.
///
/// `dispatch` spawns at most one oracle task per node name; `get` never
/// blocks. A failed enrichment is cached as unavailable, so the node keeps
/// serving its raw description without a retry storm. Tasks share nothing
/// with the traversal worker and may outlive the node's first display.
pub struct EnrichmentCache {
    oracle: Option<Arc<dyn EnrichmentOracle>>,
    entries: Arc<Mutex<HashMap<String, EnrichEntry>>>,
}

impl EnrichmentCache {
    pub fn new(oracle: Option<Arc<dyn EnrichmentOracle>>) -> Self {
        Self {
            oracle,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Start enrichment for a node unless one was already dispatched.
    pub fn dispatch(&self, name: &str, description: &str) {
        {
            let mut entries = self.entries.lock().unwrap();
            if entries.contains_key(name) {
                return;
            }
            let entry = if self.oracle.is_some() {
                EnrichEntry::Pending
            } else {
                EnrichEntry::Unavailable
            };
            entries.insert(name.to_string(), entry);
        }

        let Some(oracle) = self.oracle.clone() else {
            return;
        };
        let entries = Arc::clone(&self.entries);
        let name = name.to_string();
        let description = description.to_string();
        tokio::spawn(async move {
            let entry = match oracle.enrich(&name, &description).await {
                Ok(enrichment) => {
                    debug!(node = %name, "Enrichment ready");
                    EnrichEntry::Ready(enrichment)
                }
                Err(e) => {
                    warn!(node = %name, error = %e, "Enrichment failed, raw description stays");
                    EnrichEntry::Unavailable
                }
            };
            entries.lock().unwrap().insert(name, entry);
        });
    }

    /// Completed enrichment for a node, if any. Never waits for the task.
    pub fn get(&self, name: &str) -> Option<Enrichment> {
        match self.entries.lock().unwrap().get(name) {
            Some(EnrichEntry::Ready(enrichment)) => Some(enrichment.clone()),
            _ => None,
        }
    }
}
