pub mod client;
pub mod enrich;
pub mod reorder;

use std::sync::Arc;

use carepath_core::config::OracleConfig;
use carepath_core::traits::{EnrichmentOracle, OrderOracle};

pub use client::ChatClient;
pub use enrich::TextEnrichmentOracle;
pub use reorder::SemanticOrderOracle;

/// Build both oracles over one endpoint configuration.
pub fn build_oracles(
    config: OracleConfig,
) -> (Arc<dyn OrderOracle>, Arc<dyn EnrichmentOracle>) {
    let order = SemanticOrderOracle::new(ChatClient::new(config.clone()));
    let enrichment = TextEnrichmentOracle::new(ChatClient::new(config));
    (Arc::new(order), Arc::new(enrichment))
}
