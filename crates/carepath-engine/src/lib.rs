pub mod builder;
pub mod controller;
pub mod enrich;
pub mod graph;
pub mod node;
pub mod order;
pub mod signal;

pub use builder::{MemoCache, NodeBuilder};
pub use controller::InstructionController;
pub use enrich::EnrichmentCache;
pub use graph::InstructionGraph;
pub use node::ExecNode;
pub use order::OrderResolver;
pub use signal::SignalSlots;
