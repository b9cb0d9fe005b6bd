pub mod memory;
pub mod sqlite;

pub use memory::{GraphFixture, MemoryGraph};
pub use sqlite::SqliteGraph;
