use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;

use futures::future::BoxFuture;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use carepath_core::error::{CarepathError, Result};
use carepath_core::traits::GraphRepository;
use carepath_core::types::TaskInfo;

use crate::memory::GraphFixture;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS task (
        name TEXT PRIMARY KEY,
        description TEXT NOT NULL,
        duration_mins REAL,
        localized_title TEXT
    );

    CREATE TABLE IF NOT EXISTS includes (
        parent TEXT NOT NULL,
        child TEXT NOT NULL,
        position INTEGER NOT NULL,
        PRIMARY KEY (parent, child)
    );

    CREATE INDEX IF NOT EXISTS idx_includes_child ON includes(child);

    CREATE TABLE IF NOT EXISTS follows (
        src TEXT NOT NULL,
        dst TEXT NOT NULL,
        PRIMARY KEY (src, dst)
    );
";

/// SQLite-backed graph repository.
pub struct SqliteGraph {
    conn: Mutex<Connection>,
}

impl SqliteGraph {
    /// Open or create a SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CarepathError::Repository(format!("Failed to create db directory: {}", e))
            })?;
        }

        let conn =
            Connection::open(path).map_err(|e| CarepathError::Repository(e.to_string()))?;

        // WAL for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| CarepathError::Repository(e.to_string()))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| CarepathError::Repository(e.to_string()))?;

        debug!(path = %path.display(), "SQLite graph opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| CarepathError::Repository(e.to_string()))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| CarepathError::Repository(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Load a fixture's tasks and edges into the store.
    pub fn insert_fixture(&self, fixture: &GraphFixture) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn
            .transaction()
            .map_err(|e| CarepathError::Repository(e.to_string()))?;

        for task in &fixture.tasks {
            tx.execute(
                "INSERT OR REPLACE INTO task (name, description, duration_mins, localized_title)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    task.name,
                    task.description,
                    task.duration_mins,
                    task.localized_title
                ],
            )
            .map_err(|e| CarepathError::Repository(e.to_string()))?;
        }
        for edge in &fixture.includes {
            for (position, child) in edge.children.iter().enumerate() {
                tx.execute(
                    "INSERT OR REPLACE INTO includes (parent, child, position) VALUES (?1, ?2, ?3)",
                    params![edge.parent, child, position as i64],
                )
                .map_err(|e| CarepathError::Repository(e.to_string()))?;
            }
        }
        for edge in &fixture.follows {
            tx.execute(
                "INSERT OR REPLACE INTO follows (src, dst) VALUES (?1, ?2)",
                params![edge.first, edge.then],
            )
            .map_err(|e| CarepathError::Repository(e.to_string()))?;
        }

        tx.commit()
            .map_err(|e| CarepathError::Repository(e.to_string()))
    }

    fn query_names(&self, sql: &str, name: Option<&str>) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| CarepathError::Repository(e.to_string()))?;
        let rows = match name {
            Some(name) => stmt
                .query_map(params![name], |row| row.get::<_, String>(0))
                .and_then(|rows| rows.collect::<std::result::Result<Vec<_>, _>>()),
            None => stmt
                .query_map([], |row| row.get::<_, String>(0))
                .and_then(|rows| rows.collect::<std::result::Result<Vec<_>, _>>()),
        };
        rows.map_err(|e| CarepathError::Repository(e.to_string()))
    }
}

impl GraphRepository for SqliteGraph {
    fn children(&self, name: &str) -> BoxFuture<'_, Result<Vec<String>>> {
        let result = self.query_names(
            "SELECT child FROM includes WHERE parent = ?1 ORDER BY position",
            Some(name),
        );
        Box::pin(async move { result })
    }

    fn followers(&self, name: &str) -> BoxFuture<'_, Result<Vec<String>>> {
        let result = self.query_names(
            "SELECT dst FROM follows WHERE src = ?1 ORDER BY rowid",
            Some(name),
        );
        Box::pin(async move { result })
    }

    fn node_info(&self, name: &str) -> BoxFuture<'_, Result<Option<TaskInfo>>> {
        let result = {
            let conn = self.conn.lock().unwrap();
            conn.query_row(
                "SELECT name, description, duration_mins, localized_title
                 FROM task WHERE name = ?1",
                params![name],
                |row| {
                    Ok(TaskInfo {
                        name: row.get(0)?,
                        description: row.get(1)?,
                        duration_mins: row.get(2)?,
                        localized_title: row.get(3)?,
                    })
                },
            )
            .optional()
            .map_err(|e| CarepathError::Repository(e.to_string()))
        };
        Box::pin(async move { result })
    }

    fn top_level_names(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        let result = self.query_names(
            "SELECT name FROM task
             WHERE name NOT IN (SELECT child FROM includes)
             ORDER BY rowid",
            None,
        );
        Box::pin(async move { result })
    }

    fn top_level_ancestor(&self, name: &str) -> BoxFuture<'_, Result<Option<String>>> {
        let result = (|| {
            let conn = self.conn.lock().unwrap();
            let known: Option<String> = conn
                .query_row(
                    "SELECT name FROM task WHERE name = ?1",
                    params![name],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| CarepathError::Repository(e.to_string()))?;
            let Some(mut current) = known else {
                return Ok(None);
            };

            let mut seen: HashSet<String> = HashSet::new();
            loop {
                let parent: Option<String> = conn
                    .query_row(
                        "SELECT parent FROM includes WHERE child = ?1 LIMIT 1",
                        params![current],
                        |row| row.get(0),
                    )
                    .optional()
                    .map_err(|e| CarepathError::Repository(e.to_string()))?;
                match parent {
                    Some(parent) => {
                        if !seen.insert(parent.clone()) {
                            // include cycle; no answer is better than a wrong one
                            return Ok(None);
                        }
                        current = parent;
                    }
                    None => return Ok(Some(current)),
                }
            }
        })();
        Box::pin(async move { result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryGraph;

    const FIXTURE: &str = r#"
[[tasks]]
name = "get_ready"
description = "Get ready to leave"

[[tasks]]
name = "wash_face"
description = "Wash your face"
duration_mins = 5.0

[[tasks]]
name = "get_dressed"
description = "Put on day clothes"

[[tasks]]
name = "relax"
description = "Take a quiet break"

[[includes]]
parent = "get_ready"
children = ["wash_face", "get_dressed"]

[[follows]]
first = "wash_face"
then = "get_dressed"
"#;

    fn store() -> SqliteGraph {
        let fixture: GraphFixture = toml::from_str(FIXTURE).unwrap();
        let store = SqliteGraph::in_memory().unwrap();
        store.insert_fixture(&fixture).unwrap();
        store
    }

    #[tokio::test]
    async fn children_keep_fixture_order() {
        let store = store();
        assert_eq!(
            store.children("get_ready").await.unwrap(),
            vec!["wash_face", "get_dressed"]
        );
        assert!(store.children("ghost").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn node_info_and_absence() {
        let store = store();
        let info = store.node_info("wash_face").await.unwrap().unwrap();
        assert_eq!(info.description, "Wash your face");
        assert_eq!(info.duration_mins, Some(5.0));
        assert!(store.node_info("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn agrees_with_memory_backend() {
        let sqlite = store();
        let memory = MemoryGraph::from_fixture(toml::from_str(FIXTURE).unwrap());

        assert_eq!(
            sqlite.top_level_names().await.unwrap(),
            memory.top_level_names().await.unwrap()
        );
        assert_eq!(
            sqlite.followers("wash_face").await.unwrap(),
            memory.followers("wash_face").await.unwrap()
        );
        assert_eq!(
            sqlite.top_level_ancestor("get_dressed").await.unwrap(),
            memory.top_level_ancestor("get_dressed").await.unwrap()
        );
    }

    #[tokio::test]
    async fn open_creates_file_backed_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graphs").join("care.db");
        let store = SqliteGraph::open(&path).unwrap();
        store
            .insert_fixture(&toml::from_str(FIXTURE).unwrap())
            .unwrap();
        assert_eq!(
            store.top_level_names().await.unwrap(),
            vec!["get_ready", "relax"]
        );
    }
}
