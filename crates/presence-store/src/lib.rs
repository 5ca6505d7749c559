//! presence-store — SQLite persistence for identities and attendance.
//!
//! Full-collection snapshot semantics: a load reads a whole collection, a
//! save replaces it in one transaction, so readers never observe a partial
//! write. Insertion order is preserved via an explicit position column;
//! embeddings are stored as JSON text.

use chrono::{DateTime, Utc};
use presence_core::{AttendanceEvent, AttendanceStatus, Embedding, EnrolledIdentity};
use std::path::Path;
use thiserror::Error;
use tokio_rusqlite::Connection;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage failure: {0}")]
    Sqlite(#[from] tokio_rusqlite::Error),
    #[error("corrupt embedding column: {0}")]
    CorruptEmbedding(#[from] serde_json::Error),
    #[error("corrupt timestamp column: {0}")]
    CorruptTimestamp(#[from] chrono::ParseError),
    #[error("corrupt status column: {0}")]
    CorruptStatus(String),
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS identities (
    position     INTEGER PRIMARY KEY,
    id           TEXT NOT NULL UNIQUE,
    display_name TEXT NOT NULL,
    embedding    TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS attendance (
    position     INTEGER PRIMARY KEY,
    id           TEXT NOT NULL UNIQUE,
    identity_id  TEXT NOT NULL,
    display_name TEXT NOT NULL,
    occurred_at  TEXT NOT NULL,
    status       TEXT NOT NULL
);
";

/// SQLite-backed repository. Clone-safe handle over one connection.
#[derive(Clone)]
pub struct SqliteRepository {
    conn: Connection,
}

impl SqliteRepository {
    /// Open (or create) the database at `path` and ensure the schema.
    pub async fn open(path: &Path) -> Result<Self, StorageError> {
        let conn = Connection::open(path.to_path_buf()).await?;
        let repo = Self { conn };
        repo.init().await?;
        tracing::info!(path = %path.display(), "repository opened");
        Ok(repo)
    }

    /// In-memory database, used by tests.
    pub async fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory().await?;
        let repo = Self { conn };
        repo.init().await?;
        Ok(repo)
    }

    async fn init(&self) -> Result<(), StorageError> {
        self.conn
            .call(|conn| {
                conn.execute_batch(SCHEMA)?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Load all enrolled identities in insertion order.
    pub async fn load_identities(&self) -> Result<Vec<EnrolledIdentity>, StorageError> {
        let rows: Vec<(String, String, String)> = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, display_name, embedding FROM identities ORDER BY position",
                )?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                    })?
                    .collect::<Result<Vec<_>, rusqlite::Error>>()?;
                Ok(rows)
            })
            .await?;

        let mut identities = Vec::with_capacity(rows.len());
        for (id, display_name, embedding_json) in rows {
            let values: Vec<f32> = serde_json::from_str(&embedding_json)?;
            identities.push(EnrolledIdentity {
                id,
                display_name,
                embedding: Embedding::new(values),
            });
        }
        Ok(identities)
    }

    /// Replace the identity collection in one transaction.
    pub async fn save_identities(
        &self,
        identities: &[EnrolledIdentity],
    ) -> Result<(), StorageError> {
        let mut rows = Vec::with_capacity(identities.len());
        for identity in identities {
            rows.push((
                identity.id.clone(),
                identity.display_name.clone(),
                serde_json::to_string(&identity.embedding.values)?,
            ));
        }
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM identities", [])?;
                {
                    let mut stmt = tx.prepare(
                        "INSERT INTO identities (id, display_name, embedding) VALUES (?1, ?2, ?3)",
                    )?;
                    for (id, display_name, embedding) in &rows {
                        stmt.execute((id, display_name, embedding))?;
                    }
                }
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Load all attendance events in insertion order (newest first, as the
    /// recorder keeps them).
    pub async fn load_events(&self) -> Result<Vec<AttendanceEvent>, StorageError> {
        let rows: Vec<(String, String, String, String, String)> = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, identity_id, display_name, occurred_at, status \
                     FROM attendance ORDER BY position",
                )?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((
                            row.get(0)?,
                            row.get(1)?,
                            row.get(2)?,
                            row.get(3)?,
                            row.get(4)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, rusqlite::Error>>()?;
                Ok(rows)
            })
            .await?;

        let mut events = Vec::with_capacity(rows.len());
        for (id, identity_id, display_name, occurred_at, status) in rows {
            let occurred_at: DateTime<Utc> =
                DateTime::parse_from_rfc3339(&occurred_at)?.with_timezone(&Utc);
            let status = AttendanceStatus::parse(&status)
                .ok_or_else(|| StorageError::CorruptStatus(status.clone()))?;
            events.push(AttendanceEvent {
                id,
                identity_id,
                display_name,
                occurred_at,
                status,
            });
        }
        Ok(events)
    }

    /// Replace the attendance collection in one transaction.
    pub async fn save_events(&self, events: &[AttendanceEvent]) -> Result<(), StorageError> {
        let rows: Vec<(String, String, String, String, String)> = events
            .iter()
            .map(|e| {
                (
                    e.id.clone(),
                    e.identity_id.clone(),
                    e.display_name.clone(),
                    e.occurred_at.to_rfc3339(),
                    e.status.as_str().to_string(),
                )
            })
            .collect();
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM attendance", [])?;
                {
                    let mut stmt = tx.prepare(
                        "INSERT INTO attendance \
                         (id, identity_id, display_name, occurred_at, status) \
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                    )?;
                    for (id, identity_id, display_name, occurred_at, status) in &rows {
                        stmt.execute((id, identity_id, display_name, occurred_at, status))?;
                    }
                }
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn identity(id: &str, values: Vec<f32>) -> EnrolledIdentity {
        EnrolledIdentity {
            id: id.to_string(),
            display_name: format!("Person {id}"),
            embedding: Embedding::new(values),
        }
    }

    fn event(id: &str, identity: &str, hour: u32) -> AttendanceEvent {
        AttendanceEvent {
            id: id.to_string(),
            identity_id: identity.to_string(),
            display_name: identity.to_uppercase(),
            occurred_at: Utc.with_ymd_and_hms(2026, 3, 10, hour, 30, 0).unwrap(),
            status: AttendanceStatus::Present,
        }
    }

    #[tokio::test]
    async fn test_identities_roundtrip_preserves_order() {
        let repo = SqliteRepository::open_in_memory().await.unwrap();
        let original = vec![
            identity("c", vec![0.5, -0.5]),
            identity("a", vec![0.0, 1.0]),
            identity("b", vec![1.0, 0.0]),
        ];
        repo.save_identities(&original).await.unwrap();

        let loaded = repo.load_identities().await.unwrap();
        assert_eq!(loaded.len(), 3);
        let ids: Vec<&str> = loaded.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
        assert_eq!(loaded[0].embedding.values, vec![0.5, -0.5]);
        assert_eq!(loaded[1].display_name, "Person a");
    }

    #[tokio::test]
    async fn test_save_replaces_collection() {
        let repo = SqliteRepository::open_in_memory().await.unwrap();
        repo.save_identities(&[identity("a", vec![0.0]), identity("b", vec![1.0])])
            .await
            .unwrap();
        repo.save_identities(&[identity("b", vec![2.0])]).await.unwrap();

        let loaded = repo.load_identities().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "b");
        assert_eq!(loaded[0].embedding.values, vec![2.0]);
    }

    #[tokio::test]
    async fn test_events_roundtrip() {
        let repo = SqliteRepository::open_in_memory().await.unwrap();
        let original = vec![event("2", "b", 10), event("1", "a", 8)];
        repo.save_events(&original).await.unwrap();

        let loaded = repo.load_events().await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id, "2");
        assert_eq!(loaded[0].occurred_at, original[0].occurred_at);
        assert_eq!(loaded[1].status, AttendanceStatus::Present);
    }

    #[tokio::test]
    async fn test_empty_collections_load_empty() {
        let repo = SqliteRepository::open_in_memory().await.unwrap();
        assert!(repo.load_identities().await.unwrap().is_empty());
        assert!(repo.load_events().await.unwrap().is_empty());
    }
}
