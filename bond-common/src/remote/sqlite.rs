//! SQLite-file document store
//!
//! Stands in for a hosted document database when devices share a file (a
//! network share or synced folder). Documents live in the `documents` table
//! as JSON text with a revision counter. SQLite has no change feed, so
//! subscriptions poll the revision.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::SqlitePool;
use tracing::{debug, warn};

use super::{
    resolve_fields, ChangeCallback, Document, DocumentPath, DocumentStore, Subscription,
    WriteDocument,
};
use crate::{Error, Result};

/// Document store backed by the `documents` table of a SQLite database
#[derive(Clone)]
pub struct SqliteDocumentStore {
    pool: SqlitePool,
    poll_interval: Duration,
}

impl SqliteDocumentStore {
    pub fn new(pool: SqlitePool, poll_interval: Duration) -> Self {
        Self {
            pool,
            poll_interval,
        }
    }

    async fn read_row(pool: &SqlitePool, key: &str) -> Result<Option<(String, i64, String)>> {
        let row = sqlx::query_as::<_, (String, i64, String)>(
            "SELECT body, revision, updated_at FROM documents WHERE path = ?",
        )
        .bind(key)
        .fetch_optional(pool)
        .await?;
        Ok(row)
    }

    async fn read_revision(pool: &SqlitePool, key: &str) -> Result<Option<i64>> {
        let revision = sqlx::query_scalar::<_, i64>("SELECT revision FROM documents WHERE path = ?")
            .bind(key)
            .fetch_optional(pool)
            .await?;
        Ok(revision)
    }

    fn decode(path: &DocumentPath, body: &str, updated_at: &str) -> Result<Document> {
        let fields: Map<String, Value> = serde_json::from_str(body)
            .map_err(|e| Error::remote(path, format!("corrupt document: {}", e)))?;
        let update_time = crate::time::from_stored(updated_at)
            .ok_or_else(|| Error::remote(path, format!("bad update time '{}'", updated_at)))?;
        Ok(Document {
            fields,
            update_time,
        })
    }

    async fn load(pool: &SqlitePool, path: &DocumentPath) -> Result<Option<(Document, i64)>> {
        match Self::read_row(pool, &path.to_string()).await? {
            Some((body, revision, updated_at)) => {
                Ok(Some((Self::decode(path, &body, &updated_at)?, revision)))
            }
            None => Ok(None),
        }
    }
}

/// Server time for a new version: the writer's clock, but always after the
/// version it replaces so a device running behind cannot stamp into the past
fn next_timestamp(previous: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = crate::time::now();
    match previous {
        Some(prev) if now.timestamp_millis() <= prev.timestamp_millis() => {
            prev + chrono::Duration::milliseconds(1)
        }
        _ => now,
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn write(&self, path: &DocumentPath, doc: WriteDocument) -> Result<()> {
        let key = path.to_string();
        let remote = |e: sqlx::Error| Error::remote(path, e.to_string());

        let mut tx = self.pool.begin().await.map_err(remote)?;

        // Claiming the row first takes the write lock before the previous stamp is read
        sqlx::query(
            "INSERT INTO documents (path, body, revision, updated_at) VALUES (?, 'null', 0, '') \
             ON CONFLICT(path) DO NOTHING",
        )
        .bind(&key)
        .execute(&mut *tx)
        .await
        .map_err(remote)?;

        let previous: String =
            sqlx::query_scalar("SELECT updated_at FROM documents WHERE path = ?")
                .bind(&key)
                .fetch_one(&mut *tx)
                .await
                .map_err(remote)?;

        let update_time = next_timestamp(crate::time::from_stored(&previous));
        let body = serde_json::to_string(&resolve_fields(doc, update_time))?;

        sqlx::query(
            "UPDATE documents SET body = ?, revision = revision + 1, updated_at = ? WHERE path = ?",
        )
        .bind(&body)
        .bind(crate::time::to_stored(&update_time))
        .bind(&key)
        .execute(&mut *tx)
        .await
        .map_err(remote)?;

        tx.commit().await.map_err(remote)?;

        debug!("sqlite store: wrote {} at {}", path, update_time);
        Ok(())
    }

    async fn read(&self, path: &DocumentPath) -> Result<Option<Document>> {
        let loaded = Self::load(&self.pool, path).await?;
        Ok(loaded.map(|(doc, _)| doc))
    }

    async fn subscribe(
        &self,
        path: &DocumentPath,
        on_change: Arc<ChangeCallback>,
    ) -> Result<Subscription> {
        // Fail fast if the store is unreachable
        Self::read_revision(&self.pool, &path.to_string())
            .await
            .map_err(|e| Error::remote(path, e.to_string()))?;

        let mut last_seen: Option<i64> = None;

        let pool = self.pool.clone();
        let path = path.clone();
        let interval = self.poll_interval;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match Self::load(&pool, &path).await {
                    Ok(Some((doc, revision))) if Some(revision) != last_seen => {
                        last_seen = Some(revision);
                        on_change(doc);
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Polling {} failed: {}", path, e),
                }
            }
        });

        Ok(Subscription::new(task))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_database;
    use crate::remote::FieldValue;
    use serde_json::json;

    async fn store() -> SqliteDocumentStore {
        SqliteDocumentStore::new(
            init_memory_database().await.unwrap(),
            Duration::from_millis(10),
        )
    }

    fn doc(n: i64) -> WriteDocument {
        let mut d = WriteDocument::new();
        d.insert("n".to_string(), FieldValue::Value(json!(n)));
        d
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let store = store().await;
        let path = DocumentPath::main("voices");

        assert!(store.read(&path).await.unwrap().is_none());
        store.write(&path, doc(1)).await.unwrap();
        store.write(&path, doc(2)).await.unwrap();

        let current = store.read(&path).await.unwrap().unwrap();
        assert_eq!(current.fields["n"], 2);

        let revision = SqliteDocumentStore::read_revision(&store.pool, "voices/main")
            .await
            .unwrap();
        assert_eq!(revision, Some(2));
    }

    #[tokio::test]
    async fn test_corrupt_body_is_an_error() {
        let store = store().await;
        sqlx::query("INSERT INTO documents (path, body, updated_at) VALUES ('x/main', 'nope', '2024-01-01T00:00:00Z')")
            .execute(&store.pool)
            .await
            .unwrap();

        assert!(store.read(&DocumentPath::main("x")).await.is_err());
    }

    #[tokio::test]
    async fn test_polling_subscription_sees_new_revisions() {
        let store = store().await;
        let path = DocumentPath::main("voices");
        store.write(&path, doc(1)).await.unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let _sub = store
            .subscribe(
                &path,
                Arc::new(move |d: Document| {
                    let _ = tx.send(d.fields["n"].clone());
                }),
            )
            .await
            .unwrap();

        assert_eq!(rx.recv().await.unwrap(), 1);
        store.write(&path, doc(2)).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_stamp_never_goes_back_behind_a_fast_clock() {
        let store = store().await;
        sqlx::query(
            "INSERT INTO documents (path, body, revision, updated_at) \
             VALUES ('contracts/main', '{\"n\":0}', 1, '2999-01-01T00:00:00.000Z')",
        )
        .execute(&store.pool)
        .await
        .unwrap();

        let path = DocumentPath::main("contracts");
        let mut d = doc(1);
        d.insert("lastModified".to_string(), FieldValue::ServerTimestamp);
        store.write(&path, d).await.unwrap();

        let current = store.read(&path).await.unwrap().unwrap();
        let ahead = crate::time::from_stored("2999-01-01T00:00:00.000Z").unwrap();
        assert_eq!(current.fields["n"], 1);
        assert!(current.update_time > ahead);
        assert_eq!(
            current.fields["lastModified"],
            json!(crate::time::to_stored(&current.update_time))
        );
    }

    #[tokio::test]
    async fn test_back_to_back_writes_get_increasing_stamps() {
        let store = store().await;
        let path = DocumentPath::main("scores");

        let mut stamps = Vec::new();
        for n in 0..5 {
            store.write(&path, doc(n)).await.unwrap();
            stamps.push(store.read(&path).await.unwrap().unwrap().update_time);
        }

        assert!(stamps.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_next_timestamp() {
        assert!(next_timestamp(None) <= crate::time::now());

        let ahead = crate::time::now() + chrono::Duration::days(1);
        assert_eq!(next_timestamp(Some(ahead)), ahead + chrono::Duration::milliseconds(1));
    }
}
