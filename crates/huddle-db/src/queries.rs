use crate::models::{BlobRow, DocumentRow, UserRow};
use crate::Database;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use huddle_types::api::{Direction, NewDocument};
use huddle_types::models::Message;
use rusqlite::Connection;
use tracing::warn;

/// Fixed-width UTC timestamp so that string order equals time order.
const SORTABLE_TIMESTAMP: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

pub fn sortable_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(SORTABLE_TIMESTAMP).to_string()
}

impl Database {
    // -- Users --

    pub fn create_user(&self, id: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute("INSERT INTO users (id) VALUES (?1)", [id])?;
            Ok(())
        })
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_id(conn, id))
    }

    // -- Documents --

    /// Store a new document and return its generated id.
    pub fn insert_document(&self, collection: &str, doc: &NewDocument) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let body = serde_json::to_string(doc)?;
        let created_at = sortable_timestamp(&doc.created_at);

        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO documents (id, collection, body, created_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![id, collection, body, created_at],
            )?;
            Ok(())
        })?;

        Ok(id)
    }

    pub fn get_documents(&self, collection: &str, direction: Direction) -> Result<Vec<DocumentRow>> {
        self.with_conn(|conn| query_documents(conn, collection, direction))
    }

    /// All messages of a collection in feed order. Rows whose body no longer
    /// parses are skipped.
    pub fn get_messages(&self, collection: &str, direction: Direction) -> Result<Vec<Message>> {
        let rows = self.get_documents(collection, direction)?;
        let messages = rows
            .into_iter()
            .filter_map(|row| match document_to_message(&row) {
                Ok(m) => Some(m),
                Err(e) => {
                    warn!("Corrupt document '{}' in '{}': {}", row.id, row.collection, e);
                    None
                }
            })
            .collect();
        Ok(messages)
    }

    // -- Blobs --

    /// Record an uploaded blob. Re-uploading under the same key replaces it.
    pub fn upsert_blob(&self, key: &str, owner_id: &str, size: i64) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO blobs (key, owner_id, size) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET owner_id = excluded.owner_id, size = excluded.size",
                rusqlite::params![key, owner_id, size],
            )?;
            Ok(())
        })
    }

    pub fn get_blob(&self, key: &str) -> Result<Option<BlobRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT key, owner_id, size, created_at FROM blobs WHERE key = ?1",
                    [key],
                    |row| {
                        Ok(BlobRow {
                            key: row.get(0)?,
                            owner_id: row.get(1)?,
                            size: row.get(2)?,
                            created_at: row.get(3)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }
}

pub fn document_to_message(row: &DocumentRow) -> Result<Message> {
    let doc: NewDocument = serde_json::from_str(&row.body)
        .with_context(|| format!("invalid body for document {}", row.id))?;
    Ok(doc.into_message(row.id.clone()))
}

fn query_user_by_id(conn: &Connection, id: &str) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare("SELECT id, created_at FROM users WHERE id = ?1")?;

    let row = stmt
        .query_row([id], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                created_at: row.get(1)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn query_documents(conn: &Connection, collection: &str, direction: Direction) -> Result<Vec<DocumentRow>> {
    // rowid breaks ties between equal timestamps in insertion order
    let sql = match direction {
        Direction::Desc => {
            "SELECT id, collection, body, created_at FROM documents
             WHERE collection = ?1
             ORDER BY created_at DESC, rowid DESC"
        }
        Direction::Asc => {
            "SELECT id, collection, body, created_at FROM documents
             WHERE collection = ?1
             ORDER BY created_at ASC, rowid ASC"
        }
    };

    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map([collection], |row| {
            Ok(DocumentRow {
                id: row.get(0)?,
                collection: row.get(1)?,
                body: row.get(2)?,
                created_at: row.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn doc(text: &str, millis: i64) -> NewDocument {
        NewDocument {
            author_id: "u1".into(),
            author_name: "Ada".into(),
            text: Some(text.into()),
            image: None,
            location: None,
            created_at: Utc.timestamp_millis_opt(millis).unwrap(),
        }
    }

    #[test]
    fn documents_come_back_newest_first() {
        let db = Database::open_in_memory().unwrap();
        db.insert_document("messages", &doc("a", 1_000)).unwrap();
        db.insert_document("messages", &doc("c", 30_000)).unwrap();
        db.insert_document("messages", &doc("b", 2_000)).unwrap();
        db.insert_document("other", &doc("x", 5_000)).unwrap();

        let texts: Vec<_> = db
            .get_messages("messages", Direction::Desc)
            .unwrap()
            .into_iter()
            .map(|m| m.text.unwrap())
            .collect();
        assert_eq!(texts, vec!["c", "b", "a"]);

        let asc: Vec<_> = db
            .get_messages("messages", Direction::Asc)
            .unwrap()
            .into_iter()
            .map(|m| m.text.unwrap())
            .collect();
        assert_eq!(asc, vec!["a", "b", "c"]);
    }

    #[test]
    fn inserted_documents_get_ids() {
        let db = Database::open_in_memory().unwrap();
        let id = db.insert_document("messages", &doc("hi", 0)).unwrap();
        let list = db.get_messages("messages", Direction::Desc).unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id.as_deref(), Some(id.as_str()));
    }

    #[test]
    fn users_are_found_by_id() {
        let db = Database::open_in_memory().unwrap();
        db.create_user("u1").unwrap();
        assert_eq!(db.get_user_by_id("u1").unwrap().unwrap().id, "u1");
        assert!(db.get_user_by_id("u2").unwrap().is_none());
        assert!(db.create_user("u1").is_err());
    }

    #[test]
    fn blob_upsert_replaces_size() {
        let db = Database::open_in_memory().unwrap();
        db.create_user("u1").unwrap();
        db.upsert_blob("u1-1-photo.jpg", "u1", 10).unwrap();
        db.upsert_blob("u1-1-photo.jpg", "u1", 20).unwrap();
        let blob = db.get_blob("u1-1-photo.jpg").unwrap().unwrap();
        assert_eq!(blob.size, 20);
        assert!(db.get_blob("missing").unwrap().is_none());
    }

    #[test]
    fn reopening_file_keeps_documents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huddle.db");
        {
            let db = Database::open(&path).unwrap();
            db.insert_document("messages", &doc("kept", 0)).unwrap();
        }
        let db = Database::open(&path).unwrap();
        assert_eq!(db.get_messages("messages", Direction::Desc).unwrap().len(), 1);
    }
}
