//! SQLite note storage

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::backend::{NoteRepository, StorageError};
use crate::note::{NewNote, Note, NoteChanges};

const NOTE_COLUMNS: &str = "id, contact_id, body, created_by, updated_by, created_at, updated_at";

/// Notes table access
#[derive(Debug, Clone)]
pub struct SqliteNoteStore {
    pool: SqlitePool,
}

impl SqliteNoteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

pub(crate) fn from_millis(ms: i64) -> Result<DateTime<Utc>, String> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| format!("timestamp {ms} out of range"))
}

fn note_from_row(row: &SqliteRow) -> Result<Note, StorageError> {
    let id: String = row.try_get("id")?;
    let created_at: i64 = row.try_get("created_at")?;
    let updated_at: i64 = row.try_get("updated_at")?;

    Ok(Note {
        id: Uuid::parse_str(&id)
            .map_err(|_| StorageError::Serialization(format!("invalid note id {id}")))?,
        contact_id: row.try_get("contact_id")?,
        body: row.try_get("body")?,
        created_by: row.try_get("created_by")?,
        updated_by: row.try_get("updated_by")?,
        created_at: from_millis(created_at).map_err(StorageError::Serialization)?,
        updated_at: from_millis(updated_at).map_err(StorageError::Serialization)?,
    })
}

#[async_trait]
impl NoteRepository for SqliteNoteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn is_healthy(&self) -> bool {
        !self.pool.is_closed() && sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }

    async fn create(&self, note: NewNote) -> Result<Note, StorageError> {
        let note = Note::from_new(note, Utc::now());

        // Timestamps come back at the stored millisecond precision
        let row = sqlx::query(&format!(
            "INSERT INTO notes ({NOTE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?) \
             RETURNING {NOTE_COLUMNS}"
        ))
        .bind(note.id.to_string())
        .bind(&note.contact_id)
        .bind(&note.body)
        .bind(&note.created_by)
        .bind(&note.updated_by)
        .bind(note.created_at.timestamp_millis())
        .bind(note.updated_at.timestamp_millis())
        .fetch_one(&self.pool)
        .await?;

        note_from_row(&row)
    }

    async fn update(
        &self,
        contact_id: &str,
        note_id: Uuid,
        changes: NoteChanges,
    ) -> Result<Option<Note>, StorageError> {
        let row = sqlx::query(&format!(
            "UPDATE notes SET body = ?, updated_by = ?, updated_at = ? \
             WHERE id = ? AND contact_id = ? RETURNING {NOTE_COLUMNS}"
        ))
        .bind(&changes.body)
        .bind(&changes.updated_by)
        .bind(Utc::now().timestamp_millis())
        .bind(note_id.to_string())
        .bind(contact_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(note_from_row).transpose()
    }

    async fn find(&self, contact_id: &str, note_id: Uuid) -> Result<Option<Note>, StorageError> {
        let row = sqlx::query(&format!(
            "SELECT {NOTE_COLUMNS} FROM notes WHERE id = ? AND contact_id = ?"
        ))
        .bind(note_id.to_string())
        .bind(contact_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(note_from_row).transpose()
    }

    async fn list_for_contact(&self, contact_id: &str) -> Result<Vec<Note>, StorageError> {
        let rows = sqlx::query(&format!(
            "SELECT {NOTE_COLUMNS} FROM notes WHERE contact_id = ? \
             ORDER BY created_at ASC, rowid ASC"
        ))
        .bind(contact_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(note_from_row).collect()
    }

    async fn delete(&self, contact_id: &str, note_id: Uuid) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM notes WHERE id = ? AND contact_id = ?")
            .bind(note_id.to_string())
            .bind(contact_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::SqliteBackend;

    fn new_note(contact_id: &str, body: &str) -> NewNote {
        NewNote {
            contact_id: contact_id.to_string(),
            body: body.to_string(),
            created_by: Some("user-1".to_string()),
        }
    }

    #[tokio::test]
    async fn test_note_lifecycle() {
        let backend = SqliteBackend::new("sqlite::memory:").await.unwrap();
        let store = backend.notes();

        let created = store.create(new_note("c1", "met at conference")).await.unwrap();
        assert_eq!(created.created_at.timestamp_subsec_nanos() % 1_000_000, 0);
        let found = store.find("c1", created.id).await.unwrap().unwrap();
        assert_eq!(found, created);

        let updated = store
            .update(
                "c1",
                created.id,
                NoteChanges {
                    body: "follow up next week".to_string(),
                    updated_by: Some("user-2".to_string()),
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.body, "follow up next week");
        assert_eq!(updated.created_by.as_deref(), Some("user-1"));
        assert_eq!(updated.updated_by.as_deref(), Some("user-2"));
        assert!(updated.updated_at >= created.updated_at);

        assert!(store.delete("c1", created.id).await.unwrap());
        assert!(store.find("c1", created.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_notes_are_scoped_by_contact() {
        let backend = SqliteBackend::new("sqlite::memory:").await.unwrap();
        let store = backend.notes();

        let first = store.create(new_note("c1", "one")).await.unwrap();
        store.create(new_note("c1", "two")).await.unwrap();
        store.create(new_note("c2", "other")).await.unwrap();

        let notes = store.list_for_contact("c1").await.unwrap();
        let bodies: Vec<&str> = notes.iter().map(|n| n.body.as_str()).collect();
        assert_eq!(bodies, vec!["one", "two"]);

        let changes = NoteChanges {
            body: "hijack".to_string(),
            updated_by: None,
        };
        assert!(store.update("c2", first.id, changes).await.unwrap().is_none());
        assert!(!store.delete("c2", first.id).await.unwrap());
    }
}
