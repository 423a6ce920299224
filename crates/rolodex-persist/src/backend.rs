//! Note repository trait and error types

use async_trait::async_trait;
use chrono::Utc;
use std::fmt::Debug;
use uuid::Uuid;

use crate::note::{NewNote, Note, NoteChanges};

/// Storage error types
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for StorageError {
    fn from(e: sqlx::Error) -> Self {
        if is_connection_error(&e) {
            StorageError::Connection(e.to_string())
        } else {
            StorageError::Query(e.to_string())
        }
    }
}

/// Errors that mean the database cannot be reached at all
pub fn is_connection_error(e: &sqlx::Error) -> bool {
    matches!(
        e,
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut | sqlx::Error::Io(_)
    )
}

/// Note persistence, scoped by contact (Object Safe)
#[async_trait]
pub trait NoteRepository: Send + Sync + Debug {
    /// Get the backend name
    fn name(&self) -> &str;

    /// Check if backend is healthy
    async fn is_healthy(&self) -> bool;

    /// Insert a note and return it as stored
    async fn create(&self, note: NewNote) -> Result<Note, StorageError>;

    /// Apply changes and return the note as stored afterwards, `None` if the
    /// contact has no such note
    async fn update(
        &self,
        contact_id: &str,
        note_id: Uuid,
        changes: NoteChanges,
    ) -> Result<Option<Note>, StorageError>;

    async fn find(&self, contact_id: &str, note_id: Uuid) -> Result<Option<Note>, StorageError>;

    /// Notes of a contact, oldest first
    async fn list_for_contact(&self, contact_id: &str) -> Result<Vec<Note>, StorageError>;

    async fn delete(&self, contact_id: &str, note_id: Uuid) -> Result<bool, StorageError>;
}

/// In-memory note repository (for testing)
#[derive(Debug, Default)]
pub struct MemoryNoteStore {
    notes: tokio::sync::RwLock<Vec<Note>>,
}

impl MemoryNoteStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NoteRepository for MemoryNoteStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn is_healthy(&self) -> bool {
        true
    }

    async fn create(&self, note: NewNote) -> Result<Note, StorageError> {
        let note = Note::from_new(note, Utc::now());
        self.notes.write().await.push(note.clone());
        Ok(note)
    }

    async fn update(
        &self,
        contact_id: &str,
        note_id: Uuid,
        changes: NoteChanges,
    ) -> Result<Option<Note>, StorageError> {
        let mut notes = self.notes.write().await;
        let Some(note) = notes
            .iter_mut()
            .find(|n| n.id == note_id && n.contact_id == contact_id)
        else {
            return Ok(None);
        };
        note.body = changes.body;
        note.updated_by = changes.updated_by;
        note.updated_at = Utc::now();
        Ok(Some(note.clone()))
    }

    async fn find(&self, contact_id: &str, note_id: Uuid) -> Result<Option<Note>, StorageError> {
        let notes = self.notes.read().await;
        Ok(notes
            .iter()
            .find(|n| n.id == note_id && n.contact_id == contact_id)
            .cloned())
    }

    async fn list_for_contact(&self, contact_id: &str) -> Result<Vec<Note>, StorageError> {
        let notes = self.notes.read().await;
        Ok(notes
            .iter()
            .filter(|n| n.contact_id == contact_id)
            .cloned()
            .collect())
    }

    async fn delete(&self, contact_id: &str, note_id: Uuid) -> Result<bool, StorageError> {
        let mut notes = self.notes.write().await;
        let before = notes.len();
        notes.retain(|n| !(n.id == note_id && n.contact_id == contact_id));
        Ok(notes.len() != before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_note_store() {
        let store = MemoryNoteStore::new();

        let note = store
            .create(NewNote {
                contact_id: "c1".to_string(),
                body: "first".to_string(),
                created_by: Some("u1".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(note.created_by.as_deref(), Some("u1"));
        assert_eq!(note.updated_by, None);

        // Scoped by contact
        assert!(store.find("c2", note.id).await.unwrap().is_none());

        let updated = store
            .update(
                "c1",
                note.id,
                NoteChanges {
                    body: "second".to_string(),
                    updated_by: Some("u2".to_string()),
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.body, "second");
        assert_eq!(updated.created_by.as_deref(), Some("u1"));
        assert_eq!(updated.updated_by.as_deref(), Some("u2"));

        assert_eq!(store.list_for_contact("c1").await.unwrap().len(), 1);
        assert!(store.delete("c1", note.id).await.unwrap());
        assert!(!store.delete("c1", note.id).await.unwrap());
    }
}
