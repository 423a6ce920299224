//! Note records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A note as stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: Uuid,
    pub contact_id: String,
    pub body: String,
    /// User that created the note
    pub created_by: Option<String>,
    /// User behind the latest update
    pub updated_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Note {
    pub fn from_new(new: NewNote, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            contact_id: new.contact_id,
            body: new.body,
            created_by: new.created_by,
            updated_by: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewNote {
    pub contact_id: String,
    pub body: String,
    pub created_by: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NoteChanges {
    pub body: String,
    pub updated_by: Option<String>,
}
