//! # Rolodex Persistence
//!
//! SQLite storage for notes and the durable note-job broker.
//!
//! Supports:
//! - In-memory note store (for testing)
//! - SQLite note store and queue broker sharing one database

pub mod backend;
pub mod note;
pub mod note_store;
pub mod queue;
pub mod sqlite;

pub use backend::{MemoryNoteStore, NoteRepository, StorageError};
pub use note::{NewNote, Note, NoteChanges};
pub use note_store::SqliteNoteStore;
pub use queue::SqliteQueueBackend;
pub use sqlite::{SqliteBackend, SqliteConfig};
