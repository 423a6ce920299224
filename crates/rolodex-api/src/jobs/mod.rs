//! Job handlers run by the note worker

pub mod note;

pub use note::NoteSideEffectJob;
