//! Thread directory manager: remote thread list, current selection, debounced refresh, and the
//! persisted last-used thread.

mod debounce;
mod directory;
mod selection;

pub use debounce::Debouncer;
pub use directory::{
    is_valid_thread_id, DeleteOutcome, DirectorySnapshot, ThreadDirectory, NEW_THREAD_TITLE,
};
pub use selection::{LocalStore, MemorySelection, SelectionStore, THREAD_ID_KEY};
