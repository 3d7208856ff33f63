//! Conversation stream coordinator: user turns, streamed replies, and thread switching.

mod coordinator;
mod fold;
mod message;

pub use coordinator::{ChatCoordinator, ChatError, ChatSnapshot, RunSettings};
pub use fold::{FoldEvent, MessageFold};
pub use message::{content_text, history, thread_preview, ChatMessage, Role};
