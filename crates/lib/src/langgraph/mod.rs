//! Agent deployment client: remote thread store and streaming runs.
//!
//! Threads and runs are reached over HTTP with a bearer credential; run output arrives as
//! server-sent events decoded into [`StreamPart`]s.

mod client;
mod sse;
mod types;

pub use client::{
    parts_from_bytes, LangGraphClient, LangGraphError, PartStream, RunStreamer, ThreadStore,
};
pub use sse::{SseDecoder, SseEvent};
pub use types::{RunRequest, StreamPart, Thread};
