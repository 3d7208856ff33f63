//! Conversation stream coordinator: sends a turn on the selected thread, folds the streamed reply
//! into the visible messages, and patches the directory with generated titles.
//!
//! The visible messages belong to one directory selection epoch. A run remembers the epoch it
//! started in; once the selection moves on (switch, create, deleting the active thread), its
//! tokens no longer touch the visible messages. Title updates still land on the run's thread.

use crate::chat::fold::{FoldEvent, MessageFold};
use crate::chat::message::{history, ChatMessage, Role};
use crate::config::Config;
use crate::langgraph::{LangGraphError, RunRequest, RunStreamer, Thread};
use crate::threads::{is_valid_thread_id, DeleteOutcome, ThreadDirectory};
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("no thread selected")]
    NoThread,
    #[error("invalid thread id format: {0:?}")]
    InvalidThreadId(String),
    #[error(transparent)]
    Remote(#[from] LangGraphError),
    #[error("run failed: {0}")]
    Run(String),
}

/// Per-run parameters sent to the deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSettings {
    pub assistant_id: String,
    pub model_name: String,
    /// Graph node whose message chunks form the reply.
    pub node: String,
}

impl RunSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            assistant_id: crate::config::resolve_assistant_id(config),
            model_name: config.agent.model_name.clone(),
            node: config.agent.node.clone(),
        }
    }
}

impl Default for RunSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatSnapshot {
    pub messages: Vec<ChatMessage>,
    pub is_loading: bool,
}

#[derive(Debug, Default)]
struct ChatState {
    messages: Vec<ChatMessage>,
    active_runs: usize,
    /// Directory selection epoch the messages belong to.
    view_epoch: u64,
}

impl ChatState {
    fn snapshot(&self) -> ChatSnapshot {
        ChatSnapshot {
            messages: self.messages.clone(),
            is_loading: self.active_runs > 0,
        }
    }
}

pub struct ChatCoordinator {
    directory: Arc<ThreadDirectory>,
    streamer: Arc<dyn RunStreamer>,
    settings: RunSettings,
    // Lock order: chat state, then directory.
    state: RwLock<ChatState>,
    snapshot: watch::Sender<ChatSnapshot>,
}

impl ChatCoordinator {
    pub fn new(
        directory: Arc<ThreadDirectory>,
        streamer: Arc<dyn RunStreamer>,
        settings: RunSettings,
    ) -> Self {
        let (snapshot, _) = watch::channel(ChatSnapshot::default());
        Self {
            directory,
            streamer,
            settings,
            state: RwLock::new(ChatState::default()),
            snapshot,
        }
    }

    pub fn directory(&self) -> &Arc<ThreadDirectory> {
        &self.directory
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    pub fn subscribe(&self) -> watch::Receiver<ChatSnapshot> {
        self.snapshot.subscribe()
    }

    pub fn snapshot(&self) -> ChatSnapshot {
        self.snapshot.borrow().clone()
    }

    pub async fn messages(&self) -> Vec<ChatMessage> {
        self.state.read().await.messages.clone()
    }

    pub async fn is_loading(&self) -> bool {
        self.state.read().await.active_runs > 0
    }

    fn publish(&self, state: &ChatState) {
        self.snapshot.send_replace(state.snapshot());
    }

    /// Load the thread list, restore the selection, and show its history.
    pub async fn start(&self) -> Option<String> {
        self.directory.refresh().await;
        let thread_id = self.directory.initialize().await?;
        let epoch = self.sync_view().await;
        self.load_history(&thread_id, epoch).await;
        Some(thread_id)
    }

    /// Send one user turn on the selected thread and stream the reply. `on_token` sees each
    /// delta that reaches the visible messages.
    pub async fn send_message(
        &self,
        content: &str,
        on_token: Option<&mut (dyn FnMut(&str) + Send)>,
    ) -> Result<(), ChatError> {
        let (thread_id, epoch) = {
            let mut s = self.state.write().await;
            let (current, epoch) = self.directory.selection().await;
            let Some(thread_id) = current else {
                log::error!("no thread id available");
                return Err(ChatError::NoThread);
            };
            if s.view_epoch != epoch {
                s.messages.clear();
                s.view_epoch = epoch;
            }
            s.messages.push(ChatMessage::user(content));
            s.active_runs += 1;
            self.publish(&s);
            (thread_id, epoch)
        };

        let result = self.run(&thread_id, epoch, content, on_token).await;

        {
            let mut s = self.state.write().await;
            s.active_runs = s.active_runs.saturating_sub(1);
            self.publish(&s);
        }
        if let Err(e) = &result {
            log::error!("error sending message: {}", e);
        }
        result
    }

    async fn run(
        &self,
        thread_id: &str,
        epoch: u64,
        content: &str,
        mut on_token: Option<&mut (dyn FnMut(&str) + Send)>,
    ) -> Result<(), ChatError> {
        let request = RunRequest::human_turn(
            &self.settings.assistant_id,
            &self.settings.model_name,
            content,
        );
        let mut parts = self.streamer.stream_run(thread_id, request).await?;
        let mut fold = MessageFold::new(self.settings.node.clone());

        while let Some(part) = parts.next().await {
            let part = part?;
            match fold.fold(&part) {
                Some(FoldEvent::Token(delta)) => {
                    if self.show_reply(epoch, fold.text()).await {
                        if let Some(cb) = on_token.as_mut() {
                            cb(&delta);
                        }
                    }
                }
                Some(FoldEvent::Title { title, description }) => {
                    self.directory
                        .apply_generated_title(thread_id, &title, description.as_deref())
                        .await;
                }
                Some(FoldEvent::RunError(message)) => return Err(ChatError::Run(message)),
                None => {}
            }
        }
        log::debug!(
            "chat: run on {} finished ({} chars)",
            thread_id,
            fold.text().len()
        );
        Ok(())
    }

    /// Put `text` in the trailing assistant message (or append one). False when the run's
    /// selection is no longer the visible one.
    async fn show_reply(&self, epoch: u64, text: &str) -> bool {
        let mut s = self.state.write().await;
        let (_, current_epoch) = self.directory.selection().await;
        if current_epoch != epoch || s.view_epoch != epoch {
            return false;
        }
        match s.messages.last_mut() {
            Some(last) if last.role == Role::Assistant => last.content = text.to_string(),
            _ => s.messages.push(ChatMessage::assistant(text)),
        }
        self.publish(&s);
        true
    }

    /// Align the visible messages with the directory selection, clearing them if it moved.
    async fn sync_view(&self) -> u64 {
        let mut s = self.state.write().await;
        let (_, epoch) = self.directory.selection().await;
        if s.view_epoch != epoch {
            s.messages.clear();
            s.view_epoch = epoch;
            self.publish(&s);
        }
        epoch
    }

    async fn show_history(&self, epoch: u64, messages: Vec<ChatMessage>) {
        let mut s = self.state.write().await;
        let (_, current_epoch) = self.directory.selection().await;
        if current_epoch != epoch {
            return;
        }
        s.messages = messages;
        s.view_epoch = epoch;
        self.publish(&s);
    }

    async fn load_history(&self, thread_id: &str, epoch: u64) {
        match self.directory.fetch_thread(thread_id).await {
            Ok(thread) => self.show_history(epoch, history(thread.messages())).await,
            Err(e) => log::error!("error loading thread history: {}", e),
        }
    }

    /// Select `thread_id` and show its history. On fetch failure the selection and the messages
    /// are cleared.
    pub async fn switch_thread(&self, thread_id: &str) -> Result<(), ChatError> {
        if !is_valid_thread_id(thread_id) {
            log::error!("invalid thread id format: {:?}", thread_id);
            return Err(ChatError::InvalidThreadId(thread_id.to_string()));
        }

        self.directory
            .set_current_thread_id(Some(thread_id.to_string()))
            .await;
        let epoch = {
            let mut s = self.state.write().await;
            let (_, epoch) = self.directory.selection().await;
            s.messages.clear();
            s.view_epoch = epoch;
            self.publish(&s);
            epoch
        };

        match self.directory.fetch_thread(thread_id).await {
            Ok(thread) => {
                self.show_history(epoch, history(thread.messages())).await;
                Ok(())
            }
            Err(e) => {
                log::error!("error switching thread: {}", e);
                self.directory.clear_selection_if(thread_id).await;
                self.sync_view().await;
                Err(e.into())
            }
        }
    }

    /// Create a thread and make it the (empty) current conversation.
    pub async fn create_new_thread(&self) -> Option<Thread> {
        let thread = self.directory.create_new_thread().await?;
        self.directory
            .set_current_thread_id(Some(thread.thread_id.clone()))
            .await;
        self.sync_view().await;
        Some(thread)
    }

    /// Delete a thread; when it was the active one, show the history of the new selection.
    pub async fn delete_thread(&self, thread_id: &str) -> DeleteOutcome {
        let outcome = self.directory.delete_thread(thread_id).await;
        if let DeleteOutcome::RemovedActive { next } = &outcome {
            let epoch = self.sync_view().await;
            if let Some(next) = next {
                self.load_history(next, epoch).await;
            }
        }
        outcome
    }
}
