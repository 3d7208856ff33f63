//! Thread directory: the active user's remote threads, the selected thread, and CRUD against the
//! remote store.
//!
//! Local mutations are journalled with a revision number so that a refresh which started before
//! them cannot roll them back when its (older) result lands: deleted ids are tombstoned, and
//! threads created or patched after the refresh began are re-applied on top of its result.
//! Refresh results are applied in start order; a result older than the last applied one is
//! dropped.

use crate::auth::AuthState;
use crate::config::ThreadsConfig;
use crate::langgraph::{LangGraphError, Thread, ThreadStore};
use crate::threads::debounce::Debouncer;
use crate::threads::selection::SelectionStore;
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;

/// Title given to freshly created threads.
pub const NEW_THREAD_TITLE: &str = "New Chat";

/// True for a hyphenated UUID v4 with the RFC 4122 variant (case-insensitive).
pub fn is_valid_thread_id(id: &str) -> bool {
    if id.len() != 36 {
        return false;
    }
    match uuid::Uuid::parse_str(id) {
        Ok(u) => u.get_version_num() == 4 && u.get_variant() == uuid::Variant::RFC4122,
        Err(_) => false,
    }
}

/// What subscribers of the directory see.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DirectorySnapshot {
    /// Newest first.
    pub threads: Vec<Thread>,
    pub current_thread_id: Option<String>,
    pub is_loading: bool,
    /// Bumped on every change of `current_thread_id`.
    pub selection_epoch: u64,
}

/// Result of [`ThreadDirectory::delete_thread`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The remote delete failed; local state is unchanged and a refresh was scheduled.
    Failed,
    /// Deleted a thread other than the selected one.
    Removed,
    /// Deleted the selected thread; `next` is the new selection.
    RemovedActive { next: Option<String> },
}

/// Local patch replayed over refresh results.
#[derive(Debug, Clone)]
struct ThreadPatch {
    thread_id: String,
    metadata: Map<String, Value>,
    values: Map<String, Value>,
}

impl ThreadPatch {
    fn apply(&self, threads: &mut [Thread]) -> bool {
        match threads.iter_mut().find(|t| t.thread_id == self.thread_id) {
            Some(t) => {
                t.merge_metadata(&self.metadata);
                t.merge_values(&self.values);
                true
            }
            None => false,
        }
    }
}

#[derive(Debug, Clone)]
enum Mutation {
    Created(Thread),
    Patched(ThreadPatch),
}

#[derive(Debug, Default)]
struct DirectoryState {
    user_id: String,
    threads: Vec<Thread>,
    current_thread_id: Option<String>,
    selection_epoch: u64,
    revision: u64,
    /// Start revisions of refreshes still in flight.
    in_flight: Vec<u64>,
    journal: Vec<(u64, Mutation)>,
    /// Deleted id -> revision of the delete. Only kept while an older refresh is in flight.
    tombstones: HashMap<String, u64>,
    /// Sequence number handed to the last started refresh.
    refresh_seq: u64,
    /// Sequence number of the last refresh whose result was applied.
    applied_seq: u64,
}

impl DirectoryState {
    fn snapshot(&self) -> DirectorySnapshot {
        DirectorySnapshot {
            threads: self.threads.clone(),
            current_thread_id: self.current_thread_id.clone(),
            is_loading: !self.in_flight.is_empty(),
            selection_epoch: self.selection_epoch,
        }
    }

    fn select(&mut self, thread_id: Option<String>) -> bool {
        if self.current_thread_id == thread_id {
            return false;
        }
        self.current_thread_id = thread_id;
        self.selection_epoch += 1;
        true
    }

    fn record(&mut self, mutation: Mutation) {
        self.revision += 1;
        if !self.in_flight.is_empty() {
            self.journal.push((self.revision, mutation));
        }
    }

    /// Merge a refresh result that started at revision `since`.
    fn reconcile(&self, fetched: Vec<Thread>, since: u64) -> Vec<Thread> {
        let mut threads: Vec<Thread> = fetched
            .into_iter()
            .filter(|t| t.created_at_raw().is_some())
            .filter(|t| !self.tombstones.contains_key(&t.thread_id))
            .collect();
        for (rev, mutation) in &self.journal {
            if *rev <= since {
                continue;
            }
            match mutation {
                Mutation::Created(t) => {
                    if !self.tombstones.contains_key(&t.thread_id)
                        && !threads.iter().any(|x| x.thread_id == t.thread_id)
                    {
                        threads.push(t.clone());
                    }
                }
                Mutation::Patched(p) => {
                    p.apply(&mut threads);
                }
            }
        }
        sort_newest_first(&mut threads);
        threads
    }

    fn finish_refresh(&mut self, since: u64) {
        if let Some(i) = self.in_flight.iter().position(|r| *r == since) {
            self.in_flight.swap_remove(i);
        }
        match self.in_flight.iter().min().copied() {
            Some(oldest) => {
                self.journal.retain(|(rev, _)| *rev > oldest);
                self.tombstones.retain(|_, rev| *rev > oldest);
            }
            None => {
                self.journal.clear();
                self.tombstones.clear();
            }
        }
    }

    fn tombstone(&mut self, thread_id: &str) {
        self.revision += 1;
        if !self.in_flight.is_empty() {
            self.tombstones.insert(thread_id.to_string(), self.revision);
        }
    }

    /// True when the refresh numbered `seq` is newer than every applied one.
    fn accept_refresh(&mut self, seq: u64) -> bool {
        if seq <= self.applied_seq {
            return false;
        }
        self.applied_seq = seq;
        true
    }
}

/// Newest `metadata.created_at` first; unparseable timestamps sort last. Stable for ties.
fn sort_newest_first(threads: &mut [Thread]) {
    threads.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub struct ThreadDirectory {
    store: Arc<dyn ThreadStore>,
    selection: Arc<dyn SelectionStore>,
    search_limit: usize,
    debouncer: Debouncer,
    state: RwLock<DirectoryState>,
    snapshot: watch::Sender<DirectorySnapshot>,
}

impl ThreadDirectory {
    pub fn new(
        store: Arc<dyn ThreadStore>,
        selection: Arc<dyn SelectionStore>,
        user_id: impl Into<String>,
        config: &ThreadsConfig,
    ) -> Self {
        let (snapshot, _) = watch::channel(DirectorySnapshot::default());
        let state = DirectoryState {
            user_id: user_id.into(),
            ..DirectoryState::default()
        };
        Self {
            store,
            selection,
            search_limit: config.search_limit,
            debouncer: Debouncer::new(Duration::from_millis(config.refresh_debounce_ms)),
            state: RwLock::new(state),
            snapshot,
        }
    }

    /// User whose threads are listed and who owns newly created threads.
    pub async fn user_id(&self) -> String {
        self.state.read().await.user_id.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DirectorySnapshot> {
        self.snapshot.subscribe()
    }

    pub fn snapshot(&self) -> DirectorySnapshot {
        self.snapshot.borrow().clone()
    }

    pub async fn threads(&self) -> Vec<Thread> {
        self.state.read().await.threads.clone()
    }

    pub async fn current_thread_id(&self) -> Option<String> {
        self.state.read().await.current_thread_id.clone()
    }

    /// Current selection and its epoch, read together.
    pub async fn selection(&self) -> (Option<String>, u64) {
        let s = self.state.read().await;
        (s.current_thread_id.clone(), s.selection_epoch)
    }

    pub async fn is_loading(&self) -> bool {
        !self.state.read().await.in_flight.is_empty()
    }

    fn publish(&self, state: &DirectoryState) {
        self.snapshot.send_replace(state.snapshot());
    }

    /// Select a thread (or clear the selection). A selected id is remembered for the next start.
    pub async fn set_current_thread_id(&self, thread_id: Option<String>) {
        {
            let mut s = self.state.write().await;
            if s.select(thread_id.clone()) {
                self.publish(&s);
            }
        }
        if let Some(id) = &thread_id {
            self.selection.save(id);
        }
    }

    /// Clear the selection only if it still points at `thread_id`.
    pub async fn clear_selection_if(&self, thread_id: &str) {
        let mut s = self.state.write().await;
        if s.current_thread_id.as_deref() == Some(thread_id) {
            s.select(None);
            self.publish(&s);
        }
    }

    /// Replace the list wholesale.
    pub async fn set_threads(&self, threads: Vec<Thread>) {
        let mut s = self.state.write().await;
        s.threads = threads;
        s.revision += 1;
        self.publish(&s);
    }

    /// Fetch the remote list (newest first, only threads with `metadata.created_at`). Errors are
    /// logged and the current list is kept.
    pub async fn refresh(&self) {
        let (since, seq) = {
            let mut s = self.state.write().await;
            let since = s.revision;
            s.in_flight.push(since);
            s.refresh_seq += 1;
            let seq = s.refresh_seq;
            self.publish(&s);
            (since, seq)
        };

        let result = self.store.search(self.search_limit).await;

        let mut s = self.state.write().await;
        match result {
            Ok(fetched) if s.accept_refresh(seq) => {
                log::debug!("threads: fetched {} threads", fetched.len());
                s.threads = s.reconcile(fetched, since);
            }
            Ok(_) => log::debug!("threads: dropping superseded refresh #{}", seq),
            Err(e) => log::error!("error fetching threads: {}", e),
        }
        s.finish_refresh(since);
        self.publish(&s);
    }

    /// Refresh after the debounce window; calls within the window collapse into one.
    pub fn refresh_debounced(self: &Arc<Self>) {
        let this = Arc::clone(self);
        self.debouncer.schedule(async move { this.refresh().await });
    }

    pub fn cancel_pending_refresh(&self) {
        self.debouncer.cancel();
    }

    /// Refresh and then restore the selection, after the debounce window. Shares the window with
    /// [`refresh_debounced`](Self::refresh_debounced).
    pub fn reload_debounced(self: &Arc<Self>) {
        let this = Arc::clone(self);
        self.debouncer.schedule(async move {
            this.refresh().await;
            this.initialize().await;
        });
    }

    /// Make `user_id` the active user. A different user drops the list and the selection, and
    /// any refresh still in flight for the previous user. Returns whether the user changed.
    pub async fn switch_user(&self, user_id: &str) -> bool {
        let mut s = self.state.write().await;
        if s.user_id == user_id {
            return false;
        }
        log::info!("threads: active user is now {}", user_id);
        s.user_id = user_id.to_string();
        s.threads.clear();
        s.revision += 1;
        s.applied_seq = s.refresh_seq;
        s.select(None);
        self.publish(&s);
        true
    }

    /// Follow the auth session: a new user or bearer credential reloads the list and the
    /// selection. States still loading are skipped.
    pub fn follow_session(self: &Arc<Self>, mut auth: watch::Receiver<AuthState>) -> JoinHandle<()> {
        let dir = Arc::clone(self);
        tokio::spawn(async move {
            let mut seen: Option<(String, Option<String>)> = None;
            loop {
                let identity = {
                    let state = auth.borrow_and_update();
                    (!state.loading).then(|| (state.user_id_or_default(), state.bearer()))
                };
                if let Some(identity) = identity {
                    if seen.as_ref() != Some(&identity) {
                        let user_changed = dir.switch_user(&identity.0).await;
                        if user_changed || seen.is_some() {
                            dir.reload_debounced();
                        }
                        seen = Some(identity);
                    }
                }
                if auth.changed().await.is_err() {
                    break;
                }
            }
        })
    }

    /// Look a thread up remotely. None for ids that are not UUID v4 and for remote failures.
    pub async fn get_thread_by_id(&self, thread_id: &str) -> Option<Thread> {
        if !is_valid_thread_id(thread_id) {
            log::error!("invalid thread id format: {:?}", thread_id);
            return None;
        }
        match self.store.get(thread_id).await {
            Ok(t) => Some(t),
            Err(e) => {
                log::error!("error getting thread: {}", e);
                None
            }
        }
    }

    /// Fetch a thread with its state, surfacing the error to the caller.
    pub async fn fetch_thread(&self, thread_id: &str) -> Result<Thread, LangGraphError> {
        self.store.get(thread_id).await
    }

    /// Restore the selection: keep a current thread that still exists, else the remembered
    /// one, else the newest listed thread, else a newly created one.
    pub async fn initialize(&self) -> Option<String> {
        if let Some(current) = self.current_thread_id().await {
            if self.get_thread_by_id(&current).await.is_some() {
                return Some(current);
            }
        }

        if let Some(stored) = self.selection.load() {
            if self.get_thread_by_id(&stored).await.is_some() {
                log::debug!("threads: restored thread {}", stored);
                self.set_current_thread_id(Some(stored.clone())).await;
                return Some(stored);
            }
        }

        let newest = self
            .state
            .read()
            .await
            .threads
            .first()
            .map(|t| t.thread_id.clone());
        if let Some(id) = newest {
            self.set_current_thread_id(Some(id.clone())).await;
            return Some(id);
        }

        let created = self.create_new_thread().await?;
        self.set_current_thread_id(Some(created.thread_id.clone()))
            .await;
        Some(created.thread_id)
    }

    /// Create a thread owned by the active user, remember it, and put it at the top of the list.
    /// Does not change the selection. Errors are logged and yield None.
    pub async fn create_new_thread(&self) -> Option<Thread> {
        let mut metadata = Map::new();
        metadata.insert("user_id".into(), Value::String(self.user_id().await));
        metadata.insert("created_at".into(), Value::String(now_rfc3339()));
        metadata.insert("title".into(), Value::String(NEW_THREAD_TITLE.into()));

        let mut thread = match self.store.create(metadata.clone()).await {
            Ok(t) => t,
            Err(e) => {
                log::error!("error creating thread: {}", e);
                return None;
            }
        };
        // The store may echo less than was sent; the list needs created_at and title.
        for (k, v) in metadata {
            thread.metadata.entry(k).or_insert(v);
        }
        self.selection.save(&thread.thread_id);

        let mut s = self.state.write().await;
        s.threads.retain(|t| t.thread_id != thread.thread_id);
        s.threads.insert(0, thread.clone());
        s.record(Mutation::Created(thread.clone()));
        self.publish(&s);
        log::info!("threads: created {}", thread.thread_id);
        Some(thread)
    }

    /// Delete remotely, then locally. Deleting the selected thread moves the selection to the
    /// newest remaining thread, or to a new thread when none remain.
    pub async fn delete_thread(self: &Arc<Self>, thread_id: &str) -> DeleteOutcome {
        if let Err(e) = self.store.delete(thread_id).await {
            log::error!("error deleting thread: {}", e);
            self.refresh_debounced();
            return DeleteOutcome::Failed;
        }

        let (was_active, next) = {
            let mut s = self.state.write().await;
            s.tombstone(thread_id);
            s.threads.retain(|t| t.thread_id != thread_id);
            let was_active = s.current_thread_id.as_deref() == Some(thread_id);
            let mut next = None;
            if was_active {
                next = s.threads.first().map(|t| t.thread_id.clone());
                s.select(next.clone());
            }
            self.publish(&s);
            (was_active, next)
        };
        if let Some(id) = &next {
            self.selection.save(id);
        }
        log::info!("threads: deleted {}", thread_id);

        if !was_active {
            return DeleteOutcome::Removed;
        }
        let mut next = self.current_thread_id().await;
        if next.is_none() {
            if let Some(created) = self.create_new_thread().await {
                self.set_current_thread_id(Some(created.thread_id.clone()))
                    .await;
                next = Some(created.thread_id);
            }
        }
        DeleteOutcome::RemovedActive { next }
    }

    /// Merge `patch` (plus `updated_at`) into the thread's metadata, remotely then locally.
    pub async fn update_thread_metadata(&self, thread_id: &str, patch: Map<String, Value>) {
        let mut metadata = patch;
        metadata.insert("updated_at".into(), Value::String(now_rfc3339()));

        if let Err(e) = self.store.update(thread_id, metadata.clone()).await {
            log::error!("error updating thread metadata: {}", e);
            return;
        }
        self.apply_patch(ThreadPatch {
            thread_id: thread_id.to_string(),
            metadata,
            values: Map::new(),
        })
        .await;
    }

    /// Local patch from the title-generation step of a run.
    pub async fn apply_generated_title(
        &self,
        thread_id: &str,
        title: &str,
        description: Option<&str>,
    ) {
        let mut fields = Map::new();
        fields.insert("title".into(), Value::String(title.to_string()));
        fields.insert(
            "description".into(),
            description.map_or(Value::Null, |d| Value::String(d.to_string())),
        );
        log::debug!("threads: title for {} is {:?}", thread_id, title);
        self.apply_patch(ThreadPatch {
            thread_id: thread_id.to_string(),
            metadata: fields.clone(),
            values: fields,
        })
        .await;
    }

    async fn apply_patch(&self, patch: ThreadPatch) {
        let mut s = self.state.write().await;
        if s.tombstones.contains_key(&patch.thread_id) {
            return;
        }
        let applied = patch.apply(&mut s.threads);
        s.record(Mutation::Patched(patch));
        if applied {
            self.publish(&s);
        }
    }
}
