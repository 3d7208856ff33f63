//! Thread directory and chat coordinator against in-memory fakes: selection restore, deletes,
//! refresh races, and switching threads while a reply is streaming.

use async_trait::async_trait;
use lib::auth::{AuthState, Session, User, DEFAULT_USER_ID};
use lib::chat::{ChatCoordinator, ChatError, ChatMessage, RunSettings};
use lib::config::ThreadsConfig;
use lib::langgraph::{
    LangGraphError, PartStream, RunRequest, RunStreamer, StreamPart, Thread, ThreadStore,
};
use lib::threads::{
    DeleteOutcome, MemorySelection, SelectionStore, ThreadDirectory, NEW_THREAD_TITLE,
};
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};

type PartSender = mpsc::UnboundedSender<Result<StreamPart, LangGraphError>>;

#[derive(Default)]
struct FakeStore {
    threads: Mutex<Vec<Thread>>,
    searches: AtomicUsize,
    fail_delete: AtomicBool,
    /// When set, `search` snapshots the list, signals `entered`, and waits for the gate.
    gate: Mutex<Option<Arc<Notify>>>,
    entered: Notify,
}

impl FakeStore {
    fn with(threads: Vec<Thread>) -> Arc<Self> {
        let store = FakeStore::default();
        *store.threads.lock().unwrap() = threads;
        Arc::new(store)
    }

    fn ids(&self) -> Vec<String> {
        self.threads
            .lock()
            .unwrap()
            .iter()
            .map(|t| t.thread_id.clone())
            .collect()
    }
}

#[async_trait]
impl ThreadStore for FakeStore {
    async fn search(&self, limit: usize) -> Result<Vec<Thread>, LangGraphError> {
        let snapshot: Vec<Thread> = self
            .threads
            .lock()
            .unwrap()
            .iter()
            .take(limit)
            .cloned()
            .collect();
        self.searches.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            self.entered.notify_one();
            gate.notified().await;
        }
        Ok(snapshot)
    }

    async fn get(&self, thread_id: &str) -> Result<Thread, LangGraphError> {
        self.threads
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.thread_id == thread_id)
            .cloned()
            .ok_or_else(|| LangGraphError::NotFound(thread_id.to_string()))
    }

    async fn create(&self, metadata: Map<String, Value>) -> Result<Thread, LangGraphError> {
        let thread = Thread {
            thread_id: uuid::Uuid::new_v4().to_string(),
            created_at: None,
            updated_at: None,
            metadata,
            status: Some("idle".into()),
            values: None,
        };
        self.threads.lock().unwrap().push(thread.clone());
        Ok(thread)
    }

    async fn update(
        &self,
        thread_id: &str,
        metadata: Map<String, Value>,
    ) -> Result<Thread, LangGraphError> {
        let mut threads = self.threads.lock().unwrap();
        let t = threads
            .iter_mut()
            .find(|t| t.thread_id == thread_id)
            .ok_or_else(|| LangGraphError::NotFound(thread_id.to_string()))?;
        t.merge_metadata(&metadata);
        Ok(t.clone())
    }

    async fn delete(&self, thread_id: &str) -> Result<(), LangGraphError> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(LangGraphError::Api {
                status: 500,
                body: "boom".into(),
            });
        }
        self.threads
            .lock()
            .unwrap()
            .retain(|t| t.thread_id != thread_id);
        Ok(())
    }
}

/// Streamer whose runs are fed by the test through channels.
#[derive(Default)]
struct FakeStreamer {
    pending: Mutex<Vec<mpsc::UnboundedReceiver<Result<StreamPart, LangGraphError>>>>,
    requests: Mutex<Vec<(String, RunRequest)>>,
}

impl FakeStreamer {
    fn prepare(&self) -> PartSender {
        let (tx, rx) = mpsc::unbounded_channel();
        self.pending.lock().unwrap().push(rx);
        tx
    }
}

#[async_trait]
impl RunStreamer for FakeStreamer {
    async fn stream_run(
        &self,
        thread_id: &str,
        request: RunRequest,
    ) -> Result<PartStream, LangGraphError> {
        self.requests
            .lock()
            .unwrap()
            .push((thread_id.to_string(), request));
        let rx = self.pending.lock().unwrap().remove(0);
        Ok(Box::pin(futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })))
    }
}

fn thread(created_at: &str, messages: Value) -> Thread {
    serde_json::from_value(json!({
        "thread_id": uuid::Uuid::new_v4().to_string(),
        "metadata": { "created_at": created_at, "title": "New Chat" },
        "values": { "messages": messages }
    }))
    .unwrap()
}

fn token(text: &str) -> Result<StreamPart, LangGraphError> {
    Ok(StreamPart {
        event: "messages".into(),
        data: json!([
            { "type": "AIMessageChunk", "content": text },
            { "langgraph_node": "chatbot" }
        ]),
    })
}

fn title(text: &str) -> Result<StreamPart, LangGraphError> {
    Ok(StreamPart {
        event: "updates".into(),
        data: json!({ "generate_title": { "title": text, "description": "generated" } }),
    })
}

fn directory(store: Arc<FakeStore>, selection: Arc<MemorySelection>) -> Arc<ThreadDirectory> {
    Arc::new(ThreadDirectory::new(
        store,
        selection,
        "user-1",
        &ThreadsConfig::default(),
    ))
}

fn coordinator(dir: Arc<ThreadDirectory>, streamer: Arc<FakeStreamer>) -> Arc<ChatCoordinator> {
    Arc::new(ChatCoordinator::new(dir, streamer, RunSettings::default()))
}

fn signed_in(user_id: &str, access_token: &str) -> AuthState {
    AuthState {
        session: Some(Session {
            access_token: access_token.into(),
            refresh_token: None,
            expires_at: None,
            user: User {
                id: user_id.into(),
                email: None,
                display_name: None,
            },
        }),
        loading: false,
    }
}

fn ids(threads: &[Thread]) -> Vec<String> {
    threads.iter().map(|t| t.thread_id.clone()).collect()
}

async fn wait_for_messages(coord: &ChatCoordinator, expected: Vec<ChatMessage>) {
    let mut rx = coord.subscribe();
    tokio::time::timeout(
        Duration::from_secs(5),
        rx.wait_for(|s| s.messages == expected),
    )
    .await
    .expect("messages did not settle")
    .expect("coordinator dropped");
}

#[tokio::test]
async fn refresh_keeps_dated_threads_newest_first() {
    let old = thread("2024-01-01T00:00:00.000Z", json!([]));
    let new = thread("2024-06-01T00:00:00.000Z", json!([]));
    let mut undated = thread("x", json!([]));
    undated.metadata.remove("created_at");
    let store = FakeStore::with(vec![old.clone(), undated, new.clone()]);
    let dir = directory(store, Arc::new(MemorySelection::default()));

    dir.refresh().await;

    let ids: Vec<_> = dir.threads().await.into_iter().map(|t| t.thread_id).collect();
    assert_eq!(ids, vec![new.thread_id, old.thread_id]);
    assert!(!dir.snapshot().is_loading);
}

#[tokio::test]
async fn initialize_prefers_remembered_thread() {
    let old = thread("2024-01-01T00:00:00.000Z", json!([]));
    let new = thread("2024-06-01T00:00:00.000Z", json!([]));
    let store = FakeStore::with(vec![old.clone(), new.clone()]);
    let selection = Arc::new(MemorySelection::new(Some(old.thread_id.clone())));
    let dir = directory(store, selection);

    dir.refresh().await;
    assert_eq!(dir.initialize().await, Some(old.thread_id.clone()));
    assert_eq!(dir.current_thread_id().await, Some(old.thread_id));
}

#[tokio::test]
async fn initialize_falls_back_to_newest_then_creates() {
    let old = thread("2024-01-01T00:00:00.000Z", json!([]));
    let new = thread("2024-06-01T00:00:00.000Z", json!([]));
    let store = FakeStore::with(vec![old, new.clone()]);
    let selection = Arc::new(MemorySelection::new(Some("not-a-uuid".into())));
    let dir = directory(store, selection.clone());
    dir.refresh().await;
    assert_eq!(dir.initialize().await, Some(new.thread_id.clone()));
    assert_eq!(selection.load(), Some(new.thread_id));

    let empty = FakeStore::with(vec![]);
    let selection = Arc::new(MemorySelection::default());
    let dir = directory(empty.clone(), selection.clone());
    dir.refresh().await;
    let created = dir.initialize().await.expect("a thread is created");
    assert_eq!(empty.ids(), vec![created.clone()]);
    assert_eq!(selection.load(), Some(created.clone()));
    let listed = dir.threads().await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].title(), Some(NEW_THREAD_TITLE));
    assert_eq!(listed[0].metadata["user_id"], "user-1");
}

#[tokio::test]
async fn initialize_keeps_existing_current_thread() {
    let a = thread("2024-01-01T00:00:00.000Z", json!([]));
    let b = thread("2024-06-01T00:00:00.000Z", json!([]));
    let store = FakeStore::with(vec![a.clone(), b]);
    let dir = directory(store, Arc::new(MemorySelection::default()));
    dir.refresh().await;
    dir.set_current_thread_id(Some(a.thread_id.clone())).await;
    assert_eq!(dir.initialize().await, Some(a.thread_id));
}

#[tokio::test]
async fn deleting_active_thread_moves_to_newest_remaining() {
    let a = thread("2024-01-01T00:00:00.000Z", json!([]));
    let b = thread("2024-03-01T00:00:00.000Z", json!([]));
    let c = thread("2024-06-01T00:00:00.000Z", json!([]));
    let store = FakeStore::with(vec![a.clone(), b.clone(), c.clone()]);
    let selection = Arc::new(MemorySelection::default());
    let dir = directory(store, selection.clone());
    dir.refresh().await;
    dir.set_current_thread_id(Some(c.thread_id.clone())).await;

    assert_eq!(dir.delete_thread(&a.thread_id).await, DeleteOutcome::Removed);
    assert_eq!(dir.current_thread_id().await, Some(c.thread_id.clone()));

    let outcome = dir.delete_thread(&c.thread_id).await;
    assert_eq!(
        outcome,
        DeleteOutcome::RemovedActive {
            next: Some(b.thread_id.clone())
        }
    );
    assert_eq!(selection.load(), Some(b.thread_id.clone()));
    assert_eq!(dir.threads().await.len(), 1);
}

#[tokio::test]
async fn deleting_last_thread_creates_a_new_one() {
    let only = thread("2024-01-01T00:00:00.000Z", json!([]));
    let store = FakeStore::with(vec![only.clone()]);
    let dir = directory(store.clone(), Arc::new(MemorySelection::default()));
    dir.refresh().await;
    dir.set_current_thread_id(Some(only.thread_id.clone())).await;

    let DeleteOutcome::RemovedActive { next: Some(next) } = dir.delete_thread(&only.thread_id).await
    else {
        panic!("expected the active thread to be replaced");
    };
    assert_ne!(next, only.thread_id);
    assert_eq!(store.ids(), vec![next.clone()]);
    assert_eq!(dir.current_thread_id().await, Some(next));
}

#[tokio::test(start_paused = true)]
async fn failed_delete_keeps_state_and_schedules_refresh() {
    let a = thread("2024-01-01T00:00:00.000Z", json!([]));
    let store = FakeStore::with(vec![a.clone()]);
    store.fail_delete.store(true, Ordering::SeqCst);
    let dir = directory(store.clone(), Arc::new(MemorySelection::default()));
    dir.refresh().await;
    dir.set_current_thread_id(Some(a.thread_id.clone())).await;

    assert_eq!(dir.delete_thread(&a.thread_id).await, DeleteOutcome::Failed);
    assert_eq!(dir.threads().await.len(), 1);
    assert_eq!(dir.current_thread_id().await, Some(a.thread_id));
    assert_eq!(store.searches.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(store.searches.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn debounced_refreshes_collapse() {
    let store = FakeStore::with(vec![thread("2024-01-01T00:00:00.000Z", json!([]))]);
    let dir = directory(store.clone(), Arc::new(MemorySelection::default()));
    for _ in 0..4 {
        dir.refresh_debounced();
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(store.searches.load(Ordering::SeqCst), 1);
    assert_eq!(dir.threads().await.len(), 1);

    dir.refresh_debounced();
    dir.cancel_pending_refresh();
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(store.searches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn stale_refresh_does_not_undo_local_changes() {
    let doomed = thread("2024-01-01T00:00:00.000Z", json!([]));
    let kept = thread("2024-02-01T00:00:00.000Z", json!([]));
    let store = FakeStore::with(vec![doomed.clone(), kept.clone()]);
    let dir = directory(store.clone(), Arc::new(MemorySelection::default()));
    dir.refresh().await;

    let gate = Arc::new(Notify::new());
    *store.gate.lock().unwrap() = Some(gate.clone());
    let refreshing = {
        let dir = Arc::clone(&dir);
        tokio::spawn(async move { dir.refresh().await })
    };
    store.entered.notified().await;
    assert!(dir.snapshot().is_loading);

    // While the search is in flight: delete, create, and title a thread.
    assert_eq!(dir.delete_thread(&doomed.thread_id).await, DeleteOutcome::Removed);
    let created = dir.create_new_thread().await.unwrap();
    dir.apply_generated_title(&kept.thread_id, "Kept", None).await;

    gate.notify_one();
    refreshing.await.unwrap();

    let threads = dir.threads().await;
    let ids: Vec<_> = threads.iter().map(|t| t.thread_id.clone()).collect();
    assert_eq!(ids, vec![created.thread_id, kept.thread_id.clone()]);
    assert_eq!(threads[1].title(), Some("Kept"));
    assert!(!dir.snapshot().is_loading);
}

#[tokio::test]
async fn overlapping_refreshes_apply_in_start_order() {
    let old = thread("2024-01-01T00:00:00.000Z", json!([]));
    let store = FakeStore::with(vec![old.clone()]);
    let dir = directory(store.clone(), Arc::new(MemorySelection::default()));

    // First refresh snapshots [old] and stalls.
    let gate = Arc::new(Notify::new());
    *store.gate.lock().unwrap() = Some(gate.clone());
    let first = {
        let dir = Arc::clone(&dir);
        tokio::spawn(async move { dir.refresh().await })
    };
    store.entered.notified().await;

    // A newer thread appears remotely and a second refresh completes first.
    *store.gate.lock().unwrap() = None;
    let newer = thread("2024-03-01T00:00:00.000Z", json!([]));
    store.threads.lock().unwrap().push(newer.clone());
    dir.refresh().await;
    let expected = vec![newer.thread_id.clone(), old.thread_id.clone()];
    assert_eq!(ids(&dir.threads().await), expected);
    assert!(dir.snapshot().is_loading);

    gate.notify_one();
    first.await.unwrap();
    assert_eq!(ids(&dir.threads().await), expected);
    assert!(!dir.snapshot().is_loading);
}

#[tokio::test]
async fn set_threads_replaces_list_and_publishes() {
    let dir = directory(FakeStore::with(vec![]), Arc::new(MemorySelection::default()));
    let mut rx = dir.subscribe();

    let a = thread("2024-01-01T00:00:00.000Z", json!([]));
    let b = thread("2024-02-01T00:00:00.000Z", json!([]));
    dir.set_threads(vec![a.clone(), b.clone()]).await;
    assert!(rx.has_changed().unwrap());
    let expected = vec![a.thread_id.clone(), b.thread_id.clone()];
    assert_eq!(ids(&rx.borrow_and_update().threads), expected);
    assert_eq!(ids(&dir.threads().await), expected);

    dir.set_threads(Vec::new()).await;
    assert!(dir.snapshot().threads.is_empty());
}

#[tokio::test(start_paused = true)]
async fn directory_follows_signed_in_user() {
    let mine = thread("2024-01-01T00:00:00.000Z", json!([]));
    let store = FakeStore::with(vec![mine.clone()]);
    let selection = Arc::new(MemorySelection::default());
    let dir = directory(store.clone(), selection.clone());
    dir.refresh().await;
    dir.set_current_thread_id(Some(mine.thread_id.clone())).await;

    let (tx, rx) = watch::channel(AuthState::loading());
    let _follower = dir.follow_session(rx);
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(dir.user_id().await, "user-1");
    assert_eq!(dir.threads().await.len(), 1);
    assert_eq!(store.searches.load(Ordering::SeqCst), 1);

    // Another user: the old list and selection go at once, the reload follows the debounce.
    tx.send_replace(signed_in("user-2", "tok-a"));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(dir.user_id().await, "user-2");
    assert!(dir.threads().await.is_empty());
    assert_eq!(dir.current_thread_id().await, None);

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(store.searches.load(Ordering::SeqCst), 2);
    assert_eq!(dir.threads().await.len(), 1);
    assert_eq!(dir.current_thread_id().await, Some(mine.thread_id.clone()));

    let created = dir.create_new_thread().await.unwrap();
    assert_eq!(created.metadata["user_id"], "user-2");

    // Same user, new bearer: reload without dropping anything.
    tx.send_replace(signed_in("user-2", "tok-b"));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(dir.threads().await.len(), 2);
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(store.searches.load(Ordering::SeqCst), 3);
    assert_eq!(dir.current_thread_id().await, Some(mine.thread_id.clone()));
    assert_eq!(selection.load(), Some(created.thread_id.clone()));

    tx.send_replace(AuthState {
        session: None,
        loading: false,
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(dir.user_id().await, DEFAULT_USER_ID);
    assert!(dir.threads().await.is_empty());
}

#[tokio::test]
async fn update_metadata_merges_remote_and_local() {
    let a = thread("2024-01-01T00:00:00.000Z", json!([]));
    let store = FakeStore::with(vec![a.clone()]);
    let dir = directory(store.clone(), Arc::new(MemorySelection::default()));
    dir.refresh().await;

    let mut patch = Map::new();
    patch.insert("title".into(), json!("Renamed"));
    dir.update_thread_metadata(&a.thread_id, patch).await;

    let local = &dir.threads().await[0];
    assert_eq!(local.metadata["title"], "Renamed");
    assert!(local.metadata.contains_key("updated_at"));
    assert_eq!(local.metadata["created_at"], "2024-01-01T00:00:00.000Z");
    let remote = store.get(&a.thread_id).await.unwrap();
    assert_eq!(remote.metadata["title"], "Renamed");
}

#[tokio::test]
async fn reply_tokens_coalesce_into_one_assistant_message() {
    let a = thread("2024-01-01T00:00:00.000Z", json!([]));
    let store = FakeStore::with(vec![a.clone()]);
    let streamer = Arc::new(FakeStreamer::default());
    let dir = directory(store, Arc::new(MemorySelection::default()));
    let coord = coordinator(dir.clone(), streamer.clone());
    assert_eq!(coord.start().await, Some(a.thread_id.clone()));

    let tx = streamer.prepare();
    for part in [token("Hel"), token("lo"), title("Greeting"), token("!")] {
        tx.send(part).unwrap();
    }
    drop(tx);

    let mut seen = Vec::new();
    let mut on_token = |t: &str| seen.push(t.to_string());
    coord
        .send_message("hi", Some(&mut on_token as &mut (dyn FnMut(&str) + Send)))
        .await
        .unwrap();

    assert_eq!(seen, vec!["Hel", "lo", "!"]);
    assert_eq!(
        coord.messages().await,
        vec![ChatMessage::user("hi"), ChatMessage::assistant("Hello!")]
    );
    assert!(!coord.is_loading().await);
    let listed = dir.threads().await;
    assert_eq!(listed[0].title(), Some("Greeting"));
    assert_eq!(listed[0].metadata["description"], "generated");

    let requests = streamer.requests.lock().unwrap();
    assert_eq!(requests[0].0, a.thread_id);
    assert_eq!(requests[0].1.input["messages"][0]["content"], "hi");
}

#[tokio::test]
async fn switching_mid_stream_drops_stale_tokens() {
    let a = thread("2024-01-01T00:00:00.000Z", json!([]));
    let b = thread(
        "2024-06-01T00:00:00.000Z",
        json!([
            { "type": "human", "content": "earlier" },
            { "type": "ai", "content": "reply" }
        ]),
    );
    let store = FakeStore::with(vec![a.clone(), b.clone()]);
    let streamer = Arc::new(FakeStreamer::default());
    let dir = directory(store, Arc::new(MemorySelection::new(Some(a.thread_id.clone()))));
    let coord = coordinator(dir.clone(), streamer.clone());
    assert_eq!(coord.start().await, Some(a.thread_id.clone()));

    let tx = streamer.prepare();
    let sending = {
        let coord = Arc::clone(&coord);
        tokio::spawn(async move { coord.send_message("question", None).await })
    };
    tx.send(token("par")).unwrap();
    wait_for_messages(
        &coord,
        vec![ChatMessage::user("question"), ChatMessage::assistant("par")],
    )
    .await;

    coord.switch_thread(&b.thread_id).await.unwrap();
    let b_history = vec![ChatMessage::user("earlier"), ChatMessage::assistant("reply")];
    assert_eq!(coord.messages().await, b_history);

    tx.send(token("tial")).unwrap();
    tx.send(title("About A")).unwrap();
    drop(tx);
    sending.await.unwrap().unwrap();

    assert_eq!(coord.messages().await, b_history);
    let threads = dir.threads().await;
    let a_listed = threads.iter().find(|t| t.thread_id == a.thread_id).unwrap();
    let b_listed = threads.iter().find(|t| t.thread_id == b.thread_id).unwrap();
    assert_eq!(a_listed.title(), Some("About A"));
    assert_eq!(b_listed.title(), Some("New Chat"));
}

#[tokio::test]
async fn deleting_active_thread_mid_stream_shows_next_thread() {
    let a = thread(
        "2024-01-01T00:00:00.000Z",
        json!([{ "type": "human", "content": "old question" }]),
    );
    let b = thread("2024-06-01T00:00:00.000Z", json!([]));
    let store = FakeStore::with(vec![a.clone(), b.clone()]);
    let streamer = Arc::new(FakeStreamer::default());
    let dir = directory(store, Arc::new(MemorySelection::default()));
    let coord = coordinator(dir.clone(), streamer.clone());
    // Newest thread is selected first.
    assert_eq!(coord.start().await, Some(b.thread_id.clone()));

    let tx = streamer.prepare();
    let sending = {
        let coord = Arc::clone(&coord);
        tokio::spawn(async move { coord.send_message("hello", None).await })
    };
    tx.send(token("Hi")).unwrap();
    wait_for_messages(
        &coord,
        vec![ChatMessage::user("hello"), ChatMessage::assistant("Hi")],
    )
    .await;

    let outcome = coord.delete_thread(&b.thread_id).await;
    assert_eq!(
        outcome,
        DeleteOutcome::RemovedActive {
            next: Some(a.thread_id.clone())
        }
    );
    let a_history = vec![ChatMessage::user("old question")];
    assert_eq!(coord.messages().await, a_history);

    tx.send(token(" there")).unwrap();
    tx.send(title("Ghost")).unwrap();
    drop(tx);
    sending.await.unwrap().unwrap();

    assert_eq!(coord.messages().await, a_history);
    // The deleted thread cannot come back through a late title patch.
    assert_eq!(dir.threads().await.len(), 1);
}

#[tokio::test]
async fn send_without_selection_fails() {
    let dir = directory(FakeStore::with(vec![]), Arc::new(MemorySelection::default()));
    let coord = coordinator(dir, Arc::new(FakeStreamer::default()));
    assert!(matches!(
        coord.send_message("hi", None).await,
        Err(ChatError::NoThread)
    ));
    assert!(coord.messages().await.is_empty());
}

#[tokio::test]
async fn switch_rejects_bad_ids_and_clears_on_missing_thread() {
    let a = thread("2024-01-01T00:00:00.000Z", json!([{ "type": "human", "content": "q" }]));
    let store = FakeStore::with(vec![a.clone()]);
    let dir = directory(store, Arc::new(MemorySelection::default()));
    let coord = coordinator(dir.clone(), Arc::new(FakeStreamer::default()));
    coord.start().await;
    assert_eq!(coord.messages().await, vec![ChatMessage::user("q")]);

    assert!(matches!(
        coord.switch_thread("thread-1").await,
        Err(ChatError::InvalidThreadId(_))
    ));
    assert_eq!(dir.current_thread_id().await, Some(a.thread_id));

    let missing = uuid::Uuid::new_v4().to_string();
    assert!(matches!(
        coord.switch_thread(&missing).await,
        Err(ChatError::Remote(LangGraphError::NotFound(_)))
    ));
    assert_eq!(dir.current_thread_id().await, None);
    assert!(coord.messages().await.is_empty());
}

#[tokio::test]
async fn run_error_ends_run_and_keeps_partial_reply() {
    let a = thread("2024-01-01T00:00:00.000Z", json!([]));
    let streamer = Arc::new(FakeStreamer::default());
    let dir = directory(FakeStore::with(vec![a]), Arc::new(MemorySelection::default()));
    let coord = coordinator(dir, streamer.clone());
    coord.start().await;

    let tx = streamer.prepare();
    tx.send(token("Part")).unwrap();
    tx.send(Ok(StreamPart {
        event: "error".into(),
        data: json!({ "error": "RuntimeError", "message": "model unavailable" }),
    }))
    .unwrap();
    tx.send(token("ignored")).unwrap();

    let err = coord.send_message("hi", None).await.unwrap_err();
    assert!(matches!(err, ChatError::Run(ref m) if m == "model unavailable"));
    assert_eq!(
        coord.messages().await,
        vec![ChatMessage::user("hi"), ChatMessage::assistant("Part")]
    );
    assert!(!coord.snapshot().is_loading);
}

#[tokio::test]
async fn new_thread_becomes_empty_current_conversation() {
    let a = thread("2024-01-01T00:00:00.000Z", json!([{ "type": "human", "content": "q" }]));
    let store = FakeStore::with(vec![a]);
    let selection = Arc::new(MemorySelection::default());
    let dir = directory(store, selection.clone());
    let coord = coordinator(dir.clone(), Arc::new(FakeStreamer::default()));
    coord.start().await;
    assert_eq!(coord.messages().await.len(), 1);

    let created = coord.create_new_thread().await.unwrap();
    assert_eq!(dir.current_thread_id().await, Some(created.thread_id.clone()));
    assert_eq!(selection.load(), Some(created.thread_id.clone()));
    assert!(coord.messages().await.is_empty());
    assert_eq!(dir.threads().await[0].thread_id, created.thread_id);
}
