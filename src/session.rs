//! Session state store
//!
//! Per-query in-memory record of workflow snapshots with ordered fan-out to
//! subscribers. This is the only observability surface the engine has:
//! every node transition lands here, in order, and observers follow a run
//! through its snapshots. Ephemeral and process-local by contract.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::workflow::WorkflowState;

/// Buffered snapshots per query channel
const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Handle to an active subscription task
#[derive(Debug)]
pub struct SubscriptionHandle {
    id: Uuid,
    query_id: Uuid,
    task: tokio::task::JoinHandle<()>,
}

impl SubscriptionHandle {
    /// Get the subscription ID
    pub fn id(&self) -> &Uuid {
        &self.id
    }

    /// Get the subscribed query ID
    pub fn query_id(&self) -> &Uuid {
        &self.query_id
    }

    /// Stop delivering snapshots to the handler
    pub fn unsubscribe(self) {
        self.task.abort();
    }
}

/// In-memory store of workflow snapshots
#[derive(Debug, Clone)]
pub struct SessionStore {
    snapshots: Arc<RwLock<HashMap<Uuid, WorkflowState>>>,
    channels: Arc<RwLock<HashMap<Uuid, broadcast::Sender<WorkflowState>>>>,
    capacity: usize,
}

impl SessionStore {
    /// Create a store with the default channel capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a store with a custom per-query channel capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            snapshots: Arc::new(RwLock::new(HashMap::new())),
            channels: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    async fn sender(&self, query_id: Uuid) -> broadcast::Sender<WorkflowState> {
        let mut channels = self.channels.write().await;
        channels
            .entry(query_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Store a snapshot and fan it out to subscribers.
    ///
    /// Snapshots for one query are published in the order the engine emits
    /// them; subscribers observe that same total order.
    pub async fn put(&self, snapshot: WorkflowState) {
        let query_id = snapshot.query_id;
        {
            let mut snapshots = self.snapshots.write().await;
            snapshots.insert(query_id, snapshot.clone());
        }

        let sender = self.sender(query_id).await;
        // Delivery is best-effort; a send with no receivers is fine
        let _ = sender.send(snapshot);
    }

    /// Get the latest snapshot for a query
    pub async fn get(&self, query_id: &Uuid) -> Option<WorkflowState> {
        self.snapshots.read().await.get(query_id).cloned()
    }

    /// Subscribe to a query's snapshot stream.
    ///
    /// Subscribe before starting the run to observe it from the first
    /// snapshot; a late subscriber only sees snapshots from that point on.
    pub async fn subscribe(&self, query_id: Uuid) -> broadcast::Receiver<WorkflowState> {
        self.sender(query_id).await.subscribe()
    }

    /// Subscribe with a handler invoked for every snapshot.
    ///
    /// The handler runs on a spawned task until the handle is unsubscribed
    /// or the store is dropped.
    pub async fn subscribe_with<F>(&self, query_id: Uuid, handler: F) -> SubscriptionHandle
    where
        F: Fn(WorkflowState) -> Pin<Box<dyn Future<Output = ()> + Send>>
            + Send
            + Sync
            + 'static,
    {
        let mut receiver = self.subscribe(query_id).await;
        let task = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(snapshot) => handler(snapshot).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(
                            %query_id,
                            "snapshot subscriber lagged, skipped {} snapshots",
                            skipped
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        SubscriptionHandle {
            id: Uuid::new_v4(),
            query_id,
            task,
        }
    }

    /// Drop the record and channel for a completed query
    pub async fn remove(&self, query_id: &Uuid) {
        self.snapshots.write().await.remove(query_id);
        self.channels.write().await.remove(query_id);
    }

    /// Number of queries currently recorded
    pub async fn len(&self) -> usize {
        self.snapshots.read().await.len()
    }

    /// Whether the store has no recorded queries
    pub async fn is_empty(&self) -> bool {
        self.snapshots.read().await.is_empty()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkflowConfig;
    use crate::workflow::WorkflowNode;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn snapshot(query_id: Uuid) -> WorkflowState {
        WorkflowState::new(query_id, "question", &WorkflowConfig::default())
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let store = SessionStore::new();
        let query_id = Uuid::new_v4();

        store.put(snapshot(query_id)).await;

        let fetched = store.get(&query_id).await.unwrap();
        assert_eq!(fetched.query_id, query_id);
        assert_eq!(fetched.current_node, WorkflowNode::Start);
    }

    #[tokio::test]
    async fn test_get_unknown_query() {
        let store = SessionStore::new();
        assert!(store.get(&Uuid::new_v4()).await.is_none());
    }

    #[tokio::test]
    async fn test_subscribers_observe_in_order() {
        let store = SessionStore::new();
        let query_id = Uuid::new_v4();
        let mut receiver = store.subscribe(query_id).await;

        let mut state = snapshot(query_id);
        store.put(state.clone()).await;
        state.record_transition(WorkflowNode::RewriteQuery, None);
        store.put(state.clone()).await;
        state.record_transition(WorkflowNode::PublishQuery, None);
        store.put(state.clone()).await;

        let nodes: Vec<WorkflowNode> = vec![
            receiver.recv().await.unwrap().current_node,
            receiver.recv().await.unwrap().current_node,
            receiver.recv().await.unwrap().current_node,
        ];
        assert_eq!(
            nodes,
            vec![
                WorkflowNode::Start,
                WorkflowNode::RewriteQuery,
                WorkflowNode::PublishQuery
            ]
        );
    }

    #[tokio::test]
    async fn test_subscribe_with_handler() {
        let store = SessionStore::new();
        let query_id = Uuid::new_v4();
        let seen = Arc::new(AtomicUsize::new(0));

        let seen_clone = seen.clone();
        let handle = store
            .subscribe_with(query_id, move |_snapshot| {
                let seen = seen_clone.clone();
                Box::pin(async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                })
            })
            .await;

        store.put(snapshot(query_id)).await;
        store.put(snapshot(query_id)).await;

        // Give the handler task a moment to drain
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 2);

        handle.unsubscribe();
    }

    #[tokio::test]
    async fn test_concurrent_writer_and_reader() {
        let store = SessionStore::new();
        let query_id = Uuid::new_v4();

        let writer = {
            let store = store.clone();
            tokio::spawn(async move {
                for _ in 0..50 {
                    store.put(snapshot(query_id)).await;
                }
            })
        };
        let reader = {
            let store = store.clone();
            tokio::spawn(async move {
                for _ in 0..50 {
                    let _ = store.get(&query_id).await;
                }
            })
        };

        writer.await.unwrap();
        reader.await.unwrap();
    }

    #[tokio::test]
    async fn test_remove() {
        let store = SessionStore::new();
        let query_id = Uuid::new_v4();

        store.put(snapshot(query_id)).await;
        assert_eq!(store.len().await, 1);

        store.remove(&query_id).await;
        assert!(store.is_empty().await);
    }
}
