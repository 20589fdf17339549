//! Progress feed
//!
//! Pushes progress snapshots to subscribers of a task. A poller projects
//! each watched task on a fixed interval and sends the snapshot over a
//! bounded channel per subscriber. Subscribers whose receiver is gone are
//! dropped on the next broadcast; a full channel just misses that tick.

use crate::conductor::ProgressProjector;
use sdk::{EngineError, ProgressSnapshot};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Channel buffer size per subscriber
const CHANNEL_BUFFER_SIZE: usize = 16;

/// Identifies one subscription for [`ProgressFeed::unsubscribe`]
pub type SubscriberId = u64;

pub struct ProgressFeed {
    projector: ProgressProjector,
    subscribers: Arc<Mutex<HashMap<i64, Vec<(SubscriberId, mpsc::Sender<ProgressSnapshot>)>>>>,
    next_id: AtomicU64,
}

impl ProgressFeed {
    pub fn new(projector: ProgressProjector) -> Self {
        Self {
            projector,
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Watch a task
    pub async fn subscribe(
        &self,
        task_id: i64,
    ) -> (SubscriberId, mpsc::Receiver<ProgressSnapshot>) {
        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut subscribers = self.subscribers.lock().await;
        subscribers.entry(task_id).or_default().push((id, tx));
        debug!("Subscriber {} watching task {}", id, task_id);
        (id, rx)
    }

    /// Stop watching; returns whether the subscription existed
    pub async fn unsubscribe(&self, task_id: i64, id: SubscriberId) -> bool {
        let mut subscribers = self.subscribers.lock().await;
        let Some(list) = subscribers.get_mut(&task_id) else {
            return false;
        };

        let before = list.len();
        list.retain(|(sub_id, _)| *sub_id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            subscribers.remove(&task_id);
        }
        removed
    }

    /// Number of live subscriptions across all tasks
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.lock().await.values().map(Vec::len).sum()
    }

    /// Project every watched task once and push the snapshots
    ///
    /// Returns the number of snapshots delivered.
    pub async fn broadcast_once(&self) -> usize {
        let mut subscribers = self.subscribers.lock().await;
        let mut delivered = 0;

        let task_ids: Vec<i64> = subscribers.keys().copied().collect();
        for task_id in task_ids {
            let snapshot = match self.projector.project(task_id).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    let gone = e
                        .downcast_ref::<EngineError>()
                        .map(EngineError::is_not_found)
                        .unwrap_or(false);
                    if gone {
                        debug!("Task {} no longer exists, dropping its subscribers", task_id);
                        subscribers.remove(&task_id);
                    } else {
                        warn!("Failed to project progress for task {}: {:#}", task_id, e);
                    }
                    continue;
                }
            };

            if let Some(list) = subscribers.get_mut(&task_id) {
                list.retain(|(id, tx)| match tx.try_send(snapshot.clone()) {
                    Ok(()) => {
                        delivered += 1;
                        true
                    }
                    Err(mpsc::error::TrySendError::Full(_)) => true,
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        debug!("Dropping closed subscriber {} for task {}", id, task_id);
                        false
                    }
                });
                if list.is_empty() {
                    subscribers.remove(&task_id);
                }
            }
        }

        delivered
    }

    /// Broadcast on a fixed interval until the returned handle is aborted
    pub fn spawn(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.broadcast_once().await;
            }
        })
    }
}
