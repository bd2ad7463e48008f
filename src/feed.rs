// feed.rs
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, warn};

use crate::models::{Change, ChangeKind, Table};

const FEED_CAPACITY: usize = 256;

/// In-process fan-out of table change notifications.
#[derive(Clone)]
pub struct ChangeFeed {
    sender: broadcast::Sender<Change>,
}

impl ChangeFeed {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(FEED_CAPACITY);
        Self { sender }
    }

    pub fn publish(&self, change: Change) {
        debug!("Change on {}: {:?}", change.table.as_str(), change.kind);
        // no subscribers is fine
        let _ = self.sender.send(change);
    }

    /// Announces every table as updated, for when notifications may have been missed.
    pub fn resync(&self) {
        for table in Table::ALL {
            self.publish(Change::new(table, ChangeKind::Update));
        }
    }

    /// Runs `handler` for every change to `table` until the returned subscription is cancelled.
    ///
    /// Each invocation is spawned on its own task, so rapid notifications may
    /// produce overlapping handler runs. Nothing is coalesced. Runs still in
    /// progress are aborted when the subscription is cancelled.
    pub fn subscribe<F, Fut>(&self, table: Table, handler: F) -> Subscription
    where
        F: Fn(Change) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut receiver = self.sender.subscribe();
        let active = Arc::new(AtomicBool::new(true));
        let handlers = Arc::new(Mutex::new(JoinSet::new()));
        let flag = active.clone();
        let running = handlers.clone();

        let task = tokio::spawn(async move {
            loop {
                let change = match receiver.recv().await {
                    Ok(change) => change,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("{} subscriber lagged by {skipped} changes", table.as_str());
                        Change::new(table, ChangeKind::Update)
                    }
                    Err(RecvError::Closed) => break,
                };

                if change.table != table {
                    continue;
                }
                // checked under the lock so cancel cannot miss a fresh spawn
                let mut set = lock_handlers(&running);
                if !flag.load(Ordering::SeqCst) {
                    break;
                }
                reap(&mut set, table);
                set.spawn(handler(change));
            }
        });

        Subscription {
            table,
            active,
            task,
            handlers,
        }
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

/// Cancellation token for a feed subscription. Dropping it cancels.
pub struct Subscription {
    table: Table,
    active: Arc<AtomicBool>,
    task: JoinHandle<()>,
    handlers: Arc<Mutex<JoinSet<()>>>,
}

impl Subscription {
    pub fn table(&self) -> Table {
        self.table
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Number of handler runs started and not yet reaped.
    pub fn in_flight(&self) -> usize {
        let mut running = lock_handlers(&self.handlers);
        reap(&mut running, self.table);
        running.len()
    }

    /// Idempotent. No handler invocation starts after this returns, and
    /// the ones still running are aborted at their next await point.
    pub fn cancel(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            debug!("Unsubscribed from {}", self.table.as_str());
        }
        self.task.abort();
        lock_handlers(&self.handlers).abort_all();
    }
}

fn lock_handlers(handlers: &Mutex<JoinSet<()>>) -> MutexGuard<'_, JoinSet<()>> {
    handlers
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Drops finished handler runs, logging any that panicked.
fn reap(running: &mut JoinSet<()>, table: Table) {
    while let Some(finished) = running.try_join_next() {
        if let Err(e) = finished {
            if e.is_panic() {
                error!("{} change handler panicked: {e}", table.as_str());
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}
