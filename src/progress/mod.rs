//! Progress bus: latest-wins fan-out of [`ProgressSnapshot`]s
//!
//! Producers never block. Each subscriber owns a mailbox keyed by job id, so a subscriber
//! that falls behind only loses intermediate snapshots; the newest one for every job is
//! always delivered. New subscribers see future snapshots only. For an initial view they
//! should query [`ProgressBus::latest`] (or `Orchestrator::snapshot`).

mod rate;
mod snapshot;

pub use rate::RateWindow;
pub use snapshot::{PhaseStats, ProgressSnapshot, eta_secs, percent_of};

use crate::types::JobId;
use crate::utils::lock;
use futures::Stream;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::Notify;

/// In-memory publish/subscribe hub for progress snapshots
#[derive(Clone, Default)]
pub struct ProgressBus {
    inner: Arc<BusInner>,
}

#[derive(Default)]
struct BusInner {
    latest: Mutex<HashMap<JobId, ProgressSnapshot>>,
    subscribers: Mutex<Vec<Weak<Mailbox>>>,
}

#[derive(Default)]
struct Mailbox {
    pending: Mutex<Pending>,
    notify: Notify,
    closed: AtomicBool,
}

#[derive(Default)]
struct Pending {
    order: VecDeque<JobId>,
    snapshots: HashMap<JobId, ProgressSnapshot>,
}

impl Mailbox {
    fn offer(&self, snapshot: ProgressSnapshot) {
        {
            let mut pending = lock(&self.pending);
            let id = snapshot.job_id;
            if pending.snapshots.insert(id, snapshot).is_none() {
                pending.order.push_back(id);
            }
        }
        self.notify.notify_one();
    }

    fn take(&self) -> Option<(JobId, ProgressSnapshot)> {
        let mut pending = lock(&self.pending);
        while let Some(id) = pending.order.pop_front() {
            if let Some(snapshot) = pending.snapshots.remove(&id) {
                return Some((id, snapshot));
            }
        }
        None
    }

    fn drop_job(&self, id: JobId) {
        lock(&self.pending).snapshots.remove(&id);
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }
}

impl Drop for BusInner {
    fn drop(&mut self) {
        let subscribers = std::mem::take(
            self.subscribers
                .get_mut()
                .unwrap_or_else(std::sync::PoisonError::into_inner),
        );
        for mailbox in subscribers.iter().filter_map(Weak::upgrade) {
            mailbox.close();
        }
    }
}

impl ProgressBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a snapshot to every live subscriber and remember it as the job's latest
    pub fn publish(&self, snapshot: ProgressSnapshot) {
        lock(&self.inner.latest).insert(snapshot.job_id, snapshot.clone());

        let mailboxes: Vec<Arc<Mailbox>> = {
            let mut subscribers = lock(&self.inner.subscribers);
            subscribers.retain(|weak| weak.strong_count() > 0);
            subscribers.iter().filter_map(Weak::upgrade).collect()
        };
        for mailbox in mailboxes {
            mailbox.offer(snapshot.clone());
        }
    }

    /// Register a new subscriber; only snapshots published from now on are delivered
    pub fn subscribe(&self) -> ProgressSubscription {
        let mailbox = Arc::new(Mailbox::default());
        lock(&self.inner.subscribers).push(Arc::downgrade(&mailbox));
        ProgressSubscription { mailbox }
    }

    /// Most recent snapshot published for a job during this session
    pub fn latest(&self, id: JobId) -> Option<ProgressSnapshot> {
        lock(&self.inner.latest).get(&id).cloned()
    }

    /// Drop everything known about a job (cached and undelivered snapshots)
    pub fn forget(&self, id: JobId) {
        lock(&self.inner.latest).remove(&id);
        let mailboxes: Vec<Arc<Mailbox>> = lock(&self.inner.subscribers)
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for mailbox in mailboxes {
            mailbox.drop_job(id);
        }
    }

    /// Number of subscribers still connected
    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner.subscribers)
            .iter()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}

/// Receiving end of a [`ProgressBus`] subscription
///
/// Dropping the subscription disconnects it.
pub struct ProgressSubscription {
    mailbox: Arc<Mailbox>,
}

impl ProgressSubscription {
    /// Wait for the next snapshot; `None` once the bus is gone and nothing is pending
    pub async fn recv(&mut self) -> Option<(JobId, ProgressSnapshot)> {
        loop {
            if let Some(item) = self.mailbox.take() {
                return Some(item);
            }
            if self.mailbox.closed.load(Ordering::Acquire) {
                return None;
            }
            self.mailbox.notify.notified().await;
        }
    }

    /// Next pending snapshot without waiting
    pub fn try_recv(&mut self) -> Option<(JobId, ProgressSnapshot)> {
        self.mailbox.take()
    }

    /// Convert into a stream of `(JobId, ProgressSnapshot)`
    pub fn into_stream(self) -> impl Stream<Item = (JobId, ProgressSnapshot)> + Send {
        futures::stream::unfold(self, |mut subscription| async move {
            let item = subscription.recv().await?;
            Some((item, subscription))
        })
    }
}
