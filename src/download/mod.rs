//! Download coordinator
//!
//! Owns a fixed number of transfer slots. Admitted jobs run on their own tokio task that
//! starts the transfer and samples statistics at a fixed cadence; jobs beyond the slot
//! count wait in a FIFO queue. A paused job keeps its slot. A job paused while still
//! waiting keeps its queue position but is skipped until resumed.
//!
//! The coordinator never touches the job store. It reports terminal results as
//! [`Outcome`]s on a channel and the orchestrator applies them.

mod worker;

use crate::adapters::{TransferAdapter, TransferRequest};
use crate::config::DownloadConfig;
use crate::progress::{ProgressBus, ProgressSnapshot};
use crate::types::{Epoch, JobId, Outcome, Ticket};
use crate::utils::lock;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Immutable projection of a job handed to the download coordinator
#[derive(Debug, Clone)]
pub struct TransferPlan {
    /// Job identity and epoch
    pub ticket: Ticket,
    /// What the transfer adapter is asked to start
    pub request: TransferRequest,
    /// Sum of the selected files' sizes
    pub selected_bytes: u64,
    /// Start held (a paused job restored after restart)
    pub start_paused: bool,
}

/// Where a job sits in a coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Occupying a slot
    Active,
    /// Queued for a slot
    Waiting,
    /// Not known to the coordinator
    Untracked,
}

/// Bounded pool of concurrent transfers
#[derive(Clone)]
pub struct DownloadCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    adapter: Arc<dyn TransferAdapter>,
    bus: ProgressBus,
    outcomes: mpsc::UnboundedSender<Outcome>,
    config: DownloadConfig,
    slots: Mutex<Slots>,
}

#[derive(Default)]
struct Slots {
    active: HashMap<JobId, ActiveTransfer>,
    waiting: VecDeque<WaitingTransfer>,
    closed: bool,
}

struct ActiveTransfer {
    epoch: Epoch,
    cancel: CancellationToken,
    paused: bool,
}

struct WaitingTransfer {
    plan: TransferPlan,
    held: bool,
}

impl DownloadCoordinator {
    /// Create a coordinator reporting outcomes on `outcomes`
    pub fn new(
        adapter: Arc<dyn TransferAdapter>,
        bus: ProgressBus,
        outcomes: mpsc::UnboundedSender<Outcome>,
        config: DownloadConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                adapter,
                bus,
                outcomes,
                config,
                slots: Mutex::new(Slots::default()),
            }),
        }
    }

    /// Start the transfer now if a slot is free, otherwise queue it
    pub fn admit(&self, plan: TransferPlan) {
        let job_id = plan.ticket.job_id;
        {
            let mut slots = lock(&self.inner.slots);
            if slots.closed {
                tracing::debug!(job_id = %job_id, "coordinator closed, ignoring admission");
                return;
            }
            if slots.active.contains_key(&job_id)
                || slots.waiting.iter().any(|w| w.plan.ticket.job_id == job_id)
            {
                tracing::warn!(job_id = %job_id, "job already admitted");
                return;
            }
            slots.waiting.push_back(WaitingTransfer { plan, held: false });
            tracing::debug!(
                job_id = %job_id,
                waiting = slots.waiting.len(),
                active = slots.active.len(),
                "transfer queued"
            );
        }
        self.pump();
    }

    /// Record a pause/resume without talking to the adapter
    ///
    /// Returns where the job sits; only [`SlotState::Active`] jobs need the adapter told,
    /// see [`forward_pause`](Self::forward_pause).
    pub fn set_paused(&self, job_id: JobId, paused: bool) -> SlotState {
        let state = {
            let mut slots = lock(&self.inner.slots);
            if let Some(active) = slots.active.get_mut(&job_id) {
                active.paused = paused;
                SlotState::Active
            } else if let Some(waiting) = slots
                .waiting
                .iter_mut()
                .find(|w| w.plan.ticket.job_id == job_id)
            {
                waiting.held = paused;
                SlotState::Waiting
            } else {
                SlotState::Untracked
            }
        };
        if state == SlotState::Waiting && !paused {
            self.pump();
        }
        state
    }

    /// Tell the adapter to pause or resume an active transfer
    pub async fn forward_pause(&self, job_id: JobId, paused: bool) {
        let limit = self.inner.config.adapter_timeout;
        let call = async {
            if paused {
                self.inner.adapter.pause(job_id).await
            } else {
                self.inner.adapter.resume(job_id).await
            }
        };
        match tokio::time::timeout(limit, call).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(job_id = %job_id, paused, error = %e, "adapter rejected pause/resume")
            }
            Err(_) => {
                tracing::warn!(job_id = %job_id, paused, "adapter pause/resume timed out")
            }
        }
    }

    /// Pause a job, forwarding to the adapter if it is active
    pub async fn pause(&self, job_id: JobId) -> SlotState {
        let state = self.set_paused(job_id, true);
        if state == SlotState::Active {
            self.forward_pause(job_id, true).await;
        }
        state
    }

    /// Resume a job, forwarding to the adapter if it is active
    pub async fn resume(&self, job_id: JobId) -> SlotState {
        let state = self.set_paused(job_id, false);
        if state == SlotState::Active {
            self.forward_pause(job_id, false).await;
        }
        state
    }

    /// Forget a job without talking to the adapter
    ///
    /// A waiting job leaves the queue. An active job's worker is cancelled and its slot
    /// handed to the next waiting job.
    pub fn detach(&self, job_id: JobId) -> SlotState {
        let state = {
            let mut slots = lock(&self.inner.slots);
            if let Some(active) = slots.active.remove(&job_id) {
                active.cancel.cancel();
                SlotState::Active
            } else if let Some(pos) = slots
                .waiting
                .iter()
                .position(|w| w.plan.ticket.job_id == job_id)
            {
                slots.waiting.remove(pos);
                SlotState::Waiting
            } else {
                SlotState::Untracked
            }
        };
        if state == SlotState::Active {
            self.pump();
        }
        state
    }

    /// Detach a job and, if it was transferring, stop it in the adapter
    pub async fn cancel(&self, job_id: JobId, purge_data: bool) -> SlotState {
        let state = self.detach(job_id);
        if state == SlotState::Active {
            self.stop_transfer(job_id, purge_data).await;
        }
        state
    }

    /// Ask the adapter to stop a transfer, logging failures
    pub async fn stop_transfer(&self, job_id: JobId, purge_data: bool) {
        let limit = self.inner.config.adapter_timeout;
        match tokio::time::timeout(limit, self.inner.adapter.stop(job_id, purge_data)).await {
            Ok(Ok(())) => {
                tracing::info!(job_id = %job_id, purge_data, "transfer stopped")
            }
            Ok(Err(e)) => {
                tracing::warn!(job_id = %job_id, error = %e, "adapter failed to stop transfer")
            }
            Err(_) => tracing::warn!(job_id = %job_id, "adapter stop timed out"),
        }
    }

    /// Cancel every worker and refuse further admissions
    pub fn shutdown(&self) {
        let mut slots = lock(&self.inner.slots);
        slots.closed = true;
        for (_, active) in slots.active.drain() {
            active.cancel.cancel();
        }
        slots.waiting.clear();
    }

    /// Jobs currently holding a slot
    pub fn active_count(&self) -> usize {
        lock(&self.inner.slots).active.len()
    }

    /// Jobs waiting for a slot, in admission order
    pub fn waiting(&self) -> Vec<JobId> {
        lock(&self.inner.slots)
            .waiting
            .iter()
            .map(|w| w.plan.ticket.job_id)
            .collect()
    }

    /// Where a job currently sits
    pub fn slot_state(&self, job_id: JobId) -> SlotState {
        let slots = lock(&self.inner.slots);
        if slots.active.contains_key(&job_id) {
            SlotState::Active
        } else if slots.waiting.iter().any(|w| w.plan.ticket.job_id == job_id) {
            SlotState::Waiting
        } else {
            SlotState::Untracked
        }
    }

    /// Fill free slots from the head of the queue, skipping held jobs
    fn pump(&self) {
        let mut admitted = Vec::new();
        {
            let mut slots = lock(&self.inner.slots);
            while !slots.closed && slots.active.len() < self.inner.config.max_concurrent_downloads
            {
                let Some(pos) = slots.waiting.iter().position(|w| !w.held) else {
                    break;
                };
                let Some(next) = slots.waiting.remove(pos) else {
                    break;
                };
                let cancel = CancellationToken::new();
                slots.active.insert(
                    next.plan.ticket.job_id,
                    ActiveTransfer {
                        epoch: next.plan.ticket.epoch,
                        cancel: cancel.clone(),
                        paused: next.plan.start_paused,
                    },
                );
                admitted.push((next.plan, cancel));
            }
        }

        for (plan, cancel) in admitted {
            tracing::info!(
                job_id = %plan.ticket.job_id,
                selected_bytes = plan.selected_bytes,
                "transfer admitted"
            );
            self.spawn_worker(plan, cancel);
        }
    }

    /// Free the slot held under `ticket` and admit the next job
    fn release(&self, ticket: Ticket) {
        let released = {
            let mut slots = lock(&self.inner.slots);
            match slots.active.get(&ticket.job_id) {
                Some(active) if active.epoch == ticket.epoch => {
                    slots.active.remove(&ticket.job_id);
                    true
                }
                _ => false,
            }
        };
        if released {
            self.pump();
        }
    }

    /// `Some(paused)` while the ticket still owns its slot
    fn paused_flag(&self, ticket: Ticket) -> Option<bool> {
        lock(&self.inner.slots)
            .active
            .get(&ticket.job_id)
            .filter(|active| active.epoch == ticket.epoch)
            .map(|active| active.paused)
    }

    /// Publish only if the ticket owns its slot and is not paused
    ///
    /// Checked under the slot lock so nothing is published once `set_paused` returns.
    fn publish_if_running(&self, ticket: Ticket, snapshot: ProgressSnapshot) -> bool {
        let slots = lock(&self.inner.slots);
        let running = slots
            .active
            .get(&ticket.job_id)
            .is_some_and(|active| active.epoch == ticket.epoch && !active.paused);
        if running {
            self.inner.bus.publish(snapshot);
        }
        running
    }

    fn report(&self, outcome: Outcome) {
        if self.inner.outcomes.send(outcome).is_err() {
            tracing::debug!("outcome receiver gone, dropping download outcome");
        }
    }
}
