use super::test_helpers::{TestContext, create_test_orchestrator, create_test_orchestrator_with};
use super::*;
use crate::error::JobError;
use crate::testing::{MAGNET, metadata, payload, wait_until};
use crate::types::{FailureCause, JobFailure, JobState, Outcome, Ticket};
use std::time::Duration;


/// Collect events until `stop` matches one, panicking after five seconds
async fn events_until(
    rx: &mut broadcast::Receiver<Event>,
    stop: impl Fn(&Event) -> bool,
) -> Vec<Event> {
    let mut seen = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed");
        let done = stop(&event);
        seen.push(event);
        if done {
            return seen;
        }
    }
}

/// Current epoch of a live job
async fn ticket_of(ctx: &TestContext, id: JobId) -> Ticket {
    let cell = ctx.orchestrator.registry.lock(id).await.unwrap();
    Ticket {
        job_id: id,
        epoch: cell.epoch,
    }
}
