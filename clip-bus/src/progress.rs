use std::time::Duration;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::{
    error::PipelineError,
    pipeline::{ExportJob, ExportOutcome, JobControl, JobHandle},
};

/// Lifecycle of one export as seen by its observer.
#[derive(Debug, Clone, PartialEq)]
pub enum ExportEvent {
    Started,
    /// Percent done, 0 to 100.
    Progress(f64),
    Done(ExportOutcome),
}

pub type ExportEvents = ReceiverStream<ExportEvent>;

pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(500);

const EVENT_QUEUE: usize = 16;
/// Slots kept free for the closing `Progress(100.0)` and `Done`.
const CLOSING_EVENTS: usize = 2;

/// Queues a periodic sample unless the observer has fallen behind, in which
/// case the sample is dropped. Never waits.
fn offer_sample(tx: &mpsc::Sender<ExportEvent>, percent: f64) {
    if tx.capacity() > CLOSING_EVENTS {
        let _ = tx.try_send(ExportEvent::Progress(percent));
    }
}

/// Samples a job's progress on a fixed cadence and feeds one observer.
///
/// Every job yields exactly one `Started`, then any number of `Progress`
/// events, then exactly one `Done`, all on a single channel. A completed job
/// reports `Progress(100.0)` right before `Done`.
#[derive(Debug, Clone)]
pub struct ProgressCoordinator {
    interval: Duration,
}

impl Default for ProgressCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_INTERVAL)
    }
}

impl ProgressCoordinator {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(1)),
        }
    }

    pub fn start(&self, job: ExportJob) -> Result<(JobControl, ExportEvents), PipelineError> {
        Ok(self.watch(job.start()?))
    }

    /// Follows an already started job. The sampling task ends with the job.
    pub fn watch(&self, handle: JobHandle) -> (JobControl, ExportEvents) {
        let control = handle.control().clone();
        let (tx, rx) = mpsc::channel(EVENT_QUEUE);
        let interval = self.interval;
        let sampled = control.clone();

        tokio::spawn(async move {
            // a dropped observer does not stop the job
            let _ = tx.send(ExportEvent::Started).await;

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let done = handle.wait();
            tokio::pin!(done);

            let outcome = loop {
                tokio::select! {
                    biased;
                    outcome = &mut done => break outcome,
                    _ = ticker.tick() => offer_sample(&tx, sampled.progress() * 100.0),
                }
            };

            if outcome == ExportOutcome::Completed {
                let _ = tx.send(ExportEvent::Progress(100.0)).await;
            }
            let _ = tx.send(ExportEvent::Done(outcome)).await;
        });

        (control, ReceiverStream::new(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stalled_observer_never_blocks_sampling() {
        let (tx, mut rx) = mpsc::channel(EVENT_QUEUE);
        tx.send(ExportEvent::Started).await.unwrap();
        for i in 0..100 {
            offer_sample(&tx, i as f64);
        }
        assert_eq!(tx.capacity(), CLOSING_EVENTS);

        // the closing events still fit without waiting
        tx.try_send(ExportEvent::Progress(100.0)).unwrap();
        tx.try_send(ExportEvent::Done(ExportOutcome::Completed)).unwrap();
        drop(tx);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert_eq!(events.len(), EVENT_QUEUE);
        assert_eq!(events[0], ExportEvent::Started);
        assert_eq!(events[1], ExportEvent::Progress(0.0));
        assert_eq!(events.last(), Some(&ExportEvent::Done(ExportOutcome::Completed)));
    }
}
