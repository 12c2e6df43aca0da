//! Historical backfill
//!
//! Walks a virtual clock from `begin` to `end`, runs one simulation tick per
//! slot and publishes the readings as one queue message per tick. A batch is
//! published (with bounded retry) before the clock advances again, so batches
//! reach the queue in slot order.

use chrono::{Duration, NaiveDateTime};
use rand::Rng;
use serde::Serialize;
use tracing::{debug, info};

use wastetrack_domain::model::TimeSlot;
use wastetrack_domain::repository::MessageQueue;
use wastetrack_domain::service::TruckSimulation;
use wastetrack_infra::wire::encode_telemetry_batch;
use wastetrack_types::{Error, QueueMessage, Result, TIMESLOT_ATTRIBUTE};

use crate::retry::{publish_with_retry, RetryPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    /// Moving the clock and generating the next batch
    Advancing,
    /// Publishing the current batch
    Flushing,
    Done,
}

/// Progress after each published batch
#[derive(Debug, Clone, Copy)]
pub struct BackfillProgress {
    pub batch: u64,
    pub total: u64,
    pub slot: TimeSlot,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct BackfillReport {
    pub batches: u64,
    pub events: u64,
    /// Sends beyond the first, summed over all batches
    pub retries: u64,
    pub first_slot: Option<String>,
    pub last_slot: Option<String>,
}

pub struct BackfillScheduler<'a, R: Rng> {
    simulation: TruckSimulation<R>,
    queue: &'a dyn MessageQueue,
    retry: RetryPolicy,
    state: SchedulerState,
}

impl<'a, R: Rng> BackfillScheduler<'a, R> {
    pub fn new(
        simulation: TruckSimulation<R>,
        queue: &'a dyn MessageQueue,
        retry: RetryPolicy,
    ) -> Result<Self> {
        retry.validate()?;
        Ok(Self {
            simulation,
            queue,
            retry,
            state: SchedulerState::Idle,
        })
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Run the backfill without progress reporting
    pub fn run(&mut self, begin: NaiveDateTime, end: NaiveDateTime) -> Result<BackfillReport> {
        self.run_with_progress(begin, end, |_| {})
    }

    /// Run the backfill, calling `progress` after every confirmed batch.
    ///
    /// Fails with `Error::DeliveryFailed` when a batch cannot be delivered;
    /// batches published before that point stay on the queue.
    pub fn run_with_progress<F>(
        &mut self,
        begin: NaiveDateTime,
        end: NaiveDateTime,
        mut progress: F,
    ) -> Result<BackfillReport>
    where
        F: FnMut(&BackfillProgress),
    {
        if self.state != SchedulerState::Idle {
            return Err(Error::InvalidInput("backfill scheduler already used".into()));
        }
        if begin >= end {
            return Err(Error::InvalidInput(format!(
                "backfill begin {begin} is not before end {end}"
            )));
        }

        let total = TimeSlot::count_ticks(begin, end);
        let stop = end - Duration::minutes(1);
        let mut slot = TimeSlot::new(begin);
        let mut report = BackfillReport::default();
        info!(
            begin = %begin,
            end = %end,
            batches = total,
            trucks = self.simulation.trucks().len(),
            "backfill started"
        );

        while slot.current() < stop {
            self.state = SchedulerState::Advancing;
            slot.increment();
            let events = self.simulation.tick(&slot);

            self.state = SchedulerState::Flushing;
            let message = QueueMessage::new(encode_telemetry_batch(&events)?)
                .with_attribute(TIMESLOT_ATTRIBUTE, slot.to_iso());
            let delivery = match publish_with_retry(self.queue, &message, &self.retry) {
                Ok(delivery) => delivery,
                Err(e) => {
                    self.state = SchedulerState::Done;
                    return Err(e);
                }
            };
            debug!(slot = %slot, message_id = %delivery.message_id, events = events.len(), "batch published");

            report.batches += 1;
            report.events += events.len() as u64;
            report.retries += u64::from(delivery.attempts - 1);
            if report.first_slot.is_none() {
                report.first_slot = Some(slot.to_iso());
            }
            report.last_slot = Some(slot.to_iso());
            progress(&BackfillProgress {
                batch: report.batches,
                total,
                slot,
            });
        }

        self.state = SchedulerState::Done;
        info!(batches = report.batches, events = report.events, "backfill finished");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wastetrack_domain::model::{City, FleetConfig};
    use wastetrack_store::MemoryQueue;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").unwrap()
    }

    fn one_truck() -> FleetConfig {
        FleetConfig::single(City::builtin("glasgow").unwrap(), 1)
    }

    #[test]
    fn test_three_minutes_gives_two_batches() {
        let queue = MemoryQueue::new();
        let sim = TruckSimulation::with_seed(&one_truck(), 1.0, 7).unwrap();
        let mut scheduler = BackfillScheduler::new(sim, &queue, RetryPolicy::immediate(1)).unwrap();
        let report = scheduler
            .run(at("2018-12-31T00:00:00"), at("2018-12-31T00:03:00"))
            .unwrap();

        assert_eq!(report.batches, 2);
        assert_eq!(report.events, 2);
        assert_eq!(report.first_slot.as_deref(), Some("2018-12-31T00:01:00"));
        assert_eq!(report.last_slot.as_deref(), Some("2018-12-31T00:02:00"));
        assert_eq!(scheduler.state(), SchedulerState::Done);

        let slots: Vec<_> = queue
            .messages()
            .iter()
            .map(|m| m.attribute(TIMESLOT_ATTRIBUTE).unwrap().to_string())
            .collect();
        assert_eq!(slots, ["2018-12-31T00:01:00", "2018-12-31T00:02:00"]);
    }

    #[test]
    fn test_progress_counts_up_to_total() {
        let queue = MemoryQueue::new();
        let sim = TruckSimulation::with_seed(&one_truck(), 1.0, 7).unwrap();
        let mut scheduler = BackfillScheduler::new(sim, &queue, RetryPolicy::immediate(1)).unwrap();
        let mut seen = Vec::new();
        scheduler
            .run_with_progress(at("2019-01-01T10:00:00"), at("2019-01-01T10:10:00"), |p| {
                seen.push((p.batch, p.total))
            })
            .unwrap();
        assert_eq!(seen.len(), 9);
        assert_eq!(seen.last(), Some(&(9, 9)));
    }

    #[test]
    fn test_rejects_empty_range() {
        let queue = MemoryQueue::new();
        let sim = TruckSimulation::with_seed(&one_truck(), 1.0, 7).unwrap();
        let mut scheduler = BackfillScheduler::new(sim, &queue, RetryPolicy::immediate(1)).unwrap();
        let t = at("2019-01-01T10:00:00");
        assert!(matches!(scheduler.run(t, t), Err(Error::InvalidInput(_))));
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }

    #[test]
    fn test_delivery_failure_escalates() {
        let queue = MemoryQueue::new();
        queue.inject_send_failures(100);
        let sim = TruckSimulation::with_seed(&one_truck(), 1.0, 7).unwrap();
        let mut scheduler = BackfillScheduler::new(sim, &queue, RetryPolicy::immediate(3)).unwrap();
        let err = scheduler
            .run(at("2019-01-01T10:00:00"), at("2019-01-01T10:05:00"))
            .unwrap_err();
        assert!(matches!(err, Error::DeliveryFailed { attempts: 3, .. }));
        assert!(queue.is_empty());
        assert_eq!(scheduler.state(), SchedulerState::Done);
    }

    #[test]
    fn test_retries_are_reported() {
        let queue = MemoryQueue::new();
        queue.inject_unconfirmed_sends(2);
        let sim = TruckSimulation::with_seed(&one_truck(), 1.0, 7).unwrap();
        let mut scheduler = BackfillScheduler::new(sim, &queue, RetryPolicy::immediate(5)).unwrap();
        let report = scheduler
            .run(at("2019-01-01T10:00:00"), at("2019-01-01T10:03:00"))
            .unwrap();
        assert_eq!(report.retries, 2);
        assert_eq!(queue.len(), 2);
    }
}
