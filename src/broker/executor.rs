// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Producer side of the broker: submit a batch, collect what comes back.
//!
//! A [`BrokerExecutor`] owns one [`BufferPort`]. Each call to
//! [`BrokerExecutor::work_on`] is an iteration. Every due item is stamped
//! with the iteration, its position in the batch and its resubmission count,
//! then pushed to the port. Returns are written back into the batch slot
//! they came from.
//!
//! When every consumer guarantees full return, or the wait factor is zero,
//! the executor waits until all items are back. Otherwise it waits for an
//! estimated deadline of
//! `wait_factor * (average return time * expected items + longest processing time)`,
//! recomputed after every processed return. Items missing at the deadline
//! can be resubmitted up to `max_resubmissions` times. Items that belong to
//! an earlier iteration are kept aside when processed and dropped otherwise.

use crate::broker::{Broker, BufferPort, Delivery};
use crate::config::consts::{
    DEFAULT_MAX_RESUBMISSIONS, DEFAULT_MIN_PARTIAL_RETURN_PERCENTAGE, DEFAULT_RAW_QUEUE_CAPACITY,
    DEFAULT_WAIT_FACTOR, DEFAULT_WORKER_POLL_TIMEOUT,
};
use crate::container::{ProcessingContainer, ProcessingStatus};
use crate::errors::{BrokerError, ExecutorError, ExecutorResult};
use crate::observability::messages::executor::{
    IterationFinished, IterationStarted, ReturnDiscarded,
};
use crate::observability::messages::StructuredLog;
use crate::traits::Processable;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorOptions {
    /// Capacity of the executor's raw queue; 0 for unbounded.
    pub raw_queue_capacity: usize,
    /// Rounds of resubmitting missing items; 0 disables resubmission.
    pub max_resubmissions: u32,
    /// Scales the estimated deadline; 0 always waits for every item.
    pub wait_factor: f64,
    /// Percentage of returned items that ends a wait early; 0 disables it.
    pub min_partial_return_percentage: u16,
    /// How often blocking waits look at the broker's state.
    pub poll_interval: Duration,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            raw_queue_capacity: DEFAULT_RAW_QUEUE_CAPACITY,
            max_resubmissions: DEFAULT_MAX_RESUBMISSIONS,
            wait_factor: DEFAULT_WAIT_FACTOR,
            min_partial_return_percentage: DEFAULT_MIN_PARTIAL_RETURN_PERCENTAGE,
            poll_interval: DEFAULT_WORKER_POLL_TIMEOUT,
        }
    }
}

/// Outcome of [`BrokerExecutor::work_on`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutorStatus {
    /// Every due item came back.
    pub is_complete: bool,
    /// At least one returned item carries an error status.
    pub has_errors: bool,
}

/// Accounting of the most recent iteration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IterationReport {
    pub iteration: u32,
    /// Items that were due when the iteration started.
    pub expected: usize,
    pub returned: usize,
    pub not_returned: usize,
    pub erroneous: usize,
    /// Processed items of earlier iterations that arrived meanwhile.
    pub old_items: usize,
    pub resubmissions: u32,
}

/// Per-cycle bookkeeping. A cycle is one submission plus its wait.
struct Cycle {
    expected: usize,
    returned: usize,
    first_submission: DateTime<Utc>,
}

pub struct BrokerExecutor<P: Processable> {
    broker: Arc<Broker<P>>,
    port: Arc<BufferPort<P>>,
    options: ExecutorOptions,
    capable_of_full_return: bool,

    iteration: u32,
    first_cycle: bool,
    first_retrieval: bool,
    max_timeout: Duration,
    max_processing_time: Duration,

    old_items: Vec<ProcessingContainer<P>>,
    last_report: IterationReport,
}

impl<P> BrokerExecutor<P>
where
    P: Processable + Clone,
{
    /// Enrols a fresh buffer port with `broker`.
    ///
    /// Blocks until the broker has at least one consumer, as the waiting
    /// strategy depends on whether all consumers return every item.
    pub fn new(broker: Arc<Broker<P>>, options: ExecutorOptions) -> ExecutorResult<Self> {
        let port = BufferPort::shared(options.raw_queue_capacity);
        broker.enrol_buffer_port(Arc::clone(&port))?;
        let capable_of_full_return = broker.capable_of_full_return();
        if broker.is_finalized() {
            port.producer_disconnect();
            return Err(BrokerError::Finalized.into());
        }

        Ok(Self {
            broker,
            port,
            options,
            capable_of_full_return,
            iteration: 0,
            first_cycle: true,
            first_retrieval: true,
            max_timeout: Duration::ZERO,
            max_processing_time: Duration::ZERO,
            old_items: Vec::new(),
            last_report: IterationReport::default(),
        })
    }

    pub fn options(&self) -> &ExecutorOptions {
        &self.options
    }

    /// The port this executor submits through.
    pub fn port(&self) -> &Arc<BufferPort<P>> {
        &self.port
    }

    /// Iteration the next call to [`BrokerExecutor::work_on`] will use.
    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn capable_of_full_return(&self) -> bool {
        self.capable_of_full_return
    }

    pub fn last_report(&self) -> IterationReport {
        self.last_report
    }

    /// Processed items of earlier iterations collected during the last one.
    pub fn old_items(&self) -> &[ProcessingContainer<P>] {
        &self.old_items
    }

    pub fn take_old_items(&mut self) -> Vec<ProcessingContainer<P>> {
        std::mem::take(&mut self.old_items)
    }

    /// Submits every `DO_PROCESS` item of `items` and writes the returns
    /// back into their slots.
    ///
    /// `DO_IGNORE` and `PROCESSED` items are left alone; any other status is
    /// rejected before anything is submitted. With `resubmit_unprocessed`,
    /// items still missing after a wait are sent again, at most
    /// `max_resubmissions` times. Items that came back with errors are not
    /// resubmitted.
    pub fn work_on(
        &mut self,
        items: &mut [ProcessingContainer<P>],
        resubmit_unprocessed: bool,
    ) -> ExecutorResult<ExecutorStatus> {
        if let Some((position, item)) = items.iter().enumerate().find(|(_, item)| {
            !matches!(
                item.status(),
                ProcessingStatus::DoProcess | ProcessingStatus::DoIgnore | ProcessingStatus::Processed
            )
        }) {
            return Err(ExecutorError::UnexpectedStatus {
                position,
                status: item.status(),
            });
        }

        let started = IterationStarted {
            port_id: self.port.port_id().unwrap_or_default(),
            iteration: self.iteration,
            items: items.len(),
            full_return: self.waits_for_full_return(),
        };
        let span = started.span("work_on");
        let _guard = span.enter();
        started.log();

        self.old_items.clear();
        let expected = count_due(items);
        let mut status = ExecutorStatus::default();
        let mut resubmissions = 0;

        loop {
            let mut cycle = self.submit_due(items, resubmissions)?;
            let current = if cycle.expected == 0 {
                ExecutorStatus {
                    is_complete: true,
                    has_errors: false,
                }
            } else if self.waits_for_full_return() {
                self.wait_for_full_return(items, &mut cycle)
            } else {
                self.wait_for_timeout(items, &mut cycle)
            };
            self.first_cycle = false;

            status.is_complete |= current.is_complete;
            status.has_errors |= current.has_errors;

            if status.is_complete || !resubmit_unprocessed || self.options.max_resubmissions == 0 {
                break;
            }
            resubmissions += 1;
            if resubmissions >= self.options.max_resubmissions || self.broker.is_finalized() {
                break;
            }
        }

        self.finish_iteration(items, expected, resubmissions);
        self.iteration = self.iteration.wrapping_add(1);
        Ok(status)
    }

    fn waits_for_full_return(&self) -> bool {
        self.capable_of_full_return || self.options.wait_factor == 0.0
    }

    fn submit_due(
        &mut self,
        items: &[ProcessingContainer<P>],
        resubmissions: u32,
    ) -> ExecutorResult<Cycle> {
        let mut cycle = Cycle {
            expected: 0,
            returned: 0,
            first_submission: Utc::now(),
        };

        for (position, item) in items.iter().enumerate() {
            if !item.is_due_for_processing() {
                continue;
            }
            let mut submission = item.clone();
            submission.set_iteration(self.iteration);
            submission.set_collection_position(position);
            submission.set_resubmissions(resubmissions);
            if cycle.expected == 0 {
                cycle.first_submission = Utc::now();
            }
            self.push(submission)?;
            cycle.expected += 1;
        }
        Ok(cycle)
    }

    fn push(&self, item: ProcessingContainer<P>) -> ExecutorResult<()> {
        let mut pending = item;
        loop {
            if self.broker.is_finalized() {
                return Err(BrokerError::Finalized.into());
            }
            match self.port.push_raw_timeout(pending, self.options.poll_interval) {
                Delivery::Delivered => return Ok(()),
                Delivery::TimedOut(item) => pending = item,
            }
        }
    }

    /// Waits for a return for as long as the broker is alive.
    fn retrieve_blocking(&self) -> Option<ProcessingContainer<P>> {
        loop {
            if let Some(item) = self.port.pop_processed_timeout(self.options.poll_interval) {
                return Some(item);
            }
            if self.broker.is_finalized() {
                return None;
            }
        }
    }

    fn wait_for_full_return(
        &mut self,
        items: &mut [ProcessingContainer<P>],
        cycle: &mut Cycle,
    ) -> ExecutorStatus {
        while let Some(item) = self.retrieve_blocking() {
            let status = self.add_return(item, items, cycle);
            if status.is_complete || self.min_partial_return_reached(cycle) {
                break;
            }
        }
        check_execution_state(items)
    }

    fn wait_for_timeout(
        &mut self,
        items: &mut [ProcessingContainer<P>],
        cycle: &mut Cycle,
    ) -> ExecutorStatus {
        loop {
            if let Some(item) = self.next_return(cycle) {
                let processed = item.is_processed();
                let status = self.add_return(item, items, cycle);
                if status.is_complete {
                    break;
                }
                if processed {
                    self.update_timeout(cycle);
                }
            } else if self.broker.is_finalized() {
                break;
            }

            if self.elapsed(cycle) >= self.max_timeout || self.min_partial_return_reached(cycle) {
                break;
            }
        }
        check_execution_state(items)
    }

    /// The very first return of the executor's life is awaited without a
    /// deadline, skipping anything that was not processed. Later ones use
    /// the time remaining until the current deadline.
    fn next_return(&mut self, cycle: &Cycle) -> Option<ProcessingContainer<P>> {
        let item = if std::mem::take(&mut self.first_retrieval) {
            loop {
                let item = self.retrieve_blocking()?;
                if item.is_processed() {
                    break item;
                }
                tracing::warn!(
                    "{}",
                    ReturnDiscarded {
                        item_iteration: item.iteration(),
                        current_iteration: self.iteration,
                        status: item.status(),
                    }
                );
            }
        } else {
            let remaining = self.max_timeout.saturating_sub(self.elapsed(cycle));
            if remaining.is_zero() {
                return None;
            }
            self.port.pop_processed_timeout(remaining)?
        };

        let timestamps = item.timestamps();
        if let (Some(retrieved), Some(submitted)) =
            (timestamps.raw_retrieved(), timestamps.processed_submitted())
        {
            if let Ok(processing) = (submitted - retrieved).to_std() {
                self.max_processing_time = self.max_processing_time.max(processing);
            }
        }
        Some(item)
    }

    fn add_return(
        &mut self,
        item: ProcessingContainer<P>,
        items: &mut [ProcessingContainer<P>],
        cycle: &mut Cycle,
    ) -> ExecutorStatus {
        let mut status = ExecutorStatus::default();

        if item.iteration() != self.iteration {
            if item.is_processed() {
                self.old_items.push(item);
            } else {
                tracing::debug!(
                    "{}",
                    ReturnDiscarded {
                        item_iteration: item.iteration(),
                        current_iteration: self.iteration,
                        status: item.status(),
                    }
                );
            }
            return status;
        }

        // resubmitted items may come back twice; only the first one counts
        let Some(slot) = items.get_mut(item.collection_position()) else {
            return status;
        };
        if slot.is_due_for_processing() {
            status.has_errors = item.has_errors();
            *slot = item;
            cycle.returned += 1;
            status.is_complete = cycle.returned == cycle.expected;
        }
        status
    }

    /// Start of the current cycle. The executor's first cycle starts when a
    /// consumer first takes an item, since remote clients may connect late.
    fn cycle_start(&self, cycle: &Cycle) -> DateTime<Utc> {
        if self.first_cycle {
            self.port
                .first_retrieval_time()
                .unwrap_or(cycle.first_submission)
        } else {
            cycle.first_submission
        }
    }

    fn elapsed(&self, cycle: &Cycle) -> Duration {
        (Utc::now() - self.cycle_start(cycle))
            .to_std()
            .unwrap_or_default()
    }

    fn update_timeout(&mut self, cycle: &Cycle) {
        let mut elapsed = self.elapsed(cycle);
        if elapsed.is_zero() {
            elapsed = Duration::from_millis(100);
        }
        let average_return = elapsed / cycle.returned.max(1) as u32;
        let estimate = average_return * cycle.expected as u32 + self.max_processing_time;
        self.max_timeout = estimate.mul_f64(self.options.wait_factor.max(0.0));
    }

    fn min_partial_return_reached(&self, cycle: &Cycle) -> bool {
        let percentage = self.options.min_partial_return_percentage;
        if percentage == 0 {
            return false;
        }
        if cycle.returned == cycle.expected {
            return true;
        }
        cycle.returned as f64 * 100.0 >= f64::from(percentage) * cycle.expected as f64
    }

    fn finish_iteration(
        &mut self,
        items: &[ProcessingContainer<P>],
        expected: usize,
        resubmissions: u32,
    ) {
        let mut seen = HashSet::new();
        self.old_items
            .retain(|item| item.is_processed() && seen.insert((item.iteration(), item.collection_position())));

        let not_returned = count_due(items);
        self.last_report = IterationReport {
            iteration: self.iteration,
            expected,
            returned: expected.saturating_sub(not_returned),
            not_returned,
            erroneous: items.iter().filter(|item| item.has_errors()).count(),
            old_items: self.old_items.len(),
            resubmissions,
        };

        IterationFinished {
            iteration: self.iteration,
            returned: self.last_report.returned,
            not_returned,
            erroneous: self.last_report.erroneous,
            old_items: self.last_report.old_items,
            resubmissions,
        }
        .log();
    }
}

impl<P: Processable> Drop for BrokerExecutor<P> {
    fn drop(&mut self) {
        self.port.producer_disconnect();
    }
}

fn count_due<P: Processable>(items: &[ProcessingContainer<P>]) -> usize {
    items.iter().filter(|item| item.is_due_for_processing()).count()
}

fn check_execution_state<P: Processable>(items: &[ProcessingContainer<P>]) -> ExecutorStatus {
    ExecutorStatus {
        is_complete: !items.iter().any(|item| item.is_due_for_processing()),
        has_errors: items.iter().any(|item| item.has_errors()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumers::StdThreadConsumer;
    use crate::errors::ConsumerError;
    use crate::payloads::stub::{PickyDoubler, Sleeper};
    use crate::payloads::Multiply;
    use crate::traits::{Consumer, ProcessingUnits};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread::JoinHandle;

    const POLL: Duration = Duration::from_millis(10);

    fn options() -> ExecutorOptions {
        ExecutorOptions {
            poll_interval: POLL,
            ..ExecutorOptions::default()
        }
    }

    fn with_pool<P: Processable + Clone>(threads: usize) -> (Arc<Broker<P>>, BrokerExecutor<P>) {
        let broker = Broker::<P>::shared();
        broker
            .enrol_consumer(Arc::new(StdThreadConsumer::<P>::new(threads).with_poll_timeout(POLL)))
            .unwrap();
        let executor = BrokerExecutor::new(Arc::clone(&broker), options()).unwrap();
        (broker, executor)
    }

    /// Drops every odd position the first time it is seen.
    struct LossyConsumer {
        stop: Arc<AtomicBool>,
        thread: Mutex<Option<JoinHandle<()>>>,
    }

    impl LossyConsumer {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                stop: Arc::new(AtomicBool::new(false)),
                thread: Mutex::new(None),
            })
        }
    }

    impl Consumer<Sleeper> for LossyConsumer {
        fn name(&self) -> &str {
            "LossyConsumer"
        }

        fn mnemonic(&self) -> &str {
            "lossy"
        }

        fn async_start_processing(&self, broker: Arc<Broker<Sleeper>>) -> Result<(), ConsumerError> {
            let stop = Arc::clone(&self.stop);
            let handle = std::thread::spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    let Some(mut item) = broker.get_timeout(POLL) else {
                        continue;
                    };
                    if item.resubmissions() == 0 && item.collection_position() % 2 == 1 {
                        continue;
                    }
                    let _ = item.process();
                    let _ = broker.put(item);
                }
            });
            *self.thread.lock() = Some(handle);
            Ok(())
        }

        fn shutdown(&self) {
            self.stop.store(true, Ordering::SeqCst);
            if let Some(handle) = self.thread.lock().take() {
                handle.join().unwrap();
            }
        }

        fn stopped(&self) -> bool {
            self.stop.load(Ordering::SeqCst)
        }

        fn capable_of_full_return(&self) -> bool {
            false
        }

        fn processing_units_estimate(&self) -> ProcessingUnits {
            ProcessingUnits {
                count: 1,
                exact: true,
            }
        }
    }

    #[test]
    fn test_full_return_fills_every_slot() {
        let (broker, mut executor) = with_pool::<Multiply>(2);
        assert!(executor.capable_of_full_return());

        let mut items: Vec<_> = (1..=5).map(|v| Multiply::doubling(v as f64).into_item()).collect();
        items.push(ProcessingContainer::new(Multiply::doubling(100.0), 1));

        let status = executor.work_on(&mut items, false).unwrap();

        assert_eq!(
            status,
            ExecutorStatus {
                is_complete: true,
                has_errors: false
            }
        );
        for (position, item) in items.iter().take(5).enumerate() {
            assert!(item.is_processed());
            assert_eq!(item.collection_position(), position);
            assert_eq!(item.iteration(), 0);
            assert_eq!(*item.stored_result(0).unwrap(), 2.0 * (position + 1) as f64);
        }
        assert_eq!(items[5].status(), ProcessingStatus::DoIgnore);

        let report = executor.last_report();
        assert_eq!(report.expected, 5);
        assert_eq!(report.returned, 5);
        assert_eq!(report.not_returned, 0);
        assert_eq!(executor.iteration(), 1);
        broker.finalize();
    }

    #[test]
    fn test_returned_errors_are_reported() {
        let (broker, mut executor) = with_pool::<PickyDoubler>(1);
        let mut items = vec![PickyDoubler::item(1.0), PickyDoubler::item(-1.0)];

        let status = executor.work_on(&mut items, true).unwrap();

        assert!(status.is_complete);
        assert!(status.has_errors);
        assert_eq!(items[1].status(), ProcessingStatus::ExceptionCaught);
        assert_eq!(executor.last_report().erroneous, 1);
        broker.finalize();
    }

    #[test]
    fn test_unexpected_status_is_rejected_before_submission() {
        let (broker, mut executor) = with_pool::<Multiply>(1);
        let mut flagged = Multiply::doubling(2.0).into_item();
        flagged.force_set_error("bad input").unwrap();
        let mut items = vec![Multiply::doubling(1.0).into_item(), flagged];

        let err = executor.work_on(&mut items, false).unwrap_err();

        assert!(matches!(
            err,
            ExecutorError::UnexpectedStatus {
                position: 1,
                status: ProcessingStatus::ErrorFlagged
            }
        ));
        assert_eq!(executor.port().raw_len(), 0);
        assert_eq!(executor.iteration(), 0);
        broker.finalize();
    }

    #[test]
    fn test_returns_of_earlier_iterations_are_set_aside() {
        let (broker, mut executor) = with_pool::<Multiply>(1);
        let port = Arc::clone(executor.port());

        let mut late = Multiply::doubling(3.0).into_item();
        late.process().unwrap();
        late.set_iteration(7);
        late.set_collection_position(4);
        port.push_processed(late.clone());
        port.push_processed(late);

        let mut unprocessed = Multiply::doubling(4.0).into_item();
        unprocessed.set_iteration(7);
        port.push_processed(unprocessed);

        let mut items = vec![Multiply::doubling(1.0).into_item()];
        let status = executor.work_on(&mut items, false).unwrap();

        assert!(status.is_complete);
        assert_eq!(executor.old_items().len(), 1);
        assert_eq!(executor.old_items()[0].iteration(), 7);
        assert_eq!(executor.last_report().old_items, 1);
        broker.finalize();
    }

    #[test]
    fn test_partial_return_ends_wait_early() {
        let broker = Broker::<Sleeper>::shared();
        broker
            .enrol_consumer(Arc::new(StdThreadConsumer::<Sleeper>::new(1).with_poll_timeout(POLL)))
            .unwrap();
        let mut executor = BrokerExecutor::new(
            Arc::clone(&broker),
            ExecutorOptions {
                min_partial_return_percentage: 50,
                ..options()
            },
        )
        .unwrap();

        let mut items: Vec<_> = (0..4).map(|v| Sleeper::item(v, 30)).collect();
        let status = executor.work_on(&mut items, false).unwrap();

        assert!(!status.is_complete);
        let report = executor.last_report();
        assert_eq!(report.returned, 2);
        assert_eq!(report.not_returned, 2);

        // the stragglers come back during the next iteration
        let mut next = vec![Sleeper::item(9, 0)];
        assert!(executor.work_on(&mut next, false).unwrap().is_complete);
        assert_eq!(executor.old_items().len(), 2);
        assert!(executor.old_items().iter().all(|item| item.iteration() == 0));
        broker.finalize();
    }

    #[test]
    fn test_missing_items_are_resubmitted() {
        let broker = Broker::<Sleeper>::shared();
        broker.enrol_consumer(LossyConsumer::new()).unwrap();
        let mut executor = BrokerExecutor::new(Arc::clone(&broker), options()).unwrap();
        assert!(!executor.capable_of_full_return());

        let mut items: Vec<_> = (0..4).map(|v| Sleeper::item(v, 20)).collect();
        let status = executor.work_on(&mut items, true).unwrap();

        assert!(status.is_complete);
        assert!(items.iter().all(|item| item.is_processed()));
        assert_eq!(items[1].resubmissions(), 1);
        assert_eq!(items[3].resubmissions(), 1);
        assert_eq!(items[0].resubmissions(), 0);
        assert!(executor.last_report().resubmissions >= 1);
        broker.finalize();
    }

    #[test]
    fn test_without_resubmission_missing_items_stay_due() {
        let broker = Broker::<Sleeper>::shared();
        broker.enrol_consumer(LossyConsumer::new()).unwrap();
        let mut executor = BrokerExecutor::new(Arc::clone(&broker), options()).unwrap();

        let mut items: Vec<_> = (0..4).map(|v| Sleeper::item(v, 20)).collect();
        let status = executor.work_on(&mut items, false).unwrap();

        assert!(!status.is_complete);
        assert!(items[1].is_due_for_processing());
        assert!(items[3].is_due_for_processing());
        let report = executor.last_report();
        assert_eq!(report.returned, 2);
        assert_eq!(report.not_returned, 2);
        assert_eq!(report.resubmissions, 0);
        broker.finalize();
    }

    #[test]
    fn test_empty_batch_is_complete() {
        let (broker, mut executor) = with_pool::<Multiply>(1);
        let mut items = vec![ProcessingContainer::new(Multiply::doubling(1.0), 1)];

        let status = executor.work_on(&mut items, true).unwrap();

        assert!(status.is_complete);
        assert_eq!(executor.last_report().expected, 0);
        broker.finalize();
    }

    #[test]
    fn test_dropping_the_executor_disconnects_its_port() {
        let (broker, executor) = with_pool::<Multiply>(1);
        let port = Arc::clone(executor.port());
        assert!(port.is_connected_to_producer());

        drop(executor);

        assert!(!port.is_connected_to_producer());
        broker.finalize();
    }
}
