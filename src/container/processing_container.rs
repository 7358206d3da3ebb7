// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The unit of work passed between producers, the broker and consumers.
//!
//! A [`ProcessingContainer`] wraps a [`Processable`] payload together with
//! everything the substrate needs to route and account for it: a status
//! machine, a fixed number of result slots, counters supplied by the
//! producer, the origin buffer port id, per-step timings and the four queue
//! timestamps written by [`crate::broker::BufferPort`].
//!
//! # Processing cycle
//!
//! [`ProcessingContainer::process`] runs the optional pre-processing hook,
//! the payload's own processing step (or an external function given to
//! [`ProcessingContainer::process_with`]) and the optional post-processing
//! hook. Any error or panic in those steps leaves the item in
//! `EXCEPTION_CAUGHT` with zeroed timings and reset results, and is reported
//! as [`ProcessingError::Failed`]. A step that flags an error through
//! [`ResultSlots::flag_error`] ends in `ERROR_FLAGGED` with the same cleanup.

use crate::broker::PortId;
use crate::container::{ProcessingStatus, ResultSlots};
use crate::errors::{ProcessingError, ProcessingResult};
use crate::traits::Processable;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Hook run on the payload before or after the main processing step.
pub type ProcessingHook<P> = Arc<dyn Fn(&mut P) -> anyhow::Result<()> + Send + Sync>;

/// Times at which an item entered and left the two queues of its buffer port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueTimestamps {
    raw_submitted: Option<DateTime<Utc>>,
    raw_retrieved: Option<DateTime<Utc>>,
    processed_submitted: Option<DateTime<Utc>>,
    processed_retrieved: Option<DateTime<Utc>>,
}

impl QueueTimestamps {
    pub fn raw_submitted(&self) -> Option<DateTime<Utc>> {
        self.raw_submitted
    }

    pub fn raw_retrieved(&self) -> Option<DateTime<Utc>> {
        self.raw_retrieved
    }

    pub fn processed_submitted(&self) -> Option<DateTime<Utc>> {
        self.processed_submitted
    }

    pub fn processed_retrieved(&self) -> Option<DateTime<Utc>> {
        self.processed_retrieved
    }

    pub(crate) fn mark_raw_submitted(&mut self) {
        self.raw_submitted = Some(Utc::now());
    }

    pub(crate) fn mark_raw_retrieved(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        self.raw_retrieved = Some(now);
        now
    }

    pub(crate) fn mark_processed_submitted(&mut self) {
        self.processed_submitted = Some(Utc::now());
    }

    pub(crate) fn mark_processed_retrieved(&mut self) {
        self.processed_retrieved = Some(Utc::now());
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(bound(
    serialize = "P: Serialize, P::Output: Serialize",
    deserialize = "P: Deserialize<'de>, P::Output: Deserialize<'de>"
))]
pub struct ProcessingContainer<P: Processable> {
    payload: P,
    stored_results: Vec<P::Output>,
    status: ProcessingStatus,
    error_description: String,
    evaluation_id: String,

    iteration: u32,
    resubmissions: u32,
    collection_position: usize,
    buffer_port_id: Option<PortId>,

    pre_processing_time: Duration,
    processing_time: Duration,
    post_processing_time: Duration,
    timestamps: QueueTimestamps,

    #[serde(skip)]
    pre_processor: Option<ProcessingHook<P>>,
    #[serde(skip)]
    post_processor: Option<ProcessingHook<P>>,
    pre_processing_allowed: bool,
    post_processing_allowed: bool,
}

struct StepFailure {
    step: &'static str,
    reason: String,
}

impl<P: Processable> ProcessingContainer<P> {
    /// Wraps `payload` with `n_results` default-initialised result slots.
    pub fn new(payload: P, n_results: usize) -> Self {
        Self {
            payload,
            stored_results: vec![P::Output::default(); n_results],
            status: ProcessingStatus::DoIgnore,
            error_description: String::new(),
            evaluation_id: String::new(),
            iteration: 0,
            resubmissions: 0,
            collection_position: 0,
            buffer_port_id: None,
            pre_processing_time: Duration::ZERO,
            processing_time: Duration::ZERO,
            post_processing_time: Duration::ZERO,
            timestamps: QueueTimestamps::default(),
            pre_processor: None,
            post_processor: None,
            pre_processing_allowed: true,
            post_processing_allowed: true,
        }
    }

    /// Convenience for producers: a new item already marked `DO_PROCESS`.
    pub fn due(payload: P, n_results: usize) -> Self {
        let mut item = Self::new(payload, n_results);
        item.status = ProcessingStatus::DoProcess;
        item
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut P {
        &mut self.payload
    }

    pub fn into_payload(self) -> P {
        self.payload
    }

    pub fn status(&self) -> ProcessingStatus {
        self.status
    }

    pub fn is_processed(&self) -> bool {
        self.status == ProcessingStatus::Processed
    }

    pub fn is_due_for_processing(&self) -> bool {
        self.status == ProcessingStatus::DoProcess
    }

    pub fn has_errors(&self) -> bool {
        self.status.has_errors()
    }

    /// Moves the item to `target`.
    ///
    /// Setting the current status again does nothing. Every legal move clears
    /// the error text and resets the result slots. `PROCESSED` can only be
    /// reached through a processing cycle.
    pub fn set_processing_status(&mut self, target: ProcessingStatus) -> ProcessingResult<()> {
        if target == self.status {
            return Ok(());
        }
        if !self.status.can_transition_to(target) {
            return Err(ProcessingError::InvalidTransition {
                from: self.status,
                to: target,
            });
        }

        self.error_description.clear();
        self.reset_results();
        self.status = target;
        Ok(())
    }

    /// Runs one processing cycle with the payload's own processing step.
    pub fn process(&mut self) -> ProcessingResult<()> {
        self.process_with(|payload, results| payload.process(results))
    }

    /// Runs one processing cycle with `main` standing in for the payload's
    /// own processing step.
    pub fn process_with<F>(&mut self, main: F) -> ProcessingResult<()>
    where
        F: FnOnce(&mut P, &mut ResultSlots<'_, P::Output>) -> anyhow::Result<()>,
    {
        if self.status != ProcessingStatus::DoProcess {
            return Err(ProcessingError::NotDueForProcessing {
                status: self.status,
            });
        }

        self.evaluation_id = format!("eval_{}", Uuid::new_v4());
        self.error_description.clear();
        self.reset_results();
        self.reset_timings();

        match self.run_steps(main) {
            Ok(None) => {
                self.status = ProcessingStatus::Processed;
                Ok(())
            }
            Ok(Some(flagged)) => {
                self.status = ProcessingStatus::ErrorFlagged;
                self.append_error(&format!(
                    "Evaluation {} flagged an error: {}",
                    self.evaluation_id, flagged
                ));
                Err(self.discard_failed_cycle())
            }
            Err(failure) => {
                self.status = ProcessingStatus::ExceptionCaught;
                self.append_error(&format!(
                    "Caught error in {} step of evaluation {}: {}",
                    failure.step, self.evaluation_id, failure.reason
                ));
                Err(self.discard_failed_cycle())
            }
        }
    }

    /// Flags the item as erroneous from outside a processing step.
    pub fn force_set_error(&mut self, description: &str) -> ProcessingResult<()> {
        if description.trim().is_empty() {
            return Err(ProcessingError::EmptyErrorDescription);
        }
        self.status = ProcessingStatus::ErrorFlagged;
        self.append_error(description);
        Ok(())
    }

    /// Producer-side fulfilment: store `results` and mark the item processed
    /// without running a processing cycle.
    pub fn mark_as_processed_with(&mut self, results: Vec<P::Output>) -> ProcessingResult<()> {
        if self.status != ProcessingStatus::DoProcess {
            return Err(ProcessingError::NotDueForProcessing {
                status: self.status,
            });
        }
        if results.len() != self.stored_results.len() {
            return Err(ProcessingError::ResultCountMismatch {
                expected: self.stored_results.len(),
                actual: results.len(),
            });
        }
        self.stored_results = results;
        self.status = ProcessingStatus::Processed;
        Ok(())
    }

    pub fn stored_result(&self, id: usize) -> ProcessingResult<&P::Output> {
        let results = self.stored_results()?;
        results.get(id).ok_or(ProcessingError::ResultIndexOutOfRange {
            index: id,
            len: results.len(),
        })
    }

    pub fn stored_results(&self) -> ProcessingResult<&[P::Output]> {
        if !self.is_processed() {
            return Err(ProcessingError::NotProcessed {
                status: self.status,
            });
        }
        Ok(&self.stored_results)
    }

    pub fn n_stored_results(&self) -> usize {
        self.stored_results.len()
    }

    pub fn error_description(&self) -> &str {
        &self.error_description
    }

    /// Returns the accumulated error text and clears it.
    pub fn get_and_clear_exceptions(&mut self) -> String {
        std::mem::take(&mut self.error_description)
    }

    /// Id of the most recent processing cycle, empty before the first one.
    pub fn evaluation_id(&self) -> &str {
        &self.evaluation_id
    }

    /// Pre-processing, processing and post-processing durations.
    pub fn processing_times(&self) -> (Duration, Duration, Duration) {
        (
            self.pre_processing_time,
            self.processing_time,
            self.post_processing_time,
        )
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn set_iteration(&mut self, iteration: u32) {
        self.iteration = iteration;
    }

    pub fn resubmissions(&self) -> u32 {
        self.resubmissions
    }

    pub fn set_resubmissions(&mut self, resubmissions: u32) {
        self.resubmissions = resubmissions;
    }

    pub fn collection_position(&self) -> usize {
        self.collection_position
    }

    pub fn set_collection_position(&mut self, position: usize) {
        self.collection_position = position;
    }

    pub fn buffer_port_id(&self) -> Option<PortId> {
        self.buffer_port_id
    }

    pub fn set_buffer_port_id(&mut self, port_id: PortId) {
        self.buffer_port_id = Some(port_id);
    }

    pub fn timestamps(&self) -> &QueueTimestamps {
        &self.timestamps
    }

    pub(crate) fn timestamps_mut(&mut self) -> &mut QueueTimestamps {
        &mut self.timestamps
    }

    pub fn register_pre_processor(&mut self, hook: ProcessingHook<P>) {
        self.pre_processor = Some(hook);
    }

    pub fn register_post_processor(&mut self, hook: ProcessingHook<P>) {
        self.post_processor = Some(hook);
    }

    /// Vetoing stops a registered hook from running without removing it.
    pub fn set_pre_processing_allowed(&mut self, allowed: bool) {
        self.pre_processing_allowed = allowed;
    }

    pub fn set_post_processing_allowed(&mut self, allowed: bool) {
        self.post_processing_allowed = allowed;
    }

    fn run_steps<F>(&mut self, main: F) -> Result<Option<String>, StepFailure>
    where
        F: FnOnce(&mut P, &mut ResultSlots<'_, P::Output>) -> anyhow::Result<()>,
    {
        if self.pre_processing_allowed {
            if let Some(hook) = self.pre_processor.clone() {
                let started = Instant::now();
                let payload = &mut self.payload;
                guarded(|| hook(payload)).map_err(|reason| StepFailure {
                    step: "pre-processing",
                    reason,
                })?;
                self.pre_processing_time = started.elapsed();
            }
        }

        let mut flagged = None;
        let started = Instant::now();
        {
            let payload = &mut self.payload;
            let mut results = ResultSlots::new(&mut self.stored_results, &mut flagged);
            guarded(|| main(payload, &mut results)).map_err(|reason| StepFailure {
                step: "processing",
                reason,
            })?;
        }
        self.processing_time = started.elapsed();

        if self.post_processing_allowed {
            if let Some(hook) = self.post_processor.clone() {
                let started = Instant::now();
                let payload = &mut self.payload;
                guarded(|| hook(payload)).map_err(|reason| StepFailure {
                    step: "post-processing",
                    reason,
                })?;
                self.post_processing_time = started.elapsed();
            }
        }

        Ok(flagged)
    }

    fn discard_failed_cycle(&mut self) -> ProcessingError {
        self.reset_timings();
        self.reset_results();
        ProcessingError::Failed {
            evaluation_id: self.evaluation_id.clone(),
            description: self.error_description.clone(),
        }
    }

    fn append_error(&mut self, text: &str) {
        if !self.error_description.is_empty() {
            self.error_description.push('\n');
        }
        self.error_description.push_str(text);
    }

    fn reset_results(&mut self) {
        self.stored_results
            .iter_mut()
            .for_each(|slot| *slot = P::Output::default());
    }

    fn reset_timings(&mut self) {
        self.pre_processing_time = Duration::ZERO;
        self.processing_time = Duration::ZERO;
        self.post_processing_time = Duration::ZERO;
    }
}

impl<P: Processable + fmt::Debug> fmt::Debug for ProcessingContainer<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessingContainer")
            .field("payload", &self.payload)
            .field("status", &self.status)
            .field("evaluation_id", &self.evaluation_id)
            .field("buffer_port_id", &self.buffer_port_id)
            .field("n_stored_results", &self.stored_results.len())
            .finish_non_exhaustive()
    }
}

fn guarded<T>(step: impl FnOnce() -> anyhow::Result<T>) -> Result<T, String> {
    match panic::catch_unwind(AssertUnwindSafe(step)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(format!("{e:#}")),
        Err(payload) => Err(describe_panic(payload)),
    }
}

fn describe_panic(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {message}")
    } else {
        "panicked with an unknown payload".to_string()
    }
}
