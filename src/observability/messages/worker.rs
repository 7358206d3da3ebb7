// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for worker threads and the thread pool consumer.

use crate::observability::messages::StructuredLog;
use std::fmt::{Display, Formatter};
use std::time::Duration;
use tracing::Span;

/// A consumer is launching its worker threads.
///
/// # Log Level
/// `info!` - Important operational event
pub struct WorkersStarting<'a> {
    pub consumer: &'a str,
    pub threads: usize,
}

impl Display for WorkersStarting<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "{} starting {} worker thread(s)",
            self.consumer, self.threads
        )
    }
}

/// A worker entered its run loop.
///
/// # Log Level
/// `debug!` - One per thread
pub struct WorkerStarted {
    pub worker_id: usize,
    pub poll_timeout: Duration,
}

impl Display for WorkerStarted {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Worker {} polling every {:?}",
            self.worker_id, self.poll_timeout
        )
    }
}

impl StructuredLog for WorkerStarted {
    fn log(&self) {
        tracing::debug!(
            worker_id = self.worker_id,
            poll_timeout_ms = self.poll_timeout.as_millis() as u64,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!("worker", span_name = name, worker_id = self.worker_id)
    }
}

/// A thread count of zero was requested.
///
/// # Log Level
/// `warn!` - Configuration was corrected
pub struct ThreadCountDefaulted {
    pub used: usize,
}

impl Display for ThreadCountDefaulted {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Requested 0 worker threads, using the default of {}",
            self.used
        )
    }
}

/// An item failed to process and is returned to its producer anyway.
///
/// # Log Level
/// `warn!` - The producer decides what to do with it
pub struct ProcessingFailureReturned<'a> {
    pub worker_id: usize,
    pub error: &'a dyn std::error::Error,
}

impl Display for ProcessingFailureReturned<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Worker {} returning failed item to its producer: {}",
            self.worker_id, self.error
        )
    }
}

impl StructuredLog for ProcessingFailureReturned<'_> {
    fn log(&self) {
        tracing::warn!(
            worker_id = self.worker_id,
            error = %self.error,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::warn_span!("worker", span_name = name, worker_id = self.worker_id)
    }
}

/// A worker left its loop after a stop request.
///
/// # Log Level
/// `debug!` - Routine shutdown
pub struct WorkerStopped {
    pub worker_id: usize,
    pub processed: usize,
}

impl Display for WorkerStopped {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Worker {} stopped after {} item(s)",
            self.worker_id, self.processed
        )
    }
}

/// A worker thread ended with an unrecoverable error.
///
/// # Log Level
/// `error!` - The thread is gone, the pool runs one short
pub struct WorkerTerminated<'a> {
    pub thread: &'a str,
    pub error: &'a dyn std::error::Error,
}

impl Display for WorkerTerminated<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Worker thread {} terminated: {}", self.thread, self.error)?;
        let mut source = self.error.source();
        while let Some(cause) = source {
            write!(f, ": {}", cause)?;
            source = cause.source();
        }
        Ok(())
    }
}

impl StructuredLog for WorkerTerminated<'_> {
    fn log(&self) {
        tracing::error!(thread = self.thread, error = %self.error, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::error_span!("worker", span_name = name, thread = self.thread)
    }
}
