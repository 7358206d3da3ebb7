// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for the producer-side executor.

use crate::broker::PortId;
use crate::container::ProcessingStatus;
use crate::observability::messages::StructuredLog;
use std::fmt::{Display, Formatter};
use tracing::Span;

/// An iteration of submissions is about to start.
///
/// # Log Level
/// `debug!` - One per iteration
pub struct IterationStarted {
    pub port_id: PortId,
    pub iteration: u32,
    pub items: usize,
    pub full_return: bool,
}

impl Display for IterationStarted {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Iteration {} on port {}: {} item(s), {}",
            self.iteration,
            self.port_id,
            self.items,
            if self.full_return {
                "waiting for full return"
            } else {
                "waiting with timeout"
            }
        )
    }
}

impl StructuredLog for IterationStarted {
    fn log(&self) {
        tracing::debug!(
            port_id = self.port_id,
            iteration = self.iteration,
            items = self.items,
            full_return = self.full_return,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "executor_iteration",
            span_name = name,
            port_id = self.port_id,
            iteration = self.iteration,
        )
    }
}

/// Accounting of a finished iteration.
///
/// # Log Level
/// `debug!` when everything returned, `info!` otherwise
pub struct IterationFinished {
    pub iteration: u32,
    pub returned: usize,
    pub not_returned: usize,
    pub erroneous: usize,
    pub old_items: usize,
    pub resubmissions: u32,
}

impl Display for IterationFinished {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Iteration {} finished: {} returned, {} missing, {} erroneous, {} late from earlier iterations after {} resubmission(s)",
            self.iteration,
            self.returned,
            self.not_returned,
            self.erroneous,
            self.old_items,
            self.resubmissions
        )
    }
}

impl StructuredLog for IterationFinished {
    fn log(&self) {
        if self.not_returned == 0 {
            tracing::debug!(
                iteration = self.iteration,
                returned = self.returned,
                erroneous = self.erroneous,
                "{}", self
            );
        } else {
            tracing::info!(
                iteration = self.iteration,
                returned = self.returned,
                not_returned = self.not_returned,
                erroneous = self.erroneous,
                resubmissions = self.resubmissions,
                "{}", self
            );
        }
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!("executor_iteration", span_name = name, iteration = self.iteration)
    }
}

/// A returned item was thrown away instead of being handed to the producer.
///
/// # Log Level
/// `warn!` - Lost work
pub struct ReturnDiscarded {
    pub item_iteration: u32,
    pub current_iteration: u32,
    pub status: ProcessingStatus,
}

impl Display for ReturnDiscarded {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Discarding item of iteration {} (now {}) with status {}",
            self.item_iteration, self.current_iteration, self.status
        )
    }
}
