// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use crate::container::ProcessingStatus;
use thiserror::Error;

/// Errors raised by a work item's status machine and processing cycle.
///
/// Only [`ProcessingError::Failed`] is item-local: the item carries its error
/// text and should travel back to its producer. Every other variant is a
/// contract violation by the calling code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProcessingError {
    #[error("illegal processing status transition {from} -> {to}")]
    InvalidTransition {
        from: ProcessingStatus,
        to: ProcessingStatus,
    },

    #[error("item is not due for processing (status is {status})")]
    NotDueForProcessing { status: ProcessingStatus },

    #[error("stored results are only available for processed items (status is {status})")]
    NotProcessed { status: ProcessingStatus },

    #[error("result slot {index} does not exist, item has {len} slot(s)")]
    ResultIndexOutOfRange { index: usize, len: usize },

    #[error("expected {expected} result(s), got {actual}")]
    ResultCountMismatch { expected: usize, actual: usize },

    #[error("an error description must not be empty")]
    EmptyErrorDescription,

    #[error("evaluation {evaluation_id} failed: {description}")]
    Failed {
        evaluation_id: String,
        description: String,
    },
}

impl ProcessingError {
    /// True when the failure belongs to the item rather than to the caller.
    pub fn is_item_failure(&self) -> bool {
        matches!(self, ProcessingError::Failed { .. })
    }
}

pub type ProcessingResult<T> = Result<T, ProcessingError>;
