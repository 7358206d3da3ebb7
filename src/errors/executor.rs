// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use crate::container::ProcessingStatus;
use crate::errors::BrokerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutorError {
    /// Only `DO_PROCESS`, `DO_IGNORE` and `PROCESSED` items may be handed in.
    #[error("item at position {position} has status {status} and cannot be submitted")]
    UnexpectedStatus {
        position: usize,
        status: ProcessingStatus,
    },

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

pub type ExecutorResult<T> = Result<T, ExecutorError>;
