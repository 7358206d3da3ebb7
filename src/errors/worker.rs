// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use crate::errors::{BrokerError, ProcessingError};
use thiserror::Error;

/// Failures that end a worker's run loop.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("worker has no id; register a broker ferry before running it")]
    MissingWorkerId,

    #[error("worker {worker_id} has no broker ferry")]
    MissingFerry { worker_id: usize },

    #[error("worker initialisation failed")]
    Init(#[source] anyhow::Error),

    #[error("worker finalisation failed")]
    Finalize(#[source] anyhow::Error),

    #[error(transparent)]
    Processing(#[from] ProcessingError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("worker {worker_id} terminated")]
    Terminated {
        worker_id: usize,
        #[source]
        source: Box<WorkerError>,
    },
}

/// Failures starting or running a consumer.
#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("consumer '{name}' has already been started")]
    AlreadyStarted { name: String },

    #[error("failed to spawn thread '{thread}'")]
    Spawn {
        thread: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to bind listener to {address}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to build the network runtime")]
    Runtime(#[source] std::io::Error),
}
