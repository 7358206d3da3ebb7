// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use crate::broker::PortId;
use crate::errors::ConsumerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    /// Routing target is gone. The item is lost and callers log and discard it.
    #[error("no buffer port is registered under id {port_id}")]
    BufferNotPresent { port_id: PortId },

    #[error("work item carries no origin buffer port id")]
    MissingPortId,

    #[error("registering another buffer port would exceed the limit of {limit}")]
    TooManyBufferPorts { limit: usize },

    #[error("raw and processed port maps disagree after garbage collection (raw: {raw}, processed: {processed})")]
    InconsistentPortMaps { raw: usize, processed: usize },

    #[error("buffer port is already enrolled under id {port_id}")]
    AlreadyEnrolled { port_id: PortId },

    #[error("consumer '{name}' failed to start")]
    ConsumerStart {
        name: String,
        #[source]
        source: ConsumerError,
    },

    #[error("broker has been finalized")]
    Finalized,
}

impl BrokerError {
    /// Internal consistency violations are never expected at runtime.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BrokerError::TooManyBufferPorts { .. } | BrokerError::InconsistentPortMaps { .. }
        )
    }
}

pub type BrokerResult<T> = Result<T, BrokerError>;
