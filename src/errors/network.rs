// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use crate::errors::{BrokerError, ProcessingError};
use crate::network::SerializationMode;
use thiserror::Error;

/// Malformed traffic on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("header '{value}' does not fit into a {width} byte field")]
    FieldTooLong { value: String, width: usize },

    #[error("header field is not valid ASCII")]
    NotAscii,

    #[error("invalid size header '{0}'")]
    InvalidSize(String),

    #[error("invalid serialization mode '{0}'")]
    InvalidMode(String),

    #[error("peer sent {received} of {expected} announced payload bytes")]
    Truncated { expected: usize, received: usize },

    #[error("announced payload of {size} bytes exceeds the limit of {limit}")]
    PayloadTooLarge { size: usize, limit: usize },
}

#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("serialization mode {0} is not supported")]
    UnsupportedMode(SerializationMode),

    #[error("text codec failed")]
    Text(#[from] serde_json::Error),

    #[error("binary codec failed")]
    Binary(#[from] bincode::Error),
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Serialization(#[from] SerializationError),

    #[error(transparent)]
    Processing(#[from] ProcessingError),

    #[error("client initialisation failed")]
    Init(#[source] anyhow::Error),
}

/// Failures inside one server-side connection. They abandon that session only.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Serialization(#[from] SerializationError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("background task failed")]
    Join(#[from] tokio::task::JoinError),
}
