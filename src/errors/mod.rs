// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Error taxonomy for the task distribution substrate.
//!
//! * `processing` - item-local failures and state machine contract violations
//! * `broker` - routing and registration failures
//! * `worker` - consumer and worker lifecycle failures
//! * `executor` - producer-side submission and collection
//! * `network` - wire protocol, codec, client and session failures
//! * `config` - configuration loading and validation

mod broker;
mod config;
mod executor;
mod network;
mod processing;
mod worker;

pub use broker::{BrokerError, BrokerResult};
pub use config::ConfigError;
pub use executor::{ExecutorError, ExecutorResult};
pub use network::{ClientError, ProtocolError, SerializationError, SessionError};
pub use processing::{ProcessingError, ProcessingResult};
pub use worker::{ConsumerError, WorkerError};
