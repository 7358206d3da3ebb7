// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Centralized message types for structured logging.
//!
//! Each message type implements `Display` for consistent, human-readable
//! output. Types that carry fields worth querying also implement
//! [`StructuredLog`].
//!
//! # Organization
//!
//! * `broker` - buffer port enrolment, consumer enrolment, discarded items
//! * `worker` - worker threads starting, failing and stopping
//! * `network` - TCP listener, server sessions and clients
//! * `executor` - producer-side iterations and late returns
//!
//! # Usage Pattern
//!
//! ```rust
//! use courtier::observability::messages::worker::WorkersStarting;
//!
//! let msg = WorkersStarting {
//!     consumer: "StdThreadConsumer",
//!     threads: 4,
//! };
//!
//! tracing::info!("{}", msg);
//! ```

use tracing::Span;

pub mod broker;
pub mod executor;
pub mod network;
pub mod worker;

/// A message that knows its own log level and structured fields.
pub trait StructuredLog: std::fmt::Display {
    /// Emit the message at its designated level, with fields attached.
    fn log(&self);

    /// Build a span carrying the message's fields.
    fn span(&self, name: &str) -> Span;
}
