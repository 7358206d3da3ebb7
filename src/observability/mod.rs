// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Observability module for structured logging and tracing.
//!
//! Diagnostic and operational log lines are built from message structs that
//! implement `Display`, rather than from format strings scattered across the
//! broker, the workers and the network layer. Messages that matter operationally
//! also implement [`messages::StructuredLog`] so the level and the structured
//! fields are chosen once, next to the text.
//!
//! # Architecture
//!
//! Messages are organized by subsystem:
//! * `messages::broker` - buffer port and consumer registration, routing losses
//! * `messages::worker` - thread pool and worker lifecycle
//! * `messages::network` - listener, session and client events
//!
//! # Usage
//!
//! ```rust
//! use courtier::observability::messages::broker::ItemDiscarded;
//! use courtier::observability::messages::StructuredLog;
//!
//! let msg = ItemDiscarded {
//!     port_id: 7,
//!     reason: "buffer port no longer registered",
//! };
//!
//! msg.log();
//! ```

pub mod messages;
