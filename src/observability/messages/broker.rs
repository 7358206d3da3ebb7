// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for broker events.
//!
//! This module contains message types for logging events related to:
//! * Buffer port enrolment and garbage collection
//! * Consumer enrolment
//! * Items lost to routing failures
//! * Broker shutdown

use crate::broker::PortId;
use crate::observability::messages::StructuredLog;
use std::fmt::{Display, Formatter};
use tracing::Span;

/// A buffer port was registered with the broker.
///
/// # Log Level
/// `info!` - Important operational event
pub struct BufferPortEnrolled {
    pub port_id: PortId,
    pub live_ports: usize,
    pub purged: usize,
}

impl Display for BufferPortEnrolled {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Buffer port {} enrolled ({} live, {} stale port(s) removed)",
            self.port_id, self.live_ports, self.purged
        )
    }
}

impl StructuredLog for BufferPortEnrolled {
    fn log(&self) {
        tracing::info!(
            port_id = self.port_id,
            live_ports = self.live_ports,
            purged = self.purged,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "buffer_port",
            span_name = name,
            port_id = self.port_id,
            live_ports = self.live_ports,
        )
    }
}

/// A consumer was registered and started.
///
/// # Log Level
/// `info!` - Important operational event
///
/// # Example
/// ```
/// use courtier::observability::messages::broker::ConsumerEnrolled;
///
/// let msg = ConsumerEnrolled {
///     name: "StdThreadConsumer",
///     mnemonic: "stc",
///     capable_of_full_return: true,
/// };
///
/// tracing::info!("{}", msg);
/// ```
pub struct ConsumerEnrolled<'a> {
    pub name: &'a str,
    pub mnemonic: &'a str,
    pub capable_of_full_return: bool,
}

impl Display for ConsumerEnrolled<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Consumer {} ({}) enrolled, full return: {}",
            self.name, self.mnemonic, self.capable_of_full_return
        )
    }
}

impl StructuredLog for ConsumerEnrolled<'_> {
    fn log(&self) {
        tracing::info!(
            consumer = self.name,
            mnemonic = self.mnemonic,
            capable_of_full_return = self.capable_of_full_return,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "consumer",
            span_name = name,
            consumer = self.name,
            mnemonic = self.mnemonic,
        )
    }
}

/// A consumer with an already registered name was offered again.
///
/// # Log Level
/// `warn!` - Ignored, the broker keeps the first one
pub struct DuplicateConsumerIgnored<'a> {
    pub name: &'a str,
}

impl Display for DuplicateConsumerIgnored<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Consumer {} is already enrolled, ignoring the new instance",
            self.name
        )
    }
}

/// A processed item could not be routed and was dropped.
///
/// # Log Level
/// `warn!` - Best-effort delivery, the producer will not see this item
pub struct ItemDiscarded<'a> {
    pub port_id: PortId,
    pub reason: &'a str,
}

impl Display for ItemDiscarded<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Discarding work item for buffer port {}: {}",
            self.port_id, self.reason
        )
    }
}

impl StructuredLog for ItemDiscarded<'_> {
    fn log(&self) {
        tracing::warn!(port_id = self.port_id, reason = self.reason, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::warn_span!("discard", span_name = name, port_id = self.port_id)
    }
}

/// The broker shut down its consumers and dropped its ports.
///
/// # Log Level
/// `info!` - Lifecycle event
pub struct BrokerFinalized {
    pub consumers: usize,
    pub buffer_ports: usize,
}

impl Display for BrokerFinalized {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Broker finalized: {} consumer(s) shut down, {} buffer port(s) released",
            self.consumers, self.buffer_ports
        )
    }
}
