// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Mediation between producers and consumers.
//!
//! Producers own [`BufferPort`]s and register them with the [`Broker`]. The
//! broker hands raw items to consumers round-robin across all registered
//! ports and routes processed items back to the port whose id the item
//! carries. A [`BrokerExecutor`] is the ready-made producer: it submits a
//! batch through its own port and collects the returns.

mod buffer_port;
mod executor;
mod mediator;

pub use buffer_port::BufferPort;
pub use executor::{BrokerExecutor, ExecutorOptions, ExecutorStatus, IterationReport};
pub use mediator::Broker;

/// Tag identifying a registered buffer port.
pub type PortId = u32;

/// Outcome of a timeout-bounded insertion.
///
/// A timed-out insertion hands the item back so the caller decides whether
/// to retry or to drop it.
#[derive(Debug)]
#[must_use]
pub enum Delivery<T> {
    Delivered,
    TimedOut(T),
}

impl<T> Delivery<T> {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Delivery::Delivered)
    }

    /// The item that could not be delivered, if any.
    pub fn into_rejected(self) -> Option<T> {
        match self {
            Delivery::Delivered => None,
            Delivery::TimedOut(item) => Some(item),
        }
    }
}
