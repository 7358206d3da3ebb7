// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use crate::broker::Broker;
use crate::errors::ConsumerError;
use crate::traits::Processable;
use std::sync::Arc;

/// How much concurrent work a consumer can absorb.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessingUnits {
    pub count: usize,
    /// False when `count` is a guess, e.g. for remote clients.
    pub exact: bool,
}

/// Something that pulls raw items from a [`Broker`] and hands processed ones back.
///
/// Consumers are registered with [`Broker::enrol_consumer`], which calls
/// [`Consumer::async_start_processing`] once. The broker keeps at most one
/// consumer per [`Consumer::name`].
pub trait Consumer<P: Processable>: Send + Sync {
    /// Unique name of the consumer kind.
    fn name(&self) -> &str;

    /// Short form of the name, used on command lines and in logs.
    fn mnemonic(&self) -> &str;

    /// Starts serving `broker` in the background and returns immediately.
    fn async_start_processing(&self, broker: Arc<Broker<P>>) -> Result<(), ConsumerError>;

    /// Requests a stop and waits for background work to wind down.
    /// Calling it more than once is harmless.
    fn shutdown(&self);

    /// True once a stop has been requested.
    fn stopped(&self) -> bool;

    /// Whether this consumer guarantees never to silently drop work.
    fn capable_of_full_return(&self) -> bool;

    fn processing_units_estimate(&self) -> ProcessingUnits;

    /// Whether items are processed by separately started clients.
    fn needs_client(&self) -> bool {
        false
    }
}
