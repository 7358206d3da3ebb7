// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Local consumers: workers, their broker ferry and the thread pool.

mod thread_pool;
mod worker;


pub use thread_pool::StdThreadConsumer;
pub use worker::{BrokerFerry, Worker};

use crate::broker::{Broker, Delivery};
use crate::container::ProcessingContainer;
use crate::errors::{BrokerError, BrokerResult};
use crate::observability::messages::broker::ItemDiscarded;
use crate::observability::messages::StructuredLog;
use crate::traits::Processable;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Cooperative stop signal shared by a consumer and everything it runs.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Hands a processed item back to the broker, retrying timed-out puts until
/// `stop_requested` reports true.
///
/// Items whose port is gone, or which are still pending when the consumer
/// stops, are dropped with a warning. Only other broker errors are returned.
pub(crate) fn return_to_broker<P: Processable>(
    broker: &Broker<P>,
    item: ProcessingContainer<P>,
    timeout: Duration,
    stop_requested: impl Fn() -> bool,
) -> BrokerResult<()> {
    let mut pending = item;
    loop {
        match broker.put_timeout(pending, timeout) {
            Ok(Delivery::Delivered) => return Ok(()),
            Ok(Delivery::TimedOut(item)) => {
                if stop_requested() {
                    ItemDiscarded {
                        port_id: item.buffer_port_id().unwrap_or_default(),
                        reason: "consumer stopped before the item could be returned",
                    }
                    .log();
                    return Ok(());
                }
                pending = item;
            }
            Err(BrokerError::BufferNotPresent { port_id }) => {
                ItemDiscarded {
                    port_id,
                    reason: "buffer port is no longer registered",
                }
                .log();
                return Ok(());
            }
            Err(e) => return Err(e),
        }
    }
}
