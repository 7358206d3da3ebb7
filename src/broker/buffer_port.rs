// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use crate::broker::{Delivery, PortId};
use crate::container::ProcessingContainer;
use crate::traits::Processable;
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

/// Wake-up interval for the blocking queue operations.
const BLOCKING_POLL: Duration = Duration::from_millis(500);

/// The rendezvous point between one producer and the broker.
///
/// Raw items flow from the producer to the broker through a bounded queue,
/// processed items flow back through an unbounded one. Every push and pop
/// stamps the matching timestamp on the item.
pub struct BufferPort<P: Processable> {
    raw_tx: Sender<ProcessingContainer<P>>,
    raw_rx: Receiver<ProcessingContainer<P>>,
    processed_tx: Sender<ProcessingContainer<P>>,
    processed_rx: Receiver<ProcessingContainer<P>>,

    port_id: OnceLock<PortId>,
    connected_to_producer: AtomicBool,

    retrieved_once: AtomicBool,
    first_retrieval: Mutex<Option<DateTime<Utc>>>,
    first_retrieval_signal: Condvar,
}

impl<P: Processable> BufferPort<P> {
    /// Creates a port whose raw queue holds at most `raw_capacity` items.
    /// A capacity of 0 leaves the raw queue unbounded.
    pub fn new(raw_capacity: usize) -> Self {
        let (raw_tx, raw_rx) = if raw_capacity == 0 {
            unbounded()
        } else {
            bounded(raw_capacity)
        };
        let (processed_tx, processed_rx) = unbounded();

        Self {
            raw_tx,
            raw_rx,
            processed_tx,
            processed_rx,
            port_id: OnceLock::new(),
            connected_to_producer: AtomicBool::new(true),
            retrieved_once: AtomicBool::new(false),
            first_retrieval: Mutex::new(None),
            first_retrieval_signal: Condvar::new(),
        }
    }

    /// Shared port, ready to hand to [`crate::broker::Broker::enrol_buffer_port`].
    pub fn shared(raw_capacity: usize) -> Arc<Self> {
        Arc::new(Self::new(raw_capacity))
    }

    /// Id assigned by the broker, `None` until the port is enrolled.
    pub fn port_id(&self) -> Option<PortId> {
        self.port_id.get().copied()
    }

    /// Returns the existing id if the port was already tagged.
    pub(crate) fn assign_port_id(&self, port_id: PortId) -> Result<(), PortId> {
        self.port_id
            .set(port_id)
            .map_err(|_| self.port_id().unwrap_or(port_id))
    }

    /// Blocks until there is room in the raw queue.
    pub fn push_raw(&self, item: ProcessingContainer<P>) {
        let mut pending = item;
        loop {
            match self.push_raw_timeout(pending, BLOCKING_POLL) {
                Delivery::Delivered => return,
                Delivery::TimedOut(item) => pending = item,
            }
        }
    }

    pub fn push_raw_timeout(
        &self,
        mut item: ProcessingContainer<P>,
        timeout: Duration,
    ) -> Delivery<ProcessingContainer<P>> {
        if let Some(port_id) = self.port_id() {
            item.set_buffer_port_id(port_id);
        }
        item.timestamps_mut().mark_raw_submitted();
        deliver(&self.raw_tx, item, timeout)
    }

    /// Blocks until a raw item is available.
    pub fn pop_raw(&self) -> ProcessingContainer<P> {
        loop {
            if let Some(item) = self.pop_raw_timeout(BLOCKING_POLL) {
                return item;
            }
        }
    }

    pub fn pop_raw_timeout(&self, timeout: Duration) -> Option<ProcessingContainer<P>> {
        let mut item = self.raw_rx.recv_timeout(timeout).ok()?;
        let retrieved_at = item.timestamps_mut().mark_raw_retrieved();
        self.note_retrieval(retrieved_at);
        Some(item)
    }

    pub fn push_processed(&self, item: ProcessingContainer<P>) {
        let mut pending = item;
        loop {
            match self.push_processed_timeout(pending, BLOCKING_POLL) {
                Delivery::Delivered => return,
                Delivery::TimedOut(item) => pending = item,
            }
        }
    }

    pub fn push_processed_timeout(
        &self,
        mut item: ProcessingContainer<P>,
        timeout: Duration,
    ) -> Delivery<ProcessingContainer<P>> {
        item.timestamps_mut().mark_processed_submitted();
        deliver(&self.processed_tx, item, timeout)
    }

    /// Blocks until a processed item is available.
    pub fn pop_processed(&self) -> ProcessingContainer<P> {
        loop {
            if let Some(item) = self.pop_processed_timeout(BLOCKING_POLL) {
                return item;
            }
        }
    }

    pub fn pop_processed_timeout(&self, timeout: Duration) -> Option<ProcessingContainer<P>> {
        let mut item = self.processed_rx.recv_timeout(timeout).ok()?;
        item.timestamps_mut().mark_processed_retrieved();
        Some(item)
    }

    /// Marks the port as orphaned. The broker drops it on its next enrolment.
    pub fn producer_disconnect(&self) {
        self.connected_to_producer.store(false, Ordering::SeqCst);
    }

    pub fn is_connected_to_producer(&self) -> bool {
        self.connected_to_producer.load(Ordering::SeqCst)
    }

    /// Time of the first successful raw retrieval, if any happened yet.
    pub fn first_retrieval_time(&self) -> Option<DateTime<Utc>> {
        *self.first_retrieval.lock()
    }

    /// Waits up to `timeout` for the first raw retrieval.
    pub fn wait_for_first_retrieval(&self, timeout: Duration) -> Option<DateTime<Utc>> {
        let deadline = Instant::now() + timeout;
        let mut first = self.first_retrieval.lock();
        while first.is_none() {
            if self
                .first_retrieval_signal
                .wait_until(&mut first, deadline)
                .timed_out()
            {
                break;
            }
        }
        *first
    }

    pub fn raw_len(&self) -> usize {
        self.raw_rx.len()
    }

    pub fn processed_len(&self) -> usize {
        self.processed_rx.len()
    }

    fn note_retrieval(&self, at: DateTime<Utc>) {
        if self.retrieved_once.load(Ordering::Acquire) {
            return;
        }
        let mut first = self.first_retrieval.lock();
        if first.is_none() {
            *first = Some(at);
            self.retrieved_once.store(true, Ordering::Release);
            self.first_retrieval_signal.notify_all();
        }
    }
}

fn deliver<T>(tx: &Sender<T>, item: T, timeout: Duration) -> Delivery<T> {
    // The port holds both channel ends, so disconnection cannot happen here.
    match tx.send_timeout(item, timeout) {
        Ok(()) => Delivery::Delivered,
        Err(e) => Delivery::TimedOut(e.into_inner()),
    }
}
