// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The broker: many producers, many consumers, one routing table.
//!
//! # Locking
//!
//! Three mutexes guard the shared state:
//!
//! * `raw` - raw-side port map, round-robin cursor and id counter
//! * `processed` - processed-side port map
//! * `enrolment` - registered consumers and the cached full-return flag
//!
//! Whenever more than one is needed they are taken in exactly that order,
//! which rules out lock-order deadlocks. Blocking queue operations always
//! happen after the locks are released.
//!
//! # Round robin
//!
//! The cursor is stored as a port id rather than a map position. Each
//! retrieval resolves it to the first registered id at or after the cursor,
//! wrapping to the start of the map, so ports may come and go between calls.

use crate::broker::{BufferPort, Delivery, PortId};
use crate::config::consts::DEFAULT_MAX_BUFFER_PORTS;
use crate::container::ProcessingContainer;
use crate::errors::{BrokerError, BrokerResult};
use crate::observability::messages::broker::{
    BrokerFinalized, BufferPortEnrolled, ConsumerEnrolled, DuplicateConsumerIgnored,
};
use crate::observability::messages::StructuredLog;
use crate::traits::{Consumer, Processable};
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, HashSet};
use std::ops::Bound::{Excluded, Unbounded};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

type PortMap<P> = BTreeMap<PortId, Arc<BufferPort<P>>>;

struct RawPorts<P: Processable> {
    ports: PortMap<P>,
    cursor: Option<PortId>,
    next_id: PortId,
}

struct Enrolment<P: Processable> {
    consumers: Vec<Arc<dyn Consumer<P>>>,
    names: HashSet<String>,
    capable_of_full_return: bool,
}

pub struct Broker<P: Processable> {
    raw: Mutex<RawPorts<P>>,
    processed: Mutex<PortMap<P>>,
    enrolment: Mutex<Enrolment<P>>,
    consumers_present: Condvar,
    finalized: AtomicBool,
    max_buffer_ports: usize,
}

impl<P: Processable> Default for Broker<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Processable> Broker<P> {
    pub fn new() -> Self {
        Self::with_max_buffer_ports(DEFAULT_MAX_BUFFER_PORTS)
    }

    pub fn with_max_buffer_ports(max_buffer_ports: usize) -> Self {
        Self {
            raw: Mutex::new(RawPorts {
                ports: BTreeMap::new(),
                cursor: None,
                next_id: 0,
            }),
            processed: Mutex::new(BTreeMap::new()),
            enrolment: Mutex::new(Enrolment {
                consumers: Vec::new(),
                names: HashSet::new(),
                capable_of_full_return: false,
            }),
            consumers_present: Condvar::new(),
            finalized: AtomicBool::new(false),
            max_buffer_ports,
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Registers `port` and tags it with a fresh id.
    ///
    /// Ports whose producer disconnected, or which nothing but the broker
    /// references any more, are dropped first. Returns whether every
    /// enrolled consumer is capable of full return.
    pub fn enrol_buffer_port(&self, port: Arc<BufferPort<P>>) -> BrokerResult<bool> {
        if self.is_finalized() {
            return Err(BrokerError::Finalized);
        }

        {
            let mut raw = self.raw.lock();
            let mut processed = self.processed.lock();
            // finalize raises the flag before taking these locks
            if self.is_finalized() {
                return Err(BrokerError::Finalized);
            }

            let purged = purge_orphans(&mut raw.ports, &mut processed)?;

            if raw.ports.len() >= self.max_buffer_ports {
                return Err(BrokerError::TooManyBufferPorts {
                    limit: self.max_buffer_ports,
                });
            }

            let port_id = next_port_id(&mut raw);
            port.assign_port_id(port_id)
                .map_err(|existing| BrokerError::AlreadyEnrolled { port_id: existing })?;

            raw.ports.insert(port_id, Arc::clone(&port));
            processed.insert(port_id, port);
            raw.cursor = raw.ports.keys().next().copied();

            BufferPortEnrolled {
                port_id,
                live_ports: raw.ports.len(),
                purged,
            }
            .log();
        }

        Ok(self.enrolment.lock().capable_of_full_return)
    }

    /// Registers `consumer` and starts it.
    ///
    /// A second consumer with an already registered name is ignored.
    pub fn enrol_consumer(self: &Arc<Self>, consumer: Arc<dyn Consumer<P>>) -> BrokerResult<()> {
        if self.is_finalized() {
            return Err(BrokerError::Finalized);
        }

        let mut enrolment = self.enrolment.lock();
        if self.is_finalized() {
            return Err(BrokerError::Finalized);
        }
        let name = consumer.name().to_string();
        if enrolment.names.contains(&name) {
            tracing::warn!("{}", DuplicateConsumerIgnored { name: &name });
            return Ok(());
        }

        consumer
            .async_start_processing(Arc::clone(self))
            .map_err(|source| BrokerError::ConsumerStart {
                name: name.clone(),
                source,
            })?;

        enrolment.consumers.push(Arc::clone(&consumer));
        enrolment.names.insert(name);
        enrolment.capable_of_full_return = enrolment
            .consumers
            .iter()
            .all(|c| c.capable_of_full_return());

        ConsumerEnrolled {
            name: consumer.name(),
            mnemonic: consumer.mnemonic(),
            capable_of_full_return: consumer.capable_of_full_return(),
        }
        .log();
        self.consumers_present.notify_all();
        Ok(())
    }

    pub fn enrol_consumers<I>(self: &Arc<Self>, consumers: I) -> BrokerResult<()>
    where
        I: IntoIterator<Item = Arc<dyn Consumer<P>>>,
    {
        consumers
            .into_iter()
            .try_for_each(|consumer| self.enrol_consumer(consumer))
    }

    /// Blocks until at least one consumer is enrolled, then reports whether
    /// all of them are capable of full return. Returns false if the broker
    /// is finalized while waiting.
    pub fn capable_of_full_return(&self) -> bool {
        let mut enrolment = self.enrolment.lock();
        while enrolment.consumers.is_empty() && !self.is_finalized() {
            self.consumers_present.wait(&mut enrolment);
        }
        !enrolment.consumers.is_empty() && enrolment.capable_of_full_return
    }

    /// Like [`Broker::capable_of_full_return`], giving up after `timeout`.
    pub fn capable_of_full_return_timeout(&self, timeout: Duration) -> Option<bool> {
        let deadline = Instant::now() + timeout;
        let mut enrolment = self.enrolment.lock();
        while enrolment.consumers.is_empty() && !self.is_finalized() {
            if self
                .consumers_present
                .wait_until(&mut enrolment, deadline)
                .timed_out()
            {
                break;
            }
        }
        if enrolment.consumers.is_empty() {
            None
        } else {
            Some(enrolment.capable_of_full_return)
        }
    }

    /// Takes a raw item from the next port in round-robin order, waiting on
    /// that port until one arrives. `None` if no port is registered.
    pub fn get(&self) -> Option<ProcessingContainer<P>> {
        let (port_id, port) = self.next_raw_port()?;
        let mut item = port.pop_raw();
        item.set_buffer_port_id(port_id);
        Some(item)
    }

    /// Like [`Broker::get`], waiting at most `timeout` on the selected port.
    pub fn get_timeout(&self, timeout: Duration) -> Option<ProcessingContainer<P>> {
        let (port_id, port) = self.next_raw_port()?;
        let mut item = port.pop_raw_timeout(timeout)?;
        item.set_buffer_port_id(port_id);
        Some(item)
    }

    /// Routes a processed item back to the port it came from.
    pub fn put(&self, item: ProcessingContainer<P>) -> BrokerResult<()> {
        let port = self.processed_port_for(&item)?;
        port.push_processed(item);
        Ok(())
    }

    pub fn put_timeout(
        &self,
        item: ProcessingContainer<P>,
        timeout: Duration,
    ) -> BrokerResult<Delivery<ProcessingContainer<P>>> {
        let port = self.processed_port_for(&item)?;
        Ok(port.push_processed_timeout(item, timeout))
    }

    /// Shuts down every consumer and releases all ports. Only the first
    /// call has an effect.
    pub fn finalize(&self) {
        if self.finalized.swap(true, Ordering::SeqCst) {
            return;
        }

        let consumers: Vec<_> = self.enrolment.lock().consumers.clone();
        for consumer in &consumers {
            consumer.shutdown();
        }

        let mut raw = self.raw.lock();
        let mut processed = self.processed.lock();
        let mut enrolment = self.enrolment.lock();

        let buffer_ports = raw.ports.len();
        raw.ports.clear();
        raw.cursor = None;
        processed.clear();
        enrolment.consumers.clear();
        enrolment.capable_of_full_return = false;
        self.consumers_present.notify_all();

        tracing::info!(
            "{}",
            BrokerFinalized {
                consumers: consumers.len(),
                buffer_ports,
            }
        );
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::SeqCst)
    }

    pub fn has_consumers(&self) -> bool {
        !self.enrolment.lock().consumers.is_empty()
    }

    pub fn n_consumers(&self) -> usize {
        self.enrolment.lock().consumers.len()
    }

    pub fn n_buffer_ports(&self) -> usize {
        self.raw.lock().ports.len()
    }

    fn next_raw_port(&self) -> Option<(PortId, Arc<BufferPort<P>>)> {
        let mut raw = self.raw.lock();
        let current = raw
            .cursor
            .and_then(|cursor| raw.ports.range(cursor..).next())
            .or_else(|| raw.ports.iter().next())
            .map(|(id, port)| (*id, Arc::clone(port)))?;

        raw.cursor = raw
            .ports
            .range((Excluded(current.0), Unbounded))
            .next()
            .or_else(|| raw.ports.iter().next())
            .map(|(id, _)| *id);

        Some(current)
    }

    fn processed_port_for(&self, item: &ProcessingContainer<P>) -> BrokerResult<Arc<BufferPort<P>>> {
        let port_id = item.buffer_port_id().ok_or(BrokerError::MissingPortId)?;
        self.processed
            .lock()
            .get(&port_id)
            .cloned()
            .ok_or(BrokerError::BufferNotPresent { port_id })
    }
}

/// A port is orphaned once its producer disconnected it or dropped its
/// last handle, leaving only the two map entries.
fn is_orphaned<P: Processable>(port: &Arc<BufferPort<P>>) -> bool {
    !port.is_connected_to_producer() || Arc::strong_count(port) <= 2
}

fn purge_orphans<P: Processable>(raw: &mut PortMap<P>, processed: &mut PortMap<P>) -> BrokerResult<usize> {
    let stale: Vec<PortId> = raw
        .iter()
        .filter(|(_, port)| is_orphaned(port))
        .map(|(id, _)| *id)
        .collect();

    let mut purged_raw = 0;
    let mut purged_processed = 0;
    for id in &stale {
        purged_raw += usize::from(raw.remove(id).is_some());
        purged_processed += usize::from(processed.remove(id).is_some());
    }

    if purged_raw != purged_processed || raw.len() != processed.len() {
        return Err(BrokerError::InconsistentPortMaps {
            raw: raw.len(),
            processed: processed.len(),
        });
    }
    Ok(purged_raw)
}

/// Search-and-increment, wrapping at the end of the id space and skipping
/// ids that are still registered.
fn next_port_id<P: Processable>(raw: &mut RawPorts<P>) -> PortId {
    loop {
        let candidate = raw.next_id;
        raw.next_id = raw.next_id.wrapping_add(1);
        if !raw.ports.contains_key(&candidate) {
            return candidate;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ConsumerError;
    use crate::payloads::Multiply;
    use crate::traits::ProcessingUnits;
    use std::collections::BTreeSet;
    use std::sync::atomic::AtomicUsize;

    const SHORT: Duration = Duration::from_millis(20);

    fn port() -> Arc<BufferPort<Multiply>> {
        BufferPort::shared(16)
    }

    struct RecordingConsumer {
        name: String,
        full_return: bool,
        starts: AtomicUsize,
        shutdowns: AtomicUsize,
        fail_start: bool,
    }

    impl RecordingConsumer {
        fn new(name: impl Into<String>, full_return: bool) -> Arc<Self> {
            Arc::new(Self {
                name: name.into(),
                full_return,
                starts: AtomicUsize::new(0),
                shutdowns: AtomicUsize::new(0),
                fail_start: false,
            })
        }
    }

    impl Consumer<Multiply> for RecordingConsumer {
        fn name(&self) -> &str {
            &self.name
        }

        fn mnemonic(&self) -> &str {
            "rec"
        }

        fn async_start_processing(&self, _broker: Arc<Broker<Multiply>>) -> Result<(), ConsumerError> {
            if self.fail_start {
                return Err(ConsumerError::AlreadyStarted {
                    name: self.name.clone(),
                });
            }
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn shutdown(&self) {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }

        fn stopped(&self) -> bool {
            self.shutdowns.load(Ordering::SeqCst) > 0
        }

        fn capable_of_full_return(&self) -> bool {
            self.full_return
        }

        fn processing_units_estimate(&self) -> ProcessingUnits {
            ProcessingUnits {
                count: 1,
                exact: true,
            }
        }
    }

    #[test]
    fn test_port_ids_start_at_zero() {
        let broker: Broker<Multiply> = Broker::new();
        let (a, b) = (port(), port());

        broker.enrol_buffer_port(Arc::clone(&a)).unwrap();
        broker.enrol_buffer_port(Arc::clone(&b)).unwrap();

        assert_eq!(a.port_id(), Some(0));
        assert_eq!(b.port_id(), Some(1));
        assert_eq!(broker.n_buffer_ports(), 2);
    }

    #[test]
    fn test_enrolling_a_port_twice_fails() {
        let broker: Broker<Multiply> = Broker::new();
        let a = port();
        broker.enrol_buffer_port(Arc::clone(&a)).unwrap();

        let err = broker.enrol_buffer_port(Arc::clone(&a)).unwrap_err();

        assert!(matches!(err, BrokerError::AlreadyEnrolled { port_id: 0 }));
    }

    #[test]
    fn test_disconnected_ports_are_collected() {
        let broker: Broker<Multiply> = Broker::new();
        let ports: Vec<_> = (0..3).map(|_| port()).collect();
        for p in &ports {
            broker.enrol_buffer_port(Arc::clone(p)).unwrap();
        }

        ports[1].producer_disconnect();
        broker.enrol_buffer_port(port()).unwrap();

        let raw: BTreeSet<_> = broker.raw.lock().ports.keys().copied().collect();
        let processed: BTreeSet<_> = broker.processed.lock().keys().copied().collect();
        assert_eq!(raw, processed);
        assert_eq!(raw, BTreeSet::from([0, 2, 3]));
    }

    #[test]
    fn test_dropped_producer_handle_is_collected() {
        let broker: Broker<Multiply> = Broker::new();
        let kept = port();
        broker.enrol_buffer_port(Arc::clone(&kept)).unwrap();
        broker.enrol_buffer_port(port()).unwrap();

        broker.enrol_buffer_port(port()).unwrap();

        // The second port's only handle was the temporary passed in above.
        let raw: BTreeSet<_> = broker.raw.lock().ports.keys().copied().collect();
        assert!(raw.contains(&0));
        assert!(!raw.contains(&1));
    }

    #[test]
    fn test_live_ids_stay_unique_across_wraparound() {
        let broker: Broker<Multiply> = Broker::new();
        let first = port();
        broker.enrol_buffer_port(Arc::clone(&first)).unwrap();
        broker.raw.lock().next_id = PortId::MAX;

        let (a, b) = (port(), port());
        broker.enrol_buffer_port(Arc::clone(&a)).unwrap();
        broker.enrol_buffer_port(Arc::clone(&b)).unwrap();

        assert_eq!(first.port_id(), Some(0));
        assert_eq!(a.port_id(), Some(PortId::MAX));
        assert_eq!(b.port_id(), Some(1));
    }

    #[test]
    fn test_port_ceiling() {
        let broker: Broker<Multiply> = Broker::with_max_buffer_ports(2);
        let ports: Vec<_> = (0..3).map(|_| port()).collect();
        broker.enrol_buffer_port(Arc::clone(&ports[0])).unwrap();
        broker.enrol_buffer_port(Arc::clone(&ports[1])).unwrap();

        let err = broker.enrol_buffer_port(Arc::clone(&ports[2])).unwrap_err();

        assert!(matches!(err, BrokerError::TooManyBufferPorts { limit: 2 }));
        assert!(err.is_fatal());
        assert_eq!(ports[2].port_id(), None);
    }

    #[test]
    fn test_get_without_ports() {
        let broker: Broker<Multiply> = Broker::new();
        assert!(broker.get().is_none());
        assert!(broker.get_timeout(SHORT).is_none());
    }

    #[test]
    fn test_round_robin_visits_every_port() {
        let broker: Broker<Multiply> = Broker::new();
        let ports: Vec<_> = (0..3).map(|_| port()).collect();
        for p in &ports {
            broker.enrol_buffer_port(Arc::clone(p)).unwrap();
            p.push_raw(Multiply::doubling(1.0).into_item());
            p.push_raw(Multiply::doubling(2.0).into_item());
        }

        let origins: Vec<_> = (0..6)
            .map(|_| broker.get_timeout(SHORT).unwrap().buffer_port_id().unwrap())
            .collect();

        assert_eq!(origins, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn test_round_robin_survives_port_removal() {
        let broker: Broker<Multiply> = Broker::new();
        let ports: Vec<_> = (0..3).map(|_| port()).collect();
        for p in &ports {
            broker.enrol_buffer_port(Arc::clone(p)).unwrap();
            p.push_raw(Multiply::doubling(1.0).into_item());
        }
        ports[0].push_raw(Multiply::doubling(2.0).into_item());
        assert_eq!(broker.get_timeout(SHORT).unwrap().buffer_port_id(), Some(0));

        ports[1].producer_disconnect();
        let fresh = port();
        broker.enrol_buffer_port(Arc::clone(&fresh)).unwrap();
        fresh.push_raw(Multiply::doubling(1.0).into_item());

        // Enrolment rewinds the cursor to the first live port.
        let seen: Vec<_> = (0..3)
            .map(|_| broker.get_timeout(SHORT).unwrap().buffer_port_id().unwrap())
            .collect();
        assert_eq!(seen, vec![0, 2, 3]);
    }

    #[test]
    fn test_put_routes_to_origin_only() {
        let broker: Broker<Multiply> = Broker::new();
        let (a, b) = (port(), port());
        broker.enrol_buffer_port(Arc::clone(&a)).unwrap();
        broker.enrol_buffer_port(Arc::clone(&b)).unwrap();
        b.push_raw(Multiply::doubling(4.0).into_item());

        // The cursor starts on the empty port 0, so the first poll comes back empty.
        assert!(broker.get_timeout(SHORT).is_none());
        let mut item = broker.get_timeout(SHORT).unwrap();
        assert_eq!(item.buffer_port_id(), Some(1));
        item.process().unwrap();
        broker.put(item).unwrap();

        assert!(a.pop_processed_timeout(SHORT).is_none());
        let back = b.pop_processed_timeout(SHORT).unwrap();
        assert_eq!(*back.stored_result(0).unwrap(), 8.0);
    }

    #[test]
    fn test_put_to_unknown_port() {
        let broker: Broker<Multiply> = Broker::new();
        let mut item = Multiply::doubling(1.0).into_item();
        item.set_buffer_port_id(42);

        let err = broker.put(item).unwrap_err();

        assert!(matches!(err, BrokerError::BufferNotPresent { port_id: 42 }));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_put_without_origin() {
        let broker: Broker<Multiply> = Broker::new();
        let err = broker
            .put_timeout(Multiply::doubling(1.0).into_item(), SHORT)
            .unwrap_err();
        assert!(matches!(err, BrokerError::MissingPortId));
    }

    #[test]
    fn test_put_after_port_was_collected() {
        let broker: Broker<Multiply> = Broker::new();
        let gone = port();
        broker.enrol_buffer_port(Arc::clone(&gone)).unwrap();
        gone.push_raw(Multiply::doubling(1.0).into_item());
        let item = broker.get_timeout(SHORT).unwrap();

        gone.producer_disconnect();
        broker.enrol_buffer_port(port()).unwrap();

        let err = broker.put_timeout(item, SHORT).unwrap_err();
        assert!(matches!(err, BrokerError::BufferNotPresent { port_id: 0 }));
    }

    #[test]
    fn test_duplicate_consumer_names_are_ignored() {
        let broker: Arc<Broker<Multiply>> = Broker::shared();
        let first = RecordingConsumer::new("recorder", true);
        let second = RecordingConsumer::new("recorder", false);

        broker.enrol_consumer(first.clone()).unwrap();
        broker.enrol_consumer(second.clone()).unwrap();

        assert_eq!(broker.n_consumers(), 1);
        assert_eq!(first.starts.load(Ordering::SeqCst), 1);
        assert_eq!(second.starts.load(Ordering::SeqCst), 0);
        assert!(broker.capable_of_full_return());
    }

    #[test]
    fn test_full_return_requires_every_consumer() {
        let broker: Arc<Broker<Multiply>> = Broker::shared();
        broker
            .enrol_consumers(vec![
                RecordingConsumer::new("local", true) as Arc<dyn Consumer<Multiply>>,
                RecordingConsumer::new("remote", false) as Arc<dyn Consumer<Multiply>>,
            ])
            .unwrap();

        assert!(!broker.capable_of_full_return());
        assert!(!broker.enrol_buffer_port(port()).unwrap());
    }

    #[test]
    fn test_failed_start_is_not_enrolled() {
        let broker: Arc<Broker<Multiply>> = Broker::shared();
        let broken = Arc::new(RecordingConsumer {
            name: "broken".to_string(),
            full_return: true,
            starts: AtomicUsize::new(0),
            shutdowns: AtomicUsize::new(0),
            fail_start: true,
        });

        let err = broker.enrol_consumer(broken).unwrap_err();

        assert!(matches!(err, BrokerError::ConsumerStart { .. }));
        assert!(!broker.has_consumers());
    }

    #[test]
    fn test_full_return_waits_for_first_consumer() {
        let broker: Arc<Broker<Multiply>> = Broker::shared();
        assert_eq!(broker.capable_of_full_return_timeout(SHORT), None);

        let waiter = {
            let broker = Arc::clone(&broker);
            std::thread::spawn(move || broker.capable_of_full_return())
        };
        std::thread::sleep(SHORT);
        broker
            .enrol_consumer(RecordingConsumer::new("late", true))
            .unwrap();

        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_finalize_is_idempotent() {
        let broker: Arc<Broker<Multiply>> = Broker::shared();
        let consumer = RecordingConsumer::new("recorder", true);
        broker.enrol_consumer(consumer.clone()).unwrap();
        broker.enrol_buffer_port(port()).unwrap();

        broker.finalize();
        broker.finalize();

        assert_eq!(consumer.shutdowns.load(Ordering::SeqCst), 1);
        assert_eq!(broker.n_buffer_ports(), 0);
        assert_eq!(broker.n_consumers(), 0);
        assert!(matches!(
            broker.enrol_buffer_port(port()),
            Err(BrokerError::Finalized)
        ));
    }

    #[test]
    fn test_consumer_offered_after_finalize_is_never_started() {
        let broker: Arc<Broker<Multiply>> = Broker::shared();
        broker.finalize();
        let late = RecordingConsumer::new("late", true);

        assert!(matches!(
            broker.enrol_consumer(late.clone()),
            Err(BrokerError::Finalized)
        ));
        assert_eq!(late.starts.load(Ordering::SeqCst), 0);
        assert!(!broker.has_consumers());
    }

    #[test]
    fn test_enrolment_racing_finalize_leaves_nothing_running() {
        let broker: Arc<Broker<Multiply>> = Broker::shared();
        let barrier = Arc::new(std::sync::Barrier::new(5));

        let enrollers: Vec<_> = (0..4)
            .map(|t| {
                let broker = Arc::clone(&broker);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    (0..50)
                        .map(|i| {
                            let _ = broker.enrol_buffer_port(port());
                            let consumer = RecordingConsumer::new(format!("c{t}-{i}"), true);
                            match broker.enrol_consumer(consumer.clone()) {
                                Ok(()) | Err(BrokerError::Finalized) => consumer,
                                Err(other) => panic!("unexpected enrolment error {other}"),
                            }
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        barrier.wait();
        std::thread::sleep(Duration::from_millis(1));
        broker.finalize();

        for enroller in enrollers {
            for consumer in enroller.join().unwrap() {
                let started = consumer.starts.load(Ordering::SeqCst);
                let stopped = consumer.shutdowns.load(Ordering::SeqCst);
                assert_eq!(started, stopped, "{} left running", consumer.name);
            }
        }
        assert_eq!(broker.n_consumers(), 0);
        assert_eq!(broker.n_buffer_ports(), 0);
    }
}
