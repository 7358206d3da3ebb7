// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The worker run loop and the ferry that connects it to a broker.
//!
//! A [`Worker`] never talks to the broker directly. It is handed a
//! [`BrokerFerry`]: a worker id plus three closures that retrieve an item,
//! submit an item and report whether a stop was requested. The thread pool
//! wires these to [`Broker::get_timeout`], [`Broker::put_timeout`] and its
//! own stop flag; tests wire them to plain channels.
//!
//! # Error handling
//!
//! A [`ProcessingError::Failed`](crate::errors::ProcessingError::Failed)
//! belongs to the item: it is logged and the item still goes back to its
//! producer. Any other error ends the loop and is returned wrapped in
//! [`WorkerError::Terminated`].

use crate::broker::Broker;
use crate::config::consts::DEFAULT_WORKER_POLL_TIMEOUT;
use crate::consumers::{return_to_broker, StopFlag};
use crate::container::ProcessingContainer;
use crate::errors::{BrokerError, WorkerError};
use crate::observability::messages::worker::{
    ProcessingFailureReturned, WorkerStarted, WorkerStopped,
};
use crate::observability::messages::StructuredLog;
use crate::traits::{LocalProcessing, Processable, WorkerKind};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

type Retriever<P> = Box<dyn Fn(Duration) -> Option<ProcessingContainer<P>> + Send>;
type Submitter<P> = Box<dyn Fn(ProcessingContainer<P>, Duration) -> Result<(), BrokerError> + Send>;
type StopCheck = Box<dyn Fn() -> bool + Send>;

pub struct BrokerFerry<P: Processable> {
    worker_id: usize,
    retriever: Retriever<P>,
    submitter: Submitter<P>,
    stop_requested: StopCheck,
}

impl<P: Processable> BrokerFerry<P> {
    pub fn new<R, S, C>(worker_id: usize, retriever: R, submitter: S, stop_requested: C) -> Self
    where
        R: Fn(Duration) -> Option<ProcessingContainer<P>> + Send + 'static,
        S: Fn(ProcessingContainer<P>, Duration) -> Result<(), BrokerError> + Send + 'static,
        C: Fn() -> bool + Send + 'static,
    {
        Self {
            worker_id,
            retriever: Box::new(retriever),
            submitter: Box::new(submitter),
            stop_requested: Box::new(stop_requested),
        }
    }

    /// Ferry serving `broker` until `stop` is requested.
    pub fn for_broker(worker_id: usize, broker: Arc<Broker<P>>, stop: StopFlag) -> Self {
        let get_broker = Arc::clone(&broker);
        let put_stop = stop.clone();

        Self::new(
            worker_id,
            move |timeout| {
                let item = get_broker.get_timeout(timeout);
                if item.is_none() && get_broker.n_buffer_ports() == 0 {
                    // Nothing registered yet; wait instead of spinning.
                    thread::sleep(timeout);
                }
                item
            },
            move |item, timeout| return_to_broker(&broker, item, timeout, || put_stop.is_requested()),
            move || stop.is_requested(),
        )
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    pub fn retrieve(&self, timeout: Duration) -> Option<ProcessingContainer<P>> {
        (self.retriever)(timeout)
    }

    pub fn submit(&self, item: ProcessingContainer<P>, timeout: Duration) -> Result<(), BrokerError> {
        (self.submitter)(item, timeout)
    }

    pub fn stop_requested(&self) -> bool {
        (self.stop_requested)()
    }
}

/// Executes items one at a time on the calling thread.
pub struct Worker<P: Processable> {
    id: Option<usize>,
    ferry: Option<BrokerFerry<P>>,
    kind: Box<dyn WorkerKind<P>>,
    poll_timeout: Duration,
}

impl<P: Processable> Worker<P> {
    pub fn new(kind: Box<dyn WorkerKind<P>>) -> Self {
        Self {
            id: None,
            ferry: None,
            kind,
            poll_timeout: DEFAULT_WORKER_POLL_TIMEOUT,
        }
    }

    /// A worker that runs each item's own processing step.
    pub fn local() -> Self {
        Self::new(Box::new(LocalProcessing))
    }

    /// How long each retrieval and submission may block before the stop
    /// flag is checked again.
    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    pub fn worker_id(&self) -> Option<usize> {
        self.id
    }

    /// Attaches `ferry`; the worker takes over the ferry's id.
    pub fn register_broker_ferry(&mut self, ferry: BrokerFerry<P>) {
        self.id = Some(ferry.worker_id());
        self.ferry = Some(ferry);
    }

    /// Same kind and settings, but no id and no ferry.
    pub fn clone_worker(&self) -> Self {
        Self {
            id: None,
            ferry: None,
            kind: self.kind.clone_kind(),
            poll_timeout: self.poll_timeout,
        }
    }

    /// Retrieves, processes and submits items until the ferry reports a stop
    /// request. Returns the number of items handled.
    pub fn run(&mut self) -> Result<usize, WorkerError> {
        let worker_id = self.id.ok_or(WorkerError::MissingWorkerId)?;
        let Self {
            ferry,
            kind,
            poll_timeout,
            ..
        } = self;
        let ferry = ferry
            .as_ref()
            .ok_or(WorkerError::MissingFerry { worker_id })?;

        let started = WorkerStarted {
            worker_id,
            poll_timeout: *poll_timeout,
        };
        let span = started.span("worker_run");
        let _guard = span.enter();
        started.log();

        let terminated = |source: WorkerError| WorkerError::Terminated {
            worker_id,
            source: Box::new(source),
        };

        let processed = serve(worker_id, ferry, &mut **kind, *poll_timeout).map_err(terminated)?;
        kind.process_finalize(worker_id)
            .map_err(|e| terminated(WorkerError::Finalize(e)))?;

        tracing::debug!("{}", WorkerStopped { worker_id, processed });
        Ok(processed)
    }
}

fn serve<P: Processable>(
    worker_id: usize,
    ferry: &BrokerFerry<P>,
    kind: &mut dyn WorkerKind<P>,
    poll_timeout: Duration,
) -> Result<usize, WorkerError> {
    let mut processed = 0;
    let mut initialized = false;

    while !ferry.stop_requested() {
        let Some(mut item) = ferry.retrieve(poll_timeout) else {
            continue;
        };

        if !initialized {
            kind.process_init(worker_id, &item)
                .map_err(WorkerError::Init)?;
            initialized = true;
        }

        if let Err(e) = kind.process(&mut item) {
            if !e.is_item_failure() {
                return Err(e.into());
            }
            ProcessingFailureReturned {
                worker_id,
                error: &e,
            }
            .log();
        }

        ferry.submit(item, poll_timeout)?;
        processed += 1;
    }

    Ok(processed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ProcessingStatus;
    use crate::errors::ProcessingError;
    use crate::payloads::Multiply;
    use crossbeam_channel::{unbounded, Receiver, Sender};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const POLL: Duration = Duration::from_millis(10);

    /// Ferry over plain channels that asks to stop once `limit` items came back.
    fn channel_ferry(
        worker_id: usize,
        inbox: Receiver<ProcessingContainer<Multiply>>,
        outbox: Sender<ProcessingContainer<Multiply>>,
        limit: usize,
    ) -> BrokerFerry<Multiply> {
        let returned = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&returned);
        BrokerFerry::new(
            worker_id,
            move |timeout| inbox.recv_timeout(timeout).ok(),
            move |item, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                let _ = outbox.send(item);
                Ok(())
            },
            move || returned.load(Ordering::SeqCst) >= limit,
        )
    }

    #[derive(Clone, Default)]
    struct Counting {
        inits: Arc<AtomicUsize>,
        finalizes: Arc<AtomicUsize>,
    }

    impl WorkerKind<Multiply> for Counting {
        fn process_init(&mut self, _worker_id: usize, _first: &ProcessingContainer<Multiply>) -> anyhow::Result<()> {
            self.inits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn process_finalize(&mut self, _worker_id: usize) -> anyhow::Result<()> {
            self.finalizes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn clone_kind(&self) -> Box<dyn WorkerKind<Multiply>> {
            Box::new(self.clone())
        }
    }

    #[test]
    fn test_run_requires_a_ferry() {
        let mut worker: Worker<Multiply> = Worker::local();
        assert!(matches!(worker.run(), Err(WorkerError::MissingWorkerId)));
    }

    #[test]
    fn test_clone_gets_fresh_identity() {
        let (tx, rx) = unbounded();
        let (out_tx, _out_rx) = unbounded();
        let mut worker: Worker<Multiply> = Worker::local();
        worker.register_broker_ferry(channel_ferry(7, rx, out_tx, 1));
        drop(tx);

        let clone = worker.clone_worker();

        assert_eq!(worker.worker_id(), Some(7));
        assert_eq!(clone.worker_id(), None);
        assert!(clone.ferry.is_none());
    }

    #[test]
    fn test_processes_until_stop() {
        let (tx, rx) = unbounded();
        let (out_tx, out_rx) = unbounded();
        for value in [1.0, 2.0, 3.0] {
            tx.send(Multiply::doubling(value).into_item()).unwrap();
        }
        let kind = Counting::default();
        let mut worker = Worker::<Multiply>::new(Box::new(kind.clone())).with_poll_timeout(POLL);
        worker.register_broker_ferry(channel_ferry(0, rx, out_tx, 3));

        assert_eq!(worker.run().unwrap(), 3);

        let results: Vec<f64> = out_rx
            .try_iter()
            .map(|item| *item.stored_result(0).unwrap())
            .collect();
        assert_eq!(results, vec![2.0, 4.0, 6.0]);
        assert_eq!(kind.inits.load(Ordering::SeqCst), 1);
        assert_eq!(kind.finalizes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_item_failure_is_returned_not_fatal() {
        struct Refusing;

        impl WorkerKind<Multiply> for Refusing {
            fn process(&mut self, item: &mut ProcessingContainer<Multiply>) -> crate::errors::ProcessingResult<()> {
                item.process_with(|_, _| anyhow::bail!("refused"))
            }

            fn clone_kind(&self) -> Box<dyn WorkerKind<Multiply>> {
                Box::new(Refusing)
            }
        }

        let (tx, rx) = unbounded();
        let (out_tx, out_rx) = unbounded();
        tx.send(Multiply::doubling(1.0).into_item()).unwrap();
        let mut worker = Worker::<Multiply>::new(Box::new(Refusing)).with_poll_timeout(POLL);
        worker.register_broker_ferry(channel_ferry(1, rx, out_tx, 1));

        assert_eq!(worker.run().unwrap(), 1);

        let back = out_rx.try_recv().unwrap();
        assert_eq!(back.status(), ProcessingStatus::ExceptionCaught);
        assert!(back.error_description().contains("refused"));
    }

    #[test]
    fn test_contract_violation_terminates_worker() {
        let (tx, rx) = unbounded();
        let (out_tx, out_rx) = unbounded();
        // Not marked DO_PROCESS, so processing it is a contract violation.
        tx.send(ProcessingContainer::new(Multiply::doubling(1.0), 1))
            .unwrap();
        let mut worker: Worker<Multiply> = Worker::local().with_poll_timeout(POLL);
        worker.register_broker_ferry(channel_ferry(2, rx, out_tx, 1));

        let err = worker.run().unwrap_err();

        match err {
            WorkerError::Terminated { worker_id, source } => {
                assert_eq!(worker_id, 2);
                assert!(matches!(
                    *source,
                    WorkerError::Processing(ProcessingError::NotDueForProcessing { .. })
                ));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(out_rx.try_recv().is_err());
    }

    #[test]
    fn test_failed_run_skips_finalize() {
        let (tx, rx) = unbounded();
        let (out_tx, _out_rx) = unbounded();
        tx.send(ProcessingContainer::new(Multiply::doubling(1.0), 1))
            .unwrap();
        let kind = Counting::default();
        let mut worker = Worker::<Multiply>::new(Box::new(kind.clone())).with_poll_timeout(POLL);
        worker.register_broker_ferry(channel_ferry(3, rx, out_tx, 1));

        assert!(worker.run().is_err());

        assert_eq!(kind.inits.load(Ordering::SeqCst), 1);
        assert_eq!(kind.finalizes.load(Ordering::SeqCst), 0);
    }
}
