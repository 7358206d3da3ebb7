// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use crate::broker::Broker;
use crate::config::consts::{default_concurrency, DEFAULT_WORKER_POLL_TIMEOUT};
use crate::consumers::{BrokerFerry, StopFlag, Worker};
use crate::errors::{ConsumerError, WorkerError};
use crate::observability::messages::worker::{
    ThreadCountDefaulted, WorkerTerminated, WorkersStarting,
};
use crate::observability::messages::StructuredLog;
use crate::traits::{Consumer, Processable, ProcessingUnits};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const NAME: &str = "StdThreadConsumer";
const MNEMONIC: &str = "stc";

type WorkerHandle = JoinHandle<Result<usize, WorkerError>>;

/// Consumer running a fixed number of [`Worker`]s on plain OS threads.
///
/// Every thread gets its own copy of the template worker and a
/// [`BrokerFerry`] bound to the broker passed to
/// [`Consumer::async_start_processing`].
pub struct StdThreadConsumer<P: Processable> {
    n_threads: usize,
    capable_of_full_return: bool,
    poll_timeout: Duration,
    template: Mutex<Worker<P>>,
    stop: StopFlag,
    started: AtomicBool,
    threads: Mutex<Vec<(String, WorkerHandle)>>,
}

impl<P: Processable> StdThreadConsumer<P> {
    /// A pool of `n_threads` workers. Zero selects the machine's available
    /// parallelism.
    pub fn new(n_threads: usize) -> Self {
        let n_threads = if n_threads == 0 {
            let used = default_concurrency();
            tracing::warn!("{}", ThreadCountDefaulted { used });
            used
        } else {
            n_threads
        };

        Self {
            n_threads,
            capable_of_full_return: true,
            poll_timeout: DEFAULT_WORKER_POLL_TIMEOUT,
            template: Mutex::new(Worker::local()),
            stop: StopFlag::new(),
            started: AtomicBool::new(false),
            threads: Mutex::new(Vec::new()),
        }
    }

    /// Replaces the template every thread's worker is cloned from.
    pub fn with_worker(self, worker: Worker<P>) -> Self {
        *self.template.lock() = worker;
        self
    }

    pub fn with_full_return(mut self, capable: bool) -> Self {
        self.capable_of_full_return = capable;
        self
    }

    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    pub fn n_threads(&self) -> usize {
        self.n_threads
    }

    /// Number of worker threads currently owned by the pool.
    pub fn running_threads(&self) -> usize {
        self.threads.lock().len()
    }

    fn spawn_worker(&self, worker_id: usize, broker: &Arc<Broker<P>>) -> Result<(String, WorkerHandle), ConsumerError> {
        let mut worker = self.template.lock().clone_worker().with_poll_timeout(self.poll_timeout);
        worker.register_broker_ferry(BrokerFerry::for_broker(
            worker_id,
            Arc::clone(broker),
            self.stop.clone(),
        ));

        let thread_name = format!("courtier-worker-{worker_id}");
        let handle = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || worker.run())
            .map_err(|source| ConsumerError::Spawn {
                thread: thread_name.clone(),
                source,
            })?;
        Ok((thread_name, handle))
    }

    fn join_all(&self) {
        let threads: Vec<_> = self.threads.lock().drain(..).collect();
        for (name, handle) in threads {
            match handle.join() {
                Ok(Ok(_)) => {}
                Ok(Err(error)) => WorkerTerminated {
                    thread: &name,
                    error: &error,
                }
                .log(),
                Err(_) => tracing::error!(thread = %name, "Worker thread {} panicked", name),
            }
        }
    }
}

impl<P: Processable> Consumer<P> for StdThreadConsumer<P> {
    fn name(&self) -> &str {
        NAME
    }

    fn mnemonic(&self) -> &str {
        MNEMONIC
    }

    fn async_start_processing(&self, broker: Arc<Broker<P>>) -> Result<(), ConsumerError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ConsumerError::AlreadyStarted {
                name: NAME.to_string(),
            });
        }

        tracing::info!(
            "{}",
            WorkersStarting {
                consumer: NAME,
                threads: self.n_threads,
            }
        );

        for worker_id in 0..self.n_threads {
            match self.spawn_worker(worker_id, &broker) {
                Ok(entry) => self.threads.lock().push(entry),
                Err(e) => {
                    self.stop.request();
                    self.join_all();
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn shutdown(&self) {
        self.stop.request();
        self.join_all();
    }

    fn stopped(&self) -> bool {
        self.stop.is_requested()
    }

    fn capable_of_full_return(&self) -> bool {
        self.capable_of_full_return
    }

    fn processing_units_estimate(&self) -> ProcessingUnits {
        ProcessingUnits {
            count: self.n_threads,
            exact: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payloads::Multiply;

    #[test]
    fn test_zero_threads_uses_default_concurrency() {
        let consumer: StdThreadConsumer<Multiply> = StdThreadConsumer::new(0);
        assert_eq!(consumer.n_threads(), default_concurrency());
        assert!(consumer.n_threads() > 0);
    }

    #[test]
    fn test_metadata() {
        let consumer: StdThreadConsumer<Multiply> = StdThreadConsumer::new(3).with_full_return(false);
        assert_eq!(consumer.name(), "StdThreadConsumer");
        assert_eq!(consumer.mnemonic(), "stc");
        assert!(!consumer.capable_of_full_return());
        assert!(!consumer.needs_client());
        assert_eq!(
            consumer.processing_units_estimate(),
            ProcessingUnits { count: 3, exact: true }
        );
    }

    #[test]
    fn test_second_start_is_rejected() {
        let broker = Broker::<Multiply>::shared();
        let consumer = StdThreadConsumer::new(2).with_poll_timeout(Duration::from_millis(10));

        consumer.async_start_processing(Arc::clone(&broker)).unwrap();
        assert_eq!(consumer.running_threads(), 2);

        let err = consumer.async_start_processing(broker).unwrap_err();
        assert!(matches!(err, ConsumerError::AlreadyStarted { .. }));
        consumer.shutdown();
    }

    #[test]
    fn test_shutdown_joins_threads_and_is_idempotent() {
        let broker = Broker::<Multiply>::shared();
        let consumer = StdThreadConsumer::new(2).with_poll_timeout(Duration::from_millis(10));
        consumer.async_start_processing(broker).unwrap();

        consumer.shutdown();
        assert!(consumer.stopped());
        assert_eq!(consumer.running_threads(), 0);

        consumer.shutdown();
        assert_eq!(consumer.running_threads(), 0);
    }
}
