// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use crate::broker::{Broker, BrokerExecutor, BufferPort, ExecutorOptions};
use crate::config::Config;
use crate::consumers::StdThreadConsumer;
use crate::container::ProcessingContainer;
use crate::errors::{BrokerResult, ExecutorResult};
use crate::network::{ClientOptions, SerialTcpClient, SerialTcpConsumer};
use crate::traits::{Consumer, Processable};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

/// A broker with its consumers running, as described by a [`Config`].
pub struct Runtime<P: Processable> {
    broker: Arc<Broker<P>>,
    tcp_server: Option<Arc<SerialTcpConsumer<P>>>,
    client_options: ClientOptions,
    executor_options: ExecutorOptions,
    raw_queue_capacity: usize,
}

impl<P> Runtime<P>
where
    P: Processable,
    ProcessingContainer<P>: Serialize + DeserializeOwned,
{
    pub fn broker(&self) -> &Arc<Broker<P>> {
        &self.broker
    }

    pub fn tcp_server(&self) -> Option<&Arc<SerialTcpConsumer<P>>> {
        self.tcp_server.as_ref()
    }

    /// Creates a buffer port with the configured capacity and enrols it.
    pub fn buffer_port(&self) -> BrokerResult<Arc<BufferPort<P>>> {
        let port = BufferPort::shared(self.raw_queue_capacity);
        self.broker.enrol_buffer_port(Arc::clone(&port))?;
        Ok(port)
    }

    /// Client configured by the `tcp_client` section. Talks to this
    /// runtime's own server when one is running.
    pub fn client(&self) -> SerialTcpClient<P> {
        match &self.tcp_server {
            Some(server) => server.client(self.client_options.clone()),
            None => SerialTcpClient::new(self.client_options.clone()),
        }
    }

    /// Stops all consumers and releases the broker's ports.
    pub fn shutdown(&self) {
        self.broker.finalize();
    }
}

impl<P> Runtime<P>
where
    P: Processable + Clone,
    ProcessingContainer<P>: Serialize + DeserializeOwned,
{
    /// Executor configured by the `executor` section, with its own port.
    pub fn executor(&self) -> ExecutorResult<BrokerExecutor<P>> {
        BrokerExecutor::new(Arc::clone(&self.broker), self.executor_options.clone())
    }
}

/// Builds a [`Runtime`] from configuration.
///
/// # Examples
///
/// ```
/// use courtier::config::{Config, RuntimeBuilder};
/// use courtier::payloads::Multiply;
///
/// let runtime = RuntimeBuilder::from_config::<Multiply>(&Config::default()).unwrap();
/// assert_eq!(runtime.broker().n_consumers(), 1);
/// runtime.shutdown();
/// ```
pub struct RuntimeBuilder;

impl RuntimeBuilder {
    /// Creates the broker and enrols every consumer the configuration
    /// enables. The client is not started; see [`Runtime::client`].
    pub fn from_config<P>(cfg: &Config) -> BrokerResult<Runtime<P>>
    where
        P: Processable,
        ProcessingContainer<P>: Serialize + DeserializeOwned,
    {
        let broker = Arc::new(Broker::with_max_buffer_ports(cfg.broker.get_max_buffer_ports()));
        let mut consumers: Vec<Arc<dyn Consumer<P>>> = Vec::new();

        if cfg.uses_thread_pool() {
            let pool = cfg.thread_pool.clone().unwrap_or_default();
            consumers.push(Arc::new(
                StdThreadConsumer::new(pool.get_threads())
                    .with_poll_timeout(pool.get_poll_timeout())
                    .with_full_return(pool.get_full_return()),
            ));
        }

        let tcp_server = cfg
            .tcp_server
            .as_ref()
            .map(|server| Arc::new(SerialTcpConsumer::new(server.to_options())));
        if let Some(server) = &tcp_server {
            consumers.push(server.clone());
        }

        if let Err(e) = broker.enrol_consumers(consumers) {
            broker.finalize();
            return Err(e);
        }

        Ok(Runtime {
            broker,
            tcp_server,
            client_options: cfg.tcp_client.to_options(),
            executor_options: cfg.executor.to_options(&cfg.broker),
            raw_queue_capacity: cfg.broker.get_raw_queue_capacity(),
        })
    }
}
