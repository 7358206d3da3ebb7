// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use crate::broker::Broker;
use crate::config::consts::{
    default_concurrency, DEFAULT_BROKER_RETRIEVE_RETRIES, DEFAULT_BROKER_TIMEOUT, DEFAULT_HOST,
    DEFAULT_IDLE, DEFAULT_MAX_PAYLOAD_SIZE, DEFAULT_PORT,
};
use crate::container::ProcessingContainer;
use crate::errors::ConsumerError;
use crate::network::session::{self, SessionContext};
use crate::network::{ClientOptions, SerialTcpClient, SerializationMode};
use crate::observability::messages::network::{
    ListenerStarted, ListenerStopped, SessionFailed, SessionOpened,
};
use crate::observability::messages::StructuredLog;
use crate::traits::{Consumer, Processable, ProcessingUnits};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

const NAME: &str = "SerialTcpConsumer";
const MNEMONIC: &str = "stcpc";
const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerOptions {
    pub host: String,
    /// Port to listen on; 0 picks a free one.
    pub port: u16,
    pub listener_threads: usize,
    pub mode: SerializationMode,
    /// Pause a client is asked to take when there is no work.
    pub idle: Duration,
    /// How long one broker retrieval may wait.
    pub broker_timeout: Duration,
    /// Extra retrievals before answering idle.
    pub broker_retrieve_retries: u32,
    /// Largest result body accepted from a client.
    pub max_payload_size: usize,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            listener_threads: default_concurrency(),
            mode: SerializationMode::default(),
            idle: DEFAULT_IDLE,
            broker_timeout: DEFAULT_BROKER_TIMEOUT,
            broker_retrieve_retries: DEFAULT_BROKER_RETRIEVE_RETRIES,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
        }
    }
}

/// Consumer that hands work to remote [`SerialTcpClient`]s.
///
/// Connections are accepted by a tokio runtime living on its own OS thread.
/// Every connection carries exactly one command and its answer.
pub struct SerialTcpConsumer<P: Processable> {
    options: ServerOptions,
    cancel: CancellationToken,
    started: AtomicBool,
    local_addr: Mutex<Option<SocketAddr>>,
    listener: Mutex<Option<JoinHandle<()>>>,
    _items: PhantomData<fn() -> P>,
}

impl<P> SerialTcpConsumer<P>
where
    P: Processable,
    ProcessingContainer<P>: Serialize + DeserializeOwned,
{
    pub fn new(options: ServerOptions) -> Self {
        Self {
            options,
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
            local_addr: Mutex::new(None),
            listener: Mutex::new(None),
            _items: PhantomData,
        }
    }

    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    /// Address actually bound, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// A client pointed at this consumer. Uses the bound address when the
    /// listener is running, the configured one otherwise.
    pub fn client(&self, options: ClientOptions) -> SerialTcpClient<P> {
        let (host, port) = match self.local_addr() {
            Some(address) => (address.ip().to_string(), address.port()),
            None => (self.options.host.clone(), self.options.port),
        };
        SerialTcpClient::new(ClientOptions {
            host,
            port,
            ..options
        })
    }

    fn bind(&self) -> Result<std::net::TcpListener, ConsumerError> {
        let address = format!("{}:{}", self.options.host, self.options.port);
        let bind_error = |source| ConsumerError::Bind {
            address: address.clone(),
            source,
        };

        let listener = std::net::TcpListener::bind(address.as_str()).map_err(bind_error)?;
        listener.set_nonblocking(true).map_err(bind_error)?;
        let local = listener.local_addr().map_err(bind_error)?;
        *self.local_addr.lock() = Some(local);
        Ok(listener)
    }
}

impl<P> Consumer<P> for SerialTcpConsumer<P>
where
    P: Processable,
    ProcessingContainer<P>: Serialize + DeserializeOwned,
{
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

        let listener = self.bind()?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.options.listener_threads.max(1))
            .thread_name("courtier-net")
            .enable_all()
            .build()
            .map_err(ConsumerError::Runtime)?;

        let context = Arc::new(SessionContext {
            broker,
            mode: self.options.mode,
            idle: self.options.idle,
            broker_timeout: self.options.broker_timeout,
            broker_retrieve_retries: self.options.broker_retrieve_retries,
            max_payload_size: self.options.max_payload_size,
            cancel: self.cancel.clone(),
        });
        let threads = self.options.listener_threads.max(1);

        let thread_name = "courtier-listener".to_string();
        let handle = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                runtime.block_on(serve(listener, context, threads));
                runtime.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);
            })
            .map_err(|source| ConsumerError::Spawn {
                thread: thread_name,
                source,
            })?;

        *self.listener.lock() = Some(handle);
        Ok(())
    }

    fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self.listener.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("Listener thread of {} panicked", NAME);
            }
        }
    }

    fn stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Work handed to a client that never reports back is lost.
    fn capable_of_full_return(&self) -> bool {
        false
    }

    fn processing_units_estimate(&self) -> ProcessingUnits {
        ProcessingUnits {
            count: self.options.listener_threads,
            exact: false,
        }
    }

    fn needs_client(&self) -> bool {
        true
    }
}

async fn serve<P>(
    listener: std::net::TcpListener,
    context: Arc<SessionContext<P>>,
    threads: usize,
) where
    P: Processable,
    ProcessingContainer<P>: Serialize + DeserializeOwned,
{
    let listener = match TcpListener::from_std(listener) {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, "Failed to register the listener with the runtime");
            return;
        }
    };
    let address = match listener.local_addr() {
        Ok(address) => address,
        Err(e) => {
            tracing::error!(error = %e, "Listener has no local address");
            return;
        }
    };

    ListenerStarted {
        address,
        threads,
        mode: context.mode.as_str(),
    }
    .log();

    loop {
        tokio::select! {
            _ = context.cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let context = Arc::clone(&context);
                    let opened = SessionOpened { peer };
                    let span = opened.span("session");
                    tokio::spawn(
                        async move {
                            opened.log();
                            if let Err(e) = session::handle(stream, peer, context).await {
                                SessionFailed { peer, error: &e }.log();
                            }
                        }
                        .instrument(span),
                    );
                }
                Err(e) => tracing::warn!(error = %e, "Failed to accept a connection"),
            },
        }
    }

    tracing::info!("{}", ListenerStopped { address });
}
