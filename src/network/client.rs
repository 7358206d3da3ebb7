// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Blocking TCP client that fetches work from a [`SerialTcpConsumer`],
//! processes it locally and sends the result back.
//!
//! Each transfer uses its own connection: connect, one request and its
//! answer, disconnect. Connection failures and protocol violations end the
//! client in an orderly way, since they usually mean the server has gone.
//!
//! [`SerialTcpConsumer`]: crate::network::SerialTcpConsumer

use crate::config::consts::{
    COMMAND_LENGTH, DEFAULT_HOST, DEFAULT_MAX_CONNECTION_ATTEMPTS, DEFAULT_MAX_PAYLOAD_SIZE,
    DEFAULT_MAX_STALLS, DEFAULT_PORT, INITIAL_CONNECT_BACKOFF,
};
use crate::consumers::StopFlag;
use crate::container::ProcessingContainer;
use crate::errors::{ClientError, ProtocolError};
use crate::network::protocol::{decode_field, parse_mode, parse_size, result_message, Command};
use crate::network::{deserialize, serialize, SerializationMode};
use crate::observability::messages::network::{
    ClientFinished, ConnectionAttemptFailed, ConnectionGivenUp, StallLimitReached, UnknownCommand,
};
use crate::observability::messages::StructuredLog;
use crate::traits::{LocalProcessing, Processable, WorkerKind};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::{Display, Formatter};
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    pub host: String,
    pub port: u16,
    /// Idle answers tolerated in a row; the client gives up on the next
    /// one. 0 for no limit.
    pub max_stalls: u32,
    /// Connection attempts per transfer; 0 retries forever.
    pub max_connection_attempts: u32,
    /// Items to process before stopping; 0 for no limit.
    pub process_max: usize,
    /// Wall-clock limit of [`SerialTcpClient::run`]; zero for no limit.
    pub max_duration: Duration,
    /// Largest work item accepted from the server.
    pub max_payload_size: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            max_stalls: DEFAULT_MAX_STALLS,
            max_connection_attempts: DEFAULT_MAX_CONNECTION_ATTEMPTS,
            process_max: 0,
            max_duration: Duration::ZERO,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
        }
    }
}

/// Outcome of one [`SerialTcpClient::retrieve`] call.
#[derive(Debug)]
pub enum Retrieval<P: Processable> {
    Work {
        item: ProcessingContainer<P>,
        mode: SerializationMode,
    },
    /// The server had nothing; the requested pause has already been taken.
    Idle,
    /// The client should stop.
    Terminate,
}

/// Why [`SerialTcpClient::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltReason {
    Terminated,
    CloseRequested,
    ProcessMax,
    MaxDuration,
    Custom,
}

impl Display for HaltReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            HaltReason::Terminated => "terminated",
            HaltReason::CloseRequested => "close requested",
            HaltReason::ProcessMax => "processing limit reached",
            HaltReason::MaxDuration => "time limit reached",
            HaltReason::Custom => "halt condition met",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientReport {
    pub reason: HaltReason,
    pub processed: usize,
    pub elapsed: Duration,
}

type HaltCheck = Box<dyn Fn() -> bool + Send>;

pub struct SerialTcpClient<P: Processable> {
    options: ClientOptions,
    kind: Box<dyn WorkerKind<P>>,
    close: StopFlag,
    custom_halt: Option<HaltCheck>,
    stalls: u32,
}

impl<P> SerialTcpClient<P>
where
    P: Processable,
    ProcessingContainer<P>: Serialize + DeserializeOwned,
{
    pub fn new(options: ClientOptions) -> Self {
        Self {
            options,
            kind: Box::new(LocalProcessing),
            close: StopFlag::new(),
            custom_halt: None,
            stalls: 0,
        }
    }

    /// Replaces the default of running each item's own processing step.
    pub fn with_kind(mut self, kind: Box<dyn WorkerKind<P>>) -> Self {
        self.kind = kind;
        self
    }

    /// Extra halt condition checked once per loop iteration of `run`.
    pub fn with_halt<F>(mut self, halt: F) -> Self
    where
        F: Fn() -> bool + Send + 'static,
    {
        self.custom_halt = Some(Box::new(halt));
        self
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Handle for asking a running client to stop from another thread.
    pub fn close_handle(&self) -> StopFlag {
        self.close.clone()
    }

    pub fn request_close(&self) {
        self.close.request();
    }

    /// Idle answers received in a row.
    pub fn stalls(&self) -> u32 {
        self.stalls
    }

    /// Asks the server for work.
    pub fn retrieve(&mut self) -> Result<Retrieval<P>, ClientError> {
        let mut stream = self.connect()?;
        stream.write_all(&Command::Ready.encode()?)?;

        let token = read_field(&mut stream)?;
        match Command::parse(&token) {
            Command::Compute => {
                let size = parse_size(&read_field(&mut stream)?)?;
                let mode = parse_mode(&read_field(&mut stream)?)?;
                let body = read_body(&mut stream, size, self.options.max_payload_size)?;
                let _ = stream.shutdown(Shutdown::Both);

                self.stalls = 0;
                let item = deserialize(&body, mode)?;
                Ok(Retrieval::Work { item, mode })
            }
            Command::Idle(millis) => {
                drop(stream);
                let previous = self.stalls;
                self.stalls += 1;
                if self.options.max_stalls != 0 && previous > self.options.max_stalls {
                    tracing::warn!(
                        "{}",
                        StallLimitReached {
                            stalls: self.stalls,
                            max_stalls: self.options.max_stalls,
                        }
                    );
                    return Ok(Retrieval::Terminate);
                }
                thread::sleep(Duration::from_millis(millis));
                Ok(Retrieval::Idle)
            }
            _ => {
                tracing::warn!("{}", UnknownCommand { command: &token });
                Ok(Retrieval::Terminate)
            }
        }
    }

    /// Sends a processed item back, encoded the way it arrived.
    pub fn submit(&self, item: &ProcessingContainer<P>, mode: SerializationMode) -> Result<(), ClientError> {
        let message = result_message(&serialize(item, mode)?)?;
        let mut stream = self.connect()?;
        stream.write_all(&message)?;
        let _ = stream.shutdown(Shutdown::Both);
        Ok(())
    }

    /// Retrieves, processes and submits items until a halt condition holds.
    ///
    /// Lost connections and protocol violations end the loop normally.
    /// Codec failures and processing contract violations are returned.
    pub fn run(&mut self) -> Result<ClientReport, ClientError> {
        let started = Instant::now();
        let mut processed = 0;
        let mut initialized = false;

        let reason = loop {
            if let Some(reason) = self.halt_reason(processed, started) {
                break reason;
            }

            let (mut item, mode) = match self.retrieve() {
                Ok(Retrieval::Work { item, mode }) => (item, mode),
                Ok(Retrieval::Idle) => continue,
                Ok(Retrieval::Terminate) => break HaltReason::Terminated,
                Err(ClientError::Io(e)) => {
                    tracing::info!(error = %e, "Lost connection to the server");
                    break HaltReason::Terminated;
                }
                Err(ClientError::Protocol(e)) => {
                    tracing::warn!(error = %e, "Protocol violation by the server");
                    break HaltReason::Terminated;
                }
                Err(e) => return Err(e),
            };

            if !initialized {
                self.kind
                    .process_init(0, &item)
                    .map_err(ClientError::Init)?;
                initialized = true;
            }

            if let Err(e) = self.kind.process(&mut item) {
                if !e.is_item_failure() {
                    return Err(e.into());
                }
                tracing::warn!(error = %e, "Returning failed item to the server");
            }

            match self.submit(&item, mode) {
                Ok(()) => processed += 1,
                Err(ClientError::Io(e)) => {
                    tracing::info!(error = %e, "Lost connection while submitting");
                    break HaltReason::Terminated;
                }
                Err(e) => return Err(e),
            }
        };

        if initialized {
            if let Err(e) = self.kind.process_finalize(0) {
                tracing::warn!(error = %e, "Client finalisation failed");
            }
        }

        let report = ClientReport {
            reason,
            processed,
            elapsed: started.elapsed(),
        };
        ClientFinished {
            reason: &report.reason.to_string(),
            processed: report.processed,
            elapsed: report.elapsed,
        }
        .log();
        Ok(report)
    }

    fn halt_reason(&self, processed: usize, started: Instant) -> Option<HaltReason> {
        if self.close.is_requested() {
            return Some(HaltReason::CloseRequested);
        }
        if self.options.process_max != 0 && processed >= self.options.process_max {
            return Some(HaltReason::ProcessMax);
        }
        if !self.options.max_duration.is_zero() && started.elapsed() >= self.options.max_duration {
            return Some(HaltReason::MaxDuration);
        }
        if self.custom_halt.as_ref().is_some_and(|halt| halt()) {
            return Some(HaltReason::Custom);
        }
        None
    }

    /// Connects with exponential backoff. With unlimited attempts the
    /// backoff stays at its initial value.
    fn connect(&self) -> Result<TcpStream, ClientError> {
        let address = format!("{}:{}", self.options.host, self.options.port);
        let max_attempts = self.options.max_connection_attempts;
        let mut backoff = INITIAL_CONNECT_BACKOFF;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match TcpStream::connect(address.as_str()) {
                Ok(stream) => return Ok(stream),
                Err(e) if max_attempts != 0 && attempt >= max_attempts => {
                    tracing::warn!(
                        "{}",
                        ConnectionGivenUp {
                            address: &address,
                            attempts: attempt,
                        }
                    );
                    return Err(e.into());
                }
                Err(e) => {
                    tracing::debug!(
                        "{}",
                        ConnectionAttemptFailed {
                            address: &address,
                            attempt,
                            backoff,
                            error: &e,
                        }
                    );
                    thread::sleep(backoff);
                    if max_attempts != 0 {
                        backoff *= 2;
                    }
                }
            }
        }
    }
}

fn read_field(stream: &mut TcpStream) -> Result<String, ClientError> {
    let mut field = [0u8; COMMAND_LENGTH];
    stream.read_exact(&mut field)?;
    Ok(decode_field(&field)?)
}

/// Reads a `size` byte body, growing the buffer only as bytes arrive.
fn read_body(stream: &mut TcpStream, size: usize, limit: usize) -> Result<Vec<u8>, ClientError> {
    if size > limit {
        return Err(ProtocolError::PayloadTooLarge { size, limit }.into());
    }
    let mut body = Vec::new();
    Read::by_ref(stream).take(size as u64).read_to_end(&mut body)?;
    if body.len() < size {
        return Err(ProtocolError::Truncated {
            expected: size,
            received: body.len(),
        }
        .into());
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payloads::Multiply;
    use std::net::TcpListener;

    fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    fn options(port: u16) -> ClientOptions {
        ClientOptions {
            port,
            max_connection_attempts: 2,
            ..ClientOptions::default()
        }
    }

    #[test]
    fn test_defaults() {
        let options = ClientOptions::default();
        assert_eq!(options.host, "127.0.0.1");
        assert_eq!(options.port, 10_000);
        assert_eq!(options.max_stalls, 10);
        assert_eq!(options.max_connection_attempts, 10);
        assert_eq!(options.process_max, 0);
        assert!(options.max_duration.is_zero());
        assert_eq!(options.max_payload_size, 64 * 1024 * 1024);
    }

    #[test]
    fn test_unreachable_server_terminates_run() {
        let mut client: SerialTcpClient<Multiply> = SerialTcpClient::new(options(closed_port()));

        let report = client.run().unwrap();

        assert_eq!(report.reason, HaltReason::Terminated);
        assert_eq!(report.processed, 0);
    }

    #[test]
    fn test_close_request_wins_before_connecting() {
        let mut client: SerialTcpClient<Multiply> = SerialTcpClient::new(options(closed_port()));
        client.close_handle().request();

        let report = client.run().unwrap();

        assert_eq!(report.reason, HaltReason::CloseRequested);
    }

    #[test]
    fn test_custom_halt() {
        let mut client: SerialTcpClient<Multiply> =
            SerialTcpClient::new(options(closed_port())).with_halt(|| true);

        assert_eq!(client.run().unwrap().reason, HaltReason::Custom);
    }

    #[test]
    fn test_backoff_doubles_between_attempts() {
        let mut client: SerialTcpClient<Multiply> = SerialTcpClient::new(ClientOptions {
            max_connection_attempts: 3,
            ..options(closed_port())
        });

        let started = Instant::now();
        assert!(matches!(client.retrieve(), Err(ClientError::Io(_))));
        // 10ms after the first failure, 20ms after the second.
        assert!(started.elapsed() >= Duration::from_millis(30));
    }
}
