// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for the TCP consumer and its clients.
//!
//! This module contains message types for logging events related to:
//! * Listener startup and shutdown
//! * Server sessions that fail or see unexpected commands
//! * Client connection retries, stalls and termination

use crate::observability::messages::StructuredLog;
use std::fmt::{Display, Formatter};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::Span;

/// The TCP consumer is accepting connections.
///
/// # Log Level
/// `info!` - Important operational event
pub struct ListenerStarted<'a> {
    pub address: SocketAddr,
    pub threads: usize,
    pub mode: &'a str,
}

impl Display for ListenerStarted<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Listening for clients on {} with {} thread(s), serialization mode {}",
            self.address, self.threads, self.mode
        )
    }
}

impl StructuredLog for ListenerStarted<'_> {
    fn log(&self) {
        tracing::info!(
            address = %self.address,
            threads = self.threads,
            mode = self.mode,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!("listener", span_name = name, address = %self.address)
    }
}

/// The accept loop has ended.
///
/// # Log Level
/// `info!` - Lifecycle event
pub struct ListenerStopped {
    pub address: SocketAddr,
}

impl Display for ListenerStopped {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Stopped listening on {}", self.address)
    }
}

/// The listener accepted a connection.
///
/// # Log Level
/// `debug!` - One per transfer
pub struct SessionOpened {
    pub peer: SocketAddr,
}

impl Display for SessionOpened {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Accepted connection from {}", self.peer)
    }
}

impl StructuredLog for SessionOpened {
    fn log(&self) {
        tracing::debug!(peer = %self.peer, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!("session", span_name = name, peer = %self.peer)
    }
}

/// A server session was abandoned.
///
/// # Log Level
/// `warn!` - Affects one connection only
pub struct SessionFailed<'a> {
    pub peer: SocketAddr,
    pub error: &'a dyn std::error::Error,
}

impl Display for SessionFailed<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Session with {} abandoned: {}", self.peer, self.error)
    }
}

impl StructuredLog for SessionFailed<'_> {
    fn log(&self) {
        tracing::warn!(peer = %self.peer, error = %self.error, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::warn_span!("session", span_name = name, peer = %self.peer)
    }
}

/// A peer sent a command this side does not understand.
///
/// # Log Level
/// `warn!` - Protocol violation
pub struct UnknownCommand<'a> {
    pub command: &'a str,
}

impl Display for UnknownCommand<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Received unknown command '{}'", self.command)
    }
}

/// A work item left the broker but never reached a client.
///
/// # Log Level
/// `warn!` - Best-effort delivery
pub struct ItemLostInTransit<'a> {
    pub peer: SocketAddr,
    pub reason: &'a dyn std::error::Error,
}

impl Display for ItemLostInTransit<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Work item for {} lost in transit: {}",
            self.peer, self.reason
        )
    }
}

impl StructuredLog for ItemLostInTransit<'_> {
    fn log(&self) {
        tracing::warn!(peer = %self.peer, reason = %self.reason, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::warn_span!("transit", span_name = name, peer = %self.peer)
    }
}

/// One failed connection attempt by a client.
///
/// # Log Level
/// `debug!` - Retried with backoff
pub struct ConnectionAttemptFailed<'a> {
    pub address: &'a str,
    pub attempt: u32,
    pub backoff: Duration,
    pub error: &'a std::io::Error,
}

impl Display for ConnectionAttemptFailed<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Connection attempt {} to {} failed ({}), retrying in {:?}",
            self.attempt, self.address, self.error, self.backoff
        )
    }
}

/// A client gave up connecting.
///
/// # Log Level
/// `warn!` - The client terminates
pub struct ConnectionGivenUp<'a> {
    pub address: &'a str,
    pub attempts: u32,
}

impl Display for ConnectionGivenUp<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Giving up on {} after {} connection attempt(s)",
            self.address, self.attempts
        )
    }
}

/// A client received more idle commands in a row than it tolerates.
///
/// # Log Level
/// `warn!` - The client terminates
pub struct StallLimitReached {
    pub stalls: u32,
    pub max_stalls: u32,
}

impl Display for StallLimitReached {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Stalled {} time(s) in a row (limit {}), terminating",
            self.stalls, self.max_stalls
        )
    }
}

/// A client left its run loop.
///
/// # Log Level
/// `info!` - Lifecycle event
pub struct ClientFinished<'a> {
    pub reason: &'a str,
    pub processed: usize,
    pub elapsed: Duration,
}

impl Display for ClientFinished<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Client finished ({}) after processing {} item(s) in {:?}",
            self.reason, self.processed, self.elapsed
        )
    }
}

impl StructuredLog for ClientFinished<'_> {
    fn log(&self) {
        tracing::info!(
            reason = self.reason,
            processed = self.processed,
            elapsed_ms = self.elapsed.as_millis() as u64,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!("client", span_name = name, processed = self.processed)
    }
}
