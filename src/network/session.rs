// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! One server-side connection: read a command, answer it, hang up.
//!
//! Broker access and (de)serialization run on tokio's blocking pool so the
//! I/O threads only ever wait on sockets.

use crate::broker::Broker;
use crate::config::consts::{COMMAND_LENGTH, READ_BUFFER_SIZE};
use crate::consumers::return_to_broker;
use crate::container::ProcessingContainer;
use crate::errors::{ProtocolError, SessionError};
use crate::network::protocol::{compute_message, decode_field, parse_size, Command};
use crate::network::{deserialize, serialize, SerializationMode};
use crate::observability::messages::network::{ItemLostInTransit, UnknownCommand};
use crate::observability::messages::StructuredLog;
use crate::traits::Processable;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

/// Everything a session needs, shared by all sessions of one listener.
pub(crate) struct SessionContext<P: Processable> {
    pub broker: Arc<Broker<P>>,
    pub mode: SerializationMode,
    pub idle: Duration,
    pub broker_timeout: Duration,
    pub broker_retrieve_retries: u32,
    pub max_payload_size: usize,
    pub cancel: CancellationToken,
}

impl<P> SessionContext<P>
where
    P: Processable,
    ProcessingContainer<P>: Serialize + DeserializeOwned,
{
    /// Serialized next work item, or `None` when the broker had nothing.
    fn next_work(&self) -> Result<Option<Vec<u8>>, SessionError> {
        for _ in 0..=self.broker_retrieve_retries {
            if let Some(item) = self.broker.get_timeout(self.broker_timeout) {
                return Ok(Some(serialize(&item, self.mode)?));
            }
        }
        Ok(None)
    }

    fn return_item(&self, body: &[u8]) -> Result<(), SessionError> {
        let item: ProcessingContainer<P> = deserialize(body, self.mode)?;
        return_to_broker(&self.broker, item, self.broker_timeout, || {
            self.cancel.is_cancelled()
        })?;
        Ok(())
    }
}

pub(crate) async fn handle<P, S>(
    mut stream: S,
    peer: SocketAddr,
    context: Arc<SessionContext<P>>,
) -> Result<(), SessionError>
where
    P: Processable,
    ProcessingContainer<P>: Serialize + DeserializeOwned,
    S: AsyncRead + AsyncWrite + Unpin,
{
    let token = read_field(&mut stream).await?;
    match Command::parse(&token) {
        Command::Ready => answer_ready(stream, peer, context).await,
        Command::Result => receive_result(stream, context).await,
        _ => {
            tracing::warn!("{}", UnknownCommand { command: &token });
            let answer = Command::Unknown(token).encode()?;
            stream.write_all(&answer).await?;
            stream.shutdown().await?;
            Ok(())
        }
    }
}

async fn answer_ready<P, S>(
    mut stream: S,
    peer: SocketAddr,
    context: Arc<SessionContext<P>>,
) -> Result<(), SessionError>
where
    P: Processable,
    ProcessingContainer<P>: Serialize + DeserializeOwned,
    S: AsyncRead + AsyncWrite + Unpin,
{
    if context.cancel.is_cancelled() {
        return Ok(());
    }

    let idle = Command::Idle(context.idle.as_millis() as u64);
    let work = {
        let context = Arc::clone(&context);
        tokio::task::spawn_blocking(move || context.next_work()).await??
    };

    let Some(payload) = work else {
        stream.write_all(&idle.encode()?).await?;
        stream.shutdown().await?;
        return Ok(());
    };

    let message = compute_message(context.mode, &payload)?;
    if let Err(e) = stream.write_all(&message).await {
        ItemLostInTransit { peer, reason: &e }.log();
        return Ok(());
    }
    let _ = stream.shutdown().await;
    Ok(())
}

async fn receive_result<P, S>(mut stream: S, context: Arc<SessionContext<P>>) -> Result<(), SessionError>
where
    P: Processable,
    ProcessingContainer<P>: Serialize + DeserializeOwned,
    S: AsyncRead + AsyncWrite + Unpin,
{
    let size = parse_size(&read_field(&mut stream).await?)?;
    let body = read_body(&mut stream, size, context.max_payload_size).await?;
    let _ = stream.shutdown().await;

    tokio::task::spawn_blocking(move || context.return_item(&body)).await?
}

async fn read_field<S: AsyncRead + Unpin>(stream: &mut S) -> Result<String, SessionError> {
    let mut field = [0u8; COMMAND_LENGTH];
    stream.read_exact(&mut field).await?;
    Ok(decode_field(&field)?)
}

/// Reads exactly `size` bytes in chunks of at most [`READ_BUFFER_SIZE`].
///
/// The body only grows as bytes arrive; sizes above `limit` are refused
/// before anything is read.
async fn read_body<S: AsyncRead + Unpin>(
    stream: &mut S,
    size: usize,
    limit: usize,
) -> Result<Vec<u8>, SessionError> {
    if size > limit {
        return Err(ProtocolError::PayloadTooLarge { size, limit }.into());
    }
    let mut body = Vec::new();
    let mut chunk = vec![0u8; READ_BUFFER_SIZE.min(size.max(1))];
    while body.len() < size {
        let wanted = (size - body.len()).min(chunk.len());
        let received = stream.read(&mut chunk[..wanted]).await?;
        if received == 0 {
            return Err(ProtocolError::Truncated {
                expected: size,
                received: body.len(),
            }
            .into());
        }
        body.extend_from_slice(&chunk[..received]);
    }
    Ok(body)
}
