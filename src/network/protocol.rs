// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Wire framing shared by the TCP client and server.
//!
//! Every control token (command, size, serialization mode) travels in a
//! fixed-width ASCII field of [`COMMAND_LENGTH`] bytes, padded with spaces
//! and trimmed on read. A payload follows its size header directly; there
//! is no terminator.
//!
//! ```text
//! client -> server   ready
//! server -> client   compute <size> <mode> <payload>   |   idle(<ms>)
//! client -> server   result <size> <payload>
//! ```

use crate::config::consts::COMMAND_LENGTH;
use crate::errors::ProtocolError;
use crate::network::SerializationMode;
use std::fmt::{Display, Formatter};
use winnow::ascii::{digit1, multispace0};
use winnow::combinator::delimited;
use winnow::token::literal;
use winnow::{PResult, Parser};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ready,
    Result,
    Compute,
    /// No work right now; retry after this many milliseconds.
    Idle(u64),
    Unknown(String),
}

impl Command {
    pub fn parse(token: &str) -> Self {
        match token {
            "ready" => Command::Ready,
            "result" => Command::Result,
            "compute" => Command::Compute,
            other => match parse_idle(other) {
                Some(millis) => Command::Idle(millis),
                None => Command::Unknown(other.to_string()),
            },
        }
    }

    /// The command as a single fixed-width field.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        encode_field(&self.to_string())
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Ready => f.write_str("ready"),
            Command::Result => f.write_str("result"),
            Command::Compute => f.write_str("compute"),
            Command::Idle(millis) => write!(f, "idle({millis})"),
            Command::Unknown(_) => f.write_str("unknown"),
        }
    }
}

fn idle_command(input: &mut &str) -> PResult<u64> {
    delimited(
        (multispace0, literal("idle"), multispace0, '(', multispace0),
        digit1.try_map(|digits: &str| digits.parse::<u64>()),
        (multispace0, ')', multispace0),
    )
    .parse_next(input)
}

/// Milliseconds requested by an `idle(<ms>)` command.
pub fn parse_idle(command: &str) -> Option<u64> {
    idle_command.parse(command).ok()
}

pub fn encode_field(value: &str) -> Result<Vec<u8>, ProtocolError> {
    if !value.is_ascii() {
        return Err(ProtocolError::NotAscii);
    }
    if value.len() > COMMAND_LENGTH {
        return Err(ProtocolError::FieldTooLong {
            value: value.to_string(),
            width: COMMAND_LENGTH,
        });
    }
    let mut field = Vec::with_capacity(COMMAND_LENGTH);
    field.extend_from_slice(value.as_bytes());
    field.resize(COMMAND_LENGTH, b' ');
    Ok(field)
}

pub fn decode_field(field: &[u8]) -> Result<String, ProtocolError> {
    if !field.is_ascii() {
        return Err(ProtocolError::NotAscii);
    }
    let text = String::from_utf8_lossy(field);
    Ok(text
        .trim_matches(|c: char| c.is_ascii_whitespace() || c == '\0')
        .to_string())
}

pub fn parse_size(field: &str) -> Result<usize, ProtocolError> {
    field
        .parse()
        .map_err(|_| ProtocolError::InvalidSize(field.to_string()))
}

pub fn parse_mode(field: &str) -> Result<SerializationMode, ProtocolError> {
    field.parse()
}

/// `compute` announcement plus payload, ready for a single write.
pub fn compute_message(mode: SerializationMode, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let mut message = Command::Compute.encode()?;
    message.extend(encode_field(&payload.len().to_string())?);
    message.extend(encode_field(&mode.wire_code().to_string())?);
    message.extend_from_slice(payload);
    Ok(message)
}

/// `result` announcement plus payload, ready for a single write.
pub fn result_message(payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let mut message = Command::Result.encode()?;
    message.extend(encode_field(&payload.len().to_string())?);
    message.extend_from_slice(payload);
    Ok(message)
}
