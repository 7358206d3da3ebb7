// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use crate::errors::{ProtocolError, SerializationError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// How work items are encoded on the wire.
///
/// Configuration files and logs use the names `text`, `xml` and `binary`.
/// The mode header of a transfer carries the numeric code instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SerializationMode {
    Text,
    Xml,
    #[default]
    Binary,
}

impl SerializationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SerializationMode::Text => "text",
            SerializationMode::Xml => "xml",
            SerializationMode::Binary => "binary",
        }
    }

    /// Code written into the mode header.
    pub fn wire_code(&self) -> u8 {
        match self {
            SerializationMode::Text => 0,
            SerializationMode::Xml => 1,
            SerializationMode::Binary => 2,
        }
    }
}

impl Display for SerializationMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SerializationMode {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "0" | "text" => Ok(SerializationMode::Text),
            "1" | "xml" => Ok(SerializationMode::Xml),
            "2" | "binary" => Ok(SerializationMode::Binary),
            _ => Err(ProtocolError::InvalidMode(s.to_string())),
        }
    }
}

pub fn serialize<T: Serialize>(value: &T, mode: SerializationMode) -> Result<Vec<u8>, SerializationError> {
    match mode {
        SerializationMode::Text => Ok(serde_json::to_vec(value)?),
        SerializationMode::Binary => Ok(bincode::serialize(value)?),
        SerializationMode::Xml => Err(SerializationError::UnsupportedMode(mode)),
    }
}

pub fn deserialize<T: DeserializeOwned>(bytes: &[u8], mode: SerializationMode) -> Result<T, SerializationError> {
    match mode {
        SerializationMode::Text => Ok(serde_json::from_slice(bytes)?),
        SerializationMode::Binary => Ok(bincode::deserialize(bytes)?),
        SerializationMode::Xml => Err(SerializationError::UnsupportedMode(mode)),
    }
}
