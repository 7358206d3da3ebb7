// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Remote processing over TCP.
//!
//! [`SerialTcpConsumer`] is a broker consumer that serves work to
//! [`SerialTcpClient`]s, which process it and send results back. The wire
//! format lives in [`protocol`], payload encodings in [`SerializationMode`].

mod client;
pub mod protocol;
mod serialization;
mod server;
mod session;


pub use client::{ClientOptions, ClientReport, HaltReason, Retrieval, SerialTcpClient};
pub use serialization::{deserialize, serialize, SerializationMode};
pub use server::{SerialTcpConsumer, ServerOptions};
