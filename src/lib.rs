// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

pub mod broker;     // buffer ports and the broker
pub mod config;     // config + runtime builder
pub mod consumers;  // workers and the thread pool
pub mod container;  // work items and their state machine
pub mod errors;     // error handling
pub mod network;    // TCP consumer and client
pub mod observability;
pub mod payloads;   // ready-made processables
pub mod traits;     // unified abstractions
