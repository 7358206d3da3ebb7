// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

pub mod consumer;
pub mod processable;
pub mod worker_kind;

pub use consumer::{Consumer, ProcessingUnits};
pub use processable::Processable;
pub use worker_kind::{LocalProcessing, WorkerKind};
