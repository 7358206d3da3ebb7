// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

mod processing_container;
mod results;
mod status;

pub use processing_container::{ProcessingContainer, ProcessingHook, QueueTimestamps};
pub use results::ResultSlots;
pub use status::ProcessingStatus;
