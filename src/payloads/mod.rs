// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Ready-made processable payloads.
//!
//! [`Multiply`] is small enough to ship across the wire in any mode and is
//! what the `courtier` binary farms out in its demo. The `stub` module holds
//! misbehaving payloads used by tests.

mod multiply;
#[cfg(test)]
pub(crate) mod stub;

pub use multiply::Multiply;
