// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use crate::container::ProcessingContainer;
use crate::errors::ProcessingResult;
use crate::traits::Processable;

/// Per-consumer behaviour plugged into a [`crate::consumers::Worker`].
///
/// The worker owns the run loop; a kind decides what happens to each item
/// and how a worker prepares and cleans up. Every thread gets its own copy
/// through [`WorkerKind::clone_kind`].
pub trait WorkerKind<P: Processable>: Send {
    /// Called once, with the first item the worker retrieves.
    fn process_init(&mut self, _worker_id: usize, _first: &ProcessingContainer<P>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Processes one item. The default runs the item's own processing step.
    fn process(&mut self, item: &mut ProcessingContainer<P>) -> ProcessingResult<()> {
        item.process()
    }

    /// Called once after the run loop ends.
    fn process_finalize(&mut self, _worker_id: usize) -> anyhow::Result<()> {
        Ok(())
    }

    fn clone_kind(&self) -> Box<dyn WorkerKind<P>>;
}

/// Runs each item's own processing step and nothing else.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalProcessing;

impl<P: Processable> WorkerKind<P> for LocalProcessing {
    fn clone_kind(&self) -> Box<dyn WorkerKind<P>> {
        Box::new(*self)
    }
}
