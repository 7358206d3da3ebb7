// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use crate::errors::{ProcessingError, ProcessingResult};

/// Write access to an item's result slots during one processing step.
///
/// Handed to [`crate::traits::Processable::process`] and to external
/// processing functions. The number of slots is fixed when the item is built.
pub struct ResultSlots<'a, R> {
    slots: &'a mut [R],
    flagged: &'a mut Option<String>,
}

impl<'a, R> ResultSlots<'a, R> {
    pub(crate) fn new(slots: &'a mut [R], flagged: &'a mut Option<String>) -> Self {
        Self { slots, flagged }
    }

    /// Stores `value` in slot `id`.
    pub fn register(&mut self, id: usize, value: R) -> ProcessingResult<()> {
        let len = self.slots.len();
        let slot = self
            .slots
            .get_mut(id)
            .ok_or(ProcessingError::ResultIndexOutOfRange { index: id, len })?;
        *slot = value;
        Ok(())
    }

    pub fn get(&self, id: usize) -> Option<&R> {
        self.slots.get(id)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Marks the running evaluation as failed without raising an error.
    ///
    /// The item ends up `ERROR_FLAGGED` once the processing step returns.
    /// Repeated flags are joined.
    pub fn flag_error(&mut self, description: impl Into<String>) -> ProcessingResult<()> {
        let description = description.into();
        if description.trim().is_empty() {
            return Err(ProcessingError::EmptyErrorDescription);
        }
        match self.flagged {
            Some(existing) => {
                existing.push('\n');
                existing.push_str(&description);
            }
            None => *self.flagged = Some(description),
        }
        Ok(())
    }
}
