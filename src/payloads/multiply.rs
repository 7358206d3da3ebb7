// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use crate::container::{ProcessingContainer, ResultSlots};
use crate::traits::Processable;
use serde::{Deserialize, Serialize};

/// Multiplies `value` by `factor` and stores the product in result slot 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Multiply {
    pub value: f64,
    pub factor: f64,
}

impl Multiply {
    pub fn new(value: f64, factor: f64) -> Self {
        Self { value, factor }
    }

    pub fn doubling(value: f64) -> Self {
        Self::new(value, 2.0)
    }

    /// Wraps the payload in a single-slot item that is due for processing.
    pub fn into_item(self) -> ProcessingContainer<Self> {
        ProcessingContainer::due(self, 1)
    }
}

impl Processable for Multiply {
    type Output = f64;

    fn process(&mut self, results: &mut ResultSlots<'_, f64>) -> anyhow::Result<()> {
        results.register(0, self.value * self.factor)?;
        Ok(())
    }
}
