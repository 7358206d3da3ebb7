// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use crate::container::{ProcessingContainer, ResultSlots};
use crate::traits::Processable;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Doubles `value` unless it is negative, in which case processing fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PickyDoubler {
    pub value: f64,
}

impl PickyDoubler {
    pub fn item(value: f64) -> ProcessingContainer<Self> {
        ProcessingContainer::due(Self { value }, 1)
    }
}

impl Processable for PickyDoubler {
    type Output = f64;

    fn process(&mut self, results: &mut ResultSlots<'_, f64>) -> anyhow::Result<()> {
        if self.value < 0.0 {
            anyhow::bail!("refusing negative input {}", self.value);
        }
        results.register(0, self.value * 2.0)?;
        Ok(())
    }
}

/// Sleeps before echoing its value, to keep workers busy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sleeper {
    pub value: u64,
    pub millis: u64,
}

impl Sleeper {
    pub fn item(value: u64, millis: u64) -> ProcessingContainer<Self> {
        ProcessingContainer::due(Self { value, millis }, 1)
    }
}

impl Processable for Sleeper {
    type Output = u64;

    fn process(&mut self, results: &mut ResultSlots<'_, u64>) -> anyhow::Result<()> {
        std::thread::sleep(Duration::from_millis(self.millis));
        results.register(0, self.value)?;
        Ok(())
    }
}
