// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use crate::container::ResultSlots;

/// User payload carried by a [`crate::container::ProcessingContainer`].
///
/// Implementors do the actual work and write their outcome into the result
/// slots. Returning an error (or panicking) marks the evaluation as failed;
/// [`ResultSlots::flag_error`] marks it failed without unwinding.
///
/// # Example
/// ```
/// use courtier::container::ResultSlots;
/// use courtier::traits::Processable;
///
/// struct Square(f64);
///
/// impl Processable for Square {
///     type Output = f64;
///
///     fn process(&mut self, results: &mut ResultSlots<'_, f64>) -> anyhow::Result<()> {
///         results.register(0, self.0 * self.0)?;
///         Ok(())
///     }
/// }
/// ```
pub trait Processable: Send + 'static {
    /// Type of a single result slot.
    type Output: Clone + Default + Send + 'static;

    fn process(&mut self, results: &mut ResultSlots<'_, Self::Output>) -> anyhow::Result<()>;
}
