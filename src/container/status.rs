// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use serde::{Deserialize, Serialize};
use std::fmt;

/// Processing status of a work item.
///
/// Items start out as `DoIgnore`. Producers flip them to `DoProcess`; a
/// successful processing cycle is the only way to reach `Processed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingStatus {
    #[default]
    DoIgnore,
    DoProcess,
    Processed,
    ExceptionCaught,
    ErrorFlagged,
}

impl ProcessingStatus {
    pub const ALL: [ProcessingStatus; 5] = [
        ProcessingStatus::DoIgnore,
        ProcessingStatus::DoProcess,
        ProcessingStatus::Processed,
        ProcessingStatus::ExceptionCaught,
        ProcessingStatus::ErrorFlagged,
    ];

    /// Whether external code may move an item from `self` to `target`.
    ///
    /// Identity moves are handled by the caller and are not listed here.
    pub fn can_transition_to(self, target: ProcessingStatus) -> bool {
        use ProcessingStatus::*;

        matches!(
            (self, target),
            (DoIgnore, DoProcess)
                | (DoProcess, DoIgnore)
                | (Processed | ExceptionCaught | ErrorFlagged, DoIgnore | DoProcess)
        )
    }

    pub fn has_errors(self) -> bool {
        matches!(
            self,
            ProcessingStatus::ExceptionCaught | ProcessingStatus::ErrorFlagged
        )
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProcessingStatus::DoIgnore => "DO_IGNORE",
            ProcessingStatus::DoProcess => "DO_PROCESS",
            ProcessingStatus::Processed => "PROCESSED",
            ProcessingStatus::ExceptionCaught => "EXCEPTION_CAUGHT",
            ProcessingStatus::ErrorFlagged => "ERROR_FLAGGED",
        };
        f.write_str(name)
    }
}
