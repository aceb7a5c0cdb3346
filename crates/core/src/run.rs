//! Register encodings for the pipeline run state machine.
//!
//! A run owns three contiguous registers starting at its base address:
//!
//! | Offset | Meaning    | Encoding          |
//! |--------|------------|-------------------|
//! | `+0`   | status     | [`RunStatus`]     |
//! | `+1`   | error code | [`RunErrorCode`]  |
//! | `+2`   | result     | raw `u16`         |
//!
//! A failed step leaves `status` at the step that failed and records the
//! reason in the error code, so a poller can tell "still sourcing" from
//! "sourcing failed" using only the first two registers.

use std::fmt;

/// Offset of the status register within a run block.
pub const STATUS_OFFSET: u16 = 0;
/// Offset of the error-code register within a run block.
pub const ERROR_OFFSET: u16 = 1;
/// Offset of the result register within a run block.
pub const RESULT_OFFSET: u16 = 2;
/// Number of registers in a run block.
pub const BLOCK_LEN: u16 = 3;

/// Progress of a run, stored at `base + 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum RunStatus {
    Idle = 0,
    Sourcing = 1,
    Uploading = 2,
    Grading = 3,
    ParsingResult = 4,
    Done = 5,
}

impl RunStatus {
    pub fn as_register(self) -> u16 {
        self as u16
    }

    pub fn from_register(value: u16) -> Option<Self> {
        match value {
            0 => Some(Self::Idle),
            1 => Some(Self::Sourcing),
            2 => Some(Self::Uploading),
            3 => Some(Self::Grading),
            4 => Some(Self::ParsingResult),
            5 => Some(Self::Done),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Sourcing => "sourcing",
            Self::Uploading => "uploading",
            Self::Grading => "grading",
            Self::ParsingResult => "parsing_result",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reason, stored at `base + 1`.
///
/// Code `3` is unused. Existing monitoring dashboards key on these exact
/// numbers, so the gap must stay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum RunErrorCode {
    None = 0,
    SourceError = 1,
    UploadError = 2,
    ScriptError = 4,
    ResultConversionError = 5,
}

impl RunErrorCode {
    pub fn as_register(self) -> u16 {
        self as u16
    }

    pub fn from_register(value: u16) -> Option<Self> {
        match value {
            0 => Some(Self::None),
            1 => Some(Self::SourceError),
            2 => Some(Self::UploadError),
            4 => Some(Self::ScriptError),
            5 => Some(Self::ResultConversionError),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::SourceError => "source_error",
            Self::UploadError => "upload_error",
            Self::ScriptError => "script_error",
            Self::ResultConversionError => "result_conversion_error",
        }
    }
}

impl fmt::Display for RunErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal state of a run, mirroring what its registers show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// `status = Done`, `result` holds the value.
    Done(u16),
    /// `status` stayed at the failing step, `error` records why.
    Failed {
        status: RunStatus,
        error: RunErrorCode,
    },
}

impl RunOutcome {
    /// The `(status, error, result)` triple the registers hold after this outcome.
    pub fn registers(self) -> [u16; 3] {
        match self {
            Self::Done(value) => [RunStatus::Done.as_register(), 0, value],
            Self::Failed { status, error } => [status.as_register(), error.as_register(), 0],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_register() {
        for value in 0..=5 {
            let status = RunStatus::from_register(value).expect("known status");
            assert_eq!(status.as_register(), value);
        }
        assert_eq!(RunStatus::from_register(6), None);
    }

    #[test]
    fn error_code_three_is_unused() {
        assert_eq!(RunErrorCode::from_register(3), None);
        assert_eq!(RunErrorCode::ScriptError.as_register(), 4);
        assert_eq!(RunErrorCode::ResultConversionError.as_register(), 5);
    }

    #[test]
    fn outcome_register_triples() {
        assert_eq!(RunOutcome::Done(42).registers(), [5, 0, 42]);
        let failed = RunOutcome::Failed {
            status: RunStatus::Uploading,
            error: RunErrorCode::UploadError,
        };
        assert_eq!(failed.registers(), [2, 2, 0]);
    }
}
