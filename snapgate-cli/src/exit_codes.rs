//! Exit codes following sysexits.h conventions.
//!
//! CI jobs branch on these: 65 means the screenshot changed and waits for a
//! reviewer, everything above it is an operational failure.

use snapgate_core::SnapgateError;

/// Successful execution.
pub const SUCCESS: i32 = 0;

/// General error (catch-all).
pub const GENERAL_ERROR: i32 = 1;

/// Command line usage error (invalid arguments or configuration).
/// Maps to EX_USAGE from sysexits.h.
pub const USAGE_ERROR: i32 = 64;

/// The screenshot differs from its baseline and needs approval.
/// Maps to EX_DATAERR from sysexits.h.
pub const NEEDS_APPROVAL: i32 = 65;

/// Cannot open input file or the requested key does not exist.
/// Maps to EX_NOINPUT from sysexits.h.
pub const INPUT_ERROR: i32 = 66;

/// Blob store read or write failed.
/// Maps to EX_IOERR from sysexits.h.
pub const IO_ERROR: i32 = 74;

/// Represents an exit code with optional error context.
pub struct ExitCode {
    pub code: i32,
    pub message: Option<String>,
}

impl ExitCode {
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        let message = format!("{err:#}");

        let core = err
            .chain()
            .find_map(|e| e.downcast_ref::<SnapgateError>());
        let code = match core {
            Some(e) if e.is_not_found() => INPUT_ERROR,
            Some(SnapgateError::Config(_)) => USAGE_ERROR,
            Some(
                SnapgateError::Storage(_)
                | SnapgateError::Io(_)
                | SnapgateError::Context { .. }
                | SnapgateError::ChangeNotRecorded { .. }
                | SnapgateError::Sync { .. },
            ) => IO_ERROR,
            _ if message.contains("Failed to read") => INPUT_ERROR,
            _ => GENERAL_ERROR,
        };

        Self {
            code,
            message: Some(message),
        }
    }
}
