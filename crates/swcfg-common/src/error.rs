//! Result codes and error types shared by every datastore command.
//!
//! Every command answers with a [`ResultCode`] rendered as the `"ret"` field
//! of the JSON envelope. Failures travel as [`DatastoreError`], which comes
//! in two flavours:
//!
//! - [`DatastoreError::Code`]: a bare failure that has not been described
//!   for the client yet.
//! - [`DatastoreError::Interp`]: a failure that already carries its
//!   client-facing message. It is never re-described on the way up.

use std::fmt;

use serde::{Serialize, Serializer};
use thiserror::Error;

/// Result type alias for datastore operations.
pub type DatastoreResult<T> = Result<T, DatastoreError>;

/// Wire-level result code of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultCode {
    Ok,
    AnyFailures,
    InvalidArgs,
    NotFound,
    AlreadyExists,
    NotOperational,
    NoMemory,
    OutOfRange,
    OutputFailure,
    PosixApiError,
    InvalidObject,
    InvalidNamespace,
    InvalidStateTransition,
    TooLong,
    Busy,
}

impl ResultCode {
    /// Returns the code as written in the `"ret"` field.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultCode::Ok => "OK",
            ResultCode::AnyFailures => "ANY_FAILURES",
            ResultCode::InvalidArgs => "INVALID_ARGS",
            ResultCode::NotFound => "NOT_FOUND",
            ResultCode::AlreadyExists => "ALREADY_EXISTS",
            ResultCode::NotOperational => "NOT_OPERATIONAL",
            ResultCode::NoMemory => "NO_MEMORY",
            ResultCode::OutOfRange => "OUT_OF_RANGE",
            ResultCode::OutputFailure => "OUTPUT_FAILURE",
            ResultCode::PosixApiError => "POSIX_API_ERROR",
            ResultCode::InvalidObject => "INVALID_OBJECT",
            ResultCode::InvalidNamespace => "INVALID_NAMESPACE",
            ResultCode::InvalidStateTransition => "INVALID_STATE_TRANSITION",
            ResultCode::TooLong => "TOO_LONG",
            ResultCode::Busy => "BUSY",
        }
    }

    /// Parses a code from its wire form.
    pub fn parse(s: &str) -> Option<Self> {
        let code = match s {
            "OK" => ResultCode::Ok,
            "ANY_FAILURES" => ResultCode::AnyFailures,
            "INVALID_ARGS" => ResultCode::InvalidArgs,
            "NOT_FOUND" => ResultCode::NotFound,
            "ALREADY_EXISTS" => ResultCode::AlreadyExists,
            "NOT_OPERATIONAL" => ResultCode::NotOperational,
            "NO_MEMORY" => ResultCode::NoMemory,
            "OUT_OF_RANGE" => ResultCode::OutOfRange,
            "OUTPUT_FAILURE" => ResultCode::OutputFailure,
            "POSIX_API_ERROR" => ResultCode::PosixApiError,
            "INVALID_OBJECT" => ResultCode::InvalidObject,
            "INVALID_NAMESPACE" => ResultCode::InvalidNamespace,
            "INVALID_STATE_TRANSITION" => ResultCode::InvalidStateTransition,
            "TOO_LONG" => ResultCode::TooLong,
            "BUSY" => ResultCode::Busy,
            _ => return None,
        };
        Some(code)
    }

    /// Returns true for the success code.
    pub fn is_ok(&self) -> bool {
        matches!(self, ResultCode::Ok)
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ResultCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Error type for datastore command processing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DatastoreError {
    /// A failure without a client-facing message yet.
    #[error("{code}")]
    Code { code: ResultCode },

    /// A failure that already carries its client-facing message.
    #[error("{code}: {message}")]
    Interp { code: ResultCode, message: String },
}

impl DatastoreError {
    /// Creates a bare error for the given code.
    pub fn code(code: ResultCode) -> Self {
        DatastoreError::Code { code }
    }

    /// Creates an already-described error.
    pub fn interp(code: ResultCode, message: impl Into<String>) -> Self {
        DatastoreError::Interp {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_args() -> Self {
        Self::code(ResultCode::InvalidArgs)
    }

    pub fn not_found() -> Self {
        Self::code(ResultCode::NotFound)
    }

    pub fn already_exists() -> Self {
        Self::code(ResultCode::AlreadyExists)
    }

    pub fn not_operational() -> Self {
        Self::code(ResultCode::NotOperational)
    }

    pub fn invalid_object() -> Self {
        Self::code(ResultCode::InvalidObject)
    }

    pub fn invalid_state_transition() -> Self {
        Self::code(ResultCode::InvalidStateTransition)
    }

    /// `"Bad opt value = <value>."` with the given code.
    pub fn bad_opt_value(code: ResultCode, value: &str) -> Self {
        Self::interp(code, format!("Bad opt value = {}.", value))
    }

    /// Returns the wire result code.
    pub fn result_code(&self) -> ResultCode {
        match self {
            DatastoreError::Code { code } | DatastoreError::Interp { code, .. } => *code,
        }
    }

    /// Returns the client-facing message, if any.
    pub fn message(&self) -> Option<&str> {
        match self {
            DatastoreError::Code { .. } => None,
            DatastoreError::Interp { message, .. } => Some(message),
        }
    }

    /// Returns true if the error already carries its message.
    pub fn is_interp(&self) -> bool {
        matches!(self, DatastoreError::Interp { .. })
    }

    /// Attaches a client-facing message unless one is already present.
    pub fn describe(self, message: impl Into<String>) -> Self {
        match self {
            DatastoreError::Code { code } => Self::interp(code, message),
            described @ DatastoreError::Interp { .. } => described,
        }
    }
}

impl From<ResultCode> for DatastoreError {
    fn from(code: ResultCode) -> Self {
        DatastoreError::code(code)
    }
}

impl From<std::io::Error> for DatastoreError {
    fn from(err: std::io::Error) -> Self {
        DatastoreError::interp(ResultCode::PosixApiError, err.to_string())
    }
}

impl From<serde_json::Error> for DatastoreError {
    fn from(err: serde_json::Error) -> Self {
        DatastoreError::interp(ResultCode::OutputFailure, err.to_string())
    }
}

/// Extension trait for describing the error of a [`DatastoreResult`].
pub trait DatastoreResultExt<T> {
    /// Describes a bare error; described errors pass through untouched.
    fn describe_err<F, M>(self, f: F) -> DatastoreResult<T>
    where
        F: FnOnce() -> M,
        M: Into<String>;
}

impl<T> DatastoreResultExt<T> for DatastoreResult<T> {
    fn describe_err<F, M>(self, f: F) -> DatastoreResult<T>
    where
        F: FnOnce() -> M,
        M: Into<String>,
    {
        self.map_err(|e| if e.is_interp() { e } else { e.describe(f()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_code_round_trip_names() {
        for code in [
            ResultCode::Ok,
            ResultCode::NotOperational,
            ResultCode::InvalidStateTransition,
            ResultCode::Busy,
        ] {
            assert_eq!(ResultCode::parse(code.as_str()), Some(code));
        }
        assert_eq!(ResultCode::parse("bogus"), None);
    }

    #[test]
    fn test_describe_does_not_rewrap() {
        let err = DatastoreError::not_found().describe("name = :a");
        assert_eq!(err.message(), Some("name = :a"));

        let err = err.describe("Can't update.");
        assert_eq!(err.message(), Some("name = :a"));
        assert_eq!(err.result_code(), ResultCode::NotFound);
    }

    #[test]
    fn test_describe_err_ext() {
        let res: DatastoreResult<()> = Err(DatastoreError::invalid_args());
        let err = res.describe_err(|| "opt = -x.").unwrap_err();
        assert_eq!(err.to_string(), "INVALID_ARGS: opt = -x.");
    }

    #[test]
    fn test_bad_opt_value() {
        let err = DatastoreError::bad_opt_value(ResultCode::OutOfRange, "18446744073709551616");
        assert_eq!(err.result_code(), ResultCode::OutOfRange);
        assert_eq!(err.message(), Some("Bad opt value = 18446744073709551616."));
    }
}
