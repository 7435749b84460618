//! Error types for zero-mysql-fdw.

use thiserror::Error;

use crate::driver::DriverError;
use crate::driver::codec::CodecError;

/// Result type for zero-mysql-fdw operations.
pub type Result<T> = core::result::Result<T, Error>;

/// How a failed driver call affects the connection it ran on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The driver reported success on an error path.
    NoError,
    /// The connection is unusable; it is invalidated so the next acquire reconnects.
    ConnectionFatal,
    /// Only the current statement failed; the connection is kept.
    OperationFatal,
}

/// A classified driver failure.
///
/// Displays as `"<label>: \n<remote message>"` so the endpoint's own text is
/// never rewritten.
#[derive(Debug, Clone, Error)]
#[error("{label}: \n{message}")]
pub struct DriverFailure {
    /// Short cause label, e.g. "failed to prepare the MySQL query"
    pub label: &'static str,
    /// Classification of the driver error code
    pub class: ErrorClass,
    /// Driver error code
    pub code: u32,
    /// Native error text reported by the driver
    pub message: String,
}

/// Errors raised while building a remote modify or scan plan.
#[derive(Debug, Clone, Error)]
pub enum PlanningError {
    /// The first column of the remote table is neither a primary nor a unique key.
    #[error(
        "first column of remote table {table} must be unique for INSERT/UPDATE/DELETE operation"
    )]
    NoUsableRowIdentifier {
        /// Remote table as `database.table`
        table: String,
    },

    /// RETURNING lists cannot be reported through an execute call.
    #[error("RETURNING is not supported by this FDW")]
    UnsupportedReturning,
}

/// Error type for zero-mysql-fdw.
#[derive(Debug, Error)]
pub enum Error {
    /// Plan construction failed
    #[error(transparent)]
    Planning(#[from] PlanningError),

    /// Could not establish a connection to the remote endpoint
    #[error("failed to connect to MySQL: \n{0}")]
    Connect(DriverError),

    /// Statement text rejected by the remote endpoint
    #[error("{0}")]
    Prepare(DriverFailure),

    /// Parameter or result binding rejected
    #[error("{0}")]
    Bind(DriverFailure),

    /// Execute, fetch or session query failed
    #[error("{0}")]
    Execute(DriverFailure),

    /// Precision loss or unmapped type between host and driver values
    #[error("type conversion error: {0}")]
    TypeConversion(String),

    /// An UPDATE tried to change the row identifier column
    #[error("row identifier column update is not supported")]
    RowIdentifierChanged,

    /// A remote warning configured for escalation was raised
    #[error("remote warning escalated to error: {0}")]
    WarningEscalation(String),

    /// The remote table does not exist
    #[error("relation {0} does not exist")]
    TableNotFound(String),

    /// Invalid usage of the bridge API
    #[error("Invalid usage: {0}")]
    InvalidUsage(String),

    /// Unsupported feature
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Internal invariant violation
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns true if the error left the connection unusable.
    pub fn is_connection_broken(&self) -> bool {
        match self {
            Error::Connect(_) => true,
            Error::Prepare(f) | Error::Bind(f) | Error::Execute(f) => {
                f.class == ErrorClass::ConnectionFatal
            }
            _ => false,
        }
    }

    /// Get the driver error code if this error came from the driver.
    pub fn driver_code(&self) -> Option<u32> {
        match self {
            Error::Connect(e) => Some(e.code),
            Error::Prepare(f) | Error::Bind(f) | Error::Execute(f) => Some(f.code),
            _ => None,
        }
    }

    pub(crate) fn conversion(from: impl std::fmt::Display, to: impl std::fmt::Display) -> Self {
        Error::TypeConversion(format!("cannot convert {} to {}", from, to))
    }

    pub(crate) fn out_of_range(value: impl std::fmt::Display, to: impl std::fmt::Display) -> Self {
        Error::TypeConversion(format!("value {} is out of range for type {}", value, to))
    }
}

impl From<CodecError> for Error {
    fn from(err: CodecError) -> Self {
        Error::TypeConversion(err.to_string())
    }
}
