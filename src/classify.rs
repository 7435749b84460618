//! Driver error classification and warning escalation.
//!
//! Nothing here retries. A connection-fatal code flags the connection broken
//! so the next acquire reconnects, and the failure is returned to the caller.

use tracing::{debug, error, warn};

use crate::driver::DriverError;
use crate::driver::types::code;
use crate::error::{DriverFailure, Error, ErrorClass, Result};
use crate::pool::Connection;

/// Map a driver error code to its effect on the connection.
pub fn classify(errno: u32) -> ErrorClass {
    match errno {
        code::CR_NO_ERROR => ErrorClass::NoError,
        code::CR_OUT_OF_MEMORY
        | code::CR_SERVER_GONE_ERROR
        | code::CR_SERVER_LOST
        | code::CR_UNKNOWN_ERROR => ErrorClass::ConnectionFatal,
        _ => ErrorClass::OperationFatal,
    }
}

/// Statement phase a driver call belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Prepare,
    Bind,
    Execute,
}

/// Turn a failed driver call on `conn` into a crate error.
///
/// Connection-fatal codes mark `conn` broken.
pub fn escalate(conn: &Connection, phase: Phase, label: &'static str, err: DriverError) -> Error {
    let class = classify(err.code);
    match class {
        ErrorClass::NoError => {
            error!(conn_id = conn.id(), label, "driver call failed without an error code");
            return Error::Internal(format!(
                "{}: driver reported a failure with no error code",
                label
            ));
        }
        ErrorClass::ConnectionFatal => {
            warn!(conn_id = conn.id(), code = err.code, message = %err.message, label, "connection-fatal driver error");
            conn.mark_broken();
        }
        ErrorClass::OperationFatal => {
            debug!(conn_id = conn.id(), code = err.code, message = %err.message, label, "driver error");
        }
    }
    let failure = DriverFailure {
        label,
        class,
        code: err.code,
        message: err.message,
    };
    match phase {
        Phase::Prepare => Error::Prepare(failure),
        Phase::Bind => Error::Bind(failure),
        Phase::Execute => Error::Execute(failure),
    }
}

/// Remote warnings promoted to errors after an execute.
#[derive(Debug, Clone, Copy)]
pub struct WarningPolicy<'a> {
    escalated: &'a [String],
}

impl<'a> WarningPolicy<'a> {
    pub fn new(escalated: &'a [String]) -> Self {
        Self { escalated }
    }

    /// Fail if the last statement on `conn` raised an escalated warning.
    ///
    /// Any `SHOW WARNINGS` field equal to an escalated text matches.
    pub fn check(&self, conn: &Connection) -> Result<()> {
        if self.escalated.is_empty() {
            return Ok(());
        }
        let count = conn
            .with(|c| Ok(c.warning_count()))
            .map_err(|e| escalate(conn, Phase::Execute, "failed to read MySQL warnings", e))?;
        if count == 0 {
            return Ok(());
        }
        let warnings = conn
            .with(|c| c.query("SHOW WARNINGS"))
            .map_err(|e| escalate(conn, Phase::Execute, "failed to read MySQL warnings", e))?
            .unwrap_or_default();
        for row in &warnings.rows {
            for field in row.iter().flatten() {
                if self.escalated.iter().any(|w| w == field) {
                    return Err(Error::WarningEscalation(field.clone()));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_codes() {
        assert_eq!(classify(code::CR_NO_ERROR), ErrorClass::NoError);
        for errno in [
            code::CR_OUT_OF_MEMORY,
            code::CR_SERVER_GONE_ERROR,
            code::CR_SERVER_LOST,
            code::CR_UNKNOWN_ERROR,
        ] {
            assert_eq!(classify(errno), ErrorClass::ConnectionFatal, "{}", errno);
        }
        for errno in [
            code::CR_COMMANDS_OUT_OF_SYNC,
            code::ER_PARSE_ERROR,
            code::ER_DUP_ENTRY,
        ] {
            assert_eq!(classify(errno), ErrorClass::OperationFatal, "{}", errno);
        }
    }

    mod with_connection {
        use std::sync::Arc;

        use super::*;
        use crate::driver::memory::MemoryServer;
        use crate::opts::Opts;
        use crate::pool::ConnectionCache;

        #[test]
        fn test_escalate_marks_connection_broken() {
            let server = MemoryServer::new();
            let cache = ConnectionCache::new(Arc::new(server.driver()));
            let conn = cache.acquire(&Opts::default()).unwrap();

            let err = escalate(
                &conn,
                Phase::Execute,
                "failed to execute the MySQL query",
                DriverError::new(code::CR_COMMANDS_OUT_OF_SYNC, "Commands out of sync"),
            );
            assert!(!err.is_connection_broken());
            assert!(!conn.is_broken());

            let err = escalate(
                &conn,
                Phase::Execute,
                "failed to execute the MySQL query",
                DriverError::new(code::CR_SERVER_LOST, "Lost connection to MySQL server"),
            );
            assert!(err.is_connection_broken());
            assert!(conn.is_broken());
            assert_eq!(
                err.to_string(),
                "failed to execute the MySQL query: \nLost connection to MySQL server"
            );
        }

        #[test]
        fn test_no_error_code_is_internal() {
            let server = MemoryServer::new();
            let cache = ConnectionCache::new(Arc::new(server.driver()));
            let conn = cache.acquire(&Opts::default()).unwrap();
            let err = escalate(&conn, Phase::Prepare, "x", DriverError::new(0, ""));
            assert!(matches!(err, Error::Internal(_)));
            assert!(!conn.is_broken());
        }
    }
}
