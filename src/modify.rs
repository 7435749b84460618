//! Modify bridge: one prepared INSERT, UPDATE or DELETE per foreign table,
//! bound and executed once per tuple.
//!
//! Failed mutations are never retried.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::classify::{Phase, WarningPolicy, escalate};
use crate::conversion::to_param;
use crate::driver::StmtId;
use crate::error::{Error, Result};
use crate::plan::{CmdKind, ForeignTable, ModifyPlan};
use crate::pool::Connection;
use crate::row_id::{RowIdentifier, verify_unchanged};
use crate::scratch::TupleScratch;
use crate::types::{AttrNumber, Datum, HostType, Tuple};

/// Execution state of one foreign modify.
#[derive(Debug)]
pub struct ModifyState {
    conn: Arc<Connection>,
    stmt: Option<StmtId>,
    command: CmdKind,
    sql: String,
    /// Transmitted columns, row identifier excluded for UPDATE
    targets: Vec<(AttrNumber, HostType)>,
    row_id: RowIdentifier,
    escalated_warnings: Vec<String>,
    scratch: TupleScratch,
}

impl ModifyState {
    /// Prepare the modify statement on `conn`.
    pub fn open(conn: Arc<Connection>, table: &ForeignTable, plan: &ModifyPlan) -> Result<Self> {
        let mut targets = Vec::with_capacity(plan.target_attrs.len());
        for &attnum in &plan.target_attrs {
            if plan.command == CmdKind::Delete
                || (plan.command == CmdKind::Update && attnum == plan.row_id.attnum)
            {
                continue;
            }
            match table.desc.attr(attnum) {
                Some(col) if !col.dropped => targets.push((attnum, col.ty.clone())),
                _ => {
                    return Err(Error::InvalidUsage(format!(
                        "target attribute {} is not a column of {}",
                        attnum, table.name
                    )));
                }
            }
        }
        let expected_params = match plan.command {
            CmdKind::Insert => targets.len(),
            CmdKind::Update => targets.len() + 1,
            CmdKind::Delete => 1,
            CmdKind::Select => {
                return Err(Error::InvalidUsage(
                    "SELECT is not a modify command".to_string(),
                ));
            }
        };

        let stmt = conn
            .with(|c| c.stmt_prepare(&plan.sql))
            .map_err(|e| escalate(&conn, Phase::Prepare, "failed to prepare the MySQL query", e))?;
        let state = Self {
            conn,
            stmt: Some(stmt),
            command: plan.command,
            sql: plan.sql.clone(),
            targets,
            row_id: plan.row_id.clone(),
            escalated_warnings: table.opts.escalated_warnings.clone(),
            scratch: TupleScratch::with_capacity(expected_params),
        };

        let param_count = state
            .conn
            .with(|c| c.stmt_param_count(stmt))
            .map_err(|e| escalate(&state.conn, Phase::Prepare, "failed to prepare the MySQL query", e))?;
        if param_count != expected_params {
            return Err(Error::Internal(format!(
                "remote statement takes {} parameters, expected {}",
                param_count, expected_params
            )));
        }
        debug!(conn_id = state.conn.id(), stmt_id = stmt, command = ?state.command, sql = %state.sql, "modify statement prepared");
        Ok(state)
    }

    fn stmt_for(&self, command: CmdKind) -> Result<StmtId> {
        if self.command != command {
            return Err(Error::InvalidUsage(format!(
                "{:?} called on a {:?} operation",
                command, self.command
            )));
        }
        self.stmt
            .ok_or_else(|| Error::InvalidUsage("modify operation is closed".to_string()))
    }

    /// Insert one row. Every target column is sent, NULLs included.
    pub fn exec_insert(&mut self, tuple: &Tuple) -> Result<u64> {
        let stmt = self.stmt_for(CmdKind::Insert)?;
        self.scratch.reset();
        for (attnum, ty) in &self.targets {
            to_param(tuple.get(*attnum), ty, self.scratch.next_slot())?;
        }
        self.bind_and_execute(stmt)
    }

    /// Update the row whose identifier pre-image is `row_id`.
    ///
    /// Fails with [`Error::RowIdentifierChanged`] before anything is sent if
    /// `new` carries a different row identifier.
    pub fn exec_update(&mut self, new: &Tuple, row_id: Option<&Datum>) -> Result<u64> {
        let stmt = self.stmt_for(CmdKind::Update)?;
        verify_unchanged(row_id, new.get(self.row_id.attnum))?;
        self.scratch.reset();
        for (attnum, ty) in &self.targets {
            to_param(new.get(*attnum), ty, self.scratch.next_slot())?;
        }
        to_param(row_id, &self.row_id.ty, self.scratch.next_slot())?;
        self.bind_and_execute(stmt)
    }

    /// Delete the row whose identifier is `row_id`.
    pub fn exec_delete(&mut self, row_id: Option<&Datum>) -> Result<u64> {
        let stmt = self.stmt_for(CmdKind::Delete)?;
        self.scratch.reset();
        to_param(row_id, &self.row_id.ty, self.scratch.next_slot())?;
        self.bind_and_execute(stmt)
    }

    fn bind_and_execute(&mut self, stmt: StmtId) -> Result<u64> {
        let conn = &self.conn;
        let params = self.scratch.params();
        conn.with(|c| c.stmt_bind_param(stmt, params))
            .map_err(|e| escalate(conn, Phase::Bind, "failed to bind the MySQL query", e))?;
        let affected = conn
            .with(|c| c.stmt_execute(stmt))
            .map_err(|e| escalate(conn, Phase::Execute, "failed to execute the MySQL query", e))?;
        WarningPolicy::new(&self.escalated_warnings).check(conn)?;
        self.scratch.reset();
        debug!(conn_id = conn.id(), stmt_id = stmt, command = ?self.command, affected, "modify executed");
        Ok(affected)
    }

    /// Release the statement. Safe to call repeatedly.
    pub fn close(&mut self) {
        let Some(stmt) = self.stmt.take() else {
            return;
        };
        match self.conn.with(|c| c.stmt_close(stmt)) {
            Ok(()) => debug!(conn_id = self.conn.id(), stmt_id = stmt, "modify closed"),
            Err(e) => warn!(conn_id = self.conn.id(), stmt_id = stmt, code = e.code, message = %e.message, "failed to close modify statement"),
        }
    }

    pub fn command(&self) -> CmdKind {
        self.command
    }

    pub fn is_closed(&self) -> bool {
        self.stmt.is_none()
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }
}

impl Drop for ModifyState {
    fn drop(&mut self) {
        self.close();
    }
}
