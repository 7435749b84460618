//! Scan bridge: one remote read-only cursor per foreign scan.
//!
//! Call sequence driven by the host executor:
//!
//! ```text
//! open → iterate* → (rescan → iterate*)* → close
//! ```
//!
//! `open` prepares the statement and binds result buffers. Parameters are
//! bound and the statement executed by the first `iterate` after `open` or
//! `rescan`, since host parameter values only exist during the fetch phase.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::classify::{Phase, WarningPolicy, escalate};
use crate::conversion::{bind_result, to_host, to_param};
use crate::driver::{CursorType, FetchStatus, ResultBuffer, StmtAttr, StmtId};
use crate::error::{Error, Result};
use crate::estimate::{LOCAL_STARTUP_COST, REMOTE_STARTUP_COST};
use crate::plan::{ForeignTable, RemoteParam, ScanPlan};
use crate::pool::Connection;
use crate::scratch::TupleScratch;
use crate::types::{AttrNumber, Datum, HostType, Tuple};

/// Host parameter values visible to a running scan.
#[derive(Debug, Clone, Default)]
pub struct ExprContext {
    params: HashMap<usize, Option<Datum>>,
}

impl ExprContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set host parameter `id`; `None` is NULL.
    pub fn set_param(&mut self, id: usize, value: Option<Datum>) {
        self.params.insert(id, value);
    }

    /// Current value of host parameter `id`.
    pub fn param(&self, id: usize) -> Result<Option<&Datum>> {
        self.params
            .get(&id)
            .map(Option::as_ref)
            .ok_or_else(|| Error::InvalidUsage(format!("parameter ${} has no value", id)))
    }
}

/// How the executor runs the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecMode {
    #[default]
    Normal,
    /// EXPLAIN without ANALYZE: nothing is executed.
    ExplainOnly,
}

/// One line of EXPLAIN output.
#[derive(Debug, Clone, PartialEq)]
pub struct ExplainProperty {
    pub name: &'static str,
    pub value: String,
}

/// Result column bound to a host output position.
#[derive(Debug, Clone)]
struct ColumnBinding {
    attnum: AttrNumber,
    ty: HostType,
}

/// Execution state of one foreign scan.
#[derive(Debug)]
pub struct ScanState {
    conn: Arc<Connection>,
    stmt: Option<StmtId>,
    sql: String,
    local: bool,
    prefetch_rows: u32,
    escalated_warnings: Vec<String>,
    params: Vec<RemoteParam>,
    /// Positionally matches `results`
    bindings: Vec<ColumnBinding>,
    results: Vec<ResultBuffer>,
    scratch: TupleScratch,
    slot: Tuple,
    explain_only: bool,
    executed: bool,
    truncated_rows: u64,
}

impl ScanState {
    /// Prepare the scan statement on `conn`.
    ///
    /// In [`ExecMode::ExplainOnly`] the statement is prepared but no cursor
    /// or result buffer is set up.
    pub fn open(conn: Arc<Connection>, table: &ForeignTable, plan: &ScanPlan, mode: ExecMode) -> Result<Self> {
        let stmt = conn
            .with(|c| c.stmt_prepare(&plan.sql))
            .map_err(|e| escalate(&conn, Phase::Prepare, "failed to prepare the MySQL query", e))?;
        debug!(conn_id = conn.id(), stmt_id = stmt, sql = %plan.sql, "scan statement prepared");

        let natts = match &plan.tlist {
            Some(tlist) => tlist.len(),
            None => table.desc.natts(),
        };
        let mut state = Self {
            conn,
            stmt: Some(stmt),
            sql: plan.sql.clone(),
            local: table.opts.is_local(),
            prefetch_rows: table.opts.prefetch_rows,
            escalated_warnings: table.opts.escalated_warnings.clone(),
            params: plan.params.clone(),
            bindings: Vec::new(),
            results: Vec::new(),
            scratch: TupleScratch::with_capacity(plan.params.len()),
            slot: Tuple::new(vec![None; natts]),
            explain_only: mode == ExecMode::ExplainOnly,
            executed: false,
            truncated_rows: 0,
        };
        if !state.explain_only {
            // Dropping `state` on error closes the statement.
            state.bind_columns(table, plan)?;
        }
        Ok(state)
    }

    fn bind_columns(&mut self, table: &ForeignTable, plan: &ScanPlan) -> Result<()> {
        let stmt = self.stmt_id()?;
        let conn = Arc::clone(&self.conn);
        let prefetch_rows = self.prefetch_rows;
        conn.with(|c| {
            c.stmt_attr_set(stmt, StmtAttr::CursorType(CursorType::ReadOnly))?;
            c.stmt_attr_set(stmt, StmtAttr::PrefetchRows(prefetch_rows))
        })
        .map_err(|e| escalate(&conn, Phase::Prepare, "failed to set the MySQL cursor", e))?;

        let fields = conn
            .with(|c| c.stmt_result_metadata(stmt))
            .map_err(|e| escalate(&conn, Phase::Prepare, "failed to retrieve query result set metadata", e))?
            .ok_or_else(|| {
                Error::Internal("failed to retrieve query result set metadata: no result set".to_string())
            })?;

        for &attnum in &plan.retrieved_attrs {
            let column = match &plan.tlist {
                Some(tlist) => usize::try_from(attnum)
                    .ok()
                    .and_then(|pos| pos.checked_sub(1))
                    .and_then(|idx| tlist.get(idx))
                    .and_then(|&a| table.desc.attr(a)),
                None => table.desc.attr(attnum),
            };
            let Some(column) = column else {
                return Err(Error::InvalidUsage(format!(
                    "retrieved attribute {} is not a column of {}",
                    attnum, table.name
                )));
            };
            if column.dropped {
                continue;
            }
            let field = fields.get(self.bindings.len()).ok_or_else(|| {
                Error::Internal(format!(
                    "remote query returns {} columns, expected more",
                    fields.len()
                ))
            })?;
            self.results.push(bind_result(&column.ty, field)?);
            self.bindings.push(ColumnBinding {
                attnum,
                ty: column.ty.clone(),
            });
        }
        if self.bindings.len() != fields.len() {
            return Err(Error::Internal(format!(
                "remote query returns {} columns, expected {}",
                fields.len(),
                self.bindings.len()
            )));
        }

        let results = &self.results;
        conn.with(|c| c.stmt_bind_result(stmt, results))
            .map_err(|e| escalate(&conn, Phase::Bind, "failed to bind the MySQL query", e))?;
        Ok(())
    }

    fn stmt_id(&self) -> Result<StmtId> {
        self.stmt
            .ok_or_else(|| Error::InvalidUsage("scan is closed".to_string()))
    }

    /// Fetch the next row.
    ///
    /// Returns `None` at end of data. A row with truncated values is still
    /// returned; the truncation is logged and counted.
    pub fn iterate(&mut self, ecxt: &ExprContext) -> Result<Option<&Tuple>> {
        if self.explain_only {
            return Err(Error::InvalidUsage(
                "scan was opened for EXPLAIN only".to_string(),
            ));
        }
        let stmt = self.stmt_id()?;
        if !self.executed {
            self.bind_params_and_execute(stmt, ecxt)?;
        }

        for value in &mut self.slot.values {
            *value = None;
        }
        let conn = &self.conn;
        let results = &mut self.results;
        let status = conn
            .with(|c| c.stmt_fetch(stmt, results))
            .map_err(|e| escalate(conn, Phase::Execute, "failed to fetch the MySQL query result", e))?;
        match status {
            FetchStatus::NoData => return Ok(None),
            FetchStatus::Row => {}
            FetchStatus::Truncated => {
                self.truncated_rows += 1;
                let columns: Vec<AttrNumber> = self
                    .bindings
                    .iter()
                    .zip(&self.results)
                    .filter(|(_, buf)| buf.truncated)
                    .map(|(b, _)| b.attnum)
                    .collect();
                warn!(conn_id = self.conn.id(), stmt_id = stmt, ?columns, "fetched row was truncated");
            }
        }
        for (binding, buf) in self.bindings.iter().zip(&self.results) {
            self.slot.set(binding.attnum, to_host(&binding.ty, buf)?);
        }
        Ok(Some(&self.slot))
    }

    fn bind_params_and_execute(&mut self, stmt: StmtId, ecxt: &ExprContext) -> Result<()> {
        let conn = Arc::clone(&self.conn);
        if !self.params.is_empty() {
            self.scratch.reset();
            for param in &self.params {
                to_param(ecxt.param(param.id)?, &param.ty, self.scratch.next_slot())?;
            }
            let params = self.scratch.params();
            conn.with(|c| c.stmt_bind_param(stmt, params))
                .map_err(|e| escalate(&conn, Phase::Bind, "failed to bind the MySQL query", e))?;
        }
        conn.with(|c| c.stmt_execute(stmt))
            .map_err(|e| escalate(&conn, Phase::Execute, "failed to execute the MySQL query", e))?;
        WarningPolicy::new(&self.escalated_warnings).check(&conn)?;
        self.executed = true;
        debug!(conn_id = conn.id(), stmt_id = stmt, params = self.params.len(), "scan executed");
        Ok(())
    }

    /// Restart the scan. The next [`iterate`](Self::iterate) rebinds
    /// parameters and executes again on the same prepared statement.
    pub fn rescan(&mut self) {
        debug!(conn_id = self.conn.id(), stmt_id = ?self.stmt, "scan rescan");
        self.executed = false;
    }

    /// Release the statement and its buffers. Safe to call repeatedly.
    pub fn close(&mut self) {
        let Some(stmt) = self.stmt.take() else {
            return;
        };
        self.results.clear();
        self.bindings.clear();
        match self.conn.with(|c| c.stmt_close(stmt)) {
            Ok(()) => debug!(conn_id = self.conn.id(), stmt_id = stmt, "scan closed"),
            Err(e) => warn!(conn_id = self.conn.id(), stmt_id = stmt, code = e.code, message = %e.message, "failed to close scan statement"),
        }
    }

    /// EXPLAIN properties; empty unless `verbose`.
    pub fn explain(&self, verbose: bool) -> Vec<ExplainProperty> {
        if !verbose {
            return Vec::new();
        }
        let startup = if self.local {
            ExplainProperty {
                name: "Local server startup cost",
                value: LOCAL_STARTUP_COST.to_string(),
            }
        } else {
            ExplainProperty {
                name: "Remote server startup cost",
                value: REMOTE_STARTUP_COST.to_string(),
            }
        };
        vec![
            startup,
            ExplainProperty {
                name: "Remote query",
                value: self.sql.clone(),
            },
        ]
    }

    /// Whether the statement ran since the last open or rescan.
    pub fn executed(&self) -> bool {
        self.executed
    }

    pub fn is_closed(&self) -> bool {
        self.stmt.is_none()
    }

    /// Rows fetched with at least one truncated value.
    pub fn truncated_rows(&self) -> u64 {
        self.truncated_rows
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }
}

impl Drop for ScanState {
    fn drop(&mut self) {
        self.close();
    }
}
