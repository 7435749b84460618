//! Entry points called by the host executor.
//!
//! [`MysqlFdw`] owns the connection cache and the deparser. Planning entry
//! points return immutable descriptors; `begin_*` entry points return the
//! owned execution state the executor drives until `end_*`.

use std::sync::Arc;

use tracing::debug;

use crate::deparse::{Deparser, MysqlDeparser};
use crate::driver::Driver;
use crate::error::{Error, Result};
use crate::estimate::{self, PathCosts};
use crate::modify::ModifyState;
use crate::plan::{self, ForeignTable, ModifyPlan, ModifyRequest, ScanPlan, ScanRequest};
use crate::pool::ConnectionCache;
use crate::row_id::{self, RowIdentifier, RowIdentifierCache};
use crate::scan::{ExecMode, ScanState};

/// Foreign-data bridge to MySQL-compatible servers.
pub struct MysqlFdw {
    cache: ConnectionCache,
    deparser: Box<dyn Deparser>,
}

impl MysqlFdw {
    /// Bridge whose connections are made by `driver`.
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self {
            cache: ConnectionCache::new(driver),
            deparser: Box::new(MysqlDeparser),
        }
    }

    /// Replace the SQL generator.
    #[must_use]
    pub fn with_deparser(mut self, deparser: impl Deparser + 'static) -> Self {
        self.deparser = Box::new(deparser);
        self
    }

    pub fn connections(&self) -> &ConnectionCache {
        &self.cache
    }

    /// Estimated row count of a scan.
    ///
    /// Connects only when the table asks for remote estimates.
    pub fn get_rel_size(&self, table: &ForeignTable, req: &ScanRequest) -> Result<f64> {
        if !table.opts.use_remote_estimate {
            return Ok(estimate::DEFAULT_NUM_ROWS);
        }
        let conn = self.cache.acquire(&table.opts)?;
        let rows = estimate::rel_size(self.deparser.as_ref(), Some(&conn), table, req);
        self.cache.release(conn);
        rows
    }

    /// Costs of the only scan path.
    pub fn get_paths(&self, table: &ForeignTable, rows: f64) -> PathCosts {
        estimate::path_costs(&table.opts, rows)
    }

    pub fn plan_scan(&self, table: &ForeignTable, req: &ScanRequest) -> Result<ScanPlan> {
        plan::plan_scan(self.deparser.as_ref(), table, req)
    }

    /// The junk column UPDATE and DELETE need from the executor.
    pub fn add_update_target(&self, table: &ForeignTable) -> Result<RowIdentifier> {
        row_id::add_update_target(table)
    }

    /// Plan an insert, update or delete.
    ///
    /// `row_ids` lives for the planning of one statement.
    pub fn plan_modify(
        &self,
        row_ids: &mut RowIdentifierCache,
        table: &ForeignTable,
        req: &ModifyRequest,
    ) -> Result<ModifyPlan> {
        let conn = self.cache.acquire(&table.opts)?;
        let plan = plan::plan_modify(self.deparser.as_ref(), row_ids, &conn, table, req);
        self.cache.release(conn);
        plan
    }

    /// Page count of the remote table for ANALYZE.
    pub fn analyze(&self, table: &ForeignTable) -> Result<u64> {
        let conn = self.cache.acquire(&table.opts)?;
        let pages = estimate::analyze_pages(&conn, &table.remote);
        self.cache.release(conn);
        pages
    }

    pub fn begin_scan(&self, table: &ForeignTable, plan: &ScanPlan, mode: ExecMode) -> Result<ScanState> {
        let conn = self.cache.acquire(&table.opts)?;
        debug!(table = %table.name, conn_id = conn.id(), ?mode, "begin foreign scan");
        ScanState::open(conn, table, plan, mode)
    }

    pub fn end_scan(&self, mut state: ScanState) {
        state.close();
        self.cache.release(Arc::clone(state.connection()));
    }

    /// Begin a modify. Returns `None` for EXPLAIN without ANALYZE.
    pub fn begin_modify(
        &self,
        table: &ForeignTable,
        plan: &ModifyPlan,
        mode: ExecMode,
    ) -> Result<Option<ModifyState>> {
        if mode == ExecMode::ExplainOnly {
            return Ok(None);
        }
        let conn = self.cache.acquire(&table.opts)?;
        debug!(table = %table.name, conn_id = conn.id(), command = ?plan.command, "begin foreign modify");
        ModifyState::open(conn, table, plan).map(Some)
    }

    pub fn end_modify(&self, state: Option<ModifyState>) {
        if let Some(mut state) = state {
            state.close();
            self.cache.release(Arc::clone(state.connection()));
        }
    }

    /// Inserts routed from COPY or a partitioned parent.
    pub fn begin_foreign_insert(&self, table: &ForeignTable) -> Result<ModifyState> {
        Err(Error::Unsupported(format!(
            "COPY and foreign partition routing not supported for {}",
            table.name
        )))
    }

    /// Drop every cached connection.
    pub fn cleanup(&self) {
        self.cache.cleanup();
    }
}
