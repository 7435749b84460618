//! Prepared-statement client driver interface.
//!
//! The bridge never talks to the network itself. Everything it needs from
//! the remote endpoint goes through [`Driver`] and [`DriverConn`], which
//! model the classic MySQL C client statement API: prepare, set cursor
//! attributes, bind parameter and result buffers, execute, fetch.
//!
//! An implementation is chosen once at startup and handed to
//! [`ConnectionCache`](crate::pool::ConnectionCache). The in-process
//! `memory` endpoint (feature `memory`) is the reference implementation used
//! by the tests.

pub mod codec;
#[cfg(any(test, feature = "memory"))]
pub mod memory;
pub mod types;

use thiserror::Error;

use crate::opts::Opts;

pub use types::{ColumnFlags, CursorType, FetchStatus, FieldInfo, FieldType, StmtAttr};

/// Statement handle issued by [`DriverConn::stmt_prepare`].
pub type StmtId = u32;

/// Error reported by a driver call: the native code and message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (errno {code})")]
pub struct DriverError {
    pub code: u32,
    pub message: String,
}

impl DriverError {
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Result type for driver calls.
pub type DriverResult<T> = core::result::Result<T, DriverError>;

/// Input parameter buffer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamBind {
    /// Layout of `buffer`; `None` until the slot is first bound
    pub field_type: Option<FieldType>,
    pub unsigned: bool,
    pub is_null: bool,
    pub buffer: Vec<u8>,
}

impl ParamBind {
    /// Clear the slot for the next tuple, keeping the allocation.
    pub fn reset(&mut self) {
        self.field_type = None;
        self.unsigned = false;
        self.is_null = false;
        self.buffer.clear();
    }

    pub fn null(&mut self) {
        self.reset();
        self.field_type = Some(FieldType::Null);
        self.is_null = true;
    }
}

/// Output column buffer written by [`DriverConn::stmt_fetch`].
#[derive(Debug, Clone, PartialEq)]
pub struct ResultBuffer {
    pub field_type: FieldType,
    pub unsigned: bool,
    /// Capacity the driver may write into `data`
    pub buffer_length: usize,
    pub data: Vec<u8>,
    /// Full length of the column value, which exceeds `data.len()` when truncated
    pub length: usize,
    pub is_null: bool,
    pub truncated: bool,
}

impl ResultBuffer {
    pub fn new(field_type: FieldType, unsigned: bool, buffer_length: usize) -> Self {
        Self {
            field_type,
            unsigned,
            buffer_length,
            data: Vec::with_capacity(buffer_length),
            length: 0,
            is_null: false,
            truncated: false,
        }
    }
}

/// Text result of [`DriverConn::query`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl ResultSet {
    /// Index of a column by name, case-insensitive.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.eq_ignore_ascii_case(name))
    }
}

/// Opens connections to the remote endpoint.
pub trait Driver: Send + Sync {
    fn connect(&self, opts: &Opts) -> DriverResult<Box<dyn DriverConn>>;
}

/// One live driver connection.
///
/// Calls follow the statement API ordering: `stmt_prepare` before any
/// other `stmt_*` call on that id, binds before `stmt_execute`,
/// `stmt_execute` before `stmt_fetch`.
pub trait DriverConn: Send {
    /// Server version string.
    fn server_info(&self) -> String;

    /// Run a text query. Returns `None` for statements without a result set.
    fn query(&mut self, sql: &str) -> DriverResult<Option<ResultSet>>;

    /// Warnings raised by the last executed statement.
    fn warning_count(&self) -> u32;

    fn stmt_prepare(&mut self, sql: &str) -> DriverResult<StmtId>;

    fn stmt_attr_set(&mut self, stmt: StmtId, attr: StmtAttr) -> DriverResult<()>;

    fn stmt_param_count(&self, stmt: StmtId) -> DriverResult<usize>;

    /// Column metadata of the statement's result, `None` if it returns no rows.
    fn stmt_result_metadata(&self, stmt: StmtId) -> DriverResult<Option<Vec<FieldInfo>>>;

    fn stmt_bind_param(&mut self, stmt: StmtId, params: &[ParamBind]) -> DriverResult<()>;

    /// Declare the layout of the result buffers passed to `stmt_fetch`.
    fn stmt_bind_result(&mut self, stmt: StmtId, results: &[ResultBuffer]) -> DriverResult<()>;

    /// Execute with the bound parameters. Returns the affected row count.
    fn stmt_execute(&mut self, stmt: StmtId) -> DriverResult<u64>;

    /// Fetch the next row into `results`.
    fn stmt_fetch(&mut self, stmt: StmtId, results: &mut [ResultBuffer]) -> DriverResult<FetchStatus>;

    /// Drop the pending result set so the statement can be executed again.
    fn stmt_reset(&mut self, stmt: StmtId) -> DriverResult<()>;

    fn stmt_close(&mut self, stmt: StmtId) -> DriverResult<()>;
}
