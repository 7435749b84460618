//! In-process endpoint implementing the driver traits over in-memory tables.
//!
//! Used as the mock remote server for tests and examples. It executes the
//! statement subset in [`sql`], honors statement cursors and prefetch sizes,
//! and can inject failures and warnings at any driver call.
//!
//! ```
//! use zero_mysql_fdw::driver::memory::{MemColumn, MemoryServer};
//! use zero_mysql_fdw::driver::FieldType;
//!
//! let server = MemoryServer::new();
//! server.create_table("db", "items", vec![
//!     MemColumn::new("id", FieldType::Long).primary(),
//!     MemColumn::new("name", FieldType::VarString),
//! ]);
//! ```

pub mod sql;

use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use super::codec::{self, CodecError, NativeValue};
use super::types::code;
use super::{
    ColumnFlags, CursorType, Driver, DriverConn, DriverError, DriverResult, FetchStatus,
    FieldInfo, FieldType, ParamBind, ResultBuffer, ResultSet, StmtAttr, StmtId,
};
use crate::opts::Opts;
use sql::{CompareOp, Filter, Operand, Parsed, Statement, TableRef};

/// Key metadata of a column, as `EXPLAIN <table>` reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyKind {
    #[default]
    None,
    Primary,
    Unique,
    /// Non-unique index
    Multiple,
}

/// Column definition of a memory table.
#[derive(Debug, Clone)]
pub struct MemColumn {
    pub name: String,
    pub field_type: FieldType,
    pub unsigned: bool,
    pub key: KeyKind,
    pub length: Option<u32>,
}

impl MemColumn {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            unsigned: false,
            key: KeyKind::None,
            length: None,
        }
    }

    #[must_use]
    pub fn primary(mut self) -> Self {
        self.key = KeyKind::Primary;
        self
    }

    #[must_use]
    pub fn unique(mut self) -> Self {
        self.key = KeyKind::Unique;
        self
    }

    #[must_use]
    pub fn indexed(mut self) -> Self {
        self.key = KeyKind::Multiple;
        self
    }

    #[must_use]
    pub fn unsigned(mut self) -> Self {
        self.unsigned = true;
        self
    }

    /// Maximum value length in bytes (VARCHAR width).
    #[must_use]
    pub fn length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    fn field_info(&self) -> FieldInfo {
        let mut info = FieldInfo::new(self.name.clone(), self.field_type);
        if let Some(length) = self.length {
            info = info.with_length(length);
        }
        let mut flags = ColumnFlags::empty();
        if self.unsigned {
            flags = flags.with(ColumnFlags::UNSIGNED);
        }
        match self.key {
            KeyKind::Primary => flags = flags.with(ColumnFlags::PRI_KEY).with(ColumnFlags::NOT_NULL),
            KeyKind::Unique => flags = flags.with(ColumnFlags::UNIQUE_KEY),
            _ => {}
        }
        if matches!(
            self.field_type,
            FieldType::TinyBlob | FieldType::MediumBlob | FieldType::LongBlob | FieldType::Blob
        ) {
            flags = flags.with(ColumnFlags::BINARY);
        }
        info.with_flags(flags)
    }

    /// SQL type name as `EXPLAIN <table>` prints it.
    fn type_name(&self) -> String {
        let base = match self.field_type {
            FieldType::Tiny => "tinyint",
            FieldType::Short => "smallint",
            FieldType::Int24 => "mediumint",
            FieldType::Long => "int",
            FieldType::LongLong => "bigint",
            FieldType::Year => "year",
            FieldType::Float => "float",
            FieldType::Double => "double",
            FieldType::Decimal | FieldType::NewDecimal => "decimal(65,30)",
            FieldType::Date => "date",
            FieldType::Time => "time",
            FieldType::DateTime => "datetime",
            FieldType::Timestamp => "timestamp",
            FieldType::VarChar | FieldType::VarString => {
                return format!("varchar({})", self.length.unwrap_or(255));
            }
            FieldType::String => return format!("char({})", self.length.unwrap_or(1)),
            FieldType::Json => "json",
            FieldType::Enum => "enum",
            FieldType::Set => "set",
            FieldType::Bit => "bit(1)",
            FieldType::TinyBlob => "tinyblob",
            FieldType::MediumBlob => "mediumblob",
            FieldType::LongBlob => "longblob",
            FieldType::Blob => "blob",
            FieldType::Geometry => "geometry",
            FieldType::Null => "null",
        };
        if self.unsigned {
            format!("{} unsigned", base)
        } else {
            base.to_string()
        }
    }

    fn is_unique(&self) -> bool {
        matches!(self.key, KeyKind::Primary | KeyKind::Unique)
    }
}

/// A stored row: one optional value per column.
pub type MemRow = Vec<Option<NativeValue>>;

#[derive(Debug, Clone, Default)]
struct Table {
    columns: Vec<MemColumn>,
    rows: Vec<MemRow>,
    data_length: Option<u64>,
}

impl Table {
    fn column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name.eq_ignore_ascii_case(name))
    }
}

/// Driver call at which an injected fault fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultPoint {
    Connect,
    Query,
    Prepare,
    BindParam,
    BindResult,
    Execute,
    Fetch,
    Close,
}

/// A one-shot failure returned by the next call at `point`.
#[derive(Debug, Clone)]
pub struct Fault {
    pub point: FaultPoint,
    pub code: u32,
    pub message: String,
}

impl Fault {
    pub fn new(point: FaultPoint, code: u32, message: impl Into<String>) -> Self {
        Self {
            point,
            code,
            message: message.into(),
        }
    }
}

/// Call counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub connects: u32,
    pub queries: u32,
    pub prepares: u32,
    pub executes: u32,
    /// Fetch calls that had to go back to the server for another batch
    pub fetch_round_trips: u32,
    pub closes: u32,
}

#[derive(Debug, Clone)]
struct Warning {
    code: u32,
    message: String,
}

#[derive(Debug, Default)]
struct ServerState {
    tables: HashMap<TableRef, Table>,
    faults: Vec<Fault>,
    pending_warnings: Vec<Warning>,
    stats: Stats,
    log: Vec<String>,
    next_conn: u32,
}

impl ServerState {
    fn take_fault(&mut self, point: FaultPoint) -> Option<Fault> {
        let idx = self.faults.iter().position(|f| f.point == point)?;
        Some(self.faults.remove(idx))
    }

    fn table(&self, table: &TableRef) -> DriverResult<&Table> {
        self.tables.get(table).ok_or_else(|| no_such_table(table))
    }
}

fn no_such_table(table: &TableRef) -> DriverError {
    DriverError::new(
        code::ER_NO_SUCH_TABLE,
        format!("Table '{}.{}' doesn't exist", table.database, table.table),
    )
}

fn unknown_column(column: &str, clause: &str) -> DriverError {
    DriverError::new(
        code::ER_BAD_FIELD_ERROR,
        format!("Unknown column '{}' in '{}'", column, clause),
    )
}

fn server_gone() -> DriverError {
    DriverError::new(code::CR_SERVER_GONE_ERROR, "MySQL server has gone away")
}

/// Shared handle to an in-memory endpoint.
#[derive(Debug, Clone, Default)]
pub struct MemoryServer {
    state: Arc<Mutex<ServerState>>,
}

impl MemoryServer {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// A driver whose connections all reach this server.
    pub fn driver(&self) -> MemoryDriver {
        MemoryDriver {
            server: self.clone(),
        }
    }

    pub fn create_table(&self, database: &str, table: &str, columns: Vec<MemColumn>) {
        let key = TableRef {
            database: database.to_string(),
            table: table.to_string(),
        };
        self.state().tables.insert(
            key,
            Table {
                columns,
                ..Table::default()
            },
        );
    }

    /// Append a row without any constraint checks.
    pub fn insert_row(&self, database: &str, table: &str, row: MemRow) {
        let key = TableRef {
            database: database.to_string(),
            table: table.to_string(),
        };
        if let Some(t) = self.state().tables.get_mut(&key) {
            t.rows.push(row);
        }
    }

    /// Current contents of a table, in storage order.
    pub fn rows(&self, database: &str, table: &str) -> Vec<MemRow> {
        let key = TableRef {
            database: database.to_string(),
            table: table.to_string(),
        };
        self.state()
            .tables
            .get(&key)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Override the `data_length` reported by the information_schema size query.
    pub fn set_data_length(&self, database: &str, table: &str, bytes: u64) {
        let key = TableRef {
            database: database.to_string(),
            table: table.to_string(),
        };
        if let Some(t) = self.state().tables.get_mut(&key) {
            t.data_length = Some(bytes);
        }
    }

    /// Make the next call at `fault.point`, on any connection, fail.
    pub fn inject(&self, fault: Fault) {
        self.state().faults.push(fault);
    }

    /// Raise a warning from the next executed statement.
    pub fn push_warning_on_execute(&self, code: u32, message: impl Into<String>) {
        self.state().pending_warnings.push(Warning {
            code,
            message: message.into(),
        });
    }

    pub fn stats(&self) -> Stats {
        self.state().stats
    }

    /// SQL of every executed statement and text query, oldest first.
    pub fn statement_log(&self) -> Vec<String> {
        self.state().log.clone()
    }
}

/// [`Driver`] connecting to a [`MemoryServer`].
#[derive(Debug, Clone)]
pub struct MemoryDriver {
    server: MemoryServer,
}

impl Driver for MemoryDriver {
    fn connect(&self, opts: &Opts) -> DriverResult<Box<dyn DriverConn>> {
        let mut state = self.server.state();
        state.stats.connects += 1;
        if let Some(fault) = state.take_fault(FaultPoint::Connect) {
            return Err(DriverError::new(fault.code, fault.message));
        }
        state.next_conn += 1;
        let id = state.next_conn;
        debug!(conn_id = id, host = %opts.host, user = %opts.user, "memory endpoint accepted connection");
        Ok(Box::new(MemoryConn {
            server: self.server.clone(),
            id,
            lost: false,
            warnings: Vec::new(),
            session: HashMap::new(),
            stmts: HashMap::new(),
            next_stmt: 0,
        }))
    }
}

#[derive(Debug)]
struct Stmt {
    sql: String,
    parsed: Parsed,
    cursor: CursorType,
    prefetch_rows: u32,
    params: Vec<ParamBind>,
    bound_results: Option<usize>,
    /// Rows of the current result set not yet fetched
    pending: Option<VecDeque<MemRow>>,
    /// Fetched-ahead rows remaining in the current batch
    buffered: usize,
    meta: Option<Vec<FieldInfo>>,
}

/// One connection to a [`MemoryServer`].
#[derive(Debug)]
pub struct MemoryConn {
    server: MemoryServer,
    id: u32,
    /// Set once a connection-loss fault fires; every later call fails
    lost: bool,
    warnings: Vec<Warning>,
    session: HashMap<String, String>,
    stmts: HashMap<StmtId, Stmt>,
    next_stmt: StmtId,
}

impl MemoryConn {
    fn check(&mut self, point: FaultPoint) -> DriverResult<()> {
        if self.lost {
            return Err(server_gone());
        }
        if let Some(fault) = self.server.state().take_fault(point) {
            if matches!(
                fault.code,
                code::CR_SERVER_LOST | code::CR_SERVER_GONE_ERROR
            ) {
                self.lost = true;
            }
            return Err(DriverError::new(fault.code, fault.message));
        }
        Ok(())
    }

    fn stmt(&self, id: StmtId) -> DriverResult<&Stmt> {
        self.stmts.get(&id).ok_or_else(unknown_stmt)
    }

    fn stmt_mut(&mut self, id: StmtId) -> DriverResult<&mut Stmt> {
        self.stmts.get_mut(&id).ok_or_else(unknown_stmt)
    }

    /// Session variable set by a previous `SET`.
    pub fn session_var(&self, name: &str) -> Option<&str> {
        self.session.get(name).map(String::as_str)
    }

    fn parse(&self, sql: &str) -> DriverResult<Parsed> {
        let escapes = self
            .session_var("sql_mode")
            .is_none_or(crate::deparse::backslash_escapes);
        sql::parse_with(sql, escapes)
    }
}

fn unknown_stmt() -> DriverError {
    DriverError::new(
        code::CR_NO_PREPARE_STMT,
        "Statement not prepared",
    )
}

impl DriverConn for MemoryConn {
    fn server_info(&self) -> String {
        "8.0.36-memory".to_string()
    }

    fn query(&mut self, sql: &str) -> DriverResult<Option<ResultSet>> {
        self.check(FaultPoint::Query)?;
        let parsed = self.parse(sql)?;
        let mut state = self.server.state();
        state.stats.queries += 1;
        state.log.push(sql.to_string());
        match parsed.statement {
            Statement::ShowWarnings => {
                let rows = self
                    .warnings
                    .iter()
                    .map(|w| {
                        vec![
                            Some("Warning".to_string()),
                            Some(w.code.to_string()),
                            Some(w.message.clone()),
                        ]
                    })
                    .collect();
                Ok(Some(ResultSet {
                    columns: vec!["Level".into(), "Code".into(), "Message".into()],
                    rows,
                }))
            }
            Statement::Set(vars) => {
                self.warnings.clear();
                for (name, value) in vars {
                    self.session.insert(name, value);
                }
                Ok(None)
            }
            Statement::ExplainTable(table) => {
                self.warnings.clear();
                let t = state.table(&table)?;
                let rows = t
                    .columns
                    .iter()
                    .map(|c| {
                        let key = match c.key {
                            KeyKind::Primary => "PRI",
                            KeyKind::Unique => "UNI",
                            KeyKind::Multiple => "MUL",
                            KeyKind::None => "",
                        };
                        let nullable = if c.key == KeyKind::Primary { "NO" } else { "YES" };
                        vec![
                            Some(c.name.clone()),
                            Some(c.type_name()),
                            Some(nullable.to_string()),
                            Some(key.to_string()),
                            None,
                            Some(String::new()),
                        ]
                    })
                    .collect();
                Ok(Some(ResultSet {
                    columns: ["Field", "Type", "Null", "Key", "Default", "Extra"]
                        .iter()
                        .map(|s| s.to_string())
                        .collect(),
                    rows,
                }))
            }
            Statement::ExplainSelect(select) => {
                self.warnings.clear();
                let Statement::Select { table, .. } = *select else {
                    return Err(DriverError::new(code::ER_PARSE_ERROR, "EXPLAIN expects a SELECT"));
                };
                let t = state.table(&table)?;
                let row = vec![
                    Some("1".to_string()),
                    Some("SIMPLE".to_string()),
                    Some(table.table.clone()),
                    None,
                    Some("ALL".to_string()),
                    None,
                    None,
                    None,
                    None,
                    Some(t.rows.len().to_string()),
                    Some("100.00".to_string()),
                    None,
                ];
                Ok(Some(ResultSet {
                    columns: [
                        "id",
                        "select_type",
                        "table",
                        "partitions",
                        "type",
                        "possible_keys",
                        "key",
                        "key_len",
                        "ref",
                        "rows",
                        "filtered",
                        "Extra",
                    ]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
                    rows: vec![row],
                }))
            }
            Statement::TableSize(table) => {
                self.warnings.clear();
                let rows = match state.tables.get(&table) {
                    Some(t) => {
                        let bytes = t.data_length.unwrap_or(t.rows.len() as u64 * 64);
                        vec![vec![Some(format!("{}.00", bytes))]]
                    }
                    None => Vec::new(),
                };
                Ok(Some(ResultSet {
                    columns: vec!["round(((data_length + index_length)), 2)".into()],
                    rows,
                }))
            }
            Statement::Select { .. }
            | Statement::Insert { .. }
            | Statement::Update { .. }
            | Statement::Delete { .. } => Err(DriverError::new(
                code::ER_WRONG_ARGUMENTS,
                "this endpoint only runs data statements through prepared statements",
            )),
        }
    }

    fn warning_count(&self) -> u32 {
        self.warnings.len() as u32
    }

    fn stmt_prepare(&mut self, sql: &str) -> DriverResult<StmtId> {
        self.check(FaultPoint::Prepare)?;
        let parsed = self.parse(sql)?;
        let meta = {
            let mut state = self.server.state();
            state.stats.prepares += 1;
            validate(&state, &parsed.statement)?
        };
        self.next_stmt += 1;
        let id = self.next_stmt;
        debug!(conn_id = self.id, stmt_id = id, sql, "memory endpoint prepared statement");
        self.stmts.insert(
            id,
            Stmt {
                sql: sql.to_string(),
                parsed,
                cursor: CursorType::NoCursor,
                prefetch_rows: 1,
                params: Vec::new(),
                bound_results: None,
                pending: None,
                buffered: 0,
                meta,
            },
        );
        Ok(id)
    }

    fn stmt_attr_set(&mut self, stmt: StmtId, attr: StmtAttr) -> DriverResult<()> {
        if self.lost {
            return Err(server_gone());
        }
        let stmt = self.stmt_mut(stmt)?;
        match attr {
            StmtAttr::CursorType(cursor) => stmt.cursor = cursor,
            StmtAttr::PrefetchRows(n) => stmt.prefetch_rows = n.max(1),
        }
        Ok(())
    }

    fn stmt_param_count(&self, stmt: StmtId) -> DriverResult<usize> {
        Ok(self.stmt(stmt)?.parsed.param_count)
    }

    fn stmt_result_metadata(&self, stmt: StmtId) -> DriverResult<Option<Vec<FieldInfo>>> {
        Ok(self.stmt(stmt)?.meta.clone())
    }

    fn stmt_bind_param(&mut self, stmt: StmtId, params: &[ParamBind]) -> DriverResult<()> {
        self.check(FaultPoint::BindParam)?;
        let stmt = self.stmt_mut(stmt)?;
        stmt.params.clear();
        stmt.params.extend_from_slice(params);
        Ok(())
    }

    fn stmt_bind_result(&mut self, stmt: StmtId, results: &[ResultBuffer]) -> DriverResult<()> {
        self.check(FaultPoint::BindResult)?;
        let stmt = self.stmt_mut(stmt)?;
        let columns = stmt.meta.as_ref().map(Vec::len).ok_or_else(|| {
            DriverError::new(code::CR_NO_RESULT_SET, "Attempt to read a row while there is no result set associated with the statement")
        })?;
        if results.len() != columns {
            return Err(DriverError::new(
                code::ER_WRONG_ARGUMENTS,
                format!("Incorrect arguments to bind result: expected {} buffers, got {}", columns, results.len()),
            ));
        }
        stmt.bound_results = Some(results.len());
        Ok(())
    }

    fn stmt_execute(&mut self, stmt_id: StmtId) -> DriverResult<u64> {
        self.check(FaultPoint::Execute)?;
        let mut state = self.server.state();
        state.stats.executes += 1;
        let stmt = self.stmts.get_mut(&stmt_id).ok_or_else(unknown_stmt)?;
        state.log.push(stmt.sql.clone());
        if stmt.params.len() != stmt.parsed.param_count {
            return Err(DriverError::new(
                code::CR_PARAMS_NOT_BOUND,
                "No data supplied for parameters in prepared statement",
            ));
        }
        let params = stmt
            .params
            .iter()
            .map(|p| -> DriverResult<Option<NativeValue>> {
                if p.is_null {
                    return Ok(None);
                }
                let ft = p.field_type.unwrap_or(FieldType::Null);
                codec::decode(ft, p.unsigned, &p.buffer)
                    .map(Some)
                    .map_err(|e| DriverError::new(code::ER_WRONG_ARGUMENTS, e.to_string()))
            })
            .collect::<DriverResult<Vec<_>>>()?;

        let affected = match &stmt.parsed.statement {
            Statement::Select {
                table,
                columns,
                filters,
                ..
            } => {
                let t = state.table(table)?;
                let rows = select_rows(t, columns, filters, &params)?;
                stmt.pending = Some(rows);
                stmt.buffered = 0;
                0
            }
            Statement::Insert { table, columns } => {
                let t = state.tables.get_mut(table).ok_or_else(|| no_such_table(table))?;
                insert_row(t, columns, &params)?
            }
            Statement::Update {
                table,
                columns,
                key,
            } => {
                let t = state.tables.get_mut(table).ok_or_else(|| no_such_table(table))?;
                update_rows(t, columns, key, &params)?
            }
            Statement::Delete { table, key } => {
                let t = state.tables.get_mut(table).ok_or_else(|| no_such_table(table))?;
                delete_rows(t, key, &params)?
            }
            _ => 0,
        };
        self.warnings = std::mem::take(&mut state.pending_warnings);
        Ok(affected)
    }

    fn stmt_fetch(&mut self, stmt_id: StmtId, results: &mut [ResultBuffer]) -> DriverResult<FetchStatus> {
        self.check(FaultPoint::Fetch)?;
        let mut state = self.server.state();
        let stmt = self.stmts.get_mut(&stmt_id).ok_or_else(unknown_stmt)?;
        if stmt.bound_results != Some(results.len()) {
            return Err(DriverError::new(
                code::CR_COMMANDS_OUT_OF_SYNC,
                "Commands out of sync; you can't run this command now",
            ));
        }
        let pending = stmt.pending.as_mut().ok_or_else(|| {
            DriverError::new(
                code::CR_COMMANDS_OUT_OF_SYNC,
                "Commands out of sync; you can't run this command now",
            )
        })?;
        if stmt.buffered == 0 {
            if pending.is_empty() {
                return Ok(FetchStatus::NoData);
            }
            state.stats.fetch_round_trips += 1;
            stmt.buffered = match stmt.cursor {
                CursorType::ReadOnly => (stmt.prefetch_rows as usize).min(pending.len()),
                CursorType::NoCursor => pending.len(),
            };
        }
        let Some(row) = pending.pop_front() else {
            return Ok(FetchStatus::NoData);
        };
        stmt.buffered -= 1;

        let mut truncated = false;
        for (value, out) in row.into_iter().zip(results.iter_mut()) {
            out.data.clear();
            out.truncated = false;
            out.is_null = value.is_none();
            out.length = 0;
            let Some(value) = value else { continue };
            let value = codec::coerce(value, out.field_type, out.unsigned)
                .map_err(|e| coerce_error(&e, "result"))?;
            let mut encoded = Vec::new();
            codec::encode(&value, out.field_type, out.unsigned, &mut encoded)
                .map_err(|e| coerce_error(&e, "result"))?;
            out.length = encoded.len();
            if encoded.len() > out.buffer_length {
                encoded.truncate(out.buffer_length);
                out.truncated = true;
                truncated = true;
            }
            out.data = encoded;
        }
        Ok(if truncated {
            FetchStatus::Truncated
        } else {
            FetchStatus::Row
        })
    }

    fn stmt_reset(&mut self, stmt: StmtId) -> DriverResult<()> {
        if self.lost {
            return Err(server_gone());
        }
        let stmt = self.stmt_mut(stmt)?;
        stmt.pending = None;
        stmt.buffered = 0;
        Ok(())
    }

    fn stmt_close(&mut self, stmt: StmtId) -> DriverResult<()> {
        self.check(FaultPoint::Close)?;
        self.stmts.remove(&stmt).ok_or_else(unknown_stmt)?;
        self.server.state().stats.closes += 1;
        Ok(())
    }
}

/// Check names against the catalog and build result metadata.
fn validate(state: &ServerState, statement: &Statement) -> DriverResult<Option<Vec<FieldInfo>>> {
    match statement {
        Statement::Select {
            table,
            columns,
            filters,
            ..
        } => {
            let t = state.table(table)?;
            let mut meta = Vec::with_capacity(columns.len());
            for name in columns {
                let idx = t.column(name).ok_or_else(|| unknown_column(name, "field list"))?;
                meta.push(t.columns[idx].field_info());
            }
            for f in filters {
                t.column(&f.column)
                    .ok_or_else(|| unknown_column(&f.column, "where clause"))?;
            }
            Ok(Some(meta))
        }
        Statement::Insert { table, columns }
        | Statement::Update { table, columns, .. } => {
            let t = state.table(table)?;
            for name in columns {
                t.column(name).ok_or_else(|| unknown_column(name, "field list"))?;
            }
            if let Statement::Update { key, .. } = statement {
                t.column(key).ok_or_else(|| unknown_column(key, "where clause"))?;
            }
            Ok(None)
        }
        Statement::Delete { table, key } => {
            let t = state.table(table)?;
            t.column(key).ok_or_else(|| unknown_column(key, "where clause"))?;
            Ok(None)
        }
        _ => Err(DriverError::new(
            code::ER_WRONG_ARGUMENTS,
            "This command is not supported in the prepared statement protocol yet",
        )),
    }
}

fn coerce_error(err: &CodecError, column: &str) -> DriverError {
    match err {
        CodecError::OutOfRange { .. } => DriverError::new(
            code::ER_WARN_DATA_OUT_OF_RANGE,
            format!("Out of range value for column '{}' at row 1", column),
        ),
        _ => DriverError::new(
            code::ER_TRUNCATED_WRONG_VALUE_FOR_FIELD,
            format!("Incorrect value for column '{}' at row 1: {}", column, err),
        ),
    }
}

/// Bring a bound parameter into the column's type.
fn param_for(
    t: &Table,
    idx: usize,
    value: &Option<NativeValue>,
) -> DriverResult<Option<NativeValue>> {
    let col = &t.columns[idx];
    let Some(value) = value else {
        if col.key == KeyKind::Primary {
            return Err(DriverError::new(
                code::ER_BAD_NULL_ERROR,
                format!("Column '{}' cannot be null", col.name),
            ));
        }
        return Ok(None);
    };
    let coerced = codec::coerce(value.clone(), col.field_type, col.unsigned)
        .map_err(|e| coerce_error(&e, &col.name))?;
    let too_long = match (&coerced, col.length) {
        (NativeValue::Bytes(b), Some(limit)) => b.len() > limit as usize,
        _ => false,
    };
    if too_long {
        return Err(DriverError::new(
            code::ER_TRUNCATED_WRONG_VALUE_FOR_FIELD,
            format!("Data too long for column '{}' at row 1", col.name),
        ));
    }
    Ok(Some(coerced))
}

fn compare(a: &NativeValue, b: &NativeValue) -> Option<Ordering> {
    use NativeValue::*;
    match (a, b) {
        (Int(_) | UInt(_), Int(_) | UInt(_)) => Some(a.as_i128()?.cmp(&b.as_i128()?)),
        (Float(x), Float(y)) => x.partial_cmp(y),
        (Double(x), Double(y)) => x.partial_cmp(y),
        (Bytes(x), Bytes(y)) => Some(x.cmp(y)),
        (Time(x), Time(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn matches_filter(
    t: &Table,
    row: &MemRow,
    filter: &Filter,
    params: &[Option<NativeValue>],
) -> DriverResult<bool> {
    let idx = t
        .column(&filter.column)
        .ok_or_else(|| unknown_column(&filter.column, "where clause"))?;
    let stored = &row[idx];
    match filter.op {
        CompareOp::IsNull => return Ok(stored.is_none()),
        CompareOp::IsNotNull => return Ok(stored.is_some()),
        _ => {}
    }
    let operand = match &filter.operand {
        Some(Operand::Param(p)) => params.get(*p).cloned().flatten(),
        Some(Operand::Literal(v)) => Some(v.clone()),
        Some(Operand::Null) | None => None,
    };
    let (Some(stored), Some(operand)) = (stored, operand) else {
        return Ok(false);
    };
    let col = &t.columns[idx];
    let operand = codec::coerce(operand, col.field_type, col.unsigned)
        .map_err(|e| coerce_error(&e, &col.name))?;
    let Some(ord) = compare(stored, &operand) else {
        return Ok(false);
    };
    Ok(match filter.op {
        CompareOp::Eq => ord == Ordering::Equal,
        CompareOp::Ne => ord != Ordering::Equal,
        CompareOp::Lt => ord == Ordering::Less,
        CompareOp::Le => ord != Ordering::Greater,
        CompareOp::Gt => ord == Ordering::Greater,
        CompareOp::Ge => ord != Ordering::Less,
        CompareOp::IsNull | CompareOp::IsNotNull => false,
    })
}

fn select_rows(
    t: &Table,
    columns: &[String],
    filters: &[Filter],
    params: &[Option<NativeValue>],
) -> DriverResult<VecDeque<MemRow>> {
    let indexes = columns
        .iter()
        .map(|c| t.column(c).ok_or_else(|| unknown_column(c, "field list")))
        .collect::<DriverResult<Vec<_>>>()?;
    let mut out = VecDeque::new();
    'rows: for row in &t.rows {
        for f in filters {
            if !matches_filter(t, row, f, params)? {
                continue 'rows;
            }
        }
        out.push_back(indexes.iter().map(|&i| row[i].clone()).collect());
    }
    Ok(out)
}

fn check_unique(t: &Table, candidate: &MemRow, skip: Option<usize>) -> DriverResult<()> {
    for (idx, col) in t.columns.iter().enumerate() {
        let Some(value) = &candidate[idx] else { continue };
        if !col.is_unique() {
            continue;
        }
        let duplicate = t.rows.iter().enumerate().any(|(i, row)| {
            Some(i) != skip
                && row[idx]
                    .as_ref()
                    .is_some_and(|v| compare(v, value) == Some(Ordering::Equal))
        });
        if duplicate {
            let key = if col.key == KeyKind::Primary {
                "PRIMARY".to_string()
            } else {
                col.name.clone()
            };
            return Err(DriverError::new(
                code::ER_DUP_ENTRY,
                format!(
                    "Duplicate entry '{}' for key '{}'",
                    value.to_text(col.field_type),
                    key
                ),
            ));
        }
    }
    Ok(())
}

fn insert_row(t: &mut Table, columns: &[String], params: &[Option<NativeValue>]) -> DriverResult<u64> {
    let mut row: MemRow = vec![None; t.columns.len()];
    for (name, value) in columns.iter().zip(params) {
        let idx = t.column(name).ok_or_else(|| unknown_column(name, "field list"))?;
        row[idx] = param_for(t, idx, value)?;
    }
    for (idx, col) in t.columns.iter().enumerate() {
        if col.key == KeyKind::Primary && row[idx].is_none() {
            return Err(DriverError::new(
                code::ER_BAD_NULL_ERROR,
                format!("Field '{}' doesn't have a default value", col.name),
            ));
        }
    }
    check_unique(t, &row, None)?;
    t.rows.push(row);
    Ok(1)
}

fn key_matches(
    t: &Table,
    key: &str,
    params: &[Option<NativeValue>],
) -> DriverResult<Vec<usize>> {
    let filter = Filter {
        column: key.to_string(),
        op: CompareOp::Eq,
        operand: params.len().checked_sub(1).map(Operand::Param),
    };
    let mut out = Vec::new();
    for (i, row) in t.rows.iter().enumerate() {
        if matches_filter(t, row, &filter, params)? {
            out.push(i);
        }
    }
    Ok(out)
}

fn update_rows(
    t: &mut Table,
    columns: &[String],
    key: &str,
    params: &[Option<NativeValue>],
) -> DriverResult<u64> {
    let targets = key_matches(t, key, params)?;
    let mut affected = 0;
    for i in targets {
        let mut row = t.rows[i].clone();
        for (name, value) in columns.iter().zip(params) {
            let idx = t.column(name).ok_or_else(|| unknown_column(name, "field list"))?;
            row[idx] = param_for(t, idx, value)?;
        }
        check_unique(t, &row, Some(i))?;
        if row != t.rows[i] {
            affected += 1;
            t.rows[i] = row;
        }
    }
    Ok(affected)
}

fn delete_rows(t: &mut Table, key: &str, params: &[Option<NativeValue>]) -> DriverResult<u64> {
    let targets = key_matches(t, key, params)?;
    for &i in targets.iter().rev() {
        t.rows.remove(i);
    }
    Ok(targets.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server() -> MemoryServer {
        let server = MemoryServer::new();
        server.create_table(
            "db",
            "t",
            vec![
                MemColumn::new("id", FieldType::Long).primary(),
                MemColumn::new("name", FieldType::VarString).length(8),
            ],
        );
        for (id, name) in [(1, "a"), (2, "b"), (3, "c")] {
            server.insert_row(
                "db",
                "t",
                vec![
                    Some(NativeValue::Int(id)),
                    Some(NativeValue::Bytes(name.as_bytes().to_vec())),
                ],
            );
        }
        server
    }

    fn int_param(v: i64) -> ParamBind {
        let mut p = ParamBind {
            field_type: Some(FieldType::LongLong),
            ..ParamBind::default()
        };
        codec::encode(&NativeValue::Int(v), FieldType::LongLong, false, &mut p.buffer).unwrap();
        p
    }

    #[test]
    fn test_cursor_prefetch_round_trips() {
        let server = server();
        let mut conn = server.driver().connect(&Opts::default()).unwrap();
        let stmt = conn.stmt_prepare("SELECT `id` FROM `db`.`t`").unwrap();
        conn.stmt_attr_set(stmt, StmtAttr::CursorType(CursorType::ReadOnly))
            .unwrap();
        conn.stmt_attr_set(stmt, StmtAttr::PrefetchRows(2)).unwrap();
        let mut results = vec![ResultBuffer::new(FieldType::Long, false, 4)];
        conn.stmt_bind_result(stmt, &results).unwrap();
        conn.stmt_execute(stmt).unwrap();
        let mut n = 0;
        while conn.stmt_fetch(stmt, &mut results).unwrap() == FetchStatus::Row {
            n += 1;
        }
        assert_eq!(n, 3);
        assert_eq!(server.stats().fetch_round_trips, 2);
    }

    #[test]
    fn test_fetch_before_execute_is_out_of_sync() {
        let server = server();
        let mut conn = server.driver().connect(&Opts::default()).unwrap();
        let stmt = conn.stmt_prepare("SELECT `id` FROM `db`.`t`").unwrap();
        let mut results = vec![ResultBuffer::new(FieldType::Long, false, 4)];
        conn.stmt_bind_result(stmt, &results).unwrap();
        let err = conn.stmt_fetch(stmt, &mut results).unwrap_err();
        assert_eq!(err.code, code::CR_COMMANDS_OUT_OF_SYNC);
    }

    #[test]
    fn test_duplicate_key() {
        let server = server();
        let mut conn = server.driver().connect(&Opts::default()).unwrap();
        let stmt = conn
            .stmt_prepare("INSERT INTO `db`.`t`(`id`) VALUES (?)")
            .unwrap();
        conn.stmt_bind_param(stmt, &[int_param(2)]).unwrap();
        let err = conn.stmt_execute(stmt).unwrap_err();
        assert_eq!(err.code, code::ER_DUP_ENTRY);
        assert_eq!(server.rows("db", "t").len(), 3);
    }

    #[test]
    fn test_delete_by_key() {
        let server = server();
        let mut conn = server.driver().connect(&Opts::default()).unwrap();
        let stmt = conn
            .stmt_prepare("DELETE FROM `db`.`t` WHERE `id` = ?")
            .unwrap();
        conn.stmt_bind_param(stmt, &[int_param(2)]).unwrap();
        assert_eq!(conn.stmt_execute(stmt).unwrap(), 1);
        assert_eq!(server.rows("db", "t").len(), 2);
    }

    #[test]
    fn test_lost_connection_sticks() {
        let server = server();
        let mut conn = server.driver().connect(&Opts::default()).unwrap();
        server.inject(Fault::new(FaultPoint::Query, code::CR_SERVER_LOST, "Lost connection"));
        assert_eq!(conn.query("SHOW WARNINGS").unwrap_err().code, code::CR_SERVER_LOST);
        assert_eq!(
            conn.query("SHOW WARNINGS").unwrap_err().code,
            code::CR_SERVER_GONE_ERROR
        );
    }

    #[test]
    fn test_unknown_table_on_prepare() {
        let server = server();
        let mut conn = server.driver().connect(&Opts::default()).unwrap();
        let err = conn.stmt_prepare("SELECT `id` FROM `db`.`nope`").unwrap_err();
        assert_eq!(err.code, code::ER_NO_SUCH_TABLE);
    }
}
