//! A foreign-data bridge from a row-at-a-time query executor to MySQL.
//!
//! # Features
//!
//! - **Prepared statements only**: scans run as read-only server cursors with
//!   row prefetching, modifies as one prepared statement per table
//! - **Lossless marshaling**: host values bind in their natural driver layout;
//!   result columns convert value by value and fail instead of truncating
//! - **Row identifiers**: UPDATE and DELETE key on the table's unique first
//!   column
//! - **Pluggable driver**: the client library sits behind [`driver::Driver`];
//!   `driver::memory` (feature `memory`) is an in-process endpoint for tests
//!
//! # Example
//!
//! Against the in-process endpoint of the `memory` feature:
//!
//! ```
//! # #[cfg(feature = "memory")]
//! # fn main() -> zero_mysql_fdw::Result<()> {
//! use std::sync::Arc;
//!
//! use zero_mysql_fdw::driver::FieldType;
//! use zero_mysql_fdw::driver::memory::{MemColumn, MemoryServer};
//! use zero_mysql_fdw::plan::{ForeignTable, RemoteTable, ScanRequest};
//! use zero_mysql_fdw::scan::{ExecMode, ExprContext};
//! use zero_mysql_fdw::types::{Column, HostType, TupleDesc};
//! use zero_mysql_fdw::{MysqlFdw, Opts};
//!
//! let server = MemoryServer::new();
//! server.create_table("shop", "items", vec![
//!     MemColumn::new("id", FieldType::Long).primary(),
//!     MemColumn::new("name", FieldType::VarString),
//! ]);
//!
//! let fdw = MysqlFdw::new(Arc::new(server.driver()));
//! let table = ForeignTable::new(
//!     "items",
//!     RemoteTable::new("shop", "items"),
//!     TupleDesc::new(vec![
//!         Column::new("id", HostType::Int4),
//!         Column::new("name", HostType::Text),
//!     ]),
//!     Opts::default(),
//! );
//!
//! let plan = fdw.plan_scan(&table, &ScanRequest::new([1, 2]))?;
//! let mut scan = fdw.begin_scan(&table, &plan, ExecMode::Normal)?;
//! while let Some(row) = scan.iterate(&ExprContext::new())? {
//!     println!("{:?}", row);
//! }
//! fdw.end_scan(scan);
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "memory"))]
//! # fn main() {}
//! ```

pub mod classify;
pub mod conversion;
pub mod deparse;
pub mod driver;
pub mod error;
pub mod estimate;
pub mod fdw;
pub mod modify;
pub mod opts;
pub mod plan;
pub mod pool;
pub mod row_id;
pub mod scan;
mod scratch;
pub mod types;

pub use error::{DriverFailure, Error, ErrorClass, PlanningError, Result};
pub use fdw::MysqlFdw;
pub use modify::ModifyState;
pub use opts::Opts;
pub use plan::{ForeignTable, ModifyPlan, RemoteTable, ScanPlan};
pub use pool::{Connection, ConnectionCache};
pub use scan::{ExecMode, ExprContext, ScanState};
pub use types::{Datum, HostType, Tuple, TupleDesc};
