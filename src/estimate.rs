//! Size and cost estimates for foreign scans.

use tracing::debug;

use crate::classify::{Phase, escalate};
use crate::deparse::{Deparser, backslash_escapes, quote_literal};
use crate::error::{Error, Result};
use crate::opts::Opts;
use crate::plan::{ForeignTable, Qual, RemoteTable, ScanRequest};
use crate::pool::Connection;

/// Row count assumed when the remote endpoint is not asked.
pub const DEFAULT_NUM_ROWS: f64 = 1000.0;

/// Page size used to turn the remote table size into a page count.
pub const BLOCK_SIZE: u64 = 4096;

/// Startup cost of a scan on a server on this machine.
pub const LOCAL_STARTUP_COST: f64 = 10.0;

/// Startup cost of a scan on a remote machine.
pub const REMOTE_STARTUP_COST: f64 = 25.0;

/// Estimated costs of the single foreign scan path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathCosts {
    pub rows: f64,
    pub startup: f64,
    pub total: f64,
}

/// Estimate the rows a scan returns.
///
/// With `use_remote_estimate` the endpoint's `EXPLAIN` output is consulted;
/// filters that need runtime parameters cannot be explained and are left out.
/// `conn` is only used in that case.
pub fn rel_size(
    deparser: &dyn Deparser,
    conn: Option<&Connection>,
    table: &ForeignTable,
    req: &ScanRequest,
) -> Result<f64> {
    let conn = match conn {
        Some(conn) if table.opts.use_remote_estimate => conn,
        _ => return Ok(DEFAULT_NUM_ROWS),
    };

    let quals: Vec<Qual> = req.quals.iter().filter(|q| q.is_constant()).cloned().collect();
    let select = deparser.build_select(table, &req.attrs_used, &quals, req.tlist.as_deref())?;
    let sql = format!("EXPLAIN {}", select.sql);

    let result = conn
        .with(|c| c.query(&sql))
        .map_err(|e| escalate(conn, Phase::Execute, "failed to execute the MySQL query", e))?;

    let mut rows = 0.0;
    let mut filtered = 0.0;
    if let Some(result) = result {
        if let Some(row) = result.rows.first() {
            for (name, value) in result.columns.iter().zip(row) {
                let Some(value) = value else { continue };
                match name.as_str() {
                    "rows" => rows = value.trim().parse().unwrap_or(0.0),
                    "filtered" => filtered = value.trim().parse().unwrap_or(0.0),
                    _ => {}
                }
            }
        }
    }

    let estimate = if rows > 0.0 {
        ((rows + 1.0) * filtered) / 100.0
    } else {
        DEFAULT_NUM_ROWS
    };
    debug!(table = %table.name, rows, filtered, estimate, "remote row estimate");
    Ok(estimate)
}

/// Costs of scanning `rows` rows from the server in `opts`.
pub fn path_costs(opts: &Opts, rows: f64) -> PathCosts {
    let startup = if opts.is_local() {
        LOCAL_STARTUP_COST
    } else {
        REMOTE_STARTUP_COST
    };
    PathCosts {
        rows,
        startup,
        total: rows + startup,
    }
}

/// Page count of a remote table, from its data and index length.
pub fn analyze_pages(conn: &Connection, remote: &RemoteTable) -> Result<u64> {
    let mut sql = String::from(
        "SELECT round(((data_length + index_length)), 2) FROM information_schema.TABLES WHERE table_schema = ",
    );
    let escapes = conn.sql_mode().is_none_or(|mode| backslash_escapes(&mode));
    quote_literal(&remote.database, escapes, &mut sql);
    sql.push_str(" AND table_name = ");
    quote_literal(&remote.table, escapes, &mut sql);

    let result = conn
        .with(|c| c.query(&sql))
        .map_err(|e| escalate(conn, Phase::Execute, "failed to execute the MySQL query", e))?;
    let size = result
        .as_ref()
        .and_then(|r| r.rows.first())
        .ok_or_else(|| Error::TableNotFound(remote.to_string()))?
        .first()
        .and_then(|v| v.as_deref())
        .and_then(|v| v.trim().parse::<f64>().ok())
        .unwrap_or(0.0);
    let pages = (size / BLOCK_SIZE as f64) as u64;
    debug!(table = %remote, size, pages, "analyzed remote table size");
    Ok(pages)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_costs() {
        let local = path_costs(&Opts::default(), 1000.0);
        assert_eq!(local.startup, 10.0);
        assert_eq!(local.total, 1010.0);

        let remote = Opts {
            host: "db.example.com".into(),
            ..Opts::default()
        };
        let costs = path_costs(&remote, 5.0);
        assert_eq!(costs.startup, 25.0);
        assert_eq!(costs.total, 30.0);

        let socket = Opts {
            host: "db.example.com".into(),
            socket: Some("/run/mysqld/mysqld.sock".into()),
            ..Opts::default()
        };
        assert_eq!(path_costs(&socket, 0.0).startup, 10.0);
    }

    mod with_connection {
        use std::sync::Arc;

        use super::*;
        use crate::deparse::MysqlDeparser;
        use crate::driver::FieldType;
        use crate::driver::codec::NativeValue;
        use crate::driver::memory::{MemColumn, MemoryServer};
        use crate::plan::{CompareOp, ParamExpr};
        use crate::pool::ConnectionCache;
        use crate::types::{Column, HostType, TupleDesc};

        fn setup(rows: i64) -> (MemoryServer, ConnectionCache) {
            let server = MemoryServer::new();
            server.create_table("db", "t", vec![MemColumn::new("id", FieldType::Long).primary()]);
            for id in 0..rows {
                server.insert_row("db", "t", vec![Some(NativeValue::Int(id))]);
            }
            let cache = ConnectionCache::new(Arc::new(server.driver()));
            (server, cache)
        }

        fn table(use_remote_estimate: bool) -> ForeignTable {
            ForeignTable::new(
                "t",
                RemoteTable::new("db", "t"),
                TupleDesc::new(vec![Column::new("id", HostType::Int4)]),
                Opts {
                    use_remote_estimate,
                    ..Opts::default()
                },
            )
        }

        #[test]
        fn test_remote_estimate() {
            let (server, cache) = setup(9);
            let conn = cache.acquire(&Opts::default()).unwrap();
            let req = ScanRequest::new([1]).with_quals(vec![
                Qual::Compare {
                    attnum: 1,
                    op: CompareOp::Gt,
                    operand: ParamExpr::Const(Some(crate::types::Datum::Int4(2))),
                },
                Qual::Compare {
                    attnum: 1,
                    op: CompareOp::Lt,
                    operand: ParamExpr::Param {
                        id: 0,
                        ty: HostType::Int4,
                    },
                },
            ]);
            let rows = rel_size(&MysqlDeparser, Some(&conn), &table(true), &req).unwrap();
            assert_eq!(rows, 10.0);
            let log = server.statement_log();
            assert_eq!(
                log.last().unwrap(),
                "EXPLAIN SELECT `id` FROM `db`.`t` WHERE (`id` > 2)"
            );
        }

        #[test]
        fn test_default_estimate() {
            let (server, cache) = setup(0);
            let conn = cache.acquire(&Opts::default()).unwrap();
            let req = ScanRequest::new([1]);
            // Empty table: the remote reports zero rows.
            assert_eq!(
                rel_size(&MysqlDeparser, Some(&conn), &table(true), &req).unwrap(),
                DEFAULT_NUM_ROWS
            );
            let before = server.stats().queries;
            assert_eq!(
                rel_size(&MysqlDeparser, Some(&conn), &table(false), &req).unwrap(),
                DEFAULT_NUM_ROWS
            );
            assert_eq!(server.stats().queries, before);
        }

        #[test]
        fn test_analyze_pages() {
            let (server, cache) = setup(1);
            server.set_data_length("db", "t", 3 * BLOCK_SIZE + 100);
            let conn = cache.acquire(&Opts::default()).unwrap();
            assert_eq!(analyze_pages(&conn, &RemoteTable::new("db", "t")).unwrap(), 3);

            let err = analyze_pages(&conn, &RemoteTable::new("db", "missing")).unwrap_err();
            assert!(matches!(err, Error::TableNotFound(_)));
            assert_eq!(err.to_string(), "relation db.missing does not exist");
        }

        #[test]
        fn test_analyze_pages_follows_session_sql_mode() {
            let (server, cache) = setup(0);
            server.create_table("db", r"a\b", vec![MemColumn::new("id", FieldType::Long).primary()]);
            server.set_data_length("db", r"a\b", 2 * BLOCK_SIZE);
            let remote = RemoteTable::new("db", r"a\b");

            let conn = cache.acquire(&Opts::default()).unwrap();
            assert_eq!(analyze_pages(&conn, &remote).unwrap(), 2);
            assert!(server.statement_log().last().unwrap().ends_with(r"table_name = 'a\\b'"));

            let opts = Opts {
                sql_mode: "TRADITIONAL,NO_BACKSLASH_ESCAPES".into(),
                ..Opts::default()
            };
            let conn = cache.acquire(&opts).unwrap();
            assert_eq!(analyze_pages(&conn, &remote).unwrap(), 2);
            assert!(server.statement_log().last().unwrap().ends_with(r"table_name = 'a\b'"));
        }
    }
}
