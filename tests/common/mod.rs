#![allow(dead_code)]

use std::sync::Arc;

use zero_mysql_fdw::driver::FieldType;
use zero_mysql_fdw::driver::codec::NativeValue;
use zero_mysql_fdw::driver::memory::{MemColumn, MemoryServer};
use zero_mysql_fdw::plan::{ForeignTable, RemoteTable, ScanRequest};
use zero_mysql_fdw::scan::{ExecMode, ExprContext};
use zero_mysql_fdw::types::{Column, Datum, HostType, TupleDesc};
use zero_mysql_fdw::{MysqlFdw, Opts};

/// `shop.items(id INT PRIMARY KEY, name VARCHAR, qty INT)` with five rows.
pub fn items_server() -> MemoryServer {
    let server = MemoryServer::new();
    server.create_table(
        "shop",
        "items",
        vec![
            MemColumn::new("id", FieldType::Long).primary(),
            MemColumn::new("name", FieldType::VarString),
            MemColumn::new("qty", FieldType::Long),
        ],
    );
    for (id, name, qty) in [
        (1, "apple", 10),
        (2, "pear", 0),
        (3, "plum", 7),
        (4, "fig", 3),
        (5, "kiwi", 12),
    ] {
        server.insert_row(
            "shop",
            "items",
            vec![
                Some(NativeValue::Int(id)),
                Some(NativeValue::Bytes(name.as_bytes().to_vec())),
                Some(NativeValue::Int(qty)),
            ],
        );
    }
    server
}

pub fn items_table() -> ForeignTable {
    ForeignTable::new(
        "items",
        RemoteTable::new("shop", "items"),
        TupleDesc::new(vec![
            Column::new("id", HostType::Int4),
            Column::new("name", HostType::Text),
            Column::new("qty", HostType::Int4),
        ]),
        Opts::default(),
    )
}

pub fn fdw(server: &MemoryServer) -> MysqlFdw {
    MysqlFdw::new(Arc::new(server.driver()))
}

/// Run a scan to completion and collect every row.
pub fn collect(
    fdw: &MysqlFdw,
    table: &ForeignTable,
    req: &ScanRequest,
    ecxt: &ExprContext,
) -> Vec<Vec<Option<Datum>>> {
    let plan = fdw.plan_scan(table, req).unwrap();
    let mut scan = fdw.begin_scan(table, &plan, ExecMode::Normal).unwrap();
    let mut rows = Vec::new();
    while let Some(row) = scan.iterate(ecxt).unwrap() {
        rows.push(row.values.clone());
    }
    fdw.end_scan(scan);
    rows
}

pub fn int(v: i32) -> Option<Datum> {
    Some(Datum::Int4(v))
}

pub fn text(v: &str) -> Option<Datum> {
    Some(Datum::Text(v.to_string()))
}
