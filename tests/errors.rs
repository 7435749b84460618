//! Failure classification, warning escalation and conversion errors.

mod common;

use std::sync::Arc;

use common::{fdw, int, items_server, items_table, text};
use zero_mysql_fdw::driver::FieldType;
use zero_mysql_fdw::driver::codec::NativeValue;
use zero_mysql_fdw::driver::memory::{Fault, FaultPoint, MemColumn};
use zero_mysql_fdw::driver::types::code;
use zero_mysql_fdw::plan::{ForeignTable, ModifyRequest, RemoteTable, ScanRequest};
use zero_mysql_fdw::row_id::RowIdentifierCache;
use zero_mysql_fdw::scan::{ExecMode, ExprContext};
use zero_mysql_fdw::types::{Column, HostType, Tuple, TupleDesc};
use zero_mysql_fdw::{Error, ErrorClass, Opts};

#[test]
fn test_connection_lost_during_scan() {
    let server = items_server();
    let fdw = fdw(&server);
    let table = items_table();
    let plan = fdw.plan_scan(&table, &ScanRequest::new([1])).unwrap();
    let mut scan = fdw.begin_scan(&table, &plan, ExecMode::Normal).unwrap();
    let old_id = scan.connection().id();

    server.inject(Fault::new(FaultPoint::Execute, code::CR_SERVER_LOST, "Lost connection to MySQL server during query"));
    let err = scan.iterate(&ExprContext::new()).unwrap_err();
    let Error::Execute(failure) = &err else {
        panic!("expected an execute failure, got {:?}", err);
    };
    assert_eq!(failure.class, ErrorClass::ConnectionFatal);
    assert_eq!(failure.code, code::CR_SERVER_LOST);
    assert!(err.is_connection_broken());
    assert_eq!(
        err.to_string(),
        "failed to execute the MySQL query: \nLost connection to MySQL server during query"
    );
    fdw.end_scan(scan);

    let conn = fdw.connections().acquire(&table.opts).unwrap();
    assert_ne!(conn.id(), old_id);
    assert!(!conn.is_broken());
    assert_eq!(server.stats().connects, 2);
}

#[test]
fn test_operation_failure_keeps_connection() {
    let server = items_server();
    let fdw = fdw(&server);
    let table = ForeignTable::new(
        "ghost",
        RemoteTable::new("shop", "ghost"),
        TupleDesc::new(vec![Column::new("id", HostType::Int4)]),
        Opts::default(),
    );
    let plan = fdw.plan_scan(&table, &ScanRequest::new([1])).unwrap();
    let err = fdw.begin_scan(&table, &plan, ExecMode::Normal).unwrap_err();
    let Error::Prepare(failure) = &err else {
        panic!("expected a prepare failure, got {:?}", err);
    };
    assert_eq!(failure.class, ErrorClass::OperationFatal);
    assert_eq!(failure.code, code::ER_NO_SUCH_TABLE);
    assert!(!err.is_connection_broken());

    let items = items_table();
    let rows = common::collect(&fdw, &items, &ScanRequest::new([1]), &ExprContext::new());
    assert_eq!(rows.len(), 5);
    assert_eq!(server.stats().connects, 1);
}

#[test]
fn test_connect_failure() {
    let server = items_server();
    server.inject(Fault::new(FaultPoint::Connect, code::CR_CONN_HOST_ERROR, "Can't connect to MySQL server on '127.0.0.1'"));
    let fdw = fdw(&server);
    let table = items_table();
    let plan = fdw.plan_scan(&table, &ScanRequest::new([1])).unwrap();
    let err = fdw.begin_scan(&table, &plan, ExecMode::Normal).unwrap_err();
    assert!(matches!(err, Error::Connect(_)));
    assert_eq!(err.driver_code(), Some(code::CR_CONN_HOST_ERROR));
    assert!(fdw.connections().is_empty());
}

#[test]
fn test_escalated_warning_fails_scan() {
    let server = items_server();
    let fdw = fdw(&server);
    let table = items_table();
    let plan = fdw.plan_scan(&table, &ScanRequest::new([1])).unwrap();
    let mut scan = fdw.begin_scan(&table, &plan, ExecMode::Normal).unwrap();

    server.push_warning_on_execute(code::ER_DIVISION_BY_ZERO, "Division by 0");
    let err = scan.iterate(&ExprContext::new()).unwrap_err();
    assert!(matches!(err, Error::WarningEscalation(ref w) if w == "Division by 0"));
    assert!(!scan.executed());
    assert!(!err.is_connection_broken());
    fdw.end_scan(scan);
}

#[test]
fn test_unlisted_warning_is_ignored() {
    let server = items_server();
    let fdw = fdw(&server);
    let table = items_table();
    server.push_warning_on_execute(code::ER_TRUNCATED_WRONG_VALUE_FOR_FIELD, "Data truncated for column 'name'");
    let rows = common::collect(&fdw, &table, &ScanRequest::new([1]), &ExprContext::new());
    assert_eq!(rows.len(), 5);
}

#[test]
fn test_escalated_warning_fails_modify() {
    let server = items_server();
    let fdw = fdw(&server);
    let table = items_table();
    let plan = fdw
        .plan_modify(&mut RowIdentifierCache::new(), &table, &ModifyRequest::insert())
        .unwrap();
    let mut state = fdw.begin_modify(&table, &plan, ExecMode::Normal).unwrap().unwrap();
    server.push_warning_on_execute(code::ER_DIVISION_BY_ZERO, "Division by 0");
    let err = state
        .exec_insert(&Tuple::new(vec![int(9), text("yuzu"), int(1)]))
        .unwrap_err();
    assert!(matches!(err, Error::WarningEscalation(_)));
    fdw.end_modify(Some(state));
}

#[test]
fn test_duplicate_key_is_operation_fatal() {
    let server = items_server();
    let fdw = fdw(&server);
    let table = items_table();
    let plan = fdw
        .plan_modify(&mut RowIdentifierCache::new(), &table, &ModifyRequest::insert())
        .unwrap();
    let mut state = fdw.begin_modify(&table, &plan, ExecMode::Normal).unwrap().unwrap();
    let err = state
        .exec_insert(&Tuple::new(vec![int(1), text("dup"), int(1)]))
        .unwrap_err();
    assert_eq!(err.driver_code(), Some(code::ER_DUP_ENTRY));
    assert!(!err.is_connection_broken());
    assert!(err.to_string().starts_with("failed to execute the MySQL query: \nDuplicate entry '1'"));

    // The statement stays usable.
    assert_eq!(
        state.exec_insert(&Tuple::new(vec![int(7), text("date"), int(2)])).unwrap(),
        1
    );
    fdw.end_modify(Some(state));
}

#[test]
fn test_out_of_range_result_value() {
    let server = items_server();
    server.create_table(
        "shop",
        "big",
        vec![
            MemColumn::new("id", FieldType::Long).primary(),
            MemColumn::new("n", FieldType::LongLong),
        ],
    );
    server.insert_row(
        "shop",
        "big",
        vec![Some(NativeValue::Int(1)), Some(NativeValue::Int(i64::from(i32::MAX) + 1))],
    );
    let fdw = fdw(&server);
    let table = ForeignTable::new(
        "big",
        RemoteTable::new("shop", "big"),
        TupleDesc::new(vec![
            Column::new("id", HostType::Int4),
            Column::new("n", HostType::Int4),
        ]),
        Opts::default(),
    );
    let plan = fdw.plan_scan(&table, &ScanRequest::new([1, 2])).unwrap();
    let mut scan = fdw.begin_scan(&table, &plan, ExecMode::Normal).unwrap();
    let err = scan.iterate(&ExprContext::new()).unwrap_err();
    assert!(matches!(err, Error::TypeConversion(_)));
    fdw.end_scan(scan);
}

#[test]
fn test_analyze_missing_table() {
    let server = items_server();
    let fdw = fdw(&server);
    let table = ForeignTable::new(
        "ghost",
        RemoteTable::new("shop", "ghost"),
        TupleDesc::new(vec![Column::new("id", HostType::Int4)]),
        Opts::default(),
    );
    let err = fdw.analyze(&table).unwrap_err();
    assert_eq!(err.to_string(), "relation shop.ghost does not exist");
}

#[test]
fn test_cleanup_drops_connections() {
    let server = items_server();
    let fdw = zero_mysql_fdw::MysqlFdw::new(Arc::new(server.driver()));
    fdw.analyze(&items_table()).unwrap();
    assert_eq!(fdw.connections().len(), 1);
    fdw.cleanup();
    fdw.analyze(&items_table()).unwrap();
    assert_eq!(server.stats().connects, 2);
}
