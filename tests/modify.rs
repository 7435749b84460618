//! Foreign inserts, updates and deletes against the in-memory endpoint.

mod common;

use common::{collect, fdw, int, items_server, items_table, text};
use zero_mysql_fdw::driver::FieldType;
use zero_mysql_fdw::driver::codec::NativeValue;
use zero_mysql_fdw::driver::memory::MemColumn;
use zero_mysql_fdw::plan::{CmdKind, ForeignTable, ModifyRequest, RemoteTable, ScanRequest};
use zero_mysql_fdw::row_id::RowIdentifierCache;
use zero_mysql_fdw::scan::{ExecMode, ExprContext};
use zero_mysql_fdw::types::{Column, Datum, HostType, Tuple, TupleDesc};
use zero_mysql_fdw::{Error, Opts, PlanningError};

#[test]
fn test_insert_then_scan() {
    let server = items_server();
    let fdw = fdw(&server);
    let table = items_table();

    let plan = fdw
        .plan_modify(&mut RowIdentifierCache::new(), &table, &ModifyRequest::insert())
        .unwrap();
    assert_eq!(plan.target_attrs, vec![1, 2, 3]);
    assert_eq!(
        plan.sql,
        "INSERT INTO `shop`.`items`(`id`, `name`, `qty`) VALUES (?, ?, ?)"
    );

    let mut state = fdw.begin_modify(&table, &plan, ExecMode::Normal).unwrap().unwrap();
    let row = Tuple::new(vec![int(6), text("lime's"), None]);
    assert_eq!(state.exec_insert(&row).unwrap(), 1);
    fdw.end_modify(Some(state));

    let rows = collect(&fdw, &table, &ScanRequest::new([1, 2, 3]), &ExprContext::new());
    assert_eq!(rows.len(), 6);
    assert_eq!(rows[5], vec![int(6), text("lime's"), None]);
}

#[test]
fn test_update_sends_assigned_columns() {
    let server = items_server();
    let fdw = fdw(&server);
    let table = items_table();

    let plan = fdw
        .plan_modify(&mut RowIdentifierCache::new(), &table, &ModifyRequest::update([3]))
        .unwrap();
    assert_eq!(plan.target_attrs, vec![1, 3]);
    assert_eq!(plan.sql, "UPDATE `shop`.`items` SET `qty` = ? WHERE `id` = ?");

    let mut state = fdw.begin_modify(&table, &plan, ExecMode::Normal).unwrap().unwrap();
    let new = Tuple::new(vec![int(3), text("plum"), int(8)]);
    assert_eq!(state.exec_update(&new, Some(&Datum::Int4(3))).unwrap(), 1);
    fdw.end_modify(Some(state));

    assert_eq!(
        server.rows("shop", "items")[2],
        vec![
            Some(NativeValue::Int(3)),
            Some(NativeValue::Bytes(b"plum".to_vec())),
            Some(NativeValue::Int(8)),
        ]
    );
}

#[test]
fn test_update_with_trigger_sends_every_column() {
    let server = items_server();
    let fdw = fdw(&server);
    let table = items_table().with_before_row_update_trigger();

    let plan = fdw
        .plan_modify(&mut RowIdentifierCache::new(), &table, &ModifyRequest::update([3]))
        .unwrap();
    assert_eq!(plan.target_attrs, vec![1, 2, 3]);
    assert_eq!(
        plan.sql,
        "UPDATE `shop`.`items` SET `name` = ?, `qty` = ? WHERE `id` = ?"
    );

    let mut state = fdw.begin_modify(&table, &plan, ExecMode::Normal).unwrap().unwrap();
    // A trigger may rewrite columns the statement never assigned.
    let new = Tuple::new(vec![int(2), text("nashi"), int(4)]);
    assert_eq!(state.exec_update(&new, Some(&Datum::Int4(2))).unwrap(), 1);
    fdw.end_modify(Some(state));

    let rows = collect(&fdw, &table, &ScanRequest::new([1, 2, 3]), &ExprContext::new());
    assert_eq!(rows[1], vec![int(2), text("nashi"), int(4)]);
}

#[test]
fn test_update_of_row_identifier_rejected_at_plan_time() {
    let server = items_server();
    let fdw = fdw(&server);
    let err = fdw
        .plan_modify(&mut RowIdentifierCache::new(), &items_table(), &ModifyRequest::update([1, 3]))
        .unwrap_err();
    assert!(matches!(err, Error::RowIdentifierChanged));
}

#[test]
fn test_changed_row_identifier_leaves_table_untouched() {
    let server = items_server();
    let fdw = fdw(&server);
    let table = items_table();
    let before = server.rows("shop", "items");

    let plan = fdw
        .plan_modify(&mut RowIdentifierCache::new(), &table, &ModifyRequest::update([2]))
        .unwrap();
    let mut state = fdw.begin_modify(&table, &plan, ExecMode::Normal).unwrap().unwrap();
    let executes = server.stats().executes;

    let new = Tuple::new(vec![int(2), text("apple"), int(10)]);
    let err = state.exec_update(&new, Some(&Datum::Int4(1))).unwrap_err();
    assert!(matches!(err, Error::RowIdentifierChanged));
    assert_eq!(err.to_string(), "row identifier column update is not supported");
    assert_eq!(server.stats().executes, executes);
    assert_eq!(server.rows("shop", "items"), before);
    fdw.end_modify(Some(state));
}

#[test]
fn test_delete_scanned_rows() {
    let server = items_server();
    let fdw = fdw(&server);
    let table = items_table();

    let scan_plan = fdw
        .plan_scan(&table, &ScanRequest::new([1, 3]).target_of(CmdKind::Delete))
        .unwrap();
    assert!(scan_plan.sql.ends_with(" FOR UPDATE"));
    let plan = fdw
        .plan_modify(&mut RowIdentifierCache::new(), &table, &ModifyRequest::delete())
        .unwrap();
    assert_eq!(plan.target_attrs, vec![1]);
    assert_eq!(plan.sql, "DELETE FROM `shop`.`items` WHERE `id` = ?");

    // Collect first: deleting while the cursor is open is not modeled.
    let doomed: Vec<Datum> = collect(&fdw, &table, &ScanRequest::new([1, 3]), &ExprContext::new())
        .into_iter()
        .filter(|row| row[2] == int(0) || row[2] == int(3))
        .filter_map(|row| row[0].clone())
        .collect();
    assert_eq!(doomed, vec![Datum::Int4(2), Datum::Int4(4)]);

    let mut state = fdw.begin_modify(&table, &plan, ExecMode::Normal).unwrap().unwrap();
    for id in &doomed {
        assert_eq!(state.exec_delete(Some(id)).unwrap(), 1);
    }
    assert_eq!(state.exec_delete(Some(&Datum::Int4(42))).unwrap(), 0);
    fdw.end_modify(Some(state));

    let ids: Vec<_> = collect(&fdw, &table, &ScanRequest::new([1]), &ExprContext::new())
        .into_iter()
        .map(|row| row[0].clone())
        .collect();
    assert_eq!(ids, vec![int(1), int(3), int(5)]);
}

#[test]
fn test_first_column_must_be_unique() {
    let server = items_server();
    server.create_table(
        "shop",
        "log",
        vec![
            MemColumn::new("at", FieldType::DateTime).indexed(),
            MemColumn::new("line", FieldType::VarString),
        ],
    );
    let fdw = fdw(&server);
    let table = ForeignTable::new(
        "log",
        RemoteTable::new("shop", "log"),
        TupleDesc::new(vec![
            Column::new("at", HostType::Timestamp),
            Column::new("line", HostType::Text),
        ]),
        Opts::default(),
    );

    for req in [ModifyRequest::insert(), ModifyRequest::update([2]), ModifyRequest::delete()] {
        let err = fdw
            .plan_modify(&mut RowIdentifierCache::new(), &table, &req)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Planning(PlanningError::NoUsableRowIdentifier { .. })
        ));
        assert_eq!(
            err.to_string(),
            "first column of remote table shop.log must be unique for INSERT/UPDATE/DELETE operation"
        );
    }
    assert_eq!(server.stats().prepares, 0);
}

#[test]
fn test_row_identifier_resolved_once_per_statement() {
    let server = items_server();
    let fdw = fdw(&server);
    let table = items_table();
    let mut row_ids = RowIdentifierCache::new();
    fdw.plan_modify(&mut row_ids, &table, &ModifyRequest::insert()).unwrap();
    fdw.plan_modify(&mut row_ids, &table, &ModifyRequest::delete()).unwrap();
    assert_eq!(row_ids.len(), 1);
    let explains = server
        .statement_log()
        .iter()
        .filter(|sql| sql.starts_with("EXPLAIN"))
        .count();
    assert_eq!(explains, 1);
}

#[test]
fn test_returning_rejected() {
    let server = items_server();
    let fdw = fdw(&server);
    let err = fdw
        .plan_modify(
            &mut RowIdentifierCache::new(),
            &items_table(),
            &ModifyRequest::insert().returning(),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Planning(PlanningError::UnsupportedReturning)
    ));
    assert_eq!(server.stats().prepares, 0);
}

#[test]
fn test_explain_only_modify_prepares_nothing() {
    let server = items_server();
    let fdw = fdw(&server);
    let table = items_table();
    let plan = fdw
        .plan_modify(&mut RowIdentifierCache::new(), &table, &ModifyRequest::delete())
        .unwrap();
    let state = fdw.begin_modify(&table, &plan, ExecMode::ExplainOnly).unwrap();
    assert!(state.is_none());
    fdw.end_modify(state);
    assert_eq!(server.stats().prepares, 0);
}

#[test]
fn test_copy_routing_unsupported() {
    let server = items_server();
    let fdw = fdw(&server);
    let err = fdw.begin_foreign_insert(&items_table()).unwrap_err();
    assert!(matches!(err, Error::Unsupported(_)));
    assert_eq!(server.stats().connects, 0);
}

#[test]
fn test_update_target_column() {
    let server = items_server();
    let fdw = fdw(&server);
    let row_id = fdw.add_update_target(&items_table()).unwrap();
    assert_eq!(row_id.attnum, 1);
    assert_eq!(row_id.name, "id");
    assert_eq!(row_id.ty, HostType::Int4);
}
