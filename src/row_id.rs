//! Row-identifier protocol.
//!
//! The remote endpoint has no stable row handle, so the first column of the
//! foreign table stands in for one. UPDATE and DELETE key on it, which only
//! works when the remote column is unique and an UPDATE leaves it alone.

use std::collections::HashMap;

use tracing::debug;

use crate::classify::{Phase, escalate};
use crate::deparse::quote_ident;
use crate::error::{Error, PlanningError, Result};
use crate::plan::{ForeignTable, RemoteTable};
use crate::pool::{ConnKey, Connection};
use crate::types::{AttrNumber, Datum, HostType};

/// Attribute number of the row identifier column.
pub const ROW_ID_ATTNUM: AttrNumber = 1;

/// The column serving as row identifier of a foreign table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowIdentifier {
    pub attnum: AttrNumber,
    pub name: String,
    pub ty: HostType,
}

/// Declare the row identifier as an extra (junk) target of an UPDATE or
/// DELETE. The executor passes its pre-image to
/// [`ModifyState::exec_update`](crate::modify::ModifyState::exec_update) and
/// [`ModifyState::exec_delete`](crate::modify::ModifyState::exec_delete).
pub fn add_update_target(table: &ForeignTable) -> Result<RowIdentifier> {
    match table.desc.attr(ROW_ID_ATTNUM) {
        Some(col) if !col.dropped => Ok(RowIdentifier {
            attnum: ROW_ID_ATTNUM,
            name: col.name.clone(),
            ty: col.ty.clone(),
        }),
        _ => Err(Error::InvalidUsage(format!(
            "{} has no row identifier column",
            table.name
        ))),
    }
}

/// Validate the explicit targets of an UPDATE, in ascending order.
///
/// System columns cannot be updated remotely, and neither can the row
/// identifier.
pub fn update_target_attrs(table: &ForeignTable, updated_cols: &[AttrNumber]) -> Result<Vec<AttrNumber>> {
    let mut cols = updated_cols.to_vec();
    cols.sort_unstable();
    cols.dedup();
    for &attnum in &cols {
        if attnum <= 0 {
            return Err(Error::InvalidUsage(
                "system-column update is not supported".to_string(),
            ));
        }
        if attnum == ROW_ID_ATTNUM {
            return Err(Error::RowIdentifierChanged);
        }
        match table.desc.attr(attnum) {
            Some(col) if !col.dropped => {}
            _ => {
                return Err(Error::InvalidUsage(format!(
                    "attribute {} of {} cannot be updated",
                    attnum, table.name
                )));
            }
        }
    }
    Ok(cols)
}

/// Ask the remote endpoint whether the first column of `remote` is a
/// primary or unique key.
pub fn is_first_column_unique(conn: &Connection, remote: &RemoteTable) -> Result<bool> {
    let mut sql = String::from("EXPLAIN ");
    quote_ident(&remote.database, &mut sql);
    sql.push('.');
    quote_ident(&remote.table, &mut sql);

    let result = conn
        .with(|c| c.query(&sql))
        .map_err(|e| escalate(conn, Phase::Execute, "failed to execute the MySQL query", e))?;
    let Some(result) = result else {
        return Ok(false);
    };
    let key_idx = result.column_index("Key").unwrap_or(3);
    let key = result
        .rows
        .first()
        .and_then(|row| row.get(key_idx))
        .and_then(|v| v.as_deref());
    Ok(matches!(key, Some("PRI" | "UNI")))
}

/// Fail unless the pre-image and post-image of the row identifier are the
/// same bytes. Two NULLs are equal.
pub fn verify_unchanged(old: Option<&Datum>, new: Option<&Datum>) -> Result<()> {
    let same = match (old, new) {
        (Some(old), Some(new)) => old.image() == new.image(),
        (None, None) => true,
        _ => false,
    };
    if same {
        Ok(())
    } else {
        Err(Error::RowIdentifierChanged)
    }
}

/// Row identifiers resolved during the planning of one statement.
///
/// The uniqueness check runs once per remote table; later insert, update and
/// delete plans for it reuse the result.
#[derive(Debug, Default)]
pub struct RowIdentifierCache {
    resolved: HashMap<(ConnKey, RemoteTable), RowIdentifier>,
}

impl RowIdentifierCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The row identifier of `table`, verifying uniqueness on first use.
    pub fn resolve(&mut self, conn: &Connection, table: &ForeignTable) -> Result<&RowIdentifier> {
        let key = (conn.key().clone(), table.remote.clone());
        if !self.resolved.contains_key(&key) {
            let row_id = add_update_target(table)?;
            if !is_first_column_unique(conn, &table.remote)? {
                return Err(PlanningError::NoUsableRowIdentifier {
                    table: table.remote.to_string(),
                }
                .into());
            }
            debug!(table = %table.remote, column = %row_id.name, "row identifier resolved");
            self.resolved.insert(key.clone(), row_id);
        }
        self.resolved
            .get(&key)
            .ok_or_else(|| Error::Internal("row identifier cache lost an entry".to_string()))
    }

    pub fn len(&self) -> usize {
        self.resolved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty()
    }
}
