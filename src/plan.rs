//! Remote operation descriptors and their construction at plan time.
//!
//! A [`ScanPlan`] or [`ModifyPlan`] is immutable once built. The executor
//! hands it to [`ScanState::open`](crate::scan::ScanState::open) or
//! [`ModifyState::open`](crate::modify::ModifyState::open).

use tracing::debug;

use crate::deparse::Deparser;
use crate::error::{Error, PlanningError, Result};
use crate::opts::Opts;
use crate::pool::Connection;
use crate::row_id::{self, ROW_ID_ATTNUM, RowIdentifier, RowIdentifierCache};
use crate::types::{AttrNumber, Datum, HostType, TupleDesc};

/// Database and table name on the remote endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteTable {
    pub database: String,
    pub table: String,
}

impl RemoteTable {
    pub fn new(database: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            table: table.into(),
        }
    }
}

impl std::fmt::Display for RemoteTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.database, self.table)
    }
}

/// A host relation backed by a remote table.
#[derive(Debug, Clone)]
pub struct ForeignTable {
    /// Host relation name
    pub name: String,
    pub remote: RemoteTable,
    pub desc: TupleDesc,
    /// The host runs a BEFORE ROW UPDATE trigger on this relation
    pub before_row_update_trigger: bool,
    /// Server and user mapping options
    pub opts: Opts,
}

impl ForeignTable {
    pub fn new(name: impl Into<String>, remote: RemoteTable, desc: TupleDesc, opts: Opts) -> Self {
        Self {
            name: name.into(),
            remote,
            desc,
            before_row_update_trigger: false,
            opts,
        }
    }

    #[must_use]
    pub fn with_before_row_update_trigger(mut self) -> Self {
        self.before_row_update_trigger = true;
        self
    }
}

/// Host command kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmdKind {
    Select,
    Insert,
    Update,
    Delete,
}

/// Comparison operator of a pushed-down filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn as_sql(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }
}

/// Right-hand side of a pushed-down comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamExpr {
    /// Known at plan time; rendered into the statement text
    Const(Option<Datum>),
    /// Host parameter evaluated when the scan first executes
    Param { id: usize, ty: HostType },
}

/// A filter the remote endpoint evaluates.
#[derive(Debug, Clone, PartialEq)]
pub enum Qual {
    Compare {
        attnum: AttrNumber,
        op: CompareOp,
        operand: ParamExpr,
    },
    IsNull(AttrNumber),
    IsNotNull(AttrNumber),
}

impl Qual {
    /// Whether the filter needs no runtime parameter.
    pub fn is_constant(&self) -> bool {
        !matches!(
            self,
            Qual::Compare {
                operand: ParamExpr::Param { .. },
                ..
            }
        )
    }
}

/// A runtime parameter of a remote query, bound to one `?`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteParam {
    /// Host parameter id
    pub id: usize,
    pub ty: HostType,
}

/// What the host planner wants from a foreign scan.
#[derive(Debug, Clone, Default)]
pub struct ScanRequest {
    /// Attributes referenced by the query
    pub attrs_used: Vec<AttrNumber>,
    /// Filters safe to evaluate remotely
    pub quals: Vec<Qual>,
    /// Projected target list; output slots follow it when set
    pub tlist: Option<Vec<AttrNumber>>,
    /// Set when the scanned relation is the target of this command
    pub result_relation_of: Option<CmdKind>,
}

impl ScanRequest {
    pub fn new(attrs_used: impl Into<Vec<AttrNumber>>) -> Self {
        Self {
            attrs_used: attrs_used.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_quals(mut self, quals: Vec<Qual>) -> Self {
        self.quals = quals;
        self
    }

    #[must_use]
    pub fn with_tlist(mut self, tlist: Vec<AttrNumber>) -> Self {
        self.tlist = Some(tlist);
        self
    }

    #[must_use]
    pub fn target_of(mut self, command: CmdKind) -> Self {
        self.result_relation_of = Some(command);
        self
    }

    fn locks_rows(&self) -> bool {
        matches!(
            self.result_relation_of,
            Some(CmdKind::Update | CmdKind::Delete)
        )
    }
}

/// Remote operation descriptor of a scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanPlan {
    pub sql: String,
    /// Output positions filled by the result columns, in column order
    pub retrieved_attrs: Vec<AttrNumber>,
    /// Projected target list the output positions refer to
    pub tlist: Option<Vec<AttrNumber>>,
    /// Runtime parameters, in placeholder order
    pub params: Vec<RemoteParam>,
}

/// Build the scan descriptor for `table`.
///
/// The scanned relation of an UPDATE or DELETE is read `FOR UPDATE`.
pub fn plan_scan(deparser: &dyn Deparser, table: &ForeignTable, req: &ScanRequest) -> Result<ScanPlan> {
    let select = deparser.build_select(table, &req.attrs_used, &req.quals, req.tlist.as_deref())?;
    let mut sql = select.sql;
    if req.locks_rows() {
        sql.push_str(" FOR UPDATE");
    }
    debug!(table = %table.name, sql = %sql, params = select.params.len(), "planned foreign scan");
    Ok(ScanPlan {
        sql,
        retrieved_attrs: select.retrieved_attrs,
        tlist: req.tlist.clone(),
        params: select.params,
    })
}

/// What the host planner wants from a foreign modify.
#[derive(Debug, Clone)]
pub struct ModifyRequest {
    pub command: CmdKind,
    /// Columns explicitly assigned by an UPDATE
    pub updated_cols: Vec<AttrNumber>,
    /// The command has a RETURNING list
    pub returning: bool,
}

impl ModifyRequest {
    pub fn insert() -> Self {
        Self {
            command: CmdKind::Insert,
            updated_cols: Vec::new(),
            returning: false,
        }
    }

    pub fn update(updated_cols: impl Into<Vec<AttrNumber>>) -> Self {
        Self {
            command: CmdKind::Update,
            updated_cols: updated_cols.into(),
            returning: false,
        }
    }

    pub fn delete() -> Self {
        Self {
            command: CmdKind::Delete,
            updated_cols: Vec::new(),
            returning: false,
        }
    }

    #[must_use]
    pub fn returning(mut self) -> Self {
        self.returning = true;
        self
    }
}

/// Remote operation descriptor of an insert, update or delete.
#[derive(Debug, Clone, PartialEq)]
pub struct ModifyPlan {
    pub command: CmdKind,
    pub sql: String,
    /// Attributes transmitted per tuple. For UPDATE the row identifier is
    /// listed first but bound last, as the key of the `WHERE` clause.
    pub target_attrs: Vec<AttrNumber>,
    pub row_id: RowIdentifier,
}

/// Build the modify descriptor for `table`.
///
/// Fails before anything is prepared when the remote table's first column is
/// not unique, or when the command has a RETURNING list.
pub fn plan_modify(
    deparser: &dyn Deparser,
    row_ids: &mut RowIdentifierCache,
    conn: &Connection,
    table: &ForeignTable,
    req: &ModifyRequest,
) -> Result<ModifyPlan> {
    let row_id = row_ids.resolve(conn, table)?.clone();

    let (target_attrs, sql) = match req.command {
        CmdKind::Insert => {
            let attrs = table.desc.live_attrs();
            let sql = deparser.build_insert(table, &attrs)?;
            (attrs, sql)
        }
        CmdKind::Update => {
            // Validated even when every column is sent.
            let targets = row_id::update_target_attrs(table, &req.updated_cols)?;
            let attrs = if table.before_row_update_trigger {
                table.desc.live_attrs()
            } else {
                let mut attrs = Vec::with_capacity(targets.len() + 1);
                attrs.push(ROW_ID_ATTNUM);
                attrs.extend(targets);
                attrs
            };
            let sql = deparser.build_update(table, &attrs)?;
            (attrs, sql)
        }
        CmdKind::Delete => (vec![ROW_ID_ATTNUM], deparser.build_delete(table)?),
        CmdKind::Select => {
            return Err(Error::InvalidUsage(
                "SELECT is not a modify command".to_string(),
            ));
        }
    };

    if req.returning {
        return Err(PlanningError::UnsupportedReturning.into());
    }

    debug!(table = %table.name, command = ?req.command, sql = %sql, "planned foreign modify");
    Ok(ModifyPlan {
        command: req.command,
        sql,
        target_attrs,
        row_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deparse::MysqlDeparser;
    use crate::types::Column;

    fn table() -> ForeignTable {
        ForeignTable::new(
            "t",
            RemoteTable::new("db", "t"),
            TupleDesc::new(vec![
                Column::new("id", HostType::Int4),
                Column::new("a", HostType::Text),
            ]),
            Opts::default(),
        )
    }

    #[test]
    fn test_plan_scan_for_update() {
        let req = ScanRequest::new([1, 2]).target_of(CmdKind::Delete);
        let plan = plan_scan(&MysqlDeparser, &table(), &req).unwrap();
        assert_eq!(plan.sql, "SELECT `id`, `a` FROM `db`.`t` FOR UPDATE");
        assert_eq!(plan.retrieved_attrs, vec![1, 2]);

        let req = ScanRequest::new([2]).target_of(CmdKind::Insert);
        let plan = plan_scan(&MysqlDeparser, &table(), &req).unwrap();
        assert_eq!(plan.sql, "SELECT `a` FROM `db`.`t`");
    }

    #[test]
    fn test_constant_quals() {
        let param = Qual::Compare {
            attnum: 1,
            op: CompareOp::Eq,
            operand: ParamExpr::Param {
                id: 0,
                ty: HostType::Int4,
            },
        };
        let constant = Qual::Compare {
            attnum: 1,
            op: CompareOp::Lt,
            operand: ParamExpr::Const(Some(Datum::Int4(3))),
        };
        assert!(!param.is_constant());
        assert!(constant.is_constant());
        assert!(Qual::IsNull(2).is_constant());
    }
}
