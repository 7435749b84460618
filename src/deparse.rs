//! SQL text generation for remote statements.
//!
//! The bridge treats the returned text as opaque. Only plan-time constants
//! are rendered inline; runtime parameters become `?` placeholders, in the
//! order reported back in [`SelectSql::params`].

use std::fmt::Write;

use crate::error::{Error, Result};
use crate::plan::{ForeignTable, ParamExpr, Qual, RemoteParam, RemoteTable};
use crate::row_id::ROW_ID_ATTNUM;
use crate::types::{AttrNumber, Datum};

/// A deparsed `SELECT`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectSql {
    pub sql: String,
    /// Output positions filled by the result columns, in column order
    pub retrieved_attrs: Vec<AttrNumber>,
    /// Runtime parameters, one per `?`
    pub params: Vec<RemoteParam>,
}

/// Builds remote statement text.
pub trait Deparser: Send + Sync {
    /// `SELECT` of the used columns filtered by `quals`.
    ///
    /// With a projected target list the result columns follow `tlist` and
    /// retrieved attributes number its entries from 1. Otherwise they are
    /// the used attribute numbers in ascending order.
    fn build_select(
        &self,
        table: &ForeignTable,
        attrs_used: &[AttrNumber],
        quals: &[Qual],
        tlist: Option<&[AttrNumber]>,
    ) -> Result<SelectSql>;

    /// `INSERT` of `target_attrs`, one `?` each.
    fn build_insert(&self, table: &ForeignTable, target_attrs: &[AttrNumber]) -> Result<String>;

    /// `UPDATE` of `target_attrs` keyed by the row identifier.
    ///
    /// The row identifier itself is never assigned; its `?` comes last.
    fn build_update(&self, table: &ForeignTable, target_attrs: &[AttrNumber]) -> Result<String>;

    /// `DELETE` keyed by the row identifier.
    fn build_delete(&self, table: &ForeignTable) -> Result<String>;
}

/// Deparser for the MySQL dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct MysqlDeparser;

/// Append a backtick-quoted identifier.
pub fn quote_ident(name: &str, out: &mut String) {
    out.push('`');
    for c in name.chars() {
        if c == '`' {
            out.push('`');
        }
        out.push(c);
    }
    out.push('`');
}

/// Returns false when `sql_mode` contains `NO_BACKSLASH_ESCAPES`, which makes
/// a backslash an ordinary character inside string literals.
pub fn backslash_escapes(sql_mode: &str) -> bool {
    !sql_mode
        .split(',')
        .any(|mode| mode.trim().eq_ignore_ascii_case("NO_BACKSLASH_ESCAPES"))
}

/// Append a single-quoted string literal.
///
/// Quotes are always doubled. Backslashes are doubled only when the session
/// treats them as escapes; see [`backslash_escapes`].
pub fn quote_literal(text: &str, backslash_escapes: bool, out: &mut String) {
    out.push('\'');
    for c in text.chars() {
        match c {
            '\'' => out.push_str("''"),
            '\\' if backslash_escapes => out.push_str("\\\\"),
            c => out.push(c),
        }
    }
    out.push('\'');
}

fn qualified_name(remote: &RemoteTable, out: &mut String) {
    quote_ident(&remote.database, out);
    out.push('.');
    quote_ident(&remote.table, out);
}

/// Append `value` as a SQL literal.
pub fn literal(value: &Datum, backslash_escapes: bool, out: &mut String) -> Result<()> {
    let written = match value {
        Datum::Bool(v) => write!(out, "{}", u8::from(*v)),
        Datum::Int2(v) => write!(out, "{}", v),
        Datum::Int4(v) => write!(out, "{}", v),
        Datum::Int8(v) => write!(out, "{}", v),
        Datum::Float4(v) => {
            if !v.is_finite() {
                return Err(Error::TypeConversion(format!("{} has no MySQL literal", v)));
            }
            write!(out, "{}", v)
        }
        Datum::Float8(v) => {
            if !v.is_finite() {
                return Err(Error::TypeConversion(format!("{} has no MySQL literal", v)));
            }
            write!(out, "{}", v)
        }
        Datum::Numeric(v) => write!(out, "{}", v),
        Datum::Text(v) => {
            quote_literal(v, backslash_escapes, out);
            Ok(())
        }
        Datum::Bytea(v) => {
            out.push_str("X'");
            v.iter()
                .try_for_each(|b| write!(out, "{:02x}", b))
                .and_then(|()| out.write_char('\''))
        }
        Datum::Date(v) => write!(out, "'{}'", v.format("%Y-%m-%d")),
        Datum::Time(v) => write!(out, "'{}'", v.format("%H:%M:%S%.6f")),
        Datum::Timestamp(v) => write!(out, "'{}'", v.format("%Y-%m-%d %H:%M:%S%.6f")),
        Datum::TimestampTz(v) => write!(out, "'{}'", v.format("%Y-%m-%d %H:%M:%S%.6f")),
        #[cfg(feature = "with-uuid")]
        Datum::Uuid(v) => write!(out, "'{}'", v.hyphenated()),
    };
    written.map_err(|e| Error::Internal(format!("failed to render literal: {}", e)))
}

fn column_name<'a>(table: &'a ForeignTable, attnum: AttrNumber) -> Result<&'a str> {
    match table.desc.attr(attnum) {
        Some(col) if !col.dropped => Ok(&col.name),
        _ => Err(Error::InvalidUsage(format!(
            "attribute {} of {} is not a remote column",
            attnum, table.name
        ))),
    }
}

impl MysqlDeparser {
    fn where_clause(
        &self,
        table: &ForeignTable,
        quals: &[Qual],
        sql: &mut String,
        params: &mut Vec<RemoteParam>,
    ) -> Result<()> {
        let escapes = backslash_escapes(&table.opts.sql_mode);
        for (i, qual) in quals.iter().enumerate() {
            sql.push_str(if i == 0 { " WHERE (" } else { " AND (" });
            match qual {
                Qual::IsNull(attnum) => {
                    quote_ident(column_name(table, *attnum)?, sql);
                    sql.push_str(" IS NULL");
                }
                Qual::IsNotNull(attnum) => {
                    quote_ident(column_name(table, *attnum)?, sql);
                    sql.push_str(" IS NOT NULL");
                }
                Qual::Compare {
                    attnum,
                    op,
                    operand,
                } => {
                    quote_ident(column_name(table, *attnum)?, sql);
                    sql.push(' ');
                    sql.push_str(op.as_sql());
                    sql.push(' ');
                    match operand {
                        ParamExpr::Const(Some(value)) => literal(value, escapes, sql)?,
                        ParamExpr::Const(None) => sql.push_str("NULL"),
                        ParamExpr::Param { id, ty } => {
                            sql.push('?');
                            params.push(RemoteParam {
                                id: *id,
                                ty: ty.clone(),
                            });
                        }
                    }
                }
            }
            sql.push(')');
        }
        Ok(())
    }
}

impl Deparser for MysqlDeparser {
    fn build_select(
        &self,
        table: &ForeignTable,
        attrs_used: &[AttrNumber],
        quals: &[Qual],
        tlist: Option<&[AttrNumber]>,
    ) -> Result<SelectSql> {
        let mut columns: Vec<(AttrNumber, &str)> = Vec::new();
        match tlist {
            Some(tlist) => {
                for (pos, attnum) in tlist.iter().enumerate() {
                    columns.push(((pos + 1) as AttrNumber, column_name(table, *attnum)?));
                }
            }
            None => {
                for (attnum, col) in table.desc.iter() {
                    if !col.dropped && attrs_used.contains(&attnum) {
                        columns.push((attnum, &col.name));
                    }
                }
                // A result set needs at least one column; fetch the row
                // identifier when nothing else is referenced.
                if columns.is_empty() {
                    columns.push((ROW_ID_ATTNUM, column_name(table, ROW_ID_ATTNUM)?));
                }
            }
        }

        let mut sql = String::from("SELECT ");
        for (i, (_, name)) in columns.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            quote_ident(name, &mut sql);
        }
        sql.push_str(" FROM ");
        qualified_name(&table.remote, &mut sql);

        let mut params = Vec::new();
        self.where_clause(table, quals, &mut sql, &mut params)?;

        Ok(SelectSql {
            sql,
            retrieved_attrs: columns.into_iter().map(|(attnum, _)| attnum).collect(),
            params,
        })
    }

    fn build_insert(&self, table: &ForeignTable, target_attrs: &[AttrNumber]) -> Result<String> {
        if target_attrs.is_empty() {
            return Err(Error::InvalidUsage(format!(
                "INSERT into {} has no columns",
                table.name
            )));
        }
        let mut sql = String::from("INSERT INTO ");
        qualified_name(&table.remote, &mut sql);
        sql.push('(');
        for (i, attnum) in target_attrs.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            quote_ident(column_name(table, *attnum)?, &mut sql);
        }
        sql.push_str(") VALUES (");
        for i in 0..target_attrs.len() {
            if i > 0 {
                sql.push_str(", ");
            }
            sql.push('?');
        }
        sql.push(')');
        Ok(sql)
    }

    fn build_update(&self, table: &ForeignTable, target_attrs: &[AttrNumber]) -> Result<String> {
        let mut sql = String::from("UPDATE ");
        qualified_name(&table.remote, &mut sql);
        sql.push_str(" SET ");
        let mut first = true;
        for attnum in target_attrs.iter().filter(|a| **a != ROW_ID_ATTNUM) {
            if !first {
                sql.push_str(", ");
            }
            first = false;
            quote_ident(column_name(table, *attnum)?, &mut sql);
            sql.push_str(" = ?");
        }
        if first {
            return Err(Error::InvalidUsage(format!(
                "UPDATE of {} assigns no columns besides the row identifier",
                table.name
            )));
        }
        sql.push_str(" WHERE ");
        quote_ident(column_name(table, ROW_ID_ATTNUM)?, &mut sql);
        sql.push_str(" = ?");
        Ok(sql)
    }

    fn build_delete(&self, table: &ForeignTable) -> Result<String> {
        let mut sql = String::from("DELETE FROM ");
        qualified_name(&table.remote, &mut sql);
        sql.push_str(" WHERE ");
        quote_ident(column_name(table, ROW_ID_ATTNUM)?, &mut sql);
        sql.push_str(" = ?");
        Ok(sql)
    }
}
