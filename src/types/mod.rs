//! Host-side type model: column types, values and tuple descriptors.
//!
//! Attribute numbers are 1-based like the host executor's. Attribute `0`
//! and negative numbers denote system columns, which never reach the
//! remote endpoint.

use std::fmt;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};
use rust_decimal::Decimal;

/// 1-based column position in a host tuple.
pub type AttrNumber = i16;

/// Host column type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostType {
    Bool,
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Numeric,
    Text,
    /// `character varying(n)`, unbounded when `None`
    Varchar(Option<u32>),
    /// `character(n)`
    Bpchar(Option<u32>),
    Bytea,
    Json,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    /// User-defined enumeration with its labels in sort order
    Enum { name: String, labels: Vec<String> },
    #[cfg(feature = "with-uuid")]
    Uuid,
}

impl HostType {
    /// Whether values are variable-length (stored "toasted" by the host).
    pub fn is_varlena(&self) -> bool {
        matches!(
            self,
            HostType::Numeric
                | HostType::Text
                | HostType::Varchar(_)
                | HostType::Bpchar(_)
                | HostType::Bytea
                | HostType::Json
        )
    }

    pub fn is_textual(&self) -> bool {
        matches!(
            self,
            HostType::Text
                | HostType::Varchar(_)
                | HostType::Bpchar(_)
                | HostType::Json
                | HostType::Enum { .. }
        )
    }
}

impl fmt::Display for HostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostType::Bool => f.write_str("boolean"),
            HostType::Int2 => f.write_str("smallint"),
            HostType::Int4 => f.write_str("integer"),
            HostType::Int8 => f.write_str("bigint"),
            HostType::Float4 => f.write_str("real"),
            HostType::Float8 => f.write_str("double precision"),
            HostType::Numeric => f.write_str("numeric"),
            HostType::Text => f.write_str("text"),
            HostType::Varchar(None) => f.write_str("character varying"),
            HostType::Varchar(Some(n)) => write!(f, "character varying({})", n),
            HostType::Bpchar(None) => f.write_str("character"),
            HostType::Bpchar(Some(n)) => write!(f, "character({})", n),
            HostType::Bytea => f.write_str("bytea"),
            HostType::Json => f.write_str("json"),
            HostType::Date => f.write_str("date"),
            HostType::Time => f.write_str("time without time zone"),
            HostType::Timestamp => f.write_str("timestamp without time zone"),
            HostType::TimestampTz => f.write_str("timestamp with time zone"),
            HostType::Enum { name, .. } => f.write_str(name),
            #[cfg(feature = "with-uuid")]
            HostType::Uuid => f.write_str("uuid"),
        }
    }
}

/// A non-null host value.
#[derive(Debug, Clone, PartialEq)]
pub enum Datum {
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Float4(f32),
    Float8(f64),
    Numeric(Decimal),
    /// Text, varchar, bpchar, json and enum labels
    Text(String),
    Bytea(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    #[cfg(feature = "with-uuid")]
    Uuid(uuid::Uuid),
}

impl Datum {
    /// The value's in-memory byte image.
    ///
    /// Variable-length values yield their full content bytes, so two images
    /// compare equal exactly when the host would store identical bytes.
    pub fn image(&self) -> Vec<u8> {
        match self {
            Datum::Bool(v) => vec![u8::from(*v)],
            Datum::Int2(v) => v.to_ne_bytes().to_vec(),
            Datum::Int4(v) => v.to_ne_bytes().to_vec(),
            Datum::Int8(v) => v.to_ne_bytes().to_vec(),
            Datum::Float4(v) => v.to_ne_bytes().to_vec(),
            Datum::Float8(v) => v.to_ne_bytes().to_vec(),
            Datum::Numeric(v) => v.serialize().to_vec(),
            Datum::Text(v) => v.as_bytes().to_vec(),
            Datum::Bytea(v) => v.clone(),
            Datum::Date(v) => v.num_days_from_ce().to_ne_bytes().to_vec(),
            Datum::Time(v) => {
                let micros = v.num_seconds_from_midnight() as i64 * 1_000_000
                    + (v.nanosecond() / 1_000) as i64;
                micros.to_ne_bytes().to_vec()
            }
            Datum::Timestamp(v) => v.and_utc().timestamp_micros().to_ne_bytes().to_vec(),
            Datum::TimestampTz(v) => v.timestamp_micros().to_ne_bytes().to_vec(),
            #[cfg(feature = "with-uuid")]
            Datum::Uuid(v) => v.as_bytes().to_vec(),
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Datum::Bool(_) => "boolean",
            Datum::Int2(_) => "smallint",
            Datum::Int4(_) => "integer",
            Datum::Int8(_) => "bigint",
            Datum::Float4(_) => "real",
            Datum::Float8(_) => "double precision",
            Datum::Numeric(_) => "numeric",
            Datum::Text(_) => "text",
            Datum::Bytea(_) => "bytea",
            Datum::Date(_) => "date",
            Datum::Time(_) => "time",
            Datum::Timestamp(_) => "timestamp",
            Datum::TimestampTz(_) => "timestamptz",
            #[cfg(feature = "with-uuid")]
            Datum::Uuid(_) => "uuid",
        }
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Datum::Bool(v) => write!(f, "{}", v),
            Datum::Int2(v) => write!(f, "{}", v),
            Datum::Int4(v) => write!(f, "{}", v),
            Datum::Int8(v) => write!(f, "{}", v),
            Datum::Float4(v) => write!(f, "{}", v),
            Datum::Float8(v) => write!(f, "{}", v),
            Datum::Numeric(v) => write!(f, "{}", v),
            Datum::Text(v) => f.write_str(v),
            Datum::Bytea(v) => {
                f.write_str("\\x")?;
                for b in v {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
            Datum::Date(v) => write!(f, "{}", v),
            Datum::Time(v) => write!(f, "{}", v),
            Datum::Timestamp(v) => write!(f, "{}", v),
            Datum::TimestampTz(v) => write!(f, "{}", v),
            #[cfg(feature = "with-uuid")]
            Datum::Uuid(v) => write!(f, "{}", v),
        }
    }
}

/// Column of a host relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub ty: HostType,
    /// Dropped columns keep their attribute number but hold no data
    pub dropped: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: HostType) -> Self {
        Self {
            name: name.into(),
            ty,
            dropped: false,
        }
    }

    #[must_use]
    pub fn dropped(mut self) -> Self {
        self.dropped = true;
        self
    }
}

/// Ordered column list of a host relation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TupleDesc {
    columns: Vec<Column>,
}

impl TupleDesc {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    /// Number of attributes, dropped ones included.
    pub fn natts(&self) -> usize {
        self.columns.len()
    }

    /// Column by 1-based attribute number.
    pub fn attr(&self, attnum: AttrNumber) -> Option<&Column> {
        let idx = usize::try_from(attnum).ok()?.checked_sub(1)?;
        self.columns.get(idx)
    }

    /// Attribute numbers paired with their columns.
    pub fn iter(&self) -> impl Iterator<Item = (AttrNumber, &Column)> {
        self.columns
            .iter()
            .enumerate()
            .map(|(i, c)| ((i + 1) as AttrNumber, c))
    }

    /// Attribute numbers of the non-dropped columns, in order.
    pub fn live_attrs(&self) -> Vec<AttrNumber> {
        self.iter()
            .filter(|(_, c)| !c.dropped)
            .map(|(attnum, _)| attnum)
            .collect()
    }
}

/// One host row: a slot per attribute, `None` being NULL.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tuple {
    pub values: Vec<Option<Datum>>,
}

impl Tuple {
    pub fn new(values: Vec<Option<Datum>>) -> Self {
        Self { values }
    }

    /// All-NULL row sized for `desc`.
    pub fn nulls(desc: &TupleDesc) -> Self {
        Self {
            values: vec![None; desc.natts()],
        }
    }

    pub fn get(&self, attnum: AttrNumber) -> Option<&Datum> {
        let idx = usize::try_from(attnum).ok()?.checked_sub(1)?;
        self.values.get(idx)?.as_ref()
    }

    /// Store into a slot; out-of-range attribute numbers are ignored.
    pub fn set(&mut self, attnum: AttrNumber, value: Option<Datum>) {
        let Some(idx) = usize::try_from(attnum).ok().and_then(|a| a.checked_sub(1)) else {
            return;
        };
        if let Some(slot) = self.values.get_mut(idx) {
            *slot = value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attr_numbers_are_one_based() {
        let desc = TupleDesc::new(vec![
            Column::new("id", HostType::Int4),
            Column::new("gone", HostType::Text).dropped(),
            Column::new("name", HostType::Text),
        ]);
        assert_eq!(desc.attr(1).map(|c| c.name.as_str()), Some("id"));
        assert!(desc.attr(0).is_none());
        assert!(desc.attr(-1).is_none());
        assert_eq!(desc.live_attrs(), vec![1, 3]);
    }

    #[test]
    fn test_image_distinguishes_numeric_scale() {
        let a = Datum::Numeric(Decimal::new(10, 1));
        let b = Datum::Numeric(Decimal::new(100, 2));
        assert_ne!(a.image(), b.image());
        assert_eq!(
            Datum::Text("x".into()).image(),
            Datum::Text("x".into()).image()
        );
    }

    #[test]
    fn test_tuple_set_get() {
        let desc = TupleDesc::new(vec![
            Column::new("a", HostType::Int4),
            Column::new("b", HostType::Int4),
        ]);
        let mut t = Tuple::nulls(&desc);
        t.set(2, Some(Datum::Int4(7)));
        t.set(9, Some(Datum::Int4(1)));
        assert_eq!(t.get(2), Some(&Datum::Int4(7)));
        assert_eq!(t.get(1), None);
    }
}
