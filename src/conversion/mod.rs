//! Value marshaling between host values and driver buffers.
//!
//! Parameters are bound in the natural driver layout of their host type.
//! Result buffers are bound in the remote column's own layout and converted
//! into the host column type value by value, so a narrowing that would lose
//! data fails with [`Error::TypeConversion`] instead of being truncated.
//!
//! Per-type conversions live in submodules behind [`ToDriverValue`] and
//! [`FromDriverValue`]; the free functions here dispatch on [`HostType`].

mod bytes;
mod chrono;
mod decimal;
mod primitives;
mod string;
#[cfg(feature = "with-uuid")]
mod uuid;

use crate::driver::codec::{self, NativeValue};
use crate::driver::{FieldInfo, FieldType, ParamBind, ResultBuffer};
use crate::error::{Error, Result};
use crate::types::{Datum, HostType};

/// Trait for encoding host values into driver parameter buffers.
pub trait ToDriverValue {
    /// The driver layout this value binds as, and whether it is unsigned.
    fn natural_type(&self) -> (FieldType, bool);

    /// Append the value to `buf` in the layout of [`natural_type`](Self::natural_type).
    fn encode(&self, buf: &mut Vec<u8>) -> Result<()>;
}

/// Trait for decoding driver result buffers into host values.
///
/// `field_type` and `unsigned` describe the layout `bytes` was written in.
/// Implementations accept every layout they can convert without losing
/// information and reject the rest.
pub trait FromDriverValue: Sized {
    fn from_driver(field_type: FieldType, unsigned: bool, bytes: &[u8]) -> Result<Self>;
}

/// Decode `bytes` into the driver's own value representation.
pub(crate) fn native(field_type: FieldType, unsigned: bool, bytes: &[u8]) -> Result<NativeValue> {
    Ok(codec::decode(field_type, unsigned, bytes)?)
}

/// Driver name of a column layout, used in error messages.
pub(crate) fn driver_type_name(field_type: FieldType, unsigned: bool) -> String {
    let name = format!("{:?}", field_type).to_uppercase();
    if unsigned {
        format!("MySQL {} UNSIGNED", name)
    } else {
        format!("MySQL {}", name)
    }
}

/// Driver parameter layout for a host column type.
pub fn param_type(ty: &HostType) -> (FieldType, bool) {
    match ty {
        HostType::Bool => (FieldType::Tiny, false),
        HostType::Int2 => (FieldType::Short, false),
        HostType::Int4 => (FieldType::Long, false),
        HostType::Int8 => (FieldType::LongLong, false),
        HostType::Float4 => (FieldType::Float, false),
        HostType::Float8 => (FieldType::Double, false),
        HostType::Numeric => (FieldType::NewDecimal, false),
        HostType::Text
        | HostType::Varchar(_)
        | HostType::Bpchar(_)
        | HostType::Enum { .. } => (FieldType::VarString, false),
        HostType::Json => (FieldType::Json, false),
        HostType::Bytea => (FieldType::Blob, false),
        HostType::Date => (FieldType::Date, false),
        HostType::Time => (FieldType::Time, false),
        HostType::Timestamp => (FieldType::DateTime, false),
        HostType::TimestampTz => (FieldType::Timestamp, false),
        #[cfg(feature = "with-uuid")]
        HostType::Uuid => (FieldType::VarString, false),
    }
}

fn check_datum(value: &Datum, ty: &HostType) -> Result<()> {
    let ok = match (value, ty) {
        (Datum::Bool(_), HostType::Bool)
        | (Datum::Int2(_), HostType::Int2)
        | (Datum::Int4(_), HostType::Int4)
        | (Datum::Int8(_), HostType::Int8)
        | (Datum::Float4(_), HostType::Float4)
        | (Datum::Float8(_), HostType::Float8)
        | (Datum::Numeric(_), HostType::Numeric)
        | (Datum::Bytea(_), HostType::Bytea)
        | (Datum::Date(_), HostType::Date)
        | (Datum::Time(_), HostType::Time)
        | (Datum::Timestamp(_), HostType::Timestamp)
        | (Datum::TimestampTz(_), HostType::TimestampTz) => true,
        (Datum::Text(_), t) => t.is_textual(),
        #[cfg(feature = "with-uuid")]
        (Datum::Uuid(_), HostType::Uuid) => true,
        _ => false,
    };
    if ok {
        Ok(())
    } else {
        Err(Error::conversion(value.kind(), ty))
    }
}

/// Fill a parameter slot from a host value.
///
/// `None` binds SQL NULL.
pub fn to_param(value: Option<&Datum>, ty: &HostType, bind: &mut ParamBind) -> Result<()> {
    let Some(value) = value else {
        bind.null();
        return Ok(());
    };
    check_datum(value, ty)?;
    bind.reset();
    let (field_type, unsigned) = match value {
        Datum::Bool(v) => {
            v.encode(&mut bind.buffer)?;
            v.natural_type()
        }
        Datum::Int2(v) => {
            v.encode(&mut bind.buffer)?;
            v.natural_type()
        }
        Datum::Int4(v) => {
            v.encode(&mut bind.buffer)?;
            v.natural_type()
        }
        Datum::Int8(v) => {
            v.encode(&mut bind.buffer)?;
            v.natural_type()
        }
        Datum::Float4(v) => {
            v.encode(&mut bind.buffer)?;
            v.natural_type()
        }
        Datum::Float8(v) => {
            v.encode(&mut bind.buffer)?;
            v.natural_type()
        }
        Datum::Numeric(v) => {
            v.encode(&mut bind.buffer)?;
            v.natural_type()
        }
        Datum::Text(v) => {
            v.encode(&mut bind.buffer)?;
            param_type(ty)
        }
        Datum::Bytea(v) => {
            v.encode(&mut bind.buffer)?;
            v.natural_type()
        }
        Datum::Date(v) => {
            v.encode(&mut bind.buffer)?;
            v.natural_type()
        }
        Datum::Time(v) => {
            v.encode(&mut bind.buffer)?;
            v.natural_type()
        }
        Datum::Timestamp(v) => {
            v.encode(&mut bind.buffer)?;
            v.natural_type()
        }
        Datum::TimestampTz(v) => {
            v.encode(&mut bind.buffer)?;
            v.natural_type()
        }
        #[cfg(feature = "with-uuid")]
        Datum::Uuid(v) => {
            v.encode(&mut bind.buffer)?;
            v.natural_type()
        }
    };
    bind.field_type = Some(field_type);
    bind.unsigned = unsigned;
    Ok(())
}

/// The host type a remote column maps to without loss.
///
/// Unsigned integers widen to the next larger signed type, `BIGINT
/// UNSIGNED` to numeric. ENUM and SET map to text, non-binary blobs too.
pub fn natural_host_type(field: &FieldInfo) -> Result<HostType> {
    let unsigned = field.is_unsigned();
    Ok(match field.field_type {
        FieldType::Tiny | FieldType::Year => HostType::Int2,
        FieldType::Short if unsigned => HostType::Int4,
        FieldType::Short => HostType::Int2,
        FieldType::Int24 => HostType::Int4,
        FieldType::Long if unsigned => HostType::Int8,
        FieldType::Long => HostType::Int4,
        FieldType::LongLong if unsigned => HostType::Numeric,
        FieldType::LongLong => HostType::Int8,
        FieldType::Float => HostType::Float4,
        FieldType::Double => HostType::Float8,
        FieldType::Decimal | FieldType::NewDecimal => HostType::Numeric,
        FieldType::VarChar | FieldType::VarString | FieldType::String => HostType::Text,
        FieldType::Enum | FieldType::Set => HostType::Text,
        FieldType::Json => HostType::Json,
        FieldType::TinyBlob | FieldType::MediumBlob | FieldType::LongBlob | FieldType::Blob
            if !field.is_binary() =>
        {
            HostType::Text
        }
        FieldType::TinyBlob
        | FieldType::MediumBlob
        | FieldType::LongBlob
        | FieldType::Blob
        | FieldType::Bit => HostType::Bytea,
        FieldType::Date => HostType::Date,
        FieldType::Time => HostType::Time,
        FieldType::DateTime | FieldType::Timestamp => HostType::Timestamp,
        FieldType::Null | FieldType::Geometry => {
            return Err(Error::TypeConversion(format!(
                "column \"{}\" has unmapped type {}",
                field.name,
                driver_type_name(field.field_type, unsigned)
            )));
        }
    })
}

/// Whether values of `natural` can be read into a `ty` column at all.
/// Range and precision are checked per value.
fn compatible(ty: &HostType, natural: &HostType) -> bool {
    use HostType::*;
    let numeric = |t: &HostType| matches!(t, Bool | Int2 | Int4 | Int8 | Float4 | Float8 | Numeric);
    let temporal = |t: &HostType| matches!(t, Date | Timestamp | TimestampTz);
    match (ty, natural) {
        _ if ty.is_textual() => true,
        (t, n) if numeric(t) => numeric(n) || n.is_textual(),
        (Bytea, _) => true,
        (t, n) if temporal(t) => temporal(n) || n.is_textual(),
        (Time, Time) => true,
        (Time, n) => n.is_textual(),
        #[cfg(feature = "with-uuid")]
        (Uuid, n) => n.is_textual() || *n == Bytea,
        _ => false,
    }
}

/// Result buffer for reading remote column `field` into a `ty` host column.
pub fn bind_result(ty: &HostType, field: &FieldInfo) -> Result<ResultBuffer> {
    let natural = natural_host_type(field)?;
    if !compatible(ty, &natural) {
        return Err(Error::TypeConversion(format!(
            "cannot read column \"{}\" of type {} into {}",
            field.name,
            driver_type_name(field.field_type, field.is_unsigned()),
            ty
        )));
    }
    let buffer_length = match field.field_type.fixed_width() {
        Some(width) => width,
        // Length byte plus the longest packed layout.
        None if field.field_type.is_temporal() => 13,
        None => (field.length as usize).max(1),
    };
    Ok(ResultBuffer::new(
        field.field_type,
        field.is_unsigned(),
        buffer_length,
    ))
}

/// Convert a fetched column into a host value.
pub fn to_host(ty: &HostType, buf: &ResultBuffer) -> Result<Option<Datum>> {
    if buf.is_null {
        return Ok(None);
    }
    let (ft, unsigned) = (buf.field_type, buf.unsigned);
    let mut bytes = buf.data.as_slice();
    if buf.truncated && ty.is_textual() {
        // Drop a multi-byte character cut by the buffer end.
        if let Err(e) = simdutf8::compat::from_utf8(bytes) {
            bytes = &bytes[..e.valid_up_to()];
        }
    }
    let datum = match ty {
        HostType::Bool => Datum::Bool(bool::from_driver(ft, unsigned, bytes)?),
        HostType::Int2 => Datum::Int2(i16::from_driver(ft, unsigned, bytes)?),
        HostType::Int4 => Datum::Int4(i32::from_driver(ft, unsigned, bytes)?),
        HostType::Int8 => Datum::Int8(i64::from_driver(ft, unsigned, bytes)?),
        HostType::Float4 => Datum::Float4(f32::from_driver(ft, unsigned, bytes)?),
        HostType::Float8 => Datum::Float8(f64::from_driver(ft, unsigned, bytes)?),
        HostType::Numeric => Datum::Numeric(FromDriverValue::from_driver(ft, unsigned, bytes)?),
        HostType::Text | HostType::Json => Datum::Text(String::from_driver(ft, unsigned, bytes)?),
        HostType::Varchar(limit) | HostType::Bpchar(limit) => {
            let s = String::from_driver(ft, unsigned, bytes)?;
            if limit.is_some_and(|n| s.chars().count() > n as usize) {
                return Err(Error::TypeConversion(format!(
                    "value too long for type {}",
                    ty
                )));
            }
            Datum::Text(s)
        }
        HostType::Enum { name, labels } => {
            let s = String::from_driver(ft, unsigned, bytes)?;
            if !labels.contains(&s) {
                return Err(Error::TypeConversion(format!(
                    "invalid input value for enum {}: \"{}\"",
                    name, s
                )));
            }
            Datum::Text(s)
        }
        HostType::Bytea => Datum::Bytea(Vec::<u8>::from_driver(ft, unsigned, bytes)?),
        HostType::Date => Datum::Date(FromDriverValue::from_driver(ft, unsigned, bytes)?),
        HostType::Time => Datum::Time(FromDriverValue::from_driver(ft, unsigned, bytes)?),
        HostType::Timestamp => Datum::Timestamp(FromDriverValue::from_driver(ft, unsigned, bytes)?),
        HostType::TimestampTz => {
            Datum::TimestampTz(FromDriverValue::from_driver(ft, unsigned, bytes)?)
        }
        #[cfg(feature = "with-uuid")]
        HostType::Uuid => Datum::Uuid(FromDriverValue::from_driver(ft, unsigned, bytes)?),
    };
    Ok(Some(datum))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::ColumnFlags;
    use rust_decimal::Decimal;

    /// Bind as a parameter, then read the same bytes back as a result column.
    fn roundtrip(value: Option<Datum>, ty: HostType) -> Option<Datum> {
        let mut bind = ParamBind::default();
        to_param(value.as_ref(), &ty, &mut bind).unwrap();
        let (ft, unsigned) = param_type(&ty);
        let buf = ResultBuffer {
            field_type: ft,
            unsigned,
            buffer_length: bind.buffer.len(),
            length: bind.buffer.len(),
            data: bind.buffer.clone(),
            is_null: bind.is_null,
            truncated: false,
        };
        to_host(&ty, &buf).unwrap()
    }

    #[test]
    fn test_truncated_text_drops_split_character() {
        // "né" cut after the first byte of the two-byte "é".
        let buf = ResultBuffer {
            field_type: FieldType::VarString,
            unsigned: false,
            buffer_length: 2,
            length: 3,
            data: vec![b'n', 0xC3],
            is_null: false,
            truncated: true,
        };
        assert_eq!(
            to_host(&HostType::Text, &buf).unwrap(),
            Some(Datum::Text("n".into()))
        );

        let whole = ResultBuffer {
            truncated: false,
            ..buf
        };
        assert!(matches!(
            to_host(&HostType::Text, &whole),
            Err(Error::TypeConversion(_))
        ));
    }

    #[test]
    fn test_roundtrip_extremes_and_null() {
        let cases = vec![
            (HostType::Bool, vec![Datum::Bool(false), Datum::Bool(true)]),
            (HostType::Int2, vec![Datum::Int2(i16::MIN), Datum::Int2(i16::MAX)]),
            (HostType::Int4, vec![Datum::Int4(i32::MIN), Datum::Int4(i32::MAX)]),
            (HostType::Int8, vec![Datum::Int8(i64::MIN), Datum::Int8(i64::MAX)]),
            (HostType::Float4, vec![Datum::Float4(f32::MIN), Datum::Float4(f32::MAX)]),
            (HostType::Float8, vec![Datum::Float8(f64::MIN), Datum::Float8(f64::MAX)]),
            (HostType::Numeric, vec![Datum::Numeric(Decimal::MIN), Datum::Numeric(Decimal::MAX)]),
            (HostType::Text, vec![Datum::Text(String::new()), Datum::Text("héllo".into())]),
            (HostType::Bytea, vec![Datum::Bytea(vec![]), Datum::Bytea(vec![0, 255])]),
        ];
        for (ty, values) in cases {
            assert_eq!(roundtrip(None, ty.clone()), None, "{}", ty);
            for v in values {
                assert_eq!(roundtrip(Some(v.clone()), ty.clone()), Some(v), "{}", ty);
            }
        }
    }

    #[test]
    fn test_param_rejects_mismatched_datum() {
        let mut bind = ParamBind::default();
        let err = to_param(Some(&Datum::Int4(1)), &HostType::Date, &mut bind).unwrap_err();
        assert!(matches!(err, Error::TypeConversion(_)));
    }

    #[test]
    fn test_unsigned_promotion() {
        let field = |ft| FieldInfo::new("c", ft).with_flags(ColumnFlags::UNSIGNED);
        assert_eq!(natural_host_type(&field(FieldType::Tiny)).unwrap(), HostType::Int2);
        assert_eq!(natural_host_type(&field(FieldType::Short)).unwrap(), HostType::Int4);
        assert_eq!(natural_host_type(&field(FieldType::Long)).unwrap(), HostType::Int8);
        assert_eq!(
            natural_host_type(&field(FieldType::LongLong)).unwrap(),
            HostType::Numeric
        );
        assert_eq!(
            natural_host_type(&FieldInfo::new("e", FieldType::Enum)).unwrap(),
            HostType::Text
        );
        assert!(natural_host_type(&FieldInfo::new("g", FieldType::Geometry)).is_err());
    }

    #[test]
    fn test_narrowing_fails_instead_of_truncating() {
        let mut buf = ResultBuffer::new(FieldType::Long, true, 4);
        buf.data = u32::MAX.to_le_bytes().to_vec();
        let err = to_host(&HostType::Int4, &buf).unwrap_err();
        assert!(matches!(err, Error::TypeConversion(_)));
        assert_eq!(
            to_host(&HostType::Int8, &buf).unwrap(),
            Some(Datum::Int8(u32::MAX as i64))
        );
    }

    #[test]
    fn test_bind_result_rejects_incompatible() {
        let field = FieldInfo::new("d", FieldType::Date);
        assert!(bind_result(&HostType::Int4, &field).is_err());
        assert!(bind_result(&HostType::Timestamp, &field).is_ok());
        assert!(bind_result(&HostType::Text, &field).is_ok());
    }

    #[test]
    fn test_enum_label_checked() {
        let ty = HostType::Enum {
            name: "mood".into(),
            labels: vec!["sad".into(), "happy".into()],
        };
        let mut buf = ResultBuffer::new(FieldType::Enum, false, 16);
        buf.data = b"happy".to_vec();
        assert_eq!(to_host(&ty, &buf).unwrap(), Some(Datum::Text("happy".into())));
        buf.data = b"meh".to_vec();
        assert!(to_host(&ty, &buf).is_err());
    }

    #[test]
    fn test_varchar_limit() {
        let mut buf = ResultBuffer::new(FieldType::VarString, false, 16);
        buf.data = b"abcdef".to_vec();
        assert!(to_host(&HostType::Varchar(Some(3)), &buf).is_err());
        assert!(to_host(&HostType::Varchar(Some(6)), &buf).is_ok());
    }
}
