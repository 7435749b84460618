//! Primitive type implementations (bool, integers, floats).

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use crate::driver::FieldType;
use crate::driver::codec::{self, NativeValue};
use crate::error::{Error, Result};

use super::{FromDriverValue, ToDriverValue, driver_type_name, native};

/// Largest integer magnitude an f32 holds exactly.
const F32_EXACT: i128 = 1 << 24;
/// Largest integer magnitude an f64 holds exactly.
const F64_EXACT: i128 = 1 << 53;

fn text(field_type: FieldType, bytes: &[u8]) -> Result<&str> {
    simdutf8::compat::from_utf8(bytes).map_err(|e| {
        Error::TypeConversion(format!(
            "invalid UTF-8 in {} value: {}",
            driver_type_name(field_type, false),
            e
        ))
    })
}

/// Read any integral driver value, rejecting fractions.
fn integer_value(field_type: FieldType, unsigned: bool, bytes: &[u8], to: &str) -> Result<i128> {
    let from = || driver_type_name(field_type, unsigned);
    if field_type == FieldType::Bit {
        if bytes.len() > 8 {
            return Err(Error::conversion(from(), to));
        }
        return Ok(bytes.iter().fold(0i128, |acc, b| (acc << 8) | *b as i128));
    }
    match native(field_type, unsigned, bytes)? {
        NativeValue::Int(v) => Ok(v as i128),
        NativeValue::UInt(v) => Ok(v as i128),
        NativeValue::Float(f) => integral(f as f64).ok_or_else(|| Error::out_of_range(f, to)),
        NativeValue::Double(d) => integral(d).ok_or_else(|| Error::out_of_range(d, to)),
        NativeValue::Bytes(b) if field_type.is_byte_string() => {
            let s = text(field_type, &b)?.trim();
            if let Ok(v) = s.parse::<i128>() {
                return Ok(v);
            }
            let d = Decimal::from_str_exact(s).map_err(|_| Error::conversion(from(), to))?;
            if !d.fract().is_zero() {
                return Err(Error::out_of_range(d, to));
            }
            d.to_i128().ok_or_else(|| Error::out_of_range(d, to))
        }
        _ => Err(Error::conversion(from(), to)),
    }
}

fn integral(d: f64) -> Option<i128> {
    if d.is_finite() && d.fract() == 0.0 && d.abs() < 1.8e19 {
        Some(d as i128)
    } else {
        None
    }
}

fn float_value(field_type: FieldType, unsigned: bool, bytes: &[u8], exact: i128, to: &str) -> Result<f64> {
    match native(field_type, unsigned, bytes)? {
        NativeValue::Float(f) => Ok(f as f64),
        NativeValue::Double(d) => Ok(d),
        NativeValue::Int(_) | NativeValue::UInt(_) => {
            let v = integer_value(field_type, unsigned, bytes, to)?;
            if v.abs() > exact {
                return Err(Error::out_of_range(v, to));
            }
            Ok(v as f64)
        }
        NativeValue::Bytes(b) if field_type.is_byte_string() => text(field_type, &b)?
            .trim()
            .parse::<f64>()
            .map_err(|_| Error::conversion(driver_type_name(field_type, unsigned), to)),
        _ => Err(Error::conversion(driver_type_name(field_type, unsigned), to)),
    }
}

// === Boolean ===

impl FromDriverValue for bool {
    fn from_driver(field_type: FieldType, unsigned: bool, bytes: &[u8]) -> Result<Self> {
        if field_type.is_byte_string() && field_type != FieldType::Bit {
            match text(field_type, bytes)?.trim() {
                "t" | "true" | "TRUE" | "1" => return Ok(true),
                "f" | "false" | "FALSE" | "0" => return Ok(false),
                _ => {}
            }
        }
        Ok(integer_value(field_type, unsigned, bytes, "boolean")? != 0)
    }
}

impl ToDriverValue for bool {
    fn natural_type(&self) -> (FieldType, bool) {
        (FieldType::Tiny, false)
    }

    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        codec::encode(&NativeValue::Int(i64::from(*self)), FieldType::Tiny, false, buf)?;
        Ok(())
    }
}

// === Integer types ===

macro_rules! impl_integer {
    ($ty:ty, $field:expr, $name:literal) => {
        impl FromDriverValue for $ty {
            fn from_driver(field_type: FieldType, unsigned: bool, bytes: &[u8]) -> Result<Self> {
                let v = integer_value(field_type, unsigned, bytes, $name)?;
                <$ty>::try_from(v).map_err(|_| Error::out_of_range(v, $name))
            }
        }

        impl ToDriverValue for $ty {
            fn natural_type(&self) -> (FieldType, bool) {
                ($field, false)
            }

            fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
                codec::encode(&NativeValue::Int(*self as i64), $field, false, buf)?;
                Ok(())
            }
        }
    };
}

impl_integer!(i16, FieldType::Short, "smallint");
impl_integer!(i32, FieldType::Long, "integer");
impl_integer!(i64, FieldType::LongLong, "bigint");

// === Floating point ===

impl FromDriverValue for f32 {
    fn from_driver(field_type: FieldType, unsigned: bool, bytes: &[u8]) -> Result<Self> {
        let d = float_value(field_type, unsigned, bytes, F32_EXACT, "real")?;
        let narrowed = d as f32;
        // NaN and infinities narrow unchanged; anything else must survive the round trip.
        if d.is_finite() && narrowed as f64 != d {
            return Err(Error::out_of_range(d, "real"));
        }
        Ok(narrowed)
    }
}

impl ToDriverValue for f32 {
    fn natural_type(&self) -> (FieldType, bool) {
        (FieldType::Float, false)
    }

    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        codec::encode(&NativeValue::Float(*self), FieldType::Float, false, buf)?;
        Ok(())
    }
}

impl FromDriverValue for f64 {
    fn from_driver(field_type: FieldType, unsigned: bool, bytes: &[u8]) -> Result<Self> {
        float_value(field_type, unsigned, bytes, F64_EXACT, "double precision")
    }
}

impl ToDriverValue for f64 {
    fn natural_type(&self) -> (FieldType, bool) {
        (FieldType::Double, false)
    }

    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        codec::encode(&NativeValue::Double(*self), FieldType::Double, false, buf)?;
        Ok(())
    }
}
