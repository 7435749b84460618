//! Decimal type implementation (rust_decimal crate).
//!
//! DECIMAL travels as its text representation in both directions, so no
//! digits are lost on the way.

use rust_decimal::Decimal;

use crate::driver::FieldType;
use crate::driver::codec::NativeValue;
use crate::error::{Error, Result};

use super::{FromDriverValue, ToDriverValue, driver_type_name, native};

impl FromDriverValue for Decimal {
    fn from_driver(field_type: FieldType, unsigned: bool, bytes: &[u8]) -> Result<Self> {
        let from = || driver_type_name(field_type, unsigned);
        match native(field_type, unsigned, bytes)? {
            NativeValue::Int(v) => Ok(Decimal::from(v)),
            NativeValue::UInt(v) => Ok(Decimal::from(v)),
            NativeValue::Float(f) => {
                Decimal::try_from(f).map_err(|_| Error::out_of_range(f, "numeric"))
            }
            NativeValue::Double(d) => {
                Decimal::try_from(d).map_err(|_| Error::out_of_range(d, "numeric"))
            }
            NativeValue::Bytes(b) if field_type.is_byte_string() => {
                let s = simdutf8::compat::from_utf8(&b)
                    .map_err(|e| Error::TypeConversion(format!("invalid UTF-8: {}", e)))?;
                // from_str_exact fails instead of rounding excess digits.
                Decimal::from_str_exact(s.trim())
                    .map_err(|e| Error::TypeConversion(format!("invalid decimal {:?}: {}", s, e)))
            }
            _ => Err(Error::conversion(from(), "numeric")),
        }
    }
}

impl ToDriverValue for Decimal {
    fn natural_type(&self) -> (FieldType, bool) {
        (FieldType::NewDecimal, false)
    }

    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.extend_from_slice(self.to_string().as_bytes());
        Ok(())
    }
}
