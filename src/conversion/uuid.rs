//! UUID values.
//!
//! The remote endpoint has no UUID type; values travel as their 36-character
//! text form and are also accepted as 16 raw bytes from BINARY(16) columns.

use crate::driver::FieldType;
use crate::error::{Error, Result};

use super::{FromDriverValue, ToDriverValue, driver_type_name};

impl FromDriverValue for uuid::Uuid {
    fn from_driver(field_type: FieldType, unsigned: bool, bytes: &[u8]) -> Result<Self> {
        if !field_type.is_byte_string() {
            return Err(Error::conversion(driver_type_name(field_type, unsigned), "uuid"));
        }
        if bytes.len() == 16 {
            return uuid::Uuid::from_slice(bytes)
                .map_err(|e| Error::TypeConversion(format!("invalid UUID: {}", e)));
        }
        let s = simdutf8::compat::from_utf8(bytes)
            .map_err(|e| Error::TypeConversion(format!("invalid UTF-8: {}", e)))?;
        uuid::Uuid::parse_str(s).map_err(|e| Error::TypeConversion(format!("invalid UUID: {}", e)))
    }
}

impl ToDriverValue for uuid::Uuid {
    fn natural_type(&self) -> (FieldType, bool) {
        (FieldType::VarString, false)
    }

    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.extend_from_slice(self.hyphenated().to_string().as_bytes());
        Ok(())
    }
}
