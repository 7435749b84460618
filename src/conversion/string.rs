//! String type implementations.

use crate::driver::FieldType;
use crate::error::{Error, Result};

use super::{FromDriverValue, ToDriverValue, driver_type_name, native};

impl FromDriverValue for String {
    /// Byte strings must be valid UTF-8; numbers and temporal values are
    /// rendered in the endpoint's text form.
    fn from_driver(field_type: FieldType, unsigned: bool, bytes: &[u8]) -> Result<Self> {
        if field_type.is_byte_string() {
            return simdutf8::compat::from_utf8(bytes)
                .map(str::to_string)
                .map_err(|e| {
                    Error::TypeConversion(format!(
                        "invalid UTF-8 in {} value: {}",
                        driver_type_name(field_type, unsigned),
                        e
                    ))
                });
        }
        Ok(native(field_type, unsigned, bytes)?.to_text(field_type))
    }
}

impl ToDriverValue for str {
    fn natural_type(&self) -> (FieldType, bool) {
        (FieldType::VarString, false)
    }

    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.extend_from_slice(self.as_bytes());
        Ok(())
    }
}

impl ToDriverValue for String {
    fn natural_type(&self) -> (FieldType, bool) {
        self.as_str().natural_type()
    }

    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        self.as_str().encode(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_from_varstring() {
        let s = String::from_driver(FieldType::VarString, false, "héllo".as_bytes()).unwrap();
        assert_eq!(s, "héllo");
    }

    #[test]
    fn test_string_invalid_utf8() {
        assert!(String::from_driver(FieldType::VarString, false, &[0xff, 0xfe]).is_err());
    }

    #[test]
    fn test_string_from_number() {
        let s = String::from_driver(FieldType::Long, true, &u32::MAX.to_le_bytes()).unwrap();
        assert_eq!(s, "4294967295");
    }
}
