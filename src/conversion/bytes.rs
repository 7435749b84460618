//! Raw byte implementations.

use crate::driver::FieldType;
use crate::error::{Error, Result};

use super::{FromDriverValue, ToDriverValue, driver_type_name};

impl FromDriverValue for Vec<u8> {
    fn from_driver(field_type: FieldType, unsigned: bool, bytes: &[u8]) -> Result<Self> {
        if !field_type.is_byte_string() {
            return Err(Error::conversion(
                driver_type_name(field_type, unsigned),
                "bytea",
            ));
        }
        Ok(bytes.to_vec())
    }
}

impl ToDriverValue for [u8] {
    fn natural_type(&self) -> (FieldType, bool) {
        (FieldType::Blob, false)
    }

    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.extend_from_slice(self);
        Ok(())
    }
}

impl ToDriverValue for Vec<u8> {
    fn natural_type(&self) -> (FieldType, bool) {
        self.as_slice().natural_type()
    }

    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        self.as_slice().encode(buf)
    }
}
