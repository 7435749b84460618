//! Temporal type implementations (chrono crate).

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};

use crate::driver::FieldType;
use crate::driver::codec::{self, DriverTime, NativeValue};
use crate::error::{Error, Result};

use super::{FromDriverValue, ToDriverValue, driver_type_name, native};

/// Read a broken-down temporal value from a temporal or text layout.
fn driver_time(field_type: FieldType, unsigned: bool, bytes: &[u8], to: &str) -> Result<DriverTime> {
    match native(field_type, unsigned, bytes)? {
        NativeValue::Time(t) => Ok(t),
        NativeValue::Bytes(b) if field_type.is_byte_string() => {
            let s = simdutf8::compat::from_utf8(&b)
                .map_err(|e| Error::TypeConversion(format!("invalid UTF-8: {}", e)))?;
            let layout = if to == "time" {
                FieldType::Time
            } else {
                FieldType::DateTime
            };
            Ok(DriverTime::parse(s, layout)?)
        }
        _ => Err(Error::conversion(driver_type_name(field_type, unsigned), to)),
    }
}

fn to_date(t: &DriverTime, to: &str) -> Result<NaiveDate> {
    NaiveDate::from_ymd_opt(t.year as i32, t.month as u32, t.day as u32)
        .ok_or_else(|| Error::out_of_range(t.to_text(FieldType::Date), to))
}

fn to_clock(t: &DriverTime, to: &str) -> Result<NaiveTime> {
    if t.negative {
        return Err(Error::out_of_range(t.to_text(FieldType::Time), to));
    }
    NaiveTime::from_hms_micro_opt(t.hour, t.minute as u32, t.second as u32, t.micros)
        .ok_or_else(|| Error::out_of_range(t.to_text(FieldType::Time), to))
}

fn micros(nanos: u32, value: &dyn std::fmt::Display) -> Result<u32> {
    // Leap seconds carry nanos past 1e9.
    let nanos = nanos % 1_000_000_000;
    if nanos % 1_000 != 0 {
        return Err(Error::TypeConversion(format!(
            "{} has sub-microsecond precision",
            value
        )));
    }
    Ok(nanos / 1_000)
}

fn from_date(date: &NaiveDate) -> Result<DriverTime> {
    let year = u16::try_from(date.year()).map_err(|_| Error::out_of_range(date, "MySQL DATE"))?;
    Ok(DriverTime::date(year, date.month() as u8, date.day() as u8))
}

fn from_datetime(dt: &NaiveDateTime) -> Result<DriverTime> {
    let t = from_date(&dt.date())?;
    Ok(t.at(
        dt.hour(),
        dt.minute() as u8,
        dt.second() as u8,
        micros(dt.nanosecond(), dt)?,
    ))
}

impl FromDriverValue for NaiveDate {
    fn from_driver(field_type: FieldType, unsigned: bool, bytes: &[u8]) -> Result<Self> {
        let t = driver_time(field_type, unsigned, bytes, "date")?;
        if t.hour != 0 || t.minute != 0 || t.second != 0 || t.micros != 0 {
            return Err(Error::TypeConversion(format!(
                "{} has a time of day that does not fit type date",
                t.to_text(FieldType::DateTime)
            )));
        }
        to_date(&t, "date")
    }
}

impl ToDriverValue for NaiveDate {
    fn natural_type(&self) -> (FieldType, bool) {
        (FieldType::Date, false)
    }

    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        let t = from_date(self)?;
        codec::encode(&NativeValue::Time(t), FieldType::Date, false, buf)?;
        Ok(())
    }
}

impl FromDriverValue for NaiveTime {
    fn from_driver(field_type: FieldType, unsigned: bool, bytes: &[u8]) -> Result<Self> {
        let t = driver_time(field_type, unsigned, bytes, "time")?;
        to_clock(&t, "time")
    }
}

impl ToDriverValue for NaiveTime {
    fn natural_type(&self) -> (FieldType, bool) {
        (FieldType::Time, false)
    }

    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        let t = DriverTime::default().at(
            self.hour(),
            self.minute() as u8,
            self.second() as u8,
            micros(self.nanosecond(), self)?,
        );
        codec::encode(&NativeValue::Time(t), FieldType::Time, false, buf)?;
        Ok(())
    }
}

impl FromDriverValue for NaiveDateTime {
    fn from_driver(field_type: FieldType, unsigned: bool, bytes: &[u8]) -> Result<Self> {
        let t = driver_time(field_type, unsigned, bytes, "timestamp")?;
        Ok(to_date(&t, "timestamp")?.and_time(to_clock(&t, "timestamp")?))
    }
}

impl ToDriverValue for NaiveDateTime {
    fn natural_type(&self) -> (FieldType, bool) {
        (FieldType::DateTime, false)
    }

    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        let t = from_datetime(self)?;
        codec::encode(&NativeValue::Time(t), FieldType::DateTime, false, buf)?;
        Ok(())
    }
}

/// Remote TIMESTAMP values are read and written as UTC.
impl FromDriverValue for DateTime<Utc> {
    fn from_driver(field_type: FieldType, unsigned: bool, bytes: &[u8]) -> Result<Self> {
        NaiveDateTime::from_driver(field_type, unsigned, bytes).map(|dt| dt.and_utc())
    }
}

impl ToDriverValue for DateTime<Utc> {
    fn natural_type(&self) -> (FieldType, bool) {
        (FieldType::Timestamp, false)
    }

    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        let t = from_datetime(&self.naive_utc())?;
        codec::encode(&NativeValue::Time(t), FieldType::Timestamp, false, buf)?;
        Ok(())
    }
}
