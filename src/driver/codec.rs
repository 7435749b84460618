//! Result and parameter buffer layout.
//!
//! Fixed-width integers and floats are little-endian. Decimals, strings,
//! blobs, enums, sets, JSON and BIT values are raw byte strings. Temporal
//! values use the packed binary-protocol layout:
//!
//! ```text
//! DATE/DATETIME/TIMESTAMP: len(0|4|7|11) year:u16 month day [hour minute second [micros:u32]]
//! TIME:                    len(0|8|12)   negative days:u32 hour minute second [micros:u32]
//! ```

use thiserror::Error;
use zerocopy::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::types::FieldType;

/// Buffer layout error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("invalid {0:?} buffer length: {1}")]
    Length(FieldType, usize),

    #[error("value {value} is out of range for {field_type:?}")]
    OutOfRange { value: String, field_type: FieldType },

    #[error("cannot store {from} in a {field_type:?} buffer")]
    Incompatible {
        from: &'static str,
        field_type: FieldType,
    },

    #[error("invalid {field_type:?} text: {text:?}")]
    InvalidText { text: String, field_type: FieldType },
}

/// Broken-down temporal value as the driver transfers it.
///
/// `hour` is unbounded so TIME values beyond one day fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, PartialOrd, Ord, Hash)]
pub struct DriverTime {
    pub negative: bool,
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u32,
    pub minute: u8,
    pub second: u8,
    pub micros: u32,
}

impl DriverTime {
    pub fn date(year: u16, month: u8, day: u8) -> Self {
        Self {
            year,
            month,
            day,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn at(mut self, hour: u32, minute: u8, second: u8, micros: u32) -> Self {
        self.hour = hour;
        self.minute = minute;
        self.second = second;
        self.micros = micros;
        self
    }

    fn has_date(&self) -> bool {
        self.year != 0 || self.month != 0 || self.day != 0
    }

    fn has_clock(&self) -> bool {
        self.hour != 0 || self.minute != 0 || self.second != 0
    }

    /// Render in the endpoint's text form for the given column type.
    pub fn to_text(&self, field_type: FieldType) -> String {
        let date = format!("{:04}-{:02}-{:02}", self.year, self.month, self.day);
        let mut clock = format!(
            "{}{:02}:{:02}:{:02}",
            if self.negative { "-" } else { "" },
            self.hour,
            self.minute,
            self.second
        );
        if self.micros != 0 {
            clock.push_str(&format!(".{:06}", self.micros));
        }
        match field_type {
            FieldType::Date => date,
            FieldType::Time => clock,
            _ => format!("{} {}", date, clock),
        }
    }

    /// Parse the endpoint's text form for the given column type.
    pub fn parse(text: &str, field_type: FieldType) -> Result<Self, CodecError> {
        let invalid = || CodecError::InvalidText {
            text: text.to_string(),
            field_type,
        };
        let text = text.trim();
        let mut out = DriverTime::default();
        let clock = match field_type {
            FieldType::Time => Some(text),
            _ => {
                let (date, clock) = match text.split_once(' ') {
                    Some((d, c)) => (d, Some(c)),
                    None => (text, None),
                };
                let mut parts = date.split('-');
                out.year = parse_part(parts.next()).ok_or_else(invalid)?;
                out.month = parse_part(parts.next()).ok_or_else(invalid)?;
                out.day = parse_part(parts.next()).ok_or_else(invalid)?;
                if parts.next().is_some() {
                    return Err(invalid());
                }
                clock
            }
        };
        if let Some(clock) = clock {
            let clock = match clock.strip_prefix('-') {
                Some(rest) => {
                    out.negative = true;
                    rest
                }
                None => clock,
            };
            let (hms, frac) = match clock.split_once('.') {
                Some((hms, frac)) => (hms, Some(frac)),
                None => (clock, None),
            };
            let mut parts = hms.split(':');
            out.hour = parse_part(parts.next()).ok_or_else(invalid)?;
            out.minute = parse_part(parts.next()).ok_or_else(invalid)?;
            out.second = parse_part(parts.next()).ok_or_else(invalid)?;
            if let Some(frac) = frac {
                if frac.is_empty() || frac.len() > 6 || !frac.bytes().all(|b| b.is_ascii_digit())
                {
                    return Err(invalid());
                }
                let padded = format!("{:0<6}", frac);
                out.micros = padded.parse().map_err(|_| invalid())?;
            }
        }
        Ok(out)
    }
}

fn parse_part<T: std::str::FromStr>(part: Option<&str>) -> Option<T> {
    part.filter(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|p| p.parse().ok())
}

/// A value in the driver's own representation.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeValue {
    Int(i64),
    UInt(u64),
    Float(f32),
    Double(f64),
    Bytes(Vec<u8>),
    Time(DriverTime),
}

impl NativeValue {
    fn kind(&self) -> &'static str {
        match self {
            NativeValue::Int(_) => "signed integer",
            NativeValue::UInt(_) => "unsigned integer",
            NativeValue::Float(_) => "float",
            NativeValue::Double(_) => "double",
            NativeValue::Bytes(_) => "byte string",
            NativeValue::Time(_) => "temporal value",
        }
    }

    pub fn as_i128(&self) -> Option<i128> {
        match self {
            NativeValue::Int(v) => Some(*v as i128),
            NativeValue::UInt(v) => Some(*v as i128),
            _ => None,
        }
    }

    /// Text form of the value.
    pub fn to_text(&self, field_type: FieldType) -> String {
        match self {
            NativeValue::Int(v) => v.to_string(),
            NativeValue::UInt(v) => v.to_string(),
            NativeValue::Float(v) => v.to_string(),
            NativeValue::Double(v) => v.to_string(),
            NativeValue::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
            NativeValue::Time(t) => t.to_text(field_type),
        }
    }
}

#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct PackedDate {
    year: U16,
    month: u8,
    day: u8,
}

#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct PackedClock {
    hour: u8,
    minute: u8,
    second: u8,
}

#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct PackedTimeHead {
    negative: u8,
    days: U32,
    hour: u8,
    minute: u8,
    second: u8,
}

/// Append `value` to `buf` in the layout of `field_type`.
///
/// The value must already belong to the type's family; use [`coerce`] to
/// convert between families.
pub fn encode(
    value: &NativeValue,
    field_type: FieldType,
    unsigned: bool,
    buf: &mut Vec<u8>,
) -> Result<(), CodecError> {
    let incompatible = || CodecError::Incompatible {
        from: value.kind(),
        field_type,
    };
    match field_type {
        t if t.is_integer() => {
            let v = value.as_i128().ok_or_else(incompatible)?;
            let (lo, hi) = t.integer_range(unsigned).ok_or_else(incompatible)?;
            if v < lo || v > hi {
                return Err(CodecError::OutOfRange {
                    value: v.to_string(),
                    field_type,
                });
            }
            let width = t.fixed_width().ok_or_else(incompatible)?;
            let raw = if v < 0 { v as i64 as u64 } else { v as u64 };
            buf.extend_from_slice(&raw.to_le_bytes()[..width]);
        }
        FieldType::Float => match value {
            NativeValue::Float(v) => buf.extend_from_slice(&v.to_le_bytes()),
            _ => return Err(incompatible()),
        },
        FieldType::Double => match value {
            NativeValue::Double(v) => buf.extend_from_slice(&v.to_le_bytes()),
            _ => return Err(incompatible()),
        },
        FieldType::Date | FieldType::DateTime | FieldType::Timestamp => match value {
            NativeValue::Time(t) => encode_datetime(t, field_type, buf)?,
            _ => return Err(incompatible()),
        },
        FieldType::Time => match value {
            NativeValue::Time(t) => encode_time(t, buf),
            _ => return Err(incompatible()),
        },
        t if t.is_byte_string() => match value {
            NativeValue::Bytes(b) => buf.extend_from_slice(b),
            _ => return Err(incompatible()),
        },
        _ => return Err(incompatible()),
    }
    Ok(())
}

fn encode_datetime(t: &DriverTime, field_type: FieldType, buf: &mut Vec<u8>) -> Result<(), CodecError> {
    let hour = u8::try_from(t.hour).map_err(|_| CodecError::OutOfRange {
        value: t.to_text(field_type),
        field_type,
    })?;
    let len: u8 = if t.micros != 0 {
        11
    } else if t.has_clock() {
        7
    } else if t.has_date() {
        4
    } else {
        0
    };
    buf.push(len);
    if len >= 4 {
        let date = PackedDate {
            year: U16::new(t.year),
            month: t.month,
            day: t.day,
        };
        buf.extend_from_slice(date.as_bytes());
    }
    if len >= 7 {
        let clock = PackedClock {
            hour,
            minute: t.minute,
            second: t.second,
        };
        buf.extend_from_slice(clock.as_bytes());
    }
    if len == 11 {
        buf.extend_from_slice(U32::new(t.micros).as_bytes());
    }
    Ok(())
}

fn encode_time(t: &DriverTime, buf: &mut Vec<u8>) {
    let len: u8 = if t.micros != 0 {
        12
    } else if t.has_clock() {
        8
    } else {
        0
    };
    buf.push(len);
    if len >= 8 {
        let head = PackedTimeHead {
            negative: u8::from(t.negative),
            days: U32::new(t.hour / 24),
            hour: (t.hour % 24) as u8,
            minute: t.minute,
            second: t.second,
        };
        buf.extend_from_slice(head.as_bytes());
    }
    if len == 12 {
        buf.extend_from_slice(U32::new(t.micros).as_bytes());
    }
}

/// Decode a buffer written in the layout of `field_type`.
pub fn decode(field_type: FieldType, unsigned: bool, bytes: &[u8]) -> Result<NativeValue, CodecError> {
    let bad_length = || CodecError::Length(field_type, bytes.len());
    match field_type {
        t if t.is_integer() => {
            let width = t.fixed_width().ok_or_else(bad_length)?;
            if bytes.len() != width {
                return Err(bad_length());
            }
            let mut raw = [0u8; 8];
            raw[..width].copy_from_slice(bytes);
            let value = u64::from_le_bytes(raw);
            if unsigned || t == FieldType::Year {
                return Ok(NativeValue::UInt(value));
            }
            // Sign-extend from the type's width.
            let shift = 64 - (width as u32) * 8;
            Ok(NativeValue::Int(((value << shift) as i64) >> shift))
        }
        FieldType::Float => {
            let arr: [u8; 4] = bytes.try_into().map_err(|_| bad_length())?;
            Ok(NativeValue::Float(f32::from_le_bytes(arr)))
        }
        FieldType::Double => {
            let arr: [u8; 8] = bytes.try_into().map_err(|_| bad_length())?;
            Ok(NativeValue::Double(f64::from_le_bytes(arr)))
        }
        FieldType::Date | FieldType::DateTime | FieldType::Timestamp => {
            decode_datetime(field_type, bytes).map(NativeValue::Time)
        }
        FieldType::Time => decode_time(bytes).map(NativeValue::Time),
        t if t.is_byte_string() => Ok(NativeValue::Bytes(bytes.to_vec())),
        _ => Err(CodecError::Incompatible {
            from: "buffer",
            field_type,
        }),
    }
}

fn decode_datetime(field_type: FieldType, bytes: &[u8]) -> Result<DriverTime, CodecError> {
    let bad_length = || CodecError::Length(field_type, bytes.len());
    let (&len, rest) = bytes.split_first().ok_or_else(bad_length)?;
    if !matches!(len, 0 | 4 | 7 | 11) || rest.len() != len as usize {
        return Err(bad_length());
    }
    let mut out = DriverTime::default();
    if len == 0 {
        return Ok(out);
    }
    let (date, rest) = PackedDate::read_from_prefix(rest).map_err(|_| bad_length())?;
    out.year = date.year.get();
    out.month = date.month;
    out.day = date.day;
    if len >= 7 {
        let (clock, rest) = PackedClock::read_from_prefix(rest).map_err(|_| bad_length())?;
        out.hour = clock.hour as u32;
        out.minute = clock.minute;
        out.second = clock.second;
        if len == 11 {
            let (micros, _) = U32::read_from_prefix(rest).map_err(|_| bad_length())?;
            out.micros = micros.get();
        }
    }
    Ok(out)
}

fn decode_time(bytes: &[u8]) -> Result<DriverTime, CodecError> {
    let bad_length = || CodecError::Length(FieldType::Time, bytes.len());
    let (&len, rest) = bytes.split_first().ok_or_else(bad_length)?;
    if !matches!(len, 0 | 8 | 12) || rest.len() != len as usize {
        return Err(bad_length());
    }
    let mut out = DriverTime::default();
    if len == 0 {
        return Ok(out);
    }
    let (head, rest) = PackedTimeHead::read_from_prefix(rest).map_err(|_| bad_length())?;
    out.negative = head.negative != 0;
    out.hour = head.days.get() * 24 + head.hour as u32;
    out.minute = head.minute;
    out.second = head.second;
    if len == 12 {
        let (micros, _) = U32::read_from_prefix(rest).map_err(|_| bad_length())?;
        out.micros = micros.get();
    }
    Ok(out)
}

/// Convert a value into the family of `field_type`, the way the endpoint
/// stores a parameter into a column of that type.
pub fn coerce(value: NativeValue, field_type: FieldType, unsigned: bool) -> Result<NativeValue, CodecError> {
    let out_of_range = |v: &dyn std::fmt::Display| CodecError::OutOfRange {
        value: v.to_string(),
        field_type,
    };
    let invalid_text = |b: &[u8]| CodecError::InvalidText {
        text: String::from_utf8_lossy(b).into_owned(),
        field_type,
    };
    match field_type {
        t if t.is_integer() => {
            let v: i128 = match &value {
                NativeValue::Int(v) => *v as i128,
                NativeValue::UInt(v) => *v as i128,
                NativeValue::Float(f) => integral(*f as f64).ok_or_else(|| out_of_range(f))?,
                NativeValue::Double(d) => integral(*d).ok_or_else(|| out_of_range(d))?,
                NativeValue::Bytes(b) => std::str::from_utf8(b)
                    .ok()
                    .and_then(|s| s.trim().parse::<i128>().ok())
                    .ok_or_else(|| invalid_text(b))?,
                NativeValue::Time(_) => {
                    return Err(CodecError::Incompatible {
                        from: value.kind(),
                        field_type,
                    });
                }
            };
            let (lo, hi) = t.integer_range(unsigned).ok_or_else(|| out_of_range(&v))?;
            if v < lo || v > hi {
                return Err(out_of_range(&v));
            }
            if unsigned || t == FieldType::Year {
                Ok(NativeValue::UInt(v as u64))
            } else {
                Ok(NativeValue::Int(v as i64))
            }
        }
        FieldType::Float | FieldType::Double => {
            let d = match &value {
                NativeValue::Int(v) => *v as f64,
                NativeValue::UInt(v) => *v as f64,
                NativeValue::Float(f) => *f as f64,
                NativeValue::Double(d) => *d,
                NativeValue::Bytes(b) => std::str::from_utf8(b)
                    .ok()
                    .and_then(|s| s.trim().parse::<f64>().ok())
                    .ok_or_else(|| invalid_text(b))?,
                NativeValue::Time(_) => {
                    return Err(CodecError::Incompatible {
                        from: value.kind(),
                        field_type,
                    });
                }
            };
            if field_type == FieldType::Float {
                if d.is_finite() && d.abs() > f32::MAX as f64 {
                    return Err(out_of_range(&d));
                }
                Ok(NativeValue::Float(d as f32))
            } else {
                Ok(NativeValue::Double(d))
            }
        }
        t if t.is_temporal() => match value {
            NativeValue::Time(t) => Ok(NativeValue::Time(t)),
            NativeValue::Bytes(b) => {
                let text = simdutf8::compat::from_utf8(&b).map_err(|_| invalid_text(&b))?;
                DriverTime::parse(text, field_type).map(NativeValue::Time)
            }
            other => Err(CodecError::Incompatible {
                from: other.kind(),
                field_type,
            }),
        },
        t if t.is_byte_string() => match value {
            NativeValue::Bytes(b) => Ok(NativeValue::Bytes(b)),
            other => Ok(NativeValue::Bytes(other.to_text(field_type).into_bytes())),
        },
        _ => Err(CodecError::Incompatible {
            from: value.kind(),
            field_type,
        }),
    }
}

fn integral(d: f64) -> Option<i128> {
    if d.is_finite() && d.fract() == 0.0 && d.abs() < 1.8e19 {
        Some(d as i128)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(value: NativeValue, field_type: FieldType, unsigned: bool) -> NativeValue {
        let mut buf = Vec::new();
        encode(&value, field_type, unsigned, &mut buf).unwrap();
        decode(field_type, unsigned, &buf).unwrap()
    }

    #[test]
    fn test_integer_sign_extension() {
        assert_eq!(
            roundtrip(NativeValue::Int(-1), FieldType::Tiny, false),
            NativeValue::Int(-1)
        );
        assert_eq!(
            roundtrip(NativeValue::Int(-8_388_608), FieldType::Int24, false),
            NativeValue::Int(-8_388_608)
        );
        assert_eq!(
            roundtrip(NativeValue::UInt(u64::MAX), FieldType::LongLong, true),
            NativeValue::UInt(u64::MAX)
        );
    }

    #[test]
    fn test_integer_out_of_range() {
        let mut buf = Vec::new();
        let err = encode(&NativeValue::Int(256), FieldType::Tiny, true, &mut buf).unwrap_err();
        assert!(matches!(err, CodecError::OutOfRange { .. }));
        let err = encode(&NativeValue::Int(-1), FieldType::Long, true, &mut buf).unwrap_err();
        assert!(matches!(err, CodecError::OutOfRange { .. }));
    }

    #[test]
    fn test_datetime_packed_lengths() {
        let mut buf = Vec::new();
        let date = DriverTime::date(2024, 2, 29);
        encode(&NativeValue::Time(date), FieldType::Date, false, &mut buf).unwrap();
        assert_eq!(buf, vec![4, 0xE8, 0x07, 2, 29]);

        buf.clear();
        let dt = date.at(13, 14, 15, 0);
        encode(&NativeValue::Time(dt), FieldType::DateTime, false, &mut buf).unwrap();
        assert_eq!(buf.len(), 8);

        buf.clear();
        let dt = date.at(13, 14, 15, 16);
        encode(&NativeValue::Time(dt), FieldType::DateTime, false, &mut buf).unwrap();
        assert_eq!(buf.len(), 12);
        assert_eq!(decode(FieldType::DateTime, false, &buf).unwrap(), NativeValue::Time(dt));
    }

    #[test]
    fn test_time_beyond_one_day() {
        let t = DriverTime {
            negative: true,
            hour: 838,
            minute: 59,
            second: 59,
            ..DriverTime::default()
        };
        assert_eq!(
            roundtrip(NativeValue::Time(t), FieldType::Time, false),
            NativeValue::Time(t)
        );
    }

    #[test]
    fn test_decode_bad_length() {
        assert!(decode(FieldType::Long, false, &[1, 2]).is_err());
        assert!(decode(FieldType::Date, false, &[4, 1]).is_err());
    }

    #[test]
    fn test_coerce_text_to_datetime() {
        let v = coerce(
            NativeValue::Bytes(b"2021-05-06 07:08:09.5".to_vec()),
            FieldType::DateTime,
            false,
        )
        .unwrap();
        assert_eq!(
            v,
            NativeValue::Time(DriverTime::date(2021, 5, 6).at(7, 8, 9, 500_000))
        );
    }

    #[test]
    fn test_coerce_integer_range() {
        assert_eq!(
            coerce(NativeValue::Int(7), FieldType::Short, true).unwrap(),
            NativeValue::UInt(7)
        );
        assert!(coerce(NativeValue::Int(70_000), FieldType::Short, false).is_err());
        assert!(coerce(NativeValue::Double(1.5), FieldType::Long, false).is_err());
    }

    #[test]
    fn test_time_text() {
        let t = DriverTime::parse("-12:30:00.25", FieldType::Time).unwrap();
        assert!(t.negative);
        assert_eq!(t.micros, 250_000);
        assert_eq!(t.to_text(FieldType::Time), "-12:30:00.250000");
    }
}
