//! Driver-side type descriptors and error codes.

/// Column type tag reported by the remote endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FieldType {
    Decimal = 0,
    Tiny = 1,
    Short = 2,
    Long = 3,
    Float = 4,
    Double = 5,
    Null = 6,
    Timestamp = 7,
    LongLong = 8,
    Int24 = 9,
    Date = 10,
    Time = 11,
    DateTime = 12,
    Year = 13,
    VarChar = 15,
    Bit = 16,
    Json = 245,
    NewDecimal = 246,
    Enum = 247,
    Set = 248,
    TinyBlob = 249,
    MediumBlob = 250,
    LongBlob = 251,
    Blob = 252,
    VarString = 253,
    String = 254,
    Geometry = 255,
}

impl FieldType {
    /// Create a FieldType from its raw protocol value.
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => FieldType::Decimal,
            1 => FieldType::Tiny,
            2 => FieldType::Short,
            3 => FieldType::Long,
            4 => FieldType::Float,
            5 => FieldType::Double,
            6 => FieldType::Null,
            7 => FieldType::Timestamp,
            8 => FieldType::LongLong,
            9 => FieldType::Int24,
            10 => FieldType::Date,
            11 => FieldType::Time,
            12 => FieldType::DateTime,
            13 => FieldType::Year,
            15 => FieldType::VarChar,
            16 => FieldType::Bit,
            245 => FieldType::Json,
            246 => FieldType::NewDecimal,
            247 => FieldType::Enum,
            248 => FieldType::Set,
            249 => FieldType::TinyBlob,
            250 => FieldType::MediumBlob,
            251 => FieldType::LongBlob,
            252 => FieldType::Blob,
            253 => FieldType::VarString,
            254 => FieldType::String,
            255 => FieldType::Geometry,
            _ => return None,
        })
    }

    /// Width in bytes of the fixed-size buffer layout, if any.
    pub fn fixed_width(self) -> Option<usize> {
        match self {
            FieldType::Tiny => Some(1),
            FieldType::Short | FieldType::Year => Some(2),
            FieldType::Long | FieldType::Int24 | FieldType::Float => Some(4),
            FieldType::LongLong | FieldType::Double => Some(8),
            _ => None,
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            FieldType::Tiny
                | FieldType::Short
                | FieldType::Long
                | FieldType::Int24
                | FieldType::LongLong
                | FieldType::Year
        )
    }

    pub fn is_temporal(self) -> bool {
        matches!(
            self,
            FieldType::Date | FieldType::Time | FieldType::DateTime | FieldType::Timestamp
        )
    }

    /// Types transferred as an uninterpreted byte string.
    pub fn is_byte_string(self) -> bool {
        matches!(
            self,
            FieldType::Decimal
                | FieldType::NewDecimal
                | FieldType::VarChar
                | FieldType::VarString
                | FieldType::String
                | FieldType::Enum
                | FieldType::Set
                | FieldType::Json
                | FieldType::Bit
                | FieldType::TinyBlob
                | FieldType::MediumBlob
                | FieldType::LongBlob
                | FieldType::Blob
                | FieldType::Geometry
        )
    }

    /// Inclusive integer range of this type, honoring the unsigned flag.
    pub fn integer_range(self, unsigned: bool) -> Option<(i128, i128)> {
        let range = match (self, unsigned) {
            (FieldType::Tiny, false) => (i8::MIN as i128, i8::MAX as i128),
            (FieldType::Tiny, true) => (0, u8::MAX as i128),
            (FieldType::Short, false) => (i16::MIN as i128, i16::MAX as i128),
            (FieldType::Short, true) => (0, u16::MAX as i128),
            (FieldType::Year, _) => (0, 2155),
            (FieldType::Int24, false) => (-(1 << 23), (1 << 23) - 1),
            (FieldType::Int24, true) => (0, (1 << 24) - 1),
            (FieldType::Long, false) => (i32::MIN as i128, i32::MAX as i128),
            (FieldType::Long, true) => (0, u32::MAX as i128),
            (FieldType::LongLong, false) => (i64::MIN as i128, i64::MAX as i128),
            (FieldType::LongLong, true) => (0, u64::MAX as i128),
            _ => return None,
        };
        Some(range)
    }
}

/// Column flag bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct ColumnFlags(pub u16);

impl ColumnFlags {
    pub const NOT_NULL: ColumnFlags = ColumnFlags(1);
    pub const PRI_KEY: ColumnFlags = ColumnFlags(2);
    pub const UNIQUE_KEY: ColumnFlags = ColumnFlags(4);
    pub const UNSIGNED: ColumnFlags = ColumnFlags(32);
    pub const BINARY: ColumnFlags = ColumnFlags(128);

    pub const fn empty() -> Self {
        ColumnFlags(0)
    }

    pub const fn contains(self, other: ColumnFlags) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn with(self, other: ColumnFlags) -> Self {
        ColumnFlags(self.0 | other.0)
    }
}

/// Result column metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    pub name: String,
    pub field_type: FieldType,
    pub flags: ColumnFlags,
    /// Maximum length in bytes of a value of this column
    pub length: u32,
    pub decimals: u8,
}

impl FieldInfo {
    /// Create field metadata with the type's default length.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        let length = match field_type.fixed_width() {
            Some(w) => w as u32,
            None if field_type.is_temporal() => 12,
            None => 65_535,
        };
        Self {
            name: name.into(),
            field_type,
            flags: ColumnFlags::empty(),
            length,
            decimals: 0,
        }
    }

    #[must_use]
    pub fn with_flags(mut self, flags: ColumnFlags) -> Self {
        self.flags = self.flags.with(flags);
        self
    }

    #[must_use]
    pub fn with_length(mut self, length: u32) -> Self {
        self.length = length;
        self
    }

    pub fn is_unsigned(&self) -> bool {
        self.flags.contains(ColumnFlags::UNSIGNED)
    }

    pub fn is_binary(&self) -> bool {
        self.flags.contains(ColumnFlags::BINARY)
    }
}

/// Outcome of a successful fetch call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    /// A row was written into the result buffers.
    Row,
    /// The result set is exhausted.
    NoData,
    /// A row was written but at least one column did not fit its buffer.
    Truncated,
}

/// Statement cursor mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CursorType {
    #[default]
    NoCursor,
    ReadOnly,
}

/// Statement attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StmtAttr {
    CursorType(CursorType),
    /// Rows fetched from the server per round trip when a cursor is open
    PrefetchRows(u32),
}

/// Driver error codes.
pub mod code {
    pub const CR_NO_ERROR: u32 = 0;
    pub const CR_UNKNOWN_ERROR: u32 = 2000;
    pub const CR_CONN_HOST_ERROR: u32 = 2003;
    pub const CR_SERVER_GONE_ERROR: u32 = 2006;
    pub const CR_OUT_OF_MEMORY: u32 = 2008;
    pub const CR_SERVER_LOST: u32 = 2013;
    pub const CR_COMMANDS_OUT_OF_SYNC: u32 = 2014;
    pub const CR_NO_PREPARE_STMT: u32 = 2030;
    pub const CR_PARAMS_NOT_BOUND: u32 = 2031;
    pub const CR_NO_RESULT_SET: u32 = 2053;

    pub const ER_BAD_NULL_ERROR: u32 = 1048;
    pub const ER_DUP_ENTRY: u32 = 1062;
    pub const ER_PARSE_ERROR: u32 = 1064;
    pub const ER_BAD_FIELD_ERROR: u32 = 1054;
    pub const ER_NO_SUCH_TABLE: u32 = 1146;
    pub const ER_WARN_DATA_OUT_OF_RANGE: u32 = 1264;
    pub const ER_WRONG_ARGUMENTS: u32 = 1210;
    pub const ER_TRUNCATED_WRONG_VALUE_FOR_FIELD: u32 = 1366;
    pub const ER_DIVISION_BY_ZERO: u32 = 1365;
}
