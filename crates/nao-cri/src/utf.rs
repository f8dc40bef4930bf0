//! CRI `@UTF` column tables.
//!
//! Every CRIWare directory structure (CPK header, TOC, ITOC, USM stream
//! directory and stream headers) is stored as one of these big-endian,
//! self-describing tables:
//!
//! ```text
//! 0x00 "@UTF"
//! 0x04 u32 table size (bytes after this field)
//! 0x08 u16 version     0x0A u16 rows offset
//! 0x0C u32 strings offset
//! 0x10 u32 data offset
//! 0x14 u32 table name offset
//! 0x18 u16 column count 0x1A u16 row width
//! 0x1C u32 row count
//! 0x20 column schema
//! ```
//!
//! All offsets are relative to 0x08.

use nao_common::BinaryReader;

use crate::{Error, Result};

/// Table signature.
pub const UTF_MAGIC: &[u8; 4] = b"@UTF";

const BASE: usize = 8;
const HEADER_SIZE: usize = 0x20;

const FLAG_NAME: u8 = 0x10;
const FLAG_DEFAULT: u8 = 0x20;
const FLAG_ROW: u8 = 0x40;
const FLAG_UNDEFINED: u8 = 0x80;
const TYPE_MASK: u8 = 0x0F;

/// Column value type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ValueType {
    U8 = 0x0,
    I8 = 0x1,
    U16 = 0x2,
    I16 = 0x3,
    U32 = 0x4,
    I32 = 0x5,
    U64 = 0x6,
    I64 = 0x7,
    F32 = 0x8,
    F64 = 0x9,
    String = 0xA,
    Data = 0xB,
}

impl TryFrom<u8> for ValueType {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, u8> {
        Ok(match value {
            0x0 => Self::U8,
            0x1 => Self::I8,
            0x2 => Self::U16,
            0x3 => Self::I16,
            0x4 => Self::U32,
            0x5 => Self::I32,
            0x6 => Self::U64,
            0x7 => Self::I64,
            0x8 => Self::F32,
            0x9 => Self::F64,
            0xA => Self::String,
            0xB => Self::Data,
            other => return Err(other),
        })
    }
}

/// A decoded cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    U64(u64),
    I64(i64),
    F32(f32),
    F64(f64),
    String(String),
    Data(Vec<u8>),
}

impl Value {
    /// The type code of this value.
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::U8(_) => ValueType::U8,
            Self::I8(_) => ValueType::I8,
            Self::U16(_) => ValueType::U16,
            Self::I16(_) => ValueType::I16,
            Self::U32(_) => ValueType::U32,
            Self::I32(_) => ValueType::I32,
            Self::U64(_) => ValueType::U64,
            Self::I64(_) => ValueType::I64,
            Self::F32(_) => ValueType::F32,
            Self::F64(_) => ValueType::F64,
            Self::String(_) => ValueType::String,
            Self::Data(_) => ValueType::Data,
        }
    }

    /// Integer value widened to u64. Negative integers yield `None`.
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Self::U8(v) => Some(v.into()),
            Self::U16(v) => Some(v.into()),
            Self::U32(v) => Some(v.into()),
            Self::U64(v) => Some(v),
            Self::I8(v) => u64::try_from(v).ok(),
            Self::I16(v) => u64::try_from(v).ok(),
            Self::I32(v) => u64::try_from(v).ok(),
            Self::I64(v) => u64::try_from(v).ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_data(&self) -> Option<&[u8]> {
        match self {
            Self::Data(d) => Some(d),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
enum Storage {
    /// Column exists but holds no value.
    Zero,
    /// Same value for every row, stored in the schema.
    Constant(Value),
    /// Value stored in each row.
    PerRow(ValueType),
}

#[derive(Debug, Clone)]
struct Column {
    name: String,
    storage: Storage,
}

/// A parsed `@UTF` table.
#[derive(Debug, Clone)]
pub struct UtfTable {
    name: String,
    columns: Vec<String>,
    rows: Vec<Vec<Option<Value>>>,
}

impl UtfTable {
    /// Parse a table starting at the first byte of `data`.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut reader = BinaryReader::new(data);
        reader
            .expect_magic(UTF_MAGIC)
            .map_err(|_| Error::Corrupt("missing @UTF signature".into()))?;

        let table_size = reader.read_u32_be()? as usize;
        let table = data
            .get(..BASE.saturating_add(table_size))
            .ok_or_else(|| Error::Corrupt(format!("@UTF table size {table_size} exceeds buffer")))?;
        if table.len() < HEADER_SIZE {
            return Err(Error::Corrupt("@UTF table smaller than its header".into()));
        }

        let mut reader = BinaryReader::new_at(table, BASE);
        let _version = reader.read_u16_be()?;
        let rows_offset = reader.read_u16_be()? as usize;
        let strings_offset = reader.read_u32_be()? as usize;
        let data_offset = reader.read_u32_be()? as usize;
        let name_offset = reader.read_u32_be()? as usize;
        let column_count = reader.read_u16_be()? as usize;
        let row_width = reader.read_u16_be()? as usize;
        let row_count = reader.read_u32_be()? as usize;

        let pools = Pools::new(table, strings_offset, data_offset)?;

        // A zero-width row still claims one byte, so the row count stays
        // bounded by the table size.
        let rows_start = BASE + rows_offset;
        let rows_fit = row_count
            .checked_mul(row_width.max(1))
            .and_then(|size| size.checked_add(rows_start))
            .is_some_and(|end| end <= table.len());
        if !rows_fit {
            return Err(Error::Corrupt(format!(
                "@UTF rows ({row_count} x {row_width}) exceed table of {} bytes",
                table.len()
            )));
        }

        let name = pools.string(name_offset)?;

        let mut columns = Vec::with_capacity(column_count);
        for _ in 0..column_count {
            columns.push(Self::read_column(&mut reader, &pools)?);
        }

        let per_row = columns.iter().any(|c| matches!(c.storage, Storage::PerRow(_)));
        if per_row && row_count > 0 && row_width == 0 {
            return Err(Error::Corrupt(format!(
                "@UTF table '{name}' has per-row columns but zero row width"
            )));
        }

        let mut rows = Vec::new();
        for row in 0..row_count {
            let mut reader = BinaryReader::new_at(table, rows_start + row * row_width);
            let mut values = Vec::with_capacity(columns.len());

            for column in &columns {
                values.push(match &column.storage {
                    Storage::Zero => None,
                    Storage::Constant(value) => Some(value.clone()),
                    Storage::PerRow(value_type) => {
                        Some(read_value(&mut reader, *value_type, &pools)?)
                    }
                });
            }

            if reader.position() > rows_start + (row + 1) * row_width {
                return Err(Error::Corrupt(format!(
                    "@UTF row {row} of table '{name}' is wider than {row_width} bytes"
                )));
            }
            rows.push(values);
        }

        Ok(Self {
            name,
            columns: columns.into_iter().map(|c| c.name).collect(),
            rows,
        })
    }

    fn read_column(reader: &mut BinaryReader<'_>, pools: &Pools<'_>) -> Result<Column> {
        let flags = reader.read_u8()?;
        if flags & FLAG_UNDEFINED != 0 {
            return Err(Error::Corrupt(format!("undefined @UTF column flags {flags:#04x}")));
        }

        let value_type = ValueType::try_from(flags & TYPE_MASK)
            .map_err(|t| Error::Corrupt(format!("unsupported @UTF column type {t:#x}")))?;

        let name = if flags & FLAG_NAME != 0 {
            pools.string(reader.read_u32_be()? as usize)?
        } else {
            String::new()
        };

        let mut storage = Storage::Zero;
        if flags & FLAG_DEFAULT != 0 {
            storage = Storage::Constant(read_value(reader, value_type, pools)?);
        }
        if flags & FLAG_ROW != 0 {
            storage = Storage::PerRow(value_type);
        }

        Ok(Column { name, storage })
    }

    /// Table name from the string pool.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.column_index(column).is_some()
    }

    fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    /// Value of `column` in `row`; `None` for missing columns and
    /// zero-storage cells.
    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let index = self.column_index(column)?;
        self.rows.get(row)?.get(index)?.as_ref()
    }

    pub fn get_u64(&self, row: usize, column: &str) -> Option<u64> {
        self.get(row, column).and_then(Value::as_u64)
    }

    pub fn get_str(&self, row: usize, column: &str) -> Option<&str> {
        self.get(row, column).and_then(Value::as_str)
    }

    pub fn get_data(&self, row: usize, column: &str) -> Option<&[u8]> {
        self.get(row, column).and_then(Value::as_data)
    }
}

/// String and data pools of one table.
struct Pools<'a> {
    strings: &'a [u8],
    data: &'a [u8],
}

impl<'a> Pools<'a> {
    fn new(table: &'a [u8], strings_offset: usize, data_offset: usize) -> Result<Self> {
        let strings = table
            .get(BASE.saturating_add(strings_offset)..)
            .ok_or_else(|| Error::Corrupt(format!("@UTF strings offset {strings_offset:#x} out of range")))?;
        let data = table
            .get(BASE.saturating_add(data_offset)..)
            .ok_or_else(|| Error::Corrupt(format!("@UTF data offset {data_offset:#x} out of range")))?;
        Ok(Self { strings, data })
    }

    fn string(&self, offset: usize) -> Result<String> {
        let bytes = self
            .strings
            .get(offset..)
            .ok_or_else(|| Error::Corrupt(format!("@UTF string offset {offset:#x} out of range")))?;
        Ok(BinaryReader::new(bytes).read_cstring()?.to_owned())
    }

    fn data(&self, offset: usize, size: usize) -> Result<Vec<u8>> {
        offset
            .checked_add(size)
            .and_then(|end| self.data.get(offset..end))
            .map(<[u8]>::to_vec)
            .ok_or_else(|| Error::Corrupt(format!("@UTF data {offset:#x}+{size:#x} out of range")))
    }
}

fn read_value(reader: &mut BinaryReader<'_>, value_type: ValueType, pools: &Pools<'_>) -> Result<Value> {
    Ok(match value_type {
        ValueType::U8 => Value::U8(reader.read_u8()?),
        ValueType::I8 => Value::I8(reader.read_i8()?),
        ValueType::U16 => Value::U16(reader.read_u16_be()?),
        ValueType::I16 => Value::I16(reader.read_i16_be()?),
        ValueType::U32 => Value::U32(reader.read_u32_be()?),
        ValueType::I32 => Value::I32(reader.read_i32_be()?),
        ValueType::U64 => Value::U64(reader.read_u64_be()?),
        ValueType::I64 => Value::I64(reader.read_i64_be()?),
        ValueType::F32 => Value::F32(reader.read_f32_be()?),
        ValueType::F64 => Value::F64(reader.read_f64_be()?),
        ValueType::String => Value::String(pools.string(reader.read_u32_be()? as usize)?),
        ValueType::Data => {
            let offset = reader.read_u32_be()? as usize;
            let size = reader.read_u32_be()? as usize;
            Value::Data(pools.data(offset, size)?)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::UtfBuilder;

    #[test]
    fn test_per_row_constant_and_zero_columns() {
        let data = UtfBuilder::new("TEST")
            .column("Id", ValueType::U32)
            .column("Name", ValueType::String)
            .constant("Align", Value::U16(0x800))
            .zero("Missing", ValueType::U64)
            .row(vec![Value::U32(7), Value::String("first".into())])
            .row(vec![Value::U32(9), Value::String("second".into())])
            .build();

        let table = UtfTable::parse(&data).unwrap();
        assert_eq!(table.name(), "TEST");
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.get_u64(1, "Id"), Some(9));
        assert_eq!(table.get_str(0, "Name"), Some("first"));
        assert_eq!(table.get_u64(1, "Align"), Some(0x800));
        assert!(table.has_column("Missing"));
        assert_eq!(table.get(0, "Missing"), None);
        assert_eq!(table.get(0, "Nope"), None);
    }

    #[test]
    fn test_data_column() {
        let nested = UtfBuilder::new("INNER")
            .column("X", ValueType::U8)
            .row(vec![Value::U8(3)])
            .build();
        let data = UtfBuilder::new("OUTER")
            .column("Blob", ValueType::Data)
            .row(vec![Value::Data(nested.clone())])
            .build();

        let table = UtfTable::parse(&data).unwrap();
        let blob = table.get_data(0, "Blob").unwrap();
        assert_eq!(blob, nested.as_slice());

        let inner = UtfTable::parse(blob).unwrap();
        assert_eq!(inner.get_u64(0, "X"), Some(3));
    }

    #[test]
    fn test_negative_integer_is_not_u64() {
        assert_eq!(Value::I32(-1).as_u64(), None);
        assert_eq!(Value::I16(12).as_u64(), Some(12));
    }

    #[test]
    fn test_rejects_bad_magic() {
        assert!(matches!(
            UtfTable::parse(b"@UTX\0\0\0\0"),
            Err(Error::Corrupt(_))
        ));
    }

    /// Bare header: no columns, name "T", the given row width and count.
    fn header_only(row_width: u16, row_count: u32) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(UTF_MAGIC);
        data.extend_from_slice(&0x20u32.to_be_bytes());
        data.extend_from_slice(&0u16.to_be_bytes());
        data.extend_from_slice(&0x18u16.to_be_bytes());
        data.extend_from_slice(&0x18u32.to_be_bytes());
        data.extend_from_slice(&0x20u32.to_be_bytes());
        data.extend_from_slice(&0u32.to_be_bytes());
        data.extend_from_slice(&0u16.to_be_bytes());
        data.extend_from_slice(&row_width.to_be_bytes());
        data.extend_from_slice(&row_count.to_be_bytes());
        data.extend_from_slice(b"T\0\0\0\0\0\0\0");
        data
    }

    #[test]
    fn test_rejects_huge_row_count_with_zero_width() {
        let data = header_only(0, u32::MAX);
        assert_eq!(data.len(), 0x28);
        assert!(matches!(UtfTable::parse(&data), Err(Error::Corrupt(_))));

        let table = UtfTable::parse(&header_only(0, 2)).unwrap();
        assert_eq!(table.name(), "T");
        assert_eq!(table.row_count(), 2);
    }

    #[test]
    fn test_rejects_per_row_column_with_zero_width() {
        let mut data = UtfBuilder::new("T")
            .column("A", ValueType::U32)
            .row(vec![Value::U32(1)])
            .build();
        // Row width lives at 0x1A.
        data[0x1A..0x1C].copy_from_slice(&0u16.to_be_bytes());

        assert!(matches!(UtfTable::parse(&data), Err(Error::Corrupt(_))));
    }

    #[test]
    fn test_rejects_truncated_table() {
        let mut data = UtfBuilder::new("T")
            .column("A", ValueType::U32)
            .row(vec![Value::U32(1)])
            .build();
        data.truncate(data.len() - 4);

        assert!(matches!(UtfTable::parse(&data), Err(Error::Corrupt(_))));
    }
}
