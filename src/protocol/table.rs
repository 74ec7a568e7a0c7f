//! Codec for result tables.
//!
//! Wire layout: i32 total byte length, i32 metadata length, i16 status,
//! i32 column count, per-column type tag, per-column length-prefixed name,
//! i32 row count, then each row as an i32 row byte length followed by the
//! column values in schema order. All length fields are verified against
//! the bytes actually consumed; any disagreement is a protocol violation.

use crate::protocol::{type_tag::TypeTag, util, value::VoltValue};
use crate::{VoltError, VoltResult};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

/// Name and type of one result table column.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ColumnInfo {
    name: String,
    type_tag: TypeTag,
}

impl ColumnInfo {
    /// Creates a column descriptor.
    pub fn new<S: Into<String>>(name: S, type_tag: TypeTag) -> Self {
        Self {
            name: name.into(),
            type_tag,
        }
    }

    /// The column name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The column's value type.
    pub fn type_tag(&self) -> TypeTag {
        self.type_tag
    }
}

/// An immutable result table: column schema, rows, and a status byte.
#[derive(Clone, Debug, PartialEq)]
pub struct VoltTable {
    status: i16,
    columns: Vec<ColumnInfo>,
    rows: Vec<Vec<VoltValue>>,
}

impl VoltTable {
    /// Builds a table from a schema and rows.
    ///
    /// Every row must have exactly one value per column, and every non-null
    /// value must match its column's type.
    pub fn new(columns: Vec<ColumnInfo>, rows: Vec<Vec<VoltValue>>) -> VoltResult<Self> {
        Self::with_status(0, columns, rows)
    }

    /// Like [`VoltTable::new`], with an explicit status byte.
    pub fn with_status(
        status: i8,
        columns: Vec<ColumnInfo>,
        rows: Vec<Vec<VoltValue>>,
    ) -> VoltResult<Self> {
        for (idx, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(VoltError::Usage(format!(
                    "row {idx} has {} values for {} columns",
                    row.len(),
                    columns.len()
                )));
            }
            for (value, column) in row.iter().zip(&columns) {
                if !value.is_null() && value.type_tag() != Some(column.type_tag) {
                    return Err(VoltError::Usage(format!(
                        "value {value:?} does not fit column {} of type {}",
                        column.name, column.type_tag
                    )));
                }
            }
        }
        Ok(Self {
            status: i16::from(status),
            columns,
            rows,
        })
    }

    /// The table's status byte.
    #[allow(clippy::cast_possible_truncation)]
    pub fn status(&self) -> i8 {
        (self.status & 0xFF) as i8
    }

    /// Number of columns.
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Number of rows.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// The column schema.
    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    /// The rows, outer vector in arrival order.
    pub fn rows(&self) -> &[Vec<VoltValue>] {
        &self.rows
    }

    /// Index of the column with the given name, if any.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// The value at (`row`, `col`), if both indexes are in range.
    pub fn value(&self, row: usize, col: usize) -> Option<&VoltValue> {
        self.rows.get(row).and_then(|r| r.get(col))
    }

    /// Emits the table in wire format.
    ///
    /// Used when a table is sent as a procedure parameter, and by test
    /// doubles that play the server side of the protocol.
    #[allow(clippy::cast_possible_truncation)]
    #[allow(clippy::cast_possible_wrap)]
    pub fn emit(&self, w: &mut dyn std::io::Write) -> VoltResult<()> {
        let mut meta: Vec<u8> = Vec::new();
        meta.write_i16::<BigEndian>(self.status)?;
        meta.write_i32::<BigEndian>(self.columns.len() as i32)?;
        for column in &self.columns {
            meta.write_i8(column.type_tag.as_i8())?;
        }
        for column in &self.columns {
            util::emit_length_and_string(&column.name, &mut meta)?;
        }

        let mut body: Vec<u8> = Vec::new();
        let mut scratch: Vec<u8> = Vec::new();
        for row in &self.rows {
            scratch.clear();
            for (value, column) in row.iter().zip(&self.columns) {
                value.emit_value(column.type_tag, &mut scratch)?;
            }
            body.write_i32::<BigEndian>(scratch.len() as i32)?;
            body.extend_from_slice(&scratch);
        }

        let total = 4 + meta.len() + 4 + body.len();
        w.write_i32::<BigEndian>(total as i32)?;
        w.write_i32::<BigEndian>(meta.len() as i32)?;
        w.write_all(&meta)?;
        w.write_i32::<BigEndian>(self.rows.len() as i32)?;
        w.write_all(&body)?;
        Ok(())
    }

    /// Parses one table from the cursor, verifying every length field.
    pub(crate) fn parse(rdr: &mut std::io::Cursor<Vec<u8>>) -> VoltResult<Self> {
        let total_len = require_len(rdr, "table length")?;
        let table_start = rdr.position();
        remaining_check(rdr, total_len, "table")?;

        let meta_len = require_len(rdr, "table metadata length")?;
        let meta_start = rdr.position();
        let status = rdr.read_i16::<BigEndian>()?;
        let column_count = require_len(rdr, "column count")?;

        let mut tags = Vec::new();
        for _ in 0..column_count {
            tags.push(TypeTag::try_new(rdr.read_i8()?)?);
        }
        let mut columns = Vec::new();
        for tag in tags {
            let name = util::parse_nonnull_string(rdr, "column name")?;
            columns.push(ColumnInfo::new(name, tag));
        }
        if rdr.position() - meta_start != meta_len as u64 {
            return Err(VoltError::malformed(format!(
                "table metadata length {meta_len} disagrees with its content"
            )));
        }

        let row_count = require_len(rdr, "row count")?;
        let mut rows = Vec::new();
        for _ in 0..row_count {
            let row_len = require_len(rdr, "row length")?;
            remaining_check(rdr, row_len, "row")?;
            let row_start = rdr.position();
            let mut row = Vec::with_capacity(columns.len());
            for column in &columns {
                row.push(VoltValue::parse(column.type_tag, rdr)?);
            }
            if rdr.position() - row_start != row_len as u64 {
                return Err(VoltError::malformed(format!(
                    "row length {row_len} disagrees with its content"
                )));
            }
            rows.push(row);
        }

        if rdr.position() - table_start != total_len as u64 {
            return Err(VoltError::malformed(format!(
                "table length {total_len} disagrees with its content"
            )));
        }
        Ok(Self {
            status,
            columns,
            rows,
        })
    }
}

// Read an i32 length field that must be non-negative.
fn require_len(rdr: &mut std::io::Cursor<Vec<u8>>, what: &str) -> VoltResult<usize> {
    util::parse_length(rdr, what)?
        .ok_or_else(|| VoltError::malformed(format!("null {what}")))
}

// The declared length may not overrun the frame.
fn remaining_check(
    rdr: &std::io::Cursor<Vec<u8>>,
    len: usize,
    what: &str,
) -> VoltResult<()> {
    let remaining = rdr.get_ref().len() as u64 - rdr.position();
    if len as u64 > remaining {
        return Err(VoltError::malformed(format!(
            "{what} length {len} overruns the frame ({remaining} bytes left)"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{ColumnInfo, VoltTable};
    use crate::protocol::{type_tag::TypeTag, value::VoltValue};
    use std::io::Cursor;

    fn sample() -> VoltTable {
        VoltTable::with_status(
            -3,
            vec![
                ColumnInfo::new("id", TypeTag::INTEGER),
                ColumnInfo::new("name", TypeTag::STRING),
                ColumnInfo::new("score", TypeTag::FLOAT),
            ],
            vec![
                vec![
                    VoltValue::Integer(1),
                    VoltValue::String("ada".to_string()),
                    VoltValue::Float(9.5),
                ],
                vec![VoltValue::Integer(2), VoltValue::Null, VoltValue::Null],
            ],
        )
        .unwrap()
    }

    fn wire(t: &VoltTable) -> Vec<u8> {
        let mut buf = Vec::new();
        t.emit(&mut buf).unwrap();
        buf
    }

    #[test]
    fn roundtrip() {
        let table = sample();
        let parsed = VoltTable::parse(&mut Cursor::new(wire(&table))).unwrap();
        assert_eq!(parsed, table);
        assert_eq!(parsed.status(), -3);
        assert_eq!(parsed.column_index("score"), Some(2));
        assert_eq!(parsed.value(0, 1), Some(&VoltValue::String("ada".to_string())));
        assert_eq!(parsed.value(1, 2), Some(&VoltValue::Null));
    }

    #[test]
    fn empty_table_roundtrip() {
        let table = VoltTable::new(vec![ColumnInfo::new("n", TypeTag::BIGINT)], vec![]).unwrap();
        let parsed = VoltTable::parse(&mut Cursor::new(wire(&table))).unwrap();
        assert_eq!(parsed.row_count(), 0);
        assert_eq!(parsed.column_count(), 1);
    }

    #[test]
    fn mismatched_row_width_is_rejected() {
        assert!(VoltTable::new(
            vec![ColumnInfo::new("a", TypeTag::INTEGER)],
            vec![vec![VoltValue::Integer(1), VoltValue::Integer(2)]],
        )
        .is_err());
    }

    #[test]
    fn corrupted_row_length_is_malformed() {
        let mut buf = wire(&sample());
        // the first row-length field sits right after metadata and row count;
        // find it by re-reading the metadata length
        let meta_len = i32::from_be_bytes(buf[4..8].try_into().unwrap()) as usize;
        let row_len_pos = 8 + meta_len + 4;
        buf[row_len_pos..row_len_pos + 4].copy_from_slice(&1_i32.to_be_bytes());
        assert!(VoltTable::parse(&mut Cursor::new(buf)).is_err());
    }

    #[test]
    fn truncated_table_is_malformed() {
        let mut buf = wire(&sample());
        buf.truncate(buf.len() - 3);
        assert!(VoltTable::parse(&mut Cursor::new(buf)).is_err());
    }

    #[test]
    fn table_as_value_roundtrip() {
        let value = VoltValue::Table(sample());
        let mut buf = Vec::new();
        value.emit(&mut buf).unwrap();
        assert_eq!(buf[0], 21);
        let mut rdr = Cursor::new(buf[1..].to_vec());
        assert_eq!(VoltValue::parse(TypeTag::TABLE, &mut rdr).unwrap(), value);
    }
}
