use crate::protocol::{decimal, table::VoltTable, type_tag::TypeTag, util};
use crate::{VoltError, VoltResult};
use bigdecimal::BigDecimal;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

/// Bit pattern the server uses for a NULL FLOAT column value.
const NULL_FLOAT: f64 = -1.7E308;

/// Enum for all supported database value types.
///
/// Every scalar type has a sentinel byte pattern that denotes NULL on the
/// wire; the codec maps those sentinels to [`VoltValue::Null`] on decode
/// and writes them back when a `Null` is emitted into a typed position.
#[derive(Clone, Debug, PartialEq)]
pub enum VoltValue {
    /// Representation of a database NULL value.
    Null,
    /// Stores an 8-bit signed integer. `i8::MIN` is reserved as the
    /// NULL sentinel.
    TinyInt(i8),
    /// Stores a 16-bit signed integer. `i16::MIN` is reserved as the
    /// NULL sentinel.
    SmallInt(i16),
    /// Stores a 32-bit signed integer. `i32::MIN` is reserved as the
    /// NULL sentinel.
    Integer(i32),
    /// Stores a 64-bit signed integer. `i64::MIN` is reserved as the
    /// NULL sentinel.
    BigInt(i64),
    /// Stores a double-precision 64-bit floating-point number.
    Float(f64),
    /// Representation for fixed-point decimal values, scale 12,
    /// precision 38.
    Decimal(BigDecimal),
    /// Microseconds since the Unix epoch. `i64::MIN` is reserved as the
    /// NULL sentinel.
    Timestamp(i64),
    /// Stores a UTF-8 character string.
    String(String),
    /// Stores binary data.
    VarBinary(Vec<u8>),
    /// A result table sent as a value.
    Table(VoltTable),
    /// A homogeneous parameter array: element tag plus elements.
    ///
    /// Only valid as a procedure parameter; columns are always scalar.
    Array(TypeTag, Vec<VoltValue>),
}

impl VoltValue {
    /// The wire tag this value is emitted with, or `None` for `Null`
    /// (which has no intrinsic type of its own).
    pub fn type_tag(&self) -> Option<TypeTag> {
        match *self {
            VoltValue::Null => None,
            VoltValue::TinyInt(_) => Some(TypeTag::TINYINT),
            VoltValue::SmallInt(_) => Some(TypeTag::SMALLINT),
            VoltValue::Integer(_) => Some(TypeTag::INTEGER),
            VoltValue::BigInt(_) => Some(TypeTag::BIGINT),
            VoltValue::Float(_) => Some(TypeTag::FLOAT),
            VoltValue::Decimal(_) => Some(TypeTag::DECIMAL),
            VoltValue::Timestamp(_) => Some(TypeTag::TIMESTAMP),
            VoltValue::String(_) => Some(TypeTag::STRING),
            VoltValue::VarBinary(_) => Some(TypeTag::VARBINARY),
            VoltValue::Table(_) => Some(TypeTag::TABLE),
            VoltValue::Array(_, _) => Some(TypeTag::ARRAY),
        }
    }

    /// Returns true if the value is a NULL value.
    pub fn is_null(&self) -> bool {
        matches!(*self, VoltValue::Null)
    }

    /// Emits the value as a tagged procedure parameter: 1-byte type tag,
    /// then the value bytes.
    pub(crate) fn emit(&self, w: &mut dyn std::io::Write) -> VoltResult<()> {
        match *self {
            VoltValue::Null => {
                w.write_i8(TypeTag::NULL.as_i8())?;
                Ok(())
            }
            VoltValue::Array(element, ref values) => {
                w.write_i8(TypeTag::ARRAY.as_i8())?;
                emit_array(element, values, w)
            }
            _ => {
                let tag = self
                    .type_tag()
                    .ok_or_else(|| VoltError::Usage("untagged value".to_string()))?;
                w.write_i8(tag.as_i8())?;
                self.emit_value(tag, w)
            }
        }
    }

    /// Emits the bare value bytes for a position of type `tag`, without the
    /// tag itself. `Null` produces the sentinel pattern of `tag`.
    pub(crate) fn emit_value(&self, tag: TypeTag, w: &mut dyn std::io::Write) -> VoltResult<()> {
        match (tag, self) {
            (TypeTag::TINYINT, VoltValue::TinyInt(i)) => {
                reject_sentinel(*i == i8::MIN, self)?;
                w.write_i8(*i)?;
            }
            (TypeTag::TINYINT, VoltValue::Null) => w.write_i8(i8::MIN)?,

            (TypeTag::SMALLINT, VoltValue::SmallInt(i)) => {
                reject_sentinel(*i == i16::MIN, self)?;
                w.write_i16::<BigEndian>(*i)?;
            }
            (TypeTag::SMALLINT, VoltValue::Null) => w.write_i16::<BigEndian>(i16::MIN)?,

            (TypeTag::INTEGER, VoltValue::Integer(i)) => {
                reject_sentinel(*i == i32::MIN, self)?;
                w.write_i32::<BigEndian>(*i)?;
            }
            (TypeTag::INTEGER, VoltValue::Null) => w.write_i32::<BigEndian>(i32::MIN)?,

            (TypeTag::BIGINT, VoltValue::BigInt(i)) => {
                reject_sentinel(*i == i64::MIN, self)?;
                w.write_i64::<BigEndian>(*i)?;
            }
            (TypeTag::BIGINT, VoltValue::Null) => w.write_i64::<BigEndian>(i64::MIN)?,

            (TypeTag::FLOAT, VoltValue::Float(f)) => {
                reject_sentinel(f.to_bits() == NULL_FLOAT.to_bits(), self)?;
                w.write_f64::<BigEndian>(*f)?;
            }
            (TypeTag::FLOAT, VoltValue::Null) => w.write_f64::<BigEndian>(NULL_FLOAT)?,

            (TypeTag::DECIMAL, VoltValue::Decimal(ref bd)) => decimal::emit(bd, w)?,
            (TypeTag::DECIMAL, VoltValue::Null) => decimal::emit_null(w)?,

            (TypeTag::TIMESTAMP, VoltValue::Timestamp(micros)) => {
                reject_sentinel(*micros == i64::MIN, self)?;
                w.write_i64::<BigEndian>(*micros)?;
            }
            (TypeTag::TIMESTAMP, VoltValue::Null) => w.write_i64::<BigEndian>(i64::MIN)?,

            (TypeTag::STRING, VoltValue::String(ref s)) => util::emit_length_and_string(s, w)?,
            (TypeTag::STRING, VoltValue::Null) => w.write_i32::<BigEndian>(-1)?,

            (TypeTag::VARBINARY, VoltValue::VarBinary(ref v)) => {
                util::emit_length_and_bytes(v, w)?;
            }
            (TypeTag::VARBINARY, VoltValue::Null) => w.write_i32::<BigEndian>(-1)?,

            (TypeTag::TABLE, VoltValue::Table(ref t)) => t.emit(w)?,

            (tag, value) => {
                return Err(VoltError::Usage(format!(
                    "value {value:?} cannot be emitted as {tag}"
                )));
            }
        }
        Ok(())
    }

    /// Parses the bare value bytes of a position with type `tag`, mapping
    /// the type's sentinel pattern to `Null`.
    ///
    /// On failure the cursor is rewound to the start of the value.
    pub(crate) fn parse(
        tag: TypeTag,
        rdr: &mut std::io::Cursor<Vec<u8>>,
    ) -> VoltResult<VoltValue> {
        let start = rdr.position();
        parse_inner(tag, rdr).map_err(|e| {
            rdr.set_position(start);
            e
        })
    }
}

fn reject_sentinel(is_sentinel: bool, value: &VoltValue) -> VoltResult<()> {
    if is_sentinel {
        return Err(VoltError::Usage(format!(
            "{value:?} is the reserved NULL sentinel of its type"
        )));
    }
    Ok(())
}

#[allow(clippy::cast_possible_truncation)]
fn emit_array(
    element: TypeTag,
    values: &[VoltValue],
    w: &mut dyn std::io::Write,
) -> VoltResult<()> {
    for v in values {
        if !v.is_null() && v.type_tag() != Some(element) {
            return Err(VoltError::Usage(format!(
                "array element {v:?} does not match element type {element}"
            )));
        }
    }
    w.write_i8(element.as_i8())?;
    match element {
        // tinyint arrays are byte buffers and use an i32 count
        TypeTag::TINYINT => {
            if values.len() > i32::MAX as usize {
                return Err(VoltError::Usage("array too long".to_string()));
            }
            w.write_i32::<BigEndian>(values.len() as i32)?;
        }
        TypeTag::ARRAY => {
            return Err(VoltError::Usage("arrays cannot be nested".to_string()));
        }
        _ => {
            if values.len() > i16::MAX as usize {
                return Err(VoltError::Usage("array too long".to_string()));
            }
            w.write_i16::<BigEndian>(values.len() as i16)?;
        }
    }
    for v in values {
        v.emit_value(element, w)?;
    }
    Ok(())
}

fn parse_inner(tag: TypeTag, rdr: &mut std::io::Cursor<Vec<u8>>) -> VoltResult<VoltValue> {
    Ok(match tag {
        TypeTag::NULL => VoltValue::Null,
        TypeTag::TINYINT => match rdr.read_i8()? {
            i8::MIN => VoltValue::Null,
            i => VoltValue::TinyInt(i),
        },
        TypeTag::SMALLINT => match rdr.read_i16::<BigEndian>()? {
            i16::MIN => VoltValue::Null,
            i => VoltValue::SmallInt(i),
        },
        TypeTag::INTEGER => match rdr.read_i32::<BigEndian>()? {
            i32::MIN => VoltValue::Null,
            i => VoltValue::Integer(i),
        },
        TypeTag::BIGINT => match rdr.read_i64::<BigEndian>()? {
            i64::MIN => VoltValue::Null,
            i => VoltValue::BigInt(i),
        },
        TypeTag::FLOAT => {
            let f = rdr.read_f64::<BigEndian>()?;
            if f.to_bits() == NULL_FLOAT.to_bits() {
                VoltValue::Null
            } else {
                VoltValue::Float(f)
            }
        }
        TypeTag::DECIMAL => match decimal::parse(rdr)? {
            None => VoltValue::Null,
            Some(bd) => VoltValue::Decimal(bd),
        },
        TypeTag::TIMESTAMP => match rdr.read_i64::<BigEndian>()? {
            i64::MIN => VoltValue::Null,
            micros => VoltValue::Timestamp(micros),
        },
        TypeTag::STRING => match util::parse_string(rdr)? {
            None => VoltValue::Null,
            Some(s) => VoltValue::String(s),
        },
        TypeTag::VARBINARY => match util::parse_length(rdr, "varbinary")? {
            None => VoltValue::Null,
            Some(len) => VoltValue::VarBinary(util::parse_bytes(len, rdr)?),
        },
        TypeTag::TABLE => VoltValue::Table(VoltTable::parse(rdr)?),
        TypeTag::ARRAY => parse_array(rdr)?,
    })
}

fn parse_array(rdr: &mut std::io::Cursor<Vec<u8>>) -> VoltResult<VoltValue> {
    let element = TypeTag::try_new(rdr.read_i8()?)?;
    let count = match element {
        TypeTag::TINYINT => i64::from(rdr.read_i32::<BigEndian>()?),
        TypeTag::ARRAY => {
            return Err(VoltError::malformed("nested array"));
        }
        _ => i64::from(rdr.read_i16::<BigEndian>()?),
    };
    match count {
        -1 => Ok(VoltValue::Null),
        count if count >= 0 => {
            #[allow(clippy::cast_possible_truncation)]
            #[allow(clippy::cast_sign_loss)]
            let mut values = Vec::with_capacity(count as usize);
            for _ in 0..count {
                values.push(VoltValue::parse(element, rdr)?);
            }
            Ok(VoltValue::Array(element, values))
        }
        count => Err(VoltError::malformed(format!(
            "negative array count {count}"
        ))),
    }
}

impl From<i8> for VoltValue {
    fn from(i: i8) -> Self {
        VoltValue::TinyInt(i)
    }
}
impl From<i16> for VoltValue {
    fn from(i: i16) -> Self {
        VoltValue::SmallInt(i)
    }
}
impl From<i32> for VoltValue {
    fn from(i: i32) -> Self {
        VoltValue::Integer(i)
    }
}
impl From<i64> for VoltValue {
    fn from(i: i64) -> Self {
        VoltValue::BigInt(i)
    }
}
impl From<f64> for VoltValue {
    fn from(f: f64) -> Self {
        VoltValue::Float(f)
    }
}
impl From<&str> for VoltValue {
    fn from(s: &str) -> Self {
        VoltValue::String(s.to_string())
    }
}
impl From<String> for VoltValue {
    fn from(s: String) -> Self {
        VoltValue::String(s)
    }
}
impl From<Vec<u8>> for VoltValue {
    fn from(v: Vec<u8>) -> Self {
        VoltValue::VarBinary(v)
    }
}
impl From<BigDecimal> for VoltValue {
    fn from(bd: BigDecimal) -> Self {
        VoltValue::Decimal(bd)
    }
}
