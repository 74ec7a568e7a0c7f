use crate::{VoltError, VoltResult};

/// Wire tag of a value type, as used for procedure parameters and result
/// table columns.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum TypeTag {
    /// Tag of a parameter array; never a column type.
    ARRAY = -99,
    /// Explicit NULL parameter without a more concrete type.
    NULL = 1,
    /// For database type TINYINT;
    /// used with [`VoltValue::TinyInt`](crate::VoltValue::TinyInt).
    TINYINT = 3,
    /// For database type SMALLINT;
    /// used with [`VoltValue::SmallInt`](crate::VoltValue::SmallInt).
    SMALLINT = 4,
    /// For database type INTEGER;
    /// used with [`VoltValue::Integer`](crate::VoltValue::Integer).
    INTEGER = 5,
    /// For database type BIGINT;
    /// used with [`VoltValue::BigInt`](crate::VoltValue::BigInt).
    BIGINT = 6,
    /// For database type FLOAT;
    /// used with [`VoltValue::Float`](crate::VoltValue::Float).
    FLOAT = 8,
    /// For database type VARCHAR;
    /// used with [`VoltValue::String`](crate::VoltValue::String).
    STRING = 9,
    /// For database type TIMESTAMP;
    /// used with [`VoltValue::Timestamp`](crate::VoltValue::Timestamp).
    TIMESTAMP = 11,
    /// A result table sent as a value;
    /// used with [`VoltValue::Table`](crate::VoltValue::Table).
    TABLE = 21,
    /// For database type DECIMAL;
    /// used with [`VoltValue::Decimal`](crate::VoltValue::Decimal).
    DECIMAL = 22,
    /// For database type VARBINARY;
    /// used with [`VoltValue::VarBinary`](crate::VoltValue::VarBinary).
    VARBINARY = 25,
}

impl TypeTag {
    pub(crate) fn try_new(id: i8) -> VoltResult<Self> {
        Ok(match id {
            -99 => Self::ARRAY,
            1 => Self::NULL,
            3 => Self::TINYINT,
            4 => Self::SMALLINT,
            5 => Self::INTEGER,
            6 => Self::BIGINT,
            8 => Self::FLOAT,
            9 => Self::STRING,
            11 => Self::TIMESTAMP,
            21 => Self::TABLE,
            22 => Self::DECIMAL,
            25 => Self::VARBINARY,
            id => return Err(VoltError::malformed(format!("unknown type tag {id}"))),
        })
    }

    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn as_i8(self) -> i8 {
        self as i8
    }
}

impl std::fmt::Display for TypeTag {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}
