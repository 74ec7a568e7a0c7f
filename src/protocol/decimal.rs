//! Codec for the fixed-scale wire decimal.
//!
//! A decimal travels as the 16-byte big-endian two's complement of
//! `value * 10^12` (scale 12, precision 38). The most negative 16-byte
//! pattern is the null sentinel and can never occur as a real value, since
//! its magnitude exceeds the precision limit.

use crate::{VoltError, VoltResult};
use bigdecimal::BigDecimal;
use num_bigint::{BigInt, Sign};

pub(crate) const WIRE_SIZE: usize = 16;
pub(crate) const SCALE: i64 = 12;
const PRECISION: u32 = 38;

const NULL_BYTES: [u8; WIRE_SIZE] = [
    0x80, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
];

pub(crate) fn emit(bd: &BigDecimal, w: &mut dyn std::io::Write) -> VoltResult<()> {
    w.write_all(&to_wire(bd)?)?;
    Ok(())
}

pub(crate) fn emit_null(w: &mut dyn std::io::Write) -> VoltResult<()> {
    w.write_all(&NULL_BYTES)?;
    Ok(())
}

pub(crate) fn parse(rdr: &mut dyn std::io::Read) -> VoltResult<Option<BigDecimal>> {
    let mut raw = [0_u8; WIRE_SIZE];
    rdr.read_exact(&mut raw[..])?;
    if raw == NULL_BYTES {
        return Ok(None);
    }
    let bigint = BigInt::from_signed_bytes_be(&raw);
    Ok(Some(BigDecimal::new(bigint, SCALE)))
}

fn to_wire(bd: &BigDecimal) -> VoltResult<[u8; WIRE_SIZE]> {
    let (bigint, exponent) = bd.normalized().as_bigint_and_exponent();
    if exponent > SCALE {
        return Err(VoltError::Usage(format!(
            "decimal {bd} has more than {SCALE} fractional digits"
        )));
    }
    #[allow(clippy::cast_possible_truncation)]
    #[allow(clippy::cast_sign_loss)]
    let scaled = bigint * BigInt::from(10).pow((SCALE - exponent) as u32);
    let limit = BigInt::from(10).pow(PRECISION);
    if scaled.magnitude() >= limit.magnitude() {
        return Err(VoltError::Usage(format!(
            "decimal {bd} exceeds {PRECISION} digits of precision"
        )));
    }

    let bytes = scaled.to_signed_bytes_be();
    debug_assert!(bytes.len() <= WIRE_SIZE);
    let fill = if scaled.sign() == Sign::Minus {
        0xFF_u8
    } else {
        0_u8
    };
    let mut raw = [fill; WIRE_SIZE];
    raw[WIRE_SIZE - bytes.len()..].copy_from_slice(&bytes);
    Ok(raw)
}
