use crate::{VoltError, VoltResult};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

// Read n bytes, return as Vec<u8>
pub(crate) fn parse_bytes(len: usize, rdr: &mut dyn std::io::Read) -> VoltResult<Vec<u8>> {
    let mut vec = vec![0_u8; len];
    rdr.read_exact(&mut vec)?;
    Ok(vec)
}

// Read an i32 length prefix; -1 denotes null, anything below -1 is malformed.
pub(crate) fn parse_length(rdr: &mut dyn std::io::Read, what: &str) -> VoltResult<Option<usize>> {
    let len = rdr.read_i32::<BigEndian>()?;
    match len {
        -1 => Ok(None),
        #[allow(clippy::cast_sign_loss)]
        len if len >= 0 => Ok(Some(len as usize)),
        len => Err(VoltError::malformed(format!(
            "negative length {len} for {what}"
        ))),
    }
}

// Length-prefixed UTF-8 string; None = null string.
pub(crate) fn parse_string(rdr: &mut dyn std::io::Read) -> VoltResult<Option<String>> {
    match parse_length(rdr, "string")? {
        None => Ok(None),
        Some(len) => {
            let bytes = parse_bytes(len, rdr)?;
            String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| VoltError::malformed(format!("invalid UTF-8 in string: {e}")))
        }
    }
}

// Variant of parse_string for fields where null is not allowed on the wire.
pub(crate) fn parse_nonnull_string(
    rdr: &mut dyn std::io::Read,
    what: &str,
) -> VoltResult<String> {
    parse_string(rdr)?.ok_or_else(|| VoltError::malformed(format!("null {what}")))
}

#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::cast_possible_wrap)]
pub(crate) fn emit_length_and_string(s: &str, w: &mut dyn std::io::Write) -> VoltResult<()> {
    emit_length_and_bytes(s.as_bytes(), w)
}

#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::cast_possible_wrap)]
pub(crate) fn emit_length_and_bytes(b: &[u8], w: &mut dyn std::io::Write) -> VoltResult<()> {
    if b.len() > i32::MAX as usize {
        return Err(VoltError::Usage(format!(
            "byte buffer of {} bytes exceeds the wire length limit",
            b.len()
        )));
    }
    w.write_i32::<BigEndian>(b.len() as i32)?;
    w.write_all(b)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{emit_length_and_string, parse_length, parse_string};
    use std::io::Cursor;

    #[test]
    fn string_roundtrip() {
        let mut buf = Vec::new();
        emit_length_and_string("grüße", &mut buf).unwrap();
        assert_eq!(buf.len(), 4 + "grüße".len());
        let mut rdr = Cursor::new(buf);
        assert_eq!(parse_string(&mut rdr).unwrap().unwrap(), "grüße");
    }

    #[test]
    fn null_and_negative_lengths() {
        let mut rdr = Cursor::new((-1_i32).to_be_bytes().to_vec());
        assert!(parse_length(&mut rdr, "test").unwrap().is_none());

        let mut rdr = Cursor::new((-2_i32).to_be_bytes().to_vec());
        assert!(parse_length(&mut rdr, "test").is_err());
    }
}
