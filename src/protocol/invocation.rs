//! Codec for the invocation request.
//!
//! Parameters are serialized into their own buffer when a call is
//! submitted, so that codec failures surface synchronously to the caller;
//! the writer task later splices procedure name, handle and parameter
//! buffer into the outgoing frame.

use crate::protocol::{util, value::VoltValue};
use crate::{VoltError, VoltResult};
use byteorder::{BigEndian, WriteBytesExt};

const INVOCATION_VERSION: u8 = 0;

/// Serializes the parameter list: i16 count, then each parameter as
/// 1-byte type tag plus value.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn serialize_params(params: &[VoltValue]) -> VoltResult<Vec<u8>> {
    if params.len() > i16::MAX as usize {
        return Err(VoltError::Usage(format!(
            "{} parameters exceed the wire limit of {}",
            params.len(),
            i16::MAX
        )));
    }
    let mut buf: Vec<u8> = Vec::new();
    buf.write_i16::<BigEndian>(params.len() as i16)?;
    for param in params {
        param.emit(&mut buf)?;
    }
    Ok(buf)
}

/// Emits one invocation request payload.
pub(crate) fn emit_invocation(
    procedure: &str,
    handle: i64,
    param_buf: &[u8],
    w: &mut dyn std::io::Write,
) -> VoltResult<()> {
    w.write_u8(INVOCATION_VERSION)?;
    util::emit_length_and_string(procedure, w)?;
    w.write_i64::<BigEndian>(handle)?;
    w.write_all(param_buf)?;
    Ok(())
}
