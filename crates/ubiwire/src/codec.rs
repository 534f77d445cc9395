//! Byte codec.
//!
//! Frames and values serialize through serde + bincode (standard
//! configuration). [`encode_args`] is the argument-array entry point: it
//! honors a per-argument pass mode, where a by-reference argument must
//! already be in handle form (the runtime rewrites local objects to
//! [`Value::Handle`] before calling in here).

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::fault::Result;
use crate::fault::WireError;
use crate::value::Value;

fn config() -> bincode::config::Configuration {
    bincode::config::standard()
}

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serde::encode_to_vec(value, config()).map_err(|e| WireError::Encode(e.to_string()))
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let (value, read) = bincode::serde::decode_from_slice(bytes, config())
        .map_err(|e| WireError::Decode(e.to_string()))?;
    if read != bytes.len() {
        return Err(WireError::Decode(format!(
            "{} trailing bytes after frame",
            bytes.len() - read
        )));
    }
    Ok(value)
}

/// How one argument travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassMode {
    /// Full copy of the value (the default).
    ByValue,
    /// Only a reference travels; the value must be a [`Value::Handle`].
    ByRef,
}

/// Prepares an argument array for the wire.
///
/// With no modes, every argument goes by value. With modes, the array
/// lengths must match and every by-ref argument must be a handle.
pub fn encode_args(args: &[Value], modes: Option<&[PassMode]>) -> Result<Vec<Value>> {
    let Some(modes) = modes else {
        return Ok(args.to_vec());
    };
    if modes.len() != args.len() {
        return Err(WireError::ModeCountMismatch {
            args: args.len(),
            modes: modes.len(),
        });
    }
    let mut out = Vec::with_capacity(args.len());
    for (i, (arg, mode)) in args.iter().zip(modes).enumerate() {
        match mode {
            PassMode::ByValue => out.push(arg.clone()),
            PassMode::ByRef => match arg {
                Value::Handle(_) => out.push(arg.clone()),
                _ => return Err(WireError::NotAReference(i)),
            },
        }
    }
    Ok(out)
}
