//! # Failure Definitions
//!
//! Two distinct failure families live here. [`WireError`] is the *codec*
//! failing on this side: bytes that will not decode, values that will not
//! encode. [`FailureReason`] is the *remote* system failing: it is the `Err`
//! side of a reply, produced on the serving node and shipped back as data.
//! A business error raised by the target object's own method body travels as
//! [`FailureReason::Application`] and must reach the caller unchanged.

use serde::Deserialize;
use serde::Serialize;

use crate::value::InstanceIndex;
use crate::value::Value;

/// Codec failures on the local side.
#[derive(Debug, Clone)]
pub enum WireError {
    /// Serialization of a frame or value failed.
    Encode(String),
    /// The received bytes did not decode as the expected frame.
    Decode(String),
    /// A by-reference argument was requested for a value that is not a
    /// handle and cannot be referenced.
    NotAReference(usize),
    /// The pass-mode array length did not match the argument count.
    ModeCountMismatch { args: usize, modes: usize },
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WireError::Encode(msg) => write!(f, "encode failed: {}", msg),
            WireError::Decode(msg) => write!(f, "decode failed: {}", msg),
            WireError::NotAReference(i) => {
                write!(f, "argument {} marked by-ref but is not a handle", i)
            }
            WireError::ModeCountMismatch { args, modes } => {
                write!(f, "{} arguments but {} pass modes", args, modes)
            }
        }
    }
}

impl std::error::Error for WireError {}

/// A specialized Result type for codec operations.
pub type Result<T> = std::result::Result<T, WireError>;

/// Why the serving node failed an operation (the `Err` side of a reply).
///
/// Distinct from [`WireError`] and from transport errors: those mean the
/// plumbing failed, these mean the remote system answered and said no.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FailureReason {
    /// The target method ran and raised its own error. The payload is the
    /// target's error value, passed through untouched.
    Application(Value),
    /// No instance at that index on the serving node.
    InstanceNotFound(InstanceIndex),
    /// The instance exists but has no such method.
    MethodNotFound(String),
    /// Arguments did not match what the method expects.
    BadArguments(String),
    /// Remote instantiation named a type with no registered constructor.
    TypeNotRegistered(String),
    /// A state snapshot could not be applied to the target.
    SnapshotRejected(String),
    /// The serving node could not make sense of the request frame.
    Malformed(String),
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::Application(v) => write!(f, "application error ({})", v.type_label()),
            FailureReason::InstanceNotFound(idx) => write!(f, "no instance at index {}", idx),
            FailureReason::MethodNotFound(m) => write!(f, "no method {:?}", m),
            FailureReason::BadArguments(msg) => write!(f, "bad arguments: {}", msg),
            FailureReason::TypeNotRegistered(t) => write!(f, "no constructor for type {:?}", t),
            FailureReason::SnapshotRejected(msg) => write!(f, "snapshot rejected: {}", msg),
            FailureReason::Malformed(msg) => write!(f, "malformed request: {}", msg),
        }
    }
}

impl std::error::Error for FailureReason {}
