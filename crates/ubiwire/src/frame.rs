//! Request and reply frames.
//!
//! The node-to-node protocol is strict request/response over an opaque byte
//! transport, so frames carry no sequence numbers. One request produces
//! exactly one reply:
//!
//! - `Instantiate { name?, type, state?, context }` → `Instantiated(index?)`
//! - `ApplyState  { index, state, context }`        → `StateApplied(ok?)`
//! - `Invoke      { index, method, args, context }` → `Returned(value?)`
//! - `Bind        { name }`                         → `Bound(ref?)`
//! - `Sync        { from, known }`                  → `Synced { known }`

use serde::Deserialize;
use serde::Serialize;

use crate::context::CallContext;
use crate::fault::FailureReason;
use crate::snapshot::StateSnapshot;
use crate::value::InstanceIndex;
use crate::value::ObjectRef;
use crate::value::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Request {
    /// Construct a new instance on the serving node.
    Instantiate {
        /// Name to register the instance under, if any.
        name: Option<String>,
        /// Constructor-registry key for the object's type.
        type_name: String,
        /// Initial field state to apply after construction.
        state: Option<StateSnapshot>,
        context: CallContext,
    },
    /// Push field state into an existing instance.
    ApplyState {
        index: InstanceIndex,
        state: StateSnapshot,
        context: CallContext,
    },
    /// Dispatch a method on an existing instance.
    Invoke {
        index: InstanceIndex,
        method: String,
        args: Vec<Value>,
        context: CallContext,
    },
    /// Ask whether the serving node holds an object under `name`.
    Bind { name: String },
    /// Exchange known node names with the serving node.
    Sync { from: String, known: Vec<String> },
}

impl Request {
    /// Short label for logs and protocol errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Instantiate { .. } => "instantiate",
            Request::ApplyState { .. } => "apply-state",
            Request::Invoke { .. } => "invoke",
            Request::Bind { .. } => "bind",
            Request::Sync { .. } => "sync",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Reply {
    Instantiated(Result<InstanceIndex, FailureReason>),
    StateApplied(Result<(), FailureReason>),
    Returned(Result<Value, FailureReason>),
    Bound(Option<ObjectRef>),
    Synced { known: Vec<String> },
}

impl Reply {
    pub fn kind(&self) -> &'static str {
        match self {
            Reply::Instantiated(_) => "instantiated",
            Reply::StateApplied(_) => "state-applied",
            Reply::Returned(_) => "returned",
            Reply::Bound(_) => "bound",
            Reply::Synced { .. } => "synced",
        }
    }
}
