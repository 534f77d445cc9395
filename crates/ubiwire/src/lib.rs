//! # Ubiwire
//!
//! The wire-facing data model of the ubiq runtime: dynamic values, field
//! snapshots, call-context tokens, request/reply frames, and the byte codec
//! that carries them between nodes.
//!
//! ## Philosophy
//!
//! Everything here is data. No transport, no tables, no policy; those live
//! in `ubirun`. Keeping the wire layer free of behavior means a frame can be
//! built, inspected, and replayed without a runtime, which is how the
//! protocol tests work.

pub mod codec;
pub mod context;
pub mod fault;
pub mod frame;
pub mod snapshot;
pub mod value;

pub use codec::PassMode;
pub use codec::decode;
pub use codec::encode;
pub use codec::encode_args;
pub use context::CallContext;
pub use fault::FailureReason;
pub use fault::WireError;
pub use frame::Reply;
pub use frame::Request;
pub use snapshot::StateSnapshot;
pub use value::InstanceIndex;
pub use value::ObjectRef;
pub use value::Value;
