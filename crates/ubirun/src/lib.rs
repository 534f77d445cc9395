//! # Ubirun
//!
//! The distributed-object runtime: topology tracking, local nodes and their
//! instance tables, remote handles, deployment, and the call routers that
//! give objects location transparency.
//!
//! ## Philosophy
//!
//! A caller holds an object and calls methods on it. Whether the body runs
//! here, on one replica, or on every replica is an installation detail: the
//! topology says who is reachable, a router installed on the object decides
//! how calls travel, and `ubiwire` frames carry them. Nothing at the call
//! site changes when the placement does.
//!
//! ## Core Concepts
//!
//! - **Topology**: the shared membership list, observable so caches can
//!   invalidate themselves when nodes come and go
//! - **Node** and **RemoteHandle**: a place where objects live, and a
//!   reference to one named instance there
//! - **Deployment**: pushes local objects onto other nodes, optionally
//!   leaving a forwarding router behind
//! - **CallRouter**: per-object interception deciding where an invocation
//!   actually runs (fixed stub, round-robin, random, broadcast, async)
//! - **Runtime**: one process's node, its routes to peers, and the frame
//!   server that answers them

pub mod admin;
pub mod context;
pub mod deploy;
pub mod handle;
pub mod loopback;
pub mod node;
pub mod object;
pub mod pattern;
pub mod registry;
pub mod router;
pub mod runtime;
pub mod testkit;
pub mod topology;
pub mod transport;

pub use admin::AdminConsole;
pub use deploy::Deployment;
pub use deploy::ReplicaOutcome;
pub use handle::RemoteHandle;
pub use loopback::LoopbackTransport;
pub use node::CallError;
pub use node::LocalNode;
pub use node::Node;
pub use object::Introspect;
pub use object::LocalObject;
pub use object::Servant;
pub use pattern::NamePattern;
pub use router::BindState;
pub use router::CallRouter;
pub use router::RoutingPolicy;
pub use runtime::Runtime;
pub use topology::Topology;
pub use topology::TopologyObserver;
pub use transport::Traffic;
pub use transport::Transport;
