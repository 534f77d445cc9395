//! Nodes: local object tables and remote frame clients.
//!
//! A [`Node`] is one container process, seen from here. The local node owns
//! the instance table, the name registry, and the type registry; a remote
//! node is a name plus a transport. Both answer the same four questions
//! (instantiate, apply state, invoke, bind), so everything above this layer
//! (handles, deployment, routing) is location-blind.
//!
//! ## Invariants
//!
//! - Node equality is name equality. Two `Node` values with the same name
//!   are the same node, wherever they came from.
//! - The invoke path through a node dispatches directly on the servant body
//!   and never enters an installed routing proxy.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use tracing::warn;

use ubiwire::FailureReason;
use ubiwire::InstanceIndex;
use ubiwire::Reply;
use ubiwire::Request;
use ubiwire::StateSnapshot;
use ubiwire::Value;
use ubiwire::WireError;

use crate::context;
use crate::handle::RemoteHandle;
use crate::object::LocalObject;
use crate::object::Servant;
use crate::registry::NameRegistry;
use crate::registry::TypeRegistry;
use crate::transport::Traffic;
use crate::transport::Transport;
use crate::transport::TransportError;

/// Why a node operation failed, as seen by the caller.
#[derive(Debug)]
pub enum CallError {
    /// The serving side answered with a failure. An
    /// [`FailureReason::Application`] payload is the target's own error,
    /// passed through unchanged.
    Failed(FailureReason),
    /// The transport could not complete the exchange.
    Transport(TransportError),
    /// Encoding or decoding failed on this side.
    Wire(WireError),
    /// The far side answered with a reply of the wrong kind.
    Protocol(String),
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallError::Failed(reason) => write!(f, "remote failure: {}", reason),
            CallError::Transport(e) => write!(f, "transport failure: {}", e),
            CallError::Wire(e) => write!(f, "wire failure: {}", e),
            CallError::Protocol(msg) => write!(f, "protocol violation: {}", msg),
        }
    }
}

impl std::error::Error for CallError {}

impl From<FailureReason> for CallError {
    fn from(reason: FailureReason) -> Self {
        CallError::Failed(reason)
    }
}

impl From<TransportError> for CallError {
    fn from(e: TransportError) -> Self {
        CallError::Transport(e)
    }
}

impl From<WireError> for CallError {
    fn from(e: WireError) -> Self {
        CallError::Wire(e)
    }
}

impl CallError {
    /// True when the failure came from the target's own method body.
    pub fn is_application(&self) -> bool {
        matches!(self, CallError::Failed(FailureReason::Application(_)))
    }
}

pub type Result<T> = std::result::Result<T, CallError>;

/// Qualifies a node name against a host: `s0` becomes `//host/s0`,
/// `//localhost/x` is rewritten to the concrete host, backslashes
/// normalize to forward slashes. Already-qualified names pass through.
pub fn full_node_name(host: &str, name: &str) -> String {
    let name = name.replace('\\', "/");
    if let Some(rest) = name.strip_prefix("//") {
        match rest.split_once('/') {
            Some(("localhost", tail)) => format!("//{}/{}", host, tail),
            _ => name,
        }
    } else {
        format!("//{}/{}", host, name)
    }
}

/// The host this process qualifies short node names against. Taken from
/// `HOSTNAME` when set.
pub fn local_host() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}

/// The container process this runtime lives in.
pub struct LocalNode {
    name: String,
    instances: DashMap<InstanceIndex, LocalObject>,
    next_index: AtomicU64,
    names: NameRegistry,
    types: TypeRegistry,
}

impl LocalNode {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            instances: DashMap::new(),
            next_index: AtomicU64::new(1),
            names: NameRegistry::new(),
            types: TypeRegistry::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn names(&self) -> &NameRegistry {
        &self.names
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    /// Takes ownership of a servant, assigns it a table slot, and
    /// optionally registers it by name.
    pub fn adopt(&self, servant: Box<dyn Servant>, name: Option<&str>) -> LocalObject {
        let index = InstanceIndex(self.next_index.fetch_add(1, Ordering::Relaxed));
        let object = LocalObject::new(&self.name, index, servant);
        self.instances.insert(index, object.clone());
        if let Some(name) = name {
            self.names.register(name, &object);
        }
        object
    }

    pub fn instance(&self, index: InstanceIndex) -> Option<LocalObject> {
        self.instances.get(&index).map(|e| e.value().clone())
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Constructs a registered type, applies `state`, and adopts the result.
    pub fn instantiate(
        &self,
        name: Option<&str>,
        type_name: &str,
        state: Option<&StateSnapshot>,
    ) -> std::result::Result<InstanceIndex, FailureReason> {
        let mut servant = self
            .types
            .construct(type_name)
            .ok_or_else(|| FailureReason::TypeNotRegistered(type_name.to_string()))?;
        if let Some(state) = state {
            servant.apply_snapshot(state)?;
        }
        Ok(self.adopt(servant, name).index())
    }

    pub async fn apply_state(
        &self,
        index: InstanceIndex,
        state: &StateSnapshot,
    ) -> std::result::Result<(), FailureReason> {
        let object = self
            .instance(index)
            .ok_or(FailureReason::InstanceNotFound(index))?;
        object.apply_snapshot(state).await
    }

    /// Direct dispatch on a held instance; routing proxies are bypassed.
    pub async fn invoke(
        &self,
        index: InstanceIndex,
        method: &str,
        args: &[Value],
    ) -> std::result::Result<Value, FailureReason> {
        let object = self
            .instance(index)
            .ok_or(FailureReason::InstanceNotFound(index))?;
        match object.call_direct(method, args).await {
            Ok(value) => Ok(value),
            Err(CallError::Failed(reason)) => Err(reason),
            // Direct dispatch cannot produce transport errors; fold anything
            // unexpected into a malformed report rather than dropping it.
            Err(other) => Err(FailureReason::Malformed(other.to_string())),
        }
    }

    pub fn bind_local(&self, name: &str) -> Option<LocalObject> {
        self.names.lookup(name)
    }
}

struct RemoteNode {
    name: String,
    transport: Arc<dyn Transport>,
    traffic: Arc<Traffic>,
}

impl RemoteNode {
    async fn request(&self, request: &Request) -> Result<Reply> {
        let bytes = ubiwire::encode(request)?;
        self.traffic.record_out(bytes.len());
        let reply = match self.transport.call(&bytes).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(
                    "transport to {} failed during {}: {}",
                    self.name,
                    request.kind(),
                    e
                );
                return Err(e.into());
            }
        };
        self.traffic.record_in(reply.len());
        Ok(ubiwire::decode(&reply)?)
    }
}

enum NodeKind {
    Local(Arc<LocalNode>),
    Remote(RemoteNode),
}

/// One container process, local or remote. Cheap to clone.
#[derive(Clone)]
pub struct Node(Arc<NodeKind>);

impl Node {
    /// A fresh local node with empty tables.
    pub fn local(name: &str) -> Node {
        Node::from_local(Arc::new(LocalNode::new(name)))
    }

    /// Wraps an existing local node; the runtime shares its node this way.
    pub fn from_local(local: Arc<LocalNode>) -> Node {
        Node(Arc::new(NodeKind::Local(local)))
    }

    /// A remote node reachable through `transport`.
    pub fn remote(name: &str, transport: Arc<dyn Transport>, traffic: Arc<Traffic>) -> Node {
        Node(Arc::new(NodeKind::Remote(RemoteNode {
            name: name.to_string(),
            transport,
            traffic,
        })))
    }

    pub fn name(&self) -> &str {
        match &*self.0 {
            NodeKind::Local(n) => n.name(),
            NodeKind::Remote(n) => &n.name,
        }
    }

    /// True iff this node is the one the current process runs inside.
    pub fn is_local(&self) -> bool {
        matches!(&*self.0, NodeKind::Local(_))
    }

    pub fn as_local(&self) -> Option<&LocalNode> {
        match &*self.0 {
            NodeKind::Local(n) => Some(n.as_ref()),
            NodeKind::Remote(_) => None,
        }
    }

    /// Creates an instance of `type_name` on this node. The ambient call
    /// context travels with the request.
    pub async fn instantiate(
        &self,
        name: Option<&str>,
        type_name: &str,
        state: Option<StateSnapshot>,
    ) -> Result<InstanceIndex> {
        match &*self.0 {
            NodeKind::Local(local) => local
                .instantiate(name, type_name, state.as_ref())
                .map_err(|reason| {
                    warn!("local instantiation of {:?} failed: {}", type_name, reason);
                    CallError::Failed(reason)
                }),
            NodeKind::Remote(remote) => {
                let request = Request::Instantiate {
                    name: name.map(str::to_string),
                    type_name: type_name.to_string(),
                    state,
                    context: context::current(),
                };
                match remote.request(&request).await? {
                    Reply::Instantiated(result) => result.map_err(CallError::Failed),
                    other => Err(unexpected("instantiated", &other)),
                }
            }
        }
    }

    /// Pushes field state into an existing instance on this node.
    pub async fn apply_state(&self, index: InstanceIndex, state: StateSnapshot) -> Result<()> {
        match &*self.0 {
            NodeKind::Local(local) => local
                .apply_state(index, &state)
                .await
                .map_err(CallError::Failed),
            NodeKind::Remote(remote) => {
                let request = Request::ApplyState {
                    index,
                    state,
                    context: context::current(),
                };
                match remote.request(&request).await? {
                    Reply::StateApplied(result) => result.map_err(CallError::Failed),
                    other => Err(unexpected("state-applied", &other)),
                }
            }
        }
    }

    /// Dispatches a method on an instance held by this node.
    pub async fn invoke(
        &self,
        index: InstanceIndex,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value> {
        match &*self.0 {
            NodeKind::Local(local) => local
                .invoke(index, method, &args)
                .await
                .map_err(CallError::Failed),
            NodeKind::Remote(remote) => {
                let request = Request::Invoke {
                    index,
                    method: method.to_string(),
                    args,
                    context: context::current(),
                };
                match remote.request(&request).await? {
                    Reply::Returned(result) => result.map_err(CallError::Failed),
                    other => Err(unexpected("returned", &other)),
                }
            }
        }
    }

    /// A handle to the object this node holds under `name`, if any.
    ///
    /// Failures answering the question (unreachable node, bad reply) are
    /// logged and collapse to `None`: for discovery, a node that cannot
    /// answer holds nothing.
    pub async fn bind(&self, name: &str) -> Option<RemoteHandle> {
        match &*self.0 {
            NodeKind::Local(local) => {
                let object = local.bind_local(name)?;
                Some(RemoteHandle::bound(
                    self.clone(),
                    object.index(),
                    Some(name.to_string()),
                ))
            }
            NodeKind::Remote(remote) => {
                let request = Request::Bind {
                    name: name.to_string(),
                };
                match remote.request(&request).await {
                    Ok(Reply::Bound(Some(obj))) => {
                        Some(RemoteHandle::bound(self.clone(), obj.index, obj.name))
                    }
                    Ok(Reply::Bound(None)) => None,
                    Ok(other) => {
                        warn!(
                            "bind {:?} on {}: expected bound reply, got {}",
                            name,
                            remote.name,
                            other.kind()
                        );
                        None
                    }
                    Err(e) => {
                        warn!("bind {:?} on {} failed: {}", name, remote.name, e);
                        None
                    }
                }
            }
        }
    }

    /// Exchanges known node names with this node (no-op on a local node).
    pub async fn sync(&self, from: &str, known: Vec<String>) -> Result<Vec<String>> {
        match &*self.0 {
            NodeKind::Local(_) => Ok(Vec::new()),
            NodeKind::Remote(remote) => {
                let request = Request::Sync {
                    from: from.to_string(),
                    known,
                };
                match remote.request(&request).await? {
                    Reply::Synced { known } => Ok(known),
                    other => Err(unexpected("synced", &other)),
                }
            }
        }
    }
}

fn unexpected(wanted: &str, got: &Reply) -> CallError {
    CallError::Protocol(format!("expected {} reply, got {}", wanted, got.kind()))
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.name() == other.name()
    }
}

impl Eq for Node {}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_local() { "local" } else { "remote" };
        write!(f, "Node({}, {})", self.name(), kind)
    }
}
