//! # Deployment
//!
//! Placement algorithms that turn local objects into remote instances:
//! position-based deployment and name-keyed replication, each with a
//! state-copying and a struct (fresh-state) variant.
//!
//! ## Philosophy
//!
//! Deployment is best effort. A distributed rollout that dies on the first
//! unreachable node is useless, so every per-target failure is logged,
//! reported in the per-target result, and the rest of the rollout continues.
//! Callers inspect the outcome vector when they care which targets made it.

use std::fmt;
use std::sync::Arc;

use tracing::debug;
use tracing::warn;

use crate::handle::RemoteHandle;
use crate::node::CallError;
use crate::node::Node;
use crate::object::LocalObject;
use crate::router::DirectStub;
use crate::router::StubTarget;
use crate::topology::Topology;

#[derive(Debug)]
pub enum DeployError {
    /// The topology has no member at the object's position.
    NoTargetNode { position: usize },
    /// Replication is keyed by registered name; the object has none.
    UnnamedObject,
    /// Remote instantiation or state copy failed.
    Call(CallError),
}

impl fmt::Display for DeployError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeployError::NoTargetNode { position } => {
                write!(f, "no topology member at position {}", position)
            }
            DeployError::UnnamedObject => {
                write!(f, "object has no registered name to replicate under")
            }
            DeployError::Call(e) => write!(f, "remote call failed: {}", e),
        }
    }
}

impl std::error::Error for DeployError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DeployError::Call(e) => Some(e),
            _ => None,
        }
    }
}

impl From<CallError> for DeployError {
    fn from(e: CallError) -> Self {
        DeployError::Call(e)
    }
}

/// Per-node result of a replication pass.
#[derive(Debug)]
pub enum ReplicaOutcome {
    /// A fresh replica was instantiated on the node.
    Created(RemoteHandle),
    /// The node already held a binding; the existing instance's handle.
    AlreadyPresent(RemoteHandle),
    Failed(DeployError),
}

impl ReplicaOutcome {
    /// The usable handle, whether freshly created or pre-existing.
    pub fn handle(&self) -> Option<&RemoteHandle> {
        match self {
            ReplicaOutcome::Created(h) | ReplicaOutcome::AlreadyPresent(h) => Some(h),
            ReplicaOutcome::Failed(_) => None,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, ReplicaOutcome::Created(_))
    }
}

/// Placement engine over one topology.
pub struct Deployment {
    topology: Arc<Topology>,
}

impl Deployment {
    pub fn new(topology: Arc<Topology>) -> Self {
        Self { topology }
    }

    /// Position-based deployment: the i-th object goes to the i-th topology
    /// member, carrying a full state snapshot. With `forward`, each
    /// successfully deployed object gets a blocking forwarding stub
    /// installed locally, so local calls run on the new remote instance and
    /// the local body goes quiet.
    pub async fn deploy(
        &self,
        objects: &[LocalObject],
        forward: bool,
    ) -> Vec<Result<RemoteHandle, DeployError>> {
        self.deploy_inner(objects, forward, true).await
    }

    /// Position-based deployment with fresh constructor state on the target.
    pub async fn deploy_struct(
        &self,
        objects: &[LocalObject],
    ) -> Vec<Result<RemoteHandle, DeployError>> {
        self.deploy_inner(objects, false, false).await
    }

    async fn deploy_inner(
        &self,
        objects: &[LocalObject],
        forward: bool,
        copy_state: bool,
    ) -> Vec<Result<RemoteHandle, DeployError>> {
        let nodes = self.topology.nodes();
        let mut results = Vec::with_capacity(objects.len());
        for (position, object) in objects.iter().enumerate() {
            results.push(
                self.deploy_one(&nodes, position, object, forward, copy_state)
                    .await,
            );
        }
        results
    }

    async fn deploy_one(
        &self,
        nodes: &[Node],
        position: usize,
        object: &LocalObject,
        forward: bool,
        copy_state: bool,
    ) -> Result<RemoteHandle, DeployError> {
        let name = object.name();
        let Some(node) = nodes.get(position) else {
            warn!("no node at position {} for {:?}", position, name);
            return Err(DeployError::NoTargetNode { position });
        };
        let type_name = object.type_name().await;
        let source = copy_state.then_some(object);
        let handle = RemoteHandle::create(node, name.as_deref(), &type_name, source, None)
            .await
            .map_err(|e| {
                warn!("deploying {:?} to {} failed: {}", name, node, e);
                DeployError::Call(e)
            })?;
        debug!("deployed {:?} as {}", name, handle);
        if forward {
            object
                .install_proxy(Box::new(DirectStub::new(StubTarget::fixed(handle.clone()))))
                .await;
        }
        Ok(handle)
    }

    /// Replicates `object` onto every non-local topology member, skipping
    /// members that already bind the object's name, so a second pass over
    /// the same topology creates nothing. `forward_to` is a position within
    /// the non-local member order; when the replica at that position is
    /// freshly created, the local object gets a forwarding stub to it.
    pub async fn replicate(
        &self,
        object: &LocalObject,
        forward_to: Option<usize>,
    ) -> Vec<ReplicaOutcome> {
        self.replicate_inner(object, forward_to, true).await
    }

    /// Replication with fresh constructor state on every target.
    pub async fn replicate_struct(&self, object: &LocalObject) -> Vec<ReplicaOutcome> {
        self.replicate_inner(object, None, false).await
    }

    async fn replicate_inner(
        &self,
        object: &LocalObject,
        forward_to: Option<usize>,
        copy_state: bool,
    ) -> Vec<ReplicaOutcome> {
        let Some(name) = object.name() else {
            warn!("cannot replicate an unregistered object");
            return vec![ReplicaOutcome::Failed(DeployError::UnnamedObject)];
        };
        let type_name = object.type_name().await;
        let nodes = self.topology.nodes_excluding_local();
        let mut outcomes = Vec::with_capacity(nodes.len());
        for (position, node) in nodes.iter().enumerate() {
            let forward = forward_to == Some(position);
            outcomes.push(
                self.replicate_one(node, object, &name, &type_name, forward, copy_state)
                    .await,
            );
        }
        outcomes
    }

    async fn replicate_one(
        &self,
        node: &Node,
        object: &LocalObject,
        name: &str,
        type_name: &str,
        forward: bool,
        copy_state: bool,
    ) -> ReplicaOutcome {
        if let Some(existing) = node.bind(name).await {
            debug!("{} already holds {:?}", node, name);
            return ReplicaOutcome::AlreadyPresent(existing);
        }
        let source = copy_state.then_some(object);
        match RemoteHandle::create(node, Some(name), type_name, source, None).await {
            Ok(handle) => {
                debug!("replicated {:?} as {}", name, handle);
                if forward {
                    object
                        .install_proxy(Box::new(DirectStub::new(StubTarget::fixed(
                            handle.clone(),
                        ))))
                        .await;
                }
                ReplicaOutcome::Created(handle)
            }
            Err(e) => {
                warn!("replicating {:?} to {} failed: {}", name, node, e);
                ReplicaOutcome::Failed(DeployError::Call(e))
            }
        }
    }
}
