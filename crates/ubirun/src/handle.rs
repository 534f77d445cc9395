//! Remote handles.
//!
//! A [`RemoteHandle`] names one instance on one node and is the only way
//! calls, state pushes, and instantiation requests reach it. Handles are
//! born bound: either to an instance that already existed (`bound`) or to
//! one freshly created on the target node (`create`). Node and index never
//! change afterwards.

use std::fmt;

use ubiwire::InstanceIndex;
use ubiwire::ObjectRef;
use ubiwire::PassMode;
use ubiwire::StateSnapshot;
use ubiwire::Value;
use ubiwire::encode_args;

use crate::node::Node;
use crate::node::Result;
use crate::object::LocalObject;

/// A reference to one object instance on one node.
#[derive(Clone)]
pub struct RemoteHandle {
    node: Node,
    index: InstanceIndex,
    name: Option<String>,
}

impl RemoteHandle {
    /// A handle to an instance that already exists on `node`.
    pub fn bound(node: Node, index: InstanceIndex, name: Option<String>) -> Self {
        Self { node, index, name }
    }

    /// Creates a new instance of `type_name` on `node` and returns a handle
    /// to it.
    ///
    /// When `source` is given, its field state (all fields, or only
    /// `fields`) is snapshotted and applied to the new instance; the
    /// receiving node registers it under `name` when one is given.
    pub async fn create(
        node: &Node,
        name: Option<&str>,
        type_name: &str,
        source: Option<&LocalObject>,
        fields: Option<&[&str]>,
    ) -> Result<RemoteHandle> {
        let state = match source {
            Some(object) => Some(object.snapshot(fields).await),
            None => None,
        };
        let index = node.instantiate(name, type_name, state).await?;
        Ok(Self {
            node: node.clone(),
            index,
            name: name.map(str::to_string),
        })
    }

    /// Snapshots `source` and pushes the state into the deployed instance.
    /// Does not re-instantiate.
    pub async fn copy_state_from(
        &self,
        source: &LocalObject,
        fields: Option<&[&str]>,
    ) -> Result<()> {
        let state = source.snapshot(fields).await;
        self.node.apply_state(self.index, state).await
    }

    /// Pushes an explicit snapshot into the deployed instance.
    pub async fn apply_state(&self, state: StateSnapshot) -> Result<()> {
        self.node.apply_state(self.index, state).await
    }

    /// Invokes a method on the referenced instance, all arguments by value.
    pub async fn invoke(&self, method: &str, args: &[Value]) -> Result<Value> {
        self.node.invoke(self.index, method, args.to_vec()).await
    }

    /// Invokes with per-argument pass modes; by-ref arguments must already
    /// be handle values (see [`LocalObject::ref_value`]).
    pub async fn invoke_flagged(
        &self,
        method: &str,
        args: &[Value],
        modes: &[PassMode],
    ) -> Result<Value> {
        let wire_args = encode_args(args, Some(modes))?;
        self.node.invoke(self.index, method, wire_args).await
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn index(&self) -> InstanceIndex {
        self.index
    }

    /// Informational name; not part of handle identity.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef {
            node: self.node.name().to_string(),
            index: self.index,
            name: self.name.clone(),
        }
    }
}

impl PartialEq for RemoteHandle {
    fn eq(&self, other: &Self) -> bool {
        self.node == other.node && self.index == other.index
    }
}

impl Eq for RemoteHandle {}

impl fmt::Display for RemoteHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.object_ref())
    }
}

impl fmt::Debug for RemoteHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RemoteHandle({})", self.object_ref())
    }
}
