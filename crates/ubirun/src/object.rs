//! Local objects and the servant contract.
//!
//! A [`Servant`] is the body of a distributable object: it dispatches method
//! calls by name and exposes its field state through the introspection
//! contract. The runtime holds servants inside [`LocalObject`] cells: one
//! lock per object, an optional routing proxy in front, and identity fields
//! (node, index, registered name) outside the lock so binding and display
//! never contend with a running call.
//!
//! ## Invariants
//!
//! - Calls through [`LocalObject::call`] go through the installed routing
//!   proxy, when there is one. The node's own invoke path uses
//!   [`LocalObject::call_direct`], which never routes: a replica serving a
//!   forwarded call must run its body, not forward again.
//! - One routing proxy is active per object; installing replaces.

use std::sync::Arc;
use std::sync::RwLock;

use tokio::sync::Mutex;

use ubiwire::FailureReason;
use ubiwire::InstanceIndex;
use ubiwire::ObjectRef;
use ubiwire::StateSnapshot;
use ubiwire::Value;

use crate::node::CallError;
use crate::router::CallRouter;
use crate::router::RoutedCall;

/// Field-state access, the contract state copy is built on.
///
/// Implementations decide what a "field" is; the runtime only moves the
/// resulting snapshots around.
pub trait Introspect {
    /// Snapshot all fields, or only the named subset.
    fn snapshot(&self, fields: Option<&[&str]>) -> StateSnapshot;

    /// Apply a snapshot produced by [`Introspect::snapshot`].
    fn apply_snapshot(&mut self, snapshot: &StateSnapshot) -> Result<(), FailureReason>;
}

/// A distributable object body.
pub trait Servant: Introspect + Send {
    /// Constructor-registry key for this object's type.
    fn type_name(&self) -> &str;

    /// Dispatch a method by name.
    ///
    /// A business failure raised by the method itself must come back as
    /// [`FailureReason::Application`] so callers receive it unchanged.
    fn dispatch(&mut self, method: &str, args: &[Value]) -> Result<Value, FailureReason>;
}

struct Cell {
    servant: Box<dyn Servant>,
    router: Option<Box<dyn CallRouter>>,
}

struct Shared {
    node: String,
    index: InstanceIndex,
    name: RwLock<Option<String>>,
    cell: Mutex<Cell>,
}

/// A servant adopted into a node's object table.
///
/// Cheap to clone; all clones share the same cell.
#[derive(Clone)]
pub struct LocalObject {
    shared: Arc<Shared>,
}

impl LocalObject {
    pub(crate) fn new(node: &str, index: InstanceIndex, servant: Box<dyn Servant>) -> Self {
        Self {
            shared: Arc::new(Shared {
                node: node.to_string(),
                index,
                name: RwLock::new(None),
                cell: Mutex::new(Cell {
                    servant,
                    router: None,
                }),
            }),
        }
    }

    pub fn node_name(&self) -> &str {
        &self.shared.node
    }

    pub fn index(&self) -> InstanceIndex {
        self.shared.index
    }

    /// Registered name, if the object has been registered.
    pub fn name(&self) -> Option<String> {
        self.shared.name.read().ok().and_then(|n| n.clone())
    }

    pub(crate) fn set_name(&self, name: &str) {
        if let Ok(mut slot) = self.shared.name.write() {
            *slot = Some(name.to_string());
        }
    }

    /// Wire-form reference to this object.
    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef {
            node: self.shared.node.clone(),
            index: self.shared.index,
            name: self.name(),
        }
    }

    /// This object as a by-reference argument value.
    pub fn ref_value(&self) -> Value {
        Value::Handle(self.object_ref())
    }

    pub async fn type_name(&self) -> String {
        self.shared.cell.lock().await.servant.type_name().to_string()
    }

    pub async fn snapshot(&self, fields: Option<&[&str]>) -> StateSnapshot {
        self.shared.cell.lock().await.servant.snapshot(fields)
    }

    pub async fn apply_snapshot(&self, snapshot: &StateSnapshot) -> Result<(), FailureReason> {
        self.shared
            .cell
            .lock()
            .await
            .servant
            .apply_snapshot(snapshot)
    }

    /// Installs `router` in front of every subsequent [`LocalObject::call`].
    pub async fn install_proxy(&self, router: Box<dyn CallRouter>) {
        self.shared.cell.lock().await.router = Some(router);
    }

    /// Calls a method through the installed routing proxy, if any.
    pub async fn call(&self, method: &str, args: &[Value]) -> Result<Value, CallError> {
        let name = self.name();
        let mut guard = self.shared.cell.lock().await;
        let cell = &mut *guard;
        match &mut cell.router {
            Some(router) => {
                let call = RoutedCall {
                    object_name: name,
                    method,
                    args,
                    local: cell.servant.as_mut(),
                };
                router.route(call).await
            }
            None => cell
                .servant
                .dispatch(method, args)
                .map_err(CallError::Failed),
        }
    }

    /// Calls a method on the servant body, bypassing any routing proxy.
    pub async fn call_direct(&self, method: &str, args: &[Value]) -> Result<Value, CallError> {
        self.shared
            .cell
            .lock()
            .await
            .servant
            .dispatch(method, args)
            .map_err(CallError::Failed)
    }
}

impl std::fmt::Debug for LocalObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LocalObject({})", self.object_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::testkit::CounterServant;

    fn counter() -> LocalObject {
        LocalObject::new("//h/s0", InstanceIndex(1), Box::new(CounterServant::new()))
    }

    #[tokio::test]
    async fn test_direct_dispatch_without_router() {
        let obj = counter();
        obj.call("add", &[Value::I64(5)]).await.unwrap();
        let got = obj.call("get", &[]).await.unwrap();
        assert_eq!(got, Value::I64(5));
    }

    #[tokio::test]
    async fn test_dispatch_unknown_method_is_failure() {
        let obj = counter();
        let err = obj.call("no_such", &[]).await.unwrap_err();
        match err {
            CallError::Failed(FailureReason::MethodNotFound(m)) => assert_eq!(m, "no_such"),
            other => panic!("Expected MethodNotFound, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_snapshot_subset() {
        let obj = counter();
        obj.call("add", &[Value::I64(3)]).await.unwrap();
        let snap = obj.snapshot(Some(&["count"])).await;
        assert_eq!(snap.len(), 1);
        assert_eq!(snap.get("count"), Some(&Value::I64(3)));
    }

    #[tokio::test]
    async fn test_apply_snapshot_overwrites_state() {
        let obj = counter();
        let snap: StateSnapshot = vec![("count", Value::I64(41))].into_iter().collect();
        obj.apply_snapshot(&snap).await.unwrap();
        assert_eq!(obj.call("get", &[]).await.unwrap(), Value::I64(41));
    }

    #[tokio::test]
    async fn test_ref_value_carries_identity() {
        let obj = counter();
        obj.set_name("tally");
        match obj.ref_value() {
            Value::Handle(r) => {
                assert_eq!(r.node, "//h/s0");
                assert_eq!(r.index, InstanceIndex(1));
                assert_eq!(r.name.as_deref(), Some("tally"));
            }
            other => panic!("Expected Handle, got {:?}", other),
        }
    }
}
