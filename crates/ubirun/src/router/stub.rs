//! Forwarding stubs: route every call on a local object to one remote
//! instance, blocking ([`DirectStub`]) or fire-and-forget ([`AsyncStub`]).

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use tracing::debug;
use tracing::warn;
use ubiwire::Value;

use crate::context;
use crate::handle::RemoteHandle;
use crate::node::CallError;
use crate::pattern::NamePattern;
use crate::pattern::PatternError;
use crate::router::CallRouter;
use crate::router::InvalidateFlag;
use crate::router::RoutedCall;
use crate::topology::Topology;

/// Where a stub forwards to: a handle fixed at construction, or a node name
/// pattern resolved lazily against a topology.
pub enum StubTarget {
    Fixed(RemoteHandle),
    Pattern {
        node_pattern: NamePattern,
        topology: Arc<Topology>,
    },
}

impl StubTarget {
    pub fn fixed(handle: RemoteHandle) -> Self {
        StubTarget::Fixed(handle)
    }

    pub fn pattern(expr: &str, topology: Arc<Topology>) -> Result<Self, PatternError> {
        Ok(StubTarget::Pattern {
            node_pattern: NamePattern::compile(expr)?,
            topology,
        })
    }

    fn is_pattern(&self) -> bool {
        matches!(self, StubTarget::Pattern { .. })
    }

    /// Fixed targets resolve to themselves. Pattern targets take the first
    /// matching topology member and ask it for a binding under the object's
    /// name; any miss resolves to nothing.
    async fn resolve(&self, object_name: Option<&str>) -> Option<RemoteHandle> {
        match self {
            StubTarget::Fixed(handle) => Some(handle.clone()),
            StubTarget::Pattern {
                node_pattern,
                topology,
            } => {
                let name = object_name?;
                let node = topology.first_matching(node_pattern)?;
                node.bind(name).await
            }
        }
    }
}

fn subscribed_flag(target: &StubTarget) -> Arc<InvalidateFlag> {
    match target {
        StubTarget::Pattern { topology, .. } => InvalidateFlag::subscribed(topology),
        StubTarget::Fixed(_) => InvalidateFlag::new(),
    }
}

/// Blocking forwarding stub.
///
/// Pattern targets bind on first use; a failed resolution runs the call on
/// the local body and retries resolution on the next call. Once bound, the
/// binding is reused until invalidated; fixed targets ignore invalidation.
pub struct DirectStub {
    target: StubTarget,
    bound: Option<RemoteHandle>,
    flag: Arc<InvalidateFlag>,
}

impl DirectStub {
    pub fn new(target: StubTarget) -> Self {
        let flag = subscribed_flag(&target);
        Self {
            target,
            bound: None,
            flag,
        }
    }

    pub fn is_bound(&self) -> bool {
        self.bound.is_some()
    }

    async fn ensure_bound(&mut self, object_name: Option<&str>) -> Option<&RemoteHandle> {
        if self.flag.take() && self.target.is_pattern() {
            self.bound = None;
        }
        if self.bound.is_none() {
            self.bound = self.target.resolve(object_name).await;
        }
        self.bound.as_ref()
    }
}

#[async_trait::async_trait]
impl CallRouter for DirectStub {
    async fn route(&mut self, call: RoutedCall<'_>) -> Result<Value, CallError> {
        match self.ensure_bound(call.object_name.as_deref()).await {
            Some(handle) => {
                debug!("forwarding {} to {}", call.method, handle);
                handle.invoke(call.method, call.args).await
            }
            None => {
                debug!("no remote target for {}, running locally", call.method);
                call.proceed()
            }
        }
    }

    fn invalidate(&self) {
        self.flag.raise();
    }
}

pub const MAILBOX_SLOTS: usize = 16;

/// Circular result store for deferred calls.
///
/// Slot `n` holds the result of the most recent deferred call assigned slot
/// `n % MAILBOX_SLOTS`; a call more than [`MAILBOX_SLOTS`] deferrals old may
/// have been overwritten. Reading a slot clears it.
pub struct Mailbox {
    slots: Mutex<[Option<Value>; MAILBOX_SLOTS]>,
}

impl Mailbox {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            slots: Mutex::new(std::array::from_fn(|_| None)),
        })
    }

    pub fn take(&self, slot: usize) -> Option<Value> {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)[slot % MAILBOX_SLOTS]
            .take()
    }

    pub(crate) fn put(&self, slot: usize, value: Value) {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)[slot % MAILBOX_SLOTS] = Some(value);
    }
}

/// Fire-and-forget forwarding stub.
///
/// Resolution works as for [`DirectStub`]. A bound call spawns a task that
/// performs the remote invoke and returns [`Value::Unit`] immediately; the
/// remote result lands in the stub's [`Mailbox`] under the slot assigned at
/// spawn. A failed deferred call is logged and leaves its slot empty. The
/// local fallback stays synchronous and returns the real result.
pub struct AsyncStub {
    target: StubTarget,
    bound: Option<RemoteHandle>,
    flag: Arc<InvalidateFlag>,
    mailbox: Arc<Mailbox>,
    next_slot: usize,
}

impl AsyncStub {
    pub fn new(target: StubTarget) -> Self {
        let flag = subscribed_flag(&target);
        Self {
            target,
            bound: None,
            flag,
            mailbox: Mailbox::new(),
            next_slot: 0,
        }
    }

    /// The stub's result mailbox. Grab it before boxing the stub away.
    pub fn mailbox(&self) -> Arc<Mailbox> {
        Arc::clone(&self.mailbox)
    }

    async fn ensure_bound(&mut self, object_name: Option<&str>) -> Option<RemoteHandle> {
        if self.flag.take() && self.target.is_pattern() {
            self.bound = None;
        }
        if self.bound.is_none() {
            self.bound = self.target.resolve(object_name).await;
        }
        self.bound.clone()
    }
}

#[async_trait::async_trait]
impl CallRouter for AsyncStub {
    async fn route(&mut self, call: RoutedCall<'_>) -> Result<Value, CallError> {
        match self.ensure_bound(call.object_name.as_deref()).await {
            Some(handle) => {
                let slot = self.next_slot;
                self.next_slot = (self.next_slot + 1) % MAILBOX_SLOTS;
                let method = call.method.to_string();
                let args = call.args.to_vec();
                let mailbox = Arc::clone(&self.mailbox);
                let ctx = context::current();
                debug!("deferring {} to {} (slot {})", method, handle, slot);
                tokio::spawn(context::scope(ctx, async move {
                    match handle.invoke(&method, &args).await {
                        Ok(value) => mailbox.put(slot, value),
                        Err(e) => warn!("deferred {} on {} failed: {}", method, handle, e),
                    }
                }));
                Ok(Value::Unit)
            }
            None => {
                debug!("no remote target for {}, running locally", call.method);
                call.proceed()
            }
        }
    }

    fn invalidate(&self) {
        self.flag.raise();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use ubiwire::InstanceIndex;

    use crate::node::Node;
    use crate::object::Servant;
    use crate::testkit::BindingTransport;
    use crate::testkit::CounterServant;
    use crate::transport::Traffic;

    fn answering(node: &str, name: &str, index: u64, answer: i64) -> Arc<BindingTransport> {
        Arc::new(BindingTransport::answering(node, name, index, Value::I64(answer)))
    }

    fn node_with(transport: &Arc<BindingTransport>, name: &str) -> Node {
        Node::remote(name, transport.clone(), Arc::new(Traffic::new()))
    }

    async fn route_one(
        router: &mut dyn CallRouter,
        servant: &mut CounterServant,
        method: &str,
        args: &[Value],
    ) -> Result<Value, CallError> {
        let call = RoutedCall {
            object_name: Some("tally".to_string()),
            method,
            args,
            local: servant,
        };
        router.route(call).await
    }

    #[tokio::test]
    async fn test_fixed_stub_always_forwards() {
        let transport = answering("//h/s0", "tally", 7, 42);
        let node = node_with(&transport, "//h/s0");
        let handle = RemoteHandle::bound(node, InstanceIndex(7), Some("tally".to_string()));
        let mut stub = DirectStub::new(StubTarget::fixed(handle));
        let mut servant = CounterServant::new();

        let result = route_one(&mut stub, &mut servant, "add", &[Value::I64(5)]).await;
        assert_eq!(result.unwrap(), Value::I64(42));
        assert_eq!(transport.invoke_count(), 1);
        // The local body never ran.
        assert_eq!(servant.dispatch("get", &[]).unwrap(), Value::I64(0));
    }

    #[tokio::test]
    async fn test_pattern_stub_binds_once() {
        let transport = answering("//h/s0", "tally", 7, 42);
        let topology = Arc::new(Topology::new());
        topology.add_node(node_with(&transport, "//h/s0"));

        let target = StubTarget::pattern("//h/s[0-9]", Arc::clone(&topology)).unwrap();
        let mut stub = DirectStub::new(target);
        let mut servant = CounterServant::new();

        assert!(!stub.is_bound());
        route_one(&mut stub, &mut servant, "get", &[]).await.unwrap();
        assert!(stub.is_bound());
        route_one(&mut stub, &mut servant, "get", &[]).await.unwrap();
        assert_eq!(transport.bind_count(), 1);
        assert_eq!(transport.invoke_count(), 2);
    }

    #[tokio::test]
    async fn test_pattern_stub_falls_back_then_rebinds() {
        let topology = Arc::new(Topology::new());
        let target = StubTarget::pattern("//h/s[0-9]", Arc::clone(&topology)).unwrap();
        let mut stub = DirectStub::new(target);
        let mut servant = CounterServant::new();

        // Nothing matches: the call runs on the local body.
        let result = route_one(&mut stub, &mut servant, "add", &[Value::I64(5)]).await;
        assert_eq!(result.unwrap(), Value::I64(5));
        assert!(!stub.is_bound());

        // A matching node joins; the topology change re-triggers resolution.
        let transport = answering("//h/s0", "tally", 7, 42);
        topology.add_node(node_with(&transport, "//h/s0"));
        let result = route_one(&mut stub, &mut servant, "add", &[Value::I64(5)]).await;
        assert_eq!(result.unwrap(), Value::I64(42));
        assert!(stub.is_bound());
        // The earlier local increment is all the local body ever saw.
        assert_eq!(servant.dispatch("get", &[]).unwrap(), Value::I64(5));
    }

    #[tokio::test]
    async fn test_pattern_stub_falls_back_when_bind_misses() {
        let topology = Arc::new(Topology::new());
        let transport = Arc::new(BindingTransport::empty());
        topology.add_node(Node::remote(
            "//h/s0",
            transport.clone(),
            Arc::new(Traffic::new()),
        ));

        let target = StubTarget::pattern("//h/s[0-9]", Arc::clone(&topology)).unwrap();
        let mut stub = DirectStub::new(target);
        let mut servant = CounterServant::new();

        let result = route_one(&mut stub, &mut servant, "add", &[Value::I64(3)]).await;
        assert_eq!(result.unwrap(), Value::I64(3));
        assert!(!stub.is_bound());
        assert_eq!(transport.bind_count(), 1);
    }

    #[tokio::test]
    async fn test_unnamed_object_runs_locally() {
        let topology = Arc::new(Topology::new());
        let transport = answering("//h/s0", "tally", 7, 42);
        topology.add_node(node_with(&transport, "//h/s0"));

        let target = StubTarget::pattern("//h/s[0-9]", Arc::clone(&topology)).unwrap();
        let mut stub = DirectStub::new(target);
        let mut servant = CounterServant::new();

        let call = RoutedCall {
            object_name: None,
            method: "add",
            args: &[Value::I64(2)],
            local: &mut servant,
        };
        assert_eq!(stub.route(call).await.unwrap(), Value::I64(2));
        assert_eq!(transport.bind_count(), 0);
    }

    #[test]
    fn test_mailbox_slots_wrap_and_clear() {
        let mailbox = Mailbox::new();
        mailbox.put(3, Value::I64(1));
        mailbox.put(3 + MAILBOX_SLOTS, Value::I64(2));
        assert_eq!(mailbox.take(3), Some(Value::I64(2)));
        assert_eq!(mailbox.take(3), None);
    }

    #[tokio::test]
    async fn test_async_stub_delivers_to_mailbox() {
        let transport = answering("//h/s0", "tally", 7, 42);
        let node = node_with(&transport, "//h/s0");
        let handle = RemoteHandle::bound(node, InstanceIndex(7), Some("tally".to_string()));
        let mut stub = AsyncStub::new(StubTarget::fixed(handle));
        let mailbox = stub.mailbox();
        let mut servant = CounterServant::new();

        let immediate = route_one(&mut stub, &mut servant, "add", &[Value::I64(5)]).await;
        assert_eq!(immediate.unwrap(), Value::Unit);

        let mut delivered = None;
        for _ in 0..100 {
            delivered = mailbox.take(0);
            if delivered.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(delivered, Some(Value::I64(42)));
        assert_eq!(transport.invoke_count(), 1);
    }

    #[tokio::test]
    async fn test_async_stub_local_fallback_is_synchronous() {
        let topology = Arc::new(Topology::new());
        let target = StubTarget::pattern("//h/s[0-9]", Arc::clone(&topology)).unwrap();
        let mut stub = AsyncStub::new(target);
        let mut servant = CounterServant::new();

        let result = route_one(&mut stub, &mut servant, "add", &[Value::I64(9)]).await;
        assert_eq!(result.unwrap(), Value::I64(9));
    }
}
