//! # Call routing
//!
//! Routing proxies sit in front of a local object's methods and decide, per
//! call, where the call actually runs: on the local body, on one bound remote
//! instance, on a chosen replica, or on every replica.
//!
//! ## Philosophy
//!
//! A proxy is a value installed into the object's cell
//! ([`crate::object::LocalObject::install_proxy`]), so routing happens under
//! the object's own lock and needs no synchronization of its own. The only
//! piece that must be reachable from outside the lock is invalidation, which
//! is why it is a shared atomic flag rather than a method on the locked
//! router.
//!
//! ## Invariants
//!
//! - A failed resolution or an empty discovery never raises an error: the
//!   call proceeds on the local body and the proxy stays stale so the next
//!   call retries.
//! - Topology changes raise the flag; the proxy acts on it at the start of
//!   its next call. Notification itself never blocks.
//! - The node-side invoke path bypasses proxies entirely; only local callers
//!   go through them.

mod balance;
mod broadcast;
mod stub;

pub use balance::BalancePolicy;
pub use balance::LoadBalancer;
pub use broadcast::Broadcaster;
pub use stub::AsyncStub;
pub use stub::DirectStub;
pub use stub::MAILBOX_SLOTS;
pub use stub::Mailbox;
pub use stub::StubTarget;

use std::sync::Arc;
use std::sync::Weak;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use tracing::debug;
use ubiwire::Value;

use crate::handle::RemoteHandle;
use crate::node::CallError;
use crate::object::Servant;
use crate::pattern::NamePattern;
use crate::topology::Topology;
use crate::topology::TopologyObserver;

/// One intercepted method call, with the means to run it locally instead.
pub struct RoutedCall<'a> {
    /// Registered name of the intercepted object, if it has one.
    pub object_name: Option<String>,
    pub method: &'a str,
    pub args: &'a [Value],
    /// The local body, for fallback execution.
    pub local: &'a mut dyn Servant,
}

impl RoutedCall<'_> {
    /// Runs the call on the local body.
    pub fn proceed(self) -> Result<Value, CallError> {
        self.local
            .dispatch(self.method, self.args)
            .map_err(CallError::Failed)
    }
}

/// A routing proxy. One per object, installed via
/// [`crate::object::LocalObject::install_proxy`].
#[async_trait::async_trait]
pub trait CallRouter: Send {
    /// Decides where `call` runs and returns its result.
    async fn route(&mut self, call: RoutedCall<'_>) -> Result<Value, CallError>;

    /// Marks cached bindings suspect; the next routed call re-resolves.
    fn invalidate(&self);
}

/// Binding state of a proxy's cached target(s).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindState {
    /// Never resolved.
    Unbound,
    /// Holding a usable binding.
    Bound,
    /// Last resolution came up empty; retry on next call.
    Stale,
}

/// Shared invalidation flag. Subscribed to a topology's observer list so a
/// membership change raises it without touching the proxy's lock.
pub struct InvalidateFlag(AtomicBool);

impl InvalidateFlag {
    pub fn new() -> Arc<Self> {
        Arc::new(Self(AtomicBool::new(false)))
    }

    /// A fresh flag already subscribed to `topology`.
    pub fn subscribed(topology: &Topology) -> Arc<Self> {
        let flag = Self::new();
        let weak: Weak<InvalidateFlag> = Arc::downgrade(&flag);
        topology.subscribe(weak);
        flag
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Clears the flag, returning whether it was raised.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

impl TopologyObserver for InvalidateFlag {
    fn topology_changed(&self) {
        self.raise();
    }
}

/// Cached replica set for one object name, refreshed on demand.
pub(crate) struct ReplicaCache {
    object_name: String,
    topology: Arc<Topology>,
    scope: Option<NamePattern>,
    flag: Arc<InvalidateFlag>,
    replicas: Vec<RemoteHandle>,
    state: BindState,
}

impl ReplicaCache {
    pub(crate) fn new(object_name: impl Into<String>, topology: Arc<Topology>) -> Self {
        let flag = InvalidateFlag::subscribed(&topology);
        Self {
            object_name: object_name.into(),
            topology,
            scope: None,
            flag,
            replicas: Vec::new(),
            state: BindState::Unbound,
        }
    }

    /// Restricts discovery to nodes whose name matches `pattern`.
    pub(crate) fn scoped(mut self, pattern: NamePattern) -> Self {
        self.scope = Some(pattern);
        self
    }

    pub(crate) fn object_name(&self) -> &str {
        &self.object_name
    }

    pub(crate) fn state(&self) -> BindState {
        self.state
    }

    pub(crate) fn invalidate(&self) {
        self.flag.raise();
    }

    /// The current replica set, rediscovering when unbound, stale, or
    /// invalidated. An empty discovery leaves the cache stale.
    pub(crate) async fn replicas(&mut self) -> &[RemoteHandle] {
        let invalidated = self.flag.take();
        if self.state == BindState::Bound && !invalidated {
            return &self.replicas;
        }
        let found = match &self.scope {
            Some(pattern) => {
                self.topology
                    .filtered(pattern)
                    .discover_replicas(&self.object_name)
                    .await
            }
            None => self.topology.discover_replicas(&self.object_name).await,
        };
        if found.is_empty() {
            debug!("no replicas of {:?} discovered", self.object_name);
            self.replicas.clear();
            self.state = BindState::Stale;
        } else {
            debug!("{} replicas of {:?} discovered", found.len(), self.object_name);
            self.replicas = found;
            self.state = BindState::Bound;
        }
        &self.replicas
    }
}

/// Tagged construction of the routing proxies.
pub enum RoutingPolicy {
    /// Blocking forward to one target.
    Direct(StubTarget),
    /// Fire-and-forget forward to one target, results in a mailbox.
    Async(StubTarget),
    /// Round-robin over the discovered replica set.
    LoadBalanceRoundRobin {
        object_name: String,
        topology: Arc<Topology>,
        scope: Option<NamePattern>,
    },
    /// Uniform random pick from the discovered replica set.
    LoadBalanceRandom {
        object_name: String,
        topology: Arc<Topology>,
        scope: Option<NamePattern>,
    },
    /// Fan-out to every discovered replica, last result wins.
    Broadcast {
        object_name: String,
        topology: Arc<Topology>,
        scope: Option<NamePattern>,
    },
}

impl RoutingPolicy {
    pub fn build(self) -> Box<dyn CallRouter> {
        fn scoped(balancer: LoadBalancer, scope: Option<NamePattern>) -> LoadBalancer {
            match scope {
                Some(pattern) => balancer.scoped(pattern),
                None => balancer,
            }
        }
        match self {
            RoutingPolicy::Direct(target) => Box::new(DirectStub::new(target)),
            RoutingPolicy::Async(target) => Box::new(AsyncStub::new(target)),
            RoutingPolicy::LoadBalanceRoundRobin {
                object_name,
                topology,
                scope,
            } => Box::new(scoped(LoadBalancer::round_robin(object_name, topology), scope)),
            RoutingPolicy::LoadBalanceRandom {
                object_name,
                topology,
                scope,
            } => Box::new(scoped(LoadBalancer::random(object_name, topology), scope)),
            RoutingPolicy::Broadcast {
                object_name,
                topology,
                scope,
            } => {
                let broadcaster = Broadcaster::new(object_name, topology);
                Box::new(match scope {
                    Some(pattern) => broadcaster.scoped(pattern),
                    None => broadcaster,
                })
            }
        }
    }
}
