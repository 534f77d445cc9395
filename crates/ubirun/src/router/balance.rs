//! Load balancing across a discovered replica set.

use std::sync::Arc;

use rand::Rng;
use tracing::debug;
use ubiwire::Value;

use crate::handle::RemoteHandle;
use crate::node::CallError;
use crate::pattern::NamePattern;
use crate::router::BindState;
use crate::router::CallRouter;
use crate::router::ReplicaCache;
use crate::router::RoutedCall;
use crate::topology::Topology;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BalancePolicy {
    /// Walk the replica set in order, wrapping at its current length.
    RoundRobin,
    /// Uniform pick per call.
    Random,
}

/// Routes each call to one replica of the object, chosen by policy.
///
/// Replicas are discovered from the topology on first use and after
/// invalidation; an empty discovery degrades the call to the local body and
/// leaves the cache stale so the next call retries.
pub struct LoadBalancer {
    cache: ReplicaCache,
    policy: BalancePolicy,
    next: usize,
}

impl LoadBalancer {
    pub fn round_robin(object_name: impl Into<String>, topology: Arc<Topology>) -> Self {
        Self::new(object_name, topology, BalancePolicy::RoundRobin)
    }

    pub fn random(object_name: impl Into<String>, topology: Arc<Topology>) -> Self {
        Self::new(object_name, topology, BalancePolicy::Random)
    }

    fn new(object_name: impl Into<String>, topology: Arc<Topology>, policy: BalancePolicy) -> Self {
        Self {
            cache: ReplicaCache::new(object_name, topology),
            policy,
            next: 0,
        }
    }

    /// Restricts discovery to nodes whose name matches `pattern`.
    pub fn scoped(mut self, pattern: NamePattern) -> Self {
        self.cache = self.cache.scoped(pattern);
        self
    }

    pub fn policy(&self) -> BalancePolicy {
        self.policy
    }

    pub fn state(&self) -> BindState {
        self.cache.state()
    }

    /// Picks the next replica. The round-robin cursor survives refreshes and
    /// wraps against the set's current length.
    fn pick(next: &mut usize, policy: BalancePolicy, replicas: &[RemoteHandle]) -> RemoteHandle {
        match policy {
            BalancePolicy::RoundRobin => {
                if *next >= replicas.len() {
                    *next = 0;
                }
                let handle = replicas[*next].clone();
                *next += 1;
                handle
            }
            BalancePolicy::Random => {
                replicas[rand::thread_rng().gen_range(0..replicas.len())].clone()
            }
        }
    }
}

#[async_trait::async_trait]
impl CallRouter for LoadBalancer {
    async fn route(&mut self, call: RoutedCall<'_>) -> Result<Value, CallError> {
        let chosen = {
            let replicas = self.cache.replicas().await;
            if replicas.is_empty() {
                None
            } else {
                Some(Self::pick(&mut self.next, self.policy, replicas))
            }
        };
        match chosen {
            Some(handle) => {
                debug!("balancing {} to {}", call.method, handle);
                handle.invoke(call.method, call.args).await
            }
            None => {
                debug!(
                    "no replicas of {:?}, running {} locally",
                    self.cache.object_name(),
                    call.method
                );
                call.proceed()
            }
        }
    }

    fn invalidate(&self) {
        self.cache.invalidate();
    }
}
