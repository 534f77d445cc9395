//! Fan-out routing: every replica sees every call.

use std::sync::Arc;

use tracing::debug;
use ubiwire::Value;

use crate::node::CallError;
use crate::pattern::NamePattern;
use crate::router::BindState;
use crate::router::CallRouter;
use crate::router::ReplicaCache;
use crate::router::RoutedCall;
use crate::topology::Topology;

/// Invokes every discovered replica in membership order and returns the last
/// replica's result. A failing invoke stops the fan-out and surfaces the
/// error; replicas later in the order are not called. With no replicas the
/// call degrades to the local body, as for the load balancer.
pub struct Broadcaster {
    cache: ReplicaCache,
}

impl Broadcaster {
    pub fn new(object_name: impl Into<String>, topology: Arc<Topology>) -> Self {
        Self {
            cache: ReplicaCache::new(object_name, topology),
        }
    }

    /// Restricts discovery to nodes whose name matches `pattern`.
    pub fn scoped(mut self, pattern: NamePattern) -> Self {
        self.cache = self.cache.scoped(pattern);
        self
    }

    pub fn state(&self) -> BindState {
        self.cache.state()
    }
}

#[async_trait::async_trait]
impl CallRouter for Broadcaster {
    async fn route(&mut self, call: RoutedCall<'_>) -> Result<Value, CallError> {
        let replicas = self.cache.replicas().await.to_vec();
        if replicas.is_empty() {
            debug!(
                "no replicas of {:?}, running {} locally",
                self.cache.object_name(),
                call.method
            );
            return call.proceed();
        }
        debug!("broadcasting {} to {} replicas", call.method, replicas.len());
        let mut last = Value::Unit;
        for handle in &replicas {
            last = handle.invoke(call.method, call.args).await?;
        }
        Ok(last)
    }

    fn invalidate(&self) {
        self.cache.invalidate();
    }
}
