//! # Runtime
//!
//! Per-process glue: the local node, the routes to every reachable peer,
//! the process-wide traffic counters, and the serving side that turns
//! request frames into reply frames.
//!
//! ## Philosophy
//!
//! The runtime is deliberately transport-agnostic. It never listens on
//! anything; whatever owns the wire (a socket loop, an in-process loopback
//! pair) feeds request payloads to [`Runtime::handle_frame`] and carries the
//! returned reply bytes back. Hostile or malformed input must produce an
//! encoded failure reply, never a crash.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;
use tracing::warn;

use ubiwire::FailureReason;
use ubiwire::Reply;
use ubiwire::Request;
use ubiwire::decode;
use ubiwire::encode;

use crate::context;
use crate::node::LocalNode;
use crate::node::Node;
use crate::node::Result;
use crate::node::full_node_name;
use crate::node::local_host;
use crate::topology::Topology;
use crate::transport::Traffic;
use crate::transport::Transport;

/// Per-process context. Wrap it in an [`Arc`] and share it with whatever
/// serves the wire.
pub struct Runtime {
    local: Arc<LocalNode>,
    node: Node,
    topology: Arc<Topology>,
    routes: DashMap<String, Arc<dyn Transport>>,
    traffic: Arc<Traffic>,
}

impl Runtime {
    /// A runtime attached to the process-wide topology.
    pub fn new(name: &str) -> Self {
        Self::with_topology(name, Topology::global())
    }

    /// A runtime with a private topology. Lets several runtimes coexist in
    /// one process, which is how the loopback tests run whole clusters.
    pub fn detached(name: &str) -> Self {
        Self::with_topology(name, Arc::new(Topology::new()))
    }

    /// Short names qualify against the local host; the runtime's node joins
    /// `topology` immediately.
    pub fn with_topology(name: &str, topology: Arc<Topology>) -> Self {
        let name = full_node_name(&local_host(), name);
        let local = Arc::new(LocalNode::new(&name));
        let node = Node::from_local(Arc::clone(&local));
        topology.add_node(node.clone());
        debug!("runtime {} up", name);
        Self {
            local,
            node,
            topology,
            routes: DashMap::new(),
            traffic: Arc::new(Traffic::new()),
        }
    }

    pub fn node(&self) -> Node {
        self.node.clone()
    }

    pub fn local(&self) -> &LocalNode {
        &self.local
    }

    pub fn topology(&self) -> Arc<Topology> {
        Arc::clone(&self.topology)
    }

    /// Process-wide request/reply byte counters: remote calls made by this
    /// runtime's nodes plus frames served by [`Runtime::handle_frame`].
    pub fn traffic(&self) -> &Traffic {
        &self.traffic
    }

    /// Registers how to reach the node called `name`.
    pub fn add_route(&self, name: &str, transport: Arc<dyn Transport>) {
        self.routes
            .insert(full_node_name(&local_host(), name), transport);
    }

    /// Resolves a node by name: the runtime's own node for its own name,
    /// a remote node if a route is registered, nothing otherwise.
    pub fn resolve(&self, name: &str) -> Option<Node> {
        let name = full_node_name(&local_host(), name);
        if name == self.node.name() {
            return Some(self.node.clone());
        }
        self.routes
            .get(&name)
            .map(|entry| Node::remote(&name, Arc::clone(entry.value()), Arc::clone(&self.traffic)))
    }

    /// Resolves `name` and adds it to the runtime's topology.
    pub fn attach(&self, name: &str) -> Option<Node> {
        let node = self.resolve(name)?;
        self.topology.add_node(node.clone());
        Some(node)
    }

    /// Merges topologies with a peer: sends the member names we know, adds
    /// every name the peer answers with. Names without a registered route
    /// are logged and skipped. Returns how many members joined our topology.
    pub async fn join(&self, peer: &Node) -> Result<usize> {
        let known = self.member_names();
        let theirs = peer.sync(self.node.name(), known).await?;
        let mut added = 0;
        if self.topology.add_node(peer.clone()) {
            added += 1;
        }
        for name in theirs {
            if self.topology.contains_named(&name) {
                continue;
            }
            match self.resolve(&name) {
                Some(node) => {
                    if self.topology.add_node(node) {
                        added += 1;
                    }
                }
                None => warn!("no route to {}, skipped", name),
            }
        }
        debug!("joined {}: {} new members", peer, added);
        Ok(added)
    }

    /// Serves one request frame and returns the encoded reply.
    pub async fn handle_frame(&self, payload: &[u8]) -> Vec<u8> {
        self.traffic.record_in(payload.len());
        let reply = match decode::<Request>(payload) {
            Ok(request) => self.serve(request).await,
            Err(e) => {
                warn!("undecodable request frame: {}", e);
                Reply::Returned(Err(FailureReason::Malformed(e.to_string())))
            }
        };
        let bytes = encode(&reply).unwrap_or_else(|e| {
            warn!("encoding reply failed: {}", e);
            Vec::new()
        });
        self.traffic.record_out(bytes.len());
        bytes
    }

    /// The call context travels inside the frame and is restored around the
    /// dispatch, so servant code sees the caller's ambient context.
    async fn serve(&self, request: Request) -> Reply {
        debug!("serving {}", request.kind());
        match request {
            Request::Instantiate {
                name,
                type_name,
                state,
                context,
            } => {
                let result = context::scope_sync(context, || {
                    self.local.instantiate(name.as_deref(), &type_name, state.as_ref())
                });
                Reply::Instantiated(result)
            }
            Request::ApplyState {
                index,
                state,
                context,
            } => {
                let result = context::scope(context, self.local.apply_state(index, &state)).await;
                Reply::StateApplied(result)
            }
            Request::Invoke {
                index,
                method,
                args,
                context,
            } => {
                let result = context::scope(context, self.local.invoke(index, &method, &args)).await;
                Reply::Returned(result)
            }
            Request::Bind { name } => {
                Reply::Bound(self.local.bind_local(&name).map(|object| object.object_ref()))
            }
            Request::Sync { from, known } => {
                let mut names = known;
                names.push(from);
                for name in names {
                    if self.topology.contains_named(&name) {
                        continue;
                    }
                    match self.resolve(&name) {
                        Some(node) => {
                            self.topology.add_node(node);
                        }
                        None => debug!("sync: no route to {}, skipped", name),
                    }
                }
                Reply::Synced {
                    known: self.member_names(),
                }
            }
        }
    }

    fn member_names(&self) -> Vec<String> {
        self.topology
            .nodes()
            .iter()
            .map(|n| n.name().to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use ubiwire::CallContext;
    use ubiwire::InstanceIndex;
    use ubiwire::Value;

    use crate::testkit::BindingTransport;
    use crate::testkit::register_counter_type;

    async fn roundtrip(runtime: &Runtime, request: &Request) -> Reply {
        let payload = encode(request).unwrap();
        let reply = runtime.handle_frame(&payload).await;
        decode(&reply).unwrap()
    }

    #[tokio::test]
    async fn test_served_instantiate_invoke_bind() {
        let runtime = Runtime::detached("//h/a");
        register_counter_type(runtime.local().types());

        let reply = roundtrip(
            &runtime,
            &Request::Instantiate {
                name: Some("tally".to_string()),
                type_name: "counter".to_string(),
                state: None,
                context: CallContext::default(),
            },
        )
        .await;
        let Reply::Instantiated(Ok(index)) = reply else {
            panic!("unexpected reply: {reply:?}");
        };

        let reply = roundtrip(
            &runtime,
            &Request::Invoke {
                index,
                method: "add".to_string(),
                args: vec![Value::I64(5)],
                context: CallContext::default(),
            },
        )
        .await;
        assert!(matches!(reply, Reply::Returned(Ok(Value::I64(5)))));

        let reply = roundtrip(
            &runtime,
            &Request::Bind {
                name: "tally".to_string(),
            },
        )
        .await;
        let Reply::Bound(Some(obj)) = reply else {
            panic!("unexpected reply: {reply:?}");
        };
        assert_eq!(obj.index, index);
        assert_eq!(obj.name.as_deref(), Some("tally"));
    }

    #[tokio::test]
    async fn test_served_unknown_type_is_failure_reply() {
        let runtime = Runtime::detached("//h/a");
        let reply = roundtrip(
            &runtime,
            &Request::Instantiate {
                name: None,
                type_name: "ghost".to_string(),
                state: None,
                context: CallContext::default(),
            },
        )
        .await;
        assert!(matches!(
            reply,
            Reply::Instantiated(Err(FailureReason::TypeNotRegistered(_)))
        ));
    }

    #[tokio::test]
    async fn test_malformed_frame_is_failure_reply() {
        let runtime = Runtime::detached("//h/a");
        let reply = runtime.handle_frame(b"not a frame").await;
        let reply: Reply = decode(&reply).unwrap();
        assert!(matches!(
            reply,
            Reply::Returned(Err(FailureReason::Malformed(_)))
        ));
    }

    #[tokio::test]
    async fn test_serving_counts_traffic() {
        let runtime = Runtime::detached("//h/a");
        assert_eq!(runtime.traffic().total_in(), 0);
        runtime.handle_frame(b"junk").await;
        assert!(runtime.traffic().total_in() > 0);
        assert!(runtime.traffic().total_out() > 0);
    }

    #[tokio::test]
    async fn test_resolve_and_attach() {
        let runtime = Runtime::detached("//h/a");
        assert_eq!(runtime.resolve("//h/a").unwrap().name(), "//h/a");
        assert!(runtime.resolve("//h/b").is_none());

        runtime.add_route("//h/b", Arc::new(BindingTransport::empty()));
        let node = runtime.attach("//h/b").unwrap();
        assert!(!node.is_local());
        assert!(runtime.topology().contains_named("//h/b"));
    }

    #[tokio::test]
    async fn test_join_adds_resolvable_members_only() {
        let runtime = Runtime::detached("//h/a");
        runtime.add_route(
            "//h/b",
            Arc::new(BindingTransport::syncing(
                "//h/b",
                &["//h/c", "//h/zz"],
            )),
        );
        runtime.add_route("//h/c", Arc::new(BindingTransport::empty()));

        let peer = runtime.resolve("//h/b").unwrap();
        let added = runtime.join(&peer).await.unwrap();
        assert_eq!(added, 2);
        let topology = runtime.topology();
        assert!(topology.contains_named("//h/b"));
        assert!(topology.contains_named("//h/c"));
        assert!(!topology.contains_named("//h/zz"));
    }

    #[tokio::test]
    async fn test_served_sync_reports_members_and_adds_sender() {
        let runtime = Runtime::detached("//h/a");
        runtime.add_route("//h/b", Arc::new(BindingTransport::empty()));

        let reply = roundtrip(
            &runtime,
            &Request::Sync {
                from: "//h/b".to_string(),
                known: vec!["//h/zz".to_string()],
            },
        )
        .await;
        let Reply::Synced { known } = reply else {
            panic!("unexpected reply: {reply:?}");
        };
        assert!(known.contains(&"//h/a".to_string()));
        assert!(known.contains(&"//h/b".to_string()));
        assert!(!known.contains(&"//h/zz".to_string()));
    }

    #[tokio::test]
    async fn test_served_invoke_missing_instance() {
        let runtime = Runtime::detached("//h/a");
        let reply = roundtrip(
            &runtime,
            &Request::Invoke {
                index: InstanceIndex(41),
                method: "get".to_string(),
                args: vec![],
                context: CallContext::default(),
            },
        )
        .await;
        assert!(matches!(
            reply,
            Reply::Returned(Err(FailureReason::InstanceNotFound(InstanceIndex(41))))
        ));
    }
}
