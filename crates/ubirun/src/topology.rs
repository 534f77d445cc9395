//! Topologies: named sets of nodes.
//!
//! A [`Topology`] is an ordered, duplicate-free set of [`Node`]s. One
//! distinguished instance, the *global* topology, is process-wide, created
//! on first access, and the only one collaborators normally observe for
//! membership changes. Filtered views are plain value-like topologies: they
//! share no storage with their source and receive no live updates.
//!
//! ## Invariants
//!
//! - Membership never contains two nodes with the same name; `add_node` of a
//!   present node is a no-op and fires nothing.
//! - Observers are notified after a mutation that actually changed
//!   membership, never during bootstrap assembly.
//! - The member list is guarded by a single mutex; iteration works on a
//!   snapshot, so discovery never holds the lock across a network call.

use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::Weak;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use tracing::debug;

use crate::handle::RemoteHandle;
use crate::node::Node;
use crate::pattern::NamePattern;
use crate::pattern::PatternError;

/// Gets a membership-change callback after the fact. Implementors must not
/// block: invalidation flags, counters, wake-ups.
pub trait TopologyObserver: Send + Sync {
    fn topology_changed(&self);
}

static GLOBAL: Mutex<Option<Arc<Topology>>> = Mutex::new(None);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// An ordered, duplicate-free set of nodes.
pub struct Topology {
    members: Mutex<Vec<Node>>,
    observers: Mutex<Vec<Weak<dyn TopologyObserver>>>,
    bootstrap: AtomicBool,
}

impl Topology {
    pub fn new() -> Self {
        Self {
            members: Mutex::new(Vec::new()),
            observers: Mutex::new(Vec::new()),
            bootstrap: AtomicBool::new(false),
        }
    }

    /// Builds a topology from a batch of nodes, deduplicating, without
    /// firing notifications.
    pub fn from_nodes(nodes: impl IntoIterator<Item = Node>) -> Self {
        let topology = Self::new();
        topology.bootstrap.store(true, Ordering::Release);
        for node in nodes {
            topology.add_node(node);
        }
        topology.bootstrap.store(false, Ordering::Release);
        topology
    }

    /// The process-wide topology, created on first access.
    pub fn global() -> Arc<Topology> {
        lock(&GLOBAL)
            .get_or_insert_with(|| Arc::new(Topology::new()))
            .clone()
    }

    /// The global topology if it has been created, without creating it.
    pub fn try_global() -> Option<Arc<Topology>> {
        lock(&GLOBAL).clone()
    }

    /// Drops the global topology; the next [`Topology::global`] starts
    /// fresh. Existing references keep the old instance alive but it is no
    /// longer the global one.
    pub fn reset_global() {
        *lock(&GLOBAL) = None;
    }

    /// Filtered view of the global topology. Empty if no global topology
    /// exists yet; this never creates one.
    pub fn partial(pattern: &str) -> Result<Topology, PatternError> {
        let pattern = NamePattern::compile(pattern)?;
        Ok(match Self::try_global() {
            Some(global) => global.filtered(&pattern),
            None => Topology::new(),
        })
    }

    /// Adds a node; no-op (and no notification) if a node with that name is
    /// already a member. Returns whether membership changed.
    pub fn add_node(&self, node: Node) -> bool {
        {
            let mut members = lock(&self.members);
            if members.iter().any(|m| *m == node) {
                return false;
            }
            debug!("topology gains node {}", node);
            members.push(node);
        }
        self.fire_changed();
        true
    }

    /// Adds a batch of nodes with notifications suppressed, then fires a
    /// single notification if anything changed. Returns how many joined.
    pub fn add_nodes(&self, nodes: impl IntoIterator<Item = Node>) -> usize {
        self.bootstrap.store(true, Ordering::Release);
        let added = nodes.into_iter().filter(|n| self.add_node(n.clone())).count();
        self.bootstrap.store(false, Ordering::Release);
        if added > 0 {
            self.fire_changed();
        }
        added
    }

    /// Removes the member with `name`. Returns whether membership changed.
    pub fn remove_named(&self, name: &str) -> bool {
        let removed = {
            let mut members = lock(&self.members);
            match members.iter().position(|m| m.name() == name) {
                Some(at) => {
                    members.remove(at);
                    true
                }
                None => false,
            }
        };
        if removed {
            debug!("topology loses node {}", name);
            self.fire_changed();
        }
        removed
    }

    pub fn remove_node(&self, node: &Node) -> bool {
        self.remove_named(node.name())
    }

    /// Replaces the member at `at`. If the replacement is already a member
    /// elsewhere, the slot is removed instead so no duplicate appears.
    /// Returns whether membership changed.
    pub fn replace_node(&self, at: usize, node: Node) -> bool {
        let changed = {
            let mut members = lock(&self.members);
            let Some(slot) = members.get(at) else {
                return false;
            };
            if *slot == node {
                false
            } else if members.iter().any(|m| *m == node) {
                members.remove(at);
                true
            } else {
                members[at] = node;
                true
            }
        };
        if changed {
            self.fire_changed();
        }
        changed
    }

    /// Snapshot of the member list in order.
    pub fn nodes(&self) -> Vec<Node> {
        lock(&self.members).clone()
    }

    pub fn node_at(&self, at: usize) -> Option<Node> {
        lock(&self.members).get(at).cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.members).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.members).is_empty()
    }

    pub fn contains(&self, node: &Node) -> bool {
        lock(&self.members).iter().any(|m| m == node)
    }

    pub fn contains_named(&self, name: &str) -> bool {
        lock(&self.members).iter().any(|m| m.name() == name)
    }

    /// Members that are not the calling process's own node.
    pub fn nodes_excluding_local(&self) -> Vec<Node> {
        lock(&self.members)
            .iter()
            .filter(|m| !m.is_local())
            .cloned()
            .collect()
    }

    /// A new topology holding only the members whose name matches.
    pub fn filtered(&self, pattern: &NamePattern) -> Topology {
        Topology::from_nodes(
            lock(&self.members)
                .iter()
                .filter(|m| pattern.matches(m.name()))
                .cloned()
                .collect::<Vec<_>>(),
        )
    }

    /// First member whose name matches, in membership order.
    pub fn first_matching(&self, pattern: &NamePattern) -> Option<Node> {
        lock(&self.members)
            .iter()
            .find(|m| pattern.matches(m.name()))
            .cloned()
    }

    /// Asks every non-local member for a binding under `name` and collects
    /// the handles in membership order. Nodes that answer nothing (or fail
    /// to answer) contribute nothing.
    pub async fn discover_replicas(&self, name: &str) -> Vec<RemoteHandle> {
        let nodes = self.nodes();
        let mut replicas = Vec::new();
        for node in nodes {
            if node.is_local() {
                continue;
            }
            if let Some(handle) = node.bind(name).await {
                replicas.push(handle);
            }
        }
        replicas
    }

    /// True iff any member, the local node included, binds `name`.
    pub async fn exists(&self, name: &str) -> bool {
        for node in self.nodes() {
            if node.bind(name).await.is_some() {
                return true;
            }
        }
        false
    }

    /// Registers a membership-change observer. Dead observers are pruned on
    /// the next notification.
    pub fn subscribe(&self, observer: Weak<dyn TopologyObserver>) {
        lock(&self.observers).push(observer);
    }

    fn fire_changed(&self) {
        if self.bootstrap.load(Ordering::Acquire) {
            return;
        }
        let live: Vec<Arc<dyn TopologyObserver>> = {
            let mut observers = lock(&self.observers);
            observers.retain(|o| o.strong_count() > 0);
            observers.iter().filter_map(Weak::upgrade).collect()
        };
        debug!("topology changed, notifying {} observers", live.len());
        for observer in live {
            observer.topology_changed();
        }
    }
}

impl Default for Topology {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let members = lock(&self.members);
        write!(f, "{{")?;
        for (i, node) in members.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", node)?;
        }
        write!(f, "}}")
    }
}
