//! Scripted servants and transports for testing.
//!
//! Used internally by the test suites and not part of the public API.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use ubiwire::FailureReason;
use ubiwire::InstanceIndex;
use ubiwire::ObjectRef;
use ubiwire::Reply;
use ubiwire::Request;
use ubiwire::StateSnapshot;
use ubiwire::Value;
use ubiwire::decode;
use ubiwire::encode;

use crate::context;
use crate::object::Introspect;
use crate::object::Servant;
use crate::registry::TypeRegistry;
use crate::transport;
use crate::transport::Transport;
use crate::transport::TransportError;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Counting servant used across the test suites.
///
/// `add` accumulates and returns the new total, recording who called it from
/// the ambient call context's `user` entry; `get` reads the total;
/// `describe` echoes its arguments back as a list; `last_user` reports the
/// recorded caller. State copy covers `count` and `label`.
pub struct CounterServant {
    count: i64,
    label: String,
    last_user: String,
}

impl CounterServant {
    pub fn new() -> Self {
        Self {
            count: 0,
            label: String::new(),
            last_user: String::new(),
        }
    }
}

impl Default for CounterServant {
    fn default() -> Self {
        Self::new()
    }
}

impl Introspect for CounterServant {
    fn snapshot(&self, fields: Option<&[&str]>) -> StateSnapshot {
        let full: StateSnapshot = [
            ("count", Value::I64(self.count)),
            ("label", Value::Str(self.label.clone())),
        ]
        .into_iter()
        .collect();
        match fields {
            Some(names) => full.subset(names),
            None => full,
        }
    }

    fn apply_snapshot(&mut self, snapshot: &StateSnapshot) -> Result<(), FailureReason> {
        if let Some(value) = snapshot.get("count") {
            self.count = value.as_i64().ok_or_else(|| {
                FailureReason::SnapshotRejected(format!("count is {}", value.type_label()))
            })?;
        }
        if let Some(value) = snapshot.get("label") {
            self.label = value
                .as_str()
                .ok_or_else(|| {
                    FailureReason::SnapshotRejected(format!("label is {}", value.type_label()))
                })?
                .to_string();
        }
        Ok(())
    }
}

impl Servant for CounterServant {
    fn type_name(&self) -> &str {
        "counter"
    }

    fn dispatch(&mut self, method: &str, args: &[Value]) -> Result<Value, FailureReason> {
        match method {
            "add" => {
                let n = args
                    .first()
                    .and_then(Value::as_i64)
                    .ok_or_else(|| FailureReason::BadArguments("add wants an integer".into()))?;
                self.count += n;
                if let Some(user) = context::current().get("user").and_then(Value::as_str) {
                    self.last_user = user.to_string();
                }
                Ok(Value::I64(self.count))
            }
            "get" => Ok(Value::I64(self.count)),
            "describe" => Ok(Value::List(args.to_vec())),
            "last_user" => Ok(Value::Str(self.last_user.clone())),
            _ => Err(FailureReason::MethodNotFound(method.to_string())),
        }
    }
}

/// Registers the counter under its type name.
pub fn register_counter_type(types: &TypeRegistry) {
    types.register("counter", || Box::new(CounterServant::new()));
}

/// Transport that ignores the request and always answers with one canned
/// reply.
pub struct FixedReplyTransport {
    reply: Reply,
}

impl FixedReplyTransport {
    pub fn new(reply: Reply) -> Self {
        Self { reply }
    }
}

#[async_trait::async_trait]
impl Transport for FixedReplyTransport {
    async fn call(&self, _payload: &[u8]) -> transport::Result<Vec<u8>> {
        encode(&self.reply).map_err(|e| TransportError::Io(e.to_string()))
    }
}

enum SilentMode {
    Garbage,
    Unreachable,
}

/// Transport that never answers properly.
pub struct SilentTransport {
    mode: SilentMode,
}

impl SilentTransport {
    /// Answers every call with undecodable bytes.
    pub fn garbage() -> Self {
        Self {
            mode: SilentMode::Garbage,
        }
    }

    /// Fails every call at the transport layer.
    pub fn unreachable() -> Self {
        Self {
            mode: SilentMode::Unreachable,
        }
    }
}

#[async_trait::async_trait]
impl Transport for SilentTransport {
    async fn call(&self, _payload: &[u8]) -> transport::Result<Vec<u8>> {
        match self.mode {
            SilentMode::Garbage => Ok(vec![0xde, 0xad, 0xbe, 0xef]),
            SilentMode::Unreachable => {
                Err(TransportError::ConnectionLost("scripted outage".into()))
            }
        }
    }
}

/// A scripted remote node behind a transport.
///
/// Decodes real request frames and plays a minimal container: it binds the
/// names it holds, answers every invoke with one canned value, accepts
/// instantiations (which it then binds, so replication sees them), and
/// reports a scripted member list to sync requests. Every request kind is
/// counted for assertions.
pub struct BindingTransport {
    node: String,
    answer: Value,
    invoke_fault: bool,
    sync_known: Vec<String>,
    held: Mutex<HashMap<String, InstanceIndex>>,
    next_index: AtomicU64,
    binds: AtomicUsize,
    invokes: Mutex<Vec<(InstanceIndex, String)>>,
    instantiations: Mutex<Vec<(String, bool)>>,
}

impl BindingTransport {
    fn scripted(node: &str) -> Self {
        Self {
            node: node.to_string(),
            answer: Value::Unit,
            invoke_fault: false,
            sync_known: Vec::new(),
            held: Mutex::new(HashMap::new()),
            next_index: AtomicU64::new(100),
            binds: AtomicUsize::new(0),
            invokes: Mutex::new(Vec::new()),
            instantiations: Mutex::new(Vec::new()),
        }
    }

    /// Holds nothing; instantiation still works.
    pub fn empty() -> Self {
        Self::scripted("//mock/void")
    }

    /// Holds `name` under `index`.
    pub fn holding(node: &str, name: &str, index: u64) -> Self {
        let transport = Self::scripted(node);
        lock(&transport.held).insert(name.to_string(), InstanceIndex(index));
        transport
    }

    /// Holds `name` and answers every invoke with `answer`.
    pub fn answering(node: &str, name: &str, index: u64, answer: Value) -> Self {
        let mut transport = Self::holding(node, name, index);
        transport.answer = answer;
        transport
    }

    /// Holds `name` but fails every invoke at the transport layer.
    pub fn broken(node: &str, name: &str, index: u64) -> Self {
        let mut transport = Self::holding(node, name, index);
        transport.invoke_fault = true;
        transport
    }

    /// Answers sync requests with the given member names.
    pub fn syncing(node: &str, known: &[&str]) -> Self {
        let mut transport = Self::scripted(node);
        transport.sync_known = known.iter().map(|s| s.to_string()).collect();
        transport
    }

    pub fn bind_count(&self) -> usize {
        self.binds.load(Ordering::SeqCst)
    }

    pub fn invoke_count(&self) -> usize {
        lock(&self.invokes).len()
    }

    pub fn instantiate_count(&self) -> usize {
        lock(&self.instantiations).len()
    }

    /// Instantiations seen so far as (type name, carried state?).
    pub fn instantiated(&self) -> Vec<(String, bool)> {
        lock(&self.instantiations).clone()
    }

    fn serve(&self, request: Request) -> transport::Result<Reply> {
        Ok(match request {
            Request::Bind { name } => {
                self.binds.fetch_add(1, Ordering::SeqCst);
                Reply::Bound(lock(&self.held).get(&name).map(|&index| ObjectRef {
                    node: self.node.clone(),
                    index,
                    name: Some(name.clone()),
                }))
            }
            Request::Invoke { index, method, .. } => {
                if self.invoke_fault {
                    return Err(TransportError::ConnectionLost("scripted fault".into()));
                }
                lock(&self.invokes).push((index, method));
                Reply::Returned(Ok(self.answer.clone()))
            }
            Request::Instantiate {
                name,
                type_name,
                state,
                ..
            } => {
                let index = InstanceIndex(self.next_index.fetch_add(1, Ordering::SeqCst));
                lock(&self.instantiations).push((type_name, state.is_some()));
                if let Some(name) = name {
                    lock(&self.held).insert(name, index);
                }
                Reply::Instantiated(Ok(index))
            }
            Request::ApplyState { .. } => Reply::StateApplied(Ok(())),
            Request::Sync { .. } => Reply::Synced {
                known: self.sync_known.clone(),
            },
        })
    }
}

#[async_trait::async_trait]
impl Transport for BindingTransport {
    async fn call(&self, payload: &[u8]) -> transport::Result<Vec<u8>> {
        let request: Request =
            decode(payload).map_err(|e| TransportError::Io(e.to_string()))?;
        let reply = self.serve(request)?;
        encode(&reply).map_err(|e| TransportError::Io(e.to_string()))
    }
}
