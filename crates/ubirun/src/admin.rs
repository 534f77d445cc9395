//! Administration surface: inspect and steer a running process. Trace and
//! configuration commands pass through to host-provided hooks; the console
//! itself only owns topology and traffic inspection.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::node::full_node_name;
use crate::node::local_host;
use crate::runtime::Runtime;

/// Host-provided control over trace verbosity per category.
pub trait TraceControl: Send + Sync {
    fn set_level(&self, category: &str, level: u8);
}

/// Host-provided lifecycle hooks for named configurations.
pub trait ConfigHooks: Send + Sync {
    fn reload(&self, config: &str);
    fn weave(&self, config: &str);
    fn unweave(&self, config: &str);
}

#[derive(Debug)]
pub enum AdminError {
    /// No route is registered for the named node.
    UnknownNode(String),
    NoTraceControl,
    NoConfigHooks,
}

impl fmt::Display for AdminError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdminError::UnknownNode(name) => write!(f, "unknown node {:?}", name),
            AdminError::NoTraceControl => write!(f, "no trace control installed"),
            AdminError::NoConfigHooks => write!(f, "no configuration hooks installed"),
        }
    }
}

impl std::error::Error for AdminError {}

pub struct AdminConsole {
    runtime: Arc<Runtime>,
    trace: Option<Arc<dyn TraceControl>>,
    config: Option<Arc<dyn ConfigHooks>>,
}

impl AdminConsole {
    pub fn new(runtime: Arc<Runtime>) -> Self {
        Self {
            runtime,
            trace: None,
            config: None,
        }
    }

    pub fn with_trace_control(mut self, trace: Arc<dyn TraceControl>) -> Self {
        self.trace = Some(trace);
        self
    }

    pub fn with_config_hooks(mut self, config: Arc<dyn ConfigHooks>) -> Self {
        self.config = Some(config);
        self
    }

    /// Member names of the runtime's topology, in membership order.
    pub fn list_nodes(&self) -> Vec<String> {
        self.runtime
            .topology()
            .nodes()
            .iter()
            .map(|n| n.name().to_string())
            .collect()
    }

    pub fn topology_dump(&self) -> String {
        format!("{}", self.runtime.topology())
    }

    pub fn traffic_dump(&self) -> String {
        let traffic = self.runtime.traffic();
        format!(
            "in {} bytes, out {} bytes",
            traffic.total_in(),
            traffic.total_out()
        )
    }

    /// Resolves `name` through the runtime's routes and adds it to the
    /// topology.
    pub fn add_node(&self, name: &str) -> Result<(), AdminError> {
        match self.runtime.attach(name) {
            Some(node) => {
                debug!("admin added {}", node);
                Ok(())
            }
            None => Err(AdminError::UnknownNode(name.to_string())),
        }
    }

    pub fn remove_node(&self, name: &str) -> bool {
        let name = full_node_name(&local_host(), name);
        self.runtime.topology().remove_named(&name)
    }

    pub fn set_trace(&self, category: &str, level: u8) -> Result<(), AdminError> {
        let trace = self.trace.as_ref().ok_or(AdminError::NoTraceControl)?;
        trace.set_level(category, level);
        Ok(())
    }

    pub fn reload(&self, config: &str) -> Result<(), AdminError> {
        self.hooks()?.reload(config);
        Ok(())
    }

    pub fn weave(&self, config: &str) -> Result<(), AdminError> {
        self.hooks()?.weave(config);
        Ok(())
    }

    pub fn unweave(&self, config: &str) -> Result<(), AdminError> {
        self.hooks()?.unweave(config);
        Ok(())
    }

    fn hooks(&self) -> Result<&dyn ConfigHooks, AdminError> {
        self.config
            .as_deref()
            .ok_or(AdminError::NoConfigHooks)
    }
}
