//! In-process transport: request frames served by another runtime living in
//! the same process. The tests and demos run whole clusters this way, with
//! real frames and real serving but no network underneath.

use std::sync::Arc;

use crate::runtime::Runtime;
use crate::transport::Result;
use crate::transport::Transport;

/// Carries each payload straight into the serving runtime's frame handler.
pub struct LoopbackTransport {
    serving: Arc<Runtime>,
}

impl LoopbackTransport {
    pub fn new(serving: Arc<Runtime>) -> Self {
        Self { serving }
    }

    /// Wires two runtimes so each can reach the other by node name.
    pub fn pair(a: &Arc<Runtime>, b: &Arc<Runtime>) {
        a.add_route(
            b.node().name(),
            Arc::new(LoopbackTransport::new(Arc::clone(b))),
        );
        b.add_route(
            a.node().name(),
            Arc::new(LoopbackTransport::new(Arc::clone(a))),
        );
    }
}

#[async_trait::async_trait]
impl Transport for LoopbackTransport {
    async fn call(&self, payload: &[u8]) -> Result<Vec<u8>> {
        Ok(self.serving.handle_frame(payload).await)
    }
}
