//! Ambient call-context propagation.
//!
//! A [`CallContext`](ubiwire::CallContext) rides along with every remote
//! instantiate and invoke. On the sending side the handle picks up whatever
//! context the current task carries; on the serving side the node restores
//! the received context around dispatch, so nested outbound calls made by a
//! servant forward the same token. The runtime never reads the contents.

use std::future::Future;

use ubiwire::CallContext;

tokio::task_local! {
    static CURRENT: CallContext;
}

/// Snapshot of the calling task's context; empty if none was set.
pub fn current() -> CallContext {
    CURRENT
        .try_with(|ctx| ctx.clone())
        .unwrap_or_default()
}

/// Runs a future with `ctx` as the ambient call context.
pub async fn scope<F: Future>(ctx: CallContext, f: F) -> F::Output {
    CURRENT.scope(ctx, f).await
}

/// Runs a closure with `ctx` as the ambient call context.
///
/// Used on the serving side around synchronous servant dispatch.
pub fn scope_sync<R>(ctx: CallContext, f: impl FnOnce() -> R) -> R {
    CURRENT.sync_scope(ctx, f)
}
