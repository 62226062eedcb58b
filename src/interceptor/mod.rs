//! Interceptor chain invocation model.
//!
//! The weaving layer hands each intercepted call to a [`ChainInvoker`], which
//! runs the chain registered for that extension point around the real call.
//! Interceptors continue the chain explicitly through the [`ChainCursor`]
//! they receive; returning without forwarding stops the remaining hooks of
//! that phase.

pub mod chain;
pub mod context;
pub mod invoker;
pub mod log;
pub mod method;
pub mod span;

pub use chain::{ChainBuilder, ChainCursor, InterceptorChain};
pub use context::{ExecutionInfo, InvocationContext};
pub use invoker::{ActiveInvocation, ChainInvoker};
pub use log::LogInterceptor;
pub use method::{CallOutcome, MethodInfo};
pub use span::{CallSpan, SpanInterceptor};

/// Before/after behavior attached to one extension point.
///
/// Both hooks run on the caller's thread. The default implementations only
/// forward to the next interceptor.
pub trait Interceptor: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    fn before(&self, call: &MethodInfo<'_>, ctx: &mut InvocationContext, chain: &mut ChainCursor<'_>) {
        chain.do_before(call, ctx);
    }

    fn after(&self, call: &MethodInfo<'_>, ctx: &mut InvocationContext, chain: &mut ChainCursor<'_>) {
        chain.do_after(call, ctx);
    }
}
