//! Call logging at extension points.
//!
//! Emits a debug event when a call starts and an info event with its
//! duration and outcome when it completes.

use crate::interceptor::{ChainCursor, Interceptor, InvocationContext, MethodInfo};
use tracing::{debug, info};

/// Logs every completed call with its duration and outcome.
#[derive(Debug, Clone)]
pub struct LogInterceptor {
    point: String,
}

impl LogInterceptor {
    pub fn new(point: impl Into<String>) -> Self {
        Self {
            point: point.into(),
        }
    }
}

impl Interceptor for LogInterceptor {
    fn name(&self) -> &str {
        "log"
    }

    fn before(&self, call: &MethodInfo<'_>, ctx: &mut InvocationContext, chain: &mut ChainCursor<'_>) {
        debug!(
            point = %self.point,
            type_name = call.type_name(),
            method = call.method(),
            args = call.args().len(),
            "call started"
        );
        chain.do_before(call, ctx);
    }

    fn after(&self, call: &MethodInfo<'_>, ctx: &mut InvocationContext, chain: &mut ChainCursor<'_>) {
        let elapsed_ms = ctx.elapsed().as_secs_f64() * 1000.0;
        match call.error() {
            Some(err) => info!(
                point = %self.point,
                type_name = call.type_name(),
                method = call.method(),
                elapsed_ms,
                error = %err,
                "call failed"
            ),
            None => info!(
                point = %self.point,
                type_name = call.type_name(),
                method = call.method(),
                elapsed_ms,
                "call completed"
            ),
        }
        chain.do_after(call, ctx);
    }
}
