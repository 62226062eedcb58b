//! Trace spans around intercepted calls.

use crate::interceptor::{ChainCursor, Interceptor, InvocationContext, MethodInfo};
use tracing::span::EnteredSpan;
use tracing::{field, info_span};

/// Context key holding the span entered by [`SpanInterceptor`].
///
/// Entered spans are bound to the current thread; the context is never sent
/// across threads, so the span is exited on the thread that entered it.
pub struct CallSpan(pub EnteredSpan);

/// Opens one `tracing` span per call.
///
/// `before` enters the span so spans opened by nested calls become its
/// children; `after` records the outcome and closes it.
#[derive(Debug, Clone)]
pub struct SpanInterceptor {
    point: String,
}

impl SpanInterceptor {
    pub fn new(point: impl Into<String>) -> Self {
        Self {
            point: point.into(),
        }
    }
}

impl Interceptor for SpanInterceptor {
    fn name(&self) -> &str {
        "span"
    }

    fn before(&self, call: &MethodInfo<'_>, ctx: &mut InvocationContext, chain: &mut ChainCursor<'_>) {
        let span = info_span!(
            "intercepted_call",
            point = %self.point,
            type_name = call.type_name(),
            method = call.method(),
            resource = call.arg(0).unwrap_or(""),
            elapsed_ms = field::Empty,
            error = field::Empty,
        );
        ctx.insert(CallSpan(span.entered()));
        chain.do_before(call, ctx);
    }

    fn after(&self, call: &MethodInfo<'_>, ctx: &mut InvocationContext, chain: &mut ChainCursor<'_>) {
        if let Some(CallSpan(span)) = ctx.remove::<CallSpan>() {
            span.record("elapsed_ms", ctx.elapsed().as_secs_f64() * 1000.0);
            if let Some(err) = call.error() {
                span.record("error", field::display(err));
            }
            span.exit();
        }
        chain.do_after(call, ctx);
    }
}
