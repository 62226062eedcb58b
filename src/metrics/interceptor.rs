//! Interceptor that feeds completed calls into signature-keyed metrics.

use crate::interceptor::{ChainCursor, ExecutionInfo, Interceptor, InvocationContext, MethodInfo};
use crate::metrics::family::SignatureMetrics;
use crate::metrics::signature::SignatureDeriver;
use std::fmt;
use std::sync::Arc;
use tracing::{trace, warn};

/// Pulls the raw key text for one call.
pub type KeyExtractor =
    Arc<dyn Fn(&MethodInfo<'_>, &InvocationContext) -> Option<String> + Send + Sync>;

/// Wrap a closure as a [`KeyExtractor`]
pub fn extractor<F>(f: F) -> KeyExtractor
where
    F: Fn(&MethodInfo<'_>, &InvocationContext) -> Option<String> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Stock extractors for the instrumented call sites.
pub mod extract {
    use super::*;

    /// Statement SQL: [`ExecutionInfo`] when present, otherwise the first argument
    pub fn sql_text() -> KeyExtractor {
        extractor(|call, ctx| {
            ctx.get::<ExecutionInfo>()
                .map(|info| info.sql.clone())
                .or_else(|| call.arg(0).map(str::to_owned))
        })
    }

    /// The argument at `index`
    pub fn arg(index: usize) -> KeyExtractor {
        extractor(move |call, _| call.arg(index).map(str::to_owned))
    }

    /// Connection URL passed as the first argument
    pub fn connection_url() -> KeyExtractor {
        arg(0)
    }

    /// Request path of the first argument, without query string or fragment
    pub fn http_route() -> KeyExtractor {
        extractor(|call, _| {
            call.arg(0).map(|url| {
                let end = url.find(|c: char| c == '?' || c == '#').unwrap_or(url.len());
                url[..end].to_owned()
            })
        })
    }

    /// Upper-cased command name from the first argument
    pub fn redis_command() -> KeyExtractor {
        extractor(|call, _| {
            call.arg(0)
                .and_then(|cmd| cmd.split_whitespace().next())
                .map(str::to_ascii_uppercase)
        })
    }

    /// Topic name from the first argument
    pub fn kafka_topic() -> KeyExtractor {
        extractor(|call, _| call.arg(0).filter(|t| !t.is_empty()).map(str::to_owned))
    }
}

/// Records count, errors and duration per derived signature.
///
/// Runs in the `after` phase and always forwards, whether or not
/// bookkeeping succeeded.
pub struct SignatureMetricInterceptor {
    name: String,
    metrics: Arc<SignatureMetrics>,
    extractor: KeyExtractor,
    deriver: Arc<dyn SignatureDeriver>,
}

impl fmt::Debug for SignatureMetricInterceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignatureMetricInterceptor")
            .field("name", &self.name)
            .field("capacity", &self.metrics.capacity())
            .finish_non_exhaustive()
    }
}

impl SignatureMetricInterceptor {
    pub fn new(
        metrics: Arc<SignatureMetrics>,
        extractor: KeyExtractor,
        deriver: Arc<dyn SignatureDeriver>,
    ) -> Self {
        Self {
            name: "metrics".to_string(),
            metrics,
            extractor,
            deriver,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn metrics(&self) -> &Arc<SignatureMetrics> {
        &self.metrics
    }

    fn observe(&self, call: &MethodInfo<'_>, ctx: &InvocationContext) {
        let Some(raw) = (self.extractor)(call, ctx) else {
            trace!(interceptor = %self.name, method = call.method(), "no metric key for call");
            return;
        };

        let signature = self.deriver.derive(&raw);
        if let Err(err) = self.metrics.record(&signature, ctx.elapsed(), call.is_failed()) {
            warn!(
                interceptor = %self.name,
                signature = %signature,
                category = err.category(),
                error = %err,
                "failed to record call metrics"
            );
        }
    }
}

impl Interceptor for SignatureMetricInterceptor {
    fn name(&self) -> &str {
        &self.name
    }

    fn after(&self, call: &MethodInfo<'_>, ctx: &mut InvocationContext, chain: &mut ChainCursor<'_>) {
        self.observe(call, ctx);
        chain.do_after(call, ctx);
    }
}
