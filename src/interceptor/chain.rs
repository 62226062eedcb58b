//! Ordered interceptor chains and the cursor that walks them.

use crate::interceptor::{Interceptor, InvocationContext, MethodInfo};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Before,
    After,
}

impl Phase {
    fn as_str(self) -> &'static str {
        match self {
            Phase::Before => "before",
            Phase::After => "after",
        }
    }
}

/// Position within one phase of a chain.
///
/// Each hook receives the cursor and decides whether to continue by calling
/// [`do_before`](Self::do_before) or [`do_after`](Self::do_after). A hook
/// that returns without forwarding ends the phase for every later
/// interceptor.
pub struct ChainCursor<'c> {
    interceptors: &'c [Arc<dyn Interceptor>],
    index: usize,
    phase: Phase,
}

impl<'c> ChainCursor<'c> {
    fn new(interceptors: &'c [Arc<dyn Interceptor>], phase: Phase) -> Self {
        Self {
            interceptors,
            index: 0,
            phase,
        }
    }

    /// Run the next interceptor's `before` hook
    pub fn do_before(&mut self, call: &MethodInfo<'_>, ctx: &mut InvocationContext) {
        debug_assert_eq!(self.phase, Phase::Before, "do_before called during the after phase");
        self.advance(call, ctx);
    }

    /// Run the next interceptor's `after` hook
    pub fn do_after(&mut self, call: &MethodInfo<'_>, ctx: &mut InvocationContext) {
        debug_assert_eq!(self.phase, Phase::After, "do_after called during the before phase");
        self.advance(call, ctx);
    }

    /// Interceptors not yet reached in this phase
    pub fn remaining(&self) -> usize {
        self.interceptors.len().saturating_sub(self.index)
    }

    fn advance(&mut self, call: &MethodInfo<'_>, ctx: &mut InvocationContext) {
        let interceptors = self.interceptors;
        let Some(next) = interceptors.get(self.index) else {
            return;
        };
        self.index += 1;

        let phase = self.phase;
        let result = panic::catch_unwind(AssertUnwindSafe(|| match phase {
            Phase::Before => next.before(call, ctx, self),
            Phase::After => next.after(call, ctx, self),
        }));

        if result.is_err() {
            warn!(
                interceptor = next.name(),
                phase = phase.as_str(),
                method = call.method(),
                "interceptor panicked; skipping the rest of the phase"
            );
            self.index = interceptors.len();
        }
    }
}

/// Immutable, shareable sequence of interceptors for one extension point.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.interceptors.iter().map(|i| i.name()))
            .finish()
    }
}

impl InterceptorChain {
    pub fn builder() -> ChainBuilder {
        ChainBuilder::new()
    }

    /// Run every `before` hook in order
    pub fn do_before(&self, call: &MethodInfo<'_>, ctx: &mut InvocationContext) {
        ChainCursor::new(&self.interceptors, Phase::Before).do_before(call, ctx);
    }

    /// Run every `after` hook in order
    pub fn do_after(&self, call: &MethodInfo<'_>, ctx: &mut InvocationContext) {
        ChainCursor::new(&self.interceptors, Phase::After).do_after(call, ctx);
    }

    pub fn names(&self) -> Vec<&str> {
        self.interceptors.iter().map(|i| i.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }
}

/// Collects interceptors in insertion order.
///
/// Cloning a builder shares the interceptor instances, so one interceptor
/// can sit in several chains.
#[derive(Clone, Default)]
pub struct ChainBuilder {
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl ChainBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an interceptor
    pub fn add<I: Interceptor + 'static>(self, interceptor: I) -> Self {
        self.add_shared(Arc::new(interceptor))
    }

    /// Append an interceptor that is also used elsewhere
    pub fn add_shared(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    pub fn build(self) -> InterceptorChain {
        InterceptorChain {
            interceptors: self.interceptors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    type Log = Arc<Mutex<Vec<String>>>;

    struct Recorder {
        name: &'static str,
        log: Log,
        forward_after: bool,
    }

    impl Interceptor for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        fn before(&self, call: &MethodInfo<'_>, ctx: &mut InvocationContext, chain: &mut ChainCursor<'_>) {
            self.log.lock().push(format!("before:{}", self.name));
            chain.do_before(call, ctx);
        }

        fn after(&self, call: &MethodInfo<'_>, ctx: &mut InvocationContext, chain: &mut ChainCursor<'_>) {
            self.log.lock().push(format!("after:{}", self.name));
            if self.forward_after {
                chain.do_after(call, ctx);
            }
        }
    }

    struct Panicking;

    impl Interceptor for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }

        fn after(&self, _: &MethodInfo<'_>, _: &mut InvocationContext, _: &mut ChainCursor<'_>) {
            panic!("bookkeeping bug");
        }
    }

    fn recorder(name: &'static str, log: &Log, forward_after: bool) -> Recorder {
        Recorder {
            name,
            log: Arc::clone(log),
            forward_after,
        }
    }

    fn run(chain: &InterceptorChain) {
        let call = MethodInfo::new("Statement", "execute");
        let mut ctx = InvocationContext::new();
        chain.do_before(&call, &mut ctx);
        chain.do_after(&call, &mut ctx);
    }

    #[test]
    fn test_hooks_fire_in_insertion_order() {
        let log: Log = Arc::default();
        let chain = InterceptorChain::builder()
            .add(recorder("A", &log, true))
            .add(recorder("B", &log, true))
            .add(recorder("C", &log, true))
            .build();

        run(&chain);

        assert_eq!(
            *log.lock(),
            vec!["before:A", "before:B", "before:C", "after:A", "after:B", "after:C"]
        );
    }

    #[test]
    fn test_missing_forward_short_circuits_after() {
        let log: Log = Arc::default();
        let chain = InterceptorChain::builder()
            .add(recorder("A", &log, true))
            .add(recorder("B", &log, false))
            .add(recorder("C", &log, true))
            .build();

        run(&chain);

        assert_eq!(
            *log.lock(),
            vec!["before:A", "before:B", "before:C", "after:A", "after:B"]
        );
    }

    #[test]
    fn test_panicking_hook_is_contained() {
        let log: Log = Arc::default();
        let chain = InterceptorChain::builder()
            .add(recorder("A", &log, true))
            .add(Panicking)
            .add(recorder("C", &log, true))
            .build();

        run(&chain);

        assert_eq!(*log.lock(), vec!["before:A", "before:C", "after:A"]);
    }

    #[test]
    fn test_builder_shares_instances() {
        let log: Log = Arc::default();
        let shared: Arc<dyn Interceptor> = Arc::new(recorder("shared", &log, true));
        let base = ChainBuilder::new().add_shared(Arc::clone(&shared));

        let first = base.clone().add(recorder("first", &log, true)).build();
        let second = base.build();

        assert_eq!(first.names(), vec!["shared", "first"]);
        assert_eq!(second.names(), vec!["shared"]);
        assert_eq!(Arc::strong_count(&shared), 3);
    }
}
