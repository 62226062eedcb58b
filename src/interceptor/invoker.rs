//! Entry point used by the weaving layer.

use crate::interceptor::{InterceptorChain, InvocationContext, MethodInfo};
use dashmap::DashMap;
use std::any::Any;
use std::cell::RefCell;
use std::error::Error as StdError;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, trace};

thread_local! {
    /// Extension points with an instrumented call in progress on this thread
    static ACTIVE_KEYS: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

/// Holds one extension point's slot in the thread's active set.
struct ReentrancyGuard {
    key: String,
    _not_send: PhantomData<*const ()>,
}

impl ReentrancyGuard {
    fn acquire(key: &str) -> Option<Self> {
        ACTIVE_KEYS.with(|active| {
            let mut active = active.borrow_mut();
            if active.iter().any(|k| k == key) {
                return None;
            }
            active.push(key.to_owned());
            Some(Self {
                key: key.to_owned(),
                _not_send: PhantomData,
            })
        })
    }
}

impl Drop for ReentrancyGuard {
    fn drop(&mut self) {
        // try_with: the thread-local may already be gone during thread exit
        let _ = ACTIVE_KEYS.try_with(|active| {
            let mut active = active.borrow_mut();
            if let Some(pos) = active.iter().rposition(|k| *k == self.key) {
                active.remove(pos);
            }
        });
    }
}

/// An instrumented call between [`ChainInvoker::enter`] and
/// [`ChainInvoker::exit`].
///
/// Bound to the thread that entered it. Dropping it without calling `exit`
/// skips the `after` phase and releases the reentrancy slot.
pub struct ActiveInvocation {
    chain: Arc<InterceptorChain>,
    guard: ReentrancyGuard,
}

impl ActiveInvocation {
    pub fn key(&self) -> &str {
        &self.guard.key
    }

    pub fn chain(&self) -> &Arc<InterceptorChain> {
        &self.chain
    }
}

/// Runs the chain registered for an extension point around real calls.
///
/// A call made from inside an instrumented call for the same key on the same
/// thread bypasses the chain. Different keys nest freely.
#[derive(Default)]
pub struct ChainInvoker {
    chains: DashMap<String, Arc<InterceptorChain>>,
}

impl ChainInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the chain for `key`, returning the one it replaced
    pub fn register(
        &self,
        key: impl Into<String>,
        chain: impl Into<Arc<InterceptorChain>>,
    ) -> Option<Arc<InterceptorChain>> {
        let key = key.into();
        let chain = chain.into();
        debug!(key = %key, interceptors = ?chain.names(), "registering interceptor chain");
        let previous = self.chains.insert(key.clone(), chain);
        if previous.is_some() {
            debug!(key = %key, "replaced existing interceptor chain");
        }
        previous
    }

    pub fn unregister(&self, key: &str) -> Option<Arc<InterceptorChain>> {
        self.chains.remove(key).map(|(_, chain)| chain)
    }

    pub fn chain(&self, key: &str) -> Option<Arc<InterceptorChain>> {
        self.chains.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Registered keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.chains.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    /// Whether an instrumented call for `key` is in progress on this thread
    pub fn is_active(key: &str) -> bool {
        ACTIVE_KEYS.with(|active| active.borrow().iter().any(|k| k == key))
    }

    /// Run `real` wrapped in the chain for `key`.
    ///
    /// The real call's result is returned exactly as produced; `after` hooks
    /// only see a borrowed view of it. Unknown keys and reentrant calls run
    /// `real` uninstrumented.
    pub fn invoke<T, E, F>(
        &self,
        key: &str,
        call: MethodInfo<'static>,
        ctx: &mut InvocationContext,
        real: F,
    ) -> Result<T, E>
    where
        T: Any,
        E: StdError + 'static,
        F: FnOnce() -> Result<T, E>,
    {
        let Some(active) = self.enter(key, &call, ctx) else {
            return real();
        };

        let result = real();
        {
            let completed = call.complete(&result);
            self.exit(active, &completed, ctx);
        }
        result
    }

    /// Method-enter hook: stamp the start time and run the `before` phase.
    ///
    /// Returns `None` when the call must run uninstrumented.
    pub fn enter(
        &self,
        key: &str,
        call: &MethodInfo<'_>,
        ctx: &mut InvocationContext,
    ) -> Option<ActiveInvocation> {
        let Some(chain) = self.chain(key) else {
            trace!(key, method = call.method(), "no interceptor chain registered");
            return None;
        };
        let Some(guard) = ReentrancyGuard::acquire(key) else {
            trace!(key, method = call.method(), "reentrant call bypasses chain");
            return None;
        };

        ctx.mark_begin();
        chain.do_before(call, ctx);
        Some(ActiveInvocation { chain, guard })
    }

    /// Method-exit hook: stamp the end time and run the `after` phase
    pub fn exit(&self, active: ActiveInvocation, call: &MethodInfo<'_>, ctx: &mut InvocationContext) {
        ctx.mark_end();
        active.chain.do_after(call, ctx);
    }
}
