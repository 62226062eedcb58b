//! Per-call scratch space shared by the interceptors of one chain.
//!
//! Values are keyed by type, so each interceptor that hands data to a later
//! one defines a newtype for it. Ownership of each key is a convention agreed
//! when a chain is assembled:
//!
//! | key | written by | read by |
//! |---|---|---|
//! | [`ExecutionInfo`] | weaving layer / statement-prepare hook | JDBC statement metrics |
//! | `span::CallSpan` | span interceptor | span interceptor |

use ahash::AHashMap;
use std::any::{Any, TypeId};
use std::fmt;
use std::time::{Duration, Instant};

/// SQL text of the statement being executed, when it is not an argument
/// of the intercepted method (prepared statements).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionInfo {
    pub sql: String,
}

impl ExecutionInfo {
    pub fn new(sql: impl Into<String>) -> Self {
        Self { sql: sql.into() }
    }
}

/// Mutable per-call store passed by reference through every interceptor.
pub struct InvocationContext {
    values: AHashMap<TypeId, Box<dyn Any>>,
    begin: Option<Instant>,
    end: Option<Instant>,
}

impl Default for InvocationContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InvocationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationContext")
            .field("values", &self.values.len())
            .field("begin", &self.begin)
            .field("end", &self.end)
            .finish()
    }
}

impl InvocationContext {
    pub fn new() -> Self {
        Self {
            values: AHashMap::new(),
            begin: None,
            end: None,
        }
    }

    /// Store a value, returning the previous value of the same type
    pub fn insert<T: Any>(&mut self, value: T) -> Option<T> {
        self.values
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    /// Builder-style insert for initial context handed in by the weaving layer
    pub fn with<T: Any>(mut self, value: T) -> Self {
        self.insert(value);
        self
    }

    pub fn get<T: Any>(&self) -> Option<&T> {
        self.values
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref::<T>())
    }

    pub fn get_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.values
            .get_mut(&TypeId::of::<T>())
            .and_then(|v| v.downcast_mut::<T>())
    }

    pub fn remove<T: Any>(&mut self) -> Option<T> {
        self.values
            .remove(&TypeId::of::<T>())
            .and_then(|v| v.downcast::<T>().ok())
            .map(|v| *v)
    }

    pub fn contains<T: Any>(&self) -> bool {
        self.values.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Stamped by the invoker just before the `before` phase
    pub fn begin(&self) -> Option<Instant> {
        self.begin
    }

    /// Stamped by the invoker just before the `after` phase
    pub fn end(&self) -> Option<Instant> {
        self.end
    }

    pub(crate) fn mark_begin(&mut self) {
        self.begin = Some(Instant::now());
        self.end = None;
    }

    pub(crate) fn mark_end(&mut self) {
        self.end = Some(Instant::now());
    }

    /// Duration of the real call, zero if it was never stamped
    pub fn elapsed(&self) -> Duration {
        match (self.begin, self.end) {
            (Some(begin), Some(end)) => end.saturating_duration_since(begin),
            (Some(begin), None) => begin.elapsed(),
            _ => Duration::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Topic(&'static str);

    #[test]
    fn test_typed_insert_and_get() {
        let mut ctx = InvocationContext::new();
        assert!(ctx.insert(Topic("orders")).is_none());
        assert_eq!(ctx.get::<Topic>(), Some(&Topic("orders")));
        assert!(ctx.get::<ExecutionInfo>().is_none());

        let previous = ctx.insert(Topic("payments"));
        assert_eq!(previous, Some(Topic("orders")));
        assert_eq!(ctx.len(), 1);
    }

    #[test]
    fn test_get_mut_and_remove() {
        let mut ctx = InvocationContext::new().with(ExecutionInfo::new("select 1"));
        if let Some(info) = ctx.get_mut::<ExecutionInfo>() {
            info.sql.push_str(" from dual");
        }

        assert_eq!(ctx.remove::<ExecutionInfo>().map(|i| i.sql), Some("select 1 from dual".to_string()));
        assert!(ctx.is_empty());
    }

    #[test]
    fn test_elapsed() {
        let mut ctx = InvocationContext::new();
        assert_eq!(ctx.elapsed(), Duration::ZERO);

        ctx.mark_begin();
        std::thread::sleep(Duration::from_millis(2));
        ctx.mark_end();

        let elapsed = ctx.elapsed();
        assert!(elapsed >= Duration::from_millis(2));
        assert_eq!(ctx.elapsed(), elapsed);
    }
}
