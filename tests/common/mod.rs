//! Common test utilities and fixtures.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use weft_lib::core::{Config, ConfigBuilder};
use weft_lib::interceptor::{ChainCursor, Interceptor, InvocationContext, MethodInfo};

/// Shared log of hook firings, e.g. `before:A`, `after:B`.
pub type HookLog = Arc<Mutex<Vec<String>>>;

/// Interceptor that records each hook it runs.
pub struct RecordingInterceptor {
    name: String,
    log: HookLog,
    forward_after: bool,
}

impl RecordingInterceptor {
    pub fn new(name: &str, log: &HookLog) -> Self {
        Self {
            name: name.to_string(),
            log: Arc::clone(log),
            forward_after: true,
        }
    }

    /// Return from `after` without continuing the chain
    pub fn stop_after(mut self) -> Self {
        self.forward_after = false;
        self
    }
}

impl Interceptor for RecordingInterceptor {
    fn name(&self) -> &str {
        &self.name
    }

    fn before(&self, call: &MethodInfo<'_>, ctx: &mut InvocationContext, chain: &mut ChainCursor<'_>) {
        self.log.lock().push(format!("before:{}", self.name));
        chain.do_before(call, ctx);
    }

    fn after(&self, call: &MethodInfo<'_>, ctx: &mut InvocationContext, chain: &mut ChainCursor<'_>) {
        let outcome = if call.is_failed() { "err" } else { "ok" };
        self.log.lock().push(format!("after:{}:{}", self.name, outcome));
        if self.forward_after {
            chain.do_after(call, ctx);
        }
    }
}

/// Error returned by fake real calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeError(pub &'static str);

impl fmt::Display for FakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl std::error::Error for FakeError {}

pub fn new_log() -> HookLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Configuration with a short report interval for every point
pub fn fast_config(interval: Duration) -> Config {
    ConfigBuilder::new()
        .service_name("orders")
        .system("shop")
        .report_interval(interval)
        .build()
        .unwrap()
}

/// Statement call carrying its SQL as the first argument
pub fn statement(sql: &str) -> MethodInfo<'static> {
    MethodInfo::new("Statement", "execute").with_arg(sql)
}
