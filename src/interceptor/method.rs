//! Description of one intercepted call.

use std::any::Any;
use std::borrow::Cow;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

/// What the real call produced, as seen by interceptors.
///
/// The outcome borrows the real call's result; interceptors can inspect it
/// but never take or replace it.
#[derive(Clone, Copy)]
pub enum CallOutcome<'a> {
    /// The real call has not run yet
    Pending,
    /// The real call returned a value
    Returned(&'a dyn Any),
    /// The real call failed
    Failed(&'a (dyn StdError + 'static)),
}

impl fmt::Debug for CallOutcome<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallOutcome::Pending => f.write_str("Pending"),
            CallOutcome::Returned(_) => f.write_str("Returned(..)"),
            CallOutcome::Failed(err) => f.debug_tuple("Failed").field(&err.to_string()).finish(),
        }
    }
}

/// Receiver, method identity, arguments and outcome of an intercepted call.
pub struct MethodInfo<'a> {
    invoker: Option<Arc<dyn Any + Send + Sync>>,
    type_name: Cow<'static, str>,
    method: Cow<'static, str>,
    args: Vec<String>,
    outcome: CallOutcome<'a>,
}

impl fmt::Debug for MethodInfo<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodInfo")
            .field("type_name", &self.type_name)
            .field("method", &self.method)
            .field("args", &self.args)
            .field("outcome", &self.outcome)
            .finish_non_exhaustive()
    }
}

impl MethodInfo<'static> {
    pub fn new(type_name: impl Into<Cow<'static, str>>, method: impl Into<Cow<'static, str>>) -> Self {
        Self {
            invoker: None,
            type_name: type_name.into(),
            method: method.into(),
            args: Vec::new(),
            outcome: CallOutcome::Pending,
        }
    }

    /// Attach the receiver the method was invoked on
    pub fn with_invoker(mut self, invoker: Arc<dyn Any + Send + Sync>) -> Self {
        self.invoker = Some(invoker);
        self
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl<'a> MethodInfo<'a> {
    /// Attach the real call's result, producing the view `after` hooks see
    pub fn complete<'r, T, E>(self, result: &'r Result<T, E>) -> MethodInfo<'r>
    where
        T: Any,
        E: StdError + 'static,
    {
        let outcome = match result {
            Ok(value) => CallOutcome::Returned(value),
            Err(err) => CallOutcome::Failed(err),
        };
        MethodInfo {
            invoker: self.invoker,
            type_name: self.type_name,
            method: self.method,
            args: self.args,
            outcome,
        }
    }

    /// Attach an outcome reported by a weaving layer that owns the result
    pub fn with_outcome<'r>(self, outcome: CallOutcome<'r>) -> MethodInfo<'r> {
        MethodInfo {
            invoker: self.invoker,
            type_name: self.type_name,
            method: self.method,
            args: self.args,
            outcome,
        }
    }

    pub fn invoker(&self) -> Option<&Arc<dyn Any + Send + Sync>> {
        self.invoker.as_ref()
    }

    /// Downcast the receiver
    pub fn invoker_as<T: Any>(&self) -> Option<&T> {
        self.invoker.as_deref().and_then(|i| i.downcast_ref::<T>())
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }

    pub fn outcome(&self) -> CallOutcome<'a> {
        self.outcome
    }

    /// Downcast the returned value
    pub fn return_value<T: Any>(&self) -> Option<&'a T> {
        match self.outcome {
            CallOutcome::Returned(value) => value.downcast_ref::<T>(),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&'a (dyn StdError + 'static)> {
        match self.outcome {
            CallOutcome::Failed(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, CallOutcome::Failed(_))
    }

    pub fn is_completed(&self) -> bool {
        !matches!(self.outcome, CallOutcome::Pending)
    }
}
