//! Cost specifications and their resolution.
//!
//! A handler's price is one of three shapes:
//!
//! - [`CostSpec::Constant`] - the same amount for every call
//! - [`CostSpec::PreCall`] - computed from the call's arguments before the handler runs
//! - [`CostSpec::PostCall`] - computed once the handler has produced its result
//!   (for streaming handlers, after the last chunk)
//!
//! Cost functions must be pure with respect to their inputs: they receive
//! everything they may use through the context structs and must not keep
//! per-call state between invocations.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::Arguments;
use crate::context::InvocationContext;
use crate::error::CostError;

/// Inputs available to a cost function before the handler runs.
#[derive(Debug, Clone, Copy)]
pub struct PreCallContext<'a> {
    /// The call's arguments (template variables for resources).
    pub arguments: &'a Arguments,
    /// The caller's authentication context.
    pub context: &'a InvocationContext,
}

impl<'a> PreCallContext<'a> {
    /// Returns a string argument by name.
    #[must_use]
    pub fn argument_str(&self, name: &str) -> Option<&'a str> {
        argument_str(self.arguments, name)
    }
}

/// Inputs available to a cost function after the handler completed.
#[derive(Debug, Clone, Copy)]
pub struct PostCallContext<'a> {
    /// The call's arguments (template variables for resources).
    pub arguments: &'a Arguments,
    /// The handler result as JSON. For streams, an array of every chunk.
    pub result: &'a Value,
    /// Number of chunks produced, for streaming handlers.
    pub chunks: Option<usize>,
    /// The caller's authentication context.
    pub context: &'a InvocationContext,
}

impl<'a> PostCallContext<'a> {
    /// Returns a string argument by name.
    #[must_use]
    pub fn argument_str(&self, name: &str) -> Option<&'a str> {
        argument_str(self.arguments, name)
    }

    /// Views the call as a pre-call context.
    #[must_use]
    pub const fn as_pre_call(&self) -> PreCallContext<'a> {
        PreCallContext {
            arguments: self.arguments,
            context: self.context,
        }
    }
}

/// Reads a string argument, unwrapping single-element arrays (template
/// variables may arrive as `["Madrid"]`).
fn argument_str<'a>(arguments: &'a Arguments, name: &str) -> Option<&'a str> {
    match arguments.get(name)? {
        Value::String(s) => Some(s),
        Value::Array(items) => items.first()?.as_str(),
        _ => None,
    }
}

/// Boxed pre-call cost function.
pub type PreCallFn = dyn Fn(&PreCallContext<'_>) -> Result<u64, CostError> + Send + Sync;

/// Boxed post-call cost function.
pub type PostCallFn = dyn Fn(&PostCallContext<'_>) -> Result<u64, CostError> + Send + Sync;

/// How many credits an invocation costs.
#[derive(Clone)]
pub enum CostSpec {
    /// A fixed amount.
    Constant(u64),
    /// A function of the call's arguments and auth context.
    PreCall(Arc<PreCallFn>),
    /// A function of the arguments, the handler's result and the auth context.
    PostCall(Arc<PostCallFn>),
}

impl fmt::Debug for CostSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant(credits) => f.debug_tuple("Constant").field(credits).finish(),
            Self::PreCall(_) => f.write_str("PreCall(<fn>)"),
            Self::PostCall(_) => f.write_str("PostCall(<fn>)"),
        }
    }
}

impl Default for CostSpec {
    fn default() -> Self {
        Self::Constant(0)
    }
}

impl From<u64> for CostSpec {
    fn from(credits: u64) -> Self {
        Self::Constant(credits)
    }
}

impl CostSpec {
    /// Wraps a pre-call cost function.
    pub fn pre_call<F>(f: F) -> Self
    where
        F: Fn(&PreCallContext<'_>) -> Result<u64, CostError> + Send + Sync + 'static,
    {
        Self::PreCall(Arc::new(f))
    }

    /// Wraps a post-call cost function.
    pub fn post_call<F>(f: F) -> Self
    where
        F: Fn(&PostCallContext<'_>) -> Result<u64, CostError> + Send + Sync + 'static,
    {
        Self::PostCall(Arc::new(f))
    }

    /// Returns `true` if the cost can be known before the handler runs.
    #[must_use]
    pub const fn is_known_before_execution(&self) -> bool {
        !matches!(self, Self::PostCall(_))
    }
}

/// Dispatches a [`CostSpec`] to a credit amount.
#[derive(Debug, Clone, Copy, Default)]
pub struct CostResolver;

impl CostResolver {
    /// Resolves the cost of a call.
    ///
    /// `post` must be provided for [`CostSpec::PostCall`]; it is ignored for
    /// the other variants.
    ///
    /// # Errors
    ///
    /// Returns [`CostError`] if the cost function fails or a post-call cost
    /// is requested without a result.
    pub fn resolve(
        spec: &CostSpec,
        pre: &PreCallContext<'_>,
        post: Option<&PostCallContext<'_>>,
    ) -> Result<u64, CostError> {
        match spec {
            CostSpec::Constant(credits) => Ok(*credits),
            CostSpec::PreCall(f) => f(pre),
            CostSpec::PostCall(f) => {
                let post = post.ok_or_else(|| {
                    CostError::function("post-call cost requested before the handler completed")
                })?;
                f(post)
            }
        }
    }

    /// Resolves the cost ahead of execution, or `None` for post-call specs.
    #[must_use]
    pub fn resolve_before_execution(
        spec: &CostSpec,
        pre: &PreCallContext<'_>,
    ) -> Option<Result<u64, CostError>> {
        spec.is_known_before_execution()
            .then(|| Self::resolve(spec, pre, None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::AuthHeaders;
    use serde_json::json;

    fn ctx() -> InvocationContext {
        InvocationContext::from_headers(AuthHeaders::bearer("t")).unwrap()
    }

    fn args(value: Value) -> Arguments {
        value.as_object().cloned().unwrap()
    }

    fn city_length_cost() -> CostSpec {
        CostSpec::pre_call(|pre| {
            let city = pre.argument_str("city").unwrap_or_default();
            Ok(if city.chars().count() <= 5 { 1 } else { 2 })
        })
    }

    #[test]
    fn constant_cost() {
        let ctx = ctx();
        let arguments = Arguments::new();
        let pre = PreCallContext {
            arguments: &arguments,
            context: &ctx,
        };
        assert_eq!(CostResolver::resolve(&CostSpec::Constant(3), &pre, None), Ok(3));
    }

    #[test]
    fn city_length_pricing() {
        let ctx = ctx();
        let spec = city_length_cost();

        let paris = args(json!({"city": "Paris"}));
        let pre = PreCallContext {
            arguments: &paris,
            context: &ctx,
        };
        assert_eq!(CostResolver::resolve(&spec, &pre, None), Ok(1));

        let valencia = args(json!({"city": ["Valencia"]}));
        let pre = PreCallContext {
            arguments: &valencia,
            context: &ctx,
        };
        assert_eq!(CostResolver::resolve(&spec, &pre, None), Ok(2));
    }

    #[test]
    fn post_call_needs_result() {
        let ctx = ctx();
        let arguments = Arguments::new();
        let pre = PreCallContext {
            arguments: &arguments,
            context: &ctx,
        };
        let spec = CostSpec::post_call(|post| Ok(post.chunks.unwrap_or(0) as u64));
        assert!(CostResolver::resolve(&spec, &pre, None).is_err());
        assert!(CostResolver::resolve_before_execution(&spec, &pre).is_none());

        let result = json!(["a", "b", "c"]);
        let post = PostCallContext {
            arguments: &arguments,
            result: &result,
            chunks: Some(3),
            context: &ctx,
        };
        assert_eq!(CostResolver::resolve(&spec, &pre, Some(&post)), Ok(3));
    }

    #[test]
    fn failing_cost_function_surfaces_error() {
        let ctx = ctx();
        let arguments = Arguments::new();
        let pre = PreCallContext {
            arguments: &arguments,
            context: &ctx,
        };
        let spec = CostSpec::pre_call(|_| Err(CostError::function("boom")));
        assert_eq!(
            CostResolver::resolve(&spec, &pre, None),
            Err(CostError::Function("boom".into()))
        );
    }
}
