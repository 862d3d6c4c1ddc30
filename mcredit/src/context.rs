//! Per-call authentication context.
//!
//! [`AuthHeaders`] is a case-insensitive view over the request headers a
//! caller supplied, and [`InvocationContext`] is the immutable record built
//! from them once per inbound call.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::ContextError;

/// The header carrying the caller's bearer token.
pub const AUTHORIZATION_HEADER: &str = "authorization";

const BEARER_PREFIX: &str = "bearer ";

/// Request headers with case-insensitive names.
///
/// Names are normalized to lowercase on insertion. Values are kept verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthHeaders {
    entries: BTreeMap<String, String>,
}

impl AuthHeaders {
    /// Creates an empty header set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a header set from `(name, value)` pairs. Later duplicates win.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut headers = Self::new();
        for (name, value) in pairs {
            headers.insert(name.as_ref(), value);
        }
        headers
    }

    /// Shorthand for a header set holding only `Authorization: Bearer <token>`.
    #[must_use]
    pub fn bearer(token: &str) -> Self {
        Self::from_pairs([(AUTHORIZATION_HEADER, format!("Bearer {token}"))])
    }

    /// Inserts a header, replacing any previous value under the same name.
    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.entries.insert(name.to_ascii_lowercase(), value.into());
    }

    /// Looks a header up by name, ignoring case.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Returns the number of headers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no header is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over `(lowercase name, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Extracts the bearer token from the `Authorization` header.
    ///
    /// A leading `Bearer ` prefix is stripped (case-insensitive); a header
    /// without the prefix is taken as the raw token.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::NoAuthorizationHeader`] when the header is
    /// absent, carries an empty token or only the bare `Bearer` scheme.
    pub fn bearer_token(&self) -> Result<String, ContextError> {
        let raw = self
            .get(AUTHORIZATION_HEADER)
            .ok_or(ContextError::NoAuthorizationHeader)?
            .trim_start();
        if raw.trim_end().eq_ignore_ascii_case(BEARER_PREFIX.trim_end()) {
            return Err(ContextError::NoAuthorizationHeader);
        }
        let token = match raw.get(..BEARER_PREFIX.len()) {
            Some(prefix) if prefix.eq_ignore_ascii_case(BEARER_PREFIX) => {
                raw[BEARER_PREFIX.len()..].trim()
            }
            _ => raw.trim_end(),
        };
        if token.is_empty() {
            return Err(ContextError::NoAuthorizationHeader);
        }
        Ok(token.to_owned())
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for AuthHeaders {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self::from_pairs(iter)
    }
}

/// Opaque back-reference to a context object resolved by the hosting framework.
///
/// Handlers that know the concrete type can recover it with
/// [`ContextHandle::downcast_ref`].
#[derive(Clone)]
pub struct ContextHandle(Arc<dyn Any + Send + Sync>);

impl ContextHandle {
    /// Wraps a framework value.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    /// Returns the wrapped value if it is a `T`.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

impl fmt::Debug for ContextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ContextHandle(<framework context>)")
    }
}

/// Immutable authentication and request metadata for one invocation.
///
/// Created once per inbound call and owned by that call; never shared
/// between calls.
#[derive(Clone)]
pub struct InvocationContext {
    token: String,
    headers: AuthHeaders,
    handle: Option<ContextHandle>,
}

impl fmt::Debug for InvocationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationContext")
            .field("token", &"<redacted>")
            .field("headers", &self.headers.len())
            .field("handle", &self.handle.is_some())
            .finish()
    }
}

impl InvocationContext {
    /// Builds a context from request headers.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::NoAuthorizationHeader`] if no bearer token can
    /// be extracted.
    pub fn from_headers(headers: AuthHeaders) -> Result<Self, ContextError> {
        let token = headers.bearer_token()?;
        Ok(Self {
            token,
            headers,
            handle: None,
        })
    }

    /// Attaches the framework context handle this call was resolved from.
    #[must_use]
    pub fn with_handle(mut self, handle: ContextHandle) -> Self {
        self.handle = Some(handle);
        self
    }

    /// The caller's bearer token, without the `Bearer ` prefix.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// The headers the context was built from.
    #[must_use]
    pub const fn headers(&self) -> &AuthHeaders {
        &self.headers
    }

    /// The framework handle, if one was attached.
    #[must_use]
    pub const fn handle(&self) -> Option<&ContextHandle> {
        self.handle.as_ref()
    }
}
