//! Router session context and the JSON envelope every RPC answers with.

use serde::Deserialize;
use serde_json::Value;
use std::fmt;

/// An authenticated router context.
///
/// Holds the context token and the cookies the router set at login; both
/// are replayed on every call made with the session. Not `Clone`:
/// [`RouterApi::invalidate_session`](super::RouterApi::invalidate_session)
/// consumes it, so a released session cannot be used again.
pub struct RouterSession {
    token: String,
    cookies: Vec<String>,
}

impl RouterSession {
    /// `cookies` are `name=value` pairs, attributes already stripped.
    pub fn new(token: impl Into<String>, cookies: Vec<String>) -> Self {
        Self {
            token: token.into(),
            cookies,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn cookies(&self) -> &[String] {
        &self.cookies
    }

    /// Value for a `Cookie` request header, if the router set any.
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            None
        } else {
            Some(self.cookies.join("; "))
        }
    }
}

impl fmt::Debug for RouterSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouterSession")
            .field("token", &"<redacted>")
            .field("cookies", &self.cookies.len())
            .finish()
    }
}

/// Router response envelope: `{"status": ..., "data": ...}`.
///
/// `status` is overloaded by the router: an integer code for context
/// calls, the result object for listings, a boolean or id for writes.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RpcResult {
    #[serde(default)]
    pub status: Value,
    #[serde(default)]
    pub data: Value,
}

impl RpcResult {
    /// Whether `status` is truthy (not null, false, zero, or empty).
    pub fn succeeded(&self) -> bool {
        is_truthy(&self.status)
    }
}

pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}
