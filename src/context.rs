use std::fmt;

use serde::Serialize;
use url::Url;

/// Canonical correlation key for a page: the hostname, nothing else.
/// Path and query changes on the same host resolve to the same context,
/// which is what keeps split assignments stable across in-page routing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Context(String);

impl Context {
    /// Resolve the current location into a context. Returns `None` for
    /// anything that does not parse as an absolute URL with a host
    /// (about:blank, file paths, garbage input).
    pub fn resolve(location: &str) -> Option<Self> {
        let parsed = Url::parse(location).ok()?;
        let host = parsed.host_str()?;
        Some(Self(host.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
