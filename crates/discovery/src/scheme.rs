//! Target naming: `svc:///<service-name>`.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{DiscoveryError, Result};

/// URI scheme served by [`ResolverBuilder`](crate::ResolverBuilder).
pub const SCHEME_NAME: &str = "svc";

/// Target URI for `service`.
///
/// When `overrides` has an entry for the service it is returned verbatim,
/// which lets a deployment pin a service to a literal address without going
/// through discovery.
pub fn target_uri(service: &str, overrides: Option<&HashMap<String, String>>) -> String {
    if let Some(target) = overrides.and_then(|o| o.get(service)) {
        return target.clone();
    }
    format!("{SCHEME_NAME}:///{service}")
}

/// Parsed `scheme://authority/endpoint` target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub scheme: String,
    pub authority: String,
    /// Path with leading slashes removed; the service name for `svc` targets.
    pub endpoint: String,
}

impl Target {
    pub fn parse(uri: &str) -> Result<Self> {
        let invalid = |reason: &str| DiscoveryError::InvalidTarget {
            target: uri.to_string(),
            reason: reason.to_string(),
        };

        let (scheme, rest) = uri.split_once("://").ok_or_else(|| invalid("missing scheme"))?;
        if scheme.is_empty() {
            return Err(invalid("empty scheme"));
        }

        let (authority, path) = match rest.find('/') {
            Some(i) => (&rest[..i], &rest[i..]),
            None => (rest, ""),
        };

        let endpoint = path.trim_start_matches('/');
        if endpoint.is_empty() {
            return Err(invalid("missing service name"));
        }

        Ok(Self {
            scheme: scheme.to_string(),
            authority: authority.to_string(),
            endpoint: endpoint.to_string(),
        })
    }

    /// Target for `service` under [`SCHEME_NAME`].
    pub fn for_service(service: impl Into<String>) -> Self {
        Self {
            scheme: SCHEME_NAME.to_string(),
            authority: String::new(),
            endpoint: service.into(),
        }
    }

    pub fn service(&self) -> &str {
        &self.endpoint
    }
}

impl FromStr for Target {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", self.scheme, self.authority, self.endpoint)
    }
}
