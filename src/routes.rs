// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Route table mapping intercepted URLs to mock content.

use crate::transform::VariableSubstitution;
use anyhow::Context;
use hyper::Uri;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteKind {
    Http,
    Git,
}

/// A single mock route. `path` is a `/`-separated pattern whose segments are
/// literals or `:variable` captures.
#[derive(Debug, Clone, Deserialize)]
pub struct Route {
    pub host: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: RouteKind,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RouteConfig {
    #[serde(default)]
    pub routes: Vec<Route>,
}

/// Result of resolving a URL against a matched route: the path under the
/// mock root to serve from, plus route-local substitutions extracted from
/// `:variable` captures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRoute {
    pub mock_path: String,
    pub substitutions: Vec<VariableSubstitution>,
}

impl RouteConfig {
    /// Load the route table from a TOML file:
    ///
    /// ```toml
    /// [[routes]]
    /// host = "example.com"
    /// path = "/users/:name"
    /// type = "http"
    /// ```
    pub async fn load<P: AsRef<std::path::Path>>(path: P) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        let s = tokio::fs::read_to_string(path_ref)
            .await
            .with_context(|| format!("invalid mock routes file {}", path_ref.display()))?;
        let rc: Self = toml::from_str(&s)
            .with_context(|| format!("invalid mock routes file {}", path_ref.display()))?;
        rc.validate()?;
        Ok(rc)
    }

    fn validate(&self) -> anyhow::Result<()> {
        for (idx, route) in self.routes.iter().enumerate() {
            if route.host.is_empty() {
                anyhow::bail!("route {} has an empty host", idx);
            }
            if !route.path.starts_with('/') {
                anyhow::bail!(
                    "route {} {} path {} must start with '/'",
                    idx,
                    route.host,
                    route.path
                );
            }
            let dup = self.routes[..idx]
                .iter()
                .any(|r| r.host.eq_ignore_ascii_case(&route.host) && r.path == route.path);
            if dup {
                anyhow::bail!("duplicate route for {}{}", route.host, route.path);
            }
        }
        Ok(())
    }

    /// Find the first route matching the request URI, in file order. A URI
    /// without a host never matches.
    pub fn match_route(&self, uri: &Uri) -> Option<&Route> {
        let host = uri.host()?;
        self.routes.iter().find(|r| r.matches(host, uri.path()))
    }
}

impl Route {
    /// Whether this route matches a request host and path. Http routes match
    /// path segments one-to-one; git routes match as a prefix so the smart
    /// HTTP suffixes (`/info/refs`, `/git-upload-pack`) fall under the
    /// repository route.
    pub fn matches(&self, host: &str, path: &str) -> bool {
        if !self.host.eq_ignore_ascii_case(host) {
            return false;
        }
        let pattern = split_segments(&self.path);
        let actual = split_segments(path);
        let exact = match self.kind {
            RouteKind::Http => pattern.len() == actual.len(),
            RouteKind::Git => pattern.len() <= actual.len(),
        };
        exact
            && pattern
                .iter()
                .zip(actual.iter())
                .all(|(p, a)| segment_matches(p, a))
    }

    /// Resolve a matched URI into the mock path and route-local
    /// substitutions. Capture values are percent-decoded; a malformed escape
    /// is an error rather than silently passed through.
    pub fn resolve(&self, uri: &Uri) -> anyhow::Result<ResolvedRoute> {
        let pattern = split_segments(&self.path);
        let actual = split_segments(uri.path());
        let mut substitutions = Vec::new();
        let mut decoded_prefix = Vec::with_capacity(pattern.len());
        for (p, a) in pattern.iter().zip(actual.iter()) {
            let decoded = percent_decode(a)?;
            if let Some(var) = p.strip_prefix(':') {
                substitutions.push(VariableSubstitution::new(var, decoded.as_str())?);
            }
            decoded_prefix.push(decoded);
        }

        let mock_path = match self.kind {
            // Mock files are named after the pattern, captures kept literal:
            // example.com/users/:name.mock
            RouteKind::Http => format!("{}{}.mock", self.host, self.path),
            // The bare repository directory on disk, named after the actual
            // (decoded) matched prefix.
            RouteKind::Git => {
                let mut p = self.host.clone();
                for seg in &decoded_prefix {
                    p.push('/');
                    p.push_str(seg);
                }
                p
            }
        };

        Ok(ResolvedRoute {
            mock_path,
            substitutions,
        })
    }
}

fn split_segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn segment_matches(pattern: &str, actual: &str) -> bool {
    pattern.starts_with(':') || pattern == actual
}

/// Decode percent-escapes in a string. `+` is left as-is (path semantics);
/// form decoding handles it separately.
pub fn percent_decode(s: &str) -> anyhow::Result<String> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0usize;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if i + 2 >= bytes.len() {
                anyhow::bail!("incomplete percent-encoding in '{}'", s);
            }
            let hi = hex_value(bytes[i + 1]);
            let lo = hex_value(bytes[i + 2]);
            match (hi, lo) {
                (Some(hi), Some(lo)) => out.push(hi * 16 + lo),
                _ => anyhow::bail!("invalid percent-encoding '{}'", &s[i..i + 3]),
            }
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).context("percent-decoded value is not valid UTF-8")
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}
