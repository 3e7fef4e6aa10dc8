// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Mock response engine: resolves an intercepted request to a response.

use crate::git;
use crate::routes::{ResolvedRoute, RouteConfig, RouteKind};
use crate::transform::{apply_chain, SubstitutionRegistry};
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::HeaderMap;
use hyper::{Method, Response, StatusCode, Uri};
use std::path::PathBuf;
use tracing::{debug, error, info};

/// Request header that overrides the status code of a mocked response.
pub const DESIRED_STATUS_HEADER: &str = "x-desired-response-code";

/// Resolves intercepted requests to mock responses: route matching, mock
/// file loading, transformer chains, and git smart HTTP dispatch.
pub struct MockEngine {
    mocks_root: PathBuf,
    routes: RouteConfig,
    substitutions: SubstitutionRegistry,
}

impl MockEngine {
    /// Build an engine rooted at `mocks_root`, which must exist and contain
    /// a `routes.toml`.
    pub async fn new(
        mocks_root: impl Into<PathBuf>,
        substitutions: SubstitutionRegistry,
    ) -> anyhow::Result<Self> {
        let mocks_root = mocks_root.into();
        let meta = tokio::fs::metadata(&mocks_root).await.map_err(|e| {
            anyhow::anyhow!("invalid mock file directory {}: {}", mocks_root.display(), e)
        })?;
        if !meta.is_dir() {
            anyhow::bail!("mock file root {} is not a directory", mocks_root.display());
        }

        let routes = RouteConfig::load(mocks_root.join("routes.toml")).await?;
        info!(
            root = %mocks_root.display(),
            routes = routes.routes.len(),
            "loaded mock routes"
        );

        Ok(Self {
            mocks_root,
            routes,
            substitutions,
        })
    }

    pub fn routes(&self) -> &RouteConfig {
        &self.routes
    }

    pub fn substitutions(&self) -> &SubstitutionRegistry {
        &self.substitutions
    }

    /// Produce the mock response for an intercepted request. Never panics;
    /// every failure path becomes an error response.
    pub async fn respond(
        &self,
        method: &Method,
        uri: &Uri,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Response<Full<Bytes>> {
        debug!(%method, %uri, "mock request");

        let status = match desired_status(headers) {
            Ok(status) => status,
            Err(e) => {
                error!(error = %e, "failed to parse {}", DESIRED_STATUS_HEADER);
                return text_response(
                    StatusCode::BAD_REQUEST,
                    format!("failed to parse {}: {}", DESIRED_STATUS_HEADER, e),
                );
            }
        };

        let Some(route) = self.routes.match_route(uri) else {
            error!(%uri, "failed to find a matching route");
            return text_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("found no matching route for {}", uri),
            );
        };

        let resolved = match route.resolve(uri) {
            Ok(resolved) => resolved,
            Err(e) => {
                error!(error = %e, %uri, "failed to parse mock URL for route");
                return text_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("failed to parse mock URL for route: {}", e),
                );
            }
        };
        debug!(mock_path = %resolved.mock_path, "resolved route");

        match route.kind {
            RouteKind::Http => match self.respond_http(&resolved, status).await {
                Ok(resp) => resp,
                Err(e) => {
                    error!(error = %e, "error applying transformations");
                    text_response(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        format!("error applying transformations: {}", e),
                    )
                }
            },
            RouteKind::Git => match self.respond_git(&resolved, uri, body, status).await {
                Ok(resp) => resp,
                Err(e) => {
                    error!(error = %e, "git mock failed");
                    text_response(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        format!("git mock failed: {}", e),
                    )
                }
            },
        }
    }

    async fn respond_http(
        &self,
        resolved: &ResolvedRoute,
        status: StatusCode,
    ) -> anyhow::Result<Response<Full<Bytes>>> {
        let file = self.mocks_root.join(&resolved.mock_path);
        let raw = match tokio::fs::read_to_string(&file).await {
            Ok(raw) => raw,
            Err(e) => {
                error!(file = %file.display(), error = %e, "failed opening mock file");
                return Ok(text_response(
                    StatusCode::NOT_FOUND,
                    format!("failed opening mock file: {}", e),
                ));
            }
        };

        // Globals first, then the captures from the URL.
        let body = apply_chain(raw, &self.substitutions.list())?;
        let body = apply_chain(body, &resolved.substitutions)?;

        Ok(text_response(status, body))
    }

    async fn respond_git(
        &self,
        resolved: &ResolvedRoute,
        uri: &Uri,
        body: Bytes,
        status: StatusCode,
    ) -> anyhow::Result<Response<Full<Bytes>>> {
        let repo_dir = self.mocks_root.join(&resolved.mock_path);
        let path = uri.path();

        if path.ends_with("/info/refs") && uri.query() == Some("service=git-upload-pack") {
            debug!(repo = %repo_dir.display(), "reference advertisement request");
            git::advertise_refs(&repo_dir, status).await
        } else if path.ends_with("/git-upload-pack") {
            debug!(repo = %repo_dir.display(), "git-upload-pack request");
            git::upload_pack(&repo_dir, body).await
        } else {
            error!(%uri, "unknown git request type");
            Ok(text_response(
                StatusCode::NOT_FOUND,
                format!("unknown git request type: {}", uri),
            ))
        }
    }
}

fn desired_status(headers: &HeaderMap) -> anyhow::Result<StatusCode> {
    let Some(value) = headers.get(DESIRED_STATUS_HEADER) else {
        return Ok(StatusCode::OK);
    };
    let code: u16 = value.to_str()?.trim().parse()?;
    Ok(StatusCode::from_u16(code)?)
}

/// Build a plain response; falls back to a default body if the builder is
/// handed an invalid header (it is not, for the statuses used here).
pub fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let body = body.into();
    Response::builder()
        .status(status)
        .body(Full::new(body.clone()))
        .unwrap_or_else(|e| {
            error!(error = %e, "failed to build response");
            Response::new(Full::new(body))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{make_test_engine, testdata_root};
    use crate::transform::{SubstitutionRegistry, VariableSubstitution};
    use http_body_util::BodyExt;

    async fn body_string(resp: Response<Full<Bytes>>) -> String {
        let bytes = resp
            .into_body()
            .collect()
            .await
            .expect("collect body")
            .to_bytes();
        String::from_utf8(bytes.to_vec()).expect("utf8 body")
    }

    async fn get(engine: &MockEngine, url: &str, headers: &[(&str, &str)]) -> (StatusCode, String) {
        let uri: Uri = url.parse().expect("valid test uri");
        let mut hm = HeaderMap::new();
        for (k, v) in headers {
            hm.insert(
                hyper::header::HeaderName::from_bytes(k.as_bytes()).expect("header name"),
                v.parse().expect("header value"),
            );
        }
        let resp = engine
            .respond(&Method::GET, &uri, &hm, Bytes::new())
            .await;
        let status = resp.status();
        (status, body_string(resp).await)
    }

    #[tokio::test]
    async fn invalid_mocks_root_errors() {
        let res = MockEngine::new(
            testdata_root().join("does-not-exist"),
            SubstitutionRegistry::new(),
        )
        .await;
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn simple_mock() -> anyhow::Result<()> {
        let engine = make_test_engine().await?;
        let (status, body) = get(&engine, "http://example.com/simple", &[]).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "Hello, World!\n");
        Ok(())
    }

    #[tokio::test]
    async fn global_substitutions_apply() -> anyhow::Result<()> {
        let registry = SubstitutionRegistry::new();
        registry.upsert(VariableSubstitution::new("name", "Davenport")?);
        let engine = MockEngine::new(testdata_root(), registry).await?;
        let (status, body) = get(&engine, "http://example.com/substitutions", &[]).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "Hello, Davenport!\n");
        Ok(())
    }

    #[tokio::test]
    async fn dynamic_url_capture() -> anyhow::Result<()> {
        let engine = make_test_engine().await?;
        let (status, body) = get(&engine, "http://example.com/users/russell", &[]).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "russell\n");
        Ok(())
    }

    #[tokio::test]
    async fn url_encoded_capture() -> anyhow::Result<()> {
        let engine = make_test_engine().await?;
        let (_, body) = get(&engine, "http://example.com/users/url%2Fencoded", &[]).await;
        assert_eq!(body, "url/encoded\n");
        let (_, body) = get(
            &engine,
            "http://example.com/users/url%2Fencoded%2Dvalue",
            &[],
        )
        .await;
        assert_eq!(body, "url/encoded-value\n");
        Ok(())
    }

    #[tokio::test]
    async fn desired_response_code_header() -> anyhow::Result<()> {
        let engine = make_test_engine().await?;
        let (status, body) = get(
            &engine,
            "http://example.com/users/notexists",
            &[(DESIRED_STATUS_HEADER, "404")],
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, "notexists\n");
        Ok(())
    }

    #[tokio::test]
    async fn invalid_desired_response_code_is_bad_request() -> anyhow::Result<()> {
        let engine = make_test_engine().await?;
        let (status, _) = get(
            &engine,
            "http://example.com/simple",
            &[(DESIRED_STATUS_HEADER, "not-a-number")],
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn unmatched_route_is_internal_error() -> anyhow::Result<()> {
        let engine = make_test_engine().await?;
        let (status, body) = get(&engine, "http://unknown.example/none", &[]).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.contains("found no matching route"));
        Ok(())
    }

    #[tokio::test]
    async fn missing_mock_file_is_not_found() -> anyhow::Result<()> {
        let engine = make_test_engine().await?;
        let (status, body) = get(&engine, "http://example.com/missing", &[]).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body.contains("failed opening mock file"));
        Ok(())
    }

    #[tokio::test]
    async fn unknown_git_request_type_is_not_found() -> anyhow::Result<()> {
        let engine = make_test_engine().await?;
        let (status, body) = get(
            &engine,
            "http://git.example.com/hashicorp/fake-repo/unknown",
            &[],
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body.contains("unknown git request type"));
        Ok(())
    }

    #[test]
    fn desired_status_default_is_ok() {
        let hm = HeaderMap::new();
        assert_eq!(desired_status(&hm).expect("parses"), StatusCode::OK);
    }
}
