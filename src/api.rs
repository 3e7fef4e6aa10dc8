// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Management HTTP API: substitution-variable state, plus a direct HTTP
//! surface over the mock engine for debugging.

use crate::mock::{text_response, MockEngine};
use crate::routes::percent_decode;
use crate::transform::VariableSubstitution;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode, Uri};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoConnBuilder;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error};

const SUBSTITUTION_VARIABLES_PATH: &str = "/substitution-variables";

/// Accept loop for the management API listener. `accept_limit` bounds the
/// number of accepted connections for deterministic tests.
pub async fn serve(
    listener: TcpListener,
    engine: Arc<MockEngine>,
    accept_limit: Option<usize>,
) -> anyhow::Result<()> {
    let executor = TokioExecutor::new();
    let server_builder = AutoConnBuilder::new(executor);

    let mut remaining = accept_limit;
    loop {
        if let Some(0) = remaining {
            break;
        }

        let (stream, remote_addr) = listener.accept().await?;

        if let Some(ref mut n) = remaining {
            *n -= 1;
        }

        let engine = engine.clone();
        let builder_clone = server_builder.clone();
        tokio::spawn(async move {
            let service = service_fn(move |req: Request<Incoming>| {
                let engine = engine.clone();
                async move { handle(req, engine).await }
            });

            let io = TokioIo::new(stream);
            if let Err(e) = builder_clone.serve_connection(io, service).await {
                error!(%remote_addr, error = %e, "api connection error");
            }
        });
    }

    Ok(())
}

async fn handle(
    req: Request<Incoming>,
    engine: Arc<MockEngine>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    if req.uri().path() == SUBSTITUTION_VARIABLES_PATH {
        return Ok(substitution_variables(req, &engine).await);
    }

    // Anything else falls through to the mock engine, exposing the mock
    // surface directly over HTTP.
    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            return Ok(text_response(
                StatusCode::BAD_REQUEST,
                format!("failed reading request body: {}", e),
            ))
        }
    };
    let uri = match absolute_uri(&parts.uri, &parts.headers) {
        Ok(uri) => uri,
        Err(e) => {
            return Ok(text_response(
                StatusCode::BAD_REQUEST,
                format!("cannot determine request host: {}", e),
            ))
        }
    };

    Ok(engine.respond(&parts.method, &uri, &parts.headers, body).await)
}

/// GET lists the current substitutions as JSON; POST upserts one from an
/// urlencoded `key`/`value` form:
///
/// ```text
/// curl -X POST -d "key=A" -d "value=B" mock.proxy/substitution-variables
/// ```
async fn substitution_variables(
    req: Request<Incoming>,
    engine: &MockEngine,
) -> Response<Full<Bytes>> {
    let method = req.method().clone();
    match method {
        Method::GET => match serde_json::to_string(&engine.substitutions().list()) {
            Ok(js) => Response::builder()
                .header(hyper::header::CONTENT_TYPE, "application/json")
                .body(Full::new(Bytes::from(js.clone())))
                .unwrap_or_else(|e| {
                    error!(error = %e, "failed to build json response");
                    Response::new(Full::new(Bytes::from(js)))
                }),
            Err(e) => text_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        },
        Method::POST => {
            let body = match req.into_body().collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(e) => {
                    return text_response(
                        StatusCode::BAD_REQUEST,
                        format!("failed reading request body: {}", e),
                    )
                }
            };
            let body = match std::str::from_utf8(&body) {
                Ok(s) => s,
                Err(_) => return text_response(StatusCode::BAD_REQUEST, "form body is not UTF-8"),
            };

            let fields = match parse_form(body) {
                Ok(fields) => fields,
                Err(e) => {
                    return text_response(
                        StatusCode::BAD_REQUEST,
                        format!("error parsing input form: {}", e),
                    )
                }
            };
            let key = form_field(&fields, "key");
            let value = form_field(&fields, "value");
            let (Some(key), Some(value)) = (key, value) else {
                return text_response(
                    StatusCode::BAD_REQUEST,
                    "both key and value must be supplied",
                );
            };
            if key.is_empty() || value.is_empty() {
                return text_response(
                    StatusCode::BAD_REQUEST,
                    "both key and value must be supplied",
                );
            }

            let sub = match VariableSubstitution::new(key, value) {
                Ok(sub) => sub,
                Err(e) => return text_response(StatusCode::BAD_REQUEST, e.to_string()),
            };
            debug!(key = %sub.key, "substitution variable updated");
            engine.substitutions().upsert(sub);
            text_response(StatusCode::OK, Bytes::new())
        }
        _ => text_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed"),
    }
}

/// Requests arriving directly (origin-form) get their host from the Host
/// header so route matching sees the same URI shape as the ICAP path.
fn absolute_uri(uri: &Uri, headers: &hyper::HeaderMap) -> anyhow::Result<Uri> {
    if uri.scheme().is_some() {
        return Ok(uri.clone());
    }
    let host = headers
        .get(hyper::header::HOST)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| anyhow::anyhow!("request without Host header"))?;
    let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    format!("http://{}{}", host, path)
        .parse()
        .map_err(anyhow::Error::from)
}

/// Parse an `application/x-www-form-urlencoded` body.
fn parse_form(body: &str) -> anyhow::Result<Vec<(String, String)>> {
    body.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            Ok((form_decode(k)?, form_decode(v)?))
        })
        .collect()
}

fn form_decode(s: &str) -> anyhow::Result<String> {
    percent_decode(&s.replace('+', " "))
}

fn form_field<'a>(fields: &'a [(String, String)], name: &str) -> Option<&'a str> {
    fields
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
}
