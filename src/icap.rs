// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! ICAP (RFC 3507) server speaking REQMOD.
//!
//! The upstream proxy forwards each outbound HTTP request here. When the
//! embedded request matches a mock route the exchange is answered with an
//! encapsulated mock HTTP response; otherwise ICAP 204 lets the request
//! through unmodified. RESPMOD is not supported.

use crate::mock::MockEngine;
use anyhow::Context;
use bytes::Bytes;
use http_body_util::BodyExt;
use http_body_util::Full;
use hyper::header::{HeaderMap, HeaderName, HeaderValue, HOST};
use hyper::{Method, Response, Uri};
use std::sync::Arc;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Service tag sent on every ICAP response.
pub const ISTAG: &str = "\"mock-proxy-1.0\"";

/// Accept loop for the ICAP listener. `accept_limit` bounds the number of
/// accepted connections for deterministic tests; `None` runs forever.
pub async fn serve(
    listener: TcpListener,
    engine: Arc<MockEngine>,
    accept_limit: Option<usize>,
) -> anyhow::Result<()> {
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
        tokio::spawn(async move {
            let conn_id = Uuid::new_v4();
            debug!(%conn_id, %remote_addr, "icap connection accepted");
            if let Err(e) = handle_connection(stream, engine).await {
                warn!(%conn_id, %remote_addr, error = %e, "icap connection error");
            }
        });
    }

    Ok(())
}

/// Serve ICAP requests on one connection until EOF. REQMOD exchanges close
/// the connection after the response; bodies we chose not to drain must not
/// leak into a next request.
async fn handle_connection<S>(stream: S, engine: Arc<MockEngine>) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);

    loop {
        let head = match read_head(&mut reader).await {
            Ok(Some(head)) => head,
            Ok(None) => return Ok(()),
            Err(e) => {
                let _ = write_simple(&mut write_half, 400, "Bad Request", &[]).await;
                return Err(e);
            }
        };

        match head.method.as_str() {
            "OPTIONS" => {
                write_simple(
                    &mut write_half,
                    200,
                    "OK",
                    &[
                        ("Methods", "REQMOD"),
                        ("Allow", "204"),
                        ("Preview", "0"),
                        ("Transfer-Preview", "*"),
                    ],
                )
                .await?;
            }
            "REQMOD" => {
                return match handle_reqmod(&mut reader, &mut write_half, &engine, &head).await {
                    Ok(()) => Ok(()),
                    Err(e) => {
                        let _ = write_simple(&mut write_half, 400, "Bad Request", &[]).await;
                        Err(e)
                    }
                };
            }
            other => {
                error!(method = other, "invalid request method to ICAP server");
                write_simple(&mut write_half, 405, "Method Not Allowed", &[]).await?;
            }
        }
    }
}

#[derive(Debug)]
struct IcapHead {
    method: String,
    #[allow(dead_code)]
    uri: String,
    headers: Vec<(String, String)>,
}

impl IcapHead {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Read one ICAP request head. Returns `None` on clean EOF before a request
/// line.
async fn read_head<R: AsyncBufRead + Unpin>(reader: &mut R) -> anyhow::Result<Option<IcapHead>> {
    let request_line = loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        let t = line.trim_end();
        if !t.is_empty() {
            break t.to_string();
        }
    };

    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .context("empty ICAP request line")?
        .to_string();
    let uri = parts
        .next()
        .with_context(|| format!("ICAP request line '{}' missing URI", request_line))?
        .to_string();
    let version = parts
        .next()
        .with_context(|| format!("ICAP request line '{}' missing version", request_line))?;
    if !version.starts_with("ICAP/") {
        anyhow::bail!("unsupported protocol version '{}'", version);
    }

    let headers = read_header_lines(reader).await?;
    Ok(Some(IcapHead {
        method,
        uri,
        headers,
    }))
}

async fn read_header_lines<R: AsyncBufRead + Unpin>(
    reader: &mut R,
) -> anyhow::Result<Vec<(String, String)>> {
    let mut headers = Vec::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            anyhow::bail!("unexpected EOF in header block");
        }
        let t = line.trim_end();
        if t.is_empty() {
            return Ok(headers);
        }
        let (name, value) = t
            .split_once(':')
            .with_context(|| format!("malformed header line '{}'", t))?;
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }
}

/// Offsets from the `Encapsulated` header relevant to REQMOD requests.
#[derive(Debug, Default, PartialEq, Eq)]
struct Encapsulated {
    req_hdr: Option<usize>,
    req_body: Option<usize>,
    null_body: Option<usize>,
}

fn parse_encapsulated(value: &str) -> anyhow::Result<Encapsulated> {
    let mut enc = Encapsulated::default();
    for part in value.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (name, offset) = part
            .split_once('=')
            .with_context(|| format!("malformed Encapsulated entry '{}'", part))?;
        let offset: usize = offset
            .trim()
            .parse()
            .with_context(|| format!("malformed Encapsulated offset '{}'", part))?;
        match name.trim() {
            "req-hdr" => enc.req_hdr = Some(offset),
            "req-body" => enc.req_body = Some(offset),
            "null-body" => enc.null_body = Some(offset),
            other => anyhow::bail!("unsupported Encapsulated entity '{}'", other),
        }
    }
    Ok(enc)
}

async fn handle_reqmod<R, W>(
    reader: &mut R,
    writer: &mut W,
    engine: &MockEngine,
    head: &IcapHead,
) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let enc = parse_encapsulated(head.header("encapsulated").unwrap_or("null-body=0"))?;
    if enc.req_hdr.is_none() {
        anyhow::bail!("REQMOD without an encapsulated request header");
    }

    let (method, target, http_headers) = read_http_request_head(reader).await?;
    let uri = request_uri(&target, &http_headers)?;
    info!(%method, %uri, "REQMOD request");

    if engine.routes().match_route(&uri).is_none() {
        // Pass the request through unmodified.
        write_simple(writer, 204, "No Modifications", &[]).await?;
        return Ok(());
    }

    let body = if enc.req_body.is_some() {
        read_encapsulated_body(reader, writer, head).await?
    } else {
        Bytes::new()
    };

    let resp = engine.respond(&method, &uri, &http_headers, body).await;
    write_reqmod_response(writer, resp).await
}

async fn read_http_request_head<R: AsyncBufRead + Unpin>(
    reader: &mut R,
) -> anyhow::Result<(Method, String, HeaderMap)> {
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        anyhow::bail!("unexpected EOF before encapsulated request");
    }
    let t = line.trim_end();
    let mut parts = t.split_whitespace();
    let method: Method = parts
        .next()
        .context("empty encapsulated request line")?
        .parse()
        .context("invalid encapsulated request method")?;
    let target = parts
        .next()
        .with_context(|| format!("encapsulated request line '{}' missing target", t))?
        .to_string();

    let mut headers = HeaderMap::new();
    for (name, value) in read_header_lines(reader).await? {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            (Ok(n), Ok(v)) => {
                headers.append(n, v);
            }
            _ => warn!(header = %name, "skipping malformed encapsulated header"),
        }
    }

    Ok((method, target, headers))
}

/// Reconstruct the intercepted request URI from an absolute-form target, or
/// from the Host header plus an origin-form target.
fn request_uri(target: &str, headers: &HeaderMap) -> anyhow::Result<Uri> {
    if target.contains("://") {
        return target
            .parse()
            .with_context(|| format!("invalid absolute request target '{}'", target));
    }
    let host = headers
        .get(HOST)
        .and_then(|h| h.to_str().ok())
        .context("origin-form request target without Host header")?;
    format!("http://{}{}", host, target)
        .parse()
        .with_context(|| format!("invalid request target '{}' for host '{}'", target, host))
}

/// Read the chunked encapsulated request body. With a preview (we advertise
/// `Preview: 0`) the client pauses at the zero chunk unless it marked it
/// `ieof`; in that case ask for the rest with 100 Continue.
async fn read_encapsulated_body<R, W>(
    reader: &mut R,
    writer: &mut W,
    head: &IcapHead,
) -> anyhow::Result<Bytes>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (mut body, ieof) = read_chunked(reader).await?;
    if head.header("preview").is_some() && !ieof {
        writer.write_all(b"ICAP/1.0 100 Continue\r\n\r\n").await?;
        writer.flush().await?;
        let (rest, _) = read_chunked(reader).await?;
        body.extend_from_slice(&rest);
    }
    Ok(Bytes::from(body))
}

/// Upper bound on an encapsulated request body. Chunk sizes are
/// client-controlled; the declared size is checked against this before any
/// buffer is allocated.
const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

/// Decode one chunked section. Returns the payload and whether the zero
/// chunk carried the `ieof` extension.
async fn read_chunked<R: AsyncBufRead + Unpin>(reader: &mut R) -> anyhow::Result<(Vec<u8>, bool)> {
    let mut body = Vec::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            anyhow::bail!("unexpected EOF in chunked body");
        }
        let t = line.trim_end();
        let (size_part, ext) = match t.split_once(';') {
            Some((size, ext)) => (size.trim(), Some(ext.trim())),
            None => (t.trim(), None),
        };
        let size = usize::from_str_radix(size_part, 16)
            .with_context(|| format!("invalid chunk size line '{}'", t))?;
        if size > MAX_BODY_BYTES - body.len() {
            anyhow::bail!(
                "chunked body exceeds the {} byte maximum",
                MAX_BODY_BYTES
            );
        }

        if size == 0 {
            // consume the CRLF terminating the chunked section
            let mut end = String::new();
            reader.read_line(&mut end).await?;
            return Ok((body, ext == Some("ieof")));
        }

        let mut chunk = vec![0u8; size];
        reader.read_exact(&mut chunk).await?;
        body.extend_from_slice(&chunk);
        let mut crlf = [0u8; 2];
        reader.read_exact(&mut crlf).await?;
    }
}

/// Write a headers-only ICAP response.
async fn write_simple<W: AsyncWrite + Unpin>(
    writer: &mut W,
    status: u16,
    reason: &str,
    extra: &[(&str, &str)],
) -> anyhow::Result<()> {
    let mut head = format!("ICAP/1.0 {} {}\r\n", status, reason);
    head.push_str(&format!("ISTag: {}\r\n", ISTAG));
    for (name, value) in extra {
        head.push_str(&format!("{}: {}\r\n", name, value));
    }
    head.push_str("Encapsulated: null-body=0\r\n\r\n");
    writer.write_all(head.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Write an ICAP 200 carrying the mock HTTP response as the encapsulated
/// res-hdr/res-body, with the body in chunked encoding.
async fn write_reqmod_response<W: AsyncWrite + Unpin>(
    writer: &mut W,
    resp: Response<Full<Bytes>>,
) -> anyhow::Result<()> {
    let (parts, body) = resp.into_parts();
    let bytes = body.collect().await?.to_bytes();

    let mut http_head = format!(
        "HTTP/1.1 {} {}\r\n",
        parts.status.as_u16(),
        parts.status.canonical_reason().unwrap_or("")
    );
    for (name, value) in parts.headers.iter() {
        if let Ok(v) = value.to_str() {
            http_head.push_str(&format!("{}: {}\r\n", name, v));
        }
    }
    http_head.push_str(&format!("Content-Length: {}\r\n\r\n", bytes.len()));

    let encapsulated = if bytes.is_empty() {
        format!("res-hdr=0, null-body={}", http_head.len())
    } else {
        format!("res-hdr=0, res-body={}", http_head.len())
    };

    let mut out = format!(
        "ICAP/1.0 200 OK\r\nISTag: {}\r\nConnection: close\r\nEncapsulated: {}\r\n\r\n",
        ISTAG, encapsulated
    )
    .into_bytes();
    out.extend_from_slice(http_head.as_bytes());
    if !bytes.is_empty() {
        out.extend_from_slice(format!("{:x}\r\n", bytes.len()).as_bytes());
        out.extend_from_slice(&bytes);
        out.extend_from_slice(b"\r\n0\r\n\r\n");
    }

    writer.write_all(&out).await?;
    writer.flush().await?;
    Ok(())
}
