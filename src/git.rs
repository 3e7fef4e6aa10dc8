// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Git smart HTTP mocking backed by bare repositories under the mock root.
//!
//! Rather than reimplementing pack negotiation, both operations shell out to
//! `git upload-pack --stateless-rpc`, which serves the protocol exactly the
//! way a real smart HTTP server does.

use anyhow::Context;
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{CACHE_CONTROL, CONTENT_TYPE};
use hyper::{Response, StatusCode};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

const UPLOAD_PACK_SERVICE: &str = "git-upload-pack";
const UPLOAD_PACK_TIMEOUT: Duration = Duration::from_secs(30);

/// Largest pkt-line payload: the 4 hex digits of the length prefix cap the
/// total line at 0xffff bytes.
pub const MAX_PKT_PAYLOAD: usize = 0xffff - 4;

/// Encode one pkt-line: 4 hex digits of total length (including the prefix
/// itself) followed by the payload.
pub fn pkt_line(data: &[u8]) -> anyhow::Result<Vec<u8>> {
    if data.len() > MAX_PKT_PAYLOAD {
        anyhow::bail!(
            "pkt-line payload of {} bytes exceeds the {} byte maximum",
            data.len(),
            MAX_PKT_PAYLOAD
        );
    }
    let mut out = format!("{:04x}", data.len() + 4).into_bytes();
    out.extend_from_slice(data);
    Ok(out)
}

/// The flush-pkt, terminating a pkt-line section.
pub const FLUSH_PKT: &[u8] = b"0000";

/// The smart HTTP advertisement must start with a service banner pkt-line
/// followed by a flush before the refs. Clients reject the advertisement
/// without it.
fn advertisement_prefix() -> anyhow::Result<Vec<u8>> {
    let mut out = pkt_line(format!("# service={}\n", UPLOAD_PACK_SERVICE).as_bytes())?;
    out.extend_from_slice(FLUSH_PKT);
    Ok(out)
}

/// Serve `GET …/info/refs?service=git-upload-pack`: the reference
/// advertisement for the bare repository at `repo_dir`.
pub async fn advertise_refs(
    repo_dir: &Path,
    status: StatusCode,
) -> anyhow::Result<Response<Full<Bytes>>> {
    let output = Command::new("git")
        .args(["upload-pack", "--stateless-rpc", "--advertise-refs"])
        .arg(repo_dir)
        .output()
        .await
        .context("failed to start git upload-pack --advertise-refs")?;

    if !output.status.success() {
        anyhow::bail!(
            "git upload-pack --advertise-refs failed for {}: {}",
            repo_dir.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    let mut body = advertisement_prefix()?;
    body.extend_from_slice(&output.stdout);

    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/x-git-upload-pack-advertisement")
        .header(CACHE_CONTROL, "no-cache")
        .body(Full::new(Bytes::from(body)))
        .context("failed to build advertisement response")
}

/// Serve `POST …/git-upload-pack`: run one stateless-rpc exchange, piping
/// the request body to git's stdin and its stdout back as the response.
pub async fn upload_pack(
    repo_dir: &Path,
    request_body: Bytes,
) -> anyhow::Result<Response<Full<Bytes>>> {
    let stdout = run_stateless_rpc("git", repo_dir, request_body, UPLOAD_PACK_TIMEOUT).await?;

    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "application/x-git-upload-pack-result")
        .header(CACHE_CONTROL, "no-cache")
        .body(Full::new(Bytes::from(stdout)))
        .context("failed to build upload-pack response")
}

/// One stateless-rpc exchange against `program upload-pack --stateless-rpc`.
/// `kill_on_drop` ensures the child dies when the timeout abandons
/// `wait_with_output`; without it a hung exchange leaks a live process.
async fn run_stateless_rpc(
    program: &str,
    repo_dir: &Path,
    request_body: Bytes,
    timeout: Duration,
) -> anyhow::Result<Vec<u8>> {
    let mut child = Command::new(program)
        .args(["upload-pack", "--stateless-rpc"])
        .arg(repo_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .context("failed to start git upload-pack")?;

    let mut stdin = child
        .stdin
        .take()
        .context("git upload-pack stdin unavailable")?;
    stdin
        .write_all(&request_body)
        .await
        .context("failed writing request body to git upload-pack")?;
    drop(stdin);

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .context("git upload-pack timed out")?
        .context("git upload-pack failed")?;

    // Shallow clones end the stateless-rpc exchange with exit code 128, with
    // a complete pack already written. Anything else non-zero is an error.
    if !output.status.success() && output.status.code() != Some(128) {
        anyhow::bail!(
            "git upload-pack failed for {}: {}",
            repo_dir.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    Ok(output.stdout)
}
