// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use mock_proxy::mock::MockEngine;
use mock_proxy::transform::SubstitutionRegistry;
use mock_proxy::{api, icap};

pub fn testdata_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("testdata")
}

/// Start the ICAP and API servers on ephemeral ports over the testdata
/// fixtures. The returned registry shares state with the running engine.
pub async fn start_servers() -> anyhow::Result<(SocketAddr, SocketAddr, SubstitutionRegistry)> {
    let registry = SubstitutionRegistry::new();
    let engine = Arc::new(MockEngine::new(testdata_root(), registry.clone()).await?);

    let icap_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let api_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let icap_addr = icap_listener.local_addr()?;
    let api_addr = api_listener.local_addr()?;

    tokio::spawn(icap::serve(icap_listener, engine.clone(), None));
    tokio::spawn(api::serve(api_listener, engine, None));

    Ok((icap_addr, api_addr, registry))
}

/// Write one ICAP request, half-close, and read the whole response.
pub async fn icap_exchange(addr: SocketAddr, request: &str) -> anyhow::Result<String> {
    let mut stream = TcpStream::connect(addr).await?;
    stream.write_all(request.as_bytes()).await?;
    stream.shutdown().await?;

    let mut out = Vec::new();
    stream.read_to_end(&mut out).await?;
    Ok(String::from_utf8_lossy(&out).into_owned())
}

/// Write one HTTP/1.1 request (must carry `Connection: close`) and read the
/// whole response. No half-close: hyper treats a closed read side as a gone
/// client.
pub async fn http_exchange(addr: SocketAddr, request: &str) -> anyhow::Result<String> {
    let mut stream = TcpStream::connect(addr).await?;
    stream.write_all(request.as_bytes()).await?;

    let mut out = Vec::new();
    stream.read_to_end(&mut out).await?;
    Ok(String::from_utf8_lossy(&out).into_owned())
}
