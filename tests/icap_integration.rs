// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

mod common;

use common::{icap_exchange, start_servers};
use mock_proxy::transform::VariableSubstitution;

#[tokio::test]
async fn options_over_tcp() -> anyhow::Result<()> {
    let (icap_addr, _, _) = start_servers().await?;

    let resp = icap_exchange(
        icap_addr,
        "OPTIONS icap://127.0.0.1/icap ICAP/1.0\r\n\
         Host: 127.0.0.1\r\n\
         Encapsulated: null-body=0\r\n\r\n",
    )
    .await?;

    assert!(resp.starts_with("ICAP/1.0 200 OK\r\n"), "{}", resp);
    assert!(resp.contains("Methods: REQMOD"));
    assert!(resp.contains("ISTag:"));
    Ok(())
}

#[tokio::test]
async fn reqmod_matched_serves_mock_over_tcp() -> anyhow::Result<()> {
    let (icap_addr, _, _) = start_servers().await?;

    let resp = icap_exchange(
        icap_addr,
        "REQMOD icap://127.0.0.1/icap ICAP/1.0\r\n\
         Host: 127.0.0.1\r\n\
         Encapsulated: req-hdr=0, null-body=64\r\n\r\n\
         GET http://example.com/simple HTTP/1.1\r\n\
         Host: example.com\r\n\r\n",
    )
    .await?;

    assert!(resp.starts_with("ICAP/1.0 200 OK\r\n"), "{}", resp);
    assert!(resp.contains("HTTP/1.1 200 OK\r\n"));
    assert!(resp.contains("Hello, World!"));
    Ok(())
}

#[tokio::test]
async fn reqmod_unmatched_passes_through() -> anyhow::Result<()> {
    let (icap_addr, _, _) = start_servers().await?;

    let resp = icap_exchange(
        icap_addr,
        "REQMOD icap://127.0.0.1/icap ICAP/1.0\r\n\
         Host: 127.0.0.1\r\n\
         Encapsulated: req-hdr=0, null-body=60\r\n\r\n\
         GET http://unmocked.example/ HTTP/1.1\r\n\
         Host: unmocked.example\r\n\r\n",
    )
    .await?;

    assert!(
        resp.starts_with("ICAP/1.0 204 No Modifications\r\n"),
        "{}",
        resp
    );
    Ok(())
}

#[tokio::test]
async fn reqmod_sees_runtime_substitutions() -> anyhow::Result<()> {
    let (icap_addr, _, registry) = start_servers().await?;
    registry.upsert(VariableSubstitution::new("name", "Davenport")?);

    let resp = icap_exchange(
        icap_addr,
        "REQMOD icap://127.0.0.1/icap ICAP/1.0\r\n\
         Host: 127.0.0.1\r\n\
         Encapsulated: req-hdr=0, null-body=71\r\n\r\n\
         GET http://example.com/substitutions HTTP/1.1\r\n\
         Host: example.com\r\n\r\n",
    )
    .await?;

    assert!(resp.contains("Hello, Davenport!"), "{}", resp);
    Ok(())
}
