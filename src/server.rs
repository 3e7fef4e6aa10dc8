// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Composition root: binds and runs the ICAP and management API servers.

use crate::config::Config;
use crate::mock::MockEngine;
use crate::{api, icap};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Run both servers until one of them fails.
pub async fn run_servers(cfg: Arc<Config>, engine: Arc<MockEngine>) -> anyhow::Result<()> {
    run_servers_with_limit(cfg, engine, None).await
}

/// Testable variant of `run_servers` that accepts an optional `accept_limit`.
/// When `accept_limit` is `Some(n)`, each accept loop accepts `n` connections
/// and then returns; connection handlers may still be running when this
/// function returns.
pub async fn run_servers_with_limit(
    cfg: Arc<Config>,
    engine: Arc<MockEngine>,
    accept_limit: Option<usize>,
) -> anyhow::Result<()> {
    let icap_listener = TcpListener::bind(cfg.general.icap_listen.as_str()).await?;
    let api_listener = TcpListener::bind(cfg.general.api_listen.as_str()).await?;
    info!(icap = %cfg.general.icap_listen, api = %cfg.general.api_listen, "listening");

    let icap_task = tokio::spawn(icap::serve(icap_listener, engine.clone(), accept_limit));
    let api_task = tokio::spawn(api::serve(api_listener, engine, accept_limit));

    tokio::select! {
        res = icap_task => res??,
        res = api_task => res??,
    }

    Ok(())
}
