// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

use clap::Parser;
use std::sync::Arc;
use tokio::signal;

use mock_proxy::config::{Config, GeneralConfig};
use mock_proxy::mock::MockEngine;
use mock_proxy::server::run_servers;
use mock_proxy::transform::{SubstitutionRegistry, VariableSubstitution};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "mock-proxy")]
struct Args {
    /// Directory containing routes.toml, .mock files and bare git repos
    #[arg(long, default_value = "/mocks")]
    mocks_root: String,

    /// ICAP listen address, e.g. 0.0.0.0:11344
    #[arg(long, default_value = "0.0.0.0:11344")]
    icap_listen: String,

    /// Management API listen address, e.g. 0.0.0.0:8080
    #[arg(long, default_value = "0.0.0.0:8080")]
    api_listen: String,

    /// Optional config TOML path; overrides the flags above
    #[arg(long)]
    config: Option<String>,

    /// Default substitution variables (repeatable)
    #[arg(long = "var", value_name = "KEY=VALUE")]
    vars: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let cfg = if let Some(ref p) = args.config {
        match Config::load_from_path(p).await {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!(%p, error = %e, "failed to load config, using CLI flags");
                config_from_args(&args)
            }
        }
    } else {
        config_from_args(&args)
    };
    let cfg = Arc::new(cfg);

    let registry = SubstitutionRegistry::new();
    for var in &args.vars {
        let (key, value) = parse_var(var)?;
        registry.upsert(VariableSubstitution::new(key, value)?);
    }

    let engine = Arc::new(MockEngine::new(cfg.general.mocks_root.as_str(), registry).await?);

    let servers = run_servers(cfg, engine);

    tokio::select! {
        res = servers => {
            if let Err(e) = res {
                error!(%e, "server error");
                return Err(e);
            }
        }
        _ = signal::ctrl_c() => {
            info!("shutting down");
        }
    }

    Ok(())
}

fn config_from_args(args: &Args) -> Config {
    Config {
        general: GeneralConfig {
            mocks_root: args.mocks_root.clone(),
            icap_listen: args.icap_listen.clone(),
            api_listen: args.api_listen.clone(),
        },
    }
}

fn parse_var(s: &str) -> anyhow::Result<(&str, &str)> {
    s.split_once('=')
        .ok_or_else(|| anyhow::anyhow!("invalid --var '{}', expected KEY=VALUE", s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_var_cases() {
        assert_eq!(parse_var("name=Davenport").unwrap(), ("name", "Davenport"));
        assert_eq!(parse_var("k=a=b").unwrap(), ("k", "a=b"));
        assert!(parse_var("novalue").is_err());
    }

    #[test]
    fn config_from_args_uses_flags() {
        let args = Args {
            mocks_root: "/srv/mocks".to_string(),
            icap_listen: "127.0.0.1:11344".to_string(),
            api_listen: "127.0.0.1:39980".to_string(),
            config: None,
            vars: Vec::new(),
        };
        let cfg = config_from_args(&args);
        assert_eq!(cfg.general.mocks_root, "/srv/mocks");
        assert_eq!(cfg.general.icap_listen, "127.0.0.1:11344");
        assert_eq!(cfg.general.api_listen, "127.0.0.1:39980");
    }
}
