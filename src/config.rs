// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Configuration loading.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    /// Directory containing routes.toml, .mock files and bare git repos
    #[serde(default = "default_mocks_root")]
    pub mocks_root: String,

    /// ICAP listen address, e.g. 0.0.0.0:11344
    #[serde(default = "default_icap_listen")]
    pub icap_listen: String,

    /// Management API listen address, e.g. 0.0.0.0:8080
    #[serde(default = "default_api_listen")]
    pub api_listen: String,
}

fn default_mocks_root() -> String {
    "/mocks".to_string()
}

fn default_icap_listen() -> String {
    "0.0.0.0:11344".to_string()
}

fn default_api_listen() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            mocks_root: default_mocks_root(),
            icap_listen: default_icap_listen(),
            api_listen: default_api_listen(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
}

impl Config {
    /// Load configuration from a TOML file:
    ///
    /// ```toml
    /// [general]
    /// mocks_root = "/mocks"
    /// icap_listen = "0.0.0.0:11344"
    /// api_listen = "0.0.0.0:8080"
    /// ```
    pub async fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> anyhow::Result<Self> {
        let s = tokio::fs::read_to_string(path.as_ref()).await?;
        let cfg: Self = toml::from_str(&s)?;
        Ok(cfg)
    }
}
