// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Shared test utilities to reduce duplication across test modules.

use crate::mock::MockEngine;
use crate::transform::SubstitutionRegistry;
use std::path::PathBuf;

/// Fixture directory shipped with the crate.
pub fn testdata_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("testdata")
}

/// Engine over the testdata fixtures with an empty substitution registry.
pub async fn make_test_engine() -> anyhow::Result<MockEngine> {
    MockEngine::new(testdata_root(), SubstitutionRegistry::new()).await
}
