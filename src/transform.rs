// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Chainable content transformers applied to mock response bodies.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

/// A mutation applied to a mock response body.
///
/// Transformers chain: a transformation must not produce output that
/// invalidates the placeholders another transformer consumes.
pub trait Transformer: Send + Sync {
    fn transform(&self, body: String) -> anyhow::Result<String>;
}

/// Replaces every `{{key}}` occurrence in a body with a fixed value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableSubstitution {
    pub key: String,
    pub value: String,
}

impl VariableSubstitution {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> anyhow::Result<Self> {
        let key = key.into();
        if key.is_empty() {
            anyhow::bail!("substitution key must not be empty");
        }
        if key.contains(['{', '}']) {
            anyhow::bail!("substitution key '{}' must not contain braces", key);
        }
        Ok(Self {
            key,
            value: value.into(),
        })
    }

    fn placeholder(&self) -> String {
        format!("{{{{{}}}}}", self.key)
    }
}

impl Transformer for VariableSubstitution {
    fn transform(&self, body: String) -> anyhow::Result<String> {
        Ok(body.replace(&self.placeholder(), &self.value))
    }
}

/// Apply a chain of substitutions in order.
pub fn apply_chain(body: String, subs: &[VariableSubstitution]) -> anyhow::Result<String> {
    let mut out = body;
    for s in subs {
        out = s.transform(out)?;
    }
    Ok(out)
}

/// Thread-safe, runtime-mutable set of global substitution variables.
///
/// Clones share the same underlying storage; the management API mutates it
/// while the mock engine reads snapshots.
#[derive(Clone, Default)]
pub struct SubstitutionRegistry {
    inner: Arc<RwLock<Vec<VariableSubstitution>>>,
}

impl SubstitutionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a substitution. An existing entry with the same key is replaced
    /// in place, so the chain never carries two substitutions for one key.
    pub fn upsert(&self, new: VariableSubstitution) {
        match self.inner.write() {
            Ok(mut subs) => {
                if let Some(existing) = subs.iter_mut().find(|s| s.key == new.key) {
                    *existing = new;
                } else {
                    subs.push(new);
                }
            }
            Err(_) => {
                tracing::warn!("SubstitutionRegistry lock poisoned during write");
            }
        }
    }

    /// Snapshot of the current substitutions in insertion order.
    pub fn list(&self) -> Vec<VariableSubstitution> {
        match self.inner.read() {
            Ok(subs) => subs.clone(),
            Err(_) => {
                tracing::warn!("SubstitutionRegistry lock poisoned during read");
                Vec::new()
            }
        }
    }
}
