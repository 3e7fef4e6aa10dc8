// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! ICAP REQMOD interception server with mock HTTP and git smart-protocol
//! responses.
//!
//! The server sits behind an ICAP-capable proxy (e.g. Squid). Each outbound
//! HTTP request is forwarded here over REQMOD; requests whose URL matches a
//! configured route are answered with a locally generated mock response,
//! everything else passes through unmodified via ICAP 204. Mock bodies run
//! through a chain of content transformers whose substitution variables can
//! be changed at runtime through a small management API.

pub mod api;
pub mod config;
pub mod git;
pub mod icap;
pub mod mock;
pub mod routes;
pub mod server;
pub mod transform;

#[cfg(test)]
pub(crate) mod test_helpers;
