// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Error types for artifact discovery and node probing

use std::time::Duration;

use thiserror::Error;

/// Errors raised by the scanning core
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Connectivity or authentication failure; aborts the whole call
    #[error("cluster unavailable: {0}")]
    ClusterUnavailable(String),

    /// A requested resource name matched nothing the server advertises
    #[error("unknown resource kind: '{0}'")]
    UnknownResourceKind(String),

    /// Single-object lookup found nothing
    #[error("{kind} '{name}' not found{}", scope_suffix(.namespace.as_deref()))]
    NotFound {
        kind: String,
        namespace: Option<String>,
        name: String,
    },

    /// One kind/namespace combination could not be listed
    #[error("failed to list {kind}{}: {message}", scope_suffix(.namespace.as_deref()))]
    PartialListFailure {
        kind: String,
        namespace: Option<String>,
        message: String,
    },

    /// Probe did not finish within its deadline
    #[error("probe on node '{node}' timed out after {timeout:?}")]
    NodeProbeTimeout { node: String, timeout: Duration },

    /// Probe could not be placed, crashed, or produced no output
    #[error("probe on node '{node}' failed: {reason}")]
    NodeProbeFailed { node: String, reason: String },

    /// Ephemeral resources that could not be deleted
    #[error("failed to clean up probe resources: {}", .leaked.join(", "))]
    CleanupFailure { leaked: Vec<String> },

    /// Caller cancelled the operation
    #[error("operation cancelled")]
    Cancelled,

    /// Any other API server error status
    #[error("kubernetes API error ({code}): {message}")]
    Api { code: u16, message: String },
}

fn scope_suffix(namespace: Option<&str>) -> String {
    match namespace {
        Some(ns) => format!(" in namespace '{}'", ns),
        None => String::new(),
    }
}

impl Error {
    /// Errors that must stop every in-flight unit of work
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::ClusterUnavailable(_) | Error::Cancelled)
    }

    /// HTTP 404 from the API server
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Api { code: 404, .. })
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
