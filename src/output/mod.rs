// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

mod json;
mod table;
mod yaml;

pub use json::JsonFormatter;
pub use table::TableFormatter;
pub use yaml::YamlFormatter;

use serde::Serialize;

use crate::cli::OutputFormat;
use k8sinv::{Artifact, Bom};

/// Rows and columns for table output
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl QueryResult {
    fn new(columns: &[&str]) -> Self {
        Self {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    /// One row per artifact; node reports are summarised as JSON
    pub fn from_artifacts(artifacts: &[Artifact]) -> Self {
        let mut result = Self::new(&["kind", "namespace", "name", "images", "owners"]);
        for artifact in artifacts {
            let owners: Vec<String> = artifact
                .owner_references()
                .iter()
                .map(|o| format!("{}/{}", o.kind, o.name))
                .collect();
            result.rows.push(vec![
                artifact.kind().to_string(),
                artifact.namespace().to_string(),
                artifact.name().to_string(),
                artifact.images().join(", "),
                owners.join(", "),
            ]);
        }
        result
    }

    pub fn from_node_info(artifacts: &[Artifact]) -> Self {
        let mut result = Self::new(&["node", "info"]);
        for artifact in artifacts {
            result.rows.push(vec![
                artifact.name().to_string(),
                artifact.raw_resource().to_string(),
            ]);
        }
        result
    }

    pub fn from_bom(bom: &Bom) -> Self {
        let mut result = Self::new(&["image", "count", "users"]);
        for (image, users) in bom.iter() {
            let ids: Vec<String> = users.iter().map(ToString::to_string).collect();
            result.rows.push(vec![
                image.to_string(),
                users.len().to_string(),
                ids.join(", "),
            ]);
        }
        result
    }
}

/// Render `value` in the requested format; tables use `table`
pub fn render<T: Serialize + ?Sized>(
    format: &OutputFormat,
    value: &T,
    table: impl FnOnce() -> QueryResult,
    no_headers: bool,
) -> String {
    match format {
        OutputFormat::Table => TableFormatter::format(&table(), no_headers),
        OutputFormat::Json => JsonFormatter::format(value),
        OutputFormat::Yaml => YamlFormatter::format(value),
    }
}
