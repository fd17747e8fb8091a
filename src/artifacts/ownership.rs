// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Suppress artifacts whose owning controller is part of the same result set

use std::collections::HashSet;

use super::Artifact;

/// Stateless owner-graph filter
pub struct OwnershipResolver;

impl OwnershipResolver {
    /// Keep every artifact that has no owner present in `artifacts`
    ///
    /// Owners are matched by kind and name, in the dependent's namespace or
    /// cluster-scoped. Owners missing from the input cannot be confirmed, so
    /// their dependents are kept.
    pub fn filter(artifacts: Vec<Artifact>) -> Vec<Artifact> {
        let present: HashSet<(String, String, String)> = artifacts
            .iter()
            .map(|a| {
                (
                    a.kind().to_string(),
                    a.namespace().to_string(),
                    a.name().to_string(),
                )
            })
            .collect();

        artifacts
            .into_iter()
            .filter(|artifact| !Self::has_owner_in(artifact, &present))
            .collect()
    }

    fn has_owner_in(artifact: &Artifact, present: &HashSet<(String, String, String)>) -> bool {
        artifact.owner_references().iter().any(|owner| {
            let same_namespace = (
                owner.kind.clone(),
                artifact.namespace().to_string(),
                owner.name.clone(),
            );
            let cluster_scoped = (owner.kind.clone(), String::new(), owner.name.clone());
            present.contains(&same_namespace) || present.contains(&cluster_scoped)
        })
    }
}
