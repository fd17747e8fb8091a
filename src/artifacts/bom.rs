// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Image bill of materials derived from a set of artifacts

use indexmap::{IndexMap, IndexSet};
use serde::Serialize;

use super::{Artifact, ArtifactId};

/// Image reference to the artifacts using it, in first-seen order
///
/// Keys are the exact references recorded on the objects; tags are never
/// resolved to digests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Bom {
    images: IndexMap<String, IndexSet<ArtifactId>>,
}

impl Bom {
    pub fn aggregate<'a>(artifacts: impl IntoIterator<Item = &'a Artifact>) -> Self {
        let mut images: IndexMap<String, IndexSet<ArtifactId>> = IndexMap::new();
        for artifact in artifacts {
            for image in artifact.images() {
                images
                    .entry(image.clone())
                    .or_default()
                    .insert(artifact.id());
            }
        }
        Self { images }
    }

    /// Artifacts referencing `image`
    pub fn users(&self, image: &str) -> Option<&IndexSet<ArtifactId>> {
        self.images.get(image)
    }

    pub fn images(&self) -> impl Iterator<Item = &str> {
        self.images.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &IndexSet<ArtifactId>)> {
        self.images.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}
