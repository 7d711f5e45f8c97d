//! OCI image manifest and layer descriptors.

use std::collections::BTreeMap;

use geranos_core::Result;
use serde::{Deserialize, Serialize};

use super::Hash;

/// A content descriptor: one manifest entry naming a blob by digest.
///
/// Annotations use a `BTreeMap` so serialization is key-sorted and
/// byte-stable across runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    #[serde(rename = "mediaType")]
    pub media_type: String,
    pub size: i64,
    pub digest: Hash,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// OCI image manifest, schema version 2.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,
    #[serde(rename = "mediaType")]
    pub media_type: String,
    pub config: Descriptor,
    pub layers: Vec<Descriptor>,
}

impl Manifest {
    /// Parse a manifest from raw JSON bytes.
    pub fn from_slice(data: &[u8]) -> Result<Manifest> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Serialize to the canonical JSON persisted in sidecars and pushed to
    /// registries.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}
