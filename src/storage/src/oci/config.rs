//! OCI image config.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use geranos_core::Result;
use serde::{Deserialize, Serialize};

use super::Hash;

/// Root filesystem section of the image config. The diff IDs are the
/// uncompressed digests of the layers, in manifest layer order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RootFs {
    #[serde(rename = "type")]
    pub typ: String,
    pub diff_ids: Vec<Hash>,
}

impl RootFs {
    pub fn layers(diff_ids: Vec<Hash>) -> RootFs {
        RootFs {
            typ: "layers".to_string(),
            diff_ids,
        }
    }
}

/// Runtime configuration section; only labels are meaningful for disk
/// image artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RuntimeConfig {
    #[serde(rename = "Labels", default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,
}

/// OCI image config, extended with the legacy `container` field the wire
/// format carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ImageConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub container: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<RuntimeConfig>,
    #[serde(default)]
    pub rootfs: RootFs,
}

impl ImageConfig {
    /// Config synthesized for a directory read when no config sidecar
    /// exists yet. The root filesystem is filled in once layer hashes are
    /// known.
    pub fn synthesized() -> ImageConfig {
        ImageConfig {
            container: "geranos".to_string(),
            created: Some(Utc::now()),
            config: Some(RuntimeConfig::default()),
            ..ImageConfig::default()
        }
    }

    /// Parse a config from raw JSON bytes.
    pub fn from_slice(data: &[u8]) -> Result<ImageConfig> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Serialize to the canonical JSON persisted in sidecars.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}
