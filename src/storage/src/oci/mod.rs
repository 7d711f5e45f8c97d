//! Wire model for the OCI JSON the engine reads and writes.
//!
//! Hand-rolled serde types instead of a full OCI spec crate: the config
//! carries the legacy `container` field, and annotation maps must serialize
//! with deterministic key order so that manifest sidecars are byte-stable
//! across re-serialization.

mod config;
mod hash;
mod manifest;

pub use config::{ImageConfig, RootFs, RuntimeConfig};
pub use hash::Hash;
pub use manifest::{Descriptor, Manifest};

/// OCI image manifest media type (schema version 2).
pub const MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";

/// OCI image config media type.
pub const CONFIG_MEDIA_TYPE: &str = "application/vnd.oci.image.config.v1+json";

/// Media type of a file-segment layer.
pub const SEGMENT_MEDIA_TYPE: &str = "application/online.jarosik.tomasz.geranos.segment";
