//! Registry transport: thin compositions pairing the layout mapper with an
//! external registry client.
//!
//! The HTTP client itself is an external collaborator; the engine only
//! defines the [`Registry`] trait it consumes. Everything bandwidth-shaped
//! (segment dedup, scaffold cloning, sparse writes) happens on the local
//! side of this seam.

mod options;
mod pull;
mod push;

pub use options::TransportOptions;

use std::sync::Arc;

use async_trait::async_trait;
use geranos_core::{ImageReference, Result};

use crate::image::{Image, Layer};
use crate::layout::Mapper;

/// Client-side view of a container registry, keyed by reference strings.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Fetch the image named by `reference`: manifest, config, and lazily
    /// readable layers.
    async fn pull_image(&self, reference: &str) -> Result<Image>;

    /// Upload one layer blob for `reference`. When `mount_from` names
    /// another repository on the same registry, the registry may satisfy
    /// the upload with a cross-repo blob mount instead of a byte transfer.
    async fn push_layer(
        &self,
        reference: &str,
        mount_from: Option<&str>,
        layer: Arc<dyn Layer>,
    ) -> Result<()>;

    /// Upload an opaque blob (the config) addressed by its digest.
    async fn push_blob(&self, reference: &str, digest: &crate::oci::Hash, data: &[u8])
        -> Result<()>;

    /// Upload raw manifest bytes for `reference`.
    async fn push_manifest(
        &self,
        reference: &str,
        media_type: &str,
        manifest: &[u8],
    ) -> Result<()>;

    /// Fetch the raw manifest bytes of `reference`.
    async fn fetch_manifest(&self, reference: &str) -> Result<Vec<u8>>;
}

/// High-level push/pull/inspect/retag operations over a [`Registry`].
pub struct Transporter {
    registry: Arc<dyn Registry>,
    options: TransportOptions,
}

impl Transporter {
    pub fn new(registry: Arc<dyn Registry>, options: TransportOptions) -> Transporter {
        Transporter { registry, options }
    }

    pub(crate) fn mapper(&self) -> Mapper {
        Mapper::with_options(&self.options.images_path, self.options.dirimage.clone())
    }

    /// Pretty-printed config and manifest JSON of a local image.
    pub async fn inspect(
        &self,
        token: &tokio_util::sync::CancellationToken,
        reference: &ImageReference,
    ) -> Result<String> {
        let image = self.mapper().read(token, reference).await?;
        let config = serde_json::to_string_pretty(image.config())?;
        let manifest = serde_json::to_string_pretty(image.manifest())?;
        Ok(format!("{config}\n{manifest}"))
    }

    /// Tag `dst` with the manifest of `src` on the registry side; no blob
    /// moves.
    pub async fn retag_remotely(
        &self,
        src: &ImageReference,
        dst: &ImageReference,
    ) -> Result<()> {
        let manifest = self.registry.fetch_manifest(&src.name()).await?;
        self.registry
            .push_manifest(&dst.name(), crate::oci::MANIFEST_MEDIA_TYPE, &manifest)
            .await
    }
}
