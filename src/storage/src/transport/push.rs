use std::collections::HashSet;
use std::sync::Arc;

use geranos_core::{GeranosError, ImageReference, Result};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::dirimage;
use crate::oci::{Hash, MANIFEST_MEDIA_TYPE};

use super::Transporter;

impl Transporter {
    /// Push the local image under `reference` to the registry.
    ///
    /// Layers are pre-pushed concurrently on a bounded pool, deduplicated
    /// by digest; the manifest goes last so the registry never sees a
    /// manifest with missing blobs.
    pub async fn push(
        &self,
        token: &CancellationToken,
        reference: &ImageReference,
    ) -> Result<()> {
        let image = self.mapper().read(token, reference).await?;
        let reference_name = reference.name();
        let mount_from = self.options.mounted_reference.clone();

        let semaphore = Arc::new(Semaphore::new(self.options.dirimage.worker_count.max(1)));
        let mut join_set = JoinSet::new();
        let mut pushed: HashSet<Hash> = HashSet::new();

        for layer in image.layers() {
            let digest = layer.digest()?;
            if !pushed.insert(digest) {
                continue;
            }

            let permit = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    join_set.shutdown().await;
                    return Err(GeranosError::Cancelled);
                }
                permit = Arc::clone(&semaphore).acquire_owned() => {
                    permit.map_err(|_| GeranosError::Cancelled)?
                }
            };

            let registry = Arc::clone(&self.registry);
            let layer = Arc::clone(layer);
            let reference_name = reference_name.clone();
            let mount_from = mount_from.clone();
            join_set.spawn(async move {
                let _permit = permit;
                registry
                    .push_layer(&reference_name, mount_from.as_deref(), layer)
                    .await
            });
        }

        while let Some(joined) = join_set.join_next().await {
            joined.map_err(dirimage::join_error)??;
        }

        self.registry
            .push_blob(
                &reference_name,
                &image.manifest().config.digest,
                image.raw_config(),
            )
            .await?;
        self.registry
            .push_manifest(&reference_name, MANIFEST_MEDIA_TYPE, image.raw_manifest())
            .await?;

        tracing::info!(
            reference = %reference_name,
            digest = %image.digest(),
            layers = image.layers().len(),
            "pushed image"
        );
        Ok(())
    }
}
