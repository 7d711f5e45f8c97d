use geranos_core::{ImageReference, Result};
use tokio_util::sync::CancellationToken;

use super::Transporter;

impl Transporter {
    /// Pull `reference` from the registry into the local layout.
    ///
    /// Without `force`, a local copy whose manifest digest matches the
    /// remote image is left untouched. All delta logic (scaffold cloning,
    /// per-segment match checks, sparse writes) runs inside the layout
    /// mapper's write.
    pub async fn pull(
        &self,
        token: &CancellationToken,
        reference: &ImageReference,
    ) -> Result<()> {
        let image = self.registry.pull_image(&reference.name()).await?;
        let mapper = self.mapper();
        if self.options.force {
            mapper.write(token, &image, reference).await?;
        } else {
            mapper.write_if_not_present(token, &image, reference).await?;
        }
        tracing::info!(
            reference = %reference,
            digest = %image.digest(),
            "pulled image"
        );
        Ok(())
    }
}
