use std::path::PathBuf;

use geranos_core::{GeranosError, Result};

use crate::filesegment::SegmentDescriptor;
use crate::image::Image;

use super::DirImage;

/// Convert an externally supplied image (typically pulled from a registry)
/// into a `DirImage` carrying one segment descriptor per layer. Performs
/// no I/O; every layer must be a well-formed segment layer and the
/// manifest layer count must match the config's diff ID count.
pub fn convert(image: Image) -> Result<DirImage> {
    let diff_ids = &image.config().rootfs.diff_ids;
    let layers = &image.manifest().layers;
    if diff_ids.len() != layers.len() {
        return Err(GeranosError::MalformedManifest(format!(
            "mismatch between diffIDs ({}) and manifest layers ({})",
            diff_ids.len(),
            layers.len()
        )));
    }

    let mut segment_descriptors = Vec::with_capacity(layers.len());
    for (layer, diff_id) in layers.iter().zip(diff_ids.iter()) {
        segment_descriptors.push(SegmentDescriptor::parse(layer, Some(diff_id.clone()))?);
    }

    Ok(DirImage::new(PathBuf::new(), image, segment_descriptors))
}
