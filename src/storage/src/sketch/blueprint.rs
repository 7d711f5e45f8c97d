use std::collections::HashMap;

use geranos_core::{GeranosError, Result};

use crate::filesegment::SegmentDescriptor;
use crate::oci::Manifest;

/// The ordered, gap-free reconstruction of one data file from the segments
/// a manifest describes.
#[derive(Debug, Clone)]
pub struct FileBlueprint {
    filename: String,
    segments: Vec<SegmentDescriptor>,
}

impl FileBlueprint {
    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn segments(&self) -> &[SegmentDescriptor] {
        &self.segments
    }

    /// Total file size: one past the last segment's stop offset.
    pub fn size(&self) -> i64 {
        match self.segments.last() {
            Some(segment) => segment.stop() + 1,
            None => 0,
        }
    }

    /// A blueprint is valid when its segments cover `[0, size)` contiguously
    /// with no gaps or overlaps.
    pub fn validate(&self) -> Result<()> {
        if self.segments.is_empty() {
            return Err(GeranosError::MalformedManifest("0 segments".to_string()));
        }
        if self.segments[0].start() != 0 {
            return Err(GeranosError::MalformedManifest(
                "first segment does not start from 0".to_string(),
            ));
        }
        let mut last = self.segments[0].stop();
        for (i, segment) in self.segments.iter().enumerate().skip(1) {
            if segment.start() != last + 1 {
                return Err(GeranosError::MalformedManifest(format!(
                    "segment #{i} has invalid start position {}, expected {}",
                    segment.start(),
                    last + 1
                )));
            }
            if segment.stop() < segment.start() {
                return Err(GeranosError::MalformedManifest(format!(
                    "segment #{i} has stop value ({}) lower than start value ({})",
                    segment.stop(),
                    segment.start()
                )));
            }
            last = segment.stop();
        }
        Ok(())
    }
}

/// Group a manifest's segment layers into one validated blueprint per
/// distinct filename, preserving first-seen file order.
pub fn blueprints_from_manifest(manifest: &Manifest) -> Result<Vec<FileBlueprint>> {
    let mut order: Vec<String> = Vec::new();
    let mut by_filename: HashMap<String, Vec<SegmentDescriptor>> = HashMap::new();

    for layer in &manifest.layers {
        let descriptor = SegmentDescriptor::parse(layer, None)?;
        let filename = descriptor.filename().to_string();
        if !by_filename.contains_key(&filename) {
            order.push(filename.clone());
        }
        by_filename.entry(filename).or_default().push(descriptor);
    }

    let mut blueprints = Vec::with_capacity(order.len());
    for filename in order {
        let segments = by_filename.remove(&filename).unwrap_or_default();
        let blueprint = FileBlueprint { filename, segments };
        blueprint.validate().map_err(|e| {
            GeranosError::MalformedManifest(format!(
                "file blueprint for '{}' failed with: {e}",
                blueprint.filename
            ))
        })?;
        blueprints.push(blueprint);
    }
    Ok(blueprints)
}
