use std::collections::BTreeMap;
use std::path::Path;

use geranos_core::{GeranosError, Result};

use crate::image::Layer;
use crate::oci::{Descriptor, Hash, SEGMENT_MEDIA_TYPE};

use super::{SegmentLayer, FILENAME_ANNOTATION_KEY, RANGE_ANNOTATION_KEY};

/// A file segment reconstructed from a manifest layer entry: identity and
/// digests only, no access to bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentDescriptor {
    filename: String,
    start: i64,
    stop: i64,
    digest: Hash,
    diff_id: Option<Hash>,
}

impl SegmentDescriptor {
    pub fn new(
        filename: impl Into<String>,
        start: i64,
        stop: i64,
        digest: Hash,
        diff_id: Option<Hash>,
    ) -> SegmentDescriptor {
        SegmentDescriptor {
            filename: filename.into(),
            start,
            stop,
            digest,
            diff_id,
        }
    }

    /// Parse a manifest layer descriptor into a segment descriptor.
    ///
    /// Rejects layers that do not carry the segment media type or either of
    /// the two identity annotations. The diff ID comes from the config's
    /// RootFS when one is available (read path); candidate scanning passes
    /// `None`.
    pub fn parse(descriptor: &Descriptor, diff_id: Option<Hash>) -> Result<SegmentDescriptor> {
        if descriptor.media_type != SEGMENT_MEDIA_TYPE {
            return Err(GeranosError::MalformedManifest(format!(
                "unsupported layer type '{}'",
                descriptor.media_type
            )));
        }
        let filename = descriptor
            .annotations
            .get(FILENAME_ANNOTATION_KEY)
            .ok_or_else(|| {
                GeranosError::MalformedManifest("missing filename annotation".to_string())
            })?;
        let range = descriptor
            .annotations
            .get(RANGE_ANNOTATION_KEY)
            .ok_or_else(|| {
                GeranosError::MalformedManifest("missing range annotation".to_string())
            })?;
        let (start, stop) = parse_range(range)?;
        Ok(SegmentDescriptor {
            filename: filename.clone(),
            start,
            stop,
            digest: descriptor.digest.clone(),
            diff_id,
        })
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn start(&self) -> i64 {
        self.start
    }

    pub fn stop(&self) -> i64 {
        self.stop
    }

    pub fn digest(&self) -> &Hash {
        &self.digest
    }

    pub fn diff_id(&self) -> Option<&Hash> {
        self.diff_id.as_ref()
    }

    /// Number of bytes in this segment.
    pub fn length(&self) -> i64 {
        self.stop - self.start + 1
    }

    pub fn annotations(&self) -> BTreeMap<String, String> {
        let mut annotations = BTreeMap::new();
        annotations.insert(FILENAME_ANNOTATION_KEY.to_string(), self.filename.clone());
        annotations.insert(
            RANGE_ANNOTATION_KEY.to_string(),
            format!("{}-{}", self.start, self.stop),
        );
        annotations
    }

    /// Content-identity check: does `dir/filename` already hold bytes whose
    /// compressed digest equals this descriptor's digest over the same
    /// range? Any error (missing file, short file, I/O) is a non-match.
    pub fn matches(&self, dir: &Path) -> bool {
        let path = dir.join(&self.filename);
        let Ok(layer) = SegmentLayer::with_range(&path, self.start, self.stop) else {
            return false;
        };
        match layer.digest() {
            Ok(digest) => digest == self.digest,
            Err(_) => false,
        }
    }
}

impl std::fmt::Display for SegmentDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "segment of '{}' range[{}-{}]",
            self.filename, self.start, self.stop
        )
    }
}

/// Parse a string formatted as `<int>-<int>` into its two numbers.
fn parse_range(s: &str) -> Result<(i64, i64)> {
    let parts: Vec<&str> = s.split('-').collect();
    if parts.len() != 2 {
        return Err(GeranosError::MalformedManifest(format!(
            "invalid range '{s}': expected '<int>-<int>'"
        )));
    }
    let start = parts[0].parse::<i64>().map_err(|_| {
        GeranosError::MalformedManifest(format!("invalid range '{s}': bad start integer"))
    })?;
    let stop = parts[1].parse::<i64>().map_err(|_| {
        GeranosError::MalformedManifest(format!("invalid range '{s}': bad stop integer"))
    })?;
    Ok((start, stop))
}
