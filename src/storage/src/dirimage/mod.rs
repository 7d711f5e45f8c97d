//! The directory-backed OCI image.
//!
//! A `DirImage` is the pivot between a local directory of large data files
//! and a materialized OCI image (manifest + config + segment layers). It is
//! constructed either by [`read`]ing a directory (hashing its files) or by
//! [`convert`]ing an externally obtained image into segment descriptors,
//! and it can [`write`](DirImage::write) its content back into a directory.
//!
//! [`read`]: crate::dirimage::read
//! [`convert`]: crate::dirimage::convert

mod convert;
mod options;
mod placeholder;
mod read;
mod write;

pub use convert::convert;
pub use options::DirImageOptions;
pub use read::read;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use geranos_core::{GeranosError, Result};

use crate::filesegment::SegmentDescriptor;
use crate::image::Image;
use crate::oci::{Hash, Manifest};

/// Manifest sidecar filename inside an image directory.
pub const LOCAL_MANIFEST_FILENAME: &str = ".oci.manifest.json";

/// Config sidecar filename inside an image directory.
pub const LOCAL_CONFIG_FILENAME: &str = ".oci.config.json";

/// An OCI image bound to a directory, with the per-operation byte counters
/// the layout mapper folds into its statistics.
pub struct DirImage {
    image: Image,
    directory: PathBuf,
    segment_descriptors: Vec<SegmentDescriptor>,

    bytes_read_count: Arc<AtomicI64>,
    bytes_written_count: Arc<AtomicI64>,
    bytes_skipped_count: Arc<AtomicI64>,
}

impl DirImage {
    pub(crate) fn new(
        directory: PathBuf,
        image: Image,
        segment_descriptors: Vec<SegmentDescriptor>,
    ) -> DirImage {
        DirImage {
            image,
            directory,
            segment_descriptors,
            bytes_read_count: Arc::new(AtomicI64::new(0)),
            bytes_written_count: Arc::new(AtomicI64::new(0)),
            bytes_skipped_count: Arc::new(AtomicI64::new(0)),
        }
    }

    /// The materialized image.
    pub fn image(&self) -> &Image {
        &self.image
    }

    /// Consume this value, keeping only the image.
    pub fn into_image(self) -> Image {
        self.image
    }

    /// Directory this image was read from (empty for converted images).
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Segment descriptors in manifest layer order.
    pub fn segment_descriptors(&self) -> &[SegmentDescriptor] {
        &self.segment_descriptors
    }

    /// Total uncompressed length of all segments in bytes.
    pub fn length(&self) -> i64 {
        self.segment_descriptors.iter().map(|d| d.length()).sum()
    }

    pub fn bytes_read(&self) -> i64 {
        self.bytes_read_count.load(Ordering::Relaxed)
    }

    pub fn bytes_written(&self) -> i64 {
        self.bytes_written_count.load(Ordering::Relaxed)
    }

    pub fn bytes_skipped(&self) -> i64 {
        self.bytes_skipped_count.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for DirImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirImage")
            .field("directory", &self.directory)
            .field("segments", &self.segment_descriptors.len())
            .finish()
    }
}

/// Parse the manifest sidecar of an image directory.
pub fn read_manifest(dir: &Path) -> Result<Manifest> {
    let path = dir.join(LOCAL_MANIFEST_FILENAME);
    let data = std::fs::read(&path).map_err(|e| GeranosError::MissingFile {
        path: format!("{} ({e})", path.display()),
    })?;
    Manifest::from_slice(&data)
}

/// Digest of the manifest sidecar: SHA-256 over the canonical serialization
/// of the parsed manifest. Equals [`Image::digest`] for images whose bytes
/// this engine produced.
pub fn read_digest(dir: &Path) -> Result<Hash> {
    let manifest = read_manifest(dir)?;
    Ok(Hash::sha256_of_bytes(&manifest.to_vec()?))
}

pub(crate) fn join_error(e: tokio::task::JoinError) -> GeranosError {
    GeranosError::Io(std::io::Error::other(format!("worker task failed: {e}")))
}
