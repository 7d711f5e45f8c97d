//! File segments: fixed-offset byte ranges of local files, each acting as
//! an independently content-addressed OCI layer.
//!
//! A [`SegmentLayer`] is backed by a real file and can produce its bytes;
//! a [`SegmentDescriptor`] is the same range reconstructed from a manifest
//! entry. Segment identity travels in two layer annotations: the data
//! file's basename and the inclusive `start-stop` byte range.

mod descriptor;
mod layer;
mod reader;
mod split;
mod writer;

pub use descriptor::SegmentDescriptor;
pub use layer::SegmentLayer;
pub use split::split;
pub use writer::segment_writer;

/// Annotation key carrying the data file's basename.
pub const FILENAME_ANNOTATION_KEY: &str = "filename";

/// Annotation key carrying the inclusive `start-stop` byte range.
pub const RANGE_ANNOTATION_KEY: &str = "range";
