//! Geranos storage engine.
//!
//! Transports very large, mostly-sparse binary artifacts (typically VM disk
//! images) as OCI images. Files are split into fixed-size segments, each an
//! independently hashed layer, so successive versions of an artifact move
//! only changed bytes over the wire and share unchanged extents on disk via
//! copy-on-write clones.

pub mod bitarray;
pub mod dirimage;
pub mod diskcache;
pub mod duplicator;
pub mod filesegment;
pub mod image;
pub mod layout;
pub mod oci;
pub mod progress;
pub mod sketch;
pub mod sparsefile;
pub mod transport;

pub use geranos_core::{GeranosError, ImageReference, Result};

pub use dirimage::{DirImage, DirImageOptions};
pub use image::{Image, Layer};
pub use layout::{Mapper, Properties, Statistics};
pub use oci::{Hash, ImageConfig, Manifest};
pub use progress::ProgressUpdate;
pub use sketch::Sketcher;
pub use transport::{Registry, Transporter, TransportOptions};

/// Geranos storage engine version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
