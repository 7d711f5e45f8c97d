use std::collections::BTreeMap;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use geranos_core::{GeranosError, Result};
use once_cell::sync::OnceCell;

use crate::image::Layer;
use crate::oci::{Hash, SEGMENT_MEDIA_TYPE};

use super::reader::SectionReader;
use super::{FILENAME_ANNOTATION_KEY, RANGE_ANNOTATION_KEY};

/// zstd compression level used for layer bodies on the wire.
const ZSTD_LEVEL: i32 = 1;

/// Buffer in front of the encoder output. For highly compressible
/// segments the encoder emits a trickle of tiny chunks; batching them
/// keeps network writes full-sized.
const ENCODER_BUF_SIZE: usize = 128 * 1024;

/// A layer backed by the inclusive `[start, stop]` byte range of a local
/// file. File handles are opened per read and released when the reader is
/// dropped; digests are computed once and memoized.
pub struct SegmentLayer {
    path: PathBuf,
    start: i64,
    stop: i64,

    diff_id: OnceCell<Hash>,
    compressed_info: OnceCell<(Hash, i64)>,
}

impl SegmentLayer {
    /// Layer over the whole file.
    pub fn new(path: impl AsRef<Path>) -> Result<SegmentLayer> {
        let path = path.as_ref();
        let size = std::fs::metadata(path)
            .map_err(|e| {
                GeranosError::MissingFile {
                    path: format!("{} ({e})", path.display()),
                }
            })?
            .len() as i64;
        Self::with_range(path, 0, size - 1)
    }

    /// Layer over the inclusive `[start, stop]` range of the file.
    pub fn with_range(path: impl AsRef<Path>, start: i64, stop: i64) -> Result<SegmentLayer> {
        let path = path.as_ref();
        let size = std::fs::metadata(path)
            .map_err(|e| {
                GeranosError::MissingFile {
                    path: format!("{} ({e})", path.display()),
                }
            })?
            .len() as i64;
        if stop >= size {
            return Err(GeranosError::BadRange(format!(
                "provided 'stop' ({stop}) is outside of file size ({size})"
            )));
        }
        if start < 0 || start > stop {
            return Err(GeranosError::BadRange(format!(
                "provided 'start' index ({start}) is out of range"
            )));
        }
        Ok(SegmentLayer {
            path: path.to_path_buf(),
            start,
            stop,
            diff_id: OnceCell::new(),
            compressed_info: OnceCell::new(),
        })
    }

    pub fn start(&self) -> i64 {
        self.start
    }

    pub fn stop(&self) -> i64 {
        self.stop
    }

    /// Number of bytes in this segment.
    pub fn length(&self) -> i64 {
        self.stop - self.start + 1
    }

    fn filename(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn compressed_info(&self) -> Result<&(Hash, i64)> {
        self.compressed_info.get_or_try_init(|| {
            let mut reader = self.compressed()?;
            let (hash, size) = Hash::sha256_of_reader(&mut reader)?;
            tracing::debug!(layer = %self, "calculated compressed layer hash");
            Ok((hash, size as i64))
        })
    }
}

impl Layer for SegmentLayer {
    fn media_type(&self) -> String {
        SEGMENT_MEDIA_TYPE.to_string()
    }

    fn digest(&self) -> Result<Hash> {
        Ok(self.compressed_info()?.0.clone())
    }

    fn diff_id(&self) -> Result<Hash> {
        self.diff_id
            .get_or_try_init(|| {
                let mut reader = self.uncompressed()?;
                let (hash, _) = Hash::sha256_of_reader(&mut reader)?;
                tracing::debug!(layer = %self, "calculated uncompressed layer hash");
                Ok(hash)
            })
            .cloned()
    }

    fn size(&self) -> Result<i64> {
        Ok(self.compressed_info()?.1)
    }

    fn uncompressed(&self) -> Result<Box<dyn Read + Send>> {
        Ok(Box::new(SectionReader::open(
            &self.path, self.start, self.stop,
        )?))
    }

    fn compressed(&self) -> Result<Box<dyn Read + Send>> {
        let uncompressed = self.uncompressed()?;
        let encoder = zstd::stream::read::Encoder::new(uncompressed, ZSTD_LEVEL)?;
        Ok(Box::new(BufReader::with_capacity(ENCODER_BUF_SIZE, encoder)))
    }

    fn annotations(&self) -> BTreeMap<String, String> {
        let mut annotations = BTreeMap::new();
        annotations.insert(FILENAME_ANNOTATION_KEY.to_string(), self.filename());
        annotations.insert(
            RANGE_ANNOTATION_KEY.to_string(),
            format!("{}-{}", self.start, self.stop),
        );
        annotations
    }
}

impl std::fmt::Display for SegmentLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "layer from '{}' range[{}-{}]",
            self.filename(),
            self.start,
            self.stop
        )
    }
}
