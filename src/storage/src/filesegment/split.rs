use std::path::Path;

use geranos_core::{GeranosError, Result};

use super::SegmentLayer;

/// Split a file into layers of `chunk_size` bytes at fixed offsets
/// `[0, chunk_size, 2·chunk_size, ...]`; the last layer is clipped to the
/// end of the file. A file smaller than `chunk_size` produces exactly one
/// full-file layer.
pub fn split(path: impl AsRef<Path>, chunk_size: i64) -> Result<Vec<SegmentLayer>> {
    let path = path.as_ref();
    if chunk_size < 1 {
        return Err(GeranosError::BadRange(format!(
            "chunk size must be positive, got {chunk_size}"
        )));
    }
    let size = std::fs::metadata(path)
        .map_err(|e| GeranosError::MissingFile {
            path: format!("{} ({e})", path.display()),
        })?
        .len() as i64;

    if size < chunk_size {
        return Ok(vec![SegmentLayer::new(path)?]);
    }

    let max_idx = size - 1;
    let mut layers = Vec::new();
    let mut start = 0;
    while start <= max_idx {
        let stop = (start + chunk_size - 1).min(max_idx);
        layers.push(SegmentLayer::with_range(path, start, stop)?);
        start += chunk_size;
    }
    Ok(layers)
}
