use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use geranos_core::{GeranosError, Result};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::filesegment::{segment_writer, SegmentDescriptor};
use crate::image::Layer;
use crate::progress::ProgressUpdate;
use crate::sparsefile;

use super::{
    join_error, DirImage, DirImageOptions, LOCAL_CONFIG_FILENAME, LOCAL_MANIFEST_FILENAME,
};

impl DirImage {
    /// Persist this image's content into `destination`.
    ///
    /// One job per segment descriptor runs on a bounded worker pool:
    /// segments whose on-disk bytes already match are skipped, the rest are
    /// streamed through a sparse copy into the data file at the segment
    /// offset, with transient network errors retried. After all workers
    /// drain, the manifest and config sidecars are written and each data
    /// file is truncated to its manifest size. Content lands before the
    /// sidecars do, so an interrupted write leaves no valid sidecar pair
    /// and the next attempt reconciles.
    ///
    /// Two concurrent writes into the same directory are unsupported;
    /// callers serialize them.
    pub async fn write(
        &self,
        token: &CancellationToken,
        destination: &Path,
        opts: &DirImageOptions,
    ) -> Result<()> {
        let bytes_total: i64 = self.length();
        let semaphore = Arc::new(Semaphore::new(opts.worker_count.max(1)));
        let mut join_set = JoinSet::new();

        for descriptor in &self.segment_descriptors {
            let layer = self.image.layer_by_digest(descriptor.digest())?;

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

            let job = SegmentJob {
                descriptor: descriptor.clone(),
                layer,
                destination: destination.to_path_buf(),
                retry_count: opts.network_failure_retry_count,
                progress: opts.progress.clone(),
                bytes_total,
                bytes_read: Arc::clone(&self.bytes_read_count),
                bytes_written: Arc::clone(&self.bytes_written_count),
                bytes_skipped: Arc::clone(&self.bytes_skipped_count),
            };
            join_set.spawn(async move {
                let _permit = permit;
                tokio::task::spawn_blocking(move || job.run())
                    .await
                    .map_err(join_error)?
            });
        }

        while let Some(joined) = join_set.join_next().await {
            joined.map_err(join_error)??;
        }

        self.write_config_and_manifest(destination)?;
        truncate_files(destination, &self.segment_descriptors)?;
        Ok(())
    }

    /// Rewrite only the two sidecars. Used by rehash after out-of-band
    /// content edits, and by `write` once content has landed.
    pub fn write_config_and_manifest(&self, destination: &Path) -> Result<()> {
        let manifest_path = destination.join(LOCAL_MANIFEST_FILENAME);
        std::fs::write(&manifest_path, self.image.raw_manifest())?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&manifest_path, std::fs::Permissions::from_mode(0o777))?;
        }
        std::fs::write(
            destination.join(LOCAL_CONFIG_FILENAME),
            self.image.raw_config(),
        )?;
        Ok(())
    }
}

/// State for writing one segment; runs on a blocking worker.
struct SegmentJob {
    descriptor: SegmentDescriptor,
    layer: Arc<dyn Layer>,
    destination: PathBuf,
    retry_count: usize,
    progress: Option<tokio::sync::mpsc::Sender<ProgressUpdate>>,
    bytes_total: i64,
    bytes_read: Arc<AtomicI64>,
    bytes_written: Arc<AtomicI64>,
    bytes_skipped: Arc<AtomicI64>,
}

impl SegmentJob {
    fn run(self) -> Result<()> {
        let processed = self
            .bytes_read
            .fetch_add(self.descriptor.length(), Ordering::Relaxed)
            + self.descriptor.length();
        if let Some(ref progress) = self.progress {
            // Dropped when the channel is full; progress is advisory
            let _ = progress.try_send(ProgressUpdate {
                bytes_processed: processed,
                bytes_total: self.bytes_total,
            });
        }

        if self.descriptor.matches(&self.destination) {
            tracing::debug!(segment = %self.descriptor, "existing layer");
            self.bytes_skipped
                .fetch_add(self.descriptor.length(), Ordering::Relaxed);
            return Ok(());
        }

        let mut attempt = 0;
        loop {
            match self.write_once() {
                Ok((written, skipped)) => {
                    tracing::debug!(
                        segment = %self.descriptor,
                        written,
                        skipped,
                        "downloaded layer"
                    );
                    self.bytes_written.fetch_add(written as i64, Ordering::Relaxed);
                    self.bytes_skipped.fetch_add(skipped as i64, Ordering::Relaxed);
                    return Ok(());
                }
                Err(e) if e.is_transient() && attempt + 1 < self.retry_count => {
                    attempt += 1;
                    tracing::warn!(
                        segment = %self.descriptor,
                        attempt,
                        error = %e,
                        "transient network failure, retrying segment"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        segment = %self.descriptor,
                        offset = self.descriptor.start(),
                        error = %e,
                        "failed writing segment"
                    );
                    return Err(e);
                }
            }
        }
    }

    fn write_once(&self) -> Result<(u64, u64)> {
        let mut src = self.layer.uncompressed()?;
        let mut dst = segment_writer(&self.destination, &self.descriptor)?;
        let (written, skipped) = sparsefile::copy(&mut dst, &mut src)?;
        if written + skipped != self.descriptor.length() as u64 {
            return Err(GeranosError::IntegrityFailure {
                expected: format!("{} bytes", self.descriptor.length()),
                actual: format!("{} bytes written+skipped", written + skipped),
            });
        }
        Ok((written, skipped))
    }
}

/// Shrink every data file to `max(stop)+1` across its segments. This is
/// how a scaffold larger than the target loses its tail.
fn truncate_files(destination: &Path, descriptors: &[SegmentDescriptor]) -> Result<()> {
    let mut sizes: HashMap<&str, i64> = HashMap::new();
    for d in descriptors {
        let size = sizes.entry(d.filename()).or_insert(0);
        *size = (*size).max(d.stop() + 1);
    }
    for (filename, size) in sizes {
        let path = destination.join(filename);
        let file = std::fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .map_err(|e| {
                GeranosError::Io(std::io::Error::new(
                    e.kind(),
                    format!("error while truncating file '{filename}': {e}"),
                ))
            })?;
        file.set_len(size as u64)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dirimage;
    use crate::oci::Hash;

    fn options(chunk_size: i64) -> DirImageOptions {
        DirImageOptions::default()
            .with_chunk_size(chunk_size)
            .with_worker_count(2)
    }

    async fn read_image(dir: &Path, chunk_size: i64) -> DirImage {
        let token = CancellationToken::new();
        dirimage::read(&token, dir, &options(chunk_size))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_write_round_trip() {
        let src_dir = tempfile::tempdir().unwrap();
        std::fs::write(src_dir.path().join("disk.img"), b"0123456789abcdef").unwrap();

        let img = read_image(src_dir.path(), 4).await;
        let converted = dirimage::convert(img.into_image()).unwrap();

        let dst_dir = tempfile::tempdir().unwrap();
        let token = CancellationToken::new();
        converted
            .write(&token, dst_dir.path(), &options(4))
            .await
            .unwrap();

        assert_eq!(
            std::fs::read(dst_dir.path().join("disk.img")).unwrap(),
            b"0123456789abcdef"
        );
        assert!(dst_dir.path().join(LOCAL_MANIFEST_FILENAME).exists());
        assert!(dst_dir.path().join(LOCAL_CONFIG_FILENAME).exists());
    }

    #[tokio::test]
    async fn test_write_sidecars_match_image_bytes() {
        let src_dir = tempfile::tempdir().unwrap();
        std::fs::write(src_dir.path().join("disk.img"), b"some data here").unwrap();

        let img = read_image(src_dir.path(), 5).await;
        let raw_manifest = img.image().raw_manifest().to_vec();
        let raw_config = img.image().raw_config().to_vec();
        let converted = dirimage::convert(img.into_image()).unwrap();

        let dst_dir = tempfile::tempdir().unwrap();
        let token = CancellationToken::new();
        converted
            .write(&token, dst_dir.path(), &options(5))
            .await
            .unwrap();

        assert_eq!(
            std::fs::read(dst_dir.path().join(LOCAL_MANIFEST_FILENAME)).unwrap(),
            raw_manifest
        );
        assert_eq!(
            std::fs::read(dst_dir.path().join(LOCAL_CONFIG_FILENAME)).unwrap(),
            raw_config
        );
    }

    #[tokio::test]
    async fn test_second_write_skips_everything() {
        let src_dir = tempfile::tempdir().unwrap();
        std::fs::write(src_dir.path().join("disk.img"), vec![5u8; 1000]).unwrap();

        let img = read_image(src_dir.path(), 100).await;
        let dst_dir = tempfile::tempdir().unwrap();
        let token = CancellationToken::new();

        let first = dirimage::convert(img.image().clone()).unwrap();
        first.write(&token, dst_dir.path(), &options(100)).await.unwrap();
        assert_eq!(first.bytes_written(), 1000);

        let second = dirimage::convert(img.into_image()).unwrap();
        second.write(&token, dst_dir.path(), &options(100)).await.unwrap();
        assert_eq!(second.bytes_written(), 0);
        assert_eq!(second.bytes_skipped(), 1000);
    }

    #[tokio::test]
    async fn test_write_truncates_oversized_scaffold() {
        let src_dir = tempfile::tempdir().unwrap();
        std::fs::write(src_dir.path().join("disk.img"), b"0123456789").unwrap();
        let img = read_image(src_dir.path(), 4).await;

        // Destination already has a longer file with the right prefix
        let dst_dir = tempfile::tempdir().unwrap();
        std::fs::write(dst_dir.path().join("disk.img"), b"0123456789EXTRA").unwrap();

        let converted = dirimage::convert(img.into_image()).unwrap();
        let token = CancellationToken::new();
        converted
            .write(&token, dst_dir.path(), &options(4))
            .await
            .unwrap();

        assert_eq!(
            std::fs::read(dst_dir.path().join("disk.img")).unwrap(),
            b"0123456789"
        );
    }

    #[tokio::test]
    async fn test_write_repairs_corrupted_region() {
        let src_dir = tempfile::tempdir().unwrap();
        std::fs::write(src_dir.path().join("disk.img"), b"0123456789").unwrap();
        let img = read_image(src_dir.path(), 5).await;

        let dst_dir = tempfile::tempdir().unwrap();
        std::fs::write(dst_dir.path().join("disk.img"), b"01234XXXXX").unwrap();

        let converted = dirimage::convert(img.into_image()).unwrap();
        let token = CancellationToken::new();
        converted
            .write(&token, dst_dir.path(), &options(5))
            .await
            .unwrap();

        assert_eq!(
            std::fs::read(dst_dir.path().join("disk.img")).unwrap(),
            b"0123456789"
        );
        // First segment matched, second was rewritten
        assert_eq!(converted.bytes_written(), 5);
        assert_eq!(converted.bytes_skipped(), 5);
    }

    #[tokio::test]
    async fn test_write_sparse_content_produces_exact_length() {
        let src_dir = tempfile::tempdir().unwrap();
        let mut content = b"start".to_vec();
        content.extend_from_slice(&vec![0u8; 500_000]);
        content.extend_from_slice(b"end");
        std::fs::write(src_dir.path().join("disk.img"), &content).unwrap();

        let img = read_image(src_dir.path(), 128 * 1024).await;
        let dst_dir = tempfile::tempdir().unwrap();
        let converted = dirimage::convert(img.into_image()).unwrap();
        let token = CancellationToken::new();
        converted
            .write(&token, dst_dir.path(), &DirImageOptions::default())
            .await
            .unwrap();

        let written = std::fs::read(dst_dir.path().join("disk.img")).unwrap();
        assert_eq!(written.len(), content.len());
        assert_eq!(
            Hash::sha256_of_bytes(&written),
            Hash::sha256_of_bytes(&content)
        );
    }

    #[tokio::test]
    async fn test_write_cancelled() {
        let src_dir = tempfile::tempdir().unwrap();
        std::fs::write(src_dir.path().join("disk.img"), vec![1u8; 100]).unwrap();
        let img = read_image(src_dir.path(), 10).await;

        let dst_dir = tempfile::tempdir().unwrap();
        let converted = dirimage::convert(img.into_image()).unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let result = converted.write(&token, dst_dir.path(), &options(10)).await;
        assert!(matches!(result.unwrap_err(), GeranosError::Cancelled));
    }

    #[tokio::test]
    async fn test_write_reports_progress() {
        let src_dir = tempfile::tempdir().unwrap();
        std::fs::write(src_dir.path().join("disk.img"), vec![2u8; 100]).unwrap();
        let img = read_image(src_dir.path(), 10).await;

        let (tx, mut rx) = tokio::sync::mpsc::channel(64);
        let opts = options(10).with_progress_channel(tx);

        let dst_dir = tempfile::tempdir().unwrap();
        let converted = dirimage::convert(img.into_image()).unwrap();
        let token = CancellationToken::new();
        converted.write(&token, dst_dir.path(), &opts).await.unwrap();
        drop(converted);

        let mut updates = Vec::new();
        while let Ok(update) = rx.try_recv() {
            updates.push(update);
        }
        assert!(!updates.is_empty());
        assert!(updates.iter().all(|u| u.bytes_total == 100));
        assert!(updates.iter().any(|u| u.bytes_processed == 100));
    }
}
