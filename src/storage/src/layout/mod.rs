//! The layout mapper: the top-level façade mapping OCI references onto
//! directories under an image root, composing the sketcher and the
//! directory image for every operation.

mod disk_usage;
mod statistics;

pub use disk_usage::directory_disk_usage;
pub use statistics::{Statistics, StatisticsSnapshot};

use std::path::{Path, PathBuf};

use geranos_core::{GeranosError, ImageReference, Result};
use tokio_util::sync::CancellationToken;

use crate::dirimage::{self, DirImageOptions, LOCAL_MANIFEST_FILENAME};
use crate::duplicator;
use crate::image::Image;
use crate::sketch::Sketcher;

/// Listing entry for one image directory under the root.
#[derive(Debug, Clone)]
pub struct Properties {
    pub reference: ImageReference,
    /// Logical size: sum of file sizes under the directory.
    pub size: i64,
    /// Physical usage as reported by the platform utility.
    pub disk_usage: String,
    /// Whether the directory holds a parseable manifest/config pair.
    pub has_manifest: bool,
}

/// Maps references to directories under a root and owns the aggregate
/// transfer statistics.
pub struct Mapper {
    root_dir: PathBuf,
    sketcher: Sketcher,
    options: DirImageOptions,
    stats: Statistics,
}

impl Mapper {
    pub fn new(root_dir: impl Into<PathBuf>) -> Mapper {
        Mapper::with_options(root_dir, DirImageOptions::default())
    }

    pub fn with_options(root_dir: impl Into<PathBuf>, options: DirImageOptions) -> Mapper {
        let root_dir = root_dir.into();
        Mapper {
            sketcher: Sketcher::new(&root_dir, LOCAL_MANIFEST_FILENAME),
            root_dir,
            options,
            stats: Statistics::default(),
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Directory holding the given reference. The reference string is used
    /// as a relative path; on platforms where ':' is not a valid path
    /// character it is swapped for '@'.
    pub fn ref_to_dir(&self, reference: &ImageReference) -> PathBuf {
        let mut name = reference.name();
        if cfg!(windows) {
            name = name.replace(':', "@");
        }
        self.root_dir.join(name)
    }

    /// Write an image under `reference`: sketch a scaffold from prior local
    /// artifacts, then let the directory image reconcile segment by
    /// segment.
    pub async fn write(
        &self,
        token: &CancellationToken,
        image: &Image,
        reference: &ImageReference,
    ) -> Result<()> {
        let destination = self.ref_to_dir(reference);
        std::fs::create_dir_all(&destination).map_err(|e| {
            GeranosError::Io(std::io::Error::new(
                e.kind(),
                format!("unable to create directory for writing: {e}"),
            ))
        })?;

        let source_bytes: i64 = image.manifest().layers.iter().map(|l| l.size).sum();
        self.stats.add(&StatisticsSnapshot {
            source_bytes,
            ..Default::default()
        });

        let sketcher = self.sketcher.clone();
        let manifest = image.manifest().clone();
        let sketch_dir = destination.clone();
        let (bytes_cloned, matched_segments) =
            tokio::task::spawn_blocking(move || sketcher.sketch(&sketch_dir, &manifest))
                .await
                .map_err(dirimage::join_error)??;
        self.stats.add(&StatisticsSnapshot {
            bytes_cloned,
            matched_segments,
            ..Default::default()
        });

        let converted = dirimage::convert(image.clone())?;
        converted.write(token, &destination, &self.options).await?;
        self.stats.add(&StatisticsSnapshot {
            bytes_written: converted.bytes_written(),
            bytes_skipped: converted.bytes_skipped(),
            bytes_read: converted.bytes_read(),
            ..Default::default()
        });
        Ok(())
    }

    /// Write only if the locally stored manifest digest differs from the
    /// image's digest. The comparison uses an omit-content read, so a
    /// present and identical image costs two sidecar parses.
    pub async fn write_if_not_present(
        &self,
        token: &CancellationToken,
        image: &Image,
        reference: &ImageReference,
    ) -> Result<()> {
        let dir = self.ref_to_dir(reference);
        let omit_opts = self.options.clone().with_omit_layer_content(true);
        if let Ok(local) = dirimage::read(token, &dir, &omit_opts).await {
            if local.image().digest() == image.digest() {
                tracing::info!(
                    reference = %reference,
                    digest = %image.digest(),
                    "image already present, skipping write"
                );
                return Ok(());
            }
        }
        self.write(token, image, reference).await
    }

    /// Read the reference's directory into a materialized image.
    pub async fn read(
        &self,
        token: &CancellationToken,
        reference: &ImageReference,
    ) -> Result<Image> {
        let dir = self.ref_to_dir(reference);
        let dir_image = dirimage::read(token, &dir, &self.options).await?;
        self.stats.add(&StatisticsSnapshot {
            bytes_read: dir_image.bytes_read(),
            ..Default::default()
        });
        Ok(dir_image.into_image())
    }

    /// Re-read content and rewrite the manifest/config sidecars. Used
    /// after out-of-band edits to the data files.
    pub async fn rehash(
        &self,
        token: &CancellationToken,
        reference: &ImageReference,
    ) -> Result<()> {
        let dir = self.ref_to_dir(reference);
        let dir_image = dirimage::read(token, &dir, &self.options).await?;
        self.stats.add(&StatisticsSnapshot {
            bytes_read: dir_image.bytes_read(),
            ..Default::default()
        });
        dir_image.write_config_and_manifest(&dir)
    }

    /// Reflink-clone one reference's directory to another.
    pub fn clone_ref(&self, src: &ImageReference, dst: &ImageReference) -> Result<()> {
        duplicator::clone_directory(&self.ref_to_dir(src), &self.ref_to_dir(dst), true)
    }

    /// Remove a reference's directory. The reference is re-validated with
    /// strict parsing first so a malformed value cannot escape the root.
    pub fn remove(&self, reference: &ImageReference) -> Result<()> {
        let validated = ImageReference::parse_strict(&reference.name())?;
        let dir = self.ref_to_dir(&validated);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Clone an arbitrary flat directory into the layout under `reference`.
    pub fn adopt(
        &self,
        src: &Path,
        reference: &ImageReference,
        fail_on_subdirectories: bool,
    ) -> Result<()> {
        let flat = is_dir_with_only_files(src)?;
        if !flat {
            if fail_on_subdirectories {
                return Err(GeranosError::Unsupported(
                    "directories with subdirectories are not supported".to_string(),
                ));
            }
            tracing::warn!(src = %src.display(), "subdirectories will be ignored");
        }
        duplicator::clone_directory(src, &self.ref_to_dir(reference), false)
    }

    /// True if a directory exists for the reference, regardless of its
    /// contents.
    pub fn contains_any(&self, reference: &ImageReference) -> Result<bool> {
        match std::fs::metadata(self.ref_to_dir(reference)) {
            Ok(meta) => Ok(meta.is_dir()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Enumerate every directory under the root whose relative path parses
    /// as a strict reference.
    pub async fn list(&self) -> Result<Vec<Properties>> {
        let mut directories = Vec::new();
        collect_directories(&self.root_dir, &mut directories)?;

        let token = CancellationToken::new();
        let omit_opts = self.options.clone().with_omit_layer_content(true);
        let mut entries = Vec::new();
        for dir in directories {
            let Some(reference) = self.dir_to_ref(&dir) else {
                continue;
            };
            let size = directory_size(&dir).unwrap_or(-1);
            let disk_usage = directory_disk_usage(&dir)?;
            let has_manifest = dirimage::read(&token, &dir, &omit_opts).await.is_ok();
            entries.push(Properties {
                reference,
                size,
                disk_usage,
                has_manifest,
            });
        }
        Ok(entries)
    }

    /// Aggregate statistics snapshot.
    pub fn stats(&self) -> StatisticsSnapshot {
        self.stats.snapshot()
    }

    /// Reset the aggregate statistics to zero.
    pub fn clear_stats(&self) {
        self.stats.clear();
    }

    /// Reverse of [`ref_to_dir`](Mapper::ref_to_dir): parse a directory
    /// path back into a reference, if it is one.
    fn dir_to_ref(&self, dir: &Path) -> Option<ImageReference> {
        let rel = dir.strip_prefix(&self.root_dir).ok()?;
        let mut rel = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if cfg!(windows) {
            // Written with ':' swapped for '@'; undo the tag separator
            if let Some(at) = rel.rfind('@') {
                if !rel[at..].starts_with("@sha256") {
                    rel.replace_range(at..at + 1, ":");
                }
            }
        }
        ImageReference::parse_strict(&rel).ok()
    }
}

/// True when `path` is a directory containing no subdirectories.
fn is_dir_with_only_files(path: &Path) -> Result<bool> {
    let meta = std::fs::metadata(path)?;
    if !meta.is_dir() {
        return Ok(false);
    }
    for entry in std::fs::read_dir(path)? {
        if entry?.path().is_dir() {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Logical directory size: sum of file sizes, recursively.
fn directory_size(path: &Path) -> Result<i64> {
    let mut size: i64 = 0;
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        let entry_path = entry.path();
        if entry_path.is_dir() {
            size += directory_size(&entry_path)?;
        } else {
            size += entry.metadata()?.len() as i64;
        }
    }
    Ok(size)
}

fn collect_directories(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            out.push(path.clone());
            collect_directories(&path, out)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_options() -> DirImageOptions {
        DirImageOptions::default()
            .with_chunk_size(16)
            .with_worker_count(2)
    }

    fn reference(s: &str) -> ImageReference {
        ImageReference::parse_strict(s).unwrap()
    }

    async fn read_source_image(content: &[u8]) -> (tempfile::TempDir, Image) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("disk.img"), content).unwrap();
        let token = CancellationToken::new();
        let image = dirimage::read(&token, dir.path(), &test_options())
            .await
            .unwrap()
            .into_image();
        (dir, image)
    }

    #[test]
    fn test_ref_to_dir_joins_reference_path() {
        let mapper = Mapper::new("/images");
        let dir = mapper.ref_to_dir(&reference("ghcr.io/vm/disk:v1"));
        if cfg!(windows) {
            assert!(dir.to_string_lossy().ends_with("ghcr.io/vm/disk@v1"));
        } else {
            assert_eq!(dir, PathBuf::from("/images/ghcr.io/vm/disk:v1"));
        }
    }

    #[tokio::test]
    async fn test_write_then_read_round_trip() {
        let (_src, image) = read_source_image(b"0123456789abcdef0123456789abcdef").await;
        let root = tempfile::tempdir().unwrap();
        let mapper = Mapper::with_options(root.path(), test_options());
        let token = CancellationToken::new();
        let r = reference("localhost/vm/disk:v1");

        mapper.write(&token, &image, &r).await.unwrap();
        let read_back = mapper.read(&token, &r).await.unwrap();

        assert_eq!(read_back.digest(), image.digest());
        assert_eq!(read_back.raw_manifest(), image.raw_manifest());
    }

    #[tokio::test]
    async fn test_second_write_uses_scaffold() {
        let content: Vec<u8> = (0u8..=255).cycle().take(256).collect();
        let (_src, image) = read_source_image(&content).await;
        let root = tempfile::tempdir().unwrap();
        let mapper = Mapper::with_options(root.path(), test_options());
        let token = CancellationToken::new();

        mapper
            .write(&token, &image, &reference("localhost/vm/disk:v1"))
            .await
            .unwrap();
        let after_first = mapper.stats();
        assert_eq!(after_first.bytes_written, 256);
        assert_eq!(after_first.bytes_cloned, 0);

        mapper
            .write(&token, &image, &reference("localhost/vm/disk:v2"))
            .await
            .unwrap();
        let after_second = mapper.stats();
        // The clone provided every byte; nothing new was written
        assert_eq!(after_second.bytes_written, 256);
        assert_eq!(after_second.bytes_cloned, 256);
        assert_eq!(after_second.matched_segments, 16);
    }

    #[tokio::test]
    async fn test_write_if_not_present_skips_identical() {
        let (_src, image) = read_source_image(b"payload-payload-payload").await;
        let root = tempfile::tempdir().unwrap();
        let mapper = Mapper::with_options(root.path(), test_options());
        let token = CancellationToken::new();
        let r = reference("localhost/vm/disk:v1");

        mapper.write(&token, &image, &r).await.unwrap();
        let before = mapper.stats();

        mapper.write_if_not_present(&token, &image, &r).await.unwrap();
        let after = mapper.stats();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_write_if_not_present_writes_when_absent() {
        let (_src, image) = read_source_image(b"some fresh content").await;
        let root = tempfile::tempdir().unwrap();
        let mapper = Mapper::with_options(root.path(), test_options());
        let token = CancellationToken::new();
        let r = reference("localhost/vm/disk:v1");

        mapper.write_if_not_present(&token, &image, &r).await.unwrap();
        assert!(mapper.ref_to_dir(&r).join("disk.img").exists());
    }

    #[tokio::test]
    async fn test_rehash_refreshes_sidecars_after_edit() {
        let (_src, image) = read_source_image(b"original content").await;
        let root = tempfile::tempdir().unwrap();
        let mapper = Mapper::with_options(root.path(), test_options());
        let token = CancellationToken::new();
        let r = reference("localhost/vm/disk:v1");

        mapper.write(&token, &image, &r).await.unwrap();
        let dir = mapper.ref_to_dir(&r);
        let before = dirimage::read_digest(&dir).unwrap();

        // Out-of-band edit
        std::fs::write(dir.join("disk.img"), b"edited content!!").unwrap();
        mapper.rehash(&token, &r).await.unwrap();

        let after = dirimage::read_digest(&dir).unwrap();
        assert_ne!(before, after);

        // The refreshed sidecars describe the edited content
        let reread = mapper.read(&token, &r).await.unwrap();
        assert_eq!(&after, reread.digest());
    }

    #[tokio::test]
    async fn test_clone_ref() {
        let (_src, image) = read_source_image(b"cloneable content").await;
        let root = tempfile::tempdir().unwrap();
        let mapper = Mapper::with_options(root.path(), test_options());
        let token = CancellationToken::new();
        let src = reference("localhost/vm/disk:v1");
        let dst = reference("localhost/vm/disk:v2");

        mapper.write(&token, &image, &src).await.unwrap();
        mapper.clone_ref(&src, &dst).unwrap();

        let cloned = mapper.read(&token, &dst).await.unwrap();
        assert_eq!(cloned.digest(), image.digest());
    }

    #[tokio::test]
    async fn test_remove() {
        let (_src, image) = read_source_image(b"removable").await;
        let root = tempfile::tempdir().unwrap();
        let mapper = Mapper::with_options(root.path(), test_options());
        let token = CancellationToken::new();
        let r = reference("localhost/vm/disk:v1");

        mapper.write(&token, &image, &r).await.unwrap();
        assert!(mapper.contains_any(&r).unwrap());

        mapper.remove(&r).unwrap();
        assert!(!mapper.contains_any(&r).unwrap());

        // Removing again is not an error
        mapper.remove(&r).unwrap();
    }

    #[tokio::test]
    async fn test_adopt_flat_directory() {
        let root = tempfile::tempdir().unwrap();
        let foreign = tempfile::tempdir().unwrap();
        std::fs::write(foreign.path().join("disk.img"), b"adopted bytes").unwrap();

        let mapper = Mapper::with_options(root.path(), test_options());
        let r = reference("localhost/vm/adopted:v1");
        mapper.adopt(foreign.path(), &r, true).unwrap();

        assert_eq!(
            std::fs::read(mapper.ref_to_dir(&r).join("disk.img")).unwrap(),
            b"adopted bytes"
        );

        // Adopted content has no sidecars until rehash
        let token = CancellationToken::new();
        mapper.rehash(&token, &r).await.unwrap();
        let image = mapper.read(&token, &r).await.unwrap();
        assert_eq!(image.manifest().layers.len(), 1);
    }

    #[tokio::test]
    async fn test_adopt_rejects_subdirectories_when_asked() {
        let root = tempfile::tempdir().unwrap();
        let foreign = tempfile::tempdir().unwrap();
        std::fs::create_dir(foreign.path().join("nested")).unwrap();

        let mapper = Mapper::with_options(root.path(), test_options());
        let r = reference("localhost/vm/adopted:v1");
        let result = mapper.adopt(foreign.path(), &r, true);
        assert!(matches!(result.unwrap_err(), GeranosError::Unsupported(_)));
    }

    #[tokio::test]
    async fn test_list_reports_written_images() {
        let (_src, image) = read_source_image(b"list me please!!").await;
        let root = tempfile::tempdir().unwrap();
        let mapper = Mapper::with_options(root.path(), test_options());
        let token = CancellationToken::new();

        mapper
            .write(&token, &image, &reference("localhost/vm/disk:v1"))
            .await
            .unwrap();
        mapper
            .write(&token, &image, &reference("localhost/vm/disk:v2"))
            .await
            .unwrap();

        let mut entries = mapper.list().await.unwrap();
        entries.sort_by_key(|p| p.reference.name());
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].reference.name(), "localhost/vm/disk:v1");
        assert_eq!(entries[1].reference.name(), "localhost/vm/disk:v2");
        assert!(entries.iter().all(|p| p.has_manifest));
        assert!(entries.iter().all(|p| p.size > 0));
    }

    #[tokio::test]
    async fn test_list_flags_directories_without_manifest() {
        let root = tempfile::tempdir().unwrap();
        let mapper = Mapper::with_options(root.path(), test_options());

        // A reference-shaped directory with data but no sidecars
        let dir = root.path().join("localhost/vm/bare:v1");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("disk.img"), b"no sidecars").unwrap();

        let entries = mapper.list().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].has_manifest);
    }

    #[tokio::test]
    async fn test_list_ignores_non_reference_directories() {
        let root = tempfile::tempdir().unwrap();
        let mapper = Mapper::with_options(root.path(), test_options());
        std::fs::create_dir_all(root.path().join("not-a-reference")).unwrap();

        let entries = mapper.list().await.unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn test_empty_root_lists_nothing() {
        let root = tempfile::tempdir().unwrap();
        let mapper = Mapper::new(root.path().join("missing"));
        let entries = mapper.list().await.unwrap();
        assert!(entries.is_empty());
    }
}
