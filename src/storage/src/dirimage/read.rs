use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use geranos_core::{GeranosError, Result};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::filesegment::{self, SegmentDescriptor, SegmentLayer};
use crate::image::{Image, Layer};
use crate::oci::{
    Descriptor, Hash, ImageConfig, Manifest, RootFs, CONFIG_MEDIA_TYPE, MANIFEST_MEDIA_TYPE,
};

use super::placeholder::PlaceholderLayer;
use super::{
    join_error, DirImage, DirImageOptions, LOCAL_CONFIG_FILENAME, LOCAL_MANIFEST_FILENAME,
};

/// Read a directory into a materialized OCI image.
///
/// Data files are split into `chunk_size` segments and hashed by a bounded
/// worker pool; the manifest and config are synthesized from the results.
/// With `omit_layer_content` set, the sidecars are loaded instead and the
/// layers are placeholders that refuse body access.
pub async fn read(
    token: &CancellationToken,
    dir: &Path,
    opts: &DirImageOptions,
) -> Result<DirImage> {
    if opts.omit_layer_content {
        return read_from_sidecars(dir);
    }

    let config = load_or_synthesize_config(dir)?;

    let mut layers: Vec<Arc<SegmentLayer>> = Vec::new();
    for entry in sorted_dir_entries(dir)? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if entry.path().is_dir() {
            tracing::warn!(name = %name, "unexpected subdirectory, skipping");
            continue;
        }
        if name.starts_with('.') {
            tracing::debug!(name = %name, "skipping dot-prefixed file");
            continue;
        }
        for layer in filesegment::split(entry.path(), opts.chunk_size)? {
            layers.push(Arc::new(layer));
        }
    }

    let bytes_read = precompute(token, &layers, opts.worker_count).await?;

    assemble(dir, config, layers, bytes_read)
}

/// Force digest and diff ID computation for every layer using a bounded
/// worker pool. Each layer costs two linear passes over its bytes, so the
/// read tally is `2 × length` per layer.
async fn precompute(
    token: &CancellationToken,
    layers: &[Arc<SegmentLayer>],
    worker_count: usize,
) -> Result<i64> {
    let semaphore = Arc::new(Semaphore::new(worker_count.max(1)));
    let bytes_read = Arc::new(AtomicI64::new(0));
    let mut join_set = JoinSet::new();

    for layer in layers {
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
        let layer = Arc::clone(layer);
        let counter = Arc::clone(&bytes_read);
        join_set.spawn(async move {
            let _permit = permit;
            tokio::task::spawn_blocking(move || -> Result<()> {
                layer.diff_id()?;
                layer.digest()?;
                counter.fetch_add(2 * layer.length(), Ordering::Relaxed);
                Ok(())
            })
            .await
            .map_err(join_error)?
        });
    }

    while let Some(joined) = join_set.join_next().await {
        joined.map_err(join_error)??;
    }
    Ok(bytes_read.load(Ordering::Relaxed))
}

/// Build the image from hashed layers: manifest entries in layer order,
/// config RootFS overwritten with the computed diff IDs.
fn assemble(
    dir: &Path,
    mut config: ImageConfig,
    layers: Vec<Arc<SegmentLayer>>,
    bytes_read: i64,
) -> Result<DirImage> {
    let mut diff_ids = Vec::with_capacity(layers.len());
    let mut wire_layers = Vec::with_capacity(layers.len());
    let mut segment_descriptors = Vec::with_capacity(layers.len());

    for layer in &layers {
        let diff_id = layer.diff_id()?;
        let digest = layer.digest()?;
        let annotations = layer.annotations();
        let filename = annotations
            .get(filesegment::FILENAME_ANNOTATION_KEY)
            .cloned()
            .unwrap_or_default();
        wire_layers.push(Descriptor {
            media_type: layer.media_type(),
            size: layer.size()?,
            digest: digest.clone(),
            annotations,
        });
        segment_descriptors.push(SegmentDescriptor::new(
            filename,
            layer.start(),
            layer.stop(),
            digest,
            Some(diff_id.clone()),
        ));
        diff_ids.push(diff_id);
    }

    config.rootfs = RootFs::layers(diff_ids);
    let raw_config = config.to_vec()?;

    let manifest = Manifest {
        schema_version: 2,
        media_type: MANIFEST_MEDIA_TYPE.to_string(),
        config: Descriptor {
            media_type: CONFIG_MEDIA_TYPE.to_string(),
            size: raw_config.len() as i64,
            digest: Hash::sha256_of_bytes(&raw_config),
            annotations: BTreeMap::new(),
        },
        layers: wire_layers,
    };

    let layer_objects: Vec<Arc<dyn Layer>> = layers
        .into_iter()
        .map(|l| l as Arc<dyn Layer>)
        .collect();
    let image = Image::assemble(manifest, config, layer_objects)?;

    let dir_image = DirImage::new(dir.to_path_buf(), image, segment_descriptors);
    dir_image
        .bytes_read_count
        .store(bytes_read, Ordering::Relaxed);
    Ok(dir_image)
}

/// Omit-content path: rebuild the image from the two sidecars with
/// placeholder layers. No data file is touched, so the read tally is zero.
fn read_from_sidecars(dir: &Path) -> Result<DirImage> {
    let config_path = dir.join(LOCAL_CONFIG_FILENAME);
    let raw_config = std::fs::read(&config_path).map_err(|e| GeranosError::MissingFile {
        path: format!("{} ({e})", config_path.display()),
    })?;
    let config = ImageConfig::from_slice(&raw_config)?;

    let manifest_path = dir.join(LOCAL_MANIFEST_FILENAME);
    let raw_manifest = std::fs::read(&manifest_path).map_err(|e| GeranosError::MissingFile {
        path: format!("{} ({e})", manifest_path.display()),
    })?;
    let manifest = Manifest::from_slice(&raw_manifest)?;

    let diff_ids = &config.rootfs.diff_ids;
    if manifest.layers.len() != diff_ids.len() {
        return Err(GeranosError::MalformedManifest(format!(
            "mismatch between number of layers in manifest ({}) and diff IDs in config ({})",
            manifest.layers.len(),
            diff_ids.len()
        )));
    }

    let mut layers: Vec<Arc<dyn Layer>> = Vec::with_capacity(manifest.layers.len());
    let mut segment_descriptors = Vec::with_capacity(manifest.layers.len());
    for (wire, diff_id) in manifest.layers.iter().zip(diff_ids.iter()) {
        let descriptor = SegmentDescriptor::parse(wire, Some(diff_id.clone()))?;
        layers.push(Arc::new(PlaceholderLayer {
            media_type: wire.media_type.clone(),
            digest: wire.digest.clone(),
            diff_id: diff_id.clone(),
            size: wire.size,
            annotations: wire.annotations.clone(),
        }));
        segment_descriptors.push(descriptor);
    }

    let image = Image::from_raw(raw_manifest, raw_config, layers)?;
    Ok(DirImage::new(dir.to_path_buf(), image, segment_descriptors))
}

/// Load the config sidecar if present; otherwise synthesize one. The
/// RootFS is filled in later from the computed diff IDs either way.
fn load_or_synthesize_config(dir: &Path) -> Result<ImageConfig> {
    let config_path = dir.join(LOCAL_CONFIG_FILENAME);
    match std::fs::read(&config_path) {
        Ok(raw) => ImageConfig::from_slice(&raw),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ImageConfig::synthesized()),
        Err(e) => Err(e.into()),
    }
}

/// Directory entries in name order, so layer order is deterministic across
/// platforms and runs.
fn sorted_dir_entries(dir: &Path) -> Result<Vec<std::fs::DirEntry>> {
    let mut entries: Vec<std::fs::DirEntry> = std::fs::read_dir(dir)
        .map_err(|e| {
            GeranosError::Io(std::io::Error::new(
                e.kind(),
                format!("unable to read directory '{}': {e}", dir.display()),
            ))
        })?
        .collect::<std::io::Result<_>>()?;
    entries.sort_by_key(|e| e.file_name());
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(chunk_size: i64) -> DirImageOptions {
        DirImageOptions::default()
            .with_chunk_size(chunk_size)
            .with_worker_count(2)
    }

    #[tokio::test]
    async fn test_read_two_files_chunked() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("file1.txt"), b"1234567890").unwrap();
        std::fs::write(dir.path().join("file2.txt"), b"abcdefghij").unwrap();

        let token = CancellationToken::new();
        let img = read(&token, dir.path(), &options(4)).await.unwrap();

        let manifest = img.image().manifest();
        assert_eq!(manifest.layers.len(), 6);
        let ranges: Vec<&str> = manifest
            .layers
            .iter()
            .map(|l| l.annotations.get("range").unwrap().as_str())
            .collect();
        assert_eq!(ranges, vec!["0-3", "4-7", "8-9", "0-3", "4-7", "8-9"]);

        let filenames: Vec<&str> = manifest
            .layers
            .iter()
            .map(|l| l.annotations.get("filename").unwrap().as_str())
            .collect();
        assert_eq!(
            filenames,
            vec![
                "file1.txt",
                "file1.txt",
                "file1.txt",
                "file2.txt",
                "file2.txt",
                "file2.txt"
            ]
        );

        // Two hashing passes over 20 bytes of data
        assert_eq!(img.bytes_read(), 40);
    }

    #[tokio::test]
    async fn test_read_synthesizes_config() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("data.bin"), b"payload").unwrap();

        let token = CancellationToken::new();
        let img = read(&token, dir.path(), &options(4)).await.unwrap();

        let config = img.image().config();
        assert_eq!(config.container, "geranos");
        assert!(config.created.is_some());
        assert_eq!(config.rootfs.typ, "layers");
        assert_eq!(config.rootfs.diff_ids.len(), 2);
    }

    #[tokio::test]
    async fn test_read_diff_ids_follow_layer_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("data.bin"), b"0123456789").unwrap();

        let token = CancellationToken::new();
        let img = read(&token, dir.path(), &options(5)).await.unwrap();

        let expected = [
            Hash::sha256_of_bytes(b"01234"),
            Hash::sha256_of_bytes(b"56789"),
        ];
        assert_eq!(img.image().config().rootfs.diff_ids, expected);
    }

    #[tokio::test]
    async fn test_read_skips_subdirectories_and_dot_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("data.bin"), b"0123456789").unwrap();
        std::fs::create_dir(dir.path().join("subdir")).unwrap();
        std::fs::write(dir.path().join(".hidden"), b"ignored").unwrap();

        let token = CancellationToken::new();
        let img = read(&token, dir.path(), &options(100)).await.unwrap();
        assert_eq!(img.image().manifest().layers.len(), 1);
    }

    #[tokio::test]
    async fn test_read_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let token = CancellationToken::new();
        let result = read(&token, &dir.path().join("absent"), &options(4)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_read_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("data.bin"), vec![1u8; 4096]).unwrap();

        let token = CancellationToken::new();
        token.cancel();
        let result = read(&token, dir.path(), &options(16)).await;
        assert!(matches!(result.unwrap_err(), GeranosError::Cancelled));
    }

    #[tokio::test]
    async fn test_read_omit_content_requires_sidecars() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("data.bin"), b"0123456789").unwrap();

        let token = CancellationToken::new();
        let opts = options(4).with_omit_layer_content(true);
        let result = read(&token, dir.path(), &opts).await;
        assert!(matches!(
            result.unwrap_err(),
            GeranosError::MissingFile { .. }
        ));
    }

    #[tokio::test]
    async fn test_read_reuses_existing_config_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("data.bin"), b"0123456789").unwrap();

        let token = CancellationToken::new();
        let first = read(&token, dir.path(), &options(4)).await.unwrap();
        std::fs::write(
            dir.path().join(LOCAL_CONFIG_FILENAME),
            first.image().raw_config(),
        )
        .unwrap();

        let second = read(&token, dir.path(), &options(4)).await.unwrap();
        assert_eq!(
            second.image().config().created,
            first.image().config().created
        );
        assert_eq!(second.image().raw_config(), first.image().raw_config());
        assert_eq!(second.image().digest(), first.image().digest());
    }
}
