//! Materialized OCI image: manifest + config + ordered layers.
//!
//! The raw manifest and config bytes are part of the value, not derived on
//! demand: sidecars and registry uploads must be byte-identical to what was
//! originally parsed or first serialized, so the bytes are captured once
//! and reused everywhere.

use std::collections::BTreeMap;
use std::io::Read;
use std::sync::Arc;

use geranos_core::{GeranosError, Result};
use once_cell::sync::OnceCell;

use crate::oci::{Hash, ImageConfig, Manifest};

/// A single OCI layer. Implementations either sit on top of a local file
/// range ([`crate::filesegment::SegmentLayer`]), a remote blob fetched by a
/// registry client, or a placeholder that refuses body access.
pub trait Layer: Send + Sync {
    /// Media type of this layer.
    fn media_type(&self) -> String;

    /// Digest of the compressed layer body (manifest digest).
    fn digest(&self) -> Result<Hash>;

    /// Digest of the uncompressed layer body (config diff ID).
    fn diff_id(&self) -> Result<Hash>;

    /// Compressed size in bytes.
    fn size(&self) -> Result<i64>;

    /// Reader over the uncompressed layer body.
    fn uncompressed(&self) -> Result<Box<dyn Read + Send>>;

    /// Reader over the compressed layer body.
    fn compressed(&self) -> Result<Box<dyn Read + Send>>;

    /// Annotations carried into the manifest entry for this layer.
    fn annotations(&self) -> BTreeMap<String, String>;
}

/// An OCI image held in memory: parsed views plus the raw bytes they came
/// from, and the layers in manifest order.
#[derive(Clone)]
pub struct Image {
    raw_manifest: Arc<Vec<u8>>,
    manifest: Arc<Manifest>,
    raw_config: Arc<Vec<u8>>,
    config: Arc<ImageConfig>,
    layers: Arc<Vec<Arc<dyn Layer>>>,
    digest: OnceCell<Hash>,
}

impl Image {
    /// Build an image from raw manifest/config bytes (e.g. as received
    /// from a registry). The bytes are kept verbatim.
    pub fn from_raw(
        raw_manifest: Vec<u8>,
        raw_config: Vec<u8>,
        layers: Vec<Arc<dyn Layer>>,
    ) -> Result<Image> {
        let manifest = Manifest::from_slice(&raw_manifest)?;
        let config = ImageConfig::from_slice(&raw_config)?;
        Ok(Image {
            raw_manifest: Arc::new(raw_manifest),
            manifest: Arc::new(manifest),
            raw_config: Arc::new(raw_config),
            config: Arc::new(config),
            layers: Arc::new(layers),
            digest: OnceCell::new(),
        })
    }

    /// Build an image from parsed manifest/config values, serializing them
    /// once to fix the canonical bytes.
    pub fn assemble(
        manifest: Manifest,
        config: ImageConfig,
        layers: Vec<Arc<dyn Layer>>,
    ) -> Result<Image> {
        let raw_manifest = manifest.to_vec()?;
        let raw_config = config.to_vec()?;
        Ok(Image {
            raw_manifest: Arc::new(raw_manifest),
            manifest: Arc::new(manifest),
            raw_config: Arc::new(raw_config),
            config: Arc::new(config),
            layers: Arc::new(layers),
            digest: OnceCell::new(),
        })
    }

    /// The parsed manifest.
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// The parsed config.
    pub fn config(&self) -> &ImageConfig {
        &self.config
    }

    /// Raw manifest bytes, byte-identical to the sidecar and the registry
    /// payload.
    pub fn raw_manifest(&self) -> &[u8] {
        &self.raw_manifest
    }

    /// Raw config bytes.
    pub fn raw_config(&self) -> &[u8] {
        &self.raw_config
    }

    /// Image digest: SHA-256 over the raw manifest bytes. Memoized.
    pub fn digest(&self) -> &Hash {
        self.digest
            .get_or_init(|| Hash::sha256_of_bytes(&self.raw_manifest))
    }

    /// Layers in manifest order.
    pub fn layers(&self) -> &[Arc<dyn Layer>] {
        &self.layers
    }

    /// Look up a layer by its compressed digest.
    pub fn layer_by_digest(&self, digest: &Hash) -> Result<Arc<dyn Layer>> {
        for layer in self.layers.iter() {
            if &layer.digest()? == digest {
                return Ok(Arc::clone(layer));
            }
        }
        Err(GeranosError::MalformedManifest(format!(
            "no layer with digest {digest}"
        )))
    }
}

impl std::fmt::Debug for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Image")
            .field("digest", &self.digest().to_string())
            .field("layers", &self.layers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oci::{Descriptor, RootFs, CONFIG_MEDIA_TYPE, MANIFEST_MEDIA_TYPE, SEGMENT_MEDIA_TYPE};

    struct FakeLayer {
        body: Vec<u8>,
    }

    impl Layer for FakeLayer {
        fn media_type(&self) -> String {
            SEGMENT_MEDIA_TYPE.to_string()
        }
        fn digest(&self) -> Result<Hash> {
            Ok(Hash::sha256_of_bytes(&self.body))
        }
        fn diff_id(&self) -> Result<Hash> {
            Ok(Hash::sha256_of_bytes(&self.body))
        }
        fn size(&self) -> Result<i64> {
            Ok(self.body.len() as i64)
        }
        fn uncompressed(&self) -> Result<Box<dyn Read + Send>> {
            Ok(Box::new(std::io::Cursor::new(self.body.clone())))
        }
        fn compressed(&self) -> Result<Box<dyn Read + Send>> {
            Ok(Box::new(std::io::Cursor::new(self.body.clone())))
        }
        fn annotations(&self) -> BTreeMap<String, String> {
            BTreeMap::new()
        }
    }

    fn fake_image(bodies: &[&[u8]]) -> Image {
        let layers: Vec<Arc<dyn Layer>> = bodies
            .iter()
            .map(|b| Arc::new(FakeLayer { body: b.to_vec() }) as Arc<dyn Layer>)
            .collect();
        let config = ImageConfig {
            container: "geranos".to_string(),
            rootfs: RootFs::layers(
                bodies.iter().map(|b| Hash::sha256_of_bytes(b)).collect(),
            ),
            ..ImageConfig::default()
        };
        let raw_config = config.to_vec().unwrap();
        let manifest = Manifest {
            schema_version: 2,
            media_type: MANIFEST_MEDIA_TYPE.to_string(),
            config: Descriptor {
                media_type: CONFIG_MEDIA_TYPE.to_string(),
                size: raw_config.len() as i64,
                digest: Hash::sha256_of_bytes(&raw_config),
                annotations: BTreeMap::new(),
            },
            layers: bodies
                .iter()
                .map(|b| Descriptor {
                    media_type: SEGMENT_MEDIA_TYPE.to_string(),
                    size: b.len() as i64,
                    digest: Hash::sha256_of_bytes(b),
                    annotations: BTreeMap::new(),
                })
                .collect(),
        };
        Image::assemble(manifest, config, layers).unwrap()
    }

    #[test]
    fn test_digest_is_sha256_of_raw_manifest() {
        let img = fake_image(&[b"one", b"two"]);
        assert_eq!(img.digest(), &Hash::sha256_of_bytes(img.raw_manifest()));
    }

    #[test]
    fn test_from_raw_preserves_bytes() {
        let img = fake_image(&[b"one"]);
        let rebuilt = Image::from_raw(
            img.raw_manifest().to_vec(),
            img.raw_config().to_vec(),
            vec![],
        )
        .unwrap();
        assert_eq!(rebuilt.raw_manifest(), img.raw_manifest());
        assert_eq!(rebuilt.digest(), img.digest());
        assert_eq!(rebuilt.manifest(), img.manifest());
    }

    #[test]
    fn test_layer_by_digest() {
        let img = fake_image(&[b"one", b"two"]);
        let wanted = Hash::sha256_of_bytes(b"two");
        let layer = img.layer_by_digest(&wanted).unwrap();
        assert_eq!(layer.digest().unwrap(), wanted);

        let missing = Hash::sha256_of_bytes(b"three");
        assert!(img.layer_by_digest(&missing).is_err());
    }

    #[test]
    fn test_from_raw_rejects_garbage() {
        assert!(Image::from_raw(b"nope".to_vec(), b"{}".to_vec(), vec![]).is_err());
    }
}
