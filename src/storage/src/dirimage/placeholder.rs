use std::collections::BTreeMap;
use std::io::Read;

use geranos_core::{GeranosError, Result};

use crate::image::Layer;
use crate::oci::Hash;

/// A layer reconstructed from sidecars alone. Digests, size, and
/// annotations are served from the manifest; any attempt to read the body
/// fails. This narrows an omit-content image to manifest/config inspection
/// and digest comparison.
pub(crate) struct PlaceholderLayer {
    pub(crate) media_type: String,
    pub(crate) digest: Hash,
    pub(crate) diff_id: Hash,
    pub(crate) size: i64,
    pub(crate) annotations: BTreeMap<String, String>,
}

impl Layer for PlaceholderLayer {
    fn media_type(&self) -> String {
        self.media_type.clone()
    }

    fn digest(&self) -> Result<Hash> {
        Ok(self.digest.clone())
    }

    fn diff_id(&self) -> Result<Hash> {
        Ok(self.diff_id.clone())
    }

    fn size(&self) -> Result<i64> {
        Ok(self.size)
    }

    fn uncompressed(&self) -> Result<Box<dyn Read + Send>> {
        Err(GeranosError::Unsupported(
            "uncompressed content not available".to_string(),
        ))
    }

    fn compressed(&self) -> Result<Box<dyn Read + Send>> {
        Err(GeranosError::Unsupported(
            "compressed content not available".to_string(),
        ))
    }

    fn annotations(&self) -> BTreeMap<String, String> {
        self.annotations.clone()
    }
}
