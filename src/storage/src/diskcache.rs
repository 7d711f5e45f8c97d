//! Optional on-disk layer cache keyed by layer digest.
//!
//! Layer bodies are stored uncompressed (and sparse, via the deferred-skip
//! writer) next to a small metadata sidecar; a `.link` file maps the diff
//! ID back to the digest so lookups work by either hash. The cache is
//! redundant whenever sketching finds a scaffold, but a cold pull with no
//! local relatives still benefits.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use geranos_core::{GeranosError, Result};
use serde::{Deserialize, Serialize};

use crate::image::Layer;
use crate::oci::Hash;
use crate::sparsefile::SparseWriter;

/// Metadata sidecar for one cached layer body.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntryMeta {
    digest: Hash,
    diff_id: Hash,
    media_type: String,
    size: i64,
}

/// A content-addressed cache of uncompressed layer bodies.
pub struct FilesystemCache {
    path: PathBuf,
}

impl FilesystemCache {
    pub fn new(path: impl Into<PathBuf>) -> Result<FilesystemCache> {
        let path = path.into();
        std::fs::create_dir_all(&path).map_err(|e| {
            GeranosError::Io(std::io::Error::new(
                e.kind(),
                format!("failed to create cache directory '{}': {e}", path.display()),
            ))
        })?;
        Ok(FilesystemCache { path })
    }

    /// Wrap `layer` so that its first uncompressed read is teed into the
    /// cache.
    pub fn put(&self, layer: Arc<dyn Layer>) -> Result<Arc<dyn Layer>> {
        let digest = layer.digest()?;
        let diff_id = layer.diff_id()?;
        Ok(Arc::new(TeeLayer {
            inner: layer,
            cache_dir: self.path.clone(),
            digest,
            diff_id,
        }))
    }

    /// Look up a cached layer by digest or diff ID. A cached body whose
    /// recomputed hash disagrees with its metadata is deleted and reported
    /// as a miss.
    pub fn get(&self, hash: &Hash) -> Result<Option<Arc<dyn Layer>>> {
        let digest = match self.resolve_digest(hash)? {
            Some(digest) => digest,
            None => return Ok(None),
        };
        let body_path = entry_path(&self.path, &digest);
        let meta_path = meta_path(&self.path, &digest);

        let meta: CacheEntryMeta = match std::fs::read(&meta_path)
            .map_err(GeranosError::from)
            .and_then(|data| Ok(serde_json::from_slice(&data)?))
        {
            Ok(meta) => meta,
            Err(_) => {
                self.evict(&digest);
                return Ok(None);
            }
        };

        let mut body = match File::open(&body_path) {
            Ok(file) => BufReader::new(file),
            Err(_) => {
                self.evict(&digest);
                return Ok(None);
            }
        };
        let (actual, _) = Hash::sha256_of_reader(&mut body)?;
        if actual != meta.diff_id {
            tracing::warn!(
                digest = %digest,
                expected = %meta.diff_id,
                actual = %actual,
                "cached layer failed verification, evicting"
            );
            self.evict(&digest);
            return Ok(None);
        }

        Ok(Some(Arc::new(CachedLayer {
            path: body_path,
            meta,
        })))
    }

    fn resolve_digest(&self, hash: &Hash) -> Result<Option<Hash>> {
        if entry_path(&self.path, hash).is_file() {
            return Ok(Some(hash.clone()));
        }
        let link = link_path(&self.path, hash);
        match std::fs::read_to_string(&link) {
            Ok(content) => Ok(Some(content.trim().parse()?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn evict(&self, digest: &Hash) {
        let _ = std::fs::remove_file(entry_path(&self.path, digest));
        let _ = std::fs::remove_file(meta_path(&self.path, digest));
    }
}

/// ':' is not a valid path character everywhere; entries swap it out.
fn sanitize(hash: &Hash) -> String {
    hash.to_string().replace(':', "_")
}

fn entry_path(dir: &Path, hash: &Hash) -> PathBuf {
    dir.join(sanitize(hash))
}

fn meta_path(dir: &Path, hash: &Hash) -> PathBuf {
    dir.join(format!("{}.meta.json", sanitize(hash)))
}

fn link_path(dir: &Path, hash: &Hash) -> PathBuf {
    dir.join(format!("{}.link", sanitize(hash)))
}

/// Wraps a layer; reading its uncompressed body populates the cache.
struct TeeLayer {
    inner: Arc<dyn Layer>,
    cache_dir: PathBuf,
    digest: Hash,
    diff_id: Hash,
}

impl Layer for TeeLayer {
    fn media_type(&self) -> String {
        self.inner.media_type()
    }

    fn digest(&self) -> Result<Hash> {
        Ok(self.digest.clone())
    }

    fn diff_id(&self) -> Result<Hash> {
        Ok(self.diff_id.clone())
    }

    fn size(&self) -> Result<i64> {
        self.inner.size()
    }

    fn uncompressed(&self) -> Result<Box<dyn Read + Send>> {
        let meta = CacheEntryMeta {
            digest: self.digest.clone(),
            diff_id: self.diff_id.clone(),
            media_type: self.inner.media_type(),
            size: self.inner.size()?,
        };
        std::fs::write(
            meta_path(&self.cache_dir, &self.digest),
            serde_json::to_vec(&meta)?,
        )?;
        std::fs::write(
            link_path(&self.cache_dir, &self.diff_id),
            self.digest.to_string(),
        )?;
        let body = File::create(entry_path(&self.cache_dir, &self.digest))?;
        Ok(Box::new(TeeReader {
            src: self.inner.uncompressed()?,
            dst: Some(SparseWriter::new(body)),
        }))
    }

    fn compressed(&self) -> Result<Box<dyn Read + Send>> {
        self.inner.compressed()
    }

    fn annotations(&self) -> BTreeMap<String, String> {
        self.inner.annotations()
    }
}

/// Copies everything read from `src` into `dst`, finishing the sparse
/// writer at end of stream.
struct TeeReader {
    src: Box<dyn Read + Send>,
    dst: Option<SparseWriter<File>>,
}

impl Read for TeeReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.src.read(buf)?;
        if n == 0 {
            if let Some(writer) = self.dst.take() {
                writer.finish()?;
            }
        } else if let Some(writer) = self.dst.as_mut() {
            writer.write_all(&buf[..n])?;
        }
        Ok(n)
    }
}

/// A layer served back from the cache.
struct CachedLayer {
    path: PathBuf,
    meta: CacheEntryMeta,
}

impl Layer for CachedLayer {
    fn media_type(&self) -> String {
        self.meta.media_type.clone()
    }

    fn digest(&self) -> Result<Hash> {
        Ok(self.meta.digest.clone())
    }

    fn diff_id(&self) -> Result<Hash> {
        Ok(self.meta.diff_id.clone())
    }

    fn size(&self) -> Result<i64> {
        Ok(self.meta.size)
    }

    fn uncompressed(&self) -> Result<Box<dyn Read + Send>> {
        Ok(Box::new(BufReader::new(File::open(&self.path)?)))
    }

    fn compressed(&self) -> Result<Box<dyn Read + Send>> {
        let encoder = zstd::stream::read::Encoder::new(self.uncompressed()?, 1)?;
        Ok(Box::new(encoder))
    }

    fn annotations(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }
}
