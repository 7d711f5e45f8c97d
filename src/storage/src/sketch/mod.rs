//! Scaffold discovery: before a write, find the local artifact sharing the
//! most segment digests with the manifest being written and reflink-clone
//! it into the target directory, so the write stage only has to transfer
//! segments that actually changed.

mod blueprint;

pub use blueprint::{blueprints_from_manifest, FileBlueprint};

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use geranos_core::{GeranosError, Result};

use crate::duplicator;
use crate::filesegment::SegmentDescriptor;
use crate::oci::{Hash, Manifest};

/// One (directory, data file) pair discovered by scanning manifest sidecars
/// under the image root.
#[derive(Debug)]
struct CloneCandidate {
    dir_path: PathBuf,
    filename: String,
    descriptors: Vec<SegmentDescriptor>,
}

impl CloneCandidate {
    fn file_path(&self) -> PathBuf {
        self.dir_path.join(&self.filename)
    }
}

/// Scans the image root for prior artifacts and reflink-clones the best
/// match as a starting scaffold.
#[derive(Debug, Clone)]
pub struct Sketcher {
    root_directory: PathBuf,
    manifest_filename: String,
}

impl Sketcher {
    pub fn new(root_directory: impl Into<PathBuf>, manifest_filename: impl Into<String>) -> Sketcher {
        Sketcher {
            root_directory: root_directory.into(),
            manifest_filename: manifest_filename.into(),
        }
    }

    /// Prepare `dir` for a write of `manifest`.
    ///
    /// For every file blueprint whose data file is not already present in
    /// `dir`, every clone candidate is scored by the number of distinct
    /// segment digests it shares with the blueprint; the best scorer (ties
    /// broken by first-found) is reflinked into place and truncated to the
    /// blueprint size. Candidate directories are only ever read.
    ///
    /// Returns `(bytes_cloned, segments_matched)`.
    pub fn sketch(&self, dir: &Path, manifest: &Manifest) -> Result<(i64, i64)> {
        let blueprints = blueprints_from_manifest(manifest)?;
        let candidates = self.find_clone_candidates()?;

        std::fs::create_dir_all(dir).map_err(|e| {
            GeranosError::Io(std::io::Error::new(
                e.kind(),
                format!("unable to create directory '{}': {e}", dir.display()),
            ))
        })?;

        let mut bytes_cloned: i64 = 0;
        let mut segments_matched: i64 = 0;

        for blueprint in &blueprints {
            let dest = dir.join(blueprint.filename());
            if dest.is_file() {
                continue;
            }

            let digest_set: HashSet<&Hash> =
                blueprint.segments().iter().map(|s| s.digest()).collect();

            let mut best_score: i64 = 0;
            let mut best_candidate: Option<&CloneCandidate> = None;
            for candidate in &candidates {
                let score = compute_score(&digest_set, candidate);
                if score > best_score {
                    best_score = score;
                    best_candidate = Some(candidate);
                }
            }
            let Some(candidate) = best_candidate else {
                continue;
            };

            bytes_cloned += blueprint.size();
            segments_matched += best_score;

            let src = candidate.file_path();
            if src == dest {
                continue;
            }
            tracing::info!(
                src = %src.display(),
                dest = %dest.display(),
                score = best_score,
                "cloning scaffold file"
            );
            duplicator::clone_file(&src, &dest)?;
            resize_file(&dest, blueprint.size())?;
        }

        Ok((bytes_cloned, segments_matched))
    }

    /// Walk the image root and parse every manifest sidecar into clone
    /// candidates, one per (directory, data filename). Sidecars that fail
    /// to parse (partial writes, foreign manifests) are skipped.
    fn find_clone_candidates(&self) -> Result<Vec<CloneCandidate>> {
        let mut sidecars = Vec::new();
        collect_sidecars(&self.root_directory, &self.manifest_filename, &mut sidecars)?;

        let mut candidates = Vec::new();
        for sidecar in sidecars {
            let manifest = match std::fs::read(&sidecar)
                .map_err(GeranosError::from)
                .and_then(|data| Manifest::from_slice(&data))
            {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(
                        path = %sidecar.display(),
                        error = %e,
                        "skipping unreadable manifest sidecar"
                    );
                    continue;
                }
            };

            let mut order: Vec<String> = Vec::new();
            let mut by_filename: std::collections::HashMap<String, Vec<SegmentDescriptor>> =
                std::collections::HashMap::new();
            let mut malformed = false;
            for layer in &manifest.layers {
                match SegmentDescriptor::parse(layer, None) {
                    Ok(descriptor) => {
                        let filename = descriptor.filename().to_string();
                        if !by_filename.contains_key(&filename) {
                            order.push(filename.clone());
                        }
                        by_filename.entry(filename).or_default().push(descriptor);
                    }
                    Err(e) => {
                        tracing::warn!(
                            path = %sidecar.display(),
                            error = %e,
                            "skipping manifest with non-segment layers"
                        );
                        malformed = true;
                        break;
                    }
                }
            }
            if malformed {
                continue;
            }

            let dir_path = sidecar.parent().unwrap_or(&self.root_directory).to_path_buf();
            for filename in order {
                let descriptors = by_filename.remove(&filename).unwrap_or_default();
                candidates.push(CloneCandidate {
                    dir_path: dir_path.clone(),
                    filename,
                    descriptors,
                });
            }
        }
        Ok(candidates)
    }
}

/// Number of distinct candidate digests also present in the blueprint.
/// Duplicate digests within the candidate count once.
fn compute_score(blueprint_digests: &HashSet<&Hash>, candidate: &CloneCandidate) -> i64 {
    let mut seen: HashSet<&Hash> = HashSet::new();
    let mut score = 0;
    for descriptor in &candidate.descriptors {
        let digest = descriptor.digest();
        if seen.insert(digest) && blueprint_digests.contains(digest) {
            score += 1;
        }
    }
    score
}

fn resize_file(path: &Path, new_size: i64) -> Result<()> {
    let file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| {
            GeranosError::Io(std::io::Error::new(
                e.kind(),
                format!("error while resizing file '{}': {e}", path.display()),
            ))
        })?;
    file.set_len(new_size as u64)?;
    Ok(())
}

fn collect_sidecars(dir: &Path, manifest_filename: &str, out: &mut Vec<PathBuf>) -> Result<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_sidecars(&path, manifest_filename, out)?;
        } else if entry.file_name().to_string_lossy() == manifest_filename {
            out.push(path);
        }
    }
    Ok(())
}
