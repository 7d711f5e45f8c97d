//! OCI image reference parsing.
//!
//! Parses references like `ghcr.io/macvmio/macos:sonoma-v1` into structured
//! components. The storage engine maps every reference onto a directory
//! under its image root, so parsing is strict by default: the registry and
//! repository must be explicit, and a tag or digest must be present.

use crate::error::{GeranosError, Result};

/// Default tag applied by lenient parsing when none is specified.
const DEFAULT_TAG: &str = "latest";

/// Parsed OCI image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    /// Registry hostname (e.g., "ghcr.io", "registry.local:5000")
    pub registry: String,
    /// Repository path (e.g., "macvmio/macos")
    pub repository: String,
    /// Tag (e.g., "latest", "sonoma-v1")
    pub tag: Option<String>,
    /// Digest (e.g., "sha256:abc123...")
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parse a reference string, requiring every component to be explicit.
    ///
    /// The registry must look like a hostname (contain a dot or port, or be
    /// "localhost"), the repository must be non-empty, and either a tag or
    /// a digest must be present. References that rely on defaulting (bare
    /// `nginx`, missing tag) are rejected.
    pub fn parse_strict(reference: &str) -> Result<Self> {
        let parsed = Self::parse_lenient(reference)?;
        if parsed.tag.is_none() && parsed.digest.is_none() {
            return Err(invalid(reference, "missing tag or digest"));
        }
        Ok(parsed)
    }

    /// Parse a reference string, defaulting the tag to `latest` when no tag
    /// or digest is given. The registry and repository must still be
    /// explicit.
    pub fn parse(reference: &str) -> Result<Self> {
        let parsed = Self::parse_lenient(reference)?;
        if parsed.tag.is_none() && parsed.digest.is_none() {
            return Ok(Self {
                tag: Some(DEFAULT_TAG.to_string()),
                ..parsed
            });
        }
        Ok(parsed)
    }

    fn parse_lenient(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(invalid(reference, "empty reference"));
        }

        // Split off digest first (@ separator)
        let (name_tag, digest) = match reference.rsplit_once('@') {
            Some((head, digest_part)) => {
                validate_digest(reference, digest_part)?;
                (head, Some(digest_part.to_string()))
            }
            None => (reference, None),
        };

        // Registry is everything before the first slash and must look like
        // a hostname; strict mode has no implicit docker.io.
        let (registry, remainder) = match name_tag.split_once('/') {
            Some((first, rest)) if !rest.is_empty() => (first, rest),
            _ => return Err(invalid(reference, "missing registry component")),
        };
        if !(registry.contains('.') || registry.contains(':') || registry == "localhost") {
            return Err(invalid(
                reference,
                "registry must be a hostname (contain '.' or ':' or be 'localhost')",
            ));
        }

        // Tag is after the last colon, but only if that colon comes after
        // the last slash (a colon before it would belong to a port).
        let (repository, tag) = match remainder.rsplit_once(':') {
            Some((repo, tag)) if !repo.contains('/') || !tag.contains('/') => {
                validate_tag(reference, tag)?;
                (repo.to_string(), Some(tag.to_string()))
            }
            _ => (remainder.to_string(), None),
        };
        validate_repository(reference, &repository)?;

        Ok(ImageReference {
            registry: registry.to_string(),
            repository,
            tag,
            digest,
        })
    }

    /// Full reference string, e.g. `ghcr.io/macvmio/macos:sonoma-v1`.
    pub fn name(&self) -> String {
        let mut s = format!("{}/{}", self.registry, self.repository);
        if let Some(ref tag) = self.tag {
            s.push(':');
            s.push_str(tag);
        }
        if let Some(ref digest) = self.digest {
            s.push('@');
            s.push_str(digest);
        }
        s
    }

    /// The tag or digest naming this particular artifact.
    pub fn identifier(&self) -> &str {
        if let Some(ref digest) = self.digest {
            digest
        } else if let Some(ref tag) = self.tag {
            tag
        } else {
            DEFAULT_TAG
        }
    }

    /// Registry and repository without the identifier,
    /// e.g. `ghcr.io/macvmio/macos`.
    pub fn context(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

fn invalid(reference: &str, message: &str) -> GeranosError {
    GeranosError::InvalidReference {
        reference: reference.to_string(),
        message: message.to_string(),
    }
}

fn validate_digest(reference: &str, digest: &str) -> Result<()> {
    let Some((algorithm, hex)) = digest.split_once(':') else {
        return Err(invalid(reference, "digest must be 'algorithm:hex'"));
    };
    if algorithm != "sha256" {
        return Err(invalid(reference, "unsupported digest algorithm"));
    }
    if hex.len() != 64 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(invalid(reference, "digest hex must be 64 hex characters"));
    }
    Ok(())
}

fn validate_tag(reference: &str, tag: &str) -> Result<()> {
    if tag.is_empty() || tag.len() > 128 {
        return Err(invalid(reference, "tag must be 1-128 characters"));
    }
    if !tag
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(invalid(reference, "tag contains invalid characters"));
    }
    Ok(())
}

fn validate_repository(reference: &str, repository: &str) -> Result<()> {
    if repository.is_empty() {
        return Err(invalid(reference, "empty repository"));
    }
    let valid = repository.split('/').all(|part| {
        !part.is_empty()
            && part
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.'))
    });
    if !valid {
        return Err(invalid(reference, "repository contains invalid characters"));
    }
    Ok(())
}
