//! Content-addressing digest type.

use std::fmt;
use std::io::Read;
use std::str::FromStr;

use geranos_core::{GeranosError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

/// A digest in `algorithm:hex` form, e.g. `sha256:8a3f...`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, std::hash::Hash, Default)]
pub struct Hash {
    pub algorithm: String,
    pub hex: String,
}

impl Hash {
    /// SHA-256 of a byte slice.
    pub fn sha256_of_bytes(data: &[u8]) -> Hash {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Hash {
            algorithm: "sha256".to_string(),
            hex: hex::encode(hasher.finalize()),
        }
    }

    /// SHA-256 of everything readable from `reader`, along with the number
    /// of bytes consumed. This is one full linear pass over the stream.
    pub fn sha256_of_reader<R: Read>(reader: &mut R) -> std::io::Result<(Hash, u64)> {
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 64 * 1024];
        let mut total: u64 = 0;
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            total += n as u64;
        }
        let hash = Hash {
            algorithm: "sha256".to_string(),
            hex: hex::encode(hasher.finalize()),
        };
        Ok((hash, total))
    }

    /// True if this hash has both components populated.
    pub fn is_empty(&self) -> bool {
        self.algorithm.is_empty() || self.hex.is_empty()
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

impl FromStr for Hash {
    type Err = GeranosError;

    fn from_str(s: &str) -> Result<Self> {
        let Some((algorithm, hex)) = s.split_once(':') else {
            return Err(GeranosError::MalformedManifest(format!(
                "digest '{s}' is not in 'algorithm:hex' form"
            )));
        };
        if algorithm.is_empty() || hex.is_empty() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(GeranosError::MalformedManifest(format!(
                "digest '{s}' has an invalid algorithm or hex part"
            )));
        }
        Ok(Hash {
            algorithm: algorithm.to_string(),
            hex: hex.to_string(),
        })
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Hash::from_str(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_of_bytes() {
        let h = Hash::sha256_of_bytes(b"hello world");
        assert_eq!(h.algorithm, "sha256");
        assert_eq!(
            h.hex,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_sha256_of_reader_counts_bytes() {
        let data = vec![7u8; 200_000];
        let (h, n) = Hash::sha256_of_reader(&mut data.as_slice()).unwrap();
        assert_eq!(n, 200_000);
        assert_eq!(h, Hash::sha256_of_bytes(&data));
    }

    #[test]
    fn test_parse_and_display_round_trip() {
        let s = "sha256:b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";
        let h: Hash = s.parse().unwrap();
        assert_eq!(h.to_string(), s);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(Hash::from_str("no-colon").is_err());
        assert!(Hash::from_str("sha256:").is_err());
        assert!(Hash::from_str(":abcd").is_err());
        assert!(Hash::from_str("sha256:not-hex!").is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let h = Hash::sha256_of_bytes(b"x");
        let json = serde_json::to_string(&h).unwrap();
        assert_eq!(json, format!("\"{h}\""));
        let back: Hash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, h);
    }
}
