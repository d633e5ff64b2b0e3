use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};
use sha2::{Digest as _, Sha256, Sha512};

use crate::error::Error;

/// Hash algorithms the layer store addresses content with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    Sha256,
    Sha512,
}

impl Algorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            Algorithm::Sha256 => "sha256",
            Algorithm::Sha512 => "sha512",
        }
    }

    fn hex_len(self) -> usize {
        match self {
            Algorithm::Sha256 => 64,
            Algorithm::Sha512 => 128,
        }
    }

    /// Hash `data`, returning lowercase hex.
    pub fn hash_hex(self, data: &[u8]) -> String {
        match self {
            Algorithm::Sha256 => format!("{:x}", Sha256::digest(data)),
            Algorithm::Sha512 => format!("{:x}", Sha512::digest(data)),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A content digest such as `sha256:4bcff63911fc...`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Digest {
    algorithm: Algorithm,
    hex: String,
}

impl Digest {
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// The chain id of the layer stacked on `self` with diff id `next`:
    /// `H("<self> <next>")`, hashed with `next`'s algorithm.
    pub fn chain(&self, next: &Digest) -> Digest {
        let algorithm = next.algorithm;
        let input = format!("{self} {next}");
        Digest {
            algorithm,
            hex: algorithm.hash_hex(input.as_bytes()),
        }
    }
}

impl FromStr for Digest {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidDigest(s.to_string());
        let (algo, hex) = s.split_once(':').ok_or_else(invalid)?;
        let algorithm = match algo {
            "sha256" => Algorithm::Sha256,
            "sha512" => Algorithm::Sha512,
            _ => return Err(invalid()),
        };
        if hex.len() != algorithm.hex_len()
            || !hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        {
            return Err(invalid());
        }
        Ok(Digest {
            algorithm,
            hex: hex.to_string(),
        })
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Drop a leading `algorithm:` qualifier from a user-supplied id, if any.
pub fn strip_algorithm(id: &str) -> &str {
    id.strip_prefix("sha256:")
        .or_else(|| id.strip_prefix("sha512:"))
        .unwrap_or(id)
}

/// Docker-style 12 character short form of an id.
pub fn short_id(id: &str) -> &str {
    let hex = strip_algorithm(id);
    hex.get(..12).unwrap_or(hex)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn test_parse_and_display() {
        let d: Digest = format!("sha256:{EMPTY_SHA256}").parse().unwrap();
        assert_eq!(d.algorithm(), Algorithm::Sha256);
        assert_eq!(d.hex(), EMPTY_SHA256);
        assert_eq!(d.to_string(), format!("sha256:{EMPTY_SHA256}"));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        let bad_inputs = vec![
            EMPTY_SHA256.to_string(),
            "sha256:abc".to_string(),
            "md5:d41d8cd98f00b204e9800998ecf8427e".to_string(),
            format!("sha256:{}", EMPTY_SHA256.to_uppercase()),
            format!("sha512:{EMPTY_SHA256}"),
        ];
        for bad in &bad_inputs {
            assert!(bad.parse::<Digest>().is_err(), "accepted {bad}");
        }
    }

    #[test]
    fn test_hash_hex_known_value() {
        assert_eq!(Algorithm::Sha256.hash_hex(b""), EMPTY_SHA256);
        assert_eq!(Algorithm::Sha512.hash_hex(b"").len(), 128);
    }

    #[test]
    fn test_chain_hashes_full_forms_with_space() {
        let a: Digest = format!("sha256:{}", "a".repeat(64)).parse().unwrap();
        let b: Digest = format!("sha256:{}", "b".repeat(64)).parse().unwrap();
        let expected = Algorithm::Sha256.hash_hex(format!("{a} {b}").as_bytes());
        let chained = a.chain(&b);
        assert_eq!(chained.hex(), expected);
        assert_eq!(chained.algorithm(), Algorithm::Sha256);
        // Order matters.
        assert_ne!(b.chain(&a), chained);
    }

    #[test]
    fn test_strip_and_short() {
        assert_eq!(strip_algorithm("sha256:abcdef"), "abcdef");
        assert_eq!(strip_algorithm("abcdef"), "abcdef");
        assert_eq!(short_id(&format!("sha256:{EMPTY_SHA256}")), "e3b0c44298fc");
        assert_eq!(short_id("abc"), "abc");
    }

    #[test]
    fn test_serializes_as_string() {
        let d: Digest = format!("sha256:{EMPTY_SHA256}").parse().unwrap();
        let json = serde_json::to_string(&d).unwrap();
        assert_eq!(json, format!("\"sha256:{EMPTY_SHA256}\""));
    }
}
