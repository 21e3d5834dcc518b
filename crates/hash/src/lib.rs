#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Content digests for kiln blobs
//!
//! Package checksums arrive either as a bare SHA-1 hex string or as a
//! `;`-separated list of `algorithm:hex` entries. Verification always uses
//! the strongest algorithm present.

use kiln_errors::{Error, StorageError};
use serde::{Deserialize, Serialize};
use sha2::Digest as _;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

/// Size of chunks for streaming hash computation
const CHUNK_SIZE: usize = 64 * 1024; // 64KB

/// Supported digest algorithms, ordered weakest to strongest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Algorithm {
    Sha1,
    Sha256,
    Sha512,
}

impl Algorithm {
    /// Prefix used in the `algorithm:hex` notation
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }

    /// Length of the hex encoding of a digest of this algorithm
    #[must_use]
    pub fn hex_len(self) -> usize {
        match self {
            Self::Sha1 => 40,
            Self::Sha256 => 64,
            Self::Sha512 => 128,
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "sha1" => Some(Self::Sha1),
            "sha256" => Some(Self::Sha256),
            "sha512" => Some(Self::Sha512),
            _ => None,
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single digest value
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Digest {
    algorithm: Algorithm,
    hex: String,
}

impl Digest {
    /// Build a digest from an algorithm and its hex encoding
    ///
    /// # Errors
    /// Returns an error if the hex string has the wrong length or is not hexadecimal.
    pub fn new(algorithm: Algorithm, hex: impl Into<String>) -> Result<Self, Error> {
        let hex = hex.into().to_ascii_lowercase();
        if hex.len() != algorithm.hex_len() || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(StorageError::CorruptedData {
                message: format!("invalid {algorithm} digest: {hex}"),
            }
            .into());
        }
        Ok(Self { algorithm, hex })
    }

    #[must_use]
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    #[must_use]
    pub fn to_hex(&self) -> &str {
        &self.hex
    }

    /// Compute a digest over a byte slice
    #[must_use]
    pub fn from_data(algorithm: Algorithm, data: &[u8]) -> Self {
        let mut state = HashState::new(algorithm);
        state.update(data);
        state.finish()
    }

    /// Compute a digest of a file
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or read.
    pub async fn hash_file(algorithm: Algorithm, path: &Path) -> Result<Self, Error> {
        let mut digests = hash_file_with(path, &[algorithm]).await?;
        digests
            .pop()
            .ok_or_else(|| Error::internal("hash produced no digest"))
    }
}

impl FromStr for Digest {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.split_once(':') {
            Some((name, hex)) => {
                let algorithm =
                    Algorithm::from_name(name).ok_or_else(|| StorageError::CorruptedData {
                        message: format!("unknown digest algorithm: {name}"),
                    })?;
                Self::new(algorithm, hex)
            }
            // Bare hex is a legacy SHA-1 checksum
            None => Self::new(Algorithm::Sha1, s),
        }
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.algorithm {
            Algorithm::Sha1 => f.write_str(&self.hex),
            other => write!(f, "{other}:{}", self.hex),
        }
    }
}

/// One or more digests describing the same content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipleDigest {
    digests: Vec<Digest>,
}

impl MultipleDigest {
    /// Build from a non-empty list of digests
    ///
    /// # Errors
    /// Returns an error if the list is empty or names an algorithm twice.
    pub fn new(digests: Vec<Digest>) -> Result<Self, Error> {
        if digests.is_empty() {
            return Err(StorageError::CorruptedData {
                message: "checksum must contain at least one digest".to_string(),
            }
            .into());
        }
        for (i, digest) in digests.iter().enumerate() {
            if digests[..i].iter().any(|d| d.algorithm == digest.algorithm) {
                return Err(StorageError::CorruptedData {
                    message: format!("checksum lists {} twice", digest.algorithm),
                }
                .into());
            }
        }
        Ok(Self { digests })
    }

    #[must_use]
    pub fn digests(&self) -> &[Digest] {
        &self.digests
    }

    /// The digest computed with the strongest algorithm
    #[must_use]
    pub fn strongest(&self) -> &Digest {
        // new() guarantees at least one entry
        let mut best = &self.digests[0];
        for digest in &self.digests[1..] {
            if digest.algorithm > best.algorithm {
                best = digest;
            }
        }
        best
    }

    /// Compute a multiple digest of a file in one pass
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or `algorithms` is empty.
    pub async fn compute_file(path: &Path, algorithms: &[Algorithm]) -> Result<Self, Error> {
        Self::new(hash_file_with(path, algorithms).await?)
    }
}

impl From<Digest> for MultipleDigest {
    fn from(digest: Digest) -> Self {
        Self {
            digests: vec![digest],
        }
    }
}

impl FromStr for MultipleDigest {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digests = s
            .split(';')
            .filter(|part| !part.trim().is_empty())
            .map(Digest::from_str)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(digests)
    }
}

impl fmt::Display for MultipleDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, digest) in self.digests.iter().enumerate() {
            if i > 0 {
                f.write_str(";")?;
            }
            write!(f, "{digest}")?;
        }
        Ok(())
    }
}

impl Serialize for MultipleDigest {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for MultipleDigest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

enum HashState {
    Sha1(sha1::Sha1),
    Sha256(sha2::Sha256),
    Sha512(sha2::Sha512),
}

impl HashState {
    fn new(algorithm: Algorithm) -> Self {
        match algorithm {
            Algorithm::Sha1 => Self::Sha1(sha1::Sha1::new()),
            Algorithm::Sha256 => Self::Sha256(sha2::Sha256::new()),
            Algorithm::Sha512 => Self::Sha512(sha2::Sha512::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha1(h) => h.update(data),
            Self::Sha256(h) => h.update(data),
            Self::Sha512(h) => h.update(data),
        }
    }

    fn finish(self) -> Digest {
        let (algorithm, hex) = match self {
            Self::Sha1(h) => (Algorithm::Sha1, hex::encode(h.finalize())),
            Self::Sha256(h) => (Algorithm::Sha256, hex::encode(h.finalize())),
            Self::Sha512(h) => (Algorithm::Sha512, hex::encode(h.finalize())),
        };
        Digest { algorithm, hex }
    }
}

async fn hash_file_with(path: &Path, algorithms: &[Algorithm]) -> Result<Vec<Digest>, Error> {
    let mut file = File::open(path)
        .await
        .map_err(|e| StorageError::from_io_with_path(&e, path))?;

    let mut states: Vec<HashState> = algorithms.iter().copied().map(HashState::new).collect();
    let mut buffer = vec![0; CHUNK_SIZE];

    loop {
        let n = file
            .read(&mut buffer)
            .await
            .map_err(|e| StorageError::from_io_with_path(&e, path))?;
        if n == 0 {
            break;
        }
        for state in &mut states {
            state.update(&buffer[..n]);
        }
    }

    Ok(states.into_iter().map(HashState::finish).collect())
}
