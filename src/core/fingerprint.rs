use image_hasher::{HashAlg, Hasher, HasherConfig};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

/// Side length of the luminance grid the photo is reduced to.
pub const FINGERPRINT_SIDE: u32 = 16;

/// Bits in every fingerprint produced by [`FingerprintService`].
pub const FINGERPRINT_BITS: usize = (FINGERPRINT_SIDE * FINGERPRINT_SIDE) as usize;

#[derive(Debug, Error)]
pub enum FingerprintError {
    #[error("Image decode failed: {0}")]
    Decode(#[from] image::ImageError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComparisonError {
    #[error("Fingerprint length mismatch: {left} bits vs {right} bits")]
    LengthMismatch { left: usize, right: usize },
}

/// Perceptual image fingerprint. Serialized as lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Fingerprint(Vec<u8>);

impl Fingerprint {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn from_hex(encoded: &str) -> Result<Self, hex::FromHexError> {
        hex::decode(encoded).map(Self)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn bit_len(&self) -> usize {
        self.0.len() * 8
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    /// Hamming distance: the number of bit positions that differ.
    pub fn distance(&self, other: &Fingerprint) -> Result<u32, ComparisonError> {
        if self.0.len() != other.0.len() {
            return Err(ComparisonError::LengthMismatch {
                left: self.bit_len(),
                right: other.bit_len(),
            });
        }

        Ok(self
            .0
            .iter()
            .zip(&other.0)
            .map(|(a, b)| (a ^ b).count_ones())
            .sum())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl From<Fingerprint> for String {
    fn from(fingerprint: Fingerprint) -> Self {
        fingerprint.to_hex()
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = hex::FromHexError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Fingerprint::from_hex(&value)
    }
}

/// Service for deriving fingerprints and content digests from photo bytes
pub struct FingerprintService {
    hasher: Hasher,
}

impl FingerprintService {
    pub fn new() -> Self {
        let hasher = HasherConfig::new()
            .hash_alg(HashAlg::Mean)
            .hash_size(FINGERPRINT_SIDE, FINGERPRINT_SIDE)
            .to_hasher();

        Self { hasher }
    }

    /// Decode the photo and compute its mean hash over a 16x16 luminance grid.
    pub fn fingerprint(&self, image_bytes: &[u8]) -> Result<Fingerprint, FingerprintError> {
        let image = image::load_from_memory(image_bytes)?;
        let hash = self.hasher.hash_image(&image);
        Ok(Fingerprint(hash.as_bytes().to_vec()))
    }

    /// Fingerprint several photos in parallel, keeping the caller's labels and order.
    pub fn fingerprint_batch<'a>(
        &self,
        images: &[(&'a str, &'a [u8])],
    ) -> Vec<(&'a str, Result<Fingerprint, FingerprintError>)> {
        use rayon::prelude::*;

        images
            .par_iter()
            .map(|(label, bytes)| (*label, self.fingerprint(bytes)))
            .collect()
    }

    /// SHA-256 of the raw bytes, used as the photo's storage key.
    pub fn content_digest(&self, image_bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(image_bytes);
        format!("{:x}", hasher.finalize())
    }
}

impl Default for FingerprintService {
    fn default() -> Self {
        Self::new()
    }
}
