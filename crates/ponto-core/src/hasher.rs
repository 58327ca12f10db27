//! DCT perceptual hash of a face crop.
//!
//! The crop is converted to grayscale, histogram-equalized, resized to
//! 32×32 and transformed with an orthonormal 2-D DCT-II. The 8×8
//! lowest-frequency block (DC forced to zero) is thresholded against its
//! mean: bit `k` of byte `j` is set when coefficient `(j, k)` is above it.

use crate::imgproc::{self, ImageError};
use crate::types::{Fingerprint, FINGERPRINT_BYTES};
use thiserror::Error;

const PHASH_INPUT_SIZE: usize = 32;
const PHASH_BLOCK: usize = 8;

#[derive(Error, Debug)]
pub enum HashError {
    #[error("invalid face crop: {0}")]
    Image(#[from] ImageError),
}

/// Strategy for turning a BGR face crop into a fingerprint.
pub trait FaceHasher: Send + Sync {
    fn fingerprint(&self, bgr: &[u8], width: u32, height: u32) -> Result<Fingerprint, HashError>;
}

/// DCT-based 64-bit perceptual hasher.
///
/// Pure function of pixel content: identical crops always produce
/// identical fingerprints.
pub struct PerceptualHasher {
    /// Rows `0..8` of the 32-point orthonormal DCT-II basis, row-major.
    basis: Vec<f64>,
}

impl Default for PerceptualHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl PerceptualHasher {
    pub fn new() -> Self {
        let n = PHASH_INPUT_SIZE as f64;
        let mut basis = vec![0.0f64; PHASH_BLOCK * PHASH_INPUT_SIZE];
        for k in 0..PHASH_BLOCK {
            let alpha = if k == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };
            for i in 0..PHASH_INPUT_SIZE {
                basis[k * PHASH_INPUT_SIZE + i] = alpha
                    * (std::f64::consts::PI * (2.0 * i as f64 + 1.0) * k as f64 / (2.0 * n)).cos();
            }
        }
        Self { basis }
    }

    /// Fingerprint an already-grayscale crop. Equalization is still applied.
    pub fn fingerprint_gray(
        &self,
        gray: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Fingerprint, HashError> {
        let expected = imgproc::check_len(gray, width, height, 1)?;
        let mut equalized = gray[..expected].to_vec();
        imgproc::equalize_hist(&mut equalized);

        let resized = imgproc::resize_bilinear(
            &equalized,
            width,
            height,
            PHASH_INPUT_SIZE as u32,
            PHASH_INPUT_SIZE as u32,
        )?;

        let block = self.low_frequency_block(&resized);
        Ok(Self::threshold(&block))
    }

    /// 8×8 top-left block of the 2-D DCT of a 32×32 image.
    fn low_frequency_block(&self, pixels: &[u8]) -> [f64; PHASH_BLOCK * PHASH_BLOCK] {
        let n = PHASH_INPUT_SIZE;

        // Row pass: t[i][v] = sum_j x[i][j] * c[v][j]
        let mut t = vec![0.0f64; n * PHASH_BLOCK];
        for i in 0..n {
            for v in 0..PHASH_BLOCK {
                let mut acc = 0.0;
                for j in 0..n {
                    acc += pixels[i * n + j] as f64 * self.basis[v * n + j];
                }
                t[i * PHASH_BLOCK + v] = acc;
            }
        }

        // Column pass: y[u][v] = sum_i c[u][i] * t[i][v]
        let mut block = [0.0f64; PHASH_BLOCK * PHASH_BLOCK];
        for u in 0..PHASH_BLOCK {
            for v in 0..PHASH_BLOCK {
                let mut acc = 0.0;
                for i in 0..n {
                    acc += self.basis[u * n + i] * t[i * PHASH_BLOCK + v];
                }
                block[u * PHASH_BLOCK + v] = acc;
            }
        }
        block
    }

    fn threshold(block: &[f64; PHASH_BLOCK * PHASH_BLOCK]) -> Fingerprint {
        let mut coeffs = *block;
        coeffs[0] = 0.0;
        let mean = coeffs.iter().sum::<f64>() / coeffs.len() as f64;

        let mut bytes = [0u8; FINGERPRINT_BYTES];
        for (j, byte) in bytes.iter_mut().enumerate() {
            for k in 0..PHASH_BLOCK {
                if coeffs[j * PHASH_BLOCK + k] > mean {
                    *byte |= 1 << k;
                }
            }
        }
        Fingerprint::from_bytes(bytes)
    }
}

impl FaceHasher for PerceptualHasher {
    fn fingerprint(&self, bgr: &[u8], width: u32, height: u32) -> Result<Fingerprint, HashError> {
        let gray = imgproc::bgr_to_gray(bgr, width, height)?;
        self.fingerprint_gray(&gray, width, height)
    }
}
