//! ponto-core — Face location, fingerprinting and matching for the attendance checkpoint.
//!
//! Faces are located with an OpenCV Haar cascade, reduced to a 64-bit DCT
//! perceptual hash, and matched by Hamming distance against the roster.

pub mod detector;
pub mod enrollment;
pub mod hasher;
pub mod imgproc;
pub mod types;

pub use detector::{CascadeDetector, DetectParams, DetectorError, FaceLocator};
pub use enrollment::{EnrollmentForm, ValidatedEnrollment, ValidationError};
pub use hasher::{FaceHasher, HashError, PerceptualHasher};
pub use types::{DirectoryEntry, FaceRect, Fingerprint, HammingMatcher, Matcher, NearestMatch};
