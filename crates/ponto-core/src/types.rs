use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Number of bytes in a perceptual fingerprint.
pub const FINGERPRINT_BYTES: usize = 8;
/// Number of bits in a perceptual fingerprint; the upper bound of [`Fingerprint::distance`].
pub const FINGERPRINT_BITS: u32 = 64;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FingerprintError {
    #[error("fingerprint must be {expected} hex characters, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("fingerprint contains non-hex characters: {0:?}")]
    InvalidHex(String),
}

/// 64-bit perceptual hash of a normalized face crop.
///
/// Persisted as 16 lowercase hex characters; byte order is the order the
/// hasher emits bytes (row `j` of the 8×8 DCT block is byte `j`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; FINGERPRINT_BYTES]);

impl Fingerprint {
    pub const fn from_bytes(bytes: [u8; FINGERPRINT_BYTES]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_BYTES] {
        &self.0
    }

    /// Parse the persisted hex form. Accepts either case, rejects anything
    /// that is not exactly 16 hex digits.
    pub fn from_hex(hex: &str) -> Result<Self, FingerprintError> {
        let hex = hex.trim();
        if hex.len() != FINGERPRINT_BYTES * 2 {
            return Err(FingerprintError::InvalidLength {
                expected: FINGERPRINT_BYTES * 2,
                actual: hex.len(),
            });
        }
        if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(FingerprintError::InvalidHex(hex.to_string()));
        }

        let mut bytes = [0u8; FINGERPRINT_BYTES];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
                .map_err(|_| FingerprintError::InvalidHex(hex.to_string()))?;
        }
        Ok(Self(bytes))
    }

    /// Lowercase 16-character hex encoding used for storage.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Hamming distance: number of differing bits, in `0..=64`.
    pub fn distance(&self, other: &Fingerprint) -> u32 {
        (u64::from_be_bytes(self.0) ^ u64::from_be_bytes(other.0)).count_ones()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Fingerprint {
    type Err = FingerprintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Axis-aligned face region in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Clip the rectangle to a `width × height` frame. Returns `None` when
    /// nothing of it remains inside.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<FaceRect> {
        if self.x >= width || self.y >= height {
            return None;
        }
        let w = self.width.min(width - self.x);
        let h = self.height.min(height - self.y);
        if w == 0 || h == 0 {
            return None;
        }
        Some(FaceRect::new(self.x, self.y, w, h))
    }
}

/// One roster row as returned by the employee directory's full scan.
///
/// The fingerprint stays in its stored text form; parsing happens during
/// the scan so a malformed row is skipped instead of failing the read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub id: i64,
    pub name: String,
    pub registration_number: String,
    pub fingerprint_hex: Option<String>,
    pub portrait: Vec<u8>,
}

/// What the scanner made of a roster row's stored fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredFingerprint {
    Enrolled(Fingerprint),
    NotEnrolled,
    Malformed(FingerprintError),
}

impl DirectoryEntry {
    pub fn stored_fingerprint(&self) -> StoredFingerprint {
        match self.fingerprint_hex.as_deref().map(str::trim) {
            None | Some("") => StoredFingerprint::NotEnrolled,
            Some(hex) => match Fingerprint::from_hex(hex) {
                Ok(fp) => StoredFingerprint::Enrolled(fp),
                Err(e) => StoredFingerprint::Malformed(e),
            },
        }
    }
}

/// Closest enrolled fingerprint to a query within one roster snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NearestMatch {
    /// Position of the entry in the scanned slice.
    pub index: usize,
    pub employee_id: i64,
    /// Hamming distance in `0..=64`.
    pub distance: u32,
}

/// Strategy for scanning a query fingerprint against the enrolled roster.
pub trait Matcher {
    fn nearest(&self, query: &Fingerprint, roster: &[DirectoryEntry]) -> Option<NearestMatch>;
}

/// Linear Hamming-distance scan over the whole roster.
///
/// Visits every entry; ties keep the earliest entry. Rows without a
/// fingerprint or with an undecodable one are skipped.
pub struct HammingMatcher;

impl Matcher for HammingMatcher {
    fn nearest(&self, query: &Fingerprint, roster: &[DirectoryEntry]) -> Option<NearestMatch> {
        let mut best: Option<NearestMatch> = None;

        for (index, entry) in roster.iter().enumerate() {
            let enrolled = match entry.stored_fingerprint() {
                StoredFingerprint::Enrolled(fp) => fp,
                StoredFingerprint::NotEnrolled => continue,
                StoredFingerprint::Malformed(e) => {
                    tracing::warn!(employee = entry.id, error = %e, "skipping malformed stored fingerprint");
                    continue;
                }
            };

            let distance = query.distance(&enrolled);
            tracing::trace!(employee = entry.id, distance, "scanned");

            if best.map_or(true, |b| distance < b.distance) {
                best = Some(NearestMatch {
                    index,
                    employee_id: entry.id,
                    distance,
                });
            }
        }

        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(hex: &str) -> Fingerprint {
        Fingerprint::from_hex(hex).unwrap()
    }

    fn entry(id: i64, hex: Option<&str>) -> DirectoryEntry {
        DirectoryEntry {
            id,
            name: format!("employee {id}"),
            registration_number: format!("{}", 1000 + id),
            fingerprint_hex: hex.map(str::to_string),
            portrait: Vec::new(),
        }
    }

    #[test]
    fn test_hex_roundtrip_is_lowercase() {
        let f = fp("00FF00ff00Ff00Fe");
        assert_eq!(f.to_hex(), "00ff00ff00ff00fe");
        assert_eq!(f.as_bytes(), &[0x00, 0xff, 0x00, 0xff, 0x00, 0xff, 0x00, 0xfe]);
    }

    #[test]
    fn test_from_hex_rejects_bad_length() {
        assert_eq!(
            Fingerprint::from_hex("00ff"),
            Err(FingerprintError::InvalidLength { expected: 16, actual: 4 })
        );
    }

    #[test]
    fn test_from_hex_rejects_non_hex() {
        assert!(matches!(
            Fingerprint::from_hex("00ff00ff00ff00zz"),
            Err(FingerprintError::InvalidHex(_))
        ));
    }

    #[test]
    fn test_distance_one_bit() {
        assert_eq!(fp("00ff00ff00ff00ff").distance(&fp("00ff00ff00ff00fe")), 1);
    }

    #[test]
    fn test_distance_all_bits() {
        assert_eq!(fp("00ff00ff00ff00ff").distance(&fp("ff00ff00ff00ff00")), 64);
    }

    #[test]
    fn test_distance_symmetric_bounded_and_reflexive() {
        let samples = [
            fp("0000000000000000"),
            fp("ffffffffffffffff"),
            fp("0123456789abcdef"),
            fp("fedcba9876543210"),
            fp("8000000000000001"),
        ];
        for a in &samples {
            assert_eq!(a.distance(a), 0);
            for b in &samples {
                assert_eq!(a.distance(b), b.distance(a));
                assert!(a.distance(b) <= FINGERPRINT_BITS);
            }
        }
    }

    #[test]
    fn test_serde_as_hex_string() {
        let json = serde_json::to_string(&fp("0123456789abcdef")).unwrap();
        assert_eq!(json, "\"0123456789abcdef\"");
        let back: Fingerprint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fp("0123456789abcdef"));
    }

    #[test]
    fn test_stored_fingerprint_classification() {
        assert_eq!(entry(1, None).stored_fingerprint(), StoredFingerprint::NotEnrolled);
        assert_eq!(entry(1, Some("")).stored_fingerprint(), StoredFingerprint::NotEnrolled);
        assert!(matches!(
            entry(1, Some("abc")).stored_fingerprint(),
            StoredFingerprint::Malformed(_)
        ));
        assert_eq!(
            entry(1, Some("00ff00ff00ff00ff")).stored_fingerprint(),
            StoredFingerprint::Enrolled(fp("00ff00ff00ff00ff"))
        );
    }

    #[test]
    fn test_matcher_scans_entire_roster() {
        // Best match is the last entry
        let query = fp("00ff00ff00ff00ff");
        let roster = vec![
            entry(1, Some("ffffffffffffffff")),
            entry(2, Some("0000000000000000")),
            entry(3, Some("00ff00ff00ff00fe")),
        ];
        let m = HammingMatcher.nearest(&query, &roster).unwrap();
        assert_eq!(m.employee_id, 3);
        assert_eq!(m.index, 2);
        assert_eq!(m.distance, 1);
    }

    #[test]
    fn test_matcher_skips_malformed_and_unenrolled() {
        let query = fp("00ff00ff00ff00ff");
        let roster = vec![
            entry(1, Some("not-a-fingerprint")),
            entry(2, None),
            entry(3, Some("00ff00ff00ff")),
            entry(4, Some("ff00ff00ff00ff00")),
        ];
        let m = HammingMatcher.nearest(&query, &roster).unwrap();
        assert_eq!(m.employee_id, 4);
        assert_eq!(m.distance, 64);
    }

    #[test]
    fn test_matcher_empty_or_unusable_roster() {
        let query = fp("00ff00ff00ff00ff");
        assert_eq!(HammingMatcher.nearest(&query, &[]), None);
        assert_eq!(HammingMatcher.nearest(&query, &[entry(1, Some("zz"))]), None);
    }

    #[test]
    fn test_matcher_tie_keeps_first() {
        let query = fp("0000000000000000");
        let roster = vec![
            entry(7, Some("0000000000000001")),
            entry(8, Some("0000000000000002")),
        ];
        assert_eq!(HammingMatcher.nearest(&query, &roster).unwrap().employee_id, 7);
    }

    #[test]
    fn test_matcher_idempotent() {
        let query = fp("0123456789abcdef");
        let roster = vec![
            entry(1, Some("0123456789abcdee")),
            entry(2, Some("fedcba9876543210")),
        ];
        assert_eq!(
            HammingMatcher.nearest(&query, &roster),
            HammingMatcher.nearest(&query, &roster)
        );
    }

    #[test]
    fn test_rect_clamp() {
        let r = FaceRect::new(90, 90, 20, 20);
        assert_eq!(r.clamp_to(100, 100), Some(FaceRect::new(90, 90, 10, 10)));
        assert_eq!(r.clamp_to(50, 50), None);
    }
}
