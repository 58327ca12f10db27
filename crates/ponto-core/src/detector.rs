//! Haar cascade face locator.
//!
//! Evaluates an OpenCV boosted Haar cascade (the XML format written by
//! `opencv_traincascade`, e.g. `haarcascade_frontalface_default.xml`) over
//! an image pyramid, then merges overlapping hits with neighbor voting.

use crate::imgproc::{self, ImageError, IntegralImage};
use crate::types::FaceRect;
use std::path::Path;
use thiserror::Error;

// --- Product constants ---
pub const DEFAULT_SCALE_FACTOR: f32 = 1.1;
pub const DEFAULT_MIN_NEIGHBORS: u32 = 5;
pub const IDENTIFICATION_MIN_FACE: u32 = 100;
pub const ENROLLMENT_MIN_FACE: u32 = 30;
/// Relative tolerance used when clustering raw hits.
const GROUP_EPS: f64 = 0.2;
/// Above this pyramid factor windows are scanned at every pixel instead of every other.
const DENSE_STEP_FACTOR: f32 = 2.0;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("cascade file not found: {0}")]
    ModelNotFound(String),
    #[error("failed to read cascade: {0}")]
    Io(#[from] std::io::Error),
    #[error("cascade xml: {0}")]
    Xml(#[from] roxmltree::Error),
    #[error("malformed cascade: {0}")]
    Malformed(String),
    #[error("unsupported cascade: {0}")]
    Unsupported(String),
    #[error("invalid detection parameters: {0}")]
    InvalidParams(String),
    #[error("invalid frame: {0}")]
    Image(#[from] ImageError),
}

/// Detection parameters. Fixed per use site, not tuned at runtime.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectParams {
    /// Pyramid step between scales, must be > 1.
    pub scale_factor: f32,
    /// A merged face needs strictly more raw hits than this.
    pub min_neighbors: u32,
    /// Smallest face (width, height) reported, in frame pixels.
    pub min_size: (u32, u32),
}

impl DetectParams {
    pub fn identification() -> Self {
        Self {
            scale_factor: DEFAULT_SCALE_FACTOR,
            min_neighbors: DEFAULT_MIN_NEIGHBORS,
            min_size: (IDENTIFICATION_MIN_FACE, IDENTIFICATION_MIN_FACE),
        }
    }

    pub fn enrollment() -> Self {
        Self {
            min_size: (ENROLLMENT_MIN_FACE, ENROLLMENT_MIN_FACE),
            ..Self::identification()
        }
    }
}

/// Locates candidate face regions in a grayscale frame.
///
/// Output order is implementation-defined; callers that need a single face
/// take the first element.
pub trait FaceLocator: Send + Sync {
    fn locate(
        &self,
        gray: &[u8],
        width: u32,
        height: u32,
        params: &DetectParams,
    ) -> Result<Vec<FaceRect>, DetectorError>;
}

#[derive(Debug, Clone)]
struct HaarRect {
    x: usize,
    y: usize,
    w: usize,
    h: usize,
    weight: f64,
}

#[derive(Debug, Clone)]
struct HaarFeature {
    rects: Vec<HaarRect>,
}

/// Depth-1 decision tree over one feature.
#[derive(Debug, Clone)]
struct Stump {
    feature: usize,
    threshold: f64,
    left: f64,
    right: f64,
}

#[derive(Debug, Clone)]
struct Stage {
    threshold: f64,
    stumps: Vec<Stump>,
}

/// A parsed boosted Haar cascade.
#[derive(Debug, Clone)]
pub struct Cascade {
    window_width: usize,
    window_height: usize,
    stages: Vec<Stage>,
    features: Vec<HaarFeature>,
}

impl Cascade {
    /// Parse an OpenCV cascade XML document.
    ///
    /// Only upright Haar features with stump weak classifiers are accepted,
    /// which covers the stock frontal-face cascades.
    pub fn from_xml(text: &str) -> Result<Self, DetectorError> {
        let doc = roxmltree::Document::parse(text)?;
        let root = doc
            .descendants()
            .find(|n| n.has_tag_name("cascade"))
            .ok_or_else(|| DetectorError::Malformed("missing <cascade> element".into()))?;

        let feature_type = child_text(root, "featureType")?;
        if feature_type != "HAAR" {
            return Err(DetectorError::Unsupported(format!(
                "feature type {feature_type} (need HAAR)"
            )));
        }

        let window_width: usize = parse_scalar(child_text(root, "width")?, "width")?;
        let window_height: usize = parse_scalar(child_text(root, "height")?, "height")?;
        if window_width < 3 || window_height < 3 {
            return Err(DetectorError::Malformed(format!(
                "window {window_width}x{window_height} too small"
            )));
        }

        let mut features = Vec::new();
        for (fi, node) in elements(child(root, "features")?).enumerate() {
            if let Ok(tilted) = child_text(node, "tilted") {
                if tilted != "0" {
                    return Err(DetectorError::Unsupported(format!("feature {fi} is tilted")));
                }
            }
            let mut rects = Vec::new();
            for rect in elements(child(node, "rects")?) {
                let v = numbers(rect.text().unwrap_or(""))?;
                if v.len() != 5 {
                    return Err(DetectorError::Malformed(format!(
                        "feature {fi}: rect needs 5 values, got {}",
                        v.len()
                    )));
                }
                let r = HaarRect {
                    x: v[0] as usize,
                    y: v[1] as usize,
                    w: v[2] as usize,
                    h: v[3] as usize,
                    weight: v[4],
                };
                if r.x + r.w > window_width || r.y + r.h > window_height {
                    return Err(DetectorError::Malformed(format!(
                        "feature {fi}: rect outside {window_width}x{window_height} window"
                    )));
                }
                rects.push(r);
            }
            features.push(HaarFeature { rects });
        }

        let mut stages = Vec::new();
        for (si, node) in elements(child(root, "stages")?).enumerate() {
            let threshold: f64 = parse_scalar(child_text(node, "stageThreshold")?, "stageThreshold")?;
            let mut stumps = Vec::new();
            for weak in elements(child(node, "weakClassifiers")?) {
                let internal = numbers(child_text(weak, "internalNodes")?)?;
                let leaves = numbers(child_text(weak, "leafValues")?)?;
                if internal.len() != 4 {
                    return Err(DetectorError::Unsupported(format!(
                        "stage {si}: weak classifier with {} internal values (only stumps supported)",
                        internal.len() / 4
                    )));
                }
                // internalNodes: left right featureIdx threshold; leaves are <= 0
                let (left, right) = (internal[0], internal[1]);
                if left > 0.0 || right > 0.0 {
                    return Err(DetectorError::Unsupported(format!(
                        "stage {si}: weak classifier deeper than a stump"
                    )));
                }
                let leaf = |idx: f64| -> Result<f64, DetectorError> {
                    leaves.get((-idx) as usize).copied().ok_or_else(|| {
                        DetectorError::Malformed(format!("stage {si}: leaf index {idx} out of range"))
                    })
                };
                let feature = internal[2] as usize;
                if feature >= features.len() {
                    return Err(DetectorError::Malformed(format!(
                        "stage {si}: feature index {feature} out of range"
                    )));
                }
                stumps.push(Stump {
                    feature,
                    threshold: internal[3],
                    left: leaf(left)?,
                    right: leaf(right)?,
                });
            }
            stages.push(Stage { threshold, stumps });
        }

        if stages.is_empty() {
            return Err(DetectorError::Malformed("cascade has no stages".into()));
        }

        Ok(Self {
            window_width,
            window_height,
            stages,
            features,
        })
    }

    pub fn window_size(&self) -> (usize, usize) {
        (self.window_width, self.window_height)
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Run every stage on the window whose top-left corner is `(x, y)`.
    fn passes(&self, ii: &IntegralImage, x: usize, y: usize) -> bool {
        // Variance normalization over the window minus a 1-pixel border
        let (nw, nh) = (self.window_width - 2, self.window_height - 2);
        let area = (nw * nh) as f64;
        let sum = ii.rect_sum(x + 1, y + 1, nw, nh) as f64;
        let sq_sum = ii.rect_sq_sum(x + 1, y + 1, nw, nh) as f64;
        let variance = area * sq_sum - sum * sum;
        let norm = if variance > 0.0 { variance.sqrt() } else { 1.0 };

        for stage in &self.stages {
            let mut score = 0.0f64;
            for stump in &stage.stumps {
                let value: f64 = self.features[stump.feature]
                    .rects
                    .iter()
                    .map(|r| r.weight * ii.rect_sum(x + r.x, y + r.y, r.w, r.h) as f64)
                    .sum();
                score += if value < stump.threshold * norm {
                    stump.left
                } else {
                    stump.right
                };
            }
            if score < stage.threshold {
                return false;
            }
        }
        true
    }
}

/// Multi-scale Haar cascade detector.
pub struct CascadeDetector {
    cascade: Cascade,
}

impl CascadeDetector {
    /// Load an OpenCV cascade XML file from the given path.
    pub fn load(path: &str) -> Result<Self, DetectorError> {
        if !Path::new(path).exists() {
            return Err(DetectorError::ModelNotFound(path.to_string()));
        }
        let text = std::fs::read_to_string(path)?;
        let cascade = Cascade::from_xml(&text)?;

        tracing::info!(
            path,
            window = ?cascade.window_size(),
            stages = cascade.stage_count(),
            features = cascade.features.len(),
            "loaded Haar cascade"
        );

        Ok(Self { cascade })
    }

    pub fn from_cascade(cascade: Cascade) -> Self {
        Self { cascade }
    }

    /// Raw window hits across the pyramid, in frame coordinates, before grouping.
    fn scan(
        &self,
        gray: &[u8],
        width: u32,
        height: u32,
        params: &DetectParams,
    ) -> Result<Vec<FaceRect>, DetectorError> {
        let (ww, wh) = self.cascade.window_size();
        let mut hits = Vec::new();
        let mut factor = 1.0f32;

        loop {
            let win_w = (ww as f32 * factor).round() as u32;
            let win_h = (wh as f32 * factor).round() as u32;
            if win_w > width || win_h > height {
                break;
            }

            if win_w >= params.min_size.0 && win_h >= params.min_size.1 {
                let sw = ((width as f32 / factor).round() as u32).max(ww as u32);
                let sh = ((height as f32 / factor).round() as u32).max(wh as u32);
                let scaled = if factor == 1.0 {
                    gray[..(width * height) as usize].to_vec()
                } else {
                    imgproc::resize_bilinear(gray, width, height, sw, sh)?
                };
                let ii = IntegralImage::new(&scaled, sw, sh)?;
                let step = if factor > DENSE_STEP_FACTOR { 1 } else { 2 };

                for y in (0..=(sh as usize - wh)).step_by(step) {
                    for x in (0..=(sw as usize - ww)).step_by(step) {
                        if !self.cascade.passes(&ii, x, y) {
                            continue;
                        }
                        // Rounding the scaled size can push the last column past the frame edge
                        let hit = FaceRect::new(
                            (x as f32 * factor).round() as u32,
                            (y as f32 * factor).round() as u32,
                            win_w,
                            win_h,
                        );
                        hits.extend(hit.clamp_to(width, height));
                    }
                }
            }

            factor *= params.scale_factor;
        }

        Ok(hits)
    }
}

impl FaceLocator for CascadeDetector {
    fn locate(
        &self,
        gray: &[u8],
        width: u32,
        height: u32,
        params: &DetectParams,
    ) -> Result<Vec<FaceRect>, DetectorError> {
        if params.scale_factor <= 1.0 || !params.scale_factor.is_finite() {
            return Err(DetectorError::InvalidParams(format!(
                "scale factor must be > 1, got {}",
                params.scale_factor
            )));
        }
        imgproc::check_len(gray, width, height, 1)?;

        let hits = self.scan(gray, width, height, params)?;
        let faces = group_rectangles(&hits, params.min_neighbors, GROUP_EPS);
        tracing::trace!(raw = hits.len(), grouped = faces.len(), "cascade scan");
        Ok(faces)
    }
}

fn child<'a, 'i>(
    node: roxmltree::Node<'a, 'i>,
    name: &str,
) -> Result<roxmltree::Node<'a, 'i>, DetectorError> {
    node.children()
        .find(|n| n.has_tag_name(name))
        .ok_or_else(|| DetectorError::Malformed(format!("missing <{name}>")))
}

fn child_text<'a>(node: roxmltree::Node<'a, '_>, name: &str) -> Result<&'a str, DetectorError> {
    Ok(child(node, name)?.text().unwrap_or("").trim())
}

fn elements<'a, 'i>(node: roxmltree::Node<'a, 'i>) -> impl Iterator<Item = roxmltree::Node<'a, 'i>> {
    node.children().filter(|n| n.is_element())
}

fn parse_scalar<T: std::str::FromStr>(text: &str, what: &str) -> Result<T, DetectorError> {
    text.trim()
        .parse()
        .map_err(|_| DetectorError::Malformed(format!("bad {what}: {text:?}")))
}

fn numbers(text: &str) -> Result<Vec<f64>, DetectorError> {
    text.split_whitespace()
        .map(|t| parse_scalar::<f64>(t, "number"))
        .collect()
}

/// Two rects belong to one face when all four edges are within
/// `eps * mean(min side)` of each other.
fn similar(a: &FaceRect, b: &FaceRect, eps: f64) -> bool {
    let delta = eps
        * (a.width.min(b.width) as f64 + a.height.min(b.height) as f64)
        * 0.5;
    let (ax, ay, aw, ah) = (a.x as f64, a.y as f64, a.width as f64, a.height as f64);
    let (bx, by, bw, bh) = (b.x as f64, b.y as f64, b.width as f64, b.height as f64);
    (ax - bx).abs() <= delta
        && (ay - by).abs() <= delta
        && (ax + aw - bx - bw).abs() <= delta
        && (ay + ah - by - bh).abs() <= delta
}

fn find_root(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

/// Cluster raw hits, average each cluster, and keep clusters with more than
/// `min_neighbors` members that are not nested inside a stronger cluster.
///
/// Clusters are emitted in order of their first member in `rects`.
fn group_rectangles(rects: &[FaceRect], min_neighbors: u32, eps: f64) -> Vec<FaceRect> {
    if min_neighbors == 0 {
        return rects.to_vec();
    }

    let n = rects.len();
    let mut parent: Vec<usize> = (0..n).collect();
    for i in 0..n {
        for j in 0..i {
            if similar(&rects[i], &rects[j], eps) {
                let ri = find_root(&mut parent, i);
                let rj = find_root(&mut parent, j);
                if ri != rj {
                    parent[ri] = rj;
                }
            }
        }
    }

    // Label clusters in first-appearance order and accumulate coordinates
    let mut label_of_root: Vec<Option<usize>> = vec![None; n];
    let mut sums: Vec<[f64; 4]> = Vec::new();
    let mut counts: Vec<u32> = Vec::new();
    for (i, r) in rects.iter().enumerate() {
        let root = find_root(&mut parent, i);
        let label = *label_of_root[root].get_or_insert_with(|| {
            sums.push([0.0; 4]);
            counts.push(0);
            sums.len() - 1
        });
        sums[label][0] += r.x as f64;
        sums[label][1] += r.y as f64;
        sums[label][2] += r.width as f64;
        sums[label][3] += r.height as f64;
        counts[label] += 1;
    }

    let averaged: Vec<FaceRect> = sums
        .iter()
        .zip(&counts)
        .map(|(s, &c)| {
            let c = c as f64;
            FaceRect::new(
                (s[0] / c).round() as u32,
                (s[1] / c).round() as u32,
                (s[2] / c).round() as u32,
                (s[3] / c).round() as u32,
            )
        })
        .collect();

    let mut out = Vec::new();
    for (i, r1) in averaged.iter().enumerate() {
        let n1 = counts[i];
        if n1 <= min_neighbors {
            continue;
        }

        let nested = averaged.iter().enumerate().any(|(j, r2)| {
            let n2 = counts[j];
            if j == i || n2 <= min_neighbors {
                return false;
            }
            let dx = (r2.width as f64 * eps).round() as i64;
            let dy = (r2.height as f64 * eps).round() as i64;
            let (x1, y1, w1, h1) = (r1.x as i64, r1.y as i64, r1.width as i64, r1.height as i64);
            let (x2, y2, w2, h2) = (r2.x as i64, r2.y as i64, r2.width as i64, r2.height as i64);
            x1 >= x2 - dx
                && y1 >= y2 - dy
                && x1 + w1 <= x2 + w2 + dx
                && y1 + h1 <= y2 + h2 + dy
                && (n2 > n1.max(3) || n1 < 3)
        });

        if !nested {
            out.push(*r1);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 6×6 window, one stump: fires when the right half is brighter than the left.
    const EDGE_CASCADE: &str = r#"<?xml version="1.0"?>
<opencv_storage>
<cascade type_id="opencv-cascade-classifier"><stageType>BOOST</stageType>
  <featureType>HAAR</featureType>
  <height>6</height>
  <width>6</width>
  <stageNum>1</stageNum>
  <stages>
    <_>
      <maxWeakCount>1</maxWeakCount>
      <stageThreshold>0.</stageThreshold>
      <weakClassifiers>
        <_>
          <internalNodes>
            0 -1 0 1.0000000149011612e-01</internalNodes>
          <leafValues>
            -1. 1.</leafValues></_></weakClassifiers></_></stages>
  <features>
    <_>
      <rects>
        <_>
          1 1 2 4 -1.</_>
        <_>
          3 1 2 4 1.</_></rects></_></features></cascade>
</opencv_storage>
"#;

    fn edge_image(width: u32, height: u32, edge_x: u32, invert: bool) -> Vec<u8> {
        let mut img = Vec::with_capacity((width * height) as usize);
        for _ in 0..height {
            for x in 0..width {
                let bright = x >= edge_x;
                img.push(if bright != invert { 255 } else { 0 });
            }
        }
        img
    }

    fn no_grouping() -> DetectParams {
        DetectParams {
            scale_factor: 1.1,
            min_neighbors: 0,
            min_size: (1, 1),
        }
    }

    #[test]
    fn test_parse_cascade() {
        let c = Cascade::from_xml(EDGE_CASCADE).unwrap();
        assert_eq!(c.window_size(), (6, 6));
        assert_eq!(c.stage_count(), 1);
        assert_eq!(c.features.len(), 1);
        assert_eq!(c.features[0].rects.len(), 2);
        assert!((c.stages[0].stumps[0].threshold - 0.1).abs() < 1e-6);
        assert_eq!(c.stages[0].stumps[0].left, -1.0);
        assert_eq!(c.stages[0].stumps[0].right, 1.0);
    }

    #[test]
    fn test_parse_rejects_tilted() {
        let xml = EDGE_CASCADE.replace("</rects></_></features>", "</rects><tilted>1</tilted></_></features>");
        assert!(matches!(Cascade::from_xml(&xml), Err(DetectorError::Unsupported(_))));
    }

    #[test]
    fn test_parse_rejects_deep_trees() {
        let xml = EDGE_CASCADE.replace("0 -1 0 1.0000000149011612e-01", "1 -1 0 0.1 0 -2 0 0.2");
        assert!(matches!(Cascade::from_xml(&xml), Err(DetectorError::Unsupported(_))));
    }

    #[test]
    fn test_parse_rejects_lbp() {
        let xml = EDGE_CASCADE.replace("<featureType>HAAR", "<featureType>LBP");
        assert!(matches!(Cascade::from_xml(&xml), Err(DetectorError::Unsupported(_))));
    }

    #[test]
    fn test_parse_rejects_bad_feature_index() {
        let xml = EDGE_CASCADE.replace("0 -1 0 1.0000000149011612e-01", "0 -1 3 0.1");
        assert!(matches!(Cascade::from_xml(&xml), Err(DetectorError::Malformed(_))));
    }

    #[test]
    fn test_window_passes_on_edge() {
        let c = Cascade::from_xml(EDGE_CASCADE).unwrap();
        let img = edge_image(6, 6, 3, false);
        let ii = IntegralImage::new(&img, 6, 6).unwrap();
        assert!(c.passes(&ii, 0, 0));

        let inverted = edge_image(6, 6, 3, true);
        let ii = IntegralImage::new(&inverted, 6, 6).unwrap();
        assert!(!c.passes(&ii, 0, 0));
    }

    #[test]
    fn test_flat_window_rejected() {
        let c = Cascade::from_xml(EDGE_CASCADE).unwrap();
        let ii = IntegralImage::new(&[128u8; 36], 6, 6).unwrap();
        assert!(!c.passes(&ii, 0, 0));
    }

    #[test]
    fn test_locate_single_window() {
        let det = CascadeDetector::from_cascade(Cascade::from_xml(EDGE_CASCADE).unwrap());
        let img = edge_image(6, 6, 3, false);
        let faces = det.locate(&img, 6, 6, &no_grouping()).unwrap();
        assert_eq!(faces, vec![FaceRect::new(0, 0, 6, 6)]);
    }

    #[test]
    fn test_locate_respects_min_size() {
        let det = CascadeDetector::from_cascade(Cascade::from_xml(EDGE_CASCADE).unwrap());
        let img = edge_image(6, 6, 3, false);
        let params = DetectParams {
            min_size: (100, 100),
            ..no_grouping()
        };
        assert!(det.locate(&img, 6, 6, &params).unwrap().is_empty());
    }

    #[test]
    fn test_locate_across_pyramid() {
        let det = CascadeDetector::from_cascade(Cascade::from_xml(EDGE_CASCADE).unwrap());
        let img = edge_image(60, 60, 30, false);
        let params = DetectParams {
            min_size: (30, 30),
            ..no_grouping()
        };
        let faces = det.locate(&img, 60, 60, &params).unwrap();

        assert!(!faces.is_empty());
        for f in &faces {
            assert!(f.width >= 30 && f.height >= 30, "{f:?} below min size");
            assert!(f.x + f.width <= 60 && f.y + f.height <= 60, "{f:?} outside frame");
            assert!(f.x < 30 && f.x + f.width > 30, "{f:?} does not contain the edge");
        }
    }

    #[test]
    fn test_locate_rejects_bad_scale_factor() {
        let det = CascadeDetector::from_cascade(Cascade::from_xml(EDGE_CASCADE).unwrap());
        let img = edge_image(6, 6, 3, false);
        let params = DetectParams {
            scale_factor: 1.0,
            ..no_grouping()
        };
        assert!(matches!(
            det.locate(&img, 6, 6, &params),
            Err(DetectorError::InvalidParams(_))
        ));
    }

    #[test]
    fn test_locate_short_frame() {
        let det = CascadeDetector::from_cascade(Cascade::from_xml(EDGE_CASCADE).unwrap());
        assert!(matches!(
            det.locate(&[0u8; 10], 6, 6, &no_grouping()),
            Err(DetectorError::Image(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            CascadeDetector::load("/nonexistent/cascade.xml"),
            Err(DetectorError::ModelNotFound(_))
        ));
    }

    #[test]
    fn test_similar_rects() {
        let a = FaceRect::new(100, 100, 100, 100);
        assert!(similar(&a, &FaceRect::new(110, 105, 100, 100), 0.2));
        assert!(!similar(&a, &FaceRect::new(130, 100, 100, 100), 0.2));
    }

    #[test]
    fn test_group_requires_more_than_min_neighbors() {
        let five: Vec<FaceRect> = (0..5).map(|i| FaceRect::new(100 + i, 100, 100, 100)).collect();
        assert!(group_rectangles(&five, 5, GROUP_EPS).is_empty());

        let six: Vec<FaceRect> = (0..6).map(|i| FaceRect::new(100 + i, 100, 100, 100)).collect();
        let grouped = group_rectangles(&six, 5, GROUP_EPS);
        // mean x of 100..=105 is 102.5, rounded half away from zero
        assert_eq!(grouped, vec![FaceRect::new(103, 100, 100, 100)]);
    }

    #[test]
    fn test_group_keeps_first_appearance_order() {
        let mut rects = Vec::new();
        for i in 0..6 {
            rects.push(FaceRect::new(400 + i, 50, 80, 80));
            rects.push(FaceRect::new(10 + i, 10, 120, 120));
        }
        let grouped = group_rectangles(&rects, 5, GROUP_EPS);
        assert_eq!(grouped.len(), 2);
        assert!(grouped[0].x > 400);
        assert!(grouped[1].x < 20);
    }

    #[test]
    fn test_group_drops_nested_weak_cluster() {
        let mut rects = Vec::new();
        for _ in 0..12 {
            rects.push(FaceRect::new(100, 100, 200, 200));
        }
        for _ in 0..6 {
            rects.push(FaceRect::new(150, 150, 40, 40));
        }
        let grouped = group_rectangles(&rects, 5, GROUP_EPS);
        assert_eq!(grouped, vec![FaceRect::new(100, 100, 200, 200)]);
    }

    #[test]
    fn test_group_zero_neighbors_passthrough() {
        let rects = vec![FaceRect::new(1, 2, 3, 4), FaceRect::new(1, 2, 3, 4)];
        assert_eq!(group_rectangles(&rects, 0, GROUP_EPS), rects);
    }

    #[test]
    fn test_default_params() {
        let id = DetectParams::identification();
        assert_eq!(id.min_size, (100, 100));
        assert_eq!(id.min_neighbors, 5);
        assert!((id.scale_factor - 1.1).abs() < 1e-6);
        assert_eq!(DetectParams::enrollment().min_size, (30, 30));
    }
}
