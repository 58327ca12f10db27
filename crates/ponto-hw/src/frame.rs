//! Frame type and pixel-format conversion: YUYV/GREY/Y16/MJPG to BGR, crop, overlay, JPEG.

use ponto_core::imgproc::{self, ImageError};
use ponto_core::FaceRect;
use image::{ImageBuffer, Rgb};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use std::io::Cursor;

/// Overlay color for detected faces (BGR).
pub const FACE_BOX_COLOR: [u8; 3] = [0, 255, 0];

/// A captured color camera frame.
#[derive(Clone)]
pub struct Frame {
    /// Packed BGR pixel data (width * height * 3 bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
}

impl Frame {
    /// Wrap a BGR buffer, checking its length.
    pub fn from_bgr(data: Vec<u8>, width: u32, height: u32, sequence: u32) -> Result<Self, FrameError> {
        let expected = (width * height * 3) as usize;
        if data.len() != expected || expected == 0 {
            return Err(FrameError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            timestamp: std::time::Instant::now(),
            sequence,
        })
    }

    /// Build a frame from packed RGB, e.g. a decoded image file.
    pub fn from_rgb(rgb: &[u8], width: u32, height: u32) -> Result<Self, FrameError> {
        let expected = (width * height * 3) as usize;
        if rgb.len() < expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: rgb.len(),
            });
        }
        Self::from_bgr(swap_red_blue(&rgb[..expected]), width, height, 0)
    }

    /// BT.601 luma plane.
    pub fn to_gray(&self) -> Result<Vec<u8>, FrameError> {
        Ok(imgproc::bgr_to_gray(&self.data, self.width, self.height)?)
    }

    /// Copy out the part of `rect` that lies inside the frame.
    pub fn crop(&self, rect: &FaceRect) -> Result<Frame, FrameError> {
        let r = rect
            .clamp_to(self.width, self.height)
            .ok_or(FrameError::CropOutOfBounds(*rect))?;

        let stride = self.width as usize * 3;
        let row_bytes = r.width as usize * 3;
        let mut data = Vec::with_capacity(row_bytes * r.height as usize);
        for y in r.y as usize..(r.y + r.height) as usize {
            let start = y * stride + r.x as usize * 3;
            data.extend_from_slice(&self.data[start..start + row_bytes]);
        }

        Ok(Frame {
            data,
            width: r.width,
            height: r.height,
            timestamp: self.timestamp,
            sequence: self.sequence,
        })
    }

    /// Draw an unfilled rectangle outline, clipped to the frame.
    pub fn draw_rect(&mut self, rect: &FaceRect, color: [u8; 3], thickness: u32) {
        let Some(r) = rect.clamp_to(self.width, self.height) else {
            return;
        };
        let Some(mut canvas) =
            ImageBuffer::<Rgb<u8>, &mut [u8]>::from_raw(self.width, self.height, self.data.as_mut_slice())
        else {
            return;
        };

        // Channels are stored BGR; the color is passed through in the same order
        for inset in 0..thickness.max(1) {
            let (w, h) = (r.width.saturating_sub(2 * inset), r.height.saturating_sub(2 * inset));
            if w == 0 || h == 0 {
                break;
            }
            let outline = Rect::at((r.x + inset) as i32, (r.y + inset) as i32).of_size(w, h);
            draw_hollow_rect_mut(&mut canvas, outline, Rgb(color));
        }
    }

    /// Encode as baseline JPEG for display or storage.
    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>, FrameError> {
        let rgb = swap_red_blue(&self.data);
        let mut out = Cursor::new(Vec::new());
        let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
        encoder.encode(&rgb, self.width, self.height, image::ExtendedColorType::Rgb8)?;
        Ok(out.into_inner())
    }

    /// Average luma brightness (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        match self.to_gray() {
            Ok(gray) if !gray.is_empty() => {
                gray.iter().map(|&b| b as f32).sum::<f32>() / gray.len() as f32
            }
            _ => 0.0,
        }
    }
}

fn swap_red_blue(px: &[u8]) -> Vec<u8> {
    px.chunks_exact(3).flat_map(|p| [p[2], p[1], p[0]]).collect()
}

fn clamp_u8(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

/// Convert packed YUYV (4:2:2) to BGR with BT.601 limited-range coefficients.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V], sharing chroma.
pub fn yuyv_to_bgr(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut bgr = Vec::with_capacity((width * height * 3) as usize);
    for quad in yuyv[..expected].chunks_exact(4) {
        let d = quad[1] as i32 - 128;
        let e = quad[3] as i32 - 128;
        for &y in &[quad[0], quad[2]] {
            let c = 298 * (y as i32 - 16);
            bgr.push(clamp_u8((c + 516 * d + 128) >> 8));
            bgr.push(clamp_u8((c - 100 * d - 208 * e + 128) >> 8));
            bgr.push(clamp_u8((c + 409 * e + 128) >> 8));
        }
    }
    Ok(bgr)
}

/// Replicate an 8-bit gray plane into three channels.
pub fn grey_to_bgr(gray: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height) as usize;
    if gray.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: gray.len(),
        });
    }
    Ok(gray[..expected].iter().flat_map(|&p| [p, p, p]).collect())
}

/// 16-bit little-endian gray, downscaled to 8 bits and replicated.
pub fn y16_to_bgr(buf: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let pixels = (width * height) as usize;
    if buf.len() < pixels * 2 {
        return Err(FrameError::InvalidLength {
            expected: pixels * 2,
            actual: buf.len(),
        });
    }
    // High byte of each sample
    let gray: Vec<u8> = buf[..pixels * 2].chunks_exact(2).map(|s| s[1]).collect();
    grey_to_bgr(&gray, width, height)
}

/// Decode a motion-JPEG buffer to BGR, returning its dimensions.
pub fn mjpeg_to_bgr(jpeg: &[u8]) -> Result<(Vec<u8>, u32, u32), FrameError> {
    let rgb = image::load_from_memory_with_format(jpeg, image::ImageFormat::Jpeg)?.to_rgb8();
    let (w, h) = rgb.dimensions();
    Ok((swap_red_blue(rgb.as_raw()), w, h))
}

/// Check if a frame is dark: true when more than `threshold` (a fraction) of pixels are below 32.
pub fn is_dark_frame(gray: &[u8], threshold: f32) -> bool {
    if gray.is_empty() {
        return true;
    }
    dark_ratio(gray) > threshold
}

/// Fraction of pixels in the darkest bucket (0–31).
pub fn dark_ratio(gray: &[u8]) -> f32 {
    if gray.is_empty() {
        return 1.0;
    }
    let dark_count = gray.iter().filter(|&&p| p < 32).count();
    dark_count as f32 / gray.len() as f32
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("crop {0:?} lies outside the frame")]
    CropOutOfBounds(FaceRect),
    #[error("image codec: {0}")]
    Codec(#[from] image::ImageError),
    #[error(transparent)]
    Pixels(#[from] ImageError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32, bgr: [u8; 3]) -> Frame {
        let data = (0..width * height).flat_map(|_| bgr).collect();
        Frame::from_bgr(data, width, height, 0).unwrap()
    }

    #[test]
    fn test_yuyv_to_bgr_neutral_chroma() {
        // 2x1 image: video black and video white with neutral chroma
        let yuyv = vec![16, 128, 235, 128];
        let bgr = yuyv_to_bgr(&yuyv, 2, 1).unwrap();
        assert_eq!(bgr, vec![0, 0, 0, 255, 255, 255]);
    }

    #[test]
    fn test_yuyv_invalid_length() {
        let yuyv = vec![100, 128]; // too short for 2x1
        assert!(yuyv_to_bgr(&yuyv, 2, 1).is_err());
    }

    #[test]
    fn test_grey_to_bgr() {
        let bgr = grey_to_bgr(&[7, 200], 2, 1).unwrap();
        assert_eq!(bgr, vec![7, 7, 7, 200, 200, 200]);
    }

    #[test]
    fn test_y16_takes_high_byte() {
        let bgr = y16_to_bgr(&[0xff, 0x12, 0x00, 0x80], 2, 1).unwrap();
        assert_eq!(bgr, vec![0x12, 0x12, 0x12, 0x80, 0x80, 0x80]);
    }

    #[test]
    fn test_from_bgr_rejects_bad_length() {
        assert!(Frame::from_bgr(vec![0; 5], 2, 1, 0).is_err());
        assert!(Frame::from_bgr(vec![], 0, 0, 0).is_err());
    }

    #[test]
    fn test_from_rgb_swaps_channels() {
        let f = Frame::from_rgb(&[1, 2, 3], 1, 1).unwrap();
        assert_eq!(f.data, vec![3, 2, 1]);
    }

    #[test]
    fn test_crop() {
        // 4x2 frame, pixel value = x + 10 * y on every channel
        let data: Vec<u8> = (0..2u8)
            .flat_map(|y| (0..4u8).flat_map(move |x| [x + 10 * y; 3]))
            .collect();
        let frame = Frame::from_bgr(data, 4, 2, 9).unwrap();
        let crop = frame.crop(&FaceRect::new(1, 1, 2, 1)).unwrap();
        assert_eq!((crop.width, crop.height, crop.sequence), (2, 1, 9));
        assert_eq!(crop.data, vec![11, 11, 11, 12, 12, 12]);
    }

    #[test]
    fn test_crop_clips_to_frame() {
        let frame = solid(10, 10, [1, 2, 3]);
        let crop = frame.crop(&FaceRect::new(6, 8, 100, 100)).unwrap();
        assert_eq!((crop.width, crop.height), (4, 2));
        assert!(frame.crop(&FaceRect::new(10, 0, 5, 5)).is_err());
    }

    #[test]
    fn test_draw_rect_outline() {
        let mut frame = solid(8, 8, [0, 0, 0]);
        frame.draw_rect(&FaceRect::new(2, 2, 4, 4), FACE_BOX_COLOR, 1);
        let px = |x: u32, y: u32| {
            let i = ((y * 8 + x) * 3) as usize;
            [frame.data[i], frame.data[i + 1], frame.data[i + 2]]
        };
        assert_eq!(px(2, 2), FACE_BOX_COLOR);
        assert_eq!(px(5, 3), FACE_BOX_COLOR);
        assert_eq!(px(3, 5), FACE_BOX_COLOR);
        assert_eq!(px(3, 3), [0, 0, 0], "interior must stay untouched");
        assert_eq!(px(0, 0), [0, 0, 0]);
    }

    #[test]
    fn test_draw_rect_thick_outline_clipped() {
        let mut frame = solid(10, 10, [0, 0, 0]);
        // Extends past the right and bottom edges
        frame.draw_rect(&FaceRect::new(4, 4, 20, 20), FACE_BOX_COLOR, 2);
        let px = |x: u32, y: u32| {
            let i = ((y * 10 + x) * 3) as usize;
            [frame.data[i], frame.data[i + 1], frame.data[i + 2]]
        };
        assert_eq!(px(4, 6), FACE_BOX_COLOR);
        assert_eq!(px(5, 6), FACE_BOX_COLOR, "second pixel of the border");
        assert_eq!(px(6, 6), [0, 0, 0]);
        assert_eq!(px(9, 9), FACE_BOX_COLOR, "clipped edge is outlined");
        assert_eq!(px(8, 8), FACE_BOX_COLOR);
        assert_eq!(px(7, 7), [0, 0, 0]);
        assert_eq!(px(3, 3), [0, 0, 0]);
    }

    #[test]
    fn test_encode_jpeg() {
        let frame = solid(16, 16, [40, 120, 200]);
        let jpeg = frame.encode_jpeg(80).unwrap();
        assert_eq!(&jpeg[..2], &[0xff, 0xd8]);

        let (bgr, w, h) = mjpeg_to_bgr(&jpeg).unwrap();
        assert_eq!((w, h), (16, 16));
        // Lossy, but a flat color survives closely
        assert!((bgr[0] as i32 - 40).abs() <= 8);
        assert!((bgr[2] as i32 - 200).abs() <= 8);
    }

    #[test]
    fn test_avg_brightness() {
        assert_eq!(solid(4, 4, [255, 255, 255]).avg_brightness(), 255.0);
        assert_eq!(solid(4, 4, [0, 0, 0]).avg_brightness(), 0.0);
    }

    #[test]
    fn test_dark_frame_all_black() {
        assert!(is_dark_frame(&vec![0u8; 1000], 0.95));
    }

    #[test]
    fn test_dark_frame_normal() {
        assert!(!is_dark_frame(&vec![128u8; 1000], 0.95));
    }

    #[test]
    fn test_dark_frame_empty() {
        assert!(is_dark_frame(&[], 0.95));
    }

    #[test]
    fn test_dark_frame_borderline_bright() {
        // 94% dark, 6% bright → should NOT be dark
        let mut gray = vec![10u8; 940];
        gray.extend(vec![128u8; 60]);
        assert!(!is_dark_frame(&gray, 0.95));
        assert!((dark_ratio(&gray) - 0.94).abs() < 1e-6);
    }
}
