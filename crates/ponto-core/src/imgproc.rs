//! Pixel helpers shared by the face locator and the hasher.
//!
//! All images are tightly packed row-major buffers: BGR is 3 bytes per
//! pixel, grayscale 1 byte per pixel.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ImageError {
    #[error("buffer too short for {width}x{height}x{channels}: expected {expected}, got {actual}")]
    BufferTooShort {
        width: u32,
        height: u32,
        channels: u32,
        expected: usize,
        actual: usize,
    },
    #[error("empty image")]
    Empty,
}

pub(crate) fn check_len(buf: &[u8], width: u32, height: u32, channels: u32) -> Result<usize, ImageError> {
    let expected = width as usize * height as usize * channels as usize;
    if expected == 0 {
        return Err(ImageError::Empty);
    }
    if buf.len() < expected {
        return Err(ImageError::BufferTooShort {
            width,
            height,
            channels,
            expected,
            actual: buf.len(),
        });
    }
    Ok(expected)
}

/// Convert BGR to 8-bit luma with BT.601 weights (0.299 R + 0.587 G + 0.114 B),
/// computed in 14-bit fixed point so the result is bit-exact across platforms.
pub fn bgr_to_gray(bgr: &[u8], width: u32, height: u32) -> Result<Vec<u8>, ImageError> {
    let expected = check_len(bgr, width, height, 3)?;
    const R: u32 = 4899;
    const G: u32 = 9617;
    const B: u32 = 1868;
    const HALF: u32 = 1 << 13;

    Ok(bgr[..expected]
        .chunks_exact(3)
        .map(|px| {
            let (b, g, r) = (px[0] as u32, px[1] as u32, px[2] as u32);
            ((b * B + g * G + r * R + HALF) >> 14) as u8
        })
        .collect())
}

/// Global histogram equalization, in place.
///
/// The darkest occupied level maps to 0 and the cumulative distribution of
/// the remaining levels is stretched to 255. A single-level image is filled
/// with that level.
pub fn equalize_hist(gray: &mut [u8]) {
    if gray.is_empty() {
        return;
    }

    let mut hist = [0u32; 256];
    for &p in gray.iter() {
        hist[p as usize] += 1;
    }

    let total = gray.len() as u32;
    let first = hist.iter().position(|&c| c > 0).unwrap_or(0);

    if hist[first] == total {
        gray.fill(first as u8);
        return;
    }

    let scale = 255.0f32 / (total - hist[first]) as f32;
    let mut lut = [0u8; 256];
    let mut sum = 0u32;
    for level in first + 1..256 {
        sum += hist[level];
        lut[level] = (sum as f32 * scale).round().clamp(0.0, 255.0) as u8;
    }

    for p in gray.iter_mut() {
        *p = lut[*p as usize];
    }
}

/// Bilinear resize of a grayscale image using pixel-center alignment.
pub fn resize_bilinear(
    gray: &[u8],
    width: u32,
    height: u32,
    new_width: u32,
    new_height: u32,
) -> Result<Vec<u8>, ImageError> {
    check_len(gray, width, height, 1)?;
    if new_width == 0 || new_height == 0 {
        return Err(ImageError::Empty);
    }

    let (w, h) = (width as usize, height as usize);
    let (new_w, new_h) = (new_width as usize, new_height as usize);
    let inv_scale_x = w as f32 / new_w as f32;
    let inv_scale_y = h as f32 / new_h as f32;

    let mut resized = vec![0u8; new_w * new_h];
    for y in 0..new_h {
        let src_y = (y as f32 + 0.5) * inv_scale_y - 0.5;
        let y0 = (src_y.floor() as i32).clamp(0, h as i32 - 1) as usize;
        let y1 = (y0 + 1).min(h - 1);
        let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);

        for x in 0..new_w {
            let src_x = (x as f32 + 0.5) * inv_scale_x - 0.5;
            let x0 = (src_x.floor() as i32).clamp(0, w as i32 - 1) as usize;
            let x1 = (x0 + 1).min(w - 1);
            let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);

            let tl = gray[y0 * w + x0] as f32;
            let tr = gray[y0 * w + x1] as f32;
            let bl = gray[y1 * w + x0] as f32;
            let br = gray[y1 * w + x1] as f32;

            let val = tl * (1.0 - fx) * (1.0 - fy)
                + tr * fx * (1.0 - fy)
                + bl * (1.0 - fx) * fy
                + br * fx * fy;

            resized[y * new_w + x] = val.round().clamp(0.0, 255.0) as u8;
        }
    }

    Ok(resized)
}

/// Summed-area tables over a grayscale image, with a zero top row and left
/// column: `(width + 1) × (height + 1)` entries each.
pub struct IntegralImage {
    pub width: usize,
    pub height: usize,
    sum: Vec<u32>,
    sq_sum: Vec<u64>,
}

impl IntegralImage {
    pub fn new(gray: &[u8], width: u32, height: u32) -> Result<Self, ImageError> {
        check_len(gray, width, height, 1)?;
        let (w, h) = (width as usize, height as usize);
        let stride = w + 1;
        let mut sum = vec![0u32; stride * (h + 1)];
        let mut sq_sum = vec![0u64; stride * (h + 1)];

        for y in 0..h {
            let mut row = 0u32;
            let mut row_sq = 0u64;
            for x in 0..w {
                let p = gray[y * w + x] as u32;
                row += p;
                row_sq += (p * p) as u64;
                sum[(y + 1) * stride + x + 1] = sum[y * stride + x + 1] + row;
                sq_sum[(y + 1) * stride + x + 1] = sq_sum[y * stride + x + 1] + row_sq;
            }
        }

        Ok(Self {
            width: w,
            height: h,
            sum,
            sq_sum,
        })
    }

    /// Sum of pixels in `[x, x+w) × [y, y+h)`.
    #[inline]
    pub fn rect_sum(&self, x: usize, y: usize, w: usize, h: usize) -> u32 {
        let s = self.width + 1;
        let a = self.sum[y * s + x];
        let b = self.sum[y * s + x + w];
        let c = self.sum[(y + h) * s + x];
        let d = self.sum[(y + h) * s + x + w];
        d + a - b - c
    }

    /// Sum of squared pixels in `[x, x+w) × [y, y+h)`.
    #[inline]
    pub fn rect_sq_sum(&self, x: usize, y: usize, w: usize, h: usize) -> u64 {
        let s = self.width + 1;
        let a = self.sq_sum[y * s + x];
        let b = self.sq_sum[y * s + x + w];
        let c = self.sq_sum[(y + h) * s + x];
        let d = self.sq_sum[(y + h) * s + x + w];
        d + a - b - c
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bgr_to_gray_primaries() {
        // Pure blue, green, red, white
        let bgr = vec![255, 0, 0, 0, 255, 0, 0, 0, 255, 255, 255, 255];
        let gray = bgr_to_gray(&bgr, 4, 1).unwrap();
        assert_eq!(gray, vec![29, 150, 76, 255]);
    }

    #[test]
    fn test_bgr_to_gray_short_buffer() {
        assert!(matches!(
            bgr_to_gray(&[1, 2, 3], 2, 1),
            Err(ImageError::BufferTooShort { expected: 6, actual: 3, .. })
        ));
    }

    #[test]
    fn test_equalize_stretches_range() {
        let mut gray: Vec<u8> = (0..100).map(|i| 100 + (i % 10) as u8).collect();
        equalize_hist(&mut gray);
        assert_eq!(*gray.iter().min().unwrap(), 0);
        assert_eq!(*gray.iter().max().unwrap(), 255);
    }

    #[test]
    fn test_equalize_flat_image() {
        let mut gray = vec![42u8; 16];
        equalize_hist(&mut gray);
        assert!(gray.iter().all(|&p| p == 42));
    }

    #[test]
    fn test_equalize_two_levels() {
        let mut gray = vec![10, 10, 200, 200];
        equalize_hist(&mut gray);
        assert_eq!(gray, vec![0, 0, 255, 255]);
    }

    #[test]
    fn test_bilinear_resize_uniform() {
        let frame = vec![128u8; 100 * 100];
        let resized = resize_bilinear(&frame, 100, 100, 32, 32).unwrap();
        assert_eq!(resized.len(), 32 * 32);
        assert!(resized.iter().all(|&p| p == 128), "uniform resize should stay uniform");
    }

    #[test]
    fn test_bilinear_resize_upscale_shape() {
        let frame: Vec<u8> = (0..16).collect();
        let resized = resize_bilinear(&frame, 4, 4, 8, 6).unwrap();
        assert_eq!(resized.len(), 48);
    }

    #[test]
    fn test_integral_sums() {
        // 3x2 image:
        // 1 2 3
        // 4 5 6
        let gray = vec![1, 2, 3, 4, 5, 6];
        let ii = IntegralImage::new(&gray, 3, 2).unwrap();
        assert_eq!(ii.rect_sum(0, 0, 3, 2), 21);
        assert_eq!(ii.rect_sum(1, 0, 2, 2), 16);
        assert_eq!(ii.rect_sum(2, 1, 1, 1), 6);
        assert_eq!(ii.rect_sq_sum(0, 1, 3, 1), 16 + 25 + 36);
    }
}
