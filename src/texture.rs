//! Floating-point RGB pixel buffers.
//!
//! All compositing math runs on f32 RGB regardless of the on-disk pixel
//! format; decoded images are widened on load.

use image::DynamicImage;

/// A width x height buffer of linear-layout `[r, g, b]` f32 pixels.
///
/// Row 0 is the first stored row. Externally-decoded images keep the
/// decoder's top-to-bottom order; frames captured from a render surface
/// keep the surface's native bottom-to-top order. Sampling does not care
/// which convention a texture uses, callers reconcile via the V-flip in
/// the placement transform.
#[derive(Debug, Clone)]
pub struct Texture {
    width: u32,
    height: u32,
    pixels: Vec<[f32; 3]>,
}

impl Texture {
    /// Wrap a raw pixel buffer. `pixels.len()` must be `width * height`.
    pub fn from_pixels(width: u32, height: u32, pixels: Vec<[f32; 3]>) -> Self {
        assert_eq!(pixels.len(), (width * height) as usize);
        Self {
            width,
            height,
            pixels,
        }
    }

    /// A single flat value replicated across all channels and pixels.
    pub fn flat(width: u32, height: u32, value: f32) -> Self {
        Self {
            width,
            height,
            pixels: vec![[value; 3]; (width * height) as usize],
        }
    }

    /// Widen a decoded image to f32 RGB. Grayscale stays grayscale (equal
    /// channels); anything else goes through an RGB conversion first.
    pub fn from_image(image: &DynamicImage) -> Self {
        let rgb = image.to_rgb32f();
        let (width, height) = (rgb.width(), rgb.height());
        let pixels = rgb.pixels().map(|p| p.0).collect();
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[[f32; 3]] {
        &self.pixels
    }

    /// Direct texel read, no filtering.
    pub fn texel(&self, x: u32, y: u32) -> [f32; 3] {
        self.pixels[(y * self.width + x) as usize]
    }

    /// Bilinear sample at normalized coordinates with clamp-to-edge
    /// addressing. Texel centers sit at `(i + 0.5) / size`. Non-finite
    /// coordinates sample black rather than poisoning the filter.
    pub fn sample(&self, u: f32, v: f32) -> [f32; 3] {
        if !u.is_finite() || !v.is_finite() {
            return [0.0; 3];
        }
        let x = u * self.width as f32 - 0.5;
        let y = v * self.height as f32 - 0.5;
        let x0 = x.floor();
        let y0 = y.floor();
        let tx = x - x0;
        let ty = y - y0;

        let clamp_x = |i: f32| (i.max(0.0) as u32).min(self.width - 1);
        let clamp_y = |i: f32| (i.max(0.0) as u32).min(self.height - 1);
        let (x0i, x1i) = (clamp_x(x0), clamp_x(x0 + 1.0));
        let (y0i, y1i) = (clamp_y(y0), clamp_y(y0 + 1.0));

        let p00 = self.texel(x0i, y0i);
        let p10 = self.texel(x1i, y0i);
        let p01 = self.texel(x0i, y1i);
        let p11 = self.texel(x1i, y1i);

        let mut out = [0.0f32; 3];
        for c in 0..3 {
            let top = p00[c] + (p10[c] - p00[c]) * tx;
            let bottom = p01[c] + (p11[c] - p01[c]) * tx;
            out[c] = top + (bottom - top) * ty;
        }
        out
    }

    /// A copy with the row order reversed.
    pub fn flipped_vertical(&self) -> Self {
        let w = self.width as usize;
        let mut pixels = Vec::with_capacity(self.pixels.len());
        for row in self.pixels.chunks_exact(w).rev() {
            pixels.extend_from_slice(row);
        }
        Self {
            width: self.width,
            height: self.height,
            pixels,
        }
    }

    /// Quantize to 8-bit RGB for persistence.
    pub fn to_rgb8(&self) -> image::RgbImage {
        image::RgbImage::from_fn(self.width, self.height, |x, y| {
            let p = self.texel(x, y);
            image::Rgb(p.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_sample() {
        let tex = Texture::flat(4, 4, 0.25);
        assert_eq!(tex.sample(0.5, 0.5), [0.25; 3]);
        assert_eq!(tex.sample(-1.0, 2.0), [0.25; 3]);
    }

    #[test]
    fn test_texel_center_is_exact() {
        let mut pixels = vec![[0.0; 3]; 9];
        pixels[4] = [1.0, 0.5, 0.25]; // center of a 3x3
        let tex = Texture::from_pixels(3, 3, pixels);
        assert_eq!(tex.sample(0.5, 0.5), [1.0, 0.5, 0.25]);
    }

    #[test]
    fn test_bilinear_midpoint() {
        let tex = Texture::from_pixels(2, 1, vec![[0.0; 3], [1.0; 3]]);
        let s = tex.sample(0.5, 0.5);
        assert!((s[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_non_finite_coordinates_sample_black() {
        let tex = Texture::flat(2, 2, 1.0);
        assert_eq!(tex.sample(f32::NAN, 0.5), [0.0; 3]);
        assert_eq!(tex.sample(0.5, f32::INFINITY), [0.0; 3]);
    }

    #[test]
    fn test_flip_vertical() {
        let tex = Texture::from_pixels(1, 2, vec![[0.0; 3], [1.0; 3]]);
        let flipped = tex.flipped_vertical();
        assert_eq!(flipped.texel(0, 0), [1.0; 3]);
        assert_eq!(flipped.texel(0, 1), [0.0; 3]);
    }
}
