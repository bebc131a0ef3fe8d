//! Alpha and beta blend maps.
//!
//! The alpha map is the primary blend: it darkens the whites where
//! projector regions overlap. The beta map is a black-level uplift: it
//! brightens the blacks that a projector cannot turn fully off. Both carry
//! the gamma exponent their pixel values were encoded with, so the
//! compositor can linearize them before multiplying.

use crate::texture::Texture;

/// An image-backed blend map plus its embedded gamma exponent.
#[derive(Debug, Clone)]
pub struct BlendMap {
    pub texture: Texture,
    pub gamma: f32,
}

impl BlendMap {
    pub fn new(texture: Texture, gamma: f32) -> Self {
        Self { texture, gamma }
    }

    /// The substitute for a region without an alpha map: flat white passes
    /// all light through.
    pub fn default_alpha(width: u32, height: u32) -> Self {
        Self {
            texture: Texture::flat(width, height, 1.0),
            gamma: 1.0,
        }
    }

    /// The substitute for a region without a beta map: flat black adds no
    /// uplift.
    pub fn default_beta(width: u32, height: u32) -> Self {
        Self {
            texture: Texture::flat(width, height, 0.0),
            gamma: 1.0,
        }
    }

    /// Sample and linearize in one step.
    pub fn sample_linear(&self, u: f32, v: f32) -> [f32; 3] {
        self.texture.sample(u, v).map(|c| c.powf(self.gamma))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_alpha_passes_everything() {
        let alpha = BlendMap::default_alpha(4, 4);
        assert_eq!(alpha.gamma, 1.0);
        assert_eq!(alpha.sample_linear(0.5, 0.5), [1.0; 3]);
    }

    #[test]
    fn test_default_beta_adds_nothing() {
        let beta = BlendMap::default_beta(4, 4);
        assert_eq!(beta.gamma, 1.0);
        assert_eq!(beta.sample_linear(0.5, 0.5), [0.0; 3]);
    }

    #[test]
    fn test_sample_linearizes_with_embedded_gamma() {
        let map = BlendMap::new(Texture::flat(2, 2, 0.5), 2.0);
        let s = map.sample_linear(0.5, 0.5);
        assert!((s[0] - 0.25).abs() < 1e-6);
    }
}
