//! MPCDI warp and blend compositing
//!
//! Computes, for one projector region of a multi-projector installation,
//! the geometric warp and photometric blend that make an input image land
//! correctly aligned and seamlessly blended on the physical surface:
//! - Calibration containers: the manifest schema, PFM warp fields, OBJ
//!   screen meshes and alpha/beta blend maps
//! - The planar (`2d`) profile: per-pixel warp plus gamma-correct
//!   alpha/beta blending, with a fixed-function mesh fallback
//! - The shader-lamp (`sl`) profile: a 3-D frustum render re-warped
//!   through a distortion map
//!
//! Rendering hardware stays behind the [`render::RenderSurface`] trait; a
//! software reference surface is included so everything runs headless.

pub mod blend;
pub mod error;
pub mod mpcdi;
pub mod obj;
pub mod pfm;
pub mod render;
pub mod texture;
pub mod warp;

pub use error::{Error, Result};
