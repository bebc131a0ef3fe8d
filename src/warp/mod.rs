//! Warp and blend compositing.
//!
//! One compositor type covers every implemented profile, dispatching on
//! the container's profile tag and a backend-fidelity tag instead of a
//! class hierarchy. The planar profile resamples the media through the
//! region's warp field and applies the gamma-correct alpha/beta blend;
//! the shader-lamp profile first renders the screen mesh from the
//! projector's virtual camera, then feeds the captured frame through the
//! same planar path using the region's distortion map.

use glam::{Mat4, Vec3};
use rayon::prelude::*;

use crate::blend::BlendMap;
use crate::error::{Error, Result};
use crate::mpcdi::{CoordinateFrame, Frustum, MpcdiFile, Profile, Region};
use crate::obj::ObjMesh;
use crate::pfm::WarpMap;
use crate::render::{unit_ortho, BlendOp, DrawParams, MeshBuffers, RenderSurface};
use crate::texture::Texture;

/// Near/far pair for the shader-lamp projection.
const FRUSTUM_NEAR: f32 = 1.0;
const FRUSTUM_FAR: f32 = 10000.0;

/// How the planar warp is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendFidelity {
    /// Gamma-correct per-pixel evaluation of warp, alpha and beta.
    #[default]
    PerPixel,
    /// Warp rasterized as a mesh over the render surface, alpha multiplied
    /// raw over the frame, beta ignored. Cheaper and visibly approximate;
    /// kept for backends that cannot run a per-pixel program.
    FixedFunction,
}

/// Per-compositor configuration, fixed at construction.
#[derive(Debug, Clone, Copy)]
pub struct CompositorConfig {
    pub fidelity: BackendFidelity,
    /// Apply the alpha/beta blend. Off, the compositor is a pure warp,
    /// useful for comparison renders.
    pub blend_enabled: bool,
    /// Media is stored top-down (the usual decoder convention) and needs
    /// the V-flip to meet the warp field's bottom-up UV space.
    pub flip_media: bool,
    /// Gamma exponent of the media image; the alpha map's embedded gamma
    /// when not set.
    pub media_gamma: Option<f32>,
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            fidelity: BackendFidelity::PerPixel,
            blend_enabled: true,
            flip_media: true,
            media_gamma: None,
        }
    }
}

/// Compositor for one region of a calibration container.
///
/// Borrows the container and region; owns the warp field, blend maps and
/// screen mesh it extracts for itself. All container reads happen eagerly
/// at construction, so a malformed or missing resource fails here rather
/// than at a later frame.
pub struct WarpCompositor<'a> {
    mpcdi: &'a MpcdiFile,
    region: &'a Region,
    config: CompositorConfig,
    /// Geometry warp field for `2d`; distortion map for `sl`.
    warp: WarpMap,
    /// Screen mesh for the shader-lamp 3-D pass.
    model: Option<ObjMesh>,
    alpha: BlendMap,
    beta: BlendMap,
    target_gamma: f32,
    media_gamma: f32,
    media: Option<Texture>,
}

impl<'a> WarpCompositor<'a> {
    pub fn new(
        mpcdi: &'a MpcdiFile,
        region: &'a Region,
        config: CompositorConfig,
    ) -> Result<Self> {
        let alpha = match &region.alpha_map {
            Some(file) => mpcdi.extract_blend_map(file)?,
            None => BlendMap::default_alpha(region.width, region.height),
        };
        let beta = match &region.beta_map {
            Some(file) => mpcdi.extract_blend_map(file)?,
            None => BlendMap::default_beta(region.width, region.height),
        };
        // The display is assumed calibrated to the alpha map's embedded
        // gamma, and the media shot at that same gamma unless overridden.
        let target_gamma = alpha.gamma;
        let media_gamma = config.media_gamma.unwrap_or(alpha.gamma);

        let (warp, model) = match mpcdi.profile() {
            Profile::TwoD => {
                let file = region.geometry_warp_file.as_ref().ok_or_else(|| {
                    Error::MissingResource(format!(
                        "region '{}' has no geometry warp file",
                        region.id
                    ))
                })?;
                (mpcdi.extract_warp_map(&file.path)?, None)
            }
            Profile::ShaderLamp => {
                if region.frustum.is_none() || region.frame.is_none() {
                    return Err(Error::Schema(format!(
                        "region '{}' lacks the frustum or coordinate frame \
                         required by the sl profile",
                        region.id
                    )));
                }
                let file = region.distortion_map.as_ref().ok_or_else(|| {
                    Error::MissingResource(format!(
                        "region '{}' has no distortion map",
                        region.id
                    ))
                })?;
                let model = match &region.geometry_file {
                    Some(mesh) => Some(mpcdi.extract_mesh(&mesh.path)?),
                    None => None,
                };
                (mpcdi.extract_warp_map(&file.path)?, model)
            }
            other => return Err(Error::UnsupportedProfile(other.tag().to_string())),
        };
        log::debug!(
            "region '{}': {}x{} viewport, {}x{} warp grid, target gamma {}",
            region.id,
            region.width,
            region.height,
            warp.width(),
            warp.height(),
            target_gamma
        );

        Ok(Self {
            mpcdi,
            region,
            config,
            warp,
            model,
            alpha,
            beta,
            target_gamma,
            media_gamma,
            media: None,
        })
    }

    /// Bind the media image to composite.
    pub fn set_media(&mut self, media: Texture) {
        self.media = Some(media);
    }

    /// Bind or replace the shader-lamp screen mesh. Containers usually
    /// reference one from the fileset, but the mesh may also be supplied
    /// externally.
    pub fn set_model(&mut self, model: ObjMesh) {
        self.model = Some(model);
    }

    pub fn target_gamma(&self) -> f32 {
        self.target_gamma
    }

    /// Produce one composited frame. Repeatable; the surface is only drawn
    /// to by the mesh-based paths.
    pub fn composite(&self, surface: &mut dyn RenderSurface) -> Result<Texture> {
        let media = self
            .media
            .as_ref()
            .ok_or_else(|| Error::MissingResource("no media image bound".into()))?;

        match self.mpcdi.profile() {
            Profile::ShaderLamp => self.composite_shader_lamp(surface, media),
            _ => match self.config.fidelity {
                BackendFidelity::PerPixel => {
                    Ok(self.warp_blend_2d(media, self.config.flip_media))
                }
                BackendFidelity::FixedFunction => {
                    self.composite_fixed_function(surface, media)
                }
            },
        }
    }

    /// The per-pixel planar path. For every output pixel: warp lookup,
    /// placement transform, media sample, linearize, blend, re-encode.
    /// The blend runs in linear light, so the order is not negotiable.
    fn warp_blend_2d(&self, media: &Texture, flip_media: bool) -> Texture {
        let region = self.region;
        let (width, height) = (region.width, region.height);
        let warp = &self.warp;
        let (alpha, beta) = (&self.alpha, &self.beta);
        let blend_enabled = self.config.blend_enabled;
        let media_gamma = self.media_gamma;
        let inv_target = 1.0 / self.target_gamma;

        let mut pixels = vec![[0.0f32; 3]; (width * height) as usize];
        pixels
            .par_chunks_mut(width as usize)
            .enumerate()
            .for_each(|(row, out)| {
                let py = (row as f32 + 0.5) / height as f32;
                for (col, pixel) in out.iter_mut().enumerate() {
                    let px = (col as f32 + 0.5) / width as f32;
                    let uv = region.map_uv(warp.sample(px, py), flip_media);
                    // Unmapped warp cells sample black; the beta uplift
                    // still applies to them.
                    let mut color = powf3(media.sample(uv.x, uv.y), media_gamma);
                    if blend_enabled {
                        let a = alpha.sample_linear(px, py);
                        let b = beta.sample_linear(px, py);
                        for c in 0..3 {
                            color[c] = color[c] * a[c] * (1.0 - b[c]) + b[c];
                        }
                    }
                    *pixel = powf3(color, inv_target);
                }
            });

        Texture::from_pixels(width, height, pixels)
    }

    /// The fixed-function planar path: rasterize the warp grid as a mesh,
    /// then multiply the raw alpha map over the whole frame. Applying the
    /// blend without linearizing is wrong in principle, and close enough
    /// in practice when the media is bright.
    fn composite_fixed_function(
        &self,
        surface: &mut dyn RenderSurface,
        media: &Texture,
    ) -> Result<Texture> {
        self.check_surface(surface);
        let (positions, texcoords, triangles) =
            warp_grid_mesh(&self.warp, self.region, self.config.flip_media);

        surface.clear([0.0; 3]);
        let media_handle = surface.upload_texture(media);
        surface.bind_texture(media_handle, 0);
        surface.draw_mesh(
            MeshBuffers {
                positions: &positions,
                texcoords: &texcoords,
                triangles: &triangles,
            },
            &DrawParams {
                mvp: unit_ortho(),
                flip_v: false,
                blend: BlendOp::Replace,
                depth_test: false,
            },
        );

        if self.config.blend_enabled {
            let alpha_handle = surface.upload_texture(&self.alpha.texture);
            surface.bind_texture(alpha_handle, 0);
            let (positions, texcoords, triangles) = unit_quad();
            surface.draw_mesh(
                MeshBuffers {
                    positions: &positions,
                    texcoords: &texcoords,
                    triangles: &triangles,
                },
                &DrawParams {
                    mvp: unit_ortho(),
                    flip_v: false,
                    blend: BlendOp::Multiply,
                    depth_test: false,
                },
            );
        }

        Ok(surface.capture_frame().flipped_vertical())
    }

    /// The shader-lamp pipeline: render the screen mesh from the virtual
    /// camera, capture, then re-warp the capture through the distortion
    /// map with the projector-space blends. The capture is already in the
    /// surface's vertical convention, so the second pass runs unflipped.
    fn composite_shader_lamp(
        &self,
        surface: &mut dyn RenderSurface,
        media: &Texture,
    ) -> Result<Texture> {
        let model = self.model.as_ref().ok_or_else(|| {
            Error::MissingResource(format!(
                "region '{}' has no screen mesh bound",
                self.region.id
            ))
        })?;
        let (Some(frustum), Some(frame)) = (self.region.frustum, self.region.frame) else {
            return Err(Error::Schema(format!(
                "region '{}' lacks the frustum or coordinate frame \
                 required by the sl profile",
                self.region.id
            )));
        };
        self.check_surface(surface);

        surface.clear([0.0; 3]);
        let media_handle = surface.upload_texture(media);
        surface.bind_texture(media_handle, 0);
        surface.draw_mesh(
            MeshBuffers {
                positions: &model.vertices,
                texcoords: &model.texcoords,
                triangles: &model.triangles,
            },
            &DrawParams {
                mvp: projection_matrix(&frustum) * pose_matrix(&frustum, &frame),
                flip_v: true,
                blend: BlendOp::Replace,
                depth_test: true,
            },
        );

        let captured = surface.capture_frame();
        Ok(self.warp_blend_2d(&captured, false))
    }

    fn check_surface(&self, surface: &dyn RenderSurface) {
        let (w, h) = surface.size();
        if (w, h) != (self.region.width, self.region.height) {
            log::warn!(
                "render surface is {}x{} but region '{}' wants {}x{}",
                w,
                h,
                self.region.id,
                self.region.width,
                self.region.height
            );
        }
    }
}

/// Channel-wise power with negative inputs clamped to zero.
fn powf3(color: [f32; 3], exponent: f32) -> [f32; 3] {
    color.map(|c| c.max(0.0).powf(exponent))
}

/// The asymmetric projector frustum: each half-angle in degrees becomes a
/// plane offset on the near plane, as `glFrustum` takes them.
fn projection_matrix(frustum: &Frustum) -> Mat4 {
    crate::render::frustum_projection(
        frustum.left_angle.to_radians().tan() * FRUSTUM_NEAR,
        frustum.right_angle.to_radians().tan() * FRUSTUM_NEAR,
        frustum.down_angle.to_radians().tan() * FRUSTUM_NEAR,
        frustum.up_angle.to_radians().tan() * FRUSTUM_NEAR,
        FRUSTUM_NEAR,
        FRUSTUM_FAR,
    )
}

/// The virtual-camera pose: roll, negated pitch, yaw about the frame's
/// axes, then the axis-permuted translation. The negation and the
/// permutation reproduce the reference tool's convention; containers are
/// calibrated against it, so changing either is a compatibility break.
fn pose_matrix(frustum: &Frustum, frame: &CoordinateFrame) -> Mat4 {
    let rotate = |degrees: f32, axis: Vec3| {
        let axis = axis.normalize_or_zero();
        if axis == Vec3::ZERO {
            Mat4::IDENTITY
        } else {
            Mat4::from_axis_angle(axis, degrees.to_radians())
        }
    };
    rotate(frustum.roll, frame.roll_axis)
        * rotate(-frustum.pitch, frame.pitch_axis)
        * rotate(frustum.yaw, frame.yaw_axis)
        * Mat4::from_translation(Vec3::new(-frame.pos.x, -frame.pos.z, frame.pos.y))
}

/// One mesh vertex per warp sample, placed at the sample's texel center,
/// textured by the placement-transformed warp value; two triangles per
/// grid cell, fixed diagonal.
fn warp_grid_mesh(
    warp: &WarpMap,
    region: &Region,
    flip_media: bool,
) -> (Vec<[f32; 3]>, Vec<[f32; 2]>, Vec<[u32; 3]>) {
    let gw = warp.width();
    let gh = warp.height();

    let mut positions = Vec::with_capacity((gw * gh) as usize);
    let mut texcoords = Vec::with_capacity((gw * gh) as usize);
    for yi in 0..gh {
        for xi in 0..gw {
            positions.push([
                (xi as f32 + 0.5) / gw as f32,
                (yi as f32 + 0.5) / gh as f32,
                0.0,
            ]);
            let uv = region.map_uv(warp.cell(xi, yi), flip_media);
            texcoords.push([uv.x, uv.y]);
        }
    }

    let mut triangles = Vec::with_capacity(((gw - 1) * (gh - 1) * 2) as usize);
    for yi in 0..gh - 1 {
        for xi in 0..gw - 1 {
            let v0 = xi + yi * gw;
            let v1 = xi + (yi + 1) * gw;
            let v2 = (xi + 1) + (yi + 1) * gw;
            let v3 = (xi + 1) + yi * gw;
            triangles.push([v2, v0, v1]);
            triangles.push([v3, v0, v2]);
        }
    }

    (positions, texcoords, triangles)
}

/// Two triangles covering the unit square, texcoords equal to positions.
fn unit_quad() -> (Vec<[f32; 3]>, Vec<[f32; 2]>, Vec<[u32; 3]>) {
    let positions = vec![
        [0.0, 0.0, 0.0],
        [1.0, 0.0, 0.0],
        [1.0, 1.0, 0.0],
        [0.0, 1.0, 0.0],
    ];
    let texcoords = vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]];
    let triangles = vec![[0, 1, 2], [0, 2, 3]];
    (positions, texcoords, triangles)
}
