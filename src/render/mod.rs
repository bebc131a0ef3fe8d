//! Render-surface capability.
//!
//! The compositor drives whatever surface the caller supplies through
//! [`RenderSurface`]; the mesh-based paths (fixed-function fallback and
//! the shader-lamp 3-D pass) submit buffers and a transform, then read the
//! frame back. [`SoftwareSurface`] is the in-tree reference
//! implementation: a small depth-tested, perspective-correct CPU
//! rasterizer, enough to run every pipeline headless. GPU backends live
//! outside the crate behind the same trait.

use glam::{Mat4, Vec2, Vec4, Vec4Swizzles};

use crate::texture::Texture;

/// Opaque id for an uploaded texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureHandle(pub usize);

/// How a draw combines with the existing frame contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendOp {
    /// Overwrite the frame.
    Replace,
    /// Multiply the frame by the source color (the blend-card pass).
    Multiply,
}

/// Uniform state for one draw call.
#[derive(Debug, Clone, Copy)]
pub struct DrawParams {
    pub mvp: Mat4,
    /// Sample textures at `1 - v`, reconciling mesh texcoords authored
    /// bottom-up with textures stored top-down.
    pub flip_v: bool,
    pub blend: BlendOp,
    pub depth_test: bool,
}

/// Vertex data for one draw call, indexed triangles.
#[derive(Debug, Clone, Copy)]
pub struct MeshBuffers<'a> {
    pub positions: &'a [[f32; 3]],
    pub texcoords: &'a [[f32; 2]],
    pub triangles: &'a [[u32; 3]],
}

/// The rendering capability the compositor consumes.
pub trait RenderSurface {
    fn size(&self) -> (u32, u32);
    /// Reset color to a constant and clear the depth buffer.
    fn clear(&mut self, color: [f32; 3]);
    fn upload_texture(&mut self, texture: &Texture) -> TextureHandle;
    fn bind_texture(&mut self, handle: TextureHandle, slot: usize);
    fn draw_mesh(&mut self, mesh: MeshBuffers<'_>, params: &DrawParams);
    /// The frame in the surface's native row order (bottom-up, as OpenGL
    /// reads pixels).
    fn capture_frame(&self) -> Texture;
}

/// CPU reference implementation of [`RenderSurface`].
pub struct SoftwareSurface {
    width: u32,
    height: u32,
    /// Row 0 is the bottom of the frame.
    color: Vec<[f32; 3]>,
    depth: Vec<f32>,
    textures: Vec<Texture>,
    bound: [Option<usize>; 4],
}

/// One post-transform vertex, clip space plus its texcoord.
#[derive(Debug, Clone, Copy)]
struct ClipVertex {
    clip: Vec4,
    uv: Vec2,
}

impl SoftwareSurface {
    pub fn new(width: u32, height: u32) -> Self {
        let len = (width * height) as usize;
        Self {
            width,
            height,
            color: vec![[0.0; 3]; len],
            depth: vec![f32::INFINITY; len],
            textures: Vec::new(),
            bound: [None; 4],
        }
    }

    fn slot0_texture(&self) -> Option<&Texture> {
        self.bound[0].map(|i| &self.textures[i])
    }

    fn rasterize(&mut self, tri: [ClipVertex; 3], params: &DrawParams) {
        // Screen-space positions (row 0 at the bottom), NDC depth, and
        // attributes pre-divided by w for perspective correction.
        let mut sx = [0.0f32; 3];
        let mut sy = [0.0f32; 3];
        let mut sz = [0.0f32; 3];
        let mut inv_w = [0.0f32; 3];
        let mut uv_w = [Vec2::ZERO; 3];
        for (i, v) in tri.iter().enumerate() {
            let w = v.clip.w;
            let ndc = v.clip.xyz() / w;
            sx[i] = (ndc.x + 1.0) * 0.5 * self.width as f32;
            sy[i] = (ndc.y + 1.0) * 0.5 * self.height as f32;
            sz[i] = ndc.z;
            inv_w[i] = 1.0 / w;
            uv_w[i] = v.uv / w;
        }

        let edge = |ax: f32, ay: f32, bx: f32, by: f32, px: f32, py: f32| {
            (bx - ax) * (py - ay) - (by - ay) * (px - ax)
        };
        let area = edge(sx[0], sy[0], sx[1], sy[1], sx[2], sy[2]);
        if area.abs() < f32::EPSILON {
            return;
        }
        // Accept either winding.
        let sign = area.signum();
        let inv_area = 1.0 / (area * sign);

        let min_x = sx.iter().fold(f32::INFINITY, |a, &b| a.min(b)).floor().max(0.0) as u32;
        let max_x = sx
            .iter()
            .fold(f32::NEG_INFINITY, |a, &b| a.max(b))
            .ceil()
            .min(self.width as f32) as u32;
        let min_y = sy.iter().fold(f32::INFINITY, |a, &b| a.min(b)).floor().max(0.0) as u32;
        let max_y = sy
            .iter()
            .fold(f32::NEG_INFINITY, |a, &b| a.max(b))
            .ceil()
            .min(self.height as f32) as u32;

        // Boundary pixels belong to exactly one of the triangles sharing
        // an edge, otherwise the Multiply blend would apply twice along
        // shared diagonals.
        let accepts = |w: f32, i: usize, j: usize| {
            if w != 0.0 {
                return w > 0.0;
            }
            let (dx, dy) = if sign > 0.0 {
                (sx[j] - sx[i], sy[j] - sy[i])
            } else {
                (sx[i] - sx[j], sy[i] - sy[j])
            };
            dy > 0.0 || (dy == 0.0 && dx < 0.0)
        };

        for py in min_y..max_y {
            for px in min_x..max_x {
                let cx = px as f32 + 0.5;
                let cy = py as f32 + 0.5;
                let w0 = edge(sx[1], sy[1], sx[2], sy[2], cx, cy) * sign;
                let w1 = edge(sx[2], sy[2], sx[0], sy[0], cx, cy) * sign;
                let w2 = edge(sx[0], sy[0], sx[1], sy[1], cx, cy) * sign;
                if !accepts(w0, 1, 2) || !accepts(w1, 2, 0) || !accepts(w2, 0, 1) {
                    continue;
                }
                let b0 = w0 * inv_area;
                let b1 = w1 * inv_area;
                let b2 = w2 * inv_area;

                let idx = (py * self.width + px) as usize;
                let z = b0 * sz[0] + b1 * sz[1] + b2 * sz[2];
                if params.depth_test {
                    if z >= self.depth[idx] {
                        continue;
                    }
                    self.depth[idx] = z;
                }

                let pixel_inv_w = b0 * inv_w[0] + b1 * inv_w[1] + b2 * inv_w[2];
                let uv = (uv_w[0] * b0 + uv_w[1] * b1 + uv_w[2] * b2) / pixel_inv_w;
                let v = if params.flip_v { 1.0 - uv.y } else { uv.y };
                let src = match self.slot0_texture() {
                    Some(tex) => tex.sample(uv.x, v),
                    None => [1.0; 3],
                };

                let dst = &mut self.color[idx];
                match params.blend {
                    BlendOp::Replace => *dst = src,
                    BlendOp::Multiply => {
                        for c in 0..3 {
                            dst[c] *= src[c];
                        }
                    }
                }
            }
        }
    }
}

/// Clip a triangle against the near plane (`z + w > 0`), yielding a fan of
/// zero, one or two triangles.
fn clip_near(tri: [ClipVertex; 3]) -> Vec<[ClipVertex; 3]> {
    let inside = |v: &ClipVertex| v.clip.z + v.clip.w > f32::EPSILON;
    if tri.iter().all(inside) {
        return vec![tri];
    }

    let mut polygon: Vec<ClipVertex> = Vec::with_capacity(4);
    for i in 0..3 {
        let a = tri[i];
        let b = tri[(i + 1) % 3];
        let da = a.clip.z + a.clip.w;
        let db = b.clip.z + b.clip.w;
        if da > 0.0 {
            polygon.push(a);
        }
        if (da > 0.0) != (db > 0.0) {
            let t = da / (da - db);
            polygon.push(ClipVertex {
                clip: a.clip + (b.clip - a.clip) * t,
                uv: a.uv + (b.uv - a.uv) * t,
            });
        }
    }

    (1..polygon.len().saturating_sub(1))
        .map(|i| [polygon[0], polygon[i], polygon[i + 1]])
        .collect()
}

impl RenderSurface for SoftwareSurface {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn clear(&mut self, color: [f32; 3]) {
        self.color.fill(color);
        self.depth.fill(f32::INFINITY);
    }

    fn upload_texture(&mut self, texture: &Texture) -> TextureHandle {
        self.textures.push(texture.clone());
        TextureHandle(self.textures.len() - 1)
    }

    fn bind_texture(&mut self, handle: TextureHandle, slot: usize) {
        if slot < self.bound.len() && handle.0 < self.textures.len() {
            self.bound[slot] = Some(handle.0);
        }
    }

    fn draw_mesh(&mut self, mesh: MeshBuffers<'_>, params: &DrawParams) {
        for tri in mesh.triangles {
            let fetch = |i: u32| -> Option<ClipVertex> {
                let p = *mesh.positions.get(i as usize)?;
                let uv = *mesh.texcoords.get(i as usize)?;
                Some(ClipVertex {
                    clip: params.mvp * Vec4::new(p[0], p[1], p[2], 1.0),
                    uv: Vec2::from_array(uv),
                })
            };
            let (Some(a), Some(b), Some(c)) = (fetch(tri[0]), fetch(tri[1]), fetch(tri[2]))
            else {
                log::debug!("skipping triangle with out-of-range index");
                continue;
            };
            for clipped in clip_near([a, b, c]) {
                self.rasterize(clipped, params);
            }
        }
    }

    fn capture_frame(&self) -> Texture {
        Texture::from_pixels(self.width, self.height, self.color.clone())
    }
}

/// The projection the shader-lamp pass uses: an off-center frustum in
/// OpenGL clip-space conventions, equivalent to `glFrustum`.
pub fn frustum_projection(
    left: f32,
    right: f32,
    bottom: f32,
    top: f32,
    near: f32,
    far: f32,
) -> Mat4 {
    Mat4::from_cols(
        Vec4::new(2.0 * near / (right - left), 0.0, 0.0, 0.0),
        Vec4::new(0.0, 2.0 * near / (top - bottom), 0.0, 0.0),
        Vec4::new(
            (right + left) / (right - left),
            (top + bottom) / (top - bottom),
            -(far + near) / (far - near),
            -1.0,
        ),
        Vec4::new(0.0, 0.0, -2.0 * far * near / (far - near), 0.0),
    )
}

/// The 2-D projection both screen-space passes use: the unit square with
/// the origin at the top left, equivalent to `glOrtho(0, 1, 1, 0, -100, 100)`.
pub fn unit_ortho() -> Mat4 {
    Mat4::orthographic_rh_gl(0.0, 1.0, 1.0, 0.0, -100.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn test_fullscreen_quad_covers_frame() {
        let mut surface = SoftwareSurface::new(8, 8);
        surface.clear([0.0; 3]);
        let tex = Texture::flat(1, 1, 0.75);
        let handle = surface.upload_texture(&tex);
        surface.bind_texture(handle, 0);

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
                blend: BlendOp::Replace,
                depth_test: false,
            },
        );

        let frame = surface.capture_frame();
        for p in frame.pixels() {
            assert!((p[0] - 0.75).abs() < 1e-6);
        }
    }

    #[test]
    fn test_capture_rows_are_bottom_up() {
        // Texture row 0 (red) is the image top; under the top-left-origin
        // ortho it lands at quad y=0, which is the top of the frame, which
        // the capture stores in its last row.
        let mut surface = SoftwareSurface::new(4, 4);
        surface.clear([0.0; 3]);
        let tex = Texture::from_pixels(
            1,
            2,
            vec![[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
        );
        let handle = surface.upload_texture(&tex);
        surface.bind_texture(handle, 0);

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
                blend: BlendOp::Replace,
                depth_test: false,
            },
        );

        let frame = surface.capture_frame();
        assert_eq!(frame.texel(0, 3), [1.0, 0.0, 0.0]);
        assert_eq!(frame.texel(0, 0), [0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_multiply_blend_darkens() {
        let mut surface = SoftwareSurface::new(4, 4);
        surface.clear([1.0; 3]);
        let tex = Texture::flat(1, 1, 0.5);
        let handle = surface.upload_texture(&tex);
        surface.bind_texture(handle, 0);

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

        let frame = surface.capture_frame();
        assert!((frame.texel(2, 2)[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_depth_test_keeps_nearer_fragment() {
        let mut surface = SoftwareSurface::new(4, 4);
        surface.clear([0.0; 3]);
        let near_tex = Texture::flat(1, 1, 1.0);
        let far_tex = Texture::flat(1, 1, 0.25);
        let near_handle = surface.upload_texture(&near_tex);
        let far_handle = surface.upload_texture(&far_tex);

        // NDC-space quads via an identity transform; smaller z is nearer.
        let quad = |z: f32| -> Vec<[f32; 3]> {
            vec![[-1.0, -1.0, z], [1.0, -1.0, z], [1.0, 1.0, z], [-1.0, 1.0, z]]
        };
        let texcoords = vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]];
        let triangles = vec![[0, 1, 2], [0, 2, 3]];
        let params = DrawParams {
            mvp: Mat4::IDENTITY,
            flip_v: false,
            blend: BlendOp::Replace,
            depth_test: true,
        };

        surface.bind_texture(near_handle, 0);
        let near_quad = quad(0.0);
        surface.draw_mesh(
            MeshBuffers {
                positions: &near_quad,
                texcoords: &texcoords,
                triangles: &triangles,
            },
            &params,
        );
        surface.bind_texture(far_handle, 0);
        let far_quad = quad(0.5);
        surface.draw_mesh(
            MeshBuffers {
                positions: &far_quad,
                texcoords: &texcoords,
                triangles: &triangles,
            },
            &params,
        );

        assert_eq!(surface.capture_frame().texel(2, 2), [1.0; 3]);
    }

    #[test]
    fn test_frustum_corners_hit_ndc_corners() {
        let proj = frustum_projection(-1.0, 1.0, -1.0, 1.0, 1.0, 10000.0);
        let corner = proj * Vec4::new(-1.0, -1.0, -1.0, 1.0);
        let ndc = corner.xyz() / corner.w;
        assert!((ndc.x + 1.0).abs() < 1e-4);
        assert!((ndc.y + 1.0).abs() < 1e-4);
        assert!((ndc.z + 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_triangle_behind_camera_is_clipped_out() {
        let mut surface = SoftwareSurface::new(4, 4);
        surface.clear([0.0; 3]);
        let proj = frustum_projection(-1.0, 1.0, -1.0, 1.0, 1.0, 100.0);
        // Entirely behind the eye (positive z in view space).
        let positions = vec![[-1.0, -1.0, 5.0], [1.0, -1.0, 5.0], [0.0, 1.0, 5.0]];
        let texcoords = vec![[0.0, 0.0], [1.0, 0.0], [0.5, 1.0]];
        let triangles = vec![[0, 1, 2]];
        surface.draw_mesh(
            MeshBuffers {
                positions: &positions,
                texcoords: &texcoords,
                triangles: &triangles,
            },
            &DrawParams {
                mvp: proj,
                flip_v: false,
                blend: BlendOp::Replace,
                depth_test: true,
            },
        );
        assert_eq!(surface.capture_frame().texel(2, 2), [0.0; 3]);
    }
}
