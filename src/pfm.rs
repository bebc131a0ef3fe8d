//! PFM warp-field parsing.
//!
//! MPCDI ships its geometric correction as PFM: a 2-byte magic selecting
//! the component count, three ASCII header fields, then a raw float
//! payload. Each grid cell holds the media-space UV coordinate that the
//! corresponding display-space position should sample.

use glam::Vec2;

use crate::error::{Error, Result};

/// A dense grid of floating-point warp samples, immutable once parsed.
#[derive(Debug, Clone)]
pub struct WarpMap {
    components: u32,
    width: u32,
    height: u32,
    scale: f32,
    data: Vec<f32>,
}

impl WarpMap {
    /// Parse a PFM byte buffer.
    ///
    /// `PF` selects three components per cell, `Pf` one; any other magic is
    /// rejected. The header is `width height scale`, each field preceded by
    /// optional whitespace and terminated by exactly one whitespace byte.
    /// The payload must be exactly `width * height * components` 32-bit
    /// little-endian floats; the scale's sign records the source byte
    /// order, and only little-endian (negative scale) data is accepted.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let components = match bytes.get(..2) {
            Some(b"PF") => 3u32,
            Some(b"Pf") => 1u32,
            _ => return Err(Error::Format("not a recognized warp map file".into())),
        };

        let mut pos = 2;
        let width: u32 = read_header_number(bytes, &mut pos)?;
        let height: u32 = read_header_number(bytes, &mut pos)?;
        let scale: f32 = read_header_number(bytes, &mut pos)?;

        if width == 0 || height == 0 {
            return Err(Error::Format(format!(
                "degenerate warp map dimensions {}x{}",
                width, height
            )));
        }
        if scale >= 0.0 {
            // A positive scale marks big-endian source data; we only run on
            // little-endian targets and do not byte-swap.
            return Err(Error::Format(
                "big-endian warp map data is not supported".into(),
            ));
        }

        let payload = &bytes[pos..];
        let expected = width as u64 * height as u64 * components as u64 * 4;
        if payload.len() as u64 != expected {
            return Err(Error::Format(format!(
                "warp map payload is {} bytes, expected {}",
                payload.len(),
                expected
            )));
        }

        let mut data: Vec<f32> = payload
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        // The third channel is filler in the wild, usually NaN. Zero it so
        // the buffer is safe for arithmetic and texture upload.
        if components == 3 {
            for cell in data.chunks_exact_mut(3) {
                if !cell[2].is_finite() {
                    cell[2] = 0.0;
                }
            }
        }

        Ok(Self {
            components,
            width,
            height,
            scale,
            data,
        })
    }

    /// Re-serialize to PFM bytes. Header metadata round-trips exactly; the
    /// payload is written back as little-endian floats.
    pub fn encode(&self) -> Vec<u8> {
        let magic = if self.components == 3 { "PF" } else { "Pf" };
        let mut out = format!("{}\n{} {}\n{}\n", magic, self.width, self.height, self.scale)
            .into_bytes();
        out.reserve(self.data.len() * 4);
        for value in &self.data {
            out.extend_from_slice(&value.to_le_bytes());
        }
        out
    }

    pub fn components(&self) -> u32 {
        self.components
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// The full float payload, `width * height * components` values in row
    /// order, filler channel already zeroed.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// The UV pair stored at a grid cell. Single-component maps report
    /// their value in U with V fixed at zero.
    pub fn cell(&self, x: u32, y: u32) -> Vec2 {
        let i = ((y * self.width + x) * self.components) as usize;
        if self.components == 3 {
            Vec2::new(self.data[i], self.data[i + 1])
        } else {
            Vec2::new(self.data[i], 0.0)
        }
    }

    /// Bilinear UV lookup at a normalized grid position, texel-center
    /// convention, clamped to the grid edge.
    pub fn sample(&self, u: f32, v: f32) -> Vec2 {
        let x = u * self.width as f32 - 0.5;
        let y = v * self.height as f32 - 0.5;
        let x0 = x.floor();
        let y0 = y.floor();
        let tx = x - x0;
        let ty = y - y0;

        let cx = |i: f32| (i.max(0.0) as u32).min(self.width - 1);
        let cy = |i: f32| (i.max(0.0) as u32).min(self.height - 1);
        let p00 = self.cell(cx(x0), cy(y0));
        let p10 = self.cell(cx(x0 + 1.0), cy(y0));
        let p01 = self.cell(cx(x0), cy(y0 + 1.0));
        let p11 = self.cell(cx(x0 + 1.0), cy(y0 + 1.0));

        let top = p00.lerp(p10, tx);
        let bottom = p01.lerp(p11, tx);
        top.lerp(bottom, ty)
    }
}

/// Read one whitespace-delimited ASCII header field: skip leading
/// whitespace, collect the token, then consume exactly one trailing
/// whitespace byte.
fn read_header_number<T: std::str::FromStr>(bytes: &[u8], pos: &mut usize) -> Result<T> {
    let truncated = || Error::Format("truncated warp map header".into());

    let mut p = *pos;
    while bytes.get(p).copied().ok_or_else(truncated)?.is_ascii_whitespace() {
        p += 1;
    }
    let start = p;
    while !bytes.get(p).copied().ok_or_else(truncated)?.is_ascii_whitespace() {
        p += 1;
    }
    *pos = p + 1;

    std::str::from_utf8(&bytes[start..p])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::Format("malformed warp map header field".into()))
}
