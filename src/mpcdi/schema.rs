//! Raw manifest schema and validation.
//!
//! The serde structs mirror the XML exactly, with every attribute read as
//! an optional string; `build` converts them into the typed model and is
//! where all schema errors come from. An attribute that is absent or
//! present-but-empty counts as unset.

use std::collections::HashMap;
use std::str::FromStr;

use glam::Vec3;
use serde::Deserialize;

use super::{BufferDef, CoordinateFrame, FileRef, Frustum, Profile, Region};
use crate::error::{Error, Result};

#[derive(Debug, Deserialize)]
pub(super) struct RawMpcdi {
    #[serde(rename = "@profile", default)]
    profile: Option<String>,
    #[serde(default)]
    display: Option<RawDisplay>,
    #[serde(default)]
    files: Option<RawFiles>,
}

#[derive(Debug, Deserialize)]
struct RawDisplay {
    #[serde(rename = "buffer", default)]
    buffers: Vec<RawBuffer>,
}

#[derive(Debug, Deserialize)]
struct RawBuffer {
    #[serde(rename = "@id", default)]
    id: Option<String>,
    #[serde(rename = "@XResolution", default)]
    x_resolution: Option<String>,
    #[serde(rename = "@YResolution", default)]
    y_resolution: Option<String>,
    #[serde(rename = "region", default)]
    regions: Vec<RawRegion>,
}

#[derive(Debug, Deserialize)]
struct RawRegion {
    #[serde(rename = "@id", default)]
    id: Option<String>,
    #[serde(rename = "@XResolution", default)]
    x_resolution: Option<String>,
    #[serde(rename = "@YResolution", default)]
    y_resolution: Option<String>,
    #[serde(rename = "@x", default)]
    x: Option<String>,
    #[serde(rename = "@y", default)]
    y: Option<String>,
    #[serde(rename = "@xsize", default)]
    xsize: Option<String>,
    #[serde(rename = "@ysize", default)]
    ysize: Option<String>,
    #[serde(default)]
    frustum: Option<RawFrustum>,
    #[serde(rename = "coordinateFrame", default)]
    coordinate_frame: Option<RawFrame>,
}

#[derive(Debug, Deserialize)]
struct RawFrustum {
    #[serde(rename = "@yaw", default)]
    yaw: Option<String>,
    #[serde(rename = "@pitch", default)]
    pitch: Option<String>,
    #[serde(rename = "@roll", default)]
    roll: Option<String>,
    #[serde(rename = "@leftAngle", default)]
    left_angle: Option<String>,
    #[serde(rename = "@rightAngle", default)]
    right_angle: Option<String>,
    #[serde(rename = "@downAngle", default)]
    down_angle: Option<String>,
    #[serde(rename = "@upAngle", default)]
    up_angle: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(rename = "@posx", default)]
    posx: Option<String>,
    #[serde(rename = "@posy", default)]
    posy: Option<String>,
    #[serde(rename = "@posz", default)]
    posz: Option<String>,
    #[serde(rename = "@yawx", default)]
    yawx: Option<String>,
    #[serde(rename = "@yawy", default)]
    yawy: Option<String>,
    #[serde(rename = "@yawz", default)]
    yawz: Option<String>,
    #[serde(rename = "@pitchx", default)]
    pitchx: Option<String>,
    #[serde(rename = "@pitchy", default)]
    pitchy: Option<String>,
    #[serde(rename = "@pitchz", default)]
    pitchz: Option<String>,
    #[serde(rename = "@rollx", default)]
    rollx: Option<String>,
    #[serde(rename = "@rolly", default)]
    rolly: Option<String>,
    #[serde(rename = "@rollz", default)]
    rollz: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawFiles {
    #[serde(rename = "fileset", default)]
    filesets: Vec<RawFileset>,
}

#[derive(Debug, Deserialize)]
struct RawFileset {
    #[serde(rename = "@region", default)]
    region: Option<String>,
    #[serde(rename = "geometryWarpFile", default)]
    geometry_warp_file: Option<RawFileRef>,
    #[serde(rename = "alphaMap", default)]
    alpha_map: Option<RawFileRef>,
    #[serde(rename = "betaMap", default)]
    beta_map: Option<RawFileRef>,
    #[serde(rename = "distortionMap", default)]
    distortion_map: Option<RawFileRef>,
    #[serde(rename = "geometryFile", default)]
    geometry_file: Option<RawFileRef>,
}

#[derive(Debug, Deserialize)]
struct RawFileRef {
    #[serde(default)]
    path: Option<String>,
    #[serde(rename = "componentDepth", default)]
    component_depth: Option<String>,
    #[serde(rename = "bitdepth", default)]
    bit_depth: Option<String>,
    #[serde(rename = "gammaEmbedded", default)]
    gamma_embedded: Option<String>,
}

/// Treat absent and empty the same, reject anything unparseable.
fn optional<T: FromStr>(value: &Option<String>, what: &str) -> Result<Option<T>> {
    match value.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(text) => text.parse().map(Some).map_err(|_| {
            Error::Schema(format!("attribute {} has malformed value '{}'", what, text))
        }),
    }
}

fn required<T: FromStr>(value: &Option<String>, what: &str) -> Result<T> {
    optional(value, what)?.ok_or_else(|| Error::Schema(format!("missing attribute {}", what)))
}

impl RawFrustum {
    fn build(&self, region: &str) -> Result<Frustum> {
        let f = |v, name| required::<f32>(v, &format!("{} of region '{}' frustum", name, region));
        Ok(Frustum {
            yaw: f(&self.yaw, "yaw")?,
            pitch: f(&self.pitch, "pitch")?,
            roll: f(&self.roll, "roll")?,
            left_angle: f(&self.left_angle, "leftAngle")?,
            right_angle: f(&self.right_angle, "rightAngle")?,
            down_angle: f(&self.down_angle, "downAngle")?,
            up_angle: f(&self.up_angle, "upAngle")?,
        })
    }
}

impl RawFrame {
    fn build(&self, region: &str) -> Result<CoordinateFrame> {
        let f = |v, name| required::<f32>(v, &format!("{} of region '{}' frame", name, region));
        Ok(CoordinateFrame {
            pos: Vec3::new(f(&self.posx, "posx")?, f(&self.posy, "posy")?, f(&self.posz, "posz")?),
            yaw_axis: Vec3::new(
                f(&self.yawx, "yawx")?,
                f(&self.yawy, "yawy")?,
                f(&self.yawz, "yawz")?,
            ),
            pitch_axis: Vec3::new(
                f(&self.pitchx, "pitchx")?,
                f(&self.pitchy, "pitchy")?,
                f(&self.pitchz, "pitchz")?,
            ),
            roll_axis: Vec3::new(
                f(&self.rollx, "rollx")?,
                f(&self.rolly, "rolly")?,
                f(&self.rollz, "rollz")?,
            ),
        })
    }
}

impl RawFileRef {
    fn build(&self, what: &str) -> Result<FileRef> {
        let path = self
            .path
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| Error::Schema(format!("{} has no path", what)))?;
        Ok(FileRef {
            path: path.to_string(),
            component_depth: optional(&self.component_depth, &format!("componentDepth of {}", what))?,
            bit_depth: optional(&self.bit_depth, &format!("bitdepth of {}", what))?,
            gamma_embedded: optional(&self.gamma_embedded, &format!("gammaEmbedded of {}", what))?
                .unwrap_or(1.0),
        })
    }
}

type Built = (Profile, Vec<BufferDef>, Vec<String>, HashMap<String, Region>);

/// Validate the raw manifest and assemble the typed container model.
pub(super) fn build(raw: RawMpcdi) -> Result<Built> {
    let profile = raw
        .profile
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(Profile::from_tag)
        .ok_or_else(|| Error::Schema("manifest has no profile attribute".into()))?;

    let display = raw
        .display
        .ok_or_else(|| Error::Schema("manifest has no display section".into()))?;

    let mut buffers = Vec::new();
    let mut region_order = Vec::new();
    let mut regions: HashMap<String, Region> = HashMap::new();

    for raw_buffer in display.buffers {
        let buffer_id: String = required(&raw_buffer.id, "id of buffer")?;
        let buffer_width = optional::<u32>(&raw_buffer.x_resolution, "XResolution of buffer")?;
        let buffer_height = optional::<u32>(&raw_buffer.y_resolution, "YResolution of buffer")?;
        let mut region_ids = Vec::new();

        for raw_region in &raw_buffer.regions {
            let id: String = required(&raw_region.id, "id of region")?;
            if regions.contains_key(&id) {
                return Err(Error::Schema(format!("duplicate region id '{}'", id)));
            }

            let own_width = optional::<u32>(&raw_region.x_resolution, "XResolution of region")?;
            let own_height = optional::<u32>(&raw_region.y_resolution, "YResolution of region")?;
            let width = own_width.or(buffer_width).ok_or_else(|| {
                Error::Schema(format!("region '{}' has no resolvable XResolution", id))
            })?;
            let height = own_height.or(buffer_height).ok_or_else(|| {
                Error::Schema(format!("region '{}' has no resolvable YResolution", id))
            })?;
            if width == 0 || height == 0 {
                return Err(Error::Schema(format!(
                    "region '{}' has a zero resolution",
                    id
                )));
            }

            let attr = |v, name: &str| required::<f32>(v, &format!("{} of region '{}'", name, id));
            let xsize = attr(&raw_region.xsize, "xsize")?;
            let ysize = attr(&raw_region.ysize, "ysize")?;
            if xsize < 0.0 || ysize < 0.0 {
                return Err(Error::Schema(format!(
                    "region '{}' has a negative placement size",
                    id
                )));
            }

            let region = Region {
                width,
                height,
                x: attr(&raw_region.x, "x")?,
                y: attr(&raw_region.y, "y")?,
                xsize,
                ysize,
                frustum: raw_region
                    .frustum
                    .as_ref()
                    .map(|f| f.build(&id))
                    .transpose()?,
                frame: raw_region
                    .coordinate_frame
                    .as_ref()
                    .map(|f| f.build(&id))
                    .transpose()?,
                geometry_warp_file: None,
                alpha_map: None,
                beta_map: None,
                distortion_map: None,
                geometry_file: None,
                id: id.clone(),
            };
            region_ids.push(id.clone());
            region_order.push(id.clone());
            regions.insert(id, region);
        }

        buffers.push(BufferDef {
            id: buffer_id,
            width: buffer_width,
            height: buffer_height,
            region_ids,
        });
    }

    for fileset in raw.files.map(|f| f.filesets).unwrap_or_default() {
        let region_id: String = required(&fileset.region, "region of fileset")?;
        let region = regions.get_mut(&region_id).ok_or_else(|| {
            Error::Schema(format!("fileset references unknown region '{}'", region_id))
        })?;

        let file_ref = |r: &Option<RawFileRef>, what: &str| -> Result<Option<FileRef>> {
            r.as_ref()
                .map(|r| r.build(&format!("{} of region '{}'", what, region_id)))
                .transpose()
        };
        region.geometry_warp_file = file_ref(&fileset.geometry_warp_file, "geometryWarpFile")?;
        region.alpha_map = file_ref(&fileset.alpha_map, "alphaMap")?;
        region.beta_map = file_ref(&fileset.beta_map, "betaMap")?;
        region.distortion_map = file_ref(&fileset.distortion_map, "distortionMap")?;
        region.geometry_file = file_ref(&fileset.geometry_file, "geometryFile")?;
    }

    Ok((profile, buffers, region_order, regions))
}
