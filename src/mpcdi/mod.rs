//! MPCDI calibration containers.
//!
//! A container is a manifest (`mpcdi.xml`) plus the sub-files it
//! references: PFM warp fields, blend-map images and OBJ screen meshes.
//! The backing store is abstract: a plain directory works out of the box,
//! an archive reader plugs in through [`ContainerSource`], and callers
//! never observe which kind they got once the container is built.

mod schema;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use glam::Vec3;

use crate::blend::BlendMap;
use crate::error::{Error, Result};
use crate::obj::ObjMesh;
use crate::pfm::WarpMap;
use crate::texture::Texture;

/// Name of the manifest entry inside every container.
const MANIFEST_NAME: &str = "mpcdi.xml";

/// Black-box byte reader keyed by entry path.
pub trait ContainerSource {
    /// Raw bytes of the named entry. Absent entries are
    /// [`Error::MissingResource`].
    fn read(&self, name: &str) -> Result<Vec<u8>>;
}

/// Directory-backed container source.
pub struct DirSource {
    root: PathBuf,
}

impl DirSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ContainerSource for DirSource {
    fn read(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.root.join(name);
        std::fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::MissingResource(name.to_string())
            } else {
                Error::Io(e)
            }
        })
    }
}

/// In-memory container source, for embedded calibrations and tests.
#[derive(Default)]
pub struct MemSource {
    entries: HashMap<String, Vec<u8>>,
}

impl MemSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.entries.insert(name.into(), bytes.into());
    }
}

impl ContainerSource for MemSource {
    fn read(&self, name: &str) -> Result<Vec<u8>> {
        self.entries
            .get(name)
            .cloned()
            .ok_or_else(|| Error::MissingResource(name.to_string()))
    }
}

/// The compositing mode a manifest selects.
///
/// Parsing keeps unknown profiles around as [`Profile::Other`]; they are
/// only rejected when a compositor is constructed for them.
#[derive(Debug, Clone, PartialEq)]
pub enum Profile {
    /// Planar 2-D warp.
    TwoD,
    /// Full 3-D.
    ThreeD,
    /// Advanced 3-D.
    Advanced3,
    /// Shader-lamp: 3-D frustum projection re-warped in 2-D.
    ShaderLamp,
    Other(String),
}

impl Profile {
    fn from_tag(tag: &str) -> Self {
        match tag {
            "2d" => Profile::TwoD,
            "3d" => Profile::ThreeD,
            "a3" => Profile::Advanced3,
            "sl" => Profile::ShaderLamp,
            other => Profile::Other(other.to_string()),
        }
    }

    pub fn tag(&self) -> &str {
        match self {
            Profile::TwoD => "2d",
            Profile::ThreeD => "3d",
            Profile::Advanced3 => "a3",
            Profile::ShaderLamp => "sl",
            Profile::Other(tag) => tag,
        }
    }
}

/// Virtual-camera field of view: three Euler angles plus four half-angles,
/// all in degrees.
#[derive(Debug, Clone, Copy)]
pub struct Frustum {
    pub yaw: f32,
    pub pitch: f32,
    pub roll: f32,
    pub left_angle: f32,
    pub right_angle: f32,
    pub down_angle: f32,
    pub up_angle: f32,
}

/// Virtual-camera pose: position plus the three rotation axes the frustum
/// angles turn about.
#[derive(Debug, Clone, Copy)]
pub struct CoordinateFrame {
    pub pos: Vec3,
    pub yaw_axis: Vec3,
    pub pitch_axis: Vec3,
    pub roll_axis: Vec3,
}

/// A file referenced from a region's fileset.
#[derive(Debug, Clone)]
pub struct FileRef {
    pub path: String,
    pub component_depth: Option<u32>,
    pub bit_depth: Option<u32>,
    /// Gamma exponent the file's pixel values are encoded with; 1.0 when
    /// the manifest does not say.
    pub gamma_embedded: f32,
}

/// A shared output buffer holding one or more regions.
#[derive(Debug, Clone)]
pub struct BufferDef {
    pub id: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Ids of the regions placed in this buffer, manifest order.
    pub region_ids: Vec<String>,
}

/// One projector's placement and calibration data.
#[derive(Debug, Clone)]
pub struct Region {
    pub id: String,
    /// Effective pixel resolution (the region's own, or inherited from
    /// its buffer).
    pub width: u32,
    pub height: u32,
    /// Placement within the shared buffer, in buffer-fraction units.
    pub x: f32,
    pub y: f32,
    pub xsize: f32,
    pub ysize: f32,
    pub frustum: Option<Frustum>,
    pub frame: Option<CoordinateFrame>,
    pub geometry_warp_file: Option<FileRef>,
    pub alpha_map: Option<FileRef>,
    pub beta_map: Option<FileRef>,
    pub distortion_map: Option<FileRef>,
    pub geometry_file: Option<FileRef>,
}

impl Region {
    /// Map a warp-field UV into buffer-fraction space: optionally flip V
    /// (media authored top-down vs. the field's bottom-up convention),
    /// then scale by the placement size and translate by its offset.
    pub fn map_uv(&self, uv: glam::Vec2, flip_v: bool) -> glam::Vec2 {
        let v = if flip_v { 1.0 - uv.y } else { uv.y };
        glam::Vec2::new(self.x + self.xsize * uv.x, self.y + self.ysize * v)
    }
}

/// A parsed calibration container. Immutable once read; sub-resources are
/// extracted on demand by whoever needs them.
pub struct MpcdiFile {
    source: Box<dyn ContainerSource>,
    profile: Profile,
    buffers: Vec<BufferDef>,
    region_order: Vec<String>,
    regions: HashMap<String, Region>,
}

impl MpcdiFile {
    /// Open a directory-backed container.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.is_dir() {
            return Err(Error::Schema(format!(
                "'{}' is not a calibration directory; archive-backed \
                 containers need a ContainerSource from the caller",
                path.display()
            )));
        }
        let file = Self::from_source(Box::new(DirSource::new(path)))?;
        log::info!(
            "loaded calibration container {:?} (profile '{}', {} regions)",
            path,
            file.profile.tag(),
            file.region_order.len()
        );
        Ok(file)
    }

    /// Build a container from any byte source.
    pub fn from_source(source: Box<dyn ContainerSource>) -> Result<Self> {
        let manifest = source.read(MANIFEST_NAME)?;
        let text = std::str::from_utf8(&manifest)
            .map_err(|_| Error::Schema("manifest is not valid UTF-8".into()))?;
        let raw: schema::RawMpcdi = quick_xml::de::from_str(text)?;
        let (profile, buffers, region_order, regions) = schema::build(raw)?;
        Ok(Self {
            source,
            profile,
            buffers,
            region_order,
            regions,
        })
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn buffers(&self) -> &[BufferDef] {
        &self.buffers
    }

    /// Region ids in manifest order.
    pub fn region_ids(&self) -> &[String] {
        &self.region_order
    }

    pub fn region(&self, id: &str) -> Option<&Region> {
        self.regions.get(id)
    }

    /// Raw bytes of a named sub-file.
    pub fn extract_subfile(&self, name: &str) -> Result<Vec<u8>> {
        self.source.read(name)
    }

    /// Parse a named sub-file as a PFM warp field.
    pub fn extract_warp_map(&self, name: &str) -> Result<WarpMap> {
        WarpMap::parse(&self.extract_subfile(name)?)
    }

    /// Decode a named image sub-file to an f32 texture.
    pub fn extract_texture(&self, name: &str) -> Result<Texture> {
        let bytes = self.extract_subfile(name)?;
        let image = image::load_from_memory(&bytes)?;
        Ok(Texture::from_image(&image))
    }

    /// Decode a blend map together with its embedded gamma.
    pub fn extract_blend_map(&self, file: &FileRef) -> Result<BlendMap> {
        Ok(BlendMap::new(
            self.extract_texture(&file.path)?,
            file.gamma_embedded,
        ))
    }

    /// Parse a named sub-file as an OBJ mesh.
    pub fn extract_mesh(&self, name: &str) -> Result<ObjMesh> {
        Ok(ObjMesh::parse(&self.extract_subfile(name)?))
    }
}

/// Explicit cache for callers that drive several regions of the same
/// container: one read per path, shared thereafter, no eviction.
#[derive(Default)]
pub struct ContainerCache {
    containers: HashMap<PathBuf, Arc<MpcdiFile>>,
}

impl ContainerCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&mut self, path: &Path) -> Result<Arc<MpcdiFile>> {
        if let Some(file) = self.containers.get(path) {
            return Ok(file.clone());
        }
        let file = Arc::new(MpcdiFile::open(path)?);
        self.containers.insert(path.to_path_buf(), file.clone());
        Ok(file)
    }
}
