//! End-to-end compositing over in-memory calibration containers.

use std::io::Cursor;

use mpcdi_warp::mpcdi::{MemSource, MpcdiFile};
use mpcdi_warp::render::SoftwareSurface;
use mpcdi_warp::texture::Texture;
use mpcdi_warp::warp::{CompositorConfig, WarpCompositor};

fn pfm_bytes(width: u32, height: u32, uv: [f32; 2]) -> Vec<u8> {
    let mut out = format!("PF\n{} {}\n-1\n", width, height).into_bytes();
    for _ in 0..width * height {
        for v in [uv[0], uv[1], f32::NAN] {
            out.extend_from_slice(&v.to_le_bytes());
        }
    }
    out
}

fn png_gray(value: u8) -> Vec<u8> {
    let img = image::DynamicImage::ImageLuma8(image::GrayImage::from_pixel(
        1,
        1,
        image::Luma([value]),
    ));
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

fn assert_close(actual: [f32; 3], expected: [f32; 3], tolerance: f32) {
    for c in 0..3 {
        assert!(
            (actual[c] - expected[c]).abs() < tolerance,
            "{:?} != {:?}",
            actual,
            expected
        );
    }
}

/// Placement plus the media V-flip, driven through the public container
/// API: a warp value of (0, 0) in a quarter-size region placed at
/// (0.25, 0.25) must sample the media at buffer fraction (0.25, 0.75).
#[test]
fn planar_placement_flips_then_scales() {
    let manifest = r#"<MPCDI profile="2d">
  <display>
    <buffer id="b" XResolution="4" YResolution="4">
      <region id="r" XResolution="" YResolution=""
              x="0.25" y="0.25" xsize="0.5" ysize="0.5"/>
    </buffer>
  </display>
  <files>
    <fileset region="r">
      <geometryWarpFile><path>warp.pfm</path></geometryWarpFile>
    </fileset>
  </files>
</MPCDI>"#;
    let mut source = MemSource::new();
    source.insert("mpcdi.xml", manifest);
    source.insert("warp.pfm", pfm_bytes(2, 2, [0.0, 0.0]));
    let mpcdi = MpcdiFile::from_source(Box::new(source)).unwrap();
    let region = mpcdi.region("r").unwrap();

    let mut compositor =
        WarpCompositor::new(&mpcdi, region, CompositorConfig::default()).unwrap();
    // 2x2 media, distinct texels; (0.25, 0.75) is the bottom-left one.
    let media = Texture::from_pixels(
        2,
        2,
        vec![
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
            [1.0, 1.0, 0.0],
        ],
    );
    compositor.set_media(media);

    let mut surface = SoftwareSurface::new(4, 4);
    let frame = compositor.composite(&mut surface).unwrap();
    for p in frame.pixels() {
        assert_close(*p, [0.0, 0.0, 1.0], 1e-5);
    }
}

/// A container-supplied alpha map with an embedded gamma: the blend runs
/// in linear light and re-encodes to the alpha map's gamma, so a mid-gray
/// alpha over white media comes back as exactly that mid-gray.
#[test]
fn planar_alpha_map_gamma_roundtrips() {
    let manifest = r#"<MPCDI profile="2d">
  <display>
    <buffer id="b" XResolution="4" YResolution="4">
      <region id="r" XResolution="" YResolution=""
              x="0" y="0" xsize="1" ysize="1"/>
    </buffer>
  </display>
  <files>
    <fileset region="r">
      <geometryWarpFile><path>warp.pfm</path></geometryWarpFile>
      <alphaMap>
        <path>alpha.png</path>
        <gammaEmbedded>2.2</gammaEmbedded>
      </alphaMap>
    </fileset>
  </files>
</MPCDI>"#;
    let mut source = MemSource::new();
    source.insert("mpcdi.xml", manifest);
    source.insert("warp.pfm", pfm_bytes(2, 2, [0.5, 0.5]));
    source.insert("alpha.png", png_gray(128));
    let mpcdi = MpcdiFile::from_source(Box::new(source)).unwrap();
    let region = mpcdi.region("r").unwrap();

    let mut compositor =
        WarpCompositor::new(&mpcdi, region, CompositorConfig::default()).unwrap();
    assert!((compositor.target_gamma() - 2.2).abs() < 1e-6);
    compositor.set_media(Texture::flat(3, 3, 1.0));

    let mut surface = SoftwareSurface::new(4, 4);
    let frame = compositor.composite(&mut surface).unwrap();
    let expected = 128.0 / 255.0;
    for p in frame.pixels() {
        assert_close(*p, [expected; 3], 1e-3);
    }
}

/// The full shader-lamp pipeline: a screen quad exactly filling a 90°
/// frustum, textured by a two-band media image, captured and re-warped
/// through a distortion map that reads from the green band.
#[test]
fn shader_lamp_two_pass_pipeline() {
    let manifest = r#"<MPCDI profile="sl">
  <display>
    <buffer id="b" XResolution="32" YResolution="32">
      <region id="r" XResolution="" YResolution=""
              x="0" y="0" xsize="1" ysize="1">
        <frustum yaw="0" pitch="0" roll="0"
                 leftAngle="-45" rightAngle="45" downAngle="-45" upAngle="45"/>
        <coordinateFrame posx="0" posy="0" posz="0"
                         yawx="0" yawy="1" yawz="0"
                         pitchx="1" pitchy="0" pitchz="0"
                         rollx="0" rolly="0" rollz="1"/>
      </region>
    </buffer>
  </display>
  <files>
    <fileset region="r">
      <distortionMap><path>distortion.pfm</path></distortionMap>
      <geometryFile><path>screen.obj</path></geometryFile>
    </fileset>
  </files>
</MPCDI>"#;
    // A quad at z = -5 spanning +/-5 fills the 90-degree frustum edge to
    // edge. Texcoords follow the usual bottom-left OBJ convention.
    let screen_obj = b"v -5 -5 -5\nv 5 -5 -5\nv 5 5 -5\nv -5 5 -5\n\
                       vt 0 0\nvt 1 0\nvt 1 1\nvt 0 1\n\
                       f 1/1 2/2 3/3 4/4\n";

    let mut source = MemSource::new();
    source.insert("mpcdi.xml", manifest);
    source.insert("screen.obj", screen_obj.as_slice());
    // Every display pixel reads the projected frame at (0.5, 0.9): well
    // inside the green band.
    source.insert("distortion.pfm", pfm_bytes(2, 2, [0.5, 0.9]));
    let mpcdi = MpcdiFile::from_source(Box::new(source)).unwrap();
    let region = mpcdi.region("r").unwrap();

    let mut compositor =
        WarpCompositor::new(&mpcdi, region, CompositorConfig::default()).unwrap();
    // Top half green, bottom half red (stored top-down).
    let media = Texture::from_pixels(
        2,
        2,
        vec![
            [0.0, 1.0, 0.0],
            [0.0, 1.0, 0.0],
            [1.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
        ],
    );
    compositor.set_media(media);

    let mut surface = SoftwareSurface::new(32, 32);
    let frame = compositor.composite(&mut surface).unwrap();
    assert_eq!((frame.width(), frame.height()), (32, 32));
    for p in frame.pixels() {
        assert_close(*p, [0.0, 1.0, 0.0], 1e-4);
    }
}

/// Compositing twice from the same state yields the same frame.
#[test]
fn composite_is_repeatable() {
    let manifest = r#"<MPCDI profile="2d">
  <display>
    <buffer id="b" XResolution="8" YResolution="8">
      <region id="r" XResolution="" YResolution=""
              x="0" y="0" xsize="1" ysize="1"/>
    </buffer>
  </display>
  <files>
    <fileset region="r">
      <geometryWarpFile><path>warp.pfm</path></geometryWarpFile>
    </fileset>
  </files>
</MPCDI>"#;
    let mut source = MemSource::new();
    source.insert("mpcdi.xml", manifest);
    source.insert("warp.pfm", pfm_bytes(4, 4, [0.25, 0.5]));
    let mpcdi = MpcdiFile::from_source(Box::new(source)).unwrap();
    let region = mpcdi.region("r").unwrap();

    let mut compositor =
        WarpCompositor::new(&mpcdi, region, CompositorConfig::default()).unwrap();
    compositor.set_media(Texture::from_pixels(
        2,
        1,
        vec![[0.9, 0.1, 0.4], [0.2, 0.8, 0.6]],
    ));

    let mut surface = SoftwareSurface::new(8, 8);
    let first = compositor.composite(&mut surface).unwrap();
    let second = compositor.composite(&mut surface).unwrap();
    assert_eq!(first.pixels(), second.pixels());
}
