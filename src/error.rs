//! Error types for calibration parsing and compositing.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Fatal errors surfaced by the compositing core.
///
/// All variants abort the operation that raised them; no partial state is
/// kept and nothing is retried. Locally-recovered conditions (a malformed
/// mesh face-vertex, a defaultable missing blend map) never appear here.
#[derive(Debug, Error)]
pub enum Error {
    /// A binary sub-format violated its layout (warp-map magic, payload
    /// length, byte order).
    #[error("format error: {0}")]
    Format(String),

    /// The container manifest is missing or inconsistent.
    #[error("manifest error: {0}")]
    Schema(String),

    /// The manifest names a compositing profile with no implementation.
    #[error("profile '{0}' is not implemented")]
    UnsupportedProfile(String),

    /// A referenced sub-file is absent and not defaultable.
    #[error("missing resource: {0}")]
    MissingResource(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("xml error: {0}")]
    Xml(#[from] quick_xml::DeError),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}
