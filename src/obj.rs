//! OBJ screen-geometry parsing.
//!
//! The shader-lamp profile describes its projection surface as a small OBJ
//! mesh: `v`/`vt` statements plus `f` face lists. Normals and any other
//! directive are ignored. The parser deduplicates `(position, texcoord)`
//! pairs into flat vertex arrays ready for a render surface.

use std::collections::HashMap;

/// A triangulated mesh with one texcoord per vertex.
#[derive(Debug, Clone, Default)]
pub struct ObjMesh {
    /// Deduplicated vertex positions.
    pub vertices: Vec<[f32; 3]>,
    /// Texture coordinates, same length as `vertices`.
    pub texcoords: Vec<[f32; 2]>,
    /// Triangle indices into the two arrays above.
    pub triangles: Vec<[u32; 3]>,
}

impl ObjMesh {
    /// Parse OBJ text. Never fails: malformed numeric fields parse as
    /// zero, and a face-vertex without a usable position index is dropped
    /// from its face.
    pub fn parse(bytes: &[u8]) -> Self {
        let text = String::from_utf8_lossy(bytes);

        // Raw statement tables and the (position, texcoord) pair lookup
        // only live for the duration of the parse; the emitted arrays are
        // the durable output.
        let mut raw_positions: Vec<[f32; 3]> = Vec::new();
        let mut raw_texcoords: Vec<[f32; 2]> = Vec::new();
        let mut slots: HashMap<(usize, Option<usize>), u32> = HashMap::new();

        let mut mesh = ObjMesh::default();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut cols = line.split_whitespace();
            match cols.next() {
                Some("v") => {
                    let mut p = [0.0f32; 3];
                    for (slot, col) in p.iter_mut().zip(&mut cols) {
                        *slot = col.parse().unwrap_or(0.0);
                    }
                    raw_positions.push(p);
                }
                Some("vt") => {
                    let mut t = [0.0f32; 2];
                    for (slot, col) in t.iter_mut().zip(&mut cols) {
                        *slot = col.parse().unwrap_or(0.0);
                    }
                    raw_texcoords.push(t);
                }
                Some("f") => {
                    let face: Vec<u32> = cols
                        .filter_map(|def| {
                            emit_face_vertex(
                                def,
                                &raw_positions,
                                &raw_texcoords,
                                &mut slots,
                                &mut mesh,
                            )
                        })
                        .collect();
                    // Fan-triangulate from the first face-vertex.
                    for i in 1..face.len().saturating_sub(1) {
                        mesh.triangles.push([face[0], face[i], face[i + 1]]);
                    }
                }
                // vn and anything else we have no use for.
                _ => {}
            }
        }

        mesh
    }
}

/// Resolve one `position[/texcoord]` face-vertex token to a vertex slot,
/// reusing the slot for a pair seen before. Returns `None` when the token
/// carries no resolvable position index.
fn emit_face_vertex(
    def: &str,
    raw_positions: &[[f32; 3]],
    raw_texcoords: &[[f32; 2]],
    slots: &mut HashMap<(usize, Option<usize>), u32>,
    mesh: &mut ObjMesh,
) -> Option<u32> {
    let mut pieces = def.split('/');
    let vindex = parse_index(pieces.next());
    let tindex = parse_index(pieces.next());

    let Some(vindex) = vindex else {
        log::debug!("dropping face-vertex '{}' with no position index", def);
        return None;
    };
    // Indices are 1-based in the file.
    let Some(position) = vindex.checked_sub(1).and_then(|i| raw_positions.get(i)) else {
        log::debug!("dropping face-vertex '{}' with unresolvable position", def);
        return None;
    };
    let texcoord = match tindex {
        Some(t) => match t.checked_sub(1).and_then(|i| raw_texcoords.get(i)) {
            Some(tc) => *tc,
            None => {
                log::debug!("dropping face-vertex '{}' with unresolvable texcoord", def);
                return None;
            }
        },
        None => [0.0, 0.0],
    };

    let slot = *slots.entry((vindex, tindex)).or_insert_with(|| {
        let i = mesh.vertices.len() as u32;
        mesh.vertices.push(*position);
        mesh.texcoords.push(texcoord);
        i
    });
    Some(slot)
}

/// An absent or empty piece is no index; a malformed one parses as zero,
/// which then fails position resolution like any other bad index.
fn parse_index(piece: Option<&str>) -> Option<usize> {
    let piece = piece?.trim();
    if piece.is_empty() {
        return None;
    }
    Some(piece.parse().unwrap_or(0))
}
