//! ASCII PLY 1.0 mesh loader (spec §6 "Mesh payload").
//!
//! Hand-rolled line scanner matching the original grammar exactly: no
//! parser-combinator crate, since the source this was distilled from
//! (`Mesh::Update`) hand-rolls it too.

use crate::error::{Error, Result};
use crate::mesh::{Mesh, Vertex};

enum VertexLayout {
    XyzOnly,
    XyzRgba,
}

/// Parses `text` as ASCII PLY 1.0 and populates `mesh` with vertices and
/// triangles. On any grammar violation, `mesh` is left untouched up to the
/// point of failure and `Err(Error::MalformedMesh)` is returned -- callers
/// are expected to discard the mesh on error (spec §7 "the partially built
/// mesh is discarded").
pub fn load(mesh: &mut Mesh, text: &str) -> Result<()> {
    let mut lines = text.lines().map(str::trim_end);

    let line = next_nonblank(&mut lines).ok_or_else(eof)?;
    if line != "ply" {
        return Err(malformed("expected 'ply' magic"));
    }

    let line = next_nonblank(&mut lines).ok_or_else(eof)?;
    if line != "format ascii 1.0" {
        return Err(malformed("expected 'format ascii 1.0'"));
    }

    let mut num_verts: Option<usize> = None;
    let mut num_faces: Option<usize> = None;
    let mut vert_props = 0usize;
    let mut face_props = false;
    let mut element = Element::None;

    loop {
        let line = next_nonblank(&mut lines).ok_or_else(eof)?;
        if is_comment(line) {
            continue;
        }
        if let Some(rest) = line.strip_prefix("element vertex ") {
            if num_verts.is_some() {
                return Err(malformed("duplicate 'element vertex'"));
            }
            num_verts = Some(rest.trim().parse().map_err(|_| malformed("bad vertex count"))?);
            element = Element::Vertex;
            continue;
        }
        if let Some(rest) = line.strip_prefix("element face ") {
            if num_faces.is_some() {
                return Err(malformed("duplicate 'element face'"));
            }
            num_faces = Some(rest.trim().parse().map_err(|_| malformed("bad face count"))?);
            element = Element::Face;
            continue;
        }
        if let Some(rest) = line.strip_prefix("property ") {
            match element {
                Element::Face => {
                    if rest != "list uchar uint vertex_indices" {
                        return Err(malformed("unsupported face property"));
                    }
                    face_props = true;
                }
                Element::Vertex => {
                    const MATCH: [&str; 7] = [
                        "property float x",
                        "property float y",
                        "property float z",
                        "property uchar red",
                        "property uchar green",
                        "property uchar blue",
                        "property uchar alpha",
                    ];
                    if vert_props >= MATCH.len() || line != MATCH[vert_props] {
                        return Err(malformed("unexpected vertex property order"));
                    }
                    vert_props += 1;
                }
                Element::None => return Err(malformed("property before any element")),
            }
            continue;
        }
        if line == "end_header" {
            break;
        }
        return Err(malformed("unrecognized header line"));
    }

    let num_verts = num_verts.ok_or_else(|| malformed("missing 'element vertex'"))?;
    let num_faces = num_faces.ok_or_else(|| malformed("missing 'element face'"))?;
    if num_verts == 0 || num_faces == 0 || !face_props {
        return Err(malformed("zero counts or missing face property"));
    }
    let layout = match vert_props {
        3 => VertexLayout::XyzOnly,
        7 => VertexLayout::XyzRgba,
        _ => return Err(malformed("unsupported vertex property count")),
    };

    let mut local_to_mesh = Vec::with_capacity(num_verts);
    let mut read = 0;
    while read < num_verts {
        let line = match next_nonblank(&mut lines) {
            Some(l) => l,
            None => return Err(malformed("truncated vertex list")),
        };
        if is_comment(line) {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        let (x, y, z, rgba) = match layout {
            VertexLayout::XyzOnly => {
                if fields.len() != 3 {
                    return Err(malformed("expected 3 vertex fields"));
                }
                (parse_f64(fields[0])?, parse_f64(fields[1])?, parse_f64(fields[2])?, [255, 255, 255, 255])
            }
            VertexLayout::XyzRgba => {
                if fields.len() != 7 {
                    return Err(malformed("expected 7 vertex fields"));
                }
                (
                    parse_f64(fields[0])?,
                    parse_f64(fields[1])?,
                    parse_f64(fields[2])?,
                    [
                        parse_u8(fields[3])?,
                        parse_u8(fields[4])?,
                        parse_u8(fields[5])?,
                        parse_u8(fields[6])?,
                    ],
                )
            }
        };
        let idx = mesh.add_vertex(Vertex { x, y, z, rgba });
        local_to_mesh.push(idx);
        read += 1;
    }

    let mut read = 0;
    while read < num_faces {
        let line = match next_nonblank(&mut lines) {
            Some(l) => l,
            None => return Err(malformed("truncated face list")),
        };
        if is_comment(line) {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 4 {
            return Err(malformed("expected 'n a b c' face line"));
        }
        let n: usize = fields[0].parse().map_err(|_| malformed("bad face count"))?;
        if n != 3 {
            return Err(malformed("only triangular faces are accepted"));
        }
        let a: usize = fields[1].parse().map_err(|_| malformed("bad face index"))?;
        let b: usize = fields[2].parse().map_err(|_| malformed("bad face index"))?;
        let c: usize = fields[3].parse().map_err(|_| malformed("bad face index"))?;
        if a >= local_to_mesh.len() || b >= local_to_mesh.len() || c >= local_to_mesh.len() {
            return Err(malformed("face index out of range"));
        }
        mesh.add_triangle([local_to_mesh[a], local_to_mesh[b], local_to_mesh[c]], 0)?;
        read += 1;
    }

    // Trailing non-comment content is rejected (spec §6).
    for line in lines {
        let line = line.trim();
        if line.is_empty() || is_comment(line) {
            continue;
        }
        return Err(malformed("trailing content after face list"));
    }

    Ok(())
}

enum Element {
    None,
    Vertex,
    Face,
}

fn next_nonblank<'a, I: Iterator<Item = &'a str>>(lines: &mut I) -> Option<&'a str> {
    for line in lines.by_ref() {
        let line = line.trim();
        if !line.is_empty() {
            return Some(line);
        }
    }
    None
}

fn is_comment(line: &str) -> bool {
    line == "comment" || line.starts_with("comment ") || line.starts_with("comment\t")
}

fn parse_f64(s: &str) -> Result<f64> {
    s.parse().map_err(|_| malformed("bad float field"))
}

fn parse_u8(s: &str) -> Result<u8> {
    s.parse::<i32>()
        .ok()
        .filter(|v| (0..=255).contains(v))
        .map(|v| v as u8)
        .ok_or_else(|| malformed("bad color field"))
}

fn malformed(msg: &str) -> Error {
    Error::MalformedMesh(msg.to_string())
}

fn eof() -> Error {
    malformed("unexpected end of file")
}

#[cfg(test)]
mod test {
    use super::*;

    const TRIANGLE_PLY: &str = "ply\nformat ascii 1.0\nelement vertex 3\nproperty float x\nproperty float y\nproperty float z\nelement face 1\nproperty list uchar uint vertex_indices\nend_header\n0 0 0\n1 0 0\n0 1 0\n3 0 1 2\n";

    #[test]
    fn loads_minimal_triangle() {
        let mut mesh = Mesh::new(None);
        load(&mut mesh, TRIANGLE_PLY).unwrap();
        assert_eq!(mesh.vertices.len(), 3);
        assert_eq!(mesh.triangles.len(), 1);
        assert_eq!(mesh.triangles[0].v, [0, 1, 2]);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut mesh = Mesh::new(None);
        let err = load(&mut mesh, "plyx\nformat ascii 1.0\n").unwrap_err();
        assert!(matches!(err, Error::MalformedMesh(_)));
    }

    #[test]
    fn rejects_degenerate_face() {
        let text = TRIANGLE_PLY.replace("3 0 1 2", "3 0 0 1");
        let mut mesh = Mesh::new(None);
        let err = load(&mut mesh, &text).unwrap_err();
        assert!(matches!(err, Error::MalformedMesh(_)));
    }

    #[test]
    fn rejects_out_of_range_index() {
        let text = TRIANGLE_PLY.replace("3 0 1 2", "3 0 1 9");
        let mut mesh = Mesh::new(None);
        let err = load(&mut mesh, &text).unwrap_err();
        assert!(matches!(err, Error::MalformedMesh(_)));
    }

    #[test]
    fn rejects_trailing_content() {
        let text = format!("{}garbage\n", TRIANGLE_PLY);
        let mut mesh = Mesh::new(None);
        let err = load(&mut mesh, &text).unwrap_err();
        assert!(matches!(err, Error::MalformedMesh(_)));
    }

    #[test]
    fn loads_rgba_vertices() {
        let text = "ply\nformat ascii 1.0\nelement vertex 3\nproperty float x\nproperty float y\nproperty float z\nproperty uchar red\nproperty uchar green\nproperty uchar blue\nproperty uchar alpha\nelement face 1\nproperty list uchar uint vertex_indices\nend_header\n0 0 0 255 0 0 255\n1 0 0 0 255 0 255\n0 1 0 0 0 255 255\n3 0 1 2\n";
        let mut mesh = Mesh::new(None);
        load(&mut mesh, text).unwrap();
        assert_eq!(mesh.vertices[0].rgba, [255, 0, 0, 255]);
    }
}
