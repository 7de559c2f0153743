//! Mesh store: owns vertices, triangles, and line segments (spec §3, §4.1).

use crate::aabb::Aabb;
use crate::arena::{Arena, Index};
use crate::error::{Error, Result};
use cgmath::Point3;

pub type MeshId = Index<Mesh>;
/// Triangle indices are plain `usize` offsets into `Mesh::triangles`, not
/// arena handles -- triangles never outlive their mesh and are never
/// individually deleted, only appended during load (spec §4.1: meshes free
/// "all triangles, lines, and vertices in insertion order" as a unit).
pub type TriangleId = usize;
pub type SegmentId = usize;

/// `(x,y,z,w=1)` position plus RGBA (spec §3, "Each vertex carries...").
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub rgba: [u8; 4],
}

impl Vertex {
    pub fn position(&self) -> Point3<f64> {
        Point3::new(self.x, self.y, self.z)
    }
}

/// Three vertex indices into the owning mesh, plus the pass-through `visual`
/// field (spec §9 open questions: never interpreted by this crate).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Triangle {
    pub v: [usize; 3],
    pub visual: u32,
}

/// Two vertex indices, analogous to `Triangle` but for a line segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub v: [usize; 2],
    pub visual: u32,
}

/// A mesh: an ordered vertex/triangle/line-segment buffer plus the
/// per-vertex share lists that back invariant checks (spec §3), and the
/// untransformed AABB maintained incrementally as vertices are added.
#[derive(Debug, Clone, Default)]
pub struct Mesh {
    pub name: Option<String>,
    pub vertices: Vec<Vertex>,
    pub triangles: Vec<Triangle>,
    pub segments: Vec<Segment>,
    /// Per-vertex list of triangles referencing it, built as triangles are
    /// added (the arena-idiomatic restatement of the per-corner intrusive
    /// next pointers, spec §3).
    pub vertex_triangles: Vec<Vec<usize>>,
    /// Per-vertex list of segments referencing it.
    pub vertex_segments: Vec<Vec<usize>>,
    /// Untransformed AABB, extended as vertices are added; `None` until the
    /// first vertex lands.
    pub bbox: Option<Aabb>,
    /// Instances currently on this mesh's share list (spec §3 "a mesh heads
    /// a share list of all instances using it").
    pub share_list: Vec<crate::instance::InstanceId>,
    /// Opaque caller-attached token, present in the original but not
    /// mentioned by the distilled spec (`original_source/mesh.cpp`
    /// `Mesh::cookie`); harmless ambient bookkeeping.
    pub cookie: Option<u64>,
}

impl Mesh {
    pub fn new(name: Option<String>) -> Self {
        Mesh {
            name,
            ..Default::default()
        }
    }

    pub fn cookie(&self) -> Option<u64> {
        self.cookie
    }

    pub fn set_cookie(&mut self, cookie: Option<u64>) {
        self.cookie = cookie;
    }

    /// Appends a vertex and extends the untransformed AABB (spec §4.1).
    pub fn add_vertex(&mut self, v: Vertex) -> usize {
        let idx = self.vertices.len();
        let p = Point3::new(v.x as f32, v.y as f32, v.z as f32);
        self.bbox = Some(match self.bbox {
            Some(b) => {
                let mut b = b;
                b.extend(p);
                b
            }
            None => Aabb::from_point(p),
        });
        self.vertices.push(v);
        self.vertex_triangles.push(Vec::new());
        self.vertex_segments.push(Vec::new());
        idx
    }

    /// Adds a triangle referencing three vertex indices, threading it onto
    /// each corner's share list. Rejects out-of-range or degenerate
    /// (repeated-vertex) triangles, matching spec §6's PLY loader contract.
    pub fn add_triangle(&mut self, v: [usize; 3], visual: u32) -> Result<TriangleId> {
        if v[0] == v[1] || v[1] == v[2] || v[0] == v[2] {
            return Err(Error::MalformedMesh("degenerate triangle".into()));
        }
        for &i in &v {
            if i >= self.vertices.len() {
                return Err(Error::MalformedMesh("triangle vertex index out of range".into()));
            }
        }
        let idx = self.triangles.len();
        self.triangles.push(Triangle { v, visual });
        for &i in &v {
            self.vertex_triangles[i].push(idx);
        }
        Ok(idx)
    }

    /// Adds a line segment, analogous to `add_triangle`.
    pub fn add_segment(&mut self, v: [usize; 2], visual: u32) -> Result<SegmentId> {
        if v[0] == v[1] {
            return Err(Error::MalformedMesh("degenerate segment".into()));
        }
        for &i in &v {
            if i >= self.vertices.len() {
                return Err(Error::MalformedMesh("segment vertex index out of range".into()));
            }
        }
        let idx = self.segments.len();
        self.segments.push(Segment { v, visual });
        for &i in &v {
            self.vertex_segments[i].push(idx);
        }
        Ok(idx)
    }

    /// Enumerates triangles with resolved vertex positions and colors (spec
    /// §6 "Mesh triangle enumeration callback").
    pub fn enumerate_triangles<F: FnMut(&Triangle, [Point3<f64>; 3], [[u8; 4]; 3])>(
        &self,
        mut cb: F,
    ) {
        for tri in &self.triangles {
            let positions = [
                self.vertices[tri.v[0]].position(),
                self.vertices[tri.v[1]].position(),
                self.vertices[tri.v[2]].position(),
            ];
            let colors = [
                self.vertices[tri.v[0]].rgba,
                self.vertices[tri.v[1]].rgba,
                self.vertices[tri.v[2]].rgba,
            ];
            cb(tri, positions, colors);
        }
    }
}

/// Owns every live mesh. Deleting a mesh cascades to every instance on its
/// share list (spec §4.1) -- that cascade lives on `World` since it needs
/// the instance store too; `MeshStore` only owns the arena.
#[derive(Default)]
pub struct MeshStore {
    pub arena: Arena<Mesh>,
}

impl MeshStore {
    pub fn new() -> Self {
        MeshStore { arena: Arena::new() }
    }

    pub fn add(&mut self, name: Option<String>) -> MeshId {
        self.arena.insert(Mesh::new(name))
    }

    pub fn get(&self, id: MeshId) -> Option<&Mesh> {
        self.arena.get(id)
    }

    pub fn get_mut(&mut self, id: MeshId) -> Option<&mut Mesh> {
        self.arena.get_mut(id)
    }

    pub fn remove(&mut self, id: MeshId) -> Option<Mesh> {
        self.arena.remove(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (MeshId, &Mesh)> {
        self.arena.iter()
    }

    /// Spec §4.1 "query-name".
    pub fn find_by_name(&self, name: &str) -> Option<MeshId> {
        self.arena
            .iter()
            .find(|(_, m)| m.name.as_deref() == Some(name))
            .map(|(id, _)| id)
    }

    /// Spec §4.1 "query-bbox".
    pub fn bbox(&self, id: MeshId) -> Option<Aabb> {
        self.arena.get(id).and_then(|m| m.bbox)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn triangle_mesh() -> Mesh {
        let mut m = Mesh::new(Some("tri".into()));
        m.add_vertex(Vertex {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            rgba: [255, 0, 0, 255],
        });
        m.add_vertex(Vertex {
            x: 1.0,
            y: 0.0,
            z: 0.0,
            rgba: [0, 255, 0, 255],
        });
        m.add_vertex(Vertex {
            x: 0.0,
            y: 1.0,
            z: 0.0,
            rgba: [0, 0, 255, 255],
        });
        m.add_triangle([0, 1, 2], 0).unwrap();
        m
    }

    #[test]
    fn bbox_extends_with_each_vertex() {
        let m = triangle_mesh();
        let b = m.bbox.unwrap();
        assert_eq!(b.xmin, 0.0);
        assert_eq!(b.xmax, 1.0);
        assert_eq!(b.ymax, 1.0);
        assert_eq!(b.zmin, 0.0);
        assert_eq!(b.zmax, 0.0);
    }

    #[test]
    fn degenerate_triangle_rejected() {
        let mut m = triangle_mesh();
        let err = m.add_triangle([0, 0, 1], 0).unwrap_err();
        assert!(matches!(err, Error::MalformedMesh(_)));
    }

    #[test]
    fn out_of_range_triangle_rejected() {
        let mut m = triangle_mesh();
        let err = m.add_triangle([0, 1, 99], 0).unwrap_err();
        assert!(matches!(err, Error::MalformedMesh(_)));
    }

    #[test]
    fn vertex_share_lists_populated() {
        let m = triangle_mesh();
        assert_eq!(m.vertex_triangles[0], vec![0]);
        assert_eq!(m.vertex_triangles[1], vec![0]);
        assert_eq!(m.vertex_triangles[2], vec![0]);
    }

    #[test]
    fn enumerate_triangles_resolves_positions_and_colors() {
        let m = triangle_mesh();
        let mut seen = 0;
        m.enumerate_triangles(|_tri, positions, colors| {
            assert_eq!(positions[0], Point3::new(0.0, 0.0, 0.0));
            assert_eq!(colors[1], [0, 255, 0, 255]);
            seen += 1;
        });
        assert_eq!(seen, 1);
    }

    #[test]
    fn mesh_store_find_by_name() {
        let mut store = MeshStore::new();
        let id = store.add(Some("foo".into()));
        assert_eq!(store.find_by_name("foo"), Some(id));
        assert_eq!(store.find_by_name("bar"), None);
    }
}
