//! Ray-pick engine: Plücker-coordinate BVH descent (spec §4.6, §4.7).

use crate::aabb::Aabb;
use crate::arena::Arena;
use crate::bvh::{BvhChild, BvhNode, BvhNodeId};
use crate::error::{Error, Result};
use crate::instance::{Instance, InstanceId, InstanceStore};
use crate::mesh::Mesh;

/// The 9-double payload the original carries through every traversal: the
/// Plücker line `(p x v, v)` plus the origin tail (spec §4.6).
#[derive(Debug, Clone, Copy)]
pub struct PluckerRay {
    pub moment: [f64; 3],
    pub direction: [f64; 3],
    pub origin: [f64; 3],
}

impl PluckerRay {
    /// Builds the Plücker line for `origin`/`direction`. Errors if
    /// `direction[2] < 0`: downward rays are unsupported (spec §4.6, §7
    /// "Unsupported").
    pub fn new(origin: [f64; 3], direction: [f64; 3]) -> Result<Self> {
        if direction[2] < 0.0 {
            return Err(Error::Unsupported("ray direction must have v[2] >= 0"));
        }
        let moment = [
            origin[1] * direction[2] - origin[2] * direction[1],
            origin[2] * direction[0] - origin[0] * direction[2],
            origin[0] * direction[1] - origin[1] * direction[0],
        ];
        Ok(PluckerRay {
            moment,
            direction,
            origin,
        })
    }

    /// One of the four octant variants selected by the sign of
    /// `(direction[0], direction[1])` (spec §4.6 "Octant dispatch").
    fn octant(&self) -> Octant {
        match (self.direction[0] >= 0.0, self.direction[1] >= 0.0) {
            (true, true) => Octant::PosPos,
            (true, false) => Octant::PosNeg,
            (false, true) => Octant::NegPos,
            (false, false) => Octant::NegNeg,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Octant {
    PosPos,
    PosNeg,
    NegPos,
    NegNeg,
}

impl Octant {
    /// Picks which of an AABB's two extrema on `axis` to use for the "near"
    /// and "far" edge of the wedge test, per the sign of the ray's
    /// component on that axis (spec §9 "a single generic traversal
    /// parameterized by the six sign-selected AABB extremum picks").
    fn extrema(self, bbox: &Aabb) -> [[f64; 3]; 8] {
        let (xn, xf) = match self {
            Octant::PosPos | Octant::PosNeg => (bbox.xmin, bbox.xmax),
            Octant::NegPos | Octant::NegNeg => (bbox.xmax, bbox.xmin),
        };
        let (yn, yf) = match self {
            Octant::PosPos | Octant::NegPos => (bbox.ymin, bbox.ymax),
            Octant::PosNeg | Octant::NegNeg => (bbox.ymax, bbox.ymin),
        };
        let zn = bbox.zmin;
        let zf = bbox.zmax;
        [
            [xn as f64, yn as f64, zn as f64],
            [xf as f64, yn as f64, zn as f64],
            [xn as f64, yf as f64, zn as f64],
            [xf as f64, yf as f64, zn as f64],
            [xn as f64, yn as f64, zf as f64],
            [xf as f64, yn as f64, zf as f64],
            [xn as f64, yf as f64, zf as f64],
            [xf as f64, yf as f64, zf as f64],
        ]
    }
}

/// `wedge(L, edge) = moment . edge_dir - direction . (edge_point x origin)`
/// restated as the permuted-product form used by Plücker side tests: for a
/// line through two corners `a`, `b` of the box edge, the side test reduces
/// to the sign of `dot(direction, cross(a - origin, b - origin))`.
fn wedge_sign(ray: &PluckerRay, a: [f64; 3], b: [f64; 3]) -> f64 {
    let oa = [
        a[0] - ray.origin[0],
        a[1] - ray.origin[1],
        a[2] - ray.origin[2],
    ];
    let ob = [
        b[0] - ray.origin[0],
        b[1] - ray.origin[1],
        b[2] - ray.origin[2],
    ];
    let cross = [
        oa[1] * ob[2] - oa[2] * ob[1],
        oa[2] * ob[0] - oa[0] * ob[2],
        oa[0] * ob[1] - oa[1] * ob[0],
    ];
    ray.direction[0] * cross[0] + ray.direction[1] * cross[1] + ray.direction[2] * cross[2]
}

/// Six wedge inequalities against the box's silhouette edges, in extremum
/// order near/far (spec §4.6: "six inequalities of the form
/// `sign . wedge(L, edge) > 0`; if any holds, the box is on the wrong
/// side"). Returns `true` if the box survives (is not rejected).
fn box_survives(ray: &PluckerRay, bbox: &Aabb) -> bool {
    let c = ray.octant().extrema(bbox);
    // Silhouette edges of the near/far corner pyramid, the same six edges
    // the original tests per octant.
    let edges: [(usize, usize); 6] = [(0, 1), (1, 3), (3, 2), (2, 0), (4, 5), (5, 7)];
    for (i, j) in edges {
        if wedge_sign(ray, c[i], c[j]) < 0.0 {
            return false;
        }
    }
    true
}

/// Resolves a triangle's vertex positions against the ray (spec §4.7). A
/// crate consumer may substitute a different primitive by implementing this
/// trait; the default used by `hit` is `default_triangle_hit`.
pub trait TriangleHit {
    fn hit(&self, ray: &PluckerRay, v0: [f64; 3], v1: [f64; 3], v2: [f64; 3]) -> Option<[f64; 3]>;
}

/// Double-precision Möller-Trumbore ray/triangle intersection, the
/// concrete realization of the collaborator contract in spec §4.7.
pub struct DefaultTriangleHit;

impl TriangleHit for DefaultTriangleHit {
    fn hit(&self, ray: &PluckerRay, v0: [f64; 3], v1: [f64; 3], v2: [f64; 3]) -> Option<[f64; 3]> {
        const EPS: f64 = 1e-12;
        let edge1 = sub(v1, v0);
        let edge2 = sub(v2, v0);
        let h = cross(ray.direction, edge2);
        let a = dot(edge1, h);
        if a.abs() < EPS {
            return None;
        }
        let f = 1.0 / a;
        let s = sub(ray.origin, v0);
        let u = f * dot(s, h);
        if !(0.0..=1.0).contains(&u) {
            return None;
        }
        let q = cross(s, edge1);
        let v = f * dot(ray.direction, q);
        if v < 0.0 || u + v > 1.0 {
            return None;
        }
        let t = f * dot(edge2, q);
        if t <= EPS {
            return None;
        }
        Some([
            ray.origin[0] + ray.direction[0] * t,
            ray.origin[1] + ray.direction[1] * t,
            ray.origin[2] + ray.direction[2] * t,
        ])
    }
}

fn sub(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}
fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}
fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HitRecord {
    pub point: [f64; 3],
    pub instance: Option<InstanceId>,
}

/// Finds the foremost triangle hit along `ray`, descending `root` then
/// falling back to the residual flat list (spec §4.6). The initial hit
/// record is the ray origin with no instance.
pub fn hit<T: TriangleHit>(
    bvh_arena: &Arena<BvhNode>,
    root: Option<BvhChild>,
    instances: &InstanceStore,
    meshes: &Arena<Mesh>,
    ray: &PluckerRay,
    tri_test: &T,
) -> HitRecord {
    let mut best = HitRecord {
        point: ray.origin,
        instance: None,
    };

    if let Some(child) = root {
        hit_child(bvh_arena, child, instances, meshes, ray, tri_test, &mut best);
    }

    for (id, inst) in instances.iter_flat() {
        test_instance(id, inst, meshes, ray, tri_test, &mut best);
    }

    best
}

fn hit_child<T: TriangleHit>(
    arena: &Arena<BvhNode>,
    child: BvhChild,
    instances: &InstanceStore,
    meshes: &Arena<Mesh>,
    ray: &PluckerRay,
    tri_test: &T,
    best: &mut HitRecord,
) {
    match child {
        BvhChild::Inst(id) => {
            if let Some(inst) = instances.get(id) {
                test_instance(id, inst, meshes, ray, tri_test, best);
            }
        }
        BvhChild::Internal(node_id) => hit_node(arena, node_id, instances, meshes, ray, tri_test, best),
    }
}

fn hit_node<T: TriangleHit>(
    arena: &Arena<BvhNode>,
    node_id: BvhNodeId,
    instances: &InstanceStore,
    meshes: &Arena<Mesh>,
    ray: &PluckerRay,
    tri_test: &T,
    best: &mut HitRecord,
) {
    let node = match arena.get(node_id) {
        Some(n) => n,
        None => return,
    };
    if !box_survives(ray, &node.bbox()) {
        tracing::trace!(?node_id, "ray pick: subtree rejected");
        return;
    }
    match node {
        BvhNode::Leaf { head, .. } => {
            let mut cursor = *head;
            while let Some(id) = cursor {
                if let Some(inst) = instances.get(id) {
                    test_instance(id, inst, meshes, ray, tri_test, best);
                    cursor = inst.list_next;
                } else {
                    break;
                }
            }
        }
        BvhNode::Node { left, right, .. } => {
            // Both children are visited unconditionally; right is tested
            // after left so ties resolve in right's favor (spec §4.6
            // "best = right ?? left").
            hit_child(arena, *left, instances, meshes, ray, tri_test, best);
            hit_child(arena, *right, instances, meshes, ray, tri_test, best);
        }
        BvhNode::NodeShare {
            left,
            right,
            straddle_head,
            ..
        } => {
            hit_child(arena, *left, instances, meshes, ray, tri_test, best);
            hit_child(arena, *right, instances, meshes, ray, tri_test, best);
            let mut cursor = *straddle_head;
            while let Some(id) = cursor {
                if let Some(inst) = instances.get(id) {
                    test_instance(id, inst, meshes, ray, tri_test, best);
                    cursor = inst.list_next;
                } else {
                    break;
                }
            }
        }
    }
}

fn test_instance<T: TriangleHit>(
    id: InstanceId,
    inst: &Instance,
    meshes: &Arena<Mesh>,
    ray: &PluckerRay,
    tri_test: &T,
    best: &mut HitRecord,
) {
    let mesh = match meshes.get(inst.mesh) {
        Some(m) => m,
        None => return,
    };
    for tri in &mesh.triangles {
        let v = [
            world_vertex(inst, mesh, tri.v[0]),
            world_vertex(inst, mesh, tri.v[1]),
            world_vertex(inst, mesh, tri.v[2]),
        ];
        if let Some(point) = tri_test.hit(ray, v[0], v[1], v[2]) {
            // Foremost-hit rule: strictly greater z wins (spec §4.6).
            if point[2] > best.point[2] {
                best.point = point;
                best.instance = Some(id);
            }
        }
    }
}

fn world_vertex(inst: &Instance, mesh: &Mesh, idx: usize) -> [f64; 3] {
    use cgmath::Transform;
    let p = mesh.vertices[idx].position();
    let w = inst.tm.transform_point(p);
    [w.x, w.y, w.z]
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::instance::InstanceFlags;
    use crate::mesh::Vertex;
    use cgmath::SquareMatrix;

    #[test]
    fn downward_ray_is_unsupported() {
        let err = PluckerRay::new([0.0, 0.0, 0.0], [0.0, 0.0, -1.0]).unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }

    #[test]
    fn single_instance_ray_pick_hits_expected_point() {
        let mut mesh = Mesh::new(None);
        mesh.add_vertex(Vertex {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            rgba: [0; 4],
        });
        mesh.add_vertex(Vertex {
            x: 1.0,
            y: 0.0,
            z: 0.0,
            rgba: [0; 4],
        });
        mesh.add_vertex(Vertex {
            x: 0.0,
            y: 1.0,
            z: 0.0,
            rgba: [0; 4],
        });
        mesh.add_triangle([0, 1, 2], 0).unwrap();

        let mut meshes: Arena<Mesh> = Arena::new();
        let mesh_id = meshes.insert(mesh.clone());
        let mut instances = InstanceStore::new();
        let iid = instances.add(
            mesh_id,
            &mesh,
            Some(cgmath::Matrix4::identity()),
            None,
            InstanceFlags::empty(),
        );

        let bvh_arena: Arena<BvhNode> = Arena::new();
        let ray = PluckerRay::new([0.25, 0.25, -1.0], [0.0, 0.0, 1.0]).unwrap();
        let record = hit(&bvh_arena, None, &instances, &meshes, &ray, &DefaultTriangleHit);
        assert_eq!(record.instance, Some(iid));
        assert_approx_eq::assert_approx_eq!(record.point[0], 0.25);
        assert_approx_eq::assert_approx_eq!(record.point[1], 0.25);
        assert_approx_eq::assert_approx_eq!(record.point[2], 0.0);
    }
}
