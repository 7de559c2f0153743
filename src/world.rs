//! `World`: ties the mesh store, instance store, and BVH together (spec §3
//! "World", §5 "Lifetimes").

use crate::aabb::Aabb;
use crate::arena::Arena;
use crate::bvh::{self, BvhChild, BvhNode, BvhNodeId, SceneConfig};
use crate::error::{Error, Result};
use crate::hull::{self, QueryStats};
use crate::instance::{Instance, InstanceFlags, InstanceId, InstanceStore, Membership};
use crate::mesh::{Mesh, MeshId};
use crate::ply;
use crate::raycast::{self, DefaultTriangleHit, HitRecord, PluckerRay, TriangleHit};
use crate::snapshot::{self, InstanceRecord};
use cgmath::Matrix4;
use std::io::{Read, Write};

/// The top-level scene database (spec §2 "World").
#[derive(Default)]
pub struct World {
    meshes: Arena<Mesh>,
    instances: InstanceStore,
    bvh_arena: Arena<BvhNode>,
    bvh_root: Option<BvhChild>,
}

impl World {
    pub fn new() -> Self {
        World {
            meshes: Arena::new(),
            instances: InstanceStore::new(),
            bvh_arena: Arena::new(),
            bvh_root: None,
        }
    }

    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    pub fn instance_count(&self) -> usize {
        self.instances.arena.len()
    }

    // ---- Mesh CRUD (spec §4.1) ----

    pub fn add_mesh(&mut self, name: Option<String>) -> MeshId {
        self.meshes.insert(Mesh::new(name))
    }

    pub fn mesh(&self, id: MeshId) -> Option<&Mesh> {
        self.meshes.get(id)
    }

    pub fn find_mesh_by_name(&self, name: &str) -> Option<MeshId> {
        self.meshes
            .iter()
            .find(|(_, m)| m.name.as_deref() == Some(name))
            .map(|(id, _)| id)
    }

    /// Loads a PLY payload into an existing (normally freshly-created,
    /// empty) mesh (spec §6 "Mesh payload").
    pub fn load_mesh_ply(&mut self, id: MeshId, text: &str) -> Result<()> {
        let mesh = self
            .meshes
            .get_mut(id)
            .ok_or(Error::InvalidArgument("mesh not found in this world"))?;
        if let Err(e) = ply::load(mesh, text) {
            self.delete_mesh(id);
            return Err(e);
        }
        Ok(())
    }

    /// Deletes a mesh. Cascades to every instance on its share list (spec
    /// §4.1): each such instance is first removed from wherever it
    /// currently lives (flat list or BVH), then from the arena.
    pub fn delete_mesh(&mut self, id: MeshId) -> bool {
        let share_list = match self.meshes.get(id) {
            Some(m) => m.share_list.clone(),
            None => return false,
        };
        for inst_id in share_list {
            self.delete_instance(inst_id);
        }
        self.meshes.remove(id).is_some()
    }

    // ---- Instance CRUD (spec §4.2) ----

    pub fn add_instance(
        &mut self,
        mesh_id: MeshId,
        tm: Option<Matrix4<f64>>,
        name: Option<String>,
        flags: InstanceFlags,
    ) -> Result<InstanceId> {
        let mesh = self
            .meshes
            .get(mesh_id)
            .ok_or(Error::InvalidArgument("mesh not found in this world"))?;
        let id = self.instances.add(mesh_id, mesh, tm, name, flags);
        if let Some(m) = self.meshes.get_mut(mesh_id) {
            m.share_list.push(id);
        }
        Ok(id)
    }

    pub fn instance(&self, id: InstanceId) -> Option<&Instance> {
        self.instances.get(id)
    }

    /// Deletes an instance: splices it out of its mesh's share list, then
    /// out of whichever list it currently occupies (spec §4.2).
    pub fn delete_instance(&mut self, id: InstanceId) -> bool {
        let (mesh_id, membership) = match self.instances.get(id) {
            Some(inst) => (inst.mesh, inst.membership),
            None => return false,
        };

        if let Some(mesh) = self.meshes.get_mut(mesh_id) {
            mesh.share_list.retain(|&i| i != id);
        }

        match membership {
            Membership::FlatList => self.instances.unlink_flat(id),
            Membership::BvhNode(node_id) => self.unlink_from_bvh(id, node_id),
            // `id` is itself a `Node`/`NodeShare` child slot, not reachable
            // through any list. There is no "empty child" representation to
            // write back, so the stale `InstanceId` is left in the slot;
            // the arena's generation counter invalidates later lookups of
            // it (see `unlink_from_bvh`'s doc comment).
            Membership::BvhChild(_) => {}
            Membership::BvhRoot => self.bvh_root = None,
        }

        self.instances.remove(id);
        true
    }

    /// Splices `id` out of `node_id`'s leaf or straddle list (spec §4.2,
    /// `parent.type == Leaf`/`NodeShare` cases; `Membership::BvhNode`).
    /// The `Membership::BvhChild` case -- `id` occupies a `Node`/
    /// `NodeShare` child slot directly (`BvhChild::Inst`, not via a list)
    /// -- is handled by the caller without going through here: there is no
    /// "empty child" representation to write back, so the stale
    /// `InstanceId` is left in the slot. The arena's generation counter
    /// means any later lookup of that slot naturally misses (`Arena::get`
    /// returns `None`), so the dangling reference is inert, matching spec
    /// §4.2's allowance to leave emptied parents dangling until the next
    /// `rebuild`.
    fn unlink_from_bvh(&mut self, id: InstanceId, node_id: BvhNodeId) {
        let (prev, next) = match self.instances.get(id) {
            Some(inst) => (inst.list_prev, inst.list_next),
            None => return,
        };
        match prev {
            Some(p) => {
                if let Some(pi) = self.instances.get_mut(p) {
                    pi.list_next = next;
                }
            }
            None => {
                if let Some(node) = self.bvh_arena.get_mut(node_id) {
                    match node {
                        BvhNode::Leaf { head, .. } if *head == Some(id) => *head = next,
                        BvhNode::NodeShare { straddle_head, .. } if *straddle_head == Some(id) => {
                            *straddle_head = next
                        }
                        _ => {}
                    }
                }
            }
        }
        match next {
            Some(n) => {
                if let Some(ni) = self.instances.get_mut(n) {
                    ni.list_prev = prev;
                }
            }
            None => {
                if let Some(node) = self.bvh_arena.get_mut(node_id) {
                    match node {
                        BvhNode::Leaf { tail, .. } if *tail == Some(id) => *tail = prev,
                        BvhNode::NodeShare { straddle_tail, .. } if *straddle_tail == Some(id) => {
                            *straddle_tail = prev
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    // ---- Rebuild (spec §4.4) ----

    /// Rebuilds the BVH from every live, tree-eligible instance. If
    /// `refresh_boxes` is set, each eligible instance's world AABB is
    /// recomputed first (spec §4.4 "Preprocessing step").
    pub fn rebuild(&mut self, refresh_boxes: bool, config: &SceneConfig) {
        // Tear down the old tree first: return every tree-held instance to
        // the flat list (spec §5 "Lifetimes").
        self.teardown_bvh();

        let mut eligible = Vec::new();
        let candidates: Vec<InstanceId> = self.instances.iter_flat().map(|(id, _)| id).collect();
        for id in candidates {
            let (use_tree, mesh_id) = match self.instances.get(id) {
                Some(inst) => (inst.use_tree(), inst.mesh),
                None => continue,
            };
            if !use_tree {
                continue;
            }
            if refresh_boxes {
                if let Some(mesh) = self.meshes.get(mesh_id) {
                    self.instances.refresh_bbox(id, mesh);
                }
            }
            self.instances.unlink_flat(id);
            let bbox = self
                .instances
                .get(id)
                .and_then(|i| i.bbox)
                .unwrap_or(Aabb::EMPTY);
            eligible.push((id, bbox));
        }

        if eligible.is_empty() {
            self.bvh_root = None;
            return;
        }

        let result = bvh::rebuild(&mut self.bvh_arena, &eligible, config);
        for link in &result.leaf_links {
            if let Some(inst) = self.instances.get_mut(link.instance) {
                inst.list_prev = link.prev;
                inst.list_next = link.next;
                inst.membership = bvh::leaf_membership(link.node);
            }
        }
        for (inst_id, parent_id) in &result.direct_children {
            if let Some(inst) = self.instances.get_mut(*inst_id) {
                inst.membership = Membership::BvhChild(*parent_id);
                inst.list_prev = None;
                inst.list_next = None;
            }
        }
        if let BvhChild::Inst(id) = result.root {
            if let Some(inst) = self.instances.get_mut(id) {
                inst.membership = Membership::BvhRoot;
                inst.list_prev = None;
                inst.list_next = None;
            }
        }
        self.bvh_root = Some(result.root);
    }

    fn teardown_bvh(&mut self) {
        if self.bvh_root.is_none() && self.bvh_arena.is_empty() {
            return;
        }
        let ids: Vec<InstanceId> = self
            .instances
            .arena
            .iter()
            .filter(|(_, inst)| !matches!(inst.membership, Membership::FlatList))
            .map(|(id, _)| id)
            .collect();
        for id in ids {
            if let Some(inst) = self.instances.get_mut(id) {
                inst.membership = Membership::FlatList;
            }
            self.instances.relink_flat(id);
        }
        self.bvh_arena = Arena::new();
        self.bvh_root = None;
    }

    // ---- Queries (spec §4.5, §4.6) ----

    /// Hull/frustum query (spec §4.5). `cb` is invoked once per surviving
    /// instance with its mesh id and transform.
    pub fn query<F: FnMut(MeshId, &Matrix4<f64>)>(&self, planes: &[[f64; 4]], mut cb: F) -> QueryStats {
        hull::query(&self.bvh_arena, self.bvh_root, &self.instances, &self.meshes, planes, |mesh_id, inst| {
            cb(mesh_id, &inst.tm)
        })
    }

    /// BVH introspection callback (spec §6 "BVH introspection callback"):
    /// invoked once per visited internal node with its depth and bbox.
    pub fn query_bsp<F: FnMut(u32, &Aabb)>(&self, mut cb: F) {
        fn walk<F: FnMut(u32, &Aabb)>(arena: &Arena<BvhNode>, child: BvhChild, level: u32, cb: &mut F) {
            match child {
                BvhChild::Inst(_) => {}
                BvhChild::Internal(id) => {
                    if let Some(node) = arena.get(id) {
                        cb(level, &node.bbox());
                        match node {
                            BvhNode::Leaf { .. } => {}
                            BvhNode::Node { left, right, .. } => {
                                walk(arena, *left, level + 1, cb);
                                walk(arena, *right, level + 1, cb);
                            }
                            BvhNode::NodeShare { left, right, .. } => {
                                walk(arena, *left, level + 1, cb);
                                walk(arena, *right, level + 1, cb);
                            }
                        }
                    }
                }
            }
        }
        if let Some(root) = self.bvh_root {
            walk(&self.bvh_arena, root, 0, &mut cb);
        }
    }

    /// Ray pick (spec §4.6). Returns an error for `v[2] < 0` rather than
    /// asserting, so a caller can recover (spec §7 also allows the
    /// programmer-error assertion; the typed error is the release-mode
    /// equivalent).
    pub fn hit(&self, origin: [f64; 3], direction: [f64; 3]) -> Result<HitRecord> {
        self.hit_with(origin, direction, &DefaultTriangleHit)
    }

    pub fn hit_with<T: TriangleHit>(&self, origin: [f64; 3], direction: [f64; 3], tri_test: &T) -> Result<HitRecord> {
        let ray = PluckerRay::new(origin, direction)?;
        Ok(raycast::hit(&self.bvh_arena, self.bvh_root, &self.instances, &self.meshes, &ray, tri_test))
    }

    // ---- Snapshot (spec §6 "World snapshot format") ----

    pub fn save<W: Write>(&self, w: &mut W) -> Result<()> {
        let mut records = Vec::new();
        for (_, inst) in self.instances.arena.iter() {
            let mesh_name = self
                .meshes
                .get(inst.mesh)
                .and_then(|m| m.name.clone())
                .unwrap_or_default();
            records.push(InstanceRecord::from_matrix(
                mesh_name,
                inst.name.clone().unwrap_or_default(),
                &inst.tm,
                inst.flags,
            ));
        }
        snapshot::write_snapshot(w, &records)
    }

    /// Loads a snapshot into a fresh world. For each record, looks up a
    /// mesh by name or creates an empty placeholder (spec §6 "On load").
    /// The BVH is not restored; the caller must call `rebuild`.
    pub fn load<R: Read>(r: &mut R) -> Result<World> {
        let records = snapshot::read_snapshot(r)?;
        let mut world = World::new();
        for rec in records {
            let mesh_id = match world.find_mesh_by_name(&rec.mesh_id) {
                Some(id) => id,
                None => world.add_mesh(Some(rec.mesh_id.clone())),
            };
            let flags = InstanceFlags::from_bits_truncate(rec.flags as u32);
            let name = if rec.inst_name.is_empty() {
                None
            } else {
                Some(rec.inst_name.clone())
            };
            world.add_instance(mesh_id, Some(rec.tm_matrix()), name, flags)?;
        }
        Ok(world)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mesh::Vertex;

    fn triangle_ply() -> &'static str {
        "ply\nformat ascii 1.0\nelement vertex 3\nproperty float x\nproperty float y\nproperty float z\nelement face 1\nproperty list uchar uint vertex_indices\nend_header\n0 0 0\n1 0 0\n0 1 0\n3 0 1 2\n"
    }

    #[test]
    fn empty_world_hull_query_invokes_callback_zero_times() {
        let world = World::new();
        let mut count = 0;
        world.query(&[], |_, _| count += 1);
        assert_eq!(count, 0);
    }

    #[test]
    fn single_instance_ray_pick() {
        let mut world = World::new();
        let mesh_id = world.add_mesh(None);
        world.load_mesh_ply(mesh_id, triangle_ply()).unwrap();
        let inst_id = world
            .add_instance(mesh_id, None, None, InstanceFlags::empty())
            .unwrap();

        let hit = world.hit([0.25, 0.25, -1.0], [0.0, 0.0, 1.0]).unwrap();
        assert_eq!(hit.instance, Some(inst_id));
        assert_approx_eq::assert_approx_eq!(hit.point[0], 0.25);
        assert_approx_eq::assert_approx_eq!(hit.point[1], 0.25);
        assert_approx_eq::assert_approx_eq!(hit.point[2], 0.0);
    }

    #[test]
    fn axis_aligned_sah_split_picks_x_first() {
        let mut world = World::new();
        let mesh_id = world.add_mesh(None);
        world.load_mesh_ply(mesh_id, triangle_ply()).unwrap();

        for (x, y) in [(0.0, 0.0), (10.0, 0.0), (0.0, 10.0), (10.0, 10.0)] {
            let tm = Matrix4::from_translation(cgmath::Vector3::new(x, y, 0.0));
            world
                .add_instance(mesh_id, Some(tm), None, InstanceFlags::USE_TREE)
                .unwrap();
        }
        world.rebuild(true, &SceneConfig::default());

        let root = match world.bvh_root {
            Some(BvhChild::Internal(id)) => id,
            other => panic!("expected internal root, got {:?}", other),
        };
        match world.bvh_arena.get(root).unwrap() {
            BvhNode::Node { left, right, .. } => {
                let count = |child: &BvhChild| -> usize {
                    match child {
                        BvhChild::Inst(_) => 1,
                        BvhChild::Internal(id) => match world.bvh_arena.get(*id).unwrap() {
                            BvhNode::Leaf { head, .. } => {
                                let mut n = 0;
                                let mut cur = *head;
                                while let Some(id) = cur {
                                    n += 1;
                                    cur = world.instances.get(id).unwrap().list_next;
                                }
                                n
                            }
                            _ => 0,
                        },
                    }
                };
                assert_eq!(count(left), 2);
                assert_eq!(count(right), 2);
            }
            other => panic!("expected Node, got {:?}", other),
        }
    }

    #[test]
    fn hull_cull_rejection() {
        let mut world = World::new();
        let mesh_id = world.add_mesh(None);
        world.load_mesh_ply(mesh_id, triangle_ply()).unwrap();
        world
            .add_instance(mesh_id, None, None, InstanceFlags::empty())
            .unwrap();

        let mut count = 0;
        world.query(&[[1.0, 0.0, 0.0, -10.0]], |_, _| count += 1);
        assert_eq!(count, 1);

        let mut count2 = 0;
        world.query(&[[-1.0, 0.0, 0.0, 100.0]], |_, _| count2 += 1);
        assert_eq!(count2, 0);
    }

    #[test]
    fn mesh_deletion_cascades_instances() {
        let mut world = World::new();
        let mesh_id = world.add_mesh(None);
        world.load_mesh_ply(mesh_id, triangle_ply()).unwrap();
        world
            .add_instance(mesh_id, None, None, InstanceFlags::USE_TREE)
            .unwrap();
        world
            .add_instance(mesh_id, None, None, InstanceFlags::empty())
            .unwrap();
        world.rebuild(true, &SceneConfig::default());

        assert!(world.delete_mesh(mesh_id));
        assert_eq!(world.mesh_count(), 0);
        assert_eq!(world.instance_count(), 0);
    }

    #[test]
    fn save_load_round_trip_preserves_records() {
        let mut world = World::new();
        let mesh_id = world.add_mesh(Some("tri".into()));
        world.load_mesh_ply(mesh_id, triangle_ply()).unwrap();
        world
            .add_instance(
                mesh_id,
                Some(Matrix4::from_translation(cgmath::Vector3::new(1.0, 2.0, 3.0))),
                Some("inst0".into()),
                InstanceFlags::USE_TREE,
            )
            .unwrap();

        let mut buf = Vec::new();
        world.save(&mut buf).unwrap();
        let loaded = World::load(&mut buf.as_slice()).unwrap();

        assert_eq!(loaded.instance_count(), 1);
        let (_, inst) = loaded.instances.arena.iter().next().unwrap();
        assert_eq!(inst.name.as_deref(), Some("inst0"));
        assert!(inst.use_tree());
    }

    #[test]
    fn idempotent_rebuild_produces_same_partition() {
        let mut world = World::new();
        let mesh_id = world.add_mesh(None);
        world.load_mesh_ply(mesh_id, triangle_ply()).unwrap();
        for (x, y) in [(0.0, 0.0), (10.0, 0.0), (0.0, 10.0), (10.0, 10.0)] {
            let tm = Matrix4::from_translation(cgmath::Vector3::new(x, y, 0.0));
            world
                .add_instance(mesh_id, Some(tm), None, InstanceFlags::USE_TREE)
                .unwrap();
        }
        world.rebuild(false, &SceneConfig::default());
        let first_bboxes: Vec<Aabb> = {
            let mut v = Vec::new();
            world.query_bsp(|_, bbox| v.push(*bbox));
            v
        };
        world.rebuild(false, &SceneConfig::default());
        let second_bboxes: Vec<Aabb> = {
            let mut v = Vec::new();
            world.query_bsp(|_, bbox| v.push(*bbox));
            v
        };
        assert_eq!(first_bboxes, second_bboxes);
    }

    #[test]
    fn degenerate_direct_child_survives_idempotent_rebuild() {
        // Three widely-spaced instances: the SAH split puts one of them
        // alone in a `Node` child slot (`BvhChild::Inst`, no backing leaf),
        // the case that used to leave `membership` stuck at `FlatList`.
        let mut world = World::new();
        let mesh_id = world.add_mesh(None);
        world.load_mesh_ply(mesh_id, triangle_ply()).unwrap();
        for x in [0.0, 100.0, 200.0] {
            let tm = Matrix4::from_translation(cgmath::Vector3::new(x, 0.0, 0.0));
            world
                .add_instance(mesh_id, Some(tm), None, InstanceFlags::USE_TREE)
                .unwrap();
        }
        world.rebuild(false, &SceneConfig::default());

        let has_direct_child = world
            .instances
            .arena
            .iter()
            .any(|(_, inst)| matches!(inst.membership, Membership::BvhChild(_)));
        assert!(has_direct_child, "expected a degenerate direct-child instance");

        let before = world.instance_count();
        world.rebuild(false, &SceneConfig::default());
        assert_eq!(world.instance_count(), before);
        let flat_count = world.instances.iter_flat().count();
        assert_eq!(flat_count, 0, "every instance is tree-eligible and should be off the flat list");
    }

    #[test]
    fn deleting_direct_child_instance_preserves_other_flat_instances() {
        let mut world = World::new();
        let mesh_id = world.add_mesh(None);
        world.load_mesh_ply(mesh_id, triangle_ply()).unwrap();
        let mut tree_ids = Vec::new();
        for x in [0.0, 100.0, 200.0] {
            let tm = Matrix4::from_translation(cgmath::Vector3::new(x, 0.0, 0.0));
            tree_ids.push(
                world
                    .add_instance(mesh_id, Some(tm), None, InstanceFlags::USE_TREE)
                    .unwrap(),
            );
        }
        let bystander = world
            .add_instance(mesh_id, None, None, InstanceFlags::empty())
            .unwrap();
        world.rebuild(false, &SceneConfig::default());

        let direct_child = tree_ids
            .into_iter()
            .find(|id| matches!(world.instance(*id).unwrap().membership, Membership::BvhChild(_)))
            .expect("expected a degenerate direct-child instance");

        let before = world.instance_count();
        assert!(world.delete_instance(direct_child));
        assert_eq!(world.instance_count(), before - 1);

        let flat_ids: Vec<InstanceId> = world.instances.iter_flat().map(|(id, _)| id).collect();
        assert_eq!(flat_ids, vec![bystander]);
    }
}
