//! Instance store: placements of a mesh into the world (spec §3, §4.2).

use crate::aabb::Aabb;
use crate::arena::{Arena, Index};
use crate::bvh::BvhNodeId;
use crate::mesh::{Mesh, MeshId};
use cgmath::{Matrix4, SquareMatrix};

pub type InstanceId = Index<Instance>;

bitflags::bitflags! {
    /// Instance flag bits (spec §3: "a set of flags; one flag bit, `USE_TREE`,
    /// controls whether the instance participates in the BVH").
    #[derive(Default)]
    pub struct InstanceFlags: u32 {
        const USE_TREE = 0b0000_0001;
    }
}

/// Where an instance currently lives: the world's flat live list, or a BVH
/// leaf/straddle list. Replaces the original's `bsp_parent == nullptr`
/// discriminant (spec §9, "Instance identity doubles as BVH leaf") with an
/// explicit enum, since here an `Instance` is a plain arena-owned value, not
/// itself a BVH node variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    FlatList,
    /// On `node`'s leaf or straddle list (`list_prev`/`list_next` splice
    /// into that list).
    BvhNode(BvhNodeId),
    /// A degenerate single-instance partition occupying a `Node`/
    /// `NodeShare` child slot directly (`BvhChild::Inst`), not via any
    /// list. `node` is that slot's parent, mirroring the original's
    /// `node->bsp_child[k]->bsp_parent = node`. `list_prev`/`list_next`
    /// are unused in this state.
    BvhChild(BvhNodeId),
    /// This instance is itself the degenerate single-instance BVH root
    /// (spec §3 "Inst -- also the instance's runtime identity"); there is
    /// no backing `BvhNode` to point `bsp_parent` at.
    BvhRoot,
}

/// A placement of a mesh into the world (spec §3 "Instance").
#[derive(Debug, Clone)]
pub struct Instance {
    pub mesh: MeshId,
    pub name: Option<String>,
    /// Mesh-local -> world, row-major (spec §3).
    pub tm: Matrix4<f64>,
    pub bbox: Option<Aabb>,
    pub flags: InstanceFlags,
    pub membership: Membership,
    /// Doubly-linked splice pointers, reused across whichever list
    /// `membership` currently says this instance is on (spec §9's intrusive
    /// list note), realized as arena indices instead of raw pointers.
    pub list_prev: Option<InstanceId>,
    pub list_next: Option<InstanceId>,
}

impl Instance {
    pub fn use_tree(&self) -> bool {
        self.flags.contains(InstanceFlags::USE_TREE)
    }
}

/// Owns every live instance plus the world's flat live list head/tail (spec
/// §3 "World owns... the instance live list (doubly-linked)").
#[derive(Default)]
pub struct InstanceStore {
    pub arena: Arena<Instance>,
    pub flat_head: Option<InstanceId>,
    pub flat_tail: Option<InstanceId>,
}

impl InstanceStore {
    pub fn new() -> Self {
        InstanceStore {
            arena: Arena::new(),
            flat_head: None,
            flat_tail: None,
        }
    }

    pub fn get(&self, id: InstanceId) -> Option<&Instance> {
        self.arena.get(id)
    }

    pub fn get_mut(&mut self, id: InstanceId) -> Option<&mut Instance> {
        self.arena.get_mut(id)
    }

    /// Spec §4.2 "Adding an instance": allocate, copy transform (or
    /// identity), seed the world AABB from the mesh's untransformed AABB in
    /// the identity case (cheap exact equivalent of transforming every
    /// vertex through the identity matrix), append to the flat list.
    /// Mesh-share-list linkage is the caller's job (`World::add_instance`),
    /// since this store doesn't know about `Mesh`.
    pub fn add(
        &mut self,
        mesh_id: MeshId,
        mesh: &Mesh,
        tm: Option<Matrix4<f64>>,
        name: Option<String>,
        flags: InstanceFlags,
    ) -> InstanceId {
        let tm = tm.unwrap_or_else(Matrix4::identity);
        let bbox = if tm == Matrix4::identity() {
            mesh.bbox
        } else {
            Aabb::from_transformed_points(&tm, mesh.vertices.iter().map(|v| v.position()))
        };
        let inst = Instance {
            mesh: mesh_id,
            name,
            tm,
            bbox,
            flags,
            membership: Membership::FlatList,
            list_prev: None,
            list_next: None,
        };
        let id = self.arena.insert(inst);
        self.push_flat_back(id);
        id
    }

    fn push_flat_back(&mut self, id: InstanceId) {
        if let Some(tail) = self.flat_tail {
            if let Some(t) = self.arena.get_mut(tail) {
                t.list_next = Some(id);
            }
        } else {
            self.flat_head = Some(id);
        }
        if let Some(inst) = self.arena.get_mut(id) {
            inst.list_prev = self.flat_tail;
            inst.list_next = None;
            inst.membership = Membership::FlatList;
        }
        self.flat_tail = Some(id);
    }

    /// Splices `id` out of the flat list. Caller must ensure `id` is
    /// currently `Membership::FlatList`.
    pub fn unlink_flat(&mut self, id: InstanceId) {
        let (prev, next) = match self.arena.get(id) {
            Some(inst) => (inst.list_prev, inst.list_next),
            None => return,
        };
        match prev {
            Some(p) => {
                if let Some(pi) = self.arena.get_mut(p) {
                    pi.list_next = next;
                }
            }
            None => self.flat_head = next,
        }
        match next {
            Some(n) => {
                if let Some(ni) = self.arena.get_mut(n) {
                    ni.list_prev = prev;
                }
            }
            None => self.flat_tail = prev,
        }
        if let Some(inst) = self.arena.get_mut(id) {
            inst.list_prev = None;
            inst.list_next = None;
        }
    }

    /// Re-homes `id` back onto the flat list (used when tearing down a BVH,
    /// spec §5 "Lifetimes": "returns all tree-held instances to the flat
    /// list").
    pub fn relink_flat(&mut self, id: InstanceId) {
        self.push_flat_back(id);
    }

    pub fn iter_flat(&self) -> FlatIter<'_> {
        FlatIter {
            store: self,
            cursor: self.flat_head,
        }
    }

    pub fn remove(&mut self, id: InstanceId) -> Option<Instance> {
        self.arena.remove(id)
    }

    /// Recomputes `id`'s world AABB from its current transform and mesh
    /// (spec §4.3 "Transform -> AABB").
    pub fn refresh_bbox(&mut self, id: InstanceId, mesh: &Mesh) {
        if let Some(inst) = self.arena.get_mut(id) {
            inst.bbox = Aabb::from_transformed_points(&inst.tm, mesh.vertices.iter().map(|v| v.position()));
        }
    }
}

pub struct FlatIter<'a> {
    store: &'a InstanceStore,
    cursor: Option<InstanceId>,
}

impl<'a> Iterator for FlatIter<'a> {
    type Item = (InstanceId, &'a Instance);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cursor?;
        let inst = self.store.arena.get(id)?;
        self.cursor = inst.list_next;
        Some((id, inst))
    }
}
