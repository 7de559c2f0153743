//! Frustum/hull query engine (spec §4.5).

use crate::aabb::{Aabb, PlaneSide};
use crate::arena::Arena;
use crate::bvh::{BvhChild, BvhNode, BvhNodeId};
use crate::instance::{Instance, InstanceId, InstanceStore};
use crate::mesh::{Mesh, MeshId};

/// Diagnostic counters, rehosted onto a per-query context instead of the
/// reference implementation's process-wide globals (spec §5, §9 "Diagnostic
/// counters as globals"; spec §4.5 "reset at entry").
#[derive(Debug, Default, Clone, Copy)]
pub struct QueryStats {
    pub bsp_tests: u64,
    pub bsp_insts: u64,
    pub bsp_nodes: u64,
}

/// Invokes `cb(mesh, transform, mesh_id)` once per instance whose world AABB
/// is not entirely outside any of `planes` (spec §4.5). `planes` holds up to
/// 4 half-space planes `(a,b,c,d)` with `ax+by+cz+d <= 0` meaning inside.
pub fn query<F>(
    bvh_arena: &Arena<BvhNode>,
    root: Option<BvhChild>,
    instances: &InstanceStore,
    meshes: &Arena<Mesh>,
    planes: &[[f64; 4]],
    mut cb: F,
) -> QueryStats
where
    F: FnMut(MeshId, &Instance),
{
    let mut stats = QueryStats::default();
    let mut plane_buf: Vec<[f64; 4]> = planes.to_vec();

    if let Some(child) = root {
        query_child(bvh_arena, child, instances, meshes, &mut plane_buf, &mut stats, &mut cb);
    }

    // Dual traversal: after the BVH, walk the residual flat list with the
    // original (unreduced) plane set (spec §4.5 "Dual traversal").
    for (id, inst) in instances.iter_flat() {
        stats.bsp_insts += 1;
        if instance_survives(inst, planes, &mut stats) {
            emit(meshes, inst, &mut cb);
        }
        let _ = id;
    }
    stats
}

fn emit<F: FnMut(MeshId, &Instance)>(meshes: &Arena<Mesh>, inst: &Instance, cb: &mut F) {
    if meshes.get(inst.mesh).is_some() {
        cb(inst.mesh, inst);
    }
}

fn instance_survives(inst: &Instance, planes: &[[f64; 4]], stats: &mut QueryStats) -> bool {
    let bbox = match inst.bbox {
        Some(b) => b,
        None => return false,
    };
    for plane in planes {
        stats.bsp_tests += 1;
        if bbox.classify(*plane) == PlaneSide::Outside {
            return false;
        }
    }
    true
}

fn query_child<F>(
    arena: &Arena<BvhNode>,
    child: BvhChild,
    instances: &InstanceStore,
    meshes: &Arena<Mesh>,
    planes: &mut Vec<[f64; 4]>,
    stats: &mut QueryStats,
    cb: &mut F,
) where
    F: FnMut(MeshId, &Instance),
{
    match child {
        BvhChild::Inst(id) => {
            stats.bsp_insts += 1;
            if let Some(inst) = instances.get(id) {
                if instance_survives(inst, planes, stats) {
                    emit(meshes, inst, cb);
                }
            }
        }
        BvhChild::Internal(node_id) => {
            query_node(arena, node_id, instances, meshes, planes, stats, cb);
        }
    }
}

fn query_node<F>(
    arena: &Arena<BvhNode>,
    node_id: BvhNodeId,
    instances: &InstanceStore,
    meshes: &Arena<Mesh>,
    planes: &mut Vec<[f64; 4]>,
    stats: &mut QueryStats,
    cb: &mut F,
) where
    F: FnMut(MeshId, &Instance),
{
    let node = match arena.get(node_id) {
        Some(n) => n,
        None => return,
    };
    stats.bsp_nodes += 1;
    let bbox = node.bbox();

    // Reduce the plane set against this node's bbox: prune fully-outside
    // subtrees immediately, drop fully-inside planes via swap-remove (spec
    // §4.5 steps 1-3).
    let mut local = planes.clone();
    let mut i = 0;
    while i < local.len() {
        stats.bsp_tests += 1;
        match bbox.classify(local[i]) {
            PlaneSide::Outside => {
                tracing::trace!(?node_id, "hull query: subtree pruned");
                return;
            }
            PlaneSide::Inside => {
                local.swap_remove(i);
            }
            PlaneSide::Straddling => {
                i += 1;
            }
        }
    }

    if local.is_empty() {
        // No-clip descent: every instance in this subtree survives.
        emit_all(arena, node, instances, meshes, stats, cb);
        return;
    }

    match node {
        BvhNode::Leaf { head, .. } => {
            let mut cursor = *head;
            while let Some(id) = cursor {
                stats.bsp_insts += 1;
                if let Some(inst) = instances.get(id) {
                    if instance_survives(inst, &local, stats) {
                        emit(meshes, inst, cb);
                    }
                    cursor = inst.list_next;
                } else {
                    break;
                }
            }
        }
        BvhNode::Node { left, right, .. } => {
            query_child(arena, *left, instances, meshes, &mut local, stats, cb);
            query_child(arena, *right, instances, meshes, &mut local, stats, cb);
        }
        BvhNode::NodeShare {
            left,
            right,
            straddle_head,
            ..
        } => {
            query_child(arena, *left, instances, meshes, &mut local, stats, cb);
            query_child(arena, *right, instances, meshes, &mut local, stats, cb);
            let mut cursor = *straddle_head;
            while let Some(id) = cursor {
                stats.bsp_insts += 1;
                if let Some(inst) = instances.get(id) {
                    if instance_survives(inst, &local, stats) {
                        emit(meshes, inst, cb);
                    }
                    cursor = inst.list_next;
                } else {
                    break;
                }
            }
        }
    }
}

/// No-clip variant: emits every instance in the subtree unconditionally
/// (spec §4.5 step 4).
fn emit_all<F: FnMut(MeshId, &Instance)>(
    arena: &Arena<BvhNode>,
    node: &BvhNode,
    instances: &InstanceStore,
    meshes: &Arena<Mesh>,
    stats: &mut QueryStats,
    cb: &mut F,
) {
    let mut walk_child = |child: BvhChild, stats: &mut QueryStats, cb: &mut F| match child {
        BvhChild::Inst(id) => {
            stats.bsp_insts += 1;
            if let Some(inst) = instances.get(id) {
                emit(meshes, inst, cb);
            }
        }
        BvhChild::Internal(id) => {
            if let Some(n) = arena.get(id) {
                stats.bsp_nodes += 1;
                emit_all(arena, n, instances, meshes, stats, cb);
            }
        }
    };
    let mut walk_list = |mut cursor: Option<InstanceId>, stats: &mut QueryStats, cb: &mut F| {
        while let Some(id) = cursor {
            stats.bsp_insts += 1;
            if let Some(inst) = instances.get(id) {
                emit(meshes, inst, cb);
                cursor = inst.list_next;
            } else {
                break;
            }
        }
    };
    match node {
        BvhNode::Leaf { head, .. } => walk_list(*head, stats, cb),
        BvhNode::Node { left, right, .. } => {
            walk_child(*left, stats, cb);
            walk_child(*right, stats, cb);
        }
        BvhNode::NodeShare {
            left,
            right,
            straddle_head,
            ..
        } => {
            walk_child(*left, stats, cb);
            walk_child(*right, stats, cb);
            walk_list(*straddle_head, stats, cb);
        }
    }
}
