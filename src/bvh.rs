//! BVH node representation and the SAH bulk builder (spec §3 "BVH node",
//! §4.4 "BVH builder").

use crate::aabb::Aabb;
use crate::arena::{Arena, Index};
use crate::instance::{InstanceId, Membership};
use itertools::Itertools;

pub type BvhNodeId = Index<BvhNode>;

/// Either leaf of a `Node`/`NodeShare` child slot: a single instance acting
/// as a degenerate leaf, or a reference to another internal node (spec §3
/// "Inst -- a single instance acting as a degenerate leaf"). Splitting this
/// out of `BvhNode` is the DESIGN NOTES §9 suggestion ("separate the roles:
/// a persistent Instance object... and a BvhRef::Inst(InstanceId) variant").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BvhChild {
    Inst(InstanceId),
    Internal(BvhNodeId),
}

/// A tagged union of the three constructible BVH node shapes (spec §3: the
/// fourth variant, `Inst`, is realized by `BvhChild::Inst` rather than an
/// arena slot, since an instance is a plain owned value here, not itself a
/// node).
#[derive(Debug, Clone)]
pub enum BvhNode {
    /// Doubly-linked list of instances, all enclosed by `bbox` (spec §3).
    Leaf {
        bbox: Aabb,
        parent: Option<BvhNodeId>,
        head: Option<InstanceId>,
        tail: Option<InstanceId>,
    },
    /// Two children, each any `BvhChild` variant (spec §3).
    Node {
        bbox: Aabb,
        parent: Option<BvhNodeId>,
        left: BvhChild,
        right: BvhChild,
    },
    /// `Node` plus a straddle list of instances enclosed by `bbox` but not
    /// by either child alone (spec §3). Never emitted by the bulk builder
    /// (spec §9 "NodeShare never built, only traversed"); kept so
    /// traversal/deletion code has somewhere to route individually-deleted
    /// straddlers.
    NodeShare {
        bbox: Aabb,
        parent: Option<BvhNodeId>,
        left: BvhChild,
        right: BvhChild,
        straddle_head: Option<InstanceId>,
        straddle_tail: Option<InstanceId>,
    },
}

impl BvhNode {
    pub fn bbox(&self) -> Aabb {
        match self {
            BvhNode::Leaf { bbox, .. } => *bbox,
            BvhNode::Node { bbox, .. } => *bbox,
            BvhNode::NodeShare { bbox, .. } => *bbox,
        }
    }

    pub fn parent(&self) -> Option<BvhNodeId> {
        match self {
            BvhNode::Leaf { parent, .. } => *parent,
            BvhNode::Node { parent, .. } => *parent,
            BvhNode::NodeShare { parent, .. } => *parent,
        }
    }

    pub fn set_parent(&mut self, p: Option<BvhNodeId>) {
        match self {
            BvhNode::Leaf { parent, .. } => *parent = p,
            BvhNode::Node { parent, .. } => *parent = p,
            BvhNode::NodeShare { parent, .. } => *parent = p,
        }
    }
}

/// Build-time tunables threaded through `rebuild` (spec §6 "Constants").
#[derive(Debug, Clone, Copy)]
pub struct SceneConfig {
    pub height_scale: f64,
}

impl Default for SceneConfig {
    fn default() -> Self {
        SceneConfig { height_scale: 1.0 }
    }
}

/// What the builder sorts and sweeps: an instance id plus its current
/// world AABB (spec §4.4 "array of (instance, running-prefix-area) items").
#[derive(Debug, Clone, Copy)]
struct Item {
    id: InstanceId,
    bbox: Aabb,
}

fn centroid_key(b: &Aabb, axis: usize) -> f32 {
    match axis {
        0 => b.xmin + b.xmax,
        1 => b.ymin + b.ymax,
        _ => b.zmin + b.zmax,
    }
}

/// Builds a BVH over `items` (spec §4.4). `items` must be non-empty.
/// Splices each instance onto the arena's bookkeeping (`membership`,
/// `list_prev`/`list_next`) as leaves are formed -- the caller
/// (`World::rebuild`) owns the instance arena and performs that linking
/// after this function returns the tree shape, to keep this module free of
/// an `InstanceStore` dependency.
pub struct BuildResult {
    pub root: BvhChild,
    /// Leaf/straddle membership assignments the caller must apply to each
    /// instance: `(instance, containing node, prev, next)`.
    pub leaf_links: Vec<LeafLink>,
    /// Instances that ended up as a degenerate single-instance partition
    /// occupying a `Node`/`NodeShare` child slot directly, paired with
    /// that slot's parent node: `(instance, parent)`. Mirrors the
    /// original's `node->bsp_child[k]->bsp_parent = node` -- these never
    /// join a list, but still need `Membership::BvhChild(parent)` set so
    /// they are recognized as tree-held (spec §8 parent invariant).
    pub direct_children: Vec<(InstanceId, BvhNodeId)>,
}

pub struct LeafLink {
    pub instance: InstanceId,
    pub node: BvhNodeId,
    pub prev: Option<InstanceId>,
    pub next: Option<InstanceId>,
}

pub fn rebuild(
    arena: &mut Arena<BvhNode>,
    items: &[(InstanceId, Aabb)],
    config: &SceneConfig,
) -> BuildResult {
    assert!(!items.is_empty(), "rebuild requires at least one instance");
    let mut leaf_links = Vec::new();
    let mut direct_children = Vec::new();
    let mut work: Vec<Item> = items
        .iter()
        .map(|(id, bbox)| Item { id: *id, bbox: *bbox })
        .collect();
    let root = split(arena, &mut work, &mut leaf_links, &mut direct_children, config, None);
    BuildResult { root, leaf_links, direct_children }
}

fn union_all(items: &[Item]) -> Aabb {
    items
        .iter()
        .fold(items[0].bbox, |acc, it| acc.union(&it.bbox))
}

/// Recursive SAH split (spec §4.4).
fn split(
    arena: &mut Arena<BvhNode>,
    items: &mut [Item],
    leaf_links: &mut Vec<LeafLink>,
    direct_children: &mut Vec<(InstanceId, BvhNodeId)>,
    config: &SceneConfig,
    parent: Option<BvhNodeId>,
) -> BvhChild {
    if items.len() == 1 {
        // A single-instance partition reached via recursion is a direct
        // `Node`/`NodeShare` child slot, not the whole tree -- the caller
        // (`rebuild`) is the only one that calls `split` with `parent ==
        // None`, which is the whole-tree (`Membership::BvhRoot`) case.
        if let Some(parent_id) = parent {
            direct_children.push((items[0].id, parent_id));
        }
        return BvhChild::Inst(items[0].id);
    }

    let n = items.len();
    let total_area = union_all(items).sah_area(config.height_scale);

    // For each axis: sort by summed centroid, sweep prefix/suffix areas,
    // find the cheapest split index. Track the best across all three axes.
    let mut best_axis = 0usize;
    let mut best_index = 0usize; // split point in [1, n-1]
    let mut best_cost = f64::INFINITY;

    for axis in 0..3 {
        let order: Vec<usize> = (0..n)
            .sorted_by(|&a, &b| {
                centroid_key(&items[a].bbox, axis)
                    .partial_cmp(&centroid_key(&items[b].bbox, axis))
                    .unwrap()
            })
            .collect();

        let mut prefix_area = vec![0.0f64; n];
        let mut acc = items[order[0]].bbox;
        prefix_area[0] = acc.sah_area(config.height_scale);
        for i in 1..n {
            acc = acc.union(&items[order[i]].bbox);
            prefix_area[i] = acc.sah_area(config.height_scale);
        }

        let mut suffix_area = vec![0.0f64; n];
        acc = items[order[n - 1]].bbox;
        suffix_area[n - 1] = acc.sah_area(config.height_scale);
        for i in (0..n - 1).rev() {
            acc = acc.union(&items[order[i]].bbox);
            suffix_area[i] = acc.sah_area(config.height_scale);
        }

        for i in 1..n {
            let cost = prefix_area[i - 1] * i as f64 + suffix_area[i] * (n - i) as f64;
            if cost < best_cost {
                best_cost = cost;
                best_axis = axis;
                best_index = i;
            }
        }
    }

    if best_cost + 2.0 * total_area > n as f64 * total_area {
        // Leaf fallback: sort on the winning axis, wire the intrusive list.
        items.sort_by(|a, b| {
            centroid_key(&a.bbox, best_axis)
                .partial_cmp(&centroid_key(&b.bbox, best_axis))
                .unwrap()
        });
        let bbox = union_all(items);
        let node_id = arena.insert(BvhNode::Leaf {
            bbox,
            parent,
            head: None,
            tail: None,
        });
        let mut prev = None;
        for (i, it) in items.iter().enumerate() {
            let next = if i + 1 < items.len() {
                Some(items[i + 1].id)
            } else {
                None
            };
            leaf_links.push(LeafLink {
                instance: it.id,
                node: node_id,
                prev,
                next,
            });
            prev = Some(it.id);
        }
        if let Some(BvhNode::Leaf { head, tail, .. }) = arena.get_mut(node_id) {
            *head = items.first().map(|it| it.id);
            *tail = items.last().map(|it| it.id);
        }
        tracing::debug!(n, axis = best_axis, "SAH leaf fallback");
        return BvhChild::Internal(node_id);
    }

    // Binary split on the winning axis.
    items.sort_by(|a, b| {
        centroid_key(&a.bbox, best_axis)
            .partial_cmp(&centroid_key(&b.bbox, best_axis))
            .unwrap()
    });
    let (left_items, right_items) = items.split_at_mut(best_index);
    let left_bbox = union_all(left_items);
    let right_bbox = union_all(right_items);
    let bbox = left_bbox.union(&right_bbox);

    let node_id = arena.insert(BvhNode::Node {
        bbox,
        parent,
        left: BvhChild::Inst(left_items[0].id), // placeholder, overwritten below
        right: BvhChild::Inst(right_items[0].id),
    });

    let left = split(arena, left_items, leaf_links, direct_children, config, Some(node_id));
    let right = split(arena, right_items, leaf_links, direct_children, config, Some(node_id));

    if let Some(BvhNode::Node {
        left: l, right: r, ..
    }) = arena.get_mut(node_id)
    {
        *l = left;
        *r = right;
    }
    if let BvhChild::Internal(id) = left {
        if let Some(child) = arena.get_mut(id) {
            child.set_parent(Some(node_id));
        }
    }
    if let BvhChild::Internal(id) = right {
        if let Some(child) = arena.get_mut(id) {
            child.set_parent(Some(node_id));
        }
    }
    tracing::debug!(n, axis = best_axis, index = best_index, "SAH split");
    BvhChild::Internal(node_id)
}

/// Returns the `Membership` a caller should set on `id` once `link.node`
/// has been applied, matching spec §4.2's "on that leaf's instance list".
pub fn leaf_membership(node: BvhNodeId) -> Membership {
    Membership::BvhNode(node)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::instance::{Instance, InstanceFlags, Membership};
    use crate::mesh::Mesh;
    use cgmath::SquareMatrix;

    fn mk_instances(count: usize) -> (Arena<Instance>, Vec<InstanceId>) {
        let mut mesh_arena: Arena<Mesh> = Arena::new();
        let mesh_id = mesh_arena.insert(Mesh::new(None));
        let mut arena: Arena<Instance> = Arena::new();
        let ids = (0..count)
            .map(|_| {
                arena.insert(Instance {
                    mesh: mesh_id,
                    name: None,
                    tm: cgmath::Matrix4::identity(),
                    bbox: None,
                    flags: InstanceFlags::USE_TREE,
                    membership: Membership::FlatList,
                    list_prev: None,
                    list_next: None,
                })
            })
            .collect();
        (arena, ids)
    }

    fn cube_at(cx: f32, cy: f32, cz: f32) -> Aabb {
        Aabb {
            xmin: cx,
            xmax: cx + 1.0,
            ymin: cy,
            ymax: cy + 1.0,
            zmin: cz,
            zmax: cz + 1.0,
        }
    }

    #[test]
    fn single_instance_is_degenerate_leaf() {
        let (_instances, ids) = mk_instances(1);
        let id = ids[0];
        let mut arena: Arena<BvhNode> = Arena::new();
        let result = rebuild(&mut arena, &[(id, cube_at(0.0, 0.0, 0.0))], &SceneConfig::default());
        assert_eq!(result.root, BvhChild::Inst(id));
        assert!(result.leaf_links.is_empty());
    }

    #[test]
    fn four_corner_cubes_split_on_x_first() {
        let (_instances, ids) = mk_instances(4);
        let boxes = [
            cube_at(0.0, 0.0, 0.0),
            cube_at(10.0, 0.0, 0.0),
            cube_at(0.0, 10.0, 0.0),
            cube_at(10.0, 10.0, 0.0),
        ];
        let items: Vec<(InstanceId, Aabb)> =
            ids.iter().copied().zip(boxes.iter().copied()).collect();
        let mut arena: Arena<BvhNode> = Arena::new();
        let result = rebuild(&mut arena, &items, &SceneConfig::default());
        let root_id = match result.root {
            BvhChild::Internal(id) => id,
            BvhChild::Inst(_) => panic!("expected internal node"),
        };
        match arena.get(root_id).unwrap() {
            BvhNode::Node { .. } => {}
            other => panic!("expected Node, got {:?}", other),
        }
    }
}
