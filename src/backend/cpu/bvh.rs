//! Binned-SAH BVH over triangles and its ray traversal.
//!
//! Flat array layout:
//! - 32-byte nodes, index 0 is the root
//! - leaves reference a range of the reordered primitive index list

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

use crate::util::BBox3f;

/// Number of SAH bins for split evaluation.
const NUM_BINS: usize = 12;

/// Cost ratio: traversal vs intersection.
const TRAVERSAL_COST: f32 = 1.0;
const INTERSECT_COST: f32 = 1.0;

/// Maximum primitives per leaf before forcing a split.
const MAX_LEAF_SIZE: usize = 4;

/// Flat BVH node (32 bytes).
///
/// Internal node: left_or_first = left child index (right = left + 1), count = 0
/// Leaf node: left_or_first = first primitive index, count > 0
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct BvhNode {
    pub aabb_min: [f32; 3],
    pub left_or_first: u32,
    pub aabb_max: [f32; 3],
    pub count: u32,
}

impl BvhNode {
    fn leaf(bounds: &BBox3f, first: usize, count: usize) -> Self {
        Self {
            aabb_min: bounds.min.to_array(),
            left_or_first: first as u32,
            aabb_max: bounds.max.to_array(),
            count: count as u32,
        }
    }

    fn interior(bounds: &BBox3f, left: usize) -> Self {
        Self {
            aabb_min: bounds.min.to_array(),
            left_or_first: left as u32,
            aabb_max: bounds.max.to_array(),
            count: 0,
        }
    }

    #[inline]
    pub fn bounds(&self) -> BBox3f {
        BBox3f::new(Vec3::from(self.aabb_min), Vec3::from(self.aabb_max))
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.count > 0
    }
}

/// Built BVH.
#[derive(Debug, Clone)]
pub struct Bvh {
    pub nodes: Vec<BvhNode>,
    /// Reordered primitive indices (leaves reference into this).
    pub prim_indices: Vec<u32>,
}

/// SAH bin for evaluating split candidates.
#[derive(Clone, Copy)]
struct Bin {
    bounds: BBox3f,
    count: usize,
}

impl Default for Bin {
    fn default() -> Self {
        Self {
            bounds: BBox3f::EMPTY,
            count: 0,
        }
    }
}

/// Build a BVH over primitives given by their bounds.
#[tracing::instrument(skip_all, fields(prim_count = prim_bounds.len()))]
pub fn build_bvh(prim_bounds: &[BBox3f]) -> Bvh {
    let n = prim_bounds.len();
    if n == 0 {
        return Bvh {
            nodes: vec![BvhNode::zeroed()],
            prim_indices: vec![],
        };
    }

    let centroids: Vec<Vec3> = prim_bounds.iter().map(BBox3f::center).collect();
    let mut indices: Vec<u32> = (0..n as u32).collect();
    let mut nodes: Vec<BvhNode> = Vec::with_capacity(2 * n);
    nodes.push(BvhNode::zeroed());

    struct Task {
        node_idx: usize,
        start: usize,
        end: usize,
    }
    let mut stack = vec![Task {
        node_idx: 0,
        start: 0,
        end: n,
    }];

    while let Some(task) = stack.pop() {
        let (start, end) = (task.start, task.end);
        let count = end - start;

        let mut node_bounds = BBox3f::EMPTY;
        let mut centroid_bounds = BBox3f::EMPTY;
        for &idx in &indices[start..end] {
            node_bounds.expand_by_box(&prim_bounds[idx as usize]);
            centroid_bounds.expand_by_point(centroids[idx as usize]);
        }

        if count <= MAX_LEAF_SIZE {
            nodes[task.node_idx] = BvhNode::leaf(&node_bounds, start, count);
            continue;
        }

        let split = find_best_split(&indices[start..end], prim_bounds, &centroids, &centroid_bounds);
        let leaf_cost = count as f32 * INTERSECT_COST * node_bounds.surface_area();
        let Some((axis, position)) = split.filter(|&(_, _, cost)| cost < leaf_cost).map(|(a, p, _)| (a, p))
        else {
            nodes[task.node_idx] = BvhNode::leaf(&node_bounds, start, count);
            continue;
        };

        let mid = start
            + partition(&mut indices[start..end], |&idx| {
                centroids[idx as usize][axis] < position
            });
        // Degenerate partition: split in the middle.
        let mid = if mid == start || mid == end {
            (start + end) / 2
        } else {
            mid
        };

        let left = nodes.len();
        nodes.push(BvhNode::zeroed());
        nodes.push(BvhNode::zeroed());
        nodes[task.node_idx] = BvhNode::interior(&node_bounds, left);

        stack.push(Task {
            node_idx: left + 1,
            start: mid,
            end,
        });
        stack.push(Task {
            node_idx: left,
            start,
            end: mid,
        });
    }

    Bvh {
        nodes,
        prim_indices: indices,
    }
}

/// SAH binned split search across all 3 axes: (axis, position, cost).
fn find_best_split(
    indices: &[u32],
    prim_bounds: &[BBox3f],
    centroids: &[Vec3],
    centroid_bounds: &BBox3f,
) -> Option<(usize, f32, f32)> {
    let mut best: Option<(usize, f32, f32)> = None;
    let extent = centroid_bounds.size();

    for axis in 0..3 {
        if extent[axis] < 1e-8 {
            continue;
        }
        let mut bins = [Bin::default(); NUM_BINS];
        let scale = NUM_BINS as f32 / extent[axis];
        for &idx in indices {
            let bin = ((centroids[idx as usize][axis] - centroid_bounds.min[axis]) * scale) as usize;
            let bin = &mut bins[bin.min(NUM_BINS - 1)];
            bin.bounds.expand_by_box(&prim_bounds[idx as usize]);
            bin.count += 1;
        }

        let mut left_area = [0.0f32; NUM_BINS - 1];
        let mut left_count = [0usize; NUM_BINS - 1];
        let mut sweep = BBox3f::EMPTY;
        let mut sweep_count = 0;
        for i in 0..NUM_BINS - 1 {
            sweep.expand_by_box(&bins[i].bounds);
            sweep_count += bins[i].count;
            left_area[i] = sweep.surface_area();
            left_count[i] = sweep_count;
        }

        sweep = BBox3f::EMPTY;
        sweep_count = 0;
        for i in (1..NUM_BINS).rev() {
            sweep.expand_by_box(&bins[i].bounds);
            sweep_count += bins[i].count;
            let cost = TRAVERSAL_COST
                + INTERSECT_COST
                    * (left_count[i - 1] as f32 * left_area[i - 1] + sweep_count as f32 * sweep.surface_area());
            if best.map_or(true, |(_, _, c)| cost < c) {
                let position = centroid_bounds.min[axis] + (i as f32 / NUM_BINS as f32) * extent[axis];
                best = Some((axis, position, cost));
            }
        }
    }
    best
}

/// Partition slice in-place. Returns count of elements where predicate is true.
fn partition<T, F>(slice: &mut [T], pred: F) -> usize
where
    F: Fn(&T) -> bool,
{
    let mut left = 0;
    let mut right = slice.len();
    while left < right {
        if pred(&slice[left]) {
            left += 1;
        } else {
            right -= 1;
            slice.swap(left, right);
        }
    }
    left
}

/// Möller-Trumbore ray/triangle test. Returns (t, b1, b2) for `t` in `(t_min, t_max)`.
#[inline]
pub fn intersect_triangle(origin: Vec3, dir: Vec3, v: [Vec3; 3], t_min: f32, t_max: f32) -> Option<(f32, f32, f32)> {
    let e1 = v[1] - v[0];
    let e2 = v[2] - v[0];
    let p = dir.cross(e2);
    let det = e1.dot(p);
    if det.abs() < 1e-12 {
        return None;
    }
    let inv_det = 1.0 / det;
    let s = origin - v[0];
    let b1 = s.dot(p) * inv_det;
    if !(0.0..=1.0).contains(&b1) {
        return None;
    }
    let q = s.cross(e1);
    let b2 = dir.dot(q) * inv_det;
    if b2 < 0.0 || b1 + b2 > 1.0 {
        return None;
    }
    let t = e2.dot(q) * inv_det;
    (t > t_min && t < t_max).then_some((t, b1, b2))
}

impl Bvh {
    /// Walk every leaf the ray may reach before `*t_max`.
    ///
    /// `visit(prim, t_max)` returns the distance of a closer hit, which shrinks
    /// `t_max`. With `any_hit` the walk stops at the first reported hit.
    pub fn traverse<F>(&self, origin: Vec3, dir: Vec3, t_min: f32, t_max: &mut f32, any_hit: bool, mut visit: F) -> bool
    where
        F: FnMut(u32, f32) -> Option<f32>,
    {
        if self.prim_indices.is_empty() {
            return false;
        }
        let inv_dir = dir.recip();
        let mut hit = false;
        let mut stack = [0u32; 64];
        let mut sp = 1;
        while sp > 0 {
            sp -= 1;
            let node = &self.nodes[stack[sp] as usize];
            if node.bounds().intersect_ray(origin, inv_dir, t_min, *t_max).is_none() {
                continue;
            }
            if node.is_leaf() {
                let first = node.left_or_first as usize;
                for &prim in &self.prim_indices[first..first + node.count as usize] {
                    if let Some(t) = visit(prim, *t_max) {
                        *t_max = t;
                        hit = true;
                        if any_hit {
                            return true;
                        }
                    }
                }
            } else if sp + 2 <= stack.len() {
                stack[sp] = node.left_or_first + 1;
                stack[sp + 1] = node.left_or_first;
                sp += 2;
            }
        }
        hit
    }
}
