//! Static k-d tree over an append-only point arena.
//!
//! The tree never owns the points. It stores indices into the slice it was
//! built from, so the arena stays the single source of truth and the tree
//! can be thrown away and rebuilt at any time.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Leaves hold at most this many points before splitting.
const LEAF_SIZE: usize = 8;

#[derive(Debug, Clone)]
enum Node {
    Leaf {
        points: Vec<usize>,
    },
    Split {
        axis: usize,
        value: f32,
        left: Box<Node>,
        right: Box<Node>,
    },
}

/// Candidate kept in the bounded max-heap during a query.
///
/// Ordered by squared distance, then by arena position, so the heap top is
/// always the worst candidate and equal distances prefer earlier insertions.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    dist_sq: f32,
    position: usize,
}

impl Eq for Candidate {}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dist_sq
            .total_cmp(&other.dist_sq)
            .then(self.position.cmp(&other.position))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Exact nearest-neighbour tree using Euclidean distance.
#[derive(Debug, Clone)]
pub struct KdTree {
    root: Node,
    dim: usize,
    len: usize,
}

impl KdTree {
    /// Build a tree over `points`. All points must share the same length.
    pub fn build(points: &[Vec<f32>]) -> Self {
        let dim = points.first().map(Vec::len).unwrap_or(0);
        let mut positions: Vec<usize> = (0..points.len()).collect();
        let root = build_node(points, &mut positions, dim);
        Self {
            root,
            dim,
            len: points.len(),
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Return up to `k` `(position, distance)` pairs ordered by ascending
    /// distance, ties broken by ascending position.
    ///
    /// `points` must be the same slice the tree was built from.
    pub fn nearest(&self, points: &[Vec<f32>], query: &[f32], k: usize) -> Vec<(usize, f32)> {
        if k == 0 || self.len == 0 {
            return Vec::new();
        }

        let mut heap = BinaryHeap::with_capacity(k + 1);
        search(&self.root, points, query, k, &mut heap);

        let mut found = heap.into_sorted_vec();
        found.truncate(k);
        found
            .into_iter()
            .map(|c| (c.position, c.dist_sq.sqrt()))
            .collect()
    }
}

fn build_node(points: &[Vec<f32>], positions: &mut [usize], dim: usize) -> Node {
    if positions.len() <= LEAF_SIZE || dim == 0 {
        let mut leaf = positions.to_vec();
        leaf.sort_unstable();
        return Node::Leaf { points: leaf };
    }

    let axis = widest_axis(points, positions, dim);
    let mid = positions.len() / 2;
    positions.select_nth_unstable_by(mid, |a, b| {
        points[*a][axis]
            .total_cmp(&points[*b][axis])
            .then(a.cmp(b))
    });
    let value = points[positions[mid]][axis];

    let (left, right) = positions.split_at_mut(mid);
    Node::Split {
        axis,
        value,
        left: Box::new(build_node(points, left, dim)),
        right: Box::new(build_node(points, right, dim)),
    }
}

/// Axis with the largest spread among `positions`.
fn widest_axis(points: &[Vec<f32>], positions: &[usize], dim: usize) -> usize {
    let mut best_axis = 0;
    let mut best_spread = f32::NEG_INFINITY;
    for axis in 0..dim {
        let (min, max) = positions
            .iter()
            .map(|p| points[*p][axis])
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| {
                (lo.min(v), hi.max(v))
            });
        let spread = max - min;
        if spread > best_spread {
            best_spread = spread;
            best_axis = axis;
        }
    }
    best_axis
}

fn search(
    node: &Node,
    points: &[Vec<f32>],
    query: &[f32],
    k: usize,
    heap: &mut BinaryHeap<Candidate>,
) {
    match node {
        Node::Leaf { points: leaf } => {
            for &position in leaf {
                let candidate = Candidate {
                    dist_sq: squared_distance(&points[position], query),
                    position,
                };
                if heap.len() < k {
                    heap.push(candidate);
                } else if heap.peek().is_some_and(|worst| candidate < *worst) {
                    heap.pop();
                    heap.push(candidate);
                }
            }
        }
        Node::Split {
            axis,
            value,
            left,
            right,
        } => {
            let delta = query[*axis] - value;
            let (near, far) = if delta < 0.0 {
                (left, right)
            } else {
                (right, left)
            };
            search(near, points, query, k, heap);

            // Equal-distance points across the plane can still win on position,
            // so the far side is pruned only when strictly farther.
            let plane_sq = delta * delta;
            let must_visit = heap.len() < k || heap.peek().is_some_and(|w| plane_sq <= w.dist_sq);
            if must_visit {
                search(far, points, query, k, heap);
            }
        }
    }
}

/// Squared Euclidean distance between two vectors of equal length.
pub fn squared_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// Euclidean distance between two vectors of equal length.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    squared_distance(a, b).sqrt()
}
