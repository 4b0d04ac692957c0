use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::RwLock;
use rayon::prelude::*;

use crate::distance::euclidean;
use crate::error::TreeError;
use crate::node::{Node, NodeRef};
use crate::pow_table::PowerTable;

const DEFAULT_BASE: f64 = 1.3;

/// Level given to the root of a tree seeded from a single point. Later
/// insertions grow the tree upward if a point falls outside its covering
/// radius.
const DEFAULT_SCALE: i32 = 10;

/// Number of points below which nested parallel building inserts
/// sequentially instead of splitting further.
const NESTED_CHUNK: usize = 64;

/// A concurrent cover tree over points in `R^D`.
///
/// Invariants maintained by insertion and verified by
/// [`check_covering`](SGTree::check_covering):
/// - covering: every child lies within its parent's covering distance;
/// - separation: siblings are pairwise farther apart than their parent's
///   separating distance;
/// - levels strictly decrease from parent to child.
///
/// Queries take shared locks and may run concurrently with each other and
/// with insertions elsewhere in the tree.
#[derive(Debug)]
pub struct SGTree<const D: usize> {
    /// The root handle. The lock guards replacement of the root itself
    /// (first insert, growing upward); it is never held during descent.
    pub(crate) root: RwLock<Option<NodeRef<D>>>,
    pub(crate) pow: PowerTable,
    pub(crate) min_scale: AtomicI32,
    pub(crate) max_scale: AtomicI32,
    pub(crate) num_points: AtomicUsize,
    pub(crate) truncate: Option<u32>,
}

impl<const D: usize> SGTree<D> {
    /// An empty tree with the default base of 1.3.
    #[must_use]
    pub fn new() -> Self {
        SGTree {
            root: RwLock::new(None),
            pow: PowerTable::new(DEFAULT_BASE),
            min_scale: AtomicI32::new(DEFAULT_SCALE),
            max_scale: AtomicI32::new(DEFAULT_SCALE),
            num_points: AtomicUsize::new(0),
            truncate: None,
        }
    }

    /// An empty tree with a custom base. Smaller bases produce wider,
    /// shallower trees. Returns `None` unless `base > 1.0`.
    #[must_use]
    pub fn with_base(base: f64) -> Option<Self> {
        if !(base > 1.0) || !base.is_finite() {
            return None;
        }
        let mut tree = Self::new();
        tree.pow = PowerTable::new(base);
        Some(tree)
    }

    /// A tree holding a single point at the initial scale.
    #[must_use]
    pub fn with_point(point: [f64; D], uid: usize) -> Self {
        let tree = Self::new();
        tree.insert(point, uid);
        tree
    }

    /// Build a tree from a row-major point matrix with the default base,
    /// no truncation and no nested parallelism. UIDs are row indices.
    ///
    /// `workers <= 1` builds sequentially; otherwise that many worker
    /// threads insert rows concurrently into the shared tree.
    ///
    /// # Errors
    ///
    /// [`TreeError::DimensionMismatch`] if `data.len()` is not a multiple
    /// of `D`.
    pub fn from_matrix(data: &[f64], workers: usize) -> Result<Self, TreeError> {
        Self::from_matrix_with(data, DEFAULT_BASE, None, workers, false)
    }

    /// Build a tree from a row-major point matrix with full control over
    /// base, truncation level, worker count and nested parallel building.
    ///
    /// The root level is taken from the farthest row to the first row, so
    /// bulk construction never needs to grow the tree upward. When
    /// `truncate` is set, descent stops `truncate` levels below the root
    /// scale and points attach there. When `nested` is set, parallel
    /// building recursively splits the input and builds both halves in
    /// parallel; either way the total number of threads is bounded by
    /// `workers`.
    ///
    /// # Errors
    ///
    /// [`TreeError::DimensionMismatch`] on a ragged buffer,
    /// [`TreeError::InvalidBase`] unless `base > 1.0`.
    pub fn from_matrix_with(
        data: &[f64],
        base: f64,
        truncate: Option<u32>,
        workers: usize,
        nested: bool,
    ) -> Result<Self, TreeError> {
        if D == 0 || data.len() % D != 0 {
            return Err(TreeError::DimensionMismatch {
                len: data.len(),
                dim: D,
            });
        }
        let mut tree = Self::with_base(base).ok_or(TreeError::InvalidBase(base))?;
        tree.truncate = truncate;

        let mut points = Vec::with_capacity(data.len() / D);
        for row in data.chunks_exact(D) {
            let mut point = [0.0; D];
            point.copy_from_slice(row);
            points.push(point);
        }
        if points.is_empty() {
            return Ok(tree);
        }

        // Seed the root with the first row, scaled to cover every other
        // row, so parallel insertion never replaces the root.
        let first = points[0];
        let spread = points
            .iter()
            .map(|p| euclidean(&first, p))
            .fold(0.0, f64::max);
        let level = if spread > 0.0 {
            tree.pow.level_for(spread)
        } else {
            DEFAULT_SCALE
        };
        *tree.root.write() = Some(Node::new(first, level, 0, 0));
        tree.min_scale.store(level, Ordering::Relaxed);
        tree.max_scale.store(level, Ordering::Relaxed);
        tree.num_points.store(1, Ordering::Relaxed);

        let start = std::time::Instant::now();
        if workers <= 1 {
            for (uid, point) in points.iter().enumerate().skip(1) {
                tree.insert(*point, uid);
            }
        } else {
            match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
                Ok(pool) => pool.install(|| {
                    if nested {
                        Self::insert_nested(&tree, &points[1..], 1);
                    } else {
                        points
                            .par_iter()
                            .enumerate()
                            .skip(1)
                            .for_each(|(uid, point)| {
                                tree.insert(*point, uid);
                            });
                    }
                }),
                Err(e) => {
                    warn!("falling back to sequential build: {e}");
                    for (uid, point) in points.iter().enumerate().skip(1) {
                        tree.insert(*point, uid);
                    }
                }
            }
        }
        debug!(
            "built tree: {} points, dim {}, base {}, workers {}, {:?}",
            tree.len(),
            D,
            base,
            workers,
            start.elapsed()
        );
        Ok(tree)
    }

    // Divide-and-conquer insertion used when nested parallelism is
    // enabled: each half may itself split again, bounded by the pool.
    fn insert_nested(tree: &SGTree<D>, points: &[[f64; D]], uid_offset: usize) {
        if points.len() <= NESTED_CHUNK {
            for (i, point) in points.iter().enumerate() {
                tree.insert(*point, uid_offset + i);
            }
            return;
        }
        let mid = points.len() / 2;
        let (left, right) = points.split_at(mid);
        rayon::join(
            || Self::insert_nested(tree, left, uid_offset),
            || Self::insert_nested(tree, right, uid_offset + mid),
        );
    }

    /// Insert a point with a caller-chosen stable identifier.
    ///
    /// Returns `false` (and leaves the tree untouched) iff the point is
    /// already present at exactly zero distance; `true` otherwise.
    ///
    /// Safe to call from multiple threads concurrently with queries: the
    /// insertion path write-locks one node at a time, hand-over-hand.
    pub fn insert(&self, point: [f64; D], uid: usize) -> bool {
        loop {
            let root = self.root.read().clone();
            let Some(root) = root else {
                // First point: install the root under the tree lock.
                let mut guard = self.root.write();
                if guard.is_some() {
                    continue; // lost the race, retry against the new root
                }
                *guard = Some(Node::new(point, DEFAULT_SCALE, uid, 0));
                self.min_scale.store(DEFAULT_SCALE, Ordering::Relaxed);
                self.max_scale.store(DEFAULT_SCALE, Ordering::Relaxed);
                self.num_points.store(1, Ordering::Relaxed);
                return true;
            };

            let dist = root.distance_to(&point);
            if dist == 0.0 {
                return false;
            }
            if dist <= root.covdist(&self.pow) {
                return self.insert_descend(root, point, uid, dist);
            }

            // The point falls outside the root's covering radius: grow the
            // tree upward. The new point becomes the root, at the smallest
            // level whose covering distance reaches the old root.
            let mut guard = self.root.write();
            match guard.as_ref() {
                Some(current) if Arc::ptr_eq(current, &root) => {
                    let level = self.pow.level_for(dist).max(root.level() + 1);
                    let id = self.num_points.fetch_add(1, Ordering::Relaxed);
                    let new_root = Node::new(point, level, uid, id);
                    {
                        // The old root's cached bound may be raised by an
                        // insert still descending inside its subtree, so
                        // bound the new root by the old root's full
                        // covering reach instead: every present or future
                        // descendant lies within the geometric sum of
                        // covering distances below it.
                        let base = self.pow.base();
                        let reach = root.covdist(&self.pow) * base / (base - 1.0);
                        let mut state = new_root.state.write();
                        state.maxdist_ub = dist + reach;
                        state.children.push(root);
                    }
                    *guard = Some(new_root);
                    self.max_scale.fetch_max(level, Ordering::Relaxed);
                    return true;
                }
                // Another thread replaced the root first; retry from it.
                _ => continue,
            }
        }
    }

    // Hand-over-hand descent: the current node is write-locked while its
    // children are scanned or mutated. On attachment the new child's lock
    // is also taken, before the child is published to the tree.
    fn insert_descend(
        &self,
        start: NodeRef<D>,
        point: [f64; D],
        uid: usize,
        start_dist: f64,
    ) -> bool {
        let floor = self.truncation_floor();
        let mut current = start;
        let mut curr_dist = start_dist;
        loop {
            let mut state = current.state.write();

            // The new point becomes a descendant of this node, so its
            // cached bound must cover it.
            if state.maxdist_ub < curr_dist {
                state.maxdist_ub = curr_dist;
            }

            // A grown root keeps its predecessor as a child several
            // levels down, so children may sit at mixed levels: descend
            // into the nearest child whose covering radius reaches the
            // point, not merely the nearest.
            let mut descend: Option<(f64, usize)> = None;
            for (i, child) in state.children.iter().enumerate() {
                let d = child.distance_to(&point);
                if d == 0.0 {
                    return false;
                }
                let covered = d <= child.covdist(&self.pow);
                let above_floor = floor.map_or(true, |f| child.level() > f);
                if covered && above_floor && descend.map_or(true, |(best, _)| d < best) {
                    descend = Some((d, i));
                }
            }

            match descend {
                Some((d, i)) => {
                    let child = state.children[i].clone();
                    drop(state);
                    current = child;
                    curr_dist = d;
                }
                None => {
                    // No child covers the point: it becomes a new child
                    // here. Lower-level siblings inside its covering
                    // radius move under it, restoring the pairwise
                    // separation between this node's children; siblings
                    // at the new child's own level were not covering, so
                    // they are already separated.
                    let id = self.num_points.fetch_add(1, Ordering::Relaxed);
                    let child = current.child_of(point, uid, id);
                    let covdist = child.covdist(&self.pow);
                    let base = self.pow.base();
                    let mut adopted_bound: f64 = 0.0;
                    let mut i = 0;
                    while i < state.children.len() {
                        let sibling = &state.children[i];
                        let d = sibling.distance_to(&point);
                        if sibling.level() < child.level() && d <= covdist {
                            // An insert may still be descending inside
                            // the sibling's subtree, so bound the adopted
                            // subtree by the sibling's full covering
                            // reach rather than its cached bound.
                            let reach =
                                sibling.covdist(&self.pow) * base / (base - 1.0);
                            adopted_bound = adopted_bound.max(d + reach);
                            let sibling = state.children.swap_remove(i);
                            child.state.write().children.push(sibling);
                        } else {
                            i += 1;
                        }
                    }
                    if adopted_bound > 0.0 {
                        child.state.write().maxdist_ub = adopted_bound;
                    }
                    let level = child.level();
                    state.children.push(child);
                    self.min_scale.fetch_min(level, Ordering::Relaxed);
                    return true;
                }
            }
        }
    }

    /// Point removal is not supported by this structure; the call is a
    /// deterministic no-op that always reports `false`.
    pub fn remove(&self, _point: &[f64; D]) -> bool {
        false
    }

    /// Number of points held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.num_points.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A handle to the root, for external traversal and diagnostics.
    #[must_use]
    pub fn root(&self) -> Option<NodeRef<D>> {
        self.root.read().clone()
    }

    #[must_use]
    pub fn base(&self) -> f64 {
        self.pow.base()
    }

    /// Lowest level currently in use.
    #[must_use]
    pub fn min_scale(&self) -> i32 {
        self.min_scale.load(Ordering::Relaxed)
    }

    /// Highest level currently in use (the root's level).
    #[must_use]
    pub fn max_scale(&self) -> i32 {
        self.max_scale.load(Ordering::Relaxed)
    }

    pub(crate) fn truncation_floor(&self) -> Option<i32> {
        self.truncate
            .map(|t| self.max_scale.load(Ordering::Relaxed) - t as i32)
    }

    /// Recompute every node's cached descendant-distance bound as the
    /// exact maximum distance to any node in its subtree, replacing the
    /// looser bounds accumulated during insertion.
    ///
    /// This is a tightening pass only; queries are exact without it. Not
    /// intended to run concurrently with insertions.
    pub fn calc_maxdist(&self) {
        let mut nodes = Vec::new();
        let mut stack: Vec<_> = self.root().into_iter().collect();
        while let Some(node) = stack.pop() {
            nodes.push(node.clone());
            stack.extend(node.children());
        }
        for node in &nodes {
            let mut maxdist: f64 = 0.0;
            let mut subtree = node.children();
            while let Some(descendant) = subtree.pop() {
                maxdist = maxdist.max(node.distance_to_node(&descendant));
                subtree.extend(descendant.children());
            }
            node.state.write().maxdist_ub = maxdist;
        }
    }
}

impl<const D: usize> Default for SGTree<D> {
    fn default() -> Self {
        SGTree::new()
    }
}
