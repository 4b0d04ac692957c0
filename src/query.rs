use std::collections::BinaryHeap;

use ordered_float::OrderedFloat;

use crate::node::NodeRef;
use crate::tree::SGTree;

/// Max-heap entry for the bounded k-nearest heap.
///
/// Ordering is `(distance, traversal sequence)`: among equal distances the
/// later-visited node is popped first, so ties at the k-th slot break by
/// traversal order, deterministically for a fixed tree.
struct Neighbor<const D: usize> {
    dist: OrderedFloat<f64>,
    seq: usize,
    node: NodeRef<D>,
}

impl<const D: usize> PartialEq for Neighbor<D> {
    fn eq(&self, other: &Self) -> bool {
        self.dist == other.dist && self.seq == other.seq
    }
}

impl<const D: usize> Eq for Neighbor<D> {}

impl<const D: usize> PartialOrd for Neighbor<D> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<const D: usize> Ord for Neighbor<D> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.dist, self.seq).cmp(&(other.dist, other.seq))
    }
}

/// A subtree under consideration by the beam search, keyed by the lower
/// bound on any distance inside it.
struct BeamEntry<const D: usize> {
    lower: OrderedFloat<f64>,
    seq: usize,
    dist: f64,
    node: NodeRef<D>,
}

impl<const D: usize> SGTree<D> {
    // Snapshot of a node's children with their distances to the query and
    // their cached descendant bounds. The parent's read lock is released
    // before any child lock is taken.
    fn child_candidates(node: &NodeRef<D>, point: &[f64; D]) -> Vec<(f64, f64, NodeRef<D>)> {
        node.children()
            .into_iter()
            .map(|child| {
                let dist = child.distance_to(point);
                let ub = child.maxdist_ub();
                (dist, ub, child)
            })
            .collect()
    }

    /// The closest point in the tree to `point`, with its distance.
    /// `None` on an empty tree.
    #[must_use]
    pub fn nearest_neighbour(&self, point: &[f64; D]) -> Option<(NodeRef<D>, f64)> {
        let root = self.root()?;
        let mut best = (root.clone(), root.distance_to(point));
        Self::nearest_descend(&root, point, &mut best, &mut None);
        Some(best)
    }

    /// Like [`nearest_neighbour`](SGTree::nearest_neighbour), additionally
    /// recording one `(level, subtrees-explored)` pair per expanded node,
    /// in expansion order, for diagnostic replay.
    #[must_use]
    pub fn nearest_neighbour_traced(
        &self,
        point: &[f64; D],
    ) -> Option<(NodeRef<D>, f64, Vec<(i32, usize)>)> {
        let root = self.root()?;
        let mut best = (root.clone(), root.distance_to(point));
        let mut trace = Vec::new();
        Self::nearest_descend(&root, point, &mut best, &mut Some(&mut trace));
        Some((best.0, best.1, trace))
    }

    fn nearest_descend(
        node: &NodeRef<D>,
        point: &[f64; D],
        best: &mut (NodeRef<D>, f64),
        trace: &mut Option<&mut Vec<(i32, usize)>>,
    ) {
        let mut candidates = Self::child_candidates(node, point);
        candidates.sort_by_key(|(dist, _, _)| OrderedFloat(*dist));
        for (dist, _, child) in &candidates {
            if *dist < best.1 {
                *best = (child.clone(), *dist);
            }
        }
        // A subtree is worth entering only if some descendant could still
        // beat the best found so far.
        candidates.retain(|(dist, ub, _)| dist - ub < best.1);
        if let Some(trace) = trace.as_mut() {
            trace.push((node.level(), candidates.len()));
        }
        for (dist, ub, child) in candidates {
            if dist - ub >= best.1 {
                continue; // the best improved since the retain pass
            }
            Self::nearest_descend(&child, point, best, trace);
        }
    }

    /// The `min(k, N)` closest points to `point`, in ascending distance
    /// order. Ties at the k-th slot break by traversal order.
    #[must_use]
    pub fn k_nearest_neighbours(&self, point: &[f64; D], k: usize) -> Vec<(NodeRef<D>, f64)> {
        let (Some(root), true) = (self.root(), k > 0) else {
            return Vec::new();
        };
        let mut heap: BinaryHeap<Neighbor<D>> = BinaryHeap::new();
        let mut seq = 0;
        let dist = root.distance_to(point);
        Self::knn_descend(&root, dist, point, k, &mut heap, &mut seq);
        Self::drain_ascending(heap)
    }

    fn knn_descend(
        node: &NodeRef<D>,
        dist: f64,
        point: &[f64; D],
        k: usize,
        heap: &mut BinaryHeap<Neighbor<D>>,
        seq: &mut usize,
    ) {
        Self::offer(heap, k, node.clone(), dist, seq);
        let mut candidates = Self::child_candidates(node, point);
        candidates.sort_by_key(|(d, _, _)| OrderedFloat(*d));
        for (d, ub, child) in candidates {
            if heap.len() == k && OrderedFloat(d - ub) >= Self::kth(heap) {
                continue;
            }
            Self::knn_descend(&child, d, point, k, heap, seq);
        }
    }

    /// Approximate k-nearest: the same pruning as the exact query, but the
    /// frontier of subtrees under simultaneous consideration is capped at
    /// `beam_size`; the least promising candidates (largest lower bound)
    /// are dropped when it overflows. Never returns more than `num_nbrs`
    /// results; may miss true neighbors — that inexactness is the
    /// contract, traded for bounded work.
    #[must_use]
    pub fn k_nearest_neighbours_beam(
        &self,
        point: &[f64; D],
        num_nbrs: usize,
        beam_size: usize,
    ) -> Vec<(NodeRef<D>, f64)> {
        let (Some(root), true) = (self.root(), num_nbrs > 0 && beam_size > 0) else {
            return Vec::new();
        };
        let mut heap: BinaryHeap<Neighbor<D>> = BinaryHeap::new();
        let mut result_seq = 0;
        let mut beam_seq = 0;
        let dist = root.distance_to(point);
        let ub = root.maxdist_ub();

        // Kept sorted descending by (lower bound, seq): the most promising
        // entry is popped from the back; overflow drops from the front.
        let mut frontier = vec![BeamEntry {
            lower: OrderedFloat(dist - ub),
            seq: beam_seq,
            dist,
            node: root,
        }];
        while let Some(entry) = frontier.pop() {
            if heap.len() == num_nbrs && entry.lower >= Self::kth(&heap) {
                break; // every remaining entry has a larger lower bound
            }
            Self::offer(&mut heap, num_nbrs, entry.node.clone(), entry.dist, &mut result_seq);
            for (d, ub, child) in Self::child_candidates(&entry.node, point) {
                beam_seq += 1;
                frontier.push(BeamEntry {
                    lower: OrderedFloat(d - ub),
                    seq: beam_seq,
                    dist: d,
                    node: child,
                });
            }
            frontier.sort_by(|a, b| (b.lower, b.seq).cmp(&(a.lower, a.seq)));
            if frontier.len() > beam_size {
                frontier.drain(..frontier.len() - beam_size);
            }
        }
        Self::drain_ascending(heap)
    }

    /// All points within `range` of `point`, with their distances, in no
    /// particular order. Result count is unbounded.
    #[must_use]
    pub fn range_neighbours(&self, point: &[f64; D], range: f64) -> Vec<(NodeRef<D>, f64)> {
        let Some(root) = self.root() else {
            return Vec::new();
        };
        let mut result = Vec::new();
        let dist = root.distance_to(point);
        let mut stack = vec![(root, dist)];
        while let Some((node, dist)) = stack.pop() {
            if dist <= range {
                result.push((node.clone(), dist));
            }
            for (d, ub, child) in Self::child_candidates(&node, point) {
                if d - ub <= range {
                    stack.push((child, d));
                }
            }
        }
        result
    }

    /// The farthest point in the tree from `point`, with its distance.
    /// `None` on an empty tree.
    #[must_use]
    pub fn furthest_neighbour(&self, point: &[f64; D]) -> Option<(NodeRef<D>, f64)> {
        let root = self.root()?;
        let mut best = (root.clone(), root.distance_to(point));
        Self::furthest_descend(&root, point, &mut best);
        Some(best)
    }

    fn furthest_descend(node: &NodeRef<D>, point: &[f64; D], best: &mut (NodeRef<D>, f64)) {
        let mut candidates = Self::child_candidates(node, point);
        // Farthest-first: the upper bound is what a subtree could attain.
        candidates.sort_by_key(|(dist, ub, _)| std::cmp::Reverse(OrderedFloat(dist + ub)));
        for (dist, _, child) in &candidates {
            if *dist > best.1 {
                *best = (child.clone(), *dist);
            }
        }
        for (dist, ub, child) in candidates {
            if dist + ub <= best.1 {
                continue; // nothing below can beat the best
            }
            Self::furthest_descend(&child, point, best);
        }
    }

    /// Greedily pick up to `num` spread-out points: starting from the
    /// root's point, repeatedly add the point farthest from all points
    /// chosen so far. Returns their UIDs.
    #[must_use]
    pub fn best_initial_points(&self, num: usize) -> Vec<usize> {
        let (Some(root), true) = (self.root(), num > 0) else {
            return Vec::new();
        };
        let mut all = Vec::new();
        let mut stack = vec![root.clone()];
        while let Some(node) = stack.pop() {
            all.push(node.clone());
            stack.extend(node.children());
        }
        let mut chosen = vec![root.clone()];
        let mut nearest_chosen: Vec<f64> =
            all.iter().map(|n| n.distance_to_node(&root)).collect();
        while chosen.len() < num.min(all.len()) {
            let (far, _) = all
                .iter()
                .zip(nearest_chosen.iter())
                .max_by_key(|(_, d)| OrderedFloat(**d))
                .map(|(n, d)| (n.clone(), *d))
                .unwrap_or((root.clone(), 0.0));
            for (node, d) in all.iter().zip(nearest_chosen.iter_mut()) {
                *d = d.min(node.distance_to_node(&far));
            }
            chosen.push(far);
        }
        chosen.into_iter().map(|n| n.uid()).collect()
    }

    fn offer(heap: &mut BinaryHeap<Neighbor<D>>, k: usize, node: NodeRef<D>, dist: f64, seq: &mut usize) {
        heap.push(Neighbor {
            dist: OrderedFloat(dist),
            seq: *seq,
            node,
        });
        *seq += 1;
        if heap.len() > k {
            heap.pop();
        }
    }

    fn kth(heap: &BinaryHeap<Neighbor<D>>) -> OrderedFloat<f64> {
        heap.peek()
            .map_or(OrderedFloat(f64::INFINITY), |worst| worst.dist)
    }

    fn drain_ascending(heap: BinaryHeap<Neighbor<D>>) -> Vec<(NodeRef<D>, f64)> {
        heap.into_sorted_vec()
            .into_iter()
            .map(|n| (n.node, n.dist.0))
            .collect()
    }
}
