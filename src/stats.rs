use std::collections::BTreeMap;
use std::fmt;

use conv::ValueFrom;

use crate::tree::SGTree;

impl<const D: usize> SGTree<D> {
    /// Walk the whole tree and verify the structural invariants:
    /// every child lies within its parent's covering distance, siblings
    /// are pairwise farther apart than their parent's separating distance,
    /// and levels strictly decrease from parent to child.
    ///
    /// A `false` here is a defect in the insertion algorithm, not a user
    /// error. On a truncated tree, separation is not checked at or below
    /// the truncation floor, where it is deliberately relaxed.
    #[must_use]
    pub fn check_covering(&self) -> bool {
        let Some(root) = self.root() else {
            return true;
        };
        let floor = self.truncation_floor();
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            let children = node.children();
            let covdist = node.covdist(&self.pow);
            let sepdist = node.sepdist(&self.pow);
            for child in &children {
                if child.level() >= node.level() {
                    return false;
                }
                if node.distance_to_node(child) > covdist {
                    return false;
                }
            }
            let check_separation = floor.map_or(true, |f| node.level() - 1 > f);
            if check_separation {
                for (i, a) in children.iter().enumerate() {
                    for b in &children[i + 1..] {
                        if a.distance_to_node(b) <= sepdist {
                            return false;
                        }
                    }
                }
            }
            stack.extend(children);
        }
        true
    }

    /// Number of nodes per level, lowest level first.
    #[must_use]
    pub fn level_histogram(&self) -> BTreeMap<i32, usize> {
        let mut histogram = BTreeMap::new();
        let mut stack: Vec<_> = self.root().into_iter().collect();
        while let Some(node) = stack.pop() {
            *histogram.entry(node.level()).or_insert(0) += 1;
            stack.extend(node.children());
        }
        histogram
    }

    /// Number of nodes per child count.
    #[must_use]
    pub fn degree_histogram(&self) -> BTreeMap<usize, usize> {
        let mut histogram = BTreeMap::new();
        let mut stack: Vec<_> = self.root().into_iter().collect();
        while let Some(node) = stack.pop() {
            let children = node.children();
            *histogram.entry(children.len()).or_insert(0) += 1;
            stack.extend(children);
        }
        histogram
    }
}

impl<const D: usize> fmt::Display for SGTree<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let degrees = self.degree_histogram();
        let internal: usize = degrees
            .iter()
            .filter(|(degree, _)| **degree > 0)
            .map(|(_, count)| count)
            .sum();
        let edges: usize = degrees
            .iter()
            .map(|(degree, count)| degree * count)
            .sum();
        let avg_degree = match (f64::value_from(edges), f64::value_from(internal)) {
            (Ok(e), Ok(n)) if n > 0.0 => e / n,
            _ => 0.0,
        };
        write!(
            f,
            "SGTree [points: {}, dim: {}, base: {}, levels: {}..{}, avg fanout: {:.2}]",
            self.len(),
            D,
            self.base(),
            self.min_scale(),
            self.max_scale(),
            avg_degree
        )
    }
}

#[cfg(test)]
mod tests {
    use super::SGTree;

    #[test]
    fn empty_tree_trivially_covers() {
        let tree: SGTree<2> = SGTree::new();
        assert!(tree.check_covering());
        assert!(tree.level_histogram().is_empty());
        assert!(tree.degree_histogram().is_empty());
    }

    #[test]
    fn histograms_account_for_every_node() {
        let data: Vec<f64> = (0..120).map(|i| f64::from(i * 31 % 97)).collect();
        let tree = SGTree::<2>::from_matrix(&data, 1).unwrap();
        assert!(tree.check_covering());

        let levels: usize = tree.level_histogram().values().sum();
        let degrees: usize = tree.degree_histogram().values().sum();
        assert_eq!(levels, tree.len());
        assert_eq!(degrees, tree.len());

        // The root level is the highest occupied one.
        let top = *tree.level_histogram().keys().next_back().unwrap();
        assert_eq!(top, tree.root().unwrap().level());
    }

    #[test]
    fn display_summarizes_the_tree() {
        let tree = SGTree::<2>::with_point([1.0, 2.0], 0);
        let line = tree.to_string();
        assert!(line.contains("points: 1"));
        assert!(line.contains("dim: 2"));
        assert!(line.contains("base: 1.3"));
    }
}
