//! A concurrent cover tree (SG-tree) for metric-space search.
//!
//! The tree indexes points in a fixed-dimension real vector space and
//! supports exact nearest, k-nearest, range and furthest neighbor queries,
//! a beam-bounded approximate k-nearest query, incremental insertion that
//! may run concurrently with queries, and binary serialization.
//!
//! The structure is controlled by a single parameter, the `base` (default
//! 1.3): every node sits at an integer level, children of a node at level
//! `l` lie within `base^l` of it, and siblings at level `l` are pairwise
//! farther apart than `base^l`. Smaller bases produce wider, shallower
//! trees.
//!
//! ```
//! use sgtree::SGTree;
//!
//! let tree: SGTree<2> = SGTree::new();
//! tree.insert([0.0, 0.0], 1);
//! tree.insert([1.0, 0.0], 2);
//! tree.insert([5.0, 5.0], 3);
//!
//! let (nearest, dist) = tree.nearest_neighbour(&[0.9, 0.1]).unwrap();
//! assert_eq!(nearest.uid(), 2);
//! assert!(dist < 0.5);
//! ```

mod distance;
mod error;
mod node;
mod pow_table;
mod query;
mod serialize;
mod stats;
mod tree;

pub use error::TreeError;
pub use node::{Node, NodeRef};
pub use tree::SGTree;
