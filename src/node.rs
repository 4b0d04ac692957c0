use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::distance::euclidean;
use crate::pow_table::PowerTable;

/// Shared handle to a tree vertex.
///
/// Queries hand these out as results; holding one keeps the node (and its
/// subtree) alive independently of the tree's locks.
pub type NodeRef<const D: usize> = Arc<Node<D>>;

/// The mutable part of a node, guarded by the node's reader/writer lock.
#[derive(Debug)]
pub(crate) struct NodeState<const D: usize> {
    /// Owned children. Order is not semantically meaningful; callers must
    /// not depend on it.
    pub(crate) children: Vec<NodeRef<D>>,
    /// Cached upper bound on the distance from this node to any of its
    /// descendants. Insertion keeps it valid (never too small); a separate
    /// full-tree pass tightens it.
    pub(crate) maxdist_ub: f64,
}

/// A vertex of the cover tree: one point, a level, and a lock-guarded list
/// of children.
///
/// `point`, `level` and `uid` never change after creation. The internal
/// `id` is a reassignable position key (the serializer rewrites it); `uid`
/// is the caller's stable handle to the point.
#[derive(Debug)]
pub struct Node<const D: usize> {
    point: [f64; D],
    level: i32,
    uid: usize,
    id: AtomicUsize,
    pub(crate) state: RwLock<NodeState<D>>,
}

impl<const D: usize> Node<D> {
    pub(crate) fn new(point: [f64; D], level: i32, uid: usize, id: usize) -> NodeRef<D> {
        Arc::new(Node {
            point,
            level,
            uid,
            id: AtomicUsize::new(id),
            state: RwLock::new(NodeState {
                children: Vec::new(),
                maxdist_ub: 0.0,
            }),
        })
    }

    /// Allocate a new child node one level below this one, with a zeroed
    /// distance bound. The caller appends it to the children list it holds
    /// a write lock on.
    pub(crate) fn child_of(&self, point: [f64; D], uid: usize, id: usize) -> NodeRef<D> {
        Node::new(point, self.level - 1, uid, id)
    }

    #[must_use]
    pub fn point(&self) -> &[f64; D] {
        &self.point
    }

    #[must_use]
    pub fn level(&self) -> i32 {
        self.level
    }

    /// The caller-supplied stable identifier of this point.
    #[must_use]
    pub fn uid(&self) -> usize {
        self.uid
    }

    /// The internal, reassignable identifier.
    #[must_use]
    pub fn id(&self) -> usize {
        self.id.load(Ordering::Relaxed)
    }

    pub(crate) fn set_id(&self, id: usize) {
        self.id.store(id, Ordering::Relaxed);
    }

    /// L2 distance from this node's point to `point`.
    #[must_use]
    pub fn distance_to(&self, point: &[f64; D]) -> f64 {
        euclidean(&self.point, point)
    }

    /// L2 distance from this node's point to another node's point.
    #[must_use]
    pub fn distance_to_node(&self, other: &Node<D>) -> f64 {
        euclidean(&self.point, &other.point)
    }

    /// Covering distance of the subtree at this node: children lie within
    /// `base^level` of it.
    #[must_use]
    pub fn covdist(&self, pow: &PowerTable) -> f64 {
        pow.covering_distance(self.level)
    }

    /// Separating distance between this node's children.
    #[must_use]
    pub fn sepdist(&self, pow: &PowerTable) -> f64 {
        pow.separating_distance(self.level)
    }

    /// Current upper bound on the distance to any descendant.
    #[must_use]
    pub fn maxdist_ub(&self) -> f64 {
        self.state.read().maxdist_ub
    }

    /// Snapshot of the children at the instant of the call. Taken under
    /// the node's read lock; the returned handles stay valid regardless of
    /// later mutation. Order is unspecified.
    #[must_use]
    pub fn children(&self) -> Vec<NodeRef<D>> {
        self.state.read().children.clone()
    }

    #[must_use]
    pub fn num_children(&self) -> usize {
        self.state.read().children.len()
    }
}
