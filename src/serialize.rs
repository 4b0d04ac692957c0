//! Binary tree serialization.
//!
//! # Layout (little-endian)
//!
//! ```text
//! [Header] [Pre-order segment] [Post-order segment]
//! ```
//!
//! Header (28 bytes):
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0-3    | 4    | magic: u32 "SGTR" |
//! | 4-7    | 4    | dim: u32 |
//! | 8-15   | 8    | node_count: u64 |
//! | 16-23  | 8    | base: f64 |
//! | 24-27  | 4    | truncate: u32, `u32::MAX` when unset |
//!
//! Pre-order segment, one record per node in pre-order:
//! point (`dim` × f64), level (i32), uid (u64), maxdist_ub (f64).
//!
//! Post-order segment, one record per node in post-order:
//! id (u32, the node's pre-order index), child count (u32).
//!
//! The pre-order stream alone fixes every node; the post-order records fix
//! the tree shape: a subtree is closed exactly when the next unread post
//! record names the node currently being rebuilt.

use std::sync::atomic::Ordering;

use crate::error::TreeError;
use crate::node::{Node, NodeRef};
use crate::tree::SGTree;

/// Serialization magic, "SGTR" in little-endian.
const MAGIC: u32 = u32::from_le_bytes(*b"SGTR");

/// Size of the fixed header in bytes.
const HEADER_SIZE: usize = 28;

/// Header value for a tree without a truncation level.
const NO_TRUNCATION: u32 = u32::MAX;

/// Bytes of one pre-order record beyond the point coordinates.
const PRE_FIXED: usize = 4 + 8 + 8;

/// Bytes of one post-order record.
const POST_SIZE: usize = 8;

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Reader<'a> {
        Reader { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], TreeError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.buf.len())
            .ok_or(TreeError::Malformed("segment cursor out of bounds"))?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn read_u32(&mut self) -> Result<u32, TreeError> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(raw))
    }

    fn read_i32(&mut self) -> Result<i32, TreeError> {
        Ok(self.read_u32()? as i32)
    }

    fn read_u64(&mut self) -> Result<u64, TreeError> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(raw))
    }

    fn read_f64(&mut self) -> Result<f64, TreeError> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    fn peek_u32(&self) -> Result<u32, TreeError> {
        let end = self.pos + 4;
        if end > self.buf.len() {
            return Err(TreeError::Malformed("post-order segment exhausted"));
        }
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.buf[self.pos..end]);
        Ok(u32::from_le_bytes(raw))
    }

    fn exhausted(&self) -> bool {
        self.pos == self.buf.len()
    }
}

impl<const D: usize> SGTree<D> {
    /// Exact byte length [`serialize`](SGTree::serialize) will produce for
    /// the current tree, so callers can pre-allocate.
    #[must_use]
    pub fn msg_size(&self) -> usize {
        let n = self.len();
        HEADER_SIZE + n * (D * 8 + PRE_FIXED) + n * POST_SIZE
    }

    /// Encode the whole tree to a byte buffer.
    ///
    /// Reassigns every node's internal id to its pre-order index. The tree
    /// must not be mutated while it is being serialized.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.msg_size());
        buf.extend_from_slice(&MAGIC.to_le_bytes());
        buf.extend_from_slice(&(D as u32).to_le_bytes());
        buf.extend_from_slice(&(self.len() as u64).to_le_bytes());
        buf.extend_from_slice(&self.base().to_bits().to_le_bytes());
        buf.extend_from_slice(&self.truncate.unwrap_or(NO_TRUNCATION).to_le_bytes());
        if let Some(root) = self.root() {
            let mut next_id = 0;
            Self::preorder_pack(&mut buf, &root, &mut next_id);
            Self::postorder_pack(&mut buf, &root);
        }
        debug_assert_eq!(buf.len(), self.msg_size());
        buf
    }

    fn preorder_pack(buf: &mut Vec<u8>, node: &NodeRef<D>, next_id: &mut usize) {
        node.set_id(*next_id);
        *next_id += 1;
        for x in node.point() {
            buf.extend_from_slice(&x.to_bits().to_le_bytes());
        }
        buf.extend_from_slice(&node.level().to_le_bytes());
        buf.extend_from_slice(&(node.uid() as u64).to_le_bytes());
        buf.extend_from_slice(&node.maxdist_ub().to_bits().to_le_bytes());
        for child in node.children() {
            Self::preorder_pack(buf, &child, next_id);
        }
    }

    fn postorder_pack(buf: &mut Vec<u8>, node: &NodeRef<D>) {
        let children = node.children();
        for child in &children {
            Self::postorder_pack(buf, child);
        }
        buf.extend_from_slice(&(node.id() as u32).to_le_bytes());
        buf.extend_from_slice(&(children.len() as u32).to_le_bytes());
    }

    /// Rebuild a tree from a buffer produced by
    /// [`serialize`](SGTree::serialize) for the same dimension.
    ///
    /// The buffer is validated up front (magic, dimension, exact length)
    /// and structurally during replay; any inconsistency is a
    /// [`TreeError`], never a malformed tree.
    ///
    /// # Errors
    ///
    /// See [`TreeError`].
    pub fn deserialize(buf: &[u8]) -> Result<SGTree<D>, TreeError> {
        if buf.len() < HEADER_SIZE {
            return Err(TreeError::BufferSize {
                expected: HEADER_SIZE,
                got: buf.len(),
            });
        }
        let mut header = Reader::new(&buf[..HEADER_SIZE]);
        if header.read_u32()? != MAGIC {
            return Err(TreeError::BadMagic);
        }
        let dim = header.read_u32()? as usize;
        if dim != D {
            return Err(TreeError::WrongDimension {
                expected: D,
                got: dim,
            });
        }
        let node_count = usize::try_from(header.read_u64()?)
            .map_err(|_| TreeError::Malformed("node count does not fit in usize"))?;
        let base = header.read_f64()?;
        let truncate = header.read_u32()?;

        let pre_len = node_count
            .checked_mul(D * 8 + PRE_FIXED)
            .ok_or(TreeError::Malformed("node count overflows buffer size"))?;
        let expected = HEADER_SIZE + pre_len + node_count * POST_SIZE;
        if buf.len() != expected {
            return Err(TreeError::BufferSize {
                expected,
                got: buf.len(),
            });
        }

        let mut tree = SGTree::<D>::with_base(base)
            .ok_or(TreeError::Malformed("base is not greater than 1.0"))?;
        tree.truncate = (truncate != NO_TRUNCATION).then_some(truncate);
        if node_count == 0 {
            return Ok(tree);
        }

        let mut pre = Reader::new(&buf[HEADER_SIZE..HEADER_SIZE + pre_len]);
        let mut post = Reader::new(&buf[HEADER_SIZE + pre_len..]);
        let mut next_id = 0;
        let mut min_scale = i32::MAX;
        let root = Self::unpack(&mut pre, &mut post, &mut next_id, &mut min_scale)?;
        if !pre.exhausted() || !post.exhausted() {
            return Err(TreeError::Malformed("dangling nodes after the root subtree"));
        }

        *tree.root.write() = Some(root.clone());
        tree.num_points.store(node_count, Ordering::Relaxed);
        tree.min_scale.store(min_scale, Ordering::Relaxed);
        tree.max_scale.store(root.level(), Ordering::Relaxed);
        Ok(tree)
    }

    // Replays one pre-order record, then keeps building children from the
    // pre-order cursor until the next post-order record closes this node.
    fn unpack(
        pre: &mut Reader<'_>,
        post: &mut Reader<'_>,
        next_id: &mut usize,
        min_scale: &mut i32,
    ) -> Result<NodeRef<D>, TreeError> {
        let mut point = [0.0; D];
        for x in &mut point {
            *x = pre.read_f64()?;
        }
        let level = pre.read_i32()?;
        let uid = usize::try_from(pre.read_u64()?)
            .map_err(|_| TreeError::Malformed("uid does not fit in usize"))?;
        let maxdist_ub = pre.read_f64()?;
        let id = *next_id;
        *next_id += 1;
        *min_scale = (*min_scale).min(level);

        let mut children = Vec::new();
        loop {
            if post.peek_u32()? as usize == id {
                let _ = post.read_u32()?;
                let count = post.read_u32()? as usize;
                if count != children.len() {
                    return Err(TreeError::Malformed("child count mismatch"));
                }
                let node = Node::new(point, level, uid, id);
                {
                    let mut state = node.state.write();
                    state.children = children;
                    state.maxdist_ub = maxdist_ub;
                }
                return Ok(node);
            }
            if pre.exhausted() {
                return Err(TreeError::Malformed("pre-order segment exhausted"));
            }
            children.push(Self::unpack(pre, post, next_id, min_scale)?);
        }
    }
}
