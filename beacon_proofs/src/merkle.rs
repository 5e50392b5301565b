//! SSZ merkleization over 32-byte chunks.
//!
//! Trees are always padded to a fixed depth with zero subtrees, so a list with a limit of
//! 2^40 entries only costs as much as the entries actually present.

use alloy_primitives::B256;
use lazy_static::lazy_static;
use sha2::{Digest, Sha256};

pub const MAX_TREE_DEPTH: usize = 64;

lazy_static! {
    /// `ZERO_HASHES[d]` is the root of a depth `d` tree of zero chunks.
    pub static ref ZERO_HASHES: Vec<B256> = {
        let mut hashes = vec![B256::ZERO; MAX_TREE_DEPTH + 1];
        for i in 0..MAX_TREE_DEPTH {
            hashes[i + 1] = hash_pair(&hashes[i], &hashes[i]);
        }
        hashes
    };
}

pub fn hash_pair(left: &B256, right: &B256) -> B256 {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    B256::from_slice(&hasher.finalize())
}

pub fn uint_leaf(value: u64) -> B256 {
    let mut chunk = [0u8; 32];
    chunk[..8].copy_from_slice(&value.to_le_bytes());
    B256::from(chunk)
}

pub fn bool_leaf(value: bool) -> B256 {
    uint_leaf(value as u64)
}

pub fn mix_in_length(root: &B256, length: usize) -> B256 {
    hash_pair(root, &uint_leaf(length as u64))
}

/// Depth of the smallest tree holding `count` leaves.
pub fn tree_depth(count: usize) -> usize {
    count.next_power_of_two().trailing_zeros() as usize
}

fn build_layers(leaves: Vec<B256>, depth: usize) -> Vec<Vec<B256>> {
    let mut layers = Vec::with_capacity(depth + 1);
    layers.push(leaves);
    for level in 0..depth {
        let next = layers[level]
            .chunks(2)
            .map(|pair| hash_pair(&pair[0], pair.get(1).unwrap_or(&ZERO_HASHES[level])))
            .collect::<Vec<_>>();
        layers.push(next);
    }
    layers
}

/// Root of a fixed-size container whose fields are already reduced to chunks.
pub fn container_root(leaves: &[B256]) -> B256 {
    let depth = tree_depth(leaves.len());
    build_layers(leaves.to_vec(), depth)[depth]
        .first()
        .copied()
        .unwrap_or(ZERO_HASHES[depth])
}

pub struct MerkleTree {
    layers: Vec<Vec<B256>>,
    depth: usize,
}

impl MerkleTree {
    pub fn new(leaves: Vec<B256>, depth: usize) -> Result<Self, String> {
        if depth > MAX_TREE_DEPTH {
            return Err(format!("tree depth {} exceeds {}", depth, MAX_TREE_DEPTH));
        }
        if depth < MAX_TREE_DEPTH && leaves.len() as u128 > 1u128 << depth {
            return Err(format!(
                "{} leaves do not fit in a tree of depth {}",
                leaves.len(),
                depth
            ));
        }
        Ok(Self {
            layers: build_layers(leaves, depth),
            depth,
        })
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn leaf_count(&self) -> usize {
        self.layers[0].len()
    }

    pub fn root(&self) -> B256 {
        self.layers[self.depth]
            .first()
            .copied()
            .unwrap_or(ZERO_HASHES[self.depth])
    }

    /// Sibling chunks from leaf `index` up to (excluding) the root.
    pub fn proof(&self, index: usize) -> Result<Vec<B256>, String> {
        if index >= self.leaf_count() {
            return Err(format!(
                "leaf {} out of range ({} leaves)",
                index,
                self.leaf_count()
            ));
        }
        let mut position = index;
        let mut branch = Vec::with_capacity(self.depth);
        for level in 0..self.depth {
            let sibling = self.layers[level]
                .get(position ^ 1)
                .copied()
                .unwrap_or(ZERO_HASHES[level]);
            branch.push(sibling);
            position /= 2;
        }
        Ok(branch)
    }
}

/// Number of edges between a generalized index and the root.
pub fn gindex_depth(gindex: u128) -> usize {
    if gindex == 0 {
        return 0;
    }
    (127 - gindex.leading_zeros()) as usize
}

pub fn leaf_gindex(depth: usize, index: u64) -> u128 {
    (1u128 << depth) | index as u128
}

/// Generalized index of `inner` (relative to the subtree rooted at `outer`) in the outer tree.
pub fn concat_gindices(outer: u128, inner: u128) -> u128 {
    let depth = gindex_depth(inner);
    (outer << depth) | (inner - (1u128 << depth))
}

pub fn compute_root(leaf: &B256, branch: &[B256], gindex: u128) -> B256 {
    let mut node = *leaf;
    for (level, sibling) in branch.iter().enumerate() {
        node = if (gindex >> level) & 1 == 1 {
            hash_pair(sibling, &node)
        } else {
            hash_pair(&node, sibling)
        };
    }
    node
}

pub fn verify_branch(leaf: &B256, branch: &[B256], gindex: u128, root: &B256) -> bool {
    gindex_depth(gindex) == branch.len() && compute_root(leaf, branch, gindex) == *root
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    fn chunk(n: u8) -> B256 {
        B256::repeat_byte(n)
    }

    #[test]
    fn zero_hashes_chain() {
        assert_eq!(ZERO_HASHES[0], B256::ZERO);
        assert_eq!(ZERO_HASHES[1], hash_pair(&B256::ZERO, &B256::ZERO));
        assert_eq!(ZERO_HASHES[3], hash_pair(&ZERO_HASHES[2], &ZERO_HASHES[2]));
    }

    #[test]
    fn sparse_tree_matches_explicit_padding() {
        let leaves = vec![chunk(1), chunk(2), chunk(3)];
        let mut padded = leaves.clone();
        padded.resize(16, B256::ZERO);
        let sparse = MerkleTree::new(leaves, 4).unwrap();
        let full = MerkleTree::new(padded, 4).unwrap();
        assert_eq!(sparse.root(), full.root());
        assert_eq!(sparse.proof(2).unwrap(), full.proof(2).unwrap());
    }

    #[test]
    fn empty_tree_is_zero_subtree() {
        let tree = MerkleTree::new(vec![], 10).unwrap();
        assert_eq!(tree.root(), ZERO_HASHES[10]);
        assert!(tree.proof(0).is_err());
    }

    #[test]
    fn rejects_overfull_tree() {
        assert!(MerkleTree::new(vec![chunk(1); 5], 2).is_err());
    }

    #[test]
    fn container_root_of_two_is_pair_hash() {
        assert_eq!(
            container_root(&[chunk(7), chunk(9)]),
            hash_pair(&chunk(7), &chunk(9))
        );
    }

    #[test]
    fn gindex_concatenation() {
        // field 3 of an 8-field container, then element 5 of a depth 2 subtree
        let outer = leaf_gindex(3, 3);
        let inner = leaf_gindex(2, 1);
        assert_eq!(concat_gindices(outer, inner), 0b1011_01);
        assert_eq!(gindex_depth(concat_gindices(outer, inner)), 5);
    }

    #[test]
    fn nested_proof_verifies_with_concatenated_gindex() {
        let inner = MerkleTree::new((0..5).map(chunk).collect(), 3).unwrap();
        let mut outer_leaves = vec![chunk(100), chunk(101), chunk(102), chunk(103)];
        outer_leaves[2] = inner.root();
        let outer = MerkleTree::new(outer_leaves, 2).unwrap();

        let mut branch = inner.proof(4).unwrap();
        branch.extend(outer.proof(2).unwrap());
        let gindex = concat_gindices(leaf_gindex(2, 2), leaf_gindex(3, 4));
        assert!(verify_branch(&chunk(4), &branch, gindex, &outer.root()));
        assert!(!verify_branch(&chunk(5), &branch, gindex, &outer.root()));
    }

    #[quickcheck]
    fn every_leaf_proof_verifies(count: u8, pick: u8) -> bool {
        let count = count as usize % 40 + 1;
        let index = pick as usize % count;
        let leaves = (0..count).map(|i| uint_leaf(i as u64 * 31 + 7)).collect::<Vec<_>>();
        let tree = MerkleTree::new(leaves.clone(), 8).unwrap();
        let branch = tree.proof(index).unwrap();
        verify_branch(&leaves[index], &branch, leaf_gindex(8, index as u64), &tree.root())
    }
}
