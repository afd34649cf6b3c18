//! Merkle commitment over the ledger's leaf sequence
//!
//! # Design
//!
//! - Binary Merkle tree with SHA-256 hashing
//! - Parent = SHA-256(left || right), raw 32-byte halves, no separator
//! - Odd levels duplicate their last node (no leaf is dropped)
//! - Empty sequence commits to [`EMPTY_ROOT`], the SHA-256 of the empty string
//! - A single leaf is its own root
//!
//! Everything here is a pure function of the leaf slice, so concurrent
//! readers working on the same snapshot always agree.

use crate::{Error, Result};
use sha2::{Digest, Sha256};

/// Root of an empty leaf sequence: SHA-256("")
pub const EMPTY_ROOT: [u8; 32] = [
    0xe3, 0xb0, 0xc4, 0x42, 0x98, 0xfc, 0x1c, 0x14, 0x9a, 0xfb, 0xf4, 0xc8, 0x99, 0x6f, 0xb9, 0x24,
    0x27, 0xae, 0x41, 0xe4, 0x64, 0x9b, 0x93, 0x4c, 0xa4, 0x95, 0x99, 0x1b, 0x78, 0x52, 0xb8, 0x55,
];

/// Hash a pair of nodes
pub fn hash_pair(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// One level up: pair adjacent nodes, duplicating the last on odd counts
fn next_level(level: &[[u8; 32]]) -> Vec<[u8; 32]> {
    level
        .chunks(2)
        .map(|pair| {
            let left = &pair[0];
            let right = pair.get(1).unwrap_or(left);
            hash_pair(left, right)
        })
        .collect()
}

/// Compute the Merkle root of an ordered leaf sequence
pub fn merkle_root(leaves: &[[u8; 32]]) -> [u8; 32] {
    match leaves {
        [] => EMPTY_ROOT,
        [single] => *single,
        _ => {
            let mut level = next_level(leaves);
            while level.len() > 1 {
                level = next_level(&level);
            }
            level[0]
        }
    }
}

/// Direction of sibling in Merkle tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Sibling is on the left
    Left,
    /// Sibling is on the right
    Right,
}

/// Merkle inclusion proof (path from leaf to root)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleProof {
    /// Index of the leaf in the sequence
    pub leaf_index: u64,
    /// Leaf hash being proven
    pub leaf_hash: [u8; 32],
    /// Sibling hashes along the path to root
    pub siblings: Vec<(Direction, [u8; 32])>,
    /// Root hash
    pub root_hash: [u8; 32],
}

impl MerkleProof {
    /// Recompute the root from the leaf and siblings
    pub fn computed_root(&self) -> [u8; 32] {
        self.siblings
            .iter()
            .fold(self.leaf_hash, |current, (direction, sibling)| match direction {
                Direction::Left => hash_pair(sibling, &current),
                Direction::Right => hash_pair(&current, sibling),
            })
    }

    /// Verify proof against its root hash
    pub fn verify(&self) -> bool {
        self.computed_root() == self.root_hash
    }

    /// Verify proof against an externally obtained root
    pub fn verify_against(&self, root: &[u8; 32]) -> Result<()> {
        if self.root_hash != *root {
            return Err(Error::Merkle("proof was built for a different root".to_string()));
        }
        if !self.verify() {
            return Err(Error::Merkle(format!(
                "path for leaf {} does not reach the root",
                self.leaf_index
            )));
        }
        Ok(())
    }
}

/// Merkle tree over an immutable snapshot of the leaf sequence
#[derive(Debug, Clone)]
pub struct MerkleTree {
    leaves: Vec<[u8; 32]>,
    root: [u8; 32],
}

impl MerkleTree {
    /// Build a tree from existing leaves
    pub fn from_leaves(leaves: Vec<[u8; 32]>) -> Self {
        let root = merkle_root(&leaves);
        Self { leaves, root }
    }

    /// Get number of leaves
    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    /// Check if tree is empty
    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// Merkle root
    pub fn root(&self) -> [u8; 32] {
        self.root
    }

    /// Generate Merkle proof for a leaf at given index
    pub fn generate_proof(&self, leaf_index: usize) -> Option<MerkleProof> {
        let leaf_hash = *self.leaves.get(leaf_index)?;
        let mut siblings = Vec::new();
        let mut level = self.leaves.clone();
        let mut index = leaf_index;

        while level.len() > 1 {
            let (direction, sibling) = if index % 2 == 0 {
                // Last node on an odd level pairs with itself
                let sibling = level.get(index + 1).copied().unwrap_or(level[index]);
                (Direction::Right, sibling)
            } else {
                (Direction::Left, level[index - 1])
            };

            siblings.push((direction, sibling));
            level = next_level(&level);
            index /= 2;
        }

        Some(MerkleProof {
            leaf_index: leaf_index as u64,
            leaf_hash,
            siblings,
            root_hash: self.root,
        })
    }

    /// Verify that a leaf exists in the tree at `leaf_index`
    pub fn verify_leaf(&self, leaf_index: usize, leaf_hash: [u8; 32]) -> bool {
        if self.leaves.get(leaf_index) != Some(&leaf_hash) {
            return false;
        }

        self.generate_proof(leaf_index)
            .map(|proof| proof.verify())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash_bytes;

    fn leaves(n: usize) -> Vec<[u8; 32]> {
        (0..n)
            .map(|i| hash_bytes(format!("leaf{}", i).as_bytes()))
            .collect()
    }

    #[test]
    fn test_empty_root_is_empty_string_digest() {
        assert_eq!(EMPTY_ROOT, hash_bytes(b""));
        assert_eq!(merkle_root(&[]), EMPTY_ROOT);

        let tree = MerkleTree::from_leaves(vec![]);
        assert!(tree.is_empty());
        assert_eq!(tree.root(), EMPTY_ROOT);
        assert!(tree.generate_proof(0).is_none());
    }

    #[test]
    fn test_single_leaf() {
        let l = leaves(1);
        assert_eq!(merkle_root(&l), l[0]);
    }

    #[test]
    fn test_two_leaves() {
        let l = leaves(2);
        assert_eq!(merkle_root(&l), hash_pair(&l[0], &l[1]));
    }

    #[test]
    fn test_four_leaves() {
        let l = leaves(4);
        let h01 = hash_pair(&l[0], &l[1]);
        let h23 = hash_pair(&l[2], &l[3]);
        assert_eq!(merkle_root(&l), hash_pair(&h01, &h23));
    }

    #[test]
    fn test_odd_number_leaves() {
        let l = leaves(3);
        let h01 = hash_pair(&l[0], &l[1]);
        let h22 = hash_pair(&l[2], &l[2]);
        assert_eq!(merkle_root(&l), hash_pair(&h01, &h22));
    }

    #[test]
    fn test_five_leaves_duplicates_at_every_odd_level() {
        let l = leaves(5);
        let h01 = hash_pair(&l[0], &l[1]);
        let h23 = hash_pair(&l[2], &l[3]);
        let h44 = hash_pair(&l[4], &l[4]);
        let h0123 = hash_pair(&h01, &h23);
        let h4444 = hash_pair(&h44, &h44);
        assert_eq!(merkle_root(&l), hash_pair(&h0123, &h4444));
    }

    #[test]
    fn test_root_changes_with_any_leaf() {
        let l = leaves(6);
        let root = merkle_root(&l);
        for i in 0..l.len() {
            let mut tampered = l.clone();
            tampered[i][0] ^= 0x01;
            assert_ne!(merkle_root(&tampered), root, "leaf {} not committed", i);
        }
    }

    #[test]
    fn test_order_matters() {
        let l = leaves(2);
        let swapped = vec![l[1], l[0]];
        assert_ne!(merkle_root(&l), merkle_root(&swapped));
    }

    #[test]
    fn test_proofs_for_every_leaf() {
        for n in 1..=9 {
            let l = leaves(n);
            let tree = MerkleTree::from_leaves(l.clone());
            for (i, leaf) in l.iter().enumerate() {
                let proof = tree.generate_proof(i).unwrap();
                assert_eq!(proof.leaf_hash, *leaf);
                assert!(proof.verify(), "n={} i={}", n, i);
                assert!(proof.verify_against(&merkle_root(&l)).is_ok());
            }
        }
    }

    #[test]
    fn test_proof_two_leaves_directions() {
        let l = leaves(2);
        let tree = MerkleTree::from_leaves(l.clone());

        let proof0 = tree.generate_proof(0).unwrap();
        assert_eq!(proof0.siblings, vec![(Direction::Right, l[1])]);

        let proof1 = tree.generate_proof(1).unwrap();
        assert_eq!(proof1.siblings, vec![(Direction::Left, l[0])]);
    }

    #[test]
    fn test_proof_verification_invalid() {
        let tree = MerkleTree::from_leaves(leaves(2));
        let mut proof = tree.generate_proof(0).unwrap();

        proof.root_hash = hash_bytes(b"fake_root");
        assert!(!proof.verify());
        assert!(proof.verify_against(&tree.root()).is_err());
    }

    #[test]
    fn test_verify_leaf() {
        let l = leaves(3);
        let tree = MerkleTree::from_leaves(l.clone());

        assert!(tree.verify_leaf(0, l[0]));
        assert!(tree.verify_leaf(2, l[2]));
        assert!(!tree.verify_leaf(3, l[0]));
        assert!(!tree.verify_leaf(0, l[1]));
    }
}
