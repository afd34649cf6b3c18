//! Property-based tests for ledger invariants
//!
//! These tests use proptest to verify critical invariants:
//! - Determinism: Same leaves → same root, same votes → same hashes
//! - Odd levels: Duplicating the last leaf does not change the root
//! - Attestation: Every signed root verifies, and only for that root
//! - Tally consistency: Counts match leaves for any submission mix

use proptest::prelude::*;
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;
use vote_ledger::{
    config::AnomalyConfig,
    crypto::hash_bytes,
    merkle::{hash_pair, merkle_root, MerkleTree, EMPTY_ROOT},
    types::{CandidateId, LedgerEntry, Signature, Vote, VoteRequest, VoterId},
    Config, Ledger, SignatureAttestor,
};

/// Strategy for generating leaf hashes
fn leaves_strategy(max: usize) -> impl Strategy<Value = Vec<[u8; 32]>> {
    prop::collection::vec(any::<[u8; 32]>(), 0..max)
}

/// Strategy for generating votes
fn vote_strategy() -> impl Strategy<Value = Vote> {
    (
        any::<u128>(),
        1u64..10_000,
        1u64..16,
        prop::option::of("[a-f0-9]{64}"),
        0i64..4_000_000_000,
        0u32..1_000_000,
    )
        .prop_map(|(id, voter, candidate, biometric_hash, secs, micros)| Vote {
            vote_id: Uuid::from_u128(id),
            voter_id: VoterId(voter),
            candidate_id: CandidateId(candidate),
            biometric_hash,
            cast_at: chrono::DateTime::from_timestamp(secs, micros * 1_000)
                .unwrap_or_default(),
        })
}

/// Helper to create test ledger
async fn create_test_ledger(temp: &TempDir) -> Ledger {
    let mut config = Config::default();
    config.data_dir = temp.path().join("db");
    config.key_path = temp.path().join("ed25519_key.seed");
    config.anomaly = AnomalyConfig {
        random_trigger_probability: 0.0,
        rate_threshold: 100_000,
        ..AnomalyConfig::default()
    };
    Ledger::open(config).await.unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Root depends only on the leaf sequence
    #[test]
    fn prop_merkle_root_deterministic(leaves in leaves_strategy(64)) {
        let first = merkle_root(&leaves);
        let second = merkle_root(&leaves.clone());
        prop_assert_eq!(first, second);
        prop_assert_eq!(MerkleTree::from_leaves(leaves.clone()).root(), first);

        if leaves.is_empty() {
            prop_assert_eq!(first, EMPTY_ROOT);
        }
        if leaves.len() == 1 {
            prop_assert_eq!(first, leaves[0]);
        }
    }

    /// An odd level behaves as if its last node were repeated
    #[test]
    fn prop_odd_level_duplicates_last(leaves in leaves_strategy(64)) {
        prop_assume!(leaves.len() % 2 == 1 && leaves.len() > 1);

        let mut padded = leaves.clone();
        padded.push(leaves[leaves.len() - 1]);
        prop_assert_eq!(merkle_root(&leaves), merkle_root(&padded));
    }

    /// Changing any leaf changes the root
    #[test]
    fn prop_root_commits_to_every_leaf(
        leaves in prop::collection::vec(any::<[u8; 32]>(), 1..48),
        index in any::<prop::sample::Index>(),
    ) {
        let i = index.index(leaves.len());
        let mut tampered = leaves.clone();
        tampered[i][0] ^= 0x01;
        prop_assert_ne!(merkle_root(&leaves), merkle_root(&tampered));
    }

    /// Every leaf has a proof that reaches the root
    #[test]
    fn prop_inclusion_proofs_verify(leaves in prop::collection::vec(any::<[u8; 32]>(), 1..48)) {
        let tree = MerkleTree::from_leaves(leaves.clone());
        for (i, leaf) in leaves.iter().enumerate() {
            let proof = tree.generate_proof(i).unwrap();
            prop_assert_eq!(proof.leaf_hash, *leaf);
            prop_assert!(proof.verify_against(&tree.root()).is_ok());
        }
    }

    /// Identical votes always produce identical entries
    #[test]
    fn prop_canonical_payload_deterministic(vote in vote_strategy(), sequence in any::<u64>()) {
        let first = LedgerEntry::new(sequence, vote.clone()).unwrap();
        let second = LedgerEntry::new(sequence, vote).unwrap();

        prop_assert_eq!(&first.payload, &second.payload);
        prop_assert_eq!(first.hash, second.hash);
        prop_assert_eq!(first.hash, hash_bytes(first.payload.as_bytes()));
        prop_assert!(first.verify_hash());
    }

    /// A signed root verifies, and the signature does not transfer
    #[test]
    fn prop_attestation_round_trip(root in any::<[u8; 32]>(), other in any::<[u8; 32]>()) {
        prop_assume!(root != other);

        let temp = TempDir::new().unwrap();
        let attestor = SignatureAttestor::new(temp.path().join("key.seed"));
        let attestation = attestor.attest(root).unwrap();

        prop_assert!(attestation.verify());
        prop_assert!(SignatureAttestor::verify(&root, &attestation.signature, &attestation.public_key));
        prop_assert!(!SignatureAttestor::verify(&other, &attestation.signature, &attestation.public_key));

        let reparsed = Signature::from_hex(&attestation.signature.to_hex()).unwrap();
        prop_assert_eq!(reparsed, attestation.signature);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    /// Counts and leaves agree for any mix of concurrent submissions
    #[test]
    fn prop_tally_matches_leaves(choices in prop::collection::vec(1u64..=2, 1..40)) {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .enable_all()
            .build()
            .unwrap();

        rt.block_on(async {
            let temp = TempDir::new().unwrap();
            let ledger = Arc::new(create_test_ledger(&temp).await);
            let voter = ledger.register_voter("Jane", "S-1").await.unwrap();

            let tasks: Vec<_> = choices
                .iter()
                .map(|candidate| {
                    let ledger = ledger.clone();
                    let request = VoteRequest {
                        voter_id: voter.id,
                        candidate_id: CandidateId(*candidate),
                        biometric_hash: None,
                    };
                    tokio::spawn(async move { ledger.submit_vote(request).await })
                })
                .collect();

            let mut receipts = Vec::new();
            for task in tasks {
                receipts.push(task.await.unwrap().unwrap());
            }

            let mut ids: Vec<u64> = receipts.iter().map(|r| r.entry_id).collect();
            ids.sort();
            assert_eq!(ids, (0..choices.len() as u64).collect::<Vec<_>>());

            let results = ledger.get_results().unwrap();
            let expected_a = choices.iter().filter(|c| **c == 1).count() as u64;
            assert_eq!(results.leaf_count, choices.len() as u64);
            assert_eq!(results.counts[&CandidateId(1)], expected_a);
            assert_eq!(results.counts[&CandidateId(2)], choices.len() as u64 - expected_a);

            let report = ledger.verify_integrity().unwrap();
            assert_eq!(hex::encode(report.merkle_root), results.merkle_root);
        });
    }
}

#[cfg(test)]
mod integration_tests {
    use super::*;

    #[tokio::test]
    async fn test_full_election_lifecycle() {
        let temp = TempDir::new().unwrap();
        let ledger = create_test_ledger(&temp).await;

        let carol = ledger.add_candidate("Carol", "Parks").await.unwrap();
        let voters = [
            ledger.register_voter("Ann", "ID-1").await.unwrap(),
            ledger.register_voter("Ben", "ID-2").await.unwrap(),
            ledger.register_voter("Cat", "ID-3").await.unwrap(),
        ];

        let mut leaves = Vec::new();
        for (voter, candidate) in voters.iter().zip([CandidateId(1), carol.id, carol.id]) {
            let receipt = ledger
                .submit_vote(VoteRequest {
                    voter_id: voter.id,
                    candidate_id: candidate,
                    biometric_hash: None,
                })
                .await
                .unwrap();
            leaves.push(ledger.get_entry(receipt.entry_id).unwrap().hash);
        }

        let results = ledger.get_results().unwrap();
        let expected = hash_pair(&hash_pair(&leaves[0], &leaves[1]), &hash_pair(&leaves[2], &leaves[2]));
        assert_eq!(results.merkle_root, hex::encode(expected));
        assert_eq!(results.counts[&CandidateId(1)], 1);
        assert_eq!(results.counts[&CandidateId(2)], 0);
        assert_eq!(results.counts[&carol.id], 2);

        let stats = ledger.stats().unwrap();
        assert_eq!(stats.total_entries, 3);
        assert_eq!(stats.total_candidates, 3);
        assert_eq!(stats.total_voters, 3);

        ledger.shutdown().await.unwrap();
    }
}
