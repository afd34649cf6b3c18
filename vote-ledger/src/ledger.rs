//! Main ledger orchestration layer
//!
//! This module ties together storage, the writer actor, the attestor and the
//! anomaly monitor into a high-level API for casting and tallying votes.
//!
//! # Example
//!
//! ```no_run
//! use vote_ledger::{types::{CandidateId, VoteRequest}, Config, Ledger};
//!
//! #[tokio::main]
//! async fn main() -> vote_ledger::Result<()> {
//!     let ledger = Ledger::open(Config::default()).await?;
//!
//!     let voter = ledger.register_voter("Jane Doe", "S-1001").await?;
//!     let receipt = ledger
//!         .submit_vote(VoteRequest {
//!             voter_id: voter.id,
//!             candidate_id: CandidateId(1),
//!             biometric_hash: None,
//!         })
//!         .await?;
//!     println!("entry {} hash {}", receipt.entry_id, receipt.content_hash);
//!
//!     let results = ledger.get_results()?;
//!     println!("root {} signed {}", results.merkle_root, results.signature);
//!
//!     ledger.shutdown().await
//! }
//! ```

use crate::{
    actor::{spawn_ledger_actor, LedgerHandle},
    anomaly::AnomalyMonitor,
    attestor::SignatureAttestor,
    config::AnomalyPolicy,
    crypto::generate_uuid_v7,
    merkle::{merkle_root, MerkleProof, MerkleTree},
    tally,
    types::{
        Candidate, ElectionResults, LedgerEntry, SubmitReceipt, Tally, Vote, VoteRequest,
        VoteUpdate, Voter,
    },
    Config, Error, Metrics, Result, Storage,
};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Outcome of a full integrity check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityReport {
    /// Leaves checked
    pub leaf_count: u64,

    /// Root over the checked leaves
    pub merkle_root: [u8; 32],

    /// Counts derived by scanning every entry
    pub recounted: Tally,
}

/// Main ledger interface
pub struct Ledger {
    /// Actor handle for writes
    handle: LedgerHandle,

    /// Writer task
    actor_task: JoinHandle<()>,

    /// Direct storage access (for reads)
    storage: Arc<Storage>,

    /// Root signer
    attestor: SignatureAttestor,

    /// Vote-rate monitor
    monitor: AnomalyMonitor,

    /// Vote update publisher
    updates: broadcast::Sender<VoteUpdate>,

    /// Metrics
    metrics: Metrics,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("storage", &self.storage)
            .field("attestor", &self.attestor)
            .finish_non_exhaustive()
    }
}

impl Ledger {
    /// Open ledger with configuration
    pub async fn open(config: Config) -> Result<Self> {
        config.validate()?;

        let storage = Arc::new(Storage::open(&config)?);
        let metrics = Metrics::new().map_err(|e| Error::Config(e.to_string()))?;
        let (updates, _) = broadcast::channel(config.submission.update_channel_capacity);

        let (handle, actor_task) =
            spawn_ledger_actor(storage.clone(), updates.clone(), metrics.clone(), &config)?;

        let ledger = Self {
            handle,
            actor_task,
            storage,
            attestor: SignatureAttestor::new(config.key_path.clone()),
            monitor: AnomalyMonitor::new(&config.anomaly),
            updates,
            metrics,
        };

        ledger.seed_candidates(&config).await?;

        tracing::info!(
            data_dir = %config.data_dir.display(),
            service = %config.service_name,
            version = %config.service_version,
            "Ledger opened"
        );
        Ok(ledger)
    }

    /// Populate an empty catalog from configuration
    async fn seed_candidates(&self, config: &Config) -> Result<()> {
        if !self.storage.candidates()?.is_empty() {
            return Ok(());
        }

        for seed in &config.catalog.seed_candidates {
            self.handle
                .add_candidate(seed.name.clone(), seed.manifesto.clone())
                .await?;
        }

        if !config.catalog.seed_candidates.is_empty() {
            tracing::info!(
                count = config.catalog.seed_candidates.len(),
                "Seeded candidate catalog"
            );
        }
        Ok(())
    }

    /// Cast a vote
    ///
    /// Returns once the entry, its leaf and the tally change are durable.
    /// Under the advisory policy a flagged vote is still accepted and the
    /// receipt carries the flag.
    ///
    /// On [`Error::SubmissionTimeout`] the vote may still have been
    /// committed; check [`Ledger::find_vote`] with the returned `vote_id`
    /// before casting it again.
    pub async fn submit_vote(&self, request: VoteRequest) -> Result<SubmitReceipt> {
        let cast_at = Utc::now();

        let verdict = self.monitor.inspect(cast_at);
        if verdict.flagged {
            self.metrics.record_anomaly();
            tracing::warn!(
                voter_id = %request.voter_id,
                candidate_id = %request.candidate_id,
                reason = ?verdict.reason,
                "Vote flagged by anomaly monitor"
            );

            if self.monitor.policy() == AnomalyPolicy::Block {
                self.metrics.record_rejection();
                return Err(Error::Throttled(format!(
                    "vote from {} rejected by anomaly policy",
                    request.voter_id
                )));
            }
        }

        let vote_id = generate_uuid_v7();
        let vote = Vote {
            vote_id,
            voter_id: request.voter_id,
            candidate_id: request.candidate_id,
            biometric_hash: request.biometric_hash,
            cast_at,
        };

        let entry = self.handle.submit_vote(vote).await.map_err(|e| match e {
            Error::Timeout(timeout_ms) => {
                self.metrics.record_rejection();
                tracing::warn!(%vote_id, timeout_ms, "Vote submission timed out, outcome unknown");
                Error::SubmissionTimeout {
                    vote_id,
                    timeout_ms,
                }
            }
            Error::Concurrency(_) => {
                self.metrics.record_rejection();
                e
            }
            e => e,
        })?;

        Ok(SubmitReceipt {
            entry_id: entry.sequence,
            vote_id: entry.vote.vote_id,
            content_hash: entry.hash_hex(),
            accepted: true,
            anomaly_flag: verdict.flagged,
        })
    }

    /// Counts, Merkle root and a fresh signature over one consistent prefix
    pub fn get_results(&self) -> Result<ElectionResults> {
        let (leaves, counters, candidates) = {
            let snapshot = self.storage.snapshot();
            (
                snapshot.leaves()?,
                snapshot.counters()?,
                snapshot.candidates()?,
            )
        };

        let root = merkle_root(&leaves);
        let attestation = self.attestor.attest(root)?;
        self.metrics.record_attestation();

        tracing::debug!(
            leaf_count = leaves.len(),
            merkle_root = %hex::encode(root),
            "Results attested"
        );

        Ok(ElectionResults {
            counts: tally::complete(&candidates, &counters),
            merkle_root: hex::encode(attestation.merkle_root),
            signature: attestation.signature.to_hex(),
            public_key: hex::encode(attestation.public_key),
            leaf_count: leaves.len() as u64,
            signed_at: attestation.signed_at,
        })
    }

    /// Candidate catalog ordered by ID
    pub fn get_candidates(&self) -> Result<Vec<Candidate>> {
        self.storage.candidates()
    }

    /// Register a voter; the ID number must be unique
    pub async fn register_voter(
        &self,
        name: impl Into<String>,
        idno: impl Into<String>,
    ) -> Result<Voter> {
        self.handle.register_voter(name.into(), idno.into()).await
    }

    /// Add a candidate to the catalog
    pub async fn add_candidate(
        &self,
        name: impl Into<String>,
        manifesto: impl Into<String>,
    ) -> Result<Candidate> {
        self.handle.add_candidate(name.into(), manifesto.into()).await
    }

    /// Entry by ledger sequence
    pub fn get_entry(&self, sequence: u64) -> Result<LedgerEntry> {
        self.storage.get_entry(sequence)
    }

    /// Committed entry for a vote ID, if the vote was committed
    pub fn find_vote(&self, vote_id: uuid::Uuid) -> Result<Option<LedgerEntry>> {
        self.storage
            .sequence_for_vote(&vote_id)?
            .map(|sequence| self.storage.get_entry(sequence))
            .transpose()
    }

    /// Inclusion proof for one leaf against the current root
    pub fn inclusion_proof(&self, sequence: u64) -> Result<MerkleProof> {
        let tree = MerkleTree::from_leaves(self.storage.leaves()?);
        usize::try_from(sequence)
            .ok()
            .and_then(|index| tree.generate_proof(index))
            .ok_or(Error::EntryNotFound(sequence))
    }

    /// Maintained counts for every catalog candidate
    pub fn counts(&self) -> Result<Tally> {
        let snapshot = self.storage.snapshot();
        Ok(tally::complete(&snapshot.candidates()?, &snapshot.counters()?))
    }

    /// Counts derived by scanning every ledger entry
    pub fn recount(&self) -> Result<Tally> {
        let snapshot = self.storage.snapshot();
        let entries = snapshot.entries()?;
        Ok(tally::complete(&snapshot.candidates()?, &tally::recount(&entries)))
    }

    /// Check every entry hash, every leaf and the maintained counters
    pub fn verify_integrity(&self) -> Result<IntegrityReport> {
        let snapshot = self.storage.snapshot();
        let leaves = snapshot.leaves()?;
        let entries = snapshot.entries()?;
        let counters = snapshot.counters()?;

        if entries.len() != leaves.len() {
            return Err(Error::InvariantViolation(format!(
                "{} entries but {} leaves",
                entries.len(),
                leaves.len()
            )));
        }

        for (index, (entry, leaf)) in entries.iter().zip(&leaves).enumerate() {
            if entry.sequence != index as u64 {
                return Err(Error::InvariantViolation(format!(
                    "entry at position {} has sequence {}",
                    index, entry.sequence
                )));
            }
            if !entry.verify_hash() {
                return Err(Error::InvariantViolation(format!(
                    "entry {} payload does not match its hash",
                    entry.sequence
                )));
            }
            if entry.hash != *leaf {
                return Err(Error::InvariantViolation(format!(
                    "leaf {} does not match its entry",
                    entry.sequence
                )));
            }
        }

        let recounted = tally::recount(&entries);
        let drift = tally::drift(&counters, &recounted);
        if let Some((candidate_id, maintained, derived)) = drift.first() {
            tracing::error!(
                candidate_id = %candidate_id,
                maintained,
                derived,
                drifted = drift.len(),
                "Tally drift detected"
            );
            return Err(Error::InvariantViolation(format!(
                "candidate {} counted {} but entries show {}",
                candidate_id, maintained, derived
            )));
        }

        let root = merkle_root(&leaves);
        tracing::info!(
            leaf_count = leaves.len(),
            merkle_root = %hex::encode(root),
            "Integrity verified"
        );

        Ok(IntegrityReport {
            leaf_count: leaves.len() as u64,
            merkle_root: root,
            recounted,
        })
    }

    /// Subscribe to committed vote notifications
    pub fn subscribe(&self) -> broadcast::Receiver<VoteUpdate> {
        self.updates.subscribe()
    }

    /// Attestor public key, creating the key on first use
    pub fn public_key(&self) -> Result<[u8; 32]> {
        self.attestor.public_key()
    }

    /// Attestor
    pub fn attestor(&self) -> &SignatureAttestor {
        &self.attestor
    }

    /// Metrics
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Storage statistics
    pub fn stats(&self) -> Result<crate::storage::StorageStats> {
        self.storage.get_stats()
    }

    /// Shutdown ledger, waiting for the writer to finish queued work
    pub async fn shutdown(self) -> Result<()> {
        self.handle.shutdown().await?;
        self.actor_task
            .await
            .map_err(|e| Error::Concurrency(format!("writer task failed: {}", e)))?;
        tracing::info!("Ledger shut down");
        Ok(())
    }
}
