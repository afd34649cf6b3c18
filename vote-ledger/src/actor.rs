//! Single-writer actor for the ledger
//!
//! Every mutation (votes, voter registration, candidate creation) goes
//! through one Tokio task, which gives the leaf sequence a single total
//! order without any locking on the write path:
//! - Group commit: queued votes are drained into one synced `WriteBatch`
//! - A vote is acknowledged only after its batch is durable
//! - Bounded mailbox gives backpressure to submitters
//!
//! Reads never come here; they use RocksDB snapshots directly.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │            Request handlers (many tasks)             │
//! └─────────────────────┬────────────────────────────────┘
//!                       │
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │               LedgerHandle (Clone)                   │
//! │    Sends messages to actor mailbox, with timeout     │
//! └─────────────────────┬────────────────────────────────┘
//!                       │
//!                       │ mpsc::channel (bounded)
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │              LedgerActor (Single Task)               │
//! │  drain ≤ max_batch_size votes → validate → stage     │
//! │  leaf + entry + tally → Storage::commit (fsync)      │
//! │  → ack each vote → broadcast VoteUpdate              │
//! └──────────────────────────────────────────────────────┘
//! ```

use crate::{
    tally::{self, TallyEngine},
    types::{Candidate, CandidateId, LedgerEntry, Vote, VoteUpdate, Voter, VoterId},
    Config, Error, Metrics, Result, Storage,
};
use chrono::Utc;
use rocksdb::WriteBatch;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Duration;

/// Message sent to the ledger actor
#[derive(Debug)]
pub enum LedgerMessage {
    /// Append a vote
    SubmitVote {
        /// Vote to commit
        vote: Vote,
        /// Committed entry, sent once durable
        response: oneshot::Sender<Result<LedgerEntry>>,
    },

    /// Register a voter
    RegisterVoter {
        /// Display name
        name: String,
        /// Unique ID number
        idno: String,
        /// Registered voter
        response: oneshot::Sender<Result<Voter>>,
    },

    /// Add a candidate to the catalog
    AddCandidate {
        /// Display name
        name: String,
        /// Free-form manifesto
        manifesto: String,
        /// Created candidate
        response: oneshot::Sender<Result<Candidate>>,
    },

    /// Shutdown actor
    Shutdown,
}

type PendingVote = (Vote, oneshot::Sender<Result<LedgerEntry>>);

/// Actor that owns all ledger writes
#[derive(Debug)]
pub struct LedgerActor {
    /// Storage backend
    storage: Arc<Storage>,

    /// Mailbox for incoming messages
    mailbox: mpsc::Receiver<LedgerMessage>,

    /// Vote update publisher
    updates: broadcast::Sender<VoteUpdate>,

    /// Metrics
    metrics: Metrics,

    /// Next leaf sequence
    next_sequence: u64,

    /// Next candidate ID
    next_candidate_id: u64,

    /// Next voter ID
    next_voter_id: u64,

    /// Committed counters
    tally: TallyEngine,

    /// Maximum votes per group commit
    max_batch_size: usize,
}

impl LedgerActor {
    /// Create new actor, resuming counters from storage
    pub fn new(
        storage: Arc<Storage>,
        mailbox: mpsc::Receiver<LedgerMessage>,
        updates: broadcast::Sender<VoteUpdate>,
        metrics: Metrics,
        config: &Config,
    ) -> Result<Self> {
        let next_sequence = storage.next_sequence()?;
        let next_candidate_id = storage.last_candidate_id()? + 1;
        let next_voter_id = storage.last_voter_id()? + 1;
        let tally = TallyEngine::from_counts(storage.counters()?);

        if tally.total() != next_sequence {
            return Err(Error::InvariantViolation(format!(
                "tally counts {} votes but the ledger holds {} leaves",
                tally.total(),
                next_sequence
            )));
        }

        metrics.leaves.set(next_sequence as i64);
        tracing::info!(
            next_sequence,
            next_candidate_id,
            next_voter_id,
            "Ledger writer resumed"
        );

        let max_batch_size = if config.batching.enabled {
            config.batching.max_batch_size
        } else {
            1
        };

        Ok(Self {
            storage,
            mailbox,
            updates,
            metrics,
            next_sequence,
            next_candidate_id,
            next_voter_id,
            tally,
            max_batch_size,
        })
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        while let Some(msg) = self.mailbox.recv().await {
            let mut next = Some(msg);

            while let Some(msg) = next.take() {
                match msg {
                    LedgerMessage::Shutdown => {
                        tracing::info!("Ledger writer shutting down");
                        return;
                    }

                    LedgerMessage::SubmitVote { vote, response } => {
                        let mut pending = vec![(vote, response)];

                        // Drain whatever is already queued; anything that is
                        // not a vote is handled right after this commit
                        while pending.len() < self.max_batch_size {
                            match self.mailbox.try_recv() {
                                Ok(LedgerMessage::SubmitVote { vote, response }) => {
                                    pending.push((vote, response));
                                }
                                Ok(other) => {
                                    next = Some(other);
                                    break;
                                }
                                Err(_) => break,
                            }
                        }

                        self.commit_votes(pending);
                    }

                    LedgerMessage::RegisterVoter {
                        name,
                        idno,
                        response,
                    } => {
                        let _ = response.send(self.register_voter(name, idno));
                    }

                    LedgerMessage::AddCandidate {
                        name,
                        manifesto,
                        response,
                    } => {
                        let _ = response.send(self.add_candidate(name, manifesto));
                    }
                }
            }
        }

        tracing::info!("Ledger mailbox closed");
    }

    /// Validate, stage and durably commit a group of votes
    fn commit_votes(&mut self, pending: Vec<PendingVote>) {
        let started = Instant::now();
        let mut staged_tally = self.tally.clone();
        let mut batch = WriteBatch::default();
        let mut staged: Vec<(LedgerEntry, oneshot::Sender<Result<LedgerEntry>>)> = Vec::new();

        for (vote, response) in pending {
            // Submitter gave up before we started: drop without side effects
            if response.is_closed() {
                tracing::debug!(vote_id = %vote.vote_id, "Submitter gone, vote dropped");
                continue;
            }

            let sequence = self.next_sequence + staged.len() as u64;
            match self.stage_vote(&mut batch, &mut staged_tally, vote, sequence) {
                Ok(entry) => staged.push((entry, response)),
                Err(e) => {
                    self.metrics.record_rejection();
                    let _ = response.send(Err(e));
                }
            }
        }

        if staged.is_empty() {
            return;
        }

        if let Err(e) = self.storage.commit(batch) {
            tracing::error!(
                error = %e,
                votes = staged.len(),
                "Durable append failed, batch rolled back"
            );
            let reason = e.to_string();
            for (_, response) in staged {
                self.metrics.record_rejection();
                let _ = response.send(Err(Error::Storage(reason.clone())));
            }
            return;
        }

        self.next_sequence += staged.len() as u64;
        self.tally = staged_tally;
        self.metrics.record_commit(
            staged.len(),
            started.elapsed().as_secs_f64(),
            self.next_sequence,
        );

        tracing::debug!(
            votes = staged.len(),
            next_sequence = self.next_sequence,
            "Votes committed"
        );

        let counts = match self.storage.candidates() {
            Ok(candidates) => tally::complete(&candidates, self.tally.counts()),
            Err(e) => {
                tracing::warn!(error = %e, "Catalog read failed, publishing raw counters");
                self.tally.counts().clone()
            }
        };

        for (entry, response) in staged {
            let update = VoteUpdate {
                candidate_id: entry.vote.candidate_id,
                sequence: entry.sequence,
                counts: counts.clone(),
            };
            let _ = response.send(Ok(entry));
            // No subscribers is fine
            let _ = self.updates.send(update);
        }
    }

    fn stage_vote(
        &self,
        batch: &mut WriteBatch,
        staged_tally: &mut TallyEngine,
        vote: Vote,
        sequence: u64,
    ) -> Result<LedgerEntry> {
        if !self.storage.voter_exists(vote.voter_id)? {
            return Err(Error::Validation(format!("unknown voter {}", vote.voter_id)));
        }
        if !self.storage.candidate_exists(vote.candidate_id)? {
            return Err(Error::Validation(format!(
                "unknown candidate {}",
                vote.candidate_id
            )));
        }

        let candidate_id = vote.candidate_id;
        let entry = LedgerEntry::new(sequence, vote)?;
        self.storage
            .stage_vote(batch, &entry, staged_tally.get(candidate_id) + 1)?;
        staged_tally.increment(candidate_id);

        Ok(entry)
    }

    fn register_voter(&mut self, name: String, idno: String) -> Result<Voter> {
        let name = name.trim().to_string();
        let idno = idno.trim().to_string();
        if name.is_empty() || idno.is_empty() {
            return Err(Error::Validation("name and idno required".to_string()));
        }
        if self.storage.voter_by_idno(&idno)?.is_some() {
            return Err(Error::Validation(format!("idno {} already registered", idno)));
        }

        let voter = Voter {
            id: VoterId(self.next_voter_id),
            name,
            idno,
            registered_at: Utc::now(),
        };
        self.storage.put_voter(&voter)?;
        self.next_voter_id += 1;

        tracing::info!(voter_id = %voter.id, "Voter registered");
        Ok(voter)
    }

    fn add_candidate(&mut self, name: String, manifesto: String) -> Result<Candidate> {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(Error::Validation("name required".to_string()));
        }

        let candidate = Candidate {
            id: CandidateId(self.next_candidate_id),
            name,
            manifesto,
            created_at: Utc::now(),
        };
        self.storage.put_candidate(&candidate)?;
        self.next_candidate_id += 1;

        tracing::info!(candidate_id = %candidate.id, name = %candidate.name, "Candidate added");
        Ok(candidate)
    }
}

/// Handle for sending messages to the actor
#[derive(Clone, Debug)]
pub struct LedgerHandle {
    sender: mpsc::Sender<LedgerMessage>,
    timeout: Duration,
}

impl LedgerHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<LedgerMessage>, timeout: Duration) -> Self {
        Self { sender, timeout }
    }

    /// Send a request and wait for its reply, bounded by the submission timeout.
    ///
    /// Giving up drops the reply channel; the actor skips any vote whose
    /// channel is closed before it starts on it.
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> LedgerMessage,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        let exchange = async {
            self.sender
                .send(build(tx))
                .await
                .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

            rx.await
                .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
        };

        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| Error::Timeout(self.timeout.as_millis() as u64))?
    }

    /// Append a vote
    pub async fn submit_vote(&self, vote: Vote) -> Result<LedgerEntry> {
        self.request(|response| LedgerMessage::SubmitVote { vote, response })
            .await
    }

    /// Register a voter
    pub async fn register_voter(&self, name: String, idno: String) -> Result<Voter> {
        self.request(|response| LedgerMessage::RegisterVoter {
            name,
            idno,
            response,
        })
        .await
    }

    /// Add a candidate
    pub async fn add_candidate(&self, name: String, manifesto: String) -> Result<Candidate> {
        self.request(|response| LedgerMessage::AddCandidate {
            name,
            manifesto,
            response,
        })
        .await
    }

    /// Shutdown actor
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(LedgerMessage::Shutdown)
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;
        Ok(())
    }
}

/// Spawn the ledger actor
pub fn spawn_ledger_actor(
    storage: Arc<Storage>,
    updates: broadcast::Sender<VoteUpdate>,
    metrics: Metrics,
    config: &Config,
) -> Result<(LedgerHandle, JoinHandle<()>)> {
    let (tx, rx) = mpsc::channel(config.submission.mailbox_capacity);
    let actor = LedgerActor::new(storage, rx, updates, metrics, config)?;
    let task = tokio::spawn(actor.run());

    let handle = LedgerHandle::new(tx, Duration::from_millis(config.submission.timeout_ms));
    Ok((handle, task))
}
