//! Vote Ledger
//!
//! Tamper-evident vote ledger with Merkle commitments and signed results.
//!
//! # Architecture
//!
//! - **Hash Chain Store**: Every accepted vote becomes an immutable, hashed entry
//! - **Single Writer**: One writer task gives leaves a total order
//! - **Merkle Commitment**: One root commits to the whole leaf sequence
//! - **Attestation**: Roots are signed with a persisted Ed25519 key
//! - **Group Commit**: Queued votes share one synced write
//!
//! # Invariants
//!
//! - Append-only: Leaves are never modified, removed or reordered
//! - Contiguity: Leaf sequences are 0..n with no gaps
//! - Atomicity: Entry, leaf and tally change commit together or not at all
//! - Tally consistency: Maintained counts always equal a recount of entries

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod actor;
pub mod anomaly;
pub mod attestor;
pub mod config;
pub mod crypto;
pub mod error;
pub mod ledger;
pub mod merkle;
pub mod metrics;
pub mod storage;
pub mod tally;
pub mod types;

// Re-exports
pub use anomaly::{AnomalyMonitor, AnomalyReason, AnomalyVerdict};
pub use attestor::{Attestation, SignatureAttestor};
pub use config::Config;
pub use error::{Error, Result};
pub use ledger::{IntegrityReport, Ledger};
pub use merkle::{merkle_root, MerkleProof, MerkleTree, EMPTY_ROOT};
pub use metrics::Metrics;
pub use storage::Storage;
pub use tally::TallyEngine;
pub use types::{
    Candidate, CandidateId, ElectionResults, LedgerEntry, Signature, SubmitReceipt, Tally, Vote,
    VoteRequest, VoteUpdate, Voter, VoterId,
};
