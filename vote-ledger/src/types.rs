//! Core types for the vote ledger
//!
//! All persisted types are designed for:
//! - Deterministic serialization (bincode for storage, sorted-key JSON for hashing)
//! - Immutability once committed
//! - Memory safety (no unsafe code)

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Candidate identifier (assigned sequentially from 1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CandidateId(pub u64);

impl CandidateId {
    /// Storage key (big-endian so keys sort numerically)
    pub fn to_key(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Voter identifier (assigned sequentially from 1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VoterId(pub u64);

impl VoterId {
    /// Storage key (big-endian so keys sort numerically)
    pub fn to_key(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for VoterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Candidate in the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    /// Candidate ID
    pub id: CandidateId,

    /// Display name
    pub name: String,

    /// Manifesto text
    pub manifesto: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

/// Registered voter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voter {
    /// Voter ID
    pub id: VoterId,

    /// Full name
    pub name: String,

    /// National / student ID number (unique)
    pub idno: String,

    /// Registration timestamp
    pub registered_at: DateTime<Utc>,
}

/// A vote as submitted, before it is committed
#[derive(Debug, Clone)]
pub struct VoteRequest {
    /// Voter casting the vote
    pub voter_id: VoterId,

    /// Candidate voted for
    pub candidate_id: CandidateId,

    /// Optional biometric fingerprint supplied by the client
    pub biometric_hash: Option<String>,
}

/// An accepted vote (immutable once created)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    /// Unique vote ID (UUIDv7 for time-ordering)
    pub vote_id: Uuid,

    /// Voter reference
    pub voter_id: VoterId,

    /// Candidate reference
    pub candidate_id: CandidateId,

    /// Optional biometric fingerprint
    pub biometric_hash: Option<String>,

    /// Cast timestamp
    pub cast_at: DateTime<Utc>,
}

impl Vote {
    /// Canonical JSON payload that gets hashed into the ledger.
    ///
    /// Keys are emitted in lexicographic order regardless of struct layout,
    /// so identical votes always hash identically. The biometric hash is
    /// kept on the entry but is not part of the committed payload.
    pub fn canonical_payload(&self) -> crate::Result<String> {
        let mut fields = BTreeMap::new();
        fields.insert("candidate_id", serde_json::Value::from(self.candidate_id.0));
        fields.insert(
            "cast_at",
            serde_json::Value::from(self.cast_at.to_rfc3339_opts(SecondsFormat::Micros, true)),
        );
        fields.insert("id", serde_json::Value::from(self.vote_id.to_string()));
        fields.insert("voter_id", serde_json::Value::from(self.voter_id.0));

        Ok(serde_json::to_string(&fields)?)
    }
}

/// Committed ledger record for one vote
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Append index (also the Merkle leaf index)
    pub sequence: u64,

    /// The vote this entry commits
    pub vote: Vote,

    /// Canonical payload
    pub payload: String,

    /// SHA-256 of the payload
    pub hash: [u8; 32],

    /// Commit timestamp
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Build an entry for `vote` at `sequence`
    pub fn new(sequence: u64, vote: Vote) -> crate::Result<Self> {
        let payload = vote.canonical_payload()?;
        let hash = crate::crypto::hash_bytes(payload.as_bytes());

        Ok(Self {
            sequence,
            vote,
            payload,
            hash,
            created_at: Utc::now(),
        })
    }

    /// Check `hash == sha256(payload)`
    pub fn verify_hash(&self) -> bool {
        crate::crypto::hash_bytes(self.payload.as_bytes()) == self.hash
    }

    /// Hex-encoded content hash
    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash)
    }
}

/// Per-candidate vote counts
pub type Tally = BTreeMap<CandidateId, u64>;

/// Outcome of a successful submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitReceipt {
    /// Ledger sequence of the committed entry
    pub entry_id: u64,

    /// Vote ID
    pub vote_id: Uuid,

    /// Hex-encoded content hash (the Merkle leaf)
    pub content_hash: String,

    /// Always true for a returned receipt
    pub accepted: bool,

    /// Advisory flag raised by the anomaly monitor
    pub anomaly_flag: bool,
}

/// Attested election results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionResults {
    /// Per-candidate counts (every catalog candidate, zero included)
    pub counts: Tally,

    /// Hex-encoded Merkle root over all leaves
    pub merkle_root: String,

    /// Hex-encoded Ed25519 signature over the raw root bytes
    pub signature: String,

    /// Hex-encoded attestor public key
    pub public_key: String,

    /// Number of leaves the root covers
    pub leaf_count: u64,

    /// When the root was signed
    pub signed_at: DateTime<Utc>,
}

/// Notification published after every committed vote
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteUpdate {
    /// Candidate that received the vote
    pub candidate_id: CandidateId,

    /// Ledger sequence of the vote
    pub sequence: u64,

    /// Counts after the vote was applied
    pub counts: Tally,
}

/// Digital signature (Ed25519)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    bytes: [u8; 64],
}

impl Signature {
    /// Create from bytes
    pub fn from_bytes(bytes: [u8; 64]) -> Self {
        Self { bytes }
    }

    /// Parse from hex
    pub fn from_hex(s: &str) -> crate::Result<Self> {
        let raw = hex::decode(s)
            .map_err(|e| crate::Error::Signature(format!("Invalid signature hex: {}", e)))?;
        let bytes: [u8; 64] = raw
            .try_into()
            .map_err(|_| crate::Error::Signature("Signature must be 64 bytes".to_string()))?;
        Ok(Self { bytes })
    }

    /// Get bytes
    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.bytes
    }

    /// Hex encoding
    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }

    /// Verify signature
    pub fn verify(&self, message: &[u8], public_key: &[u8; 32]) -> bool {
        crate::crypto::verify_signature(message, self, public_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_vote() -> Vote {
        Vote {
            vote_id: Uuid::parse_str("01890a5d-ac96-774b-bcce-b302099a8057").unwrap(),
            voter_id: VoterId(7),
            candidate_id: CandidateId(2),
            biometric_hash: Some("ab12".to_string()),
            cast_at: DateTime::parse_from_rfc3339("2024-03-01T10:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        }
    }

    #[test]
    fn test_canonical_payload_sorted_keys() {
        let payload = sample_vote().canonical_payload().unwrap();
        assert_eq!(
            payload,
            r#"{"candidate_id":2,"cast_at":"2024-03-01T10:00:00.000000Z","id":"01890a5d-ac96-774b-bcce-b302099a8057","voter_id":7}"#
        );
    }

    #[test]
    fn test_biometric_not_in_payload() {
        let mut a = sample_vote();
        let mut b = sample_vote();
        a.biometric_hash = None;
        b.biometric_hash = Some("ff".repeat(32));
        assert_eq!(a.canonical_payload().unwrap(), b.canonical_payload().unwrap());
    }

    #[test]
    fn test_entry_hash_matches_payload() {
        let mut entry = LedgerEntry::new(0, sample_vote()).unwrap();
        assert!(entry.verify_hash());
        assert_eq!(entry.hash_hex().len(), 64);

        entry.payload.push(' ');
        assert!(!entry.verify_hash());
    }

    #[test]
    fn test_signature_hex_round_trip_rejects_short() {
        assert!(Signature::from_hex("abcd").is_err());
        assert!(Signature::from_hex("zz").is_err());

        let sig = Signature::from_bytes([7u8; 64]);
        assert_eq!(Signature::from_hex(&sig.to_hex()).unwrap(), sig);
    }

    #[test]
    fn test_id_keys_sort_numerically() {
        assert!(CandidateId(2).to_key() < CandidateId(10).to_key());
        assert!(VoterId(255).to_key() < VoterId(256).to_key());
    }
}
