//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `leaves` - Leaf hash sequence (key: sequence, value: 32-byte hash)
//! - `entries` - Ledger entries (key: sequence)
//! - `tally` - Maintained vote counters (key: candidate_id, value: u64)
//! - `candidates` - Candidate catalog (key: candidate_id)
//! - `voters` - Voter registry (key: voter_id)
//! - `voter_index` - Unique ID numbers (key: idno, value: voter_id)
//! - `vote_index` - Vote lookup (key: vote UUID, value: sequence)
//!
//! All integer keys are big-endian so iteration order is numeric order.
//! A vote touches `leaves`, `entries`, `tally` and `vote_index` in one
//! `WriteBatch`, so a crash can never leave a leaf without its entry or
//! tally increment.

use crate::{
    error::{Error, Result},
    types::{Candidate, CandidateId, LedgerEntry, Tally, Voter, VoterId},
    Config,
};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DBCompactionStyle, IteratorMode, Options, Snapshot,
    WriteBatch, WriteOptions, DB,
};
use std::sync::Arc;
use uuid::Uuid;

/// Column family names
const CF_LEAVES: &str = "leaves";
const CF_ENTRIES: &str = "entries";
const CF_TALLY: &str = "tally";
const CF_CANDIDATES: &str = "candidates";
const CF_VOTERS: &str = "voters";
const CF_VOTER_INDEX: &str = "voter_index";
const CF_VOTE_INDEX: &str = "vote_index";

const ALL_CFS: [&str; 7] = [
    CF_LEAVES,
    CF_ENTRIES,
    CF_TALLY,
    CF_CANDIDATES,
    CF_VOTERS,
    CF_VOTER_INDEX,
    CF_VOTE_INDEX,
];

/// Storage wrapper for RocksDB
pub struct Storage {
    db: Arc<DB>,
    sync_writes: bool,
    #[cfg(test)]
    faults: CommitFaults,
}

/// Commit failures and stalls injected by unit tests
#[cfg(test)]
#[derive(Debug, Default)]
struct CommitFaults {
    fail_next: std::sync::atomic::AtomicBool,
    delay_ms: std::sync::atomic::AtomicU64,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("path", &self.db.path())
            .field("sync_writes", &self.sync_writes)
            .finish()
    }
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        // Create directory if not exists
        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        // Universal compaction for append-heavy workload
        db_opts.set_compaction_style(DBCompactionStyle::Universal);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name)))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(
            path = %path.display(),
            column_families = ALL_CFS.len(),
            sync_writes = config.rocksdb.sync_writes,
            "Opened RocksDB"
        );

        Ok(Self {
            db: Arc::new(db),
            sync_writes: config.rocksdb.sync_writes,
            #[cfg(test)]
            faults: CommitFaults::default(),
        })
    }

    fn cf_options(name: &str) -> Options {
        let mut opts = Options::default();
        match name {
            // Read on every results request, favour speed
            CF_LEAVES | CF_TALLY => {
                opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
            }
            CF_VOTER_INDEX | CF_VOTE_INDEX => {
                opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
                let mut block_opts = rocksdb::BlockBasedOptions::default();
                block_opts.set_bloom_filter(10.0, false);
                opts.set_block_based_table_factory(&block_opts);
            }
            _ => {
                opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
            }
        }
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    fn write_options(&self) -> WriteOptions {
        let mut opts = WriteOptions::default();
        opts.set_sync(self.sync_writes);
        opts
    }

    /// Commit a batch durably (all or nothing)
    pub fn commit(&self, batch: WriteBatch) -> Result<()> {
        #[cfg(test)]
        {
            use std::sync::atomic::Ordering;

            let delay_ms = self.faults.delay_ms.load(Ordering::SeqCst);
            if delay_ms > 0 {
                std::thread::sleep(std::time::Duration::from_millis(delay_ms));
            }
            if self.faults.fail_next.swap(false, Ordering::SeqCst) {
                return Err(Error::Storage("injected commit failure".to_string()));
            }
        }

        self.db.write_opt(batch, &self.write_options())?;
        Ok(())
    }

    // Vote operations

    /// Stage leaf, entry and tally counter for one vote
    ///
    /// `candidate_count` is the candidate's count including this vote.
    pub fn stage_vote(
        &self,
        batch: &mut WriteBatch,
        entry: &LedgerEntry,
        candidate_count: u64,
    ) -> Result<()> {
        // Everything fallible happens before the first put, so a failure
        // never leaves half a vote in the batch
        let cf_leaves = self.cf_handle(CF_LEAVES)?;
        let cf_entries = self.cf_handle(CF_ENTRIES)?;
        let cf_tally = self.cf_handle(CF_TALLY)?;
        let cf_vote_index = self.cf_handle(CF_VOTE_INDEX)?;
        let value = bincode::serialize(entry)?;
        let key = entry.sequence.to_be_bytes();

        batch.put_cf(cf_leaves, key, entry.hash);
        batch.put_cf(cf_entries, key, value);
        batch.put_cf(
            cf_tally,
            entry.vote.candidate_id.to_key(),
            candidate_count.to_be_bytes(),
        );
        batch.put_cf(cf_vote_index, entry.vote.vote_id.as_bytes(), key);

        Ok(())
    }

    /// Get entry by sequence
    pub fn get_entry(&self, sequence: u64) -> Result<LedgerEntry> {
        let cf = self.cf_handle(CF_ENTRIES)?;
        let value = self
            .db
            .get_cf(cf, sequence.to_be_bytes())?
            .ok_or(Error::EntryNotFound(sequence))?;

        Ok(bincode::deserialize(&value)?)
    }

    /// Next free leaf sequence
    pub fn next_sequence(&self) -> Result<u64> {
        let cf = self.cf_handle(CF_LEAVES)?;
        match self.db.iterator_cf(cf, IteratorMode::End).next() {
            Some(item) => {
                let (key, _) = item?;
                Ok(decode_u64(&key)? + 1)
            }
            None => Ok(0),
        }
    }

    /// Sequence of a committed vote, if it was committed
    pub fn sequence_for_vote(&self, vote_id: &Uuid) -> Result<Option<u64>> {
        let cf = self.cf_handle(CF_VOTE_INDEX)?;
        self.db
            .get_cf(cf, vote_id.as_bytes())?
            .map(|value| decode_u64(&value))
            .transpose()
    }

    // Catalog operations

    /// Persist a candidate
    pub fn put_candidate(&self, candidate: &Candidate) -> Result<()> {
        let mut batch = WriteBatch::default();
        batch.put_cf(
            self.cf_handle(CF_CANDIDATES)?,
            candidate.id.to_key(),
            bincode::serialize(candidate)?,
        );
        self.commit(batch)
    }

    /// Persist a voter and its unique ID number index (atomic)
    pub fn put_voter(&self, voter: &Voter) -> Result<()> {
        let mut batch = WriteBatch::default();
        batch.put_cf(
            self.cf_handle(CF_VOTERS)?,
            voter.id.to_key(),
            bincode::serialize(voter)?,
        );
        batch.put_cf(
            self.cf_handle(CF_VOTER_INDEX)?,
            voter.idno.as_bytes(),
            voter.id.to_key(),
        );
        self.commit(batch)
    }

    /// Whether a candidate exists
    pub fn candidate_exists(&self, id: CandidateId) -> Result<bool> {
        let cf = self.cf_handle(CF_CANDIDATES)?;
        Ok(self.db.get_pinned_cf(cf, id.to_key())?.is_some())
    }

    /// Whether a voter exists
    pub fn voter_exists(&self, id: VoterId) -> Result<bool> {
        let cf = self.cf_handle(CF_VOTERS)?;
        Ok(self.db.get_pinned_cf(cf, id.to_key())?.is_some())
    }

    /// Get voter by ID
    pub fn get_voter(&self, id: VoterId) -> Result<Option<Voter>> {
        let cf = self.cf_handle(CF_VOTERS)?;
        self.db
            .get_cf(cf, id.to_key())?
            .map(|value| bincode::deserialize(&value).map_err(Error::from))
            .transpose()
    }

    /// Look up a voter by ID number
    pub fn voter_by_idno(&self, idno: &str) -> Result<Option<VoterId>> {
        let cf = self.cf_handle(CF_VOTER_INDEX)?;
        self.db
            .get_cf(cf, idno.as_bytes())?
            .map(|value| decode_u64(&value).map(VoterId))
            .transpose()
    }

    /// Highest assigned candidate ID (0 when empty)
    pub fn last_candidate_id(&self) -> Result<u64> {
        self.last_key(CF_CANDIDATES)
    }

    /// Highest assigned voter ID (0 when empty)
    pub fn last_voter_id(&self) -> Result<u64> {
        self.last_key(CF_VOTERS)
    }

    fn last_key(&self, cf_name: &str) -> Result<u64> {
        let cf = self.cf_handle(cf_name)?;
        match self.db.iterator_cf(cf, IteratorMode::End).next() {
            Some(item) => {
                let (key, _) = item?;
                decode_u64(&key)
            }
            None => Ok(0),
        }
    }

    // Reads

    /// Point-in-time view; everything read through it belongs to one
    /// committed prefix of the ledger
    pub fn snapshot(&self) -> LedgerSnapshot<'_> {
        LedgerSnapshot {
            storage: self,
            snapshot: self.db.snapshot(),
        }
    }

    /// Current leaf sequence
    pub fn leaves(&self) -> Result<Vec<[u8; 32]>> {
        self.snapshot().leaves()
    }

    /// Current maintained counters
    pub fn counters(&self) -> Result<Tally> {
        self.snapshot().counters()
    }

    /// Current candidate catalog, ordered by ID
    pub fn candidates(&self) -> Result<Vec<Candidate>> {
        self.snapshot().candidates()
    }

    // Statistics

    /// Get storage statistics
    pub fn get_stats(&self) -> Result<StorageStats> {
        Ok(StorageStats {
            total_entries: self.next_sequence()?,
            total_candidates: self.last_candidate_id()?,
            total_voters: self.last_voter_id()?,
        })
    }
}

#[cfg(test)]
impl Storage {
    /// Make the next commit fail without writing anything
    pub(crate) fn fail_next_commit(&self) {
        self.faults
            .fail_next
            .store(true, std::sync::atomic::Ordering::SeqCst);
    }

    /// Stall every commit, as a slow fsync would
    pub(crate) fn delay_commits(&self, delay: std::time::Duration) {
        self.faults
            .delay_ms
            .store(delay.as_millis() as u64, std::sync::atomic::Ordering::SeqCst);
    }
}

/// Consistent read view over the ledger
pub struct LedgerSnapshot<'a> {
    storage: &'a Storage,
    snapshot: Snapshot<'a>,
}

impl LedgerSnapshot<'_> {
    /// Ordered leaf sequence; fails if the sequence has a hole
    pub fn leaves(&self) -> Result<Vec<[u8; 32]>> {
        let cf = self.storage.cf_handle(CF_LEAVES)?;
        let mut leaves = Vec::new();

        for item in self.snapshot.iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item?;
            let sequence = decode_u64(&key)?;
            if sequence != leaves.len() as u64 {
                return Err(Error::InvariantViolation(format!(
                    "leaf sequence gap: expected {}, found {}",
                    leaves.len(),
                    sequence
                )));
            }
            let hash = <[u8; 32]>::try_from(&value[..]).map_err(|_| {
                Error::Storage(format!("leaf {} is {} bytes, expected 32", sequence, value.len()))
            })?;
            leaves.push(hash);
        }

        Ok(leaves)
    }

    /// Maintained counters
    pub fn counters(&self) -> Result<Tally> {
        let cf = self.storage.cf_handle(CF_TALLY)?;
        let mut counts = Tally::new();

        for item in self.snapshot.iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item?;
            counts.insert(CandidateId(decode_u64(&key)?), decode_u64(&value)?);
        }

        Ok(counts)
    }

    /// All ledger entries in sequence order
    pub fn entries(&self) -> Result<Vec<LedgerEntry>> {
        let cf = self.storage.cf_handle(CF_ENTRIES)?;
        self.snapshot
            .iterator_cf(cf, IteratorMode::Start)
            .map(|item| {
                let (_, value) = item?;
                Ok(bincode::deserialize(&value)?)
            })
            .collect()
    }

    /// Candidate catalog ordered by ID
    pub fn candidates(&self) -> Result<Vec<Candidate>> {
        let cf = self.storage.cf_handle(CF_CANDIDATES)?;
        self.snapshot
            .iterator_cf(cf, IteratorMode::Start)
            .map(|item| {
                let (_, value) = item?;
                Ok(bincode::deserialize(&value)?)
            })
            .collect()
    }

    /// Entry by sequence
    pub fn entry(&self, sequence: u64) -> Result<LedgerEntry> {
        let cf = self.storage.cf_handle(CF_ENTRIES)?;
        let value = self
            .snapshot
            .get_cf(cf, sequence.to_be_bytes())?
            .ok_or(Error::EntryNotFound(sequence))?;
        Ok(bincode::deserialize(&value)?)
    }
}

fn decode_u64(bytes: &[u8]) -> Result<u64> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| Error::Storage(format!("expected 8-byte integer, got {} bytes", bytes.len())))?;
    Ok(u64::from_be_bytes(raw))
}

/// Storage statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageStats {
    /// Committed ledger entries
    pub total_entries: u64,
    /// Catalog candidates
    pub total_candidates: u64,
    /// Registered voters
    pub total_voters: u64,
}
