//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `wallets` - Wallet balances (key: user_id)
//! - `transactions` - Append-only ledger (key: sequence)
//! - `records` - Order, deposit and product records (key: collection || id)
//! - `indices` - Secondary indices for fast lookups (key: tag || fields)
//!
//! Every atomic unit is committed as a single `WriteBatch`, so a unit's
//! wallets, entries, records and indices become visible together or not at all.

use crate::{
    error::{Error, Result},
    txn::StagedUnit,
    types::{UserId, Wallet, WalletTransaction},
    Config,
};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DBCompactionStyle, Direction, IteratorMode, Options,
    WriteBatch, WriteOptions, DB,
};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Column family names
const CF_WALLETS: &str = "wallets";
const CF_TRANSACTIONS: &str = "transactions";
const CF_RECORDS: &str = "records";
const CF_INDICES: &str = "indices";

/// Index tags owned by the ledger. Upper layers must pick other tags.
pub mod index_tag {
    /// user_id || sequence -> empty
    pub const USER_ENTRIES: u8 = b'u';
    /// transaction_id -> sequence
    pub const TRANSACTION_ID: u8 = b't';
}

/// Record collections stored next to the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Collection {
    /// Marketplace orders
    Orders = b'O',
    /// Crypto deposit requests
    Deposits = b'D',
    /// Product catalog mirror
    Products = b'P',
}

/// A record persisted in the `records` column family
pub trait Record: Serialize + DeserializeOwned {
    /// Collection the record lives in
    const COLLECTION: Collection;

    /// Primary key within the collection
    fn record_key(&self) -> Vec<u8>;
}

/// Build an index key: tag followed by the concatenated parts
pub fn index_key(tag: u8, parts: &[&[u8]]) -> Vec<u8> {
    let len = 1 + parts.iter().map(|p| p.len()).sum::<usize>();
    let mut key = Vec::with_capacity(len);
    key.push(tag);
    for part in parts {
        key.extend_from_slice(part);
    }
    key
}

pub(crate) fn record_key(collection: Collection, key: &[u8]) -> Vec<u8> {
    let mut full = Vec::with_capacity(key.len() + 1);
    full.push(collection as u8);
    full.extend_from_slice(key);
    full
}

/// Iteration order for index scans
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOrder {
    /// Ascending keys
    Forward,
    /// Descending keys (newest first for time-ordered keys)
    Reverse,
}

/// Storage wrapper for RocksDB
pub struct Storage {
    db: DB,
    last_sequence: AtomicU64,
    sync_writes: bool,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("path", &self.db.path())
            .field("last_sequence", &self.last_sequence())
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
        db_opts.set_target_file_size_base(config.rocksdb.target_file_size_mb * 1024 * 1024);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);
        db_opts.set_compaction_style(DBCompactionStyle::Level);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_WALLETS, Self::cf_options_wallets()),
            ColumnFamilyDescriptor::new(CF_TRANSACTIONS, Self::cf_options_transactions()),
            ColumnFamilyDescriptor::new(CF_RECORDS, Self::cf_options_records()),
            ColumnFamilyDescriptor::new(CF_INDICES, Self::cf_options_indices()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        let storage = Self {
            db,
            last_sequence: AtomicU64::new(0),
            sync_writes: config.rocksdb.sync_writes,
        };

        let last_sequence = storage.load_last_sequence()?;
        storage.last_sequence.store(last_sequence, Ordering::Release);

        tracing::info!(
            path = ?path,
            last_sequence,
            "Opened ledger storage"
        );

        Ok(storage)
    }

    // Column family options

    fn cf_options_wallets() -> Options {
        let mut opts = Options::default();
        // Wallets are read on every unit, use LZ4 for speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_transactions() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts.set_bottommost_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_records() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_indices() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false); // 10 bits per key
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    // Helper: get column family handle

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    fn load_last_sequence(&self) -> Result<u64> {
        let cf = self.cf_handle(CF_TRANSACTIONS)?;
        match self.db.iterator_cf(cf, IteratorMode::End).next() {
            Some(item) => {
                let (key, _) = item?;
                decode_u64(&key)
            }
            None => Ok(0),
        }
    }

    /// Sequence of the newest committed ledger entry (0 when empty)
    pub fn last_sequence(&self) -> u64 {
        self.last_sequence.load(Ordering::Acquire)
    }

    // Wallet operations

    /// Get wallet by owner
    pub fn get_wallet(&self, user: UserId) -> Result<Option<Wallet>> {
        let cf = self.cf_handle(CF_WALLETS)?;
        self.db
            .get_cf(cf, user.to_key())?
            .map(|value| bincode::deserialize(&value).map_err(Error::from))
            .transpose()
    }

    // Ledger entry operations

    /// Get ledger entry by sequence
    pub fn get_entry(&self, sequence: u64) -> Result<Option<WalletTransaction>> {
        let cf = self.cf_handle(CF_TRANSACTIONS)?;
        self.db
            .get_cf(cf, sequence.to_be_bytes())?
            .map(|value| bincode::deserialize(&value).map_err(Error::from))
            .transpose()
    }

    /// Get ledger entry by its public identifier
    pub fn find_transaction(&self, transaction_id: &str) -> Result<Option<WalletTransaction>> {
        let key = index_key(index_tag::TRANSACTION_ID, &[transaction_id.as_bytes()]);
        match self.index_get(&key)? {
            Some(value) => self.get_entry(decode_u64(&value)?),
            None => Ok(None),
        }
    }

    /// Ledger entries of one user
    pub fn entries_for(
        &self,
        user: UserId,
        order: ScanOrder,
        offset: usize,
        limit: Option<usize>,
    ) -> Result<Vec<WalletTransaction>> {
        let prefix = index_key(index_tag::USER_ENTRIES, &[&user.to_key()]);

        self.scan_prefix(&prefix, order, offset, limit)?
            .into_iter()
            .map(|(key, _)| {
                let sequence = decode_u64(&key[prefix.len()..])?;
                self.get_entry(sequence)?.ok_or_else(|| {
                    Error::InvariantViolation(format!(
                        "index points at missing ledger entry {}",
                        sequence
                    ))
                })
            })
            .collect()
    }

    // Record operations

    /// Get a record by primary key
    pub fn get_record<R: Record>(&self, key: &[u8]) -> Result<Option<R>> {
        self.get_raw_record(&record_key(R::COLLECTION, key))?
            .map(|value| bincode::deserialize(&value).map_err(Error::from))
            .transpose()
    }

    pub(crate) fn get_raw_record(&self, full_key: &[u8]) -> Result<Option<Vec<u8>>> {
        let cf = self.cf_handle(CF_RECORDS)?;
        Ok(self.db.get_cf(cf, full_key)?)
    }

    // Index operations

    /// Get an index value
    pub fn index_get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let cf = self.cf_handle(CF_INDICES)?;
        Ok(self.db.get_cf(cf, key)?)
    }

    /// Scan index entries sharing `prefix`
    pub fn scan_prefix(
        &self,
        prefix: &[u8],
        order: ScanOrder,
        offset: usize,
        limit: Option<usize>,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let cf = self.cf_handle(CF_INDICES)?;
        let upper = prefix_upper_bound(prefix);
        let mode = match order {
            ScanOrder::Forward => IteratorMode::From(prefix, Direction::Forward),
            ScanOrder::Reverse => IteratorMode::From(&upper, Direction::Reverse),
        };
        let limit = limit.unwrap_or(usize::MAX);

        let mut skipped = 0;
        let mut found = Vec::new();
        for item in self.db.iterator_cf(cf, mode) {
            let (key, value) = item?;
            if !key.starts_with(prefix) || found.len() >= limit {
                break;
            }
            if skipped < offset {
                skipped += 1;
                continue;
            }
            found.push((key.to_vec(), value.to_vec()));
        }

        Ok(found)
    }

    /// Scan index entries in `[start, end)`, ascending
    pub fn scan_range(
        &self,
        start: &[u8],
        end: &[u8],
        limit: Option<usize>,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let cf = self.cf_handle(CF_INDICES)?;
        let limit = limit.unwrap_or(usize::MAX);

        let mut found = Vec::new();
        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(start, Direction::Forward))
        {
            let (key, value) = item?;
            if key.as_ref() >= end || found.len() >= limit {
                break;
            }
            found.push((key.to_vec(), value.to_vec()));
        }

        Ok(found)
    }

    // Batch operations (atomic)

    /// Commit one staged unit as a single write batch
    pub(crate) fn write_unit(&self, unit: StagedUnit) -> Result<CommitSummary> {
        let summary = CommitSummary {
            entries: unit.entries.len(),
            wallets: unit.wallets.len(),
            last_sequence: unit
                .entries
                .last()
                .map(|e| e.sequence)
                .unwrap_or_else(|| self.last_sequence()),
        };

        if unit.is_empty() {
            return Ok(summary);
        }

        let mut batch = WriteBatch::default();

        // 1. Wallets
        let cf_wallets = self.cf_handle(CF_WALLETS)?;
        for wallet in &unit.wallets {
            if wallet.balance.is_negative() {
                return Err(Error::InvariantViolation(format!(
                    "negative balance {} for user {}",
                    wallet.balance, wallet.user_id
                )));
            }
            batch.put_cf(cf_wallets, wallet.user_id.to_key(), bincode::serialize(wallet)?);
        }

        // 2. Ledger entries
        let cf_transactions = self.cf_handle(CF_TRANSACTIONS)?;
        for entry in &unit.entries {
            batch.put_cf(
                cf_transactions,
                entry.sequence.to_be_bytes(),
                bincode::serialize(entry)?,
            );
        }

        // 3. Records
        let cf_records = self.cf_handle(CF_RECORDS)?;
        for (key, value) in &unit.records {
            match value {
                Some(value) => batch.put_cf(cf_records, key, value),
                None => batch.delete_cf(cf_records, key),
            }
        }

        // 4. Indices
        let cf_indices = self.cf_handle(CF_INDICES)?;
        for (key, value) in &unit.indices {
            match value {
                Some(value) => batch.put_cf(cf_indices, key, value),
                None => batch.delete_cf(cf_indices, key),
            }
        }

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.sync_writes);

        // Atomic commit
        self.db.write_opt(batch, &write_opts)?;
        self.last_sequence
            .store(summary.last_sequence, Ordering::Release);

        tracing::debug!(
            entries = summary.entries,
            wallets = summary.wallets,
            last_sequence = summary.last_sequence,
            "Unit committed"
        );

        Ok(summary)
    }
}

/// Result of a committed unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitSummary {
    /// Ledger entries appended
    pub entries: usize,
    /// Wallets written
    pub wallets: usize,
    /// Newest sequence after the commit
    pub last_sequence: u64,
}

fn prefix_upper_bound(prefix: &[u8]) -> Vec<u8> {
    let mut upper = prefix.to_vec();
    upper.extend_from_slice(&[0xFF; 64]);
    upper
}

pub(crate) fn decode_u64(bytes: &[u8]) -> Result<u64> {
    let raw: [u8; 8] = bytes
        .get(..8)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| Error::Storage(format!("malformed u64 key of {} bytes", bytes.len())))?;
    Ok(u64::from_be_bytes(raw))
}
