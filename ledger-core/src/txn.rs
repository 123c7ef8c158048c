//! Staged atomic units
//!
//! A [`LedgerTxn`] collects every write of one logical operation (wallet
//! mutations, ledger entries, records, index changes) in memory, serving its
//! own staged state back to reads. Nothing reaches RocksDB until the writer
//! actor commits the whole unit as one batch; a unit that returns an error is
//! simply dropped.

use crate::{
    error::{Error, Result},
    ids,
    storage::{index_key, index_tag, record_key, Record, Storage},
    types::{Money, Posting, TransactionStatus, UserId, Wallet, WalletTransaction},
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};

/// Attempts before giving up on a colliding random identifier
const MAX_IDENTIFIER_ATTEMPTS: usize = 8;

/// One atomic unit of ledger work
pub struct LedgerTxn<'a> {
    storage: &'a Storage,
    now: DateTime<Utc>,
    next_sequence: u64,
    wallets: BTreeMap<UserId, Wallet>,
    dirty_wallets: BTreeSet<UserId>,
    entries: Vec<WalletTransaction>,
    records: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    indices: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl std::fmt::Debug for LedgerTxn<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerTxn")
            .field("now", &self.now)
            .field("next_sequence", &self.next_sequence)
            .field("dirty_wallets", &self.dirty_wallets)
            .field("entries", &self.entries.len())
            .field("records", &self.records.len())
            .field("indices", &self.indices.len())
            .finish()
    }
}

impl<'a> LedgerTxn<'a> {
    /// Start a unit on top of the committed state
    pub(crate) fn begin(storage: &'a Storage) -> Self {
        Self {
            storage,
            now: Utc::now(),
            next_sequence: storage.last_sequence() + 1,
            wallets: BTreeMap::new(),
            dirty_wallets: BTreeSet::new(),
            entries: Vec::new(),
            records: BTreeMap::new(),
            indices: BTreeMap::new(),
        }
    }

    /// Clock reading taken when the unit started; all timestamps of the unit use it
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Committed state, for scans that do not need staged writes
    pub fn storage(&self) -> &Storage {
        self.storage
    }

    /// Get-or-create the user's wallet
    pub fn wallet(&mut self, user: UserId) -> Result<Wallet> {
        if let Some(wallet) = self.wallets.get(&user) {
            return Ok(wallet.clone());
        }

        let wallet = match self.storage.get_wallet(user)? {
            Some(wallet) => wallet,
            None => {
                self.dirty_wallets.insert(user);
                Wallet::new(user, self.now)
            }
        };

        self.wallets.insert(user, wallet.clone());
        Ok(wallet)
    }

    pub(crate) fn stage_wallet(&mut self, wallet: Wallet) {
        self.dirty_wallets.insert(wallet.user_id);
        self.wallets.insert(wallet.user_id, wallet);
    }

    /// Append one ledger entry. Only the wallet service calls this, right
    /// after staging the balance mutation the entry describes.
    pub(crate) fn append(
        &mut self,
        user: UserId,
        amount: Money,
        balance_after: Money,
        posting: Posting,
    ) -> Result<WalletTransaction> {
        let transaction_id =
            self.unique_identifier(index_tag::TRANSACTION_ID, ids::transaction_id)?;
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let entry = WalletTransaction {
            sequence,
            transaction_id,
            user_id: user,
            kind: posting.kind,
            amount,
            balance_after,
            description: posting.description,
            metadata: posting.metadata,
            status: TransactionStatus::Completed,
            reference: posting.reference,
            created_at: self.now,
        };

        self.indices.insert(
            index_key(index_tag::TRANSACTION_ID, &[entry.transaction_id.as_bytes()]),
            Some(sequence.to_be_bytes().to_vec()),
        );
        self.indices.insert(
            index_key(
                index_tag::USER_ENTRIES,
                &[&user.to_key(), &sequence.to_be_bytes()],
            ),
            Some(Vec::new()),
        );
        self.entries.push(entry.clone());

        Ok(entry)
    }

    /// Entries appended so far in this unit
    pub fn entries(&self) -> &[WalletTransaction] {
        &self.entries
    }

    /// Read a record, staged value first
    pub fn get<R: Record>(&self, key: &[u8]) -> Result<Option<R>> {
        let full_key = record_key(R::COLLECTION, key);
        let raw = match self.records.get(&full_key) {
            Some(staged) => staged.clone(),
            None => self.storage.get_raw_record(&full_key)?,
        };

        raw.map(|value| bincode::deserialize(&value).map_err(Error::from))
            .transpose()
    }

    /// Stage a record write
    pub fn put<R: Record>(&mut self, record: &R) -> Result<()> {
        let full_key = record_key(R::COLLECTION, &record.record_key());
        self.records
            .insert(full_key, Some(bincode::serialize(record)?));
        Ok(())
    }

    /// Read an index value, staged value first
    pub fn index_get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.indices.get(key) {
            Some(staged) => Ok(staged.clone()),
            None => self.storage.index_get(key),
        }
    }

    /// Stage an index entry
    pub fn put_index(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.indices.insert(key, Some(value));
    }

    /// Stage an index removal
    pub fn delete_index(&mut self, key: Vec<u8>) {
        self.indices.insert(key, None);
    }

    /// Generate an identifier not yet present under `tag`. The caller is
    /// expected to stage the index entry that claims it.
    pub fn unique_identifier(&self, tag: u8, generate: impl Fn() -> String) -> Result<String> {
        for _ in 0..MAX_IDENTIFIER_ATTEMPTS {
            let candidate = generate();
            if self
                .index_get(&index_key(tag, &[candidate.as_bytes()]))?
                .is_none()
            {
                return Ok(candidate);
            }
            tracing::warn!(identifier = %candidate, "Identifier collision, regenerating");
        }

        Err(Error::InvariantViolation(format!(
            "no free identifier under tag {} after {} attempts",
            tag as char, MAX_IDENTIFIER_ATTEMPTS
        )))
    }

    /// Nothing staged
    pub fn is_empty(&self) -> bool {
        self.dirty_wallets.is_empty()
            && self.entries.is_empty()
            && self.records.is_empty()
            && self.indices.is_empty()
    }

    pub(crate) fn into_unit(mut self) -> StagedUnit {
        let wallets = self
            .dirty_wallets
            .iter()
            .filter_map(|user| self.wallets.remove(user))
            .collect();

        StagedUnit {
            wallets,
            entries: self.entries,
            records: self.records.into_iter().collect(),
            indices: self.indices.into_iter().collect(),
        }
    }
}

/// Writes of a finished unit, ready for one batch
#[derive(Debug, Default)]
pub(crate) struct StagedUnit {
    pub(crate) wallets: Vec<Wallet>,
    pub(crate) entries: Vec<WalletTransaction>,
    pub(crate) records: Vec<(Vec<u8>, Option<Vec<u8>>)>,
    pub(crate) indices: Vec<(Vec<u8>, Option<Vec<u8>>)>,
}

impl StagedUnit {
    pub(crate) fn is_empty(&self) -> bool {
        self.wallets.is_empty()
            && self.entries.is_empty()
            && self.records.is_empty()
            && self.indices.is_empty()
    }
}
