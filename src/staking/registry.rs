use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ledger::{AccountId, Amount};

use super::StakingError;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct StakeRecord {
    pub staked_amount: Amount,
    pub is_staking: bool,
}

/// Per-account stake state plus the roster of every account that has ever
/// staked.
///
/// The roster is append-only: an account is pushed on its first stake and is
/// never removed, so it keeps its position across stake/unstake cycles.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct StakingRegistry {
    records: BTreeMap<AccountId, StakeRecord>,
    roster: Vec<AccountId>,
}

impl StakingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `amount` to the account's stake. Callers reject zero amounts.
    pub fn record_stake(&mut self, account: &AccountId, amount: Amount) {
        debug_assert!(amount > 0, "zero stakes are rejected upstream");
        let first_stake = !self.records.contains_key(account);
        let record = self.records.entry(account.clone()).or_default();
        record.staked_amount += amount;
        record.is_staking = true;
        if first_stake {
            self.roster.push(account.clone());
        }
    }

    /// Zeroes the account's stake and returns what it held.
    pub fn clear_stake(&mut self, account: &AccountId) -> Amount {
        match self.records.get_mut(account) {
            Some(record) => {
                let previous = record.staked_amount;
                record.staked_amount = 0;
                record.is_staking = false;
                previous
            }
            None => 0,
        }
    }

    /// Puts back a record taken by [`clear_stake`](Self::clear_stake).
    pub(crate) fn restore(&mut self, account: &AccountId, record: StakeRecord) {
        self.records.insert(account.clone(), record);
    }

    pub fn record_of(&self, account: &AccountId) -> StakeRecord {
        self.records.get(account).cloned().unwrap_or_default()
    }

    pub fn is_currently_staking(&self, account: &AccountId) -> bool {
        self.records
            .get(account)
            .map(|record| record.is_staking)
            .unwrap_or(false)
    }

    pub fn staked_amount_of(&self, account: &AccountId) -> Amount {
        self.records
            .get(account)
            .map(|record| record.staked_amount)
            .unwrap_or(0)
    }

    pub fn roster_size(&self) -> usize {
        self.roster.len()
    }

    pub fn roster_entry_at(&self, index: usize) -> Result<&AccountId, StakingError> {
        self.roster.get(index).ok_or(StakingError::IndexOutOfRange {
            index,
            len: self.roster.len(),
        })
    }

    pub fn roster(&self) -> &[AccountId] {
        &self.roster
    }

    pub fn total_staked(&self) -> Option<Amount> {
        self.records
            .values()
            .try_fold(0, |total: Amount, record| total.checked_add(record.staked_amount))
    }

    /// Checks the flag/amount pairing and that records and roster agree.
    pub fn is_consistent(&self) -> bool {
        self.records.len() == self.roster.len()
            && self
                .records
                .values()
                .all(|record| record.is_staking == (record.staked_amount > 0))
            && self
                .roster
                .iter()
                .all(|account| self.records.contains_key(account))
    }
}
