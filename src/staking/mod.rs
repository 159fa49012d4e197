//! Stake / unstake / reward issuance over two balance ledgers.

mod registry;

pub use registry::{StakeRecord, StakingRegistry};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::ledger::{AccountId, Amount, BalanceLedger, LedgerError};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StakingError {
    #[error("stake amount must be greater than zero")]
    InvalidAmount,
    #[error(transparent)]
    InsufficientAllowance(LedgerError),
    #[error(transparent)]
    InsufficientBalance(LedgerError),
    #[error("{caller} is not the operator and may not issue rewards")]
    Unauthorized { caller: AccountId },
    #[error("{caller} is the farm account and cannot initiate calls")]
    ContractCaller { caller: AccountId },
    #[error("roster index {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("refund of {amount} to {account} failed")]
    RefundTransferFailed {
        account: AccountId,
        amount: Amount,
        #[source]
        source: LedgerError,
    },
    #[error("reward of {amount} to {account} failed")]
    RewardTransferFailed {
        account: AccountId,
        amount: Amount,
        #[source]
        source: LedgerError,
    },
}

impl From<LedgerError> for StakingError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientAllowance { .. } => StakingError::InsufficientAllowance(err),
            _ => StakingError::InsufficientBalance(err),
        }
    }
}

/// One reward transfer made by [`StakingEngine::issue_rewards`].
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RewardPayout {
    pub recipient: AccountId,
    pub amount: Amount,
}

/// The farm contract: holds staked funds and the reward pool under its own
/// `address` on both ledgers.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StakingEngine {
    name: String,
    address: AccountId,
    operator: AccountId,
    registry: StakingRegistry,
}

impl StakingEngine {
    pub fn new(name: impl Into<String>, address: AccountId, operator: AccountId) -> Self {
        Self {
            name: name.into(),
            address,
            operator,
            registry: StakingRegistry::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &AccountId {
        &self.address
    }

    pub fn operator(&self) -> &AccountId {
        &self.operator
    }

    pub fn registry(&self) -> &StakingRegistry {
        &self.registry
    }

    #[cfg(test)]
    pub(crate) fn registry_mut(&mut self) -> &mut StakingRegistry {
        &mut self.registry
    }

    pub fn staking_balance(&self, account: &AccountId) -> Amount {
        self.registry.staked_amount_of(account)
    }

    pub fn is_staking(&self, account: &AccountId) -> bool {
        self.registry.is_currently_staking(account)
    }

    /// `None` if the stakes overflow, which only a corrupted snapshot can cause.
    pub fn total_staked(&self) -> Option<Amount> {
        self.registry.total_staked()
    }

    /// Pulls `amount` of the stake asset from `caller` (which must have
    /// approved the farm address beforehand) and records the stake.
    pub fn stake<L: BalanceLedger>(
        &mut self,
        stake_ledger: &mut L,
        caller: &AccountId,
        amount: Amount,
    ) -> Result<(), StakingError> {
        if caller == &self.address {
            warn!(%caller, "farm account cannot stake with itself");
            return Err(StakingError::ContractCaller {
                caller: caller.clone(),
            });
        }
        if amount == 0 {
            warn!(%caller, "rejected zero stake");
            return Err(StakingError::InvalidAmount);
        }
        stake_ledger
            .transfer_from(&self.address, caller, &self.address, amount)
            .map_err(|err| {
                warn!(%caller, amount, error = %err, "stake transfer rejected");
                StakingError::from(err)
            })?;
        self.registry.record_stake(caller, amount);
        info!(
            %caller,
            amount,
            staked = self.registry.staked_amount_of(caller),
            "stake recorded"
        );
        Ok(())
    }

    /// Returns the caller's whole stake. A caller with nothing staked gets a
    /// no-op. If the refund fails the cleared record is put back.
    pub fn unstake<L: BalanceLedger>(
        &mut self,
        stake_ledger: &mut L,
        caller: &AccountId,
    ) -> Result<Amount, StakingError> {
        let previous = self.registry.record_of(caller);
        let amount = self.registry.clear_stake(caller);
        if amount == 0 {
            debug!(%caller, "unstake with nothing staked");
            return Ok(0);
        }
        if let Err(source) = stake_ledger.transfer(&self.address, caller, amount) {
            warn!(%caller, amount, error = %source, "refund failed, stake restored");
            self.registry.restore(caller, previous);
            return Err(StakingError::RefundTransferFailed {
                account: caller.clone(),
                amount,
                source,
            });
        }
        info!(%caller, amount, "unstaked");
        Ok(amount)
    }

    /// Pays every currently staking roster member one reward unit per staked
    /// unit, in roster order. Only the operator may call this.
    ///
    /// The reward pool is checked against the full payout before anything
    /// moves, so an underfunded pool fails without touching the ledger.
    pub fn issue_rewards<L: BalanceLedger>(
        &self,
        reward_ledger: &mut L,
        caller: &AccountId,
    ) -> Result<Vec<RewardPayout>, StakingError> {
        if caller != &self.operator {
            warn!(%caller, "unauthorized reward issuance");
            return Err(StakingError::Unauthorized {
                caller: caller.clone(),
            });
        }

        let mut payouts = Vec::new();
        for index in 0..self.registry.roster_size() {
            let account = self.registry.roster_entry_at(index)?;
            if !self.registry.is_currently_staking(account) {
                continue;
            }
            payouts.push(RewardPayout {
                recipient: account.clone(),
                amount: self.registry.staked_amount_of(account),
            });
        }

        let required: Amount = payouts.iter().map(|payout| payout.amount).sum();
        let pool = reward_ledger.balance_of(&self.address);
        if pool < required {
            let first_unpaid = payouts
                .iter()
                .scan(0, |paid, payout| {
                    *paid += payout.amount;
                    Some((*paid, payout))
                })
                .find(|(paid, _)| *paid > pool)
                .map(|(_, payout)| payout.clone());
            if let Some(payout) = first_unpaid {
                warn!(pool, required, recipient = %payout.recipient, "reward pool exhausted");
                return Err(StakingError::RewardTransferFailed {
                    account: payout.recipient,
                    amount: payout.amount,
                    source: LedgerError::InsufficientBalance {
                        account: self.address.clone(),
                        available: pool,
                        required,
                    },
                });
            }
        }

        for payout in &payouts {
            reward_ledger
                .transfer(&self.address, &payout.recipient, payout.amount)
                .map_err(|source| StakingError::RewardTransferFailed {
                    account: payout.recipient.clone(),
                    amount: payout.amount,
                    source,
                })?;
            debug!(recipient = %payout.recipient, amount = payout.amount, "reward paid");
        }
        info!(
            recipients = payouts.len(),
            total = required,
            roster = self.registry.roster_size(),
            "rewards issued"
        );
        Ok(payouts)
    }
}
