//! Host runtime for the farm: owns both token ledgers and the staking
//! engine, sequences calls, and commits each call all-or-nothing.

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    config::{ConfigError, FarmConfig},
    ledger::{AccountId, Amount, BalanceLedger, LedgerError, LedgerSnapshot, TokenLedger},
    staking::{RewardPayout, StakingEngine, StakingError},
};

pub const SNAPSHOT_VERSION: u8 = 1;

#[derive(Debug, thiserror::Error)]
pub enum FarmError {
    #[error(transparent)]
    Staking(#[from] StakingError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to access state file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid state file {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("unsupported snapshot version {0}")]
    UnsupportedVersion(u8),
    #[error("inconsistent farm state: {0}")]
    Inconsistent(String),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FarmCall {
    ApproveStake { spender: AccountId, amount: Amount },
    TransferStake { to: AccountId, amount: Amount },
    TransferReward { to: AccountId, amount: Amount },
    Stake { amount: Amount },
    Unstake,
    IssueRewards,
}

impl FarmCall {
    pub fn kind(&self) -> &'static str {
        match self {
            FarmCall::ApproveStake { .. } => "approve_stake",
            FarmCall::TransferStake { .. } => "transfer_stake",
            FarmCall::TransferReward { .. } => "transfer_reward",
            FarmCall::Stake { .. } => "stake",
            FarmCall::Unstake => "unstake",
            FarmCall::IssueRewards => "issue_rewards",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    Applied,
    Unstaked { refunded: Amount },
    RewardsIssued { payouts: Vec<RewardPayout> },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FarmReceipt {
    pub height: u64,
    pub caller: AccountId,
    pub call: FarmCall,
    pub outcome: CallOutcome,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct FarmState {
    stake_token: TokenLedger,
    reward_token: TokenLedger,
    engine: StakingEngine,
}

impl FarmState {
    fn apply(&mut self, caller: &AccountId, call: &FarmCall) -> Result<CallOutcome, FarmError> {
        match call {
            FarmCall::ApproveStake { spender, amount } => {
                self.stake_token.approve(caller, spender, *amount);
                Ok(CallOutcome::Applied)
            }
            FarmCall::TransferStake { to, amount } => {
                self.stake_token.transfer(caller, to, *amount)?;
                Ok(CallOutcome::Applied)
            }
            FarmCall::TransferReward { to, amount } => {
                self.reward_token.transfer(caller, to, *amount)?;
                Ok(CallOutcome::Applied)
            }
            FarmCall::Stake { amount } => {
                self.engine.stake(&mut self.stake_token, caller, *amount)?;
                Ok(CallOutcome::Applied)
            }
            FarmCall::Unstake => {
                let refunded = self.engine.unstake(&mut self.stake_token, caller)?;
                Ok(CallOutcome::Unstaked { refunded })
            }
            FarmCall::IssueRewards => {
                let payouts = self.engine.issue_rewards(&mut self.reward_token, caller)?;
                Ok(CallOutcome::RewardsIssued { payouts })
            }
        }
    }

    fn check_invariants(&self) -> Result<(), FarmError> {
        if !self.engine.registry().is_consistent() {
            return Err(FarmError::Inconsistent(
                "staking registry records disagree with roster".into(),
            ));
        }
        for token in [&self.stake_token, &self.reward_token] {
            let circulating = token.circulating().ok_or_else(|| {
                FarmError::Inconsistent(format!("{} balances overflow", token.symbol()))
            })?;
            if circulating != token.total_supply() {
                return Err(FarmError::Inconsistent(format!(
                    "{} balances sum to {} but supply is {}",
                    token.symbol(),
                    circulating,
                    token.total_supply()
                )));
            }
        }
        let owed = self
            .engine
            .total_staked()
            .ok_or_else(|| FarmError::Inconsistent("staked amounts overflow".into()))?;
        let held = self.stake_token.balance_of(self.engine.address());
        if held < owed {
            return Err(FarmError::Inconsistent(format!(
                "farm holds {} {} but owes stakers {}",
                held,
                self.stake_token.symbol(),
                owed
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FarmSnapshot {
    pub version: u8,
    pub height: u64,
    pub engine: StakingEngine,
    pub stake_token: LedgerSnapshot,
    pub reward_token: LedgerSnapshot,
    pub receipts: Vec<FarmReceipt>,
}

/// Single-writer farm instance. Every call runs against a staged copy of the
/// ledgers and the engine; the copy replaces the live state only when the
/// call succeeds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Farm {
    state: FarmState,
    height: u64,
    receipts: Vec<FarmReceipt>,
}

impl Farm {
    /// Creates both tokens with their supply held by the operator, moves the
    /// reward funding into the farm and applies the seed transfers.
    pub fn deploy(config: &FarmConfig) -> Result<Self, FarmError> {
        config.validate()?;
        let operator = config.operator.clone();
        let stake_token = TokenLedger::new(
            config.stake_token.name.clone(),
            config.stake_token.symbol.clone(),
            config.stake_token.decimals,
            config.stake_token.total_supply(),
            &operator,
        );
        let reward_token = TokenLedger::new(
            config.reward_token.name.clone(),
            config.reward_token.symbol.clone(),
            config.reward_token.decimals,
            config.reward_token.total_supply(),
            &operator,
        );
        let engine = StakingEngine::new(
            config.farm_name.clone(),
            config.farm_address.clone(),
            operator.clone(),
        );
        let mut farm = Self {
            state: FarmState {
                stake_token,
                reward_token,
                engine,
            },
            height: 0,
            receipts: Vec::new(),
        };

        farm.submit(
            &operator,
            FarmCall::TransferReward {
                to: config.farm_address.clone(),
                amount: config.reward_token.base_units(config.reward_funding),
            },
        )?;
        for seed in &config.seed_transfers {
            farm.submit(
                &operator,
                FarmCall::TransferStake {
                    to: seed.to.clone(),
                    amount: config.stake_token.base_units(seed.amount),
                },
            )?;
        }
        info!(
            farm = %config.farm_address,
            operator = %operator,
            stake = %config.stake_token.symbol,
            reward = %config.reward_token.symbol,
            "farm deployed"
        );
        Ok(farm)
    }

    /// Runs one call for `caller`. On error nothing is committed.
    ///
    /// The farm account only moves funds from inside engine operations, so it
    /// is never accepted as the caller of a call. A staged state that breaks
    /// the books is discarded like any other failure.
    pub fn submit(&mut self, caller: &AccountId, call: FarmCall) -> Result<FarmReceipt, FarmError> {
        if caller == self.state.engine.address() {
            warn!(%caller, call = call.kind(), "farm account cannot initiate calls");
            return Err(StakingError::ContractCaller {
                caller: caller.clone(),
            }
            .into());
        }
        let mut staged = self.state.clone();
        let applied = staged
            .apply(caller, &call)
            .and_then(|outcome| staged.check_invariants().map(|()| outcome));
        let outcome = match applied {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(%caller, call = call.kind(), error = %err, "call rejected");
                return Err(err);
            }
        };
        self.state = staged;
        self.height += 1;
        let receipt = FarmReceipt {
            height: self.height,
            caller: caller.clone(),
            call,
            outcome,
        };
        info!(
            height = receipt.height,
            %caller,
            call = receipt.call.kind(),
            "call committed"
        );
        self.receipts.push(receipt.clone());
        Ok(receipt)
    }

    /// Approves the farm to pull `amount` stake tokens from `caller`.
    pub fn approve_stake(&mut self, caller: &AccountId, amount: Amount) -> Result<FarmReceipt, FarmError> {
        let spender = self.state.engine.address().clone();
        self.submit(caller, FarmCall::ApproveStake { spender, amount })
    }

    pub fn stake(&mut self, caller: &AccountId, amount: Amount) -> Result<FarmReceipt, FarmError> {
        self.submit(caller, FarmCall::Stake { amount })
    }

    pub fn unstake(&mut self, caller: &AccountId) -> Result<Amount, FarmError> {
        match self.submit(caller, FarmCall::Unstake)?.outcome {
            CallOutcome::Unstaked { refunded } => Ok(refunded),
            other => unreachable!("unstake produced {other:?}"),
        }
    }

    pub fn issue_rewards(&mut self, caller: &AccountId) -> Result<Vec<RewardPayout>, FarmError> {
        match self.submit(caller, FarmCall::IssueRewards)?.outcome {
            CallOutcome::RewardsIssued { payouts } => Ok(payouts),
            other => unreachable!("issue_rewards produced {other:?}"),
        }
    }

    pub fn staking_balance(&self, account: &AccountId) -> Amount {
        self.state.engine.staking_balance(account)
    }

    pub fn is_staking(&self, account: &AccountId) -> bool {
        self.state.engine.is_staking(account)
    }

    pub fn engine(&self) -> &StakingEngine {
        &self.state.engine
    }

    pub fn stake_token(&self) -> &TokenLedger {
        &self.state.stake_token
    }

    pub fn reward_token(&self) -> &TokenLedger {
        &self.state.reward_token
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn receipts(&self) -> &[FarmReceipt] {
        &self.receipts
    }

    pub fn snapshot(&self) -> FarmSnapshot {
        FarmSnapshot {
            version: SNAPSHOT_VERSION,
            height: self.height,
            engine: self.state.engine.clone(),
            stake_token: self.state.stake_token.snapshot(),
            reward_token: self.state.reward_token.snapshot(),
            receipts: self.receipts.clone(),
        }
    }

    pub fn from_snapshot(snapshot: FarmSnapshot) -> Result<Self, FarmError> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(FarmError::UnsupportedVersion(snapshot.version));
        }
        let state = FarmState {
            stake_token: TokenLedger::from_snapshot(snapshot.stake_token)?,
            reward_token: TokenLedger::from_snapshot(snapshot.reward_token)?,
            engine: snapshot.engine,
        };
        state.check_invariants()?;
        Ok(Self {
            state,
            height: snapshot.height,
            receipts: snapshot.receipts,
        })
    }

    pub fn load(path: &Path) -> Result<Self, FarmError> {
        let raw = fs::read(path).map_err(|source| FarmError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let snapshot: FarmSnapshot =
            serde_json::from_slice(&raw).map_err(|source| FarmError::Json {
                path: path.display().to_string(),
                source,
            })?;
        Self::from_snapshot(snapshot)
    }

    pub fn save(&self, path: &Path) -> Result<(), FarmError> {
        let io_err = |source| FarmError::Io {
            path: path.display().to_string(),
            source,
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(io_err)?;
            }
        }
        let encoded = serde_json::to_vec_pretty(&self.snapshot()).map_err(|source| FarmError::Json {
            path: path.display().to_string(),
            source,
        })?;
        fs::write(path, encoded).map_err(io_err)
    }
}
