use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub type AccountId = String;
pub type Amount = u128;

pub const TOKEN_DECIMALS: u8 = 18;
pub const TOKEN_SCALE: Amount = 1_000_000_000_000_000_000; // 1 token = 1e18 base units

/// Converts whole tokens into base units at the default 18 decimals.
pub fn tokens(whole: u64) -> Amount {
    Amount::from(whole) * TOKEN_SCALE
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UnitsError {
    #[error("invalid amount {0:?}")]
    Malformed(String),
    #[error("amount {input:?} has more than {decimals} decimal places")]
    TooPrecise { input: String, decimals: u8 },
    #[error("amount {0:?} is too large")]
    Overflow(String),
}

/// Parses a decimal string such as `"100"` or `"0.25"` into base units.
pub fn parse_units(input: &str, decimals: u8) -> Result<Amount, UnitsError> {
    let trimmed = input.trim();
    let (whole, fraction) = match trimmed.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (trimmed, ""),
    };
    let digits_only = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if (whole.is_empty() && fraction.is_empty()) || !digits_only(whole) || !digits_only(fraction) {
        return Err(UnitsError::Malformed(input.to_string()));
    }
    if fraction.len() > usize::from(decimals) {
        return Err(UnitsError::TooPrecise {
            input: input.to_string(),
            decimals,
        });
    }
    let padded = format!("{whole}{fraction:0<width$}", width = usize::from(decimals));
    let padded = padded.trim_start_matches('0');
    if padded.is_empty() {
        return Ok(0);
    }
    padded
        .parse::<Amount>()
        .map_err(|_| UnitsError::Overflow(input.to_string()))
}

/// Formats base units as a decimal string without trailing zeros.
pub fn format_units(amount: Amount, decimals: u8) -> String {
    if decimals == 0 {
        return amount.to_string();
    }
    let scale = Amount::from(10u8).pow(u32::from(decimals));
    let whole = amount / scale;
    let fraction = amount % scale;
    if fraction == 0 {
        return whole.to_string();
    }
    let fraction = format!("{fraction:0>width$}", width = usize::from(decimals));
    format!("{whole}.{}", fraction.trim_end_matches('0'))
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("insufficient balance in account {account}: available {available}, required {required}")]
    InsufficientBalance {
        account: AccountId,
        available: Amount,
        required: Amount,
    },
    #[error("insufficient allowance from {owner} to {spender}: approved {approved}, required {required}")]
    InsufficientAllowance {
        owner: AccountId,
        spender: AccountId,
        approved: Amount,
        required: Amount,
    },
    #[error("state root mismatch for {symbol}: recorded {recorded}, computed {computed}")]
    StateRootMismatch {
        symbol: String,
        recorded: String,
        computed: String,
    },
}

/// Transferable-balance interface the staking engine relies on.
///
/// The acting identity is always passed explicitly: `from` for an owner
/// transfer, `spender` for a delegated one.
pub trait BalanceLedger {
    fn balance_of(&self, account: &AccountId) -> Amount;

    fn allowance(&self, owner: &AccountId, spender: &AccountId) -> Amount;

    fn transfer(
        &mut self,
        from: &AccountId,
        to: &AccountId,
        amount: Amount,
    ) -> Result<(), LedgerError>;

    /// Sets (not adds to) the amount `spender` may move out of `owner`.
    fn approve(&mut self, owner: &AccountId, spender: &AccountId, amount: Amount);

    fn transfer_from(
        &mut self,
        spender: &AccountId,
        from: &AccountId,
        to: &AccountId,
        amount: Amount,
    ) -> Result<(), LedgerError>;
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenMetadata {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub total_supply: Amount,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEvent {
    Mint {
        to: AccountId,
        amount: Amount,
    },
    Transfer {
        from: AccountId,
        to: AccountId,
        amount: Amount,
    },
    Approval {
        owner: AccountId,
        spender: AccountId,
        amount: Amount,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub meta: TokenMetadata,
    pub balances: BTreeMap<AccountId, Amount>,
    pub allowances: BTreeMap<AccountId, BTreeMap<AccountId, Amount>>,
    pub events: Vec<LedgerEvent>,
    pub state_root: String,
}

/// In-memory fungible token with ERC-20 style allowances.
///
/// Zero balances and zero allowances are pruned so that two ledgers holding
/// the same funds always produce the same state root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenLedger {
    meta: TokenMetadata,
    balances: BTreeMap<AccountId, Amount>,
    allowances: BTreeMap<AccountId, BTreeMap<AccountId, Amount>>,
    events: Vec<LedgerEvent>,
}

impl TokenLedger {
    /// Creates the token and mints the whole supply to `creator`.
    pub fn new(
        name: impl Into<String>,
        symbol: impl Into<String>,
        decimals: u8,
        total_supply: Amount,
        creator: &AccountId,
    ) -> Self {
        let mut ledger = Self {
            meta: TokenMetadata {
                name: name.into(),
                symbol: symbol.into(),
                decimals,
                total_supply,
            },
            balances: BTreeMap::new(),
            allowances: BTreeMap::new(),
            events: Vec::new(),
        };
        if total_supply > 0 {
            ledger.credit_account(creator, total_supply);
            ledger.events.push(LedgerEvent::Mint {
                to: creator.clone(),
                amount: total_supply,
            });
        }
        ledger
    }

    pub fn meta(&self) -> &TokenMetadata {
        &self.meta
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn symbol(&self) -> &str {
        &self.meta.symbol
    }

    pub fn total_supply(&self) -> Amount {
        self.meta.total_supply
    }

    pub fn events(&self) -> &[LedgerEvent] {
        &self.events
    }

    /// Sum of every balance; equals `total_supply` while the ledger is sound.
    /// `None` if the balances overflow.
    pub fn circulating(&self) -> Option<Amount> {
        self.balances
            .values()
            .try_fold(0, |total: Amount, balance| total.checked_add(*balance))
    }

    fn credit_account(&mut self, account: &AccountId, amount: Amount) {
        if amount == 0 {
            return;
        }
        *self.balances.entry(account.clone()).or_insert(0) += amount;
    }

    fn debit_account(&mut self, account: &AccountId, amount: Amount) -> Result<(), LedgerError> {
        let available = self.balance_of(account);
        if available < amount {
            return Err(LedgerError::InsufficientBalance {
                account: account.clone(),
                available,
                required: amount,
            });
        }
        if available == amount {
            self.balances.remove(account);
        } else if let Some(balance) = self.balances.get_mut(account) {
            *balance -= amount;
        }
        Ok(())
    }

    fn set_allowance(&mut self, owner: &AccountId, spender: &AccountId, amount: Amount) {
        if amount == 0 {
            if let Some(spenders) = self.allowances.get_mut(owner) {
                spenders.remove(spender);
                if spenders.is_empty() {
                    self.allowances.remove(owner);
                }
            }
            return;
        }
        self.allowances
            .entry(owner.clone())
            .or_default()
            .insert(spender.clone(), amount);
    }

    pub fn state_root(&self) -> [u8; 32] {
        compute_merkle_root(&self.meta, &self.balances, &self.allowances)
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            meta: self.meta.clone(),
            balances: self.balances.clone(),
            allowances: self.allowances.clone(),
            events: self.events.clone(),
            state_root: hex::encode(self.state_root()),
        }
    }

    /// Rebuilds a ledger and checks the recorded root against the balances.
    pub fn from_snapshot(snapshot: LedgerSnapshot) -> Result<Self, LedgerError> {
        let ledger = Self {
            meta: snapshot.meta,
            balances: snapshot.balances,
            allowances: snapshot.allowances,
            events: snapshot.events,
        };
        let computed = hex::encode(ledger.state_root());
        if !computed.eq_ignore_ascii_case(&snapshot.state_root) {
            return Err(LedgerError::StateRootMismatch {
                symbol: ledger.meta.symbol.clone(),
                recorded: snapshot.state_root,
                computed,
            });
        }
        Ok(ledger)
    }
}

impl BalanceLedger for TokenLedger {
    fn balance_of(&self, account: &AccountId) -> Amount {
        self.balances.get(account).copied().unwrap_or(0)
    }

    fn allowance(&self, owner: &AccountId, spender: &AccountId) -> Amount {
        self.allowances
            .get(owner)
            .and_then(|spenders| spenders.get(spender))
            .copied()
            .unwrap_or(0)
    }

    fn transfer(
        &mut self,
        from: &AccountId,
        to: &AccountId,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        self.debit_account(from, amount)?;
        self.credit_account(to, amount);
        self.events.push(LedgerEvent::Transfer {
            from: from.clone(),
            to: to.clone(),
            amount,
        });
        Ok(())
    }

    fn approve(&mut self, owner: &AccountId, spender: &AccountId, amount: Amount) {
        self.set_allowance(owner, spender, amount);
        self.events.push(LedgerEvent::Approval {
            owner: owner.clone(),
            spender: spender.clone(),
            amount,
        });
    }

    fn transfer_from(
        &mut self,
        spender: &AccountId,
        from: &AccountId,
        to: &AccountId,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        let approved = self.allowance(from, spender);
        if approved < amount {
            return Err(LedgerError::InsufficientAllowance {
                owner: from.clone(),
                spender: spender.clone(),
                approved,
                required: amount,
            });
        }
        // balance is checked before the allowance is spent
        self.transfer(from, to, amount)?;
        self.set_allowance(from, spender, approved - amount);
        Ok(())
    }
}

fn compute_merkle_root(
    meta: &TokenMetadata,
    balances: &BTreeMap<AccountId, Amount>,
    allowances: &BTreeMap<AccountId, BTreeMap<AccountId, Amount>>,
) -> [u8; 32] {
    let mut leaves: Vec<[u8; 32]> = Vec::new();
    let mut hasher = Sha256::new();
    hasher.update(b"meta");
    hasher.update(meta.symbol.as_bytes());
    hasher.update([meta.decimals]);
    hasher.update(meta.total_supply.to_le_bytes());
    leaves.push(hasher.finalize().into());
    for (account, balance) in balances {
        let mut hasher = Sha256::new();
        hasher.update(b"acct");
        hasher.update(account.as_bytes());
        hasher.update(balance.to_le_bytes());
        leaves.push(hasher.finalize().into());
    }
    for (owner, spenders) in allowances {
        for (spender, amount) in spenders {
            let mut hasher = Sha256::new();
            hasher.update(b"allow");
            hasher.update(owner.as_bytes());
            hasher.update(b"/");
            hasher.update(spender.as_bytes());
            hasher.update(amount.to_le_bytes());
            leaves.push(hasher.finalize().into());
        }
    }
    build_merkle(leaves)
}

fn build_merkle(mut leaves: Vec<[u8; 32]>) -> [u8; 32] {
    if leaves.is_empty() {
        return Sha256::digest(b"token-ledger-empty").into();
    }
    while leaves.len() > 1 {
        let mut next = Vec::with_capacity((leaves.len() + 1) / 2);
        for chunk in leaves.chunks(2) {
            let mut hasher = Sha256::new();
            hasher.update(b"node");
            hasher.update(chunk[0]);
            if chunk.len() == 2 {
                hasher.update(chunk[1]);
            } else {
                hasher.update(chunk[0]);
            }
            next.push(hasher.finalize().into());
        }
        leaves = next;
    }
    leaves[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dai(owner: &str) -> TokenLedger {
        TokenLedger::new("Mock DAI Token", "mDAI", 18, tokens(1_000_000), &owner.to_string())
    }

    #[test]
    fn units_parse_and_format() {
        assert_eq!(parse_units("100", 18).unwrap(), tokens(100));
        assert_eq!(parse_units("0.5", 2).unwrap(), 50);
        assert_eq!(parse_units(".25", 2).unwrap(), 25);
        assert_eq!(parse_units("0", 18).unwrap(), 0);
        assert_eq!(parse_units("7", 0).unwrap(), 7);
        assert!(matches!(parse_units("1.234", 2), Err(UnitsError::TooPrecise { .. })));
        assert!(matches!(parse_units("-1", 18), Err(UnitsError::Malformed(_))));
        assert!(matches!(parse_units(".", 18), Err(UnitsError::Malformed(_))));
        assert!(matches!(
            parse_units("999999999999999999999999", 18),
            Err(UnitsError::Overflow(_))
        ));

        assert_eq!(format_units(tokens(100), 18), "100");
        assert_eq!(format_units(1_500, 3), "1.5");
        assert_eq!(format_units(5, 2), "0.05");
        assert_eq!(format_units(42, 0), "42");
    }

    #[test]
    fn creator_receives_total_supply() {
        let ledger = dai("owner");
        assert_eq!(ledger.name(), "Mock DAI Token");
        assert_eq!(ledger.balance_of(&"owner".into()), tokens(1_000_000));
        assert_eq!(ledger.circulating(), Some(ledger.total_supply()));
        assert_eq!(ledger.events().len(), 1);
    }

    #[test]
    fn transfer_moves_funds_and_rejects_overdraft() {
        let mut ledger = dai("owner");
        ledger
            .transfer(&"owner".into(), &"investor".into(), tokens(100))
            .unwrap();
        assert_eq!(ledger.balance_of(&"investor".into()), tokens(100));

        let err = ledger
            .transfer(&"investor".into(), &"bob".into(), tokens(101))
            .unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientBalance {
                account: "investor".into(),
                available: tokens(100),
                required: tokens(101),
            }
        );
        assert_eq!(ledger.balance_of(&"investor".into()), tokens(100));
        assert_eq!(ledger.circulating(), Some(ledger.total_supply()));
    }

    #[test]
    fn transfer_from_spends_allowance() {
        let mut ledger = dai("owner");
        let (owner, farm) = ("owner".to_string(), "farm".to_string());
        ledger.approve(&owner, &farm, 500);

        let err = ledger.transfer_from(&farm, &owner, &farm, 501).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientAllowance { approved: 500, .. }));

        ledger.transfer_from(&farm, &owner, &farm, 300).unwrap();
        assert_eq!(ledger.allowance(&owner, &farm), 200);
        assert_eq!(ledger.balance_of(&farm), 300);

        ledger.transfer_from(&farm, &owner, &farm, 200).unwrap();
        assert_eq!(ledger.allowance(&owner, &farm), 0);
    }

    #[test]
    fn failed_transfer_from_keeps_allowance() {
        let mut ledger = dai("owner");
        let (poor, farm) = ("poor".to_string(), "farm".to_string());
        ledger.approve(&poor, &farm, 10);
        let err = ledger.transfer_from(&farm, &poor, &farm, 10).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { .. }));
        assert_eq!(ledger.allowance(&poor, &farm), 10);
    }

    #[test]
    fn circulating_reports_overflow() {
        let mut ledger = dai("owner");
        ledger.balances.insert("forged".into(), Amount::MAX);
        assert_eq!(ledger.circulating(), None);
    }

    #[test]
    fn state_root_ignores_event_history() {
        let mut a = dai("owner");
        let b = dai("owner");
        a.transfer(&"owner".into(), &"x".into(), 5).unwrap();
        a.transfer(&"x".into(), &"owner".into(), 5).unwrap();
        assert_eq!(a.state_root(), b.state_root());
        assert_ne!(a.events().len(), b.events().len());
    }

    #[test]
    fn snapshot_detects_tampering() {
        let mut ledger = dai("owner");
        ledger.transfer(&"owner".into(), &"alice".into(), 42).unwrap();
        let mut snapshot = ledger.snapshot();
        assert_eq!(TokenLedger::from_snapshot(snapshot.clone()).unwrap(), ledger);

        snapshot.balances.insert("alice".into(), 4_200);
        let err = TokenLedger::from_snapshot(snapshot).unwrap_err();
        assert!(matches!(err, LedgerError::StateRootMismatch { .. }));
    }
}
