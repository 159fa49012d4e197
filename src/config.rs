use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::ledger::{AccountId, Amount, TOKEN_DECIMALS};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{0}")]
    Invalid(String),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TokenConfig {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    /// Whole tokens, scaled by `decimals` at deploy time.
    pub supply: u64,
}

impl TokenConfig {
    pub fn base_units(&self, whole: u64) -> Amount {
        Amount::from(whole) * Amount::from(10u8).pow(u32::from(self.decimals))
    }

    pub fn total_supply(&self) -> Amount {
        self.base_units(self.supply)
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            symbol: String::new(),
            decimals: TOKEN_DECIMALS,
            supply: 1_000_000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeedTransfer {
    pub to: AccountId,
    /// Whole stake tokens.
    pub amount: u64,
}

/// Deployment parameters. Every field falls back to the canonical farm:
/// mDAI staked for DAPP rewards, the whole DAPP supply in the farm.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FarmConfig {
    pub farm_name: String,
    pub farm_address: AccountId,
    pub operator: AccountId,
    pub stake_token: TokenConfig,
    pub reward_token: TokenConfig,
    /// Whole reward tokens moved from the operator to the farm at deploy.
    pub reward_funding: u64,
    pub seed_transfers: Vec<SeedTransfer>,
}

impl Default for FarmConfig {
    fn default() -> Self {
        Self {
            farm_name: "Dapp Token Farm".into(),
            farm_address: "token-farm".into(),
            operator: "owner".into(),
            stake_token: TokenConfig {
                name: "Mock DAI Token".into(),
                symbol: "mDAI".into(),
                ..TokenConfig::default()
            },
            reward_token: TokenConfig {
                name: "DApp Token".into(),
                symbol: "DAPP".into(),
                ..TokenConfig::default()
            },
            reward_funding: 1_000_000,
            seed_transfers: vec![SeedTransfer {
                to: "investor".into(),
                amount: 100,
            }],
        }
    }
}

impl FarmConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.farm_address.is_empty() || self.operator.is_empty() {
            return Err(ConfigError::Invalid(
                "farm_address and operator must be set".into(),
            ));
        }
        if self.farm_address == self.operator {
            return Err(ConfigError::Invalid(
                "farm_address must differ from operator".into(),
            ));
        }
        for token in [&self.stake_token, &self.reward_token] {
            // u64 whole tokens scaled past 10^19 overflow u128
            if token.decimals > 19 {
                return Err(ConfigError::Invalid(format!(
                    "{}: at most 19 decimals supported",
                    token.symbol
                )));
            }
        }
        if self.reward_funding > self.reward_token.supply {
            return Err(ConfigError::Invalid(format!(
                "reward_funding {} exceeds {} supply {}",
                self.reward_funding, self.reward_token.symbol, self.reward_token.supply
            )));
        }
        let seeded: u128 = self
            .seed_transfers
            .iter()
            .map(|seed| u128::from(seed.amount))
            .sum();
        if seeded > u128::from(self.stake_token.supply) {
            return Err(ConfigError::Invalid(format!(
                "seed transfers total {} exceeds {} supply {}",
                seeded, self.stake_token.symbol, self.stake_token.supply
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::tokens;

    #[test]
    fn defaults_describe_canonical_farm() {
        let config = FarmConfig::default();
        config.validate().unwrap();
        assert_eq!(config.stake_token.total_supply(), tokens(1_000_000));
        assert_eq!(config.reward_token.symbol, "DAPP");
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: FarmConfig =
            serde_json::from_str(r#"{"operator":"admin","reward_token":{"supply":5}}"#).unwrap();
        assert_eq!(config.operator, "admin");
        assert_eq!(config.farm_name, "Dapp Token Farm");
        assert_eq!(config.reward_token.decimals, 18);
        assert_eq!(config.reward_token.supply, 5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn overfunded_seeds_are_rejected() {
        let mut config = FarmConfig::default();
        config.seed_transfers.push(SeedTransfer {
            to: "whale".into(),
            amount: 1_000_000,
        });
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
