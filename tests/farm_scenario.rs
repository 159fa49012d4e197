use rand::{rngs::StdRng, Rng, SeedableRng};

use token_farm::{
    farm::{FarmError, FarmSnapshot},
    ledger::{tokens, BalanceLedger},
    AccountId, Farm, FarmConfig, StakingError,
};

fn id(name: &str) -> AccountId {
    name.to_string()
}

fn canonical() -> (Farm, AccountId, AccountId, AccountId) {
    let config = FarmConfig::default();
    let farm = Farm::deploy(&config).unwrap();
    (farm, config.operator, id("investor"), config.farm_address)
}

#[test]
fn rewards_investors_for_staking_mdai() {
    let (mut farm, owner, investor, farm_addr) = canonical();

    assert_eq!(farm.stake_token().name(), "Mock DAI Token");
    assert_eq!(farm.reward_token().name(), "DApp Token");
    assert_eq!(farm.engine().name(), "Dapp Token Farm");
    assert_eq!(farm.reward_token().balance_of(&farm_addr), tokens(1_000_000));
    assert_eq!(farm.stake_token().balance_of(&investor), tokens(100));

    farm.approve_stake(&investor, tokens(100)).unwrap();
    farm.stake(&investor, tokens(100)).unwrap();
    assert_eq!(farm.stake_token().balance_of(&investor), 0);
    assert_eq!(farm.stake_token().balance_of(&farm_addr), tokens(100));
    assert_eq!(farm.staking_balance(&investor), tokens(100));
    assert!(farm.is_staking(&investor));

    farm.issue_rewards(&owner).unwrap();
    assert_eq!(farm.reward_token().balance_of(&investor), tokens(100));

    let before = farm.clone();
    let err = farm.issue_rewards(&investor).unwrap_err();
    assert!(matches!(
        err,
        FarmError::Staking(StakingError::Unauthorized { .. })
    ));
    assert_eq!(farm, before);

    farm.unstake(&investor).unwrap();
    assert_eq!(farm.stake_token().balance_of(&investor), tokens(100));
    assert_eq!(farm.stake_token().balance_of(&farm_addr), 0);
    assert_eq!(farm.staking_balance(&investor), 0);
    assert!(!farm.is_staking(&investor));
}

#[test]
fn state_file_survives_reload_and_rejects_tampering() {
    let (mut farm, owner, investor, _) = canonical();
    farm.approve_stake(&investor, tokens(40)).unwrap();
    farm.stake(&investor, tokens(40)).unwrap();
    farm.issue_rewards(&owner).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("farm_state.json");
    farm.save(&path).unwrap();
    let reloaded = Farm::load(&path).unwrap();
    assert_eq!(reloaded, farm);

    let raw = std::fs::read_to_string(&path).unwrap();
    let mut snapshot: FarmSnapshot = serde_json::from_str(&raw).unwrap();
    snapshot
        .reward_token
        .balances
        .insert(investor.clone(), tokens(1_000));
    std::fs::write(&path, serde_json::to_vec_pretty(&snapshot).unwrap()).unwrap();
    assert!(matches!(Farm::load(&path), Err(FarmError::Ledger(_))));
}

#[test]
fn random_stake_sequences_keep_books_balanced() {
    let mut config = FarmConfig::default();
    let stakers: Vec<AccountId> = (0..5).map(|i| format!("staker-{i}")).collect();
    config.seed_transfers = stakers
        .iter()
        .map(|to| token_farm::config::SeedTransfer {
            to: to.clone(),
            amount: 1_000,
        })
        .collect();
    let mut farm = Farm::deploy(&config).unwrap();
    let owner = config.operator.clone();
    let farm_addr = config.farm_address.clone();
    let mut rng = StdRng::seed_from_u64(0x5EED_F4A2);

    for _ in 0..200 {
        let who = &stakers[rng.gen_range(0..stakers.len())];
        match rng.gen_range(0..3) {
            0 => {
                let amount = rng.gen_range(0..=tokens(300));
                let before = farm.staking_balance(who);
                farm.approve_stake(who, amount).unwrap();
                match farm.stake(who, amount) {
                    Ok(_) => {
                        assert_eq!(farm.staking_balance(who), before + amount);
                        assert!(farm.is_staking(who));
                    }
                    Err(_) => assert_eq!(farm.staking_balance(who), before),
                }
            }
            1 => {
                farm.unstake(who).unwrap();
                assert_eq!(farm.staking_balance(who), 0);
                assert!(!farm.is_staking(who));
            }
            _ => {
                let expected: Vec<_> = farm
                    .engine()
                    .registry()
                    .roster()
                    .iter()
                    .map(|a| (a.clone(), farm.staking_balance(a)))
                    .collect();
                let rewards_before: Vec<_> = expected
                    .iter()
                    .map(|(a, _)| farm.reward_token().balance_of(a))
                    .collect();
                farm.issue_rewards(&owner).unwrap();
                for ((account, staked), before) in expected.iter().zip(rewards_before) {
                    assert_eq!(farm.reward_token().balance_of(account), before + staked);
                }
            }
        }

        assert_eq!(
            Some(farm.stake_token().balance_of(&farm_addr)),
            farm.engine().total_staked()
        );
        let stake_held: u128 = stakers
            .iter()
            .map(|a| farm.stake_token().balance_of(a) + farm.staking_balance(a))
            .sum();
        assert_eq!(stake_held, tokens(5 * 1_000));
        assert!(farm.engine().registry().is_consistent());
    }
}
