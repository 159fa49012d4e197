use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use token_farm::{
    farm::FarmCall,
    ledger::{format_units, parse_units, BalanceLedger, TokenLedger},
    Farm, FarmConfig,
};

#[derive(Parser)]
#[command(name = "token-farm", version, about = "Stake mDAI, earn DAPP, unstake in full")]
struct Cli {
    /// Farm state file (JSON snapshot)
    #[arg(long, global = true, default_value = "farm_state.json")]
    state: PathBuf,

    /// -v for debug, -vv for trace; RUST_LOG overrides
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum Asset {
    Stake,
    Reward,
}

#[derive(Subcommand)]
enum Command {
    /// Deploy both tokens and the farm into a fresh state file
    Init {
        /// Deployment config (JSON); defaults to the canonical farm
        #[arg(long)]
        config: Option<PathBuf>,
        /// Overwrite an existing state file
        #[arg(long)]
        force: bool,
    },
    /// Allow a spender (the farm by default) to pull stake tokens
    Approve {
        #[arg(long)]
        from: String,
        #[arg(long)]
        amount: String,
        #[arg(long)]
        spender: Option<String>,
    },
    /// Move tokens between accounts
    Transfer {
        #[arg(value_enum)]
        asset: Asset,
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        amount: String,
    },
    /// Stake tokens previously approved for the farm
    Stake {
        #[arg(long)]
        from: String,
        #[arg(long)]
        amount: String,
    },
    /// Withdraw the whole stake
    Unstake {
        #[arg(long)]
        from: String,
    },
    /// Pay rewards to every current staker (operator only)
    IssueRewards {
        #[arg(long)]
        from: String,
    },
    /// Show balances and staking status of one account
    Balance { account: String },
    /// Show farm totals and the staker roster
    Status,
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_farm(path: &Path) -> Result<Farm> {
    if !path.exists() {
        bail!(
            "state file {} not found, run `token-farm init` first",
            path.display()
        );
    }
    Farm::load(path).with_context(|| format!("loading {}", path.display()))
}

fn amount_arg(token: &TokenLedger, raw: &str) -> Result<u128> {
    parse_units(raw, token.meta().decimals)
        .with_context(|| format!("parsing {} amount", token.symbol()))
}

fn show(token: &TokenLedger, amount: u128) -> String {
    format!("{} {}", format_units(amount, token.meta().decimals), token.symbol())
}

fn run_call(state: &Path, caller: String, build: impl FnOnce(&Farm) -> Result<FarmCall>) -> Result<()> {
    let mut farm = load_farm(state)?;
    let call = build(&farm)?;
    let receipt = farm.submit(&caller, call)?;
    farm.save(state)?;
    debug!(height = receipt.height, "state saved");
    println!("{}", serde_json::to_string_pretty(&receipt)?);
    Ok(())
}

fn init_cmd(state: &Path, config: Option<PathBuf>, force: bool) -> Result<()> {
    if state.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", state.display());
    }
    let config = match config {
        Some(path) => FarmConfig::load(&path)?,
        None => FarmConfig::default(),
    };
    let farm = Farm::deploy(&config)?;
    farm.save(state)?;
    println!(
        "deployed {} at {} (operator {}) → {}",
        farm.engine().name(),
        farm.engine().address(),
        farm.engine().operator(),
        state.display()
    );
    Ok(())
}

fn balance_cmd(state: &Path, account: String) -> Result<()> {
    let farm = load_farm(state)?;
    let stake_token = farm.stake_token();
    let reward_token = farm.reward_token();
    println!("account:  {account}");
    println!("stake:    {}", show(stake_token, stake_token.balance_of(&account)));
    println!("reward:   {}", show(reward_token, reward_token.balance_of(&account)));
    println!("staked:   {}", show(stake_token, farm.staking_balance(&account)));
    println!("staking:  {}", farm.is_staking(&account));
    Ok(())
}

fn status_cmd(state: &Path) -> Result<()> {
    let farm = load_farm(state)?;
    let engine = farm.engine();
    let stake_token = farm.stake_token();
    let reward_token = farm.reward_token();
    println!("farm:         {} ({})", engine.name(), engine.address());
    println!("operator:     {}", engine.operator());
    println!("height:       {}", farm.height());
    let total_staked = engine.total_staked().context("staked amounts overflow")?;
    println!("total staked: {}", show(stake_token, total_staked));
    println!(
        "reward pool:  {}",
        show(reward_token, reward_token.balance_of(engine.address()))
    );
    println!("{} root: {}", stake_token.symbol(), hex::encode(stake_token.state_root()));
    println!("{} root: {}", reward_token.symbol(), hex::encode(reward_token.state_root()));
    println!("roster ({}):", engine.registry().roster_size());
    for account in engine.registry().roster() {
        println!(
            "  {account}: {} staking={}",
            show(stake_token, engine.staking_balance(account)),
            engine.is_staking(account)
        );
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let state = cli.state;

    match cli.command {
        Command::Init { config, force } => init_cmd(&state, config, force),
        Command::Approve {
            from,
            amount,
            spender,
        } => run_call(&state, from, |farm| {
            Ok(FarmCall::ApproveStake {
                spender: spender.unwrap_or_else(|| farm.engine().address().clone()),
                amount: amount_arg(farm.stake_token(), &amount)?,
            })
        }),
        Command::Transfer {
            asset,
            from,
            to,
            amount,
        } => run_call(&state, from, |farm| {
            Ok(match asset {
                Asset::Stake => FarmCall::TransferStake {
                    to,
                    amount: amount_arg(farm.stake_token(), &amount)?,
                },
                Asset::Reward => FarmCall::TransferReward {
                    to,
                    amount: amount_arg(farm.reward_token(), &amount)?,
                },
            })
        }),
        Command::Stake { from, amount } => run_call(&state, from, |farm| {
            Ok(FarmCall::Stake {
                amount: amount_arg(farm.stake_token(), &amount)?,
            })
        }),
        Command::Unstake { from } => run_call(&state, from, |_| Ok(FarmCall::Unstake)),
        Command::IssueRewards { from } => run_call(&state, from, |_| Ok(FarmCall::IssueRewards)),
        Command::Balance { account } => balance_cmd(&state, account),
        Command::Status => status_cmd(&state),
    }
}
