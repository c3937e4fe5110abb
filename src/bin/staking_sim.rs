//! Staking Scenario Simulator
//!
//! Replays a scripted scenario of oracle reports, commits, deposits and
//! withdrawals against an in-memory pool and a manual clock.
//!
//! Usage:
//!   cargo run --release --bin staking_sim -- check-config --config ./staking.toml
//!   cargo run --release --bin staking_sim -- run --config ./staking.toml --scenario ./scenario.toml
//!   cargo run --release --bin staking_sim -- run --config ./staking.toml --scenario ./scenario.toml --journal ./events.db
//!
//! Scenario format:
//!
//! ```toml
//! start = 1000
//!
//! [[steps]]
//! action = "deposit"
//! account = "alice"
//! amount = 1000
//!
//! [[steps]]
//! at = 1100
//! action = "report"
//! oracle = "oracle-a"
//! epoch = 2
//! balance = 0
//! ```
//!
//! Accounts are either `0x`-prefixed addresses or labels hashed into one.
//! Amounts (`amount`, `receipts`, `balance`) are integers or, for values
//! beyond 64 bits, decimal strings such as `"32_000000000000000000"`.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::de::{self, Deserializer, Visitor};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

use staking_core::staking::{
    Amount, Clock, EventJournal, Identity, InMemoryPool, InMemoryReceiptToken, ManualClock,
    PoolLedger, StakingConfig, StakingPool, StakingResult,
};

#[derive(Parser, Debug)]
#[command(name = "staking_sim")]
#[command(about = "Replay liquid-staking scenarios against the accounting core")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate a pool configuration file
    CheckConfig {
        /// Path to the TOML configuration
        #[arg(short, long, env = "STAKING_CONFIG_PATH")]
        config: PathBuf,
    },

    /// Replay a scenario and print the final pool state as JSON
    Run {
        /// Path to the TOML configuration
        #[arg(short, long, env = "STAKING_CONFIG_PATH")]
        config: PathBuf,

        /// Path to the TOML scenario
        #[arg(short, long)]
        scenario: PathBuf,

        /// Optional SQLite file receiving every emitted event
        #[arg(short, long)]
        journal: Option<PathBuf>,
    },
}

// =============================================================================
// SCENARIO
// =============================================================================

#[derive(Debug, Deserialize)]
struct Scenario {
    /// Clock value before the first step.
    #[serde(default)]
    start: u64,
    steps: Vec<Step>,
}

#[derive(Debug, Deserialize)]
struct Step {
    /// Move the clock here before executing. Must not go backwards.
    at: Option<u64>,
    #[serde(flatten)]
    action: Action,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum Action {
    Report {
        oracle: String,
        epoch: u64,
        #[serde(deserialize_with = "de_amount")]
        balance: Amount,
    },
    Commit,
    Deposit {
        account: String,
        #[serde(deserialize_with = "de_amount")]
        amount: Amount,
    },
    Withdraw {
        account: String,
        #[serde(deserialize_with = "de_amount")]
        receipts: Amount,
    },
    Fund {
        #[serde(deserialize_with = "de_amount")]
        amount: Amount,
    },
    Advance,
    Claim {
        account: String,
    },
    ExtractCommission,
    AccrueYield {
        #[serde(deserialize_with = "de_amount")]
        amount: Amount,
    },
}

/// TOML integers stop at `i64`; larger amounts come in as strings.
fn de_amount<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Amount, D::Error> {
    struct AmountVisitor;

    impl<'de> Visitor<'de> for AmountVisitor {
        type Value = Amount;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a non-negative integer or a decimal string")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Amount, E> {
            Ok(Amount::from(v))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Amount, E> {
            u64::try_from(v)
                .map(Amount::from)
                .map_err(|_| E::custom(format!("negative amount {}", v)))
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Amount, E> {
            parse_amount(v).map_err(E::custom)
        }
    }

    deserializer.deserialize_any(AmountVisitor)
}

fn parse_amount(text: &str) -> Result<Amount, String> {
    let digits: String = text.trim().chars().filter(|c| *c != '_').collect();
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("invalid amount {:?}", text));
    }
    digits
        .parse::<Amount>()
        .map_err(|e| format!("invalid amount {:?}: {}", text, e))
}

fn load_scenario(path: &Path) -> Result<Scenario> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("read scenario {}", path.display()))?;
    toml::from_str(&contents).with_context(|| format!("parse scenario {}", path.display()))
}

fn resolve(name: &str) -> Result<Identity> {
    if name.starts_with("0x") {
        return name
            .parse()
            .with_context(|| format!("invalid address {}", name));
    }
    Ok(Identity::from_label(name))
}

// =============================================================================
// REPLAY
// =============================================================================

type SimPool = StakingPool<InMemoryPool, InMemoryReceiptToken, ManualClock>;

fn load_config(path: &Path) -> Result<StakingConfig> {
    StakingConfig::load(path).with_context(|| format!("load config {}", path.display()))
}

fn execute(pool: &mut SimPool, action: &Action) -> Result<StakingResult<String>> {
    let outcome = match action {
        Action::Report {
            oracle,
            epoch,
            balance,
        } => {
            let oracle = resolve(oracle)?;
            pool.report(&oracle, *epoch, *balance)
                .map(|o| format!("{:?}", o))
        }
        Action::Commit => pool.commit().map(|s| {
            format!(
                "snapshot value={} receipts={} t={} rate={}",
                s.total_value,
                s.total_receipts,
                s.timestamp,
                s.rate()
            )
        }),
        Action::Deposit { account, amount } => {
            let account = resolve(account)?;
            pool.deposit(&account, *amount)
                .map(|r| format!("minted {} receipts", r))
        }
        Action::Withdraw { account, receipts } => {
            let account = resolve(account)?;
            pool.request_withdrawal(&account, *receipts)
                .map(|a| format!("queued {}", a))
        }
        Action::Fund { amount } => pool
            .fund(*amount)
            .map(|o| format!("{:?}", o)),
        Action::Advance => Ok(format!("{:?}", pool.advance_queue())),
        Action::Claim { account } => {
            let account = resolve(account)?;
            pool.claim(&account).map(|a| format!("paid {}", a))
        }
        Action::ExtractCommission => pool.extract_commission().map(|c| format!("{:?}", c)),
        Action::AccrueYield { amount } => {
            pool.pool_ledger_mut()
                .accrue_external_yield(*amount);
            Ok(format!(
                "pending harvest {}",
                pool.pool_ledger().pending_harvest()
            ))
        }
    };
    Ok(outcome)
}

fn run(config_path: &Path, scenario_path: &Path, journal_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let violations = config.validate();
    if !violations.is_empty() {
        eprintln!("{}", config.format_report());
        bail!("configuration has {} violation(s)", violations.len());
    }
    let scenario = load_scenario(scenario_path)?;

    let journal = journal_path.map(EventJournal::open).transpose()?;
    let clock = ManualClock::new(scenario.start);
    let mut pool = StakingPool::new(
        &config,
        InMemoryPool::new(0),
        InMemoryReceiptToken::new(),
        clock.clone(),
    )?;

    let mut accepted = 0usize;
    let mut rejected = 0usize;
    let mut journaled = 0usize;

    for (index, step) in scenario.steps.iter().enumerate() {
        if let Some(at) = step.at {
            if at < clock.now() {
                bail!(
                    "step {} moves the clock backwards ({} < {})",
                    index,
                    at,
                    clock.now()
                );
            }
            clock.advance_to(at);
        }

        match execute(&mut pool, &step.action)? {
            Ok(summary) => {
                accepted += 1;
                info!(step = index, now = clock.now(), "{:?}: {}", step.action, summary);
            }
            Err(e) => {
                rejected += 1;
                warn!(
                    step = index,
                    now = clock.now(),
                    category = ?e.category(),
                    "{:?} rejected: {}",
                    step.action,
                    e
                );
            }
        }

        let events = pool.drain_events();
        if let Some(journal) = &journal {
            journaled += journal.append(&events)?;
        }
    }

    info!(
        steps = scenario.steps.len(),
        accepted, rejected, journaled, "scenario complete"
    );
    println!("{}", serde_json::to_string_pretty(&pool.state())?);
    Ok(())
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(Level::INFO.into())
                .add_directive("staking_core=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::CheckConfig { config } => {
            let config = load_config(&config)?;
            println!("{}", config.format_report());
            if !config.validate().is_empty() {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Run {
            config,
            scenario,
            journal,
        } => run(&config, &scenario, journal.as_deref()),
    }
}
