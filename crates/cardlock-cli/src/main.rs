//! cardlock CLI - operator tooling for card authentication and lockouts
//!
//! Runs the authentication core against the on-disk card table, lockout
//! store, policy file and audit log.

use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cardlock_core::{
    Argon2PinHasher, AuditSink, Authenticator, CardId, CardlockPaths, FileAuditSink,
    FileCardStore, FileConfig, FileLockoutPersistence, HasherParams, LockState, Pin, PinHasher,
    Services, SystemClock, Timestamp, TracingAuditSink,
};

#[derive(Parser)]
#[command(name = "cardlock")]
#[command(about = "Card PIN authentication and lockout administration", long_about = None)]
#[command(version)]
struct Cli {
    #[command(flatten)]
    paths: PathArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct PathArgs {
    /// Data directory holding the default files
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Lockout store file
    #[arg(long, global = true)]
    lockouts: Option<PathBuf>,

    /// Audit log file
    #[arg(long, global = true)]
    audit_log: Option<PathBuf>,

    /// Card table file
    #[arg(long, global = true)]
    cards: Option<PathBuf>,

    /// Policy configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Send audit events to the diagnostic log instead of the audit file
    #[arg(long, global = true)]
    audit_to_log: bool,
}

impl PathArgs {
    fn resolve(&self) -> CardlockPaths {
        let data_dir = self
            .data_dir
            .clone()
            .unwrap_or_else(CardlockPaths::default_data_dir);
        let defaults = CardlockPaths::in_dir(&data_dir);

        CardlockPaths {
            lockouts: self.lockouts.clone().unwrap_or(defaults.lockouts),
            audit_log: self.audit_log.clone().unwrap_or(defaults.audit_log),
            cards: self.cards.clone().unwrap_or(defaults.cards),
            config: self.config.clone().unwrap_or(defaults.config),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Authenticate a card and PIN (PIN read from stdin unless given)
    Authenticate {
        /// Card number
        card: CardId,

        /// PIN (prefer stdin; arguments are visible to other users)
        #[arg(long)]
        pin: Option<String>,

        /// Report blocked cards as unknown
        #[arg(long)]
        mask: bool,
    },

    /// Show the lockout status of a card
    Status {
        /// Card number
        card: CardId,
    },

    /// Lock a card until an administrator unlocks it
    Lock {
        /// Card number
        card: CardId,

        /// Reason recorded with the lock
        #[arg(short, long, default_value = "")]
        reason: String,

        /// Operator performing the action
        #[arg(short, long, default_value = "operator")]
        actor: String,
    },

    /// Release a lock and clear failed attempts
    Unlock {
        /// Card number
        card: CardId,

        /// Reason recorded in the audit log
        #[arg(short, long, default_value = "")]
        reason: String,

        /// Operator performing the action
        #[arg(short, long, default_value = "operator")]
        actor: String,
    },

    /// Clear failed attempts for a card
    Reset {
        /// Card number
        card: CardId,

        /// Operator performing the action
        #[arg(short, long, default_value = "operator")]
        actor: String,
    },

    /// Remove expired timed locks
    Cleanup,

    /// List all lockout records
    List,

    /// Print the PIN digest for a card (for provisioning the card table)
    HashPin {
        /// Card number
        card: CardId,

        /// PIN (prefer stdin; arguments are visible to other users)
        #[arg(long)]
        pin: Option<String>,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cardlock=info,cardlock_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();
    let paths = cli.paths.resolve();
    debug!("Using paths {:?}", paths);

    run(&paths, cli.paths.audit_to_log, cli.command)
}

fn open(paths: &CardlockPaths, audit_to_log: bool) -> Result<Authenticator> {
    let audit: Arc<dyn AuditSink> = if audit_to_log {
        Arc::new(TracingAuditSink)
    } else {
        let sink = FileAuditSink::open(&paths.audit_log)
            .with_context(|| format!("Failed to open audit log {}", paths.audit_log.display()))?;
        Arc::new(sink)
    };

    let services = Services {
        cards: Arc::new(FileCardStore::new(&paths.cards)),
        config: Arc::new(FileConfig::new(&paths.config)),
        clock: Arc::new(SystemClock),
        hasher: Arc::new(Argon2PinHasher::new(HasherParams::default())?),
        audit,
    };

    Ok(Authenticator::open(
        services,
        Box::new(FileLockoutPersistence::new(&paths.lockouts)),
    ))
}

fn run(paths: &CardlockPaths, audit_to_log: bool, command: Commands) -> Result<()> {
    // Provisioning needs no store or audit log
    if let Commands::HashPin { card, pin } = command {
        let pin = read_pin(pin)?;
        let hasher = Argon2PinHasher::new(HasherParams::default())?;
        let digest = hasher.hash_for_card(&pin, &card)?;
        println!("{}", digest.as_str());
        return Ok(());
    }

    let authenticator = open(paths, audit_to_log)?;
    let mut granted = true;

    match command {
        Commands::Authenticate { card, pin, mask } => {
            let pin = read_pin(pin)?;
            let mut outcome = authenticator.authenticate(&card, &pin);
            if mask {
                outcome = outcome.masked();
            }

            println!("{}", outcome);
            if let Some(until) = outcome.unlock_at() {
                println!("  Unlocks at: {}", format_time(until));
            }
            granted = outcome.is_granted();
        }

        Commands::Status { card } => {
            let state = authenticator.lock_state(&card);
            println!("Card {}:", card);
            println!("  State: {}", state_name(&state));
            println!("  Status: {}", authenticator.describe(&card));
            println!(
                "  Attempts remaining: {}",
                authenticator.remaining_attempts(&card)
            );
            if let Some(until) = state.unlock_at() {
                println!("  Unlocks at: {}", format_time(until));
            }
        }

        Commands::Lock {
            card,
            reason,
            actor,
        } => {
            authenticator.admin_lock(&card, &reason, &actor)?;
            println!("✓ Card {} locked", card);
        }

        Commands::Unlock {
            card,
            reason,
            actor,
        } => {
            authenticator.admin_unlock(&card, &actor, &reason)?;
            println!("✓ Card {} unlocked", card);
        }

        Commands::Reset { card, actor } => {
            authenticator.admin_reset(&card, &actor)?;
            println!("✓ Failed attempts reset for card {}", card);
        }

        Commands::Cleanup => {
            let removed = authenticator.cleanup_expired()?;
            println!("✓ Removed {} expired lockouts", removed);
        }

        Commands::List => {
            let records = authenticator.lockout_records();
            if records.is_empty() {
                println!("No lockout records");
            }

            for record in records {
                let lock = if !record.is_locked() {
                    "not locked".to_string()
                } else if record.is_permanent() {
                    format!("locked {} until released", format_time(record.lock_time))
                } else {
                    format!(
                        "locked {} until {}",
                        format_time(record.lock_time),
                        format_time(record.unlock_time)
                    )
                };

                println!(
                    "{}  attempts={}  {}  {}",
                    record.card_id, record.failed_attempts, lock, record.reason
                );
            }
        }

        Commands::HashPin { .. } => {}
    }

    report_audit_failures(&authenticator);
    if !granted {
        std::process::exit(1);
    }
    Ok(())
}

fn read_pin(pin: Option<String>) -> Result<Pin> {
    let pin = match pin {
        Some(pin) => pin,
        None => {
            let mut line = String::new();
            io::stdin()
                .lock()
                .read_line(&mut line)
                .context("Failed to read PIN from stdin")?;
            line.trim().to_string()
        }
    };

    Ok(Pin::new(&pin)?)
}

fn state_name(state: &LockState) -> &'static str {
    match state {
        LockState::Clean => "clean",
        LockState::Counting { .. } => "counting",
        LockState::Timed { .. } => "locked (timed)",
        LockState::Permanent => "locked (administrative)",
        LockState::Expired { .. } => "lock expired",
    }
}

fn format_time(timestamp: Timestamp) -> String {
    chrono::DateTime::from_timestamp(timestamp as i64, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| timestamp.to_string())
}

fn report_audit_failures(authenticator: &Authenticator) {
    let failures = authenticator.audit_failures();
    if failures > 0 {
        eprintln!("⚠️  WARNING: {} audit events could not be written", failures);
    }
}
