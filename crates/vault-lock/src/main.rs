//! Vault Lock - manage and exercise the local vault lock

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vault_lock::{
    Credential, LockReason, LockState, LockoutPolicy, NoBiometrics, SecurityService, SettingsUpdate,
    StateSubscriber, UnlockOutcome, VaultLockConfig,
};

/// Vault Lock - PIN re-authentication for a local knowledge vault
#[derive(Parser)]
#[command(name = "vault-lock")]
#[command(about = "Configure and exercise the local vault lock")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Account to operate on (overrides config)
    #[arg(long)]
    account: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show settings, unlock methods and lock state
    Status,

    /// Set or replace the PIN
    SetPin {
        /// New PIN (4-12 digits)
        #[arg(long)]
        pin: String,

        /// Repeat the PIN
        #[arg(long)]
        confirm: String,
    },

    /// Turn the vault lock on
    Enable,

    /// Turn the vault lock off and forget all credentials
    Disable,

    /// Set the inactivity timeout
    Timeout {
        /// Minutes of inactivity before the vault locks
        #[arg(long)]
        minutes: u32,
    },

    /// Try to unlock with a PIN
    Unlock {
        #[arg(long)]
        pin: String,
    },

    /// Interactive session reading commands from stdin
    Session,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vault_lock=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let config_path = cli.config.unwrap_or_else(VaultLockConfig::default_path);
    let mut config = VaultLockConfig::load_or_default(&config_path)?;
    if let Some(account) = cli.account {
        config.account = account;
    }

    let service = SecurityService::from_config(&config, Arc::new(NoBiometrics))?;
    if let Err(e) = service.initialize().await {
        warn!("Vault lock unavailable: {}", e);
    }

    match cli.command {
        Commands::Status => {
            print_status(&service).await;
        }

        Commands::SetPin { pin, confirm } => {
            service.setup_pin_confirmed(&pin, &confirm).await?;
            println!("PIN set for account {}", service.account());
        }

        Commands::Enable => {
            let pin_ready = service
                .get_security_settings()
                .await
                .is_some_and(|settings| settings.pin_usable());
            if !pin_ready {
                anyhow::bail!("set a PIN first: vault-lock set-pin --pin <PIN> --confirm <PIN>");
            }

            service
                .update_security_settings(SettingsUpdate::vault_lock(true))
                .await?;
            println!("Vault lock enabled");
        }

        Commands::Disable => {
            service.disable_vault_lock().await?;
            println!("Vault lock disabled, credentials cleared");
        }

        Commands::Timeout { minutes } => {
            service
                .update_security_settings(SettingsUpdate::lock_timeout(minutes))
                .await?;
            println!("Lock timeout set to {} minutes", minutes);
        }

        Commands::Unlock { pin } => {
            let outcome = service.attempt_unlock(Credential::pin(&pin)).await;
            print_outcome(outcome);
        }

        Commands::Session => {
            run_session(&service).await?;
        }
    }

    service.shutdown();
    Ok(())
}

async fn run_session(service: &SecurityService) -> anyhow::Result<()> {
    let subscriber = StateSubscriber::new(|change| {
        println!("  [{:?}] {}", change.event, describe(&change.state));
    });
    let subscription = service.on_state_change(&subscriber);

    println!("Commands: status, unlock <pin>, lock, background, touch, quit");
    print_status(service).await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            continue;
        };

        // Every command counts as an interaction
        service.update_activity();

        match (command, words.next()) {
            ("status", _) => print_status(service).await,
            ("unlock", Some(pin)) => {
                let outcome = service.attempt_unlock(Credential::pin(pin)).await;
                print_outcome(outcome);
            }
            ("lock", _) => {
                service.lock_vault(LockReason::Manual).await;
            }
            ("background", _) => {
                service.app_backgrounded().await;
            }
            ("touch", _) => {}
            ("quit", _) | ("exit", _) => break,
            _ => println!("Unknown command: {}", line.trim()),
        }
    }

    subscription.unsubscribe();
    info!("Session ended");
    Ok(())
}

async fn print_status(service: &SecurityService) {
    println!("\n=== Vault Lock ===\n");
    println!("Account: {}", service.account());

    match service.get_security_settings().await {
        Some(settings) => {
            println!("Enabled: {}", settings.vault_lock_enabled);
            println!("Lock timeout: {} minutes", settings.lock_timeout_minutes);
            println!("Lock on minimize: {}", settings.auto_lock_on_minimize);
        }
        None => println!("Enabled: false (never configured)"),
    }

    println!("\nUnlock methods:");
    for method in service.get_unlock_methods().await {
        println!(
            "  {:?}: available={} enabled={}",
            method.kind, method.available, method.enabled
        );
    }

    println!("\nState: {}", describe(&service.get_lock_state()));
    if let Some(countdown) = service.lock_countdown().await {
        println!("Locks in: {}", countdown);
    }
}

fn describe(state: &LockState) -> String {
    if !state.is_locked {
        return "unlocked".to_string();
    }

    let reason = state
        .lock_reason
        .map(|reason| reason.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let policy = LockoutPolicy::new(state.max_attempts);
    format!("locked ({}), {}", reason, policy.describe(state.unlock_attempts))
}

fn print_outcome(outcome: UnlockOutcome) {
    match outcome {
        UnlockOutcome::Unlocked => println!("Unlocked"),
        UnlockOutcome::Rejected { remaining_attempts } => {
            println!("Wrong PIN, {} attempts remaining", remaining_attempts)
        }
        UnlockOutcome::LockedOut => println!("Too many failed attempts; vault refuses to unlock"),
        UnlockOutcome::NotLocked => println!("Vault is not locked"),
    }
}
