//! Botvault CLI - Command line interface.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use botvault_credentials::{
    rekey, BotRegistry, BotUpdate, CredentialUpdate, CredentialVault, CredentialsError, NewBot,
    NewCredential,
};
use botvault_crypto::{CipherCodec, FallbackPolicy, KeyMaterial, KeyMaterialConfig, KeySource};
use botvault_storage::{StorageBackend, StoredBot};
use botvault_storage_sqlite::SqliteBackend;

// ============================================================================
// CLI Structure
// ============================================================================

#[derive(Parser)]
#[command(name = "botvault")]
#[command(about = "Botvault CLI - Manage encrypted exchange credentials and trading bots")]
#[command(version)]
struct Cli {
    /// Directory holding tenant databases
    #[arg(long, default_value = "./data", env = "BOTVAULT_DATA_DIR")]
    data_dir: PathBuf,

    /// Tenant name
    #[arg(long, default_value = "default", env = "BOTVAULT_TENANT")]
    tenant: String,

    /// Hex-encoded 32-byte encryption key
    #[arg(long, env = "ENCRYPTION_KEY", hide_env_values = true)]
    encryption_key: Option<String>,

    /// Hex-encoded 16-byte initialization vector
    #[arg(long, env = "ENCRYPTION_IV", hide_env_values = true)]
    encryption_iv: Option<String>,

    /// Refuse to run on the built-in placeholder key material
    #[arg(long, env = "BOTVAULT_REQUIRE_KEY_MATERIAL")]
    require_key_material: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate fresh key material
    Keygen,
    /// Show key material and storage status
    Status,
    /// Exchange credential management
    Credentials {
        #[command(subcommand)]
        command: CredentialCommands,
    },
    /// Bot configuration management
    Bots {
        #[command(subcommand)]
        command: BotCommands,
    },
    /// Re-encrypt every stored credential under new key material
    Rekey {
        /// New hex-encoded 32-byte key
        #[arg(long)]
        new_key: String,
        /// New hex-encoded 16-byte IV
        #[arg(long)]
        new_iv: String,
    },
}

#[derive(Subcommand)]
enum CredentialCommands {
    /// Store a credential
    Add {
        /// Owning user
        #[arg(long)]
        owner: String,
        /// Exchange label
        #[arg(long)]
        exchange: String,
        /// API key
        #[arg(long)]
        api_key: String,
        /// API secret (or read from stdin if not provided)
        #[arg(long)]
        api_secret: Option<String>,
    },
    /// List credentials of a user
    List {
        /// Owning user
        #[arg(long)]
        owner: String,
        /// Print secrets in full instead of masked
        #[arg(long)]
        show_secrets: bool,
    },
    /// Update a credential
    Update {
        /// Credential id
        id: String,
        /// Owning user
        #[arg(long)]
        owner: String,
        /// New exchange label
        #[arg(long)]
        exchange: Option<String>,
        /// New API key
        #[arg(long)]
        api_key: Option<String>,
        /// New API secret
        #[arg(long)]
        api_secret: Option<String>,
    },
    /// Delete a credential
    Delete {
        /// Credential id
        id: String,
        /// Owning user
        #[arg(long)]
        owner: String,
    },
    /// Delete every credential and bot of a user
    PurgeOwner {
        /// Owning user
        #[arg(long)]
        owner: String,
    },
}

#[derive(Subcommand)]
enum BotCommands {
    /// Create a bot
    Create {
        /// Owning user
        #[arg(long)]
        owner: String,
        /// Display name
        #[arg(long)]
        name: String,
        /// Exchange label
        #[arg(long)]
        exchange: String,
        /// Credential id the bot uses
        #[arg(long)]
        credential: String,
        /// Strategy configuration as JSON
        #[arg(long, default_value = "{}")]
        strategy: String,
    },
    /// List bots of a user
    List {
        /// Owning user
        #[arg(long)]
        owner: String,
    },
    /// Rename a bot or replace its strategy
    Update {
        /// Bot id
        id: String,
        /// Owning user
        #[arg(long)]
        owner: String,
        /// New display name
        #[arg(long)]
        name: Option<String>,
        /// New strategy configuration as JSON
        #[arg(long)]
        strategy: Option<String>,
    },
    /// Mark a bot as running
    Start {
        /// Bot id
        id: String,
        /// Owning user
        #[arg(long)]
        owner: String,
    },
    /// Mark a bot as stopped
    Stop {
        /// Bot id
        id: String,
        /// Owning user
        #[arg(long)]
        owner: String,
    },
    /// Show the activity log of a bot, newest first
    Logs {
        /// Bot id
        id: String,
        /// Owning user
        #[arg(long)]
        owner: String,
    },
    /// Delete a bot
    Delete {
        /// Bot id
        id: String,
        /// Owning user
        #[arg(long)]
        owner: String,
    },
    /// Show recorded performance of a bot
    Performance {
        /// Bot id
        id: String,
        /// Owning user
        #[arg(long)]
        owner: String,
    },
}

// ============================================================================
// Setup
// ============================================================================

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

fn resolve_codec(cli: &Cli) -> Result<CipherCodec> {
    let config = KeyMaterialConfig {
        key_hex: cli.encryption_key.clone(),
        iv_hex: cli.encryption_iv.clone(),
    };
    let policy = if cli.require_key_material {
        FallbackPolicy::Deny
    } else {
        FallbackPolicy::Allow
    };

    let material =
        KeyMaterial::resolve(&config, policy).context("Failed to resolve encryption key material")?;
    Ok(CipherCodec::new(material))
}

async fn open_storage(cli: &Cli) -> Result<Arc<dyn StorageBackend>> {
    tracing::debug!(tenant = %cli.tenant, data_dir = %cli.data_dir.display(), "Opening storage");
    let backend = SqliteBackend::open(&cli.data_dir, &cli.tenant)
        .await
        .with_context(|| format!("Failed to open storage in {}", cli.data_dir.display()))?;
    Ok(Arc::new(backend))
}

fn read_secret(prompt: &str) -> Result<String> {
    eprint!("{prompt}");
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn parse_strategy(raw: &str) -> Result<serde_json::Value> {
    serde_json::from_str(raw).context("Strategy must be valid JSON")
}

fn print_bot(bot: &StoredBot) {
    println!("  {} ({})", bot.name, bot.id);
    println!("    Exchange:   {}", bot.exchange);
    println!("    Credential: {}", bot.credential_id);
    println!("    Status:     {}", bot.status);
    println!("    Strategy:   {}", bot.strategy);
}

// ============================================================================
// Command Handlers
// ============================================================================

fn cmd_keygen() -> Result<()> {
    let material = KeyMaterial::generate();
    let (key, iv) = material.to_hex();

    println!("ENCRYPTION_KEY={}", key.as_str());
    println!("ENCRYPTION_IV={}", iv.as_str());
    eprintln!();
    eprintln!("IMPORTANT: Store these values securely. Losing them makes every stored");
    eprintln!("credential unreadable; changing them requires `botvault rekey`.");

    Ok(())
}

async fn cmd_status(cli: &Cli) -> Result<()> {
    let codec = resolve_codec(cli)?;
    let storage = open_storage(cli).await?;
    let credentials = storage.list_all_credentials().await?;

    let source = match codec.key_material().source() {
        KeySource::Configured => "configured",
        KeySource::InsecureDefault => "built-in placeholder (NOT FOR PRODUCTION)",
    };

    println!("Botvault status:");
    println!("  Tenant:      {}", cli.tenant);
    println!("  Data dir:    {}", cli.data_dir.display());
    println!("  Key source:  {}", source);
    println!("  Fingerprint: {}", codec.fingerprint());
    println!("  Credentials: {}", credentials.len());

    Ok(())
}

async fn cmd_credentials(cli: &Cli, command: &CredentialCommands) -> Result<()> {
    let codec = Arc::new(resolve_codec(cli)?);
    let vault = CredentialVault::new(open_storage(cli).await?, codec);

    match command {
        CredentialCommands::Add {
            owner,
            exchange,
            api_key,
            api_secret,
        } => {
            let api_secret = match api_secret {
                Some(s) => s.clone(),
                None => read_secret("Enter API secret: ")?,
            };
            let view = vault
                .create(owner, NewCredential::new(exchange.as_str(), api_key.as_str(), api_secret))
                .await?;
            println!("Credential stored: {}", view.id);
        },
        CredentialCommands::List {
            owner,
            show_secrets,
        } => {
            let entries = vault.list(owner).await?;
            if entries.is_empty() {
                println!("No credentials found");
                return Ok(());
            }

            println!("Credentials:");
            for entry in entries {
                match entry {
                    Ok(view) => {
                        let secret = if *show_secrets {
                            view.api_secret.to_string()
                        } else {
                            view.masked_secret()
                        };
                        println!(
                            "  {}  {}  key={}  secret={}",
                            view.id,
                            view.exchange,
                            view.api_key.as_str(),
                            secret
                        );
                    },
                    Err(CredentialsError::Unreadable { id }) => {
                        println!("  {}  <unreadable>", id);
                    },
                    Err(e) => return Err(e.into()),
                }
            }
        },
        CredentialCommands::Update {
            id,
            owner,
            exchange,
            api_key,
            api_secret,
        } => {
            let update = CredentialUpdate {
                exchange: exchange.clone(),
                api_key: api_key.clone(),
                api_secret: api_secret.clone(),
            };
            let outcome = vault.update(owner, id, &update).await?;
            if outcome.changed.is_empty() {
                println!("Credential '{}' unchanged", id);
            } else {
                let fields: Vec<String> = outcome.changed.iter().map(|f| f.to_string()).collect();
                println!("Credential '{}' updated: {}", id, fields.join(", "));
            }
        },
        CredentialCommands::Delete { id, owner } => {
            vault.delete(owner, id).await?;
            println!("Credential '{}' deleted", id);
        },
        CredentialCommands::PurgeOwner { owner } => {
            let report = vault.purge_owner(owner).await?;
            println!(
                "Removed {} credential(s) and {} bot(s) of '{}'",
                report.credentials, report.bots, owner
            );
        },
    }

    Ok(())
}

async fn cmd_bots(cli: &Cli, command: &BotCommands) -> Result<()> {
    let registry = BotRegistry::new(open_storage(cli).await?);

    match command {
        BotCommands::Create {
            owner,
            name,
            exchange,
            credential,
            strategy,
        } => {
            let bot = registry
                .create(
                    owner,
                    NewBot {
                        name: name.clone(),
                        exchange: exchange.clone(),
                        credential_id: credential.clone(),
                        strategy: parse_strategy(strategy)?,
                    },
                )
                .await?;
            println!("Bot created: {}", bot.id);
        },
        BotCommands::List { owner } => {
            let bots = registry.list(owner).await?;
            if bots.is_empty() {
                println!("No bots found");
            } else {
                println!("Bots:");
                for bot in &bots {
                    print_bot(bot);
                }
            }
        },
        BotCommands::Update {
            id,
            owner,
            name,
            strategy,
        } => {
            let update = BotUpdate {
                name: name.clone(),
                strategy: strategy.as_deref().map(parse_strategy).transpose()?,
            };
            let bot = registry.update(owner, id, update).await?;
            println!("Bot updated:");
            print_bot(&bot);
        },
        BotCommands::Start { id, owner } => {
            let bot = registry.start(owner, id).await?;
            println!("Bot '{}' is now {}", bot.id, bot.status);
        },
        BotCommands::Stop { id, owner } => {
            let bot = registry.stop(owner, id).await?;
            println!("Bot '{}' is now {}", bot.id, bot.status);
        },
        BotCommands::Delete { id, owner } => {
            registry.delete(owner, id).await?;
            println!("Bot '{}' deleted", id);
        },
        BotCommands::Performance { id, owner } => {
            let perf = registry.performance(owner, id).await?;
            println!("{}", serde_json::to_string_pretty(&perf)?);
        },
        BotCommands::Logs { id, owner } => {
            let entries = registry.logs(owner, id).await?;
            if entries.is_empty() {
                println!("No log entries for bot '{}'", id);
            }
            for entry in &entries {
                match &entry.data {
                    Some(data) => println!(
                        "  {}  [{}] {} {}",
                        entry.timestamp, entry.kind, entry.message, data
                    ),
                    None => println!("  {}  [{}] {}", entry.timestamp, entry.kind, entry.message),
                }
            }
        },
    }

    Ok(())
}

async fn cmd_rekey(cli: &Cli, new_key: &str, new_iv: &str) -> Result<()> {
    let current = resolve_codec(cli)?;
    let next = KeyMaterial::resolve(
        &KeyMaterialConfig::new(new_key, new_iv),
        FallbackPolicy::Deny,
    )
    .context("Invalid new key material")?;
    let next = CipherCodec::new(next);

    let storage = open_storage(cli).await?;
    let report = rekey(storage.as_ref(), &current, &next).await?;

    println!(
        "Rekey complete: {} rewritten, {} skipped",
        report.rewritten, report.skipped
    );
    if report.skipped > 0 {
        bail!(
            "{} credential(s) could not be decrypted with the current key material",
            report.skipped
        );
    }

    Ok(())
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Keygen => cmd_keygen(),
        Commands::Status => cmd_status(&cli).await,
        Commands::Credentials { command } => cmd_credentials(&cli, command).await,
        Commands::Bots { command } => cmd_bots(&cli, command).await,
        Commands::Rekey { new_key, new_iv } => cmd_rekey(&cli, new_key, new_iv).await,
    }
}
