// meshchat — relay and client command-line interface
//
// Runs a relay, manages per-account identities, sends and listens.

mod bootstrap;
mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use meshchat_core::relay::session::{preview, short_key};
use meshchat_core::{
    crypto, ClientConfig, ClientEvent, ClientEvents, IdentityError, IdentityKeys, IdentityManager,
    MeshClient, NodeAddress, NodeSet, RelayServer, RelayServerConfig,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;

const PASSWORD_ATTEMPTS: usize = 3;
const PASSWORD_ENV: &str = "MESHCHAT_PASSWORD";

#[derive(Parser)]
#[command(name = "meshchat")]
#[command(about = "meshchat — end-to-end sealed messaging over a relay mesh", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a relay
    Relay {
        /// Address other relays and clients reach this relay at (host:port)
        node: String,
        /// Newline-separated seed relay list (default: configured seeds)
        #[arg(long)]
        seeds: Option<PathBuf>,
        /// Relay state file (default: data dir relay-<port>.json)
        #[arg(long)]
        state: Option<PathBuf>,
        /// Local bind address (default: 0.0.0.0:<port>)
        #[arg(long)]
        bind: Option<std::net::SocketAddr>,
        /// Also write a daily rolling log file here
        #[arg(long)]
        log_dir: Option<PathBuf>,
    },
    /// Create the identity for an account
    Init {
        #[arg(short, long)]
        account: String,
    },
    /// Show an account's identity
    Identity {
        #[arg(short, long)]
        account: String,
        /// Print the private key too
        #[arg(long)]
        export: bool,
    },
    /// Send one message
    Send {
        #[arg(short, long)]
        account: String,
        /// Recipient public key (base58)
        recipient: String,
        message: String,
        /// Ask the recipient to acknowledge, and wait for it
        #[arg(long)]
        ack: bool,
        /// Seconds to wait for the acknowledgement
        #[arg(long, default_value = "30")]
        wait: u64,
    },
    /// Print incoming messages until interrupted
    Listen {
        #[arg(short, long)]
        account: String,
    },
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Run self-tests
    Test,
}

#[derive(Subcommand)]
enum ConfigAction {
    Set { key: String, value: String },
    Get { key: String },
    List,
    /// Manage seed relays
    Seed {
        #[command(subcommand)]
        action: SeedAction,
    },
}

#[derive(Subcommand)]
enum SeedAction {
    Add { node: String },
    Remove { node: String },
    List,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let _log_guard = match &cli.command {
        Commands::Relay { log_dir, .. } => init_logging("info", log_dir.as_deref()),
        _ => init_logging("warn", None),
    };

    match cli.command {
        Commands::Relay {
            node,
            seeds,
            state,
            bind,
            ..
        } => cmd_relay(node, seeds, state, bind).await,
        Commands::Init { account } => cmd_init(account),
        Commands::Identity { account, export } => cmd_identity(account, export),
        Commands::Send {
            account,
            recipient,
            message,
            ack,
            wait,
        } => cmd_send(account, recipient, message, ack, wait).await,
        Commands::Listen { account } => cmd_listen(account).await,
        Commands::Config { action } => cmd_config(action),
        Commands::Test => cmd_test().await,
    }
}

fn init_logging(default_filter: &str, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "meshchat.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    guard
}

// ============================================================================
// RELAY
// ============================================================================

async fn cmd_relay(
    node: String,
    seeds_file: Option<PathBuf>,
    state: Option<PathBuf>,
    bind: Option<std::net::SocketAddr>,
) -> Result<()> {
    let config = config::Config::load()?;
    let node: NodeAddress = node.parse().context("Invalid relay address")?;

    let seed_nodes = match &seeds_file {
        Some(path) => {
            let list = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read seed list {}", path.display()))?;
            NodeSet::decode(&list)
        }
        None => config.seed_set(),
    };

    let mut relay_config = RelayServerConfig::new(node.clone());
    relay_config.bind_addr = bind;
    relay_config.seed_nodes = seed_nodes;
    relay_config.state_path = Some(match state {
        Some(path) => path,
        None => config.relay_state_file(node.port())?,
    });
    relay_config.discovery_timeout = config.discovery_timeout();
    relay_config.reconnect_interval = config.reconnect_interval();
    relay_config.max_queued_per_identity = config.max_queued_per_identity;

    println!("{}", "meshchat relay — starting...".bold());
    println!();

    let relay = RelayServer::new(relay_config).context("Failed to load relay state")?;
    let handle = relay.start().await.context("Failed to start relay")?;

    println!("{} Listening on {}", "✓".green(), handle.local_addr());
    println!("{} Announcing as {}", "✓".green(), node.as_str().bright_cyan());
    println!("{} {} known nodes", "✓".green(), relay.nodes().len());
    println!();

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    let stats = relay.stats();
    println!();
    println!("{}", "Shutting down".bold());
    println!("  Known nodes:     {}", stats.known_nodes);
    println!("  Server links:    {}", stats.server_links);
    println!("  Client sessions: {}", stats.client_sessions);
    println!("  Queued now:      {}", stats.messages_queued);
    println!("  Delivered:       {}", stats.messages_delivered);
    println!("  Forwarded:       {}", stats.messages_forwarded);

    handle.shutdown();
    Ok(())
}

// ============================================================================
// IDENTITY
// ============================================================================

fn read_password(prompt: &str) -> Result<String> {
    if let Ok(password) = std::env::var(PASSWORD_ENV) {
        return Ok(password);
    }

    print!("{}", prompt);
    std::io::stdout().flush()?;

    let mut line = String::new();
    let read = std::io::stdin()
        .read_line(&mut line)
        .context("Failed to read password")?;
    if read == 0 {
        anyhow::bail!("No password given");
    }
    Ok(line.trim_end_matches(&['\r', '\n'][..]).to_string())
}

fn open_account(config: &config::Config, account: &str) -> Result<IdentityManager> {
    let path = config.account_dir(account)?;
    IdentityManager::with_path(&path)
        .with_context(|| format!("Failed to open account store {}", path.display()))
}

/// Unlock an existing account, asking for the password up to three times
fn unlock(config: &config::Config, account: &str) -> Result<IdentityKeys> {
    let mut manager = open_account(config, account)?;
    if !manager.has_identity()? {
        anyhow::bail!(
            "No identity for account '{}'. Run: meshchat init --account {}",
            account,
            account
        );
    }

    let attempts = if std::env::var(PASSWORD_ENV).is_ok() {
        1
    } else {
        PASSWORD_ATTEMPTS
    };

    for attempt in 1..=attempts {
        let password = read_password("Password: ")?;
        let outcome = manager.initialize(&password).map(|_| ());
        match outcome {
            Ok(()) => return Ok(manager.into_keys()?),
            Err(IdentityError::BadPassword) => {
                eprintln!(
                    "{} Wrong password ({}/{})",
                    "✗".red(),
                    attempt,
                    attempts
                );
            }
            Err(e) => return Err(e).context("Failed to load identity"),
        }
    }

    anyhow::bail!("Too many failed password attempts")
}

fn cmd_init(account: String) -> Result<()> {
    let config = config::Config::load()?;
    println!("{}", "Initializing meshchat account...".bold());
    println!();

    let mut manager = open_account(&config, &account)?;
    if manager.has_identity()? {
        println!(
            "{} Account '{}' already has an identity",
            "✓".green(),
            account.bright_cyan()
        );
        println!("  Show it with: {}", format!("meshchat identity --account {}", account).bright_green());
        return Ok(());
    }

    let password = read_password("New password: ")?;
    if password.is_empty() {
        anyhow::bail!("Password must not be empty");
    }
    let public_key = manager
        .initialize(&password)
        .context("Failed to initialize identity")?
        .public_key_base58();

    println!("{} Identity created", "✓".green());
    println!();
    println!("{}", "Identity Information:".bold());
    println!("  Account:    {}", account.bright_cyan());
    println!("  Public Key: {}", public_key.bright_yellow());
    println!();
    println!("{}", "Next steps:".bold());
    println!(
        "  • Listen: {}",
        format!("meshchat listen --account {}", account).bright_green()
    );
    println!(
        "  • Send:   {}",
        format!("meshchat send --account {} <public-key> <message>", account).bright_green()
    );

    Ok(())
}

fn cmd_identity(account: String, export: bool) -> Result<()> {
    let config = config::Config::load()?;
    let keys = unlock(&config, &account)?;

    println!("{}", "Identity Information".bold());
    println!("  Account:    {}", account.bright_cyan());
    println!("  Public Key: {}", keys.public_key_base58().bright_yellow());

    if export {
        println!();
        println!("{}", "⚠️  WARNING: Keep your private key secret!".bright_red().bold());
        println!("  Private Key: {}", keys.private_key_base58().as_str());
    }

    Ok(())
}

// ============================================================================
// CLIENT
// ============================================================================

async fn connect_client(config: &config::Config, account: &str) -> Result<(MeshClient, ClientEvents)> {
    let keys = unlock(config, account)?;
    let (client, events) = MeshClient::new(
        keys,
        ClientConfig {
            discovery_timeout: config.discovery_timeout(),
        },
    );

    let seeds = config.seed_nodes.join("\n");
    let home = client
        .bootstrap(&seeds)
        .await
        .context("No relay known for this identity; check the seed list")?;
    tracing::info!("Residence relay is {}", home);

    client
        .connect()
        .await
        .with_context(|| format!("Failed to connect to relay {}", home))?;

    Ok((client, events))
}

/// Close the link and wait for the pump to flush it
async fn close_client(client: &MeshClient, events: &mut ClientEvents) {
    client.disconnect();
    let _ = tokio::time::timeout(Duration::from_secs(2), async {
        while let Some(event) = events.recv().await {
            if event == ClientEvent::Disconnected {
                break;
            }
        }
    })
    .await;
}

async fn cmd_send(
    account: String,
    recipient: String,
    message: String,
    ack: bool,
    wait: u64,
) -> Result<()> {
    let config = config::Config::load()?;
    let (client, mut events) = connect_client(&config, &account).await?;

    let id = client
        .send(&recipient, &message, ack)
        .context("Failed to send message")?;
    println!("{} Sent {} to {}", "✓".green(), id.dimmed(), short_key(&recipient).bright_cyan());

    if ack {
        let acked = tokio::time::timeout(Duration::from_secs(wait), async {
            while let Some(event) = events.recv().await {
                match event {
                    ClientEvent::Ack { id: acked, .. } if acked == id => return true,
                    ClientEvent::Disconnected => return false,
                    _ => {}
                }
            }
            false
        })
        .await
        .unwrap_or(false);

        if acked {
            println!("{} Acknowledged", "✓".green());
        } else {
            println!("{} No acknowledgement within {}s", "✗".yellow(), wait);
        }
    }

    close_client(&client, &mut events).await;
    Ok(())
}

async fn cmd_listen(account: String) -> Result<()> {
    let config = config::Config::load()?;
    let (client, mut events) = connect_client(&config, &account).await?;

    println!("{}", "meshchat — listening".bold());
    println!("  Identity: {}", client.public_key().bright_yellow());
    if let Some(relay) = client.residence() {
        println!("  Relay:    {}", relay.as_str().bright_cyan());
    }
    println!();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(ClientEvent::Message { from, text, time_sent, .. }) => {
                    println!(
                        "{} {} [{}]",
                        "←".bright_blue(),
                        short_key(&from).bright_cyan(),
                        format_timestamp(time_sent).dimmed()
                    );
                    println!("   {}", text);
                }
                Some(ClientEvent::Ack { id, from }) => {
                    println!("{} {} acknowledged {}", "✓".green(), short_key(&from).bright_cyan(), id.dimmed());
                }
                Some(ClientEvent::DeliveryFault { id, from, reason }) => {
                    println!(
                        "{} Could not open {} from {}: {}",
                        "✗".red(),
                        id,
                        short_key(&from),
                        reason
                    );
                }
                Some(ClientEvent::Discover(nodes)) => {
                    tracing::info!("Node set grew to {} relays", nodes.len());
                }
                Some(ClientEvent::Disconnected) | None => {
                    println!("{} Relay connection closed", "✗".red());
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                println!();
                println!("Shutting down...");
                close_client(&client, &mut events).await;
                break;
            }
        }
    }

    Ok(())
}

// ============================================================================
// CONFIG
// ============================================================================

fn cmd_config(action: ConfigAction) -> Result<()> {
    let mut config = config::Config::load()?;

    match action {
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            config.save()?;
            println!("{} Set {} = {}", "✓".green(), key.bright_cyan(), value);
        }

        ConfigAction::Get { key } => {
            if let Some(value) = config.get(&key) {
                println!("{} = {}", key.bright_cyan(), value);
            } else {
                anyhow::bail!("Unknown config key: {}", key);
            }
        }

        ConfigAction::List => {
            println!("{}", "Configuration".bold());
            println!();

            for (key, value) in config.list() {
                println!("  {:<24} {}", key.bright_cyan(), value);
            }

            println!();
            print_seeds(&config);
        }

        ConfigAction::Seed { action } => match action {
            SeedAction::Add { node } => {
                if config.add_seed_node(&node)? {
                    config.save()?;
                    println!("{} Added seed relay: {}", "✓".green(), node);
                } else {
                    println!("{} Already configured: {}", "✓".green(), node);
                }
            }

            SeedAction::Remove { node } => {
                if config.remove_seed_node(&node) {
                    config.save()?;
                    println!("{} Removed seed relay", "✓".green());
                } else {
                    anyhow::bail!("Not a configured seed relay: {}", node);
                }
            }

            SeedAction::List => print_seeds(&config),
        },
    }

    Ok(())
}

fn print_seeds(config: &config::Config) {
    println!("{}", "Seed relays:".bold());
    if config.seed_nodes.is_empty() {
        println!("  {}", "(none configured)".dimmed());
    } else {
        for (i, node) in config.seed_nodes.iter().enumerate() {
            println!("  {}. {}", i + 1, node);
        }
    }
}

// ============================================================================
// SELF-TEST
// ============================================================================

async fn cmd_test() -> Result<()> {
    println!("{}", "Running self-tests...".bold());
    println!();

    let alice_keys = IdentityKeys::generate();
    let bob_keys = IdentityKeys::generate();
    let eve_keys = IdentityKeys::generate();
    println!("{} Identity generation", "✓".green());

    let secret = alice_keys.shared_secret(&bob_keys.public_key_base58())?;
    let sealed = crypto::seal_str(secret.as_bytes(), "Test message")?;
    let reverse = bob_keys.shared_secret(&alice_keys.public_key_base58())?;
    anyhow::ensure!(
        crypto::open_str(reverse.as_bytes(), &sealed)? == "Test message",
        "decryption returned the wrong plaintext"
    );
    println!("{} Message sealing ({} chars on the wire)", "✓".green(), sealed.len());

    let eve = eve_keys.shared_secret(&alice_keys.public_key_base58())?;
    anyhow::ensure!(
        crypto::open_str(eve.as_bytes(), &sealed).is_err(),
        "a third party opened the message"
    );
    println!("{} Encryption security", "✓".green());

    // Loopback relay with two clients
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let node = NodeAddress::from_parts("127.0.0.1", listener.local_addr()?.port())?;
    let relay_config = RelayServerConfig::new(node.clone());
    let relay = RelayServer::new(relay_config)?;
    let handle = relay.serve(listener)?;
    println!("{} Relay on {}", "✓".green(), node);

    let (alice, mut alice_events) = MeshClient::new(alice_keys, ClientConfig::default());
    let (bob, mut bob_events) = MeshClient::new(bob_keys, ClientConfig::default());
    for client in [&alice, &bob] {
        client.bootstrap(node.as_str()).await?;
        client.connect().await?;
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !(relay.has_session(alice.public_key()) && relay.has_session(bob.public_key())) {
        anyhow::ensure!(tokio::time::Instant::now() < deadline, "clients never attached");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let id = alice.send(bob.public_key(), "ping", true)?;
    let received = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(event) = bob_events.recv().await {
            if let ClientEvent::Message { text, .. } = event {
                return Some(text);
            }
        }
        None
    })
    .await
    .ok()
    .flatten();
    anyhow::ensure!(received.as_deref() == Some("ping"), "message was not delivered");
    println!("{} Relay delivery \"{}\"", "✓".green(), preview("ping"));

    let acked = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(event) = alice_events.recv().await {
            if let ClientEvent::Ack { id: acked, .. } = event {
                return acked == id;
            }
        }
        false
    })
    .await
    .unwrap_or(false);
    anyhow::ensure!(acked, "acknowledgement did not arrive");
    println!("{} Acknowledgement", "✓".green());

    close_client(&alice, &mut alice_events).await;
    close_client(&bob, &mut bob_events).await;
    handle.shutdown();

    println!();
    println!("{}", "All tests passed!".green().bold());

    Ok(())
}

fn format_timestamp(millis: u64) -> String {
    use chrono::{DateTime, Local, Utc};

    let dt = DateTime::<Utc>::from_timestamp_millis(millis as i64).unwrap_or_else(Utc::now);
    let local: DateTime<Local> = dt.into();

    local.format("%Y-%m-%d %H:%M:%S").to_string()
}
