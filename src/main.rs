//! Command line Nostr client. Manages an encrypted signing key and a relay
//! list, signs text notes, and fans events and subscription requests out to
//! every configured relay.

mod config;
mod error;
mod event;
mod filter;
mod keyfile;
mod keys;
mod prompt;
mod publish;
mod relays;

use std::path::Path;

use anyhow::{bail, ensure, Context};
use clap::{Parser, Subcommand};
use config::Settings;
use event::{Event, SignedEvent};
use filter::{parse_filter_arg, SubscriptionRequest};
use keys::KeyPair;
use publish::{PublishReport, Publisher};
use relays::{parse_relay_input, RelayList};

/// Command line interface entry point.
#[derive(Parser)]
#[command(
    name = "postr",
    author,
    version,
    about = "Minimal Nostr client",
    short_flag = 'v',
    long_flag = "version"
)]
struct Cli {
    /// Path to the `.env` configuration file.
    #[arg(long, default_value = ".env")]
    env: String,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Create the `.env` file and a new password-protected key.
    Init,
    /// Print the public key (and the secret key with `--all`).
    Whoami {
        #[arg(long)]
        all: bool,
    },
    /// Sign a text note and publish it to every relay.
    Post {
        content: String,
        /// Event id this note replies to.
        #[arg(long = "reply-to", value_name = "EVENT_ID")]
        reply_to: Vec<String>,
        /// Public key of a user to mention.
        #[arg(long, value_name = "PUBKEY")]
        mention: Vec<String>,
        /// Relay hint stored alongside each tag.
        #[arg(long, default_value = "")]
        relay_hint: String,
    },
    /// Open a subscription on every relay.
    Subscribe {
        /// Filter as NAME=VALUE, e.g. `authors=abc,def` or `limit=10`.
        #[arg(long = "filter", value_name = "NAME=VALUE")]
        filters: Vec<String>,
    },
    /// Close a subscription previously opened with the same filters.
    Unsubscribe {
        #[arg(long = "filter", value_name = "NAME=VALUE")]
        filters: Vec<String>,
    },
    /// Manage the relay list.
    Relays {
        #[command(subcommand)]
        action: RelayAction,
    },
    /// Delete the key file.
    DeleteKey,
}

/// Operations available under `postr relays`.
#[derive(Subcommand)]
enum RelayAction {
    /// Add relays (space or comma separated).
    Add {
        #[arg(required = true)]
        urls: Vec<String>,
    },
    /// Remove a relay.
    Remove { url: String },
    /// List configured relays.
    List,
}

/// Execute the selected CLI subcommand.
async fn run(cli: Cli) -> anyhow::Result<()> {
    config::ensure_env_file(&cli.env)?;
    let cfg = Settings::from_env(&cli.env)?;
    match cli.command {
        Commands::Init => {
            if KeyPair::has_stored_key(&cfg.key_file)? {
                bail!("a key already exists at {}", cfg.key_file.display());
            }
            let mut keys = KeyPair::generate()?;
            eprintln!("Creating a new encrypted key storage file...");
            let password = prompt::read_new_password()?;
            keys.save(&cfg.key_file, &password)?;
            println!("{}", keys.public_key_hex());
        }
        Commands::Whoami { all } => {
            let keys = unlock_keys(&cfg)?;
            println!("public key: {}", keys.public_key_hex());
            if all {
                println!("secret key: {}", keys.secret_key_hex());
            }
        }
        Commands::Post {
            content,
            reply_to,
            mention,
            relay_hint,
        } => {
            let keys = unlock_keys(&cfg)?;
            let signed = sign_note(&keys, &content, &reply_to, &mention, &relay_hint)?;
            println!("id: {}", signed.id);
            let report = broadcast(&cfg, &signed.payload()?).await?;
            print_report(&report);
        }
        Commands::Subscribe { filters } => {
            let keys = unlock_keys(&cfg)?;
            let request = subscription(&keys, &filters)?;
            println!("subscription: {}", request.subscription_id());
            let report = broadcast(&cfg, &request.open_payload()?).await?;
            print_report(&report);
        }
        Commands::Unsubscribe { filters } => {
            let keys = unlock_keys(&cfg)?;
            let request = subscription(&keys, &filters)?;
            println!("subscription: {}", request.subscription_id());
            let report = broadcast(&cfg, &request.close_payload()?).await?;
            print_report(&report);
        }
        Commands::Relays { action } => {
            let mut relays = RelayList::open(&cfg.relay_file)?;
            match action {
                RelayAction::Add { urls } => {
                    let parsed: Vec<String> =
                        urls.iter().flat_map(|u| parse_relay_input(u)).collect();
                    let added = relays.add(parsed)?;
                    println!("added {added} relay(s)");
                }
                RelayAction::Remove { url } => {
                    if !relays.remove(&url)? {
                        bail!("relay not configured: {url}");
                    }
                }
                RelayAction::List => {
                    for url in relays.urls() {
                        println!("{url}");
                    }
                }
            }
        }
        Commands::DeleteKey => {
            let mut keys = unlock_keys(&cfg)?;
            let path = keys
                .key_file()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| cfg.key_file.clone());
            keys.delete_file()?;
            println!("deleted {}", path.display());
        }
    }
    Ok(())
}

/// Prompt for the password and decrypt the configured key file.
fn unlock_keys(cfg: &Settings) -> anyhow::Result<KeyPair> {
    if !KeyPair::has_stored_key(&cfg.key_file)? {
        bail!(
            "no key stored at {}; run `postr init` first",
            cfg.key_file.display()
        );
    }
    let password = prompt::read_password("Enter password below:\n>")?;
    KeyPair::load(&cfg.key_file, &password)?
        .with_context(|| format!("no key stored at {}", cfg.key_file.display()))
}

fn sign_note(
    keys: &KeyPair,
    content: &str,
    reply_to: &[String],
    mention: &[String],
    relay_hint: &str,
) -> anyhow::Result<SignedEvent> {
    if content.is_empty() {
        bail!("refusing to post an empty note");
    }
    let mut event = Event::new(keys.public_key_hex(), content);
    for id in reply_to {
        event.tag_event(id, relay_hint);
    }
    for pubkey in mention {
        event.tag_user(pubkey, relay_hint);
    }
    let signed = event.sign(keys)?;
    ensure!(signed.verify(), "signed event {} failed verification", signed.id);
    Ok(signed)
}

fn subscription(keys: &KeyPair, filters: &[String]) -> anyhow::Result<SubscriptionRequest> {
    let params = filters
        .iter()
        .map(|f| parse_filter_arg(f))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(SubscriptionRequest::from_params(
        &keys.public_key_hex(),
        params,
    )?)
}

async fn broadcast(cfg: &Settings, payload: &str) -> anyhow::Result<PublishReport> {
    let relays = RelayList::open(&cfg.relay_file)?;
    let report = Publisher::from_settings(cfg)
        .publish(payload, &relays.urls())
        .await
        .with_context(|| format!("add relays to {} first", cfg.relay_file.display()))?;
    Ok(report)
}

fn print_report(report: &PublishReport) {
    let mut rows: Vec<_> = report.iter().collect();
    rows.sort_by(|a, b| a.0.cmp(b.0));
    for (url, outcome) in rows {
        println!("{url}: {outcome}");
    }
    println!("{}/{} relay(s) replied", report.success_count(), report.relay_count());
    let retry = report.unsuccessful();
    if !retry.is_empty() {
        eprintln!("no reply from: {}", retry.join(", "));
    }
}

#[cfg(not(test))]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    run(cli).await
}
