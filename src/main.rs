//! Command line client: publish a note to a relay and follow its feed, generate
//! keys, and inspect NIP-19 identifiers.

mod config;

use std::{fs, path::Path};

use anyhow::bail;
use clap::{Parser, Subcommand};
use config::Settings;
use futures_util::StreamExt;
use nostra::{
    create_note, unix_now, Filter, Inbound, RelayMessage, RelaySession, SecretKey, SessionOptions,
    Shareable,
};
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Command line interface entry point.
#[derive(Parser)]
#[command(
    name = "nostra",
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
    /// Connect to a relay, optionally publish a note, and print incoming events.
    Run {
        /// Relay URL; overrides `RELAY_URL`.
        #[arg(long)]
        relay: Option<String>,
        /// Secret key (`nsec1…` or hex) used to sign; a fresh key when absent.
        #[arg(long)]
        nsec: Option<String>,
        /// Text of a note to publish before listening.
        text: Option<String>,
    },
    /// Generate a new key pair and print it as `nsec` and `npub`.
    Keygen,
    /// Decode an `npub`, `nsec`, `note`, `nevent` or `nprofile` string.
    Decode { value: String },
}

/// Execute the selected CLI subcommand.
async fn run(cli: Cli) -> anyhow::Result<()> {
    ensure_env_file(&cli.env)?;
    let cfg = Settings::from_env(&cli.env)?;
    init_tracing(&cfg);
    match cli.command {
        Commands::Run { relay, nsec, text } => {
            let relay = relay.unwrap_or_else(|| cfg.relay_url.clone());
            run_session(&cfg, &relay, nsec.as_deref(), text).await?;
        }
        Commands::Keygen => {
            let sk = SecretKey::generate();
            let npub = Shareable::PublicKey(sk.public_key()).encode()?;
            println!("{}", Shareable::SecretKey(sk).encode()?);
            println!("{npub}");
        }
        Commands::Decode { value } => {
            let decoded = Shareable::decode(value.trim())?;
            println!("{}", serde_json::to_string_pretty(&describe(&decoded))?);
        }
    }
    Ok(())
}

/// Publish `text` if given, then print events from the relay until Ctrl-C or
/// disconnect.
async fn run_session(
    cfg: &Settings,
    relay: &str,
    nsec: Option<&str>,
    text: Option<String>,
) -> anyhow::Result<()> {
    let options = SessionOptions {
        socks_proxy: cfg.tor_socks.clone(),
        inbound_buffer: cfg.inbound_buffer,
    };
    let session = RelaySession::connect_with(relay, options).await?;
    let mut inbound = session.listen();

    if let Some(text) = text {
        let key = match nsec {
            Some(value) => parse_secret_key(value)?,
            None => SecretKey::generate(),
        };
        let event = create_note(text).finalize(&key)?;
        session.publish(&event)?;
        let reference = Shareable::nevent(
            *event.id(),
            cfg.hints_for(relay),
            Some(*event.pubkey()),
            Some(event.kind()),
        );
        println!("{}", reference.encode()?);
        println!("{}", event.to_json()?);
    }

    session.subscribe(
        cfg.subscription_id.clone(),
        vec![Filter::new().since(unix_now())],
    )?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut closing = false;
    loop {
        tokio::select! {
            _ = &mut ctrl_c, if !closing => {
                closing = true;
                session.close();
            }
            item = inbound.next() => match item {
                Some(Inbound::Message(RelayMessage::Event { event, .. })) => {
                    println!("{}", event.to_json()?);
                }
                Some(Inbound::Message(RelayMessage::Ok { event_id, accepted, message })) => {
                    if accepted {
                        info!(id = %event_id, "relay accepted event");
                    } else {
                        warn!(id = %event_id, reason = %message, "relay rejected event");
                    }
                }
                Some(Inbound::Message(RelayMessage::Notice(notice))) => {
                    info!(notice = %notice, "relay notice");
                }
                Some(Inbound::Message(other)) => debug!(message = ?other, "relay message"),
                Some(Inbound::Untracked(msg)) => {
                    debug!(
                        subscription = ?msg.subscription_id(),
                        "message for closed subscription"
                    );
                }
                Some(Inbound::Disconnected(reason)) => {
                    info!(reason = ?reason, "disconnected");
                    break;
                }
                None => break,
            }
        }
    }
    Ok(())
}

/// Accept a secret key as `nsec1…` or 64 hex characters.
fn parse_secret_key(value: &str) -> anyhow::Result<SecretKey> {
    if value.starts_with("nsec1") {
        return match Shareable::decode(value)? {
            Shareable::SecretKey(sk) => Ok(sk),
            other => bail!("expected an nsec key, got {}", other.prefix()),
        };
    }
    Ok(SecretKey::from_hex(value)?)
}

/// JSON view of a decoded identifier.
fn describe(decoded: &Shareable) -> Value {
    match decoded {
        Shareable::PublicKey(pk) => json!({ "type": "npub", "pubkey": pk.to_hex() }),
        Shareable::SecretKey(sk) => json!({ "type": "nsec", "secret_key": sk.to_hex() }),
        Shareable::Note(id) => json!({ "type": "note", "id": id.to_hex() }),
        Shareable::Event {
            id,
            relays,
            author,
            kind,
        } => json!({
            "type": "nevent",
            "id": id.to_hex(),
            "relays": relays,
            "author": author.map(|pk| pk.to_hex()),
            "kind": kind,
        }),
        Shareable::Profile { pubkey, relays } => json!({
            "type": "nprofile",
            "pubkey": pubkey.to_hex(),
            "relays": relays,
        }),
    }
}

/// Install the global subscriber. Logs go to stderr; stdout carries events.
fn init_tracing(cfg: &Settings) {
    let filter = EnvFilter::try_new(&cfg.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    // A subscriber may already be installed when `run` is invoked repeatedly.
    let _ = if cfg.log_json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init()
    };
}

/// Create a default `.env` file if one is not already present at `path`.
fn ensure_env_file(path: &str) -> anyhow::Result<()> {
    let env_path = Path::new(path);
    if env_path.exists() {
        return Ok(());
    }
    if let Some(parent) = env_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut content = String::new();
    content.push_str(&format!("RELAY_URL={}\n", config::DEFAULT_RELAY_URL));
    content.push_str("# Comma-separated; quote the value if it contains spaces.\n");
    content.push_str("RELAY_HINTS=\n");
    content.push_str(&format!(
        "SUBSCRIPTION_ID={}\n",
        config::DEFAULT_SUBSCRIPTION_ID
    ));
    content.push_str("TOR_SOCKS=\n");
    content.push_str(&format!(
        "INBOUND_BUFFER={}\n",
        nostra::relay::DEFAULT_INBOUND_BUFFER
    ));
    content.push_str("LOG_LEVEL=info\n");
    content.push_str("LOG_JSON=0\n");
    fs::write(env_path, content)?;
    Ok(())
}

#[cfg(not(test))]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    run(cli).await
}
