//! peer: run a peer server or relay a transaction batch to a peer.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use peer_core::{Transaction, TransactionBatch};
use peer_daemon::{Config, PeerServer, TransactionRelay};

#[derive(Parser, Debug)]
#[command(name = "peer")]
#[command(about = "Peer handshake and transaction relay")]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long, env = "PEER_CONFIG", default_value = "peer.yaml")]
    config: PathBuf,

    /// Enable transport encryption (overrides peer.tls.enabled)
    #[arg(long)]
    tls: bool,

    /// PEM file: trust anchors when sending, certificate chain when serving
    #[arg(long)]
    tls_cert: Option<PathBuf>,

    /// PEM private key for serving over TLS
    #[arg(long)]
    tls_key: Option<PathBuf>,

    /// Hostname checked against the server certificate
    #[arg(long)]
    server_host_override: Option<String>,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Accept chat streams and log received transactions
    Serve {
        /// Address to listen on (defaults to peer.address)
        #[arg(short, long)]
        address: Option<String>,
    },

    /// Relay one transaction batch to a peer
    Send {
        /// Peer address (defaults to peer.address)
        #[arg(short, long)]
        address: Option<String>,

        /// Transaction payload; repeat for several transactions
        #[arg(long = "tx", conflicts_with = "batch")]
        payloads: Vec<String>,

        /// JSON file holding a transaction batch
        #[arg(long)]
        batch: Option<PathBuf>,
    },
}

impl Args {
    fn load_config(&self) -> Result<Config> {
        let mut config = Config::load(&self.config)?;
        let tls = &mut config.peer.tls;

        if self.tls {
            tls.enabled = true;
        }
        if let Some(cert) = &self.tls_cert {
            tls.cert.file = Some(cert.clone());
        }
        if let Some(key) = &self.tls_key {
            tls.key.file = Some(key.clone());
        }
        if let Some(name) = &self.server_host_override {
            tls.server_host_override = Some(name.clone());
        }
        Ok(config)
    }
}

fn read_batch(payloads: Vec<String>, file: Option<PathBuf>) -> Result<TransactionBatch> {
    if let Some(path) = file {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read batch file: {:?}", path))?;
        return serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse batch file: {:?}", path));
    }

    if payloads.is_empty() {
        bail!("Nothing to send: pass --tx or --batch");
    }
    let transactions = payloads
        .into_iter()
        .map(|payload| Transaction::new(uuid::Uuid::new_v4().to_string(), payload.into_bytes()))
        .collect();
    Ok(TransactionBatch::new(transactions))
}

async fn serve(config: Config, address: Option<String>) -> Result<()> {
    let address = address.unwrap_or_else(|| config.peer.address.clone());
    let (server, mut transactions_rx) = PeerServer::new(&config.peer)?;
    let listener = PeerServer::bind(&address).await?;

    info!(
        "Serving chat on {} ({})",
        address,
        if config.peer.tls.enabled { "TLS" } else { "plaintext" }
    );
    info!("Press Ctrl+C to stop.");

    let accept_loop = server.run(listener);
    tokio::pin!(accept_loop);

    loop {
        tokio::select! {
            _ = &mut accept_loop => break,

            Some(inbound) = transactions_rx.recv() => {
                info!(
                    "Accepted {} transaction(s) from {}: {:?}",
                    inbound.batch.len(),
                    inbound.peer,
                    inbound.batch.ids()
                );
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    info!("Shutting down");
    Ok(())
}

async fn send(config: Config, address: Option<String>, batch: TransactionBatch) -> Result<()> {
    let relay = TransactionRelay::new(&config.peer)?;
    let address = address.unwrap_or_else(|| relay.default_address().to_string());

    relay.send(&address, &batch).await?;
    info!("Relayed {} transaction(s) to {}", batch.len(), address);
    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,peer_daemon=debug,peer_core=debug"
    } else {
        "info,peer_daemon=info,peer_core=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = run(args).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let config = args.load_config()?;

    match args.command {
        Command::Serve { address } => serve(config, address).await,
        Command::Send {
            address,
            payloads,
            batch,
        } => {
            let batch = read_batch(payloads, batch)?;
            send(config, address, batch).await
        }
    }
}
