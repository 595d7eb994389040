use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;
use url::Url;
use zkauth::{
    config::{BaseUrl, VerifierConfig},
    verifier::{session::spawn_expiry_sweep, VerifierBuilder},
};

mod server;

use server::{create_router, AppState};

/// Address of the identity state contract on Polygon Mumbai.
const DEFAULT_STATE_CONTRACT: &str = "0x46Fd04eEa588a3EA7e9F055dd691C688c4148ab3";
const EXPIRY_SWEEP_PERIOD: Duration = Duration::from_secs(60);

#[derive(Parser, Debug)]
#[command(about = "Zero-knowledge authentication verifier")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "8080", env = "PORT")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "0.0.0.0", env = "HOST")]
    host: String,

    /// Public URL where this server is accessible (used for the callback url)
    #[arg(long, env = "PUBLIC_URL")]
    public_url: BaseUrl,

    /// DID the verifier presents itself as
    #[arg(long, env = "VERIFIER_DID")]
    verifier_did: String,

    /// JSON-RPC endpoint of the ledger anchoring identity states
    #[arg(long, env = "LEDGER_RPC_URL")]
    ledger_rpc_url: Url,

    /// Address of the identity state contract
    #[arg(long, default_value = DEFAULT_STATE_CONTRACT, env = "STATE_CONTRACT")]
    state_contract: String,

    /// Directory holding `<circuitId>.json` verification keys
    #[arg(long, default_value = "./keys", env = "KEY_DIR")]
    key_dir: PathBuf,

    /// Gateway used to fetch `ipfs://` schemas
    #[arg(long, default_value = "https://ipfs.io", env = "IPFS_GATEWAY")]
    ipfs_gateway: BaseUrl,

    /// Seconds an issued request stays answerable
    #[arg(long, default_value = "300", env = "SESSION_TTL")]
    session_ttl: u64,

    /// Seconds allowed for each key, schema or ledger lookup
    #[arg(long, default_value = "10", env = "COLLABORATOR_TIMEOUT")]
    collaborator_timeout: u64,

    /// Reject identity states replaced longer ago than this many seconds
    #[arg(long, env = "HISTORICAL_STATE_MAX_AGE")]
    historical_state_max_age: Option<u64>,

    /// Reject issuer non-revocation states replaced longer ago than this many seconds
    #[arg(long, default_value = "3600", env = "NON_REVOCATION_STATE_MAX_AGE")]
    non_revocation_state_max_age: u64,

    /// Accept responses that are not wrapped in a JWZ token
    #[arg(long, env = "ACCEPT_PLAIN_RESPONSES")]
    accept_plain_responses: bool,

    /// Log level
    #[arg(long, default_value = "info", env = "LOG_LEVEL")]
    log_level: String,
}

impl Args {
    fn verifier_config(&self) -> Result<VerifierConfig> {
        Ok(VerifierConfig {
            verifier_identifier: self.verifier_did.clone(),
            callback_base_url: self
                .public_url
                .join("api/callback")
                .context("unable to build the callback url")?,
            ledger_endpoint: self.ledger_rpc_url.clone(),
            state_contract_address: self.state_contract.clone(),
            key_directory: self.key_dir.clone(),
            schema_fetch_endpoint: self.ipfs_gateway.clone(),
            session_ttl_secs: self.session_ttl,
            collaborator_timeout_secs: self.collaborator_timeout,
            historical_state_max_age_secs: self.historical_state_max_age,
            non_revocation_state_max_age_secs: self.non_revocation_state_max_age,
            accept_plain_responses: self.accept_plain_responses,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = args.verifier_config()?;
    let verifier = VerifierBuilder::from_config(&config)?.build().await?;
    spawn_expiry_sweep(verifier.session_store().clone(), EXPIRY_SWEEP_PERIOD);

    let app = create_router(Arc::new(AppState::new(verifier)?));

    let addr = format!("{}:{}", args.host, args.port);
    info!(
        callback = %config.callback_base_url,
        verifier = %config.verifier_identifier,
        "Listening on {}",
        addr
    );

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
