//! acm-node — the ACM operator binary.
//!
//! Startup sequence:
//!   1. Load configuration (TOML file, overridden by CLI flags)
//!   2. Open (or initialise) the persistent store
//!   3. Load (or generate) the evidence-chain signing key
//!   4. Wire up the compliance cache, validator, evidence chain, ACVS
//!      facade, and rotation state machine
//!   5. Run either a one-shot demo scenario or the maintenance daemon loop

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use acm_acvs::{AcvsFacade, FixtureFetcher, KeywordClassifier, ToSContent};
use acm_core::{
    ActionMethod, ActionType, AutomationAction, AcmConfig, EvidenceFilter,
};
use acm_crypto::Keypair;
use acm_evidence::EvidenceChain;
use acm_rotation::{FineGrainedAdapter, InMemoryTokenBackend, RotationMachine, StartRotationRequest};
use acm_store::{Store, StoreConfig};

#[derive(Parser, Debug)]
#[command(
    name = "acm-node",
    version,
    about = "ACM — Automated Credential Management: compliance-aware credential rotation"
)]
struct Args {
    /// Directory for the persistent store and backups.
    #[arg(long, default_value = "~/.acm/data")]
    data_dir: PathBuf,

    /// Directory for configuration and signing key material.
    #[arg(long, default_value = "~/.acm/config")]
    config_dir: PathBuf,

    /// Optional TOML config file; CLI flags above still apply as the
    /// directory defaults when the file omits them.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a scripted end-to-end rotation against the bundled in-memory
    /// fixtures, then exit. Useful for a local smoke test.
    Demo,
    /// Run the maintenance daemon loop: periodic CRC and rotation-state
    /// cleanup. Runs until interrupted.
    Serve {
        /// Seconds between maintenance passes.
        #[arg(long, default_value_t = 300)]
        interval_secs: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,acm=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();
    info!("ACM node starting");

    let mut config = match &args.config {
        Some(path) => {
            let toml_src = std::fs::read_to_string(path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            AcmConfig::load_from_str(&toml_src).context("parsing config file")?
        }
        None => AcmConfig::default(),
    };
    config.data_dir = expand_tilde(&args.data_dir);
    config.config_dir = expand_tilde(&args.config_dir);

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data dir {}", config.data_dir.display()))?;
    std::fs::create_dir_all(&config.config_dir)
        .with_context(|| format!("creating config dir {}", config.config_dir.display()))?;

    let store = Arc::new(
        Store::open(config.data_dir.join("acm.db"), StoreConfig::default())
            .context("opening persistent store")?,
    );

    let keypair = Arc::new(load_or_generate_keypair(&config).context("loading evidence signing key")?);

    let chain = Arc::new(EvidenceChain::new(Arc::clone(&store), Arc::clone(&keypair)));
    let fetcher = Arc::new(FixtureFetcher::new());
    let classifier = Arc::new(KeywordClassifier);
    let acvs = Arc::new(
        AcvsFacade::new(
            Arc::clone(&store),
            Arc::clone(&chain),
            Arc::clone(&keypair),
            fetcher.clone(),
            classifier,
            config.crc_cache_ttl_secs,
            config.validator.default_on_uncertain,
        )
        .context("constructing ACVS facade")?,
    );

    let backend = InMemoryTokenBackend::new();
    backend.seed("current-tok", "alice");
    backend.seed("new-tok", "alice");
    let adapter = Arc::new(FineGrainedAdapter::new("demo-provider", backend));
    let rotation = RotationMachine::new(Arc::clone(&store), adapter, chain, Some(Arc::clone(&acvs)));

    match args.command {
        Command::Demo => run_demo(&acvs, &rotation, &fetcher).await?,
        Command::Serve { interval_secs } => run_maintenance_loop(&acvs, &rotation, interval_secs).await,
    }

    Ok(())
}

/// Scripted end-to-end run: enable ACVS, analyze ToS for a demo site,
/// rotate a demo credential, and print the resulting evidence chain export.
async fn run_demo(
    acvs: &AcvsFacade,
    rotation: &RotationMachine,
    fetcher: &FixtureFetcher,
) -> anyhow::Result<()> {
    let now = chrono::Utc::now().timestamp();

    acvs.enable("v1", true, now).context("enabling ACVS")?;

    fetcher.seed(
        "example.com",
        ToSContent {
            url: "https://example.com/tos".into(),
            version: "v1".into(),
            body: "You may access your account via our public API. Automated credential rotation is supported.".into(),
        },
    );
    let crc = acvs
        .analyze_tos("example.com", None, true, std::time::Duration::from_secs(5), now)
        .context("analyzing ToS")?;
    info!(crc_id = %crc.id, recommendation = ?crc.recommendation, "ToS analyzed");

    let action = AutomationAction {
        action_type: ActionType::Rotation,
        method: Some(ActionMethod::Api),
        context: Default::default(),
    };
    let decision = acvs
        .validate_action("example.com", &action, Some("cred-1"), false, now)
        .context("validating rotation action")?;
    info!(result = ?decision.result, "pre-flight validation complete");

    let started = rotation
        .start_rotation(
            StartRotationRequest {
                credential_id: "cred-1".to_string(),
                provider: "demo-provider".to_string(),
                current_token: "current-tok".to_string(),
                site: "example.com".to_string(),
                username: Some("alice".to_string()),
            },
            now,
        )
        .await
        .context("starting rotation")?;
    info!(state_id = %started.state.id, "rotation started");

    let verified = rotation
        .verify_new_token(&started.state.id, "new-tok", now + 60)
        .await
        .context("verifying new token")?;
    info!(state = ?verified.state.state, "new token verified");

    let completed = rotation
        .confirm_deletion(&started.state.id, now + 120)
        .context("confirming old token deletion")?;
    info!(state = ?completed.state.state, "rotation complete");

    let export = acvs
        .export_evidence_chain(&EvidenceFilter {
            credential_id_hash: Some(acm_crypto::sha256_hex(b"cred-1")),
            ..Default::default()
        })
        .context("exporting evidence chain")?;
    println!("{}", serde_json::to_string_pretty(&export)?);

    Ok(())
}

/// Periodic cleanup pass: stale rotation states and expired CRCs. Runs
/// until the process receives a termination signal.
async fn run_maintenance_loop(acvs: &AcvsFacade, rotation: &RotationMachine, interval_secs: u64) -> ! {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
    info!(interval_secs, "maintenance loop starting");
    loop {
        ticker.tick().await;
        let now = chrono::Utc::now().timestamp();

        match rotation.cleanup_expired(now) {
            Ok(n) if n > 0 => info!(removed = n, "expired rotation states purged"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "rotation cleanup failed"),
        }

        match rotation.timeout_stale(now) {
            Ok(n) if n > 0 => warn!(count = n, "rotation states timed out"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "rotation timeout pass failed"),
        }

        match acvs.clean_expired_crcs(now) {
            Ok(n) if n > 0 => info!(removed = n, "expired CRCs purged"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "CRC cache cleanup failed"),
        }

        if let Ok(status) = acvs.get_status(now) {
            info!(
                enabled = status.enabled,
                analyses = status.stats.analyses,
                crcs_cached = status.stats.crcs_cached,
                evidence_entries = status.stats.evidence_entries,
                "maintenance pass complete"
            );
        }
    }
}

fn load_or_generate_keypair(config: &AcmConfig) -> anyhow::Result<Keypair> {
    let priv_path = config.private_key_path();
    if priv_path.exists() {
        let bytes = std::fs::read(&priv_path)
            .with_context(|| format!("reading signing key {}", priv_path.display()))?;
        return Keypair::from_secret_bytes(&bytes).context("parsing signing key bytes");
    }

    warn!(
        path = %priv_path.display(),
        "no evidence signing key found — generating a new one"
    );
    let keypair = Keypair::generate();
    std::fs::create_dir_all(config.keys_dir())
        .with_context(|| format!("creating keys dir {}", config.keys_dir().display()))?;

    write_key_file(&priv_path, &*keypair.secret_bytes(), 0o600)?;
    write_key_file(&config.public_key_path(), &keypair.public_key().to_bytes(), 0o644)?;

    Ok(keypair)
}

#[cfg(unix)]
fn write_key_file(path: &Path, bytes: &[u8], mode: u32) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::write(path, bytes).with_context(|| format!("writing key file {}", path.display()))?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .with_context(|| format!("setting permissions on {}", path.display()))?;
    Ok(())
}

#[cfg(not(unix))]
fn write_key_file(path: &Path, bytes: &[u8], _mode: u32) -> anyhow::Result<()> {
    std::fs::write(path, bytes).with_context(|| format!("writing key file {}", path.display()))
}

/// Expand a leading `~` to the user's home directory (`HOME` or `USERPROFILE`).
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
            return PathBuf::from(home).join(stripped);
        }
    }
    path.to_path_buf()
}
