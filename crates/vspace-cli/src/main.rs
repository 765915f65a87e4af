//! vspace: VaultSpace client key management CLI
//!
//! Commands:
//!   config show                          - display current configuration
//!   unlock [--salt B64] | --legacy       - derive and store the master secret
//!   lock                                 - forget the master secret
//!   status                               - show key store and session state
//!   folder key-check|encrypt-name|decrypt-name --path a/b
//!   key new | key inspect <B64>          - VaultSpace key wrapping
//!   change-password                      - rotate password, re-wrap every key

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use secrecy::SecretString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use vspace_api::HttpAccountBackend;
use vspace_core::config::{expand_tilde, FolderKeySource, VspaceConfig};
use vspace_core::AccountBackend;
use vspace_crypto::primitives::sha256_hex;
use vspace_crypto::{base64url_to_array, FolderPath, Salt};
use vspace_secrets::{
    KeyStore, PasswordChangeRequest, PasswordPolicy, RotationCoordinator, RotationState, Session,
};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "vspace",
    version,
    about = "VaultSpace client key management",
    long_about = "vspace: unlock the account key hierarchy, encrypt folder names, wrap VaultSpace keys, and change the account password"
)]
struct Cli {
    /// Path to config.toml
    #[arg(
        long,
        short = 'c',
        env = "VSPACE_CONFIG",
        default_value = "~/.config/vspace/config.toml"
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides [logging].level
    #[arg(long, env = "VSPACE_LOG")]
    log: Option<String>,

    /// Log format; overrides [logging].format
    #[arg(long, env = "VSPACE_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    /// Bearer token for the account API
    #[arg(long, env = "VSPACE_ACCESS_TOKEN", hide_env_values = true)]
    token: Option<SecretString>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Derive the master secret from the account password and store it
    ///
    /// The salt is taken from --salt, then the key store, then the API.
    Unlock {
        /// Account salt (standard or url-safe base64)
        #[arg(long, conflicts_with_all = ["legacy", "new_account"])]
        salt: Option<String>,
        /// Enter the legacy mode (well-known key, no password)
        #[arg(long)]
        legacy: bool,
        /// Generate a fresh salt for a new account and print it
        #[arg(long, conflicts_with = "legacy")]
        new_account: bool,
    },

    /// Forget the stored master secret
    Lock,

    /// Show key store and session state
    Status,

    /// Folder key and folder name operations
    Folder {
        #[command(subcommand)]
        action: FolderAction,
    },

    /// VaultSpace key operations
    Key {
        #[command(subcommand)]
        action: KeyAction,
    },

    /// Change the account password and re-wrap every VaultSpace key
    #[command(name = "change-password")]
    ChangePassword,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

#[derive(Subcommand, Debug)]
enum FolderAction {
    /// Print a fingerprint of the folder key for a path
    #[command(name = "key-check")]
    KeyCheck {
        /// Folder path of IDs, e.g. f1/f2
        #[arg(long)]
        path: String,
    },
    /// Encrypt a folder name under its folder key
    #[command(name = "encrypt-name")]
    EncryptName {
        #[arg(long)]
        path: String,
        name: String,
    },
    /// Decrypt a base64url folder-name envelope
    #[command(name = "decrypt-name")]
    DecryptName {
        #[arg(long)]
        path: String,
        envelope: String,
    },
}

#[derive(Subcommand, Debug)]
enum KeyAction {
    /// Generate a VaultSpace key and print its wrapped envelope
    New,
    /// Unwrap an envelope and report how it was decoded
    Inspect { envelope: String },
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = expand_tilde(&cli.config);
    let config = VspaceConfig::load(&config_path)
        .with_context(|| format!("loading config: {}", config_path.display()))?;

    let level = cli.log.clone().unwrap_or_else(|| config.logging.level.clone());
    let format = cli.log_format.clone().unwrap_or(match config.logging.format.as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    });
    init_logging(&level, &format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        "vspace starting"
    );

    let token = cli.token;

    match cli.command {
        Commands::Config { action: ConfigAction::Show } => cmd_config_show(&config, &config_path),
        Commands::Unlock { salt, legacy, new_account } => {
            cmd_unlock(&config, token, salt.as_deref(), legacy, new_account).await
        }
        Commands::Lock => cmd_lock(&config),
        Commands::Status => cmd_status(&config),
        Commands::Folder { action } => cmd_folder(&config, action),
        Commands::Key { action: KeyAction::New } => cmd_key_new(&config),
        Commands::Key { action: KeyAction::Inspect { envelope } } => {
            cmd_key_inspect(&config, &envelope)
        }
        Commands::ChangePassword => cmd_change_password(&config, token).await,
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn open_session(config: &VspaceConfig) -> Session {
    Session::new(KeyStore::from_config(&config.keystore), &config.folders)
}

/// Session restored from the key store, or an error telling the user to unlock.
fn resume_session(config: &VspaceConfig) -> Result<Session> {
    let mut session = open_session(config);
    if !session.resume().context("reading key store")? {
        anyhow::bail!("session is locked: run `vspace unlock` first");
    }
    Ok(session)
}

/// Session able to derive folder keys under the configured key source.
fn folder_session(config: &VspaceConfig) -> Result<Session> {
    match config.folders.key_source {
        FolderKeySource::Legacy => Ok(open_session(config)),
        FolderKeySource::Account => resume_session(config),
    }
}

fn http_backend(config: &VspaceConfig, token: Option<SecretString>) -> Result<HttpAccountBackend> {
    HttpAccountBackend::new(&config.api, token).context("building API client")
}

fn prompt(label: &str) -> Result<SecretString> {
    let password = rpassword::prompt_password(label).context("reading password")?;
    Ok(SecretString::from(password))
}

/// Short, non-reversible identifier for key material.
fn fingerprint(bytes: &[u8]) -> String {
    sha256_hex(bytes)[..16].to_string()
}

fn make_spinner(prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{prefix:.bold} {spinner} {msg}") {
        pb.set_style(style);
    }
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

// ── `vspace config show` ──────────────────────────────────────────────────────

fn cmd_config_show(config: &VspaceConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

// ── `vspace unlock` / `vspace lock` ───────────────────────────────────────────

async fn cmd_unlock(
    config: &VspaceConfig,
    token: Option<SecretString>,
    salt: Option<&str>,
    legacy: bool,
    new_account: bool,
) -> Result<()> {
    let mut session = open_session(config);

    if legacy {
        session.unlock_legacy().context("deriving legacy master secret")?;
        println!("legacy mode: folder keys derive from a well-known default and are not confidential");
        return Ok(());
    }

    let salt = if new_account {
        None
    } else {
        Some(match salt {
            Some(encoded) => Salt::from_base64(encoded).context("parsing --salt")?,
            None => match session.cached_salt() {
                Some(salt) => salt,
                None => {
                    let encoded = http_backend(config, token)?
                        .fetch_salt()
                        .await
                        .context("fetching salt from API")?;
                    Salt::from_base64(&encoded).context("parsing salt from API")?
                }
            },
        })
    };

    let password = prompt("Account password: ")?;
    let pb = make_spinner("unlock");
    pb.set_message("deriving master secret (Argon2id)");
    let result = session.unlock(&password, salt);
    pb.finish_and_clear();
    let salt = result.context("unlocking session")?;

    println!("unlocked ({} key store)", session.keystore().backend_name());
    if new_account {
        println!("new account salt (upload to the server): {}", salt.to_base64());
    }
    Ok(())
}

fn cmd_lock(config: &VspaceConfig) -> Result<()> {
    open_session(config).logout().context("clearing key store")?;
    println!("locked");
    Ok(())
}

// ── `vspace status` ───────────────────────────────────────────────────────────

fn cmd_status(config: &VspaceConfig) -> Result<()> {
    let mut session = open_session(config);
    let unlocked = session.resume().context("reading key store")?;

    println!("vspace status");
    println!("  key store:        {} (origin {})", session.keystore().backend_name(), config.keystore.origin);
    println!("  folder keys from: {:?}", session.folder_key_source());
    println!("  api:              {}", config.api.base_url);
    if unlocked {
        let salt = session.salt().map(|s| s.to_base64()).unwrap_or_default();
        println!("  session:          unlocked");
        println!("  salt:             {salt}");
    } else {
        println!("  session:          locked");
    }
    Ok(())
}

// ── `vspace folder ...` ───────────────────────────────────────────────────────

fn cmd_folder(config: &VspaceConfig, action: FolderAction) -> Result<()> {
    let mut session = folder_session(config)?;

    match action {
        FolderAction::KeyCheck { path } => {
            let path = FolderPath::parse(&path).context("parsing --path")?;
            let key = session.folder_key(&path).context("deriving folder key")?;
            println!("{path}  {}", fingerprint(key.as_bytes()));
        }
        FolderAction::EncryptName { path, name } => {
            let path = FolderPath::parse(&path).context("parsing --path")?;
            let encrypted = session
                .encrypt_folder_name(&path, &name)
                .context("encrypting folder name")?;
            println!("envelope:  {}", encrypted.envelope_base64url());
            println!("name_hash: {}", encrypted.name_hash);
        }
        FolderAction::DecryptName { path, envelope } => {
            let path = FolderPath::parse(&path).context("parsing --path")?;
            let raw = base64url_to_array(&envelope).context("decoding envelope")?;
            println!("{}", session.display_folder_name(&path, &raw));
        }
    }
    Ok(())
}

// ── `vspace key ...` ──────────────────────────────────────────────────────────

fn cmd_key_new(config: &VspaceConfig) -> Result<()> {
    let session = resume_session(config)?;
    let (key, envelope) = session
        .create_vaultspace_key()
        .context("wrapping new VaultSpace key")?;
    println!("fingerprint: {}", fingerprint(key.export()));
    println!("envelope:    {envelope}");
    Ok(())
}

fn cmd_key_inspect(config: &VspaceConfig, envelope: &str) -> Result<()> {
    let session = resume_session(config)?;
    let unwrapped = session
        .unwrap_vaultspace_key(envelope.trim())
        .context("unwrapping envelope")?;
    println!("format:       {:?}", unwrapped.format);
    println!("tag rejected: {}", unwrapped.tag_rejected);
    println!("fingerprint:  {}", fingerprint(unwrapped.key.export()));
    Ok(())
}

// ── `vspace change-password` ──────────────────────────────────────────────────

async fn cmd_change_password(config: &VspaceConfig, token: Option<SecretString>) -> Result<()> {
    let mut session = open_session(config);
    session.resume().context("reading key store")?;

    let request = PasswordChangeRequest {
        current_password: prompt("Current password: ")?,
        new_password: prompt("New password: ")?,
        confirmation: prompt("Confirm new password: ")?,
    };

    let coordinator = RotationCoordinator::new(
        http_backend(config, token)?,
        PasswordPolicy::from(&config.policy),
    );

    let pb = make_spinner("change-password");
    let mut rx = coordinator.subscribe();
    let pb_watch = pb.clone();
    let watcher = tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let state = *rx.borrow_and_update();
            pb_watch.set_message(state_message(state));
        }
    });

    let result = coordinator.change_password(&mut session, request).await;
    watcher.abort();
    pb.finish_and_clear();

    let report = result.context("changing password")?;
    println!(
        "password changed: {} VaultSpace keys re-wrapped ({} signed, {} legacy)",
        report.rewrapped, report.signed_inputs, report.legacy_inputs
    );
    if !report.session_persisted {
        println!("warning: new master secret was not stored; run `vspace unlock` again");
    }
    Ok(())
}

fn state_message(state: RotationState) -> &'static str {
    match state {
        RotationState::Idle => "idle",
        RotationState::Authenticating => "deriving keys",
        RotationState::FetchingKeys => "fetching wrapped keys",
        RotationState::Reencrypting => "re-wrapping keys",
        RotationState::Submitting => "submitting",
        RotationState::Done => "done",
        RotationState::Failed => "failed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use vspace_core::config::KeyStoreBackend;

    #[test]
    fn test_token_is_redacted_in_debug() {
        let cli = Cli::try_parse_from(["vspace", "--token", "at-secret-123", "status"]).unwrap();

        assert_eq!(cli.token.as_ref().unwrap().expose_secret(), "at-secret-123");
        assert!(!format!("{cli:?}").contains("at-secret-123"));
    }

    #[test]
    fn test_legacy_folder_session_needs_no_unlock() {
        let mut config = VspaceConfig::default();
        config.keystore.backend = KeyStoreBackend::Memory;
        config.folders.key_source = FolderKeySource::Legacy;
        assert!(folder_session(&config).is_ok());

        config.folders.key_source = FolderKeySource::Account;
        assert!(folder_session(&config).is_err());
    }
}
