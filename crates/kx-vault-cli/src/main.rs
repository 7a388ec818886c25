use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use kx_store::{FileLocalStore, JsonFileRemoteStore, MemoryLocalStore, RemoteKeyStore};
use kx_vault::provision::provision_master_key;
use kx_vault::{Vault, VaultConfig, DEFAULT_IDENTITY_TYPE};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

mod paths;

use crate::paths::{config_path, local_store_path, remote_store_path, resolve_data_dir};

const MIN_PASSWORD_LEN: usize = 12;

#[derive(Parser, Debug)]
#[command(author, version, about = "Kylrix local vault tool", long_about = None)]
struct Cli {
    /// Data directory (defaults to the platform data dir)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    /// Account id; overrides `userId` from config.json
    #[arg(long, global = true)]
    user: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Provision a master key for the account
    Init,
    /// Show vault and unlock-factor status
    Status,
    /// Load or create the E2E identity and print its public key
    Identity {
        #[arg(long = "type", default_value = DEFAULT_IDENTITY_TYPE)]
        identity_type: String,
    },
    /// Encrypt text (argument or stdin) under the vault key
    Encrypt { text: Option<String> },
    /// Decrypt a vault ciphertext (argument or stdin)
    Decrypt { ciphertext: Option<String> },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let data = resolve_data_dir(cli.data_dir)?;
    std::fs::create_dir_all(&data)
        .with_context(|| format!("create data dir {}", data.display()))?;
    let config = load_config(&data, cli.user)?;
    let remote = Arc::new(JsonFileRemoteStore::open(remote_store_path(&data)));

    match cli.command {
        Commands::Init => init_command(&config, remote.as_ref()).await,
        Commands::Status => status_command(&data, config, remote).await,
        Commands::Identity { identity_type } => {
            let vault = unlocked_vault(&data, config, remote).await?;
            let user_id = vault.config().user_id.clone();
            let public = vault.ensure_identity(&user_id, &identity_type).await?;
            println!("{}", public.to_b64());
            println!("fingerprint: {}", public.fingerprint());
            Ok(())
        }
        Commands::Encrypt { text } => {
            let vault = unlocked_vault(&data, config, remote).await?;
            let plaintext = Zeroizing::new(read_input(text)?);
            println!("{}", vault.encrypt(&plaintext)?);
            Ok(())
        }
        Commands::Decrypt { ciphertext } => {
            let vault = unlocked_vault(&data, config, remote).await?;
            let ciphertext = read_input(ciphertext)?;
            println!("{}", vault.decrypt(ciphertext.trim())?);
            Ok(())
        }
    }
}

fn load_config(data: &Path, user: Option<String>) -> Result<VaultConfig> {
    let path = config_path(data);
    let mut config = if path.exists() {
        debug!(path = %path.display(), "loading config");
        VaultConfig::load(&path)?
    } else {
        VaultConfig::default()
    };
    if let Some(user) = user {
        config.user_id = user;
    }
    if config.user_id.is_empty() {
        return Err(anyhow!(
            "no account selected; pass --user or set userId in {}",
            path.display()
        ));
    }
    config.validate()?;
    Ok(config)
}

async fn init_command(config: &VaultConfig, remote: &dyn RemoteKeyStore) -> Result<()> {
    if remote.get_master_key_record(&config.user_id).await?.is_some() {
        return Err(anyhow!("account {} already has a master key", config.user_id));
    }
    let password = prompt_password_twice("Create master password: ")?;
    let id = provision_master_key(remote, &config.user_id, &password, &config.kdf).await?;
    println!("Master key provisioned for {} (record {id})", config.user_id);
    Ok(())
}

async fn status_command(
    data: &Path,
    config: VaultConfig,
    remote: Arc<JsonFileRemoteStore>,
) -> Result<()> {
    let master_key = remote.get_master_key_record(&config.user_id).await?.is_some();
    let vault = open_vault(data, config, remote)?;
    let report = serde_json::json!({
        "userId": vault.config().user_id,
        "dataDir": data.display().to_string(),
        "masterKey": master_key,
        "passkey": vault.has_passkey().await?,
        "pinSet": vault.is_pin_set(),
        "vault": vault.status(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// The session tier is process memory: PIN quick unlock never survives
/// between CLI invocations.
fn open_vault(data: &Path, config: VaultConfig, remote: Arc<JsonFileRemoteStore>) -> Result<Vault> {
    Ok(Vault::new(
        config,
        remote,
        Arc::new(FileLocalStore::open(local_store_path(data))),
        Arc::new(MemoryLocalStore::new()),
    )?)
}

async fn unlocked_vault(
    data: &Path,
    config: VaultConfig,
    remote: Arc<JsonFileRemoteStore>,
) -> Result<Vault> {
    let vault = open_vault(data, config, remote)?;
    let password = prompt_password_once("Master password: ")?;
    vault.unlock_with_password(&password).await?;
    info!(user_id = %vault.config().user_id, "vault unlocked");
    Ok(vault)
}

fn read_input(arg: Option<String>) -> Result<String> {
    match arg {
        Some(text) => Ok(text),
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("read stdin")?;
            Ok(buf.trim_end_matches(['\r', '\n']).to_string())
        }
    }
}

fn prompt_password_once(prompt: &str) -> Result<Zeroizing<String>> {
    if let Ok(pw) = std::env::var("KX_VAULT_PASSWORD") {
        if !pw.is_empty() {
            return Ok(Zeroizing::new(pw));
        }
    }
    let pw = rpassword::prompt_password(prompt).map_err(|e| anyhow!("password prompt: {e}"))?;
    Ok(Zeroizing::new(pw))
}

fn prompt_password_twice(prompt: &str) -> Result<Zeroizing<String>> {
    if let Ok(pw) = std::env::var("KX_VAULT_PASSWORD") {
        if !pw.is_empty() {
            if let Ok(confirm) = std::env::var("KX_VAULT_PASSWORD_CONFIRM") {
                if confirm != pw {
                    return Err(anyhow!("password confirmation mismatch"));
                }
            }
            return check_new_password(Zeroizing::new(pw));
        }
    }
    let first = prompt_password_once(prompt)?;
    let second = Zeroizing::new(
        rpassword::prompt_password("Confirm password: ")
            .map_err(|e| anyhow!("password prompt: {e}"))?,
    );
    if *first != *second {
        return Err(anyhow!("passwords do not match"));
    }
    check_new_password(first)
}

fn check_new_password(pw: Zeroizing<String>) -> Result<Zeroizing<String>> {
    if pw.chars().count() < MIN_PASSWORD_LEN {
        return Err(anyhow!(
            "password too short; minimum {MIN_PASSWORD_LEN} characters"
        ));
    }
    Ok(pw)
}
