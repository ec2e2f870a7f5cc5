//! Vault TSS CLI
//!
//! Local simulation of the threshold session driver. Every command runs the
//! device orchestrator against in-process co-signers over an in-memory
//! relay with the simulated engines. Vaults persist between runs in an
//! encrypted store directory, one sub-directory per party.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use rand::RngCore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;
use vault_tss_core::{
    DriverConfig, Engines, FileVaultStore, KeyType, LocalCoSigner, LocalVault, MemoryRelay,
    ServiceConfig, SigningResult, TssParty, VaultStore, keygen_threshold, reshare_threshold,
    storage::derive_key_from_password,
};

const DEVICE: &str = "device";
const SERVER: &str = "server";
const VERIFIER_PARTIES: [&str; 2] = ["verifier", "plugin"];
const SALT_FILE: &str = "salt";

#[derive(Parser)]
#[command(name = "vault-tss")]
#[command(about = "Threshold session driver (local simulation)", version)]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value_t = Format::Human)]
    format: Format,

    /// Replay a fixed engine seed instead of fresh randomness
    #[arg(long, global = true)]
    seed: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Human,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a vault shared by the device and the fast-vault server
    Keygen {
        /// Store directory
        #[arg(short, long, default_value = "vaults")]
        dir: PathBuf,

        /// Vault name
        #[arg(short, long)]
        name: String,

        /// Password protecting the store and the co-signer's copy
        #[arg(short, long)]
        password: String,

        /// Owner email forwarded to the co-signer
        #[arg(long, default_value = "")]
        email: String,
    },

    /// Sign hex digests with a stored vault
    Keysign {
        /// Store directory
        #[arg(short, long, default_value = "vaults")]
        dir: PathBuf,

        /// ECDSA public key of the vault
        #[arg(long)]
        vault: String,

        /// 32-byte hex digest; repeat for a batch
        #[arg(short, long = "message", required = true)]
        messages: Vec<String>,

        /// Derivation path, e.g. m/44'/60'/0'/0/0
        #[arg(long, default_value = "")]
        path: String,

        /// Sign with the EdDSA key instead of ECDSA
        #[arg(long)]
        eddsa: bool,

        /// Store and vault password
        #[arg(short, long)]
        password: String,
    },

    /// Reshare a stored vault onto the server and the verifier's parties
    Reshare {
        /// Store directory
        #[arg(short, long, default_value = "vaults")]
        dir: PathBuf,

        /// ECDSA public key of the vault
        #[arg(long)]
        vault: String,

        /// Store and vault password
        #[arg(short, long)]
        password: String,

        /// Plugin installed by the reshare
        #[arg(long)]
        plugin_id: Option<String>,

        /// Owner email forwarded to the co-signers
        #[arg(long, default_value = "")]
        email: String,
    },

    /// Show configuration and stored vaults
    Info {
        /// Store directory to list
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    FmtSubscriber::builder()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let format = cli.format;
    let simulation = Simulation::new(cli.seed);
    match cli.command {
        Commands::Keygen {
            dir,
            name,
            password,
            email,
        } => run_keygen(&simulation, &dir, &name, &password, &email, format).await,
        Commands::Keysign {
            dir,
            vault,
            messages,
            path,
            eddsa,
            password,
        } => {
            let key_type = if eddsa { KeyType::Eddsa } else { KeyType::Ecdsa };
            run_keysign(
                &simulation,
                &dir,
                &vault,
                &messages,
                &path,
                key_type,
                &password,
                format,
            )
            .await
        }
        Commands::Reshare {
            dir,
            vault,
            password,
            plugin_id,
            email,
        } => {
            run_reshare(
                &simulation,
                &dir,
                &vault,
                &password,
                plugin_id.as_deref(),
                &email,
                format,
            )
            .await
        }
        Commands::Info { dir } => show_info(dir.as_deref(), format).await,
    }
}

// ============ Simulation ============

/// Device plus in-process co-signers sharing one relay
struct Simulation {
    device: TssParty,
    server: Arc<LocalCoSigner>,
    verifier: Arc<LocalCoSigner>,
}

impl Simulation {
    fn new(seed: Option<u64>) -> Self {
        let relay = Arc::new(MemoryRelay::new());
        let engines = Arc::new(match seed {
            Some(seed) => Engines::simulated_seeded(seed),
            None => Engines::simulated(),
        });
        let config = DriverConfig::default();

        let server = Arc::new(LocalCoSigner::new(
            SERVER,
            relay.clone(),
            engines.clone(),
            config.clone(),
        ));
        let verifier = Arc::new(LocalCoSigner::with_parties(
            VERIFIER_PARTIES.iter().map(|p| p.to_string()).collect(),
            relay.clone(),
            engines.clone(),
            config.clone(),
        ));
        let device = TssParty::new(DEVICE, relay, engines, server.clone())
            .with_verifier(verifier.clone())
            .with_config(config);

        Self {
            device,
            server,
            verifier,
        }
    }

    /// Load the co-signers' copies of a vault from the store
    async fn restore(&self, dir: &Path, key: [u8; 32], vault_id: &str) -> Result<()> {
        for (cosigner, party) in self.cosigner_parties() {
            let store = party_store(dir, party, key)?;
            if store.exists(vault_id).await? {
                cosigner.insert_vault(party, store.load(vault_id).await?);
            }
        }
        Ok(())
    }

    /// Persist every co-signer vault
    async fn persist(&self, dir: &Path, key: [u8; 32]) -> Result<()> {
        for cosigner in [&self.server, &self.verifier] {
            cosigner.wait_idle().await?;
            for (party, vault) in cosigner.vaults() {
                party_store(dir, &party, key)?.store(&vault).await?;
            }
        }
        Ok(())
    }

    fn cosigner_parties(&self) -> Vec<(&LocalCoSigner, &'static str)> {
        let mut parties = vec![(self.server.as_ref(), SERVER)];
        parties.extend(VERIFIER_PARTIES.iter().map(|p| (self.verifier.as_ref(), *p)));
        parties
    }
}

// ============ Store ============

fn party_store(dir: &Path, party: &str, key: [u8; 32]) -> Result<FileVaultStore> {
    FileVaultStore::new(dir.join(party), key)
        .with_context(|| format!("failed to open store for {}", party))
}

/// Derive the store key, creating the salt on first use
async fn store_key(dir: &Path, password: &str) -> Result<[u8; 32]> {
    let salt_path = dir.join(SALT_FILE);
    let salt = if tokio::fs::try_exists(&salt_path).await? {
        let encoded = tokio::fs::read_to_string(&salt_path).await?;
        let bytes = hex::decode(encoded.trim()).context("corrupt salt file")?;
        <[u8; 32]>::try_from(bytes.as_slice()).context("salt must be 32 bytes")?
    } else {
        let mut salt = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut salt);
        tokio::fs::create_dir_all(dir).await?;
        tokio::fs::write(&salt_path, hex::encode(salt)).await?;
        salt
    };
    Ok(derive_key_from_password(password, &salt)?)
}

async fn load_device_vault(dir: &Path, key: [u8; 32], vault_id: &str) -> Result<LocalVault> {
    let store = party_store(dir, DEVICE, key)?;
    if !store.exists(vault_id).await? {
        bail!("no vault {} in {}", vault_id, dir.display());
    }
    store
        .load(vault_id)
        .await
        .context("failed to open vault (wrong password?)")
}

// ============ Commands ============

async fn run_keygen(
    simulation: &Simulation,
    dir: &Path,
    name: &str,
    password: &str,
    email: &str,
    format: Format,
) -> Result<()> {
    let key = store_key(dir, password).await?;

    info!(name = %name, "Running keygen simulation");
    let vault = simulation.device.keygen(name, password, email).await?;

    party_store(dir, DEVICE, key)?.store(&vault).await?;
    simulation.persist(dir, key).await?;

    print_vault("Keygen completed", &vault, format)
}

#[allow(clippy::too_many_arguments)]
async fn run_keysign(
    simulation: &Simulation,
    dir: &Path,
    vault_id: &str,
    messages: &[String],
    path: &str,
    key_type: KeyType,
    password: &str,
    format: Format,
) -> Result<()> {
    let key = store_key(dir, password).await?;
    let vault = load_device_vault(dir, key, vault_id).await?;
    simulation.restore(dir, key, vault_id).await?;

    info!(messages = messages.len(), key_type = %key_type, "Running keysign simulation");
    let results = simulation
        .device
        .keysign(&vault, messages, path, key_type, password)
        .await?;
    simulation.server.wait_idle().await?;

    print_signatures(messages, &results, format)
}

async fn run_reshare(
    simulation: &Simulation,
    dir: &Path,
    vault_id: &str,
    password: &str,
    plugin_id: Option<&str>,
    email: &str,
    format: Format,
) -> Result<()> {
    let key = store_key(dir, password).await?;
    let vault = load_device_vault(dir, key, vault_id).await?;
    simulation.restore(dir, key, vault_id).await?;

    info!(signers = ?vault.signers, "Running reshare simulation");
    let reshared = simulation
        .device
        .reshare(&vault, plugin_id, password, email)
        .await?;

    party_store(dir, DEVICE, key)?.store(&reshared).await?;
    simulation.persist(dir, key).await?;

    print_vault("Reshare completed", &reshared, format)
}

async fn show_info(dir: Option<&Path>, format: Format) -> Result<()> {
    let service = ServiceConfig::from_env();
    let driver = DriverConfig::default();
    let vaults = match dir {
        Some(dir) if dir.join(DEVICE).exists() => {
            // Listing needs no key; ids are file names
            FileVaultStore::new(dir.join(DEVICE), [0u8; 32])?.list().await?
        }
        _ => Vec::new(),
    };

    if format == Format::Json {
        let output = serde_json::json!({
            "version": vault_tss_core::VERSION,
            "relay_url": service.relay_url,
            "fast_vault_url": service.fast_vault_url,
            "verifier_url": service.verifier_url,
            "protocol_timeout_secs": driver.protocol_timeout.as_secs(),
            "keygen_threshold": keygen_threshold(2),
            "reshare_threshold": reshare_threshold(4),
            "vaults": vaults,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("Vault TSS v{}", vault_tss_core::VERSION);
    println!();
    println!("Services:");
    println!("  Relay:      {}", service.relay_url);
    println!("  Fast vault: {}", service.fast_vault_url);
    println!("  Verifier:   {}", service.verifier_url);
    println!();
    println!("Driver:");
    println!("  Protocol timeout: {}s", driver.protocol_timeout.as_secs());
    println!("  Poll interval:    {}ms", driver.poll_interval.as_millis());
    println!();
    println!("Thresholds:");
    println!("  Keygen (2 parties):  {}", keygen_threshold(2));
    println!("  Reshare (4 parties): {}", reshare_threshold(4));
    if !vaults.is_empty() {
        println!();
        println!("Stored vaults:");
        for id in &vaults {
            println!("  - {}", id);
        }
    }
    Ok(())
}

// ============ Output ============

fn print_vault(title: &str, vault: &LocalVault, format: Format) -> Result<()> {
    if format == Format::Json {
        let output = serde_json::json!({
            "name": vault.name,
            "public_key_ecdsa": vault.public_key_ecdsa,
            "public_key_eddsa": vault.public_key_eddsa,
            "hex_chain_code": vault.hex_chain_code,
            "signers": vault.signers,
            "reshare_prefix": vault.reshare_prefix,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("{}\n", title);
    println!("Name:          {}", vault.name);
    println!("ECDSA key:     {}", vault.public_key_ecdsa);
    println!("EdDSA key:     {}", vault.public_key_eddsa);
    println!("Chain code:    {}", vault.hex_chain_code);
    println!("Signers:       {}", vault.signers.join(", "));
    if !vault.reshare_prefix.is_empty() {
        println!("Reshare:       {}", vault.reshare_prefix);
    }
    Ok(())
}

fn print_signatures(messages: &[String], results: &[SigningResult], format: Format) -> Result<()> {
    if format == Format::Json {
        println!("{}", serde_json::to_string_pretty(results)?);
        return Ok(());
    }

    println!("Signed {} message(s)\n", results.len());
    for (message, result) in messages.iter().zip(results) {
        println!("{}", message);
        println!("  r:   {}", result.r);
        println!("  s:   {}", result.s);
        println!("  v:   {}", result.recovery_id);
        println!("  der: {}", result.der_signature);
    }
    Ok(())
}
