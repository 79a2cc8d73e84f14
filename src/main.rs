//! CoreSync - encrypted, deduplicating directory synchronization.
//!
//! Keeps a plaintext directory and an encrypted vault directory in step, so
//! the vault can live on shared or untrusted storage.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use coresync::config::LOG_DIRECTORY_NAME;
use coresync::logging::{error, info, init_tracing};
use coresync::vault::VaultContext;
use coresync::{InitOptions, ProtectorKind, Vault};
use secrecy::{ExposeSecret, SecretString};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "coresync")]
#[command(author, version, about, long_about = None)]
#[command(
    about = "Encrypted, deduplicating directory synchronization",
    long_about = "Synchronizes a working directory with an encrypted, content-addressed vault directory. Without a command, runs 'sync'."
)]
struct Cli {
    /// Working directory (default: current directory)
    #[arg(short = 'd', long = "directory", global = true)]
    directory: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize synchronization for the working directory
    Init {
        /// External vault directory (absolute path)
        #[arg(long = "vault-dir")]
        vault_dir: Option<PathBuf>,

        /// Keep the wrapped passphrase in the platform keyring
        #[arg(long)]
        keyring: bool,
    },

    /// Change the configuration
    Config {
        /// Set the vault directory (absolute path)
        #[arg(long = "vault-dir")]
        vault_dir: Option<PathBuf>,

        #[command(subcommand)]
        action: Option<ConfigAction>,
    },

    /// Manage eligibility filters
    Filter {
        #[command(subcommand)]
        action: FilterAction,
    },

    /// Synchronize the working directory with the vault
    Sync {
        /// Only synchronize this subdirectory
        #[arg(long)]
        subdirectory: Option<PathBuf>,
    },

    /// Remove all synchronization state from the working directory
    Detach {
        /// Skip confirmation prompt
        #[arg(long)]
        yes: bool,
    },

    /// Detach and initialize again
    Reset {
        /// External vault directory (absolute path)
        #[arg(long = "vault-dir")]
        vault_dir: Option<PathBuf>,

        /// Keep the wrapped passphrase in the platform keyring
        #[arg(long)]
        keyring: bool,

        /// Skip confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Change the master passphrase
    Pw,
}

#[derive(Subcommand)]
enum FilterAction {
    /// List filters
    Ls,

    /// Add filter patterns (globs; prefix with ! to require a match)
    Add {
        #[arg(required = true)]
        patterns: Vec<String>,
    },

    /// Remove filters by number; without numbers, remove all
    Rm {
        numbers: Vec<usize>,

        /// Skip confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let directory = cli.directory.clone().unwrap_or_else(|| PathBuf::from("."));
    let log_directory = Vault::resolve_working_directory(&directory)
        .ok()
        .map(|work| VaultContext::base_directory_of(&work))
        .filter(|base| base.is_dir())
        .map(|base| base.join(LOG_DIRECTORY_NAME));
    let _guard = init_tracing(log_directory.as_deref());

    // Handled errors are logged; the process still exits normally
    if let Err(e) = run(cli, &directory) {
        error!("{:#}", e);
    }
}

fn run(cli: Cli, directory: &Path) -> anyhow::Result<()> {
    match cli.command {
        Some(Commands::Init { vault_dir, keyring }) => cmd_init(directory, vault_dir, keyring),
        Some(Commands::Config { vault_dir, action }) => cmd_config(directory, vault_dir, action),
        Some(Commands::Filter { action }) => cmd_filter(directory, action),
        Some(Commands::Sync { subdirectory }) => cmd_sync(directory, subdirectory.as_deref()),
        None => cmd_sync(directory, None),
        Some(Commands::Detach { yes }) => cmd_detach(directory, yes),
        Some(Commands::Reset {
            vault_dir,
            keyring,
            yes,
        }) => cmd_reset(directory, vault_dir, keyring, yes),
    }
}

fn prompt_password(prompt: &str) -> anyhow::Result<SecretString> {
    let password = rpassword::prompt_password(prompt).context("Could not read passphrase")?;
    Ok(SecretString::from(password))
}

fn prompt_new_password() -> anyhow::Result<SecretString> {
    let password = prompt_password("Enter passphrase: ")?;
    let confirm = prompt_password("Confirm passphrase: ")?;

    if password.expose_secret() != confirm.expose_secret() {
        bail!("Passphrases do not match");
    }
    if password.expose_secret().is_empty() {
        bail!("Passphrase must not be empty");
    }
    Ok(password)
}

fn confirm(question: &str) -> anyhow::Result<bool> {
    eprint!("{} [y/N] ", question);
    io::stderr().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("y"))
}

fn init_options(vault_dir: Option<PathBuf>, keyring: bool) -> InitOptions {
    InitOptions {
        vault_directory: vault_dir,
        protector: if keyring {
            ProtectorKind::Keyring
        } else {
            ProtectorKind::File
        },
        ..Default::default()
    }
}

/// Open the vault, offering to initialize it when there is no configuration.
fn open_or_offer_init(directory: &Path) -> anyhow::Result<Option<Vault>> {
    let work = Vault::resolve_working_directory(directory)?;
    if Vault::is_initialized(&work) {
        return Ok(Some(Vault::open(&work)?));
    }

    if confirm("Configuration file does not exist. Initialize the working directory?")? {
        cmd_init(&work, None, false)?;
    }
    Ok(None)
}

fn cmd_init(directory: &Path, vault_dir: Option<PathBuf>, keyring: bool) -> anyhow::Result<()> {
    let work = Vault::resolve_working_directory(directory)?;
    if Vault::is_initialized(&work) {
        bail!(coresync::Error::AlreadyInitialized(work));
    }

    let passphrase = prompt_new_password()?;
    let vault = Vault::initialize(&work, passphrase, init_options(vault_dir, keyring))?;

    println!("Working directory: {}", vault.working_directory().display());
    println!("Vault directory:   {}", vault.context().layout().root().display());
    Ok(())
}

fn cmd_config(
    directory: &Path,
    vault_dir: Option<PathBuf>,
    action: Option<ConfigAction>,
) -> anyhow::Result<()> {
    let Some(mut vault) = open_or_offer_init(directory)? else {
        return Ok(());
    };

    if vault_dir.is_none() && action.is_none() {
        let config = vault.configuration();
        println!("Vault directory: {}", vault.context().layout().root().display());
        println!("Protector:       {}", config.protector_kind());
        println!("Filters:         {}", config.filters().len());
        return Ok(());
    }

    if let Some(dir) = vault_dir {
        vault.set_vault_directory(&dir)?;
    }
    if let Some(ConfigAction::Pw) = action {
        let passphrase = prompt_new_password()?;
        vault.set_passphrase(passphrase)?;
    }
    Ok(())
}

fn cmd_filter(directory: &Path, action: FilterAction) -> anyhow::Result<()> {
    let Some(mut vault) = open_or_offer_init(directory)? else {
        return Ok(());
    };

    match action {
        FilterAction::Ls => {
            if vault.filters().is_empty() {
                println!("No filters configured");
            }
            for (i, pattern) in vault.filters().iter().enumerate() {
                println!("{:>3}  {}", i + 1, pattern);
            }
        }
        FilterAction::Add { patterns } => {
            let added = vault.add_filters(&patterns)?;
            info!("Added {} filter(s)", added);
        }
        FilterAction::Rm { numbers, yes } => {
            if numbers.is_empty() && !yes && !confirm("Remove all filters?")? {
                println!("Aborted");
                return Ok(());
            }
            let removed = vault.remove_filters(&numbers)?;
            info!("Removed {} filter(s)", removed);
        }
    }
    Ok(())
}

fn cmd_sync(directory: &Path, subdirectory: Option<&Path>) -> anyhow::Result<()> {
    let Some(mut vault) = open_or_offer_init(directory)? else {
        return Ok(());
    };
    vault.synchronize(subdirectory)?;
    Ok(())
}

fn cmd_detach(directory: &Path, yes: bool) -> anyhow::Result<()> {
    if !yes && !confirm("This removes the configuration and the local vault state. Continue?")? {
        println!("Aborted");
        return Ok(());
    }
    Vault::detach(directory)?;
    Ok(())
}

fn cmd_reset(
    directory: &Path,
    vault_dir: Option<PathBuf>,
    keyring: bool,
    yes: bool,
) -> anyhow::Result<()> {
    if !yes && !confirm("This removes the configuration and initializes again. Continue?")? {
        println!("Aborted");
        return Ok(());
    }
    let passphrase = prompt_new_password()?;
    let vault = Vault::reset(directory, passphrase, init_options(vault_dir, keyring))?;
    println!("Vault directory: {}", vault.context().layout().root().display());
    Ok(())
}
