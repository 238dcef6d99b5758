//! Shuttler CLI
//!
//! `init` creates the configuration file and keyring, `start` runs the
//! relayer daemon, `version` and `keys` round out the surface. Exit code
//! 0 on success, 1 on configuration or fatal initialization errors.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use shuttler::config::{default_home, Config, APP_NAME, INTERNAL_KEY_NAME, VAULT_KEY_PREFIX};
use shuttler::error::RelayerError;
use shuttler::keyring::{generate_mnemonic, KeyType, Keyring, KeyringError};
use shuttler::logging::init_logging;
use shuttler::relayer::Relayer;

#[derive(Parser)]
#[command(name = APP_NAME, about = "Relays data between Bitcoin and the sidechain")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Initialize the configuration file and keyring
    Init {
        /// Home directory
        #[arg(long)]
        home: Option<PathBuf>,
        /// The network to use (mainnet, testnet, regtest, signet)
        #[arg(long, default_value = "mainnet")]
        network: String,
        /// Key derivation flavor (segwit or taproot)
        #[arg(long, default_value = "segwit")]
        key_type: String,
        /// Generate a new mnemonic instead of recovering an existing one
        #[arg(long)]
        generate: bool,
        /// Also create a local vault key and enable local signing
        #[arg(long)]
        local_vault: bool,
    },
    /// Run the relayer
    Start {
        /// Home directory
        #[arg(long)]
        home: Option<PathBuf>,
    },
    /// Print version information
    Version {
        /// Print the long form
        #[arg(long)]
        long: bool,
    },
    /// Key management
    Keys {
        /// Home directory
        #[arg(long)]
        home: Option<PathBuf>,
        #[command(subcommand)]
        command: KeysCommand,
    },
}

#[derive(Subcommand)]
enum KeysCommand {
    /// List keyring entries
    List,
    /// Show the address of a key
    Show { name: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> Result<(), RelayerError> {
    match command {
        Command::Init {
            home,
            network,
            key_type,
            generate,
            local_vault,
        } => init(home, &network, &key_type, generate, local_vault),
        Command::Start { home } => {
            let home = home.unwrap_or_else(default_home);
            let config = Config::load(&home)?;
            init_logging(&config.global.log_level)?;
            Relayer::new(config, home).run().await
        }
        Command::Version { long } => {
            if long {
                println!(
                    "{APP_NAME} {} ({})",
                    env!("CARGO_PKG_VERSION"),
                    env!("CARGO_PKG_DESCRIPTION")
                );
            } else {
                println!("{}", env!("CARGO_PKG_VERSION"));
            }
            Ok(())
        }
        Command::Keys { home, command } => keys(home, command),
    }
}

fn init(
    home: Option<PathBuf>,
    network: &str,
    key_type: &str,
    generate: bool,
    local_vault: bool,
) -> Result<(), RelayerError> {
    let home = home.unwrap_or_else(default_home);
    let key_type: KeyType = key_type.parse()?;

    let mut config = Config::default_for(network);
    let bitcoin_network = config.network()?;

    let mnemonic = if generate {
        generate_mnemonic()?.to_string()
    } else {
        prompt_mnemonic()?
    };

    let keyring = Keyring::open(&home);
    let key = keyring.create(INTERNAL_KEY_NAME, &mnemonic, key_type)?;
    let address = key.address(bitcoin_network);
    config.side.sender = address.to_string();

    println!("====================================================");
    println!("Mnemonic: {mnemonic}");
    println!("Address:  {address}");
    println!("====================================================");

    if local_vault {
        let vault_mnemonic = generate_mnemonic()?.to_string();
        let vault = keyring.create(&format!("{VAULT_KEY_PREFIX}1"), &vault_mnemonic, key_type)?;
        let vault_address = vault.address(bitcoin_network);
        config.bitcoin.vaults.push(vault_address.to_string());
        config.bitcoin.local_signing = true;

        println!("Vault 1 Mnemonic: {vault_mnemonic}");
        println!("Address:  {vault_address}");
        println!("====================================================");
    }

    config.save(&home)?;
    println!(
        "\nConfiguration file created at: {}",
        Config::file_path(&home).display()
    );
    Ok(())
}

fn keys(home: Option<PathBuf>, command: KeysCommand) -> Result<(), RelayerError> {
    let home = home.unwrap_or_else(default_home);
    let keyring = Keyring::open(&home);

    match command {
        KeysCommand::List => {
            for name in keyring.list()? {
                println!("{name}");
            }
        }
        KeysCommand::Show { name } => {
            let config = Config::load(&home)?;
            let key = keyring.load(&name)?;
            println!("{}", key.address(config.network()?));
        }
    }
    Ok(())
}

fn prompt_mnemonic() -> Result<String, RelayerError> {
    print!("Please input your mnemonic: ");
    io::stdout().flush().map_err(RelayerError::Io)?;

    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(RelayerError::Io)?;

    let mnemonic = line.trim().to_string();
    if mnemonic.is_empty() {
        return Err(KeyringError::Mnemonic("empty mnemonic".to_string()).into());
    }
    Ok(mnemonic)
}
