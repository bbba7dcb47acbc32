use anyhow::Result;
use clap::{Parser, Subcommand};
use modpanel::config::{Settings, config_path};
use modpanel::link::MacAddr;
use modpanel::registers::REGISTERS;
use modpanel::service::{RunMode, Service};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "modpanel")]
#[command(about = "Sample capture and register sync for the FPGA audio modulator")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture samples and broadcast registers until Ctrl-C
    ///
    /// Send SIGHUP to re-read the config file's register table and spectrum settings.
    Service {
        /// Config file (defaults to ~/.config/modpanel/config.toml)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Network interface, overriding the config file
        #[arg(long)]
        interface: Option<String>,

        /// Device MAC address, overriding the config file
        #[arg(long)]
        peer: Option<MacAddr>,

        /// Generate a test tone instead of talking to the device
        #[arg(long)]
        simulate: bool,
    },

    /// Show the register map and power-on values
    Registers {
        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Print the effective configuration
    Config {
        /// Config file (defaults to ~/.config/modpanel/config.toml)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum OutputFormat {
    Text,
    Json,
}

fn print_registers(format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            println!("{:<6} {:<14} {:<12} Description", "Index", "Name", "Default");
            println!("{}", "-".repeat(80));
            for (index, def) in REGISTERS.iter().enumerate() {
                println!(
                    "{:<6} {:<14} {:<12} {}",
                    index,
                    def.name,
                    format!("0x{:08X}", def.default),
                    def.description
                );
            }
        }
        OutputFormat::Json => {
            let entries: Vec<_> = REGISTERS
                .iter()
                .enumerate()
                .map(|(index, def)| {
                    serde_json::json!({
                        "index": index,
                        "name": def.name,
                        "default": def.default,
                        "description": def.description,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Service {
            config,
            interface,
            peer,
            simulate,
        } => {
            let mut settings = Settings::load(config.as_deref())?;
            if let Some(interface) = interface {
                settings.interface = interface;
            }
            if let Some(peer) = peer {
                settings.peer_mac = peer;
            }

            let mode = if simulate {
                RunMode::Simulate
            } else {
                RunMode::Device
            };

            log::info!("Starting modpanel service");
            log::info!("Interface: {}", settings.interface);
            log::info!("Peer: {}", settings.peer_mac);

            Service::new(settings)?
                .with_config_path(config)
                .run(mode)
                .await?;
        }

        Commands::Registers { format } => print_registers(format)?,

        Commands::Config { config } => {
            let settings = Settings::load(config.as_deref())?;
            match config.or_else(config_path) {
                Some(path) => println!("# {}", path.display()),
                None => println!("# no config directory available"),
            }
            print!("{}", settings.to_toml()?);
        }
    }

    Ok(())
}
