//! Command-line access to LiFePO4wered/Pi registers.
//!
//! Reads or writes raw register bytes, mostly useful for bring-up and
//! debugging. Values are neither scaled nor interpreted.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::filter::LevelFilter;

use lifepo4wered_access::config::{self, AccessConfig};
use lifepo4wered_access::tracing::{self, prelude::*};
use lifepo4wered_access::{Lifepo4wered, MAX_PAYLOAD};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Cli {
    /// Configuration file [default: /etc/lifepo4wered.toml if present]
    #[arg(short, long, value_name = "FILE")]
    config: Option<std::path::PathBuf>,

    /// I2C bus number, overriding the configuration
    #[arg(short, long, value_parser = parse_u8)]
    bus: Option<u8>,

    /// 7-bit peripheral address, overriding the configuration
    #[arg(short, long, value_parser = parse_address)]
    address: Option<u16>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Read COUNT bytes starting at REGISTER and print them in hex
    Read {
        #[arg(value_parser = parse_u8)]
        register: u8,
        #[arg(value_parser = parse_u8)]
        count: u8,
    },
    /// Write BYTES starting at REGISTER
    Write {
        #[arg(value_parser = parse_u8)]
        register: u8,
        #[arg(value_parser = parse_u8)]
        bytes: Vec<u8>,
    },
}

fn parse_u8(text: &str) -> std::result::Result<u8, String> {
    config::parse_number(text).ok_or_else(|| format!("`{text}` is not a byte value"))
}

fn parse_address(text: &str) -> std::result::Result<u16, String> {
    config::parse_number::<u16>(text)
        .filter(|addr| *addr <= 0x7F)
        .ok_or_else(|| format!("`{text}` is not a 7-bit address"))
}

fn load_config(cli: &Cli) -> Result<AccessConfig> {
    let mut config = match &cli.config {
        Some(path) => AccessConfig::load_from(path)?,
        None => AccessConfig::load()?,
    };
    if let Some(bus) = cli.bus {
        config.bus = bus;
    }
    if let Some(address) = cli.address {
        config.address = address;
    }
    Ok(config)
}

fn format_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("0x{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn main() -> Result<()> {
    tracing::init_journald_or_stderr(LevelFilter::WARN);

    let cli = Cli::parse();
    let config = load_config(&cli).context("loading configuration")?;
    debug!("Using bus {} address 0x{:02x}", config.bus, config.address);

    let access = Lifepo4wered::linux(config);
    match cli.command {
        Command::Read { register, count } => {
            let mut buffer = vec![0u8; usize::from(count)];
            access
                .read(register, &mut buffer)
                .with_context(|| format!("reading register 0x{register:02X}"))?;
            println!("{}", format_hex(&buffer));
        }
        Command::Write { register, bytes } => {
            if bytes.len() > MAX_PAYLOAD {
                return Err(anyhow!("at most {MAX_PAYLOAD} bytes can be written at once"));
            }
            access
                .write(register, &bytes)
                .with_context(|| format!("writing register 0x{register:02X}"))?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_values() {
        assert_eq!(parse_u8("0x1F"), Ok(0x1F));
        assert_eq!(parse_u8("200"), Ok(200));
        assert!(parse_u8("300").is_err());
        assert_eq!(parse_address("0x43"), Ok(0x43));
        assert!(parse_address("0x80").is_err());
    }

    #[test]
    fn test_command_line() {
        let cli = Cli::try_parse_from(["lifepo4wered-access", "-b", "3", "write", "0x10", "1", "0xff"]).unwrap();
        assert_eq!(cli.bus, Some(3));
        match cli.command {
            Command::Write { register, bytes } => {
                assert_eq!(register, 0x10);
                assert_eq!(bytes, vec![1, 0xFF]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_format_hex() {
        assert_eq!(format_hex(&[0x12, 0x34]), "0x12 0x34");
        assert_eq!(format_hex(&[]), "");
    }
}
