//! capno_monitor: command-line monitor for the CapnoTrainer dongle.
//!
//! Lists serial ports, runs a live session printing one line per sample, or
//! replays a captured byte stream through the same decoding pipeline.

use std::fs::File;
use std::path::PathBuf;
use std::process::ExitCode;

use capnolink::{
    find_ports_by_usb_id, list_serial_ports, logging, Dispatcher, DongleConfig, DongleError, Link, LinkId,
    Sample,
};
use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "capno_monitor", version, about = "CapnoTrainer dongle monitor")]
struct Cli {
    /// Mirror engine logs to a timestamped file in this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List serial ports
    List {
        /// Only ports with this USB vendor id (hex with 0x prefix, or decimal)
        #[arg(long, value_parser = parse_u16, requires = "pid")]
        vid: Option<u16>,
        /// Only ports with this USB product id
        #[arg(long, value_parser = parse_u16, requires = "vid")]
        pid: Option<u16>,
    },
    /// Connect and print samples until the dongle goes away
    Run {
        #[arg(long)]
        port_a: Option<String>,
        #[arg(long)]
        port_b: Option<String>,
        /// TOML config file; --port-a/--port-b/--baud override it
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        baud: Option<u32>,
    },
    /// Decode a captured byte stream
    Replay {
        #[arg(long)]
        file: PathBuf,
    },
}

fn parse_u16(s: &str) -> Result<u16, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid id '{}': {}", s, e))
}

fn print_sample(s: &Sample<'_>) {
    let preview: Vec<String> = s.values.iter().take(6).map(|v| format!("{:.2}", v)).collect();
    let more = if s.values.len() > 6 { ", ..." } else { "" };
    println!(
        "{} {:<16} #{:<3} {:<16} seq={:<8} n={:<3} [{}{}]",
        s.link,
        s.device_type.to_string(),
        s.handle,
        format!("{:?}", s.data_type),
        s.sequence,
        s.values.len(),
        preview.join(", "),
        more
    );
}

fn print_diagnostics(dispatcher: &Dispatcher) {
    match serde_json::to_string_pretty(&dispatcher.diagnostics()) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to serialise diagnostics: {}", e),
    }
}

fn list(vid: Option<u16>, pid: Option<u16>) -> capnolink::Result<()> {
    let ports = match (vid, pid) {
        (Some(vid), Some(pid)) => find_ports_by_usb_id(vid, pid)?,
        _ => list_serial_ports()?,
    };
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for p in ports {
        let ids = match (p.vid, p.pid) {
            (Some(vid), Some(pid)) => format!(" {:04x}:{:04x}", vid, pid),
            _ => String::new(),
        };
        println!(
            "{} ({}{}) {}",
            p.port_name,
            p.port_type,
            ids,
            p.product.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

fn run(
    port_a: Option<String>,
    port_b: Option<String>,
    config: Option<PathBuf>,
    baud: Option<u32>,
) -> capnolink::Result<()> {
    let mut config = match (config, port_a) {
        (Some(path), port_a) => {
            let mut config = DongleConfig::load(&path)?;
            if let Some(port_a) = port_a {
                config.port_a = port_a;
            }
            config
        }
        (None, Some(port_a)) => DongleConfig::new(port_a, None),
        (None, None) => return Err(DongleError::config("either --port-a or --config is required")),
    };
    if port_b.is_some() {
        config.port_b = port_b;
    }
    if let Some(baud) = baud {
        config.link.baud_rate = baud;
    }
    config.auto_start = false;

    let dispatcher = Dispatcher::new(config, print_sample)?;
    dispatcher.initialize()?;
    print_diagnostics(&dispatcher);
    Ok(())
}

fn replay(file: PathBuf) -> capnolink::Result<()> {
    let name = file.display().to_string();
    let reader = File::open(&file)
        .map_err(|e| DongleError::transport(name.as_str(), format!("Failed to open capture: {}", e)))?;

    let dispatcher = Dispatcher::new(DongleConfig::new(name.as_str(), None), print_sample)?;
    let link = Link::from_parts(LinkId::A, name.as_str(), reader, std::io::sink());
    dispatcher.connect_links(link, None)?;
    dispatcher.wait();
    print_diagnostics(&dispatcher);
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Some(dir) = &cli.log_dir {
        if let Err(e) = logging::init_file_logging(dir) {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    }

    let result = match cli.command {
        Command::List { vid, pid } => list(vid, pid),
        Command::Run {
            port_a,
            port_b,
            config,
            baud,
        } => run(port_a, port_b, config, baud),
        Command::Replay { file } => replay(file),
    };

    logging::stop_file_logging();
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_run_options() {
        let cli = Cli::parse_from([
            "capno_monitor",
            "run",
            "--port-a",
            "COM15",
            "--port-b",
            "COM16",
            "--baud",
            "921600",
        ]);
        match cli.command {
            Command::Run {
                port_a,
                port_b,
                baud,
                config,
            } => {
                assert_eq!(port_a.as_deref(), Some("COM15"));
                assert_eq!(port_b.as_deref(), Some("COM16"));
                assert_eq!(baud, Some(921_600));
                assert!(config.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_usb_ids_parse_hex_and_decimal() {
        assert_eq!(parse_u16("0x2FE3"), Ok(0x2FE3));
        assert_eq!(parse_u16("256"), Ok(256));
        assert!(parse_u16("0xZZ").is_err());
    }

    #[test]
    fn test_vid_requires_pid() {
        assert!(Cli::try_parse_from(["capno_monitor", "list", "--vid", "0x2FE3"]).is_err());
    }

    #[test]
    fn test_run_without_port_is_config_error() {
        let err = run(None, None, None, None).unwrap_err();
        assert!(matches!(err, DongleError::Config { .. }));
    }
}
