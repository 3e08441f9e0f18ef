//! flightrecorder CLI - talk to handheld flight recorder instruments.
//!
//! ## Features
//!
//! - Query device identity and track memory
//! - Reflash instrument firmware from vendor images
//! - List available serial ports
//! - Shell completion generation
//! - Environment variable support

use std::io::{self, BufRead, Write as _};
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{Shell, generate};
use console::style;
use env_logger::Env;
use flightrecorder::device::fifty20::Fifty20;
use flightrecorder::device::flymaster::Flymaster;
use flightrecorder::device::sixty15::Sixty15;
use flightrecorder::device::{Instrument, TrackSummary};
use flightrecorder::firmware::{self, FirmwareImage, FirmwareModel};
use flightrecorder::flash::{FlashProfile, FlashProgrammer};
use flightrecorder::transport::SerialTransport;
use indicatif::{ProgressBar, ProgressStyle};
use log::debug;

/// flightrecorder - talk to Flytec, Brauniger and Flymaster instruments.
///
/// Environment variables:
///   FLIGHTRECORDER_PORT     - Default serial port
///   FLIGHTRECORDER_DEVICE   - Default device family (fifty20, sixty15, flymaster)
#[derive(Parser)]
#[command(name = "flightrecorder")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Serial port to use (e.g. /dev/ttyUSB0, COM3).
    #[arg(short, long, global = true, env = "FLIGHTRECORDER_PORT")]
    port: Option<String>,

    /// Device family connected to the port.
    #[arg(
        short,
        long,
        global = true,
        default_value = "fifty20",
        env = "FLIGHTRECORDER_DEVICE"
    )]
    device: Device,

    /// Baud rate for the initial connection.
    #[arg(short, long, global = true, default_value = "57600")]
    baud: u32,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Supported device families.
#[derive(Clone, Copy, Debug, ValueEnum)]
enum Device {
    /// Flytec 5020/5030/6020/6030, Brauniger Compeo/Competino (default).
    Fifty20,
    /// Flytec 6015, Brauniger IQ-Basic.
    Sixty15,
    /// Flymaster B1/F1.
    Flymaster,
}

/// Firmware target model selection.
#[derive(Clone, Copy, Debug, ValueEnum)]
enum Target {
    /// 5020 / Competino family.
    #[value(name = "5020")]
    T5020,
    /// 6015 / IQ-Basic family.
    #[value(name = "6015")]
    T6015,
    /// 6020 / Competino+ family.
    #[value(name = "6020")]
    T6020,
}

impl From<Target> for FirmwareModel {
    fn from(target: Target) -> Self {
        match target {
            Target::T5020 => FirmwareModel::Model5020,
            Target::T6015 => FirmwareModel::Model6015,
            Target::T6020 => FirmwareModel::Model6020,
        }
    }
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Show the connected instrument's identity.
    Info {
        /// Output as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// List the tracks held in instrument memory.
    Tracks {
        /// Output as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Reflash instrument firmware from a vendor image.
    FlashFirmware {
        /// Path to the firmware file (zip, encrypted blob or S-record text).
        firmware: PathBuf,

        /// Force the target model instead of inferring it from the file.
        #[arg(long)]
        model: Option<Target>,

        /// Skip the confirmation prompt.
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// List available serial ports.
    ListPorts {
        /// Output as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions.
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .init();

    debug!("flightrecorder v{}", env!("CARGO_PKG_VERSION"));

    match &cli.command {
        Commands::Info { json } => cmd_info(&cli, *json),
        Commands::Tracks { json } => cmd_tracks(&cli, *json),
        Commands::FlashFirmware {
            firmware,
            model,
            yes,
        } => cmd_flash_firmware(&cli, firmware, *model, *yes),
        Commands::ListPorts { json } => cmd_list_ports(*json),
        Commands::Completions { shell } => {
            cmd_completions(*shell);
            Ok(())
        }
    }
}

/// Open the serial port named on the command line.
fn open_transport(cli: &Cli) -> Result<SerialTransport> {
    open_transport_at(cli, cli.baud)
}

fn open_transport_at(cli: &Cli, baud: u32) -> Result<SerialTransport> {
    let port = cli.port.as_deref().with_context(|| {
        format!(
            "no serial port given; use --port or {}",
            style("FLIGHTRECORDER_PORT").cyan()
        )
    })?;
    SerialTransport::open(port, baud)
        .with_context(|| format!("failed to open serial port {port}"))
}

/// Run `f` against the device family selected on the command line.
fn with_instrument<R>(
    cli: &Cli,
    transport: &mut SerialTransport,
    f: impl FnOnce(&mut dyn Instrument) -> flightrecorder::Result<R>,
) -> Result<R> {
    let result = match cli.device {
        Device::Fifty20 => f(&mut Fifty20::new(transport)),
        Device::Sixty15 => f(&mut Sixty15::new(transport)),
        Device::Flymaster => f(&mut Flymaster::new(transport)),
    };
    result.context("instrument exchange failed")
}

/// Info command implementation.
fn cmd_info(cli: &Cli, json: bool) -> Result<()> {
    let mut transport = open_transport(cli)?;
    let info = with_instrument(cli, &mut transport, |device| device.device_info())?;

    if json {
        let value = serde_json::json!({
            "manufacturer": info.manufacturer,
            "model": info.model,
            "serial_number": info.serial_number,
            "software_version": info.software_version,
            "pilot_name": info.pilot_name,
        });
        println!("{}", serde_json::to_string_pretty(&value).unwrap_or_default());
        return Ok(());
    }

    eprintln!(
        "{} {} {}",
        style("✓").green(),
        style(&info.manufacturer).bold(),
        style(&info.model).cyan().bold()
    );
    eprintln!("  serial number:    {}", info.serial_number);
    eprintln!("  software version: {}", info.software_version);
    if let Some(pilot) = &info.pilot_name {
        eprintln!("  pilot name:       {pilot}");
    }
    Ok(())
}

fn format_duration(track: &TrackSummary) -> String {
    let seconds = track.duration.as_secs();
    format!(
        "{:02}:{:02}:{:02}",
        seconds / 3600,
        (seconds / 60) % 60,
        seconds % 60
    )
}

/// Tracks command implementation.
fn cmd_tracks(cli: &Cli, json: bool) -> Result<()> {
    let mut transport = open_transport(cli)?;
    let tracks = with_instrument(cli, &mut transport, |device| device.track_list())?;

    if json {
        let value: Vec<serde_json::Value> = tracks
            .iter()
            .map(|track| {
                serde_json::json!({
                    "index": track.index,
                    "datetime": track.datetime.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
                    "duration": format_duration(track),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&value).unwrap_or_default());
        return Ok(());
    }

    if tracks.is_empty() {
        eprintln!("{}", style("no tracks in instrument memory").dim());
        return Ok(());
    }
    for track in &tracks {
        eprintln!(
            "  {} track {:02}  {}  {}",
            style("•").green(),
            track.index,
            track.datetime.format("%Y-%m-%d %H:%M:%S"),
            format_duration(track)
        );
    }
    Ok(())
}

/// Pick the image matching `model`, or the first one.
fn select_image(images: Vec<FirmwareImage>, model: Option<Target>) -> Result<FirmwareImage> {
    match model {
        None => images
            .into_iter()
            .next()
            .context("file contains no firmware image"),
        Some(target) => {
            let wanted: FirmwareModel = target.into();
            images
                .into_iter()
                .find(|image| image.model == wanted)
                .with_context(|| format!("file contains no firmware image for model {wanted}"))
        }
    }
}

fn confirm(prompt: &str) -> Result<bool> {
    eprint!("{prompt} [y/N] ");
    io::stderr().flush().ok();
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

fn progress_bar(quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(0);
    #[allow(clippy::unwrap_used)] // Static template string
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    bar.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    bar
}

/// Flash firmware command implementation.
fn cmd_flash_firmware(cli: &Cli, path: &PathBuf, model: Option<Target>, yes: bool) -> Result<()> {
    if !cli.quiet {
        eprintln!(
            "{} loading firmware {}",
            style("📦").cyan(),
            style(path.display()).bold()
        );
    }
    let images = firmware::load_file(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    if images.is_empty() {
        bail!("{} is not a recognizable firmware image", path.display());
    }
    let image = select_image(images, model)?;

    if !cli.quiet {
        eprintln!(
            "{} image for model {}: {} records",
            style("ℹ").blue(),
            style(image.model).cyan().bold(),
            image.srecords.records().len()
        );
    }

    if !yes
        && !confirm(&format!(
            "Reflash the instrument on {} with the {} image? Interrupting this will brick the device.",
            cli.port.as_deref().unwrap_or("?"),
            image.model
        ))?
    {
        bail!("aborted");
    }

    // the M32C boot agent answers its sync pattern at 9600 baud only
    let mut transport = match image.model {
        FirmwareModel::Model6015 => open_transport(cli)?,
        FirmwareModel::Model5020 | FirmwareModel::Model6020 => open_transport_at(cli, 9_600)?,
    };
    let bar = progress_bar(cli.quiet);
    bar.set_message("flashing");

    match image.model {
        FirmwareModel::Model6015 => {
            let mut device = Sixty15::new(&mut transport);
            device.flash_firmware(&image.srecords, &mut |sent, total| {
                bar.set_length(total as u64);
                bar.set_position(sent as u64);
            })?;
        }
        FirmwareModel::Model5020 | FirmwareModel::Model6020 => {
            // the 5020 boot agent tops out at 19200 baud
            let baud = if image.model == FirmwareModel::Model5020 {
                19_200
            } else {
                57_600
            };
            let mut programmer =
                FlashProgrammer::new(&mut transport, FlashProfile::m32c87(baud));
            programmer.program(&image.srecords, &mut |written, total| {
                bar.set_length(total as u64);
                bar.set_position(written as u64);
            })?;
        }
    }

    bar.finish_with_message("done");
    if !cli.quiet {
        eprintln!("\n{} firmware update complete", style("🎉").green().bold());
    }
    Ok(())
}

/// List ports command implementation.
fn cmd_list_ports(json: bool) -> Result<()> {
    let ports = SerialTransport::available_ports().context("failed to enumerate serial ports")?;

    if json {
        let value: Vec<serde_json::Value> = ports
            .iter()
            .map(|port| {
                let (vid, pid, product) = match &port.port_type {
                    serialport::SerialPortType::UsbPort(info) => {
                        (Some(info.vid), Some(info.pid), info.product.clone())
                    }
                    _ => (None, None, None),
                };
                serde_json::json!({
                    "name": port.port_name,
                    "vid": vid,
                    "pid": pid,
                    "product": product,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&value).unwrap_or_default());
        return Ok(());
    }

    if ports.is_empty() {
        eprintln!("{}", style("no serial ports found").dim());
        return Ok(());
    }
    for port in &ports {
        let product = match &port.port_type {
            serialport::SerialPortType::UsbPort(info) => {
                info.product.clone().unwrap_or_default()
            }
            _ => String::new(),
        };
        if product.is_empty() {
            eprintln!("  {} {}", style("•").green(), style(&port.port_name).cyan());
        } else {
            eprintln!(
                "  {} {} - {}",
                style("•").green(),
                style(&port.port_name).cyan(),
                style(product).dim()
            );
        }
    }
    Ok(())
}

/// Generate shell completions.
fn cmd_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut io::stdout());
}

#[cfg(test)]
mod cli_tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_command_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_info() {
        let cli =
            Cli::try_parse_from(["flightrecorder", "--port", "/dev/ttyUSB0", "info"]).unwrap();
        assert_eq!(cli.port.as_deref(), Some("/dev/ttyUSB0"));
        assert!(matches!(cli.command, Commands::Info { json: false }));
    }

    #[test]
    fn parse_tracks_json() {
        let cli = Cli::try_parse_from(["flightrecorder", "tracks", "--json"]).unwrap();
        assert!(matches!(cli.command, Commands::Tracks { json: true }));
    }

    #[test]
    fn parse_flash_firmware() {
        let cli = Cli::try_parse_from([
            "flightrecorder",
            "--device",
            "sixty15",
            "flash-firmware",
            "Fl6015.zip",
            "--model",
            "6015",
            "-y",
        ])
        .unwrap();
        assert!(matches!(cli.device, Device::Sixty15));
        if let Commands::FlashFirmware {
            firmware,
            model,
            yes,
        } = cli.command
        {
            assert_eq!(firmware.to_str().unwrap(), "Fl6015.zip");
            assert!(matches!(model, Some(Target::T6015)));
            assert!(yes);
        } else {
            panic!("expected FlashFirmware command");
        }
    }

    #[test]
    fn parse_defaults() {
        let cli = Cli::try_parse_from(["flightrecorder", "list-ports"]).unwrap();
        assert!(matches!(cli.device, Device::Fifty20));
        assert_eq!(cli.baud, 57_600);
        assert!(!cli.quiet);
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn invalid_device_is_rejected() {
        assert!(Cli::try_parse_from(["flightrecorder", "--device", "nonsense", "info"]).is_err());
    }

    #[test]
    fn select_image_prefers_requested_model() {
        use flightrecorder::firmware::SRecordFile;
        let images = vec![
            FirmwareImage {
                model: FirmwareModel::Model6020,
                srecords: SRecordFile::parse(Vec::<String>::new()).unwrap(),
            },
            FirmwareImage {
                model: FirmwareModel::Model5020,
                srecords: SRecordFile::parse(Vec::<String>::new()).unwrap(),
            },
        ];
        let picked = select_image(images, Some(Target::T5020)).unwrap();
        assert_eq!(picked.model, FirmwareModel::Model5020);
    }

    #[test]
    fn select_image_without_match_fails() {
        let images = vec![FirmwareImage {
            model: FirmwareModel::Model6020,
            srecords: flightrecorder::firmware::SRecordFile::parse(Vec::<String>::new()).unwrap(),
        }];
        assert!(select_image(images, Some(Target::T6015)).is_err());
    }
}
