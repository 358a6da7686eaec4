use std::fs;
use std::io::Cursor;
use std::process;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use modprog_lib::bus::{DEFAULT_FLASH_WORDS, LANE_COUNT};
use modprog_lib::host::{self, DEFAULT_BAUD, HostClient};
use modprog_lib::ram::RAM_TEST_WORDS;
use modprog_lib::{CommandServer, ServerConfig, SimModule};

#[derive(Parser, Debug)]
#[command(author, version, about = "Parallel memory-module programmer CLI", long_about = None)]
struct Cli {
    /// Serial port device
    #[arg(short = 'p', long = "port")]
    port: String,

    /// Serial baud rate
    #[arg(short = 'b', long = "baud", default_value_t = DEFAULT_BAUD)]
    baud: u32,

    /// Seconds to wait for a response before giving up
    #[arg(long = "timeout", default_value_t = 20)]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Read the manufacturer and device IDs of the flash pair
    #[command(name = "id")]
    Id,

    /// Erase both flash chips
    #[command(name = "erase")]
    Erase,

    /// Read flash contents into a file
    #[command(name = "read_flash")]
    ReadFlash(ReadFlash),

    /// Program a file into flash
    #[command(name = "write_flash")]
    WriteFlash(WriteFlash),

    /// Run the RAM fill/verify stress test
    #[command(name = "test_ram")]
    TestRam,

    /// Run the device-side engine against the simulated module
    #[command(name = "serve")]
    Serve(Serve),
}

#[derive(Parser, Debug)]
struct ReadFlash {
    /// Output file
    file: String,

    /// Start address in words
    #[arg(short = 'a', long = "address", default_value_t = 0)]
    address: u32,

    /// Number of words to read (defaults to the full flash)
    #[arg(short = 'n', long = "words")]
    words: Option<u32>,
}

#[derive(Parser, Debug)]
struct WriteFlash {
    /// Input file; padded with 0xFF to a whole number of words
    file: String,

    /// Start address in words
    #[arg(short = 'a', long = "address", default_value_t = 0)]
    address: u32,

    /// Erase the chips before programming
    #[arg(short = 'e', long = "erase-first")]
    erase_first: bool,
}

#[derive(Parser, Debug)]
struct Serve {
    /// Words of simulated flash
    #[arg(long = "flash-words", default_value_t = DEFAULT_FLASH_WORDS)]
    flash_words: u32,

    /// Words covered by the simulated RAM test
    #[arg(long = "ram-words", default_value_t = RAM_TEST_WORDS)]
    ram_words: u32,
}

/// Check that `port_name` exists, listing the alternatives if it does not.
fn check_port_available(port_name: &str) -> Result<(), String> {
    let ports = serialport::available_ports()
        .map_err(|e| format!("Failed to get available ports list: {}", e))?;
    if ports.iter().any(|p| p.port_name == port_name) {
        return Ok(());
    }
    let names: Vec<String> = ports.into_iter().map(|p| p.port_name).collect();
    Err(format!(
        "The specified port '{}' does not exist. Available ports: {}",
        port_name,
        if names.is_empty() {
            "none".to_string()
        } else {
            names.join(", ")
        }
    ))
}

fn byte_progress(total: u64, message: &'static str) -> ProgressBar {
    let bar = ProgressBar::new(total);
    bar.set_style(
        ProgressStyle::with_template("{msg} [{wide_bar}] {bytes}/{total_bytes} ({eta})").unwrap(),
    );
    bar.set_message(message);
    bar
}

fn spinner(message: &'static str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.enable_steady_tick(Duration::from_millis(100));
    bar.set_style(ProgressStyle::with_template("{spinner} {msg}").unwrap());
    bar.set_message(message);
    bar
}

fn run_id(client: &mut HostClient<Box<dyn serialport::SerialPort>>) -> anyhow::Result<()> {
    let ids = client.read_ids().context("reading chip IDs")?;
    let mfr = ids.manufacturer_ids();
    let dev = ids.device_ids();
    println!("manufacturer IDs: {:04x} {:04x}", mfr[0], mfr[1]);
    println!("device IDs:       {:04x} {:04x}", dev[0], dev[1]);
    Ok(())
}

fn run_erase(client: &mut HostClient<Box<dyn serialport::SerialPort>>) -> anyhow::Result<()> {
    let bar = spinner("Erasing flash...");
    client.erase().context("erasing flash")?;
    bar.finish_with_message("Erase complete");
    Ok(())
}

fn run_read_flash(
    client: &mut HostClient<Box<dyn serialport::SerialPort>>,
    params: &ReadFlash,
) -> anyhow::Result<()> {
    let words = params.words.unwrap_or(DEFAULT_FLASH_WORDS);
    let file = fs::File::create(&params.file)
        .with_context(|| format!("creating {}", params.file))?;
    let bar = byte_progress(words as u64 * LANE_COUNT as u64, "Reading flash");
    let mut out = bar.wrap_write(file);
    client
        .read_flash(params.address, words, &mut out)
        .context("reading flash")?;
    bar.finish_with_message("Read complete");
    Ok(())
}

fn run_write_flash(
    client: &mut HostClient<Box<dyn serialport::SerialPort>>,
    params: &WriteFlash,
) -> anyhow::Result<()> {
    let mut data = fs::read(&params.file).with_context(|| format!("reading {}", params.file))?;
    while data.len() % LANE_COUNT != 0 {
        data.push(0xFF);
    }
    let words = (data.len() / LANE_COUNT) as u32;

    if params.erase_first {
        run_erase(client)?;
    }

    let bar = byte_progress(data.len() as u64, "Programming flash");
    let mut reader = bar.wrap_read(Cursor::new(data));
    client
        .write_flash(params.address, words, &mut reader)
        .context("programming flash")?;
    bar.finish_with_message("Program complete");
    Ok(())
}

fn run_test_ram(client: &mut HostClient<Box<dyn serialport::SerialPort>>) -> anyhow::Result<()> {
    let bar = spinner("Testing RAM...");
    let report = client.test_ram().context("running RAM test")?;
    bar.finish_with_message("RAM test complete");
    println!("error count, chip pair 0: {}", report.errors_pair0);
    println!("error count, chip pair 1: {}", report.errors_pair1);
    if !report.is_clean() {
        anyhow::bail!("RAM test found mismatches");
    }
    Ok(())
}

fn run_serve(args: &Cli, params: &Serve) -> anyhow::Result<()> {
    let bus = SimModule::new(params.flash_words, params.ram_words);
    let link = host::open_port(&args.port, args.baud).context("opening serial port")?;
    let config = ServerConfig {
        ram_test_words: params.ram_words,
        ..ServerConfig::default()
    };
    println!("Serving a simulated module on {}", args.port);
    let mut server = CommandServer::with_config(bus, link, config);
    server.run().context("serving commands")?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    // Log level comes from RUST_LOG, e.g. RUST_LOG=modprog_lib=debug
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("off"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let args = Cli::parse();

    if let Err(e) = check_port_available(&args.port) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }

    if let Commands::Serve(params) = &args.command {
        return run_serve(&args, params);
    }

    let port = host::open_port(&args.port, args.baud).context("opening serial port")?;
    let mut client = HostClient::with_timeout(port, Duration::from_secs(args.timeout));

    match &args.command {
        Commands::Id => run_id(&mut client),
        Commands::Erase => run_erase(&mut client),
        Commands::ReadFlash(params) => run_read_flash(&mut client, params),
        Commands::WriteFlash(params) => run_write_flash(&mut client, params),
        Commands::TestRam => run_test_ram(&mut client),
        Commands::Serve(_) => unreachable!(),
    }
}
