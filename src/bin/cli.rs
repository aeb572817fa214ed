//! Serline CLI - line-oriented serial monitor
//!
//! Opens a serial port, hands it to a background `SerialReader`, prints every
//! received line and sends stdin lines terminated by the active delimiter.

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use serline_core::{
    AppConfig, DecodeMode, Delimiter, LoggingConfig, ReaderHandle, ReaderState, SerialConnection,
    SerialFlowControl, SerialParity, SerialReader,
};
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// CLI output format
#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Human-readable text
    Text,
    /// JSON lines for scripting
    Json,
}

/// Decode mode flag
#[derive(Debug, Clone, Copy, ValueEnum)]
enum DecodeArg {
    /// Decode each extracted line
    Segment,
    /// Decode each read chunk
    Chunk,
}

impl From<DecodeArg> for DecodeMode {
    fn from(arg: DecodeArg) -> Self {
        match arg {
            DecodeArg::Segment => DecodeMode::Segment,
            DecodeArg::Chunk => DecodeMode::Chunk,
        }
    }
}

/// Serline CLI
#[derive(Parser, Debug)]
#[command(
    name = "serline",
    version,
    about = "Line-oriented serial monitor",
    long_about = None
)]
struct Cli {
    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Config file (defaults to the platform config directory)
    #[arg(long, env = "SERLINE_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Quiet mode (errors only)
    #[arg(short, long)]
    quiet: bool,

    /// Also write logs to the platform log directory
    #[arg(long)]
    log_file: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List available serial ports
    ListPorts {
        /// Show detailed info
        #[arg(short, long)]
        detailed: bool,
    },

    /// Open a port and print received lines
    Monitor(MonitorArgs),

    /// Show the effective configuration
    Config {
        /// Print the config file path only
        #[arg(long)]
        path: bool,

        /// Write the effective configuration back to the file
        #[arg(long)]
        save: bool,
    },
}

/// Options of the `monitor` subcommand
#[derive(Args, Debug)]
struct MonitorArgs {
    /// Serial port name (e.g., COM3, /dev/ttyUSB0)
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate
    #[arg(short, long)]
    baud: Option<u32>,

    /// Data bits (5-8)
    #[arg(long)]
    data_bits: Option<u8>,

    /// Parity (none, odd, even)
    #[arg(long)]
    parity: Option<SerialParity>,

    /// Stop bits (1, 2)
    #[arg(long)]
    stop_bits: Option<u8>,

    /// Flow control (none, hw, sw)
    #[arg(long)]
    flow: Option<SerialFlowControl>,

    /// Line delimiter: lf, crlf, cr, none or escaped text such as "\r\n"
    #[arg(short, long)]
    delimiter: Option<Delimiter>,

    /// How received bytes are decoded
    #[arg(long, value_enum)]
    decode: Option<DecodeArg>,

    /// Read poll timeout (ms)
    #[arg(long)]
    read_timeout: Option<u64>,

    /// Prefix lines with timestamps
    #[arg(short, long)]
    timestamps: bool,

    /// Echo sent lines
    #[arg(long)]
    echo: bool,

    /// Send this text (plus delimiter) after opening
    #[arg(short = 'c', long)]
    send: Option<String>,

    /// Send these hex bytes verbatim after opening
    #[arg(long)]
    send_hex: Option<String>,

    /// Exit after timeout (seconds)
    #[arg(long)]
    timeout: Option<u64>,

    /// Do not forward stdin
    #[arg(long)]
    no_stdin: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };
    if cli.verbose {
        config.logging.level = "debug".to_string();
    } else if cli.quiet {
        config.logging.level = "warn".to_string();
    }
    if cli.log_file && config.logging.directory.is_none() {
        config.logging.directory = serline_core::config::log_dir();
    }
    let _log_guard = init_logging(&config.logging)?;

    match &cli.command {
        Commands::ListPorts { detailed } => list_ports(&cli, *detailed),
        Commands::Monitor(args) => monitor(&cli, args, config),
        Commands::Config { path, save } => show_config(&cli, &config, *path, *save),
    }
}

/// Install the tracing subscriber; the returned guard flushes the log file
fn init_logging(
    logging: &LoggingConfig,
) -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let stderr_layer = if logging.json {
        fmt::layer().json().with_writer(io::stderr).boxed()
    } else {
        fmt::layer().with_writer(io::stderr).boxed()
    };

    let (file_layer, guard) = match &logging.directory {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "serline.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}

fn list_ports(cli: &Cli, detailed: bool) -> anyhow::Result<()> {
    let ports = serline_core::list_ports()?;

    if ports.is_empty() {
        if !cli.quiet {
            println!("No serial ports found.");
        }
        return Ok(());
    }

    match cli.format {
        OutputFormat::Json => {
            let json: Vec<serde_json::Value> = ports
                .iter()
                .map(|p| {
                    serde_json::json!({
                        "name": p.port_name,
                        "type": format!("{:?}", p.port_type)
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Text => {
            if detailed {
                println!("Available Serial Ports:");
                println!("{:-<60}", "");
                for port in &ports {
                    println!("  {} [{:?}]", port.port_name, port.port_type);
                }
            } else {
                for port in &ports {
                    println!("{}", port.port_name);
                }
            }
        }
    }

    Ok(())
}

fn monitor(cli: &Cli, args: &MonitorArgs, mut config: AppConfig) -> anyhow::Result<()> {
    let MonitorArgs {
        port,
        baud,
        data_bits,
        parity,
        stop_bits,
        flow,
        delimiter,
        decode,
        read_timeout,
        timestamps,
        echo,
        send,
        send_hex,
        timeout,
        no_stdin,
    } = args;

    if let Some(port) = port {
        config.serial.port.clone_from(port);
    }
    if let Some(baud) = baud {
        config.serial.baud_rate = *baud;
    }
    if let Some(bits) = data_bits {
        config.serial.data_bits = *bits;
    }
    if let Some(parity) = parity {
        config.serial.parity = *parity;
    }
    if let Some(bits) = stop_bits {
        config.serial.stop_bits = *bits;
    }
    if let Some(flow) = flow {
        config.serial.flow_control = *flow;
    }
    if let Some(delimiter) = delimiter {
        config.reader.delimiter = delimiter.clone();
    }
    if let Some(decode) = decode {
        config.reader.decode_mode = (*decode).into();
    }
    if let Some(ms) = read_timeout {
        config.reader.read_timeout_ms = *ms;
    }

    if !cli.quiet {
        eprintln!("Connecting to {}...", config.serial.summary());
    }
    let connection = SerialConnection::open(&config.serial)
        .with_context(|| format!("opening {}", config.serial.port))?;

    let (mut reader, lines) = SerialReader::with_channel(Box::new(connection), config.reader);
    reader.start()?;
    let handle = reader.handle();

    if !cli.quiet {
        eprintln!(
            "Connected. Delimiter: {}. Type ':delimiter <lf|crlf|cr|none>' to change it, Ctrl+C to exit.",
            handle.delimiter()
        );
    }

    {
        let handle = handle.clone();
        ctrlc::set_handler(move || handle.stop()).context("installing Ctrl+C handler")?;
    }

    if let Some(text) = send {
        send_text(cli, &handle, text, *echo, *timestamps);
    }
    if let Some(hex_data) = send_hex {
        let bytes = hex::decode(hex_data.replace(' ', "")).context("invalid --send-hex data")?;
        handle.enqueue_write(bytes);
    }

    if !*no_stdin {
        let handle = handle.clone();
        let (echo, timestamps) = (*echo, *timestamps);
        let quiet = cli.quiet;
        let format = cli.format;
        std::thread::Builder::new()
            .name("serline-stdin".to_string())
            .spawn(move || forward_stdin(&handle, echo && !quiet, timestamps, format))
            .context("spawning stdin thread")?;
    }

    let deadline = timeout.map(|t| Instant::now() + Duration::from_secs(t));
    loop {
        match lines.recv_timeout(Duration::from_millis(100)) {
            Ok(line) => print_line(cli.format, "<<", &line, *timestamps),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        }

        if deadline.is_some_and(|d| Instant::now() > d) {
            reader.stop();
        }
        if reader.state() != ReaderState::Running && lines.is_empty() {
            break;
        }
    }

    reader.stop();
    reader.join()?;
    // Lines framed between the last poll and the join.
    for line in lines.try_iter() {
        print_line(cli.format, "<<", &line, *timestamps);
    }

    let stats = reader.stats();
    tracing::info!(
        lines = stats.lines_emitted,
        bytes_read = stats.bytes_read,
        bytes_written = stats.bytes_written,
        write_errors = stats.write_errors,
        "Monitor finished"
    );
    if !cli.quiet {
        eprintln!("Disconnected.");
    }
    Ok(())
}

fn send_text(cli: &Cli, handle: &ReaderHandle, text: &str, echo: bool, timestamps: bool) {
    handle.enqueue_write(handle.delimiter().terminate(text));
    if echo && !cli.quiet {
        print_line(cli.format, ">>", text, timestamps);
    }
}

fn forward_stdin(handle: &ReaderHandle, echo: bool, timestamps: bool, format: OutputFormat) {
    for line in io::stdin().lock().lines() {
        let Ok(line) = line else { break };
        if !handle.is_running() {
            break;
        }

        match StdinInput::parse(&line) {
            StdinInput::SetDelimiter(delimiter) => {
                eprintln!("Delimiter: {delimiter}");
                handle.set_delimiter(delimiter);
            }
            StdinInput::ShowDelimiter => eprintln!("Delimiter: {}", handle.delimiter()),
            StdinInput::Data(text) => {
                handle.enqueue_write(handle.delimiter().terminate(text));
                if echo {
                    print_line(format, ">>", text, timestamps);
                }
            }
        }
    }
}

/// One line typed on stdin
#[derive(Debug, PartialEq, Eq)]
enum StdinInput<'a> {
    /// `:delimiter <value>`
    SetDelimiter(Delimiter),
    /// `:delimiter` without a value
    ShowDelimiter,
    /// Anything else, sent to the port
    Data(&'a str),
}

impl<'a> StdinInput<'a> {
    fn parse(line: &'a str) -> Self {
        let Some(rest) = line.strip_prefix(":delimiter") else {
            return Self::Data(line);
        };
        let arg = rest.trim();
        if arg.is_empty() {
            Self::ShowDelimiter
        } else if rest.starts_with(char::is_whitespace) {
            match arg.parse::<Delimiter>() {
                Ok(delimiter) => Self::SetDelimiter(delimiter),
                Err(never) => match never {},
            }
        } else {
            Self::Data(line)
        }
    }
}

fn print_line(format: OutputFormat, prefix: &str, line: &str, timestamps: bool) {
    let now = chrono::Local::now();
    match format {
        OutputFormat::Json => {
            let record = serde_json::json!({
                "timestamp": now.to_rfc3339(),
                "direction": if prefix == ">>" { "tx" } else { "rx" },
                "line": line,
            });
            println!("{record}");
        }
        OutputFormat::Text if timestamps => {
            println!("{} {prefix} {line}", now.format("%H:%M:%S %d/%m/%Y"));
        }
        OutputFormat::Text => println!("{prefix} {line}"),
    }
}

fn show_config(cli: &Cli, config: &AppConfig, path_only: bool, save: bool) -> anyhow::Result<()> {
    let path = cli.config.clone().or_else(serline_core::config::config_path);

    if path_only {
        match path {
            Some(path) => println!("{}", path.display()),
            None => println!("(no config directory)"),
        }
        return Ok(());
    }

    if save {
        let path = path.context("no config path available")?;
        config.save_to(&path)?;
        if !cli.quiet {
            eprintln!("Saved {}", path.display());
        }
    }

    match cli.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
        OutputFormat::Text => print!("{}", toml::to_string_pretty(config)?),
    }
    Ok(())
}
