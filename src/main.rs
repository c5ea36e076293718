//! numpadd – virtual numpad daemon for laptop touchpads with a printed
//! numpad overlay.
//!
//! CLI entry point.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Mutex;
use std::sync::atomic::Ordering;
use std::time::SystemTime;

use clap::Parser;
use log::{LevelFilter, Log, Metadata, Record};

use numpadd::devices::list_touch_devices;
use numpadd::manager::NumpadManager;

#[derive(Parser)]
#[command(
    name = "numpadd",
    about = "Virtual numpad for touchpads with a numpad overlay"
)]
struct Cli {
    /// Path to the layout file for this touchpad model
    #[arg(default_value = "/etc/numpadd/layout.toml")]
    layout: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// List available touchpad devices and exit
    #[arg(short, long)]
    list_devices: bool,
}

/// Logger writing timestamped lines to stderr (journald-friendly when run
/// as a systemd service) and optionally to an append-mode log file.
struct NumpadLogger {
    level: LevelFilter,
    file: Option<Mutex<std::fs::File>>,
}

impl Log for NumpadLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level && metadata.target().starts_with("numpadd")
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let secs = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let line = format!(
            "[{secs} {:5} {}] {}\n",
            record.level(),
            record.target(),
            record.args()
        );

        eprint!("{line}");
        if let Some(ref file) = self.file {
            if let Ok(mut f) = file.lock() {
                let _ = f.write_all(line.as_bytes());
            }
        }
    }

    fn flush(&self) {
        if let Some(ref file) = self.file {
            if let Ok(mut f) = file.lock() {
                let _ = f.flush();
            }
        }
    }
}

/// Install the logger. The layout file's `log_level` applies unless
/// `--verbose` overrides it; a bad `log_file` only costs a warning.
fn init_logging(manager: &NumpadManager, verbose: bool) {
    let level: LevelFilter = if verbose {
        LevelFilter::Debug
    } else {
        manager
            .config_log_level()
            .parse()
            .unwrap_or(LevelFilter::Info)
    };

    let file = manager.config_log_file().and_then(|path| {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => Some(Mutex::new(file)),
            Err(e) => {
                eprintln!("Warning: cannot open log file '{path}': {e}");
                None
            }
        }
    });

    log::set_boxed_logger(Box::new(NumpadLogger { level, file })).expect("Failed to set logger");
    log::set_max_level(level);
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.list_devices {
        return list_touch_devices();
    }

    // Parse the layout before logger init so the configured level applies
    // from the first message.
    let mut manager = match NumpadManager::new(&cli.layout) {
        Ok(manager) => manager,
        Err(e) => {
            eprintln!(
                "Error: {e}\n\n\
                 To find available touchpad devices, run:\n\
                 \x20 numpadd --list-devices"
            );
            return ExitCode::FAILURE;
        }
    };
    init_logging(&manager, cli.verbose);

    let running = manager.running_flag();
    ctrlc::set_handler(move || {
        running.store(false, Ordering::Relaxed);
    })
    .expect("Error setting Ctrl-C handler");

    log::info!("Loaded layout from: {}", cli.layout.display());
    match manager.start() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
